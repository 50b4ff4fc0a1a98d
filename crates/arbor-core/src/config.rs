//! Training configuration.
//!
//! [`TrainConfig`] is the serialised form read from JSON; every field has a
//! default. Names of nonlinearities, cells, optimizers and vocabularies stay
//! strings until [`TrainConfig::resolve`] checks them against the
//! registries and returns a [`ResolvedConfig`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ArborError, Result};
use crate::registry::{
    Nonlinearity, OptimizerKind, RecurrentCell, NONLINEARITIES, OPTIMIZERS, RECURRENT_CELLS,
};
use crate::vocab::{PretrainedSpec, VocabKind, VOCABS};

/// Where tensors live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceSpec {
    #[default]
    Cpu,
    Cuda(usize),
}

impl FromStr for DeviceSpec {
    type Err = ArborError;

    fn from_str(s: &str) -> Result<Self> {
        if s == "cpu" {
            return Ok(DeviceSpec::Cpu);
        }
        s.strip_prefix("cuda:")
            .and_then(|ordinal| ordinal.parse().ok())
            .map(DeviceSpec::Cuda)
            .ok_or_else(|| ArborError::Config(format!("device {s:?} is not `cpu` or `cuda:N`")))
    }
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSpec::Cpu => write!(f, "cpu"),
            DeviceSpec::Cuda(ordinal) => write!(f, "cuda:{ordinal}"),
        }
    }
}

/// Encoder and classifier shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub n_layers: usize,
    pub recur_size: usize,
    pub hidden_size: usize,
    pub embed_size: usize,
    pub embed_keep_prob: f32,
    pub recur_keep_prob: f32,
    pub hidden_keep_prob: f32,
    pub bidirectional: bool,
    pub hidden_func: String,
    pub recur_cell: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            n_layers: 3,
            recur_size: 400,
            hidden_size: 400,
            embed_size: 100,
            embed_keep_prob: 0.67,
            recur_keep_prob: 0.67,
            hidden_keep_prob: 0.67,
            bidirectional: true,
            hidden_func: "leaky_relu".into(),
            recur_cell: "LSTM".into(),
        }
    }
}

/// Optimizer hyper-parameters shared by Adam and AMSGrad.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            learning_rate: 2e-3,
            beta1: 0.9,
            beta2: 0.9,
            epsilon: 1e-12,
        }
    }
}

/// Shape of the parser output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Separate head and label distributions instead of one joint table.
    pub factorized: bool,
    /// Decode with a maximum spanning tree instead of per-token argmax.
    pub tree: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            factorized: true,
            tree: true,
        }
    }
}

/// Everything a training run needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub max_steps: usize,
    pub max_steps_without_improvement: usize,
    pub print_every: usize,
    pub switch_optimizers: bool,
    pub l2_reg: f64,
    pub model: ModelConfig,
    pub optimizer: OptimizerConfig,
    pub max_buckets: usize,
    /// Token budget per training batch.
    pub batch_size: usize,
    pub seed: u64,
    pub input_vocabs: Vec<String>,
    pub output: OutputConfig,
    pub pretrained_file: Option<PathBuf>,
    pub pretrained_name: Option<String>,
    pub max_embed_count: usize,
    pub min_occur_count: usize,
    pub train_files: Vec<PathBuf>,
    pub dev_files: Vec<PathBuf>,
    pub test_files: Vec<PathBuf>,
    pub save_dir: PathBuf,
    pub device: String,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            max_steps: 50_000,
            max_steps_without_improvement: 5_000,
            print_every: 100,
            switch_optimizers: false,
            l2_reg: 0.0,
            model: ModelConfig::default(),
            optimizer: OptimizerConfig::default(),
            max_buckets: 5,
            batch_size: 5_000,
            seed: 0,
            input_vocabs: vec!["FormTokenVocab".into(), "UPOSTokenVocab".into()],
            output: OutputConfig::default(),
            pretrained_file: None,
            pretrained_name: None,
            max_embed_count: 0,
            min_occur_count: 2,
            train_files: Vec::new(),
            dev_files: Vec::new(),
            test_files: Vec::new(),
            save_dir: PathBuf::from("saves/default"),
            device: "cpu".into(),
        }
    }
}

impl TrainConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a JSON configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ArborError::io(path, e))?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Write this configuration as pretty JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text).map_err(|e| ArborError::io(path, e))
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_patience(mut self, steps: usize) -> Self {
        self.max_steps_without_improvement = steps;
        self
    }

    pub fn with_print_every(mut self, steps: usize) -> Self {
        self.print_every = steps;
        self
    }

    pub fn with_switch_optimizers(mut self, enabled: bool) -> Self {
        self.switch_optimizers = enabled;
        self
    }

    pub fn with_max_buckets(mut self, max_buckets: usize) -> Self {
        self.max_buckets = max_buckets;
        self
    }

    pub fn with_batch_size(mut self, tokens: usize) -> Self {
        self.batch_size = tokens;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_model(mut self, model: ModelConfig) -> Self {
        self.model = model;
        self
    }

    pub fn with_output(mut self, output: OutputConfig) -> Self {
        self.output = output;
        self
    }

    pub fn with_input_vocabs<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.input_vocabs = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_files(mut self, train: Vec<PathBuf>, dev: Vec<PathBuf>, test: Vec<PathBuf>) -> Self {
        self.train_files = train;
        self.dev_files = dev;
        self.test_files = test;
        self
    }

    pub fn with_save_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.save_dir = dir.into();
        self
    }

    pub fn with_device<S: Into<String>>(mut self, device: S) -> Self {
        self.device = device.into();
        self
    }

    /// Check every value and resolve every name.
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        if self.print_every == 0 {
            return Err(ArborError::Config("print_every must be positive".into()));
        }
        if self.max_buckets == 0 {
            return Err(ArborError::Config("max_buckets must be positive".into()));
        }
        if self.batch_size == 0 {
            return Err(ArborError::Config("batch_size must be positive".into()));
        }
        if self.model.n_layers == 0 {
            return Err(ArborError::Config("n_layers must be positive".into()));
        }
        for (name, p) in [
            ("embed_keep_prob", self.model.embed_keep_prob),
            ("recur_keep_prob", self.model.recur_keep_prob),
            ("hidden_keep_prob", self.model.hidden_keep_prob),
        ] {
            if !(p > 0.0 && p <= 1.0) {
                return Err(ArborError::Config(format!("{name} must be in (0, 1], got {p}")));
            }
        }
        if self.train_files.is_empty() {
            return Err(ArborError::Config("no train_files given".into()));
        }
        if self.input_vocabs.is_empty() {
            return Err(ArborError::Config("no input_vocabs given".into()));
        }

        let input_vocabs = self
            .input_vocabs
            .iter()
            .map(|name| VOCABS.resolve(name))
            .collect::<Result<Vec<VocabKind>>>()?;
        let pretrained = PretrainedSpec::new(
            self.pretrained_file.clone(),
            self.pretrained_name.clone(),
            self.max_embed_count,
        )?;

        Ok(ResolvedConfig {
            hidden_func: NONLINEARITIES.resolve(&self.model.hidden_func)?,
            recur_cell: RECURRENT_CELLS.resolve(&self.model.recur_cell)?,
            primary_optimizer: OPTIMIZERS.resolve("Adam")?,
            secondary_optimizer: OPTIMIZERS.resolve("AMSGrad")?,
            input_vocabs,
            pretrained,
            device: self.device.parse()?,
            raw: self.clone(),
        })
    }
}

/// A validated configuration with every name resolved.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub hidden_func: Nonlinearity,
    pub recur_cell: RecurrentCell,
    pub primary_optimizer: OptimizerKind,
    pub secondary_optimizer: OptimizerKind,
    pub input_vocabs: Vec<VocabKind>,
    pub pretrained: Option<PretrainedSpec>,
    pub device: DeviceSpec,
    pub raw: TrainConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conllu::Field;

    fn base() -> TrainConfig {
        TrainConfig::new().with_files(vec!["train.conllu".into()], vec![], vec![])
    }

    #[test]
    fn defaults_resolve() {
        let resolved = base().resolve().unwrap();
        assert_eq!(resolved.recur_cell, RecurrentCell::Lstm);
        assert_eq!(resolved.hidden_func, Nonlinearity::LeakyRelu);
        assert_eq!(resolved.primary_optimizer, OptimizerKind::Adam);
        assert_eq!(resolved.input_vocabs[0].field, Field::Form);
        assert_eq!(resolved.device, DeviceSpec::Cpu);
        assert!(resolved.pretrained.is_none());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: TrainConfig = serde_json::from_str(
            r#"{"max_steps": 10, "model": {"recur_cell": "GRU"}, "train_files": ["a.conllu"]}"#,
        )
        .unwrap();
        assert_eq!(config.max_steps, 10);
        assert_eq!(config.print_every, 100);
        assert_eq!(config.model.recur_size, 400);
        assert_eq!(config.resolve().unwrap().recur_cell, RecurrentCell::Gru);
    }

    #[test]
    fn unknown_cell_is_reported_with_alternatives() {
        let mut config = base();
        config.model.recur_cell = "CifLSTMCell".into();
        let msg = config.resolve().unwrap_err().to_string();
        assert!(msg.contains("CifLSTMCell"));
        assert!(msg.contains("LSTM, GRU"));
    }

    #[test]
    fn unknown_vocab_is_rejected() {
        let config = base().with_input_vocabs(["FormTokenVocab", "SubtokenVocab"]);
        assert!(matches!(
            config.resolve(),
            Err(ArborError::UnknownName { registry: "vocabulary", .. })
        ));
    }

    #[test]
    fn zero_values_are_rejected() {
        assert!(base().with_print_every(0).resolve().is_err());
        assert!(base().with_max_buckets(0).resolve().is_err());
        assert!(base().with_batch_size(0).resolve().is_err());
        assert!(TrainConfig::new().resolve().is_err());
    }

    #[test]
    fn half_a_pretrained_spec_is_rejected() {
        let mut config = base();
        config.pretrained_file = Some("glove.txt".into());
        assert!(matches!(config.resolve(), Err(ArborError::Config(_))));
    }

    #[test]
    fn device_strings() {
        assert_eq!("cpu".parse::<DeviceSpec>().unwrap(), DeviceSpec::Cpu);
        assert_eq!("cuda:1".parse::<DeviceSpec>().unwrap(), DeviceSpec::Cuda(1));
        assert!("gpu".parse::<DeviceSpec>().is_err());
        assert_eq!(DeviceSpec::Cuda(2).to_string(), "cuda:2");
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = base().with_seed(7).with_max_steps(12);
        config.save(&path).unwrap();
        assert_eq!(TrainConfig::load(&path).unwrap(), config);
    }
}
