//! # Name Registries
//!
//! Configuration files refer to nonlinearities, recurrent cells and
//! optimizers by name. Each family has an explicit table here; names are
//! resolved once when the configuration is loaded and an unknown name is
//! reported together with every valid alternative.

use std::fmt;

use candle_core::Tensor;

use crate::error::{ArborError, Result};

/// A fixed name → value table.
#[derive(Debug)]
pub struct Registry<T: 'static> {
    kind: &'static str,
    entries: &'static [(&'static str, T)],
}

impl<T: Copy + 'static> Registry<T> {
    pub const fn new(kind: &'static str, entries: &'static [(&'static str, T)]) -> Self {
        Self { kind, entries }
    }

    /// Look up `name` (exact, case-sensitive).
    pub fn resolve(&self, name: &str) -> Result<T> {
        self.entries
            .iter()
            .find(|(entry, _)| *entry == name)
            .map(|&(_, value)| value)
            .ok_or_else(|| ArborError::UnknownName {
                registry: self.kind,
                name: name.to_string(),
                valid: self.names(),
            })
    }

    /// Every registered name, in table order.
    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|(name, _)| *name).collect()
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }
}

/// Elementwise activation functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nonlinearity {
    Identity,
    Tanh,
    Relu,
    LeakyRelu,
    Gelu,
    Sigmoid,
}

impl Nonlinearity {
    pub fn apply(self, xs: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Nonlinearity::Identity => Ok(xs.clone()),
            Nonlinearity::Tanh => xs.tanh(),
            Nonlinearity::Relu => xs.relu(),
            Nonlinearity::LeakyRelu => xs.maximum(&(xs * 0.1)?),
            Nonlinearity::Gelu => xs.gelu(),
            Nonlinearity::Sigmoid => (xs.neg()?.exp()? + 1.0)?.recip(),
        }
    }
}

/// Recurrent cell families understood by the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecurrentCell {
    Lstm,
    Gru,
}

/// The two built-in optimizer policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptimizerKind {
    Adam,
    AmsGrad,
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizerKind::Adam => write!(f, "Adam"),
            OptimizerKind::AmsGrad => write!(f, "AMSGrad"),
        }
    }
}

pub static NONLINEARITIES: Registry<Nonlinearity> = Registry::new(
    "nonlinearity",
    &[
        ("identity", Nonlinearity::Identity),
        ("tanh", Nonlinearity::Tanh),
        ("relu", Nonlinearity::Relu),
        ("leaky_relu", Nonlinearity::LeakyRelu),
        ("gelu", Nonlinearity::Gelu),
        ("sigmoid", Nonlinearity::Sigmoid),
    ],
);

pub static RECURRENT_CELLS: Registry<RecurrentCell> = Registry::new(
    "recurrent cell",
    &[("LSTM", RecurrentCell::Lstm), ("GRU", RecurrentCell::Gru)],
);

pub static OPTIMIZERS: Registry<OptimizerKind> = Registry::new(
    "optimizer",
    &[("Adam", OptimizerKind::Adam), ("AMSGrad", OptimizerKind::AmsGrad)],
);

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn resolves_known_names() {
        assert_eq!(NONLINEARITIES.resolve("gelu").unwrap(), Nonlinearity::Gelu);
        assert_eq!(RECURRENT_CELLS.resolve("GRU").unwrap(), RecurrentCell::Gru);
        assert_eq!(OPTIMIZERS.resolve("AMSGrad").unwrap(), OptimizerKind::AmsGrad);
    }

    #[test]
    fn unknown_name_enumerates_registry() {
        let err = RECURRENT_CELLS.resolve("CifLSTM").unwrap_err();
        match &err {
            ArborError::UnknownName { registry, name, valid } => {
                assert_eq!(*registry, "recurrent cell");
                assert_eq!(name, "CifLSTM");
                assert_eq!(valid, &vec!["LSTM", "GRU"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("LSTM, GRU"));
    }

    #[test]
    fn lookup_is_case_sensitive() {
        assert!(NONLINEARITIES.resolve("Tanh").is_err());
    }

    #[test]
    fn nonlinearities_behave() {
        let xs = Tensor::new(&[-2.0f32, 0.0, 3.0], &Device::Cpu).unwrap();
        let relu = Nonlinearity::Relu.apply(&xs).unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(relu, vec![0.0, 0.0, 3.0]);

        let leaky = Nonlinearity::LeakyRelu.apply(&xs).unwrap().to_vec1::<f32>().unwrap();
        assert!((leaky[0] + 0.2).abs() < 1e-6);
        assert_eq!(leaky[2], 3.0);

        let sig = Nonlinearity::Sigmoid.apply(&xs).unwrap().to_vec1::<f32>().unwrap();
        assert!((sig[1] - 0.5).abs() < 1e-6);
        assert!(sig[0] < 0.5 && sig[2] > 0.5);
    }

    #[test]
    fn optimizer_display_matches_registry_name() {
        for name in OPTIMIZERS.names() {
            assert_eq!(OPTIMIZERS.resolve(name).unwrap().to_string(), name);
        }
    }
}
