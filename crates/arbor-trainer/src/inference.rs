//! Re-parse a dataset with the current model and write CoNLL-U output.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use arbor_core::conllu::{self, Field};
use arbor_core::decode::{ArgmaxDecoder, Decoder, Prediction, TreeDecoder};
use arbor_core::vocab::Vocab;
use arbor_core::{ArborError, Result};

use crate::dataset::Dataset;
use crate::model::ParserModel;

/// Decodes model output and persists it under `<output_root>/parsed/`.
pub struct InferenceRunner {
    decoder: Box<dyn Decoder>,
    output_root: PathBuf,
}

impl InferenceRunner {
    pub fn new(decoder: Box<dyn Decoder>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            decoder,
            output_root: output_root.into(),
        }
    }

    /// Tree decoding when `tree` is set, per-token argmax otherwise.
    pub fn for_output(tree: bool, output_root: impl Into<PathBuf>) -> Self {
        let decoder: Box<dyn Decoder> = if tree {
            Box::new(TreeDecoder)
        } else {
            Box::new(ArgmaxDecoder)
        };
        Self::new(decoder, output_root)
    }

    /// Where a source file with relative path `relative` is written.
    pub fn output_path(&self, relative: &Path) -> PathBuf {
        self.output_root.join("parsed").join(relative)
    }

    /// Parse every file of `dataset` and return the paths written.
    pub fn run<M: ParserModel + ?Sized>(
        &self,
        model: &mut M,
        dataset: &Dataset,
        labels: &Vocab,
    ) -> Result<Vec<PathBuf>> {
        let mut written = Vec::with_capacity(dataset.files().len());
        for (file_index, file) in dataset.files().iter().enumerate() {
            let mut cache: HashMap<usize, Prediction> = HashMap::new();
            for group in dataset.file_batches(file_index)? {
                let batch = dataset.batch(&group)?;
                let probabilities = model.probabilities(&batch)?;
                if probabilities.len() != group.len() {
                    return Err(ArborError::Decode(format!(
                        "model returned {} distributions for {} sentences",
                        probabilities.len(),
                        group.len()
                    )));
                }
                for (&sentence, probs) in group.iter().zip(&probabilities) {
                    cache.insert(sentence, self.decoder.decode(probs)?);
                }
            }

            let range = dataset.file_range(file_index).unwrap_or(0..0);
            let mut sentences = Vec::with_capacity(range.len());
            for index in range {
                let prediction = cache.remove(&index).ok_or_else(|| {
                    ArborError::Decode(format!("no prediction for sentence {index}"))
                })?;
                let mut sentence = dataset.sentences()[index].clone();
                apply(&mut sentence.tokens, &prediction, labels, index)?;
                sentences.push(sentence);
            }

            let path = self.output_path(&file.relative);
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir).map_err(|e| ArborError::io(dir, e))?;
            }
            let out = File::create(&path).map_err(|e| ArborError::io(&path, e))?;
            let mut out = BufWriter::new(out);
            conllu::write_sentences(&mut out, &sentences)
                .and_then(|()| out.flush())
                .map_err(|e| ArborError::io(&path, e))?;

            tracing::debug!(
                dataset = dataset.name(),
                path = %path.display(),
                sentences = sentences.len(),
                "wrote parsed file"
            );
            written.push(path);
        }
        Ok(written)
    }
}

fn apply(
    tokens: &mut [arbor_core::TokenRecord],
    prediction: &Prediction,
    labels: &Vocab,
    sentence: usize,
) -> Result<()> {
    if prediction.heads.len() != tokens.len() + 1 || prediction.labels.len() != tokens.len() + 1 {
        return Err(ArborError::Decode(format!(
            "prediction for sentence {sentence} covers {} positions, expected {}",
            prediction.heads.len(),
            tokens.len() + 1
        )));
    }
    for (i, token) in tokens.iter_mut().enumerate() {
        let label = prediction.labels[i + 1] as u32;
        let deprel = labels.string(label).ok_or_else(|| {
            ArborError::Decode(format!("label index {label} outside the label vocabulary"))
        })?;
        token.set(Field::Head, prediction.heads[i + 1].to_string());
        token.set(Field::Deprel, deprel);
    }
    Ok(())
}
