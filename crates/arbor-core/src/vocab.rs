//! # Vocabularies
//!
//! A vocabulary is a base record (the CoNLL-U field it reads and a string ↔
//! index table with reserved specials) plus one capability describing what
//! backs it: counts collected from the training data, or a pretrained
//! embedding matrix. Which combination is built is chosen by name through
//! [`VOCABS`].

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};

use crate::conllu::{Field, Sentence};
use crate::error::{ArborError, Result};
use crate::registry::Registry;

pub const PAD: u32 = 0;
pub const ROOT: u32 = 1;
pub const UNK: u32 = 2;

/// Strings reserved at the front of every vocabulary.
pub const SPECIALS: [&str; 3] = ["<PAD>", "<ROOT>", "<UNK>"];

/// What backs a vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Backing {
    /// Built from training counts; embeddings are learned.
    Counted,
    /// Loaded from a word-vector file.
    Pretrained,
}

/// A resolved vocabulary name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VocabKind {
    pub field: Field,
    pub backing: Backing,
}

const fn kind(field: Field, backing: Backing) -> VocabKind {
    VocabKind { field, backing }
}

pub static VOCABS: Registry<VocabKind> = Registry::new(
    "vocabulary",
    &[
        ("FormTokenVocab", kind(Field::Form, Backing::Counted)),
        ("LemmaTokenVocab", kind(Field::Lemma, Backing::Counted)),
        ("UPOSTokenVocab", kind(Field::Upos, Backing::Counted)),
        ("XPOSTokenVocab", kind(Field::Xpos, Backing::Counted)),
        ("DeprelTokenVocab", kind(Field::Deprel, Backing::Counted)),
        ("FormPretrainedVocab", kind(Field::Form, Backing::Pretrained)),
        ("LemmaPretrainedVocab", kind(Field::Lemma, Backing::Pretrained)),
        ("UPOSPretrainedVocab", kind(Field::Upos, Backing::Pretrained)),
        ("XPOSPretrainedVocab", kind(Field::Xpos, Backing::Pretrained)),
        ("DeprelPretrainedVocab", kind(Field::Deprel, Backing::Pretrained)),
    ],
);

/// Location and limits of a pretrained word-vector file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PretrainedSpec {
    pub file: PathBuf,
    pub name: String,
    /// Maximum rows to read, 0 for no limit.
    pub max_embed_count: usize,
}

impl PretrainedSpec {
    /// File and name must be given together.
    pub fn new(
        file: Option<PathBuf>,
        name: Option<String>,
        max_embed_count: usize,
    ) -> Result<Option<Self>> {
        match (file, name) {
            (Some(file), Some(name)) => Ok(Some(Self {
                file,
                name,
                max_embed_count,
            })),
            (None, None) => Ok(None),
            _ => Err(ArborError::Config(
                "pretrained_file and pretrained_name must be given together".into(),
            )),
        }
    }
}

/// A dense `[rows, dim]` embedding matrix aligned with a vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub struct Embeddings {
    pub name: String,
    pub dim: usize,
    pub matrix: Vec<f32>,
}

/// Capability attached to a vocabulary record.
#[derive(Debug, Clone, PartialEq)]
pub enum Capability {
    Counted { counts: HashMap<String, usize> },
    Pretrained(Embeddings),
}

/// String ↔ index table for one field.
#[derive(Debug, Clone, PartialEq)]
pub struct Vocab {
    field: Field,
    strings: Vec<String>,
    index: HashMap<String, u32>,
    capability: Capability,
}

impl Vocab {
    fn with_specials(field: Field, capability: Capability) -> Self {
        let mut vocab = Self {
            field,
            strings: Vec::new(),
            index: HashMap::new(),
            capability,
        };
        for special in SPECIALS {
            vocab.insert(special);
        }
        vocab
    }

    fn insert(&mut self, string: &str) -> u32 {
        if let Some(&idx) = self.index.get(string) {
            return idx;
        }
        let idx = self.strings.len() as u32;
        self.strings.push(string.to_string());
        self.index.insert(string.to_string(), idx);
        idx
    }

    /// Count `field` over `sentences`, keeping strings seen at least
    /// `min_occur_count` times. Frequent strings get smaller indices.
    pub fn counted<'a>(
        field: Field,
        sentences: impl IntoIterator<Item = &'a Sentence>,
        min_occur_count: usize,
    ) -> Self {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for sentence in sentences {
            for token in &sentence.tokens {
                *counts.entry(token.get(field).to_string()).or_insert(0) += 1;
            }
        }

        let mut kept: Vec<(&String, &usize)> = counts
            .iter()
            .filter(|&(_, &count)| count >= min_occur_count.max(1))
            .collect();
        kept.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        let kept: Vec<String> = kept.into_iter().map(|(s, _)| s.clone()).collect();

        let mut vocab = Self::with_specials(field, Capability::Counted { counts: HashMap::new() });
        for string in &kept {
            vocab.insert(string);
        }
        vocab.capability = Capability::Counted { counts };
        vocab
    }

    /// Load a word-vector file.
    ///
    /// The first line may be a `rows dims` header; otherwise the dimension
    /// is taken from the first vector. Files ending in `.gz` are
    /// decompressed on the fly.
    pub fn pretrained(field: Field, spec: &PretrainedSpec) -> Result<Self> {
        let path = spec.file.as_path();
        let file = File::open(path).map_err(|e| ArborError::io(path, e))?;
        let reader: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "gz") {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };

        let mut vocab = Self::with_specials(field, Capability::Counted { counts: HashMap::new() });
        let mut dim: Option<usize> = None;
        let mut vectors: Vec<f32> = Vec::new();
        let mut loaded = 0usize;

        for (line_no, line) in BufReader::new(reader).lines().enumerate() {
            let line = line.map_err(|e| ArborError::io(path, e))?;
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.is_empty() {
                continue;
            }
            if line_no == 0 && parts.len() == 2 && parts.iter().all(|p| p.parse::<usize>().is_ok()) {
                dim = parts[1].parse().ok();
                continue;
            }
            if spec.max_embed_count > 0 && loaded >= spec.max_embed_count {
                break;
            }

            let values = parts[1..]
                .iter()
                .map(|p| p.parse::<f32>())
                .collect::<std::result::Result<Vec<f32>, _>>()
                .map_err(|e| ArborError::Malformed {
                    path: path.to_path_buf(),
                    line: line_no + 1,
                    message: format!("bad vector component: {e}"),
                })?;
            let expected = *dim.get_or_insert(values.len());
            if values.len() != expected {
                return Err(ArborError::Malformed {
                    path: path.to_path_buf(),
                    line: line_no + 1,
                    message: format!("expected {expected} components, found {}", values.len()),
                });
            }
            if vocab.index.contains_key(parts[0]) {
                continue;
            }
            vocab.insert(parts[0]);
            vectors.extend_from_slice(&values);
            loaded += 1;
        }

        let dim = dim.unwrap_or(0);
        let mut matrix = vec![0.0f32; SPECIALS.len() * dim];
        matrix.extend_from_slice(&vectors);
        vocab.capability = Capability::Pretrained(Embeddings {
            name: spec.name.clone(),
            dim,
            matrix,
        });

        tracing::info!(
            file = %path.display(),
            rows = loaded,
            dim,
            "loaded pretrained vectors"
        );
        Ok(vocab)
    }

    /// Build the vocabulary a registry entry describes.
    pub fn from_kind<'a>(
        kind: VocabKind,
        sentences: impl IntoIterator<Item = &'a Sentence>,
        min_occur_count: usize,
        pretrained: Option<&PretrainedSpec>,
    ) -> Result<Self> {
        match kind.backing {
            Backing::Counted => Ok(Self::counted(kind.field, sentences, min_occur_count)),
            Backing::Pretrained => {
                let spec = pretrained.ok_or_else(|| {
                    ArborError::Config(format!(
                        "a pretrained {} vocabulary needs pretrained_file and pretrained_name",
                        kind.field
                    ))
                })?;
                Self::pretrained(kind.field, spec)
            }
        }
    }

    /// Index of `string`, `UNK` when absent.
    pub fn lookup(&self, string: &str) -> u32 {
        self.index.get(string).copied().unwrap_or(UNK)
    }

    /// Encode the field of `sentence`, optionally preceded by `ROOT`.
    pub fn encode(&self, sentence: &Sentence, prefix_root: bool) -> Vec<u32> {
        let mut out = Vec::with_capacity(sentence.len() + usize::from(prefix_root));
        if prefix_root {
            out.push(ROOT);
        }
        out.extend(sentence.tokens.iter().map(|t| self.lookup(t.get(self.field))));
        out
    }

    pub fn string(&self, idx: u32) -> Option<&str> {
        self.strings.get(idx as usize).map(String::as_str)
    }

    pub fn field(&self) -> Field {
        self.field
    }

    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    /// Pretrained matrix, if this vocabulary carries one.
    pub fn embeddings(&self) -> Option<&Embeddings> {
        match &self.capability {
            Capability::Pretrained(embeddings) => Some(embeddings),
            Capability::Counted { .. } => None,
        }
    }

    /// Training count of `string`, for counted vocabularies.
    pub fn count(&self, string: &str) -> Option<usize> {
        match &self.capability {
            Capability::Counted { counts } => counts.get(string).copied(),
            Capability::Pretrained(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.len() <= SPECIALS.len()
    }
}
