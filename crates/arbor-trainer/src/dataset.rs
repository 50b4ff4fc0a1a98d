//! Encoded datasets and batch iteration.
//!
//! A [`Dataset`] keeps the parsed sentences of every source file, one
//! [`Multibucket`] per input vocabulary plus two for the gold heads and
//! labels, and the per-sentence global ids into each of them. Batches are
//! plain lists of sentence indices; [`Dataset::batch`] turns one into dense
//! arrays only when it is consumed.

use std::ops::Range;

use arbor_core::buckets::{Multibucket, PaddedBatch};
use arbor_core::conllu::{ConlluReader, Field, Sentence, SourceFile};
use arbor_core::config::ResolvedConfig;
use arbor_core::vocab::{Vocab, SPECIALS};
use arbor_core::{ArborError, Result};
use oorandom::Rand32;

const ROOT_TOKEN: &str = SPECIALS[1];

/// Vocabularies shared by the train, dev and test sets.
#[derive(Debug, Clone)]
pub struct Vocabs {
    pub inputs: Vec<Vocab>,
    pub deprel: Vocab,
}

impl Vocabs {
    /// Build every input vocabulary and the label vocabulary from
    /// training sentences.
    pub fn build<'a>(
        config: &ResolvedConfig,
        sentences: impl IntoIterator<Item = &'a Sentence> + Clone,
    ) -> Result<Self> {
        let inputs = config
            .input_vocabs
            .iter()
            .map(|&kind| {
                Vocab::from_kind(
                    kind,
                    sentences.clone(),
                    config.raw.min_occur_count,
                    config.pretrained.as_ref(),
                )
            })
            .collect::<Result<Vec<_>>>()?;
        let deprel = Vocab::counted(Field::Deprel, sentences, 1);
        Ok(Self { inputs, deprel })
    }

    /// Number of dependency labels, specials included.
    pub fn n_labels(&self) -> usize {
        self.deprel.len()
    }
}

/// Global ids of one sentence in each multibucket.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SentenceIds {
    inputs: Vec<usize>,
    heads: usize,
    labels: usize,
}

/// Dense arrays for one batch, all `[rows, width]` in request order.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Dataset-wide sentence indices, one per row.
    pub sentences: Vec<usize>,
    pub inputs: Vec<PaddedBatch>,
    pub heads: PaddedBatch,
    pub labels: PaddedBatch,
    /// Row lengths including the root position.
    pub lengths: Vec<usize>,
}

impl Batch {
    pub fn rows(&self) -> usize {
        self.sentences.len()
    }

    pub fn width(&self) -> usize {
        self.heads.width()
    }

    /// Number of real (non-root, non-pad) tokens.
    pub fn n_tokens(&self) -> usize {
        self.lengths.iter().map(|l| l.saturating_sub(1)).sum()
    }
}

/// Sentences of a set of files, encoded and bucketed.
#[derive(Debug, Clone)]
pub struct Dataset {
    name: String,
    files: Vec<SourceFile>,
    ranges: Vec<Range<usize>>,
    sentences: Vec<Sentence>,
    ids: Vec<SentenceIds>,
    inputs: Vec<Multibucket>,
    heads: Multibucket,
    labels: Multibucket,
    batch_size: usize,
}

impl Dataset {
    /// Read `files` and encode them.
    pub fn load(
        name: impl Into<String>,
        files: Vec<SourceFile>,
        vocabs: &Vocabs,
        max_buckets: usize,
        batch_size: usize,
    ) -> Result<Self> {
        let reader = ConlluReader::new()?;
        let parsed = files
            .into_iter()
            .map(|file| {
                let sentences = reader.read_file(&file.path)?;
                Ok((file, sentences))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_sentences(name, parsed, vocabs, max_buckets, batch_size)
    }

    /// Encode already parsed files.
    pub fn from_sentences(
        name: impl Into<String>,
        parsed: Vec<(SourceFile, Vec<Sentence>)>,
        vocabs: &Vocabs,
        max_buckets: usize,
        batch_size: usize,
    ) -> Result<Self> {
        let name = name.into();
        if batch_size == 0 {
            return Err(ArborError::Config("batch_size must be positive".into()));
        }

        let mut inputs = vocabs
            .inputs
            .iter()
            .map(|vocab| Multibucket::new(vocab.field().name(), max_buckets))
            .collect::<Result<Vec<_>>>()?;
        let mut heads = Multibucket::new("head", max_buckets)?;
        let mut labels = Multibucket::new("deprel", max_buckets)?;

        let mut files = Vec::with_capacity(parsed.len());
        let mut ranges = Vec::with_capacity(parsed.len());
        let mut sentences = Vec::new();
        let mut ids = Vec::new();

        for (file, file_sentences) in parsed {
            let start = sentences.len();
            for sentence in file_sentences {
                let mut input_ids = Vec::with_capacity(inputs.len());
                for (mb, vocab) in inputs.iter_mut().zip(&vocabs.inputs) {
                    let raw = rooted(sentence.column(vocab.field()));
                    input_ids.push(mb.add(&raw, vocab.encode(&sentence, true))?);
                }

                let head_values = sentence.heads();
                let head_raw = rooted(head_values.iter().map(ToString::to_string).collect::<Vec<_>>());
                let mut head_feats = Vec::with_capacity(head_values.len() + 1);
                head_feats.push(0);
                head_feats.extend(head_values.iter().map(|&h| h as u32));
                let head_id = heads.add(&head_raw, head_feats)?;

                let label_raw = rooted(sentence.column(Field::Deprel));
                let label_id = labels.add(&label_raw, vocabs.deprel.encode(&sentence, true))?;

                ids.push(SentenceIds {
                    inputs: input_ids,
                    heads: head_id,
                    labels: label_id,
                });
                sentences.push(sentence);
            }
            ranges.push(start..sentences.len());
            files.push(file);
        }

        for mb in inputs.iter_mut() {
            mb.close()?;
        }
        heads.close()?;
        labels.close()?;

        tracing::info!(
            dataset = %name,
            files = files.len(),
            sentences = sentences.len(),
            boundaries = ?inputs.first().map(Multibucket::boundaries),
            "encoded dataset"
        );

        Ok(Self {
            name,
            files,
            ranges,
            sentences,
            ids,
            inputs,
            heads,
            labels,
            batch_size,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn files(&self) -> &[SourceFile] {
        &self.files
    }

    pub fn sentences(&self) -> &[Sentence] {
        &self.sentences
    }

    pub fn sentence(&self, index: usize) -> Option<&Sentence> {
        self.sentences.get(index)
    }

    /// Sentence indices belonging to file `file_index`.
    pub fn file_range(&self, file_index: usize) -> Option<Range<usize>> {
        self.ranges.get(file_index).cloned()
    }

    pub fn len(&self) -> usize {
        self.sentences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }

    /// A fresh shuffled pass over every sentence, grouped by bucket so each
    /// batch shares a padding width.
    pub fn shuffled_batches(&self, rng: &mut Rand32) -> Result<Vec<Vec<usize>>> {
        let mut batches = self.grouped(0..self.sentences.len(), Some(&mut *rng))?;
        shuffle(&mut batches, rng);
        Ok(batches)
    }

    /// Batches covering one file, in file order within each bucket.
    pub fn file_batches(&self, file_index: usize) -> Result<Vec<Vec<usize>>> {
        let range = self.file_range(file_index).ok_or_else(|| {
            ArborError::Config(format!(
                "dataset {:?} has no file {file_index} ({} files)",
                self.name,
                self.files.len()
            ))
        })?;
        self.grouped(range, None)
    }

    fn grouped(&self, range: Range<usize>, mut rng: Option<&mut Rand32>) -> Result<Vec<Vec<usize>>> {
        let Some(primary) = self.inputs.first() else {
            return Ok(Vec::new());
        };
        let boundaries = primary.boundaries();
        let mut members = vec![Vec::new(); boundaries.len()];
        for s in range {
            members[primary.bucket_of(self.ids[s].inputs[0])?].push(s);
        }

        let mut batches = Vec::new();
        for (bucket, mut sentences) in members.into_iter().enumerate() {
            if sentences.is_empty() {
                continue;
            }
            if let Some(rng) = rng.as_deref_mut() {
                shuffle(&mut sentences, rng);
            }
            let per_batch = (self.batch_size / boundaries[bucket].max(1)).max(1);
            batches.extend(sentences.chunks(per_batch).map(<[usize]>::to_vec));
        }
        Ok(batches)
    }

    /// Materialise a batch of sentence indices.
    pub fn batch(&self, sentences: &[usize]) -> Result<Batch> {
        let mut lengths = Vec::with_capacity(sentences.len());
        for &s in sentences {
            let sentence = self.sentences.get(s).ok_or(ArborError::UnknownSequence {
                id: s,
                len: self.sentences.len(),
            })?;
            lengths.push(sentence.len() + 1);
        }

        let gather = |mb: &Multibucket, pick: &dyn Fn(&SentenceIds) -> usize| -> Result<PaddedBatch> {
            let ids: Vec<usize> = sentences.iter().map(|&s| pick(&self.ids[s])).collect();
            Ok(mb.set_placeholders(&ids)?.to_request_order())
        };

        let mut inputs = Vec::with_capacity(self.inputs.len());
        for (k, mb) in self.inputs.iter().enumerate() {
            inputs.push(gather(mb, &|ids: &SentenceIds| ids.inputs[k])?);
        }
        let heads = gather(&self.heads, &|ids: &SentenceIds| ids.heads)?;
        let labels = gather(&self.labels, &|ids: &SentenceIds| ids.labels)?;

        let width = inputs
            .iter()
            .map(PaddedBatch::width)
            .chain([heads.width(), labels.width()])
            .chain(lengths.iter().copied())
            .max()
            .unwrap_or(0);

        Ok(Batch {
            sentences: sentences.to_vec(),
            inputs: inputs.iter().map(|b| b.pad_to(width)).collect(),
            heads: heads.pad_to(width),
            labels: labels.pad_to(width),
            lengths,
        })
    }
}

fn rooted<S: AsRef<str>>(column: Vec<S>) -> Vec<String> {
    let mut raw = Vec::with_capacity(column.len() + 1);
    raw.push(ROOT_TOKEN.to_string());
    raw.extend(column.iter().map(|s| s.as_ref().to_string()));
    raw
}

/// Fisher-Yates with a seeded generator.
fn shuffle<T>(items: &mut [T], rng: &mut Rand32) {
    for i in (1..items.len()).rev() {
        let j = rng.rand_range(0..(i as u32 + 1)) as usize;
        items.swap(i, j);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{parsed, TRAIN};
    use arbor_core::config::TrainConfig;

    fn dataset(batch_size: usize) -> Dataset {
        let config = TrainConfig::new()
            .with_files(vec!["train.conllu".into()], vec![], vec![])
            .resolve()
            .unwrap();
        let file = parsed(TRAIN, "train.conllu");
        let vocabs = Vocabs::build(&config, &file.1).unwrap();
        Dataset::from_sentences("train", vec![file], &vocabs, 2, batch_size).unwrap()
    }

    #[test]
    fn identical_sentences_share_ids() {
        let data = dataset(100);
        assert_eq!(data.len(), 4);
        assert_eq!(data.ids[0], data.ids[2]);
        assert_ne!(data.ids[0], data.ids[1]);
    }

    #[test]
    fn batch_rows_follow_request_order() {
        let data = dataset(100);
        let batch = data.batch(&[3, 1]).unwrap();
        assert_eq!(batch.lengths, vec![5, 3]);
        assert_eq!(batch.width(), 5);
        assert_eq!(batch.n_tokens(), 6);
        assert_eq!(batch.heads.row(0), &[0, 3, 3, 0, 3]);
        assert_eq!(batch.heads.row(1), &[0, 2, 0, 0, 0]);
        for input in &batch.inputs {
            assert_eq!(input.width(), 5);
            assert_eq!(input.row(0)[0], arbor_core::vocab::ROOT);
        }
    }

    #[test]
    fn shuffled_batches_cover_every_sentence_once() {
        let data = dataset(4);
        let mut rng = Rand32::new(7);
        let batches = data.shuffled_batches(&mut rng).unwrap();
        let mut seen: Vec<usize> = batches.iter().flatten().copied().collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert!(batches.iter().all(|b| !b.is_empty()));
    }

    #[test]
    fn token_budget_limits_batch_rows() {
        let data = dataset(1);
        let mut rng = Rand32::new(1);
        let batches = data.shuffled_batches(&mut rng).unwrap();
        assert_eq!(batches.len(), 4);
    }

    #[test]
    fn file_batches_reject_unknown_file() {
        let data = dataset(100);
        let total: usize = data.file_batches(0).unwrap().iter().map(Vec::len).sum();
        assert_eq!(total, 4);
        assert!(data.file_batches(1).is_err());
    }

    #[test]
    fn unknown_sentence_is_reported() {
        let data = dataset(100);
        assert!(matches!(
            data.batch(&[9]),
            Err(ArborError::UnknownSequence { id: 9, .. })
        ));
    }
}
