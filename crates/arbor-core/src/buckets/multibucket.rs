//! # Multibucket
//!
//! Owns the buckets for one input field together with the global ↔ local
//! index bookkeeping. Sequences are added while the multibucket is open;
//! [`Multibucket::close`] solves for bucket boundaries, places every unique
//! sequence in its best-fit bucket and freezes the layout. After that the
//! multibucket is read-only and batch requests are answered with one fill
//! per bucket plus a restore permutation.

use crate::buckets::allocator::{self, BucketAllocator};
use crate::buckets::bucket::{Bucket, PaddedBatch};
use crate::buckets::dedup::{SequenceDeduplicator, PLACEHOLDER_ID};
use crate::error::{ArborError, Result};

/// Where a global sequence id lives after close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    /// Index of the bucket.
    pub bucket: usize,
    /// Row inside that bucket.
    pub local: usize,
}

/// Answer to a batch request.
#[derive(Debug, Clone)]
pub struct MultibucketBatch {
    /// One fill per bucket, in bucket order. Buckets with no selected
    /// sequence get a single pad row.
    pub fills: Vec<PaddedBatch>,
    /// For each bucket, the request positions its rows came from, or empty
    /// when the fill is a dummy.
    pub positions: Vec<Vec<usize>>,
    /// `restore[r]` is the row of the bucket-major concatenation of `fills`
    /// that holds request position `r`.
    pub restore: Vec<usize>,
}

impl MultibucketBatch {
    /// Number of sequences that were requested.
    pub fn len(&self) -> usize {
        self.positions.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reorder bucket-major outputs (one item per fill row, dummies
    /// included) back into request order.
    pub fn restore<T: Clone>(&self, concatenated: &[T]) -> Vec<T> {
        self.restore
            .iter()
            .map(|&row| concatenated[row].clone())
            .collect()
    }

    /// Rows in request order, right-padded to the widest selected bucket.
    pub fn to_request_order(&self) -> PaddedBatch {
        let rows: Vec<&[u32]> = self
            .fills
            .iter()
            .flat_map(|fill| (0..fill.rows()).map(move |i| fill.row(i)))
            .collect();
        let ordered = self.restore(&rows);
        let width = self
            .positions
            .iter()
            .zip(&self.fills)
            .filter(|(positions, _)| !positions.is_empty())
            .map(|(_, fill)| fill.width())
            .max()
            .unwrap_or(0);

        let mut data = vec![0u32; ordered.len() * width];
        for (i, row) in ordered.iter().enumerate() {
            let n = row.len().min(width);
            data[i * width..i * width + n].copy_from_slice(&row[..n]);
        }
        PaddedBatch::new(ordered.len(), width, data)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    Closed,
}

/// Ordered buckets for one field with dedup and best-fit assignment.
#[derive(Debug, Clone)]
pub struct Multibucket {
    field: String,
    buckets: Vec<Bucket>,
    dedup: SequenceDeduplicator,
    allocator: BucketAllocator,
    data: Vec<Slot>,
    phase: Phase,
}

impl Multibucket {
    /// Create an open multibucket with `max_buckets` buckets.
    pub fn new(field: impl Into<String>, max_buckets: usize) -> Result<Self> {
        if max_buckets == 0 {
            return Err(ArborError::Config("max_buckets must be at least 1".into()));
        }
        Ok(Self {
            field: field.into(),
            buckets: (0..max_buckets).map(Bucket::new).collect(),
            dedup: SequenceDeduplicator::new(),
            allocator: BucketAllocator::new(),
            data: Vec::new(),
            phase: Phase::Open,
        })
    }

    /// Add a sequence and return its global id.
    pub fn add<S: AsRef<str>>(&mut self, raw: &[S], feature_indices: Vec<u32>) -> Result<usize> {
        if self.phase != Phase::Open {
            return Err(ArborError::protocol(format!(
                "multibucket {:?} is not open for adding entries",
                self.field
            )));
        }
        let len = feature_indices.len();
        let (id, fresh) = self.dedup.add(raw, feature_indices);
        if fresh {
            self.allocator.record(len);
        }
        Ok(id)
    }

    /// Decide boundaries, place every unique sequence and freeze the layout.
    pub fn close(&mut self) -> Result<()> {
        if self.phase != Phase::Open {
            return Err(ArborError::protocol(format!(
                "multibucket {:?} is already closed",
                self.field
            )));
        }

        let max_buckets = self.buckets.len();
        let mut boundaries = self.allocator.allocate(max_buckets)?;
        // Keep the bucket count fixed when there are few distinct lengths.
        let mut next = boundaries.last().copied().unwrap_or(0) + 1;
        while boundaries.len() < max_buckets {
            boundaries.push(next);
            next += 1;
        }

        for (bucket, &boundary) in self.buckets.iter_mut().zip(&boundaries) {
            bucket.reset();
            bucket.open(boundary)?;
        }

        let mut data = Vec::with_capacity(self.dedup.len());
        for (id, indices) in self.dedup.iter() {
            if id == PLACEHOLDER_ID {
                data.push(Slot { bucket: 0, local: 0 });
                continue;
            }
            let bucket = allocator::best_fit(&boundaries, indices.len()).ok_or_else(|| {
                ArborError::protocol(format!(
                    "sequence {id} of length {} exceeds every bucket boundary",
                    indices.len()
                ))
            })?;
            let local = self.buckets[bucket].add(indices)?;
            data.push(Slot { bucket, local });
        }

        for bucket in &mut self.buckets {
            bucket.close()?;
        }
        self.data = data;
        self.phase = Phase::Closed;

        tracing::debug!(
            field = %self.field,
            ?boundaries,
            sequences = self.data.len(),
            "closed multibucket"
        );
        Ok(())
    }

    /// Partition a request by bucket and compute the restore permutation.
    pub fn set_placeholders(&self, global_ids: &[usize]) -> Result<MultibucketBatch> {
        self.ensure_closed()?;

        let n_buckets = self.buckets.len();
        let mut positions = vec![Vec::new(); n_buckets];
        let mut locals = vec![Vec::new(); n_buckets];
        for (position, &id) in global_ids.iter().enumerate() {
            let slot = self.slot(id)?;
            positions[slot.bucket].push(position);
            locals[slot.bucket].push(slot.local);
        }

        let mut fills = Vec::with_capacity(n_buckets);
        // Bucket-major keys: request positions, dummies after every real one.
        let mut keys = Vec::with_capacity(global_ids.len() + n_buckets);
        for (b, bucket) in self.buckets.iter().enumerate() {
            if positions[b].is_empty() {
                fills.push(bucket.set_placeholders(&[0])?);
                keys.push(global_ids.len() + b);
            } else {
                fills.push(bucket.set_placeholders(&locals[b])?);
                keys.extend_from_slice(&positions[b]);
            }
        }

        let mut order: Vec<usize> = (0..keys.len()).collect();
        order.sort_by_key(|&row| keys[row]);
        order.truncate(global_ids.len());

        Ok(MultibucketBatch {
            fills,
            positions,
            restore: order,
        })
    }

    /// Clear every table and return to the open phase.
    pub fn reset(&mut self) {
        self.dedup.clear();
        self.allocator.clear();
        self.data.clear();
        for bucket in &mut self.buckets {
            bucket.reset();
        }
        self.phase = Phase::Open;
    }

    /// Bucket and row of a global id.
    pub fn slot(&self, id: usize) -> Result<Slot> {
        self.ensure_closed()?;
        self.data.get(id).copied().ok_or(ArborError::UnknownSequence {
            id,
            len: self.data.len(),
        })
    }

    /// Bucket index of a global id.
    pub fn bucket_of(&self, id: usize) -> Result<usize> {
        Ok(self.slot(id)?.bucket)
    }

    /// Boundaries of every bucket; zeros until closed.
    pub fn boundaries(&self) -> Vec<usize> {
        self.buckets.iter().map(Bucket::boundary).collect()
    }

    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    /// Number of unique sequences, placeholder included.
    pub fn len(&self) -> usize {
        self.dedup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dedup.is_empty()
    }

    pub fn tokens(&self, id: usize) -> Option<&[String]> {
        self.dedup.tokens(id)
    }

    pub fn indices(&self, id: usize) -> Option<&[u32]> {
        self.dedup.indices(id)
    }

    fn ensure_closed(&self) -> Result<()> {
        if self.phase != Phase::Closed {
            return Err(ArborError::protocol(format!(
                "multibucket {:?} must be closed before reading",
                self.field
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(n: usize, tag: &str) -> Vec<String> {
        (0..n).map(|i| format!("{tag}{i}")).collect()
    }

    fn feats(n: usize, base: u32) -> Vec<u32> {
        (0..n as u32).map(|i| base + i).collect()
    }

    /// Ids 1..=5 with lengths 2, 3, 3, 7, 9.
    fn populated(max_buckets: usize) -> Multibucket {
        let mut mb = Multibucket::new("form", max_buckets).unwrap();
        for (n, base) in [(2, 10), (3, 20), (3, 30), (7, 40), (9, 50)] {
            mb.add(&words(n, &base.to_string()), feats(n, base)).unwrap();
        }
        mb
    }

    #[test]
    fn duplicates_share_an_id() {
        let mut mb = Multibucket::new("form", 2).unwrap();
        let a = mb.add(&["a", "b"], vec![3, 4]).unwrap();
        let b = mb.add(&["a", "b"], vec![3, 4]).unwrap();
        assert_eq!(a, b);
        assert_eq!(mb.len(), 2);
    }

    #[test]
    fn best_fit_invariant_holds() {
        let mut mb = populated(3);
        mb.close().unwrap();
        let boundaries = mb.boundaries();
        assert!(boundaries.windows(2).all(|w| w[0] < w[1]));
        assert!(*boundaries.last().unwrap() >= 9);

        for id in 1..mb.len() {
            let len = mb.indices(id).unwrap().len();
            let bucket = mb.bucket_of(id).unwrap();
            assert!(len <= boundaries[bucket]);
            assert!(boundaries[..bucket].iter().all(|&b| b < len));
        }
    }

    #[test]
    fn bucket_count_is_fixed_even_with_few_lengths() {
        let mut mb = Multibucket::new("form", 4).unwrap();
        mb.add(&["x", "y"], vec![1, 2]).unwrap();
        mb.close().unwrap();
        assert_eq!(mb.boundaries(), vec![2, 3, 4, 5]);
        let batch = mb.set_placeholders(&[1]).unwrap();
        assert_eq!(batch.fills.len(), 4);
    }

    #[test]
    fn round_trip_restores_request_order() {
        let mut mb = populated(2);
        mb.close().unwrap();
        let request = [5, 1, 5, 3];
        let buckets: std::collections::BTreeSet<usize> =
            request.iter().map(|&id| mb.bucket_of(id).unwrap()).collect();
        assert!(buckets.len() >= 2);

        let batch = mb.set_placeholders(&request).unwrap();
        let concatenated: Vec<Vec<u32>> = batch
            .fills
            .iter()
            .flat_map(|fill| (0..fill.rows()).map(move |i| fill.row(i).to_vec()))
            .collect();
        let restored = batch.restore(&concatenated);

        assert_eq!(restored.len(), request.len());
        for (row, &id) in restored.iter().zip(&request) {
            let expected = mb.indices(id).unwrap();
            assert_eq!(&row[..expected.len()], expected);
            assert!(row[expected.len()..].iter().all(|&v| v == 0));
        }
    }

    #[test]
    fn empty_buckets_get_a_dummy_fill() {
        let mut mb = populated(3);
        mb.close().unwrap();
        // Id 1 has length 2 and lives in the smallest bucket only.
        let batch = mb.set_placeholders(&[1, 1]).unwrap();
        assert_eq!(batch.fills.len(), 3);
        assert_eq!(batch.fills[0].rows(), 2);
        for fill in &batch.fills[1..] {
            assert_eq!(fill.rows(), 1);
            assert!(fill.as_slice().iter().all(|&v| v == 0));
        }
        assert_eq!(batch.restore, vec![0, 1]);
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn dummy_before_real_bucket_is_skipped() {
        let mut mb = populated(3);
        mb.close().unwrap();
        // Bucket 0 is unused, so its dummy row precedes the real rows.
        let batch = mb.set_placeholders(&[5, 4]).unwrap();
        let ordered = batch.to_request_order();
        assert_eq!(ordered.rows(), 2);
        assert_eq!(&ordered.row(0)[..9], mb.indices(5).unwrap());
        assert_eq!(&ordered.row(1)[..7], mb.indices(4).unwrap());
    }

    #[test]
    fn to_request_order_pads_to_widest_selected_bucket() {
        let mut mb = populated(2);
        mb.close().unwrap();
        let batch = mb.set_placeholders(&[2, 1]).unwrap();
        let ordered = batch.to_request_order();
        assert_eq!(ordered.width(), mb.boundaries()[0]);
        assert_eq!(ordered.lengths(), vec![3, 2]);
    }

    #[test]
    fn lifecycle_is_enforced() {
        let mut mb = populated(2);
        assert!(matches!(mb.set_placeholders(&[1]), Err(ArborError::Protocol(_))));
        mb.close().unwrap();
        assert!(matches!(mb.close(), Err(ArborError::Protocol(_))));
        assert!(matches!(mb.add(&["z"], vec![1]), Err(ArborError::Protocol(_))));
        assert!(matches!(
            mb.set_placeholders(&[99]),
            Err(ArborError::UnknownSequence { id: 99, .. })
        ));
    }

    #[test]
    fn reset_reopens_with_empty_tables() {
        let mut mb = populated(2);
        mb.close().unwrap();
        mb.reset();
        assert!(!mb.is_closed());
        assert_eq!(mb.len(), 1);
        let id = mb.add(&["fresh"], vec![8]).unwrap();
        assert_eq!(id, 1);
        mb.close().unwrap();
        assert_eq!(mb.slot(1).unwrap(), Slot { bucket: 0, local: 1 });
    }

    #[test]
    fn placeholder_maps_to_pad_row() {
        let mut mb = populated(2);
        mb.close().unwrap();
        assert_eq!(mb.slot(0).unwrap(), Slot { bucket: 0, local: 0 });
        let batch = mb.set_placeholders(&[0]).unwrap();
        assert!(batch.fills[0].row(0).iter().all(|&v| v == 0));
    }
}
