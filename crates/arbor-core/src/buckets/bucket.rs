//! A single fixed-boundary bucket with a dense right-padded store.

use candle_core::{Device, Tensor};

use crate::error::{ArborError, Result};

/// Value written into padding cells.
pub const PAD_VALUE: u32 = 0;

/// Lifecycle of a [`Bucket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketState {
    /// Constructed but not yet given a boundary.
    Pending,
    /// Accepting inserts.
    Open,
    /// Frozen; only reads are allowed.
    Closed,
}

/// A dense `[rows, width]` block of feature indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaddedBatch {
    rows: usize,
    width: usize,
    data: Vec<u32>,
}

impl PaddedBatch {
    pub fn new(rows: usize, width: usize, data: Vec<u32>) -> Self {
        debug_assert_eq!(data.len(), rows * width);
        Self { rows, width, data }
    }

    /// Right-pad `rows` to the longest of them.
    pub fn from_rows<R: AsRef<[u32]>>(rows: &[R]) -> Self {
        let width = rows.iter().map(|r| r.as_ref().len()).max().unwrap_or(0);
        let mut data = vec![PAD_VALUE; rows.len() * width];
        for (i, row) in rows.iter().enumerate() {
            let row = row.as_ref();
            data[i * width..i * width + row.len()].copy_from_slice(row);
        }
        Self::new(rows.len(), width, data)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn row(&self, i: usize) -> &[u32] {
        &self.data[i * self.width..(i + 1) * self.width]
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.data
    }

    /// Number of non-padding cells in each row.
    pub fn lengths(&self) -> Vec<usize> {
        (0..self.rows)
            .map(|i| self.row(i).iter().filter(|&&v| v != PAD_VALUE).count())
            .collect()
    }

    /// Widen every row to `width` with trailing padding; never truncates.
    pub fn pad_to(&self, width: usize) -> PaddedBatch {
        if width <= self.width {
            return self.clone();
        }
        let mut data = vec![PAD_VALUE; self.rows * width];
        for i in 0..self.rows {
            data[i * width..i * width + self.width].copy_from_slice(self.row(i));
        }
        Self::new(self.rows, width, data)
    }

    /// Copy into a `u32` tensor of shape `[rows, width]`.
    pub fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        Ok(Tensor::from_slice(&self.data, (self.rows, self.width), device)?)
    }
}

/// Holds every sequence whose length fits under `boundary`.
///
/// Local row 0 is always an all-padding row; it backs the placeholder
/// sequence and the dummy fill issued for unused buckets.
#[derive(Debug, Clone)]
pub struct Bucket {
    id: usize,
    boundary: usize,
    state: BucketState,
    sequences: Vec<Vec<u32>>,
    rows: usize,
    store: Vec<u32>,
}

impl Bucket {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            boundary: 0,
            state: BucketState::Pending,
            sequences: Vec::new(),
            rows: 0,
            store: Vec::new(),
        }
    }

    /// Start accepting inserts of length at most `boundary`.
    pub fn open(&mut self, boundary: usize) -> Result<()> {
        if self.state == BucketState::Open {
            return Err(ArborError::protocol(format!("bucket {} is already open", self.id)));
        }
        self.boundary = boundary;
        self.sequences.clear();
        self.sequences.push(Vec::new());
        self.rows = 0;
        self.store.clear();
        self.state = BucketState::Open;
        Ok(())
    }

    /// Insert a sequence and return its local id.
    pub fn add(&mut self, feature_indices: &[u32]) -> Result<usize> {
        if self.state != BucketState::Open {
            return Err(ArborError::protocol(format!(
                "bucket {} is not open for adding entries",
                self.id
            )));
        }
        if feature_indices.len() > self.boundary {
            return Err(ArborError::protocol(format!(
                "sequence of length {} does not fit bucket {} (boundary {})",
                feature_indices.len(),
                self.id,
                self.boundary
            )));
        }
        self.sequences.push(feature_indices.to_vec());
        Ok(self.sequences.len() - 1)
    }

    /// Freeze the bucket and lay its rows out densely.
    pub fn close(&mut self) -> Result<()> {
        if self.state != BucketState::Open {
            return Err(ArborError::protocol(format!("bucket {} is not open", self.id)));
        }
        let width = self.boundary;
        self.store = vec![PAD_VALUE; self.sequences.len() * width];
        for (row, seq) in self.sequences.iter().enumerate() {
            self.store[row * width..row * width + seq.len()].copy_from_slice(seq);
        }
        self.rows = self.sequences.len();
        self.sequences.clear();
        self.state = BucketState::Closed;
        Ok(())
    }

    /// Gather the rows for `local_ids`, in the order given.
    pub fn set_placeholders(&self, local_ids: &[usize]) -> Result<PaddedBatch> {
        if self.state != BucketState::Closed {
            return Err(ArborError::protocol(format!(
                "bucket {} must be closed before reading",
                self.id
            )));
        }
        let width = self.boundary;
        let mut data = Vec::with_capacity(local_ids.len() * width);
        for &local in local_ids {
            if local >= self.capacity() {
                return Err(ArborError::UnknownSequence {
                    id: local,
                    len: self.capacity(),
                });
            }
            data.extend_from_slice(&self.store[local * width..(local + 1) * width]);
        }
        Ok(PaddedBatch::new(local_ids.len(), width, data))
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn boundary(&self) -> usize {
        self.boundary
    }

    pub fn state(&self) -> BucketState {
        self.state
    }

    /// Rows held, pad row included.
    pub fn capacity(&self) -> usize {
        match self.state {
            BucketState::Closed => self.rows,
            _ => self.sequences.len(),
        }
    }

    /// Return to the pending state, dropping all rows.
    pub fn reset(&mut self) {
        self.boundary = 0;
        self.sequences.clear();
        self.rows = 0;
        self.store.clear();
        self.state = BucketState::Pending;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closed_bucket() -> Bucket {
        let mut bucket = Bucket::new(0);
        bucket.open(4).unwrap();
        bucket.add(&[1, 2, 3]).unwrap();
        bucket.add(&[7, 8, 9, 10]).unwrap();
        bucket.close().unwrap();
        bucket
    }

    #[test]
    fn rows_are_right_padded() {
        let bucket = closed_bucket();
        assert_eq!(bucket.capacity(), 3);
        let batch = bucket.set_placeholders(&[1, 2, 0]).unwrap();
        assert_eq!(batch.rows(), 3);
        assert_eq!(batch.row(0), &[1, 2, 3, 0]);
        assert_eq!(batch.row(1), &[7, 8, 9, 10]);
        assert_eq!(batch.row(2), &[0, 0, 0, 0]);
        assert_eq!(batch.lengths(), vec![3, 4, 0]);
    }

    #[test]
    fn pad_to_widens_only() {
        let batch = PaddedBatch::from_rows(&[vec![1, 2], vec![3]]);
        let wide = batch.pad_to(4);
        assert_eq!(wide.row(0), &[1, 2, 0, 0]);
        assert_eq!(wide.row(1), &[3, 0, 0, 0]);
        assert_eq!(batch.pad_to(1), batch);
    }

    #[test]
    fn insert_after_close_is_rejected() {
        let mut bucket = closed_bucket();
        assert!(matches!(bucket.add(&[1]), Err(ArborError::Protocol(_))));
    }

    #[test]
    fn read_before_close_is_rejected() {
        let mut bucket = Bucket::new(2);
        bucket.open(3).unwrap();
        bucket.add(&[5]).unwrap();
        assert!(matches!(
            bucket.set_placeholders(&[1]),
            Err(ArborError::Protocol(_))
        ));
    }

    #[test]
    fn oversized_sequence_is_rejected() {
        let mut bucket = Bucket::new(1);
        bucket.open(2).unwrap();
        assert!(bucket.add(&[1, 2, 3]).is_err());
    }

    #[test]
    fn out_of_range_local_id() {
        let bucket = closed_bucket();
        assert!(matches!(
            bucket.set_placeholders(&[3]),
            Err(ArborError::UnknownSequence { id: 3, len: 3 })
        ));
    }

    #[test]
    fn batch_converts_to_tensor() {
        let bucket = closed_bucket();
        let batch = bucket.set_placeholders(&[2]).unwrap();
        let tensor = batch.to_tensor(&Device::Cpu).unwrap();
        assert_eq!(tensor.dims(), &[1, 4]);
        assert_eq!(tensor.to_vec2::<u32>().unwrap(), vec![vec![7, 8, 9, 10]]);
    }

    #[test]
    fn from_rows_pads_to_longest() {
        let batch = PaddedBatch::from_rows(&[vec![1u32], vec![2, 3, 4]]);
        assert_eq!(batch.width(), 3);
        assert_eq!(batch.as_slice(), &[1, 0, 0, 2, 3, 4]);
    }
}
