//! # Bucket Boundary Allocation
//!
//! Chooses bucket boundary lengths that minimise the total padding cost,
//! Σ (boundary of assigned bucket − sequence length), with a dynamic
//! program over the sorted distinct lengths.

use std::collections::BTreeMap;

use crate::error::{ArborError, Result};

/// Running histogram of sequence lengths plus the boundary solver.
#[derive(Debug, Clone, Default)]
pub struct BucketAllocator {
    histogram: BTreeMap<usize, usize>,
}

impl BucketAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one sequence of length `len`.
    pub fn record(&mut self, len: usize) {
        *self.histogram.entry(len).or_insert(0) += 1;
    }

    /// Length → count of recorded sequences.
    pub fn histogram(&self) -> &BTreeMap<usize, usize> {
        &self.histogram
    }

    /// Longest recorded length, 0 when nothing was recorded.
    pub fn max_length(&self) -> usize {
        self.histogram.keys().next_back().copied().unwrap_or(0)
    }

    pub fn clear(&mut self) {
        self.histogram.clear();
    }

    /// Solve for the recorded histogram.
    pub fn allocate(&self, max_buckets: usize) -> Result<Vec<usize>> {
        allocate(&self.histogram, max_buckets)
    }
}

/// Compute at most `max_buckets` strictly increasing boundaries.
///
/// Zero-length entries (the placeholder) fit any bucket and are ignored.
/// With no more distinct lengths than buckets every length becomes its own
/// boundary. Among equal-cost solutions the one whose last split is
/// furthest right wins, which keeps more sequences in smaller buckets.
pub fn allocate(histogram: &BTreeMap<usize, usize>, max_buckets: usize) -> Result<Vec<usize>> {
    if max_buckets == 0 {
        return Err(ArborError::Config("max_buckets must be at least 1".into()));
    }

    let entries: Vec<(usize, u64)> = histogram
        .iter()
        .filter(|&(&len, &count)| len > 0 && count > 0)
        .map(|(&len, &count)| (len, count as u64))
        .collect();
    let n = entries.len();
    if n <= max_buckets {
        return Ok(entries.into_iter().map(|(len, _)| len).collect());
    }

    // Prefix sums of counts and of count * length.
    let mut counts = vec![0u64; n + 1];
    let mut weighted = vec![0u64; n + 1];
    for (i, &(len, count)) in entries.iter().enumerate() {
        counts[i + 1] = counts[i] + count;
        weighted[i + 1] = weighted[i] + count * len as u64;
    }
    // Padding cost of one bucket covering entries j..i.
    let segment = |j: usize, i: usize| -> u64 {
        entries[i - 1].0 as u64 * (counts[i] - counts[j]) - (weighted[i] - weighted[j])
    };

    let k_max = max_buckets;
    let mut cost = vec![vec![u64::MAX; n + 1]; k_max + 1];
    let mut split = vec![vec![0usize; n + 1]; k_max + 1];
    for i in 1..=n {
        cost[1][i] = segment(0, i);
    }
    for k in 2..=k_max {
        for i in k..=n {
            let mut best = u64::MAX;
            let mut best_j = k - 1;
            for j in (k - 1)..i {
                if cost[k - 1][j] == u64::MAX {
                    continue;
                }
                let candidate = cost[k - 1][j] + segment(j, i);
                if candidate <= best {
                    best = candidate;
                    best_j = j;
                }
            }
            cost[k][i] = best;
            split[k][i] = best_j;
        }
    }

    let mut boundaries = Vec::with_capacity(k_max);
    let mut i = n;
    for k in (1..=k_max).rev() {
        boundaries.push(entries[i - 1].0);
        i = split[k][i];
    }
    boundaries.reverse();

    tracing::debug!(
        ?boundaries,
        cost = cost[k_max][n],
        distinct = n,
        "allocated bucket boundaries"
    );
    Ok(boundaries)
}

/// Total padding cost of assigning `histogram` to `boundaries` by best fit.
///
/// Returns `None` if some length exceeds the last boundary.
pub fn padding_cost(histogram: &BTreeMap<usize, usize>, boundaries: &[usize]) -> Option<usize> {
    let mut total = 0;
    for (&len, &count) in histogram {
        let bucket = best_fit(boundaries, len)?;
        total += (boundaries[bucket] - len) * count;
    }
    Some(total)
}

/// Index of the smallest boundary that is at least `len`.
pub fn best_fit(boundaries: &[usize], len: usize) -> Option<usize> {
    let idx = boundaries.partition_point(|&b| b < len);
    (idx < boundaries.len()).then_some(idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn histogram(lengths: &[usize]) -> BTreeMap<usize, usize> {
        let mut allocator = BucketAllocator::new();
        for &len in lengths {
            allocator.record(len);
        }
        allocator.histogram().clone()
    }

    #[test]
    fn dp_matches_brute_force_for_two_buckets() {
        let hist = histogram(&[2, 3, 3, 5, 9]);
        let boundaries = allocate(&hist, 2).unwrap();
        assert_eq!(boundaries.len(), 2);
        assert_eq!(*boundaries.last().unwrap(), 9);

        let brute = [2, 3, 5]
            .iter()
            .map(|&cut| padding_cost(&hist, &[cut, 9]).unwrap())
            .min()
            .unwrap();
        assert_eq!(padding_cost(&hist, &boundaries), Some(brute));
        assert_eq!(boundaries, vec![3, 9]);
        assert_eq!(brute, 5);
    }

    #[test]
    fn few_lengths_get_their_own_bucket() {
        let hist = histogram(&[4, 4, 7, 7, 7]);
        let boundaries = allocate(&hist, 3).unwrap();
        assert_eq!(boundaries, vec![4, 7]);
        assert_eq!(padding_cost(&hist, &boundaries), Some(0));
    }

    #[test]
    fn tie_prefers_more_sequences_in_earlier_buckets() {
        // {1,3} and {2,3} both cost 1; {2,3} keeps two sequences in bucket 0.
        let hist = histogram(&[1, 2, 3]);
        assert_eq!(allocate(&hist, 2).unwrap(), vec![2, 3]);
    }

    #[test]
    fn placeholder_length_is_ignored() {
        let hist = histogram(&[0, 5, 6]);
        assert_eq!(allocate(&hist, 4).unwrap(), vec![5, 6]);
    }

    #[test]
    fn zero_buckets_is_rejected() {
        let hist = histogram(&[3]);
        assert!(matches!(allocate(&hist, 0), Err(ArborError::Config(_))));
    }

    #[test]
    fn three_buckets_beat_every_manual_choice() {
        let lengths = [3, 4, 4, 6, 8, 8, 8, 11, 15, 15, 21, 30];
        let hist = histogram(&lengths);
        let boundaries = allocate(&hist, 3).unwrap();
        let best = padding_cost(&hist, &boundaries).unwrap();

        let distinct: Vec<usize> = hist.keys().copied().collect();
        for (a, &x) in distinct.iter().enumerate() {
            for &y in &distinct[a + 1..] {
                if y >= 30 {
                    continue;
                }
                let manual = padding_cost(&hist, &[x, y, 30]).unwrap();
                assert!(best <= manual, "{boundaries:?} worse than [{x}, {y}, 30]");
            }
        }
        assert!(boundaries.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn best_fit_picks_smallest_boundary() {
        let boundaries = [3, 7, 12];
        assert_eq!(best_fit(&boundaries, 0), Some(0));
        assert_eq!(best_fit(&boundaries, 3), Some(0));
        assert_eq!(best_fit(&boundaries, 4), Some(1));
        assert_eq!(best_fit(&boundaries, 12), Some(2));
        assert_eq!(best_fit(&boundaries, 13), None);
    }
}
