//! # Decoding
//!
//! Turns per-token probability tables into discrete heads and labels.
//! Position 0 of every table is the artificial root; its own prediction is
//! always `(head 0, label 0)`.

use crate::error::{ArborError, Result};

/// Output distributions for one sentence of `n` positions (root included).
#[derive(Debug, Clone, PartialEq)]
pub enum Probabilities {
    /// `heads[d][h]` = P(head of d is h); `labels[d][h][l]` = P(label l | d, h).
    Factorized {
        heads: Vec<Vec<f32>>,
        labels: Vec<Vec<Vec<f32>>>,
    },
    /// `joint[d][h][l]` = P(head of d is h and its label is l).
    Joint(Vec<Vec<Vec<f32>>>),
}

impl Probabilities {
    /// Number of positions, root included.
    pub fn len(&self) -> usize {
        match self {
            Probabilities::Factorized { heads, .. } => heads.len(),
            Probabilities::Joint(joint) => joint.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn validate(&self) -> Result<()> {
        let n = self.len();
        let ok = match self {
            Probabilities::Factorized { heads, labels } => {
                is_square(heads, n) && is_square(labels, n)
            }
            Probabilities::Joint(joint) => is_square(joint, n),
        };
        if ok {
            Ok(())
        } else {
            Err(ArborError::Decode(format!("probability table is not {n}x{n}")))
        }
    }

    /// Head distribution for dependent `d`, marginalising labels when joint.
    fn head_scores(&self, d: usize) -> Vec<f32> {
        match self {
            Probabilities::Factorized { heads, .. } => heads[d].clone(),
            Probabilities::Joint(joint) => joint[d].iter().map(|ls| ls.iter().sum()).collect(),
        }
    }

    fn label_scores(&self, d: usize, h: usize) -> &[f32] {
        match self {
            Probabilities::Factorized { labels, .. } => &labels[d][h],
            Probabilities::Joint(joint) => &joint[d][h],
        }
    }
}

fn is_square<T>(rows: &[Vec<T>], n: usize) -> bool {
    rows.len() == n && rows.iter().all(|row| row.len() == n)
}

/// Discrete predictions aligned with the probability table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prediction {
    pub heads: Vec<usize>,
    pub labels: Vec<usize>,
}

/// Strategy for turning probabilities into a prediction.
pub trait Decoder {
    fn decode(&self, probs: &Probabilities) -> Result<Prediction>;
}

fn argmax(xs: &[f32]) -> Option<usize> {
    xs.iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, &x)| match best {
            Some((_, bx)) if bx >= x => best,
            _ => Some((i, x)),
        })
        .map(|(i, _)| i)
}

fn label_at(probs: &Probabilities, d: usize, h: usize) -> Result<usize> {
    argmax(probs.label_scores(d, h)).ok_or_else(|| {
        ArborError::Decode(format!("token {d} has no label distribution for head {h}"))
    })
}

/// Independent per-token argmax.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArgmaxDecoder;

impl Decoder for ArgmaxDecoder {
    fn decode(&self, probs: &Probabilities) -> Result<Prediction> {
        probs.validate()?;
        let n = probs.len();
        let mut heads = vec![0; n];
        let mut labels = vec![0; n];

        for d in 1..n {
            match probs {
                Probabilities::Factorized { heads: table, .. } => {
                    heads[d] = argmax(&table[d])
                        .ok_or_else(|| ArborError::Decode(format!("token {d} has no head")))?;
                    labels[d] = label_at(probs, d, heads[d])?;
                }
                Probabilities::Joint(joint) => {
                    let mut best: Option<(usize, usize, f32)> = None;
                    for (h, row) in joint[d].iter().enumerate() {
                        for (l, &p) in row.iter().enumerate() {
                            if best.is_none_or(|(_, _, bp)| p > bp) {
                                best = Some((h, l, p));
                            }
                        }
                    }
                    let (h, l, _) =
                        best.ok_or_else(|| ArborError::Decode(format!("token {d} has no head")))?;
                    heads[d] = h;
                    labels[d] = l;
                }
            }
        }
        Ok(Prediction { heads, labels })
    }
}

/// Maximum spanning arborescence (Chu-Liu/Edmonds) with exactly one
/// dependent attached to the root.
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeDecoder;

const FORBIDDEN: f64 = -1.0e9;
const FLOOR: f32 = 1.0e-12;

impl Decoder for TreeDecoder {
    fn decode(&self, probs: &Probabilities) -> Result<Prediction> {
        probs.validate()?;
        let n = probs.len();
        if n <= 1 {
            return Ok(Prediction {
                heads: vec![0; n],
                labels: vec![0; n],
            });
        }

        let mut scores = vec![vec![FORBIDDEN; n]; n];
        for (d, row) in scores.iter_mut().enumerate().skip(1) {
            for (h, p) in probs.head_scores(d).into_iter().enumerate() {
                if h != d {
                    row[h] = f64::from(p.max(FLOOR)).ln();
                }
            }
        }

        let heads = single_root_tree(&scores);
        let mut labels = vec![0; n];
        for d in 1..n {
            labels[d] = label_at(probs, d, heads[d])?;
        }
        Ok(Prediction { heads, labels })
    }
}

/// Best tree whose root has a single child. Tries every root child only when
/// the unconstrained tree has several.
fn single_root_tree(scores: &[Vec<f64>]) -> Vec<usize> {
    let heads = chu_liu_edmonds(scores);
    if heads.iter().skip(1).filter(|&&h| h == 0).count() <= 1 {
        return heads;
    }

    let n = scores.len();
    let mut best: Option<(f64, Vec<usize>)> = None;
    for root_child in 1..n {
        let mut constrained = scores.to_vec();
        for (d, row) in constrained.iter_mut().enumerate().skip(1) {
            if d != root_child {
                row[0] = FORBIDDEN;
            }
        }
        let candidate = chu_liu_edmonds(&constrained);
        let total = tree_score(scores, &candidate);
        if best.as_ref().is_none_or(|(b, _)| total > *b) {
            best = Some((total, candidate));
        }
    }
    best.map(|(_, h)| h).unwrap_or(heads)
}

fn tree_score(scores: &[Vec<f64>], heads: &[usize]) -> f64 {
    heads
        .iter()
        .enumerate()
        .skip(1)
        .map(|(d, &h)| scores[d][h])
        .sum()
}

/// `scores[d][h]` scores the arc `h → d`; node 0 is the root.
fn chu_liu_edmonds(scores: &[Vec<f64>]) -> Vec<usize> {
    let n = scores.len();
    let mut heads = vec![0usize; n];
    for d in 1..n {
        let mut best = f64::NEG_INFINITY;
        for (h, &s) in scores[d].iter().enumerate() {
            if h != d && s > best {
                best = s;
                heads[d] = h;
            }
        }
    }

    let Some(cycle) = find_cycle(&heads) else {
        return heads;
    };

    let in_cycle: Vec<bool> = (0..n).map(|v| cycle.contains(&v)).collect();
    let outside: Vec<usize> = (0..n).filter(|&v| !in_cycle[v]).collect();
    let m = outside.len();
    let c = m;

    // scores of the contracted graph; `c` stands for the whole cycle
    let mut sub = vec![vec![FORBIDDEN; m + 1]; m + 1];
    let mut enter = vec![0usize; m + 1];
    let mut leave = vec![0usize; m + 1];

    for (nd, &d) in outside.iter().enumerate() {
        for (nh, &h) in outside.iter().enumerate() {
            if nd != nh {
                sub[nd][nh] = scores[d][h];
            }
        }
        // arc from the cycle to d
        let (u, s) = best_of(cycle.iter().map(|&u| (u, scores[d][u])));
        sub[nd][c] = s;
        leave[nd] = u;
    }
    for (nh, &h) in outside.iter().enumerate() {
        // arc from h into the cycle, replacing one cycle arc
        let (v, s) = best_of(
            cycle
                .iter()
                .map(|&v| (v, scores[v][h] - scores[v][heads[v]])),
        );
        sub[c][nh] = s;
        enter[nh] = v;
    }

    let sub_heads = chu_liu_edmonds(&sub);

    let mut result = heads.clone();
    for (nd, &d) in outside.iter().enumerate().skip(1) {
        let nh = sub_heads[nd];
        result[d] = if nh == c { leave[nd] } else { outside[nh] };
    }
    let nh = sub_heads[c];
    result[enter[nh]] = outside[nh];
    result
}

fn best_of(items: impl Iterator<Item = (usize, f64)>) -> (usize, f64) {
    items.fold((0, f64::NEG_INFINITY), |best, (i, s)| {
        if s > best.1 { (i, s) } else { best }
    })
}

/// Nodes of some cycle in the head graph, if any.
fn find_cycle(heads: &[usize]) -> Option<Vec<usize>> {
    let n = heads.len();
    // 0 = unvisited, 1 = on current path, 2 = done
    let mut color = vec![0u8; n];
    color[0] = 2;
    for start in 1..n {
        let mut path = Vec::new();
        let mut v = start;
        while color[v] == 0 {
            color[v] = 1;
            path.push(v);
            v = heads[v];
        }
        if color[v] == 1 {
            let pos = path.iter().position(|&p| p == v).unwrap_or(0);
            return Some(path[pos..].to_vec());
        }
        for p in path {
            color[p] = 2;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factorized(heads: Vec<Vec<f32>>, n_labels: usize) -> Probabilities {
        let n = heads.len();
        let labels = (0..n)
            .map(|d| {
                (0..n)
                    .map(|h| {
                        let mut row = vec![0.1; n_labels];
                        row[(d + h) % n_labels] = 0.9;
                        row
                    })
                    .collect()
            })
            .collect();
        Probabilities::Factorized { heads, labels }
    }

    fn is_tree(heads: &[usize]) -> bool {
        find_cycle(heads).is_none() && heads.iter().skip(1).all(|&h| h < heads.len())
    }

    #[test]
    fn argmax_picks_independent_heads() {
        let probs = factorized(
            vec![
                vec![1.0, 0.0, 0.0],
                vec![0.1, 0.0, 0.9],
                vec![0.8, 0.2, 0.0],
            ],
            3,
        );
        let pred = ArgmaxDecoder.decode(&probs).unwrap();
        assert_eq!(pred.heads, vec![0, 2, 0]);
        assert_eq!(pred.labels, vec![0, 0, 2]);
    }

    #[test]
    fn argmax_can_produce_cycles_tree_cannot() {
        // 1 and 2 prefer each other
        let heads = vec![
            vec![1.0, 0.0, 0.0],
            vec![0.3, 0.0, 0.7],
            vec![0.2, 0.8, 0.0],
        ];
        let probs = factorized(heads, 2);
        let greedy = ArgmaxDecoder.decode(&probs).unwrap();
        assert_eq!(greedy.heads, vec![0, 2, 1]);

        let tree = TreeDecoder.decode(&probs).unwrap();
        assert!(is_tree(&tree.heads));
        assert_eq!(tree.heads, vec![0, 0, 1]);
    }

    #[test]
    fn tree_has_single_root_child() {
        // every token prefers the root
        let n = 5;
        let heads: Vec<Vec<f32>> = (0..n)
            .map(|d| {
                (0..n)
                    .map(|h| match (d, h) {
                        (_, 0) => 0.6,
                        (d, h) if d == h => 0.0,
                        (d, h) if h + 1 == d => 0.3,
                        _ => 0.1,
                    })
                    .collect()
            })
            .collect();
        let pred = TreeDecoder.decode(&factorized(heads, 2)).unwrap();
        assert!(is_tree(&pred.heads));
        assert_eq!(pred.heads.iter().skip(1).filter(|&&h| h == 0).count(), 1);
    }

    #[test]
    fn tree_decoder_keeps_a_valid_argmax_tree() {
        let probs = factorized(
            vec![
                vec![1.0, 0.0, 0.0, 0.0],
                vec![0.1, 0.0, 0.8, 0.1],
                vec![0.9, 0.05, 0.0, 0.05],
                vec![0.1, 0.1, 0.8, 0.0],
            ],
            4,
        );
        let greedy = ArgmaxDecoder.decode(&probs).unwrap();
        let tree = TreeDecoder.decode(&probs).unwrap();
        assert_eq!(greedy, tree);
    }

    #[test]
    fn joint_argmax_picks_best_pair() {
        let joint = vec![
            vec![vec![0.0; 2]; 2],
            vec![vec![0.3, 0.6], vec![0.05, 0.05]],
        ];
        let pred = ArgmaxDecoder.decode(&Probabilities::Joint(joint)).unwrap();
        assert_eq!(pred.heads, vec![0, 0]);
        assert_eq!(pred.labels, vec![0, 1]);
    }

    #[test]
    fn joint_tree_marginalises_labels() {
        let joint = vec![
            vec![vec![0.0; 2]; 3],
            vec![vec![0.2, 0.2], vec![0.0, 0.0], vec![0.5, 0.1]],
            vec![vec![0.7, 0.1], vec![0.1, 0.1], vec![0.0, 0.0]],
        ];
        let pred = TreeDecoder.decode(&Probabilities::Joint(joint)).unwrap();
        assert_eq!(pred.heads, vec![0, 2, 0]);
        assert_eq!(pred.labels, vec![0, 0, 0]);
    }

    #[test]
    fn ragged_tables_are_rejected() {
        let probs = Probabilities::Factorized {
            heads: vec![vec![1.0, 0.0], vec![0.5]],
            labels: vec![vec![vec![1.0]; 2]; 2],
        };
        assert!(matches!(
            TreeDecoder.decode(&probs),
            Err(ArborError::Decode(_))
        ));
    }

    #[test]
    fn ragged_joint_and_label_tables_are_rejected() {
        let joint = Probabilities::Joint(vec![vec![vec![1.0]; 2], vec![vec![1.0]; 3]]);
        assert!(matches!(ArgmaxDecoder.decode(&joint), Err(ArborError::Decode(_))));

        let labels = Probabilities::Factorized {
            heads: vec![vec![1.0, 0.0]; 2],
            labels: vec![vec![vec![1.0]; 2], vec![vec![1.0]]],
        };
        assert!(matches!(ArgmaxDecoder.decode(&labels), Err(ArborError::Decode(_))));
    }

    #[test]
    fn empty_label_distribution_is_an_error() {
        let probs = Probabilities::Joint(vec![vec![vec![]; 2]; 2]);
        assert!(ArgmaxDecoder.decode(&probs).is_err());
    }

    #[test]
    fn contraction_handles_three_cycle() {
        let mut scores = vec![vec![FORBIDDEN; 4]; 4];
        scores[1][0] = -5.0;
        scores[2][0] = -4.0;
        scores[3][0] = -6.0;
        scores[1][3] = -0.1;
        scores[2][1] = -0.1;
        scores[3][2] = -0.1;
        let heads = chu_liu_edmonds(&scores);
        assert!(is_tree(&heads));
        assert_eq!(heads, vec![0, 3, 0, 2]);
    }
}
