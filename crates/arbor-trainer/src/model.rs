//! Biaffine dependency parser.
//!
//! Token embeddings → (bi)directional recurrent encoder → separate MLPs for
//! dependents and heads → biaffine arc scores `[batch, dep, head]` and
//! label scores `[batch, dep, head, label]`. With factorized output heads and
//! labels are separate softmaxes; otherwise one softmax runs over every
//! `(head, label)` pair.

use std::path::Path;

use arbor_core::config::{DeviceSpec, ResolvedConfig};
use arbor_core::decode::Probabilities;
use arbor_core::registry::{Nonlinearity, OptimizerKind, RecurrentCell};
use arbor_core::Result;
use candle_core::{DType, Device, Module, Tensor, D};
use candle_nn::rnn::{gru, lstm, GRUConfig, LSTMConfig, GRU, LSTM, RNN};
use candle_nn::{embedding, linear, linear_no_bias, Embedding, Linear, VarBuilder, VarMap};

use crate::dataset::{Batch, Vocabs};
use crate::history::BatchScores;
use crate::optimizer::MomentOptimizer;

const MASK_VALUE: f64 = -1.0e9;

/// What the training controller needs from a model.
pub trait ParserModel {
    /// One optimisation step on `batch` with the given update rule.
    fn train_batch(&mut self, batch: &Batch, optimizer: OptimizerKind) -> Result<BatchScores>;

    /// Score `batch` without updating parameters.
    fn eval_batch(&mut self, batch: &Batch) -> Result<BatchScores>;

    /// Output distributions for every row of `batch`, each cut to its length.
    fn probabilities(&mut self, batch: &Batch) -> Result<Vec<Probabilities>>;

    /// Persist parameters.
    fn save(&self, path: &Path) -> Result<()>;
}

/// Map a configured device to a candle device.
pub fn device(spec: DeviceSpec) -> Result<Device> {
    Ok(match spec {
        DeviceSpec::Cpu => Device::Cpu,
        DeviceSpec::Cuda(ordinal) => Device::new_cuda(ordinal)?,
    })
}

enum InputEmbedding {
    Learned(Embedding),
    Pretrained { table: Embedding, projection: Linear },
}

impl InputEmbedding {
    fn forward(&self, ids: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            InputEmbedding::Learned(table) => table.forward(ids),
            InputEmbedding::Pretrained { table, projection } => {
                projection.forward(&table.forward(ids)?)
            }
        }
    }
}

enum Cell {
    Lstm(LSTM),
    Gru(GRU),
}

impl Cell {
    fn new(kind: RecurrentCell, in_dim: usize, hidden: usize, vb: VarBuilder) -> candle_core::Result<Self> {
        Ok(match kind {
            RecurrentCell::Lstm => Cell::Lstm(lstm(in_dim, hidden, LSTMConfig::default(), vb)?),
            RecurrentCell::Gru => Cell::Gru(gru(in_dim, hidden, GRUConfig::default(), vb)?),
        })
    }

    /// `[batch, time, in]` → `[batch, time, hidden]`.
    fn run(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Cell::Lstm(cell) => cell.states_to_tensor(&cell.seq(xs)?),
            // GRU::states_to_tensor concatenates along features; stack over time instead
            Cell::Gru(cell) => {
                let states = cell.seq(xs)?;
                Tensor::stack(&states.iter().map(|s| s.h().clone()).collect::<Vec<_>>(), 1)
            }
        }
    }
}

struct EncoderLayer {
    forward: Cell,
    backward: Option<Cell>,
}

struct Mlp {
    linear: Linear,
    func: Nonlinearity,
}

impl Mlp {
    fn new(in_dim: usize, out_dim: usize, func: Nonlinearity, vb: VarBuilder) -> candle_core::Result<Self> {
        Ok(Self {
            linear: linear(in_dim, out_dim, vb)?,
            func,
        })
    }

    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        self.func.apply(&self.linear.forward(xs)?)
    }
}

struct Scores {
    /// `[batch, dep, head]`, padded heads masked.
    arcs: Tensor,
    /// `[batch, dep, head, label]`.
    labels: Tensor,
}

/// Candle implementation of [`ParserModel`].
pub struct BiaffineParser {
    varmap: VarMap,
    device: Device,
    embeddings: Vec<InputEmbedding>,
    encoder: Vec<EncoderLayer>,
    arc_dep: Mlp,
    arc_head: Mlp,
    label_dep: Mlp,
    label_head: Mlp,
    arc_weight: Tensor,
    arc_bias: Tensor,
    label_weight: Tensor,
    label_dep_linear: Linear,
    label_head_linear: Linear,
    n_labels: usize,
    factorized: bool,
    embed_drop: f32,
    recur_drop: f32,
    hidden_drop: f32,
    l2_reg: f64,
    optimizer: MomentOptimizer,
}

impl BiaffineParser {
    pub fn new(config: &ResolvedConfig, vocabs: &Vocabs, device: Device) -> Result<Self> {
        let raw = &config.raw;
        let shape = &raw.model;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let mut embeddings = Vec::with_capacity(vocabs.inputs.len());
        for (k, vocab) in vocabs.inputs.iter().enumerate() {
            let vb = vb.pp(format!("embed_{k}"));
            let input = match vocab.embeddings() {
                Some(pretrained) => {
                    let table = Tensor::from_vec(
                        pretrained.matrix.clone(),
                        (vocab.len(), pretrained.dim),
                        &device,
                    )?;
                    InputEmbedding::Pretrained {
                        table: Embedding::new(table, pretrained.dim),
                        projection: linear(pretrained.dim, shape.embed_size, vb.pp("projection"))?,
                    }
                }
                None => InputEmbedding::Learned(embedding(vocab.len(), shape.embed_size, vb)?),
            };
            embeddings.push(input);
        }

        let directions = if shape.bidirectional { 2 } else { 1 };
        let mut encoder = Vec::with_capacity(shape.n_layers);
        let mut in_dim = shape.embed_size * embeddings.len();
        for layer in 0..shape.n_layers {
            let vb = vb.pp(format!("rnn_{layer}"));
            let forward = Cell::new(config.recur_cell, in_dim, shape.recur_size, vb.pp("fw"))?;
            let backward = if shape.bidirectional {
                Some(Cell::new(config.recur_cell, in_dim, shape.recur_size, vb.pp("bw"))?)
            } else {
                None
            };
            encoder.push(EncoderLayer { forward, backward });
            in_dim = shape.recur_size * directions;
        }

        let hidden = shape.hidden_size;
        let func = config.hidden_func;
        let n_labels = vocabs.n_labels();
        let zero = candle_nn::init::ZERO;

        let arc_dep = Mlp::new(in_dim, hidden, func, vb.pp("arc_dep"))?;
        let arc_head = Mlp::new(in_dim, hidden, func, vb.pp("arc_head"))?;
        let label_dep = Mlp::new(in_dim, hidden, func, vb.pp("label_dep"))?;
        let label_head = Mlp::new(in_dim, hidden, func, vb.pp("label_head"))?;
        let arc_weight = vb.get_with_hints((hidden, hidden), "arc_weight", zero)?;
        let arc_bias = vb.get_with_hints((hidden, 1), "arc_bias", zero)?;
        let label_weight = vb.get_with_hints((n_labels, hidden, hidden), "label_weight", zero)?;
        let label_dep_linear = linear(hidden, n_labels, vb.pp("label_dep_linear"))?;
        let label_head_linear = linear_no_bias(hidden, n_labels, vb.pp("label_head_linear"))?;

        let optimizer = MomentOptimizer::new(varmap.all_vars(), raw.optimizer)?;
        tracing::info!(
            inputs = embeddings.len(),
            layers = encoder.len(),
            labels = n_labels,
            parameters = varmap.all_vars().iter().map(|v| v.elem_count()).sum::<usize>(),
            "built biaffine parser"
        );

        Ok(Self {
            varmap,
            device,
            embeddings,
            encoder,
            arc_dep,
            arc_head,
            label_dep,
            label_head,
            arc_weight,
            arc_bias,
            label_weight,
            label_dep_linear,
            label_head_linear,
            n_labels,
            factorized: raw.output.factorized,
            embed_drop: 1.0 - shape.embed_keep_prob,
            recur_drop: 1.0 - shape.recur_keep_prob,
            hidden_drop: 1.0 - shape.hidden_keep_prob,
            l2_reg: raw.l2_reg,
            optimizer,
        })
    }

    fn dropout(xs: Tensor, drop: f32, train: bool) -> candle_core::Result<Tensor> {
        if train && drop > 0.0 {
            candle_nn::ops::dropout(&xs, drop)
        } else {
            Ok(xs)
        }
    }

    fn reverse_time(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let t = xs.dim(1)?;
        let idx: Vec<u32> = (0..t as u32).rev().collect();
        xs.index_select(&Tensor::from_vec(idx, t, &self.device)?, 1)
    }

    fn scores(&self, batch: &Batch, train: bool) -> candle_core::Result<Scores> {
        let (b, t) = (batch.rows(), batch.width());

        let mut embedded = Vec::with_capacity(self.embeddings.len());
        for (input, ids) in self.embeddings.iter().zip(&batch.inputs) {
            let ids = Tensor::from_slice(ids.as_slice(), (b, t), &self.device)?;
            embedded.push(Self::dropout(input.forward(&ids)?, self.embed_drop, train)?);
        }
        let mut xs = Tensor::cat(&embedded, 2)?;

        for layer in &self.encoder {
            let fw = layer.forward.run(&xs)?;
            xs = match &layer.backward {
                Some(cell) => {
                    let bw = self.reverse_time(&cell.run(&self.reverse_time(&xs)?)?)?;
                    Tensor::cat(&[fw, bw], 2)?
                }
                None => fw,
            };
            xs = Self::dropout(xs, self.recur_drop, train)?;
        }

        let hidden = |mlp: &Mlp| Self::dropout(mlp.forward(&xs)?, self.hidden_drop, train);
        let arc_dep = hidden(&self.arc_dep)?;
        let arc_head = hidden(&self.arc_head)?;
        let label_dep = hidden(&self.label_dep)?;
        let label_head = hidden(&self.label_head)?;

        // dep W headᵀ + head·u, then mask padded heads
        let bilinear = arc_dep
            .broadcast_matmul(&self.arc_weight)?
            .matmul(&arc_head.t()?.contiguous()?)?;
        let head_bias = arc_head.broadcast_matmul(&self.arc_bias)?.transpose(1, 2)?;
        let mut mask = vec![0f32; b * t];
        for (row, &len) in batch.lengths.iter().enumerate() {
            for cell in &mut mask[row * t + len.min(t)..(row + 1) * t] {
                *cell = MASK_VALUE as f32;
            }
        }
        let mask = Tensor::from_vec(mask, (b, 1, t), &self.device)?;
        let arcs = bilinear.broadcast_add(&head_bias)?.broadcast_add(&mask)?;

        // [b,1,t,h] x [1,L,h,h] x [b,1,h,t] -> [b,L,t,t] -> [b,t,t,L]
        let label_bilinear = label_dep
            .unsqueeze(1)?
            .broadcast_matmul(&self.label_weight.unsqueeze(0)?)?
            .broadcast_matmul(&label_head.unsqueeze(1)?.t()?.contiguous()?)?
            .permute((0, 2, 3, 1))?;
        let dep_term = self.label_dep_linear.forward(&label_dep)?.unsqueeze(2)?;
        let head_term = self.label_head_linear.forward(&label_head)?.unsqueeze(1)?;
        let labels = label_bilinear
            .broadcast_add(&dep_term)?
            .broadcast_add(&head_term)?
            .contiguous()?;

        Ok(Scores { arcs, labels })
    }

    /// Flat `row * width + position` indices of every real dependent.
    fn dependents(&self, batch: &Batch) -> candle_core::Result<Tensor> {
        let t = batch.width();
        let idx: Vec<u32> = batch
            .lengths
            .iter()
            .enumerate()
            .flat_map(|(row, &len)| (1..len).map(move |d| (row * t + d) as u32))
            .collect();
        let n = idx.len();
        Tensor::from_vec(idx, n, &self.device)
    }

    fn loss(&self, batch: &Batch, scores: &Scores) -> candle_core::Result<Tensor> {
        let (b, t, l) = (batch.rows(), batch.width(), self.n_labels);
        let dependents = self.dependents(batch)?;
        if dependents.elem_count() == 0 {
            return Tensor::zeros((), DType::F32, &self.device);
        }
        let heads = Tensor::from_slice(batch.heads.as_slice(), (b, t), &self.device)?;
        let labels = Tensor::from_slice(batch.labels.as_slice(), b * t, &self.device)?;
        let gold_heads = heads.flatten_all()?.index_select(&dependents, 0)?;
        let gold_labels = labels.index_select(&dependents, 0)?;

        let mut loss = if self.factorized {
            let arcs = scores.arcs.reshape((b * t, t))?.index_select(&dependents, 0)?;
            let arc_loss = candle_nn::loss::cross_entropy(&arcs, &gold_heads)?;

            let at_gold = heads
                .reshape((b, t, 1, 1))?
                .broadcast_as((b, t, 1, l))?
                .contiguous()?;
            let label_scores = scores
                .labels
                .gather(&at_gold, 2)?
                .reshape((b * t, l))?
                .index_select(&dependents, 0)?;
            (arc_loss + candle_nn::loss::cross_entropy(&label_scores, &gold_labels)?)?
        } else {
            let joint = self.joint(scores, b, t)?.index_select(&dependents, 0)?;
            let targets = ((gold_heads.to_dtype(DType::F32)? * l as f64)?
                + gold_labels.to_dtype(DType::F32)?)?
                .to_dtype(DType::U32)?;
            candle_nn::loss::cross_entropy(&joint, &targets)?
        };

        if self.l2_reg > 0.0 {
            let mut l2 = Tensor::zeros((), DType::F32, &self.device)?;
            for var in self.varmap.all_vars() {
                l2 = (l2 + var.as_tensor().sqr()?.sum_all()?)?;
            }
            loss = (loss + (l2 * self.l2_reg)?)?;
        }
        Ok(loss)
    }

    /// `[b * t, t * L]` joint scores.
    fn joint(&self, scores: &Scores, b: usize, t: usize) -> candle_core::Result<Tensor> {
        scores
            .labels
            .broadcast_add(&scores.arcs.unsqueeze(3)?)?
            .reshape((b * t, t * self.n_labels))
    }

    /// Predicted `(head, label)` for every cell, row-major `[b][t]`.
    fn predictions(&self, scores: &Scores, b: usize, t: usize) -> candle_core::Result<Vec<Vec<(usize, usize)>>> {
        let l = self.n_labels;
        if self.factorized {
            let heads = scores.arcs.argmax(D::Minus1)?;
            let at_pred = heads
                .reshape((b, t, 1, 1))?
                .broadcast_as((b, t, 1, l))?
                .contiguous()?;
            let labels = scores.labels.gather(&at_pred, 2)?.squeeze(2)?.argmax(D::Minus1)?;
            let heads = heads.to_vec2::<u32>()?;
            let labels = labels.to_vec2::<u32>()?;
            Ok(heads
                .iter()
                .zip(&labels)
                .map(|(hs, ls)| hs.iter().zip(ls).map(|(&h, &l)| (h as usize, l as usize)).collect())
                .collect())
        } else {
            let best = self.joint(scores, b, t)?.argmax(D::Minus1)?.to_vec1::<u32>()?;
            Ok(best
                .chunks(t)
                .map(|row| row.iter().map(|&i| (i as usize / l, i as usize % l)).collect())
                .collect())
        }
    }

    fn batch_scores(&self, batch: &Batch, scores: &Scores, loss: f64) -> candle_core::Result<BatchScores> {
        let (b, t) = (batch.rows(), batch.width());
        let predicted = self.predictions(scores, b, t)?;
        let mut out = BatchScores {
            loss,
            n_tokens: batch.n_tokens(),
            ..BatchScores::default()
        };
        for (row, &len) in batch.lengths.iter().enumerate() {
            let gold_heads = batch.heads.row(row);
            let gold_labels = batch.labels.row(row);
            for d in 1..len {
                let (h, l) = predicted[row][d];
                let head_ok = h == gold_heads[d] as usize;
                let label_ok = l == gold_labels[d] as usize;
                out.correct_heads += usize::from(head_ok);
                out.correct_labels += usize::from(label_ok);
                out.correct += usize::from(head_ok && label_ok);
            }
        }
        Ok(out)
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }
}

impl ParserModel for BiaffineParser {
    fn train_batch(&mut self, batch: &Batch, optimizer: OptimizerKind) -> Result<BatchScores> {
        self.optimizer.set_kind(optimizer);
        let scores = self.scores(batch, true)?;
        if batch.n_tokens() == 0 {
            return Ok(self.batch_scores(batch, &scores, 0.0)?);
        }
        let loss = self.loss(batch, &scores)?;
        let grads = loss.backward()?;
        self.optimizer.step(&grads)?;
        let value = loss.to_scalar::<f32>()? as f64;
        Ok(self.batch_scores(batch, &scores, value)?)
    }

    fn eval_batch(&mut self, batch: &Batch) -> Result<BatchScores> {
        let scores = self.scores(batch, false)?;
        let loss = self.loss(batch, &scores)?.to_scalar::<f32>()? as f64;
        Ok(self.batch_scores(batch, &scores, loss)?)
    }

    fn probabilities(&mut self, batch: &Batch) -> Result<Vec<Probabilities>> {
        let (b, t, l) = (batch.rows(), batch.width(), self.n_labels);
        let scores = self.scores(batch, false)?;
        let cell = |row: usize, d: usize, h: usize| ((row * t + d) * t + h) * l;

        let mut out = Vec::with_capacity(b);
        if self.factorized {
            let arcs = candle_nn::ops::softmax_last_dim(&scores.arcs)?.to_vec3::<f32>()?;
            let label_probs = candle_nn::ops::softmax_last_dim(&scores.labels)?
                .flatten_all()?
                .to_vec1::<f32>()?;
            for (row, &n) in batch.lengths.iter().enumerate() {
                let heads = (0..n).map(|d| arcs[row][d][..n].to_vec()).collect();
                let labels = (0..n)
                    .map(|d| {
                        (0..n)
                            .map(|h| label_probs[cell(row, d, h)..cell(row, d, h) + l].to_vec())
                            .collect()
                    })
                    .collect();
                out.push(Probabilities::Factorized { heads, labels });
            }
        } else {
            let joint = candle_nn::ops::softmax_last_dim(&self.joint(&scores, b, t)?)?
                .flatten_all()?
                .to_vec1::<f32>()?;
            for (row, &n) in batch.lengths.iter().enumerate() {
                let table = (0..n)
                    .map(|d| {
                        (0..n)
                            .map(|h| joint[cell(row, d, h)..cell(row, d, h) + l].to_vec())
                            .collect()
                    })
                    .collect();
                out.push(Probabilities::Joint(table));
            }
        }
        Ok(out)
    }

    fn save(&self, path: &Path) -> Result<()> {
        self.varmap.save(path)?;
        tracing::debug!(path = %path.display(), "saved parameters");
        Ok(())
    }
}
