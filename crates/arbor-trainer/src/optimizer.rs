//! Adam and AMSGrad over candle variables.
//!
//! Both policies share one set of moment estimates. Switching from Adam to
//! AMSGrad seeds the running maximum of the second moment from the current
//! estimate, so the switch does not reset training progress.

use arbor_core::config::OptimizerConfig;
use arbor_core::registry::OptimizerKind;
use candle_core::backprop::GradStore;
use candle_core::{DType, Tensor, Var};

#[derive(Debug)]
struct ParamSlot {
    param: Var,
    first_moment: Tensor,
    second_moment: Tensor,
    max_second_moment: Option<Tensor>,
}

/// Moment-based optimizer with a switchable update rule.
#[derive(Debug)]
pub struct MomentOptimizer {
    config: OptimizerConfig,
    kind: OptimizerKind,
    slots: Vec<ParamSlot>,
    step: usize,
}

impl MomentOptimizer {
    pub fn new(vars: Vec<Var>, config: OptimizerConfig) -> candle_core::Result<Self> {
        let mut slots = Vec::with_capacity(vars.len());
        for param in vars {
            let tensor = param.as_tensor();
            let zeros = Tensor::zeros(tensor.dims(), DType::F32, tensor.device())?;
            slots.push(ParamSlot {
                param,
                first_moment: zeros.clone(),
                second_moment: zeros,
                max_second_moment: None,
            });
        }
        Ok(Self {
            config,
            kind: OptimizerKind::Adam,
            slots,
            step: 0,
        })
    }

    pub fn kind(&self) -> OptimizerKind {
        self.kind
    }

    pub fn steps(&self) -> usize {
        self.step
    }

    /// Change the update rule.
    pub fn set_kind(&mut self, kind: OptimizerKind) {
        if kind == self.kind {
            return;
        }
        if kind == OptimizerKind::AmsGrad {
            for slot in &mut self.slots {
                slot.max_second_moment = Some(slot.second_moment.clone());
            }
        }
        tracing::info!(from = %self.kind, to = %kind, "switching optimizer");
        self.kind = kind;
    }

    /// Apply one update from `grads`; variables without a gradient are left alone.
    pub fn step(&mut self, grads: &GradStore) -> candle_core::Result<()> {
        self.step += 1;
        let cfg = self.config;
        let t = self.step as i32;
        let scale_m = 1.0 / (1.0 - cfg.beta1.powi(t));
        let scale_v = 1.0 / (1.0 - cfg.beta2.powi(t));

        for slot in &mut self.slots {
            let Some(grad) = grads.get(slot.param.as_tensor()) else {
                continue;
            };
            let grad = grad.to_dtype(DType::F32)?;

            let m = ((slot.first_moment.affine(cfg.beta1, 0.0)?) + grad.affine(1.0 - cfg.beta1, 0.0)?)?;
            let v = ((slot.second_moment.affine(cfg.beta2, 0.0)?)
                + grad.sqr()?.affine(1.0 - cfg.beta2, 0.0)?)?;

            let v_used = match self.kind {
                OptimizerKind::Adam => v.clone(),
                OptimizerKind::AmsGrad => {
                    let v_max = match &slot.max_second_moment {
                        Some(prev) => prev.maximum(&v)?,
                        None => v.clone(),
                    };
                    slot.max_second_moment = Some(v_max.clone());
                    v_max
                }
            };

            let m_hat = m.affine(scale_m, 0.0)?;
            let denom = v_used.affine(scale_v, 0.0)?.sqrt()?.affine(1.0, cfg.epsilon)?;
            let update = (m_hat / denom)?.affine(cfg.learning_rate, 0.0)?;
            let next = (slot.param.as_tensor().to_dtype(DType::F32)? - update)?;
            slot.param.set(&next.to_dtype(slot.param.dtype())?)?;

            slot.first_moment = m;
            slot.second_moment = v;
        }
        Ok(())
    }
}
