use ndarray::{Array2, ArrayView2};
use rand::Rng;

use super::{BatchNorm, BatchNormTrace, Dense, DenseTrace};
use crate::{
    Result,
    arch::{Mode, activations::ActFn},
    params::ParamSchema,
};

pub enum LayerTrace {
    Dense(DenseTrace),
    BatchNorm(BatchNormTrace),
    Activation(Array2<f32>),
}

#[derive(Clone, Debug)]
pub enum Layer {
    Dense(Dense),
    BatchNorm(BatchNorm),
    Activation(ActFn),
}
use Layer::*;

impl Layer {
    pub fn dense(dim: (usize, usize), act_fn: Option<ActFn>) -> Self {
        Self::Dense(Dense::new(dim, act_fn))
    }

    pub fn batch_norm(dim: usize) -> Self {
        Self::BatchNorm(BatchNorm::new(dim))
    }

    pub fn activation(act_fn: ActFn) -> Self {
        Self::Activation(act_fn)
    }

    /// Returns the amount of trainable parameters of this layer.
    pub fn size(&self) -> usize {
        match self {
            Dense(l) => l.size(),
            BatchNorm(l) => l.size(),
            Activation(_) => 0,
        }
    }

    /// Returns the amount of buffer entries of this layer.
    pub fn buffer_size(&self) -> usize {
        match self {
            BatchNorm(l) => l.buffer_size(),
            Dense(_) | Activation(_) => 0,
        }
    }

    /// Declares this layer's tensors on `schema`, prefixed by the layer's position.
    pub fn register(&self, index: usize, schema: &mut ParamSchema) {
        match self {
            Dense(l) => {
                let (n, m) = l.dim();
                schema.push_param(format!("{index}.weight"), &[n, m]);
                schema.push_param(format!("{index}.bias"), &[m]);
            }
            BatchNorm(l) => {
                let dim = l.dim();
                schema.push_param(format!("{index}.weight"), &[dim]);
                schema.push_param(format!("{index}.bias"), &[dim]);
                schema.push_buffer(format!("{index}.running_mean"), &[dim]);
                schema.push_buffer(format!("{index}.running_var"), &[dim]);
            }
            Activation(_) => {}
        }
    }

    pub fn init<R: Rng>(&self, params: &mut [f32], buffers: &mut [f32], rng: &mut R) -> Result<()> {
        match self {
            Dense(l) => l.init(params, rng),
            BatchNorm(l) => {
                l.init(params, buffers);
                Ok(())
            }
            Activation(_) => Ok(()),
        }
    }

    pub fn forward(
        &self,
        params: &[f32],
        buffers: &[f32],
        x: ArrayView2<f32>,
        mode: Mode,
        updated: &mut [f32],
    ) -> Result<(Array2<f32>, LayerTrace)> {
        match self {
            Dense(l) => {
                let (a, trace) = l.forward(params, x)?;
                Ok((a, LayerTrace::Dense(trace)))
            }
            BatchNorm(l) => {
                let (y, trace) = l.forward(params, buffers, x, mode, updated)?;
                Ok((y, LayerTrace::BatchNorm(trace)))
            }
            Activation(act_fn) => Ok((x.mapv(|z| act_fn.f(z)), LayerTrace::Activation(x.to_owned()))),
        }
    }

    pub fn backward(
        &self,
        index: usize,
        params: &[f32],
        trace: &LayerTrace,
        mut d: Array2<f32>,
        grad: &mut [f32],
    ) -> Result<Array2<f32>> {
        match (self, trace) {
            (Dense(l), LayerTrace::Dense(trace)) => l.backward(params, trace, d, grad),
            (BatchNorm(l), LayerTrace::BatchNorm(trace)) => l.backward(params, trace, d, grad),
            (Activation(act_fn), LayerTrace::Activation(z)) => {
                d.zip_mut_with(z, |d, &z| *d *= act_fn.df(z));
                Ok(d)
            }
            _ => Err(crate::MlErr::MissingTrace { layer: index }),
        }
    }
}
