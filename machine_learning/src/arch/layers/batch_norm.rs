use ndarray::prelude::*;

use crate::arch::Mode;
use crate::{MlErr, Result};

/// What a `BatchNorm` layer remembers from its forward pass.
#[derive(Clone, Debug)]
pub struct BatchNormTrace {
    x_hat: Array2<f32>,
    inv_std: Array1<f32>,
    mode: Mode,
}

/// Batch normalization over the feature axis: `y = gamma · (x - mean) / sqrt(var + eps) + beta`.
///
/// Parameters are laid out as `gamma` then `beta`, buffers as `running_mean` then
/// `running_var`. In training mode the batch statistics are used and the running ones are
/// blended towards them; in evaluation mode the running statistics are used as they are.
#[derive(Clone, Debug)]
pub struct BatchNorm {
    dim: usize,
    eps: f32,
    momentum: f32,
}

impl BatchNorm {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            eps: 1e-5,
            momentum: 0.1,
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn size(&self) -> usize {
        2 * self.dim
    }

    pub fn buffer_size(&self) -> usize {
        2 * self.dim
    }

    /// Sets `gamma` to one, `beta` to zero and the running statistics to a standard normal.
    pub fn init(&self, params: &mut [f32], buffers: &mut [f32]) {
        let (gamma, beta) = params.split_at_mut(self.dim);
        gamma.fill(1.);
        beta.fill(0.);

        let (mean, var) = buffers.split_at_mut(self.dim);
        mean.fill(0.);
        var.fill(1.);
    }

    /// Normalizes `x`.
    ///
    /// # Arguments
    /// * `params` - `gamma` and `beta`.
    /// * `buffers` - The running mean and variance.
    /// * `x` - The input.
    /// * `mode` - Whether to normalize with batch or running statistics.
    /// * `updated` - Where the running statistics after this pass get written.
    pub fn forward(
        &self,
        params: &[f32],
        buffers: &[f32],
        x: ArrayView2<f32>,
        mode: Mode,
        updated: &mut [f32],
    ) -> Result<(Array2<f32>, BatchNormTrace)> {
        if x.ncols() != self.dim {
            return Err(MlErr::SizeMismatch {
                what: "batch norm input",
                got: x.ncols(),
                expected: self.dim,
            });
        }

        let (gamma, beta) = self.view(params, "batch norm params")?;
        let (running_mean, running_var) = self.view(buffers, "batch norm buffers")?;
        updated.copy_from_slice(buffers);

        let (mean, var) = match mode {
            Mode::Train => {
                let n = x.nrows();
                let mean = x.mean_axis(Axis(0)).ok_or(MlErr::SizeMismatch {
                    what: "batch rows",
                    got: 0,
                    expected: 1,
                })?;
                let var = (&x - &mean)
                    .mapv(|c| c * c)
                    .mean_axis(Axis(0))
                    .unwrap_or_else(|| Array1::zeros(self.dim));

                let unbiased = if n > 1 {
                    &var * (n as f32 / (n - 1) as f32)
                } else {
                    var.clone()
                };

                let m = self.momentum;
                let (new_mean, new_var) = updated.split_at_mut(self.dim);
                for i in 0..self.dim {
                    new_mean[i] = (1. - m) * running_mean[i] + m * mean[i];
                    new_var[i] = (1. - m) * running_var[i] + m * unbiased[i];
                }

                (mean, var)
            }
            Mode::Eval => (running_mean.to_owned(), running_var.to_owned()),
        };

        let inv_std = var.mapv(|v| 1. / (v + self.eps).sqrt());
        let x_hat = (&x - &mean) * &inv_std;
        let y = &x_hat * &gamma + &beta;

        let trace = BatchNormTrace {
            x_hat,
            inv_std,
            mode,
        };
        Ok((y, trace))
    }

    /// Back-propagates `d` through the normalization, writing `dgamma` and `dbeta` onto `grad`.
    ///
    /// # Returns
    /// The delta with respect to this layer's input.
    pub fn backward(
        &self,
        params: &[f32],
        trace: &BatchNormTrace,
        d: Array2<f32>,
        grad: &mut [f32],
    ) -> Result<Array2<f32>> {
        let (gamma, _) = self.view(params, "batch norm params")?;
        let BatchNormTrace {
            x_hat,
            inv_std,
            mode,
        } = trace;

        if grad.len() != self.size() {
            return Err(MlErr::SizeMismatch {
                what: "batch norm grad",
                got: grad.len(),
                expected: self.size(),
            });
        }

        let (dgamma, dbeta) = grad.split_at_mut(self.dim);
        let dgamma_sum = (&d * x_hat).sum_axis(Axis(0));
        let dbeta_sum = d.sum_axis(Axis(0));
        dgamma.copy_from_slice(&dgamma_sum.to_vec());
        dbeta.copy_from_slice(&dbeta_sum.to_vec());

        let dx_hat = &d * &gamma;

        let dx = match mode {
            Mode::Train => {
                let n = d.nrows() as f32;
                let sum = dx_hat.sum_axis(Axis(0));
                let dot = (&dx_hat * x_hat).sum_axis(Axis(0));
                ((&dx_hat * n) - &sum - &(x_hat * &dot)) * &(inv_std / n)
            }
            Mode::Eval => dx_hat * inv_std,
        };

        Ok(dx)
    }

    fn view<'a>(
        &self,
        raw: &'a [f32],
        what: &'static str,
    ) -> Result<(ArrayView1<'a, f32>, ArrayView1<'a, f32>)> {
        if raw.len() != 2 * self.dim {
            return Err(MlErr::SizeMismatch {
                what,
                got: raw.len(),
                expected: 2 * self.dim,
            });
        }

        let (a, b) = raw.split_at(self.dim);
        Ok((ArrayView1::from(a), ArrayView1::from(b)))
    }
}
