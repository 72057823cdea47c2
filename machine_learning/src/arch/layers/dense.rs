use ndarray::{linalg, prelude::*};
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::{MlErr, Result, arch::activations::ActFn};

/// What a `Dense` layer remembers from its forward pass.
#[derive(Clone, Debug)]
pub struct DenseTrace {
    x: Array2<f32>,
    z: Array2<f32>,
}

/// A fully connected layer: `a = act_fn(x · w + b)`.
///
/// The layer holds no parameters, it views them from the slice it receives on every call, laid
/// out as the row major `(in, out)` weights followed by the `out` biases.
#[derive(Clone, Debug)]
pub struct Dense {
    dim: (usize, usize),
    act_fn: Option<ActFn>,
    size: usize,
}

impl Dense {
    /// Creates a new `Dense` layer.
    ///
    /// # Arguments
    /// * `dim` - The input and output widths.
    /// * `act_fn` - An optional activation applied to the affine output.
    pub fn new(dim: (usize, usize), act_fn: Option<ActFn>) -> Self {
        Self {
            dim,
            size: (dim.0 + 1) * dim.1,
            act_fn,
        }
    }

    pub fn dim(&self) -> (usize, usize) {
        self.dim
    }

    /// Returns the size of this layer.
    ///
    /// # Returns
    /// The amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Fills the weights following He initialization and zeroes the biases.
    pub fn init<R: Rng>(&self, params: &mut [f32], rng: &mut R) -> Result<()> {
        let std_dev = (2. / self.dim.0 as f32).sqrt();
        let normal = Normal::new(0., std_dev).map_err(|_| MlErr::InvalidHyperparameter {
            name: "std_dev",
            value: std_dev,
        })?;

        let w_size = self.size - self.dim.1;
        let (w, b) = params.split_at_mut(w_size);
        w.iter_mut().for_each(|w| *w = normal.sample(rng));
        b.fill(0.);
        Ok(())
    }

    pub fn forward(&self, params: &[f32], x: ArrayView2<f32>) -> Result<(Array2<f32>, DenseTrace)> {
        if x.ncols() != self.dim.0 {
            return Err(MlErr::SizeMismatch {
                what: "dense input",
                got: x.ncols(),
                expected: self.dim.0,
            });
        }

        let (w, b) = self.view_params(params)?;

        let mut z = Array2::zeros((x.nrows(), self.dim.1));
        linalg::general_mat_mul(1.0, &x, &w, 0.0, &mut z);
        z += &b;

        let a = match self.act_fn {
            Some(act_fn) => z.mapv(|z| act_fn.f(z)),
            None => z.clone(),
        };

        let trace = DenseTrace { x: x.to_owned(), z };
        Ok((a, trace))
    }

    /// Back-propagates `d`, the loss derivative with respect to this layer's output.
    ///
    /// # Arguments
    /// * `params` - The parameters used on the forward pass.
    /// * `trace` - The forward pass trace.
    /// * `d` - The incoming delta.
    /// * `grad` - The slice where this layer's gradient gets written.
    ///
    /// # Returns
    /// The delta with respect to this layer's input.
    pub fn backward(
        &self,
        params: &[f32],
        trace: &DenseTrace,
        mut d: Array2<f32>,
        grad: &mut [f32],
    ) -> Result<Array2<f32>> {
        if let Some(act_fn) = &self.act_fn {
            d.zip_mut_with(&trace.z, |d, &z| *d *= act_fn.df(z));
        }

        let (mut dw, mut db) = self.view_grad(grad)?;
        linalg::general_mat_mul(1.0, &trace.x.t(), &d, 0.0, &mut dw);
        db.assign(&d.sum_axis(Axis(0)));

        let (w, _) = self.view_params(params)?;
        Ok(d.dot(&w.t()))
    }

    /// Gives a view of the raw gradient slice as the delta weights and delta biases of this layer.
    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        let w_size = self.size - self.dim.1;
        let (dw_raw, db_raw) = grad.split_at_mut(w_size);
        let dw = ArrayViewMut2::from_shape(self.dim, dw_raw)?;
        let db = ArrayViewMut1::from_shape(self.dim.1, db_raw)?;
        Ok((dw, db))
    }

    /// Gives a view of the raw parameter slice as the weights and biases of this layer.
    fn view_params<'a>(&self, params: &'a [f32]) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        if params.len() != self.size {
            return Err(MlErr::SizeMismatch {
                what: "dense params",
                got: params.len(),
                expected: self.size,
            });
        }

        let w_size = self.size - self.dim.1;
        let weights = ArrayView2::from_shape(self.dim, &params[..w_size])?;
        let biases = ArrayView1::from_shape(self.dim.1, &params[w_size..])?;
        Ok((weights, biases))
    }
}
