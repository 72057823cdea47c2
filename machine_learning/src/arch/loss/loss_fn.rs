use ndarray::{Array2, ArrayView2};

pub trait LossFn {
    /// Returns the loss of the prediction `y_pred` against the target `y`.
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32;

    /// Returns the derivative of the loss with respect to every entry of `y_pred`.
    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32>;
}
