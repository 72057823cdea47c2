use crate::Result;

/// A first order learning rule.
pub trait Optimizer {
    /// Takes one step on `params` using `grad`.
    ///
    /// # Returns
    /// An error if `params` and `grad` don't have the size the optimizer was built for.
    fn update_params(&mut self, params: &mut [f32], grad: &[f32]) -> Result<()>;

    fn learning_rate(&self) -> f32;

    fn set_learning_rate(&mut self, learning_rate: f32);
}
