use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::{MlErr, Result};

/// The name, shape and location of a single tensor inside a flat storage buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorSpec {
    name: String,
    shape: Vec<usize>,
    offset: usize,
    requires_grad: bool,
}

impl TensorSpec {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Returns the amount of scalars this tensor holds.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the range this tensor occupies in its flat storage.
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len()
    }

    /// Whether gradients flow into this tensor.
    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }
}

/// The ordered layout of a model's trainable parameters and its non-trainable buffers.
///
/// Every copy of a network (live, teacher, stabilized, scratch) is laid out following the
/// same schema, which is what makes pairwise parameter iteration between copies sound.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamSchema {
    params: Vec<TensorSpec>,
    buffers: Vec<TensorSpec>,
    num_params: usize,
    num_buffers: usize,
}

impl ParamSchema {
    /// Creates a new empty `ParamSchema`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a trainable parameter.
    ///
    /// # Arguments
    /// * `name` - The unique name of the tensor.
    /// * `shape` - The shape of the tensor.
    ///
    /// # Returns
    /// The range the new tensor occupies in the flat parameter storage.
    pub fn push_param(&mut self, name: impl Into<String>, shape: &[usize]) -> Range<usize> {
        Self::push(&mut self.params, &mut self.num_params, name.into(), shape, true)
    }

    /// Appends a parameter that is stored alongside the trainable ones but never receives a
    /// gradient.
    pub fn push_frozen_param(&mut self, name: impl Into<String>, shape: &[usize]) -> Range<usize> {
        Self::push(&mut self.params, &mut self.num_params, name.into(), shape, false)
    }

    /// Appends a non-trainable buffer, such as a batch normalization running statistic.
    pub fn push_buffer(&mut self, name: impl Into<String>, shape: &[usize]) -> Range<usize> {
        Self::push(&mut self.buffers, &mut self.num_buffers, name.into(), shape, false)
    }

    fn push(
        specs: &mut Vec<TensorSpec>,
        total: &mut usize,
        name: String,
        shape: &[usize],
        requires_grad: bool,
    ) -> Range<usize> {
        let spec = TensorSpec {
            name,
            shape: shape.to_vec(),
            offset: *total,
            requires_grad,
        };

        let range = spec.range();
        *total = range.end;
        specs.push(spec);
        range
    }

    pub fn params(&self) -> &[TensorSpec] {
        &self.params
    }

    pub fn buffers(&self) -> &[TensorSpec] {
        &self.buffers
    }

    /// Returns the amount of scalar parameters.
    pub fn num_params(&self) -> usize {
        self.num_params
    }

    /// Returns the amount of scalar buffer entries.
    pub fn num_buffers(&self) -> usize {
        self.num_buffers
    }

    /// Checks that `other` lays out exactly the same tensors in the same order.
    ///
    /// # Returns
    /// An error naming the first tensor that differs.
    pub fn check_compatible(&self, other: &ParamSchema) -> Result<()> {
        Self::compare(&self.params, &other.params)?;
        Self::compare(&self.buffers, &other.buffers)
    }

    fn compare(ours: &[TensorSpec], theirs: &[TensorSpec]) -> Result<()> {
        if let Some((a, _)) = ours.iter().zip(theirs).find(|(a, b)| a != b) {
            return Err(MlErr::SchemaMismatch {
                tensor: a.name.clone(),
            });
        }

        let extra = ours.get(theirs.len()).or_else(|| theirs.get(ours.len()));
        if let Some(spec) = extra {
            return Err(MlErr::SchemaMismatch {
                tensor: spec.name.clone(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tensors_are_laid_out_contiguously() {
        let mut schema = ParamSchema::new();
        let w = schema.push_param("0.weight", &[3, 2]);
        let b = schema.push_param("0.bias", &[2]);
        let rm = schema.push_buffer("1.running_mean", &[2]);

        assert_eq!(w, 0..6);
        assert_eq!(b, 6..8);
        assert_eq!(rm, 0..2);
        assert_eq!(schema.num_params(), 8);
        assert_eq!(schema.num_buffers(), 2);
        assert!(schema.params()[1].requires_grad());
        assert_eq!(schema.buffers()[0].name(), "1.running_mean");
    }

    #[test]
    fn different_layouts_are_incompatible() {
        let mut a = ParamSchema::new();
        a.push_param("0.weight", &[3, 2]);

        let mut b = ParamSchema::new();
        b.push_param("0.weight", &[2, 3]);

        let mut c = a.clone();
        c.push_param("0.bias", &[2]);

        assert!(a.check_compatible(&a.clone()).is_ok());
        assert!(matches!(
            a.check_compatible(&b),
            Err(MlErr::SchemaMismatch { tensor }) if tensor == "0.weight"
        ));
        assert!(a.check_compatible(&c).is_err());
    }
}
