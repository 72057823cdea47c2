use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{ParamSchema, TensorSpec};
use crate::{MlErr, Result};

/// A tensor detached from its flat storage, used for persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedTensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// An ordered name to tensor mapping of a whole network copy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDict {
    pub params: Vec<NamedTensor>,
    pub buffers: Vec<NamedTensor>,
}

/// One logical copy of a network: its trainable parameters and its buffers, stored flat and
/// laid out by a shared `ParamSchema`.
#[derive(Debug, Clone)]
pub struct ModelState {
    schema: Arc<ParamSchema>,
    params: Vec<f32>,
    buffers: Vec<f32>,
}

impl ModelState {
    /// Creates a new `ModelState`.
    ///
    /// # Arguments
    /// * `schema` - The layout of `params` and `buffers`.
    /// * `params` - The flat trainable parameters.
    /// * `buffers` - The flat non-trainable buffers.
    ///
    /// # Returns
    /// An error if the storage sizes don't match the schema.
    pub fn new(schema: Arc<ParamSchema>, params: Vec<f32>, buffers: Vec<f32>) -> Result<Self> {
        if params.len() != schema.num_params() {
            return Err(MlErr::SizeMismatch {
                what: "params",
                got: params.len(),
                expected: schema.num_params(),
            });
        }

        if buffers.len() != schema.num_buffers() {
            return Err(MlErr::SizeMismatch {
                what: "buffers",
                got: buffers.len(),
                expected: schema.num_buffers(),
            });
        }

        Ok(Self {
            schema,
            params,
            buffers,
        })
    }

    /// Creates a `ModelState` with every parameter and buffer set to zero.
    pub fn zeros(schema: Arc<ParamSchema>) -> Self {
        Self {
            params: vec![0.; schema.num_params()],
            buffers: vec![0.; schema.num_buffers()],
            schema,
        }
    }

    pub fn schema(&self) -> &Arc<ParamSchema> {
        &self.schema
    }

    pub fn params(&self) -> &[f32] {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut [f32] {
        &mut self.params
    }

    pub fn buffers(&self) -> &[f32] {
        &self.buffers
    }

    pub fn buffers_mut(&mut self) -> &mut [f32] {
        &mut self.buffers
    }

    /// Gives simultaneous mutable access to the parameters and the buffers.
    pub fn split_mut(&mut self) -> (&mut [f32], &mut [f32]) {
        (&mut self.params, &mut self.buffers)
    }

    /// Checks that `other` follows the same layout as this state.
    pub fn ensure_compatible(&self, other: &ModelState) -> Result<()> {
        if Arc::ptr_eq(&self.schema, &other.schema) {
            return Ok(());
        }

        self.schema.check_compatible(&other.schema)
    }

    /// Overwrites both the parameters and the buffers with the ones of `other`.
    pub fn copy_from(&mut self, other: &ModelState) -> Result<()> {
        self.ensure_compatible(other)?;
        self.params.copy_from_slice(&other.params);
        self.buffers.copy_from_slice(&other.buffers);
        Ok(())
    }

    /// Overwrites only the trainable parameters with the ones of `other`.
    pub fn copy_params_from(&mut self, other: &ModelState) -> Result<()> {
        self.ensure_compatible(other)?;
        self.params.copy_from_slice(&other.params);
        Ok(())
    }

    /// Replaces the buffers with freshly computed ones, such as the running statistics emitted by
    /// a forward pass in training mode.
    pub fn commit_buffers(&mut self, buffers: &[f32]) -> Result<()> {
        if buffers.len() != self.buffers.len() {
            return Err(MlErr::SizeMismatch {
                what: "buffers",
                got: buffers.len(),
                expected: self.buffers.len(),
            });
        }

        self.buffers.copy_from_slice(buffers);
        Ok(())
    }

    /// Exports this state as an ordered name to tensor mapping.
    pub fn to_state_dict(&self) -> StateDict {
        let export = |specs: &[TensorSpec], storage: &[f32]| {
            specs
                .iter()
                .map(|spec| NamedTensor {
                    name: spec.name().to_string(),
                    shape: spec.shape().to_vec(),
                    data: storage[spec.range()].to_vec(),
                })
                .collect()
        };

        StateDict {
            params: export(self.schema.params(), &self.params),
            buffers: export(self.schema.buffers(), &self.buffers),
        }
    }

    /// Overwrites this state with the tensors of `dict`, matching them by name.
    ///
    /// # Returns
    /// An error if a tensor is missing or its shape differs from the schema.
    pub fn load_state_dict(&mut self, dict: &StateDict) -> Result<()> {
        fn import(specs: &[TensorSpec], tensors: &[NamedTensor], storage: &mut [f32]) -> Result<()> {
            for spec in specs {
                let tensor = tensors
                    .iter()
                    .find(|t| t.name == spec.name())
                    .ok_or_else(|| MlErr::UnknownTensor {
                        name: spec.name().to_string(),
                    })?;

                if tensor.shape != spec.shape() || tensor.data.len() != spec.len() {
                    return Err(MlErr::SchemaMismatch {
                        tensor: spec.name().to_string(),
                    });
                }

                storage[spec.range()].copy_from_slice(&tensor.data);
            }

            Ok(())
        }

        import(self.schema.params(), &dict.params, &mut self.params)?;
        import(self.schema.buffers(), &dict.buffers, &mut self.buffers)
    }
}
