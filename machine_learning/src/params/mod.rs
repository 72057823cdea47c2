mod schema;
mod state;

pub use schema::{ParamSchema, TensorSpec};
pub use state::{ModelState, NamedTensor, StateDict};
