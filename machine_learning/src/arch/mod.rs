pub mod activations;
pub mod layers;
pub mod loss;
mod model;
mod sequential;

pub use model::{Mode, Model, Trace};
pub use sequential::{Sequential, SequentialTrace};
