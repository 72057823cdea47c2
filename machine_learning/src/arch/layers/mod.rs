mod batch_norm;
mod dense;
mod layer;

pub use batch_norm::{BatchNorm, BatchNormTrace};
pub use dense::{Dense, DenseTrace};
pub use layer::{Layer, LayerTrace};
