pub mod dataloader;
pub mod dataset;
pub mod synthetic;

pub use dataloader::{BatchSource, Cyclic, ShuffledLoader};
pub use dataset::{Gather, LabeledBatch, LabeledSet, UnlabeledBatch, UnlabeledSet};
pub use synthetic::{FaceSplits, SplitSizes, SyntheticFaces};
