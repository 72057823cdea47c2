use ndarray::ShapeError;
use std::{
    error::Error,
    fmt::{self, Display},
};

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug)]
pub enum MlErr {
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    SchemaMismatch {
        tensor: String,
    },
    UnknownTensor {
        name: String,
    },
    MissingTrace {
        layer: usize,
    },
    InvalidHyperparameter {
        name: &'static str,
        value: f32,
    },
    Shape(ShapeError),
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "There's a size mismatch in {what}, got {got} and expected {expected}"
            ),
            MlErr::SchemaMismatch { tensor } => write!(
                f,
                "The parameter schemas differ, first difference at tensor `{tensor}`"
            ),
            MlErr::UnknownTensor { name } => write!(f, "There's no tensor named `{name}`"),
            MlErr::MissingTrace { layer } => write!(
                f,
                "Tried to go backwards through layer {layer} without its forward trace"
            ),
            MlErr::InvalidHyperparameter { name, value } => {
                write!(f, "The hyperparameter {name} can't take the value {value}")
            }
            MlErr::Shape(e) => write!(f, "{e}"),
        }
    }
}

impl Error for MlErr {}

impl From<ShapeError> for MlErr {
    fn from(e: ShapeError) -> Self {
        MlErr::Shape(e)
    }
}
