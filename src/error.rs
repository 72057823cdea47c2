use std::{
    error::Error,
    fmt, io,
    path::PathBuf,
};

use machine_learning::MlErr;

/// The training library's result type.
pub type Result<T> = std::result::Result<T, TrainErr>;

/// Training runtime failures.
#[derive(Debug)]
pub enum TrainErr {
    Ml(MlErr),
    Io(io::Error),
    Json(serde_json::Error),
    MissingCheckpoint {
        path: PathBuf,
    },
    DegenerateEyeDistance {
        sample: usize,
    },
    DegenerateStatistics {
        coordinate: usize,
    },
    EmptySource {
        name: &'static str,
    },
    ShapeMismatch {
        what: &'static str,
        got: (usize, usize),
        expected: (usize, usize),
    },
    InvalidConfig {
        field: &'static str,
        reason: String,
    },
}

impl fmt::Display for TrainErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainErr::Ml(e) => write!(f, "model error: {e}"),
            TrainErr::Io(e) => write!(f, "io error: {e}"),
            TrainErr::Json(e) => write!(f, "json error: {e}"),
            TrainErr::MissingCheckpoint { path } => {
                write!(f, "no checkpoint found at {}", path.display())
            }
            TrainErr::DegenerateEyeDistance { sample } => write!(
                f,
                "sample {sample} has coincident eye centres, its error can't be normalized"
            ),
            TrainErr::DegenerateStatistics { coordinate } => write!(
                f,
                "coordinate {coordinate} has zero spread over the labeled targets"
            ),
            TrainErr::EmptySource { name } => write!(f, "the {name} source yields no batches"),
            TrainErr::ShapeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "shape mismatch in {what}: got {got:?}, expected {expected:?}"
            ),
            TrainErr::InvalidConfig { field, reason } => {
                write!(f, "invalid configuration for {field}: {reason}")
            }
        }
    }
}

impl Error for TrainErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TrainErr::Ml(e) => Some(e),
            TrainErr::Io(e) => Some(e),
            TrainErr::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MlErr> for TrainErr {
    fn from(value: MlErr) -> Self {
        Self::Ml(value)
    }
}

impl From<io::Error> for TrainErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for TrainErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}
