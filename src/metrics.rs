use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::Result;

/// One scalar sample of a named metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scalar {
    pub key: String,
    pub value: f32,
    pub step: u64,
}

/// Where scalar metrics end up.
pub trait MetricsSink {
    fn add_scalar(&mut self, key: &str, value: f32, step: u64) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Appends every scalar as one JSON object per line.
pub struct JsonlSink {
    out: BufWriter<File>,
}

impl JsonlSink {
    /// Opens `path` for appending, creating it if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            out: BufWriter::new(file),
        })
    }
}

impl MetricsSink for JsonlSink {
    fn add_scalar(&mut self, key: &str, value: f32, step: u64) -> Result<()> {
        let scalar = Scalar {
            key: key.to_string(),
            value,
            step,
        };

        serde_json::to_writer(&mut self.out, &scalar)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Keeps every scalar in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub scalars: Vec<Scalar>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every value recorded under `key`, in order, with its step.
    pub fn series(&self, key: &str) -> Vec<(u64, f32)> {
        self.scalars
            .iter()
            .filter(|s| s.key == key)
            .map(|s| (s.step, s.value))
            .collect()
    }
}

impl MetricsSink for MemorySink {
    fn add_scalar(&mut self, key: &str, value: f32, step: u64) -> Result<()> {
        self.scalars.push(Scalar {
            key: key.to_string(),
            value,
            step,
        });
        Ok(())
    }
}
