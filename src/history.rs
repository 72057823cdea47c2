use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::Path,
};

use crate::Result;

/// Columns of the per epoch table.
pub const COLUMNS: [&str; 11] = [
    "Train Loss",
    "Train Loss X",
    "Train Loss U",
    "Train ME",
    "Train FR",
    "Valid Loss",
    "Valid ME.",
    "Valid FR",
    "Test Loss",
    "Test ME.",
    "Test FR",
];

/// Tab separated per epoch table, one row per finished epoch.
pub struct HistoryTable {
    out: BufWriter<File>,
}

impl HistoryTable {
    /// Opens the table at `path`.
    ///
    /// # Arguments
    /// * `path` - Where the table lives.
    /// * `resume` - Whether to append to an existing table instead of starting a new one.
    pub fn open(path: impl AsRef<Path>, resume: bool) -> Result<Self> {
        let path = path.as_ref();
        let resume = resume && path.exists();

        let file = if resume {
            OpenOptions::new().append(true).open(path)?
        } else {
            File::create(path)?
        };

        let mut table = Self {
            out: BufWriter::new(file),
        };

        if !resume {
            writeln!(table.out, "{}", COLUMNS.join("\t"))?;
            table.out.flush()?;
        }

        Ok(table)
    }

    pub fn append(&mut self, row: [f32; COLUMNS.len()]) -> Result<()> {
        let cells: Vec<String> = row.iter().map(|v| format!("{v:.6}")).collect();
        writeln!(self.out, "{}", cells.join("\t"))?;
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn resume_appends_without_a_second_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");

        let mut table = HistoryTable::open(&path, false).unwrap();
        table.append([1.; 11]).unwrap();
        drop(table);

        let mut table = HistoryTable::open(&path, true).unwrap();
        table.append([2.; 11]).unwrap();
        drop(table);

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Train Loss\tTrain Loss X"));
        assert_eq!(lines[2].split('\t').count(), 11);
        assert!(lines[2].starts_with("2.000000"));
    }

    #[test]
    fn resuming_a_missing_table_writes_the_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");

        HistoryTable::open(&path, true).unwrap();
        assert!(fs::read_to_string(&path).unwrap().starts_with("Train Loss"));
    }
}
