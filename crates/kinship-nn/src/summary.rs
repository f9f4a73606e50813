//! Scalar summary sink.
//!
//! Scalars are appended as JSON lines to `<dir>/metrics.jsonl`:
//!
//! ```text
//! {"step":0,"tag":"Loss","name":"loss","value":0.69}
//! {"step":0,"tag":"Eva","name":"Acc","value":0.5}
//! ```

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// File name of the scalar log inside a run directory.
pub const METRICS_FILE: &str = "metrics.jsonl";

/// One logged scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarEvent {
    pub step: usize,
    pub tag: String,
    pub name: String,
    pub value: f64,
}

/// Appends [`ScalarEvent`]s to a JSON-lines file.
pub struct SummaryWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

impl SummaryWriter {
    /// Open (or append to) `<dir>/metrics.jsonl`, creating `dir` if needed.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(METRICS_FILE);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            out: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn add_scalar(&mut self, tag: &str, name: &str, value: f64, step: usize) -> Result<()> {
        let event = ScalarEvent {
            step,
            tag: tag.to_string(),
            name: name.to_string(),
            value,
        };
        serde_json::to_writer(&mut self.out, &event)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Read every event back from a metrics file.
pub fn read_scalars(path: &Path) -> Result<Vec<ScalarEvent>> {
    let text = fs::read_to_string(path)?;
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| Ok(serde_json::from_str(l)?))
        .collect()
}
