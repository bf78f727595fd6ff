//! Attempt results and where they are recorded
//!
//! Every attempt that gets a non-empty response from the target becomes a
//! [`RunResult`] and is handed to a [`ResultSink`] straight away. The file
//! sink appends one JSON object per line and flushes after each record.

use super::combo::Combo;
use bytes::Bytes;
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Default results file name
pub const DEFAULT_RESULTS_FILE: &str = "params.log";

/// Result sink errors
#[derive(Error, Debug)]
pub enum SinkError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record could not be serialized
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Malformed line in a results file
    #[error("Malformed record on line {line}: {source}")]
    Parse {
        /// 1-based line number
        line: usize,
        /// Underlying JSON error
        source: serde_json::Error,
    },
}

/// Outcome of one attempt that produced a response
#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    /// Raw bytes read back from the device
    pub response: Bytes,
    /// Combo that produced them
    pub combo: Combo,
    /// When the response was read
    pub timestamp: DateTime<Local>,
}

impl RunResult {
    /// Stamp a response with the current time
    pub fn new(response: Bytes, combo: Combo) -> Self {
        Self {
            response,
            combo,
            timestamp: Local::now(),
        }
    }

    /// Response as text, one char per byte (latin-1)
    pub fn response_text(&self) -> String {
        self.response.iter().map(|&b| char::from(b)).collect()
    }

    /// Persisted shape of this result
    pub fn to_record(&self) -> ResultRecord {
        ResultRecord {
            result: self.response_text(),
            trigger_count: self.combo.trigger_count,
            delay: self.combo.delay,
            duration: self.combo.duration,
            timestamp: Some(self.timestamp),
        }
    }
}

/// One line of a results file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Response decoded as latin-1 text
    pub result: String,
    /// Trigger count of the combo
    pub trigger_count: u32,
    /// Delay of the combo
    pub delay: u32,
    /// Duration of the combo
    pub duration: u32,
    /// When the response was read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Local>>,
}

impl ResultRecord {
    /// Combo this record belongs to
    pub fn combo(&self) -> Combo {
        Combo::new(self.trigger_count, self.delay, self.duration)
    }
}

/// Append-only destination for results. Duplicates are tolerated.
pub trait ResultSink: Send {
    /// Persist one result
    fn record(&mut self, result: &RunResult) -> Result<(), SinkError>;
}

/// Appends JSON lines to a file
pub struct JsonLinesSink {
    path: PathBuf,
    file: BufWriter<File>,
    records: usize,
}

impl JsonLinesSink {
    /// Open `path` for appending, creating it if needed
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: BufWriter::new(file),
            records: 0,
        })
    }

    /// File being written
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records written by this sink
    pub fn records(&self) -> usize {
        self.records
    }
}

impl ResultSink for JsonLinesSink {
    fn record(&mut self, result: &RunResult) -> Result<(), SinkError> {
        let line = serde_json::to_string(&result.to_record())?;
        writeln!(self.file, "{}", line)?;
        self.file.flush()?;
        self.records += 1;
        Ok(())
    }
}

/// Keeps results in memory; clones share the same buffer
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    results: Arc<Mutex<Vec<RunResult>>>,
}

impl MemorySink {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded
    pub fn results(&self) -> Vec<RunResult> {
        self.results.lock().clone()
    }

    /// Number of recorded results
    pub fn len(&self) -> usize {
        self.results.lock().len()
    }

    /// Whether nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultSink for MemorySink {
    fn record(&mut self, result: &RunResult) -> Result<(), SinkError> {
        self.results.lock().push(result.clone());
        Ok(())
    }
}

/// Load every record from a results file, skipping blank lines
pub fn read_records(path: impl AsRef<Path>) -> Result<Vec<ResultRecord>, SinkError> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|source| SinkError::Parse {
            line: i + 1,
            source,
        })?;
        records.push(record);
    }

    Ok(records)
}

/// Hits per combo, most frequent first, ties in combo order
pub fn hit_counts(records: &[ResultRecord]) -> Vec<(Combo, usize)> {
    let mut counts: HashMap<Combo, usize> = HashMap::new();
    for record in records {
        *counts.entry(record.combo()).or_default() += 1;
    }

    let mut sorted: Vec<(Combo, usize)> = counts.into_iter().collect();
    sorted.sort_by(|a, b| {
        b.1.cmp(&a.1).then_with(|| {
            (a.0.trigger_count, a.0.delay, a.0.duration).cmp(&(
                b.0.trigger_count,
                b.0.delay,
                b.0.duration,
            ))
        })
    });
    sorted
}
