//! Append-only record output, one JSON Lines file per pair.
//!
//! The sink is the last line of the dedup guarantee: if the process dies
//! after a page was written but before its checkpoint advanced, that page is
//! fetched again on resume and its records are dropped here by identity.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use jdcrawl_core::{Page, Pair, Record};
use tokio::io::AsyncWriteExt;

use crate::error::SinkError;

/// Durable destination for crawled records.
pub trait RecordSink {
    /// Durably appends the records of `page` that were not written before.
    /// Returns how many were new.
    fn append(&self, page: &Page) -> impl Future<Output = Result<usize, SinkError>>;

    /// Drops any per-pair state held in memory once `pair` is finished for
    /// this run. The next append for it starts from what is on disk.
    fn release(&self, _pair: &Pair) {}
}

#[derive(Debug, Default)]
struct PairFile {
    /// `None` until the existing file has been scanned.
    seen: Option<HashSet<String>>,
}

/// Writes `<dir>/<feed>_<product_id>.jsonl`.
#[derive(Debug)]
pub struct JsonlRecordSink {
    dir: PathBuf,
    files: Mutex<HashMap<Pair, Arc<tokio::sync::Mutex<PairFile>>>>,
}

impl JsonlRecordSink {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            files: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn path_for(&self, pair: &Pair) -> PathBuf {
        self.dir
            .join(format!("{}_{}.jsonl", pair.feed_type, pair.product_id))
    }

    /// Reads back every record written for `pair`.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Io`] if the file exists but cannot be read,
    /// [`SinkError::InvalidUtf8`] if a complete line is not UTF-8, or
    /// [`SinkError::CorruptLine`] for a malformed complete line. An
    /// unterminated final line is skipped.
    pub async fn load_records(&self, pair: &Pair) -> Result<Vec<Record>, SinkError> {
        let path = self.path_for(pair);
        let (records, _) = read_file(&path).await?;
        Ok(records)
    }

    fn entry(&self, pair: &Pair) -> Arc<tokio::sync::Mutex<PairFile>> {
        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(files.entry(pair.clone()).or_default())
    }

    /// Number of pairs whose seen-ID sets are held in memory.
    #[must_use]
    pub fn tracked_pairs(&self) -> usize {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl RecordSink for JsonlRecordSink {
    async fn append(&self, page: &Page) -> Result<usize, SinkError> {
        let pair = Pair::new(page.product_id.clone(), page.feed_type);
        let path = self.path_for(&pair);
        let entry = self.entry(&pair);
        let mut file_state = entry.lock().await;

        if file_state.seen.is_none() {
            let (records, valid_len) = read_file(&path).await?;
            if let Some(len) = valid_len {
                truncate_partial_tail(&path, len).await?;
            }
            file_state.seen = Some(
                records
                    .into_iter()
                    .map(|r| r.external_record_id)
                    .collect(),
            );
        }

        let mut buffer = String::new();
        let mut fresh = Vec::new();
        {
            let seen = file_state.seen.get_or_insert_with(HashSet::new);
            for record in &page.records {
                let id = record.identity().1;
                if seen.contains(id) || fresh.iter().any(|f: &String| f == id) {
                    continue;
                }
                buffer.push_str(&serde_json::to_string(record)?);
                buffer.push('\n');
                fresh.push(id.to_owned());
            }
        }

        let skipped = page.records.len() - fresh.len();
        if skipped > 0 {
            tracing::debug!(
                pair = %pair,
                page_index = page.page_index,
                skipped,
                "dropping records already written"
            );
        }
        if fresh.is_empty() {
            return Ok(0);
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| SinkError::Io {
                path: self.dir.clone(),
                source,
            })?;
        let io_err = |source| SinkError::Io {
            path: path.clone(),
            source,
        };
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(io_err)?;
        file.write_all(buffer.as_bytes()).await.map_err(io_err)?;
        file.sync_data().await.map_err(io_err)?;

        let written = fresh.len();
        file_state
            .seen
            .get_or_insert_with(HashSet::new)
            .extend(fresh);
        Ok(written)
    }

    fn release(&self, pair: &Pair) {
        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        if files.remove(pair).is_some() {
            tracing::debug!(pair = %pair, "released record dedup state");
        }
    }
}

/// Parses a record file. Returns the records and, when the file ends in an
/// unterminated line left by an interrupted write, the byte length of the
/// complete lines before it.
///
/// An unterminated final line is never counted, even if it happens to parse:
/// it is about to be truncated, and its page will be fetched again because
/// the cursor did not advance past it.
async fn read_file(path: &Path) -> Result<(Vec<Record>, Option<u64>), SinkError> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), None)),
        Err(source) => {
            return Err(SinkError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let complete_len = raw.iter().rposition(|b| *b == b'\n').map_or(0, |pos| pos + 1);
    let partial_tail = complete_len < raw.len();
    if partial_tail {
        tracing::debug!(
            path = %path.display(),
            bytes = raw.len() - complete_len,
            "ignoring unterminated final record line"
        );
    }

    let complete = std::str::from_utf8(&raw[..complete_len]).map_err(|source| {
        SinkError::InvalidUtf8 {
            path: path.to_path_buf(),
            source,
        }
    })?;

    let mut records = Vec::new();
    for (idx, line) in complete.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record =
            serde_json::from_str::<Record>(line).map_err(|source| SinkError::CorruptLine {
                path: path.to_path_buf(),
                line: idx + 1,
                source,
            })?;
        records.push(record);
    }
    let valid_len = partial_tail.then_some(complete_len as u64);
    Ok((records, valid_len))
}

async fn truncate_partial_tail(path: &Path, len: u64) -> Result<(), SinkError> {
    tracing::warn!(path = %path.display(), len, "truncating partial record line");
    let io_err = |source| SinkError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = tokio::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .await
        .map_err(io_err)?;
    file.set_len(len).await.map_err(io_err)?;
    file.sync_data().await.map_err(io_err)
}
