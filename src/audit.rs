//! Decision audit trail.
//!
//! Every decision can be appended as one newline-delimited JSON record to
//! a size-rotating log file. Audit writes are best-effort: a failed write
//! is counted and warned about, never surfaced to the caller, because the
//! decision itself must not depend on the log.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::request::Request;

/// One decision, as it lands in the log.
#[derive(Debug, serde::Serialize)]
pub struct AuditRecord<'a> {
    pub outcome: &'static str,
    pub resource: &'a str,
    pub action: &'a str,
    pub subjects: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<&'a str>,
}

impl<'a> AuditRecord<'a> {
    pub fn granted(request: &'a Request, policy_id: &'a str) -> Self {
        Self::new("granted", request, Some(policy_id))
    }

    pub fn denied(request: &'a Request, policy_id: &'a str) -> Self {
        Self::new("denied", request, Some(policy_id))
    }

    pub fn not_applicable(request: &'a Request) -> Self {
        Self::new("not-applicable", request, None)
    }

    fn new(outcome: &'static str, request: &'a Request, policy_id: Option<&'a str>) -> Self {
        Self {
            outcome,
            resource: &request.resource,
            action: &request.action,
            subjects: &request.subjects,
            policy_id,
        }
    }
}

/// Append-only log file with a single rotation chain (`<path>.1` ..
/// `<path>.<keep>`) and optional gzip of the freshest backup.
pub struct RotatingWriter {
    path: PathBuf,
    file: fs::File,
    max_bytes: Option<u64>,
    keep: usize,
    compress: bool,
}

impl RotatingWriter {
    pub fn open(
        path: &str,
        max_bytes: Option<u64>,
        keep: usize,
        compress: bool,
    ) -> std::io::Result<Self> {
        let file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: PathBuf::from(path),
            file,
            max_bytes,
            keep,
            compress,
        })
    }

    fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        if let Some(limit) = self.max_bytes {
            let over = self
                .path
                .metadata()
                .map(|meta| meta.len() >= limit)
                .unwrap_or(false);
            if over {
                self.rotate();
            }
        }
        writeln!(self.file, "{}", line)
    }

    fn current_size(&self) -> Option<u64> {
        self.path.metadata().ok().map(|meta| meta.len())
    }

    fn rotate(&mut self) {
        if self.keep > 0 {
            for index in (1..=self.keep).rev() {
                let older = if index == 1 {
                    self.path.clone()
                } else {
                    self.path.with_extension(format!("{}", index - 1))
                };
                if older.exists() {
                    let _ = fs::rename(&older, self.path.with_extension(format!("{index}")));
                }
            }
            if self.compress {
                self.compress_backup();
            }
        }
        if let Ok(fresh) = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
        {
            self.file = fresh;
        }
    }

    fn compress_backup(&self) {
        let rotated = self.path.with_extension("1");
        let Ok(data) = fs::read(&rotated) else {
            return;
        };
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        if encoder.write_all(&data).is_ok() {
            if let Ok(buffer) = encoder.finish() {
                let _ = fs::write(rotated.with_extension("1.gz"), buffer);
                let _ = fs::remove_file(&rotated);
            }
        }
    }
}

/// Shared handle the engine records decisions through. With no writer
/// configured, records still surface as `tracing` events under the
/// `audit` target.
#[derive(Clone)]
pub struct AuditSink {
    writer: Option<Arc<Mutex<RotatingWriter>>>,
    lines_total: Arc<AtomicU64>,
    write_errors_total: Arc<AtomicU64>,
}

impl AuditSink {
    /// A sink that only emits tracing events.
    pub fn disabled() -> Self {
        Self {
            writer: None,
            lines_total: Arc::new(AtomicU64::new(0)),
            write_errors_total: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn to_file(
        path: &str,
        max_bytes: Option<u64>,
        keep: usize,
        compress: bool,
    ) -> std::io::Result<Self> {
        let writer = RotatingWriter::open(path, max_bytes, keep, compress)?;
        Ok(Self {
            writer: Some(Arc::new(Mutex::new(writer))),
            lines_total: Arc::new(AtomicU64::new(0)),
            write_errors_total: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn record(&self, record: &AuditRecord<'_>) {
        let mut line = serde_json::json!({
            "ts": chrono::Utc::now().to_rfc3339(),
        });
        if let (serde_json::Value::Object(target), Ok(serde_json::Value::Object(fields))) =
            (&mut line, serde_json::to_value(record))
        {
            target.extend(fields);
        }

        if let Some(writer) = &self.writer {
            if let Ok(mut guard) = writer.lock() {
                match guard.write_line(&line.to_string()) {
                    Ok(()) => {
                        self.lines_total.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                    Err(error) => {
                        tracing::warn!(%error, "failed to write audit record");
                        self.write_errors_total.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                }
            }
        }
        tracing::info!(target: "audit", outcome = record.outcome,
            resource = record.resource, action = record.action,
            policy = ?record.policy_id, "decision");
        self.lines_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn lines_total(&self) -> u64 {
        self.lines_total.load(Ordering::Relaxed)
    }

    pub fn write_errors_total(&self) -> u64 {
        self.write_errors_total.load(Ordering::Relaxed)
    }

    pub fn log_size_bytes(&self) -> Option<u64> {
        self.writer
            .as_ref()
            .and_then(|writer| writer.lock().ok())
            .and_then(|guard| guard.current_size())
    }
}
