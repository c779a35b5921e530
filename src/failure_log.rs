use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

const DEFAULT_MAX_BYTES: u64 = 102_400;

/// Append-only JSONL record of failed conversions, truncated when it grows
/// past the byte cap. Observability only; writes never fail a request.
#[derive(Clone)]
pub struct FailureLog {
    path: PathBuf,
    max_bytes: u64,
    guard: Arc<Mutex<()>>,
}

#[derive(Serialize)]
pub struct ConversionFailureEntry {
    pub timestamp: String,
    pub timestamp_ms: u64,
    pub asset_id: String,
    pub source_format: String,
    pub target_format: String,
    pub is_dark: bool,
    pub reason: String,
}

impl ConversionFailureEntry {
    pub fn new(
        asset_id: &str,
        source_format: &str,
        target_format: &str,
        is_dark: bool,
        reason: String,
    ) -> Self {
        let timestamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string());
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_millis() as u64)
            .unwrap_or(0);
        Self {
            timestamp,
            timestamp_ms,
            asset_id: asset_id.to_string(),
            source_format: source_format.to_string(),
            target_format: target_format.to_string(),
            is_dark,
            reason,
        }
    }
}

impl FailureLog {
    pub fn new(path: PathBuf, max_bytes: u64) -> Option<Self> {
        if path.as_os_str().is_empty() {
            return None;
        }
        let max_bytes = if max_bytes == 0 {
            DEFAULT_MAX_BYTES
        } else {
            max_bytes
        };
        Some(Self {
            path,
            max_bytes,
            guard: Arc::new(Mutex::new(())),
        })
    }

    pub async fn write(&self, entry: ConversionFailureEntry) {
        let line = match serde_json::to_string(&entry) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = ?err, "failed to serialize failure log entry");
                return;
            }
        };
        let _guard = self.guard.lock().await;
        if let Some(parent) = self.path.parent() {
            if let Err(err) = fs::create_dir_all(parent).await {
                warn!(error = ?err, path = %self.path.display(), "failed to create failure log dir");
                return;
            }
        }
        let line_bytes = line.as_bytes();
        let line_len = line_bytes.len() as u64 + 1;
        match fs::metadata(&self.path).await {
            Ok(metadata) => {
                if metadata.len().saturating_add(line_len) > self.max_bytes {
                    if let Err(err) = fs::OpenOptions::new()
                        .create(true)
                        .write(true)
                        .truncate(true)
                        .open(&self.path)
                        .await
                    {
                        warn!(error = ?err, path = %self.path.display(), "failed to truncate failure log");
                        return;
                    }
                }
            }
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(error = ?err, path = %self.path.display(), "failed to stat failure log");
                    return;
                }
            }
        }
        let mut file = match fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
        {
            Ok(file) => file,
            Err(err) => {
                warn!(error = ?err, path = %self.path.display(), "failed to open failure log");
                return;
            }
        };
        if let Err(err) = file.write_all(line_bytes).await {
            warn!(error = ?err, path = %self.path.display(), "failed to write failure log");
            return;
        }
        let _ = file.write_all(b"\n").await;
    }
}
