//! Append-only JSONL journal of connection-attempt events.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use tracing::warn;

use tether_core::current_unix_timestamp_ms;

const CONNECT_EVENTS_LOG_FILE: &str = "connect-events.jsonl";
const CONNECT_EVENT_SCHEMA_VERSION: u32 = 1;

/// Attempt journal shared by the orchestrator and its attempt tasks.
///
/// Appends are best-effort: a journaling failure is logged and never fails
/// the attempt that triggered it.
#[derive(Clone)]
pub struct AttemptJournal {
    path: PathBuf,
    file: Arc<Mutex<std::fs::File>>,
}

impl AttemptJournal {
    pub fn open_in(state_dir: &Path) -> Result<Self> {
        Self::open(state_dir.join(CONNECT_EVENTS_LOG_FILE))
    }

    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        Ok(Self {
            path,
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Records one attempt event; never propagates journal failures.
    pub fn record(&self, tenant_id: &str, attempt_id: &str, event: &str, detail: Option<&str>) {
        let mut record = json!({
            "schema_version": CONNECT_EVENT_SCHEMA_VERSION,
            "timestamp_unix_ms": current_unix_timestamp_ms(),
            "tenant_id": tenant_id,
            "attempt_id": attempt_id,
            "event": event,
        });
        if let Some(detail) = detail {
            record["detail"] = Value::String(detail.to_string());
        }
        if let Err(error) = self.append(&record) {
            warn!(
                tenant = tenant_id,
                event,
                error = %error,
                "failed to journal connect event"
            );
        }
    }

    fn append(&self, value: &Value) -> Result<()> {
        let line = serde_json::to_string(value).context("failed to encode journal event")?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow!("attempt journal mutex is poisoned"))?;
        writeln!(file, "{line}")
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        file.flush()
            .with_context(|| format!("failed to flush {}", self.path.display()))?;
        Ok(())
    }
}
