//! Daily message audit log.
//!
//! Every addressed inbound message and every reply is appended as one tab-separated
//! line to `<audit_dir>/<YYYY-MM-DD>.log` (UTC date):
//!
//! ```text
//! 2025-06-01T12:00:00Z	IN	peer:305419896	hello relay
//! ```
//!
//! Text is escaped to a single line, obvious secrets are masked and the result is
//! capped. Write failures are logged and otherwise ignored.
use chrono::{DateTime, Utc};
use log::warn;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::logutil::{redact_sensitive, safe_text};
use crate::meshtastic::Target;

pub const MAX_AUDIT_TEXT: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::In => "IN",
            Direction::Out => "OUT",
        })
    }
}

pub struct AuditLog {
    dir: PathBuf,
    redact_content: bool,
    write_lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(dir: impl Into<PathBuf>, redact_content: bool) -> Self {
        Self {
            dir: dir.into(),
            redact_content,
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, at: DateTime<Utc>) -> PathBuf {
        self.dir.join(format!("{}.log", at.format("%Y-%m-%d")))
    }

    /// Render one audit line (without the trailing newline).
    pub fn format_line(
        &self,
        direction: Direction,
        target: Target,
        text: &str,
        at: DateTime<Utc>,
    ) -> String {
        let body = if self.redact_content {
            "[REDACTED]".to_string()
        } else {
            safe_text(&redact_sensitive(&safe_text(text, usize::MAX)), MAX_AUDIT_TEXT)
        };
        format!(
            "{}\t{}\t{}\t{}",
            at.format("%Y-%m-%dT%H:%M:%SZ"),
            direction,
            target,
            body
        )
    }

    pub async fn record(&self, direction: Direction, target: Target, text: &str) {
        let now = Utc::now();
        let line = self.format_line(direction, target, text, now);
        if let Err(e) = self.append(&self.path_for(now), &line).await {
            warn!("Audit log write failed: {}", e);
        }
    }

    async fn append(&self, path: &Path, line: &str) -> std::io::Result<()> {
        let _guard = self.write_lock.lock().await;
        if !self.dir.is_dir() {
            let mut builder = tokio::fs::DirBuilder::new();
            builder.recursive(true);
            #[cfg(unix)]
            builder.mode(0o700);
            builder.create(&self.dir).await?;
        }
        let mut options = tokio::fs::OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut file = options.open(path).await?;
        file.write_all(format!("{}\n", line).as_bytes()).await?;
        file.flush().await
    }
}
