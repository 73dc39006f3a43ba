//! NDJSON audit sink with size-based rotation.
//!
//! One lock guards the active file: appends, inline rotation, and rotation
//! requested by the background task all take it, so a rotation never races a
//! write and concurrent writers never interleave partial lines.
//!
//! Rotated files are named `<stem>.<YYYYMMDDThhmmss>.<ext>.gz` (UTC) and only
//! the `backup_count` most recently modified archives are kept.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;

use gadq_core::clock::{Clock, SystemClock};
use gadq_core::error::{GadqError, Result};

use crate::config::AuditSection;

use super::event::{AuditEvent, ProcessMeta};
use super::mask::mask_token;

const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
const ROTATE_FORMAT: &str = "%Y%m%dT%H%M%S";

#[derive(Debug, Clone)]
pub struct AuditLogConfig {
    pub path: PathBuf,
    pub max_bytes: u64,
    pub backup_count: usize,
}

impl From<&AuditSection> for AuditLogConfig {
    fn from(s: &AuditSection) -> Self {
        Self {
            path: PathBuf::from(&s.path),
            max_bytes: s.max_bytes,
            backup_count: s.backup_count,
        }
    }
}

pub struct AuditLog {
    cfg: AuditLogConfig,
    clock: Arc<dyn Clock>,
    lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(cfg: AuditLogConfig) -> Self {
        Self::with_clock(cfg, Arc::new(SystemClock))
    }

    pub fn with_clock(cfg: AuditLogConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            cfg,
            clock,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.cfg.path
    }

    pub fn config(&self) -> &AuditLogConfig {
        &self.cfg
    }

    /// Best-effort append. Failures are logged and dropped; auditing never
    /// changes the outcome of the operation being audited.
    pub fn append(&self, event: &AuditEvent) {
        if let Err(e) = self.try_append(event) {
            tracing::warn!(error = %e, action = event.action(), "audit append failed");
        }
    }

    /// Append one record, rotating inline once the file reaches `max_bytes`.
    pub fn try_append(&self, event: &AuditEvent) -> Result<()> {
        let line = self.render(event)?;

        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.write_line(&line).map_err(audit_err)?;

        if self.active_len() >= self.cfg.max_bytes {
            if let Err(e) = self.rotate_locked() {
                tracing::warn!(error = %e, "inline audit rotation failed");
            }
        }
        Ok(())
    }

    /// Serialized, masked record (including the trailing newline).
    /// The caller's event is left untouched.
    pub fn render(&self, event: &AuditEvent) -> Result<String> {
        let mut prepared = event.clone();
        if prepared.ts.is_none() {
            prepared.ts = Some(self.now_iso());
        }
        if prepared.meta.is_none() {
            prepared.meta = Some(ProcessMeta::current().clone());
        }
        if let Some(token) = prepared.token.as_mut() {
            *token = mask_token(token);
        }

        let mut line = serde_json::to_string(&prepared)
            .map_err(|e| GadqError::Audit(format!("encode {}: {e}", event.action())))?;
        line.push('\n');
        Ok(line)
    }

    /// Rotate now if the active file is non-empty. Returns the archive path.
    pub fn rotate(&self) -> Result<Option<PathBuf>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.rotate_locked().map_err(audit_err)
    }

    /// Rotate only if the active file is at or above `max_bytes`.
    pub fn rotate_if_oversized(&self) -> Result<Option<PathBuf>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.active_len() < self.cfg.max_bytes {
            return Ok(None);
        }
        self.rotate_locked().map_err(audit_err)
    }

    /// Archives, most recently modified first.
    pub fn archives(&self) -> Result<Vec<PathBuf>> {
        self.list_archives().map_err(audit_err)
    }

    fn write_line(&self, line: &str) -> io::Result<()> {
        if let Some(parent) = self.cfg.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.cfg.path)?;
        f.write_all(line.as_bytes())
    }

    fn active_len(&self) -> u64 {
        fs::metadata(&self.cfg.path).map(|m| m.len()).unwrap_or(0)
    }

    // Caller holds `self.lock`.
    fn rotate_locked(&self) -> io::Result<Option<PathBuf>> {
        if self.active_len() == 0 {
            return Ok(None);
        }

        let rotated = self.rotated_name();
        if let Err(e) = fs::rename(&self.cfg.path, &rotated) {
            tracing::debug!(error = %e, "rename failed; falling back to copy+truncate");
            fs::copy(&self.cfg.path, &rotated)?;
            OpenOptions::new()
                .write(true)
                .truncate(true)
                .open(&self.cfg.path)?;
        }

        let gz = compress(&rotated)?;
        self.prune()?;

        tracing::info!(archive = %gz.display(), "audit log rotated");
        Ok(Some(gz))
    }

    fn rotated_name(&self) -> PathBuf {
        let (stem, ext) = self.name_parts();
        let ts = self.now().format(ROTATE_FORMAT).to_string();

        let mut n = 0u32;
        loop {
            let tag = if n == 0 { ts.clone() } else { format!("{ts}-{n}") };
            let candidate = self.cfg.path.with_file_name(format!("{stem}.{tag}{ext}"));
            let gz = gz_path(&candidate);
            if !candidate.exists() && !gz.exists() {
                return candidate;
            }
            n += 1;
        }
    }

    fn list_archives(&self) -> io::Result<Vec<PathBuf>> {
        let (stem, ext) = self.name_parts();
        let prefix = format!("{stem}.");
        let suffix = format!("{ext}.gz");

        let entries = match fs::read_dir(self.dir()) {
            Ok(e) => e,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut found: Vec<(SystemTime, PathBuf)> = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with(&prefix) || !name.ends_with(&suffix) {
                continue;
            }
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            found.push((meta.modified().unwrap_or(SystemTime::UNIX_EPOCH), entry.path()));
        }

        found.sort_by(|a, b| b.cmp(a));
        Ok(found.into_iter().map(|(_, p)| p).collect())
    }

    fn prune(&self) -> io::Result<()> {
        for old in self.list_archives()?.into_iter().skip(self.cfg.backup_count) {
            if let Err(e) = fs::remove_file(&old) {
                tracing::warn!(path = %old.display(), error = %e, "failed to prune audit archive");
            }
        }
        Ok(())
    }

    fn dir(&self) -> &Path {
        match self.cfg.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        }
    }

    /// `events.ndjson` -> ("events", ".ndjson")
    fn name_parts(&self) -> (String, String) {
        let stem = self
            .cfg
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "events".into());
        let ext = self
            .cfg
            .path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        (stem, ext)
    }

    fn now(&self) -> DateTime<Utc> {
        let secs = i64::try_from(self.clock.now_secs()).unwrap_or(i64::MAX);
        DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or_default()
    }

    fn now_iso(&self) -> String {
        self.now().format(TS_FORMAT).to_string()
    }
}

fn gz_path(p: &Path) -> PathBuf {
    let mut s = p.as_os_str().to_owned();
    s.push(".gz");
    PathBuf::from(s)
}

/// Gzip `path` to `path.gz` and remove the uncompressed file.
fn compress(path: &Path) -> io::Result<PathBuf> {
    let gz = gz_path(path);
    let mut input = File::open(path)?;
    let mut enc = GzEncoder::new(File::create(&gz)?, Compression::default());
    io::copy(&mut input, &mut enc)?;
    enc.finish()?.sync_all()?;
    drop(input);

    if let Err(e) = fs::remove_file(path) {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove rotated file");
    }
    Ok(gz)
}

fn audit_err(e: io::Error) -> GadqError {
    GadqError::Audit(e.to_string())
}
