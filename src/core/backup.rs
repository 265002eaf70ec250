//! Session-scoped backup store for live dedup runs.
//!
//! Every removal candidate is copied into a timestamped session under
//! `<backup-root>/<ID>` before anything is deleted. Writes stage in
//! `<backup-root>/tmp/<ID>` and are atomically renamed into place on
//! finalize; a DONE marker separates completed sessions from wreckage left
//! by a crash. Result corpora are flat, so sessions are flat too: one
//! backed-up file per result file, addressed by bare file name.

use anyhow::{Context, Result, bail};
use blake3::Hasher as Blake3;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, Read, Write},
    time::{SystemTime, UNIX_EPOCH},
};

/// Per-file metadata recorded in the session manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileBackupMeta {
    pub filename: String,         // bare result-file name
    pub size_bytes: u64,          // backed-up content size
    pub last_modified: u64,       // secs since UNIX_EPOCH (source file)
    pub checksum: Option<String>, // blake3:<hex>
}

/// Manifest describing a completed or in-progress session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionManifest {
    pub id: String,          // e.g., 2025-08-14T10-30-15Z_a9Jh5
    pub timestamp: String,   // RFC3339 creation time
    pub operation: String,   // "dedup"
    pub policy: String,      // keeper policy label
    pub results_dir: String, // directory the files came from
    pub args: Vec<String>,   // CLI args snapshot
    pub success: bool,       // set on finalize
    pub last_updated: String, // RFC3339
    pub files: Vec<FileBackupMeta>,
}

/// Lightweight index record for quick session listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionIndexEntry {
    pub id: String,
    pub timestamp: String,
    pub success: bool,
    pub files: usize,
    pub policy: String,
}

/// Manager creating a single session; stage in tmp, then finalize.
#[derive(Debug)]
pub struct BackupManager {
    root: Utf8PathBuf,              // backup root (holds finished sessions)
    locks_dir: Utf8PathBuf,         // <root>/locks
    session_id: String,
    session_tmp_dir: Utf8PathBuf,   // <root>/tmp/<id>
    session_final_dir: Utf8PathBuf, // <root>/<id>
    manifest: SessionManifest,
    finalized: bool,
}

impl BackupManager {
    /// Start a new session under `<root>/tmp/<ID>`.
    pub fn begin(root: &Utf8Path, policy: &str, results_dir: &Utf8Path) -> Result<Self> {
        let tmp_sessions_dir = root.join("tmp");
        let locks_dir = root.join("locks");

        fs::create_dir_all(root).with_context(|| format!("create backup root: {root}"))?;
        fs::create_dir_all(&tmp_sessions_dir)
            .with_context(|| format!("create tmp dir: {tmp_sessions_dir}"))?;
        fs::create_dir_all(&locks_dir)
            .with_context(|| format!("create locks dir: {locks_dir}"))?;

        let session_id = generate_session_id();
        let session_tmp_dir = tmp_sessions_dir.join(&session_id);
        let session_final_dir = root.join(&session_id);

        fs::create_dir_all(&session_tmp_dir)
            .with_context(|| format!("create session tmp: {session_tmp_dir}"))?;

        let now = Utc::now().to_rfc3339();
        let manifest = SessionManifest {
            id: session_id.clone(),
            timestamp: now.clone(),
            operation: "dedup".into(),
            policy: policy.into(),
            results_dir: results_dir.to_string(),
            args: std::env::args().collect(),
            success: false,
            last_updated: now,
            files: Vec::new(),
        };

        Ok(Self {
            root: root.to_path_buf(),
            locks_dir,
            session_id,
            session_tmp_dir,
            session_final_dir,
            manifest,
            finalized: false,
        })
    }

    /// Back up a single result file by absolute path; flat destination.
    pub fn backup_file(&mut self, source: &Utf8Path) -> Result<()> {
        let filename = source
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("backup source has no file name: {source}"))?;

        let meta =
            fs::metadata(source).with_context(|| format!("stat source: {source}"))?;
        if !meta.is_file() {
            bail!("unsupported file type for backup: {source}");
        }

        let backup_path = self.session_tmp_dir.join(filename);
        fs::copy(source, &backup_path)
            .with_context(|| format!("copy file to backup: {backup_path}"))?;

        // Content-based accounting from the backup copy.
        let size_bytes = fs::metadata(&backup_path)
            .with_context(|| format!("stat backup: {backup_path}"))?
            .len();
        let last_modified = meta
            .modified()
            .unwrap_or(SystemTime::UNIX_EPOCH)
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let checksum = Some(stream_blake3(&backup_path)?);

        self.manifest.files.push(FileBackupMeta {
            filename: filename.to_string(),
            size_bytes,
            last_modified,
            checksum,
        });
        self.manifest.last_updated = Utc::now().to_rfc3339();
        Ok(())
    }

    /// Session identifier.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Session directory (tmp while unfinalized; final after finalize).
    pub fn session_dir(&self) -> &Utf8Path {
        if self.finalized {
            &self.session_final_dir
        } else {
            &self.session_tmp_dir
        }
    }

    /// Number of files recorded so far.
    pub fn file_count(&self) -> usize {
        self.manifest.files.len()
    }

    /// Write manifest, atomically rename tmp->final, create DONE, append index.
    pub fn finalize(&mut self, success: bool) -> Result<()> {
        if self.finalized {
            return Ok(());
        }

        self.manifest.success = success;
        self.manifest.last_updated = Utc::now().to_rfc3339();

        // Atomic manifest write via temp file.
        let manifest_path = self.session_tmp_dir.join("manifest.json");
        let manifest_tmp = self.session_tmp_dir.join("manifest.json.tmp");
        let manifest_text =
            serde_json::to_string_pretty(&self.manifest).context("serialize manifest")?;
        fs::write(&manifest_tmp, &manifest_text)
            .with_context(|| format!("write manifest tmp: {manifest_tmp}"))?;
        File::open(&manifest_tmp)?.sync_all().ok();
        fs::rename(&manifest_tmp, &manifest_path)?;
        let _ = sync_dir(&self.session_tmp_dir);

        // Atomic rename from tmp to final.
        fs::rename(&self.session_tmp_dir, &self.session_final_dir).with_context(|| {
            format!(
                "rename {} -> {}",
                self.session_tmp_dir, self.session_final_dir
            )
        })?;

        // Durably record the rename.
        let _ = sync_dir(&self.root);

        // Create DONE and sync it + final dir.
        let done_path = self.session_final_dir.join("DONE");
        fs::write(&done_path, "").with_context(|| format!("create DONE: {done_path}"))?;
        File::open(&done_path)?.sync_all().ok();
        let _ = sync_dir(&self.session_final_dir);

        // Mark finalized only after successful rename + DONE creation.
        self.finalized = true;

        // Append to index under lock.
        self.append_to_index()?;
        Ok(())
    }

    fn append_to_index(&self) -> Result<()> {
        let index_path = self.root.join("index.jsonl");
        let lock_path = self.locks_dir.join("backups.lock");
        let _guard = acquire_lock(&lock_path)?;

        let entry = SessionIndexEntry {
            id: self.manifest.id.clone(),
            timestamp: self.manifest.timestamp.clone(),
            success: self.manifest.success,
            files: self.manifest.files.len(),
            policy: self.manifest.policy.clone(),
        };
        let line = serde_json::to_string(&entry).context("serialize index entry")?;

        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&index_path)
            .with_context(|| format!("open index: {index_path}"))?;
        writeln!(f, "{line}").context("append index")?;
        f.sync_all().ok();

        Ok(())
    }
}

impl Drop for BackupManager {
    fn drop(&mut self) {
        if !self.finalized {
            let _ = self.finalize(false); // best-effort failure finalize
        }
    }
}

/// Cross-platform directory fsync helper.
#[cfg(unix)]
fn sync_dir(p: &Utf8Path) -> std::io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;
    let f = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_DIRECTORY)
        .open(p)?;
    f.sync_all()
}

#[cfg(windows)]
fn sync_dir(_p: &Utf8Path) -> std::io::Result<()> {
    // Windows does not expose a reliable directory fsync; best-effort no-op.
    Ok(())
}

/// Generate a sortable, filesystem-safe session ID.
fn generate_session_id() -> String {
    let ts = Utc::now().format("%Y-%m-%dT%H-%M-%SZ").to_string();
    let alphabet = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::rng();
    let suffix: String = (0..10)
        .map(|_| {
            let idx = rng.random_range(0..alphabet.len());
            alphabet[idx] as char
        })
        .collect();
    format!("{}_{}", ts, suffix)
}

/// Stream a file into a blake3 digest as `blake3:<hex>`.
fn stream_blake3(path: &Utf8Path) -> Result<String> {
    let mut f = File::open(path).with_context(|| format!("open for checksum: {path}"))?;
    let mut hasher = Blake3::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("blake3:{}", hasher.finalize().to_hex()))
}

/// Acquire a simple file lock; guard deletes the lock on drop.
struct LockGuard {
    path: Utf8PathBuf,
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = self.file.sync_all();
        let _ = fs::remove_file(&self.path);
    }
}

fn acquire_lock(lock_path: &Utf8Path) -> Result<LockGuard> {
    match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(lock_path)
    {
        Ok(mut file) => {
            writeln!(file, "pid={}", std::process::id()).ok();
            file.sync_all().ok();
            Ok(LockGuard {
                path: lock_path.to_path_buf(),
                file,
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            // Stale-lock recovery: locks older than 60s belong to dead runs.
            if let Ok(meta) = fs::metadata(lock_path)
                && let Ok(modified) = meta.modified()
                && let Ok(elapsed) = modified.elapsed()
                && elapsed.as_secs() > 60
                && fs::remove_file(lock_path).is_ok()
            {
                let mut file = OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(lock_path)
                    .with_context(|| {
                        format!("acquire lock after stale cleanup: {lock_path}")
                    })?;

                writeln!(file, "pid={}", std::process::id()).ok();
                file.sync_all().ok();

                return Ok(LockGuard {
                    path: lock_path.to_path_buf(),
                    file,
                });
            }
            Err(anyhow::Error::new(e).context(format!("acquire lock: {lock_path}")))
        }
        Err(e) => Err(anyhow::Error::new(e).context(format!("acquire lock: {lock_path}"))),
    }
}

/// Read the append-only index; ignores malformed lines and entries whose
/// session directory no longer exists (pruned by cleanup).
pub fn list_sessions(root: &Utf8Path) -> Result<Vec<SessionIndexEntry>> {
    let index_path = root.join("index.jsonl");
    if !index_path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(&index_path).with_context(|| format!("open index: {index_path}"))?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("read index line {}", i + 1))?;
        let t = line.trim();
        if t.is_empty() {
            continue;
        }
        match serde_json::from_str::<SessionIndexEntry>(t) {
            Ok(e) => {
                if root.join(&e.id).is_dir() {
                    out.push(e);
                }
            }
            Err(_) => continue, // tolerate partial/corrupt lines
        }
    }
    Ok(out)
}

/// Load a session manifest; requires DONE to be present.
pub fn read_session_manifest(root: &Utf8Path, session_id: &str) -> Result<SessionManifest> {
    let base = root.join(session_id);
    let done = base.join("DONE");
    if !done.exists() {
        bail!("Session {} is incomplete (missing DONE)", session_id);
    }
    let manifest_path = base.join("manifest.json");
    let s = fs::read_to_string(&manifest_path)
        .with_context(|| format!("read manifest: {manifest_path}"))?;
    let m: SessionManifest = serde_json::from_str(&s)
        .with_context(|| format!("parse manifest: {manifest_path}"))?;
    Ok(m)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn basic_session_flow() {
        let tmp = TempDir::new().unwrap();
        let base = Utf8Path::from_path(tmp.path()).unwrap();
        let results = base.join("data");
        let root = base.join("backups");
        fs::create_dir_all(&results).unwrap();
        fs::write(results.join("result_a.json"), "{}").unwrap();

        let mut mgr = BackupManager::begin(&root, "worst", &results).unwrap();
        mgr.backup_file(&results.join("result_a.json")).unwrap();
        mgr.finalize(true).unwrap();

        let idx = list_sessions(&root).unwrap();
        assert_eq!(idx.len(), 1);
        assert!(idx[0].success);
        assert_eq!(idx[0].files, 1);
        assert_eq!(idx[0].policy, "worst");

        let m = read_session_manifest(&root, &idx[0].id).unwrap();
        assert_eq!(m.files.len(), 1);
        assert_eq!(m.files[0].filename, "result_a.json");
        assert_eq!(m.results_dir, results.as_str());

        // Payload landed flat under the session directory.
        let backed = root.join(&idx[0].id).join("result_a.json");
        assert!(backed.exists());
    }

    #[test]
    fn unfinalized_session_is_not_listed_as_success() {
        let tmp = TempDir::new().unwrap();
        let base = Utf8Path::from_path(tmp.path()).unwrap();
        let results = base.join("data");
        let root = base.join("backups");
        fs::create_dir_all(&results).unwrap();
        fs::write(results.join("result_a.json"), "{}").unwrap();

        {
            let mut mgr = BackupManager::begin(&root, "freshest", &results).unwrap();
            mgr.backup_file(&results.join("result_a.json")).unwrap();
            // dropped without an explicit finalize(true)
        }

        let idx = list_sessions(&root).unwrap();
        assert_eq!(idx.len(), 1);
        assert!(!idx[0].success);
    }

    #[test]
    fn backup_of_missing_file_fails() {
        let tmp = TempDir::new().unwrap();
        let base = Utf8Path::from_path(tmp.path()).unwrap();
        let root = base.join("backups");

        let mut mgr = BackupManager::begin(&root, "worst", &base.join("data")).unwrap();
        assert!(mgr.backup_file(&base.join("data/result_gone.json")).is_err());
    }
}
