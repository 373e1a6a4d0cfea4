//! Read-modify-write access to the share definitions in smb.conf.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::lock::FileLock;
use crate::smbconf::{self, ShareEntry, ShareRecord};
use crate::system::ServiceReload;

/// Storage backing the configuration text.
pub trait ShareFile {
    type Guard;

    /// Exclusive access for the duration of one mutation.
    fn lock(&self) -> Result<Self::Guard>;

    fn read(&self) -> Result<String>;

    fn write(&self, contents: &str) -> Result<()>;

    /// Keeps a copy of `contents` as it was before a destructive edit.
    fn save_backup(&self, contents: &str) -> Result<()>;
}

/// smb.conf on disk.
#[derive(Debug, Clone)]
pub struct DiskShareFile {
    path: PathBuf,
    lock_timeout: Duration,
}

impl DiskShareFile {
    pub fn new(path: impl Into<PathBuf>, lock_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            lock_timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    }

    pub fn backup_path(&self) -> PathBuf {
        self.sibling(".bak")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.sibling(".lock")
    }
}

impl ShareFile for DiskShareFile {
    type Guard = FileLock;

    fn lock(&self) -> Result<FileLock> {
        FileLock::acquire(&self.lock_path(), self.lock_timeout)
    }

    fn read(&self) -> Result<String> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(Error::io(format!("reading {}", self.path.display()), e)),
        }
    }

    fn write(&self, contents: &str) -> Result<()> {
        let ctx = || format!("writing {}", self.path.display());
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| Error::io(ctx(), e))?;
        tmp.write_all(contents.as_bytes())
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| Error::io(ctx(), e))?;
        if let Ok(meta) = fs::metadata(&self.path) {
            fs::set_permissions(tmp.path(), meta.permissions()).map_err(|e| Error::io(ctx(), e))?;
        }
        tmp.persist(&self.path)
            .map_err(|e| Error::io(ctx(), e.error))?;
        Ok(())
    }

    fn save_backup(&self, contents: &str) -> Result<()> {
        let backup = self.backup_path();
        fs::write(&backup, contents)
            .map_err(|e| Error::io(format!("writing backup {}", backup.display()), e))
    }
}

/// In-memory configuration text; clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryShareFile {
    contents: Arc<Mutex<String>>,
    backup: Arc<Mutex<Option<String>>>,
    writes_left: Arc<Mutex<Option<usize>>>,
}

impl MemoryShareFile {
    pub fn new(contents: impl Into<String>) -> Self {
        Self {
            contents: Arc::new(Mutex::new(contents.into())),
            backup: Arc::new(Mutex::new(None)),
            writes_left: Arc::new(Mutex::new(None)),
        }
    }

    /// Lets the next `n` writes through and fails every one after that.
    pub fn fail_writes_after(&self, n: usize) {
        *self.writes_left.lock().unwrap() = Some(n);
    }

    pub fn contents(&self) -> String {
        self.contents.lock().unwrap().clone()
    }

    pub fn backup(&self) -> Option<String> {
        self.backup.lock().unwrap().clone()
    }
}

impl ShareFile for MemoryShareFile {
    type Guard = ();

    fn lock(&self) -> Result<()> {
        Ok(())
    }

    fn read(&self) -> Result<String> {
        Ok(self.contents())
    }

    fn write(&self, contents: &str) -> Result<()> {
        match self.writes_left.lock().unwrap().as_mut() {
            Some(0) => {
                return Err(Error::io(
                    "writing in-memory configuration",
                    std::io::Error::other("write refused"),
                ))
            }
            Some(left) => *left -= 1,
            None => {}
        }
        *self.contents.lock().unwrap() = contents.to_string();
        Ok(())
    }

    fn save_backup(&self, contents: &str) -> Result<()> {
        *self.backup.lock().unwrap() = Some(contents.to_string());
        Ok(())
    }
}

/// Configuration text as it was before a share was removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigBackup(String);

impl ConfigBackup {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone)]
pub struct RemovedShare {
    pub name: String,
    /// `None` when the block carried no `path` line.
    pub path: Option<String>,
    pub backup: ConfigBackup,
}

pub struct ConfigStore<F, R> {
    file: F,
    reload: R,
}

impl<F: ShareFile, R: ServiceReload> ConfigStore<F, R> {
    pub fn new(file: F, reload: R) -> Self {
        Self { file, reload }
    }

    pub fn file(&self) -> &F {
        &self.file
    }

    pub fn list_shares(&self) -> Result<Vec<ShareEntry>> {
        let text = self.file.read()?;
        Ok(smbconf::list_shares(&smbconf::split_lines(&text)))
    }

    /// Appends a share block and reloads the service.
    ///
    /// A failed reload leaves the block in place and is reported as
    /// [`Error::ReloadFailed`].
    pub fn add_share(&self, record: &ShareRecord) -> Result<()> {
        let _guard = self.file.lock()?;
        let text = self.file.read()?;
        if smbconf::contains_share(&smbconf::split_lines(&text), &record.name) {
            return Err(Error::DuplicateShare(record.name.clone()));
        }

        self.file.write(&smbconf::append_share(&text, record))?;
        tracing::info!("Added share [{}] for {}", record.name, record.path);

        self.reload
            .reload()
            .map_err(|source| Error::ReloadFailed {
                stage: "add share",
                source,
            })
    }

    /// Deletes the block for `name` and reloads the service.
    ///
    /// The original text is backed up first; if the reload fails it is
    /// written back and the service reloaded again.
    pub fn remove_share(&self, name: &str) -> Result<RemovedShare> {
        let _guard = self.file.lock()?;
        let text = self.file.read()?;
        let lines = smbconf::split_lines(&text);
        let Some(span) = smbconf::locate_share(&lines, name) else {
            return Err(Error::NotFound(name.to_string()));
        };

        tracing::debug!(
            "Share [{}] spans lines {}..={}",
            name,
            span.start + 1,
            span.end + 1
        );
        if span.path.is_none() {
            tracing::warn!("Share [{}] has no path line", name);
        }

        self.file.save_backup(&text)?;
        let backup = ConfigBackup(text.clone());
        self.file.write(&smbconf::remove_span(&lines, &span))?;

        if let Err(source) = self.reload.reload() {
            tracing::error!("Reload after removing [{}] failed, restoring backup: {}", name, source);
            self.file.write(backup.as_str())?;
            if let Err(e) = self.reload.reload() {
                tracing::error!("Reload after restoring backup failed: {}", e);
            }
            return Err(Error::ReloadFailed {
                stage: "remove share",
                source,
            });
        }

        tracing::info!("Removed share [{}]", name);
        Ok(RemovedShare {
            name: name.to_string(),
            path: span.path,
            backup,
        })
    }

    /// Writes `backup` back verbatim and reloads the service.
    pub fn restore(&self, backup: &ConfigBackup) -> Result<()> {
        let _guard = self.file.lock()?;
        self.file.write(backup.as_str())?;
        tracing::info!("Restored configuration from backup");
        self.reload
            .reload()
            .map_err(|source| Error::ReloadFailed {
                stage: "restore",
                source,
            })
    }
}
