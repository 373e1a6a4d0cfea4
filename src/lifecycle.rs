//! Mount, export and unexport of NFS shares as one logical operation.
//!
//! Mounting is strict: it never reuses an existing directory or mount and
//! undoes its own steps when a later one fails. Unmounting is lenient: a
//! share that is already gone, or a path that is no longer mounted, counts as
//! success, because callers often unmount defensively.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::Rng;

use crate::error::{Error, Result, Rollback};
use crate::lock::FileLock;
use crate::smbconf::{ShareEntry, ShareRecord};
use crate::store::{ConfigStore, RemovedShare, ShareFile};
use crate::system::{MountHost, ServiceReload, UnmountStatus};

/// Prefix of generated mount directories and share names.
pub const GENERATED_PREFIX: &str = "nfsv3share-";

/// Read-ahead applied to every mounted share.
pub const READ_AHEAD_KIB: u32 = 16 * 1024;

const NFS_OPTIONS: &str = "nolock,vers=3,proto=tcp";

/// Exclusive upper bound of generated suffixes.
const SUFFIX_RANGE: u32 = 32768;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountSpec {
    /// `host:/account/container`; the mount command is synthesized.
    RemoteHost { export: String },
    /// A complete mount command line whose last word is the mount path.
    Command { invocation: String },
}

impl MountSpec {
    pub fn from_account(host: &str, account: &str, container: &str) -> Self {
        MountSpec::RemoteHost {
            export: format!("{}:/{}/{}", host, account, container),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnmountOutcome {
    Unmounted { path: PathBuf },
    /// No block named the share; nothing to do.
    NotFound,
    /// The block was removed but declared no path.
    NoBackingPath,
    /// The block was removed; its path was no longer mounted.
    AlreadyUnmounted { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MountPlan {
    invocation: String,
    path: PathBuf,
    share: String,
}

/// `/mnt/foo/bar` becomes `mnt-foo-bar`.
pub fn share_name_for_path(path: &Path) -> String {
    let path = path.to_string_lossy();
    path.trim_start_matches('/').replace('/', "-")
}

pub fn validate_share_name(name: &str) -> Result<()> {
    let bad = name.trim().is_empty()
        || name.trim() != name
        || name.contains(['[', ']', '/', '\n', '\r']);
    if bad {
        return Err(Error::InvalidShareName(name.to_string()));
    }
    Ok(())
}

/// The mount path is the last word of the command line.
pub fn mount_path_from_invocation(invocation: &str) -> Result<PathBuf> {
    let last = invocation
        .split_whitespace()
        .last()
        .ok_or_else(|| Error::InvalidMountSpec("empty mount command".to_string()))?;

    if !last.starts_with('/') {
        return Err(Error::InvalidMountSpec(format!(
            "mount path '{}' is not absolute",
            last
        )));
    }
    let trimmed = last.trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(Error::InvalidMountSpec(
            "cannot mount over the root directory".to_string(),
        ));
    }
    Ok(PathBuf::from(trimmed))
}

pub struct ShareLifecycle<H, F, R> {
    host: H,
    store: ConfigStore<F, R>,
    scratch_root: PathBuf,
    lock: Option<(PathBuf, Duration)>,
    suffix: Box<dyn Fn() -> u32>,
}

impl<H, F, R> ShareLifecycle<H, F, R>
where
    H: MountHost,
    F: ShareFile,
    R: ServiceReload,
{
    pub fn new(host: H, store: ConfigStore<F, R>, scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            host,
            store,
            scratch_root: scratch_root.into(),
            lock: None,
            suffix: Box::new(|| rand::thread_rng().gen_range(0..SUFFIX_RANGE)),
        }
    }

    /// Serialize operations across processes through `path`.
    pub fn with_lock(mut self, path: impl Into<PathBuf>, timeout: Duration) -> Self {
        self.lock = Some((path.into(), timeout));
        self
    }

    pub fn with_suffix_source(mut self, suffix: impl Fn() -> u32 + 'static) -> Self {
        self.suffix = Box::new(suffix);
        self
    }

    pub fn store(&self) -> &ConfigStore<F, R> {
        &self.store
    }

    pub fn list(&self) -> Result<Vec<ShareEntry>> {
        self.store.list_shares()
    }

    fn acquire_lock(&self) -> Result<Option<FileLock>> {
        self.lock
            .as_ref()
            .map(|(path, timeout)| FileLock::acquire(path, *timeout))
            .transpose()
    }

    fn create_mount_dir(&self, path: &Path) -> Result<()> {
        self.host
            .create_dir(path)
            .map_err(|e| Error::io(format!("creating mount directory {}", path.display()), e))
    }

    fn discard_mount_dir(&self, path: &Path) {
        if !self.host.exists(path) {
            return;
        }
        match self.host.remove_dir(path) {
            Ok(()) => tracing::debug!("Removed {}", path.display()),
            Err(e) => tracing::warn!("Could not remove {}: {}", path.display(), e),
        }
    }

    /// Draws suffixes until one names a directory that does not exist yet.
    /// Gives up after as many draws as there are suffixes.
    fn free_generated_path(&self) -> Result<(u32, PathBuf)> {
        for _ in 0..SUFFIX_RANGE {
            let suffix = (self.suffix)();
            let path = self
                .scratch_root
                .join(format!("{}{}", GENERATED_PREFIX, suffix));
            if !self.host.exists(&path) {
                return Ok((suffix, path));
            }
            tracing::debug!("{} exists, drawing another suffix", path.display());
        }
        Err(Error::io(
            format!(
                "no free {}N directory under {}",
                GENERATED_PREFIX,
                self.scratch_root.display()
            ),
            io::Error::from(io::ErrorKind::AlreadyExists),
        ))
    }

    /// Picks the mount path, creates it and names the share.
    fn plan(&self, spec: &MountSpec, name: Option<&str>) -> Result<MountPlan> {
        match spec {
            MountSpec::Command { invocation } => {
                let path = mount_path_from_invocation(invocation)?;
                if self.host.exists(&path) {
                    return Err(Error::PathAlreadyInUse(path));
                }
                let share = match name {
                    Some(name) => name.to_string(),
                    None => share_name_for_path(&path),
                };
                validate_share_name(&share)?;
                self.create_mount_dir(&path)?;
                Ok(MountPlan {
                    invocation: invocation.trim().to_string(),
                    path,
                    share,
                })
            }
            MountSpec::RemoteHost { export } => {
                let export = export.trim();
                if export.is_empty() || export.contains(char::is_whitespace) {
                    return Err(Error::InvalidMountSpec(format!(
                        "bad remote export '{}'",
                        export
                    )));
                }
                let (suffix, path) = self.free_generated_path()?;
                let share = match name {
                    Some(name) => name.to_string(),
                    None => format!("{}{}", GENERATED_PREFIX, suffix),
                };
                self.create_mount_dir(&path)?;
                Ok(MountPlan {
                    invocation: format!(
                        "mount -t nfs -o {} {} {}",
                        NFS_OPTIONS,
                        export,
                        path.display()
                    ),
                    path,
                    share,
                })
            }
        }
    }

    /// Mounts the share, exports it over SMB and returns the share name.
    pub fn mount(&self, spec: &MountSpec, name: Option<&str>) -> Result<String> {
        let _lock = self.acquire_lock()?;
        if let Some(name) = name {
            validate_share_name(name)?;
        }

        let plan = self.plan(spec, name)?;
        tracing::info!(
            "Mounting share '{}' at {}",
            plan.share,
            plan.path.display()
        );

        let mounted = self.host.is_mount_point(&plan.path).map_err(|e| {
            Error::io(format!("checking mount state of {}", plan.path.display()), e)
        });
        match mounted {
            Ok(false) => {}
            Ok(true) => {
                self.discard_mount_dir(&plan.path);
                return Err(Error::AlreadyMounted(plan.path));
            }
            Err(e) => {
                self.discard_mount_dir(&plan.path);
                return Err(e);
            }
        }

        if let Err(source) = self.host.mount(&plan.invocation) {
            self.discard_mount_dir(&plan.path);
            return Err(Error::MountFailed {
                path: plan.path,
                source,
            });
        }
        tracing::info!("Mounted {}", plan.path.display());

        if let Err(e) = self.host.set_read_ahead(&plan.path, READ_AHEAD_KIB) {
            tracing::warn!(
                "Could not set read-ahead for {} to {} KiB: {}",
                plan.path.display(),
                READ_AHEAD_KIB,
                e
            );
        }

        let record = ShareRecord::new(plan.share.clone(), plan.path.to_string_lossy());
        if let Err(e) = self.store.add_share(&record) {
            tracing::error!("Exporting '{}' failed, rolling back: {}", plan.share, e);
            let rollback = self.roll_back_mount(&plan, &e);
            return Err(Error::ExportFailed {
                share: plan.share,
                path: plan.path,
                rollback,
                source: Box::new(e),
            });
        }

        tracing::info!("Share '{}' exported", plan.share);
        Ok(plan.share)
    }

    fn roll_back_mount(&self, plan: &MountPlan, cause: &Error) -> Rollback {
        let mut rollback = Rollback::default();
        if matches!(cause, Error::ReloadFailed { .. }) {
            // The block was written; take it out again so it does not
            // outlive the mount.
            if let Err(e) = self.store.remove_share(&plan.share) {
                tracing::error!("Could not remove block for '{}': {}", plan.share, e);
                rollback.note(format!("share block '{}' left in place: {}", plan.share, e));
            }
        }
        match self.host.unmount(&plan.path) {
            Ok(_) => self.discard_mount_dir(&plan.path),
            Err(e) => {
                tracing::error!(
                    "Rollback unmount of {} failed, leaving it mounted: {}",
                    plan.path.display(),
                    e
                );
                rollback.note(format!("{} still mounted: {}", plan.path.display(), e));
            }
        }
        rollback
    }

    /// Removes the SMB export and unmounts its backing path.
    pub fn unmount(&self, share: &str) -> Result<UnmountOutcome> {
        let _lock = self.acquire_lock()?;

        let removed = match self.store.remove_share(share) {
            Ok(removed) => removed,
            Err(Error::NotFound(_)) => {
                tracing::info!("Share '{}' is not configured, nothing to unmount", share);
                return Ok(UnmountOutcome::NotFound);
            }
            Err(e) => return Err(e),
        };

        let Some(path) = removed.path.as_deref() else {
            tracing::warn!(
                "Share '{}' had no path; removed the block without unmounting",
                share
            );
            return Ok(UnmountOutcome::NoBackingPath);
        };
        let mount_path = PathBuf::from(path);

        match self.host.is_mount_point(&mount_path) {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!("{} is not mounted", mount_path.display());
                self.discard_mount_dir(&mount_path);
                return Ok(UnmountOutcome::AlreadyUnmounted { path: mount_path });
            }
            Err(e) => {
                let rollback = self.restore_after_failure(&removed);
                return Err(Error::io(
                    format!(
                        "checking mount state of {} ({})",
                        mount_path.display(),
                        rollback
                    ),
                    e,
                ));
            }
        }

        match self.host.unmount(&mount_path) {
            Ok(UnmountStatus::Unmounted) => tracing::info!("Unmounted {}", mount_path.display()),
            Ok(UnmountStatus::NotMounted) => {
                tracing::info!("{} was already unmounted", mount_path.display())
            }
            Err(source) => {
                let rollback = self.restore_after_failure(&removed);
                return Err(Error::UnmountFailed {
                    share: share.to_string(),
                    path: path.to_string(),
                    rollback,
                    source,
                });
            }
        }

        self.discard_mount_dir(&mount_path);
        Ok(UnmountOutcome::Unmounted { path: mount_path })
    }

    fn restore_after_failure(&self, removed: &RemovedShare) -> Rollback {
        let mut rollback = Rollback::default();
        match self.store.restore(&removed.backup) {
            Ok(()) => {}
            Err(e @ Error::ReloadFailed { .. }) => {
                tracing::error!("Restored '{}' but reload failed: {}", removed.name, e);
                rollback.note(format!("configuration restored but not reloaded: {}", e));
            }
            Err(e) => {
                tracing::error!(
                    "Restoring configuration for '{}' failed: {}",
                    removed.name,
                    e
                );
                rollback.note(format!(
                    "share block '{}' not restored: {}",
                    removed.name, e
                ));
            }
        }
        rollback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CommandFailure;
    use crate::store::tests::{FakeReload, BASE_CONF};
    use crate::store::MemoryShareFile;
    use std::collections::{HashSet, VecDeque};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default)]
    struct HostState {
        dirs: HashSet<PathBuf>,
        mounts: HashSet<PathBuf>,
        invocations: Vec<String>,
        read_ahead: Vec<(PathBuf, u32)>,
        fail_mount: bool,
        fail_unmount: bool,
        fail_read_ahead: bool,
    }

    /// Directories and mounts tracked in memory.
    #[derive(Debug, Clone, Default)]
    struct FakeHost(Arc<Mutex<HostState>>);

    impl FakeHost {
        fn state(&self) -> std::sync::MutexGuard<'_, HostState> {
            self.0.lock().unwrap()
        }
    }

    impl MountHost for FakeHost {
        fn mount(&self, invocation: &str) -> std::result::Result<(), CommandFailure> {
            let mut state = self.state();
            state.invocations.push(invocation.to_string());
            if state.fail_mount {
                return Err(CommandFailure::new("mount", Some(32), "access denied by server"));
            }
            let target = invocation.split_whitespace().last().unwrap();
            state.mounts.insert(PathBuf::from(target));
            Ok(())
        }

        fn unmount(&self, path: &Path) -> std::result::Result<UnmountStatus, CommandFailure> {
            let mut state = self.state();
            if state.fail_unmount {
                return Err(CommandFailure::new("umount", Some(16), "target is busy"));
            }
            if state.mounts.remove(path) {
                Ok(UnmountStatus::Unmounted)
            } else {
                Ok(UnmountStatus::NotMounted)
            }
        }

        fn set_read_ahead(&self, path: &Path, size_kib: u32) -> io::Result<()> {
            let mut state = self.state();
            if state.fail_read_ahead {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only sysfs"));
            }
            state.read_ahead.push((path.to_path_buf(), size_kib));
            Ok(())
        }

        fn exists(&self, path: &Path) -> bool {
            self.state().dirs.contains(path)
        }

        fn create_dir(&self, path: &Path) -> io::Result<()> {
            self.state().dirs.insert(path.to_path_buf());
            Ok(())
        }

        fn remove_dir(&self, path: &Path) -> io::Result<()> {
            let mut state = self.state();
            if state.mounts.contains(path) {
                return Err(io::Error::new(io::ErrorKind::Other, "busy"));
            }
            if state.dirs.remove(path) {
                Ok(())
            } else {
                Err(io::Error::from(io::ErrorKind::NotFound))
            }
        }

        fn is_mount_point(&self, path: &Path) -> io::Result<bool> {
            Ok(self.state().mounts.contains(path))
        }
    }

    struct Fixture {
        host: FakeHost,
        file: MemoryShareFile,
        reload: FakeReload,
        lifecycle: ShareLifecycle<FakeHost, MemoryShareFile, FakeReload>,
    }

    fn fixture(suffixes: &[u32]) -> Fixture {
        let host = FakeHost::default();
        let file = MemoryShareFile::new(BASE_CONF);
        let reload = FakeReload::default();
        let queue = Arc::new(Mutex::new(suffixes.iter().copied().collect::<VecDeque<_>>()));
        let lifecycle = ShareLifecycle::new(
            host.clone(),
            ConfigStore::new(file.clone(), reload.clone()),
            "/mnt",
        )
        .with_suffix_source(move || queue.lock().unwrap().pop_front().unwrap_or(0));
        Fixture {
            host,
            file,
            reload,
            lifecycle,
        }
    }

    fn remote() -> MountSpec {
        MountSpec::RemoteHost {
            export: "host:/acct/container".into(),
        }
    }

    #[test]
    fn test_share_name_for_path() {
        assert_eq!(share_name_for_path(Path::new("/mnt/data")), "mnt-data");
        assert_eq!(share_name_for_path(Path::new("/mnt/foo/bar")), "mnt-foo-bar");
    }

    #[test]
    fn test_mount_path_from_invocation() {
        assert_eq!(
            mount_path_from_invocation("mount -t nfs host:/a/b /mnt/foo/bar/").unwrap(),
            PathBuf::from("/mnt/foo/bar")
        );
        assert!(matches!(
            mount_path_from_invocation("mount -t nfs host:/a/b mnt/foo"),
            Err(Error::InvalidMountSpec(_))
        ));
        assert!(matches!(
            mount_path_from_invocation("   "),
            Err(Error::InvalidMountSpec(_))
        ));
        assert!(matches!(
            mount_path_from_invocation("mount host:/a /"),
            Err(Error::InvalidMountSpec(_))
        ));
    }

    #[test]
    fn test_validate_share_name() {
        assert!(validate_share_name("media").is_ok());
        for bad in ["", " x", "a]b", "a/b", "a\nb"] {
            assert!(validate_share_name(bad).is_err(), "{:?}", bad);
        }
    }

    #[test]
    fn test_from_account() {
        assert_eq!(
            MountSpec::from_account("host", "acct", "container"),
            remote()
        );
    }

    #[test]
    fn test_remote_mount_synthesizes_command_and_block() {
        let fx = fixture(&[42]);
        let share = fx.lifecycle.mount(&remote(), None).unwrap();
        assert_eq!(share, "nfsv3share-42");

        let state = fx.host.state();
        assert_eq!(
            state.invocations,
            vec!["mount -t nfs -o nolock,vers=3,proto=tcp host:/acct/container /mnt/nfsv3share-42"]
        );
        assert_eq!(
            state.read_ahead,
            vec![(PathBuf::from("/mnt/nfsv3share-42"), 16384)]
        );

        let contents = fx.file.contents();
        let added = contents.strip_prefix(BASE_CONF).unwrap();
        assert_eq!(added.lines().count(), 6);
        assert!(added.starts_with("[nfsv3share-42]\n"));
        assert!(added.contains("path = /mnt/nfsv3share-42\n"));
        assert_eq!(fx.reload.calls(), 1);
    }

    #[test]
    fn test_remote_mount_redraws_taken_suffix() {
        let fx = fixture(&[7, 7, 9]);
        fx.host.state().dirs.insert(PathBuf::from("/mnt/nfsv3share-7"));
        let share = fx.lifecycle.mount(&remote(), None).unwrap();
        assert_eq!(share, "nfsv3share-9");
        assert!(fx.host.state().mounts.contains(Path::new("/mnt/nfsv3share-9")));
    }

    #[test]
    fn test_command_mount_derives_name_from_path() {
        let fx = fixture(&[]);
        let spec = MountSpec::Command {
            invocation: "mount -t nfs -o vers=3 host:/a/b /mnt/foo/bar".into(),
        };
        let share = fx.lifecycle.mount(&spec, None).unwrap();
        assert_eq!(share, "mnt-foo-bar");
        assert!(fx.file.contents().contains("[mnt-foo-bar]\n"));
        assert_eq!(
            fx.host.state().invocations,
            vec!["mount -t nfs -o vers=3 host:/a/b /mnt/foo/bar"]
        );
    }

    #[test]
    fn test_explicit_name_wins() {
        let fx = fixture(&[3]);
        let share = fx.lifecycle.mount(&remote(), Some("media")).unwrap();
        assert_eq!(share, "media");
        assert!(fx
            .file
            .contents()
            .contains("[media]\ncomment = NFSv3 share re-exported over SMB\npath = /mnt/nfsv3share-3\n"));
    }

    #[test]
    fn test_command_mount_refuses_existing_path() {
        let fx = fixture(&[]);
        fx.host.state().dirs.insert(PathBuf::from("/mnt/foo"));
        let spec = MountSpec::Command {
            invocation: "mount host:/a /mnt/foo".into(),
        };
        assert!(matches!(
            fx.lifecycle.mount(&spec, None),
            Err(Error::PathAlreadyInUse(_))
        ));
        assert!(fx.host.state().invocations.is_empty());
        assert_eq!(fx.file.contents(), BASE_CONF);
    }

    #[test]
    fn test_command_mount_rejects_relative_path() {
        let fx = fixture(&[]);
        let spec = MountSpec::Command {
            invocation: "mount host:/a foo".into(),
        };
        assert!(matches!(
            fx.lifecycle.mount(&spec, None),
            Err(Error::InvalidMountSpec(_))
        ));
    }

    #[test]
    fn test_mount_failure_leaves_nothing_behind() {
        let fx = fixture(&[5]);
        fx.host.state().fail_mount = true;
        let err = fx.lifecycle.mount(&remote(), None).unwrap_err();
        assert!(matches!(err, Error::MountFailed { .. }));
        assert!(fx.host.state().dirs.is_empty());
        assert_eq!(fx.file.contents(), BASE_CONF);
        assert_eq!(fx.reload.calls(), 0);
    }

    #[test]
    fn test_read_ahead_failure_is_not_fatal() {
        let fx = fixture(&[5]);
        fx.host.state().fail_read_ahead = true;
        assert_eq!(fx.lifecycle.mount(&remote(), None).unwrap(), "nfsv3share-5");
    }

    #[test]
    fn test_duplicate_share_rolls_back_mount() {
        let fx = fixture(&[]);
        let spec = MountSpec::Command {
            invocation: "mount host:/a /mnt/data".into(),
        };
        let err = fx.lifecycle.mount(&spec, None).unwrap_err();
        match err {
            Error::ExportFailed { share, source, .. } => {
                assert_eq!(share, "mnt-data");
                assert!(matches!(*source, Error::DuplicateShare(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
        let state = fx.host.state();
        assert!(state.mounts.is_empty());
        assert!(state.dirs.is_empty());
        assert_eq!(fx.file.contents(), BASE_CONF);
    }

    #[test]
    fn test_reload_failure_during_export_rolls_back() {
        let fx = fixture(&[11]);
        fx.reload.failing_next(1);
        let err = fx.lifecycle.mount(&remote(), None).unwrap_err();
        match err {
            Error::ExportFailed { source, .. } => {
                assert!(matches!(*source, Error::ReloadFailed { .. }))
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(fx.file.contents(), BASE_CONF);
        assert!(fx.host.state().mounts.is_empty());
        assert!(fx.host.state().dirs.is_empty());
    }

    #[test]
    fn test_mount_then_unmount_round_trip() {
        let fx = fixture(&[21]);
        let share = fx.lifecycle.mount(&remote(), None).unwrap();
        let outcome = fx.lifecycle.unmount(&share).unwrap();
        assert_eq!(
            outcome,
            UnmountOutcome::Unmounted {
                path: PathBuf::from("/mnt/nfsv3share-21")
            }
        );
        assert_eq!(fx.file.contents(), BASE_CONF);
        let state = fx.host.state();
        assert!(state.mounts.is_empty());
        assert!(state.dirs.is_empty());
    }

    #[test]
    fn test_command_round_trip() {
        let fx = fixture(&[]);
        let spec = MountSpec::Command {
            invocation: "mount -t nfs -o vers=3 host:/a/b /mnt/foo/bar".into(),
        };
        let share = fx.lifecycle.mount(&spec, None).unwrap();
        fx.lifecycle.unmount(&share).unwrap();
        assert_eq!(fx.file.contents(), BASE_CONF);
        assert!(fx.host.state().dirs.is_empty());
    }

    #[test]
    fn test_unmount_unknown_share_is_ok() {
        let fx = fixture(&[]);
        assert_eq!(
            fx.lifecycle.unmount("ghost").unwrap(),
            UnmountOutcome::NotFound
        );
        assert_eq!(fx.file.contents(), BASE_CONF);
    }

    #[test]
    fn test_unmount_when_not_mounted_is_ok() {
        let fx = fixture(&[]);
        fx.host.state().dirs.insert(PathBuf::from("/mnt/data"));
        let outcome = fx.lifecycle.unmount("mnt-data").unwrap();
        assert_eq!(
            outcome,
            UnmountOutcome::AlreadyUnmounted {
                path: PathBuf::from("/mnt/data")
            }
        );
        assert!(!fx.file.contents().contains("[mnt-data]"));
        assert!(fx.host.state().dirs.is_empty());
    }

    #[test]
    fn test_unmount_without_path_is_ok() {
        let host = FakeHost::default();
        let file = MemoryShareFile::new("[global]\n[bare]\ncomment = x\n");
        let lifecycle = ShareLifecycle::new(
            host,
            ConfigStore::new(file.clone(), FakeReload::default()),
            "/mnt",
        );
        assert_eq!(
            lifecycle.unmount("bare").unwrap(),
            UnmountOutcome::NoBackingPath
        );
        assert_eq!(file.contents(), "[global]\n");
    }

    #[test]
    fn test_unmount_failure_restores_config() {
        let fx = fixture(&[]);
        {
            let mut state = fx.host.state();
            state.dirs.insert(PathBuf::from("/mnt/data"));
            state.mounts.insert(PathBuf::from("/mnt/data"));
            state.fail_unmount = true;
        }
        let err = fx.lifecycle.unmount("mnt-data").unwrap_err();
        match err {
            Error::UnmountFailed {
                ref share,
                ref rollback,
                ..
            } => {
                assert_eq!(share, "mnt-data");
                assert!(rollback.is_complete());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(fx.file.contents(), BASE_CONF);
        assert!(fx.host.state().mounts.contains(Path::new("/mnt/data")));
        // removal reload, then reload of the restored file
        assert_eq!(fx.reload.calls(), 2);
    }

    #[test]
    fn test_lock_file_is_used() {
        let temp = tempfile::TempDir::new().unwrap();
        let lock_path = temp.path().join("bridge.lock");
        let fx = fixture(&[1]);
        let lifecycle = fx
            .lifecycle
            .with_lock(&lock_path, Duration::from_millis(100));

        let _held = FileLock::acquire(&lock_path, Duration::from_millis(100)).unwrap();
        assert!(matches!(
            lifecycle.mount(&remote(), None),
            Err(Error::Lock(_))
        ));
        assert!(fx.host.state().invocations.is_empty());
    }

    #[test]
    fn test_unmount_failure_reports_unrestored_config() {
        let fx = fixture(&[]);
        {
            let mut state = fx.host.state();
            state.dirs.insert(PathBuf::from("/mnt/data"));
            state.mounts.insert(PathBuf::from("/mnt/data"));
            state.fail_unmount = true;
        }
        // the removal goes through, the restore write does not
        fx.file.fail_writes_after(1);

        let err = fx.lifecycle.unmount("mnt-data").unwrap_err();
        let message = err.to_string();
        match err {
            Error::UnmountFailed { rollback, .. } => {
                assert!(!rollback.is_complete());
                assert!(rollback.problems[0].contains("'mnt-data' not restored"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(message.contains("rollback incomplete"));
        assert!(!fx.file.contents().contains("[mnt-data]"));
        assert_eq!(fx.reload.calls(), 1);
    }

    #[test]
    fn test_export_rollback_reports_stuck_mount() {
        let fx = fixture(&[]);
        fx.host.state().fail_unmount = true;
        let spec = MountSpec::Command {
            invocation: "mount host:/a /mnt/data".into(),
        };
        match fx.lifecycle.mount(&spec, None).unwrap_err() {
            Error::ExportFailed { rollback, source, .. } => {
                assert!(matches!(*source, Error::DuplicateShare(_)));
                assert_eq!(rollback.problems.len(), 1);
                assert!(rollback.problems[0].starts_with("/mnt/data still mounted"));
            }
            other => panic!("unexpected error: {other}"),
        }
        let state = fx.host.state();
        assert!(state.mounts.contains(Path::new("/mnt/data")));
        assert!(state.dirs.contains(Path::new("/mnt/data")));
    }

    #[test]
    fn test_export_rollback_reports_leftover_block() {
        let fx = fixture(&[11]);
        // add reload, removal reload, reload of the restored backup
        fx.reload.failing_next(3);
        match fx.lifecycle.mount(&remote(), None).unwrap_err() {
            Error::ExportFailed { rollback, .. } => {
                assert_eq!(rollback.problems.len(), 1);
                assert!(rollback.problems[0].starts_with("share block 'nfsv3share-11' left in place"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(fx.file.contents().contains("[nfsv3share-11]\n"));
        assert!(fx.host.state().mounts.is_empty());
    }

    #[test]
    fn test_suffix_search_gives_up_when_all_taken() {
        let fx = fixture(&[]);
        fx.host.state().dirs.insert(PathBuf::from("/mnt/nfsv3share-0"));
        match fx.lifecycle.mount(&remote(), None).unwrap_err() {
            Error::Io { source, .. } => assert_eq!(source.kind(), io::ErrorKind::AlreadyExists),
            other => panic!("unexpected error: {other}"),
        }
        assert!(fx.host.state().invocations.is_empty());
        assert_eq!(fx.file.contents(), BASE_CONF);
    }
}
