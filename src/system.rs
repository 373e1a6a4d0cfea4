//! External collaborators: the mount/unmount primitives, directory
//! operations, read-ahead tuning and the SMB service reload.
//!
//! Production implementations shell out the same way an operator would;
//! the traits let the lifecycle controller run against fakes in tests.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use crate::error::CommandFailure;

/// `umount` exit status meaning the target was not mounted.
const UMOUNT_NOT_MOUNTED: i32 = 32;

const MOUNTINFO: &str = "/proc/self/mountinfo";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmountStatus {
    Unmounted,
    NotMounted,
}

pub trait MountHost {
    /// Runs a complete mount command line.
    fn mount(&self, invocation: &str) -> Result<(), CommandFailure>;

    fn unmount(&self, path: &Path) -> Result<UnmountStatus, CommandFailure>;

    /// Best-effort read-ahead tuning for the filesystem mounted at `path`.
    fn set_read_ahead(&self, path: &Path, size_kib: u32) -> io::Result<()>;

    fn exists(&self, path: &Path) -> bool;

    fn create_dir(&self, path: &Path) -> io::Result<()>;

    /// Removes an empty directory; never recursive.
    fn remove_dir(&self, path: &Path) -> io::Result<()>;

    fn is_mount_point(&self, path: &Path) -> io::Result<bool>;
}

pub trait ServiceReload {
    fn reload(&self) -> Result<(), CommandFailure>;
}

fn run(program: &str, command: &mut Command) -> Result<Output, CommandFailure> {
    tracing::debug!("Running {:?}", command);
    command
        .output()
        .map_err(|e| CommandFailure::new(program, None, e.to_string()))
}

fn check(program: &str, output: Output) -> Result<(), CommandFailure> {
    if output.status.success() {
        Ok(())
    } else {
        Err(CommandFailure::new(
            program,
            output.status.code(),
            String::from_utf8_lossy(&output.stderr),
        ))
    }
}

/// The real machine.
#[derive(Debug, Default, Clone)]
pub struct HostSystem;

impl MountHost for HostSystem {
    fn mount(&self, invocation: &str) -> Result<(), CommandFailure> {
        let output = run("sh", Command::new("sh").arg("-c").arg(invocation))?;
        check(invocation, output)
    }

    fn unmount(&self, path: &Path) -> Result<UnmountStatus, CommandFailure> {
        let output = run("umount", Command::new("umount").arg(path))?;
        match output.status.code() {
            Some(0) => Ok(UnmountStatus::Unmounted),
            Some(UMOUNT_NOT_MOUNTED) => {
                tracing::debug!(
                    "umount reports {} is not mounted: {}",
                    path.display(),
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                Ok(UnmountStatus::NotMounted)
            }
            _ => check("umount", output).map(|()| UnmountStatus::Unmounted),
        }
    }

    fn set_read_ahead(&self, path: &Path, size_kib: u32) -> io::Result<()> {
        let mounts = parse_mountinfo(&fs::read_to_string(MOUNTINFO)?);
        let entry = mounts
            .iter()
            .rev()
            .find(|m| m.mount_point == path)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{} not found in {}", path.display(), MOUNTINFO),
                )
            })?;

        let knob = bdi_read_ahead_path(&entry.device);
        fs::write(&knob, size_kib.to_string())?;
        tracing::debug!("Set {} to {} KiB", knob.display(), size_kib);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    // Leaf only; unmount removes nothing above it.
    fn create_dir(&self, path: &Path) -> io::Result<()> {
        fs::create_dir(path)
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir(path)
    }

    fn is_mount_point(&self, path: &Path) -> io::Result<bool> {
        let mounts = parse_mountinfo(&fs::read_to_string(MOUNTINFO)?);
        Ok(mounts.iter().any(|m| m.mount_point == path))
    }
}

/// Reloads the SMB daemon with a configured command line.
#[derive(Debug, Clone)]
pub struct CommandReload {
    argv: Vec<String>,
}

impl CommandReload {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }
}

impl ServiceReload for CommandReload {
    fn reload(&self) -> Result<(), CommandFailure> {
        let Some((program, args)) = self.argv.split_first() else {
            return Err(CommandFailure::new("reload", None, "no reload command configured"));
        };
        let output = run(program, Command::new(program).args(args))?;
        check(program, output)?;
        tracing::debug!("Reloaded SMB service via {}", self.argv.join(" "));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// `major:minor` of the backing device.
    pub device: String,
    pub mount_point: PathBuf,
}

pub fn parse_mountinfo(contents: &str) -> Vec<MountEntry> {
    contents
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.nth(2)?;
            let mount_point = fields.nth(1)?;
            Some(MountEntry {
                device: device.to_string(),
                mount_point: PathBuf::from(decode_mount_escape(mount_point)),
            })
        })
        .collect()
}

/// Undoes the `\ooo` octal escaping the kernel applies to spaces, tabs,
/// newlines and backslashes in mountinfo.
fn decode_mount_escape(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let value = digits.iter().fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
                if let Ok(value) = u8::try_from(value) {
                    out.push(value);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

pub fn bdi_read_ahead_path(device: &str) -> PathBuf {
    Path::new("/sys/class/bdi").join(device).join("read_ahead_kb")
}
