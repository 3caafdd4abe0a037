//! Filesystem access used by the reconciler.
//!
//! Everything the reconciler does to disk goes through [`PolicyFs`], so the
//! whole correction algorithm can be exercised against [`MemoryFs`] in tests
//! (foreign owners, inspection failures) without root privileges.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::{MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

/// Kind of a filesystem entry, as seen without following symlinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
    /// Sockets, fifos, device nodes. Treated like files for mode purposes.
    Other,
}

/// Ownership and mode snapshot of one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryStat {
    pub kind: EntryKind,
    pub uid: u32,
    pub gid: u32,
    /// Permission bits including setuid/setgid/sticky (`0o7777`).
    pub mode: u32,
}

impl EntryStat {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }
}

/// Filesystem operations needed to inspect and correct entries.
pub trait PolicyFs: Send + Sync + fmt::Debug {
    /// Inspect an entry without following symlinks.
    fn stat(&self, path: &Path) -> io::Result<EntryStat>;

    /// Direct children of a directory, in no particular order.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    /// Change owner and group without following symlinks.
    fn chown(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()>;

    /// Set permission bits. Fails instead of following a symlink.
    fn chmod(&self, path: &Path, mode: u32) -> io::Result<()>;
}

/// The real filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostFs;

impl PolicyFs for HostFs {
    fn stat(&self, path: &Path) -> io::Result<EntryStat> {
        let meta = std::fs::symlink_metadata(path)?;
        let ft = meta.file_type();
        let kind = if ft.is_symlink() {
            EntryKind::Symlink
        } else if ft.is_dir() {
            EntryKind::Dir
        } else if ft.is_file() {
            EntryKind::File
        } else {
            EntryKind::Other
        };

        Ok(EntryStat {
            kind,
            uid: meta.uid(),
            gid: meta.gid(),
            mode: meta.mode() & 0o7777,
        })
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        std::fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect()
    }

    fn chown(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()> {
        std::os::unix::fs::lchown(path, Some(uid), Some(gid))
    }

    fn chmod(&self, path: &Path, mode: u32) -> io::Result<()> {
        // fchmod on a descriptor opened with O_NOFOLLOW: an entry swapped for
        // a symlink after inspection fails with ELOOP instead of changing the
        // link target.
        let file = open_no_follow(path)?;
        file.set_permissions(std::fs::Permissions::from_mode(mode))
    }
}

/// Open an entry for a metadata change without following a final symlink.
///
/// Read-only first; a file the process may not read (write-only mode as a
/// non-root owner) is retried write-only. Neither open truncates or blocks.
fn open_no_follow(path: &Path) -> io::Result<File> {
    let flags = libc::O_NOFOLLOW | libc::O_NONBLOCK | libc::O_NOCTTY;
    match OpenOptions::new().read(true).custom_flags(flags).open(path) {
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => OpenOptions::new()
            .write(true)
            .custom_flags(flags)
            .open(path)
            .map_err(|_| e),
        result => result,
    }
}

#[cfg(test)]
pub(crate) use memory::MemoryFs;
