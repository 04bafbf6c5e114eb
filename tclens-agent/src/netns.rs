//! Network namespace handles
//!
//! Attachments, link lookups and interface discovery all have to run inside
//! the namespace that owns the device. [`NetnsHandle::enter`] switches only
//! the calling thread and always switches it back.

use std::fs::File;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use nix::sched::{setns, CloneFlags};
use tclens::TcLensError;
use tracing::{error, trace};

const THREAD_NETNS: &str = "/proc/thread-self/ns/net";

/// An open reference to a network namespace
///
/// Holding the handle keeps the namespace alive.
#[derive(Debug)]
pub struct NetnsHandle {
    fd: OwnedFd,
    id: u32,
}

impl NetnsHandle {
    /// Open a namespace file such as `/proc/<pid>/ns/net` or `/run/netns/<name>`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TcLensError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            TcLensError::NetnsError(format!("failed to open {}: {}", path.display(), e))
        })?;
        Self::from_file(file)
    }

    /// Take ownership of an already open namespace descriptor
    pub fn from_fd(fd: OwnedFd) -> Result<Self, TcLensError> {
        Self::from_file(File::from(fd))
    }

    /// Duplicate a borrowed namespace descriptor
    pub fn try_clone_borrowed(fd: BorrowedFd<'_>) -> Result<Self, TcLensError> {
        let owned = fd
            .try_clone_to_owned()
            .map_err(|e| TcLensError::NetnsError(format!("failed to dup netns fd: {}", e)))?;
        Self::from_fd(owned)
    }

    fn from_file(file: File) -> Result<Self, TcLensError> {
        let metadata = file
            .metadata()
            .map_err(|e| TcLensError::NetnsError(format!("failed to stat netns: {}", e)))?;
        // nsfs inode numbers are 32-bit, the same value the kernel reports as the netns inum
        let id = metadata.ino() as u32;
        Ok(Self {
            fd: file.into(),
            id,
        })
    }

    /// Namespace id (inode of the nsfs file)
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Run `f` with the calling thread switched into this namespace.
    ///
    /// The thread is always switched back before returning. If the switch
    /// back fails the process logs the error and aborts: the thread would
    /// otherwise keep running in a foreign namespace.
    pub fn enter<F, R>(&self, f: F) -> Result<R, TcLensError>
    where
        F: FnOnce() -> R,
    {
        let original = File::open(THREAD_NETNS).map_err(|e| {
            TcLensError::NetnsError(format!("failed to open current netns: {}", e))
        })?;

        setns(&self.fd, CloneFlags::CLONE_NEWNET).map_err(|e| {
            TcLensError::NetnsError(format!("failed to enter netns {}: {}", self.id, e))
        })?;
        trace!(netns = self.id, "entered network namespace");

        let result = f();

        if let Err(e) = setns(&original, CloneFlags::CLONE_NEWNET) {
            error!(netns = self.id, error = %e, "failed to restore network namespace");
            std::process::abort();
        }
        trace!(netns = self.id, "restored network namespace");

        Ok(result)
    }
}

impl AsFd for NetnsHandle {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}
