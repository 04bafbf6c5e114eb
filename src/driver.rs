//! Attachment driver seam
//!
//! The registry never talks to the kernel directly. A driver clones a program
//! template onto a device, answers liveness and link queries for the handle
//! it returned, and detaches it again. The registry stays backend-agnostic;
//! the aya backend lives in `tclens-agent`.

use std::os::fd::BorrowedFd;

use crate::catalog::{AttachMode, ProgramTemplate};
use crate::device::NetDevice;
use crate::error::AttachError;

/// A global constant patched into a program instance before load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantEditor {
    pub name: &'static str,
    pub value: u64,
}

/// Static parameters an attachment was created with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachParams {
    /// Classifier priority
    pub priority: u16,
    /// Classifier filter handle (minor number)
    pub filter_handle: u32,
    /// Namespace fd number at time of attach (informational only)
    pub netns_fd: i32,
    pub mode: AttachMode,
}

/// Everything a driver needs to clone one template onto one device
pub struct AttachRequest<'a> {
    /// Attachment uid, unique per program key
    pub uid: &'a str,
    pub template: &'a ProgramTemplate,
    pub device: &'a NetDevice,
    /// Handle of the device's network namespace; not closed by the driver
    pub netns: BorrowedFd<'a>,
    pub constants: &'a [ConstantEditor],
    pub params: AttachParams,
}

/// Live view of the link a program is attached to
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LinkInfo {
    pub name: String,
    pub hardware_addr: Vec<u8>,
}

impl LinkInfo {
    pub fn has_hardware_addr(&self) -> bool {
        !self.hardware_addr.is_empty()
    }
}

/// Kernel-side clone/attach/detach of TC programs
pub trait AttachmentDriver: Send + Sync {
    /// Driver-specific handle for one attached instance
    type Handle: Send + Sync;

    /// Clone `request.template` and attach it to `request.device`.
    ///
    /// Must return [`AttachError::LinkNotFound`] when the device cannot be
    /// resolved at all, so that callers can stop trying other templates.
    fn clone_attach(&self, request: &AttachRequest<'_>) -> Result<Self::Handle, AttachError>;

    /// Whether the hook behind `handle` is still installed
    fn is_active(&self, handle: &Self::Handle) -> bool;

    /// Resolve the current state of the link the handle is attached to
    fn resolve_link(&self, handle: &Self::Handle) -> Result<LinkInfo, AttachError>;

    /// Detach and release the instance
    fn detach(&self, handle: Self::Handle) -> Result<(), AttachError>;
}
