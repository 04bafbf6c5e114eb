//! Driver-agnostic attach and sweep passes run by the agent loop

use std::collections::HashMap;
use std::os::fd::BorrowedFd;

use tclens::{AgentConfig, AttachmentDriver, FeatureFlags, NetDevice, ProbeRegistry, SetupError};
use tracing::{debug, warn};

/// Outcome of one attach pass over a namespace
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttachSummary {
    /// Devices with every selected template attached
    pub ready: usize,
    /// Devices where some templates failed and will be retried next pass
    pub partial: usize,
    /// Devices that vanished before they could be attached to
    pub missing: usize,
}

/// Run setup on every device, tolerating per-device failures
pub fn attach_devices<D: AttachmentDriver>(
    registry: &ProbeRegistry<D>,
    devices: &[NetDevice],
    netns: BorrowedFd<'_>,
    flags: FeatureFlags,
) -> AttachSummary {
    let mut summary = AttachSummary::default();

    for device in devices {
        match registry.setup(device, netns, flags) {
            Ok(()) => summary.ready += 1,
            Err(SetupError::LinkNotFound { template, error }) => {
                debug!(device = %device, template = %template, error = %error, "device gone before attach");
                summary.missing += 1;
            }
            Err(SetupError::Partial(failures)) => {
                warn!(device = %device, failed = failures.len(), "{}", failures);
                summary.partial += 1;
            }
        }
    }

    summary
}

/// Staleness sweep with the configured lazy-deletion prefixes
pub fn sweep<D: AttachmentDriver>(
    registry: &ProbeRegistry<D>,
    config: &AgentConfig,
) -> HashMap<u32, usize> {
    let counts = registry.flush_inactive(|name| config.is_lazy_interface(name));
    for (netns, live) in &counts {
        debug!(netns, live, "live TC programs after sweep");
    }
    counts
}
