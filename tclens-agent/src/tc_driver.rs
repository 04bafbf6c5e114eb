//! aya-backed attachment driver
//!
//! Every attachment gets its own [`Ebpf`] instance so that the `NETNS`
//! global can be patched per namespace before load. The instance is loaded
//! and attached from inside the device's namespace, and detached from there
//! again, since netlink sockets bind to the namespace of the calling thread.

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use aya::programs::tc::{NlOptions, SchedClassifierLinkId, TcAttachOptions};
use aya::programs::{tc, ProgramError, SchedClassifier, TcAttachType};
use aya::{Ebpf, EbpfLoader};
use tclens::{
    AttachError, AttachRequest, AttachmentDriver, LinkInfo, TcLensError, TrafficDirection,
};
use tracing::{debug, info, warn};

use crate::discovery;
use crate::filter::{self, FilterSpec};
use crate::netns::NetnsHandle;

const MIN_KERNEL: (u32, u32) = (5, 8);

/// One program instance attached to one device
pub struct TcHandle {
    bpf: Mutex<Ebpf>,
    func_name: String,
    link_id: SchedClassifierLinkId,
    netns: NetnsHandle,
    filter: FilterSpec,
}

/// Attaches the bundled TC classifiers with aya
pub struct TcDriver {
    object: &'static [u8],
}

impl TcDriver {
    /// Driver for the classifiers compiled into this binary
    pub fn new() -> Result<Self, TcLensError> {
        let object: &'static [u8] =
            aya::include_bytes_aligned!(concat!(env!("OUT_DIR"), "/tc_classifiers"));
        Self::with_object(object)
    }

    /// Driver for an arbitrary classifier object
    pub fn with_object(object: &'static [u8]) -> Result<Self, TcLensError> {
        if object.is_empty() {
            return Err(TcLensError::UnsupportedFeature(
                "agent was built without TC classifiers (bpf-linker missing?)".to_string(),
            ));
        }
        run_preflight_checks()?;
        Ok(Self { object })
    }

    fn load_and_attach(
        &self,
        request: &AttachRequest<'_>,
    ) -> Result<(Ebpf, SchedClassifierLinkId, FilterSpec), AttachError> {
        let device = request.device;
        let func_name = request.template.func_name.as_str();

        // the name may have changed since discovery, the index is authoritative
        let iface = discovery::interface_name(device.ifindex)
            .ok_or_else(|| AttachError::LinkNotFound(device.to_string()))?;

        let mut loader = EbpfLoader::new();
        for constant in request.constants {
            loader.set_global(constant.name, &constant.value, true);
        }
        let mut bpf = loader
            .load(self.object)
            .map_err(|e| AttachError::Attach(format!("failed to load object: {}", e)))?;

        let program: &mut SchedClassifier = bpf
            .program_mut(func_name)
            .ok_or_else(|| AttachError::Attach(format!("{} not found in object", func_name)))?
            .try_into()
            .map_err(|e: ProgramError| AttachError::Attach(e.to_string()))?;
        program.load().map_err(|e| AttachError::Attach(e.to_string()))?;
        let prog_id = match program.info() {
            Ok(info) => Some(info.id()),
            Err(e) => {
                debug!(func_name, error = %e, "couldn't read program id");
                None
            }
        };

        // clsact is shared by every classifier on the interface
        if let Err(e) = tc::qdisc_add_clsact(&iface) {
            debug!(iface = %iface, error = %e, "couldn't add clsact qdisc (may already exist)");
        }

        let attach_type = match request.template.direction {
            TrafficDirection::Ingress => TcAttachType::Ingress,
            TrafficDirection::Egress => TcAttachType::Egress,
        };
        let options = TcAttachOptions::Netlink(NlOptions {
            priority: request.params.priority,
            handle: request.params.filter_handle,
        });
        let link_id = program
            .attach_with_options(&iface, attach_type, options)
            .map_err(|e| match e {
                ProgramError::UnknownInterface { name } => AttachError::LinkNotFound(name),
                other => AttachError::Attach(other.to_string()),
            })?;

        let filter = FilterSpec {
            ifindex: device.ifindex,
            direction: request.template.direction,
            priority: request.params.priority,
            handle: request.params.filter_handle,
            prog_id,
        };
        Ok((bpf, link_id, filter))
    }
}

impl AttachmentDriver for TcDriver {
    type Handle = TcHandle;

    fn clone_attach(&self, request: &AttachRequest<'_>) -> Result<TcHandle, AttachError> {
        let netns = NetnsHandle::try_clone_borrowed(request.netns)
            .map_err(|e| AttachError::Attach(e.to_string()))?;

        let (bpf, link_id, filter) = netns
            .enter(|| self.load_and_attach(request))
            .map_err(|e| AttachError::Attach(e.to_string()))??;

        Ok(TcHandle {
            bpf: Mutex::new(bpf),
            func_name: request.template.func_name.clone(),
            link_id,
            netns,
            filter,
        })
    }

    fn is_active(&self, handle: &TcHandle) -> bool {
        let state = handle
            .netns
            .enter(|| filter::filter_state(&handle.filter))
            .and_then(|state| state);
        filter::is_active_or_unknown(state)
    }

    fn resolve_link(&self, handle: &TcHandle) -> Result<LinkInfo, AttachError> {
        handle
            .netns
            .enter(|| discovery::link_info(handle.filter.ifindex))
            .map_err(|e| AttachError::Attach(e.to_string()))?
    }

    fn detach(&self, handle: TcHandle) -> Result<(), AttachError> {
        let TcHandle {
            bpf,
            func_name,
            link_id,
            netns,
            filter,
        } = handle;
        let mut bpf = bpf.into_inner().unwrap_or_else(PoisonError::into_inner);
        debug!(func_name = %func_name, ifindex = filter.ifindex, "detaching TC program");

        // the instance must also be dropped in its namespace, dropping a
        // program detaches any remaining links over netlink
        netns
            .enter(move || {
                let result = bpf
                    .program_mut(&func_name)
                    .ok_or_else(|| AttachError::Attach(format!("{} not found", func_name)))
                    .and_then(|program| {
                        let program: &mut SchedClassifier = program
                            .try_into()
                            .map_err(|e: ProgramError| AttachError::Attach(e.to_string()))?;
                        program
                            .detach(link_id)
                            .map_err(|e| AttachError::Attach(e.to_string()))
                    });
                drop(bpf);
                result
            })
            .map_err(|e| AttachError::Attach(e.to_string()))?
    }
}

/// Validate the system can run TC classifiers
fn run_preflight_checks() -> Result<(), TcLensError> {
    info!("Running pre-flight checks...");

    check_kernel_version()?;
    check_btf();
    check_capabilities();

    info!("Pre-flight checks passed");
    Ok(())
}

fn check_kernel_version() -> Result<(), TcLensError> {
    let output = std::process::Command::new("uname").arg("-r").output()?;
    let release = String::from_utf8_lossy(&output.stdout).trim().to_string();

    let version = parse_kernel_version(&release).ok_or_else(|| {
        TcLensError::UnsupportedFeature(format!("couldn't parse kernel version {}", release))
    })?;

    if version < MIN_KERNEL {
        return Err(TcLensError::KernelVersionTooOld {
            version: release,
            min_version: format!("{}.{}", MIN_KERNEL.0, MIN_KERNEL.1),
        });
    }

    info!(kernel = %release, "kernel version supported");
    Ok(())
}

/// `(major, minor)` of a kernel release string like `6.1.0-18-amd64`
pub fn parse_kernel_version(release: &str) -> Option<(u32, u32)> {
    let mut parts = release.trim().split('.');
    let major = parts.next()?.parse().ok()?;
    let minor_part = parts.next()?;
    let minor_digits: String = minor_part
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    let minor = minor_digits.parse().ok()?;
    Some((major, minor))
}

fn check_btf() {
    if Path::new("/sys/kernel/btf/vmlinux").exists() {
        info!("BTF available");
    } else {
        warn!("BTF not found at /sys/kernel/btf/vmlinux, some classifiers may fail to load");
    }
}

fn check_capabilities() {
    // SAFETY: geteuid has no preconditions
    let euid = unsafe { libc::geteuid() };
    if euid != 0 {
        warn!(
            euid,
            "Not running as root. Ensure CAP_BPF, CAP_NET_ADMIN and CAP_SYS_ADMIN are granted."
        );
    } else {
        info!("Running with root privileges");
    }
}
