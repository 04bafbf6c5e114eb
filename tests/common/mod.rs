//! In-memory attachment driver shared by the integration tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::sync::{Arc, Mutex};

use tclens::{
    AttachError, AttachMode, AttachParams, AttachRequest, AttachmentDriver, LinkInfo, NetDevice,
    ProbeRegistry, ProgramNames, ProgramTemplate, RegistryConfig, TcCatalog, TrafficDirection,
};

pub const MAC: [u8; 6] = [0x02, 0x42, 0xac, 0x11, 0x00, 0x02];

#[derive(Debug, Clone)]
pub struct RecordedHandle {
    pub uid: String,
    pub device: NetDevice,
    pub params: AttachParams,
}

#[derive(Default)]
pub struct DriverState {
    /// Function names in the order clone_attach was called
    pub attempts: Vec<String>,
    /// Constant edits passed with each attempt, in the same order
    pub constants: Vec<Vec<(&'static str, u64)>>,
    /// clone_attach panics for this function name
    pub panic_on: Option<String>,
    /// func_name -> error returned by clone_attach
    pub failures: HashMap<String, AttachError>,
    /// uids currently installed in the "kernel"
    pub attached: HashSet<String>,
    /// uids whose hook reports inactive even though installed
    pub inactive: HashSet<String>,
    /// uids whose link cannot be resolved
    pub unresolvable: HashSet<String>,
    /// (ifindex, netns) -> live link state; defaults to device name + MAC
    pub links: HashMap<(u32, u32), LinkInfo>,
    pub detached: Vec<String>,
    pub fail_detach: bool,
    pub last_params: Vec<AttachParams>,
}

#[derive(Default)]
pub struct RecordingDriver {
    pub state: Mutex<DriverState>,
}

impl RecordingDriver {
    pub fn with<R>(&self, f: impl FnOnce(&mut DriverState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn is_attached(&self, uid: &str) -> bool {
        self.with(|s| s.attached.contains(uid))
    }

    /// Tear down a namespace behind the registry's back, like the container-exit path
    pub fn remove_namespace(&self, netns: u32) {
        let suffix = format!("_{}", netns);
        self.with(|s| s.attached.retain(|uid| !uid.ends_with(&suffix)));
    }
}

impl AttachmentDriver for RecordingDriver {
    type Handle = RecordedHandle;

    fn clone_attach(&self, request: &AttachRequest<'_>) -> Result<RecordedHandle, AttachError> {
        let func_name = request.template.func_name.clone();
        let panics = self.with(|s| {
            s.attempts.push(func_name.clone());
            s.constants
                .push(request.constants.iter().map(|c| (c.name, c.value)).collect());
            s.panic_on.as_deref() == Some(func_name.as_str())
        });
        if panics {
            panic!("driver blew up attaching {}", func_name);
        }

        self.with(|s| {
            if let Some(err) = s.failures.get(&func_name) {
                return Err(err.clone());
            }
            s.attached.insert(request.uid.to_string());
            s.last_params.push(request.params);
            Ok(RecordedHandle {
                uid: request.uid.to_string(),
                device: request.device.clone(),
                params: request.params,
            })
        })
    }

    fn is_active(&self, handle: &RecordedHandle) -> bool {
        self.with(|s| s.attached.contains(&handle.uid) && !s.inactive.contains(&handle.uid))
    }

    fn resolve_link(&self, handle: &RecordedHandle) -> Result<LinkInfo, AttachError> {
        self.with(|s| {
            if s.unresolvable.contains(&handle.uid) {
                return Err(AttachError::LinkNotFound(handle.device.name.clone()));
            }
            Ok(s
                .links
                .get(&(handle.device.ifindex, handle.device.netns))
                .cloned()
                .unwrap_or_else(|| LinkInfo {
                    name: handle.device.name.clone(),
                    hardware_addr: MAC.to_vec(),
                }))
        })
    }

    fn detach(&self, handle: RecordedHandle) -> Result<(), AttachError> {
        self.with(|s| {
            s.attached.remove(&handle.uid);
            s.detached.push(handle.uid.clone());
            if s.fail_detach {
                Err(AttachError::Attach("no such filter".to_string()))
            } else {
                Ok(())
            }
        })
    }
}

pub fn template(func_name: &str, direction: TrafficDirection) -> ProgramTemplate {
    ProgramTemplate::new("tclens", func_name, direction, AttachMode::Classifier)
}

pub fn registry_with(templates: Vec<ProgramTemplate>) -> ProbeRegistry<RecordingDriver> {
    ProbeRegistry::new(
        RegistryConfig::default(),
        Arc::new(TcCatalog::with_templates(templates)),
        RecordingDriver::default(),
        ProgramNames::new(),
    )
}

/// funcA on ingress and funcB on egress
pub fn two_template_registry() -> ProbeRegistry<RecordingDriver> {
    registry_with(vec![
        template("funcA", TrafficDirection::Ingress),
        template("funcB", TrafficDirection::Egress),
    ])
}

/// Any open file will do as a namespace handle for the in-memory driver
pub fn netns_handle() -> File {
    File::open("/dev/null").unwrap()
}
