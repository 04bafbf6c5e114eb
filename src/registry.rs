//! Probe registry: lifecycle of TC programs attached across network namespaces
//!
//! The registry owns the mapping from program identity to the live attachment
//! created by the driver. All mutations (setup, namespace flush, staleness
//! sweep) take the write lock; selection, stats and name lookups share the
//! read lock. Driver calls are made while holding the lock, so the latency of
//! a sweep grows with the number of attachments times the per-call latency.
//!
//! The container-exit path can tear down a namespace's programs without going
//! through this lock. A selection may therefore reference programs that are
//! already gone, which is why it is returned as a [`BestEffortSelector`].

use std::collections::HashMap;
use std::fmt;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tclens_common::constants;
use tracing::{debug, trace};

use crate::catalog::{
    AttachMode, FeatureFlags, ProgramCatalog, ProgramTemplate, TrafficDirection,
};
use crate::device::NetDevice;
use crate::driver::{AttachParams, AttachRequest, AttachmentDriver, ConstantEditor};
use crate::error::{AttachFailures, SetupError};
use crate::metrics::{StatsClient, METRIC_TC_PROGRAMS};
use crate::names::ProgramNames;
use crate::selector::{BestEffortSelector, ProbeSelector};

/// Static attach parameters shared by every program the registry creates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Module tag used when registering program names
    pub module: String,
    pub classifier_priority: u16,
    pub classifier_handle: u16,
    pub raw_classifier_handle: u16,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            module: "tclens".to_string(),
            classifier_priority: 10,
            classifier_handle: 0,
            raw_classifier_handle: 0,
        }
    }
}

/// Unique identity of one attachment
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProgramKey {
    pub uid: String,
    pub func_name: String,
    pub device: NetDevice,
    pub direction: TrafficDirection,
}

impl ProgramKey {
    pub fn new(template: &ProgramTemplate, device: &NetDevice) -> Self {
        Self {
            uid: template.uid.clone(),
            func_name: template.func_name.clone(),
            device: device.clone(),
            direction: template.direction,
        }
    }

    /// Stable string form, also used as the attachment uid
    pub fn key(&self) -> String {
        format!("{}_{}_{}", self.uid, self.func_name, self.device.key())
    }
}

impl fmt::Display for ProgramKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} on {})", self.key(), self.direction, self.device.name)
    }
}

/// A program instance attached to a device, owned by the registry
struct AttachedProgram<H> {
    key: ProgramKey,
    uid: String,
    handle: H,
    params: AttachParams,
    /// Attach order, used to pick a stable device name
    seq: u64,
}

type ProgramMap<H> = HashMap<ProgramKey, AttachedProgram<H>>;

/// Owns every TC attachment made on this host
pub struct ProbeRegistry<D: AttachmentDriver> {
    config: RegistryConfig,
    catalog: Arc<dyn ProgramCatalog>,
    driver: D,
    names: ProgramNames,
    programs: RwLock<ProgramMap<D::Handle>>,
    next_seq: AtomicU64,
}

impl<D: AttachmentDriver> ProbeRegistry<D> {
    pub fn new(
        config: RegistryConfig,
        catalog: Arc<dyn ProgramCatalog>,
        driver: D,
        names: ProgramNames,
    ) -> Self {
        Self {
            config,
            catalog,
            driver,
            names,
            programs: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn names(&self) -> &ProgramNames {
        &self.names
    }

    // Entries are inserted and removed whole, so a poisoned map is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, ProgramMap<D::Handle>> {
        self.programs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ProgramMap<D::Handle>> {
        self.programs.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clone and attach every selected template onto `device`.
    ///
    /// Templates already attached to the device are skipped. `netns` is the
    /// device's namespace; it is borrowed for the duration of the call and
    /// never closed here.
    ///
    /// Returns [`SetupError::LinkNotFound`] as soon as the driver cannot
    /// resolve the device, without trying the remaining templates. Other
    /// failures are collected into [`SetupError::Partial`].
    pub fn setup(
        &self,
        device: &NetDevice,
        netns: BorrowedFd<'_>,
        flags: FeatureFlags,
    ) -> Result<(), SetupError> {
        let mut programs = self.write();

        let mut failures = AttachFailures::new();
        let netns_constants = [ConstantEditor {
            name: constants::NETNS,
            value: u64::from(device.netns),
        }];

        for template in self.catalog.templates(flags) {
            // make sure we're not overriding an existing program
            let key = ProgramKey::new(&template, device);
            if programs.contains_key(&key) {
                trace!(program = %key, "program already attached");
                continue;
            }

            let uid = key.key();
            let filter_handle = match template.mode {
                AttachMode::RawPacket => self.config.raw_classifier_handle,
                AttachMode::Classifier => self.config.classifier_handle,
            };
            let params = AttachParams {
                priority: self.config.classifier_priority,
                filter_handle: u32::from(filter_handle),
                netns_fd: netns.as_raw_fd(),
                mode: template.mode,
            };
            let request = AttachRequest {
                uid: &uid,
                template: &template,
                device,
                netns,
                constants: &netns_constants,
                params,
            };

            match self.driver.clone_attach(&request) {
                Ok(handle) => {
                    // the function name, not the uid, to keep cardinality bounded
                    self.names
                        .insert(&uid, &template.func_name, &self.config.module);
                    debug!(program = %key, "attached TC program");
                    programs.insert(
                        key.clone(),
                        AttachedProgram {
                            key,
                            uid,
                            handle,
                            params,
                            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                        },
                    );
                }
                Err(error) if error.is_link_not_found() => {
                    // nothing else can be attached to a device that doesn't exist
                    return Err(SetupError::LinkNotFound {
                        template: template.id(),
                        error,
                    });
                }
                Err(error) => failures.push(template.id(), error),
            }
        }

        failures.into_result()
    }

    /// Detach and forget every program attached in namespace `netns`.
    ///
    /// Detach failures are ignored: the namespace is gone, so its kernel
    /// objects almost certainly are too.
    pub fn flush_namespace(&self, netns: u32) {
        let mut programs = self.write();

        let flushed: Vec<ProgramKey> = programs
            .keys()
            .filter(|key| key.device.netns == netns)
            .cloned()
            .collect();

        for key in &flushed {
            if let Some(program) = programs.remove(key) {
                self.release(program);
            }
        }

        debug!(netns, count = flushed.len(), "flushed namespace TC programs");
    }

    /// Detach and forget programs whose hook is no longer active.
    ///
    /// Returns, per namespace, how many interfaces still carry an active
    /// program, have a hardware address, and are not flagged by `is_lazy`
    /// (interfaces pending lazy removal).
    pub fn flush_inactive<F>(&self, is_lazy: F) -> HashMap<u32, usize>
    where
        F: Fn(&str) -> bool,
    {
        let mut programs = self.write();

        let mut live_counts: HashMap<u32, usize> = HashMap::new();
        let mut inactive = Vec::new();

        for (key, program) in programs.iter() {
            if !self.driver.is_active(&program.handle) {
                inactive.push(key.clone());
                continue;
            }

            let link = match self.driver.resolve_link(&program.handle) {
                Ok(link) => link,
                Err(e) => {
                    // the interface may have vanished since the activity check
                    debug!(program = %key, error = %e, "couldn't resolve link");
                    continue;
                }
            };

            let lazy = !link.name.is_empty() && is_lazy(&link.name);
            if link.has_hardware_addr() && !lazy {
                *live_counts.entry(key.device.netns).or_insert(0) += 1;
            }
        }

        for key in &inactive {
            if let Some(program) = programs.remove(key) {
                self.release(program);
            }
        }

        if !inactive.is_empty() {
            debug!(count = inactive.len(), "flushed inactive TC programs");
        }

        live_counts
    }

    /// Detach and forget every program, e.g. on shutdown
    pub fn flush_all(&self) {
        let mut programs = self.write();
        let count = programs.len();
        for (_, program) in programs.drain() {
            self.release(program);
        }
        debug!(count, "flushed all TC programs");
    }

    /// Snapshot of the programs currently running, for bulk reconciliation
    pub fn select_active(&self) -> BestEffortSelector {
        let programs = self.read();

        programs
            .values()
            .filter(|program| self.driver.is_active(&program.handle))
            .map(|program| ProbeSelector {
                uid: program.uid.clone(),
                func_name: program.key.func_name.clone(),
            })
            .collect()
    }

    /// Push the number of attached programs; nothing is sent when it is 0
    pub fn report_count(&self, stats: &dyn StatsClient) {
        let count = self.read().len();
        if count > 0 {
            if let Err(e) = stats.gauge(METRIC_TC_PROGRAMS, count as f64, &[]) {
                debug!(error = %e, "couldn't send TC program count");
            }
        }
    }

    /// Name recorded for `(ifindex, netns)` when its first program was attached
    ///
    /// Later setups under a new name don't change the answer, as long as the
    /// first program is still attached.
    pub fn resolve_device_name(&self, ifindex: u32, netns: u32) -> Option<String> {
        self.read()
            .values()
            .filter(|program| {
                program.key.device.ifindex == ifindex && program.key.device.netns == netns
            })
            .min_by_key(|program| program.seq)
            .map(|program| program.key.device.name.clone())
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Keys and parameters of every attachment
    pub fn snapshot(&self) -> Vec<(ProgramKey, AttachParams)> {
        self.read()
            .values()
            .map(|program| (program.key.clone(), program.params))
            .collect()
    }

    /// Number of attachments per namespace
    pub fn namespace_counts(&self) -> HashMap<u32, usize> {
        let mut counts = HashMap::new();
        for key in self.read().keys() {
            *counts.entry(key.device.netns).or_insert(0) += 1;
        }
        counts
    }

    fn release(&self, program: AttachedProgram<D::Handle>) {
        self.names.remove(&program.uid);
        if let Err(e) = self.driver.detach(program.handle) {
            debug!(program = %program.key, error = %e, "detach failed, ignoring");
        }
    }
}
