//! Shared definitions between the TC classifiers (kernel) and userspace
//!
//! This crate defines:
//! - Classifier function names, so the catalog and the eBPF object agree
//! - Names of the global constants patched into each program instance at load
//!
//! Everything here must stay `no_std` compatible for the eBPF build.

#![cfg_attr(not(feature = "userspace"), no_std)]

/// Classifier entry points compiled into the `tc_classifiers` object
pub mod programs {
    pub const CLASSIFIER_INGRESS: &str = "classifier_ingress";
    pub const CLASSIFIER_EGRESS: &str = "classifier_egress";
    pub const CLASSIFIER_RAW_PACKET_INGRESS: &str = "classifier_raw_packet_ingress";
    pub const CLASSIFIER_RAW_PACKET_EGRESS: &str = "classifier_raw_packet_egress";
}

/// Global constants rewritten per program instance before load
pub mod constants {
    /// Network namespace id of the device the instance is attached to.
    ///
    /// The kernel symbol is upper-case; the loader patches it by this name.
    pub const NETNS: &str = "NETNS";
}
