//! TC classifiers for tclens
//!
//! This crate contains the eBPF programs that the agent clones onto every
//! instrumented interface:
//! - `classifier_ingress` / `classifier_egress`
//! - `classifier_raw_packet_ingress` / `classifier_raw_packet_egress`
//!
//! Each instance carries the id of its network namespace in the `NETNS`
//! global, rewritten by the loader before the program is loaded.
//!
//! Program implementations are in src/bin/

#![cfg_attr(not(test), no_std)]

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}
