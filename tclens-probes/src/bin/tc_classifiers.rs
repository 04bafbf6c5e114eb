//! TC classifiers cloned per interface by the tclens agent
//!
//! Every instance carries the id of the namespace it was attached in, patched
//! into `NETNS` at load time, so it can be told apart from its clones in
//! `bpftool prog dump` output. The classifiers never drop traffic
//! (always TC_ACT_UNSPEC).
//!
//! Note: This binary must be built for the bpfel-unknown-none target.
//! Use tclens-agent's build.rs which handles cross-compilation automatically.

#![no_std]
#![no_main]

use aya_ebpf::{bindings::TC_ACT_UNSPEC, macros::classifier, programs::TcContext};

/// Rewritten by the loader; 0 means the instance was loaded without a namespace.
#[no_mangle]
static NETNS: u64 = 0;

#[classifier]
pub fn classifier_ingress(ctx: TcContext) -> i32 {
    pass(&ctx)
}

#[classifier]
pub fn classifier_egress(ctx: TcContext) -> i32 {
    pass(&ctx)
}

#[classifier]
pub fn classifier_raw_packet_ingress(ctx: TcContext) -> i32 {
    pass(&ctx)
}

#[classifier]
pub fn classifier_raw_packet_egress(ctx: TcContext) -> i32 {
    pass(&ctx)
}

#[inline(always)]
fn pass(_ctx: &TcContext) -> i32 {
    // SAFETY: NETNS is a plain u64 global; the volatile read keeps the
    // symbol referenced so the loader can patch it.
    let _netns = unsafe { core::ptr::read_volatile(&NETNS) };
    TC_ACT_UNSPEC
}

#[cfg(not(test))]
#[cfg(target_arch = "bpf")]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}
