//! Host agent for tclens
//!
//! Responsibilities:
//! - Load the TC classifiers and attach them to every interface of the
//!   watched network namespaces
//! - Periodically sweep out programs whose interface went away
//! - Report the number of attached programs
//! - Detach everything on shutdown

pub mod attach;

#[cfg(target_os = "linux")]
pub mod discovery;
#[cfg(target_os = "linux")]
pub mod filter;
#[cfg(target_os = "linux")]
pub mod netns;
#[cfg(target_os = "linux")]
pub mod tc_driver;
