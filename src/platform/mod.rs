//! Platform-specific implementations.

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use linux::*;

// Input devices, /proc counters and poll(2) semantics are Linux-only here.
#[cfg(not(target_os = "linux"))]
compile_error!("kam only supports Linux");
