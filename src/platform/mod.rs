//! Platform-specific implementations

#[cfg(unix)]
pub mod linux;

#[cfg(unix)]
pub use linux::{setup_signal_handlers, xdg_application_dirs};
