//! IPC (Inter-Process Communication) module
//!
//! Line-delimited JSON over a Unix domain socket between the daemon and its
//! clients.

mod client;
mod protocol;
mod server;

pub use client::IpcClient;
pub use protocol::*;
pub use server::IpcServer;
