//! Share local files with devices on the same network.
//!
//! A file is registered with the [`share::ShareService`], which starts an
//! HTTP server on the LAN and hands back a download URL (suitable for a QR
//! code). Removing the last shared file stops the server again.

pub mod config;
pub mod display;
pub mod logging;
pub mod network;
pub mod registry;
pub mod server;
pub mod share;

pub use registry::{FileId, FileListing, Registry, SharedFile};
pub use server::{FileServer, ServerError, ServerState, DEFAULT_PORT};
pub use share::{FileDescriptor, FilePicker, PathPicker, ShareError, ShareInfo, ShareService};
