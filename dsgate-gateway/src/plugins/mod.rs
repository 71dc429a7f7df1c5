//! # Plugin Lifecycle Module
//!
//! Everything between "a repository publishes a plugin" and "a running
//! child process serves a biz" lives here:
//!
//! - **`downloader`**: scheme-dispatched fetchers producing byte streams
//! - **`catalog`**: the in-memory union of all enabled repositories'
//!   manifests, refreshed hourly
//! - **`installer`**: download, checksum verification, and atomic unpack
//!   of one `(plugin_id, version)` artifact
//! - **`supervisor`**: instance configurations, child processes, the
//!   handshake, and the routing-registry effects of every state
//!   transition
//!
//! Installer and supervisor errors never reach the public data plane;
//! they surface only to admin callers and the log.

pub mod catalog;
pub mod downloader;
pub mod installer;
pub mod supervisor;

pub use catalog::PluginCatalog;
pub use downloader::{DownloaderSet, FileDownloader, HttpDownloader};
pub use installer::PluginInstaller;
pub use supervisor::{InstanceStatus, InstanceSupervisor};
