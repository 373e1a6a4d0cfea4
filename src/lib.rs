//! Mounts NFSv3 shares inside a Linux guest and re-exports them over SMB.
//!
//! [`store::ConfigStore`] edits the share blocks in smb.conf;
//! [`lifecycle::ShareLifecycle`] ties a mount, its share block and the
//! service reload together and rolls back partial work.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod lock;
pub mod quota;
pub mod smbconf;
pub mod store;
pub mod system;

pub use error::{CommandFailure, Error, Result, Rollback};
