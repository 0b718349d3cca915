//! FUSE mount for object-storage buckets.
//!
//! Adapts the path-based [`harborfs_core::HarborFs`] to the inode-based
//! fuser `Filesystem` trait.
//!
//! # Features
//!
//! - Inode numbers allocated on first sight, released on `forget`
//! - Attribute and negative-lookup caching with a short TTL, so changes made
//!   by other bucket clients show up
//! - Every request bounded by a deadline; a stalled bucket surfaces as EIO
//!   rather than a hung process
//!
//! # Usage
//!
//! ```ignore
//! use harborfs_fuse::{HarborFuse, MountConfig, mount};
//!
//! let fuse = HarborFuse::new(fs, runtime.handle().clone(), config.clone());
//! let handle = mount(fuse, mountpoint, &config)?;
//! ```

pub mod async_bridge;
pub mod attr;
pub mod backend;
pub mod config;
pub mod error;
pub mod filesystem;
pub mod inode;

pub use async_bridge::{BridgeError, BridgeStats};
pub use attr::AttrCache;
pub use backend::{MountHandle, mount, mount_options};
pub use config::MountConfig;
pub use error::{FuseError, FuseResult};
pub use filesystem::HarborFuse;
pub use inode::{InodeEntry, InodeTable, ROOT_INODE};
