//! Filesystem semantics over an S3-compatible object store bucket.
//!
//! This crate turns a flat bucket of objects into a hierarchical, POSIX-like
//! namespace. It is transport independent: `harborfs-fuse` adapts
//! [`HarborFs`] to FUSE, tests drive it directly.
//!
//! # Components
//!
//! - [`resolver`]: directories synthesized from key prefixes
//! - [`shadow`]: local staging paths for open-file content
//! - [`descriptor`]: open handles, one lock per handle
//! - [`metadata`]: POSIX attributes for keys that have none
//! - [`dispatcher`]: the operation surface
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use harborfs_core::{CoreConfig, HarborFs, ObjectStoreRemote, OpenFlags, VirtualPath};
//!
//! let fs = HarborFs::new(Arc::new(ObjectStoreRemote::in_memory("demo")), CoreConfig::default());
//! let path = VirtualPath::parse("/hello.txt")?;
//! let fh = fs.create(&path, OpenFlags::read_write(), 0o644).await?;
//! fs.write(fh, b"hi", 0).await?;
//! fs.release(fh).await?;
//! ```

pub mod backing;
pub mod config;
pub mod descriptor;
pub mod dispatcher;
pub mod error;
pub mod ledger;
pub mod locks;
pub mod metadata;
pub mod path;
pub mod remote;
pub mod resolver;
pub mod shadow;
pub mod write_buffer;

pub use backing::{BackingFile, BackingStore, MemoryBacking, ShadowBacking};
pub use config::{CoreConfig, RemoteConfig, Scheme, StagingMode};
pub use descriptor::{DescriptorTable, FileHandle, InitialContent, OpenFlags};
pub use dispatcher::{FsStats, HarborFs};
pub use error::{ErrorCategory, HarborError, HarborResult};
pub use ledger::{Divergence, DivergenceLedger};
pub use metadata::{AttributeRecord, FileSize, MetadataSynthesizer, TimeSource};
pub use path::{ObjectKey, VirtualPath};
pub use remote::{BoundedRemote, ObjectEntry, ObjectStoreRemote, RemoteStore};
pub use resolver::{DirEntry, DirectoryResolver, EntryKind, Listing, Resolution};
pub use shadow::ShadowMapper;
pub use write_buffer::WriteBuffer;
