// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! nullfs Core: an in-memory node tree that accepts writes and keeps nothing
//!
//! Files and directories can be created, listed, re-attributed and removed.
//! Written bytes are acknowledged and dropped; file content is never stored
//! and never readable.

pub mod config;
pub mod dirent;
pub mod error;
pub mod fs;
pub mod handle_table;
pub mod node_table;
pub mod types;

pub use config::{CachePolicy, FsConfig};
pub use dirent::{DirEntries, DirEntry};
pub use error::{FsError, FsResult};
pub use fs::{Caller, NullFs};
pub use handle_table::HandleTable;
pub use node_table::{Node, NodeTable};
pub use types::{
    now_ns, AccessMode, Attributes, FileTimes, HandleId, NodeId, RootMetadata, SetAttributes,
    DEFAULT_BLOCK_SIZE, ROOT_NODE_ID,
};
