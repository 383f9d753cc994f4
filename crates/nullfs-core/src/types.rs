// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Core type definitions for nullfs

use std::ffi::OsString;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{FsError, FsResult};

/// Inode number of the root directory (matches the FUSE root id)
pub const ROOT_NODE_ID: NodeId = NodeId(1);

/// Block size reported for nodes created by the filesystem
pub const DEFAULT_BLOCK_SIZE: u32 = 4096;

/// Node identifier, doubles as the inode number reported to the kernel
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandleId(pub u64);

impl std::fmt::Display for HandleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// File timestamps, in nanoseconds since the Unix epoch
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FileTimes {
    pub atime_ns: i64,
    pub mtime_ns: i64,
    pub ctime_ns: i64,
    /// Creation time is not tracked on Linux and stays zero.
    pub crtime_ns: i64,
}

impl FileTimes {
    /// Access, modification and change time all set to `ns`
    pub fn uniform(ns: i64) -> Self {
        Self {
            atime_ns: ns,
            mtime_ns: ns,
            ctime_ns: ns,
            crtime_ns: 0,
        }
    }
}

/// Current wall clock time in nanoseconds since the Unix epoch
pub fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Attribute snapshot of a node
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attributes {
    pub ino: u64,
    /// Full `st_mode`, including the file type bits
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub size: u64,
    pub blksize: u32,
    pub blocks: u64,
    pub times: FileTimes,
}

impl Attributes {
    pub fn file_type_bits(&self) -> u32 {
        self.mode & (libc::S_IFMT as u32)
    }

    pub fn is_dir(&self) -> bool {
        self.file_type_bits() == libc::S_IFDIR as u32
    }

    /// Permission bits without the file type
    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }
}

/// Base attributes of the root node, mirrored from an existing directory
#[derive(Clone, Debug)]
pub struct RootMetadata {
    pub name: OsString,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub size: u64,
    pub blksize: u32,
    pub blocks: u64,
    pub times: FileTimes,
}

impl RootMetadata {
    /// Read root attributes from the directory at `path`
    pub fn from_dir(path: &Path) -> FsResult<Self> {
        let metadata = fs::metadata(path)?;
        if !metadata.is_dir() {
            return Err(FsError::NotADirectory);
        }
        let name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| OsString::from("/"));
        Ok(Self::from_metadata(name, &metadata))
    }

    pub fn from_metadata(name: OsString, metadata: &fs::Metadata) -> Self {
        let to_ns = |secs: i64, nsec: i64| secs.saturating_mul(1_000_000_000).saturating_add(nsec);
        Self {
            name,
            mode: metadata.mode(),
            nlink: u32::try_from(metadata.nlink()).unwrap_or(u32::MAX),
            uid: metadata.uid(),
            gid: metadata.gid(),
            rdev: metadata.rdev(),
            size: metadata.size(),
            blksize: u32::try_from(metadata.blksize()).unwrap_or(DEFAULT_BLOCK_SIZE),
            blocks: metadata.blocks(),
            times: FileTimes {
                atime_ns: to_ns(metadata.atime(), metadata.atime_nsec()),
                mtime_ns: to_ns(metadata.mtime(), metadata.mtime_nsec()),
                ctime_ns: to_ns(metadata.ctime(), metadata.ctime_nsec()),
                crtime_ns: 0,
            },
        }
    }
}

/// Attribute update carrying only the fields that should change
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SetAttributes {
    pub atime_ns: Option<i64>,
    pub mtime_ns: Option<i64>,
    pub ctime_ns: Option<i64>,
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub size: Option<u64>,
}

/// Access mode requested by an open call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    /// Decode the access mode from raw `open(2)` flags
    pub fn from_flags(flags: i32) -> Self {
        match flags & libc::O_ACCMODE {
            libc::O_WRONLY => AccessMode::WriteOnly,
            libc::O_RDWR => AccessMode::ReadWrite,
            _ => AccessMode::ReadOnly,
        }
    }
}
