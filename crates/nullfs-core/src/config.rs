// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Configuration types for nullfs

use serde::{Deserialize, Serialize};

use crate::types::DEFAULT_BLOCK_SIZE;

/// Kernel cache policy reported with entry and attribute replies
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CachePolicy {
    pub attr_ttl_ms: u32,
    pub entry_ttl_ms: u32,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            attr_ttl_ms: 1000,
            entry_ttl_ms: 1000,
        }
    }
}

/// Filesystem configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    /// Name shown as the mount source (`fsname=` mount option)
    pub fs_name: String,
    pub cache: CachePolicy,
    /// `st_blksize` reported for created files and directories
    pub block_size: u32,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            fs_name: "nullfs".to_string(),
            cache: CachePolicy::default(),
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl FsConfig {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
