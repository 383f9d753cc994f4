// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for nullfs core

use std::io;

/// Core filesystem error type
#[derive(thiserror::Error, Debug)]
pub enum FsError {
    #[error("not found")]
    NotFound,
    #[error("directory not empty")]
    NotEmpty,
    #[error("permission denied")]
    PermissionDenied,
    #[error("unsupported")]
    Unsupported,
    #[error("root node already initialized")]
    AlreadyInitialized,
    #[error("not a directory")]
    NotADirectory,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl FsError {
    /// errno value reported to the kernel for this error
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::NotEmpty => libc::ENOTEMPTY,
            FsError::PermissionDenied => libc::EACCES,
            // Missing attribute; ENOATTR is an alias of ENODATA on Linux.
            FsError::Unsupported => libc::ENODATA,
            FsError::AlreadyInitialized => libc::EINVAL,
            FsError::NotADirectory => libc::ENOTDIR,
            FsError::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

pub type FsResult<T> = Result<T, FsError>;
