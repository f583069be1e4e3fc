// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for the ninefs core.

use std::io;

/// Core filesystem error type.
///
/// Native storage failures are carried as the unchanged [`io::Error`] so the
/// dispatch layer can hand the original errno back to the remote client.
#[derive(thiserror::Error, Debug)]
pub enum FsError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("not a directory")]
    NotADirectory,
    #[error("invalid argument")]
    InvalidArgument,
}

impl FsError {
    /// The errno to report over the wire for this error.
    pub fn errno(&self) -> i32 {
        match self {
            FsError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            FsError::NotADirectory => libc::ENOTDIR,
            FsError::InvalidArgument => libc::EINVAL,
        }
    }
}

pub type FsResult<T> = Result<T, FsError>;
