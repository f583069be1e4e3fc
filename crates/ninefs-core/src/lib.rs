// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Resource-management core of the ninefs server.
//!
//! This crate tracks the two kinds of shared state every worker thread
//! touches: interned, reference-counted paths ([`PathPool`] / [`Path`]) and
//! the open storage handles attached to them ([`IoCtx`]). The dispatch layer
//! interns a path, asks the pool to open (or reuse) a handle against it, and
//! performs all subsequent I/O through that handle.
//!
//! Lock tiers are strictly ordered pool > path > handle; any operation that
//! needs two tiers takes the coarser one first. No lock is held across a
//! blocking storage call, except the paired directory read-and-tell which is
//! scoped to a single handle.

mod error;
mod ioctx;
mod pool;
mod types;

pub use error::{FsError, FsResult};
pub use ioctx::{DirEntryAt, IoCtx};
pub use pool::{Path, PathPool, PathStats};
pub use types::{FlockOp, HandleId, LockKind, LockState, LockTest, User};
