// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Shared type definitions for the ninefs core.

use serde::Serialize;

/// Stable identifier of an open handle within its path's handle table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct HandleId(pub u64);

/// The security identity a handle was opened under. Resolved by the
/// credential layer and shared here via `Arc`; the core only ever compares
/// uids when deciding whether a handle may be reused.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub uid: u32,
    pub gid: u32,
}

/// Cached advisory-lock state of a handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    Shared,
    Exclusive,
}

/// An advisory-lock request kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockKind {
    Shared,
    Exclusive,
}

/// Advisory-lock operation for [`IoCtx::flock`](crate::IoCtx::flock).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlockOp {
    Shared,
    Exclusive,
    Unlock,
}

/// Outcome of a lock compatibility test.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockTest {
    /// The requested lock could be granted right now.
    Compatible,
    /// Some holder (possibly external) would block the request.
    WouldBlock,
}
