// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Protocol-level value types shared by the ninefs server core and client.
//!
//! This crate holds the pieces of the 9P2000.L wire vocabulary that both
//! sides need without pulling in the full message marshaling layer: the qid
//! identity tuple, the framing/size constants, and the directory-entry
//! record codec used by `Rreaddir` payloads.

mod qid;
mod wire;

pub use qid::{Qid, QidType};
pub use wire::{decode_dirent, encode_dirent, Dirent, ProtoError};

/// Width of the message length field, in bytes. The length counts itself.
pub const HEADER_SIZE: usize = 4;

/// Per-message overhead reserved for read/write headers; a client performing
/// I/O with a negotiated `msize` should issue transfers of at most
/// `msize - IOHDRSZ` bytes.
pub const IOHDRSZ: u32 = 24;

/// Encoded size of a qid on the wire: type[1] version[4] path[8].
pub const QIDSZ: usize = 13;

/// Default maximum message size offered by the server before negotiation.
pub const DEFAULT_MSIZE: u32 = 64 * 1024;

/// Smallest msize a peer may negotiate down to. Below this not even a
/// maximal-length header plus a short message fits.
pub const MIN_MSIZE: u32 = 1024;
