// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Client-side directory listing pager.
//!
//! The readdir RPC is chunked: the server returns up to `count` bytes of
//! packed directory-entry records starting after an opaque continuation
//! token. [`DirReader`] turns that into conventional one-entry-at-a-time
//! iteration, refilling its buffer from the RPC layer as needed. It never
//! touches the filesystem itself.

use std::io;

use tracing::trace;

use ninefs_proto::{decode_dirent, Dirent, ProtoError};

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// The server's payload did not decode as directory entries.
    #[error("protocol error: {0}")]
    Proto(#[from] ProtoError),
    /// The server returned more bytes than were requested.
    #[error("oversized readdir payload ({got} bytes > {requested} requested)")]
    Oversize { got: usize, requested: u32 },
}

pub type ClientResult<T> = Result<T, ClientError>;

/// The external RPC seam: issue one readdir request against the open
/// directory fid this instance is bound to.
pub trait ReaddirRpc {
    /// Fetch up to `count` bytes of packed entries resuming after `offset`
    /// (0 means the start of the directory). An empty result means
    /// end-of-directory.
    fn readdir(&mut self, offset: u64, count: u32) -> ClientResult<Vec<u8>>;
}

/// One-entry-at-a-time reader over a chunked readdir RPC.
pub struct DirReader<R> {
    rpc: R,
    /// Raw serialized entries from the last refill.
    buf: Vec<u8>,
    /// Cursor into `buf`.
    used: usize,
    /// Continuation token of the last fully consumed entry.
    offset: u64,
    /// Maximum bytes requested per refill, typically msize - IOHDRSZ.
    chunk: u32,
}

impl<R: ReaddirRpc> DirReader<R> {
    pub fn new(rpc: R, chunk: u32) -> Self {
        DirReader {
            rpc,
            buf: Vec::new(),
            used: 0,
            offset: 0,
            chunk,
        }
    }

    /// Fetch the next entry, refilling from the RPC when the buffer is
    /// exhausted. `Ok(None)` is end-of-directory.
    pub fn next_entry(&mut self) -> ClientResult<Option<Dirent>> {
        if self.used >= self.buf.len() {
            let data = self.rpc.readdir(self.offset, self.chunk)?;
            if data.len() > self.chunk as usize {
                return Err(ClientError::Oversize {
                    got: data.len(),
                    requested: self.chunk,
                });
            }
            if data.is_empty() {
                trace!(offset = self.offset, "end of directory");
                return Ok(None);
            }
            self.buf = data;
            self.used = 0;
        }
        let (ent, n) = decode_dirent(&self.buf[self.used..])?;
        self.used += n;
        self.offset = ent.offset;
        Ok(Some(ent))
    }

    /// Resume listing after an arbitrary continuation token. The buffer is
    /// discarded unconditionally: tokens are server cursor positions, not
    /// client-buffer byte offsets, so there is nothing to skip locally.
    pub fn seek(&mut self, offset: u64) {
        self.offset = offset;
        self.used = self.buf.len();
    }

    /// Continuation token of the last consumed entry.
    pub fn tell(&self) -> u64 {
        self.offset
    }
}

impl<R: ReaddirRpc> Iterator for DirReader<R> {
    type Item = ClientResult<Dirent>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}
