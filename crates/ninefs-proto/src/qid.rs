// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Qid: the server-assigned identity of a filesystem object.

use serde::{Deserialize, Serialize};

/// Entity type bits carried in the first byte of a qid.
///
/// Values are the 9P2000.L wire constants; only the variants a POSIX export
/// can produce are represented.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum QidType {
    File = 0x00,
    Symlink = 0x02,
    Dir = 0x80,
}

impl QidType {
    pub fn to_wire(self) -> u8 {
        self as u8
    }

    pub fn from_wire(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(QidType::File),
            0x02 => Some(QidType::Symlink),
            0x80 => Some(QidType::Dir),
            _ => None,
        }
    }
}

/// A qid identifies one filesystem object across the wire protocol:
/// (entity type, numeric path, version).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Qid {
    pub type_: QidType,
    pub path: u64,
    pub version: u32,
}

impl Qid {
    /// Derive a qid from native stat attributes: the inode number becomes
    /// the path, the file type maps onto the qid type, and the version is
    /// left at zero (the export does not track generation numbers).
    pub fn from_stat(st: &libc::stat) -> Qid {
        let type_ = match st.st_mode & libc::S_IFMT {
            libc::S_IFDIR => QidType::Dir,
            libc::S_IFLNK => QidType::Symlink,
            _ => QidType::File,
        };
        Qid {
            type_,
            path: st.st_ino,
            version: 0,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.type_ == QidType::Dir
    }
}
