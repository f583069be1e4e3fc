// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Directory-entry record codec.
//!
//! An `Rreaddir` payload is a packed run of records, each laid out as
//! `qid[13] offset[8] type[1] name[s]` in little-endian byte order, where
//! `name[s]` is a two-byte length followed by that many bytes of UTF-8.
//! The offset is the server's continuation token for the entry, not a byte
//! position in the payload.

use crate::{Qid, QidType, QIDSZ};

#[derive(thiserror::Error, Debug)]
pub enum ProtoError {
    #[error("truncated directory entry")]
    Truncated,
    #[error("unknown qid type {0:#x}")]
    BadQidType(u8),
    #[error("directory entry name is not valid utf-8")]
    BadName,
    #[error("directory entry name too long ({0} bytes)")]
    NameTooLong(usize),
}

/// One decoded directory entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dirent {
    pub qid: Qid,
    /// Opaque continuation token assigned by the server; passing it back in
    /// a readdir request resumes listing after this entry.
    pub offset: u64,
    /// Native d_type of the entry.
    pub dtype: u8,
    pub name: String,
}

/// Fixed part of a record: qid + offset + type + name length.
const DIRENT_FIXED: usize = QIDSZ + 8 + 1 + 2;

/// Append one encoded entry to `buf`.
pub fn encode_dirent(buf: &mut Vec<u8>, ent: &Dirent) -> Result<(), ProtoError> {
    let name = ent.name.as_bytes();
    if name.len() > u16::MAX as usize {
        return Err(ProtoError::NameTooLong(name.len()));
    }
    buf.reserve(DIRENT_FIXED + name.len());
    buf.push(ent.qid.type_.to_wire());
    buf.extend_from_slice(&ent.qid.version.to_le_bytes());
    buf.extend_from_slice(&ent.qid.path.to_le_bytes());
    buf.extend_from_slice(&ent.offset.to_le_bytes());
    buf.push(ent.dtype);
    buf.extend_from_slice(&(name.len() as u16).to_le_bytes());
    buf.extend_from_slice(name);
    Ok(())
}

/// Decode exactly one entry from the front of `data`, returning it together
/// with the number of bytes it occupied.
pub fn decode_dirent(data: &[u8]) -> Result<(Dirent, usize), ProtoError> {
    if data.len() < DIRENT_FIXED {
        return Err(ProtoError::Truncated);
    }
    let type_ = QidType::from_wire(data[0]).ok_or(ProtoError::BadQidType(data[0]))?;
    let version = u32::from_le_bytes(data[1..5].try_into().unwrap());
    let path = u64::from_le_bytes(data[5..13].try_into().unwrap());
    let offset = u64::from_le_bytes(data[13..21].try_into().unwrap());
    let dtype = data[21];
    let name_len = u16::from_le_bytes(data[22..24].try_into().unwrap()) as usize;
    let total = DIRENT_FIXED + name_len;
    if data.len() < total {
        return Err(ProtoError::Truncated);
    }
    let name = std::str::from_utf8(&data[DIRENT_FIXED..total])
        .map_err(|_| ProtoError::BadName)?
        .to_owned();
    Ok((
        Dirent {
            qid: Qid {
                type_,
                path,
                version,
            },
            offset,
            dtype,
            name,
        },
        total,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str, offset: u64) -> Dirent {
        Dirent {
            qid: Qid {
                type_: QidType::File,
                path: 0xdead_beef,
                version: 7,
            },
            offset,
            dtype: libc::DT_REG,
            name: name.to_owned(),
        }
    }

    #[test]
    fn decode_reports_record_length() {
        let mut buf = Vec::new();
        encode_dirent(&mut buf, &sample("hello", 1)).unwrap();
        encode_dirent(&mut buf, &sample("world.txt", 2)).unwrap();

        let (first, used) = decode_dirent(&buf).unwrap();
        assert_eq!(first.name, "hello");
        assert_eq!(first.offset, 1);
        assert_eq!(used, DIRENT_FIXED + 5);

        let (second, used2) = decode_dirent(&buf[used..]).unwrap();
        assert_eq!(second.name, "world.txt");
        assert_eq!(used + used2, buf.len());
    }

    #[test]
    fn decode_rejects_short_input() {
        let mut buf = Vec::new();
        encode_dirent(&mut buf, &sample("file", 9)).unwrap();
        for cut in 0..buf.len() {
            assert!(matches!(
                decode_dirent(&buf[..cut]),
                Err(ProtoError::Truncated)
            ));
        }
    }

    #[test]
    fn decode_rejects_unknown_qid_type() {
        let mut buf = Vec::new();
        encode_dirent(&mut buf, &sample("x", 1)).unwrap();
        buf[0] = 0x55;
        assert!(matches!(
            decode_dirent(&buf),
            Err(ProtoError::BadQidType(0x55))
        ));
    }

    #[test]
    fn empty_name_round_trips() {
        let mut buf = Vec::new();
        encode_dirent(&mut buf, &sample("", 3)).unwrap();
        let (ent, used) = decode_dirent(&buf).unwrap();
        assert_eq!(ent.name, "");
        assert_eq!(used, buf.len());
    }
}
