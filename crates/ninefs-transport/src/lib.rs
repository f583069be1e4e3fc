// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Message framing over a duplex byte channel.
//!
//! A protocol message on the wire is `[length: u32 LE, counting itself]
//! [payload...]`. [`FdTransport`] turns a raw descriptor pair into discrete
//! messages: it accumulates across short reads, keeps bytes that belong to
//! the next message when a read overshoots, retries EINTR transparently, and
//! treats a zero-length read at a message boundary as clean end-of-stream.
//!
//! One framer is driven by one logical connection at a time; it needs no
//! locking of its own.

use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

use tracing::{debug, trace};

use ninefs_proto::HEADER_SIZE;

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// The declared message length does not fit the negotiated maximum (or
    /// is smaller than the length field itself).
    #[error("message length {length} invalid for msize {msize}")]
    InvalidLength { length: u32, msize: u32 },
    /// The stream ended inside a message, including inside the length
    /// header. Clean end-of-stream only happens at a message boundary.
    #[error("stream ended mid-message with {buffered} bytes buffered")]
    TruncatedMessage { buffered: usize },
}

pub type TransportResult<T> = Result<T, TransportError>;

fn read_retry(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
        if n >= 0 {
            return Ok(n as usize);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

fn write_retry(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    loop {
        let n = unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) };
        if n >= 0 {
            return Ok(n as usize);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Bytes read past the end of a completed message, carried into the next
/// `recv` call. The buffer is always at least as large as any msize the
/// session can still negotiate, because msize only ever shrinks.
struct Leftover {
    buf: Vec<u8>,
    len: usize,
}

/// Blocking message framer over an owned descriptor pair.
pub struct FdTransport {
    fd_in: OwnedFd,
    /// `None` when the channel is a single duplex descriptor; teardown then
    /// closes it exactly once.
    fd_out: Option<OwnedFd>,
    leftover: Option<Leftover>,
}

impl FdTransport {
    pub fn new(fd_in: OwnedFd, fd_out: Option<OwnedFd>) -> Self {
        FdTransport {
            fd_in,
            fd_out,
            leftover: None,
        }
    }

    fn out_fd(&self) -> RawFd {
        self.fd_out.as_ref().unwrap_or(&self.fd_in).as_raw_fd()
    }

    /// Receive the next message, allowing up to `msize` bytes. `Ok(None)`
    /// is clean end-of-stream. `msize` may be smaller than on previous
    /// calls (renegotiation) but must never be larger.
    pub fn recv(&mut self, msize: u32) -> TransportResult<Option<Vec<u8>>> {
        let limit = msize as usize;
        let (mut buf, mut len) = match self.leftover.take() {
            Some(l) => (l.buf, l.len),
            None => (vec![0u8; limit], 0),
        };
        let mut size: Option<usize> = None;

        loop {
            if len >= HEADER_SIZE && size.is_none() {
                let declared = u32::from_le_bytes(buf[..HEADER_SIZE].try_into().unwrap());
                if declared > msize || (declared as usize) < HEADER_SIZE {
                    return Err(TransportError::InvalidLength {
                        length: declared,
                        msize,
                    });
                }
                size = Some(declared as usize);
            }
            if let Some(size) = size {
                if len >= size {
                    break;
                }
            }
            let n = read_retry(self.fd_in.as_raw_fd(), &mut buf[len..limit])?;
            if n == 0 {
                if len == 0 {
                    trace!("clean end of stream");
                    return Ok(None);
                }
                debug!(buffered = len, "stream ended mid-message");
                return Err(TransportError::TruncatedMessage { buffered: len });
            }
            len += n;
        }

        let size = size.expect("loop exits only with a known size");
        if len > size {
            // Overshoot: stash the head of the next message. The stash
            // buffer must fit both the extra bytes and any future msize.
            let extra = len - size;
            let mut stash = vec![0u8; limit.max(extra)];
            stash[..extra].copy_from_slice(&buf[size..len]);
            self.leftover = Some(Leftover {
                buf: stash,
                len: extra,
            });
        }
        buf.truncate(size);
        Ok(Some(buf))
    }

    /// Transmit one complete message, looping until every byte is written.
    /// Any write failure is hard; the channel is presumed broken afterward.
    pub fn send(&mut self, msg: &[u8]) -> TransportResult<()> {
        let fd = self.out_fd();
        let mut off = 0;
        while off < msg.len() {
            let n = write_retry(fd, &msg[off..])?;
            if n == 0 {
                return Err(TransportError::Io(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "descriptor accepted no bytes",
                )));
            }
            off += n;
        }
        Ok(())
    }
}

impl From<UnixStream> for FdTransport {
    fn from(stream: UnixStream) -> Self {
        FdTransport::new(stream.into(), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::thread;

    const MSIZE: u32 = 8192;

    fn frame(payload: &[u8]) -> Vec<u8> {
        let total = (payload.len() + HEADER_SIZE) as u32;
        let mut msg = total.to_le_bytes().to_vec();
        msg.extend_from_slice(payload);
        msg
    }

    fn pair() -> (UnixStream, FdTransport) {
        let (a, b) = UnixStream::pair().unwrap();
        (a, FdTransport::from(b))
    }

    #[test]
    fn round_trip_between_two_framers() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut left = FdTransport::from(a);
        let mut right = FdTransport::from(b);

        let msg = frame(b"hello");
        left.send(&msg).unwrap();
        assert_eq!(right.recv(MSIZE).unwrap().unwrap(), msg);

        let reply = frame(b"world");
        right.send(&reply).unwrap();
        assert_eq!(left.recv(MSIZE).unwrap().unwrap(), reply);
    }

    #[test]
    fn messages_survive_arbitrary_chunking() {
        let messages: Vec<Vec<u8>> = vec![
            frame(b""),
            frame(b"a"),
            frame(&vec![0x5a; 300]),
            frame(b"tail"),
        ];
        let stream: Vec<u8> = messages.iter().flatten().copied().collect();

        // Byte-at-a-time, all-at-once, and a spread of chunk sizes.
        for chunk in [1usize, 2, 3, 7, 64, stream.len()] {
            let (mut tx, mut framer) = pair();
            let bytes = stream.clone();
            let writer = thread::spawn(move || {
                for part in bytes.chunks(chunk) {
                    tx.write_all(part).unwrap();
                }
                drop(tx);
            });
            let mut got = Vec::new();
            while let Some(msg) = framer.recv(MSIZE).unwrap() {
                got.push(msg);
            }
            writer.join().unwrap();
            assert_eq!(got, messages, "chunk size {chunk}");
        }
    }

    #[test]
    fn coalesced_read_keeps_next_message() {
        let (mut tx, mut framer) = pair();
        let first = frame(b"first");
        let second = frame(b"second message");
        let mut all = first.clone();
        all.extend_from_slice(&second);
        tx.write_all(&all).unwrap();
        drop(tx);

        assert_eq!(framer.recv(MSIZE).unwrap().unwrap(), first);
        assert_eq!(framer.recv(MSIZE).unwrap().unwrap(), second);
        assert!(framer.recv(MSIZE).unwrap().is_none());
    }

    #[test]
    fn msize_may_shrink_between_messages() {
        let (mut tx, mut framer) = pair();
        let big = frame(&vec![1u8; 4000]);
        let small = frame(b"small");
        let mut all = big.clone();
        all.extend_from_slice(&small);
        tx.write_all(&all).unwrap();
        drop(tx);

        assert_eq!(framer.recv(8192).unwrap().unwrap(), big);
        // Renegotiated down; the retained buffer from the larger msize is
        // still valid for the smaller message.
        assert_eq!(framer.recv(1024).unwrap().unwrap(), small);
        assert!(framer.recv(1024).unwrap().is_none());
    }

    #[test]
    fn oversized_length_is_a_hard_error() {
        let (mut tx, mut framer) = pair();
        tx.write_all(&frame(&vec![0u8; 600])).unwrap();
        let err = framer.recv(128).unwrap_err();
        match err {
            TransportError::InvalidLength { length, msize } => {
                assert_eq!(length, 604);
                assert_eq!(msize, 128);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn undersized_length_is_a_hard_error() {
        let (mut tx, mut framer) = pair();
        tx.write_all(&2u32.to_le_bytes()).unwrap();
        assert!(matches!(
            framer.recv(MSIZE),
            Err(TransportError::InvalidLength { length: 2, .. })
        ));
    }

    #[test]
    fn truncated_header_at_eof_is_an_error() {
        let (mut tx, mut framer) = pair();
        tx.write_all(&[0x10, 0x00]).unwrap();
        drop(tx);
        assert!(matches!(
            framer.recv(MSIZE),
            Err(TransportError::TruncatedMessage { buffered: 2 })
        ));
    }

    #[test]
    fn truncated_body_at_eof_is_an_error() {
        let (mut tx, mut framer) = pair();
        let msg = frame(b"never finishes");
        tx.write_all(&msg[..msg.len() - 3]).unwrap();
        drop(tx);
        assert!(matches!(
            framer.recv(MSIZE),
            Err(TransportError::TruncatedMessage { .. })
        ));
    }

    #[test]
    fn eof_after_last_message_is_clean() {
        let (mut tx, mut framer) = pair();
        tx.write_all(&frame(b"only")).unwrap();
        drop(tx);
        assert!(framer.recv(MSIZE).unwrap().is_some());
        assert!(framer.recv(MSIZE).unwrap().is_none());
        // Still clean on a repeated call.
        assert!(framer.recv(MSIZE).unwrap().is_none());
    }

    #[test]
    fn send_loops_until_complete() {
        let (stream, mut framer) = pair();
        // A message larger than any single socket buffer write is likely to
        // need several write calls; drain on a second thread.
        let msg = frame(&vec![7u8; 1 << 20]);
        let expect = msg.clone();
        let reader = thread::spawn(move || {
            let mut rx = FdTransport::from(stream);
            rx.recv((1 << 21) as u32).unwrap().unwrap()
        });
        framer.send(&msg).unwrap();
        drop(framer);
        assert_eq!(reader.join().unwrap(), expect);
    }

    fn os_pipe() -> (OwnedFd, OwnedFd) {
        use std::os::fd::FromRawFd;
        let mut fds = [0 as RawFd; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
    }

    #[test]
    fn distinct_descriptors_for_in_and_out() {
        use std::io::Read;

        // One pipe per direction, as an fd-in/fd-out pair.
        let (in_r, in_w) = os_pipe();
        let (out_r, out_w) = os_pipe();
        let mut framer = FdTransport::new(in_r, Some(out_w));

        let msg = frame(b"ping");
        let mut w = std::fs::File::from(in_w);
        w.write_all(&msg).unwrap();
        drop(w);
        assert_eq!(framer.recv(MSIZE).unwrap().unwrap(), msg);
        assert!(framer.recv(MSIZE).unwrap().is_none());

        framer.send(&frame(b"pong")).unwrap();
        // Teardown closes each descriptor exactly once; the reader then
        // observes EOF after the reply.
        drop(framer);
        let mut got = Vec::new();
        std::fs::File::from(out_r).read_to_end(&mut got).unwrap();
        assert_eq!(got, frame(b"pong"));
    }
}
