//! One-directional byte copy with deferred-write backpressure (spec.md
//! §4.4 "Deferred flush").
//!
//! Read into a scratch buffer, write it out, and if the writer can't take
//! it all, hold the unwritten remainder until the writer is ready again
//! instead of over-reading — the same shape as a half-duplex proxy copy
//! loop over raw sockets, but holding the remainder in this crate's own
//! [`Buffer`] rather than a freshly-allocated `Vec<u8>`, since `Buffer`
//! already has the prepend/drain machinery the codec needs for the same
//! "put bytes back and try later" pattern.

use futures::{Async, Future, Poll};
use std::io::{self, Read, Write};

use buffer::Buffer;
use host::Host;

const CHUNK: usize = 16 * 1024;

/// Copies bytes read from `reader` into `writer` until `reader` reaches
/// EOF, at which point `writer` is flushed and the future completes with
/// the total byte count. `reader_host`/`writer_host`, if set, get
/// `record_read`/`record_write` called for traffic accounting (spec.md §3).
pub struct HalfDuplex<R, W> {
    reader: R,
    writer: W,
    reader_host: Option<Host>,
    writer_host: Option<Host>,
    pending: Buffer,
    bytes_total: usize,
    should_shutdown: bool,
    chunk: usize,
}

impl<R: Read, W: Write> HalfDuplex<R, W> {
    pub fn new(reader: R, writer: W) -> HalfDuplex<R, W> {
        HalfDuplex {
            reader,
            writer,
            reader_host: None,
            writer_host: None,
            pending: Buffer::new(),
            bytes_total: 0,
            should_shutdown: false,
            chunk: CHUNK,
        }
    }

    pub fn with_hosts(mut self, reader_host: Host, writer_host: Host) -> HalfDuplex<R, W> {
        self.reader_host = Some(reader_host);
        self.writer_host = Some(writer_host);
        self
    }

    /// Overrides the per-read scratch size (spec.md §6's configurable
    /// transfer buffer), falling back to `CHUNK` when never called.
    pub fn with_chunk_size(mut self, size: usize) -> HalfDuplex<R, W> {
        self.chunk = size;
        self
    }

    /// Seeds the write-pending queue with bytes already read from `reader`
    /// before this `HalfDuplex` existed (e.g. a client that started
    /// sending before the upstream connect finished) so they're flushed
    /// to `writer` ahead of anything freshly read, instead of being lost.
    pub fn with_primed_input(mut self, data: Buffer) -> HalfDuplex<R, W> {
        self.pending = data;
        self
    }

    pub fn bytes_total(&self) -> usize {
        self.bytes_total
    }

    /// Drains and writes everything already buffered. Returns `NotReady`
    /// and re-buffers the unwritten remainder if the writer would block.
    fn flush_pending(&mut self) -> Poll<(), io::Error> {
        if self.pending.is_empty() {
            return Ok(Async::Ready(()));
        }
        let n = self.pending.len();
        let chunk = self.pending.drain(n);
        let mut remaining = &chunk[..];
        while !remaining.is_empty() {
            match self.writer.write(remaining) {
                Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned Ok(0)")),
                Ok(wsz) => {
                    self.bytes_total += wsz;
                    if let Some(ref h) = self.writer_host {
                        h.record_write(wsz);
                    }
                    remaining = &remaining[wsz..];
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.pending.append(remaining);
                    return Ok(Async::NotReady);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(Async::Ready(()))
    }
}

impl<R: Read, W: Write> Future for HalfDuplex<R, W> {
    type Item = usize;
    type Error = io::Error;

    fn poll(&mut self) -> Poll<usize, io::Error> {
        if self.should_shutdown {
            try_nb!(self.writer.flush());
            return Ok(Async::Ready(self.bytes_total));
        }

        if let Async::NotReady = self.flush_pending()? {
            return Ok(Async::NotReady);
        }

        let mut scratch = vec![0u8; self.chunk];
        loop {
            debug_assert!(self.pending.is_empty());
            let rsz = try_nb!(self.reader.read(&mut scratch));
            if let Some(ref h) = self.reader_host {
                h.record_read(rsz);
            }
            if rsz == 0 {
                self.should_shutdown = true;
                try_nb!(self.writer.flush());
                return Ok(Async::Ready(self.bytes_total));
            }
            self.pending.append(&scratch[..rsz]);
            if let Async::NotReady = self.flush_pending()? {
                return Ok(Async::NotReady);
            }
        }
    }
}

/// Runs both directions of a proxied connection to completion: polls both
/// halves every tick, finishing once both report `Ready`.
pub struct Duplex<R1, W1, R2, W2> {
    up: HalfDuplex<R1, W1>,
    down: HalfDuplex<R2, W2>,
    up_done: Option<usize>,
    down_done: Option<usize>,
}

impl<R1: Read, W1: Write, R2: Read, W2: Write> Duplex<R1, W1, R2, W2> {
    pub fn new(up: HalfDuplex<R1, W1>, down: HalfDuplex<R2, W2>) -> Duplex<R1, W1, R2, W2> {
        Duplex { up, down, up_done: None, down_done: None }
    }
}

impl<R1: Read, W1: Write, R2: Read, W2: Write> Future for Duplex<R1, W1, R2, W2> {
    /// `(bytes copied downstream->upstream, bytes copied upstream->downstream)`.
    type Item = (usize, usize);
    type Error = io::Error;

    fn poll(&mut self) -> Poll<(usize, usize), io::Error> {
        if self.up_done.is_none() {
            if let Async::Ready(n) = self.up.poll()? {
                self.up_done = Some(n);
            }
        }
        if self.down_done.is_none() {
            if let Async::Ready(n) = self.down.poll()? {
                self.down_done = Some(n);
            }
        }
        match (self.up_done, self.down_done) {
            (Some(u), Some(d)) => Ok(Async::Ready((u, d))),
            _ => Ok(Async::NotReady),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::HalfDuplex;
    use futures::Future;
    use std::io::{self, Cursor, Read, Write};

    struct Collector(Vec<u8>);
    impl Write for Collector {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn copies_all_bytes_to_eof() {
        let reader = Cursor::new(b"hello world".to_vec());
        let writer = Collector(Vec::new());
        let mut hd = HalfDuplex::new(reader, writer);
        let total = hd.poll().unwrap();
        assert_eq!(total, ::futures::Async::Ready(11));
        assert_eq!(hd.writer.0, b"hello world");
    }

    struct BlockOnce {
        blocked: bool,
        out: Vec<u8>,
    }
    impl Write for BlockOnce {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if !self.blocked {
                self.blocked = true;
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "would block"));
            }
            self.out.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn requeues_unwritten_bytes_on_would_block() {
        let reader = Cursor::new(b"abc".to_vec());
        let writer = BlockOnce { blocked: false, out: Vec::new() };
        let mut hd = HalfDuplex::new(reader, writer);
        assert!(hd.poll().unwrap().is_not_ready());
        assert_eq!(hd.pending.len(), 3);
        let total = hd.poll().unwrap();
        assert_eq!(total, ::futures::Async::Ready(3));
        assert_eq!(hd.writer.out, b"abc");
    }
}
