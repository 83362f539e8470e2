//! An opaque byte queue with O(1) prepend/drain.
//!
//! Backed by a deque of `bytes::Bytes` fragments rather than one flat
//! `Vec<u8>`, the way a dispatch/channel queue uses a `VecDeque<T>` to get
//! O(1) push/pop at both ends instead of shifting a contiguous buffer.
//! `bytes::Bytes` gives cheap (refcounted) splitting so draining a fragment
//! boundary never copies.
//!
//! The codec needs to *look at* bytes before consuming them, so
//! [`Buffer::peek`] exposes a contiguous view of the first `n` bytes,
//! merging leading fragments on demand. Merges only happen when a read
//! spans a fragment boundary; the steady-state single-fragment case never
//! copies.

use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;

#[derive(Default)]
pub struct Buffer {
    fragments: VecDeque<Bytes>,
    len: usize,
    undo_log: Option<Vec<Bytes>>,
}

impl Buffer {
    pub fn new() -> Buffer {
        Buffer {
            fragments: VecDeque::new(),
            len: 0,
            undo_log: None,
        }
    }

    /// Starts recording every `drain` so a failed multi-step read (a
    /// Thrift message spanning several `Protocol` calls, say) can be
    /// rolled back as a unit instead of leaving the queue partially
    /// consumed. Transactions don't nest.
    pub fn begin_transaction(&mut self) {
        debug_assert!(self.undo_log.is_none(), "nested Buffer transactions are not supported");
        self.undo_log = Some(Vec::new());
    }

    /// Discards the undo log, keeping every drain made since
    /// `begin_transaction`.
    pub fn commit(&mut self) {
        self.undo_log = None;
    }

    /// Restores every byte drained since `begin_transaction`, in original
    /// order, leaving the queue exactly as it was before the transaction
    /// began.
    pub fn rollback(&mut self) {
        if let Some(log) = self.undo_log.take() {
            for fragment in log.into_iter().rev() {
                if !fragment.is_empty() {
                    self.len += fragment.len();
                    self.fragments.push_front(fragment);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends bytes to the back of the queue. O(1) amortized.
    pub fn append(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.append_bytes(Bytes::from(data));
    }

    /// Appends an already-owned `Bytes` without copying. O(1).
    pub fn append_bytes(&mut self, data: Bytes) {
        if data.is_empty() {
            return;
        }
        self.len += data.len();
        self.fragments.push_back(data);
    }

    /// Pushes bytes onto the front of the queue. O(1).
    ///
    /// Used by the codec to restore look-ahead bytes that turned out not to
    /// belong to the frame being decoded, and by the proxy filter to
    /// re-queue a write that a peer couldn't accept in one go.
    pub fn prepend(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.len += data.len();
        self.fragments.push_front(Bytes::from(data));
    }

    /// Removes and returns the first `n` bytes. Panics if `n > self.len()`.
    ///
    /// O(1) when the drain is satisfied by (a prefix of) the front
    /// fragment; falls back to a single copy when it spans fragments.
    pub fn drain(&mut self, n: usize) -> Bytes {
        assert!(n <= self.len, "drain past end of buffer");
        if n == 0 {
            return Bytes::new();
        }

        // Fast path: the whole request is satisfied by the front fragment.
        if let Some(front) = self.fragments.front() {
            if front.len() >= n {
                let front = self.fragments.front_mut().unwrap();
                let out = front.split_to(n);
                if front.is_empty() {
                    self.fragments.pop_front();
                }
                self.len -= n;
                self.record(&out);
                return out;
            }
        }

        // Slow path: splice across fragment boundaries.
        let mut out = BytesMut::with_capacity(n);
        let mut remaining = n;
        while remaining > 0 {
            let mut front = self.fragments.pop_front().expect("buffer underrun");
            if front.len() <= remaining {
                remaining -= front.len();
                out.extend_from_slice(&front);
            } else {
                let tail = front.split_off(remaining);
                out.extend_from_slice(&front);
                self.fragments.push_front(tail);
                remaining = 0;
            }
        }
        self.len -= n;
        let out = out.freeze();
        self.record(&out);
        out
    }

    fn record(&mut self, drained: &Bytes) {
        if let Some(ref mut log) = self.undo_log {
            log.push(drained.clone());
        }
    }

    /// Discards the first `n` bytes without returning them.
    pub fn advance(&mut self, n: usize) {
        self.drain(n);
    }

    /// Returns a contiguous view of the first `n` bytes, merging leading
    /// fragments as needed. Returns `None` if fewer than `n` bytes are
    /// buffered.
    pub fn peek(&mut self, n: usize) -> Option<&[u8]> {
        if n > self.len {
            return None;
        }
        if n == 0 {
            return Some(&[]);
        }
        self.linearize_front(n);
        Some(&self.fragments.front().unwrap()[..n])
    }

    /// Ensures the front fragment alone holds at least `n` bytes, merging
    /// subsequent fragments into it if necessary.
    fn linearize_front(&mut self, n: usize) {
        if self.fragments.front().map(|f| f.len()).unwrap_or(0) >= n {
            return;
        }
        let mut merged = BytesMut::with_capacity(n);
        while merged.len() < n {
            let frag = self.fragments.pop_front().expect("buffer underrun");
            merged.extend_from_slice(&frag);
        }
        let merged = merged.freeze();
        self.fragments.push_front(merged);
    }
}

#[cfg(test)]
mod tests {
    use super::Buffer;

    #[test]
    fn append_and_drain_round_trip() {
        let mut b = Buffer::new();
        b.append(b"hello ");
        b.append(b"world");
        assert_eq!(b.len(), 11);
        assert_eq!(&b.drain(5)[..], b"hello");
        assert_eq!(b.len(), 6);
        assert_eq!(&b.drain(6)[..], b" world");
        assert_eq!(b.len(), 0);
    }

    #[test]
    fn drain_spans_fragments() {
        let mut b = Buffer::new();
        b.append(b"ab");
        b.append(b"cd");
        b.append(b"ef");
        assert_eq!(&b.drain(5)[..], b"abcde");
        assert_eq!(&b.drain(1)[..], b"f");
    }

    #[test]
    fn peek_does_not_consume() {
        let mut b = Buffer::new();
        b.append(b"ab");
        b.append(b"cdef");
        assert_eq!(b.peek(5), Some(&b"abcde"[..]));
        assert_eq!(b.len(), 6);
        b.advance(3);
        assert_eq!(b.peek(3), Some(&b"def"[..]));
    }

    #[test]
    fn peek_past_end_returns_none() {
        let mut b = Buffer::new();
        b.append(b"ab");
        assert_eq!(b.peek(3), None);
        assert_eq!(b.len(), 2);
    }

    #[test]
    fn prepend_puts_bytes_back_in_front() {
        let mut b = Buffer::new();
        b.append(b"world");
        b.prepend(b"hello ");
        assert_eq!(&b.drain(11)[..], b"hello world");
    }

    #[test]
    fn rollback_restores_drained_bytes_in_order() {
        let mut b = Buffer::new();
        b.append(b"abcdef");
        b.begin_transaction();
        let _ = b.drain(2);
        let _ = b.drain(2);
        assert_eq!(b.len(), 2);
        b.rollback();
        assert_eq!(b.len(), 6);
        assert_eq!(&b.drain(6)[..], b"abcdef");
    }

    #[test]
    fn commit_keeps_drained_bytes_gone() {
        let mut b = Buffer::new();
        b.append(b"abcdef");
        b.begin_transaction();
        let _ = b.drain(3);
        b.commit();
        assert_eq!(b.len(), 3);
        assert_eq!(&b.drain(3)[..], b"def");
    }
}
