//! Gap-aware reassembly buffer for ordered byte streams.

use crate::types::StreamOffset;
use bytes::{Bytes, BytesMut};
use std::collections::BTreeMap;

/// Offset-indexed buffer that accepts byte ranges in any order and
/// yields the contiguous prefix.
///
/// Stored ranges are pairwise disjoint and all start at or above
/// `read_offset`; on overlap the earliest-seen copy of a byte wins
/// (the stream is append-only authoritative, so identical offsets
/// carry identical bytes and dropping later copies is safe).
///
/// Adjacent ranges are not physically merged; reads and
/// [`contiguous_available`](Self::contiguous_available) treat touching
/// ranges as one span, which keeps every stored range a zero-copy
/// slice of the frame it arrived in.
#[derive(Debug, Default)]
pub struct OrderedByteBuffer {
    /// Disjoint ranges, keyed by start offset.
    chunks: BTreeMap<StreamOffset, Bytes>,

    /// Next byte the consumer has not yet seen.
    read_offset: StreamOffset,

    /// Total bytes currently stored.
    buffered: usize,
}

impl OrderedByteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `data` at `[offset, offset + data.len())`.
    ///
    /// Bytes below `read_offset` and bytes already present are
    /// discarded; duplicate, overlapping and out-of-order insertions
    /// are all tolerated.
    pub fn insert(&mut self, offset: StreamOffset, data: Bytes) {
        let mut offset = offset;
        let mut data = data;
        let end = offset + data.len() as u64;

        if data.is_empty() || end <= self.read_offset {
            return;
        }
        if offset < self.read_offset {
            data = data.slice((self.read_offset - offset) as usize..);
            offset = self.read_offset;
        }

        // Trim against the stored range starting at or before `offset`.
        if let Some((&start, chunk)) = self.chunks.range(..=offset).next_back() {
            let chunk_end = start + chunk.len() as u64;
            if chunk_end >= end {
                return;
            }
            if chunk_end > offset {
                data = data.slice((chunk_end - offset) as usize..);
                offset = chunk_end;
            }
        }

        // Fill the gaps around stored ranges that overlap [offset, end).
        loop {
            let next = self
                .chunks
                .range(offset..)
                .next()
                .map(|(&start, chunk)| (start, start + chunk.len() as u64));
            match next {
                Some((start, chunk_end)) if start < end => {
                    if start > offset {
                        let piece = data.slice(..(start - offset) as usize);
                        self.buffered += piece.len();
                        self.chunks.insert(offset, piece);
                    }
                    if chunk_end >= end {
                        return;
                    }
                    data = data.slice((chunk_end - offset) as usize..);
                    offset = chunk_end;
                }
                _ => {
                    self.buffered += data.len();
                    self.chunks.insert(offset, data);
                    return;
                }
            }
        }
    }

    /// Length of the contiguous prefix starting at `read_offset`.
    pub fn contiguous_available(&self) -> u64 {
        let mut pos = self.read_offset;
        for (&start, chunk) in self.chunks.range(self.read_offset..) {
            if start != pos {
                break;
            }
            pos += chunk.len() as u64;
        }
        pos - self.read_offset
    }

    /// Copy up to `out.len()` bytes of the contiguous prefix into
    /// `out` without consuming them. Returns the number of bytes
    /// copied.
    pub fn peek(&self, out: &mut [u8]) -> usize {
        let mut copied = 0;
        let mut pos = self.read_offset;
        for (&start, chunk) in self.chunks.range(self.read_offset..) {
            if start != pos || copied == out.len() {
                break;
            }
            let n = chunk.len().min(out.len() - copied);
            out[copied..copied + n].copy_from_slice(&chunk[..n]);
            copied += n;
            pos += chunk.len() as u64;
        }
        copied
    }

    /// Consume up to `max_len` bytes of the contiguous prefix,
    /// advancing `read_offset` and freeing their storage.
    ///
    /// Returns empty bytes if nothing is present at `read_offset`.
    pub fn read_contiguous(&mut self, max_len: usize) -> Bytes {
        let mut first: Option<Bytes> = None;
        let mut assembled: Option<BytesMut> = None;
        let mut remaining = max_len;

        while remaining > 0 {
            let Some(chunk) = self.chunks.remove(&self.read_offset) else {
                break;
            };
            let take = chunk.len().min(remaining);
            if take < chunk.len() {
                self.chunks
                    .insert(self.read_offset + take as u64, chunk.slice(take..));
            }
            let piece = chunk.slice(..take);
            self.read_offset += take as u64;
            self.buffered -= take;
            remaining -= take;

            match (&mut assembled, &first) {
                (Some(buf), _) => buf.extend_from_slice(&piece),
                (None, Some(prev)) => {
                    let mut buf = BytesMut::with_capacity(prev.len() + piece.len());
                    buf.extend_from_slice(prev);
                    buf.extend_from_slice(&piece);
                    assembled = Some(buf);
                }
                (None, None) => first = Some(piece),
            }
        }

        match assembled {
            Some(buf) => buf.freeze(),
            None => first.unwrap_or_else(Bytes::new),
        }
    }

    /// Next byte the consumer has not yet seen.
    pub fn read_offset(&self) -> StreamOffset {
        self.read_offset
    }

    /// Total bytes currently stored, contiguous or not.
    pub fn buffered_bytes(&self) -> usize {
        self.buffered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn b(s: &'static [u8]) -> Bytes {
        Bytes::from_static(s)
    }

    // ========================================================================
    // Basic insert/read behavior
    // ========================================================================

    #[test]
    fn test_empty_buffer() {
        let mut buf = OrderedByteBuffer::new();
        assert_eq!(buf.contiguous_available(), 0);
        assert_eq!(buf.read_contiguous(100), Bytes::new());
        assert_eq!(buf.read_offset(), 0);
    }

    #[test]
    fn test_in_order_insert_and_read() {
        let mut buf = OrderedByteBuffer::new();
        buf.insert(0, b(b"hello"));
        buf.insert(5, b(b" world"));

        assert_eq!(buf.contiguous_available(), 11);
        assert_eq!(&buf.read_contiguous(usize::MAX)[..], b"hello world");
        assert_eq!(buf.read_offset(), 11);
        assert_eq!(buf.buffered_bytes(), 0);
    }

    #[test]
    fn test_out_of_order_hole_then_fill() {
        let mut buf = OrderedByteBuffer::new();
        buf.insert(5, b(b"world"));
        assert_eq!(buf.contiguous_available(), 0);
        assert_eq!(buf.read_contiguous(100), Bytes::new());

        buf.insert(0, b(b"hello"));
        assert_eq!(buf.contiguous_available(), 10);
        assert_eq!(&buf.read_contiguous(100)[..], b"helloworld");
    }

    #[test]
    fn test_read_limit_splits_range() {
        let mut buf = OrderedByteBuffer::new();
        buf.insert(0, b(b"hello world"));

        assert_eq!(&buf.read_contiguous(5)[..], b"hello");
        assert_eq!(buf.read_offset(), 5);
        assert_eq!(buf.buffered_bytes(), 6);

        assert_eq!(&buf.read_contiguous(100)[..], b" world");
        assert_eq!(buf.read_offset(), 11);
    }

    #[test]
    fn test_duplicate_insert_is_idempotent() {
        let mut buf = OrderedByteBuffer::new();
        buf.insert(0, b(b"hello"));
        buf.insert(0, b(b"hello"));

        assert_eq!(buf.buffered_bytes(), 5);
        assert_eq!(&buf.read_contiguous(100)[..], b"hello");
    }

    #[test]
    fn test_overlap_keeps_earliest_copy() {
        let mut buf = OrderedByteBuffer::new();
        buf.insert(2, b(b"cde"));
        // Overlaps [2, 5) on both sides; only the gaps are taken
        buf.insert(0, b(b"ABCDEFG"));

        assert_eq!(&buf.read_contiguous(100)[..], b"ABcdeFG");
    }

    #[test]
    fn test_insert_below_read_offset_ignored() {
        let mut buf = OrderedByteBuffer::new();
        buf.insert(0, b(b"hello"));
        buf.read_contiguous(5);

        // Entirely consumed already
        buf.insert(0, b(b"hello"));
        assert_eq!(buf.buffered_bytes(), 0);

        // Straddles read_offset: only the tail is kept
        buf.insert(3, b(b"loXY"));
        assert_eq!(buf.buffered_bytes(), 2);
        assert_eq!(&buf.read_contiguous(100)[..], b"XY");
    }

    #[test]
    fn test_insert_contained_in_existing_range() {
        let mut buf = OrderedByteBuffer::new();
        buf.insert(0, b(b"abcdefgh"));
        buf.insert(2, b(b"cde"));

        assert_eq!(buf.buffered_bytes(), 8);
        assert_eq!(&buf.read_contiguous(100)[..], b"abcdefgh");
    }

    #[test]
    fn test_insert_spanning_multiple_ranges() {
        let mut buf = OrderedByteBuffer::new();
        buf.insert(2, b(b"cd"));
        buf.insert(6, b(b"gh"));
        buf.insert(0, b(b"abcdefghij"));

        assert_eq!(buf.contiguous_available(), 10);
        assert_eq!(&buf.read_contiguous(100)[..], b"abcdefghij");
    }

    #[test]
    fn test_empty_insert_is_noop() {
        let mut buf = OrderedByteBuffer::new();
        buf.insert(3, Bytes::new());
        assert_eq!(buf.buffered_bytes(), 0);
        assert_eq!(buf.contiguous_available(), 0);
    }

    #[test]
    fn test_peek_does_not_consume() {
        let mut buf = OrderedByteBuffer::new();
        buf.insert(0, b(b"ab"));
        buf.insert(2, b(b"cdef"));

        let mut header = [0u8; 4];
        assert_eq!(buf.peek(&mut header), 4);
        assert_eq!(&header, b"abcd");
        assert_eq!(buf.read_offset(), 0);
        assert_eq!(buf.contiguous_available(), 6);
    }

    #[test]
    fn test_peek_stops_at_gap() {
        let mut buf = OrderedByteBuffer::new();
        buf.insert(0, b(b"ab"));
        buf.insert(5, b(b"xyz"));

        let mut out = [0u8; 4];
        assert_eq!(buf.peek(&mut out), 2);
        assert_eq!(&out[..2], b"ab");
    }

    // ========================================================================
    // Properties
    // ========================================================================

    /// Split `data` into fragments at the given cut points, then
    /// duplicate and reorder per `order` indices.
    fn fragments(
        data: &[u8],
        cuts: &[usize],
        order: &[usize],
    ) -> Vec<(u64, Bytes)> {
        let mut bounds = vec![0usize, data.len()];
        bounds.extend(cuts.iter().map(|c| c % (data.len() + 1)));
        bounds.sort_unstable();
        bounds.dedup();

        let pieces: Vec<(u64, Bytes)> = bounds
            .windows(2)
            .map(|w| (w[0] as u64, Bytes::copy_from_slice(&data[w[0]..w[1]])))
            .collect();

        order
            .iter()
            .map(|&i| pieces[i % pieces.len()].clone())
            .chain(pieces.iter().cloned())
            .collect()
    }

    proptest! {
        /// Any segmentation with duplicates, applied in any order,
        /// reassembles into the original stream.
        #[test]
        fn prop_reassembly_matches_source(
            data in proptest::collection::vec(any::<u8>(), 1..200),
            cuts in proptest::collection::vec(any::<usize>(), 0..8),
            order in proptest::collection::vec(any::<usize>(), 0..8),
        ) {
            let mut buf = OrderedByteBuffer::new();
            for (offset, piece) in fragments(&data, &cuts, &order) {
                buf.insert(offset, piece);
            }
            prop_assert_eq!(buf.contiguous_available(), data.len() as u64);
            prop_assert_eq!(&buf.read_contiguous(usize::MAX)[..], &data[..]);
            prop_assert_eq!(buf.buffered_bytes(), 0);
        }

        /// The buffer never stores data below its read cursor, and the
        /// byte count is consistent with what reads return.
        #[test]
        fn prop_prefix_consumption(
            data in proptest::collection::vec(any::<u8>(), 1..200),
            cuts in proptest::collection::vec(any::<usize>(), 0..8),
            order in proptest::collection::vec(any::<usize>(), 0..8),
            read_len in 1usize..64,
        ) {
            let mut buf = OrderedByteBuffer::new();
            let mut consumed = Vec::new();
            for (offset, piece) in fragments(&data, &cuts, &order) {
                buf.insert(offset, piece);
                let chunk = buf.read_contiguous(read_len);
                consumed.extend_from_slice(&chunk);
            }
            loop {
                let chunk = buf.read_contiguous(read_len);
                if chunk.is_empty() {
                    break;
                }
                consumed.extend_from_slice(&chunk);
            }
            prop_assert_eq!(&consumed[..], &data[..]);
        }
    }
}
