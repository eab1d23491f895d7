// Circular frame buffer for bounded recording
//
// Keeps the most recent compressed frames in a single fixed-size byte arena.
// Frames are variable length, so eviction is driven by byte overlap rather than
// by count: writing a frame evicts every older frame whose storage it reuses.
// When recording stops the buffer is drained oldest-first into the container.

/// Extra memory on top of `duration * bitrate` to absorb bitrate fluctuation.
pub const BITRATE_HEADROOM: f64 = 1.5;

/// Error type for circular buffer setup
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("Circular buffer needs a non-zero size (got {capacity} bytes, {slots} slots)")]
    ZeroSized { capacity: usize, slots: usize },

    #[error("Failed to allocate circular buffer of {0} bytes")]
    Allocation(usize),
}

/// Sizing for a bounded recording buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPlan {
    pub capacity_bytes: usize,
    pub slot_count: usize,
}

impl BufferPlan {
    /// Size the buffer for `duration_secs` of video plus one keyframe interval,
    /// so that trimming to the first keyframe still leaves the full duration.
    pub fn for_session(duration_secs: f64, iframe_secs: u32, bitrate: u32, fps: u32) -> Self {
        let window = duration_secs + iframe_secs as f64;
        let bytes_per_sec = (bitrate / 8) as f64;
        Self {
            capacity_bytes: (BITRATE_HEADROOM * window * bytes_per_sec) as usize,
            slot_count: (window * fps as f64) as usize,
        }
    }
}

/// Metadata for one stored frame. `offset..offset + size` is its arena range.
#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    offset: usize,
    size: usize,
    timestamp: i64,
    is_keyframe: bool,
}

impl Slot {
    fn overlaps(&self, start: usize, len: usize) -> bool {
        // Empty ranges never collide with anything.
        if self.size == 0 || len == 0 {
            return false;
        }
        start < self.offset + self.size && self.offset < start + len
    }
}

/// Borrowed view of a frame held by the buffer
#[derive(Debug, Clone, Copy)]
pub struct FrameRef<'a> {
    pub data: &'a [u8],
    pub timestamp: i64,
    pub is_keyframe: bool,
}

/// Fixed-capacity ring store for compressed frames
pub struct CircularFrameBuffer {
    arena: Vec<u8>,
    slots: Vec<Slot>,
    /// Next free byte in the arena
    write_offset: usize,
    /// Slot the next frame is recorded in
    write_index: usize,
    /// Oldest live slot
    tail: usize,
    /// Set once the slot table has wrapped; never cleared
    full: bool,
}

impl CircularFrameBuffer {
    pub fn new(capacity_bytes: usize, slot_count: usize) -> Result<Self, BufferError> {
        if capacity_bytes == 0 || slot_count == 0 {
            return Err(BufferError::ZeroSized {
                capacity: capacity_bytes,
                slots: slot_count,
            });
        }

        let mut arena = Vec::new();
        arena
            .try_reserve_exact(capacity_bytes)
            .map_err(|_| BufferError::Allocation(capacity_bytes))?;
        arena.resize(capacity_bytes, 0);

        let mut slots = Vec::new();
        slots
            .try_reserve_exact(slot_count)
            .map_err(|_| BufferError::Allocation(slot_count * std::mem::size_of::<Slot>()))?;
        slots.resize(slot_count, Slot::default());

        log::debug!(
            "Circular buffer allocated: {} bytes, {} slots",
            capacity_bytes,
            slot_count
        );

        Ok(Self {
            arena,
            slots,
            write_offset: 0,
            write_index: 0,
            tail: 0,
            full: false,
        })
    }

    pub fn with_plan(plan: BufferPlan) -> Result<Self, BufferError> {
        Self::new(plan.capacity_bytes, plan.slot_count)
    }

    /// Store a frame, evicting whatever old frames it has to.
    ///
    /// Returns false only when the frame is larger than the whole arena.
    pub fn add_frame(&mut self, data: &[u8], timestamp: i64, is_keyframe: bool) -> bool {
        let size = data.len();
        let capacity = self.arena.len();
        let count = self.slots.len();
        if size > capacity {
            log::warn!(
                "Dropping {} byte frame (pts {}): larger than the {} byte buffer",
                size,
                timestamp,
                capacity
            );
            return false;
        }

        // Older frames that are still live, excluding the slot about to be reused.
        let mut live = self.len();
        let mut dest = self.write_offset;

        if self.full && live > 0 {
            // Advance the tail up front. This always frees one slot for the new
            // frame, even when its storage does not collide with the tail.
            self.tail = (self.tail + 1) % count;
            live -= 1;
        }

        if dest + size > capacity {
            dest = 0;
        }

        // Evict from the tail up to the newest frame the new range collides with.
        let evict = (0..live)
            .rev()
            .find(|&k| self.slots[(self.tail + k) % count].overlaps(dest, size))
            .map(|k| k + 1)
            .unwrap_or(0);
        self.tail = (self.tail + evict) % count;

        self.arena[dest..dest + size].copy_from_slice(data);
        self.slots[self.write_index] = Slot {
            offset: dest,
            size,
            timestamp,
            is_keyframe,
        };
        self.write_offset = dest + size;
        self.write_index = (self.write_index + 1) % count;
        if self.write_index == 0 {
            self.full = true;
        }
        true
    }

    /// Enumerate live frames oldest-first with a caller-owned cursor.
    ///
    /// Start with `cursor = 0`; each call returns the next frame and bumps the
    /// cursor, or `None` once the sequence is exhausted. A fresh cursor restarts
    /// the enumeration.
    pub fn get_frame(&self, cursor: &mut usize) -> Option<FrameRef<'_>> {
        if self.is_empty() {
            return None;
        }
        let index = (self.tail + *cursor) % self.slots.len();
        if *cursor > 0 && (index == self.tail || index == self.write_index) {
            return None;
        }
        let slot = &self.slots[index];
        *cursor += 1;
        Some(FrameRef {
            data: &self.arena[slot.offset..slot.offset + slot.size],
            timestamp: slot.timestamp,
            is_keyframe: slot.is_keyframe,
        })
    }

    /// Iterator over live frames, oldest first
    pub fn frames(&self) -> Frames<'_> {
        Frames {
            buffer: self,
            cursor: 0,
        }
    }

    /// Live frames starting at the first keyframe, with timestamps rebased so
    /// that keyframe sits at zero. Leading inter-frames are skipped because a
    /// decoder cannot start on them.
    pub fn keyframe_aligned(&self) -> KeyframeAligned<'_> {
        KeyframeAligned {
            frames: self.frames(),
            base: None,
            discarded: 0,
        }
    }

    /// Number of live frames
    pub fn len(&self) -> usize {
        let count = self.slots.len();
        if !self.full {
            self.write_index - self.tail
        } else if self.tail == self.write_index {
            count
        } else {
            (self.write_index + count - self.tail) % count
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.full
    }

    pub fn capacity(&self) -> usize {
        self.arena.len()
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Bytes held by live frames
    pub fn bytes_used(&self) -> usize {
        self.frames().map(|f| f.data.len()).sum()
    }

    #[cfg(test)]
    fn live_ranges(&self) -> Vec<(usize, usize)> {
        let count = self.slots.len();
        (0..self.len())
            .map(|k| {
                let slot = &self.slots[(self.tail + k) % count];
                (slot.offset, slot.offset + slot.size)
            })
            .collect()
    }
}

/// Iterator returned by [`CircularFrameBuffer::frames`]
pub struct Frames<'a> {
    buffer: &'a CircularFrameBuffer,
    cursor: usize,
}

impl<'a> Iterator for Frames<'a> {
    type Item = FrameRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.buffer.get_frame(&mut self.cursor)
    }
}

/// Iterator returned by [`CircularFrameBuffer::keyframe_aligned`]
pub struct KeyframeAligned<'a> {
    frames: Frames<'a>,
    base: Option<i64>,
    discarded: usize,
}

impl KeyframeAligned<'_> {
    /// Inter-frames skipped so far while waiting for the first keyframe
    pub fn discarded(&self) -> usize {
        self.discarded
    }
}

impl<'a> Iterator for KeyframeAligned<'a> {
    type Item = FrameRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let frame = self.frames.next()?;
            let base = match self.base {
                Some(base) => base,
                None if frame.is_keyframe => {
                    self.base = Some(frame.timestamp);
                    frame.timestamp
                }
                None => {
                    self.discarded += 1;
                    continue;
                }
            };
            return Some(FrameRef {
                timestamp: frame.timestamp - base,
                ..frame
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timestamps(buffer: &CircularFrameBuffer) -> Vec<i64> {
        buffer.frames().map(|f| f.timestamp).collect()
    }

    fn assert_disjoint(buffer: &CircularFrameBuffer) {
        let ranges = buffer.live_ranges();
        for (i, a) in ranges.iter().enumerate() {
            assert!(a.1 <= buffer.capacity(), "range {:?} escapes the arena", a);
            for b in ranges.iter().skip(i + 1) {
                let collide = a.0 < a.1 && b.0 < b.1 && a.0 < b.1 && b.0 < a.1;
                assert!(!collide, "live ranges {:?} and {:?} overlap", a, b);
            }
        }
    }

    #[test]
    fn rejects_zero_sizes() {
        assert!(CircularFrameBuffer::new(0, 4).is_err());
        assert!(CircularFrameBuffer::new(64, 0).is_err());
    }

    #[test]
    fn empty_buffer_yields_nothing() {
        let buffer = CircularFrameBuffer::new(64, 4).unwrap();
        let mut cursor = 0;
        assert!(buffer.get_frame(&mut cursor).is_none());
        assert_eq!(cursor, 0);
        assert!(buffer.is_empty());
    }

    #[test]
    fn enumerates_oldest_first_before_full() {
        let mut buffer = CircularFrameBuffer::new(100, 8).unwrap();
        for ts in 0..3 {
            assert!(buffer.add_frame(&[ts as u8; 10], ts, ts == 0));
        }
        assert_eq!(timestamps(&buffer), vec![0, 1, 2]);

        let mut cursor = 0;
        let first = buffer.get_frame(&mut cursor).unwrap();
        assert_eq!(first.data, &[0u8; 10]);
        assert!(first.is_keyframe);
        assert_eq!(cursor, 1);
    }

    #[test]
    fn fresh_cursor_restarts_enumeration() {
        let mut buffer = CircularFrameBuffer::new(100, 4).unwrap();
        for ts in 0..6 {
            buffer.add_frame(&[1; 5], ts, false);
        }
        assert_eq!(timestamps(&buffer), timestamps(&buffer));
        assert_eq!(timestamps(&buffer), vec![2, 3, 4, 5]);
    }

    #[test]
    fn wraparound_evicts_overwritten_frames() {
        let mut buffer = CircularFrameBuffer::new(100, 16).unwrap();
        buffer.add_frame(&[1; 60], 0, true);
        buffer.add_frame(&[2; 60], 1, false);
        buffer.add_frame(&[3; 60], 2, false);

        let returned = timestamps(&buffer);
        assert!(!returned.contains(&0));
        assert_eq!(returned, vec![2]);
        assert_eq!(buffer.frames().next().unwrap().data, &[3u8; 60][..]);
        assert_disjoint(&buffer);
    }

    #[test]
    fn steady_state_keeps_slot_count_frames() {
        let mut buffer = CircularFrameBuffer::new(1000, 3).unwrap();
        for ts in 0..10 {
            buffer.add_frame(&[ts as u8; 10], ts, false);
            assert!(buffer.len() <= 3);
        }
        assert!(buffer.is_full());
        assert_eq!(timestamps(&buffer), vec![7, 8, 9]);
    }

    #[test]
    fn single_slot_buffer_holds_latest_frame() {
        let mut buffer = CircularFrameBuffer::new(50, 1).unwrap();
        for ts in 0..4 {
            buffer.add_frame(&[ts as u8; 20], ts, true);
            assert_eq!(timestamps(&buffer), vec![ts]);
        }
    }

    #[test]
    fn full_advances_tail_even_without_overlap() {
        // Once full, every write drops the tail frame up front. If an earlier
        // write already freed a slot through overlap, this costs one extra
        // frame whose bytes were never touched.
        let mut buffer = CircularFrameBuffer::new(100, 4).unwrap();
        buffer.add_frame(&[0; 50], 0, true); // [0, 50)
        buffer.add_frame(&[1; 30], 1, false); // [50, 80)
        buffer.add_frame(&[2; 30], 2, false); // wraps to [0, 30), evicts 0
        buffer.add_frame(&[3; 10], 3, false); // [30, 40), buffer now full
        assert!(buffer.is_full());
        assert_eq!(timestamps(&buffer), vec![1, 2, 3]);

        buffer.add_frame(&[4; 5], 4, false); // [40, 45), overlaps nothing
        assert_eq!(timestamps(&buffer), vec![2, 3, 4]);
        assert_disjoint(&buffer);
    }

    #[test]
    fn wrap_evicts_newer_frames_behind_the_tail() {
        let mut buffer = CircularFrameBuffer::new(100, 8).unwrap();
        buffer.add_frame(&[0; 40], 0, true); // [0, 40)
        buffer.add_frame(&[1; 40], 1, false); // [40, 80)
        buffer.add_frame(&[2; 30], 2, false); // wraps to [0, 30), evicts 0
        buffer.add_frame(&[3; 50], 3, false); // [30, 80), evicts 1
        buffer.add_frame(&[4; 25], 4, false); // wraps to [0, 25), evicts 2
        assert_disjoint(&buffer);
        assert_eq!(timestamps(&buffer), vec![3, 4]);
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut buffer = CircularFrameBuffer::new(32, 4).unwrap();
        buffer.add_frame(&[1; 8], 0, true);
        assert!(!buffer.add_frame(&[2; 33], 1, false));
        assert_eq!(timestamps(&buffer), vec![0]);
    }

    #[test]
    fn live_ranges_stay_disjoint_under_random_writes() {
        let mut buffer = CircularFrameBuffer::new(997, 24).unwrap();
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut was_full = false;
        for ts in 0..5_000 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            let size = (seed % 300) as usize;
            assert!(buffer.add_frame(&vec![ts as u8; size], ts, seed % 7 == 0));
            assert_disjoint(&buffer);

            let stamps = timestamps(&buffer);
            assert!(stamps.windows(2).all(|w| w[0] < w[1]));
            assert_eq!(stamps.last(), Some(&ts));
            assert_eq!(stamps.len(), buffer.len());

            if was_full {
                assert!(buffer.is_full());
            }
            was_full = buffer.is_full();
        }
    }

    #[test]
    fn frames_carry_their_own_bytes() {
        let mut buffer = CircularFrameBuffer::new(64, 8).unwrap();
        for ts in 0..20i64 {
            let size = 3 + (ts as usize % 9);
            buffer.add_frame(&vec![ts as u8; size], ts, false);
            for frame in buffer.frames() {
                assert!(frame.data.iter().all(|&b| b == frame.timestamp as u8));
            }
        }
    }

    #[test]
    fn keyframe_aligned_drops_leading_inter_frames() {
        let mut buffer = CircularFrameBuffer::new(1000, 16).unwrap();
        let pattern = [false, false, true, false, false, true, false];
        for (ts, &key) in pattern.iter().enumerate() {
            buffer.add_frame(&[ts as u8; 4], ts as i64, key);
        }

        let mut aligned = buffer.keyframe_aligned();
        let kept: Vec<(i64, bool)> = aligned
            .by_ref()
            .map(|f| (f.timestamp, f.is_keyframe))
            .collect();
        assert_eq!(
            kept,
            vec![(0, true), (1, false), (2, false), (3, true), (4, false)]
        );
        assert_eq!(aligned.discarded(), 2);
    }

    #[test]
    fn keyframe_aligned_without_keyframe_is_empty() {
        let mut buffer = CircularFrameBuffer::new(100, 4).unwrap();
        buffer.add_frame(&[0; 4], 10, false);
        buffer.add_frame(&[0; 4], 11, false);
        let mut aligned = buffer.keyframe_aligned();
        assert!(aligned.next().is_none());
        assert_eq!(aligned.discarded(), 2);
    }

    #[test]
    fn plan_adds_keyframe_margin_and_headroom() {
        let plan = BufferPlan::for_session(10.0, 2, 8_000_000, 30);
        assert_eq!(plan.slot_count, 360);
        assert_eq!(plan.capacity_bytes, (1.5 * 12.0 * 1_000_000.0) as usize);
        let buffer = CircularFrameBuffer::with_plan(BufferPlan {
            capacity_bytes: 128,
            slot_count: 4,
        })
        .unwrap();
        assert_eq!(buffer.capacity(), 128);
        assert_eq!(buffer.slot_count(), 4);
        assert_eq!(buffer.bytes_used(), 0);
    }
}
