// Pixel readback
//
// Rendered frames are copied back from the GPU through a small ring of pixel
// buffers. With async readback the copy for frame N is only mapped once
// frame N + depth - 1 has been issued, so the CPU never waits on the GPU.
// Sources without async readback use a single slot that is mapped right away.

/// Slots used when the source supports asynchronous readback
pub const ASYNC_DEPTH: usize = 3;

/// Error type for pixel sources
#[derive(Debug, thiserror::Error)]
pub enum ReadbackError {
    #[error("Failed to prepare capture resources: {0}")]
    Prepare(String),

    #[error("Readback failed: {0}")]
    Readback(String),

    #[error("Readback slot {slot} out of range (depth {depth})")]
    Slot { slot: usize, depth: usize },
}

pub type Result<T> = std::result::Result<T, ReadbackError>;

/// What to capture and at which size
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureTarget {
    /// Opaque render target handle owned by the host
    pub texture: u64,
    pub width: u32,
    pub height: u32,
    pub x_scale: f64,
    pub y_scale: f64,
}

/// Host capability that turns the render target into I420 bytes
pub trait PixelSource: Send {
    /// Whether readbacks complete asynchronously (pixel buffer objects)
    fn supports_async_readback(&self) -> bool;

    /// Create `depth` readback targets for `target`.
    fn prepare(&mut self, target: &CaptureTarget, depth: usize) -> Result<()>;

    /// Start copying the current frame into `slot`.
    fn begin_readback(&mut self, slot: usize) -> Result<()>;

    /// Bytes of a finished readback: I420, `width * height * 3 / 2` long.
    fn map(&mut self, slot: usize) -> Result<&[u8]>;

    /// Drop resources created by `prepare`.
    fn release(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    PendingReadback,
    ReadyToMap,
}

/// Rotation over the readback slots
#[derive(Debug)]
pub struct ReadbackPipeline {
    slots: Vec<SlotState>,
    index: usize,
    issued: u64,
}

impl ReadbackPipeline {
    pub fn new(depth: usize) -> Self {
        Self {
            slots: vec![SlotState::Idle; depth.max(1)],
            index: 0,
            issued: 0,
        }
    }

    pub fn depth_for<S: PixelSource + ?Sized>(source: &S) -> usize {
        if source.supports_async_readback() {
            ASYNC_DEPTH
        } else {
            1
        }
    }

    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    pub fn slot_state(&self, slot: usize) -> Option<SlotState> {
        self.slots.get(slot).copied()
    }

    /// Issue a readback into the current slot and rotate.
    ///
    /// Returns the slot whose readback is ready to map (issued `depth - 1`
    /// frames ago), once enough frames are in flight.
    pub fn advance<S: PixelSource + ?Sized>(&mut self, source: &mut S) -> Result<Option<usize>> {
        let depth = self.slots.len();
        source.begin_readback(self.index)?;
        self.slots[self.index] = SlotState::PendingReadback;
        self.issued += 1;

        let ready = if self.issued >= depth as u64 {
            let oldest = (self.index + 1) % depth;
            self.slots[oldest] = SlotState::ReadyToMap;
            Some(oldest)
        } else {
            None
        };
        self.index = (self.index + 1) % depth;
        Ok(ready)
    }

    /// Mark a mapped slot as consumed.
    pub fn release(&mut self, slot: usize) {
        if let Some(state) = self.slots.get_mut(slot) {
            *state = SlotState::Idle;
        }
    }

    /// Slots with readbacks still outstanding, oldest first. They are marked
    /// ready so the caller can map and encode them.
    pub fn drain_pending(&mut self) -> Vec<usize> {
        let depth = self.slots.len();
        let pending: Vec<usize> = (0..depth)
            .map(|k| (self.index + k) % depth)
            .filter(|&slot| self.slots[slot] == SlotState::PendingReadback)
            .collect();
        for &slot in &pending {
            self.slots[slot] = SlotState::ReadyToMap;
        }
        pending
    }
}

/// CPU-rendered moving test pattern
///
/// Stands in for a GPU render target in the CLI and in tests. Each readback
/// renders the next frame of a scrolling gradient into the slot.
pub struct TestPatternSource {
    async_readback: bool,
    width: usize,
    height: usize,
    slots: Vec<Vec<u8>>,
    frame: u64,
}

impl TestPatternSource {
    pub fn new(async_readback: bool) -> Self {
        Self {
            async_readback,
            width: 0,
            height: 0,
            slots: Vec::new(),
            frame: 0,
        }
    }

    fn render(&self, out: &mut [u8]) {
        let (w, h) = (self.width, self.height);
        let shift = (self.frame * 4) as usize;
        let (luma, chroma) = out.split_at_mut(w * h);
        for y in 0..h {
            for x in 0..w {
                luma[y * w + x] = ((x + y + shift) & 0xFF) as u8;
            }
        }
        let bar = (self.frame as usize * 2) % (w / 2).max(1);
        let (u, v) = chroma.split_at_mut(w * h / 4);
        for y in 0..h / 2 {
            for x in 0..w / 2 {
                let i = y * (w / 2) + x;
                let on_bar = x.abs_diff(bar) < 4;
                u[i] = if on_bar { 0x40 } else { 0x80 };
                v[i] = if on_bar { 0xC0 } else { 0x80 };
            }
        }
    }
}

impl PixelSource for TestPatternSource {
    fn supports_async_readback(&self) -> bool {
        self.async_readback
    }

    fn prepare(&mut self, target: &CaptureTarget, depth: usize) -> Result<()> {
        if target.width == 0 || target.height == 0 {
            return Err(ReadbackError::Prepare(format!(
                "empty target {}x{}",
                target.width, target.height
            )));
        }
        self.width = target.width as usize;
        self.height = target.height as usize;
        let size = self.width * self.height * 3 / 2;
        self.slots = (0..depth).map(|_| vec![0u8; size]).collect();
        self.frame = 0;
        log::debug!(
            "Test pattern prepared: {}x{}, {} slot(s)",
            self.width,
            self.height,
            depth
        );
        Ok(())
    }

    fn begin_readback(&mut self, slot: usize) -> Result<()> {
        let depth = self.slots.len();
        let mut out = std::mem::take(
            self.slots
                .get_mut(slot)
                .ok_or(ReadbackError::Slot { slot, depth })?,
        );
        self.render(&mut out);
        self.slots[slot] = out;
        self.frame += 1;
        Ok(())
    }

    fn map(&mut self, slot: usize) -> Result<&[u8]> {
        let depth = self.slots.len();
        self.slots
            .get(slot)
            .map(Vec::as_slice)
            .ok_or(ReadbackError::Slot { slot, depth })
    }

    fn release(&mut self) {
        self.slots.clear();
    }
}
