//! The output buffer recycler: pipeline wrappers for hardware-owned
//! picture buffers.
//!
//! The hardware allocator owns the physical memory and hands the same
//! buffers back over and over, identified by file-descriptor pair. The pool
//! wraps each distinct physical buffer exactly once ([`PipelineBuffer`]) and
//! keeps the wrapper for the life of the pool. Buffers are recycled, never
//! destroyed, because destroying a wrapper while the hardware still owns the
//! memory would tear the mapping out from under a later decode.
//!
//! Warm-up pre-allocations that never touch the hardware path are tagged
//! [`BufferOrigin::Untracked`] and recycle through a free queue instead of
//! the hardware free path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};

use veldec_common::{DecodeError, PixelFormat, Resolution};

use crate::buffer::HandleKey;
use crate::modifier::ModifierProvider;
use crate::session::DecodeSession;

// ---------------------------------------------------------------------------
// Negotiated output format
// ---------------------------------------------------------------------------

/// The format negotiated with the downstream consumer; the metadata source
/// for every wrapper the pool constructs.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputFormat {
    pub geometry: Resolution,
    pub pixel_format: PixelFormat,
    /// Planes carried in the vendor's bandwidth-compressed tiling.
    pub compressed: bool,
    /// Downstream imports buffers by handle instead of copying.
    pub zero_copy: bool,
}

/// Row stride of the primary plane for a negotiated format.
///
/// The hardware writes rows padded to its burst alignment; compressed
/// layouts pad further to the tile width.
pub fn stride_for(format: &OutputFormat) -> u32 {
    let align = if format.compressed { 256 } else { 128 };
    let bytes_per_pixel = match format.pixel_format {
        PixelFormat::Nv12 => 1,
        PixelFormat::P010 => 2,
    };
    (format.geometry.width * bytes_per_pixel).div_ceil(align) * align
}

// ---------------------------------------------------------------------------
// Pipeline buffer
// ---------------------------------------------------------------------------

/// Where a wrapper came from, and therefore where it goes on release.
#[derive(Debug)]
pub enum BufferOrigin {
    /// Backed by hardware memory; release frees the session's retained
    /// reference under the sequence index current at release time.
    Tracked { index: AtomicU64 },
    /// Pool warm-up placeholder; recycles through the free queue and must
    /// never trigger a hardware free.
    Untracked,
}

/// The pipeline-native wrapper around one physical output buffer.
///
/// At most one wrapper exists per distinct physical buffer; the pool updates
/// the stored sequence index when the hardware reuses the buffer for a new
/// decode.
#[derive(Debug)]
pub struct PipelineBuffer {
    key: Option<HandleKey>,
    geometry: Resolution,
    stride: u32,
    /// Physical-layout modifier for consumers that understand the
    /// compressed tiling; absent when no modifier module is loaded.
    modifier: Option<u64>,
    origin: BufferOrigin,
}

impl PipelineBuffer {
    pub fn key(&self) -> Option<HandleKey> {
        self.key
    }

    pub fn geometry(&self) -> Resolution {
        self.geometry
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn modifier(&self) -> Option<u64> {
        self.modifier
    }

    pub fn is_tracked(&self) -> bool {
        matches!(self.origin, BufferOrigin::Tracked { .. })
    }

    /// Sequence index of the most recent decode into this buffer.
    pub fn current_index(&self) -> Option<u64> {
        match &self.origin {
            BufferOrigin::Tracked { index } => Some(index.load(Ordering::Acquire)),
            BufferOrigin::Untracked => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Output buffer pool
// ---------------------------------------------------------------------------

/// Pipeline-visible allocator deduplicating wrappers by handle key and
/// plumbing release events back into the session.
pub struct OutputBufferPool {
    session: Arc<DecodeSession>,
    modifier: Option<Arc<dyn ModifierProvider>>,
}

impl OutputBufferPool {
    pub fn new(session: Arc<DecodeSession>, modifier: Option<Arc<dyn ModifierProvider>>) -> Self {
        Self { session, modifier }
    }

    /// Record the negotiated output format used for wrapper metadata.
    /// Called at start and again on every renegotiation.
    pub fn set_format(&self, format: OutputFormat) {
        self.session.shared().inner.lock().out_format = Some(format);
    }

    pub fn current_format(&self) -> Option<OutputFormat> {
        self.session.shared().inner.lock().out_format.clone()
    }

    /// Look up or construct the wrapper for a physical buffer.
    ///
    /// A hit updates the stored sequence index (the hardware is reusing the
    /// buffer for a new decode) and returns the existing wrapper. A miss
    /// constructs the wrapper with metadata from the negotiated format and
    /// inserts it; the entry then lives until pool teardown.
    pub fn acquire(&self, key: HandleKey, index: u64) -> Result<Arc<PipelineBuffer>, DecodeError> {
        let shared = self.session.shared();
        let mut inner = shared.inner.lock();

        if let Some(existing) = inner.table.get(&key) {
            if let BufferOrigin::Tracked { index: stored } = &existing.origin {
                stored.store(index, Ordering::Release);
            }
            trace!(%key, index, "wrapper reused");
            return Ok(existing.clone());
        }

        let format = inner.out_format.clone().ok_or_else(|| {
            DecodeError::InvalidState("output buffer seen before format negotiation".into())
        })?;
        let modifier = self.modifier.as_ref().and_then(|m| m.modifier_for(key));
        let buffer = Arc::new(PipelineBuffer {
            key: Some(key),
            geometry: format.geometry,
            stride: stride_for(&format),
            modifier,
            origin: BufferOrigin::Tracked {
                index: AtomicU64::new(index),
            },
        });
        inner.table.insert(key, buffer.clone());
        debug!(%key, index, total = inner.table.len(), "wrapper constructed");
        Ok(buffer)
    }

    /// Hand a buffer back once downstream is done with it.
    pub fn release(&self, buffer: &Arc<PipelineBuffer>) -> Result<(), DecodeError> {
        match &buffer.origin {
            BufferOrigin::Tracked { index } => self
                .session
                .free_output_buffer(index.load(Ordering::Acquire)),
            BufferOrigin::Untracked => {
                self.session
                    .shared()
                    .inner
                    .lock()
                    .free_list
                    .push_back(buffer.clone());
                Ok(())
            }
        }
    }

    /// Pre-allocate `count` untracked placeholder buffers into the free
    /// queue. These exist only for pool warm-up, before the hardware has
    /// produced anything.
    pub fn preallocate(&self, count: usize) -> Result<(), DecodeError> {
        for _ in 0..count {
            let buffer = self.alloc_untracked()?;
            self.session
                .shared()
                .inner
                .lock()
                .free_list
                .push_back(buffer);
        }
        Ok(())
    }

    /// Pop a free placeholder, or allocate a fresh one.
    pub fn obtain(&self) -> Result<Arc<PipelineBuffer>, DecodeError> {
        if let Some(buffer) = self.session.shared().inner.lock().free_list.pop_front() {
            return Ok(buffer);
        }
        self.alloc_untracked()
    }

    fn alloc_untracked(&self) -> Result<Arc<PipelineBuffer>, DecodeError> {
        let format = self.current_format().ok_or_else(|| {
            DecodeError::InvalidState("pool warm-up before format negotiation".into())
        })?;
        Ok(Arc::new(PipelineBuffer {
            key: None,
            geometry: format.geometry,
            stride: stride_for(&format),
            modifier: None,
            origin: BufferOrigin::Untracked,
        }))
    }

    /// Number of distinct physical buffers wrapped so far.
    pub fn wrapper_count(&self) -> usize {
        self.session.shared().inner.lock().table.len()
    }
}
