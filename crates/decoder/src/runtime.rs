//! The hardware codec runtime boundary.
//!
//! The decode session talks to an asynchronous, off-process codec runtime.
//! Everything the session needs from it is expressed as the traits in this
//! module: a [`ComponentStore`] that resolves codec components by name, a
//! [`Component`] handle for one instantiated decoder, and the block pools it
//! allocates buffers from. Production builds wire these to the vendor
//! runtime's client library; tests inject in-memory fakes.
//!
//! Completion callbacks ([`ComponentListener`]) are invoked on the runtime's
//! own thread, never on the submitting thread. Implementations of
//! [`Component::queue`] must not invoke the listener synchronously from
//! inside the call: the session serializes the pending-work counter and the
//! submit path through one lock, and a re-entrant completion would deadlock.

use std::sync::Arc;

use veldec_common::{DecodeError, InterlaceMode, OutputOrder, Resolution};

use crate::buffer::{HandleKey, WorkFlags};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration parameters submitted to a component before start.
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigParam {
    PictureSize(Resolution),
    Interlace(InterlaceMode),
    /// Trade reorder depth for latency.
    LowLatency(bool),
    /// Order in which the hardware hands pictures back.
    OutputOrder(OutputOrder),
}

// ---------------------------------------------------------------------------
// Work submission
// ---------------------------------------------------------------------------

/// Input carried by a work unit.
pub enum WorkInput {
    /// Compressed payload in a linear block fetched from the session's pool.
    Linear(Box<dyn LinearBlock>),
    /// No payload; end-of-stream marker.
    Empty,
}

/// One unit of input work submitted to the hardware.
pub struct WorkItem {
    /// Sequence index assigned by the submitter; echoed back on completion.
    pub index: u64,
    pub timestamp: u64,
    pub flags: WorkFlags,
    /// Filled bytes within the input block.
    pub size: usize,
    pub input: WorkInput,
}

impl std::fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkItem")
            .field("index", &self.index)
            .field("timestamp", &self.timestamp)
            .field("flags", &self.flags)
            .field("size", &self.size)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Work completion
// ---------------------------------------------------------------------------

/// A decoded output buffer reported by the runtime, shared by handle.
#[derive(Copy, Clone, Debug)]
pub struct OutputBlock {
    pub key: HandleKey,
    pub geometry: Resolution,
    /// Row stride in bytes of the primary plane.
    pub stride: u32,
    /// Filled bytes.
    pub size: usize,
    /// Allocated bytes.
    pub capacity: usize,
}

/// A completed unit of work, delivered on the runtime's callback thread.
///
/// A unit normally carries exactly one output; a unit with no outputs is
/// only legal when it carries the end-of-stream flag.
#[derive(Clone, Debug)]
pub struct CompletedWork {
    pub index: u64,
    pub timestamp: u64,
    pub flags: WorkFlags,
    pub outputs: Vec<OutputBlock>,
}

// ---------------------------------------------------------------------------
// Block pools
// ---------------------------------------------------------------------------

/// A host-mappable linear block obtained from a [`LinearBlockPool`].
pub trait LinearBlock: Send {
    /// Cross-boundary identity of this block.
    fn handle(&self) -> HandleKey;

    fn capacity(&self) -> usize;

    /// Map the block read-only.
    fn map(&self) -> Result<&[u8], DecodeError>;

    /// Map the block into host memory for writing the compressed payload.
    /// The mapping is released when the borrow ends.
    fn map_mut(&mut self) -> Result<&mut [u8], DecodeError>;
}

/// Allocator for linear (flat) blocks. Created once per session; the
/// runtime's own allocator serializes access, so no additional locking is
/// layered on top.
pub trait LinearBlockPool: Send + Sync {
    /// Fetch a fresh block of at least `capacity` bytes. Pool exhaustion is
    /// a hard error (`NoMemory`), never a wait.
    fn fetch(&self, capacity: usize) -> Result<Box<dyn LinearBlock>, DecodeError>;
}

/// Allocator for graphic (2D, possibly compressed-layout) blocks. The
/// hardware draws decoded pictures into blocks of the pool bound via
/// [`Component::bind_output_pool`]; the session never fetches from it
/// directly.
pub trait GraphicBlockPool: Send + Sync {
    fn geometry(&self) -> Resolution;

    /// Runtime pixel-format code the pool was created with.
    fn raw_format(&self) -> u32;
}

// ---------------------------------------------------------------------------
// Component
// ---------------------------------------------------------------------------

/// Completion callbacks, invoked on the runtime's thread.
pub trait ComponentListener: Send + Sync {
    fn on_work_done(&self, completed: Vec<CompletedWork>);

    /// The runtime tripped mid-stream (recoverable from its point of view;
    /// the session surfaces it and lets the pipeline decide).
    fn on_tripped(&self, code: i32);

    /// Hard runtime failure.
    fn on_error(&self, code: i32);
}

/// One instantiated hardware decoder component.
pub trait Component: Send + Sync {
    /// Register the single completion listener. Must be called before
    /// [`Component::start`].
    fn set_listener(&self, listener: Arc<dyn ComponentListener>) -> Result<(), DecodeError>;

    fn configure(&self, params: &[ConfigParam]) -> Result<(), DecodeError>;

    fn create_linear_pool(&self) -> Result<Arc<dyn LinearBlockPool>, DecodeError>;

    fn create_graphic_pool(
        &self,
        geometry: Resolution,
        raw_format: u32,
    ) -> Result<Arc<dyn GraphicBlockPool>, DecodeError>;

    /// Bind a graphic pool as the one the component must draw into.
    fn bind_output_pool(&self, pool: Arc<dyn GraphicBlockPool>) -> Result<(), DecodeError>;

    fn start(&self) -> Result<(), DecodeError>;

    /// Submit one unit of work. Non-blocking; completion arrives through the
    /// listener on the runtime's thread.
    fn queue(&self, work: WorkItem) -> Result<(), DecodeError>;

    /// Return a previously delivered output buffer to the hardware.
    fn free_output(&self, index: u64) -> Result<(), DecodeError>;

    fn stop(&self) -> Result<(), DecodeError>;

    fn reset(&self) -> Result<(), DecodeError>;

    fn release(&self) -> Result<(), DecodeError>;
}

/// Resolves codec components by identifier (see [`crate::translate::component_id`]).
pub trait ComponentStore: Send + Sync {
    fn is_supported(&self, component_id: &str) -> bool;

    fn create(&self, component_id: &str) -> Result<Arc<dyn Component>, DecodeError>;
}
