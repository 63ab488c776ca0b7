//! In-memory fake of the hardware codec runtime.
//!
//! Tests drive completions explicitly from their own threads, which is
//! exactly the shape of the real runtime: `queue` never invokes the
//! listener synchronously, and completions arrive on a thread the session
//! does not own.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use veldec_common::{DecodeError, Resolution};

use crate::buffer::HandleKey;
use crate::runtime::{
    CompletedWork, Component, ComponentListener, ComponentStore, ConfigParam, GraphicBlockPool,
    LinearBlock, LinearBlockPool, OutputBlock, WorkItem,
};
use crate::session::{SessionEvent, SessionListener};

/// Route tracing output into the test harness. Safe to call repeatedly.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub(crate) struct FakeStore {
    supported: Vec<String>,
    components: Mutex<Vec<Arc<FakeComponent>>>,
}

impl FakeStore {
    pub(crate) fn new(supported: &[&str]) -> Self {
        init_tracing();
        Self {
            supported: supported.iter().map(|s| s.to_string()).collect(),
            components: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn last_component(&self) -> Option<Arc<FakeComponent>> {
        self.components.lock().last().cloned()
    }
}

impl ComponentStore for FakeStore {
    fn is_supported(&self, component_id: &str) -> bool {
        self.supported.iter().any(|s| s == component_id)
    }

    fn create(&self, component_id: &str) -> Result<Arc<dyn Component>, DecodeError> {
        if !self.is_supported(component_id) {
            return Err(DecodeError::NotFound(format!(
                "store has no component {component_id}"
            )));
        }
        let component = Arc::new(FakeComponent::default());
        self.components.lock().push(component.clone());
        Ok(component)
    }
}

// ---------------------------------------------------------------------------
// Component
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct FakeComponent {
    pub(crate) listener: Mutex<Option<Arc<dyn ComponentListener>>>,
    pub(crate) config: Mutex<Vec<ConfigParam>>,
    pub(crate) queued: Mutex<Vec<WorkItem>>,
    pub(crate) freed: Mutex<Vec<u64>>,
    pub(crate) bound_pool: Mutex<Option<Arc<dyn GraphicBlockPool>>>,
    /// Teardown ordering, for asserting stop-before-release.
    pub(crate) ops: Mutex<Vec<&'static str>>,
    pub(crate) start_calls: AtomicUsize,
    pub(crate) stop_calls: AtomicUsize,
    pub(crate) reset_calls: AtomicUsize,
    pub(crate) release_calls: AtomicUsize,
    pub(crate) fail_queue: AtomicBool,
}

impl FakeComponent {
    /// Deliver completions as the runtime would, on the calling thread.
    pub(crate) fn complete(&self, completed: Vec<CompletedWork>) {
        let listener = self.listener.lock().clone().expect("listener not registered");
        listener.on_work_done(completed);
    }

    pub(crate) fn trip(&self, code: i32) {
        let listener = self.listener.lock().clone().expect("listener not registered");
        listener.on_tripped(code);
    }

    pub(crate) fn error(&self, code: i32) {
        let listener = self.listener.lock().clone().expect("listener not registered");
        listener.on_error(code);
    }
}

impl Component for FakeComponent {
    fn set_listener(&self, listener: Arc<dyn ComponentListener>) -> Result<(), DecodeError> {
        *self.listener.lock() = Some(listener);
        Ok(())
    }

    fn configure(&self, params: &[ConfigParam]) -> Result<(), DecodeError> {
        self.config.lock().extend_from_slice(params);
        Ok(())
    }

    fn create_linear_pool(&self) -> Result<Arc<dyn LinearBlockPool>, DecodeError> {
        Ok(Arc::new(FakeLinearPool {
            next_fd: AtomicI32::new(1000),
        }))
    }

    fn create_graphic_pool(
        &self,
        geometry: Resolution,
        raw_format: u32,
    ) -> Result<Arc<dyn GraphicBlockPool>, DecodeError> {
        Ok(Arc::new(FakeGraphicPool {
            geometry,
            raw_format,
        }))
    }

    fn bind_output_pool(&self, pool: Arc<dyn GraphicBlockPool>) -> Result<(), DecodeError> {
        *self.bound_pool.lock() = Some(pool);
        Ok(())
    }

    fn start(&self) -> Result<(), DecodeError> {
        self.start_calls.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn queue(&self, work: WorkItem) -> Result<(), DecodeError> {
        if self.fail_queue.load(Ordering::Acquire) {
            return Err(DecodeError::Hardware(-1));
        }
        self.queued.lock().push(work);
        Ok(())
    }

    fn free_output(&self, index: u64) -> Result<(), DecodeError> {
        self.freed.lock().push(index);
        Ok(())
    }

    fn stop(&self) -> Result<(), DecodeError> {
        self.stop_calls.fetch_add(1, Ordering::AcqRel);
        self.ops.lock().push("stop");
        Ok(())
    }

    fn reset(&self) -> Result<(), DecodeError> {
        self.reset_calls.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn release(&self) -> Result<(), DecodeError> {
        self.release_calls.fetch_add(1, Ordering::AcqRel);
        self.ops.lock().push("release");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Pools and blocks
// ---------------------------------------------------------------------------

struct FakeLinearPool {
    next_fd: AtomicI32,
}

impl LinearBlockPool for FakeLinearPool {
    fn fetch(&self, capacity: usize) -> Result<Box<dyn LinearBlock>, DecodeError> {
        let fd = self.next_fd.fetch_add(2, Ordering::AcqRel);
        Ok(Box::new(FakeLinearBlock {
            key: HandleKey::new(fd, fd + 1),
            data: vec![0; capacity],
        }))
    }
}

struct FakeLinearBlock {
    key: HandleKey,
    data: Vec<u8>,
}

impl LinearBlock for FakeLinearBlock {
    fn handle(&self) -> HandleKey {
        self.key
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }

    fn map(&self) -> Result<&[u8], DecodeError> {
        Ok(&self.data)
    }

    fn map_mut(&mut self) -> Result<&mut [u8], DecodeError> {
        Ok(&mut self.data)
    }
}

struct FakeGraphicPool {
    geometry: Resolution,
    raw_format: u32,
}

impl GraphicBlockPool for FakeGraphicPool {
    fn geometry(&self) -> Resolution {
        self.geometry
    }

    fn raw_format(&self) -> u32 {
        self.raw_format
    }
}

/// Shorthand for the output block a completion carries.
pub(crate) fn output_block(fd: i32, meta_fd: i32, width: u32, height: u32) -> OutputBlock {
    let size = (width * height * 3 / 2) as usize;
    OutputBlock {
        key: HandleKey::new(fd, meta_fd),
        geometry: Resolution::new(width, height),
        stride: width,
        size,
        capacity: size,
    }
}

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

/// Collects session events for assertion.
#[derive(Default)]
pub(crate) struct CollectingListener {
    events: Mutex<Vec<SessionEvent>>,
}

impl CollectingListener {
    pub(crate) fn take(&self) -> Vec<SessionEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl SessionListener for CollectingListener {
    fn on_event(&self, event: SessionEvent) {
        self.events.lock().push(event);
    }
}
