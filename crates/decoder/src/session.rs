//! The decode session: a synchronous-looking submit/complete API over the
//! asynchronous hardware codec runtime.
//!
//! `DecodeSession` owns the hardware component handle, the two block pools,
//! and the in-flight bookkeeping. The pipeline's single submitting thread
//! calls [`DecodeSession::queue`]; the runtime's callback thread completes
//! work through the registered [`ComponentListener`]. Both sides serialize
//! through one mutex per session, with two condition variables on it: one
//! for the pending-work ceiling, one for drain.
//!
//! ## Backpressure
//!
//! The session never lets more than [`MAX_PENDING_WORK`] units be
//! outstanding at the hardware. A non-EOS `queue` call blocks the submitting
//! thread until a completion makes room; this is the only mechanism keeping
//! queue growth bounded when the hardware falls behind.
//!
//! ## Buffer lifetime
//!
//! Decoded pictures are shared by file-descriptor pair, not copied. The
//! session retains every delivered output in its output map until downstream
//! signals release through [`DecodeSession::free_output_buffer`]; freeing a
//! buffer the hardware or downstream still references would be a
//! use-after-free on the device, so the retained map is the source of truth.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, info_span, warn, Span};

use veldec_common::DecodeError;

use crate::buffer::{BufferDescriptor, HandleKey, Payload};
use crate::recycler::{OutputFormat, PipelineBuffer};
use crate::runtime::{
    CompletedWork, Component, ComponentListener, ComponentStore, ConfigParam, GraphicBlockPool,
    LinearBlock, LinearBlockPool, WorkInput, WorkItem,
};

/// Ceiling on concurrently outstanding work units at the hardware.
pub const MAX_PENDING_WORK: usize = 6;

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// The pipeline-visible state machine.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// No hardware component yet.
    Idle,
    /// Component created and configured; output not yet negotiated/started.
    AwaitingFirstFrame,
    /// Steady state: input flows in, completions flow out.
    Decoding,
    /// End-of-input submitted; waiting for the hardware to flush.
    Draining,
    /// Terminal: stopped or fully drained.
    Stopped,
    /// Terminal: unrecoverable hardware or protocol failure.
    Error,
}

// ---------------------------------------------------------------------------
// Shared cross-thread state
// ---------------------------------------------------------------------------

/// State touched by both the submitting thread and the runtime callback
/// thread. One mutex per session; the two waits (work ceiling, drain) use
/// separate condvars on it and are re-checked in loops, so spurious wakes
/// are harmless.
pub(crate) struct Shared {
    pub(crate) inner: Mutex<Inner>,
    pub(crate) work_cv: Condvar,
    pub(crate) drain_cv: Condvar,
}

pub(crate) struct Inner {
    pub(crate) state: SessionState,
    /// Submitted-but-not-completed unit count.
    pub(crate) pending: usize,
    pub(crate) submitted: u64,
    pub(crate) completed: u64,
    /// Outputs delivered to the pipeline and not yet released downstream,
    /// keyed by the sequence index the hardware will free them under.
    pub(crate) retained: HashMap<u64, HandleKey>,
    /// One pipeline wrapper per distinct physical output buffer.
    pub(crate) table: HashMap<HandleKey, Arc<PipelineBuffer>>,
    /// Warm-up buffers cycling pool-internally, never through the hardware.
    pub(crate) free_list: VecDeque<Arc<PipelineBuffer>>,
    /// Most recently negotiated output format; wrapper metadata source.
    pub(crate) out_format: Option<OutputFormat>,
    pub(crate) drain_done: bool,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: SessionState::Idle,
                pending: 0,
                submitted: 0,
                completed: 0,
                retained: HashMap::new(),
                table: HashMap::new(),
                free_list: VecDeque::new(),
                out_format: None,
                drain_done: false,
            }),
            work_cv: Condvar::new(),
            drain_cv: Condvar::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Session events
// ---------------------------------------------------------------------------

/// What the session reports upward. Constructed on the runtime's callback
/// thread and handed to the registered [`SessionListener`]; failures never
/// cross the thread boundary any other way.
#[derive(Debug)]
pub enum SessionEvent {
    /// A decoded picture, shared by handle.
    Frame(BufferDescriptor),
    /// The end-of-stream marker completed with no payload.
    Eos,
    /// The runtime tripped mid-stream.
    Tripped(i32),
    /// Hard failure (hardware-reported or a completion protocol violation).
    Error(DecodeError),
    /// Internal teardown marker; consumers exit their event loop on it.
    Shutdown,
}

/// The single completion callback registered at session creation.
pub trait SessionListener: Send + Sync {
    fn on_event(&self, event: SessionEvent);
}

// ---------------------------------------------------------------------------
// Completion routing
// ---------------------------------------------------------------------------

/// Translates runtime completions into [`SessionEvent`]s. Runs on the
/// runtime's callback thread; keeps its lock scope tight and never calls
/// back into the component.
struct WorkRouter {
    shared: Arc<Shared>,
    listener: Arc<dyn SessionListener>,
    span: Span,
}

impl ComponentListener for WorkRouter {
    fn on_work_done(&self, completed: Vec<CompletedWork>) {
        let _guard = self.span.enter();
        for unit in completed {
            let mut inner = self.shared.inner.lock();
            inner.pending = inner.pending.saturating_sub(1);
            inner.completed += 1;
            self.shared.work_cv.notify_all();

            if unit.outputs.is_empty() {
                drop(inner);
                if unit.flags.is_eos() {
                    debug!(index = unit.index, "end-of-stream completion");
                    self.listener.on_event(SessionEvent::Eos);
                } else {
                    // Zero outputs without EOS is a protocol violation; the
                    // rest of this batch cannot be trusted.
                    error!(
                        index = unit.index,
                        "completion carried no output and no end-of-stream flag"
                    );
                    self.listener.on_event(SessionEvent::Error(DecodeError::BadValue(format!(
                        "unit {} completed with no output and no end-of-stream flag",
                        unit.index
                    ))));
                    return;
                }
                continue;
            }

            for out in &unit.outputs {
                inner.retained.insert(unit.index, out.key);
            }
            drop(inner);

            for out in unit.outputs {
                debug!(
                    index = unit.index,
                    key = %out.key,
                    geometry = %out.geometry,
                    "decoded picture completed"
                );
                let mut desc = BufferDescriptor::from_handle(
                    out.key,
                    out.size,
                    unit.index,
                    unit.timestamp,
                    unit.flags,
                );
                desc.capacity = out.capacity;
                desc.geometry = Some(out.geometry);
                self.listener.on_event(SessionEvent::Frame(desc));
            }
        }
    }

    fn on_tripped(&self, code: i32) {
        let _guard = self.span.enter();
        warn!(code, "runtime tripped");
        self.listener.on_event(SessionEvent::Tripped(code));
    }

    fn on_error(&self, code: i32) {
        let _guard = self.span.enter();
        error!(code, "runtime error");
        self.listener
            .on_event(SessionEvent::Error(DecodeError::Hardware(code)));
    }
}

// ---------------------------------------------------------------------------
// DecodeSession
// ---------------------------------------------------------------------------

/// One hardware decode session: the component handle, its block pools, and
/// every buffer crossing the boundary.
pub struct DecodeSession {
    component: Arc<dyn Component>,
    linear_pool: Arc<dyn LinearBlockPool>,
    graphic_pool: Mutex<Option<Arc<dyn GraphicBlockPool>>>,
    /// Linear blocks lent to the zero-copy input path, by handle.
    input_blocks: Mutex<HashMap<HandleKey, Box<dyn LinearBlock>>>,
    shared: Arc<Shared>,
    stopped: AtomicBool,
    released: AtomicBool,
    span: Span,
}

impl DecodeSession {
    /// Resolve and instantiate the hardware component, register the single
    /// completion listener, and create the input (linear) block pool.
    ///
    /// The listener is an argument rather than a setter so registration can
    /// never be forgotten before start; a registration failure fails
    /// creation, matching the runtime's contract that an unlistened
    /// component must not be started.
    pub fn create(
        store: &Arc<dyn ComponentStore>,
        component_id: &str,
        listener: Arc<dyn SessionListener>,
    ) -> Result<Arc<Self>, DecodeError> {
        let span = info_span!("decode_session", component = %component_id);
        let guard = span.clone();
        let _guard = guard.enter();

        let component = store.create(component_id)?;
        let shared = Arc::new(Shared::new());

        let router = Arc::new(WorkRouter {
            shared: shared.clone(),
            listener,
            span: span.clone(),
        });
        component.set_listener(router)?;

        let linear_pool = component.create_linear_pool()?;
        info!("session created");

        Ok(Arc::new(Self {
            component,
            linear_pool,
            graphic_pool: Mutex::new(None),
            input_blocks: Mutex::new(HashMap::new()),
            shared,
            stopped: AtomicBool::new(false),
            released: AtomicBool::new(false),
            span,
        }))
    }

    /// Forward initial configuration to the component.
    pub fn configure(&self, params: &[ConfigParam]) -> Result<(), DecodeError> {
        let _guard = self.span.enter();
        debug!(?params, "configuring component");
        self.component.configure(params)
    }

    /// Create the graphic pool for the given output geometry and bind it to
    /// the component as the one it must draw into. Called once output
    /// geometry is known, and again on renegotiation.
    pub fn configure_output(&self, format: &OutputFormat) -> Result<(), DecodeError> {
        let _guard = self.span.enter();
        let raw = crate::translate::raw_pixel_format(format.pixel_format, format.compressed);
        let pool = self.component.create_graphic_pool(format.geometry, raw)?;
        self.component.bind_output_pool(pool.clone())?;
        *self.graphic_pool.lock() = Some(pool);
        self.shared.inner.lock().out_format = Some(format.clone());
        info!(geometry = %format.geometry, raw_format = raw, "output pool configured");
        Ok(())
    }

    pub fn start(&self) -> Result<(), DecodeError> {
        let _guard = self.span.enter();
        self.component.start()?;
        info!("component started");
        Ok(())
    }

    /// Fetch a linear block and lend its handle to the zero-copy input
    /// path. The block stays in the session's input map until a descriptor
    /// carrying the handle is queued.
    pub fn alloc_input_block(&self, capacity: usize) -> Result<HandleKey, DecodeError> {
        let block = self.linear_pool.fetch(capacity)?;
        let key = block.handle();
        self.input_blocks.lock().insert(key, block);
        debug!(%key, capacity, "input block lent out");
        Ok(key)
    }

    /// Submit one unit of input work.
    ///
    /// Zero-copy descriptors must carry a handle previously obtained from
    /// [`DecodeSession::alloc_input_block`]; anything else misses the input
    /// map and fails with `NotFound`. Byte descriptors are copied into a
    /// freshly fetched linear block.
    ///
    /// Non-EOS submissions block while [`MAX_PENDING_WORK`] units are
    /// outstanding. Only the pipeline's single submitting thread may call
    /// this; it races the completion thread over the pending counter, and
    /// both serialize through the session mutex.
    pub fn queue(&self, desc: BufferDescriptor) -> Result<(), DecodeError> {
        let _guard = self.span.enter();
        let is_eos = desc.is_eos();
        let size = desc.size;

        let input = match desc.payload {
            Payload::Handle(key) => {
                let block = self.input_blocks.lock().remove(&key).ok_or_else(|| {
                    DecodeError::NotFound(format!(
                        "input block {key} was not allocated through this session"
                    ))
                })?;
                WorkInput::Linear(block)
            }
            Payload::Bytes(data) => {
                if data.is_empty() {
                    if !is_eos {
                        return Err(DecodeError::BadValue(
                            "empty payload without end-of-stream flag".into(),
                        ));
                    }
                    WorkInput::Empty
                } else {
                    let mut block = self.linear_pool.fetch(data.len())?;
                    let mapped = block.map_mut()?;
                    mapped[..data.len()].copy_from_slice(&data);
                    WorkInput::Linear(block)
                }
            }
        };

        let work = WorkItem {
            index: desc.index,
            timestamp: desc.timestamp,
            flags: desc.flags,
            size,
            input,
        };

        // The lock is held across the submit so a completion can never be
        // accounted before its own submission; the ceiling wait re-checks in
        // a loop to absorb spurious wakes.
        let mut inner = self.shared.inner.lock();
        if !is_eos {
            while inner.pending >= MAX_PENDING_WORK && inner.state != SessionState::Error {
                debug!(pending = inner.pending, "work ceiling reached, waiting");
                self.shared.work_cv.wait(&mut inner);
            }
            if inner.state == SessionState::Error {
                return Err(DecodeError::InvalidState(
                    "session failed while waiting for completions".into(),
                ));
            }
        }

        self.component.queue(work)?;
        inner.pending += 1;
        inner.submitted += 1;
        debug!(index = desc.index, pending = inner.pending, "work submitted");
        Ok(())
    }

    /// Release the session's retained reference on a previously delivered
    /// output buffer. An unknown index (double free) is reported, not fatal.
    pub fn free_output_buffer(&self, index: u64) -> Result<(), DecodeError> {
        let _guard = self.span.enter();
        let key = self.shared.inner.lock().retained.remove(&index);
        match key {
            Some(key) => {
                debug!(index, %key, "output buffer freed");
                self.component.free_output(index)
            }
            None => {
                warn!(index, "release of unknown output buffer index (double free?)");
                Ok(())
            }
        }
    }

    /// Stop the component. Idempotent: a second stop on a torn-down handle
    /// succeeds without touching the hardware.
    pub fn stop(&self) -> Result<(), DecodeError> {
        let _guard = self.span.enter();
        if self.stopped.swap(true, Ordering::AcqRel) {
            debug!("stop on already-stopped session");
            return Ok(());
        }
        self.component.stop()?;
        info!("component stopped");
        Ok(())
    }

    /// Discard all in-flight work and bookkeeping for a stream
    /// discontinuity. The component handle and pools survive.
    pub fn reset(&self) -> Result<(), DecodeError> {
        let _guard = self.span.enter();
        if self.released.load(Ordering::Acquire) {
            return Ok(());
        }
        self.component.reset()?;
        {
            let mut inner = self.shared.inner.lock();
            let discarded = inner.pending;
            inner.pending = 0;
            inner.retained.clear();
            inner.drain_done = false;
            if discarded > 0 {
                debug!(discarded, "discarded pending work during reset");
            }
            self.shared.work_cv.notify_all();
        }
        self.stopped.store(false, Ordering::Release);
        info!("session reset");
        Ok(())
    }

    /// Release the component and both pools. Must only run after
    /// [`DecodeSession::stop`] has returned, so no callback can reference a
    /// freed buffer. Idempotent.
    pub fn release(&self) -> Result<(), DecodeError> {
        let _guard = self.span.enter();
        if self.released.swap(true, Ordering::AcqRel) {
            debug!("release on already-released session");
            return Ok(());
        }
        *self.graphic_pool.lock() = None;
        self.input_blocks.lock().clear();
        {
            let mut inner = self.shared.inner.lock();
            inner.retained.clear();
            inner.table.clear();
            inner.free_list.clear();
        }
        self.component.release()?;
        info!("session released");
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.shared.inner.lock().state
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.shared.inner.lock().state = state;
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// Snapshot of the session's counters.
    pub fn stats(&self) -> SessionStats {
        let inner = self.shared.inner.lock();
        SessionStats {
            state: inner.state,
            pending: inner.pending,
            submitted: inner.submitted,
            completed: inner.completed,
            retained: inner.retained.len(),
            wrappers: inner.table.len(),
        }
    }
}

impl Drop for DecodeSession {
    fn drop(&mut self) {
        // Callbacks must be silenced before any buffer bookkeeping goes
        // away, so stop precedes release here as everywhere.
        if !self.stopped.load(Ordering::Acquire) {
            let _ = self.component.stop();
        }
        if !self.released.load(Ordering::Acquire) {
            let _ = self.component.release();
        }
    }
}

impl std::fmt::Debug for DecodeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("DecodeSession")
            .field("state", &inner.state)
            .field("pending", &inner.pending)
            .field("submitted", &inner.submitted)
            .field("completed", &inner.completed)
            .finish()
    }
}

/// Counters exposed for diagnostics.
#[derive(Clone, Debug)]
pub struct SessionStats {
    pub state: SessionState,
    pub pending: usize,
    pub submitted: u64,
    pub completed: u64,
    /// Outputs delivered and not yet released downstream.
    pub retained: usize,
    /// Distinct physical output buffers seen so far.
    pub wrappers: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{work_flags, WorkFlags};
    use crate::fake::{output_block, CollectingListener, FakeStore};
    use std::time::Duration;

    fn session_with_store() -> (Arc<FakeStore>, Arc<DecodeSession>, Arc<CollectingListener>) {
        let fake = Arc::new(FakeStore::new(&["vdec.avc"]));
        let store: Arc<dyn ComponentStore> = fake.clone();
        let listener = Arc::new(CollectingListener::default());
        let session = DecodeSession::create(&store, "vdec.avc", listener.clone()).unwrap();
        (fake, session, listener)
    }

    fn bytes_desc(index: u64, payload: &[u8]) -> BufferDescriptor {
        BufferDescriptor::from_bytes(payload.to_vec(), index, index * 1000, WorkFlags::empty())
    }

    #[test]
    fn create_fails_for_unknown_component() {
        let fake = Arc::new(FakeStore::new(&["vdec.avc"]));
        let store: Arc<dyn ComponentStore> = fake;
        let listener = Arc::new(CollectingListener::default());
        let err = DecodeSession::create(&store, "vdec.av1", listener).unwrap_err();
        assert!(matches!(err, DecodeError::NotFound(_)));
    }

    #[test]
    fn copy_path_writes_payload_into_block() {
        let (fake, session, _listener) = session_with_store();
        session.queue(bytes_desc(0, &[0xAA, 0xBB, 0xCC])).unwrap();

        let component = fake.last_component().unwrap();
        let queued = component.queued.lock();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].index, 0);
        match &queued[0].input {
            WorkInput::Linear(block) => {
                assert_eq!(block.map().unwrap(), &[0xAA, 0xBB, 0xCC]);
            }
            WorkInput::Empty => panic!("copy path should carry a block"),
        }
    }

    #[test]
    fn zero_copy_unknown_handle_is_not_found() {
        let (_fake, session, _listener) = session_with_store();
        let desc = BufferDescriptor::from_handle(HandleKey::new(99, 100), 16, 0, 0, WorkFlags::empty());
        let err = session.queue(desc).unwrap_err();
        assert!(matches!(err, DecodeError::NotFound(_)));
    }

    #[test]
    fn zero_copy_roundtrip_through_input_map() {
        let (fake, session, _listener) = session_with_store();
        let key = session.alloc_input_block(128).unwrap();
        let desc = BufferDescriptor::from_handle(key, 64, 0, 0, WorkFlags::empty());
        session.queue(desc).unwrap();

        let component = fake.last_component().unwrap();
        assert_eq!(component.queued.lock().len(), 1);

        // The handle was consumed; queueing it again misses the map.
        let again = BufferDescriptor::from_handle(key, 64, 1, 0, WorkFlags::empty());
        assert!(matches!(session.queue(again), Err(DecodeError::NotFound(_))));
    }

    #[test]
    fn empty_non_eos_payload_is_rejected() {
        let (_fake, session, _listener) = session_with_store();
        let desc = BufferDescriptor::from_bytes(Vec::new(), 0, 0, WorkFlags::empty());
        assert!(matches!(session.queue(desc), Err(DecodeError::BadValue(_))));
    }

    #[test]
    fn queue_failure_does_not_increment_pending() {
        let (fake, session, _listener) = session_with_store();
        let component = fake.last_component().unwrap();
        component.fail_queue.store(true, Ordering::Release);

        assert!(session.queue(bytes_desc(0, &[1])).is_err());
        assert_eq!(session.stats().pending, 0);
    }

    // Scenario A: the 7th non-EOS submission blocks until a completion
    // makes room.
    #[test]
    fn seventh_queue_blocks_until_completion() {
        let (fake, session, _listener) = session_with_store();
        for i in 0..MAX_PENDING_WORK as u64 {
            session.queue(bytes_desc(i, &[0x42])).unwrap();
        }
        assert_eq!(session.stats().pending, MAX_PENDING_WORK);

        let blocked = {
            let session = session.clone();
            std::thread::spawn(move || {
                session.queue(bytes_desc(6, &[0x42])).unwrap();
            })
        };

        // Give the thread time to park on the condvar.
        std::thread::sleep(Duration::from_millis(100));
        assert!(!blocked.is_finished());
        assert_eq!(session.stats().pending, MAX_PENDING_WORK);

        let component = fake.last_component().unwrap();
        component.complete(vec![CompletedWork {
            index: 0,
            timestamp: 0,
            flags: WorkFlags::empty(),
            outputs: vec![output_block(3, 7, 320, 240)],
        }]);

        blocked.join().unwrap();
        assert_eq!(session.stats().pending, MAX_PENDING_WORK);
        assert_eq!(session.stats().submitted, 7);
    }

    #[test]
    fn eos_bypasses_the_ceiling() {
        let (_fake, session, _listener) = session_with_store();
        for i in 0..MAX_PENDING_WORK as u64 {
            session.queue(bytes_desc(i, &[0x42])).unwrap();
        }
        // Must not block even though the ceiling is reached.
        session.queue(BufferDescriptor::end_of_stream(6)).unwrap();
        assert_eq!(session.stats().pending, MAX_PENDING_WORK + 1);
    }

    #[test]
    fn completion_emits_frame_event_and_retains_output() {
        let (fake, session, listener) = session_with_store();
        session.queue(bytes_desc(0, &[0x42])).unwrap();

        let component = fake.last_component().unwrap();
        component.complete(vec![CompletedWork {
            index: 0,
            timestamp: 1234,
            flags: WorkFlags::empty(),
            outputs: vec![output_block(3, 7, 320, 240)],
        }]);

        let events = listener.take();
        assert_eq!(events.len(), 1);
        match &events[0] {
            SessionEvent::Frame(desc) => {
                assert_eq!(desc.index, 0);
                assert_eq!(desc.timestamp, 1234);
                assert_eq!(desc.geometry.map(|g| g.width), Some(320));
                match desc.payload {
                    Payload::Handle(key) => assert_eq!(key, HandleKey::new(3, 7)),
                    _ => panic!("output descriptor should carry a handle"),
                }
            }
            other => panic!("expected Frame, got {other:?}"),
        }
        assert_eq!(session.stats().pending, 0);
        assert_eq!(session.stats().retained, 1);
    }

    #[test]
    fn eos_completion_emits_eos_event() {
        let (fake, session, listener) = session_with_store();
        session.queue(BufferDescriptor::end_of_stream(0)).unwrap();

        let component = fake.last_component().unwrap();
        component.complete(vec![CompletedWork {
            index: 0,
            timestamp: 0,
            flags: WorkFlags::empty().with(work_flags::END_OF_STREAM),
            outputs: Vec::new(),
        }]);

        let events = listener.take();
        assert!(matches!(events.as_slice(), [SessionEvent::Eos]));
    }

    #[test]
    fn empty_non_eos_completion_aborts_the_batch() {
        let (fake, session, listener) = session_with_store();
        for i in 0..3 {
            session.queue(bytes_desc(i, &[0x42])).unwrap();
        }

        let component = fake.last_component().unwrap();
        component.complete(vec![
            CompletedWork {
                index: 0,
                timestamp: 0,
                flags: WorkFlags::empty(),
                outputs: Vec::new(),
            },
            // Must never be processed.
            CompletedWork {
                index: 1,
                timestamp: 0,
                flags: WorkFlags::empty(),
                outputs: vec![output_block(3, 7, 320, 240)],
            },
        ]);

        let events = listener.take();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            SessionEvent::Error(DecodeError::BadValue(_))
        ));
        // Only the bad unit was accounted before the abort.
        assert_eq!(session.stats().completed, 1);
    }

    #[test]
    fn double_free_is_reported_not_fatal() {
        let (fake, session, listener) = session_with_store();
        session.queue(bytes_desc(0, &[0x42])).unwrap();

        let component = fake.last_component().unwrap();
        component.complete(vec![CompletedWork {
            index: 0,
            timestamp: 0,
            flags: WorkFlags::empty(),
            outputs: vec![output_block(3, 7, 320, 240)],
        }]);
        listener.take();

        session.free_output_buffer(0).unwrap();
        session.free_output_buffer(0).unwrap();
        assert_eq!(component.freed.lock().as_slice(), &[0]);
    }

    #[test]
    fn tripped_and_error_are_tagged_distinctly() {
        let (fake, _session, listener) = session_with_store();
        let component = fake.last_component().unwrap();
        component.trip(11);
        component.error(-5);

        let events = listener.take();
        assert!(matches!(&events[0], SessionEvent::Tripped(11)));
        assert!(matches!(
            &events[1],
            SessionEvent::Error(DecodeError::Hardware(-5))
        ));
    }

    #[test]
    fn stop_twice_is_idempotent() {
        let (fake, session, _listener) = session_with_store();
        session.stop().unwrap();
        session.stop().unwrap();

        let component = fake.last_component().unwrap();
        assert_eq!(component.stop_calls.load(Ordering::Acquire), 1);
    }

    #[test]
    fn release_twice_frees_pools_once() {
        let (fake, session, _listener) = session_with_store();
        session.stop().unwrap();
        session.release().unwrap();
        session.release().unwrap();

        let component = fake.last_component().unwrap();
        assert_eq!(component.release_calls.load(Ordering::Acquire), 1);
        assert_eq!(session.stats().wrappers, 0);
    }

    #[test]
    fn reset_discards_pending_work() {
        let (_fake, session, _listener) = session_with_store();
        for i in 0..4 {
            session.queue(bytes_desc(i, &[0x42])).unwrap();
        }
        session.reset().unwrap();
        let stats = session.stats();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.retained, 0);
    }
}
