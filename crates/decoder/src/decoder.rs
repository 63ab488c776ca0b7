//! The pipeline-facing decoder state machine.
//!
//! `VideoDecoder` composes the session adapter, the output buffer pool, and
//! the translation layer into the element the surrounding pipeline sees. It
//! owns format negotiation, dispatches compressed access units into the
//! session, and turns asynchronous completion events into downstream buffer
//! delivery, renegotiation, and end-of-stream signalling.
//!
//! Completion dispatch is a channel, not a re-entrant callback: the runtime
//! thread pushes [`SessionEvent`]s, and a decoder-owned event-loop thread
//! drains them. The submitting thread and the event thread only ever meet
//! at the session's shared state.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, info_span, warn, Span};

use veldec_common::{DecodeError, InterlaceMode, OutputOrder, Resolution, StreamFormat};

use crate::buffer::{BufferDescriptor, Payload};
use crate::modifier::{self, ModifierProvider};
use crate::recycler::{OutputBufferPool, OutputFormat, PipelineBuffer};
use crate::runtime::{ComponentStore, ConfigParam};
use crate::session::{DecodeSession, SessionEvent, SessionListener, SessionState, SessionStats};
use crate::translate::{self, FrameMarks};

/// Default bound on the drain wait.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Capacity of the submitted-unit ring.
const SUBMIT_RING_SIZE: usize = 64;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Decoder behavior knobs. All have serviceable defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Ask the hardware to minimize reorder depth.
    pub low_latency: bool,
    /// Order in which the hardware hands pictures back.
    pub output_order: OutputOrder,
    /// Untracked placeholder buffers pre-allocated at pool warm-up.
    pub preallocate_output: usize,
    /// Bound on the drain wait; expiry is a warning, not an error.
    pub drain_timeout: Duration,
    /// Name of the optional layout-modifier module to probe for.
    pub modifier_module: Option<String>,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            low_latency: false,
            output_order: OutputOrder::Display,
            preallocate_output: 0,
            drain_timeout: DRAIN_TIMEOUT,
            modifier_module: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline-facing value types
// ---------------------------------------------------------------------------

/// The compressed input format announced by upstream.
#[derive(Clone, Debug, PartialEq)]
pub struct InputFormat {
    pub geometry: Resolution,
    pub stream: StreamFormat,
    pub interlace: InterlaceMode,
}

/// One compressed access unit from upstream. The payload is moved, not
/// copied, at this layer; any copy into hardware memory happens inside the
/// session's copy path.
#[derive(Debug)]
pub struct InputFrame {
    pub payload: Payload,
    /// Filled bytes; meaningful for handle payloads, derived from the data
    /// for byte payloads.
    pub size: usize,
    pub timestamp: u64,
    pub marks: FrameMarks,
}

/// What downstream negotiation yielded for a given input format.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NegotiatedOutput {
    pub pixel_format: veldec_common::PixelFormat,
    /// Downstream accepts the vendor's bandwidth-compressed tiling.
    pub compressed: bool,
    /// Downstream imports buffers by handle instead of copying.
    pub zero_copy: bool,
}

/// A decoded picture delivered downstream.
#[derive(Debug)]
pub struct DecodedFrame {
    pub buffer: Arc<PipelineBuffer>,
    pub index: u64,
    pub timestamp: u64,
    pub marks: FrameMarks,
}

/// Outcome of a drain request.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The end-of-stream marker completed.
    Completed,
    /// The wait expired; treated as drain-complete-with-warning.
    TimedOut,
}

// ---------------------------------------------------------------------------
// Collaborator interfaces
// ---------------------------------------------------------------------------

/// Queries downstream capabilities for an output format.
pub trait FormatNegotiator: Send + Sync {
    fn negotiate(&self, request: &InputFormat) -> Result<NegotiatedOutput, DecodeError>;
}

/// The downstream consumer surface. `announce_format` always precedes the
/// first `deliver` for buffers in that format.
pub trait FrameSink: Send + Sync {
    fn announce_format(&self, format: &OutputFormat) -> Result<(), DecodeError>;

    fn deliver(&self, frame: DecodedFrame) -> Result<(), DecodeError>;

    fn end_of_stream(&self);

    /// A failure discovered on the callback side; the machine is already
    /// parked in the error state when this fires.
    fn notify_error(&self, error: &DecodeError);
}

// ---------------------------------------------------------------------------
// Submit ring
// ---------------------------------------------------------------------------

/// A unit recorded at submission, for pairing completions back to input
/// timestamps.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SubmittedUnit {
    pub index: u64,
    pub timestamp: u64,
}

/// Fixed-size ring of recently submitted units. Purely an optimization
/// pairing (the hardware echoes sequence indices on its own), so an evicted
/// entry just means the completion falls back to the hardware timestamp.
pub(crate) struct SubmitRing {
    slots: [Option<SubmittedUnit>; SUBMIT_RING_SIZE],
}

impl SubmitRing {
    pub(crate) fn new() -> Self {
        Self {
            slots: [None; SUBMIT_RING_SIZE],
        }
    }

    pub(crate) fn record(&mut self, unit: SubmittedUnit) {
        self.slots[unit.index as usize % SUBMIT_RING_SIZE] = Some(unit);
    }

    pub(crate) fn take(&mut self, index: u64) -> Option<SubmittedUnit> {
        let slot = &mut self.slots[index as usize % SUBMIT_RING_SIZE];
        match slot {
            Some(unit) if unit.index == index => slot.take(),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Completion channel
// ---------------------------------------------------------------------------

/// The session listener: pushes events into the channel the event loop
/// drains. Runs on the runtime's callback thread and does nothing else.
struct ChannelListener {
    tx: Sender<SessionEvent>,
}

impl SessionListener for ChannelListener {
    fn on_event(&self, event: SessionEvent) {
        // A disconnected receiver means teardown already happened; late
        // events are dropped by design.
        let _ = self.tx.send(event);
    }
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

struct EventLoop {
    rx: Receiver<SessionEvent>,
    session: Arc<DecodeSession>,
    pool: Arc<OutputBufferPool>,
    sink: Arc<dyn FrameSink>,
    negotiator: Arc<dyn FormatNegotiator>,
    ring: Arc<Mutex<SubmitRing>>,
    stream: StreamFormat,
    interlace: InterlaceMode,
    span: Span,
}

impl EventLoop {
    fn run(self) {
        let _guard = self.span.enter();
        debug!("event loop running");
        while let Ok(event) = self.rx.recv() {
            match event {
                SessionEvent::Frame(desc) => {
                    if let Err(err) = self.on_frame(desc) {
                        self.fail(err);
                    }
                }
                SessionEvent::Eos => {
                    debug!("end-of-stream reached");
                    {
                        let shared = self.session.shared();
                        let mut inner = shared.inner.lock();
                        inner.drain_done = true;
                        if inner.state == SessionState::Draining {
                            inner.state = SessionState::Stopped;
                        }
                        shared.drain_cv.notify_all();
                    }
                    self.sink.end_of_stream();
                }
                SessionEvent::Tripped(code) => self.fail(DecodeError::Tripped(code)),
                SessionEvent::Error(err) => self.fail(err),
                SessionEvent::Shutdown => break,
            }
        }
        debug!("event loop exited");
    }

    fn on_frame(&self, desc: BufferDescriptor) -> Result<(), DecodeError> {
        let geometry = desc
            .geometry
            .ok_or_else(|| DecodeError::BadValue("decoded buffer without geometry".into()))?;
        let key = match desc.payload {
            Payload::Handle(key) => key,
            ref other => {
                return Err(DecodeError::BadValue(format!(
                    "decoded buffer without handle: {other:?}"
                )))
            }
        };

        let current = self
            .pool
            .current_format()
            .ok_or_else(|| DecodeError::InvalidState("no negotiated output format".into()))?;
        if current.geometry != geometry {
            self.renegotiate(geometry)?;
        }

        let buffer = self.pool.acquire(key, desc.index)?;
        let timestamp = self
            .ring
            .lock()
            .take(desc.index)
            .map(|unit| unit.timestamp)
            .unwrap_or(desc.timestamp);
        self.sink.deliver(DecodedFrame {
            buffer,
            index: desc.index,
            timestamp,
            marks: translate::marks_from_work_flags(desc.flags),
        })
    }

    /// Mid-stream resolution change. The new format must reach downstream
    /// before the buffer that triggered it.
    fn renegotiate(&self, geometry: Resolution) -> Result<(), DecodeError> {
        info!(new = %geometry, "output geometry changed, renegotiating");
        let request = InputFormat {
            geometry,
            stream: self.stream,
            interlace: self.interlace,
        };
        let negotiated = self.negotiator.negotiate(&request)?;
        let format = OutputFormat {
            geometry,
            pixel_format: negotiated.pixel_format,
            compressed: negotiated.compressed,
            zero_copy: negotiated.zero_copy,
        };
        self.sink.announce_format(&format)?;
        self.session.configure_output(&format)?;
        Ok(())
    }

    fn fail(&self, err: DecodeError) {
        error!(error = %err, "session error");
        {
            let shared = self.session.shared();
            let mut inner = shared.inner.lock();
            inner.state = SessionState::Error;
            // Wake both waits so nobody sleeps through the failure.
            shared.work_cv.notify_all();
            shared.drain_cv.notify_all();
        }
        self.sink.notify_error(&err);
    }
}

// ---------------------------------------------------------------------------
// VideoDecoder
// ---------------------------------------------------------------------------

/// The decode element: one hardware session at a time, rebuilt on every
/// input format negotiation.
///
/// All methods are driven by the pipeline's single submitting thread; the
/// event-loop thread owns delivery. See the module docs for the threading
/// picture.
pub struct VideoDecoder {
    config: DecoderConfig,
    store: Arc<dyn ComponentStore>,
    negotiator: Arc<dyn FormatNegotiator>,
    sink: Arc<dyn FrameSink>,
    modifier: Option<Arc<dyn ModifierProvider>>,
    session: Option<Arc<DecodeSession>>,
    pool: Option<Arc<OutputBufferPool>>,
    tx: Option<Sender<SessionEvent>>,
    worker: Option<JoinHandle<()>>,
    ring: Arc<Mutex<SubmitRing>>,
    next_index: u64,
    input_format: Option<InputFormat>,
    /// What `state()` reports while no session exists.
    resting_state: SessionState,
    span: Span,
}

impl VideoDecoder {
    pub fn new(
        config: DecoderConfig,
        store: Arc<dyn ComponentStore>,
        negotiator: Arc<dyn FormatNegotiator>,
        sink: Arc<dyn FrameSink>,
    ) -> Self {
        let span = info_span!("video_decoder");
        let modifier = {
            let _guard = span.enter();
            config
                .modifier_module
                .as_deref()
                .and_then(modifier::probe)
        };
        Self {
            config,
            store,
            negotiator,
            sink,
            modifier,
            session: None,
            pool: None,
            tx: None,
            worker: None,
            ring: Arc::new(Mutex::new(SubmitRing::new())),
            next_index: 0,
            input_format: None,
            resting_state: SessionState::Idle,
            span,
        }
    }

    /// Negotiate the compressed input format and bring the session up:
    /// resolve the component, configure it, negotiate the output with
    /// downstream, bind the graphic pool, start the hardware, and spawn the
    /// event loop. Any failure here is fatal to the session and not
    /// retried. A repeated call rebuilds the session from scratch.
    pub fn set_format(&mut self, format: InputFormat) -> Result<(), DecodeError> {
        let guard = self.span.clone();
        let _guard = guard.enter();

        if self.session.is_some() {
            info!("input format renegotiated, rebuilding session");
            self.teardown()?;
        }

        let component_id = translate::component_id(format.stream);
        if !self.store.is_supported(component_id) {
            warn!(component = component_id, "component store has no decoder for stream");
            return Err(DecodeError::Unsupported(format.stream));
        }

        info!(
            stream = %format.stream,
            geometry = %format.geometry,
            component = component_id,
            "bringing up decode session"
        );
        let result = self.bring_up(&format, component_id);
        if let Err(ref err) = result {
            error!(error = %err, "session bring-up failed");
            if let Some(session) = &self.session {
                session.set_state(SessionState::Error);
            }
        }
        result
    }

    fn bring_up(&mut self, format: &InputFormat, component_id: &str) -> Result<(), DecodeError> {
        let (tx, rx) = unbounded();
        let listener = Arc::new(ChannelListener { tx: tx.clone() });

        let session = DecodeSession::create(&self.store, component_id, listener)?;
        session.set_state(SessionState::AwaitingFirstFrame);
        self.session = Some(session.clone());

        session.configure(&[
            ConfigParam::PictureSize(format.geometry),
            ConfigParam::Interlace(format.interlace),
            ConfigParam::LowLatency(self.config.low_latency),
            ConfigParam::OutputOrder(self.config.output_order),
        ])?;

        let negotiated = self.negotiator.negotiate(format)?;
        let out_format = OutputFormat {
            geometry: format.geometry,
            pixel_format: negotiated.pixel_format,
            compressed: negotiated.compressed,
            zero_copy: negotiated.zero_copy,
        };
        self.sink.announce_format(&out_format)?;
        session.configure_output(&out_format)?;

        let pool = Arc::new(OutputBufferPool::new(session.clone(), self.modifier.clone()));
        if self.config.preallocate_output > 0 {
            pool.preallocate(self.config.preallocate_output)?;
        }

        session.start()?;
        session.set_state(SessionState::Decoding);

        let event_loop = EventLoop {
            rx,
            session: session.clone(),
            pool: pool.clone(),
            sink: self.sink.clone(),
            negotiator: self.negotiator.clone(),
            ring: self.ring.clone(),
            stream: format.stream,
            interlace: format.interlace,
            span: self.span.clone(),
        };
        let worker = std::thread::Builder::new()
            .name("veldec-events".into())
            .spawn(move || event_loop.run())
            .map_err(|e| DecodeError::NoMemory(format!("failed to spawn event thread: {e}")))?;

        self.tx = Some(tx);
        self.pool = Some(pool);
        self.worker = Some(worker);
        self.input_format = Some(format.clone());
        Ok(())
    }

    /// Dispatch one compressed access unit into the session. End-of-input
    /// goes through [`VideoDecoder::drain`], not here.
    pub fn handle_frame(&mut self, frame: InputFrame) -> Result<(), DecodeError> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| DecodeError::InvalidState("input before format negotiation".into()))?;
        match session.state() {
            SessionState::Decoding => {}
            state => {
                return Err(DecodeError::InvalidState(format!(
                    "cannot queue input while {state:?}"
                )))
            }
        }
        if frame.marks.end_of_stream {
            return Err(DecodeError::BadValue(
                "end-of-input is signalled through drain()".into(),
            ));
        }

        let index = self.next_index;
        self.next_index += 1;
        self.ring.lock().record(SubmittedUnit {
            index,
            timestamp: frame.timestamp,
        });

        let flags = translate::work_flags_from_marks(&frame.marks);
        let desc = match frame.payload {
            Payload::Bytes(data) => {
                BufferDescriptor::from_bytes(data, index, frame.timestamp, flags)
            }
            Payload::Handle(key) => {
                BufferDescriptor::from_handle(key, frame.size, index, frame.timestamp, flags)
            }
        };
        session.queue(desc)
    }

    /// Flush all in-flight work: submit an explicit end-of-stream unit and
    /// wait for the hardware to confirm, bounded by the configured timeout.
    /// Expiry is logged and treated as drain-complete-with-warning.
    pub fn drain(&mut self) -> Result<DrainOutcome, DecodeError> {
        let guard = self.span.clone();
        let _guard = guard.enter();

        let session = self
            .session
            .as_ref()
            .ok_or_else(|| DecodeError::InvalidState("drain before format negotiation".into()))?
            .clone();
        match session.state() {
            SessionState::Decoding => {}
            SessionState::Stopped => return Ok(DrainOutcome::Completed),
            state => {
                return Err(DecodeError::InvalidState(format!(
                    "cannot drain while {state:?}"
                )))
            }
        }

        {
            let mut inner = session.shared().inner.lock();
            inner.state = SessionState::Draining;
            inner.drain_done = false;
        }

        let index = self.next_index;
        self.next_index += 1;
        info!(index, "draining");
        session.queue(BufferDescriptor::end_of_stream(index))?;

        let shared = session.shared();
        let deadline = Instant::now() + self.config.drain_timeout;
        let mut inner = shared.inner.lock();
        loop {
            if inner.drain_done {
                return Ok(DrainOutcome::Completed);
            }
            if inner.state == SessionState::Error {
                return Err(DecodeError::InvalidState(
                    "session failed during drain".into(),
                ));
            }
            if shared.drain_cv.wait_until(&mut inner, deadline).timed_out() {
                if inner.drain_done {
                    return Ok(DrainOutcome::Completed);
                }
                warn!(
                    timeout = ?self.config.drain_timeout,
                    "drain timed out, treating as complete"
                );
                inner.state = SessionState::Stopped;
                return Ok(DrainOutcome::TimedOut);
            }
        }
    }

    /// Tear the session down: stop the hardware first so no callback can
    /// arrive, then release pools and the component, then join the event
    /// loop. Idempotent.
    pub fn stop(&mut self) -> Result<(), DecodeError> {
        let guard = self.span.clone();
        let _guard = guard.enter();
        self.teardown()?;
        Ok(())
    }

    /// Discard in-flight work for a stream discontinuity (seek). The
    /// session survives; feed the next access units from a sync point.
    pub fn reset(&mut self) -> Result<(), DecodeError> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| DecodeError::InvalidState("reset before format negotiation".into()))?;
        session.reset()?;
        *self.ring.lock() = SubmitRing::new();
        session.set_state(SessionState::Decoding);
        Ok(())
    }

    fn teardown(&mut self) -> Result<(), DecodeError> {
        if let Some(session) = self.session.take() {
            // Stop before anything is freed: once stop returns, the runtime
            // guarantees no further callbacks.
            session.stop()?;
            session.release()?;
            session.set_state(SessionState::Stopped);
            info!("session torn down");
        }
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(SessionEvent::Shutdown);
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.pool = None;
        self.resting_state = SessionState::Stopped;
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map(|s| s.state())
            .unwrap_or(self.resting_state)
    }

    pub fn input_format(&self) -> Option<&InputFormat> {
        self.input_format.as_ref()
    }

    /// The live output buffer pool. Downstream release plumbing goes
    /// through it once buffers leave the sink.
    pub fn output_pool(&self) -> Option<Arc<OutputBufferPool>> {
        self.pool.clone()
    }

    pub fn stats(&self) -> Option<SessionStats> {
        self.session.as_ref().map(|s| s.stats())
    }
}

impl Drop for VideoDecoder {
    fn drop(&mut self) {
        if let Err(err) = self.teardown() {
            error!(error = %err, "teardown during drop failed");
        }
    }
}
