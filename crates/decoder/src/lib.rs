//! Hardware-accelerated video decode session for streaming pipelines.
//!
//! veldec sits between a pipeline element and an asynchronous, off-process
//! hardware codec runtime: compressed access units go in on the pipeline's
//! thread, decoded picture buffers come back in hardware completion order,
//! shared by file descriptor rather than copied.
//!
//! The three load-bearing pieces, leaves first:
//!
//! 1. [`translate`]: pure vocabulary mapping between the pipeline and the
//!    runtime (flags, component ids, pixel-format codes).
//! 2. [`session`]: the session adapter with the component handle, both block
//!    pools, the bounded pending-work counter, and the buffer maps. This is
//!    where the concurrency lives.
//! 3. [`recycler`] + [`decoder`]: the pipeline-visible surface, with wrapper
//!    deduplication for recycled hardware buffers, and the state machine
//!    that turns completion events into delivery, renegotiation, and EOS.
//!
//! The hardware runtime itself is consumed through the traits in
//! [`runtime`]; nothing in this crate links against a vendor library except
//! the optional layout-modifier probe in [`modifier`].

pub mod buffer;
pub mod decoder;
pub mod modifier;
pub mod recycler;
pub mod runtime;
pub mod session;
pub mod translate;

#[cfg(test)]
pub(crate) mod fake;

pub use buffer::{BufferDescriptor, HandleKey, Payload, WorkFlags};
pub use decoder::{
    DecodedFrame, DecoderConfig, DrainOutcome, FormatNegotiator, FrameSink, InputFormat,
    InputFrame, NegotiatedOutput, VideoDecoder, DRAIN_TIMEOUT,
};
pub use modifier::ModifierProvider;
pub use recycler::{OutputBufferPool, OutputFormat, PipelineBuffer};
pub use session::{
    DecodeSession, SessionEvent, SessionListener, SessionState, SessionStats, MAX_PENDING_WORK,
};
pub use translate::FrameMarks;

pub use veldec_common::{
    DecodeError, InterlaceMode, OutputOrder, PixelFormat, Resolution, StreamFormat,
};
