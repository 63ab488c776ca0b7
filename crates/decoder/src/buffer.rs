//! Buffer descriptors crossing the session boundary.
//!
//! A [`BufferDescriptor`] describes one buffer handed across the boundary
//! between the pipeline and the hardware session: compressed input on the
//! way in, a decoded picture on the way out. Descriptors are value types:
//! never mutated after creation; ownership moves with each hand-off
//! (caller → session → hardware → session → pipeline → downstream).

use veldec_common::Resolution;

// ---------------------------------------------------------------------------
// Work flags
// ---------------------------------------------------------------------------

/// Bit values for [`WorkFlags`], matching the hardware runtime's work-unit
/// flag vocabulary.
pub mod work_flags {
    /// The unit marks end-of-stream; it may carry no payload.
    pub const END_OF_STREAM: u32 = 1 << 0;
    /// The decoded picture should not be presented.
    pub const DROP: u32 = 1 << 1;
    /// The payload is codec configuration (parameter sets), not a picture.
    pub const CODEC_CONFIG: u32 = 1 << 2;
    /// The unit is a partial access unit; more data follows.
    pub const INCOMPLETE: u32 = 1 << 3;
}

/// Flag set carried by every work unit and every completed buffer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkFlags(u32);

impl WorkFlags {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn with(self, bit: u32) -> Self {
        Self(self.0 | bit)
    }

    pub const fn contains(self, bit: u32) -> bool {
        self.0 & bit != 0
    }

    pub const fn is_eos(self) -> bool {
        self.contains(work_flags::END_OF_STREAM)
    }

    pub const fn is_codec_config(self) -> bool {
        self.contains(work_flags::CODEC_CONFIG)
    }

    pub const fn is_drop(self) -> bool {
        self.contains(work_flags::DROP)
    }

    pub const fn is_incomplete(self) -> bool {
        self.contains(work_flags::INCOMPLETE)
    }
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Identity of a buffer shared across the process/device boundary: the
/// primary file descriptor plus the metadata-plane descriptor.
///
/// The pair is the deduplication key for decoded picture buffers: the
/// hardware hands the same physical memory back repeatedly, and both
/// descriptors together name it uniquely for the life of the session.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct HandleKey {
    pub fd: i32,
    pub meta_fd: i32,
}

impl HandleKey {
    pub fn new(fd: i32, meta_fd: i32) -> Self {
        Self { fd, meta_fd }
    }
}

impl std::fmt::Display for HandleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fd {}/{}", self.fd, self.meta_fd)
    }
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// What a descriptor actually carries: bytes to be copied into a hardware
/// block, or a handle naming memory the hardware already owns (zero-copy).
pub enum Payload {
    Bytes(Vec<u8>),
    Handle(HandleKey),
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Payload::Bytes(data) => write!(f, "Bytes({} bytes)", data.len()),
            Payload::Handle(key) => write!(f, "Handle({key})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Buffer descriptor
// ---------------------------------------------------------------------------

/// One buffer crossing the session boundary.
#[derive(Debug)]
pub struct BufferDescriptor {
    pub payload: Payload,
    /// Filled bytes.
    pub size: usize,
    /// Allocated bytes (>= size).
    pub capacity: usize,
    /// 2D geometry, present for graphic (decoded picture) buffers.
    pub geometry: Option<Resolution>,
    /// Monotonically increasing sequence index assigned at submission.
    pub index: u64,
    /// Presentation timestamp in the pipeline's clock units.
    pub timestamp: u64,
    pub flags: WorkFlags,
}

impl BufferDescriptor {
    /// Descriptor for a compressed access unit carried by value.
    pub fn from_bytes(data: Vec<u8>, index: u64, timestamp: u64, flags: WorkFlags) -> Self {
        let size = data.len();
        Self {
            payload: Payload::Bytes(data),
            size,
            capacity: size,
            geometry: None,
            index,
            timestamp,
            flags,
        }
    }

    /// Descriptor for a buffer referenced by handle (zero-copy path).
    pub fn from_handle(key: HandleKey, size: usize, index: u64, timestamp: u64, flags: WorkFlags) -> Self {
        Self {
            payload: Payload::Handle(key),
            size,
            capacity: size,
            geometry: None,
            index,
            timestamp,
            flags,
        }
    }

    /// Zero-length end-of-stream marker.
    pub fn end_of_stream(index: u64) -> Self {
        Self {
            payload: Payload::Bytes(Vec::new()),
            size: 0,
            capacity: 0,
            geometry: None,
            index,
            timestamp: 0,
            flags: WorkFlags::empty().with(work_flags::END_OF_STREAM),
        }
    }

    pub fn is_eos(&self) -> bool {
        self.flags.is_eos()
    }
}
