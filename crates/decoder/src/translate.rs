//! Mapping between the pipeline's frame/format vocabulary and the hardware
//! runtime's vocabulary.
//!
//! Pure functions only; every piece of state lives in the session or the
//! state machine. Keeping the two vocabularies apart here means neither side
//! leaks its constants into the other.

use veldec_common::{PixelFormat, StreamFormat};

use crate::buffer::{work_flags, WorkFlags};

// ---------------------------------------------------------------------------
// Frame marks (pipeline vocabulary)
// ---------------------------------------------------------------------------

/// Per-frame markings in the pipeline's vocabulary.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameMarks {
    /// The payload is stream configuration (parameter sets), not a picture.
    pub codec_config: bool,
    /// The picture may be dropped without harming the stream.
    pub droppable: bool,
    /// The access unit is incomplete; more data follows.
    pub incomplete: bool,
    /// End of input.
    pub end_of_stream: bool,
}

/// Translate pipeline frame marks into the runtime's work-unit flag set.
pub fn work_flags_from_marks(marks: &FrameMarks) -> WorkFlags {
    let mut flags = WorkFlags::empty();
    if marks.end_of_stream {
        flags = flags.with(work_flags::END_OF_STREAM);
    }
    if marks.codec_config {
        flags = flags.with(work_flags::CODEC_CONFIG);
    }
    if marks.droppable {
        flags = flags.with(work_flags::DROP);
    }
    if marks.incomplete {
        flags = flags.with(work_flags::INCOMPLETE);
    }
    flags
}

/// Translate a completed unit's flag set back into pipeline frame marks.
pub fn marks_from_work_flags(flags: WorkFlags) -> FrameMarks {
    FrameMarks {
        codec_config: flags.is_codec_config(),
        droppable: flags.is_drop(),
        incomplete: flags.is_incomplete(),
        end_of_stream: flags.is_eos(),
    }
}

// ---------------------------------------------------------------------------
// Component identifiers
// ---------------------------------------------------------------------------

/// Runtime component identifier for a compressed stream format.
///
/// These are the names the component store resolves; whether a given name is
/// actually present depends on the device.
pub fn component_id(stream: StreamFormat) -> &'static str {
    match stream {
        StreamFormat::H264 => "vdec.avc",
        StreamFormat::H265 => "vdec.hevc",
        StreamFormat::Vp9 => "vdec.vp9",
        StreamFormat::Av1 => "vdec.av1",
        StreamFormat::Mpeg2 => "vdec.mpeg2",
    }
}

/// Reverse lookup, for logs and diagnostics.
pub fn stream_from_component(id: &str) -> Option<StreamFormat> {
    match id {
        "vdec.avc" => Some(StreamFormat::H264),
        "vdec.hevc" => Some(StreamFormat::H265),
        "vdec.vp9" => Some(StreamFormat::Vp9),
        "vdec.av1" => Some(StreamFormat::Av1),
        "vdec.mpeg2" => Some(StreamFormat::Mpeg2),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Raw pixel-format codes
// ---------------------------------------------------------------------------

/// Pixel-format codes in the hardware runtime's vocabulary.
pub mod raw_format {
    pub const NV12: u32 = 0x01;
    pub const NV12_COMPRESSED: u32 = 0x02;
    pub const P010: u32 = 0x03;
    pub const P010_COMPRESSED: u32 = 0x04;
}

/// Map a negotiated pipeline pixel format (plus the compressed-layout bit)
/// to the runtime's format code.
pub fn raw_pixel_format(format: PixelFormat, compressed: bool) -> u32 {
    match (format, compressed) {
        (PixelFormat::Nv12, false) => raw_format::NV12,
        (PixelFormat::Nv12, true) => raw_format::NV12_COMPRESSED,
        (PixelFormat::P010, false) => raw_format::P010,
        (PixelFormat::P010, true) => raw_format::P010_COMPRESSED,
    }
}

/// Map a runtime format code back to the pipeline vocabulary.
pub fn pixel_format_from_raw(raw: u32) -> Option<(PixelFormat, bool)> {
    match raw {
        raw_format::NV12 => Some((PixelFormat::Nv12, false)),
        raw_format::NV12_COMPRESSED => Some((PixelFormat::Nv12, true)),
        raw_format::P010 => Some((PixelFormat::P010, false)),
        raw_format::P010_COMPRESSED => Some((PixelFormat::P010, true)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marks_to_flags() {
        let marks = FrameMarks {
            codec_config: true,
            droppable: false,
            incomplete: false,
            end_of_stream: false,
        };
        let flags = work_flags_from_marks(&marks);
        assert!(flags.is_codec_config());
        assert!(!flags.is_eos());
        assert!(!flags.is_drop());
    }

    #[test]
    fn flags_to_marks() {
        let flags = WorkFlags::empty()
            .with(work_flags::END_OF_STREAM)
            .with(work_flags::DROP);
        let marks = marks_from_work_flags(flags);
        assert!(marks.end_of_stream);
        assert!(marks.droppable);
        assert!(!marks.codec_config);
    }

    #[test]
    fn component_ids_resolve_back() {
        for stream in [
            StreamFormat::H264,
            StreamFormat::H265,
            StreamFormat::Vp9,
            StreamFormat::Av1,
            StreamFormat::Mpeg2,
        ] {
            assert_eq!(stream_from_component(component_id(stream)), Some(stream));
        }
        assert_eq!(stream_from_component("venc.avc"), None);
    }

    #[test]
    fn compressed_layout_has_distinct_codes() {
        assert_ne!(
            raw_pixel_format(PixelFormat::Nv12, false),
            raw_pixel_format(PixelFormat::Nv12, true)
        );
        assert_eq!(
            pixel_format_from_raw(raw_format::NV12_COMPRESSED),
            Some((PixelFormat::Nv12, true))
        );
        assert_eq!(pixel_format_from_raw(0xFF), None);
    }
}
