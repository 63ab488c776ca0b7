//! Shared vocabulary for the veldec workspace.
//!
//! Types in this crate cross the boundary between the pipeline-facing
//! decoder element and the hardware session layer, so they carry no
//! behavior beyond simple conversions and display helpers.

mod error;

pub use error::DecodeError;

use serde::{Deserialize, Serialize};

/// Compressed stream formats the decode session can be created for.
///
/// Whether a given format is actually available depends on the component
/// store of the hardware runtime on the target device.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamFormat {
    H264,
    H265,
    Vp9,
    Av1,
    Mpeg2,
}

impl StreamFormat {
    /// Human-readable codec name for logs and error messages.
    pub fn display_name(&self) -> &'static str {
        match self {
            StreamFormat::H264 => "H.264/AVC",
            StreamFormat::H265 => "H.265/HEVC",
            StreamFormat::Vp9 => "VP9",
            StreamFormat::Av1 => "AV1",
            StreamFormat::Mpeg2 => "MPEG-2",
        }
    }
}

impl std::fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Uncompressed pixel layouts the session can deliver.
///
/// Whether the planes are carried in the vendor's bandwidth-compressed
/// tiling is negotiated separately; the layout modifier attached to each
/// delivered buffer tells consumers how to read it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Nv12,
    P010,
}

/// Scan layout of the incoming stream.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterlaceMode {
    #[default]
    Progressive,
    Interleaved,
}

/// Order in which the hardware hands back decoded pictures.
///
/// This is a hardware configuration parameter, not software logic: the
/// session delivers buffers in whatever order the runtime completes them.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputOrder {
    #[default]
    Display,
    Decode,
}

/// 2D geometry of a picture buffer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Pixel count, used for sizing linear copies of uncompressed data.
    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
