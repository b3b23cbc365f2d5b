//! Hardware acceleration selection for video decoding
//!
//! Decoders receive an ordered list of candidate methods and report the one
//! they actually opened with. The engine itself never touches a device; it
//! only carries the choice from configuration to the backend and back into
//! the probed [`VideoFormat`](super::VideoFormat).

use crate::utils::error::{CCPlayerError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Hardware acceleration method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareAcceleration {
    /// Software decoding
    #[default]
    None,

    /// Video Decode and Presentation API for Unix
    Vdpau,

    /// NVIDIA CUDA / NVDEC
    Cuda,

    /// Video Acceleration API (Linux)
    Vaapi,

    /// DirectX Video Acceleration 2 (Windows)
    Dxva2,

    /// Intel Quick Sync Video
    Qsv,

    /// VideoToolbox (macOS)
    VideoToolbox,

    /// Direct3D11 Video Acceleration (Windows)
    D3d11va,

    /// Direct Rendering Manager
    Drm,

    OpenCl,

    /// Android MediaCodec
    MediaCodec,

    Vulkan,

    /// Direct3D12 Video Acceleration (Windows)
    D3d12va,
}

impl HardwareAcceleration {
    /// All methods in preference order used when nothing is configured
    pub const ALL: [HardwareAcceleration; 13] = [
        HardwareAcceleration::None,
        HardwareAcceleration::Vdpau,
        HardwareAcceleration::Cuda,
        HardwareAcceleration::Vaapi,
        HardwareAcceleration::Dxva2,
        HardwareAcceleration::Qsv,
        HardwareAcceleration::VideoToolbox,
        HardwareAcceleration::D3d11va,
        HardwareAcceleration::Drm,
        HardwareAcceleration::OpenCl,
        HardwareAcceleration::MediaCodec,
        HardwareAcceleration::Vulkan,
        HardwareAcceleration::D3d12va,
    ];

    /// Lowercase name used in configuration files and locations
    pub fn name(&self) -> &'static str {
        match self {
            HardwareAcceleration::None => "none",
            HardwareAcceleration::Vdpau => "vdpau",
            HardwareAcceleration::Cuda => "cuda",
            HardwareAcceleration::Vaapi => "vaapi",
            HardwareAcceleration::Dxva2 => "dxva2",
            HardwareAcceleration::Qsv => "qsv",
            HardwareAcceleration::VideoToolbox => "videotoolbox",
            HardwareAcceleration::D3d11va => "d3d11va",
            HardwareAcceleration::Drm => "drm",
            HardwareAcceleration::OpenCl => "opencl",
            HardwareAcceleration::MediaCodec => "mediacodec",
            HardwareAcceleration::Vulkan => "vulkan",
            HardwareAcceleration::D3d12va => "d3d12va",
        }
    }

    pub fn is_hardware(&self) -> bool {
        *self != HardwareAcceleration::None
    }
}

impl fmt::Display for HardwareAcceleration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HardwareAcceleration {
    type Err = CCPlayerError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        HardwareAcceleration::ALL
            .iter()
            .copied()
            .find(|method| method.name() == wanted)
            .ok_or_else(|| {
                CCPlayerError::InvalidArgument(format!("Unknown hardware acceleration: {}", s))
            })
    }
}

/// Pick the first candidate the decoder supports, falling back to software
///
/// # Arguments
///
/// * `candidates` - Methods in order of preference
/// * `supported` - Methods available to the decoder
pub fn select(
    candidates: &[HardwareAcceleration],
    supported: &[HardwareAcceleration],
) -> HardwareAcceleration {
    candidates
        .iter()
        .copied()
        .find(|candidate| supported.contains(candidate))
        .unwrap_or(HardwareAcceleration::None)
}
