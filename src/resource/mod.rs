pub mod hg2;
pub mod hg3;
pub mod hgx;

use crate::error::Cs2Error;
use hg2::Hg2;
use hg3::Hg3;
use hgx::HgxOptions;
use image::RgbaImage;
use serde::Serialize;
use std::path::Path;

#[derive(Debug)]
pub enum ResourceMagic {
    Hg2,
    Hg3,
    Unrecognized,
}

impl ResourceMagic {
    pub fn parse_magic(buf: &[u8]) -> Self {
        match buf {
            // HG-2
            [72, 71, 45, 50, ..] => Self::Hg2,
            // HG-3
            [72, 71, 45, 51, ..] => Self::Hg3,
            _ => Self::Unrecognized,
        }
    }
}

/// A parsed image container of either flavor; raster decode stays
/// deferred until a frame is requested.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Container {
    Hg2(Hg2),
    Hg3(Hg3),
}

impl Container {
    pub fn from_bytes(buf: &[u8], name: &str) -> anyhow::Result<Self> {
        match ResourceMagic::parse_magic(buf) {
            ResourceMagic::Hg2 => Ok(Self::Hg2(Hg2::from_bytes(buf, name)?)),
            ResourceMagic::Hg3 => Ok(Self::Hg3(Hg3::from_bytes(buf, name)?)),
            ResourceMagic::Unrecognized => Err(Cs2Error::UnrecognizedFormat(
                name.into(),
                buf.iter().take(16).copied().collect(),
            )
            .into()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Hg2(hg2) => &hg2.name,
            Self::Hg3(hg3) => &hg3.name,
        }
    }

    pub fn frame_count(&self) -> usize {
        match self {
            Self::Hg2(hg2) => hg2.frames.len(),
            Self::Hg3(hg3) => hg3.frames.len(),
        }
    }

    pub fn decode_frame(
        &self,
        buf: &[u8],
        index: usize,
        options: HgxOptions,
    ) -> anyhow::Result<RgbaImage> {
        match self {
            Self::Hg2(hg2) => hg2.decode_frame(buf, index, options),
            Self::Hg3(hg3) => hg3.decode_frame(buf, index, options),
        }
    }

    pub fn extract_images(
        &self,
        buf: &[u8],
        output_dir: &Path,
        options: HgxOptions,
    ) -> anyhow::Result<()> {
        match self {
            Self::Hg2(hg2) => hg2.extract_images(buf, output_dir, options),
            Self::Hg3(hg3) => hg3.extract_images(buf, output_dir, options),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_detection() {
        assert!(matches!(
            ResourceMagic::parse_magic(b"HG-2\x0c\x00\x00\x00"),
            ResourceMagic::Hg2
        ));
        assert!(matches!(
            ResourceMagic::parse_magic(b"HG-3\x0c\x00\x00\x00"),
            ResourceMagic::Hg3
        ));
        assert!(matches!(
            ResourceMagic::parse_magic(b"PNG\x00"),
            ResourceMagic::Unrecognized
        ));
    }

    #[test]
    fn unrecognized_container_is_an_error() {
        let err = Container::from_bytes(b"not a container", "foo.bin")
            .unwrap_err();
        assert!(err.to_string().contains("Unrecognized"));
    }
}
