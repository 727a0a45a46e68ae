//! HG-2 container: a flat chain of frame records, each embedding its
//! image parameters and compressed payload lengths directly instead of
//! HG-3's tag list. Every frame is a standard delta-filtered raster.

use super::hgx::{self, HgxHeader, HgxOptions, ImgData};
use crate::error::Cs2Error;
use anyhow::Context;
use image::RgbaImage;
use rayon::prelude::*;
use scroll::{Pread, LE};
use serde::Serialize;
use std::path::Path;

// Header kind that appends a base-offset record to every frame.
const KIND_WITH_BASE: u32 = 0x25;

#[derive(Debug, Clone, Copy, Pread, Serialize)]
pub struct Hg2Img {
    pub width: u32,
    pub height: u32,
    pub depth_bits: u32,
    unknown1: u32,
    unknown2: u32,
    pub data: ImgData,
    pub extra_length: u32,
    pub id: u32,
    pub total_width: u32,
    pub total_height: u32,
    pub offset_x: u32,
    pub offset_y: u32,
    pub is_transparent: u32,
    pub offset_next: u32,
}

#[derive(Debug, Clone, Copy, Pread, Serialize)]
pub struct Hg2Base {
    pub base_x: u32,
    pub base_y: u32,
}

#[derive(Debug, Serialize)]
pub struct Hg2Frame {
    pub img: Hg2Img,
    pub base: Option<Hg2Base>,
    #[serde(skip)]
    payload_offset: usize,
}

#[derive(Debug, Serialize)]
pub struct Hg2 {
    pub name: String,
    pub kind: u32,
    pub frames: Vec<Hg2Frame>,
}

impl Hg2 {
    pub fn from_bytes(buf: &[u8], name: &str) -> anyhow::Result<Self> {
        let off = &mut 0;
        let header: HgxHeader = buf.gread_with(off, LE)?;
        if header.signature != hgx::HG2_MAGIC {
            return Err(Cs2Error::UnrecognizedFormat(
                name.into(),
                header.signature.to_vec(),
            )
            .into());
        }
        log::debug!("{}: HG-2 kind 0x{:X}", name, header.kind);

        let mut frames = Vec::new();
        let mut frame_start = *off;
        loop {
            let mut cursor = frame_start;
            let pos = &mut cursor;
            let img: Hg2Img = buf.gread_with(pos, LE)?;
            let base = if header.kind == KIND_WITH_BASE {
                Some(buf.gread_with::<Hg2Base>(pos, LE)?)
            } else {
                None
            };
            let offset_next = img.offset_next;
            frames.push(Hg2Frame { img, base, payload_offset: *pos });
            if offset_next == 0 {
                break;
            }
            frame_start = frame_start
                .checked_add(offset_next as usize)
                .filter(|&next| next < buf.len())
                .ok_or_else(|| Cs2Error::StalledChain {
                    name: name.to_owned(),
                    offset: frame_start,
                })?;
        }
        Ok(Self { name: name.to_owned(), kind: header.kind, frames })
    }

    pub fn decode_frame(
        &self,
        buf: &[u8],
        index: usize,
        options: HgxOptions,
    ) -> anyhow::Result<RgbaImage> {
        let frame = self
            .frames
            .get(index)
            .with_context(|| format!("{}: no frame {}", self.name, index))?;
        let img = &frame.img;

        let data_start = frame.payload_offset;
        let cmd_start = data_start + img.data.compressed_data_length as usize;
        let data = buf
            .get(data_start..cmd_start)
            .context("Pixel payload out of bounds")?;
        let cmd = buf
            .get(cmd_start..cmd_start + img.data.compressed_cmd_length as usize)
            .context("Command payload out of bounds")?;

        let pixels = hgx::process_image(
            data,
            cmd,
            &img.data,
            img.width,
            img.height,
            img.depth_bits,
        )?;
        // Stored bottom-up, like HG-3 standard frames.
        let image = hgx::raster_to_rgba(
            pixels,
            img.width,
            img.height,
            img.depth_bits,
            !options.flip,
        )?;
        Ok(if options.expand {
            hgx::expand_onto_canvas(
                image,
                img.total_width,
                img.total_height,
                img.offset_x,
                img.offset_y,
            )
        } else {
            image
        })
    }

    pub fn extract_images(
        &self,
        buf: &[u8],
        output_dir: &Path,
        options: HgxOptions,
    ) -> anyhow::Result<()> {
        let stem = Path::new(&self.name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.name.clone());
        self.frames
            .par_iter()
            .enumerate()
            .try_for_each(|(index, frame)| {
                let image = self.decode_frame(buf, index, options)?;
                let path = output_dir
                    .join(format!("{}+{:04}.png", stem, frame.img.id));
                image
                    .save(&path)
                    .with_context(|| format!("Could not save {:?}", path))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put_u32(buf: &mut Vec<u8>, value: u32) {
        buf.extend_from_slice(&value.to_le_bytes());
    }

    fn deflate(data: &[u8]) -> Vec<u8> {
        use flate2::{read::ZlibEncoder, Compression};
        use std::io::Read;

        let mut encoder = ZlibEncoder::new(data, Compression::default());
        let mut ret = Vec::new();
        encoder.read_to_end(&mut ret).unwrap();
        ret
    }

    fn put_frame(buf: &mut Vec<u8>, id: u32, offset_next: u32, with_base: bool) {
        let data = deflate(&(1..=16).collect::<Vec<u8>>());
        let cmd = deflate(&[33, 64, 0]);
        // width, height, depth, unknown1, unknown2
        for &v in &[2, 2, 32, 0, 0] {
            put_u32(buf, v);
        }
        put_u32(buf, data.len() as u32);
        put_u32(buf, 16);
        put_u32(buf, cmd.len() as u32);
        put_u32(buf, 3);
        // extra_length, id, total size, offsets, transparency, next
        for &v in &[48, id, 2, 2, 0, 0, 0, offset_next] {
            put_u32(buf, v);
        }
        if with_base {
            put_u32(buf, 0);
            put_u32(buf, 0);
        }
        buf.extend_from_slice(&data);
        buf.extend_from_slice(&cmd);
    }

    fn container(kind: u32, frame_count: usize) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"HG-2");
        put_u32(&mut buf, 12);
        put_u32(&mut buf, kind);
        let with_base = kind == KIND_WITH_BASE;
        for i in 0..frame_count {
            let last = i + 1 == frame_count;
            let mut frame = Vec::new();
            put_frame(&mut frame, i as u32, 0, with_base);
            let offset_next =
                if last { 0 } else { frame.len() as u32 };
            put_frame(&mut buf, i as u32, offset_next, with_base);
        }
        buf
    }

    #[test]
    fn parses_and_decodes_single_frame() {
        let buf = container(0x20, 1);
        let hg2 = Hg2::from_bytes(&buf, "test.hg2").unwrap();
        assert_eq!(hg2.frames.len(), 1);
        assert!(hg2.frames[0].base.is_none());
        let image = hg2.decode_frame(&buf, 0, HgxOptions::default()).unwrap();
        assert_eq!(image.dimensions(), (2, 2));
        assert_eq!(
            image.into_raw(),
            [0, 228, 85, 0, 255, 26, 42, 0, 0, 242, 213, 0, 0, 228, 42, 0]
        );
    }

    #[test]
    fn base_record_follows_frame_when_kind_matches() {
        let buf = container(KIND_WITH_BASE, 2);
        let hg2 = Hg2::from_bytes(&buf, "base.hg2").unwrap();
        assert_eq!(hg2.frames.len(), 2);
        assert!(hg2.frames.iter().all(|f| f.base.is_some()));
        for index in 0..2 {
            let image =
                hg2.decode_frame(&buf, index, HgxOptions::default()).unwrap();
            assert_eq!(image.dimensions(), (2, 2));
        }
    }

    #[test]
    fn chain_walks_multiple_frames() {
        let buf = container(0x20, 3);
        let hg2 = Hg2::from_bytes(&buf, "multi.hg2").unwrap();
        assert_eq!(hg2.frames.len(), 3);
        assert_eq!(hg2.frames[2].img.id, 2);
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let mut buf = container(0x20, 1);
        buf[3] = b'9';
        assert!(Hg2::from_bytes(&buf, "wrong.hg2").is_err());
    }

    #[test]
    fn truncated_chain_is_an_error() {
        let mut buf = container(0x20, 1);
        // Point the single frame's next-offset past the end of file.
        let next_offset_pos = 12 + 16 * 4;
        buf[next_offset_pos..next_offset_pos + 4]
            .copy_from_slice(&0xFFFF_0000u32.to_le_bytes());
        assert!(Hg2::from_bytes(&buf, "trunc.hg2").is_err());
    }
}
