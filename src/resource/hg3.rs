//! HG-3 container: a chain of frames, each carrying a chain of tagged
//! records. Parsing collects metadata and payload locations only;
//! raster decode happens per frame on demand.

use super::hgx::{self, HgxHeader, HgxOptions, ImgData};
use crate::error::Cs2Error;
use crate::util;
use anyhow::Context;
use image::RgbaImage;
use rayon::prelude::*;
use scroll::{Pread, LE};
use serde::Serialize;
use std::{collections::BTreeMap, path::Path};

#[derive(Debug, Pread)]
struct FrameHeader {
    offset_next: u32,
    id: u32,
}

#[derive(Debug, Pread)]
struct Hg3Tag {
    signature: [u8; 8],
    offset_next: u32,
    length: u32,
}

#[derive(Debug, PartialEq)]
enum TagKind {
    StdInfo,
    Img(u32),
    ImgAl,
    ImgJpg,
    Ats(u32),
    CpType,
    ImgMode,
    Unknown,
}

impl Hg3Tag {
    fn signature_str(&self) -> &str {
        let end = self
            .signature
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.signature.len());
        std::str::from_utf8(&self.signature[..end]).unwrap_or("")
    }

    fn kind(&self) -> TagKind {
        let sig = self.signature_str();
        if sig.starts_with("stdinfo") {
            TagKind::StdInfo
        } else if sig == "img_al" {
            TagKind::ImgAl
        } else if sig == "img_jpg" {
            TagKind::ImgJpg
        } else if let Some(id) = numeric_suffix(sig, "img") {
            TagKind::Img(id)
        } else if let Some(id) = numeric_suffix(sig, "ats") {
            TagKind::Ats(id)
        } else if sig == "cptype" {
            TagKind::CpType
        } else if sig == "imgmode" {
            TagKind::ImgMode
        } else {
            TagKind::Unknown
        }
    }
}

/// Matches signatures of the form `{prefix}NNNN..` with at least four
/// decimal digits.
fn numeric_suffix(sig: &str, prefix: &str) -> Option<u32> {
    let digits = sig.strip_prefix(prefix)?;
    if digits.len() >= 4 && digits.bytes().all(|b| b.is_ascii_digit()) {
        digits.parse().ok()
    } else {
        None
    }
}

/// Fixed per-frame image parameters carried by the mandatory
/// `stdinfo` tag.
#[derive(Debug, Clone, Copy, Pread, Serialize)]
pub struct StdInfo {
    pub width: u32,
    pub height: u32,
    pub depth_bits: u32,
    pub offset_x: u32,
    pub offset_y: u32,
    pub total_width: u32,
    pub total_height: u32,
    pub is_transparent: u32,
    pub base_x: u32,
    pub base_y: u32,
}

#[derive(Debug, Pread)]
struct Hg3Img {
    unknown: u32,
    height: u32,
    data: ImgData,
}

#[derive(Debug, Pread)]
struct Hg3ImgAl {
    compressed_length: u32,
    decompressed_length: u32,
}

/// Named anchor rectangle, from an `ats####` tag.
#[derive(Debug, Clone, Copy, Pread, Serialize)]
pub struct Hg3Ats {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub color: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum ImageKind {
    Standard,
    Jpeg,
    Alpha,
    JpegAlpha,
}

#[derive(Debug)]
struct ImgAtom {
    payload_offset: usize,
    img: Hg3Img,
}

#[derive(Debug)]
struct AlAtom {
    payload_offset: usize,
    al: Hg3ImgAl,
}

#[derive(Debug)]
struct JpgAtom {
    payload_offset: usize,
    length: usize,
}

#[derive(Debug, Serialize)]
pub struct Hg3Frame {
    pub id: u32,
    pub std_info: StdInfo,
    pub kind: ImageKind,
    pub ats: BTreeMap<u32, Hg3Ats>,
    pub cp_type: Option<u32>,
    pub img_mode: Option<u32>,
    #[serde(skip)]
    img: Option<ImgAtom>,
    #[serde(skip)]
    img_al: Option<AlAtom>,
    #[serde(skip)]
    img_jpg: Option<JpgAtom>,
}

#[derive(Debug, Serialize)]
pub struct Hg3 {
    pub name: String,
    pub frames: Vec<Hg3Frame>,
}

impl Hg3 {
    /// Parses the frame and tag chains without decoding any raster.
    pub fn from_bytes(buf: &[u8], name: &str) -> anyhow::Result<Self> {
        let off = &mut 0;
        let header: HgxHeader = buf.gread_with(off, LE)?;
        if header.signature != hgx::HG3_MAGIC {
            return Err(Cs2Error::UnrecognizedFormat(
                name.into(),
                header.signature.to_vec(),
            )
            .into());
        }
        log::debug!(
            "{}: HG-3 header size {} kind 0x{:X}",
            name,
            header.header_size,
            header.kind
        );

        let mut frames = Vec::new();
        let mut frame_start = *off;
        loop {
            let (frame, offset_next) = parse_frame(buf, frame_start, name)?;
            frames.push(frame);
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
        Ok(Self { name: name.to_owned(), frames })
    }

    /// Decodes one frame to a tightly packed RGBA raster.
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
        let std = &frame.std_info;
        let mut image = match frame.kind {
            ImageKind::Standard => decode_standard(buf, frame, options)?,
            ImageKind::Jpeg => decode_jpeg(buf, frame)?,
            ImageKind::Alpha => decode_alpha(buf, frame)?,
            ImageKind::JpegAlpha => decode_jpeg_alpha(buf, frame)?,
        };
        // Standard frames are stored bottom-up and fold the flip into
        // their own decode; the other variants flip on request.
        if options.flip && frame.kind != ImageKind::Standard {
            image = image::imageops::flip_vertical(&image);
        }
        Ok(if options.expand {
            hgx::expand_onto_canvas(
                image,
                std.total_width,
                std.total_height,
                std.offset_x,
                std.offset_y,
            )
        } else {
            image
        })
    }

    /// Writes one `{stem}+{id:04}.png` per frame into `output_dir`,
    /// decoding frames in parallel.
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
                let path =
                    output_dir.join(format!("{}+{:04}.png", stem, frame.id));
                image
                    .save(&path)
                    .with_context(|| format!("Could not save {:?}", path))
            })
    }
}

fn parse_frame(
    buf: &[u8],
    frame_start: usize,
    name: &str,
) -> anyhow::Result<(Hg3Frame, u32)> {
    let mut pos = frame_start;
    let off = &mut pos;
    let frame_header: FrameHeader = buf.gread_with(off, LE)?;

    let mut tag: Hg3Tag = buf.gread_with(off, LE)?;
    if tag.kind() != TagKind::StdInfo {
        return Err(Cs2Error::MissingStdInfo {
            name: name.to_owned(),
            offset: frame_start,
        }
        .into());
    }
    let std_info: StdInfo = buf.gread_with(off, LE)?;

    let mut frame = Hg3Frame {
        id: frame_header.id,
        std_info,
        kind: ImageKind::Standard,
        ats: BTreeMap::new(),
        cp_type: None,
        img_mode: None,
        img: None,
        img_al: None,
        img_jpg: None,
    };

    while tag.offset_next != 0 {
        tag = buf.gread_with(off, LE)?;
        let payload_start = *off;

        match tag.kind() {
            TagKind::Img(_) => {
                let img: Hg3Img = buf.gread_with(off, LE)?;
                // First image tag of any family wins the frame.
                if frame.img.is_none()
                    && frame.img_al.is_none()
                    && frame.img_jpg.is_none()
                {
                    frame.img =
                        Some(ImgAtom { payload_offset: *off, img });
                } else {
                    log::warn!(
                        "{}: extra \"{}\" tag ignored",
                        name,
                        tag.signature_str()
                    );
                }
            }
            TagKind::ImgAl => {
                let al: Hg3ImgAl = buf.gread_with(off, LE)?;
                if frame.img.is_none() && frame.img_al.is_none() {
                    frame.img_al =
                        Some(AlAtom { payload_offset: *off, al });
                } else {
                    log::warn!("{}: extra \"img_al\" tag ignored", name);
                }
            }
            TagKind::ImgJpg => {
                // No fixed struct; the tag length is the JPEG size.
                if frame.img.is_none() && frame.img_jpg.is_none() {
                    frame.img_jpg = Some(JpgAtom {
                        payload_offset: payload_start,
                        length: tag.length as usize,
                    });
                } else {
                    log::warn!("{}: extra \"img_jpg\" tag ignored", name);
                }
            }
            TagKind::Ats(id) => {
                let ats: Hg3Ats = buf.gread_with(off, LE)?;
                frame.ats.insert(id, ats);
            }
            TagKind::CpType => {
                frame.cp_type = Some(buf.gread_with::<u32>(off, LE)?);
            }
            TagKind::ImgMode => {
                frame.img_mode = Some(buf.gread_with::<u32>(off, LE)?);
            }
            TagKind::StdInfo | TagKind::Unknown => {
                log::warn!(
                    "{}: unknown tag \"{}\" at offset 0x{:X}, skipped",
                    name,
                    tag.signature_str(),
                    payload_start
                );
            }
        }

        *off = payload_start + tag.length as usize;
    }

    frame.kind = match (&frame.img, &frame.img_jpg, &frame.img_al) {
        (Some(_), _, _) => ImageKind::Standard,
        (None, Some(_), Some(_)) => ImageKind::JpegAlpha,
        (None, Some(_), None) => ImageKind::Jpeg,
        (None, None, Some(_)) => ImageKind::Alpha,
        (None, None, None) => {
            return Err(Cs2Error::NoImageTags(name.to_owned()).into())
        }
    };
    Ok((frame, frame_header.offset_next))
}

fn decode_standard(
    buf: &[u8],
    frame: &Hg3Frame,
    options: HgxOptions,
) -> anyhow::Result<RgbaImage> {
    let std = &frame.std_info;
    let atom = frame
        .img
        .as_ref()
        .ok_or_else(|| Cs2Error::NoImageTags(String::new()))?;
    let data_len = atom.img.data.compressed_data_length as usize;
    let cmd_len = atom.img.data.compressed_cmd_length as usize;
    let data_start = atom.payload_offset;
    let cmd_start = data_start + data_len;
    let data = buf
        .get(data_start..cmd_start)
        .context("Pixel payload out of bounds")?;
    let cmd = buf
        .get(cmd_start..cmd_start + cmd_len)
        .context("Command payload out of bounds")?;

    let pixels = hgx::process_image(
        data,
        cmd,
        &atom.img.data,
        std.width,
        std.height,
        std.depth_bits,
    )?;
    // Standard frames are stored bottom-up.
    hgx::raster_to_rgba(
        pixels,
        std.width,
        std.height,
        std.depth_bits,
        !options.flip,
    )
}

fn decode_jpeg(buf: &[u8], frame: &Hg3Frame) -> anyhow::Result<RgbaImage> {
    let atom = frame
        .img_jpg
        .as_ref()
        .ok_or_else(|| Cs2Error::NoImageTags(String::new()))?;
    let bytes = buf
        .get(atom.payload_offset..atom.payload_offset + atom.length)
        .context("JPEG payload out of bounds")?;
    Ok(image::load_from_memory_with_format(
        bytes,
        image::ImageFormat::Jpeg,
    )?
    .to_rgba8())
}

/// Inflates the alpha payload, padding a truncated mask with zeros to
/// the declared size.
fn read_alpha_mask(buf: &[u8], frame: &Hg3Frame) -> anyhow::Result<Vec<u8>> {
    let std = &frame.std_info;
    hgx::check_dimensions(std.width, std.height)?;
    let atom = frame
        .img_al
        .as_ref()
        .ok_or_else(|| Cs2Error::NoImageTags(String::new()))?;
    let start = atom.payload_offset;
    let compressed = buf
        .get(start..start + atom.al.compressed_length as usize)
        .context("Alpha payload out of bounds")?;
    let declared = atom.al.decompressed_length as usize;
    if (declared as u64) < u64::from(std.width) * u64::from(std.height) {
        return Err(Cs2Error::CorruptImage(format!(
            "alpha mask holds {} bytes for {}x{} pixels",
            declared, std.width, std.height
        ))
        .into());
    }
    let mut mask = util::zlib_decompress_partial(compressed, declared);
    if mask.len() < declared {
        log::warn!(
            "alpha mask inflated to {} of {} bytes, padding",
            mask.len(),
            declared
        );
        mask.resize(declared, 0);
    }
    Ok(mask)
}

fn decode_alpha(buf: &[u8], frame: &Hg3Frame) -> anyhow::Result<RgbaImage> {
    let std = &frame.std_info;
    let mask = read_alpha_mask(buf, frame)?;
    let mut image = RgbaImage::new(std.width, std.height);
    for (y, row) in mask.chunks_exact(std.width as usize).take(std.height as usize).enumerate()
    {
        for (x, &a) in row.iter().enumerate() {
            let value = 0xFF - a;
            image.put_pixel(
                x as u32,
                y as u32,
                image::Rgba([value, value, value, 0xFF]),
            );
        }
    }
    Ok(image)
}

fn decode_jpeg_alpha(buf: &[u8], frame: &Hg3Frame) -> anyhow::Result<RgbaImage> {
    let std = &frame.std_info;
    let mut image = decode_jpeg(buf, frame)?;
    if image.dimensions() != (std.width, std.height) {
        return Err(Cs2Error::CorruptImage(format!(
            "JPEG is {}x{} but stdinfo says {}x{}",
            image.width(),
            image.height(),
            std.width,
            std.height
        ))
        .into());
    }
    // The mask byte is the alpha channel as-is, unlike the plain alpha
    // variant.
    let mask = read_alpha_mask(buf, frame)?;
    for (y, row) in mask.chunks_exact(std.width as usize).take(std.height as usize).enumerate()
    {
        for (x, &a) in row.iter().enumerate() {
            image.get_pixel_mut(x as u32, y as u32).0[3] = a;
        }
    }
    Ok(image)
}
