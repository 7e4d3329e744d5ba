//! Offline capture artifacts.
//!
//! Captures are stored as a small self-describing container, or as PNG.
//!
//! # Container layout
//!
//! Every field is little-endian.
//!
//! | Offset | Size | Field                                  |
//! |--------|------|----------------------------------------|
//! | 0      | 4    | magic `RCAP`                           |
//! | 4      | 4    | version                                |
//! | 8      | 4    | width                                  |
//! | 12     | 4    | height                                 |
//! | 16     | 4    | depth (always 1)                       |
//! | 20     | 4    | layer count                            |
//! | 24     | 4    | mip count                              |
//! | 28     | 4    | format count                           |
//! | 32     | 4    | flags (`1` = contains data)            |
//! | 36     | 4    | image type (`1` = 2D)                  |
//! | 40     | 8    | payload length in bytes                |
//! | 48     | 4·n  | one format tag per stored image        |
//! | …      | …    | raw texels, rows top to bottom         |
//!
//! Files are written to a sibling `.partial` file first and renamed into
//! place once complete, so an aborted capture never leaves a truncated
//! artifact at the requested path.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{RenderError, Result};
use crate::gpu::{Extent, ImageFormat};

pub const MAGIC: [u8; 4] = *b"RCAP";
pub const VERSION: u32 = 1;
pub const FLAG_CONTAINS_DATA: u32 = 1;
pub const IMAGE_TYPE_2D: u32 = 1;

const HEADER_LEN: usize = 48;

/// On-disk representation of a capture.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureFormat {
    #[default]
    Container,
    Png,
}

/// A pending offline capture.
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureRequest {
    pub size: Extent,
    /// Submissions accumulated into the image.
    pub samples: u32,
    pub path: PathBuf,
    pub format: CaptureFormat,
}

impl CaptureRequest {
    pub fn new(width: u32, height: u32, samples: u32, path: impl Into<PathBuf>) -> Self {
        Self {
            size: Extent::d2(width, height),
            samples: samples.max(1),
            path: path.into(),
            format: CaptureFormat::Container,
        }
    }

    pub fn with_format(mut self, format: CaptureFormat) -> Self {
        self.format = format;
        self
    }

    /// Where the artifact ends up. PNG captures get a `.png` extension when
    /// the path has none.
    pub fn artifact_path(&self) -> PathBuf {
        match self.format {
            CaptureFormat::Png if self.path.extension().is_none() => {
                self.path.with_extension("png")
            }
            _ => self.path.clone(),
        }
    }
}

/// A decoded capture container.
#[derive(Clone, Debug, PartialEq)]
pub struct CapturedImage {
    pub extent: Extent,
    pub format: ImageFormat,
    pub data: Vec<u8>,
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    path.with_file_name(name)
}

/// Writes to `path` through a sibling temporary file.
fn write_atomically(path: &Path, write: impl FnOnce(&Path) -> Result<()>) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let partial = partial_path(path);
    if let Err(err) = write(&partial) {
        let _ = fs::remove_file(&partial);
        return Err(err);
    }
    fs::rename(&partial, path)?;
    Ok(())
}

fn check_payload(extent: Extent, format: ImageFormat, data: &[u8]) -> Result<()> {
    let expected = u64::from(extent.width)
        .checked_mul(u64::from(extent.height))
        .and_then(|n| n.checked_mul(u64::from(extent.depth)))
        .and_then(|n| n.checked_mul(u64::from(format.bytes_per_pixel())))
        .ok_or_else(|| {
            RenderError::InvalidContainer(format!(
                "{}x{}x{} {format:?} overflows the payload size",
                extent.width, extent.height, extent.depth
            ))
        })?;
    if data.len() as u64 != expected {
        return Err(RenderError::InvalidContainer(format!(
            "payload is {} bytes, {}x{} {:?} needs {expected}",
            data.len(),
            extent.width,
            extent.height,
            format
        )));
    }
    Ok(())
}

/// Encodes a 2D image as a container.
pub fn encode_container(extent: Extent, format: ImageFormat, data: &[u8]) -> Result<Vec<u8>> {
    check_payload(extent, format, data)?;
    let mut out = Vec::with_capacity(HEADER_LEN + 4 + data.len());
    out.extend_from_slice(&MAGIC);
    for field in [
        VERSION,
        extent.width,
        extent.height,
        1,
        1,
        1,
        1,
        FLAG_CONTAINS_DATA,
        IMAGE_TYPE_2D,
    ] {
        out.extend_from_slice(&field.to_le_bytes());
    }
    out.extend_from_slice(&(data.len() as u64).to_le_bytes());
    out.extend_from_slice(&(format.tag() as u32).to_le_bytes());
    out.extend_from_slice(data);
    Ok(out)
}

pub fn decode_container(bytes: &[u8]) -> Result<CapturedImage> {
    let invalid = |msg: &str| RenderError::InvalidContainer(msg.to_string());
    let u32_at = |offset: usize| -> Result<u32> {
        bytes
            .get(offset..offset + 4)
            .and_then(|b| b.try_into().ok())
            .map(u32::from_le_bytes)
            .ok_or_else(|| invalid("truncated header"))
    };

    if bytes.get(..4) != Some(&MAGIC[..]) {
        return Err(invalid("bad magic"));
    }
    let version = u32_at(4)?;
    if version != VERSION {
        return Err(RenderError::InvalidContainer(format!(
            "unsupported version {version}"
        )));
    }
    let extent = Extent::d3(u32_at(8)?, u32_at(12)?, u32_at(16)?);
    let formats = u32_at(28)? as usize;
    if u32_at(32)? & FLAG_CONTAINS_DATA == 0 {
        return Err(invalid("container holds no data"));
    }
    let payload_len = bytes
        .get(40..48)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_le_bytes)
        .ok_or_else(|| invalid("truncated header"))?;
    if formats == 0 {
        return Err(invalid("no format tags"));
    }
    let tag = u32_at(HEADER_LEN)?;
    let format = u16::try_from(tag)
        .ok()
        .and_then(ImageFormat::from_tag)
        .ok_or_else(|| RenderError::InvalidContainer(format!("unknown format tag {tag}")))?;

    let start = formats
        .checked_mul(4)
        .and_then(|tags| tags.checked_add(HEADER_LEN))
        .ok_or_else(|| invalid("format count overflows"))?;
    let end = usize::try_from(payload_len)
        .ok()
        .and_then(|len| start.checked_add(len))
        .ok_or_else(|| invalid("payload length overflows"))?;
    let data = bytes
        .get(start..end)
        .ok_or_else(|| invalid("truncated payload"))?
        .to_vec();
    check_payload(extent, format, &data)?;
    Ok(CapturedImage {
        extent,
        format,
        data,
    })
}

pub fn write_container(path: &Path, extent: Extent, format: ImageFormat, data: &[u8]) -> Result<()> {
    let encoded = encode_container(extent, format, data)?;
    write_atomically(path, |partial| {
        let mut file = BufWriter::new(fs::File::create(partial)?);
        file.write_all(&encoded)?;
        file.flush()?;
        Ok(())
    })
}

pub fn read_container(path: &Path) -> Result<CapturedImage> {
    decode_container(&fs::read(path)?)
}

/// Writes an `Rgba8Unorm` image as PNG.
pub fn write_png(path: &Path, extent: Extent, format: ImageFormat, data: &[u8]) -> Result<()> {
    if format != ImageFormat::Rgba8Unorm {
        return Err(RenderError::InvalidContainer(format!(
            "PNG export needs Rgba8Unorm, got {format:?}"
        )));
    }
    check_payload(extent, format, data)?;
    write_atomically(path, |partial| {
        image::save_buffer_with_format(
            partial,
            data,
            extent.width,
            extent.height,
            image::ExtendedColorType::Rgba8,
            image::ImageFormat::Png,
        )?;
        Ok(())
    })
}

/// Writes a read-back capture the way `request` asks for. Returns the path
/// written.
pub fn save(
    request: &CaptureRequest,
    extent: Extent,
    format: ImageFormat,
    data: &[u8],
) -> Result<PathBuf> {
    let path = request.artifact_path();
    match request.format {
        CaptureFormat::Container => write_container(&path, extent, format, data)?,
        CaptureFormat::Png => write_png(&path, extent, format, data)?,
    }
    info!(
        "Wrote {}x{} capture to {}",
        extent.width,
        extent.height,
        path.display()
    );
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texels(extent: Extent) -> Vec<u8> {
        (0..extent.texel_count() * 4).map(|i| (i % 256) as u8).collect()
    }

    #[test]
    fn container_header_is_little_endian() {
        let extent = Extent::d2(3, 2);
        let bytes = encode_container(extent, ImageFormat::Rgba8Unorm, &texels(extent)).unwrap();
        assert_eq!(&bytes[..4], b"RCAP");
        assert_eq!(&bytes[8..12], &[3, 0, 0, 0]);
        assert_eq!(&bytes[12..16], &[2, 0, 0, 0]);
        assert_eq!(&bytes[16..20], &[1, 0, 0, 0]);
        assert_eq!(&bytes[40..48], &24u64.to_le_bytes());
        assert_eq!(bytes.len(), HEADER_LEN + 4 + 24);
    }

    #[test]
    fn container_file_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/0");
        let extent = Extent::d2(5, 4);
        let data = texels(extent);
        write_container(&path, extent, ImageFormat::Rgba8Unorm, &data).unwrap();

        let image = read_container(&path).unwrap();
        assert_eq!(image.extent, extent);
        assert_eq!(image.format, ImageFormat::Rgba8Unorm);
        assert_eq!(image.data, data);
        assert!(!partial_path(&path).exists());
    }

    #[test]
    fn wrong_payload_size_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0");
        let err = write_container(&path, Extent::d2(4, 4), ImageFormat::Rgba8Unorm, &[0; 7]);
        assert!(matches!(err, Err(RenderError::InvalidContainer(_))));
        assert!(!path.exists());
        assert!(!partial_path(&path).exists());
    }

    #[test]
    fn rejects_corrupt_containers() {
        assert!(decode_container(b"nope").is_err());
        let extent = Extent::d2(2, 2);
        let mut bytes = encode_container(extent, ImageFormat::Rgba8Unorm, &texels(extent)).unwrap();
        bytes.truncate(bytes.len() - 1);
        assert!(decode_container(&bytes).is_err());
    }

    #[test]
    fn oversized_lengths_are_rejected() {
        let extent = Extent::d2(2, 2);
        let mut bytes = encode_container(extent, ImageFormat::Rgba8Unorm, &texels(extent)).unwrap();
        bytes[40..48].copy_from_slice(&u64::MAX.to_le_bytes());
        assert!(matches!(
            decode_container(&bytes),
            Err(RenderError::InvalidContainer(_))
        ));

        let huge = Extent::d3(u32::MAX, u32::MAX, u32::MAX);
        assert!(matches!(
            encode_container(huge, ImageFormat::Rgba32Float, &[]),
            Err(RenderError::InvalidContainer(_))
        ));
    }

    #[test]
    fn png_capture_gets_extension() {
        let dir = tempfile::tempdir().unwrap();
        let extent = Extent::d2(4, 3);
        let request = CaptureRequest::new(4, 3, 1, dir.path().join("shot"))
            .with_format(CaptureFormat::Png);
        let path = save(&request, extent, ImageFormat::Rgba8Unorm, &texels(extent)).unwrap();
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("png"));
        let decoded = image::open(&path).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (4, 3));
    }
}
