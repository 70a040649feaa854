//! Decoder seam.
//!
//! The decoder is untrusted code: it only ever runs inside a hardened
//! worker, after containment. Implementations must stay within the
//! contained syscall surface (read, seek, file status, memory mapping and
//! heap growth). In particular they must not open, close or write files.

use crate::config::types::{ImgboxError, Result, SourceRef};
use crate::region::rgba_len;
use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::os::fd::AsFd;

/// An opened image source, ready to hand to a decoder
#[derive(Debug)]
pub enum SourceStream {
    File(BufReader<File>),
    /// Duplicate of the inherited stdin descriptor; may not be seekable
    Stdin(File),
}

impl SourceStream {
    /// Open the source. Runs before hardening, while `open` is still allowed.
    pub fn open(source: &SourceRef) -> Result<Self> {
        match source {
            SourceRef::Path(path) => {
                let file = File::open(path).map_err(|e| {
                    ImgboxError::SourceOpen(format!("{}: {}", path.display(), e))
                })?;
                Ok(SourceStream::File(BufReader::new(file)))
            }
            SourceRef::Stdin => {
                let fd = std::io::stdin()
                    .as_fd()
                    .try_clone_to_owned()
                    .map_err(|e| ImgboxError::SourceOpen(format!("<stdin>: {}", e)))?;
                Ok(SourceStream::Stdin(File::from(fd)))
            }
        }
    }
}

/// Read a stream to its end using only `read`.
///
/// `Read::read_to_end` on a `File` queries the file size first with a stat
/// variant that the contained syscall surface does not admit.
pub fn read_all<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    let mut chunk = [0u8; 64 * 1024];
    loop {
        match reader.read(&mut chunk) {
            Ok(0) => return Ok(data),
            Ok(n) => data.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ImgboxError::Decode(format!("read failed: {}", e))),
        }
    }
}

/// A decoded image as tightly packed RGBA rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl DecodedImage {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        match rgba_len(width, height) {
            Some(len) if len == pixels.len() => Ok(Self { width, height, pixels }),
            _ => Err(ImgboxError::Decode(format!(
                "{}x{} image carries {} pixel bytes",
                width,
                height,
                pixels.len()
            ))),
        }
    }
}

/// Turns an opened source into RGBA pixels
pub trait Decoder {
    fn decode(&self, stream: &mut SourceStream) -> Result<DecodedImage>;
}

/// Decoder backed by the `image` crate (PNG, JPEG, GIF, BMP)
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCrateDecoder;

impl ImageCrateDecoder {
    fn decode_reader<R: std::io::BufRead + std::io::Seek>(reader: R) -> Result<DecodedImage> {
        let image = image::ImageReader::new(reader)
            .with_guessed_format()
            .map_err(|e| ImgboxError::Decode(format!("format detection failed: {}", e)))?
            .decode()
            .map_err(|e| ImgboxError::Decode(e.to_string()))?;

        let rgba = image.into_rgba8();
        let (width, height) = rgba.dimensions();
        DecodedImage::new(width, height, rgba.into_raw())
    }
}

impl Decoder for ImageCrateDecoder {
    fn decode(&self, stream: &mut SourceStream) -> Result<DecodedImage> {
        // Buffer the whole source up front: some codecs size their reads
        // with a stat call outside the contained syscall surface.
        let data = match stream {
            SourceStream::File(reader) => read_all(reader)?,
            SourceStream::Stdin(file) => read_all(file)?,
        };
        Self::decode_reader(Cursor::new(data))
    }
}
