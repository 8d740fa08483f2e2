//! Strip-addressed access to a multi-directory 16-bit container.
//!
//! A [`StripSource`] exposes one selected image ("directory") at a time and
//! decodes it a strip at a time into a caller-owned buffer. The TIFF
//! implementation reads only the requested strip from disk.

use std::cell::Cell;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use thiserror::Error;
use tiff::decoder::{Decoder, DecodingResult};
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to open container {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("directory {index} out of range (container holds {count})")]
    DirectoryOutOfRange { index: usize, count: usize },

    #[error("no directory selected")]
    NoDirectorySelected,

    #[error("strip {strip} out of range (image has {count})")]
    StripOutOfRange { strip: u32, count: u32 },

    #[error("short read on strip {strip}: expected {expected} samples, got {actual}")]
    ShortStrip {
        strip: u32,
        expected: usize,
        actual: usize,
    },

    #[error("strip buffer holds {capacity} samples, strip needs {needed}")]
    BufferTooSmall { capacity: usize, needed: usize },

    #[error("unsupported image layout: {0}")]
    UnsupportedLayout(String),

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Geometry of the currently selected image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageLayout {
    pub width: u32,
    pub height: u32,
    pub rows_per_strip: u32,
    pub strip_count: u32,
}

impl ImageLayout {
    pub fn new(width: u32, height: u32, rows_per_strip: u32) -> Self {
        let rows_per_strip = rows_per_strip.clamp(1, height.max(1));
        Self {
            width,
            height,
            rows_per_strip,
            strip_count: height.div_ceil(rows_per_strip),
        }
    }

    /// Samples in the largest strip; the size a strip buffer must have.
    #[inline]
    pub fn max_strip_len(&self) -> usize {
        self.width as usize * self.rows_per_strip as usize
    }

    /// First row covered by `strip`.
    #[inline]
    pub fn strip_offset(&self, strip: u32) -> u32 {
        strip * self.rows_per_strip
    }

    /// Rows actually held by `strip`; only the last strip may be short.
    #[inline]
    pub fn strip_rows(&self, strip: u32) -> u32 {
        let y = self.strip_offset(strip);
        self.rows_per_strip.min(self.height.saturating_sub(y))
    }
}

/// A container of equally sized 16-bit single-sample images, read by strip.
pub trait StripSource {
    /// Number of images (directories) in the container.
    fn image_count(&self) -> usize;

    /// Position the read cursor at image `index` and return its layout.
    fn select_image(&mut self, index: usize) -> Result<ImageLayout, DecodeError>;

    /// Decode strip `strip` of the selected image into `buf`.
    ///
    /// Returns the number of samples written, which is always
    /// `width * strip_rows(strip)` on success.
    fn read_strip(&mut self, strip: u32, buf: &mut [u16]) -> Result<usize, DecodeError>;
}

/// Strip reader over a multi-directory TIFF file.
///
/// The file handle is owned by the decoder and closed when it is dropped.
pub struct TiffStripDecoder {
    path: PathBuf,
    decoder: Decoder<BufReader<File>>,
    image_count: usize,
    current: Option<ImageLayout>,
}

impl std::fmt::Debug for TiffStripDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiffStripDecoder")
            .field("path", &self.path)
            .field("image_count", &self.image_count)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

impl TiffStripDecoder {
    /// Open a container and count its directories.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Open`] if the file cannot be opened and
    /// [`DecodeError::Tiff`] if its header or directory chain is invalid.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DecodeError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| DecodeError::Open {
            path: path.clone(),
            source,
        })?;

        let mut decoder = Decoder::new(BufReader::new(file))?;
        let mut image_count = 1;
        while decoder.more_images() {
            decoder.next_image()?;
            image_count += 1;
        }
        decoder.seek_to_image(0)?;

        info!(path = %path.display(), image_count, "opened container");

        Ok(Self {
            path,
            decoder,
            image_count,
            current: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_layout(&mut self) -> Result<ImageLayout, DecodeError> {
        let (width, height) = self.decoder.dimensions()?;
        let (chunk_width, rows_per_strip) = self.decoder.chunk_dimensions();
        if chunk_width < width {
            return Err(DecodeError::UnsupportedLayout(format!(
                "tiled image ({chunk_width}x{rows_per_strip} tiles), expected strips"
            )));
        }
        match self.decoder.colortype()? {
            tiff::ColorType::Gray(16) => {}
            other => {
                return Err(DecodeError::UnsupportedLayout(format!(
                    "{other:?}, expected 16-bit grayscale"
                )));
            }
        }
        Ok(ImageLayout::new(width, height, rows_per_strip))
    }
}

impl StripSource for TiffStripDecoder {
    fn image_count(&self) -> usize {
        self.image_count
    }

    fn select_image(&mut self, index: usize) -> Result<ImageLayout, DecodeError> {
        self.current = None;
        if index >= self.image_count {
            return Err(DecodeError::DirectoryOutOfRange {
                index,
                count: self.image_count,
            });
        }
        self.decoder.seek_to_image(index)?;
        let layout = self.read_layout()?;
        debug!(index, ?layout, "selected directory");
        self.current = Some(layout);
        Ok(layout)
    }

    fn read_strip(&mut self, strip: u32, buf: &mut [u16]) -> Result<usize, DecodeError> {
        let layout = self.current.ok_or(DecodeError::NoDirectorySelected)?;
        if strip >= layout.strip_count {
            return Err(DecodeError::StripOutOfRange {
                strip,
                count: layout.strip_count,
            });
        }
        let expected = layout.width as usize * layout.strip_rows(strip) as usize;
        if buf.len() < expected {
            return Err(DecodeError::BufferTooSmall {
                capacity: buf.len(),
                needed: expected,
            });
        }

        let samples = match self.decoder.read_chunk(strip)? {
            DecodingResult::U16(samples) => samples,
            _ => {
                return Err(DecodeError::UnsupportedLayout(
                    "strip did not decode to 16-bit samples".into(),
                ));
            }
        };
        if samples.len() < expected {
            return Err(DecodeError::ShortStrip {
                strip,
                expected,
                actual: samples.len(),
            });
        }

        buf[..expected].copy_from_slice(&samples[..expected]);
        Ok(expected)
    }
}

/// In-memory container of planar images, used for synthetic volumes.
///
/// Every successful or failed `read_strip` call bumps a shared counter so
/// callers can observe how much decoding a refresh triggered. Individual
/// strips can be marked corrupt to simulate truncated source data.
#[derive(Debug, Clone)]
pub struct MemoryStripSource {
    layout: ImageLayout,
    images: Vec<Vec<u16>>,
    corrupt: Vec<(usize, u32)>,
    available: usize,
    current: Option<usize>,
    strip_reads: Rc<Cell<usize>>,
}

impl MemoryStripSource {
    /// `images` must each hold `width * height` samples.
    pub fn new(width: u32, height: u32, rows_per_strip: u32, images: Vec<Vec<u16>>) -> Self {
        Self {
            layout: ImageLayout::new(width, height, rows_per_strip),
            available: images.len(),
            images,
            corrupt: Vec::new(),
            current: None,
            strip_reads: Rc::new(Cell::new(0)),
        }
    }

    /// Build a container whose every sample of image `i` equals `fill(i, x, y)`.
    pub fn from_fn(
        width: u32,
        height: u32,
        rows_per_strip: u32,
        image_count: usize,
        fill: impl Fn(usize, u32, u32) -> u16,
    ) -> Self {
        let images = (0..image_count)
            .map(|i| {
                (0..height)
                    .flat_map(|y| (0..width).map(move |x| (x, y)))
                    .map(|(x, y)| fill(i, x, y))
                    .collect()
            })
            .collect();
        Self::new(width, height, rows_per_strip, images)
    }

    /// Make every read of `strip` in image `image` fail with a short read.
    pub fn corrupt_strip(&mut self, image: usize, strip: u32) {
        self.corrupt.push((image, strip));
    }

    /// Keep reporting the full directory count but fail to select any
    /// directory at or past `available`, like a truncated directory chain.
    pub fn truncate(&mut self, available: usize) {
        self.available = available.min(self.images.len());
    }

    /// Handle onto the strip read counter; stays valid after the source moves.
    pub fn strip_reads(&self) -> Rc<Cell<usize>> {
        Rc::clone(&self.strip_reads)
    }

    pub fn layout(&self) -> ImageLayout {
        self.layout
    }
}

impl StripSource for MemoryStripSource {
    fn image_count(&self) -> usize {
        self.images.len()
    }

    fn select_image(&mut self, index: usize) -> Result<ImageLayout, DecodeError> {
        self.current = None;
        if index >= self.available {
            return Err(DecodeError::DirectoryOutOfRange {
                index,
                count: self.available,
            });
        }
        self.current = Some(index);
        Ok(self.layout)
    }

    fn read_strip(&mut self, strip: u32, buf: &mut [u16]) -> Result<usize, DecodeError> {
        self.strip_reads.set(self.strip_reads.get() + 1);
        let image = self.current.ok_or(DecodeError::NoDirectorySelected)?;
        let layout = self.layout;
        if strip >= layout.strip_count {
            return Err(DecodeError::StripOutOfRange {
                strip,
                count: layout.strip_count,
            });
        }
        let expected = layout.width as usize * layout.strip_rows(strip) as usize;
        if self.corrupt.contains(&(image, strip)) {
            return Err(DecodeError::ShortStrip {
                strip,
                expected,
                actual: 0,
            });
        }
        if buf.len() < expected {
            return Err(DecodeError::BufferTooSmall {
                capacity: buf.len(),
                needed: expected,
            });
        }

        let start = layout.strip_offset(strip) as usize * layout.width as usize;
        buf[..expected].copy_from_slice(&self.images[image][start..start + expected]);
        Ok(expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_strip_is_short() {
        let layout = ImageLayout::new(4, 10, 4);
        assert_eq!(layout.strip_count, 3);
        assert_eq!(layout.strip_rows(0), 4);
        assert_eq!(layout.strip_rows(2), 2);
        assert_eq!(layout.strip_offset(2), 8);
        assert_eq!(layout.max_strip_len(), 16);
    }

    #[test]
    fn rows_per_strip_larger_than_image_is_one_strip() {
        let layout = ImageLayout::new(8, 3, 1000);
        assert_eq!(layout.strip_count, 1);
        assert_eq!(layout.strip_rows(0), 3);
    }

    #[test]
    fn memory_source_reads_strips_in_row_order() {
        let mut source = MemoryStripSource::from_fn(3, 5, 2, 1, |_, x, y| (y * 10 + x) as u16);
        let layout = source.select_image(0).unwrap();
        let mut buf = vec![0u16; layout.max_strip_len()];

        assert_eq!(source.read_strip(1, &mut buf).unwrap(), 6);
        assert_eq!(buf, vec![20, 21, 22, 30, 31, 32]);
        assert_eq!(source.read_strip(2, &mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[40, 41, 42]);
        assert_eq!(source.strip_reads().get(), 2);
    }

    #[test]
    fn memory_source_rejects_bad_directory() {
        let mut source = MemoryStripSource::from_fn(2, 2, 1, 4, |i, _, _| i as u16);
        let err = source.select_image(9).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::DirectoryOutOfRange { index: 9, count: 4 }
        ));
        let mut buf = [0u16; 2];
        assert!(matches!(
            source.read_strip(0, &mut buf),
            Err(DecodeError::NoDirectorySelected)
        ));
    }

    #[test]
    fn corrupt_strip_reports_short_read() {
        let mut source = MemoryStripSource::from_fn(2, 4, 2, 1, |_, _, _| 7);
        source.corrupt_strip(0, 1);
        source.select_image(0).unwrap();
        let mut buf = [0u16; 4];
        assert!(source.read_strip(0, &mut buf).is_ok());
        assert!(matches!(
            source.read_strip(1, &mut buf),
            Err(DecodeError::ShortStrip { strip: 1, .. })
        ));
    }
}
