//! 8-bit grayscale BMP support via the `image` crate.
//!
//! Any BMP is decoded to luma; writing clamps samples to `[0, 255]` and
//! truncates, so sentinel holes come out white.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use image::codecs::bmp::BmpEncoder;
use image::{DynamicImage, ExtendedColorType, ImageFormat, ImageReader};
use offload_compute::ImageGrid;
use tracing::{debug, trace};

use crate::{IoError, IoResult};

/// Reads a BMP file into a luma grid with samples in `0.0..=255.0`.
pub fn read_bitmap<P: AsRef<Path>>(path: P) -> IoResult<ImageGrid> {
    let path = path.as_ref();
    trace!(path = %path.display(), "bmp::read_bitmap");
    let reader = BufReader::new(File::open(path)?);

    let img = ImageReader::with_format(reader, ImageFormat::Bmp)
        .decode()
        .map_err(|e| IoError::DecodeError(e.to_string()))?;

    let luma = match img {
        DynamicImage::ImageLuma8(gray) => gray,
        other => other.to_luma8(),
    };
    let (width, height) = luma.dimensions();
    debug!(width, height, "bitmap decoded");

    let data = luma.into_raw().into_iter().map(f32::from).collect();
    Ok(ImageGrid::from_f32(data, height as usize, width as usize)?)
}

/// Writes a grid as an 8-bit grayscale BMP.
pub fn write_bitmap<P: AsRef<Path>>(path: P, grid: &ImageGrid) -> IoResult<()> {
    let path = path.as_ref();
    trace!(path = %path.display(), rows = grid.rows, cols = grid.cols, "bmp::write_bitmap");

    let width = u32::try_from(grid.cols).map_err(|_| too_large(grid))?;
    let height = u32::try_from(grid.rows).map_err(|_| too_large(grid))?;
    let pixels = to_u8(grid.data());

    let mut writer = BufWriter::new(File::create(path)?);
    let mut encoder = BmpEncoder::new(&mut writer);
    encoder
        .encode(&pixels, width, height, ExtendedColorType::L8)
        .map_err(|e| IoError::EncodeError(e.to_string()))?;
    Ok(())
}

/// Clamp to the byte range and truncate.
fn to_u8(samples: &[f32]) -> Vec<u8> {
    samples.iter().map(|&v| v.clamp(0.0, 255.0) as u8).collect()
}

fn too_large(grid: &ImageGrid) -> IoError {
    IoError::DimensionMismatch {
        expected: format!("at most {}x{}", u32::MAX, u32::MAX),
        actual: format!("{}x{}", grid.cols, grid.rows),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_u8_clamps_and_truncates() {
        assert_eq!(to_u8(&[-3.0, 0.0, 12.9, 255.0, 1234.0]), vec![0, 0, 12, 255, 255]);
    }

    #[test]
    fn test_nan_becomes_zero() {
        assert_eq!(to_u8(&[f32::NAN]), vec![0]);
    }
}
