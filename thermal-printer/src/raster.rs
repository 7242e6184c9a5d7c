//! Monochrome raster images
//!
//! The encoder only consumes packed 1-bit rasters. Decoding, resizing and
//! dithering happen before an image reaches this crate.

use crate::error::{PrintError, PrintResult};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Packed 1-bit-per-pixel raster, row-major, MSB = leftmost pixel,
/// each row padded to a whole byte. A set bit prints black.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Raster {
    /// Width in dots
    pub width: u32,
    /// Height in dots
    pub height: u32,
    #[serde(serialize_with = "to_base64", deserialize_with = "from_base64")]
    pub data: Vec<u8>,
}

fn to_base64<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(data))
}

fn from_base64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let s = String::deserialize(deserializer)?;
    STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
}

impl Raster {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> PrintResult<Self> {
        let raster = Self {
            width,
            height,
            data,
        };
        raster.validate()?;
        Ok(raster)
    }

    /// All-white raster
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; (width.div_ceil(8) * height) as usize],
        }
    }

    /// Bytes per row
    pub fn stride(&self) -> usize {
        self.width.div_ceil(8) as usize
    }

    pub fn validate(&self) -> PrintResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(PrintError::invalid("raster has zero size"));
        }
        let expected = self.stride() * self.height as usize;
        if self.data.len() != expected {
            return Err(PrintError::invalid(format!(
                "raster {}x{} needs {} bytes, got {}",
                self.width,
                self.height,
                expected,
                self.data.len()
            )));
        }
        Ok(())
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        let byte = self.data[y as usize * self.stride() + (x / 8) as usize];
        byte & (0x80 >> (x % 8)) != 0
    }

    pub fn set(&mut self, x: u32, y: u32, black: bool) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = y as usize * self.stride() + (x / 8) as usize;
        let mask = 0x80 >> (x % 8);
        if black {
            self.data[idx] |= mask;
        } else {
            self.data[idx] &= !mask;
        }
    }

    /// Copy this raster into a wider canvas, shifted right by `offset` dots
    pub fn place(&self, canvas_width: u32, offset: u32) -> Raster {
        let mut out = Raster::blank(canvas_width, self.height);
        let shift = (offset % 8) as usize;
        let first = (offset / 8) as usize;
        let src_stride = self.stride();
        let dst_stride = out.stride();

        for y in 0..self.height as usize {
            let src = &self.data[y * src_stride..(y + 1) * src_stride];
            let dst = &mut out.data[y * dst_stride..(y + 1) * dst_stride];
            for (i, &byte) in src.iter().enumerate() {
                if first + i < dst_stride {
                    dst[first + i] |= byte >> shift;
                }
                if shift > 0 && first + i + 1 < dst_stride {
                    dst[first + i + 1] |= byte << (8 - shift);
                }
            }
            // padding bits of the source row must not leak past its width
            let end = offset + self.width;
            for x in end..canvas_width.min(offset + src_stride as u32 * 8) {
                let idx = (x / 8) as usize;
                dst[idx] &= !(0x80 >> (x % 8));
            }
        }
        out
    }
}

/// Threshold an image into a raster
///
/// Opaque pixels darker than mid-grey print black; transparent pixels
/// stay white.
#[cfg(feature = "image")]
pub fn raster_from_image(img: &image::DynamicImage) -> PrintResult<Raster> {
    use image::GenericImageView;

    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return Err(PrintError::invalid("image has zero size"));
    }
    let rgba = img.to_rgba8();
    let mut raster = Raster::blank(w, h);
    for (x, y, pixel) in rgba.enumerate_pixels() {
        if pixel[3] >= 128 {
            let luma = (0.299 * pixel[0] as f32 + 0.587 * pixel[1] as f32 + 0.114 * pixel[2] as f32)
                as u8;
            if luma < 128 {
                raster.set(x, y, true);
            }
        }
    }
    Ok(raster)
}
