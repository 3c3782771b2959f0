use std::cmp;
use std::io::Cursor;

use bytes::Bytes;
use image::io::{Limits, Reader};
use image::{DynamicImage, ImageError, ImageFormat, Rgba, RgbaImage};

use crate::error::Error;

use super::encode_png;

/// Smallest side the overlay is ever drawn at.
pub const MIN_OVERLAY_SIDE: u32 = 100;

/// The overlay side is this fraction of the carrier's smaller dimension.
pub const OVERLAY_DIVISOR: u32 = 5;

/// Gap between the overlay and the carrier's bottom and right edges.
pub const DEFAULT_MARGIN: u32 = 10;

/// Largest carrier width or height that will be decoded.
pub const MAX_CARRIER_SIDE: u32 = 8192;

/// Most memory a single carrier decode may allocate.
pub const MAX_CARRIER_ALLOC: u64 = 256 * 1024 * 1024;

/// Stamps an artifact onto the bottom-right corner of a carrier image.
#[derive(Copy, Clone, Debug)]
pub struct Compositor {
    margin: u32,
}

impl Default for Compositor {
    fn default() -> Compositor {
        Compositor::new(DEFAULT_MARGIN)
    }
}

impl Compositor {
    pub fn new(margin: u32) -> Compositor {
        Compositor { margin }
    }

    /// Composites `artifact` (a PNG) onto `carrier` (PNG or JPEG) and returns
    /// the result as PNG. Identical inputs always give identical bytes.
    pub fn composite(&self, carrier: &[u8], artifact: &[u8]) -> Result<Bytes, Error> {
        let mut canvas = decode_carrier(carrier)?.to_rgba8();
        let artifact = image::load_from_memory_with_format(artifact, ImageFormat::Png)?.to_rgba8();

        let (width, height) = canvas.dimensions();
        let side = overlay_side(width, height);
        let overlay = resize_nearest(&artifact, side, side);
        let (origin_x, origin_y) = self.placement(width, height, side);

        for (x, y, pixel) in overlay.enumerate_pixels() {
            let (canvas_x, canvas_y) = (origin_x + x, origin_y + y);
            if canvas_x >= width || canvas_y >= height {
                continue;
            }

            let base = canvas.get_pixel_mut(canvas_x, canvas_y);
            *base = source_over(*pixel, *base);
        }

        encode_png(&DynamicImage::ImageRgba8(canvas))
    }

    /// Top-left corner of the overlay. On an axis where the overlay and
    /// margin do not fit, the origin is clamped to 0 and whatever spills past
    /// the far edge is clipped.
    pub fn placement(&self, width: u32, height: u32, side: u32) -> (u32, u32) {
        let reach = side + self.margin;

        (width.saturating_sub(reach), height.saturating_sub(reach))
    }
}

pub fn overlay_side(width: u32, height: u32) -> u32 {
    cmp::max(MIN_OVERLAY_SIDE, cmp::min(width, height) / OVERLAY_DIVISOR)
}

fn decode_carrier(bytes: &[u8]) -> Result<DynamicImage, Error> {
    let format = image::guess_format(bytes).map_err(|_| Error::UnsupportedImageFormat)?;
    match format {
        ImageFormat::Png | ImageFormat::Jpeg => {}
        _ => return Err(Error::UnsupportedImageFormat),
    }

    let too_large = Error::ImageDimensionsTooLarge {
        max_width: MAX_CARRIER_SIDE,
        max_height: MAX_CARRIER_SIDE,
    };

    // header only, nothing is allocated for pixels yet
    let (width, height) = Reader::with_format(Cursor::new(bytes), format)
        .into_dimensions()
        .map_err(|_| Error::UnsupportedImageFormat)?;
    if width > MAX_CARRIER_SIDE || height > MAX_CARRIER_SIDE {
        return Err(too_large);
    }

    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_CARRIER_SIDE);
    limits.max_image_height = Some(MAX_CARRIER_SIDE);
    limits.max_alloc = Some(MAX_CARRIER_ALLOC);

    let mut reader = Reader::with_format(Cursor::new(bytes), format);
    reader.limits(limits);
    reader.decode().map_err(|err| match err {
        ImageError::Limits(_) => too_large,
        _ => Error::UnsupportedImageFormat,
    })
}

/// Nearest-neighbor resample; each destination pixel copies exactly one
/// source pixel.
pub fn resize_nearest(source: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    let (source_width, source_height) = source.dimensions();

    RgbaImage::from_fn(width, height, |x, y| {
        let source_x = (u64::from(x) * u64::from(source_width) / u64::from(width)) as u32;
        let source_y = (u64::from(y) * u64::from(source_height) / u64::from(height)) as u32;
        *source.get_pixel(source_x, source_y)
    })
}

/// Non-premultiplied "source over destination" with round-half-up.
pub fn source_over(source: Rgba<u8>, destination: Rgba<u8>) -> Rgba<u8> {
    let source_alpha = u32::from(source[3]);
    match source_alpha {
        255 => return source,
        0 => return destination,
        _ => {}
    }

    let destination_alpha = u32::from(destination[3]);
    let remainder = 255 - source_alpha;

    // output alpha scaled by 255, never zero here
    let alpha = source_alpha * 255 + destination_alpha * remainder;

    let mut output = [0u8; 4];
    for channel in 0..3 {
        let weighted = u32::from(source[channel]) * source_alpha * 255
            + u32::from(destination[channel]) * destination_alpha * remainder;
        output[channel] = ((weighted + alpha / 2) / alpha) as u8;
    }
    output[3] = ((alpha + 127) / 255) as u8;

    Rgba(output)
}
