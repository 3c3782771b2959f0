use std::cmp;

use bytes::Bytes;
use image::{DynamicImage, GrayImage, Luma};
use qrcode::{Color, EcLevel, QrCode};

use crate::error::Error;

use super::encode_png;

/// Side length of a generated artifact in pixels.
pub const DEFAULT_ARTIFACT_SIZE: u32 = 256;

/// Light modules surrounding the symbol on every side.
pub const QUIET_ZONE: u32 = 4;

/// Byte capacity of a version 40 symbol at medium error correction.
pub const MAX_PAYLOAD_LEN: usize = 2331;

const DARK: Luma<u8> = Luma([0]);
const LIGHT: Luma<u8> = Luma([255]);

/// Renders urls into square QR rasters encoded as PNG.
#[derive(Copy, Clone, Debug)]
pub struct QrGenerator {
    size: u32,
    ec_level: EcLevel,
}

impl Default for QrGenerator {
    fn default() -> QrGenerator {
        QrGenerator::new(DEFAULT_ARTIFACT_SIZE)
    }
}

impl QrGenerator {
    pub fn new(size: u32) -> QrGenerator {
        QrGenerator {
            size,
            ec_level: EcLevel::M,
        }
    }

    #[tracing::instrument(skip(self))]
    pub fn generate(&self, url: &str) -> Result<Bytes, Error> {
        if url.len() > MAX_PAYLOAD_LEN {
            return Err(Error::ArtifactEncodingFailed {
                reason: format!(
                    "payload is {} bytes, the limit is {}",
                    url.len(),
                    MAX_PAYLOAD_LEN
                ),
            });
        }

        let code = QrCode::with_error_correction_level(url.as_bytes(), self.ec_level).map_err(
            |err| Error::ArtifactEncodingFailed {
                reason: err.to_string(),
            },
        )?;

        let raster = self.rasterize(&code);

        encode_png(&DynamicImage::ImageLuma8(raster))
    }

    /// Scales the symbol (plus its quiet zone) by the largest whole factor
    /// that fits, centring it. A symbol wider than the requested size is
    /// drawn at one pixel per module instead of being cropped.
    fn rasterize(&self, code: &QrCode) -> GrayImage {
        let width = code.width() as u32;
        let modules = width + 2 * QUIET_ZONE;
        let side = cmp::max(self.size, modules);
        let scale = side / modules;
        let offset = (side - modules * scale) / 2;
        let colors = code.to_colors();

        GrayImage::from_fn(side, side, |x, y| {
            if x < offset || y < offset {
                return LIGHT;
            }

            let module_x = (x - offset) / scale;
            let module_y = (y - offset) / scale;
            let symbol_range = QUIET_ZONE..QUIET_ZONE + width;
            if !symbol_range.contains(&module_x) || !symbol_range.contains(&module_y) {
                return LIGHT;
            }

            let index = (module_y - QUIET_ZONE) * width + (module_x - QUIET_ZONE);
            match colors[index as usize] {
                Color::Dark => DARK,
                Color::Light => LIGHT,
            }
        })
    }
}
