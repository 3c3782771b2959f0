//! Raster work for campaigns: rendering a url into a QR artifact and stamping
//! that artifact onto uploaded images.
//!
//! Everything in here is synchronous and CPU bound. Callers running on the
//! async executor are expected to move it onto a blocking thread.

use std::io::Cursor;

use bytes::Bytes;
use image::{DynamicImage, ImageOutputFormat};

use crate::error::Error;

pub mod composite;
pub mod qr;

pub use composite::Compositor;
pub use qr::QrGenerator;

/// Content type of everything this module produces.
pub const OUTPUT_CONTENT_TYPE: &str = "image/png";

fn encode_png(image: &DynamicImage) -> Result<Bytes, Error> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageOutputFormat::Png)?;

    Ok(Bytes::from(buffer.into_inner()))
}
