use std::path::Path;

use crate::error::TextureError;

const DEFAULT_IMAGE_SIZE: u32 = 64;
const DEFAULT_CHECKER_CELL: u32 = 8;

/// Tightly packed RGBA8 pixels ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePixels {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl ImagePixels {
    pub fn byte_len(&self) -> usize {
        self.rgba.len()
    }
}

/// Decodes an image file into RGBA8, top row first.
pub fn load_image(path: &Path) -> Result<ImagePixels, TextureError> {
    let image = image::open(path).map_err(|source| TextureError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    if width == 0 || height == 0 {
        return Err(TextureError::Empty {
            path: path.to_path_buf(),
        });
    }
    tracing::debug!(path = %path.display(), width, height, "decoded texture");
    Ok(ImagePixels {
        width,
        height,
        rgba: rgba.into_raw(),
    })
}

/// Magenta/dark checkerboard bound to sampler slots nobody assigned.
pub fn default_image_pixels() -> ImagePixels {
    let size = DEFAULT_IMAGE_SIZE;
    let mut rgba = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let lit = ((x / DEFAULT_CHECKER_CELL) + (y / DEFAULT_CHECKER_CELL)) % 2 == 0;
            let texel = if lit {
                [255, 0, 255, 255]
            } else {
                [24, 24, 24, 255]
            };
            rgba.extend_from_slice(&texel);
        }
    }
    ImagePixels {
        width: size,
        height: size,
        rgba,
    }
}
