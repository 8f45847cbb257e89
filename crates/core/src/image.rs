use image::imageops::FilterType;
use image::{ImageBuffer, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::path::Path;

use crate::error::{GenerationError, Result};

/// One image produced by a pipeline, as RGB8 bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl GeneratedImage {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(GenerationError::Image(format!(
                "expected {} RGB bytes for {}x{}, got {}",
                expected,
                width,
                height,
                data.len()
            )));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    pub fn from_rgb_image(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
        }
    }

    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        ImageBuffer::<Rgb<u8>, Vec<u8>>::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| GenerationError::Image("Failed to create image buffer".into()))
    }

    /// Saves as PNG regardless of the path's extension.
    pub fn save(&self, path: &Path) -> Result<()> {
        self.to_rgb_image()?
            .save_with_format(path, ImageFormat::Png)?;
        Ok(())
    }

    pub fn encode_png(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.to_rgb_image()?
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        Ok(bytes)
    }
}

/// An init or mask image handed to image-to-image and inpainting pipelines.
#[derive(Debug, Clone, PartialEq)]
pub struct InputImage {
    image: RgbImage,
}

impl InputImage {
    /// Decodes an uploaded file in any format the `image` crate knows.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(bytes)?.to_rgb8();
        Ok(Self { image })
    }

    pub fn open(path: &Path) -> Result<Self> {
        let image = image::open(path)?.to_rgb8();
        Ok(Self { image })
    }

    pub fn from_rgb_image(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn as_rgb(&self) -> &RgbImage {
        &self.image
    }

    pub fn resize(&self, width: u32, height: u32) -> Self {
        Self {
            image: image::imageops::resize(&self.image, width, height, FilterType::Lanczos3),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.image.save_with_format(path, ImageFormat::Png)?;
        Ok(())
    }
}
