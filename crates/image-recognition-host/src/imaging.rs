//! The `wasmedge_image` import table.
//!
//! Decodes JPEG or PNG bytes from guest memory, resizes them to the model's
//! input size and writes the pixels back as an RGB tensor, either as raw
//! `u8` channels or as `f32` channels normalized to `[0, 1]`.

use image::imageops::FilterType;
use image::{ImageFormat, RgbImage};
use tracing::{debug, warn};
use wasmtime::{Caller, Linker};

use image_recognition_common::{AcceleratorConfig, EngineError, HostFunctionError};
use image_recognition_core::{HostState, ImportTable};

use crate::memory::{check_writable, read_bytes, write_bytes};
use crate::session::{SEVERITY_ERROR, STATUS_FAILED, STATUS_OK};

/// Import module namespace.
pub const MODULE: &str = "wasmedge_image";

/// Pixel layout written to the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    /// Three `u8` channels per pixel.
    Rgb8,
    /// Three little-endian `f32` channels per pixel, scaled to `[0, 1]`.
    Rgb32F,
}

impl PixelLayout {
    /// Bytes written for an image of `width` by `height` pixels, or `None`
    /// if that does not fit in `usize`.
    pub fn byte_len(self, width: u32, height: u32) -> Option<usize> {
        let channels = (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(3)?;
        match self {
            PixelLayout::Rgb8 => Some(channels),
            PixelLayout::Rgb32F => channels.checked_mul(4),
        }
    }
}

/// Decode `bytes` and resize the image to exactly `width` by `height`.
///
/// # Errors
///
/// Returns [`HostFunctionError::Decode`] if the bytes are not a valid image
/// of `format`, or [`HostFunctionError::InvalidArgument`] for a zero size.
pub fn decode_resized(
    bytes: &[u8],
    format: ImageFormat,
    width: u32,
    height: u32,
) -> Result<RgbImage, HostFunctionError> {
    if width == 0 || height == 0 {
        return Err(HostFunctionError::invalid_argument(format!(
            "Target size {width}x{height} is empty"
        )));
    }

    let decoded =
        image::load_from_memory_with_format(bytes, format).map_err(|e| HostFunctionError::Decode {
            reason: e.to_string(),
        })?;

    Ok(decoded
        .resize_exact(width, height, FilterType::Triangle)
        .to_rgb8())
}

/// Encode an RGB image in the requested layout.
pub fn encode_pixels(image: RgbImage, layout: PixelLayout) -> Vec<u8> {
    match layout {
        PixelLayout::Rgb8 => image.into_raw(),
        PixelLayout::Rgb32F => image
            .into_raw()
            .into_iter()
            .flat_map(|channel| (f32::from(channel) / 255.0).to_le_bytes())
            .collect(),
    }
}

/// Host functions for image decoding.
#[derive(Debug, Clone, Copy)]
pub struct ImageImports {
    accelerator: AcceleratorConfig,
}

impl ImageImports {
    /// Create the table.
    pub fn new(accelerator: AcceleratorConfig) -> Self {
        Self { accelerator }
    }

    #[allow(clippy::too_many_arguments)]
    fn load(
        self,
        caller: &mut Caller<'_, HostState>,
        function: &str,
        format: ImageFormat,
        layout: PixelLayout,
        img_ptr: i32,
        img_len: i32,
        width: u32,
        height: u32,
        dst_ptr: i32,
    ) -> u32 {
        if self.accelerator.allows_verbose() {
            debug!(
                module = MODULE,
                function,
                img_len,
                width,
                height,
                "Host function called"
            );
        }

        // The destination is checked before decoding so an oversized target
        // never reaches the resizer.
        let result = layout
            .byte_len(width, height)
            .ok_or_else(|| {
                HostFunctionError::invalid_argument(format!(
                    "Target size {width}x{height} is too large"
                ))
            })
            .and_then(|len| check_writable(caller, dst_ptr, len))
            .and_then(|()| read_bytes(caller, img_ptr, img_len))
            .and_then(|bytes| decode_resized(&bytes, format, width, height))
            .and_then(|image| write_bytes(caller, dst_ptr, &encode_pixels(image, layout)));

        match result {
            Ok(()) => STATUS_OK,
            Err(e) => {
                if self.accelerator.allows(SEVERITY_ERROR) {
                    warn!(module = MODULE, function, error = %e, "Host function failed");
                }
                STATUS_FAILED
            }
        }
    }

    fn register_loader(
        self,
        linker: &mut Linker<HostState>,
        function: &'static str,
        format: ImageFormat,
        layout: PixelLayout,
    ) -> Result<(), EngineError> {
        linker
            .func_wrap(
                MODULE,
                function,
                move |mut caller: Caller<'_, HostState>,
                      img_ptr: i32,
                      img_len: i32,
                      width: u32,
                      height: u32,
                      dst_ptr: i32|
                      -> u32 {
                    self.load(
                        &mut caller,
                        function,
                        format,
                        layout,
                        img_ptr,
                        img_len,
                        width,
                        height,
                        dst_ptr,
                    )
                },
            )
            .map_err(|e| EngineError::import_registration(MODULE, e.to_string()))?;
        Ok(())
    }
}

impl ImportTable for ImageImports {
    fn module_name(&self) -> &str {
        MODULE
    }

    fn register(&self, linker: &mut Linker<HostState>) -> Result<(), EngineError> {
        let loaders = [
            ("load_jpg", ImageFormat::Jpeg, PixelLayout::Rgb32F),
            ("load_png", ImageFormat::Png, PixelLayout::Rgb32F),
            ("load_jpg_to_rgb8", ImageFormat::Jpeg, PixelLayout::Rgb8),
            ("load_png_to_rgb8", ImageFormat::Png, PixelLayout::Rgb8),
        ];

        for (function, format, layout) in loaders {
            self.register_loader(linker, function, format, layout)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{DynamicImage, Rgb};

    use super::*;
    use image_recognition_common::EngineConfig;
    use image_recognition_core::WasmEngine;

    fn png_bytes(width: u32, height: u32, pixel: [u8; 3]) -> Vec<u8> {
        let image = RgbImage::from_pixel(width, height, Rgb(pixel));
        let mut bytes = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(image)
            .write_to(&mut bytes, ImageFormat::Png)
            .unwrap();
        bytes.into_inner()
    }

    #[test]
    fn test_decode_and_resize() {
        let png = png_bytes(8, 4, [255, 0, 51]);

        let image = decode_resized(&png, ImageFormat::Png, 2, 2).unwrap();
        assert_eq!(image.dimensions(), (2, 2));

        let Rgb([r, g, b]) = *image.get_pixel(1, 1);
        assert!(r >= 254);
        assert_eq!(g, 0);
        assert!(b.abs_diff(51) <= 1);
    }

    #[test]
    fn test_decode_wrong_format() {
        let png = png_bytes(2, 2, [0, 0, 0]);

        let result = decode_resized(&png, ImageFormat::Jpeg, 2, 2);
        assert!(matches!(result, Err(HostFunctionError::Decode { .. })));
    }

    #[test]
    fn test_decode_zero_size() {
        let png = png_bytes(2, 2, [0, 0, 0]);

        let result = decode_resized(&png, ImageFormat::Png, 0, 2);
        assert!(matches!(
            result,
            Err(HostFunctionError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_encode_layouts() {
        let image = RgbImage::from_pixel(1, 1, Rgb([255, 0, 51]));

        let rgb8 = encode_pixels(image.clone(), PixelLayout::Rgb8);
        assert_eq!(rgb8, vec![255, 0, 51]);

        let rgb32f = encode_pixels(image, PixelLayout::Rgb32F);
        assert_eq!(Some(rgb32f.len()), PixelLayout::Rgb32F.byte_len(1, 1));
        assert_eq!(&rgb32f[0..4], &1.0f32.to_le_bytes());
        assert_eq!(&rgb32f[4..8], &0.0f32.to_le_bytes());
        assert_eq!(&rgb32f[8..12], &0.2f32.to_le_bytes());
    }

    #[test]
    fn test_byte_len() {
        assert_eq!(PixelLayout::Rgb8.byte_len(224, 224), Some(150_528));
        assert_eq!(PixelLayout::Rgb32F.byte_len(224, 224), Some(602_112));
        assert_eq!(PixelLayout::Rgb8.byte_len(u32::MAX, u32::MAX), None);
    }

    #[test]
    fn test_register() {
        let engine = WasmEngine::new(&EngineConfig::default()).unwrap();
        let mut linker = Linker::new(engine.inner());

        let table = ImageImports::new(AcceleratorConfig::default());
        assert!(table.register(&mut linker).is_ok());
        assert_eq!(table.module_name(), MODULE);
    }
}
