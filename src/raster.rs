use crate::format::AssetFormat;
use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::{
    DynamicImage, ExtendedColorType, ImageFormat, ImageReader, RgbImage, Rgba, RgbaImage,
};

pub const JPEG_QUALITY: u8 = 90;

fn raster_limits(max_pixels: u64) -> image::Limits {
    let max_dim = max_pixels.min(u32::MAX as u64) as u32;
    let max_alloc = max_pixels.saturating_mul(4);
    let mut limits = image::Limits::default();
    limits.max_image_width = Some(max_dim);
    limits.max_image_height = Some(max_dim);
    limits.max_alloc = Some(max_alloc);
    limits
}

pub fn dimensions(bytes: &[u8], max_pixels: u64) -> Result<(u32, u32)> {
    let mut reader = ImageReader::new(std::io::Cursor::new(bytes)).with_guessed_format()?;
    reader.limits(raster_limits(max_pixels));
    let (width, height) = reader.into_dimensions()?;
    let pixels = (width as u64).saturating_mul(height as u64);
    if pixels > max_pixels {
        return Err(anyhow!("raster exceeds max decoded pixels"));
    }
    Ok((width, height))
}

pub fn decode(bytes: &[u8], max_pixels: u64) -> Result<RgbaImage> {
    let (width, height) = dimensions(bytes, max_pixels)?;
    if width == 0 || height == 0 {
        return Err(anyhow!("raster has invalid dimensions"));
    }
    let mut reader = ImageReader::new(std::io::Cursor::new(bytes)).with_guessed_format()?;
    reader.limits(raster_limits(max_pixels));
    let image = reader.decode()?;
    Ok(image.to_rgba8())
}

/// Straight alpha-over-white composite. JPEG, PDF and EPS have no alpha
/// channel; encoding transparent pixels without flattening corrupts edge
/// colors.
pub fn flatten_onto_white(image: &RgbaImage) -> RgbImage {
    let mut out = RgbImage::new(image.width(), image.height());
    for (x, y, pixel) in image.enumerate_pixels() {
        let Rgba([r, g, b, a]) = *pixel;
        let alpha = a as u32;
        let inv = 255 - alpha;
        let blend = |c: u8| ((c as u32 * alpha + 255 * inv) / 255) as u8;
        out.put_pixel(x, y, image::Rgb([blend(r), blend(g), blend(b)]));
    }
    out
}

/// Passthrough when the buffer already decodes as PNG.
pub fn to_png(bytes: &[u8], max_pixels: u64) -> Result<Vec<u8>> {
    if image::guess_format(bytes).ok() == Some(ImageFormat::Png) {
        return Ok(bytes.to_vec());
    }
    let image = decode(bytes, max_pixels)?;
    encode_rgba(&image, AssetFormat::Png)
}

pub fn to_jpeg(bytes: &[u8], max_pixels: u64) -> Result<Vec<u8>> {
    let image = decode(bytes, max_pixels)?;
    encode_rgba(&image, AssetFormat::Jpg)
}

pub fn transcode(bytes: &[u8], target: AssetFormat, max_pixels: u64) -> Result<Vec<u8>> {
    match target {
        AssetFormat::Png => to_png(bytes, max_pixels),
        AssetFormat::Jpg => to_jpeg(bytes, max_pixels),
        AssetFormat::Gif | AssetFormat::Webp => {
            let image = decode(bytes, max_pixels)?;
            encode_rgba(&image, target)
        }
        other => Err(anyhow!(
            "transcode target {} is not a raster format",
            other.extension()
        )),
    }
}

pub fn encode_rgba(image: &RgbaImage, format: AssetFormat) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    match format {
        AssetFormat::Png => {
            image.write_to(&mut std::io::Cursor::new(&mut bytes), ImageFormat::Png)?;
        }
        AssetFormat::Jpg => {
            let rgb = flatten_onto_white(image);
            let mut encoder =
                image::codecs::jpeg::JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY);
            encoder.encode(
                rgb.as_raw(),
                rgb.width(),
                rgb.height(),
                ExtendedColorType::Rgb8,
            )?;
        }
        AssetFormat::Webp => {
            let encoder = image::codecs::webp::WebPEncoder::new_lossless(&mut bytes);
            encoder.encode(
                image.as_raw(),
                image.width(),
                image.height(),
                ExtendedColorType::Rgba8,
            )?;
        }
        AssetFormat::Gif => {
            let mut encoder = image::codecs::gif::GifEncoder::new(&mut bytes);
            encoder.encode(
                image.as_raw(),
                image.width(),
                image.height(),
                ExtendedColorType::Rgba8,
            )?;
        }
        other => {
            return Err(anyhow!(
                "cannot encode raster as {}",
                other.extension()
            ));
        }
    }
    Ok(bytes)
}

pub fn scale_height(original_height: u32, original_width: u32, target_width: u32) -> u32 {
    if original_width == 0 {
        return original_height;
    }
    let ratio = target_width as f64 / original_width as f64;
    (original_height as f64 * ratio).round() as u32
}

/// Resizes a raster buffer to `target_width`, re-encoding in `format`.
///
/// Height follows the intrinsic aspect ratio when `preserve_ratio` is set,
/// otherwise the output is square. Callers degrade to the original buffer on
/// error; this function never has to.
pub fn resize(
    bytes: &[u8],
    format: AssetFormat,
    target_width: u32,
    preserve_ratio: bool,
    max_pixels: u64,
) -> Result<Vec<u8>> {
    if target_width == 0 {
        return Err(anyhow!("resize width must be positive"));
    }
    let image = decode(bytes, max_pixels).context("decode for resize")?;
    let target_height = if preserve_ratio {
        scale_height(image.height(), image.width(), target_width)
    } else {
        target_width
    };
    if target_height == 0 {
        return Err(anyhow!("resize height rounded to zero"));
    }
    if image.width() == target_width && image.height() == target_height {
        return Ok(bytes.to_vec());
    }
    let resized = resize_exact(&DynamicImage::ImageRgba8(image), target_width, target_height);
    encode_rgba(&resized, format)
}

pub fn resize_exact(image: &DynamicImage, width: u32, height: u32) -> RgbaImage {
    image::imageops::resize(&image.to_rgba8(), width, height, FilterType::Lanczos3)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX_PIXELS: u64 = 40_000_000;

    fn png_bytes(image: &RgbaImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        image
            .write_to(&mut std::io::Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn solid(width: u32, height: u32, pixel: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba(pixel))
    }

    #[test]
    fn to_png_is_passthrough_for_png() {
        let bytes = png_bytes(&solid(8, 8, [10, 20, 30, 255]));
        let out = to_png(&bytes, MAX_PIXELS).unwrap();
        assert_eq!(out, bytes);
    }

    #[test]
    fn jpeg_flattens_transparency_onto_white() {
        let bytes = png_bytes(&solid(16, 16, [0, 0, 0, 0]));
        let jpeg = to_jpeg(&bytes, MAX_PIXELS).unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap().to_rgb8();
        for pixel in decoded.pixels() {
            assert!(pixel.0[0] > 240 && pixel.0[1] > 240 && pixel.0[2] > 240);
        }
    }

    #[test]
    fn png_to_jpeg_round_trip_is_opaque_rgb() {
        let bytes = png_bytes(&solid(12, 9, [200, 40, 90, 128]));
        let png = to_png(&bytes, MAX_PIXELS).unwrap();
        let jpeg = to_jpeg(&png, MAX_PIXELS).unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!(decoded.color(), image::ColorType::Rgb8);
        assert_eq!(decoded.width(), 12);
        assert_eq!(decoded.height(), 9);
    }

    #[test]
    fn resize_preserves_aspect_ratio() {
        let bytes = png_bytes(&solid(1000, 500, [5, 5, 5, 255]));
        let out = resize(&bytes, AssetFormat::Png, 200, true, MAX_PIXELS).unwrap();
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (200, 100));
    }

    #[test]
    fn resize_without_ratio_is_square() {
        let bytes = png_bytes(&solid(1000, 500, [5, 5, 5, 255]));
        let out = resize(&bytes, AssetFormat::Png, 200, false, MAX_PIXELS).unwrap();
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (200, 200));
    }

    #[test]
    fn resize_at_native_size_is_passthrough() {
        let bytes = png_bytes(&solid(64, 32, [1, 2, 3, 255]));
        let out = resize(&bytes, AssetFormat::Png, 64, true, MAX_PIXELS).unwrap();
        assert_eq!(out, bytes);
    }

    #[test]
    fn flatten_blends_partial_alpha() {
        let image = solid(1, 1, [0, 0, 0, 128]);
        let rgb = flatten_onto_white(&image);
        let pixel = rgb.get_pixel(0, 0).0;
        assert!(pixel[0] > 100 && pixel[0] < 150);
    }
}
