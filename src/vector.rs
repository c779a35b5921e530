use crate::raster::scale_height;
use anyhow::{anyhow, Context, Result};
use image::RgbaImage;
use std::sync::Arc;
use usvg::ImageKind;

/// Dimensions assumed when an SVG declares neither a viewBox nor explicit
/// width/height attributes.
pub const FALLBACK_DIMENSION: u32 = 500;

/// Internal rasterization density cap. Vector sources render at up to twice
/// the requested width before downsampling, but never wider than this; the
/// output width itself is always honored exactly.
pub const DENSITY_CAP: u32 = 4096;

pub fn is_svg(bytes: &[u8]) -> bool {
    let sample = std::str::from_utf8(bytes).unwrap_or("");
    sample.contains("<svg") || sample.contains("<?xml")
}

/// Extracts intrinsic pixel dimensions from SVG markup.
///
/// The viewBox wins over explicit width/height attributes: when both are
/// present only the viewBox carries the true aspect ratio.
pub fn intrinsic_dimensions(raw: &str) -> (u32, u32) {
    let lower = raw.to_ascii_lowercase();
    if let Some(dims) = parse_viewbox(&lower) {
        return dims;
    }
    if let (Some(width), Some(height)) = (
        parse_svg_length(&lower, "width"),
        parse_svg_length(&lower, "height"),
    ) {
        if width > 0 && height > 0 {
            return (width, height);
        }
    }
    (FALLBACK_DIMENSION, FALLBACK_DIMENSION)
}

fn parse_viewbox(lower: &str) -> Option<(u32, u32)> {
    let idx = lower.find("viewbox=")?;
    let quote = lower[idx..].chars().nth(8)?;
    let start = idx + 9;
    let end = lower[start..].find(quote)? + start;
    let parts = lower[start..end]
        .split_whitespace()
        .filter_map(|item| item.parse::<f32>().ok())
        .collect::<Vec<_>>();
    if parts.len() >= 4 && parts[2] > 0.0 && parts[3] > 0.0 {
        return Some((parts[2].round() as u32, parts[3].round() as u32));
    }
    None
}

fn parse_svg_length(lower: &str, name: &str) -> Option<u32> {
    let needle = format!("{name}=");
    let idx = lower.find(&needle)?;
    let quote = lower[idx + name.len() + 1..].chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let start = idx + name.len() + 2;
    let end = lower[start..].find(quote)? + start;
    let value = lower[start..end].trim().trim_end_matches("px");
    value.parse::<f32>().ok().map(|v| v.round() as u32)
}

// data: URIs (embedded images) are fine; href/url references that reach the
// network are not. Namespace declarations (xmlns=) never match these needles.
fn has_external_reference(raw: &str) -> bool {
    let lowered = raw.to_ascii_lowercase();
    const NEEDLES: [&str; 8] = [
        "href=\"http",
        "href='http",
        "url(http",
        "url(\"http",
        "url('http",
        "@import \"http",
        "@import 'http",
        "@import url",
    ];
    NEEDLES.iter().any(|needle| lowered.contains(needle))
}

pub fn parse_svg(
    bytes: &[u8],
    max_svg_bytes: usize,
    max_svg_nodes: usize,
    max_decoded_raster_pixels: u64,
) -> Result<usvg::Tree> {
    if bytes.len() > max_svg_bytes {
        return Err(anyhow!("svg exceeds max size"));
    }
    let raw = std::str::from_utf8(bytes).context("svg not utf-8")?;
    if raw.to_ascii_lowercase().contains("<script") || has_external_reference(raw) {
        return Err(anyhow!("svg contains disallowed external references"));
    }
    let mut options = usvg::Options::default();
    options.image_href_resolver.resolve_data = Box::new(move |mime, data, _opts| {
        match mime {
            "image/png" => embedded_raster(data, max_decoded_raster_pixels).map(ImageKind::PNG),
            "image/jpg" | "image/jpeg" => {
                embedded_raster(data, max_decoded_raster_pixels).map(ImageKind::JPEG)
            }
            "image/webp" => embedded_raster(data, max_decoded_raster_pixels).map(ImageKind::WEBP),
            _ => None,
        }
    });
    options.image_href_resolver.resolve_string = Box::new(|_href, _opts| None);
    let tree = usvg::Tree::from_data(bytes, &options)?;
    let node_count = count_nodes(tree.root());
    if node_count > max_svg_nodes {
        return Err(anyhow!("svg node count exceeds limit"));
    }
    Ok(tree)
}

fn embedded_raster(data: Arc<Vec<u8>>, max_pixels: u64) -> Option<Arc<Vec<u8>>> {
    let reader = image::ImageReader::new(std::io::Cursor::new(data.as_slice()))
        .with_guessed_format()
        .ok()?;
    let (width, height) = reader.into_dimensions().ok()?;
    if (width as u64).saturating_mul(height as u64) > max_pixels {
        return None;
    }
    Some(data)
}

fn count_nodes(group: &usvg::Group) -> usize {
    let mut count = 0usize;
    let mut stack = vec![group];
    while let Some(group) = stack.pop() {
        count = count.saturating_add(1);
        for child in group.children() {
            count = count.saturating_add(1);
            if let usvg::Node::Group(child_group) = child {
                stack.push(child_group);
            }
        }
    }
    count
}

pub fn rasterize_tree(tree: &usvg::Tree, width: u32, height: u32) -> Result<RgbaImage> {
    let mut pixmap =
        tiny_skia::Pixmap::new(width, height).ok_or_else(|| anyhow!("invalid pixmap size"))?;
    let size = tree.size();
    let scale_x = if size.width() > 0.0 {
        width as f32 / size.width()
    } else {
        1.0
    };
    let scale_y = if size.height() > 0.0 {
        height as f32 / size.height()
    } else {
        1.0
    };
    let transform = tiny_skia::Transform::from_scale(scale_x, scale_y);
    let mut pixmap_mut = pixmap.as_mut();
    resvg::render(tree, transform, &mut pixmap_mut);
    RgbaImage::from_raw(width, height, pixmap.data().to_vec())
        .ok_or_else(|| anyhow!("failed to build raster image"))
}

/// Rasterizes at the SVG's intrinsic dimensions.
pub fn rasterize_native(
    bytes: &[u8],
    max_svg_bytes: usize,
    max_svg_nodes: usize,
    max_decoded_raster_pixels: u64,
) -> Result<RgbaImage> {
    let raw = std::str::from_utf8(bytes).context("svg not utf-8")?;
    let (width, height) = intrinsic_dimensions(raw);
    let tree = parse_svg(bytes, max_svg_bytes, max_svg_nodes, max_decoded_raster_pixels)?;
    rasterize_tree(&tree, width.max(1), height.max(1))
}

/// Density-aware rasterization for an explicit target width.
///
/// Renders internally at up to twice the target width (capped at
/// `DENSITY_CAP`) and downsamples to the exact target, so large targets never
/// come out of a low-density render.
pub fn rasterize_for_width(
    bytes: &[u8],
    target_width: u32,
    preserve_ratio: bool,
    max_svg_bytes: usize,
    max_svg_nodes: usize,
    max_decoded_raster_pixels: u64,
) -> Result<RgbaImage> {
    if target_width == 0 {
        return Err(anyhow!("target width must be positive"));
    }
    let raw = std::str::from_utf8(bytes).context("svg not utf-8")?;
    let (intrinsic_w, intrinsic_h) = intrinsic_dimensions(raw);
    let target_height = if preserve_ratio {
        scale_height(intrinsic_h, intrinsic_w, target_width).max(1)
    } else {
        target_width
    };
    let density_width = target_width.saturating_mul(2).min(DENSITY_CAP).max(target_width);
    let density_height = scale_height(target_height, target_width, density_width).max(1);
    let tree = parse_svg(bytes, max_svg_bytes, max_svg_nodes, max_decoded_raster_pixels)?;
    let rendered = rasterize_tree(&tree, density_width, density_height)?;
    if density_width == target_width && density_height == target_height {
        return Ok(rendered);
    }
    Ok(image::imageops::resize(
        &rendered,
        target_width,
        target_height,
        image::imageops::FilterType::Lanczos3,
    ))
}
