//! Vector-container outputs: a single-page PDF embedding the rasterized
//! asset, a best-effort EPS/PostScript rendition, and SVG wrappers. The PDF
//! and EPS bodies are written object-by-object; both always produce a valid,
//! openable document even when the embedded content is approximate.

use crate::raster::{flatten_onto_white, JPEG_QUALITY};
use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::{ExtendedColorType, RgbaImage};

/// Fixed page width for generated vector containers; height follows the
/// embedded image's aspect ratio.
pub const PAGE_WIDTH: f64 = 500.0;

/// Embedded EPS rasters are bounded to this width to keep documents small.
const EPS_MAX_RASTER_WIDTH: u32 = 256;

pub fn pdf_with_raster(image: &RgbaImage) -> Result<Vec<u8>> {
    let rgb = flatten_onto_white(image);
    let mut jpeg = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY);
    encoder.encode(
        rgb.as_raw(),
        rgb.width(),
        rgb.height(),
        ExtendedColorType::Rgb8,
    )?;
    let page_height = page_height_for(image.width(), image.height());
    Ok(build_pdf(
        Some((&jpeg, image.width(), image.height())),
        PAGE_WIDTH,
        page_height,
    ))
}

/// Empty fixed-size page served when embedding fails; a broken source must
/// degrade the PDF, not block the rest of the format list.
pub fn pdf_placeholder() -> Vec<u8> {
    build_pdf(None, PAGE_WIDTH, PAGE_WIDTH)
}

fn page_height_for(width: u32, height: u32) -> f64 {
    if width == 0 {
        return PAGE_WIDTH;
    }
    PAGE_WIDTH * height as f64 / width as f64
}

fn build_pdf(image: Option<(&[u8], u32, u32)>, page_width: f64, page_height: f64) -> Vec<u8> {
    let mut out: Vec<u8> = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n%\xe2\xe3\xcf\xd3\n");
    let mut offsets: Vec<usize> = Vec::new();

    let push_obj = |out: &mut Vec<u8>, offsets: &mut Vec<usize>, body: &[u8]| {
        offsets.push(out.len());
        let number = offsets.len();
        out.extend_from_slice(format!("{number} 0 obj\n").as_bytes());
        out.extend_from_slice(body);
        out.extend_from_slice(b"\nendobj\n");
    };

    push_obj(
        &mut out,
        &mut offsets,
        b"<< /Type /Catalog /Pages 2 0 R >>",
    );
    push_obj(
        &mut out,
        &mut offsets,
        b"<< /Type /Pages /Kids [3 0 R] /Count 1 >>",
    );
    let resources = if image.is_some() {
        "/Resources << /XObject << /Im0 5 0 R >> /ProcSet [/PDF /ImageC] >> "
    } else {
        "/Resources << /ProcSet [/PDF] >> "
    };
    push_obj(
        &mut out,
        &mut offsets,
        format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {page_width:.2} {page_height:.2}] \
             {resources}/Contents 4 0 R >>"
        )
        .as_bytes(),
    );
    let content = if image.is_some() {
        format!("q\n{page_width:.2} 0 0 {page_height:.2} 0 0 cm\n/Im0 Do\nQ\n")
    } else {
        String::new()
    };
    push_obj(
        &mut out,
        &mut offsets,
        format!(
            "<< /Length {} >>\nstream\n{content}endstream",
            content.len()
        )
        .as_bytes(),
    );
    if let Some((jpeg, width, height)) = image {
        let mut body = format!(
            "<< /Type /XObject /Subtype /Image /Width {width} /Height {height} \
             /ColorSpace /DeviceRGB /BitsPerComponent 8 /Filter /DCTDecode /Length {} >>\nstream\n",
            jpeg.len()
        )
        .into_bytes();
        body.extend_from_slice(jpeg);
        body.extend_from_slice(b"\nendstream");
        push_obj(&mut out, &mut offsets, &body);
    }

    let xref_offset = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", offsets.len() + 1).as_bytes());
    out.extend_from_slice(b"0000000000 65535 f \n");
    for offset in &offsets {
        out.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_offset}\n%%EOF\n",
            offsets.len() + 1
        )
        .as_bytes(),
    );
    out
}

/// Best-effort PostScript output: the raster flattened onto white and
/// embedded as a hex `colorimage`, scaled to the fixed page width. Always
/// openable; never a faithful vector.
pub fn eps_with_raster(image: &RgbaImage) -> Vec<u8> {
    let scaled = if image.width() > EPS_MAX_RASTER_WIDTH {
        let height = crate::raster::scale_height(
            image.height(),
            image.width(),
            EPS_MAX_RASTER_WIDTH,
        )
        .max(1);
        image::imageops::resize(
            image,
            EPS_MAX_RASTER_WIDTH,
            height,
            image::imageops::FilterType::Lanczos3,
        )
    } else {
        image.clone()
    };
    let rgb = flatten_onto_white(&scaled);
    let (width, height) = (rgb.width().max(1), rgb.height().max(1));
    let display_width = PAGE_WIDTH;
    let display_height = page_height_for(width, height);

    let mut out = String::new();
    out.push_str("%!PS-Adobe-3.0 EPSF-3.0\n");
    out.push_str(&format!(
        "%%BoundingBox: 0 0 {} {}\n",
        display_width.round() as i64,
        display_height.round() as i64
    ));
    out.push_str("%%Pages: 1\n%%EndComments\n");
    out.push_str("gsave\n");
    out.push_str(&format!("/picstr {} string def\n", width * 3));
    out.push_str(&format!("{display_width:.2} {display_height:.2} scale\n"));
    out.push_str(&format!(
        "{width} {height} 8 [{width} 0 0 -{height} 0 {height}]\n"
    ));
    out.push_str("{currentfile picstr readhexstring pop} false 3 colorimage\n");
    let raw = rgb.as_raw();
    let row_bytes = (width * 3) as usize;
    for row in raw.chunks(row_bytes) {
        out.push_str(&hex::encode(row));
        out.push('\n');
    }
    out.push_str("grestore\nshowpage\n%%EOF\n");
    out.into_bytes()
}

/// Raster-to-SVG target: the PNG embedded as a base64 `<image>` element at
/// its intrinsic size.
pub fn svg_wrapping_raster(png_bytes: &[u8], width: u32, height: u32) -> Vec<u8> {
    let encoded = BASE64.encode(png_bytes);
    format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" width="{width}" height="{height}" viewBox="0 0 {width} {height}"><image width="{width}" height="{height}" xlink:href="data:image/png;base64,{encoded}"/></svg>"#
    )
    .into_bytes()
}

/// Reduced-fidelity stand-in for vector sources this engine cannot parse; a
/// bordered empty frame that is valid SVG but carries no source content.
pub fn svg_placeholder(width: u32, height: u32) -> Vec<u8> {
    format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}" viewBox="0 0 {width} {height}"><rect x="0.5" y="0.5" width="{}" height="{}" fill="none" stroke="#cccccc"/></svg>"##,
        width.saturating_sub(1),
        height.saturating_sub(1)
    )
    .into_bytes()
}
