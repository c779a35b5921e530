use crate::containers;
use crate::db::{AssetCategory, VariantData};
use crate::error::EngineError;
use crate::format::{classify_source, AssetFormat, SourceClass};
use crate::raster;
use crate::state::AppState;
use crate::store::convert_key;
use crate::variants::pick_variant;
use crate::vector;
use anyhow::{anyhow, Result};
use image::{Rgba, RgbaImage};
use tokio::task;
use tracing::{debug, warn};

/// Whether a conversion output is faithful to the source or a named
/// best-effort degradation. Degraded results are tagged all the way through
/// the cache so they can never masquerade as faithful renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fidelity {
    Exact,
    Degraded(String),
}

impl Fidelity {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Degraded(_) => "degraded",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Exact => None,
            Self::Degraded(reason) => Some(reason),
        }
    }

    pub fn from_stored(stored: Option<String>) -> Self {
        match stored {
            Some(reason) => Self::Degraded(reason),
            None => Self::Exact,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Converted {
    pub bytes: Vec<u8>,
    pub mime: String,
    pub fidelity: Fidelity,
}

#[derive(Debug, Clone, Copy)]
pub struct SizeSpec {
    pub width: u32,
    pub preserve_ratio: bool,
    pub preserve_vector: bool,
}

#[derive(Debug, Clone)]
pub struct ServeRequest {
    pub asset_id: String,
    pub format: Option<AssetFormat>,
    pub dark: bool,
    pub size: Option<SizeSpec>,
}

#[derive(Debug, Clone)]
pub struct Served {
    pub bytes: Vec<u8>,
    pub mime: String,
    pub cache_hit: bool,
    pub fidelity: Fidelity,
    pub fell_back_to_light: bool,
}

#[derive(Debug, Clone)]
struct ConvertLimits {
    max_svg_bytes: usize,
    max_svg_node_count: usize,
    max_decoded_raster_pixels: u64,
}

impl ConvertLimits {
    fn from_config(config: &crate::config::Config) -> Self {
        Self {
            max_svg_bytes: config.max_svg_bytes,
            max_svg_node_count: config.max_svg_node_count,
            max_decoded_raster_pixels: config.max_decoded_raster_pixels,
        }
    }
}

fn placeholder_raster(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_pixel(width.max(1), height.max(1), Rgba([0, 0, 0, 0]))
}

/// Produces `target` from one variant's source bytes. Pure CPU work; callers
/// run it under `spawn_blocking`.
fn convert_sync(
    limits: &ConvertLimits,
    source: &[u8],
    source_format_raw: &str,
    target: AssetFormat,
) -> Result<Converted> {
    let (source_format, source_class) = classify_source(source_format_raw);
    let converted = match source_class {
        SourceClass::Raster => convert_from_raster(limits, source, target)?,
        SourceClass::Vector => convert_from_vector(limits, source, source_format, target)?,
    };
    Ok(converted)
}

fn convert_from_raster(
    limits: &ConvertLimits,
    source: &[u8],
    target: AssetFormat,
) -> Result<Converted> {
    let max_pixels = limits.max_decoded_raster_pixels;
    match target {
        AssetFormat::Png | AssetFormat::Jpg | AssetFormat::Gif | AssetFormat::Webp => {
            let bytes = raster::transcode(source, target, max_pixels)?;
            Ok(exact(bytes, target))
        }
        AssetFormat::Pdf => {
            // A broken embed degrades to an empty page; the other formats in
            // a regeneration batch must keep flowing.
            match raster::decode(source, max_pixels)
                .and_then(|image| containers::pdf_with_raster(&image))
            {
                Ok(bytes) => Ok(exact(bytes, target)),
                Err(err) => Ok(degraded(
                    containers::pdf_placeholder(),
                    target,
                    format!("placeholder page: {err}"),
                )),
            }
        }
        AssetFormat::Eps | AssetFormat::Ai => {
            let image = raster::decode(source, max_pixels)?;
            Ok(degraded(
                containers::eps_with_raster(&image),
                target,
                "rasterized postscript".to_string(),
            ))
        }
        AssetFormat::Svg => {
            let png = raster::to_png(source, max_pixels)?;
            let (width, height) = raster::dimensions(&png, max_pixels)?;
            Ok(degraded(
                containers::svg_wrapping_raster(&png, width, height),
                target,
                "embedded raster".to_string(),
            ))
        }
    }
}

fn convert_from_vector(
    limits: &ConvertLimits,
    source: &[u8],
    source_format: AssetFormat,
    target: AssetFormat,
) -> Result<Converted> {
    if source_format == target {
        return Ok(exact(source.to_vec(), target));
    }
    if source_format != AssetFormat::Svg {
        return convert_from_opaque_vector(source_format, target);
    }
    match target {
        AssetFormat::Png | AssetFormat::Jpg | AssetFormat::Gif | AssetFormat::Webp => {
            let image = rasterize_native(limits, source)?;
            let bytes = raster::encode_rgba(&image, target)?;
            Ok(exact(bytes, target))
        }
        AssetFormat::Pdf => match rasterize_native(limits, source)
            .and_then(|image| containers::pdf_with_raster(&image))
        {
            Ok(bytes) => Ok(exact(bytes, target)),
            Err(err) => Ok(degraded(
                containers::pdf_placeholder(),
                target,
                format!("placeholder page: {err}"),
            )),
        },
        AssetFormat::Eps | AssetFormat::Ai => {
            let image = rasterize_native(limits, source)?;
            Ok(degraded(
                containers::eps_with_raster(&image),
                target,
                "rasterized postscript".to_string(),
            ))
        }
        AssetFormat::Svg => unreachable!("handled by passthrough"),
    }
}

/// AI, EPS and PDF uploads carry vector content this engine does not parse;
/// everything except identity passthrough is a tagged placeholder.
fn convert_from_opaque_vector(
    source_format: AssetFormat,
    target: AssetFormat,
) -> Result<Converted> {
    let reason = format!("unparsed {} source", source_format.extension());
    match target {
        AssetFormat::Svg => Ok(degraded(
            containers::svg_placeholder(vector::FALLBACK_DIMENSION, vector::FALLBACK_DIMENSION),
            target,
            "reduced-fidelity passthrough".to_string(),
        )),
        AssetFormat::Pdf => Ok(degraded(containers::pdf_placeholder(), target, reason)),
        AssetFormat::Eps | AssetFormat::Ai => {
            let image = placeholder_raster(vector::FALLBACK_DIMENSION, vector::FALLBACK_DIMENSION);
            Ok(degraded(containers::eps_with_raster(&image), target, reason))
        }
        AssetFormat::Png | AssetFormat::Jpg | AssetFormat::Gif | AssetFormat::Webp => {
            let image = placeholder_raster(vector::FALLBACK_DIMENSION, vector::FALLBACK_DIMENSION);
            let bytes = raster::encode_rgba(&image, target)?;
            Ok(degraded(bytes, target, reason))
        }
    }
}

fn rasterize_native(limits: &ConvertLimits, source: &[u8]) -> Result<RgbaImage> {
    vector::rasterize_native(
        source,
        limits.max_svg_bytes,
        limits.max_svg_node_count,
        limits.max_decoded_raster_pixels,
    )
}

fn exact(bytes: Vec<u8>, target: AssetFormat) -> Converted {
    Converted {
        bytes,
        mime: target.mime().essence_str().to_string(),
        fidelity: Fidelity::Exact,
    }
}

fn degraded(bytes: Vec<u8>, target: AssetFormat, reason: String) -> Converted {
    Converted {
        bytes,
        mime: target.mime().essence_str().to_string(),
        fidelity: Fidelity::Degraded(reason),
    }
}

/// Converts one variant to `target` on the blocking pool, bounded by the
/// conversion semaphore. Failures are recorded in the failure log and
/// surfaced as `ConversionFailed`.
pub async fn convert(
    state: &AppState,
    asset_id: &str,
    variant: &VariantData,
    is_dark: bool,
    target: AssetFormat,
) -> Result<Converted, EngineError> {
    let permit = state
        .convert_semaphore
        .clone()
        .acquire_owned()
        .await
        .map_err(|err| EngineError::Internal(anyhow!(err)))?;
    let limits = ConvertLimits::from_config(&state.config);
    let source = variant.bytes.clone();
    let source_format = variant.format.clone();
    let joined = task::spawn_blocking(move || {
        let _permit = permit;
        convert_sync(&limits, &source, &source_format, target)
    })
    .await;
    let result = match joined {
        Ok(result) => result,
        Err(err) => return Err(EngineError::Internal(anyhow!(err))),
    };
    match result {
        Ok(converted) => Ok(converted),
        Err(err) => {
            let reason = err.to_string();
            state
                .record_conversion_failure(
                    asset_id,
                    &variant.format,
                    target.extension(),
                    is_dark,
                    reason.clone(),
                )
                .await;
            Err(EngineError::ConversionFailed {
                asset_id: asset_id.to_string(),
                source_format: variant.format.clone(),
                target: target.extension().to_string(),
                reason,
            })
        }
    }
}

/// Request-time orchestrator: cache lookup, singleflight-coalesced on-the-fly
/// generation, best-effort cache write-back, and a final resize step.
pub async fn resolve(state: &AppState, request: &ServeRequest) -> Result<Served, EngineError> {
    let asset = state
        .db
        .get_source_asset(&request.asset_id)
        .await?
        .ok_or_else(|| EngineError::SourceNotFound(request.asset_id.clone()))?;
    let picked = pick_variant(&asset, request.dark);
    let variant = picked.data.clone();
    let fell_back = picked.fell_back;
    let variant_is_dark = picked.is_dark;

    let Some(target) = request.format else {
        return serve_native(state, &variant, fell_back, request.size).await;
    };

    if asset.category != AssetCategory::Logo {
        return Err(EngineError::UnsupportedFormat(format!(
            "{} assets have no derivatives",
            asset.category.as_str()
        )));
    }

    let (source_format, source_class) = classify_source(&variant.format);

    // Sized raster output of a vector source renders directly at target
    // density; resizing a cached native-size raster of vector content loses
    // sharpness.
    if let Some(size) = request.size {
        if source_class == SourceClass::Vector && target.is_raster() && !size.preserve_vector {
            let converted = density_rasterize(
                state,
                &asset.id,
                &variant,
                variant_is_dark,
                source_format,
                target,
                size,
            )
            .await?;
            return Ok(Served {
                bytes: converted.bytes,
                mime: converted.mime,
                cache_hit: false,
                fidelity: converted.fidelity,
                fell_back_to_light: fell_back,
            });
        }
    }

    let (bytes, mime, fidelity, cache_hit) = match state
        .store
        .get(&asset.id, target, variant_is_dark, variant.version)
        .await?
    {
        Some(derivative) => (
            derivative.bytes,
            derivative.mime_type,
            Fidelity::from_stored(derivative.fidelity),
            true,
        ),
        None => {
            generate_coalesced(state, &asset.id, &variant, variant_is_dark, target).await?
        }
    };

    let (bytes, fidelity) = apply_resize(state, bytes, fidelity, target, request.size);
    Ok(Served {
        bytes,
        mime,
        cache_hit,
        fidelity,
        fell_back_to_light: fell_back,
    })
}

async fn serve_native(
    state: &AppState,
    variant: &VariantData,
    fell_back: bool,
    size: Option<SizeSpec>,
) -> Result<Served, EngineError> {
    let (source_format, source_class) = classify_source(&variant.format);
    let mime = if variant.mime.is_empty() {
        source_format.mime().essence_str().to_string()
    } else {
        variant.mime.clone()
    };
    let mut bytes = variant.bytes.clone();
    let mut fidelity = Fidelity::Exact;
    if source_class == SourceClass::Raster {
        if let Some(spec) = size {
            if !spec.preserve_vector {
                (bytes, fidelity) = resize_or_degrade(state, bytes, fidelity, source_format, spec);
            }
        }
    }
    Ok(Served {
        bytes,
        mime,
        cache_hit: false,
        fidelity,
        fell_back_to_light: fell_back,
    })
}

async fn generate_coalesced(
    state: &AppState,
    asset_id: &str,
    variant: &VariantData,
    is_dark: bool,
    target: AssetFormat,
) -> Result<(Vec<u8>, String, Fidelity, bool), EngineError> {
    let key = convert_key(asset_id, target, is_dark);
    let permit = state.singleflight.acquire(&key).await;
    if !permit.is_leader() {
        let completed = permit.wait_result(state.config.singleflight_wait).await;
        if completed {
            if let Some(derivative) = state
                .store
                .get(asset_id, target, is_dark, variant.version)
                .await?
            {
                return Ok((
                    derivative.bytes,
                    derivative.mime_type,
                    Fidelity::from_stored(derivative.fidelity),
                    true,
                ));
            }
        }
        // Leader failed or timed out; fall through and generate for
        // ourselves rather than failing the read.
        debug!(key = %key, "singleflight wait missed, generating inline");
        let converted = convert(state, asset_id, variant, is_dark, target).await?;
        write_back(state, asset_id, variant, is_dark, target, &converted).await;
        return Ok((converted.bytes, converted.mime, converted.fidelity, false));
    }
    let converted = convert(state, asset_id, variant, is_dark, target).await?;
    write_back(state, asset_id, variant, is_dark, target, &converted).await;
    Ok((converted.bytes, converted.mime, converted.fidelity, false))
}

/// Cache writes are best-effort: a failed write is logged and the request is
/// served from the freshly generated bytes.
async fn write_back(
    state: &AppState,
    asset_id: &str,
    variant: &VariantData,
    is_dark: bool,
    target: AssetFormat,
    converted: &Converted,
) {
    match state
        .store
        .put(
            asset_id,
            target,
            is_dark,
            &converted.bytes,
            &converted.mime,
            variant.version,
            converted.fidelity.reason(),
        )
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            debug!(asset_id = %asset_id, format = target.extension(), "skipped stale cache write");
        }
        Err(err) => {
            let error = EngineError::CacheWriteFailed(err.to_string());
            warn!(asset_id = %asset_id, format = target.extension(), error = %error, "derivative cache write failed");
        }
    }
}

async fn density_rasterize(
    state: &AppState,
    asset_id: &str,
    variant: &VariantData,
    is_dark: bool,
    source_format: AssetFormat,
    target: AssetFormat,
    size: SizeSpec,
) -> Result<Converted, EngineError> {
    let permit = state
        .convert_semaphore
        .clone()
        .acquire_owned()
        .await
        .map_err(|err| EngineError::Internal(anyhow!(err)))?;
    let limits = ConvertLimits::from_config(&state.config);
    let source = variant.bytes.clone();
    let joined = task::spawn_blocking(move || -> Result<Converted> {
        let _permit = permit;
        if source_format == AssetFormat::Svg {
            let image = vector::rasterize_for_width(
                &source,
                size.width,
                size.preserve_ratio,
                limits.max_svg_bytes,
                limits.max_svg_node_count,
                limits.max_decoded_raster_pixels,
            )?;
            let bytes = raster::encode_rgba(&image, target)?;
            Ok(exact(bytes, target))
        } else {
            let image = placeholder_raster(size.width, size.width);
            let bytes = raster::encode_rgba(&image, target)?;
            Ok(degraded(
                bytes,
                target,
                format!("unparsed {} source", source_format.extension()),
            ))
        }
    })
    .await;
    let result = match joined {
        Ok(result) => result,
        Err(err) => return Err(EngineError::Internal(anyhow!(err))),
    };
    match result {
        Ok(converted) => Ok(converted),
        Err(err) => {
            let reason = err.to_string();
            state
                .record_conversion_failure(
                    asset_id,
                    &variant.format,
                    target.extension(),
                    is_dark,
                    reason.clone(),
                )
                .await;
            Err(EngineError::ConversionFailed {
                asset_id: asset_id.to_string(),
                source_format: variant.format.clone(),
                target: target.extension().to_string(),
                reason,
            })
        }
    }
}

fn apply_resize(
    state: &AppState,
    bytes: Vec<u8>,
    fidelity: Fidelity,
    target: AssetFormat,
    size: Option<SizeSpec>,
) -> (Vec<u8>, Fidelity) {
    let Some(spec) = size else {
        return (bytes, fidelity);
    };
    if !target.is_raster() || spec.preserve_vector {
        return (bytes, fidelity);
    }
    resize_or_degrade(state, bytes, fidelity, target, spec)
}

fn resize_or_degrade(
    state: &AppState,
    bytes: Vec<u8>,
    fidelity: Fidelity,
    format: AssetFormat,
    spec: SizeSpec,
) -> (Vec<u8>, Fidelity) {
    match raster::resize(
        &bytes,
        format,
        spec.width,
        spec.preserve_ratio,
        state.config.max_decoded_raster_pixels,
    ) {
        Ok(resized) => (resized, fidelity),
        Err(err) => {
            let error = EngineError::ResizeFailed(err.to_string());
            warn!(format = format.extension(), error = %error, "serving unresized buffer");
            (bytes, Fidelity::Degraded("resize failed".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::test_state;
    use crate::variants;
    use image::RgbaImage;
    use tempfile::tempdir;

    fn png_logo(width: u32, height: u32) -> Vec<u8> {
        let image = RgbaImage::from_pixel(width, height, Rgba([20, 80, 160, 255]));
        let mut bytes = Vec::new();
        image
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    const WIDE_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 200 100"><rect width="200" height="100" fill="#112233"/></svg>"##;

    fn request(asset_id: &str, format: Option<AssetFormat>, dark: bool) -> ServeRequest {
        ServeRequest {
            asset_id: asset_id.to_string(),
            format,
            dark,
            size: None,
        }
    }

    #[tokio::test]
    async fn missing_asset_is_source_not_found() {
        let dir = tempdir().unwrap();
        let state = test_state(&dir).await;
        let err = resolve(&state, &request("ghost", Some(AssetFormat::Png), false))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::SourceNotFound(_)));
    }

    #[tokio::test]
    async fn resolve_is_idempotent_and_second_call_hits_cache() {
        let dir = tempdir().unwrap();
        let state = test_state(&dir).await;
        variants::set_variant(&state, "a1", "c1", false, png_logo(64, 64), "png", "image/png")
            .await
            .unwrap();
        let first = resolve(&state, &request("a1", Some(AssetFormat::Jpg), false))
            .await
            .unwrap();
        let second = resolve(&state, &request("a1", Some(AssetFormat::Jpg), false))
            .await
            .unwrap();
        assert_eq!(first.bytes, second.bytes);
        assert!(second.cache_hit);
        assert_eq!(second.mime, "image/jpeg");
    }

    #[tokio::test]
    async fn uploaded_png_resolves_to_full_size_jpeg() {
        let dir = tempdir().unwrap();
        let state = test_state(&dir).await;
        variants::set_variant(&state, "a1", "c1", false, png_logo(512, 512), "png", "image/png")
            .await
            .unwrap();
        let served = resolve(&state, &request("a1", Some(AssetFormat::Jpg), false))
            .await
            .unwrap();
        let decoded = image::load_from_memory(&served.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (512, 512));
        // Eager regeneration already cached it.
        assert!(served.cache_hit);
    }

    #[tokio::test]
    async fn dark_request_falls_back_to_light_derivative() {
        let dir = tempdir().unwrap();
        let state = test_state(&dir).await;
        variants::set_variant(&state, "a1", "c1", false, png_logo(32, 32), "png", "image/png")
            .await
            .unwrap();
        let served = resolve(&state, &request("a1", Some(AssetFormat::Png), true))
            .await
            .unwrap();
        assert!(served.fell_back_to_light);
        let decoded = image::load_from_memory(&served.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 32));
    }

    #[tokio::test]
    async fn invalidation_regenerates_from_new_bytes() {
        let dir = tempdir().unwrap();
        let state = test_state(&dir).await;
        variants::set_variant(&state, "a1", "c1", false, png_logo(10, 10), "png", "image/png")
            .await
            .unwrap();
        let before = resolve(&state, &request("a1", Some(AssetFormat::Png), false))
            .await
            .unwrap();
        variants::set_variant(&state, "a1", "c1", false, png_logo(20, 20), "png", "image/png")
            .await
            .unwrap();
        let after = resolve(&state, &request("a1", Some(AssetFormat::Png), false))
            .await
            .unwrap();
        assert_ne!(before.bytes, after.bytes);
        let decoded = image::load_from_memory(&after.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (20, 20));
    }

    #[tokio::test]
    async fn sized_vector_render_is_exact_at_target_density() {
        let dir = tempdir().unwrap();
        let state = test_state(&dir).await;
        variants::set_variant(
            &state,
            "a1",
            "c1",
            false,
            WIDE_SVG.as_bytes().to_vec(),
            "svg",
            "image/svg+xml",
        )
        .await
        .unwrap();
        let mut req = request("a1", Some(AssetFormat::Png), false);
        req.size = Some(SizeSpec {
            width: 400,
            preserve_ratio: true,
            preserve_vector: false,
        });
        let served = resolve(&state, &req).await.unwrap();
        let decoded = image::load_from_memory(&served.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (400, 200));
        assert_eq!(served.fidelity, Fidelity::Exact);
    }

    #[tokio::test]
    async fn sized_raster_resize_preserves_ratio() {
        let dir = tempdir().unwrap();
        let state = test_state(&dir).await;
        variants::set_variant(&state, "a1", "c1", false, png_logo(1000, 500), "png", "image/png")
            .await
            .unwrap();
        let mut req = request("a1", Some(AssetFormat::Png), false);
        req.size = Some(SizeSpec {
            width: 200,
            preserve_ratio: true,
            preserve_vector: false,
        });
        let served = resolve(&state, &req).await.unwrap();
        let decoded = image::load_from_memory(&served.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (200, 100));
    }

    #[tokio::test]
    async fn native_serve_without_format_returns_source_bytes() {
        let dir = tempdir().unwrap();
        let state = test_state(&dir).await;
        let source = png_logo(24, 24);
        variants::set_variant(&state, "a1", "c1", false, source.clone(), "png", "image/png")
            .await
            .unwrap();
        let served = resolve(&state, &request("a1", None, false)).await.unwrap();
        assert_eq!(served.bytes, source);
        assert_eq!(served.mime, "image/png");
    }

    #[tokio::test]
    async fn vector_passthrough_serves_original_svg() {
        let dir = tempdir().unwrap();
        let state = test_state(&dir).await;
        variants::set_variant(
            &state,
            "a1",
            "c1",
            false,
            WIDE_SVG.as_bytes().to_vec(),
            "svg",
            "image/svg+xml",
        )
        .await
        .unwrap();
        let served = resolve(&state, &request("a1", Some(AssetFormat::Svg), false))
            .await
            .unwrap();
        assert_eq!(served.bytes, WIDE_SVG.as_bytes());
        assert_eq!(served.fidelity, Fidelity::Exact);
    }

    #[tokio::test]
    async fn pdf_source_to_svg_is_tagged_degraded() {
        let dir = tempdir().unwrap();
        let state = test_state(&dir).await;
        variants::set_variant(
            &state,
            "a1",
            "c1",
            false,
            b"%PDF-1.4 fake".to_vec(),
            "pdf",
            "application/pdf",
        )
        .await
        .unwrap();
        let served = resolve(&state, &request("a1", Some(AssetFormat::Svg), false))
            .await
            .unwrap();
        assert!(matches!(served.fidelity, Fidelity::Degraded(_)));
        assert!(served.bytes.starts_with(b"<svg"));
    }

    #[tokio::test]
    async fn concurrent_misses_coalesce_to_identical_bytes() {
        let dir = tempdir().unwrap();
        let state = test_state(&dir).await;
        variants::set_variant(&state, "a1", "c1", false, png_logo(128, 128), "png", "image/png")
            .await
            .unwrap();
        // Clear the eager cache so both requests start from a miss.
        state.store.invalidate("a1", false).await.unwrap();
        let state_a = state.clone();
        let state_b = state.clone();
        let (a, b) = tokio::join!(
            async move {
                resolve(&state_a, &request("a1", Some(AssetFormat::Webp), false))
                    .await
                    .unwrap()
            },
            async move {
                resolve(&state_b, &request("a1", Some(AssetFormat::Webp), false))
                    .await
                    .unwrap()
            }
        );
        assert_eq!(a.bytes, b.bytes);
    }
}
