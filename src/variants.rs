use crate::db::{SourceAsset, VariantData};
use crate::error::EngineError;
use crate::format::{classify_source, AssetFormat, SourceClass};
use crate::resolve;
use crate::state::AppState;
use tracing::{info, warn};

/// Formats regenerated eagerly when a variant's source bytes change. The
/// remaining targets (gif, webp, svg) are generated lazily on first request.
pub fn eager_targets(class: SourceClass) -> &'static [AssetFormat] {
    match class {
        SourceClass::Raster => &[AssetFormat::Png, AssetFormat::Jpg, AssetFormat::Pdf],
        SourceClass::Vector => &[
            AssetFormat::Png,
            AssetFormat::Jpg,
            AssetFormat::Pdf,
            AssetFormat::Eps,
        ],
    }
}

pub struct PickedVariant<'a> {
    pub data: &'a VariantData,
    pub is_dark: bool,
    pub fell_back: bool,
}

/// Selects the variant to serve. A dark request against an asset without
/// dark source bytes substitutes the light variant rather than failing, so a
/// dark-mode consumer always renders something.
pub fn pick_variant(asset: &SourceAsset, want_dark: bool) -> PickedVariant<'_> {
    if want_dark {
        if let Some(dark) = asset.dark.as_ref() {
            return PickedVariant {
                data: dark,
                is_dark: true,
                fell_back: false,
            };
        }
        return PickedVariant {
            data: &asset.light,
            is_dark: false,
            fell_back: true,
        };
    }
    PickedVariant {
        data: &asset.light,
        is_dark: false,
        fell_back: false,
    }
}

#[derive(Debug, Clone)]
pub struct RegenSummary {
    pub version: i64,
    pub generated: Vec<String>,
    pub failed: Vec<String>,
}

/// Stores or replaces a variant's source bytes, invalidates its cached
/// derivatives, and eagerly regenerates the standard format set against the
/// new bytes. Each format conversion is independent: one failure is logged
/// and skipped without blocking the rest.
pub async fn set_variant(
    state: &AppState,
    asset_id: &str,
    client_id: &str,
    is_dark: bool,
    bytes: Vec<u8>,
    format: &str,
    mime: &str,
) -> Result<RegenSummary, EngineError> {
    if bytes.is_empty() {
        return Err(EngineError::UnsupportedFormat(
            "variant bytes must not be empty".to_string(),
        ));
    }
    let version = if is_dark {
        state
            .db
            .set_dark_variant(asset_id, &bytes, format, mime)
            .await?
            .ok_or_else(|| EngineError::SourceNotFound(asset_id.to_string()))?
    } else {
        state
            .db
            .set_light_variant(asset_id, client_id, &bytes, format, mime)
            .await?
    };
    let invalidated = state.store.invalidate(asset_id, is_dark).await?;
    info!(
        asset_id = %asset_id,
        is_dark,
        version,
        invalidated,
        "variant source replaced"
    );

    let variant = VariantData {
        bytes,
        format: format.to_string(),
        mime: mime.to_string(),
        version,
    };
    let (_, class) = classify_source(format);
    let mut generated = Vec::new();
    let mut failed = Vec::new();
    for target in eager_targets(class) {
        match resolve::convert(state, asset_id, &variant, is_dark, *target).await {
            Ok(converted) => {
                resolve_write(state, asset_id, &variant, is_dark, *target, &converted).await;
                generated.push(target.extension().to_string());
            }
            Err(err) => {
                warn!(
                    asset_id = %asset_id,
                    target = target.extension(),
                    error = %err,
                    "eager regeneration failed for one format"
                );
                failed.push(target.extension().to_string());
            }
        }
    }
    Ok(RegenSummary {
        version,
        generated,
        failed,
    })
}

async fn resolve_write(
    state: &AppState,
    asset_id: &str,
    variant: &VariantData,
    is_dark: bool,
    target: AssetFormat,
    converted: &resolve::Converted,
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
            warn!(
                asset_id = %asset_id,
                target = target.extension(),
                "eager derivative superseded before write"
            );
        }
        Err(err) => {
            warn!(
                asset_id = %asset_id,
                target = target.extension(),
                error = ?err,
                "eager derivative write failed"
            );
        }
    }
}

/// Clears the dark variant (the light variant is only removed by deleting
/// the whole asset) and invalidates its derivatives.
pub async fn remove_variant(state: &AppState, asset_id: &str) -> Result<(), EngineError> {
    let existed = state.db.clear_dark_variant(asset_id).await?;
    if !existed {
        return Err(EngineError::SourceNotFound(asset_id.to_string()));
    }
    let invalidated = state.store.invalidate(asset_id, true).await?;
    info!(asset_id = %asset_id, invalidated, "dark variant removed");
    Ok(())
}

pub async fn delete_asset(state: &AppState, asset_id: &str) -> Result<(), EngineError> {
    let existed = state.db.delete_source_asset(asset_id).await?;
    if !existed {
        return Err(EngineError::SourceNotFound(asset_id.to_string()));
    }
    let invalidated = state.store.invalidate_all(asset_id).await?;
    info!(asset_id = %asset_id, invalidated, "asset deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::test_state;
    use image::{Rgba, RgbaImage};
    use tempfile::tempdir;

    fn png_logo(width: u32, height: u32) -> Vec<u8> {
        let image = RgbaImage::from_pixel(width, height, Rgba([90, 40, 10, 255]));
        let mut bytes = Vec::new();
        image
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[tokio::test]
    async fn upload_eagerly_generates_raster_set() {
        let dir = tempdir().unwrap();
        let state = test_state(&dir).await;
        let summary = set_variant(&state, "a1", "c1", false, png_logo(512, 512), "png", "image/png")
            .await
            .unwrap();
        assert_eq!(summary.version, 1);
        assert_eq!(summary.generated, vec!["png", "jpg", "pdf"]);
        assert!(summary.failed.is_empty());

        let jpeg = state
            .store
            .get("a1", AssetFormat::Jpg, false, 1)
            .await
            .unwrap()
            .unwrap();
        let decoded = image::load_from_memory(&jpeg.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (512, 512));

        let pdf = state
            .store
            .get("a1", AssetFormat::Pdf, false, 1)
            .await
            .unwrap()
            .unwrap();
        assert!(pdf.bytes.starts_with(b"%PDF-1.4"));
        assert_eq!(pdf.mime_type, "application/pdf");
    }

    #[tokio::test]
    async fn svg_upload_adds_postscript_target() {
        let dir = tempdir().unwrap();
        let state = test_state(&dir).await;
        let svg = r##"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 50 50"><circle cx="25" cy="25" r="20" fill="#abcdef"/></svg>"##;
        let summary = set_variant(
            &state,
            "a1",
            "c1",
            false,
            svg.as_bytes().to_vec(),
            "svg",
            "image/svg+xml",
        )
        .await
        .unwrap();
        assert_eq!(summary.generated, vec!["png", "jpg", "pdf", "eps"]);
        let eps = state
            .store
            .get("a1", AssetFormat::Eps, false, 1)
            .await
            .unwrap()
            .unwrap();
        assert!(eps.bytes.starts_with(b"%!PS-Adobe-3.0 EPSF-3.0"));
        assert!(eps.fidelity.is_some());
    }

    #[tokio::test]
    async fn replacing_variant_invalidates_old_derivatives() {
        let dir = tempdir().unwrap();
        let state = test_state(&dir).await;
        set_variant(&state, "a1", "c1", false, png_logo(10, 10), "png", "image/png")
            .await
            .unwrap();
        // Stale row from version 1 must never be served once version 2 lands.
        let summary = set_variant(&state, "a1", "c1", false, png_logo(30, 30), "png", "image/png")
            .await
            .unwrap();
        assert_eq!(summary.version, 2);
        let derivative = state
            .store
            .get("a1", AssetFormat::Png, false, 2)
            .await
            .unwrap()
            .unwrap();
        let decoded = image::load_from_memory(&derivative.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (30, 30));
        assert!(state
            .store
            .get("a1", AssetFormat::Png, false, 1)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn one_bad_format_does_not_block_the_rest() {
        let dir = tempdir().unwrap();
        let state = test_state(&dir).await;
        // Valid PNG magic is absent, so raster decodes fail; the PDF target
        // still degrades to a placeholder page instead of failing.
        let summary = set_variant(
            &state,
            "a1",
            "c1",
            false,
            b"not an image at all".to_vec(),
            "png",
            "image/png",
        )
        .await
        .unwrap();
        assert!(summary.generated.contains(&"pdf".to_string()));
        assert!(summary.failed.contains(&"png".to_string()));
        assert!(summary.failed.contains(&"jpg".to_string()));
    }

    #[tokio::test]
    async fn dark_variant_lifecycle() {
        let dir = tempdir().unwrap();
        let state = test_state(&dir).await;
        set_variant(&state, "a1", "c1", false, png_logo(8, 8), "png", "image/png")
            .await
            .unwrap();
        set_variant(&state, "a1", "c1", true, png_logo(8, 8), "png", "image/png")
            .await
            .unwrap();
        let asset = state.db.get_source_asset("a1").await.unwrap().unwrap();
        assert!(asset.dark.is_some());
        let picked = pick_variant(&asset, true);
        assert!(picked.is_dark && !picked.fell_back);

        remove_variant(&state, "a1").await.unwrap();
        let asset = state.db.get_source_asset("a1").await.unwrap().unwrap();
        let picked = pick_variant(&asset, true);
        assert!(!picked.is_dark && picked.fell_back);
        assert!(state
            .store
            .list_formats("a1")
            .await
            .unwrap()
            .iter()
            .all(|(_, is_dark)| !is_dark));
    }

    #[tokio::test]
    async fn delete_asset_removes_everything() {
        let dir = tempdir().unwrap();
        let state = test_state(&dir).await;
        set_variant(&state, "a1", "c1", false, png_logo(8, 8), "png", "image/png")
            .await
            .unwrap();
        delete_asset(&state, "a1").await.unwrap();
        assert!(state.db.get_source_asset("a1").await.unwrap().is_none());
        assert!(state.store.list_formats("a1").await.unwrap().is_empty());
        let err = delete_asset(&state, "a1").await.unwrap_err();
        assert!(matches!(err, EngineError::SourceNotFound(_)));
    }
}
