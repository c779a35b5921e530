use mime::Mime;

/// Every file format the engine can ingest or produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetFormat {
    Png,
    Jpg,
    Gif,
    Webp,
    Svg,
    Ai,
    Eps,
    Pdf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceClass {
    Vector,
    Raster,
}

impl AssetFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpg),
            "gif" => Some(Self::Gif),
            "webp" => Some(Self::Webp),
            "svg" => Some(Self::Svg),
            "ai" => Some(Self::Ai),
            "eps" => Some(Self::Eps),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    pub fn from_mime(essence: &str) -> Option<Self> {
        match essence.to_ascii_lowercase().as_str() {
            "image/png" => Some(Self::Png),
            "image/jpeg" | "image/jpg" => Some(Self::Jpg),
            "image/gif" => Some(Self::Gif),
            "image/webp" => Some(Self::Webp),
            "image/svg+xml" | "image/svg" => Some(Self::Svg),
            "application/postscript" => Some(Self::Eps),
            "application/illustrator" => Some(Self::Ai),
            "application/pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    pub fn mime(&self) -> Mime {
        match self {
            Self::Png => mime::IMAGE_PNG,
            Self::Jpg => mime::IMAGE_JPEG,
            Self::Gif => mime::IMAGE_GIF,
            Self::Webp => "image/webp".parse().unwrap_or(mime::APPLICATION_OCTET_STREAM),
            Self::Svg => mime::IMAGE_SVG,
            Self::Ai => "application/illustrator"
                .parse()
                .unwrap_or(mime::APPLICATION_OCTET_STREAM),
            Self::Eps => "application/postscript"
                .parse()
                .unwrap_or(mime::APPLICATION_OCTET_STREAM),
            Self::Pdf => mime::APPLICATION_PDF,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpg => "jpg",
            Self::Gif => "gif",
            Self::Webp => "webp",
            Self::Svg => "svg",
            Self::Ai => "ai",
            Self::Eps => "eps",
            Self::Pdf => "pdf",
        }
    }

    pub fn classify(&self) -> SourceClass {
        match self {
            Self::Svg | Self::Ai | Self::Eps | Self::Pdf => SourceClass::Vector,
            _ => SourceClass::Raster,
        }
    }

    pub fn is_raster(&self) -> bool {
        self.classify() == SourceClass::Raster
    }
}

/// Classifies a stored source-format string.
///
/// An unknown or empty format string deliberately classifies as a PNG raster:
/// uploads predate strict format validation, and the raster pipeline decodes
/// by content sniffing anyway, so PNG is the documented default rather than a
/// hidden one.
pub fn classify_source(raw: &str) -> (AssetFormat, SourceClass) {
    match AssetFormat::parse(raw) {
        Some(format) => (format, format.classify()),
        None => (AssetFormat::Png, SourceClass::Raster),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_set_matches_contract() {
        for raw in ["svg", "ai", "eps", "pdf"] {
            let (_, class) = classify_source(raw);
            assert_eq!(class, SourceClass::Vector, "{raw} should be vector");
        }
        for raw in ["png", "jpg", "jpeg", "gif", "webp"] {
            let (_, class) = classify_source(raw);
            assert_eq!(class, SourceClass::Raster, "{raw} should be raster");
        }
    }

    #[test]
    fn classification_is_case_insensitive() {
        assert_eq!(AssetFormat::parse("SVG"), Some(AssetFormat::Svg));
        assert_eq!(AssetFormat::parse(" Png "), Some(AssetFormat::Png));
        assert_eq!(AssetFormat::parse("JPEG"), Some(AssetFormat::Jpg));
    }

    #[test]
    fn unknown_format_defaults_to_png_raster() {
        assert_eq!(classify_source(""), (AssetFormat::Png, SourceClass::Raster));
        assert_eq!(
            classify_source("tiff"),
            (AssetFormat::Png, SourceClass::Raster)
        );
    }

    #[test]
    fn jpeg_alias_maps_to_jpg() {
        assert_eq!(AssetFormat::parse("jpeg"), Some(AssetFormat::Jpg));
        assert_eq!(AssetFormat::Jpg.extension(), "jpg");
        assert_eq!(AssetFormat::Jpg.mime().essence_str(), "image/jpeg");
    }

    #[test]
    fn mime_round_trip() {
        for format in [
            AssetFormat::Png,
            AssetFormat::Jpg,
            AssetFormat::Gif,
            AssetFormat::Webp,
            AssetFormat::Svg,
            AssetFormat::Pdf,
        ] {
            assert_eq!(
                AssetFormat::from_mime(format.mime().essence_str()),
                Some(format)
            );
        }
    }
}
