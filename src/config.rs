use anyhow::Result;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub max_upload_bytes: usize,
    pub max_svg_bytes: usize,
    pub max_svg_node_count: usize,
    pub max_raster_bytes: usize,
    pub max_decoded_raster_pixels: u64,
    pub max_concurrent_conversions: usize,
    pub max_in_flight_requests: usize,
    pub singleflight_wait: Duration,
    pub failure_log_path: Option<PathBuf>,
    pub failure_log_max_bytes: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = parse_u16("PORT", 8080);
        let db_path = PathBuf::from(
            env::var("DB_PATH").unwrap_or_else(|_| "/var/lib/brandmark/brandmark.db".to_string()),
        );
        let max_upload_bytes = parse_usize("MAX_UPLOAD_BYTES", 20 * 1024 * 1024);
        let max_svg_bytes = parse_usize("MAX_SVG_BYTES", 2_097_152);
        let max_svg_node_count = parse_usize("MAX_SVG_NODE_COUNT", 200_000);
        let max_raster_bytes = parse_usize("MAX_RASTER_BYTES", 10 * 1024 * 1024);
        let max_decoded_raster_pixels = parse_u64("MAX_DECODED_RASTER_PIXELS", 40_000_000);
        let max_concurrent_conversions = parse_usize("MAX_CONCURRENT_CONVERSIONS", 4).max(1);
        let max_in_flight_requests = parse_usize("MAX_IN_FLIGHT_REQUESTS", 512);
        let singleflight_wait =
            Duration::from_secs(parse_u64("SINGLEFLIGHT_WAIT_SECONDS", 30).max(1));
        let failure_log_path = env::var("FAILURE_LOG_PATH")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty() && !value.eq_ignore_ascii_case("off"))
            .map(PathBuf::from);
        let failure_log_max_bytes = parse_u64("FAILURE_LOG_MAX_BYTES", 102_400);

        Ok(Self {
            host,
            port,
            db_path,
            max_upload_bytes,
            max_svg_bytes,
            max_svg_node_count,
            max_raster_bytes,
            max_decoded_raster_pixels,
            max_concurrent_conversions,
            max_in_flight_requests,
            singleflight_wait,
            failure_log_path,
            failure_log_max_bytes,
        })
    }

    #[cfg(test)]
    pub fn for_tests(db_path: PathBuf) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            db_path,
            max_upload_bytes: 20 * 1024 * 1024,
            max_svg_bytes: 2_097_152,
            max_svg_node_count: 200_000,
            max_raster_bytes: 10 * 1024 * 1024,
            max_decoded_raster_pixels: 40_000_000,
            max_concurrent_conversions: 2,
            max_in_flight_requests: 16,
            singleflight_wait: Duration::from_secs(5),
            failure_log_path: None,
            failure_log_max_bytes: 0,
        }
    }
}

fn parse_u16(name: &str, default: u16) -> u16 {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}
