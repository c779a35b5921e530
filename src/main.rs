mod config;
mod containers;
mod db;
mod error;
mod failure_log;
mod format;
mod http;
mod raster;
mod resolve;
mod state;
mod store;
mod variants;
mod vector;

use crate::config::Config;
use crate::db::Database;
use crate::failure_log::FailureLog;
use crate::state::AppState;
use axum::body::HttpBody;
use axum::http::{header, Response};
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::compression::{
    predicate::{DefaultPredicate, Predicate},
    CompressionLayer,
};
use tower_http::trace::{DefaultMakeSpan, TraceLayer};
use tracing::info;

/// Derivative bodies (images, PDF, PostScript) are already compressed or
/// binary; compressing them again wastes CPU for nothing.
#[derive(Clone)]
struct NoBinaryCompression {
    inner: DefaultPredicate,
}

impl NoBinaryCompression {
    fn new() -> Self {
        Self {
            inner: DefaultPredicate::new(),
        }
    }
}

impl Predicate for NoBinaryCompression {
    fn should_compress<B>(&self, response: &Response<B>) -> bool
    where
        B: HttpBody,
    {
        if let Some(content_type) = response.headers().get(header::CONTENT_TYPE) {
            if let Ok(content_type) = content_type.to_str() {
                if content_type.starts_with("image/")
                    || content_type == "application/pdf"
                    || content_type == "application/postscript"
                    || content_type == "application/illustrator"
                {
                    return false;
                }
            }
        }
        self.inner.should_compress(response)
    }
}

fn build_app(state: Arc<AppState>) -> Router {
    let max_in_flight = if state.config.max_in_flight_requests == 0 {
        usize::MAX
    } else {
        state.config.max_in_flight_requests
    };
    http::router(state)
        .layer(CompressionLayer::new().compress_when(NoBinaryCompression::new()))
        .layer(
            TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::new().include_headers(false)),
        )
        .layer(ConcurrencyLimitLayer::new(max_in_flight))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    info!(
        db_path = %config.db_path.display(),
        max_concurrent_conversions = config.max_concurrent_conversions,
        max_upload_bytes = config.max_upload_bytes,
        failure_log_enabled = config.failure_log_path.is_some(),
        "startup config summary"
    );
    let db = Database::new(&config).await?;
    let failure_log = config
        .failure_log_path
        .clone()
        .and_then(|path| FailureLog::new(path, config.failure_log_max_bytes));
    let state = Arc::new(AppState::new(config, db, failure_log));
    let app = build_app(state.clone());

    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(address = %addr, "brandmark listening");
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::test_state;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tempfile::tempdir;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_endpoint_answers_through_the_full_stack() {
        let dir = tempdir().unwrap();
        let state = Arc::new(test_state(&dir).await);
        let app = build_app(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
