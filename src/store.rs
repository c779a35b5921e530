use crate::db::Database;
use crate::format::AssetFormat;
use anyhow::Result;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::warn;

/// A cached conversion result. `fidelity` carries the degradation reason for
/// best-effort outputs; `None` means a faithful conversion.
#[derive(Debug, Clone)]
pub struct Derivative {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub fidelity: Option<String>,
}

/// Persistent `(asset, format, variant)` → blob map over the database, a pure
/// memoization layer for the conversion pipelines. Every read is validated
/// against the requested key and the live variant version, so a stale or
/// cross-keyed row can never be served.
#[derive(Clone)]
pub struct DerivativeStore {
    db: Database,
}

impl DerivativeStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn get(
        &self,
        asset_id: &str,
        format: AssetFormat,
        is_dark: bool,
        current_version: i64,
    ) -> Result<Option<Derivative>> {
        let Some(row) = self.db.get_derivative(asset_id, format, is_dark).await? else {
            return Ok(None);
        };
        if row.asset_id != asset_id
            || row.format != format.extension()
            || row.is_dark != is_dark
        {
            warn!(
                asset_id = %asset_id,
                row_asset_id = %row.asset_id,
                "derivative row key mismatch, ignoring"
            );
            return Ok(None);
        }
        if row.source_version != current_version {
            // Generated against replaced source bytes; drop it so the next
            // miss regenerates from the live variant.
            self.db.delete_derivative(asset_id, format, is_dark).await?;
            return Ok(None);
        }
        Ok(Some(Derivative {
            bytes: row.bytes,
            mime_type: row.mime_type,
            fidelity: row.fidelity,
        }))
    }

    /// Upserts one derivative. Returns `false` without writing when
    /// `source_version` predates the variant's live version — an in-flight
    /// write from before an invalidation must never resurrect stale bytes.
    #[allow(clippy::too_many_arguments)]
    pub async fn put(
        &self,
        asset_id: &str,
        format: AssetFormat,
        is_dark: bool,
        bytes: &[u8],
        mime_type: &str,
        source_version: i64,
        fidelity: Option<&str>,
    ) -> Result<bool> {
        let live = self.db.variant_version(asset_id, is_dark).await?;
        match live {
            Some(version) if version == source_version => {}
            Some(version) => {
                warn!(
                    asset_id = %asset_id,
                    format = format.extension(),
                    stale = source_version,
                    live = version,
                    "rejecting stale derivative write"
                );
                return Ok(false);
            }
            None => {
                warn!(
                    asset_id = %asset_id,
                    format = format.extension(),
                    "rejecting derivative write for missing variant"
                );
                return Ok(false);
            }
        }
        self.db
            .upsert_derivative(
                asset_id,
                format,
                is_dark,
                bytes,
                mime_type,
                source_version,
                fidelity,
            )
            .await?;
        Ok(true)
    }

    pub async fn invalidate(&self, asset_id: &str, is_dark: bool) -> Result<u64> {
        self.db.delete_variant_derivatives(asset_id, is_dark).await
    }

    pub async fn invalidate_all(&self, asset_id: &str) -> Result<u64> {
        self.db.delete_asset_derivatives(asset_id).await
    }

    pub async fn list_formats(&self, asset_id: &str) -> Result<Vec<(AssetFormat, bool)>> {
        let rows = self.db.list_derivative_formats(asset_id).await?;
        Ok(rows
            .into_iter()
            .filter_map(|(format, is_dark)| {
                AssetFormat::parse(&format).map(|format| (format, is_dark))
            })
            .collect())
    }
}

pub fn convert_key(asset_id: &str, format: AssetFormat, is_dark: bool) -> String {
    format!(
        "{asset_id}:{}:{}",
        format.extension(),
        if is_dark { "dark" } else { "light" }
    )
}

/// Coalesces concurrent cache misses for one derivative key into a single
/// generation: the first caller becomes the leader, later callers wait for
/// its completion and re-read the cache.
#[derive(Clone)]
pub struct ConvertSingleflight {
    inner: Arc<DashMap<String, Arc<Notify>>>,
}

impl ConvertSingleflight {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
        }
    }

    pub async fn acquire(&self, key: &str) -> SingleflightPermit {
        match self.inner.entry(key.to_string()) {
            Entry::Occupied(entry) => SingleflightPermit {
                key: key.to_string(),
                notify: entry.get().clone(),
                is_leader: false,
                inner: self.inner.clone(),
            },
            Entry::Vacant(entry) => {
                let notify = Arc::new(Notify::new());
                entry.insert(notify.clone());
                SingleflightPermit {
                    key: key.to_string(),
                    notify,
                    is_leader: true,
                    inner: self.inner.clone(),
                }
            }
        }
    }
}

impl Default for ConvertSingleflight {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SingleflightPermit {
    key: String,
    notify: Arc<Notify>,
    is_leader: bool,
    inner: Arc<DashMap<String, Arc<Notify>>>,
}

impl SingleflightPermit {
    pub fn is_leader(&self) -> bool {
        self.is_leader
    }

    /// Waits until the leader finishes or the timeout passes; returns whether
    /// the leader signalled completion.
    pub async fn wait_result(self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.notify.notified())
            .await
            .is_ok()
    }
}

impl Drop for SingleflightPermit {
    fn drop(&mut self) {
        if !self.is_leader {
            return;
        }
        if let Some((_, notify)) = self.inner.remove(&self.key) {
            notify.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::tempdir;

    async fn test_store(dir: &tempfile::TempDir) -> (Database, DerivativeStore) {
        let config = Config::for_tests(dir.path().join("brandmark.db"));
        let db = Database::new(&config).await.unwrap();
        (db.clone(), DerivativeStore::new(db))
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let (db, store) = test_store(&dir).await;
        let version = db
            .set_light_variant("a1", "client", b"src", "png", "image/png")
            .await
            .unwrap();
        let written = store
            .put("a1", AssetFormat::Jpg, false, b"jpeg", "image/jpeg", version, None)
            .await
            .unwrap();
        assert!(written);
        let derivative = store
            .get("a1", AssetFormat::Jpg, false, version)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(derivative.bytes, b"jpeg");
        assert_eq!(derivative.mime_type, "image/jpeg");
    }

    #[tokio::test]
    async fn stale_write_is_rejected() {
        let dir = tempdir().unwrap();
        let (db, store) = test_store(&dir).await;
        db.set_light_variant("a1", "client", b"v1", "png", "image/png")
            .await
            .unwrap();
        let new_version = db
            .set_light_variant("a1", "client", b"v2", "png", "image/png")
            .await
            .unwrap();
        // A slow conversion tagged with the old version arrives after the
        // update.
        let written = store
            .put("a1", AssetFormat::Png, false, b"stale", "image/png", 1, None)
            .await
            .unwrap();
        assert!(!written);
        assert!(store
            .get("a1", AssetFormat::Png, false, new_version)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn version_mismatch_reads_as_miss_and_deletes() {
        let dir = tempdir().unwrap();
        let (db, store) = test_store(&dir).await;
        let version = db
            .set_light_variant("a1", "client", b"v1", "png", "image/png")
            .await
            .unwrap();
        store
            .put("a1", AssetFormat::Png, false, b"png", "image/png", version, None)
            .await
            .unwrap();
        // Simulates an update that bumped the live version past the row.
        assert!(store
            .get("a1", AssetFormat::Png, false, version + 1)
            .await
            .unwrap()
            .is_none());
        // The stale row was dropped outright, not just hidden.
        assert!(db
            .get_derivative("a1", AssetFormat::Png, false)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn list_formats_reports_both_variants() {
        let dir = tempdir().unwrap();
        let (db, store) = test_store(&dir).await;
        let version = db
            .set_light_variant("a1", "client", b"src", "png", "image/png")
            .await
            .unwrap();
        store
            .put("a1", AssetFormat::Jpg, false, b"l", "image/jpeg", version, None)
            .await
            .unwrap();
        db.set_dark_variant("a1", b"darksrc", "png", "image/png")
            .await
            .unwrap();
        store
            .put("a1", AssetFormat::Pdf, true, b"d", "application/pdf", 1, None)
            .await
            .unwrap();
        let formats = store.list_formats("a1").await.unwrap();
        assert!(formats.contains(&(AssetFormat::Jpg, false)));
        assert!(formats.contains(&(AssetFormat::Pdf, true)));
    }

    #[tokio::test]
    async fn singleflight_elects_one_leader() {
        let singleflight = ConvertSingleflight::new();
        let key = convert_key("a1", AssetFormat::Png, false);
        let leader = singleflight.acquire(&key).await;
        assert!(leader.is_leader());
        let waiter = singleflight.acquire(&key).await;
        assert!(!waiter.is_leader());

        let waited = tokio::spawn(waiter.wait_result(Duration::from_secs(5)));
        // Give the waiter a chance to register before the leader signals.
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(leader);
        assert!(waited.await.unwrap());

        // Key is free again after the leader dropped.
        let next = singleflight.acquire(&key).await;
        assert!(next.is_leader());
    }
}
