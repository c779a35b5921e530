use crate::config::Config;
use crate::format::AssetFormat;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetCategory {
    Logo,
    Color,
    Font,
}

impl AssetCategory {
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "color" => Self::Color,
            "font" => Self::Font,
            _ => Self::Logo,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Logo => "logo",
            Self::Color => "color",
            Self::Font => "font",
        }
    }
}

/// Source bytes for one visual rendition of an asset. `version` increments on
/// every byte replacement and tags derivative rows generated from it.
#[derive(Debug, Clone)]
pub struct VariantData {
    pub bytes: Vec<u8>,
    pub format: String,
    pub mime: String,
    pub version: i64,
}

#[derive(Debug, Clone)]
pub struct SourceAsset {
    pub id: String,
    pub client_id: String,
    pub category: AssetCategory,
    pub light: VariantData,
    pub dark: Option<VariantData>,
}

#[derive(Debug, Clone)]
pub struct DerivativeRow {
    pub asset_id: String,
    pub format: String,
    pub is_dark: bool,
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub source_version: i64,
    pub fidelity: Option<String>,
}

impl Database {
    pub async fn new(config: &Config) -> Result<Self> {
        if let Some(parent) = config.db_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create db directory {:?}", parent))?;
            }
        }
        let db_url = format!("sqlite://{}?mode=rwc", config.db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await
            .context("connect to sqlite")?;
        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    async fn init_schema(&self) -> Result<()> {
        let schema = r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS source_assets (
          id TEXT PRIMARY KEY,
          client_id TEXT NOT NULL DEFAULT '',
          category TEXT NOT NULL DEFAULT 'logo',
          light_bytes BLOB NOT NULL,
          light_format TEXT NOT NULL,
          light_mime TEXT NOT NULL,
          light_version INTEGER NOT NULL DEFAULT 1,
          dark_bytes BLOB,
          dark_format TEXT,
          dark_mime TEXT,
          dark_version INTEGER NOT NULL DEFAULT 0,
          created_at INTEGER,
          updated_at INTEGER
        );
        CREATE TABLE IF NOT EXISTS derivatives (
          id INTEGER PRIMARY KEY,
          asset_id TEXT NOT NULL,
          format TEXT NOT NULL,
          is_dark INTEGER NOT NULL DEFAULT 0,
          bytes BLOB NOT NULL,
          mime_type TEXT NOT NULL,
          source_version INTEGER NOT NULL,
          fidelity TEXT,
          created_at INTEGER,
          UNIQUE(asset_id, format, is_dark)
        );
        CREATE INDEX IF NOT EXISTS idx_derivatives_asset ON derivatives(asset_id);
        "#;
        sqlx::query(schema).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn get_source_asset(&self, id: &str) -> Result<Option<SourceAsset>> {
        let row = sqlx::query(
            r#"
            SELECT id, client_id, category,
                   light_bytes, light_format, light_mime, light_version,
                   dark_bytes, dark_format, dark_mime, dark_version
            FROM source_assets
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| {
            let dark_bytes: Option<Vec<u8>> = row.get("dark_bytes");
            let dark = dark_bytes.map(|bytes| VariantData {
                bytes,
                format: row
                    .get::<Option<String>, _>("dark_format")
                    .unwrap_or_default(),
                mime: row.get::<Option<String>, _>("dark_mime").unwrap_or_default(),
                version: row.get("dark_version"),
            });
            SourceAsset {
                id: row.get("id"),
                client_id: row.get("client_id"),
                category: AssetCategory::parse(&row.get::<String, _>("category")),
                light: VariantData {
                    bytes: row.get("light_bytes"),
                    format: row.get("light_format"),
                    mime: row.get("light_mime"),
                    version: row.get("light_version"),
                },
                dark,
            }
        }))
    }

    /// Replaces the light variant's source bytes, creating the asset row on
    /// first upload. Returns the new variant version.
    pub async fn set_light_variant(
        &self,
        id: &str,
        client_id: &str,
        bytes: &[u8],
        format: &str,
        mime: &str,
    ) -> Result<i64> {
        let now = now_epoch();
        sqlx::query(
            r#"
            INSERT INTO source_assets (
              id, client_id, category, light_bytes, light_format, light_mime,
              light_version, created_at, updated_at
            )
            VALUES (?1, ?2, 'logo', ?3, ?4, ?5, 1, ?6, ?6)
            ON CONFLICT(id) DO UPDATE SET
              light_bytes = excluded.light_bytes,
              light_format = excluded.light_format,
              light_mime = excluded.light_mime,
              light_version = source_assets.light_version + 1,
              updated_at = excluded.updated_at
            "#,
        )
        .bind(id)
        .bind(client_id)
        .bind(bytes)
        .bind(format)
        .bind(mime)
        .bind(now)
        .execute(&self.pool)
        .await?;
        self.variant_version(id, false)
            .await?
            .context("light variant missing after upsert")
    }

    /// Replaces the dark variant's source bytes. Returns `None` when the
    /// asset does not exist; a dark variant can only hang off an uploaded
    /// light one.
    pub async fn set_dark_variant(
        &self,
        id: &str,
        bytes: &[u8],
        format: &str,
        mime: &str,
    ) -> Result<Option<i64>> {
        let now = now_epoch();
        let result = sqlx::query(
            r#"
            UPDATE source_assets SET
              dark_bytes = ?2,
              dark_format = ?3,
              dark_mime = ?4,
              dark_version = dark_version + 1,
              updated_at = ?5
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(bytes)
        .bind(format)
        .bind(mime)
        .bind(now)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.variant_version(id, true).await
    }

    pub async fn clear_dark_variant(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE source_assets SET
              dark_bytes = NULL, dark_format = NULL, dark_mime = NULL,
              dark_version = dark_version + 1,
              updated_at = ?2
            WHERE id = ?1 AND dark_bytes IS NOT NULL
            "#,
        )
        .bind(id)
        .bind(now_epoch())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_source_asset(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM source_assets WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Live version counter for one variant; `None` when the asset is absent
    /// or the dark variant was never uploaded.
    pub async fn variant_version(&self, id: &str, is_dark: bool) -> Result<Option<i64>> {
        let row = sqlx::query(
            r#"
            SELECT light_version, dark_version, dark_bytes IS NOT NULL AS has_dark
            FROM source_assets WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(|row| {
            if is_dark {
                if row.get::<i64, _>("has_dark") == 1 {
                    Some(row.get::<i64, _>("dark_version"))
                } else {
                    None
                }
            } else {
                Some(row.get::<i64, _>("light_version"))
            }
        }))
    }

    pub async fn get_derivative(
        &self,
        asset_id: &str,
        format: AssetFormat,
        is_dark: bool,
    ) -> Result<Option<DerivativeRow>> {
        let row = sqlx::query(
            r#"
            SELECT asset_id, format, is_dark, bytes, mime_type, source_version, fidelity
            FROM derivatives
            WHERE asset_id = ?1 AND format = ?2 AND is_dark = ?3
            "#,
        )
        .bind(asset_id)
        .bind(format.extension())
        .bind(if is_dark { 1 } else { 0 })
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| DerivativeRow {
            asset_id: row.get("asset_id"),
            format: row.get("format"),
            is_dark: row.get::<i64, _>("is_dark") == 1,
            bytes: row.get("bytes"),
            mime_type: row.get("mime_type"),
            source_version: row.get("source_version"),
            fidelity: row.get("fidelity"),
        }))
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn upsert_derivative(
        &self,
        asset_id: &str,
        format: AssetFormat,
        is_dark: bool,
        bytes: &[u8],
        mime_type: &str,
        source_version: i64,
        fidelity: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO derivatives (
              asset_id, format, is_dark, bytes, mime_type, source_version, fidelity, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(asset_id, format, is_dark) DO UPDATE SET
              bytes = excluded.bytes,
              mime_type = excluded.mime_type,
              source_version = excluded.source_version,
              fidelity = excluded.fidelity,
              created_at = excluded.created_at
            "#,
        )
        .bind(asset_id)
        .bind(format.extension())
        .bind(if is_dark { 1 } else { 0 })
        .bind(bytes)
        .bind(mime_type)
        .bind(source_version)
        .bind(fidelity)
        .bind(now_epoch())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_derivative(
        &self,
        asset_id: &str,
        format: AssetFormat,
        is_dark: bool,
    ) -> Result<()> {
        sqlx::query(
            "DELETE FROM derivatives WHERE asset_id = ?1 AND format = ?2 AND is_dark = ?3",
        )
        .bind(asset_id)
        .bind(format.extension())
        .bind(if is_dark { 1 } else { 0 })
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_variant_derivatives(&self, asset_id: &str, is_dark: bool) -> Result<u64> {
        let result = sqlx::query("DELETE FROM derivatives WHERE asset_id = ?1 AND is_dark = ?2")
            .bind(asset_id)
            .bind(if is_dark { 1 } else { 0 })
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_asset_derivatives(&self, asset_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM derivatives WHERE asset_id = ?1")
            .bind(asset_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Index-only read of which derivatives exist for an asset.
    pub async fn list_derivative_formats(&self, asset_id: &str) -> Result<Vec<(String, bool)>> {
        let rows = sqlx::query(
            r#"
            SELECT format, is_dark FROM derivatives
            WHERE asset_id = ?1
            ORDER BY is_dark, format
            "#,
        )
        .bind(asset_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get("format"), row.get::<i64, _>("is_dark") == 1))
            .collect())
    }
}

fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs() as i64)
        .unwrap_or(0)
}
