/// SpatiaLite backend
///
/// Connections are pooled; each layer query checks one out for the duration of
/// the query and the guard hands it back on drop, whether or not the query
/// succeeded.
use crate::error::Result;
use crate::feature::{PropertyValue, RawRow};
use crate::query::{LayerQuery, GEOJSON_ALIAS, ID_ALIAS};
use crate::SpatialEngine;

use std::path::PathBuf;

use async_trait::async_trait;

use futures::TryStreamExt;
use log::{debug, info};
use serde::Deserialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool, TypeInfo, ValueRef};

/// Where the OSM database lives and how to open it.
#[derive(Clone, Deserialize, Debug)]
pub struct SpatialiteConfig {
    pub path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Loadable extension providing the spatial SQL functions.
    #[serde(default = "default_extension")]
    pub extension: String,
}

fn default_max_connections() -> u32 {
    4
}

fn default_extension() -> String {
    "mod_spatialite".to_owned()
}

impl SpatialiteConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SpatialiteConfig {
            path: path.into(),
            max_connections: default_max_connections(),
            extension: default_extension(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SpatialitePool {
    pool: SqlitePool,
}

impl SpatialitePool {
    /// Opens the database read-only with the spatial extension loaded on every
    /// connection.
    pub async fn open(config: &SpatialiteConfig) -> Result<SpatialitePool> {
        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .read_only(true)
            .extension(config.extension.clone());
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;
        info!(
            "Opened {} with up to {} connections",
            config.path.display(),
            config.max_connections
        );

        Ok(SpatialitePool { pool })
    }

    /// Wraps an existing pool. The caller is responsible for loading SpatiaLite.
    pub fn from_pool(pool: SqlitePool) -> SpatialitePool {
        SpatialitePool { pool }
    }
}

#[async_trait]
impl SpatialEngine for SpatialitePool {
    async fn fetch_rows(&self, query: &LayerQuery) -> Result<Vec<RawRow>> {
        let sql = query.to_sql();
        debug!("{} query: {sql}", query.layer);

        let mut conn = self.pool.acquire().await?;
        fetch_raw_rows(&mut conn, &sql, &query.columns).await
    }
}

async fn fetch_raw_rows(conn: &mut SqliteConnection, sql: &str, columns: &[String]) -> Result<Vec<RawRow>> {
    let mut rows = Vec::new();
    let mut stream = sqlx::query(sql).fetch(conn);
    while let Some(row) = stream.try_next().await? {
        rows.push(decode_row(&row, columns)?);
    }

    Ok(rows)
}

fn decode_row(row: &SqliteRow, columns: &[String]) -> Result<RawRow> {
    let id: i64 = row.try_get(ID_ALIAS)?;
    let geometry: Option<String> = row.try_get(GEOJSON_ALIAS)?;
    let columns = columns
        .iter()
        .map(|name| Ok((name.clone(), decode_value(row, name)?)))
        .collect::<Result<_>>()?;

    Ok(RawRow { id, geometry, columns })
}

/// Decodes by the runtime type of the value, since SQLite columns are untyped.
/// Blobs have no JSON representation and are dropped.
fn decode_value(row: &SqliteRow, name: &str) -> Result<Option<PropertyValue>> {
    let raw = row.try_get_raw(name)?;
    if raw.is_null() {
        return Ok(None);
    }

    let value = match raw.type_info().name() {
        "INTEGER" => Some(PropertyValue::Integer(row.try_get(name)?)),
        "REAL" => Some(PropertyValue::Real(row.try_get(name)?)),
        "TEXT" => Some(PropertyValue::Text(row.try_get(name)?)),
        _ => None,
    };

    Ok(value)
}
