//! # OSM Vector Tiles
//!
//! Zoom-tiered GeoJSON vector tiles from a SpatiaLite OpenStreetMap database.
//!
//! ## Current features
//!
//! Given a SpatiaLite database imported from OpenStreetMap with ogr2ogr (the
//! `points`, `lines` and `multipolygons` tables), this crate answers slippy map
//! tile requests such as `/osm-vector-roads/12/1220/1519.geojson` with a
//! gzipped GeoJSON feature collection. Each layer decides per zoom level which
//! features are worth showing, drops polygons too small to see, and has the
//! database clip and simplify geometries to the tile before they are sent.
//! Layer sets bundle several layers into a single response.
//!
//! The layer catalog is compiled into the crate and validated once at startup;
//! see [`catalog::Catalog::builtin`].
//!
//! ## Known Limitations
//!
//! HTTP routing, conditional requests and caching are left to the calling
//! application, which hands us a parsed [`tile::TileRequest`] and sends back
//! the bytes with [`tile::CONTENT_TYPE`] and [`tile::CONTENT_ENCODING`].
//! Geometries are assumed to be stored in EPSG:4326.
//!
//! The engine is behind the [`SpatialEngine`] trait, so a different spatial
//! database can be plugged in as long as it speaks the same SQL dialect.

#![deny(warnings)]

use async_trait::async_trait;

use crate::error::Result;
use crate::feature::RawRow;
use crate::query::LayerQuery;

/// No tiles are generated above this zoom.
pub const MAX_ZOOM: u8 = 16;

/// The spatial database holding the full resolution geometries. Implementations
/// must return rows in a stable order for a given query and data snapshot.
#[async_trait]
pub trait SpatialEngine: Send + Sync {
    /// Runs a layer query. An empty result is not an error.
    async fn fetch_rows(&self, query: &LayerQuery) -> Result<Vec<RawRow>>;
}

pub mod bbox;
pub mod catalog;
pub mod error;
pub mod feature;
pub mod query;
pub mod spatialite;
pub mod tile;

pub use catalog::{Catalog, LayerDefinition};
pub use error::Error;
pub use spatialite::{SpatialiteConfig, SpatialitePool};
pub use tile::{TileAssembler, TileRequest, TileResponse};
