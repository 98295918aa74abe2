/// Tile requests and assembly of layer collections into one response
use crate::bbox::{derive_boxes, BoundingBoxPair};
use crate::catalog::{Catalog, LayerDefinition};
use crate::error::{Error, Result};
use crate::feature::{materialize, FeatureCollection};
use crate::query::build_query;
use crate::{SpatialEngine, MAX_ZOOM};

use std::collections::BTreeMap;

use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, error};
use serde::Serialize;

pub const CONTENT_TYPE: &str = "application/json";
pub const CONTENT_ENCODING: &str = "gzip";

/// A validated request for one tile of a layer or layer set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileRequest {
    name: String,
    zoom: u8,
    x: u32,
    y: u32,
}

impl TileRequest {
    pub fn new(name: impl Into<String>, zoom: u8, x: u32, y: u32) -> Result<TileRequest> {
        if zoom > MAX_ZOOM {
            return Err(Error::ZoomOutOfRange(zoom));
        }
        let tiles = 1u32 << zoom;
        if x >= tiles || y >= tiles {
            return Err(Error::TileOutOfRange { zoom, x, y });
        }

        Ok(TileRequest {
            name: name.into(),
            zoom,
            x,
            y,
        })
    }

    /// Parses a router path of the form `/<layer-or-set>/<zoom>/<x>/<y>.geojson`.
    pub fn from_path(path: &str) -> Result<TileRequest> {
        let invalid = || Error::InvalidTilePath(path.to_owned());

        let parts: Vec<&str> = path
            .strip_prefix('/')
            .and_then(|p| p.strip_suffix(".geojson"))
            .ok_or_else(invalid)?
            .split('/')
            .collect();
        let [name, zoom, x, y] = parts[..] else {
            return Err(invalid());
        };
        if name.is_empty() {
            return Err(invalid());
        }

        TileRequest::new(
            name,
            zoom.parse().map_err(|_| invalid())?,
            x.parse().map_err(|_| invalid())?,
            y.parse().map_err(|_| invalid())?,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    pub fn x(&self) -> u32 {
        self.x
    }

    pub fn y(&self) -> u32 {
        self.y
    }
}

/// One layer's collection, or a layer set's collections keyed by short name.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TileResponse {
    Layer(FeatureCollection),
    Set(BTreeMap<String, FeatureCollection>),
}

impl TileResponse {
    /// Serializes to gzipped JSON.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        serde_json::to_writer(&mut encoder, self)?;
        Ok(encoder.finish()?)
    }
}

pub struct TileAssembler<'a, E> {
    catalog: &'a Catalog,
    engine: E,
}

impl<'a, E: SpatialEngine> TileAssembler<'a, E> {
    pub fn new(catalog: &'a Catalog, engine: E) -> Self {
        TileAssembler { catalog, engine }
    }

    /// Builds the response for a tile. `None` means the layer has no content
    /// at this zoom.
    ///
    /// Members of a layer set are fetched independently: a member that fails
    /// is logged and left out instead of failing the whole tile.
    pub async fn assemble(&self, request: &TileRequest) -> Result<Option<TileResponse>> {
        debug!(
            "{} tile ({}, {}) at zoom {}",
            request.name, request.x, request.y, request.zoom
        );
        // Shared by every layer of a set
        let boxes = derive_boxes(request.x, request.y, request.zoom);

        if let Some(members) = self.catalog.layer_set(&request.name) {
            let mut collections = BTreeMap::new();
            for name in members {
                let layer = self
                    .catalog
                    .layer(name)
                    .ok_or_else(|| Error::UnknownLayer(name.clone()))?;
                match self.layer_tile(layer, request.zoom, &boxes).await {
                    Ok(Some(collection)) => {
                        collections.insert(self.catalog.short_name(name).to_owned(), collection);
                    }
                    Ok(None) => {}
                    Err(e) => error!("Leaving {name} out of {} tile: {e}", request.name),
                }
            }
            return Ok(Some(TileResponse::Set(collections)));
        }

        let layer = self
            .catalog
            .layer(&request.name)
            .ok_or_else(|| Error::UnknownLayer(request.name.clone()))?;
        Ok(self
            .layer_tile(layer, request.zoom, &boxes)
            .await?
            .map(TileResponse::Layer))
    }

    /// Assembles and encodes a tile, ready to be sent with [`CONTENT_TYPE`]
    /// and [`CONTENT_ENCODING`].
    pub async fn render(&self, request: &TileRequest) -> Result<Option<Vec<u8>>> {
        self.assemble(request)
            .await?
            .map(|response| response.encode())
            .transpose()
    }

    async fn layer_tile(
        &self,
        layer: &LayerDefinition,
        zoom: u8,
        boxes: &BoundingBoxPair,
    ) -> Result<Option<FeatureCollection>> {
        let query = match build_query(layer, zoom, boxes) {
            Some(query) => query,
            None => return Ok(None),
        };
        let rows = self.engine.fetch_rows(&query).await?;

        Ok(Some(materialize(layer, rows)))
    }
}
