/// Zoom-tiered query construction
///
/// Turns a layer definition and a tile into a SpatiaLite query. Only validated
/// identifiers from the catalog, catalog predicates and numbers computed here
/// ever end up in the query text.
use crate::bbox::{BoundingBox, BoundingBoxPair};
use crate::catalog::LayerDefinition;

use std::fmt;

use log::debug;

/// Placeholder in catalog predicates for the minimum polygon area.
pub const SPECK_PLACEHOLDER: &str = "{a_speck}";

/// Semi-structured `"key"=>"value"` column written by ogr2ogr.
pub const SIDE_TAG_COLUMN: &str = "other_tags";

pub const ID_ALIAS: &str = "__id__";
pub const GEOMETRY_ALIAS: &str = "__geometry__";
pub const GEOJSON_ALIAS: &str = "__geojson__";

/// Tiles are 256 pixels wide.
const TILE_PIXELS: f64 = 256.0;

/// Width of one pixel in degrees of longitude at `zoom`.
pub fn pixel_size_deg(zoom: u8) -> f64 {
    360.0 / 2f64.powi(i32::from(zoom)) / TILE_PIXELS
}

/// Area of ten square pixels at `zoom`. Polygons smaller than this are too
/// small to see.
pub fn speck_area(zoom: u8) -> f64 {
    let pixel = pixel_size_deg(zoom);
    pixel * pixel * 10.0
}

/// Picks `items[index]`, or the last item once `index` runs past the end.
pub fn clamp_to_last<T>(items: &[T], index: usize) -> Option<&T> {
    items.get(index.min(items.len().checked_sub(1)?))
}

/// Geometry expression evaluated by the engine for every selected row.
#[derive(Clone, Debug, PartialEq)]
pub enum GeometryExpr {
    /// The stored geometry.
    Column,
    Intersection(Box<GeometryExpr>, BoundingBox),
    SimplifyPreserveTopology(Box<GeometryExpr>, f64),
}

impl fmt::Display for GeometryExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeometryExpr::Column => write!(f, "q.{GEOMETRY_ALIAS}"),
            GeometryExpr::Intersection(inner, bbox) => write!(f, "Intersection({inner},{bbox})"),
            GeometryExpr::SimplifyPreserveTopology(inner, tolerance) => {
                write!(f, "SimplifyPreserveTopology({inner},{tolerance})")
            }
        }
    }
}

/// Coarse filter through the SpatiaLite R*Tree before any exact geometry test.
#[derive(Clone, Debug, PartialEq)]
pub struct SpatialPrefilter {
    pub table: String,
    pub bbox: BoundingBox,
}

impl fmt::Display for SpatialPrefilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ROWID IN (SELECT ROWID FROM SpatialIndex WHERE f_table_name = '{}' AND search_frame = {})",
            self.table, self.bbox
        )
    }
}

/// Everything needed to fetch one layer of one tile.
#[derive(Clone, Debug, PartialEq)]
pub struct LayerQuery {
    pub layer: String,
    pub table: String,
    /// Catalog predicate for this zoom, with the speck area filled in.
    pub predicate: String,
    pub prefilter: SpatialPrefilter,
    pub geometry: GeometryExpr,
    /// Attribute columns, in catalog order, then the side tag column if any.
    pub columns: Vec<String>,
    /// Box for the exact intersects test.
    pub bbox: BoundingBox,
}

impl LayerQuery {
    pub fn has_side_tags(&self) -> bool {
        self.columns.iter().any(|c| c == SIDE_TAG_COLUMN)
    }

    pub fn to_sql(&self) -> String {
        let inner_columns: String = self.columns.iter().map(|c| format!(", {c}")).collect();
        let outer_columns: String = self.columns.iter().map(|c| format!(", q.{c} AS {c}")).collect();

        format!(
            "SELECT q.{ID_ALIAS} AS {ID_ALIAS}, AsGeoJSON({geometry}) AS {GEOJSON_ALIAS}{outer_columns} \
             FROM (SELECT ogc_fid AS {ID_ALIAS}, Geometry AS {GEOMETRY_ALIAS}{inner_columns} \
             FROM {table} WHERE ({predicate}) AND {prefilter}) AS q \
             WHERE Intersects({bbox}, q.{GEOMETRY_ALIAS})",
            geometry = self.geometry,
            table = self.table,
            predicate = self.predicate,
            prefilter = self.prefilter,
            bbox = self.bbox,
        )
    }
}

/// Builds the query for `layer` at `zoom`, or `None` when the layer has no
/// content below its minimum zoom.
pub fn build_query(layer: &LayerDefinition, zoom: u8, boxes: &BoundingBoxPair) -> Option<LayerQuery> {
    let tier = zoom.checked_sub(layer.zoom_min)?;
    let predicate = clamp_to_last(&layer.where_expressions, usize::from(tier))?
        .replace(SPECK_PLACEHOLDER, &speck_area(zoom).to_string());
    debug!("{} z{zoom} where: {predicate}", layer.name);

    let bbox = if layer.pad_bbox { boxes.padded } else { boxes.tight };

    let mut geometry = GeometryExpr::Column;
    if layer.clip {
        geometry = GeometryExpr::Intersection(Box::new(geometry), boxes.tight);
    }
    if let Some(factor) = layer.simplification {
        if zoom < layer.simplify_until {
            geometry = GeometryExpr::SimplifyPreserveTopology(Box::new(geometry), pixel_size_deg(zoom) * factor);
        }
    }

    let mut columns = layer.columns.clone();
    if layer.other_tags.is_some() {
        columns.push(SIDE_TAG_COLUMN.to_owned());
    }

    Some(LayerQuery {
        layer: layer.name.clone(),
        table: layer.table.clone(),
        predicate,
        prefilter: SpatialPrefilter {
            table: layer.table.clone(),
            bbox,
        },
        geometry,
        columns,
        bbox,
    })
}

#[cfg(test)]
mod tests {
    use assert_approx_eq::assert_approx_eq;

    use super::*;
    use crate::bbox::derive_boxes;
    use crate::catalog::Catalog;

    fn layer(name: &str) -> &'static LayerDefinition {
        Catalog::builtin().unwrap().layer(name).unwrap()
    }

    #[test]
    fn test_clamp_to_last() {
        let items = [1, 2, 3];
        assert_eq!(Some(&1), clamp_to_last(&items, 0));
        assert_eq!(Some(&3), clamp_to_last(&items, 2));
        assert_eq!(Some(&3), clamp_to_last(&items, 3));
        assert_eq!(Some(&3), clamp_to_last(&items, 100));
        assert_eq!(None, clamp_to_last::<i32>(&[], 0));
    }

    #[test]
    fn test_speck_area() {
        for zoom in 0..=16u8 {
            let pixel = 360.0 / 2f64.powi(i32::from(zoom)) / 256.0;
            assert_eq!(pixel * pixel * 10.0, speck_area(zoom));
            if zoom > 0 {
                assert!(speck_area(zoom) < speck_area(zoom - 1));
            }
        }
    }

    #[test]
    fn test_below_zoom_min() {
        let roads = layer("osm-vector-roads");
        for zoom in 0..roads.zoom_min {
            assert_eq!(None, build_query(roads, zoom, &derive_boxes(0, 0, zoom)));
        }
        assert!(build_query(roads, roads.zoom_min, &derive_boxes(0, 0, roads.zoom_min)).is_some());
    }

    #[test]
    fn test_predicate_clamps_to_last() {
        let roads = layer("osm-vector-roads");
        let last = roads.zoom_min + roads.where_expressions.len() as u8 - 1;
        assert_eq!(14, last);

        let at_last = build_query(roads, last, &derive_boxes(0, 0, last)).unwrap();
        let past_end = build_query(roads, last + 1, &derive_boxes(0, 0, last + 1)).unwrap();
        let far_past = build_query(roads, last + 5, &derive_boxes(0, 0, last + 5)).unwrap();

        let expected = roads.where_expressions.last().unwrap();
        assert_eq!(expected, &at_last.predicate);
        assert_eq!(at_last.predicate, past_end.predicate);
        assert_eq!(at_last.predicate, far_past.predicate);

        let before_last = build_query(roads, last - 1, &derive_boxes(0, 0, last - 1)).unwrap();
        assert_ne!(at_last.predicate, before_last.predicate);
    }

    #[test]
    fn test_speck_substitution() {
        let water = layer("osm-vector-water");
        let query = build_query(water, 8, &derive_boxes(75, 95, 8)).unwrap();
        assert_eq!(
            format!("natural = 'water' AND Area(Geometry) > {}", speck_area(8)),
            query.predicate
        );
        assert!(!query.to_sql().contains(SPECK_PLACEHOLDER));
    }

    #[test]
    fn test_roads_zoom_6() {
        let roads = layer("osm-vector-roads");
        let boxes = derive_boxes(18, 23, 6);
        let query = build_query(roads, 6, &boxes).unwrap();

        assert_eq!("highway = 'motorway'", query.predicate);
        assert_eq!(boxes.padded, query.bbox);
        assert_eq!(boxes.padded, query.prefilter.bbox);
        assert_eq!("lines", query.prefilter.table);

        match &query.geometry {
            GeometryExpr::SimplifyPreserveTopology(inner, tolerance) => {
                assert_approx_eq!(360.0 / 64.0 / 256.0 * 1.0, *tolerance);
                assert_eq!(
                    &GeometryExpr::Intersection(Box::new(GeometryExpr::Column), boxes.tight),
                    inner.as_ref()
                );
            }
            other => panic!("unexpected geometry {other:?}"),
        }

        assert_eq!(vec!["highway", "z_order", "railway", "aeroway", "other_tags"], query.columns);
        assert!(query.has_side_tags());
    }

    #[test]
    fn test_simplification_disabled() {
        let places = layer("osm-vector-places");
        let boxes = derive_boxes(37, 47, 7);
        let query = build_query(places, 7, &boxes).unwrap();

        assert_eq!(GeometryExpr::Column, query.geometry);
        assert_eq!(boxes.tight, query.bbox);
        assert_eq!("AsGeoJSON(q.__geometry__)", format!("AsGeoJSON({})", query.geometry));
    }

    #[test]
    fn test_simplify_until() {
        let roads = layer("osm-vector-roads");
        let boxes = derive_boxes(0, 0, 16);
        let query = build_query(roads, 16, &boxes).unwrap();
        assert_eq!(
            GeometryExpr::Intersection(Box::new(GeometryExpr::Column), boxes.tight),
            query.geometry
        );

        // Labels keep simplifying at every zoom, and are never clipped
        let labels = layer("osm-vector-road-labels");
        let query = build_query(labels, 16, &boxes).unwrap();
        match query.geometry {
            GeometryExpr::SimplifyPreserveTopology(inner, tolerance) => {
                assert_eq!(GeometryExpr::Column, *inner);
                assert_approx_eq!(pixel_size_deg(16) * 5.0, tolerance);
            }
            other => panic!("unexpected geometry {other:?}"),
        }
        assert_eq!(vec!["name", "highway", "other_tags"], query.columns);
    }

    #[test]
    fn test_generate_sql() {
        let roads = layer("osm-vector-roads");
        let boxes = derive_boxes(18, 23, 6);
        let query = build_query(roads, 6, &boxes).unwrap();
        let sql = query.to_sql();

        assert!(sql.starts_with("SELECT q.__id__ AS __id__, AsGeoJSON(SimplifyPreserveTopology(Intersection(q.__geometry__,BuildMBR("));
        assert!(sql.contains(", q.highway AS highway, q.z_order AS z_order, q.railway AS railway, q.aeroway AS aeroway, q.other_tags AS other_tags FROM ("));
        assert!(sql.contains("SELECT ogc_fid AS __id__, Geometry AS __geometry__, highway, z_order, railway, aeroway, other_tags FROM lines"));
        assert!(sql.contains("WHERE (highway = 'motorway') AND ROWID IN (SELECT ROWID FROM SpatialIndex WHERE f_table_name = 'lines' AND search_frame = "));
        assert!(sql.ends_with(&format!("WHERE Intersects({}, q.__geometry__)", boxes.padded)));
    }
}
