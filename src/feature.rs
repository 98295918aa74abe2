/// Row to GeoJSON feature conversion
use crate::catalog::LayerDefinition;
use crate::query::SIDE_TAG_COLUMN;

use std::collections::{BTreeMap, HashMap};

use log::{debug, warn};
use serde::Serialize;

/// A scalar attribute value, as stored or as emitted.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Text(value.to_owned())
    }
}

/// One row as returned by the spatial engine.
#[derive(Clone, Debug, PartialEq)]
pub struct RawRow {
    pub id: i64,
    /// GeoJSON text; `None` when the engine could not produce a geometry.
    pub geometry: Option<String>,
    /// Projected columns in query order. SQL NULL is `None`.
    pub columns: Vec<(String, Option<PropertyValue>)>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type")]
pub struct Feature {
    pub id: i64,
    pub geometry: serde_json::Value,
    pub properties: BTreeMap<String, PropertyValue>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(tag = "type")]
pub struct FeatureCollection {
    pub features: Vec<Feature>,
}

/// Converts the rows of one layer query into features. Bad rows are logged
/// and skipped.
pub fn materialize(layer: &LayerDefinition, rows: Vec<RawRow>) -> FeatureCollection {
    let features: Vec<Feature> = rows
        .into_iter()
        .filter_map(|row| to_feature(layer, row))
        .collect();
    debug!("{}: found {} feature(s)", layer.name, features.len());

    FeatureCollection { features }
}

fn to_feature(layer: &LayerDefinition, row: RawRow) -> Option<Feature> {
    let geometry = match row.geometry.as_deref().map(serde_json::from_str::<serde_json::Value>) {
        Some(Ok(geometry)) => geometry,
        Some(Err(e)) => {
            warn!("{}: unparseable geometry in row {}: {e}", layer.name, row.id);
            return None;
        }
        None => {
            warn!("{}: invalid geometry in row {}: {:?}", layer.name, row.id, row.columns);
            return None;
        }
    };

    let mut properties = BTreeMap::new();
    for (name, value) in row.columns {
        if name == SIDE_TAG_COLUMN {
            if let Some(wanted) = layer.other_tags.as_deref() {
                if let Some(PropertyValue::Text(raw)) = value {
                    match parse_side_tags(&raw) {
                        Ok(mut tags) => {
                            for key in wanted {
                                if let Some(tag) = tags.remove(key) {
                                    properties.entry(key.clone()).or_insert(PropertyValue::Text(tag));
                                }
                            }
                        }
                        Err(e) => warn!("{}: failed to parse other_tags of row {}: {e}: {raw}", layer.name, row.id),
                    }
                }
                continue;
            }
        }
        if let Some(value) = value {
            properties.insert(name, value);
        }
    }

    normalize_highway_link(&mut properties);

    Some(Feature {
        id: row.id,
        geometry,
        properties,
    })
}

/// Parses the `"key"=>"value","key2"=>"value2"` encoding of the side tag column.
pub fn parse_side_tags(raw: &str) -> Result<HashMap<String, String>, serde_json::Error> {
    serde_json::from_str(&format!("{{{}}}", raw.replace("\"=>\"", "\":\"")))
}

/// Folds `highway=*_link` into its base class, flagged with `is_link`.
pub fn normalize_highway_link(properties: &mut BTreeMap<String, PropertyValue>) {
    if let Some(PropertyValue::Text(highway)) = properties.get_mut("highway") {
        match highway.strip_suffix("_link") {
            Some(base) if !base.is_empty() => {
                let base_len = base.len();
                highway.truncate(base_len);
                properties.insert("is_link".to_owned(), PropertyValue::Bool(true));
            }
            _ => {}
        }
    }
}
