/// Layer catalog
///
/// The catalog is a YAML document compiled into the crate. It is parsed and
/// validated once, and everything downstream only ever borrows it.
use crate::error::{Error, Result};
use crate::MAX_ZOOM;

use std::collections::BTreeMap;

use log::info;
use once_cell::sync::OnceCell;
use serde::Deserialize;

const BUILTIN_CATALOG: &str = include_str!("layers.yml");

static BUILTIN: OnceCell<Catalog> = OnceCell::new();

/// All layers and layer sets that can be requested.
#[derive(Clone, Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct Catalog {
    /// Prefix stripped from layer names when keying layer set output.
    #[serde(default)]
    pub short_name_prefix: String,
    #[serde(default)]
    pub layer_sets: BTreeMap<String, Vec<String>>,
    pub layers: BTreeMap<String, LayerDefinition>,
}

/// One named vector layer, backed by a single table.
#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LayerDefinition {
    /// Registry key, filled in after parsing.
    #[serde(skip)]
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    /// Keys copied out of the `other_tags` side column. When absent, the side
    /// column is not queried at all.
    #[serde(default)]
    pub other_tags: Option<Vec<String>>,
    #[serde(default)]
    pub zoom_min: u8,
    pub where_expressions: Vec<String>,
    /// Tolerance in pixels. An explicit `~` disables simplification.
    #[serde(default = "default_simplification")]
    pub simplification: Option<f64>,
    #[serde(default = "default_simplify_until")]
    pub simplify_until: u8,
    #[serde(default = "default_true")]
    pub clip: bool,
    #[serde(default = "default_true")]
    pub pad_bbox: bool,
}

fn default_simplification() -> Option<f64> {
    Some(1.0)
}

fn default_simplify_until() -> u8 {
    16
}

fn default_true() -> bool {
    true
}

impl Catalog {
    /// Parses and validates a catalog from YAML.
    pub fn from_yaml(data: &str) -> Result<Catalog> {
        let mut catalog: Catalog = serde_yaml::from_str(data)?;

        for (name, layer) in catalog.layers.iter_mut() {
            layer.name = name.clone();
            layer.validate()?;
        }

        for (set_name, members) in &catalog.layer_sets {
            if catalog.layers.contains_key(set_name) {
                return Err(invalid(set_name, "name is used by both a layer and a layer set"));
            }
            if let Some(missing) = members.iter().find(|m| !catalog.layers.contains_key(*m)) {
                return Err(invalid(set_name, format!("unknown member layer {missing}")));
            }
        }

        Ok(catalog)
    }

    /// The compiled-in OpenStreetMap catalog, parsed on first use.
    pub fn builtin() -> Result<&'static Catalog> {
        BUILTIN.get_or_try_init(|| {
            let catalog = Catalog::from_yaml(BUILTIN_CATALOG)?;
            info!(
                "Loaded layer catalog with {} layers and {} layer sets",
                catalog.layers.len(),
                catalog.layer_sets.len()
            );
            Ok(catalog)
        })
    }

    pub fn layer(&self, name: &str) -> Option<&LayerDefinition> {
        self.layers.get(name)
    }

    pub fn layer_set(&self, name: &str) -> Option<&[String]> {
        self.layer_sets.get(name).map(Vec::as_slice)
    }

    /// The key a layer gets inside a layer set response.
    pub fn short_name<'a>(&self, layer_name: &'a str) -> &'a str {
        layer_name
            .strip_prefix(self.short_name_prefix.as_str())
            .filter(|short| !short.is_empty())
            .unwrap_or(layer_name)
    }
}

impl LayerDefinition {
    fn validate(&self) -> Result<()> {
        if self.where_expressions.is_empty() {
            return Err(invalid(&self.name, "where_expressions must not be empty"));
        }
        if self.where_expressions.iter().any(|w| w.trim().is_empty()) {
            return Err(invalid(&self.name, "where_expressions contains a blank predicate"));
        }
        if self.zoom_min > MAX_ZOOM {
            return Err(invalid(&self.name, format!("zoom_min {} is above {MAX_ZOOM}", self.zoom_min)));
        }
        if let Some(factor) = self.simplification {
            if !factor.is_finite() || factor <= 0.0 {
                return Err(invalid(&self.name, format!("bad simplification {factor}")));
            }
        }

        // These names are interpolated into query text.
        for ident in std::iter::once(&self.table).chain(&self.columns) {
            if !is_plain_identifier(ident) {
                return Err(invalid(&self.name, format!("{ident:?} is not a plain identifier")));
            }
        }

        Ok(())
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_plain_identifier(ident: &str) -> bool {
    let mut chars = ident.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

fn invalid(layer: &str, reason: impl Into<String>) -> Error {
    Error::InvalidLayer {
        layer: layer.to_owned(),
        reason: reason.into(),
    }
}
