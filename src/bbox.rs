use std::fmt;

use slippy_map_tilenames::tile2lonlat;

/// WGS 84, the reference system of the stored geometries.
pub const SRID: u32 = 4326;

/// Fraction of a tile added on every side of the padded box.
pub const PAD_FRACTION: f64 = 0.05;

/// A geographic rectangle in degrees.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

/// The exact tile extent, and the same extent grown by [`PAD_FRACTION`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBoxPair {
    pub tight: BoundingBox,
    pub padded: BoundingBox,
}

impl BoundingBox {
    pub fn width(&self) -> f64 {
        self.east - self.west
    }

    pub fn height(&self) -> f64 {
        self.north - self.south
    }

    /// Grows the box by `fraction` of its width and height on each side.
    pub fn expand(&self, fraction: f64) -> BoundingBox {
        let dx = self.width() * fraction;
        let dy = self.height() * fraction;
        BoundingBox {
            west: self.west - dx,
            south: self.south - dy,
            east: self.east + dx,
            north: self.north + dy,
        }
    }
}

/// Renders as a SpatiaLite MBR constructor.
impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BuildMBR({},{},{},{},{SRID})",
            self.west, self.south, self.east, self.north
        )
    }
}

/// Derives both boxes for a slippy map tile. The caller guarantees that `x`
/// and `y` are inside the grid for `zoom`.
pub fn derive_boxes(x: u32, y: u32, zoom: u8) -> BoundingBoxPair {
    // North-west corner of this tile and of the diagonal neighbour
    let (west, north) = tile2lonlat(x, y, zoom);
    let (east, south) = tile2lonlat(x + 1, y + 1, zoom);

    let tight = BoundingBox {
        west,
        south,
        east,
        north,
    };

    BoundingBoxPair {
        tight,
        padded: tight.expand(PAD_FRACTION),
    }
}
