#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid YAML in layer catalog: {0}")]
    InvalidCatalog(#[from] serde_yaml::Error),

    #[error("Invalid catalog entry {layer}: {reason}")]
    InvalidLayer { layer: String, reason: String },

    #[error("No layer or layer set named {0}")]
    UnknownLayer(String),

    #[error("Zoom {0} is above the maximum supported zoom")]
    ZoomOutOfRange(u8),

    #[error("Tile {x}/{y} does not exist at zoom {zoom}")]
    TileOutOfRange { zoom: u8, x: u32, y: u32 },

    #[error("Not a tile path: {0}")]
    InvalidTilePath(String),

    #[error(transparent)]
    Engine(#[from] sqlx::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for errors caused by the request itself rather than by the server,
    /// which a router should answer with a "not found" style status.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::UnknownLayer(_)
                | Error::ZoomOutOfRange(_)
                | Error::TileOutOfRange { .. }
                | Error::InvalidTilePath(_)
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
