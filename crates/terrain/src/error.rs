// Error types for terrain tile loading

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MapError {
    #[error("cannot read '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{what} magic mismatch: expected {expected:#010x}, found {found:#010x}")]
    BadMagic {
        what: &'static str,
        expected: u32,
        found: u32,
    },

    #[error("truncated {section} section: {source}")]
    Truncated {
        section: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("grid ({x}, {y}) is outside the 64x64 map grid")]
    GridOutOfBounds { x: i32, y: i32 },

    /// The tile file was found but failed to load earlier; it is not retried
    #[error("tile {map_id:03}{x:02}{y:02} is unusable: {reason}")]
    Corrupt {
        map_id: u32,
        x: u32,
        y: u32,
        reason: String,
    },
}

impl MapError {
    pub(crate) fn truncated(section: &'static str) -> impl Fn(io::Error) -> MapError + Copy {
        move |source| MapError::Truncated { section, source }
    }

    pub(crate) fn check_magic(what: &'static str, expected: u32, found: u32) -> Result<(), MapError> {
        if expected == found {
            Ok(())
        } else {
            Err(MapError::BadMagic {
                what,
                expected,
                found,
            })
        }
    }
}
