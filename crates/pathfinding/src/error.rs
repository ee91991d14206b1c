// Error types for navmesh loading

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::detour::DtStatus;

#[derive(Debug, Error)]
pub enum MmapError {
    #[error("cannot read '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("mmaps directory is not configured")]
    Unconfigured,

    #[error("map id {0} is outside the navmesh table")]
    MapIdOutOfRange(u32),

    #[error("'{}' holds {len} bytes, header needs {needed}", .path.display())]
    HeaderTooShort {
        path: PathBuf,
        len: usize,
        needed: usize,
    },

    #[error("'{}' magic mismatch: expected {expected:#010x}, found {found:#010x}", .path.display())]
    BadMagic {
        path: PathBuf,
        expected: u32,
        found: u32,
    },

    #[error("'{}' declares {declared} payload bytes but only {available} follow the header", .path.display())]
    SizeMismatch {
        path: PathBuf,
        declared: usize,
        available: usize,
    },

    #[error("detour rejected {what}: {status}")]
    Detour { what: &'static str, status: DtStatus },
}
