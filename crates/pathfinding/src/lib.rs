// mapnav pathfinding
// Navigation-mesh cache (.mmap / .mmtile) and the path query that turns a
// polygon corridor into a ground-hugging point path.

pub mod detour;
pub mod error;
pub mod mmap;
pub mod path_finder;

pub use detour::{DetourNavMesh, DtStatus, NavMeshBackend, NavMeshParams, PolyRef, TileData, TileRef};
pub use error::MmapError;
pub use mmap::{MMapManager, NavMeshSlot, TileSweep};
pub use path_finder::{PathFinder, PathResult, PathType};
