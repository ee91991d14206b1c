// mapnav terrain
// Heightfield tiles (.map), their per-map cache, the collision facade and the
// reconciled ground-height query built on top of them.

pub mod error;
pub mod grid_cache;
pub mod grid_map;
pub mod terrain;
pub mod vmap;

pub use error::MapError;
pub use grid_cache::GridCache;
pub use grid_map::{GridMap, HeightMode, LiquidData, ZLiquidStatus, INVALID_HEIGHT, SIZE_OF_GRIDS};
pub use terrain::TerrainMap;
pub use vmap::{CollisionProvider, NoCollision};
