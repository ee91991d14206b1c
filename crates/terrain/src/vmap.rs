// vmap.rs - collision geometry facade
//
// The collision mesh itself (vmap tree files, model instances, ray casts)
// lives behind CollisionProvider. This module only fixes how terrain queries
// talk to it: which tiles get loaded and with what bias/radius heights are
// probed.

use std::sync::Arc;

use crate::grid_map::INVALID_HEIGHT;

/// Heights are probed this far above the requested z so a point standing
/// exactly on a surface still finds it
pub const SAFE_Z_HIGHER_BIAS: f32 = 2.0;
/// Maximum downward search distance for collision heights
pub const DEFAULT_HEIGHT_SEARCH: f32 = 50.0;
/// Returned by providers when no surface was found
pub const VMAP_INVALID_HEIGHT_VALUE: f32 = -200000.0;

/// Capability offered by the collision-mesh library.
pub trait CollisionProvider: Send + Sync {
    /// Make the collision geometry of one grid tile available
    fn load_tile(&self, map_id: u32, tile_x: u32, tile_y: u32);

    /// Highest surface at or below (x, y, z) within `max_search_dist`, or a
    /// value at or below `INVALID_HEIGHT` when there is none
    fn get_height(&self, map_id: u32, x: f32, y: f32, z: f32, max_search_dist: f32) -> f32;
}

/// Provider for deployments without collision data: every probe misses.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCollision;

impl CollisionProvider for NoCollision {
    fn load_tile(&self, _map_id: u32, _tile_x: u32, _tile_y: u32) {}

    fn get_height(&self, _map_id: u32, _x: f32, _y: f32, _z: f32, _max_search_dist: f32) -> f32 {
        VMAP_INVALID_HEIGHT_VALUE
    }
}

/// Shared handle used by the grid cache and the terrain query
#[derive(Clone)]
pub struct VMap {
    provider: Arc<dyn CollisionProvider>,
}

impl VMap {
    pub fn new(provider: Arc<dyn CollisionProvider>) -> Self {
        VMap { provider }
    }

    pub fn load_tile(&self, tile_x: u32, tile_y: u32, map_id: u32) {
        self.provider.load_tile(map_id, tile_x, tile_y);
    }

    /// Collision height near (x, y, z), probing from z + SAFE_Z_HIGHER_BIAS
    pub fn get_height(&self, x: f32, y: f32, z: f32, map_id: u32) -> f32 {
        self.provider
            .get_height(map_id, x, y, z + SAFE_Z_HIGHER_BIAS, DEFAULT_HEIGHT_SEARCH)
    }
}

/// True when a height returned by either source denotes a real surface
pub fn is_valid_height(height: f32) -> bool {
    height > INVALID_HEIGHT
}
