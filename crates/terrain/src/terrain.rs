// terrain.rs - authoritative ground height for a map
//
// Merges the .map heightfield with the collision mesh. The two can disagree
// (bridges, caves, buildings on top of terrain), so each query looks at both
// and keeps the surface that best explains the probe z.

use std::path::PathBuf;
use std::sync::Arc;

use mapnav_shared::config::DataDirs;
use mapnav_shared::Point;
use tracing::trace;

use crate::error::MapError;
use crate::grid_cache::GridCache;
use crate::grid_map::{GridMap, LiquidData, ZLiquidStatus, INVALID_HEIGHT, MAX_NUMBER_OF_GRIDS};
use crate::vmap::{is_valid_height, CollisionProvider, SAFE_Z_HIGHER_BIAS, VMAP_INVALID_HEIGHT_VALUE, VMap};

/// Pick between a terrain candidate and a collision height for probe `z`.
/// Either input at or below `INVALID_HEIGHT` counts as missing.
pub fn reconcile_height(map_height: f32, vmap_height: f32, z: f32) -> f32 {
    if is_valid_height(vmap_height) {
        if is_valid_height(map_height) {
            // vmap height above map height
            // or the vmap surface is closer to the probe than the land surface
            if vmap_height > map_height || (map_height - z).abs() > (vmap_height - z).abs() {
                vmap_height
            } else {
                map_height
            }
        } else {
            vmap_height
        }
    } else if is_valid_height(map_height) {
        map_height
    } else {
        z
    }
}

pub struct TerrainMap {
    grids: GridCache,
    vmap: VMap,
}

impl TerrainMap {
    pub fn new(maps_dir: Option<PathBuf>, collision: Arc<dyn CollisionProvider>) -> Self {
        let vmap = VMap::new(collision);
        TerrainMap {
            grids: GridCache::new(maps_dir, vmap.clone()),
            vmap,
        }
    }

    pub fn from_dirs(dirs: &DataDirs, collision: Arc<dyn CollisionProvider>) -> Self {
        Self::new(dirs.maps.clone(), collision)
    }

    pub fn grid_cache(&self) -> &GridCache {
        &self.grids
    }

    pub fn get_tile(&self, grid_x: i32, grid_y: i32, map_id: u32) -> Result<Arc<GridMap>, MapError> {
        self.grids.get_tile(grid_x, grid_y, map_id)
    }

    /// Make sure the terrain and collision data of a tile are resident.
    /// Returns false when the tile exists but could not be loaded.
    pub fn load_tile(&self, grid_x: i32, grid_y: i32, map_id: u32) -> bool {
        self.get_tile(grid_x, grid_y, map_id).is_ok()
    }

    /// Raw heightfield value at (x, y), `INVALID_HEIGHT` when unavailable
    pub fn get_grid_height(&self, x: f32, y: f32, map_id: u32) -> f32 {
        self.grids
            .get_grid(x, y, map_id)
            .map_or(INVALID_HEIGHT, |grid| grid.get_height(x, y))
    }

    /// Ground height under (x, y) for an entity standing around z.
    /// Falls back to z itself when neither source has a surface.
    pub fn get_height(&self, x: f32, y: f32, z: f32, map_id: u32) -> f32 {
        let grid_height = self.get_grid_height(x, y, map_id);
        let map_height = if z + SAFE_Z_HIGHER_BIAS > grid_height {
            grid_height
        } else {
            VMAP_INVALID_HEIGHT_VALUE
        };

        let vmap_height = self.vmap.get_height(x, y, z, map_id);
        let height = reconcile_height(map_height, vmap_height, z);
        trace!(
            "Map {} height at ({}, {}, {}): map={} vmap={} -> {}",
            map_id, x, y, z, map_height, vmap_height, height
        );
        height
    }

    /// World position of the first area cell carrying `area_id`, scanning tiles
    /// row-major from (0, 0). z is resolved from high above so the topmost
    /// surface wins.
    pub fn get_xyz_from_area_id(&self, area_id: u16, map_id: u32) -> Option<Point> {
        let grids = MAX_NUMBER_OF_GRIDS as u32;
        let (x, y) = (0..grids)
            .flat_map(|gx| (0..grids).map(move |gy| (gx, gy)))
            .find_map(|(gx, gy)| {
                self.get_tile(gx as i32, gy as i32, map_id)
                    .ok()?
                    .get_xy_from_area(area_id, gx, gy)
            })?;

        let z = self.get_height(x, y, -VMAP_INVALID_HEIGHT_VALUE, map_id);
        Some(Point::new(x, y, z))
    }

    pub fn get_area_id(&self, x: f32, y: f32, map_id: u32) -> Option<u16> {
        self.grids
            .get_grid(x, y, map_id)
            .ok()
            .map(|grid| grid.get_area(x, y))
    }

    pub fn get_liquid_status(
        &self,
        x: f32,
        y: f32,
        z: f32,
        req_type: u8,
        map_id: u32,
    ) -> (ZLiquidStatus, Option<LiquidData>) {
        match self.grids.get_grid(x, y, map_id) {
            Ok(grid) => grid.get_liquid_status(x, y, z, req_type),
            Err(_) => (ZLiquidStatus::NoWater, None),
        }
    }
}
