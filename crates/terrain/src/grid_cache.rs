// grid_cache.rs - per-map 64x64 matrix of lazily loaded terrain tiles
//
// Two-level lazy initialization:
// - first touch of a map id installs its slot matrix and lock (insert-if-absent)
// - first touch of a slot takes that map's lock, re-checks, loads, publishes
//
// Queries against published tiles never take the per-map lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::MapError;
use crate::grid_map::{GridMap, CENTER_GRID_ID, MAX_NUMBER_OF_GRIDS, SIZE_OF_GRIDS};
use crate::vmap::VMap;

/// Published result of the single load attempt for a slot.
/// A failure keeps its message so every later access reports the same thing.
type TileSlot = Result<Arc<GridMap>, String>;

struct MapGrids {
    tiles: Box<[OnceCell<TileSlot>]>,
    load_lock: Mutex<()>,
}

impl MapGrids {
    fn new() -> Self {
        MapGrids {
            tiles: (0..MAX_NUMBER_OF_GRIDS * MAX_NUMBER_OF_GRIDS)
                .map(|_| OnceCell::new())
                .collect(),
            load_lock: Mutex::new(()),
        }
    }
}

/// `{map:03}{x:02}{y:02}.map`
pub fn map_file_name(map_id: u32, tile_x: u32, tile_y: u32) -> String {
    format!("{:03}{:02}{:02}.map", map_id, tile_x, tile_y)
}

/// Grid tile covering world (x, y). May be outside 0..64 for points off the map.
pub fn grid_coords(x: f32, y: f32) -> (i32, i32) {
    let gx = (CENTER_GRID_ID - x / SIZE_OF_GRIDS) as i32;
    let gy = (CENTER_GRID_ID - y / SIZE_OF_GRIDS) as i32;
    (gx, gy)
}

fn checked_grid(tile_x: i32, tile_y: i32) -> Result<(u32, u32), MapError> {
    let in_range = |v: i32| (0..MAX_NUMBER_OF_GRIDS as i32).contains(&v);
    if in_range(tile_x) && in_range(tile_y) {
        Ok((tile_x as u32, tile_y as u32))
    } else {
        Err(MapError::GridOutOfBounds {
            x: tile_x,
            y: tile_y,
        })
    }
}

pub struct GridCache {
    maps_dir: Option<PathBuf>,
    vmap: VMap,
    grids: RwLock<HashMap<u32, Arc<MapGrids>>>,
    tile_loads: AtomicUsize,
}

impl GridCache {
    /// `maps_dir` of `None` means every tile is empty (only collision data answers)
    pub fn new(maps_dir: Option<PathBuf>, vmap: VMap) -> Self {
        GridCache {
            maps_dir,
            vmap,
            grids: RwLock::new(HashMap::new()),
            tile_loads: AtomicUsize::new(0),
        }
    }

    pub fn maps_dir(&self) -> Option<&Path> {
        self.maps_dir.as_deref()
    }

    /// Number of tile loads performed so far (one per slot at most)
    pub fn tile_loads(&self) -> usize {
        self.tile_loads.load(Ordering::Acquire)
    }

    fn map_grids(&self, map_id: u32) -> Arc<MapGrids> {
        if let Some(grids) = self.grids.read().get(&map_id) {
            return Arc::clone(grids);
        }
        let mut grids = self.grids.write();
        Arc::clone(
            grids
                .entry(map_id)
                .or_insert_with(|| Arc::new(MapGrids::new())),
        )
    }

    /// Tile (tile_x, tile_y) of `map_id`, loading it on first access.
    pub fn get_tile(&self, tile_x: i32, tile_y: i32, map_id: u32) -> Result<Arc<GridMap>, MapError> {
        let (x, y) = checked_grid(tile_x, tile_y)?;
        let grids = self.map_grids(map_id);
        let cell = &grids.tiles[x as usize * MAX_NUMBER_OF_GRIDS + y as usize];

        let slot = match cell.get() {
            Some(slot) => slot,
            None => {
                let _guard = grids.load_lock.lock();
                // Another thread may have published while we waited
                cell.get_or_try_init(|| self.load_slot(map_id, x, y))?
            }
        };

        slot.clone().map_err(|reason| MapError::Corrupt {
            map_id,
            x,
            y,
            reason,
        })
    }

    /// Tile covering world (x, y)
    pub fn get_grid(&self, x: f32, y: f32, map_id: u32) -> Result<Arc<GridMap>, MapError> {
        let (gx, gy) = grid_coords(x, y);
        self.get_tile(gx, gy, map_id)
    }

    /// One load attempt. Decoded tiles and corrupt files are published;
    /// an I/O failure is returned unpublished so the next access retries.
    fn load_slot(&self, map_id: u32, x: u32, y: u32) -> Result<TileSlot, MapError> {
        self.tile_loads.fetch_add(1, Ordering::AcqRel);

        let grid = match &self.maps_dir {
            Some(dir) => {
                let path = dir.join(map_file_name(map_id, x, y));
                match GridMap::load(&path) {
                    Ok(grid) => Ok(grid),
                    Err(e @ MapError::Io { .. }) => {
                        warn!("Map {} tile [{},{}]: {}, will retry", map_id, x, y, e);
                        return Err(e);
                    }
                    Err(e) => {
                        warn!("Map {} tile [{},{}]: {}", map_id, x, y, e);
                        Err(e.to_string())
                    }
                }
            }
            None => Ok(GridMap::default()),
        };

        self.vmap.load_tile(x, y, map_id);
        debug!("Map {} tile [{},{}] published", map_id, x, y);
        Ok(grid.map(Arc::new))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid_map::fixture::TileFile;
    use crate::vmap::testing::FlatCollision;
    use crate::vmap::NoCollision;

    fn write_tile(dir: &Path, map_id: u32, x: u32, y: u32, grid_height: f32) {
        let file = TileFile {
            grid_height,
            ..Default::default()
        };
        std::fs::write(dir.join(map_file_name(map_id, x, y)), file.to_bytes()).unwrap();
    }

    #[test]
    fn test_file_name_and_grid_coords() {
        assert_eq!(map_file_name(1, 2, 30), "0010230.map");
        assert_eq!(grid_coords(0.0, 0.0), (32, 32));
        assert_eq!(grid_coords(-100.0, 100.0), (32, 31));
        assert_eq!(grid_coords(SIZE_OF_GRIDS * 31.5, -SIZE_OF_GRIDS * 31.5), (0, 63));
    }

    #[test]
    fn test_out_of_bounds() {
        let cache = GridCache::new(None, VMap::new(Arc::new(NoCollision)));
        assert!(matches!(cache.get_tile(-1, 0, 0), Err(MapError::GridOutOfBounds { .. })));
        assert!(matches!(cache.get_tile(0, 64, 0), Err(MapError::GridOutOfBounds { .. })));
        assert!(cache.get_grid(SIZE_OF_GRIDS * 40.0, 0.0, 0).is_err());
        assert_eq!(cache.tile_loads(), 0);
    }

    #[test]
    fn test_slot_loaded_once_and_collision_tile_requested() {
        let dir = tempfile::tempdir().unwrap();
        write_tile(dir.path(), 530, 31, 40, 77.0);
        let collision = Arc::new(FlatCollision::default());
        let cache = GridCache::new(Some(dir.path().to_path_buf()), VMap::new(collision.clone()));

        let first = cache.get_tile(31, 40, 530).unwrap();
        let second = cache.get_tile(31, 40, 530).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.get_height(0.0, 0.0), 77.0);
        assert_eq!(cache.tile_loads(), 1);
        assert_eq!(*collision.loaded.lock(), vec![(530, 31, 40)]);

        // Same coordinates on another map are a different slot
        let other = cache.get_tile(31, 40, 1).unwrap();
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(cache.tile_loads(), 2);
    }

    #[test]
    fn test_concurrent_first_access_loads_once() {
        let dir = tempfile::tempdir().unwrap();
        write_tile(dir.path(), 0, 32, 32, 5.0);
        let cache = GridCache::new(Some(dir.path().to_path_buf()), VMap::new(Arc::new(NoCollision)));

        let tiles: Vec<Arc<GridMap>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..16)
                .map(|_| s.spawn(|| cache.get_tile(32, 32, 0).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(cache.tile_loads(), 1);
        assert!(tiles.iter().all(|t| Arc::ptr_eq(t, &tiles[0])));
    }

    #[test]
    fn test_corrupt_tile_is_isolated_and_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(map_file_name(0, 10, 10)), b"MAPSv1.8 short").unwrap();
        write_tile(dir.path(), 0, 10, 11, 3.0);
        let cache = GridCache::new(Some(dir.path().to_path_buf()), VMap::new(Arc::new(NoCollision)));

        assert!(matches!(cache.get_tile(10, 10, 0), Err(MapError::Corrupt { .. })));
        assert!(matches!(cache.get_tile(10, 10, 0), Err(MapError::Corrupt { .. })));
        assert_eq!(cache.tile_loads(), 1);

        assert_eq!(cache.get_tile(10, 11, 0).unwrap().get_height(0.0, 0.0), 3.0);
    }

    #[test]
    fn test_io_failure_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(map_file_name(0, 5, 5));
        // A directory where the tile file should be cannot be read
        std::fs::create_dir(&path).unwrap();
        let collision = Arc::new(FlatCollision::default());
        let cache = GridCache::new(Some(dir.path().to_path_buf()), VMap::new(collision.clone()));

        assert!(matches!(cache.get_tile(5, 5, 0), Err(MapError::Io { .. })));
        assert!(collision.loaded.lock().is_empty());

        std::fs::remove_dir(&path).unwrap();
        write_tile(dir.path(), 0, 5, 5, 21.0);
        let tile = cache.get_tile(5, 5, 0).unwrap();
        assert_eq!(tile.get_height(0.0, 0.0), 21.0);
        assert_eq!(cache.tile_loads(), 2);
        assert_eq!(*collision.loaded.lock(), vec![(0, 5, 5)]);

        // Published now: no further reads
        assert!(Arc::ptr_eq(&tile, &cache.get_tile(5, 5, 0).unwrap()));
        assert_eq!(cache.tile_loads(), 2);
    }

    #[test]
    fn test_missing_directory_entries_are_empty_tiles() {
        let dir = tempfile::tempdir().unwrap();
        let cache = GridCache::new(Some(dir.path().to_path_buf()), VMap::new(Arc::new(NoCollision)));
        let tile = cache.get_tile(1, 2, 3).unwrap();
        assert_eq!(tile.get_height(0.0, 0.0), crate::grid_map::INVALID_HEIGHT);

        let unconfigured = GridCache::new(None, VMap::new(Arc::new(NoCollision)));
        assert!(unconfigured.maps_dir().is_none());
        assert!(unconfigured.get_tile(1, 2, 3).is_ok());
    }
}
