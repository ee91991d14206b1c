// path_finder.rs - walkable path between two world points
//
// Pipeline: ensure mesh + tiles, nearest polygons, polygon corridor, string
// pulled corners, then resample every segment in fixed steps and drop each
// sample onto the reconciled ground height. Failures end in PathType::None;
// nothing is thrown across this boundary.

use std::path::PathBuf;
use std::sync::Arc;

use mapnav_shared::config::DataDirs;
use mapnav_shared::Point;
use mapnav_terrain::TerrainMap;
use tracing::{debug, trace};

use crate::detour::{DetourNavMesh, NavMeshBackend};
use crate::mmap::MMapManager;

/// Maximum polygons in a corridor
pub const MAX_PATH_LENGTH: usize = 74;
/// Maximum corner points in a straight path
pub const MAX_POINT_PATH_LENGTH: usize = 74;
/// Distance between resampled path points
pub const SMOOTH_PATH_STEP_SIZE: f32 = 4.0;
/// Search box half-extents for the nearest polygon, mesh axis order
pub const POLY_PICK_EXTENTS: [f32; 3] = [3.0, 5.0, 3.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathType {
    None,
    /// Search stopped early; points lead towards the target
    Partial,
    Complete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathResult {
    pub path_type: PathType,
    pub points: Vec<Point>,
}

impl PathResult {
    pub fn none() -> Self {
        PathResult {
            path_type: PathType::None,
            points: Vec::new(),
        }
    }
}

pub struct PathFinder<B: NavMeshBackend> {
    mmaps: MMapManager<B>,
    terrain: Arc<TerrainMap>,
}

impl<B: NavMeshBackend> PathFinder<B> {
    pub fn new(mmaps_dir: Option<PathBuf>, backend: B, terrain: Arc<TerrainMap>) -> Self {
        PathFinder {
            mmaps: MMapManager::new(mmaps_dir, backend, Arc::clone(&terrain)),
            terrain,
        }
    }

    pub fn from_dirs(dirs: &DataDirs, backend: B, terrain: Arc<TerrainMap>) -> Self {
        Self::new(dirs.mmaps.clone(), backend, terrain)
    }

    pub fn mmap_manager(&self) -> &MMapManager<B> {
        &self.mmaps
    }

    pub fn terrain(&self) -> &TerrainMap {
        &self.terrain
    }

    pub fn find_path(&self, start: Point, end: Point, map_id: u32) -> PathResult {
        if !self.mmaps.is_configured() {
            return PathResult::none();
        }

        let start_pos = start.to_detour();
        let end_pos = end.to_detour();

        let slot = match self.mmaps.load_nav_mesh(map_id) {
            Ok(slot) => slot,
            Err(e) => {
                debug!("Map {}: no navmesh: {}", map_id, e);
                return PathResult::none();
            }
        };

        self.mmaps.load_tiles(&start_pos, map_id, &slot);
        self.mmaps.load_tiles(&end_pos, map_id, &slot);

        let (corners, partial) = {
            let mesh = slot.mesh();
            match Self::straight_path(&*mesh, &start_pos, &end_pos) {
                Some(found) => found,
                None => {
                    debug!("Map {}: no path from {} to {}", map_id, start, end);
                    return PathResult::none();
                }
            }
        };

        let points = self.smooth_path(&corners, map_id);
        let path_type = if partial {
            PathType::Partial
        } else {
            PathType::Complete
        };
        trace!(
            "Map {}: {:?} path from {} to {}, {} corners, {} points",
            map_id,
            path_type,
            start,
            end,
            corners.len(),
            points.len()
        );

        PathResult { path_type, points }
    }

    /// Corner points between the two positions (mesh axis order) and whether
    /// the search was cut short
    fn straight_path(mesh: &B::Mesh, start: &[f32; 3], end: &[f32; 3]) -> Option<(Vec<[f32; 3]>, bool)> {
        let (status, start_ref) = mesh.find_nearest_poly(start, &POLY_PICK_EXTENTS);
        if status.failed() {
            return None;
        }
        let (status, end_ref) = mesh.find_nearest_poly(end, &POLY_PICK_EXTENTS);
        if status.failed() || start_ref == 0 || end_ref == 0 {
            return None;
        }

        let (corridor_status, corridor) = mesh.find_path(start_ref, end_ref, start, end, MAX_PATH_LENGTH);
        if corridor_status.failed() || corridor.is_empty() {
            return None;
        }

        let (straight_status, corners) =
            mesh.find_straight_path(start, end, &corridor, MAX_POINT_PATH_LENGTH);
        if straight_status.failed() || corners.len() < 2 {
            return None;
        }

        Some((corners, corridor_status.is_partial() || straight_status.is_partial()))
    }

    /// Resample the corners into SMOOTH_PATH_STEP_SIZE steps in world order,
    /// every point placed on the reconciled ground height
    fn smooth_path(&self, corners: &[[f32; 3]], map_id: u32) -> Vec<Point> {
        let mut path = Vec::with_capacity(corners.len());
        let mut last: Option<Point> = None;

        for corner in corners {
            let mut current = Point::from_detour(*corner);

            if let Some(mut last_point) = last {
                let distance = current - last_point;
                let step = distance.direction() * SMOOTH_PATH_STEP_SIZE;
                let steps = (distance.length() / SMOOTH_PATH_STEP_SIZE).floor() as usize;
                for _ in 0..steps {
                    let mut step_point = last_point + step;
                    step_point.z = self.terrain.get_height(step_point.x, step_point.y, step_point.z, map_id);
                    path.push(step_point);
                    last_point = step_point;
                }
            }

            current.z = self.terrain.get_height(current.x, current.y, current.z, map_id);
            path.push(current);
            last = Some(current);
        }

        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detour::testing::FakeBackend;
    use crate::detour::DtStatus;
    use crate::mmap::fixture::*;
    use mapnav_terrain::{NoCollision, SIZE_OF_GRIDS};
    use tempfile::TempDir;

    const GROUND: f32 = 10.0;

    struct World {
        _mmaps: TempDir,
        _maps: TempDir,
        finder: PathFinder<FakeBackend>,
    }

    /// Mesh tiles around grids (31..=33, 30..=33) and flat ground at GROUND
    /// on grids (32, 31) and (32, 32)
    fn world(backend: FakeBackend) -> World {
        let mmaps = tempfile::tempdir().unwrap();
        let maps = tempfile::tempdir().unwrap();
        write_params(mmaps.path(), MAP_ID);
        write_tiles(mmaps.path(), MAP_ID, 31..=33, 30..=33);
        write_flat_map(maps.path(), MAP_ID, 32, 31, GROUND);
        write_flat_map(maps.path(), MAP_ID, 32, 32, GROUND);

        let terrain = Arc::new(TerrainMap::new(Some(maps.path().to_path_buf()), Arc::new(NoCollision)));
        let finder = PathFinder::new(Some(mmaps.path().to_path_buf()), backend, terrain);
        World {
            _mmaps: mmaps,
            _maps: maps,
            finder,
        }
    }

    fn planar_distance(a: Point, b: Point) -> f32 {
        ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt()
    }

    fn assert_walkable(finder: &PathFinder<FakeBackend>, points: &[Point]) {
        for pair in points.windows(2) {
            assert!(
                planar_distance(pair[0], pair[1]) <= SMOOTH_PATH_STEP_SIZE + 1e-3,
                "{} -> {}",
                pair[0],
                pair[1]
            );
        }
        for p in points {
            assert_eq!(p.z, finder.terrain().get_height(p.x, p.y, p.z, MAP_ID));
        }
    }

    #[test]
    fn test_unconfigured_returns_none() {
        let terrain = Arc::new(TerrainMap::new(None, Arc::new(NoCollision)));
        let finder = PathFinder::new(None, FakeBackend::default(), terrain);
        let result = finder.find_path(Point::new(0.0, 0.0, 0.0), Point::new(10.0, 0.0, 0.0), 0);
        assert_eq!(result, PathResult::none());

        let finder = PathFinder::from_dirs(
            &DataDirs::default(),
            FakeBackend::default(),
            Arc::new(TerrainMap::new(None, Arc::new(NoCollision))),
        );
        assert_eq!(finder.find_path(Point::default(), Point::default(), 0).path_type, PathType::None);
    }

    #[test]
    fn test_missing_mesh_returns_none() {
        let w = world(FakeBackend::default());
        let result = w.finder.find_path(Point::new(-100.0, -100.0, GROUND), Point::new(-100.0, -140.0, GROUND), 1);
        assert_eq!(result, PathResult::none());
        assert!(w.finder.mmap_manager().get_nav_mesh(1).is_none());
    }

    #[test]
    fn test_no_polygon_near_endpoint() {
        let w = world(FakeBackend::default());
        // Far away from every tile written to disk
        let far = Point::new(-100.0, -100.0 - 10.0 * SIZE_OF_GRIDS, GROUND);
        let result = w.finder.find_path(Point::new(-100.0, -100.0, GROUND), far, MAP_ID);
        assert_eq!(result.path_type, PathType::None);
        assert!(result.points.is_empty());
        // The mesh itself was created and keeps the tiles around the start
        let slot = w.finder.mmap_manager().get_nav_mesh(MAP_ID).unwrap();
        assert!(slot.tile_exists_at(31, 31));
    }

    #[test]
    fn test_complete_path_is_resampled_on_the_ground() {
        let w = world(FakeBackend::default());
        let start = Point::new(-100.0, -100.0, GROUND);
        let end = Point::new(-100.0, -140.0, GROUND);

        let result = w.finder.find_path(start, end, MAP_ID);
        assert_eq!(result.path_type, PathType::Complete);
        assert_eq!(result.points.first(), Some(&start));
        assert_eq!(result.points.last(), Some(&end));
        assert!(result.points.len() >= 11);
        assert_walkable(&w.finder, &result.points);
    }

    #[test]
    fn test_mesh_heights_are_replaced_by_ground_heights() {
        let backend = FakeBackend {
            waypoints: vec![Point::new(-110.0, -120.0, 14.0).to_detour()],
            ..Default::default()
        };
        let w = world(backend);
        // Endpoints and waypoint hover above the ground
        let result = w.finder.find_path(
            Point::new(-100.0, -100.0, 13.0),
            Point::new(-100.0, -140.0, 11.5),
            MAP_ID,
        );
        assert_eq!(result.path_type, PathType::Complete);
        assert!(result.points.iter().all(|p| p.z == GROUND));
        assert!(result.points.contains(&Point::new(-110.0, -120.0, GROUND)));
        assert_walkable(&w.finder, &result.points);
    }

    #[test]
    fn test_path_across_tiles() {
        let w = world(FakeBackend::default());
        let start = Point::new(-100.0, -100.0, GROUND);
        let end = Point::new(-100.0, 100.0, GROUND);

        let result = w.finder.find_path(start, end, MAP_ID);
        assert_eq!(result.path_type, PathType::Complete);
        assert_eq!(result.points.last(), Some(&end));
        assert_walkable(&w.finder, &result.points);

        let slot = w.finder.mmap_manager().get_nav_mesh(MAP_ID).unwrap();
        assert!(slot.tile_exists_at(31, 31) && slot.tile_exists_at(32, 31));
    }

    #[test]
    fn test_disconnected_polygons_return_none() {
        let backend = FakeBackend {
            connected: false,
            ..Default::default()
        };
        let w = world(backend);
        let result = w.finder.find_path(
            Point::new(-100.0, -100.0, GROUND),
            Point::new(-100.0, 100.0, GROUND),
            MAP_ID,
        );
        assert_eq!(result, PathResult::none());
    }

    #[test]
    fn test_partial_corridor() {
        let backend = FakeBackend {
            path_status: DtStatus::SUCCESS | DtStatus::PARTIAL_RESULT,
            ..Default::default()
        };
        let w = world(backend);
        let result = w.finder.find_path(
            Point::new(-100.0, -100.0, GROUND),
            Point::new(-100.0, 100.0, GROUND),
            MAP_ID,
        );
        assert_eq!(result.path_type, PathType::Partial);
        assert!(!result.points.is_empty());
    }

    #[test]
    fn test_truncated_straight_path_is_partial() {
        let waypoints = (1..100)
            .map(|i| Point::new(-100.0, -100.0 - i as f32, GROUND).to_detour())
            .collect();
        let backend = FakeBackend {
            waypoints,
            ..Default::default()
        };
        let w = world(backend);
        let end = Point::new(-100.0, -300.0, GROUND);
        let result = w.finder.find_path(Point::new(-100.0, -100.0, GROUND), end, MAP_ID);

        assert_eq!(result.path_type, PathType::Partial);
        // Cut at MAX_POINT_PATH_LENGTH corners, well short of the end
        assert_eq!(result.points.len(), MAX_POINT_PATH_LENGTH);
        assert_ne!(result.points.last(), Some(&end));
        assert_walkable(&w.finder, &result.points);
    }

    #[test]
    fn test_concurrent_queries_share_one_mesh() {
        let w = world(FakeBackend::default());
        let results: Vec<PathResult> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let finder = &w.finder;
                    s.spawn(move || {
                        let end = Point::new(-100.0, -110.0 - i as f32 * 5.0, GROUND);
                        finder.find_path(Point::new(-100.0, -100.0, GROUND), end, MAP_ID)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(results.iter().all(|r| r.path_type == PathType::Complete));
        assert_eq!(w.finder.mmap_manager().backend().created(), 1);
        let slot = w.finder.mmap_manager().get_nav_mesh(MAP_ID).unwrap();
        assert_eq!(slot.mesh().tiles.len(), 9);
        // Racing sweeps re-check under the map lock: no tile is offered twice
        assert_eq!(slot.mesh().add_calls, 9);
    }
}
