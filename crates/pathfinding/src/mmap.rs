// mmap.rs - per-map navigation meshes, built lazily from .mmap/.mmtile files
//
// Per map id: Unloaded -> HeaderLoaded (empty mesh) -> tiles added around
// every query endpoint. Both steps are idempotent.
//
// Locking:
// - the slot table has a fixed shape (MAX_MAP_ID entries); creating a mesh
//   takes the table lock and re-checks the slot
// - adding tiles takes that map's load lock and re-checks the tile; the mesh
//   itself sits behind a RwLock so queries only ever share it

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mapnav_shared::util::ByteBuffer;
use mapnav_terrain::grid_map::{CENTER_GRID_ID, MAX_NUMBER_OF_GRIDS, SIZE_OF_GRIDS};
use mapnav_terrain::TerrainMap;
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use tracing::{debug, error, info, trace, warn};

use crate::detour::{DetourNavMesh, NavMeshBackend, NavMeshParams, TileData};
use crate::error::MmapError;

/// Highest map id + 1 the slot table has room for
pub const MAX_MAP_ID: u32 = 724 + 1;

pub const MMAP_MAGIC: u32 = 0x4d4d_4150; // 'MMAP'

/// mmapMagic, dtVersion, mmapVersion, size, usesLiquids + padding
pub const MMAP_TILE_HEADER_SIZE: usize = 5 * 4;

struct MmapTileHeader {
    mmap_magic: u32,
    dt_version: u32,
    mmap_version: u32,
    size: u32,
    uses_liquids: bool,
}

impl MmapTileHeader {
    fn read(buf: &mut ByteBuffer) -> io::Result<Self> {
        let mmap_magic = buf.read_u32()?;
        let dt_version = buf.read_u32()?;
        let mmap_version = buf.read_u32()?;
        let size = buf.read_u32()?;
        let uses_liquids = buf.read_u8()? != 0;
        buf.read_skip(3);
        Ok(MmapTileHeader {
            mmap_magic,
            dt_version,
            mmap_version,
            size,
            uses_liquids,
        })
    }
}

/// `{map:03}.mmap`
pub fn mmap_file_name(map_id: u32) -> String {
    format!("{:03}.mmap", map_id)
}

/// `{map:03}{x:02}{y:02}.mmtile`
pub fn mmtile_file_name(map_id: u32, tile_x: u32, tile_y: u32) -> String {
    format!("{:03}{:02}{:02}.mmtile", map_id, tile_x, tile_y)
}

/// Read and validate one .mmtile file. `Ok(None)` when the file is absent.
pub fn read_tile_file(path: &Path) -> Result<Option<TileData>, MmapError> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(MmapError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let too_short = |len: usize| MmapError::HeaderTooShort {
        path: path.to_path_buf(),
        len,
        needed: MMAP_TILE_HEADER_SIZE,
    };

    let len = data.len();
    if len < MMAP_TILE_HEADER_SIZE {
        return Err(too_short(len));
    }

    let mut buf = ByteBuffer::from_vec(data);
    let header = MmapTileHeader::read(&mut buf).map_err(|_| too_short(len))?;
    if header.mmap_magic != MMAP_MAGIC {
        return Err(MmapError::BadMagic {
            path: path.to_path_buf(),
            expected: MMAP_MAGIC,
            found: header.mmap_magic,
        });
    }

    let declared = header.size as usize;
    let available = buf.remaining();
    if declared > available {
        return Err(MmapError::SizeMismatch {
            path: path.to_path_buf(),
            declared,
            available,
        });
    }

    trace!(
        "{}: dt v{} mmap v{} liquids={} size={}",
        path.display(),
        header.dt_version,
        header.mmap_version,
        header.uses_liquids,
        declared
    );

    let payload = buf
        .read_bytes(declared)
        .map_err(|source| MmapError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(Some(TileData::new(payload)))
}

/// Outcome of one 3x3 tile sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TileSweep {
    pub added: usize,
    /// Already in the mesh, or no tile file on disk
    pub skipped: usize,
    pub failed: usize,
}

/// The navigation mesh of one map plus the lock serializing tile additions.
pub struct NavMeshSlot<M> {
    map_id: u32,
    mesh: RwLock<M>,
    load_lock: Mutex<()>,
}

impl<M: DetourNavMesh> NavMeshSlot<M> {
    fn new(map_id: u32, mesh: M) -> Self {
        NavMeshSlot {
            map_id,
            mesh: RwLock::new(mesh),
            load_lock: Mutex::new(()),
        }
    }

    pub fn map_id(&self) -> u32 {
        self.map_id
    }

    /// Shared access for queries
    pub fn mesh(&self) -> RwLockReadGuard<'_, M> {
        self.mesh.read()
    }

    pub fn tile_exists_at(&self, x: i32, y: i32) -> bool {
        self.mesh.read().tile_exists_at(x, y)
    }
}

pub struct MMapManager<B: NavMeshBackend> {
    mmaps_dir: Option<PathBuf>,
    backend: B,
    terrain: Arc<TerrainMap>,
    nav_meshes: Box<[OnceCell<Arc<NavMeshSlot<B::Mesh>>>]>,
    table_lock: Mutex<()>,
}

impl<B: NavMeshBackend> MMapManager<B> {
    /// `mmaps_dir` of `None` leaves path queries unconfigured
    pub fn new(mmaps_dir: Option<PathBuf>, backend: B, terrain: Arc<TerrainMap>) -> Self {
        MMapManager {
            mmaps_dir,
            backend,
            terrain,
            nav_meshes: (0..MAX_MAP_ID).map(|_| OnceCell::new()).collect(),
            table_lock: Mutex::new(()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.mmaps_dir.is_some()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn terrain(&self) -> &Arc<TerrainMap> {
        &self.terrain
    }

    fn dir(&self) -> Result<&Path, MmapError> {
        self.mmaps_dir.as_deref().ok_or(MmapError::Unconfigured)
    }

    /// Mesh of `map_id` if its header has been loaded already
    pub fn get_nav_mesh(&self, map_id: u32) -> Option<Arc<NavMeshSlot<B::Mesh>>> {
        self.nav_meshes.get(map_id as usize)?.get().cloned()
    }

    /// Mesh of `map_id`, creating it from `{map:03}.mmap` on first use.
    /// A failed attempt leaves the map unloaded; the next call tries again.
    pub fn load_nav_mesh(&self, map_id: u32) -> Result<Arc<NavMeshSlot<B::Mesh>>, MmapError> {
        let dir = self.dir()?;
        let cell = self
            .nav_meshes
            .get(map_id as usize)
            .ok_or(MmapError::MapIdOutOfRange(map_id))?;

        if let Some(slot) = cell.get() {
            return Ok(Arc::clone(slot));
        }

        let _guard = self.table_lock.lock();
        cell.get_or_try_init(|| self.create_nav_mesh(dir, map_id))
            .map(Arc::clone)
    }

    fn create_nav_mesh(&self, dir: &Path, map_id: u32) -> Result<Arc<NavMeshSlot<B::Mesh>>, MmapError> {
        let path = dir.join(mmap_file_name(map_id));
        let data = fs::read(&path).map_err(|source| MmapError::Io {
            path: path.clone(),
            source,
        })?;

        let len = data.len();
        let params = NavMeshParams::read(&mut ByteBuffer::from_vec(data)).map_err(|_| {
            MmapError::HeaderTooShort {
                path: path.clone(),
                len,
                needed: NavMeshParams::SIZE,
            }
        })?;

        let mesh = self.backend.create_nav_mesh(&params).map_err(|status| {
            error!("Map {}: failed to initialize navmesh: {}", map_id, status);
            MmapError::Detour {
                what: "navmesh params",
                status,
            }
        })?;

        info!(
            "Map {}: navmesh created (tile {}x{}, max tiles {})",
            map_id, params.tile_width, params.tile_height, params.max_tiles
        );
        Ok(Arc::new(NavMeshSlot::new(map_id, mesh)))
    }

    /// Add the 3x3 tile neighbourhood around `position` (mesh axis order).
    /// Bad tile files are logged and counted; the rest of the sweep goes on.
    pub fn load_tiles(&self, position: &[f32; 3], map_id: u32, slot: &NavMeshSlot<B::Mesh>) -> TileSweep {
        let mut sweep = TileSweep::default();
        let Ok(dir) = self.dir() else {
            return sweep;
        };

        let (tile_x, tile_y) = slot.mesh().calc_tile_loc(position);
        let tc_x = (CENTER_GRID_ID - position[2] / SIZE_OF_GRIDS) as i32;
        let tc_y = (CENTER_GRID_ID - position[0] / SIZE_OF_GRIDS) as i32;

        for row in -1..=1 {
            for col in -1..=1 {
                let (x, y) = (tile_x + row, tile_y + col);
                if slot.tile_exists_at(x, y) {
                    sweep.skipped += 1;
                    continue;
                }

                let _guard = slot.load_lock.lock();
                if slot.tile_exists_at(x, y) {
                    sweep.skipped += 1;
                    continue;
                }

                self.terrain.load_tile(tc_x, tc_y, map_id);

                // Grid files swap row and column relative to mesh tiles
                let (file_x, file_y) = (tc_x - col, tc_y - row);
                match self.add_tile_file(dir, map_id, file_x, file_y, slot) {
                    Ok(true) => sweep.added += 1,
                    Ok(false) => sweep.skipped += 1,
                    Err(e) => {
                        warn!("Map {} navmesh tile [{},{}]: {}", map_id, x, y, e);
                        sweep.failed += 1;
                    }
                }
            }
        }

        debug!(
            "Map {} tiles around [{},{}]: {} added, {} skipped, {} failed",
            map_id, tile_x, tile_y, sweep.added, sweep.skipped, sweep.failed
        );
        sweep
    }

    fn add_tile_file(
        &self,
        dir: &Path,
        map_id: u32,
        file_x: i32,
        file_y: i32,
        slot: &NavMeshSlot<B::Mesh>,
    ) -> Result<bool, MmapError> {
        let grids = 0..MAX_NUMBER_OF_GRIDS as i32;
        if !grids.contains(&file_x) || !grids.contains(&file_y) {
            return Ok(false);
        }

        let path = dir.join(mmtile_file_name(map_id, file_x as u32, file_y as u32));
        let Some(data) = read_tile_file(&path)? else {
            return Ok(false);
        };

        match slot.mesh.write().add_tile(data) {
            Ok(tile_ref) => {
                trace!("{} added as tile ref {:#x}", path.display(), tile_ref);
                Ok(true)
            }
            // The rejected buffer comes back to us and is dropped here
            Err((status, _data)) => Err(MmapError::Detour {
                what: "tile data",
                status,
            }),
        }
    }
}
