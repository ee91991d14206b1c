// grid_map.rs - one terrain tile (.map file)
// Decodes the area/height/liquid sections written by the map extractor and
// answers point queries against them.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use mapnav_shared::util::ByteBuffer;
use tracing::{debug, trace};

use crate::error::MapError;

// ============================================================================
// Grid geometry
// ============================================================================

pub const MAX_NUMBER_OF_GRIDS: usize = 64;
/// Edge length of one tile in world units
pub const SIZE_OF_GRIDS: f32 = 533.3333;
pub const CENTER_GRID_ID: f32 = (MAX_NUMBER_OF_GRIDS / 2) as f32;
/// Height cells per tile edge
pub const MAP_RESOLUTION: i32 = 128;
pub const INVALID_HEIGHT: f32 = -100000.0;

/// Area and liquid-type cells per tile edge
const AREA_CELLS: usize = 16;
const AREA_CELLS_SQ: usize = AREA_CELLS * AREA_CELLS;

const V9_SIZE: usize = 129;
const V9_SIZE_SQ: usize = V9_SIZE * V9_SIZE;
const V8_SIZE: usize = 128;
const V8_SIZE_SQ: usize = V8_SIZE * V8_SIZE;

const FLIGHT_BOUNDS_LEN: usize = 3 * 3;

// ============================================================================
// File format
// ============================================================================

pub const MAP_MAGIC: u32 = u32::from_le_bytes(*b"MAPS");
pub const MAP_VERSION_MAGIC: u32 = u32::from_le_bytes(*b"v1.8");
pub const MAP_AREA_MAGIC: u32 = u32::from_le_bytes(*b"AREA");
pub const MAP_HEIGHT_MAGIC: u32 = u32::from_le_bytes(*b"MHGT");
pub const MAP_LIQUID_MAGIC: u32 = u32::from_le_bytes(*b"MLIQ");

pub const MAP_AREA_NO_AREA: u16 = 0x0001;

pub const MAP_HEIGHT_NO_HEIGHT: u32 = 0x0001;
pub const MAP_HEIGHT_AS_INT16: u32 = 0x0002;
pub const MAP_HEIGHT_AS_INT8: u32 = 0x0004;
pub const MAP_HEIGHT_HAS_FLIGHT_BOUNDS: u32 = 0x0008;

pub const MAP_LIQUID_NO_TYPE: u16 = 0x0001;
pub const MAP_LIQUID_NO_HEIGHT: u16 = 0x0002;

/// Size of map_fileheader: three magics and four (offset, size) pairs
pub const MAP_FILE_HEADER_SIZE: usize = 3 * 4 + 4 * 8;

struct MapFileHeader {
    map_magic: u32,
    version_magic: u32,
    area_map_offset: u32,
    height_map_offset: u32,
    liquid_map_offset: u32,
}

impl MapFileHeader {
    fn read(buf: &mut ByteBuffer) -> io::Result<Self> {
        let map_magic = buf.read_u32()?;
        let version_magic = buf.read_u32()?;
        let _build_magic = buf.read_u32()?;
        let area_map_offset = buf.read_u32()?;
        let _area_map_size = buf.read_u32()?;
        let height_map_offset = buf.read_u32()?;
        let _height_map_size = buf.read_u32()?;
        let liquid_map_offset = buf.read_u32()?;
        let _liquid_map_size = buf.read_u32()?;
        let _holes_offset = buf.read_u32()?;
        let _holes_size = buf.read_u32()?;
        Ok(MapFileHeader {
            map_magic,
            version_magic,
            area_map_offset,
            height_map_offset,
            liquid_map_offset,
        })
    }
}

// ============================================================================
// Liquid status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZLiquidStatus {
    NoWater,
    AboveWater,
    WaterWalk,
    InWater,
    UnderWater,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiquidData {
    pub type_flags: u32,
    pub entry: u32,
    pub level: f32,
    pub depth_level: f32,
}

// ============================================================================
// Height storage
// ============================================================================

/// Which interpolation a tile answers height queries with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeightMode {
    Flat,
    Float,
    Int8,
    Int16,
}

enum HeightData {
    Flat,
    Float {
        v9: Box<[f32]>,
        v8: Box<[f32]>,
    },
    Int8 {
        v9: Box<[u8]>,
        v8: Box<[u8]>,
        multiplier: f32,
    },
    Int16 {
        v9: Box<[u16]>,
        v8: Box<[u16]>,
        multiplier: f32,
    },
}

/// Local cell of (x, y) inside its tile: integer cell indices in 0..128
/// plus the fractional position inside that cell.
fn height_cell(x: f32, y: f32) -> (usize, usize, f32, f32) {
    let x = MAP_RESOLUTION as f32 * (CENTER_GRID_ID - x / SIZE_OF_GRIDS);
    let y = MAP_RESOLUTION as f32 * (CENTER_GRID_ID - y / SIZE_OF_GRIDS);

    let x_int = x as i32;
    let y_int = y as i32;
    let fx = x - x_int as f32;
    let fy = y - y_int as f32;
    (
        (x_int & (MAP_RESOLUTION - 1)) as usize,
        (y_int & (MAP_RESOLUTION - 1)) as usize,
        fx,
        fy,
    )
}

fn area_cell(x: f32, y: f32) -> usize {
    let lx = (AREA_CELLS as f32 * (CENTER_GRID_ID - x / SIZE_OF_GRIDS)) as i32;
    let ly = (AREA_CELLS as f32 * (CENTER_GRID_ID - y / SIZE_OF_GRIDS)) as i32;
    let mask = AREA_CELLS as i32 - 1;
    ((lx & mask) as usize) * AREA_CELLS + (ly & mask) as usize
}

// Height stored as: h5 - its v8 grid, h1-h4 - its v9 grid
// +--------------> X
// | h1-------h2     Coordinates is:
// | | \  1  / |     h1 0, 0
// | |  \   /  |     h2 0, 1
// | | 2  h5 3 |     h3 1, 0
// | |  /   \  |     h4 1, 1
// | | /  4  \ |     h5 1/2, 1/2
// | h3-------h4
// V Y
// Pick the triangle, then solve h = a*x + b*y + c from its three points.

fn interpolate_float(v9: &[f32], v8: &[f32], x: f32, y: f32) -> f32 {
    let (x_int, y_int, x, y) = height_cell(x, y);
    let h1_idx = x_int * V9_SIZE + y_int;
    let h5 = 2.0 * v8[x_int * V8_SIZE + y_int];

    let (a, b, c) = if x + y < 1.0 {
        if x > y {
            // 1 triangle (h1, h2, h5 points)
            let h1 = v9[h1_idx];
            let h2 = v9[h1_idx + V9_SIZE];
            (h2 - h1, h5 - h1 - h2, h1)
        } else {
            // 2 triangle (h1, h3, h5 points)
            let h1 = v9[h1_idx];
            let h3 = v9[h1_idx + 1];
            (h5 - h1 - h3, h3 - h1, h1)
        }
    } else if x > y {
        // 3 triangle (h2, h4, h5 points)
        let h2 = v9[h1_idx + V9_SIZE];
        let h4 = v9[h1_idx + V9_SIZE + 1];
        (h2 + h4 - h5, h4 - h2, h5 - h4)
    } else {
        // 4 triangle (h3, h4, h5 points)
        let h3 = v9[h1_idx + 1];
        let h4 = v9[h1_idx + V9_SIZE + 1];
        (h4 - h3, h3 + h4 - h5, h5 - h4)
    };

    a * x + b * y + c
}

/// Quantized variant: coefficients are solved in integers, only the final
/// combination with the fractional position is done in floating point.
fn interpolate_quantized<T>(v9: &[T], v8: &[T], x: f32, y: f32) -> f32
where
    T: Copy + Into<i32>,
{
    let (x_int, y_int, x, y) = height_cell(x, y);
    let h1_idx = x_int * V9_SIZE + y_int;
    let center: i32 = v8[x_int * V8_SIZE + y_int].into();
    let h5 = 2 * center;

    let (a, b, c): (i32, i32, i32) = if x + y < 1.0 {
        if x > y {
            let h1: i32 = v9[h1_idx].into();
            let h2: i32 = v9[h1_idx + V9_SIZE].into();
            (h2 - h1, h5 - h1 - h2, h1)
        } else {
            let h1: i32 = v9[h1_idx].into();
            let h3: i32 = v9[h1_idx + 1].into();
            (h5 - h1 - h3, h3 - h1, h1)
        }
    } else if x > y {
        let h2: i32 = v9[h1_idx + V9_SIZE].into();
        let h4: i32 = v9[h1_idx + V9_SIZE + 1].into();
        (h2 + h4 - h5, h4 - h2, h5 - h4)
    } else {
        let h3: i32 = v9[h1_idx + 1].into();
        let h4: i32 = v9[h1_idx + V9_SIZE + 1].into();
        (h4 - h3, h3 + h4 - h5, h5 - h4)
    };

    (a as f32 * x) + (b as f32 * y) + c as f32
}

// ============================================================================
// GridMap
// ============================================================================

/// One loaded terrain tile. Immutable once constructed.
pub struct GridMap {
    // Height level data
    grid_height: f32,
    heights: HeightData,
    max_height: Option<Box<[i16; FLIGHT_BOUNDS_LEN]>>,
    min_height: Option<Box<[i16; FLIGHT_BOUNDS_LEN]>>,

    // Area data
    grid_area: u16,
    area_map: Option<Box<[u16]>>,

    // Liquid data
    liquid_type: u16,
    liquid_off_x: u8,
    liquid_off_y: u8,
    liquid_width: u8,
    liquid_height: u8,
    liquid_level: f32,
    liquid_entry: Option<Box<[u16]>>,
    liquid_flags: Option<Box<[u8]>>,
    liquid_map: Option<Box<[f32]>>,
}

impl Default for GridMap {
    fn default() -> Self {
        GridMap {
            grid_height: INVALID_HEIGHT,
            heights: HeightData::Flat,
            max_height: None,
            min_height: None,
            grid_area: 0,
            area_map: None,
            liquid_type: 0,
            liquid_off_x: 0,
            liquid_off_y: 0,
            liquid_width: 0,
            liquid_height: 0,
            liquid_level: INVALID_HEIGHT,
            liquid_entry: None,
            liquid_flags: None,
            liquid_map: None,
        }
    }
}

impl fmt::Debug for GridMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GridMap")
            .field("height_mode", &self.height_mode())
            .field("grid_height", &self.grid_height)
            .field("grid_area", &self.grid_area)
            .field("has_area_map", &self.area_map.is_some())
            .field("liquid_type", &self.liquid_type)
            .field("has_liquid_map", &self.liquid_map.is_some())
            .finish()
    }
}

impl GridMap {
    /// Load a tile file. A missing file is not an error and yields an empty
    /// tile; anything present but malformed is.
    pub fn load(path: &Path) -> Result<GridMap, MapError> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                trace!("{} not found, using empty tile", path.display());
                return Ok(GridMap::default());
            }
            Err(source) => {
                return Err(MapError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let grid = GridMap::from_bytes(data)?;
        debug!("Loaded {} ({:?})", path.display(), grid);
        Ok(grid)
    }

    /// Decode a whole .map file already held in memory
    pub fn from_bytes(data: Vec<u8>) -> Result<GridMap, MapError> {
        let mut buf = ByteBuffer::from_vec(data);
        let header = MapFileHeader::read(&mut buf).map_err(MapError::truncated("file header"))?;

        MapError::check_magic("map", MAP_MAGIC, header.map_magic)?;
        MapError::check_magic("map version", MAP_VERSION_MAGIC, header.version_magic)?;

        let mut grid = GridMap::default();
        if header.area_map_offset != 0 {
            grid.load_area_data(&mut buf, header.area_map_offset)?;
        }
        if header.height_map_offset != 0 {
            grid.load_height_data(&mut buf, header.height_map_offset)?;
        }
        if header.liquid_map_offset != 0 {
            grid.load_liquid_data(&mut buf, header.liquid_map_offset)?;
        }
        Ok(grid)
    }

    fn load_area_data(&mut self, buf: &mut ByteBuffer, offset: u32) -> Result<(), MapError> {
        let truncated = MapError::truncated("area");
        buf.set_read_pos(offset as usize);

        let fourcc = buf.read_u32().map_err(truncated)?;
        MapError::check_magic("area", MAP_AREA_MAGIC, fourcc)?;
        let flags = buf.read_u16().map_err(truncated)?;
        self.grid_area = buf.read_u16().map_err(truncated)?;

        if flags & MAP_AREA_NO_AREA == 0 {
            let area = buf.read_u16_vec(AREA_CELLS_SQ).map_err(truncated)?;
            self.area_map = Some(area.into_boxed_slice());
        }
        Ok(())
    }

    fn load_height_data(&mut self, buf: &mut ByteBuffer, offset: u32) -> Result<(), MapError> {
        let truncated = MapError::truncated("height");
        buf.set_read_pos(offset as usize);

        let fourcc = buf.read_u32().map_err(truncated)?;
        MapError::check_magic("height", MAP_HEIGHT_MAGIC, fourcc)?;
        let flags = buf.read_u32().map_err(truncated)?;
        let grid_height = buf.read_f32().map_err(truncated)?;
        let grid_max_height = buf.read_f32().map_err(truncated)?;

        self.grid_height = grid_height;
        self.heights = if flags & MAP_HEIGHT_NO_HEIGHT != 0 {
            HeightData::Flat
        } else if flags & MAP_HEIGHT_AS_INT16 != 0 {
            let v9 = buf.read_u16_vec(V9_SIZE_SQ).map_err(truncated)?;
            let v8 = buf.read_u16_vec(V8_SIZE_SQ).map_err(truncated)?;
            HeightData::Int16 {
                v9: v9.into_boxed_slice(),
                v8: v8.into_boxed_slice(),
                multiplier: (grid_max_height - grid_height) / 65535.0,
            }
        } else if flags & MAP_HEIGHT_AS_INT8 != 0 {
            let v9 = buf.read_bytes(V9_SIZE_SQ).map_err(truncated)?;
            let v8 = buf.read_bytes(V8_SIZE_SQ).map_err(truncated)?;
            HeightData::Int8 {
                v9: v9.into_boxed_slice(),
                v8: v8.into_boxed_slice(),
                multiplier: (grid_max_height - grid_height) / 255.0,
            }
        } else {
            let v9 = buf.read_f32_vec(V9_SIZE_SQ).map_err(truncated)?;
            let v8 = buf.read_f32_vec(V8_SIZE_SQ).map_err(truncated)?;
            HeightData::Float {
                v9: v9.into_boxed_slice(),
                v8: v8.into_boxed_slice(),
            }
        };

        if flags & MAP_HEIGHT_HAS_FLIGHT_BOUNDS != 0 {
            let read_bounds = |buf: &mut ByteBuffer| -> Result<Box<[i16; FLIGHT_BOUNDS_LEN]>, MapError> {
                let values = buf.read_i16_vec(FLIGHT_BOUNDS_LEN).map_err(truncated)?;
                let mut bounds = [0i16; FLIGHT_BOUNDS_LEN];
                bounds.copy_from_slice(&values);
                Ok(Box::new(bounds))
            };
            self.max_height = Some(read_bounds(buf)?);
            self.min_height = Some(read_bounds(buf)?);
        }
        Ok(())
    }

    fn load_liquid_data(&mut self, buf: &mut ByteBuffer, offset: u32) -> Result<(), MapError> {
        let truncated = MapError::truncated("liquid");
        buf.set_read_pos(offset as usize);

        let fourcc = buf.read_u32().map_err(truncated)?;
        MapError::check_magic("liquid", MAP_LIQUID_MAGIC, fourcc)?;
        let flags = buf.read_u16().map_err(truncated)?;
        self.liquid_type = buf.read_u16().map_err(truncated)?;
        self.liquid_off_x = buf.read_u8().map_err(truncated)?;
        self.liquid_off_y = buf.read_u8().map_err(truncated)?;
        self.liquid_width = buf.read_u8().map_err(truncated)?;
        self.liquid_height = buf.read_u8().map_err(truncated)?;
        self.liquid_level = buf.read_f32().map_err(truncated)?;

        if flags & MAP_LIQUID_NO_TYPE == 0 {
            let entry = buf.read_u16_vec(AREA_CELLS_SQ).map_err(truncated)?;
            let type_flags = buf.read_bytes(AREA_CELLS_SQ).map_err(truncated)?;
            self.liquid_entry = Some(entry.into_boxed_slice());
            self.liquid_flags = Some(type_flags.into_boxed_slice());
        }
        if flags & MAP_LIQUID_NO_HEIGHT == 0 {
            let count = self.liquid_width as usize * self.liquid_height as usize;
            let levels = buf.read_f32_vec(count).map_err(truncated)?;
            self.liquid_map = Some(levels.into_boxed_slice());
        }
        Ok(())
    }

    pub fn height_mode(&self) -> HeightMode {
        match self.heights {
            HeightData::Flat => HeightMode::Flat,
            HeightData::Float { .. } => HeightMode::Float,
            HeightData::Int8 { .. } => HeightMode::Int8,
            HeightData::Int16 { .. } => HeightMode::Int16,
        }
    }

    /// Uniform base height of the tile
    pub fn grid_height(&self) -> f32 {
        self.grid_height
    }

    /// Terrain height at world (x, y). Only meaningful for the tile covering (x, y).
    pub fn get_height(&self, x: f32, y: f32) -> f32 {
        match &self.heights {
            HeightData::Flat => self.grid_height,
            HeightData::Float { v9, v8 } => interpolate_float(v9, v8, x, y),
            HeightData::Int8 { v9, v8, multiplier } => {
                interpolate_quantized(v9, v8, x, y) * multiplier + self.grid_height
            }
            HeightData::Int16 { v9, v8, multiplier } => {
                interpolate_quantized(v9, v8, x, y) * multiplier + self.grid_height
            }
        }
    }

    /// Per-tile flight ceiling and floor samples (3x3 each), when present
    pub fn flight_bounds(&self) -> Option<(&[i16; FLIGHT_BOUNDS_LEN], &[i16; FLIGHT_BOUNDS_LEN])> {
        match (&self.max_height, &self.min_height) {
            (Some(max), Some(min)) => Some((max.as_ref(), min.as_ref())),
            _ => None,
        }
    }

    pub fn get_area(&self, x: f32, y: f32) -> u16 {
        match &self.area_map {
            Some(area) => area[area_cell(x, y)],
            None => self.grid_area,
        }
    }

    /// World (x, y) of the center of the first area cell holding `area_id`.
    /// `grid_x`/`grid_y` are this tile's coordinates in the map.
    pub fn get_xy_from_area(&self, area_id: u16, grid_x: u32, grid_y: u32) -> Option<(f32, f32)> {
        let area = self.area_map.as_ref()?;
        let index = area.iter().position(|&id| id == area_id)?;

        let lx = (index / AREA_CELLS) as u32 + grid_x * AREA_CELLS as u32;
        let ly = (index % AREA_CELLS) as u32 + grid_y * AREA_CELLS as u32;
        let x = SIZE_OF_GRIDS * (CENTER_GRID_ID - (lx as f32 + 0.5) / AREA_CELLS as f32);
        let y = SIZE_OF_GRIDS * (CENTER_GRID_ID - (ly as f32 + 0.5) / AREA_CELLS as f32);
        Some((x, y))
    }

    /// Offset of (x, y) inside the liquid level map, if it falls within it
    fn liquid_cell(&self, x: f32, y: f32) -> Option<usize> {
        let (x_int, y_int, _, _) = height_cell(x, y);
        let cx = x_int as i32 - self.liquid_off_y as i32;
        let cy = y_int as i32 - self.liquid_off_x as i32;
        if cx < 0 || cx >= self.liquid_height as i32 || cy < 0 || cy >= self.liquid_width as i32 {
            return None;
        }
        Some(cx as usize * self.liquid_width as usize + cy as usize)
    }

    pub fn get_liquid_level(&self, x: f32, y: f32) -> f32 {
        let Some(levels) = &self.liquid_map else {
            return self.liquid_level;
        };
        self.liquid_cell(x, y)
            .map_or(INVALID_HEIGHT, |cell| levels[cell])
    }

    /// Liquid type flags of the 16x16 cell containing (x, y)
    pub fn get_terrain_type(&self, x: f32, y: f32) -> u8 {
        self.liquid_flags
            .as_ref()
            .map_or(0, |flags| flags[area_cell(x, y)])
    }

    /// Classify z against the liquid surface at (x, y). `req_type` is a mask
    /// of acceptable liquid type flags; 0 accepts any liquid.
    pub fn get_liquid_status(
        &self,
        x: f32,
        y: f32,
        z: f32,
        req_type: u8,
    ) -> (ZLiquidStatus, Option<LiquidData>) {
        let no_water = (ZLiquidStatus::NoWater, None);
        if self.liquid_type == 0 && self.liquid_flags.is_none() {
            return no_water;
        }

        let (x_int, y_int, _, _) = height_cell(x, y);
        let idx = (x_int >> 3) * AREA_CELLS + (y_int >> 3);
        let liquid_type = match &self.liquid_flags {
            Some(flags) => flags[idx],
            None => self.liquid_type as u8,
        };
        let entry = self
            .liquid_entry
            .as_ref()
            .map_or(0, |entries| entries[idx] as u32);

        if liquid_type == 0 || (req_type != 0 && req_type & liquid_type == 0) {
            return no_water;
        }

        let Some(cell) = self.liquid_cell(x, y) else {
            return no_water;
        };
        let liquid_level = self
            .liquid_map
            .as_ref()
            .map_or(self.liquid_level, |levels| levels[cell]);
        let ground_level = self.get_height(x, y);

        if liquid_level < ground_level || z < ground_level - 2.0 {
            return no_water;
        }

        let data = LiquidData {
            type_flags: liquid_type as u32,
            entry,
            level: liquid_level,
            depth_level: ground_level,
        };

        let delta = liquid_level - z;
        let status = if delta > 2.0 {
            ZLiquidStatus::UnderWater
        } else if delta > 0.0 {
            ZLiquidStatus::InWater
        } else if delta > -0.1 {
            ZLiquidStatus::WaterWalk
        } else {
            ZLiquidStatus::AboveWater
        };
        (status, Some(data))
    }
}

// ============================================================================
// Tile file writer (test fixtures)
// ============================================================================
