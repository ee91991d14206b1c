// detour.rs - capability surface of the navigation-mesh library
//
// Polygon search, corridor search and string pulling are provided by the
// mesh library (Detour). This module fixes the types that cross that
// boundary and the traits a binding has to implement; nothing here knows
// how a polygon is stored.

use std::fmt;
use std::io;

use mapnav_shared::util::ByteBuffer;

// ============================================================================
// Status codes
// ============================================================================

bitflags::bitflags! {
    /// Detour status word: high bits say failure/success, low bits carry detail.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DtStatus: u32 {
        const FAILURE = 1 << 31;
        const SUCCESS = 1 << 30;
        const IN_PROGRESS = 1 << 29;

        const WRONG_MAGIC = 1 << 0;
        const WRONG_VERSION = 1 << 1;
        const OUT_OF_MEMORY = 1 << 2;
        const INVALID_PARAM = 1 << 3;
        const BUFFER_TOO_SMALL = 1 << 4;
        const OUT_OF_NODES = 1 << 5;
        const PARTIAL_RESULT = 1 << 6;
        const ALREADY_OCCUPIED = 1 << 7;

        // Bindings may report detail bits this list does not name
        const _ = !0;
    }
}

impl DtStatus {
    pub fn failed(self) -> bool {
        self.contains(Self::FAILURE)
    }

    pub fn succeeded(self) -> bool {
        self.contains(Self::SUCCESS)
    }

    pub fn in_progress(self) -> bool {
        self.contains(Self::IN_PROGRESS)
    }

    /// Result was cut short: no full corridor, or an output buffer overflowed
    pub fn is_partial(self) -> bool {
        self.intersects(Self::PARTIAL_RESULT | Self::BUFFER_TOO_SMALL)
    }
}

impl fmt::Display for DtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const DETAILS: [(DtStatus, &str); 8] = [
            (DtStatus::WRONG_MAGIC, "wrong magic"),
            (DtStatus::WRONG_VERSION, "wrong version"),
            (DtStatus::OUT_OF_MEMORY, "out of memory"),
            (DtStatus::INVALID_PARAM, "invalid param"),
            (DtStatus::BUFFER_TOO_SMALL, "buffer too small"),
            (DtStatus::OUT_OF_NODES, "out of nodes"),
            (DtStatus::PARTIAL_RESULT, "partial result"),
            (DtStatus::ALREADY_OCCUPIED, "already occupied"),
        ];

        let head = if self.failed() {
            "failure"
        } else if self.in_progress() {
            "in progress"
        } else if self.succeeded() {
            "success"
        } else {
            "unknown"
        };
        write!(f, "{}", head)?;
        for (flag, name) in DETAILS {
            if self.contains(flag) {
                write!(f, ", {}", name)?;
            }
        }
        Ok(())
    }
}

// ============================================================================
// References and owned data
// ============================================================================

/// Polygon reference; 0 is the null reference
pub type PolyRef = u64;
/// Tile reference; 0 is the null reference
pub type TileRef = u64;

/// Payload of one .mmtile file. Ownership moves into the mesh on a
/// successful `add_tile`; a rejected tile hands the buffer back.
#[derive(Clone, PartialEq, Eq)]
pub struct TileData {
    bytes: Vec<u8>,
}

impl TileData {
    pub fn new(bytes: Vec<u8>) -> Self {
        TileData { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }
}

impl fmt::Debug for TileData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TileData({} bytes)", self.bytes.len())
    }
}

/// dtNavMeshParams as stored in `{map:03}.mmap`
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NavMeshParams {
    pub orig: [f32; 3],
    pub tile_width: f32,
    pub tile_height: f32,
    pub max_tiles: i32,
    pub max_polys: i32,
}

impl NavMeshParams {
    /// orig[3], tileWidth, tileHeight, maxTiles, maxPolys
    pub const SIZE: usize = 7 * 4;

    pub fn read(buf: &mut ByteBuffer) -> io::Result<Self> {
        let orig = [buf.read_f32()?, buf.read_f32()?, buf.read_f32()?];
        Ok(NavMeshParams {
            orig,
            tile_width: buf.read_f32()?,
            tile_height: buf.read_f32()?,
            max_tiles: buf.read_i32()?,
            max_polys: buf.read_i32()?,
        })
    }

    pub fn write(&self, buf: &mut ByteBuffer) {
        for v in self.orig {
            buf.write_f32(v);
        }
        buf.write_f32(self.tile_width);
        buf.write_f32(self.tile_height);
        buf.write_i32(self.max_tiles);
        buf.write_i32(self.max_polys);
    }
}

// ============================================================================
// Capabilities
// ============================================================================

/// Creates empty meshes from header parameters.
pub trait NavMeshBackend: Send + Sync {
    type Mesh: DetourNavMesh;

    fn create_nav_mesh(&self, params: &NavMeshParams) -> Result<Self::Mesh, DtStatus>;
}

/// One initialized navigation mesh plus the queries run against it.
/// All positions are in mesh axis order (y, z, x).
pub trait DetourNavMesh: Send + Sync {
    /// Tile column/row containing `pos`
    fn calc_tile_loc(&self, pos: &[f32; 3]) -> (i32, i32);

    fn tile_exists_at(&self, x: i32, y: i32) -> bool;

    fn add_tile(&mut self, data: TileData) -> Result<TileRef, (DtStatus, TileData)>;

    /// Nearest polygon to `center` inside the box `center ± extents`.
    /// Success with a null reference means nothing was in range.
    fn find_nearest_poly(&self, center: &[f32; 3], extents: &[f32; 3]) -> (DtStatus, PolyRef);

    /// Polygon corridor from `start_ref` to `end_ref`, at most `max_path` long
    fn find_path(
        &self,
        start_ref: PolyRef,
        end_ref: PolyRef,
        start: &[f32; 3],
        end: &[f32; 3],
        max_path: usize,
    ) -> (DtStatus, Vec<PolyRef>);

    /// String-pulled corner points along `path`, at most `max_points`
    fn find_straight_path(
        &self,
        start: &[f32; 3],
        end: &[f32; 3],
        path: &[PolyRef],
        max_points: usize,
    ) -> (DtStatus, Vec<[f32; 3]>);
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_helpers() {
        assert!(DtStatus::FAILURE.failed());
        assert!(!DtStatus::FAILURE.succeeded());
        assert!(DtStatus::SUCCESS.succeeded());
        assert!(!DtStatus::SUCCESS.is_partial());

        let partial = DtStatus::SUCCESS | DtStatus::PARTIAL_RESULT;
        assert!(partial.succeeded() && partial.is_partial());
        let truncated = DtStatus::SUCCESS | DtStatus::BUFFER_TOO_SMALL;
        assert!(truncated.is_partial());
        assert!(!(DtStatus::SUCCESS | DtStatus::OUT_OF_NODES).is_partial());

        assert_eq!(
            (DtStatus::FAILURE | DtStatus::WRONG_MAGIC).to_string(),
            "failure, wrong magic"
        );
        assert_eq!(partial.to_string(), "success, partial result");

        // Unnamed detail bits from a binding survive the round trip
        let raw = DtStatus::from_bits_retain((1 << 30) | (1 << 12));
        assert!(raw.succeeded());
        assert_eq!(raw.bits(), 0x4000_1000);
        assert!(!raw.is_partial());
        assert_eq!(DtStatus::default(), DtStatus::empty());
    }

    #[test]
    fn test_params_round_trip() {
        let params = NavMeshParams {
            orig: [-17066.666, 0.0, -17066.666],
            tile_width: 533.3333,
            tile_height: 533.3333,
            max_tiles: 4096,
            max_polys: 1 << 15,
        };
        let mut buf = ByteBuffer::new();
        params.write(&mut buf);
        assert_eq!(buf.size(), NavMeshParams::SIZE);

        let mut buf = ByteBuffer::from_vec(buf.into_inner());
        assert_eq!(NavMeshParams::read(&mut buf).unwrap(), params);

        let mut short = ByteBuffer::from_vec(vec![0; NavMeshParams::SIZE - 1]);
        assert!(NavMeshParams::read(&mut short).is_err());
    }

    #[test]
    fn test_tile_data_ownership() {
        let data = TileData::new(vec![1, 2, 3]);
        assert_eq!(data.len(), 3);
        assert!(!data.is_empty());
        assert_eq!(format!("{:?}", data), "TileData(3 bytes)");
        assert_eq!(data.into_vec(), vec![1, 2, 3]);
    }
}
