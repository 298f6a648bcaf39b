//! Fixed-size square chunks of tiles.

use crate::error::MapError;
use protocol::{Tile, TilePoint};
use serde::{Deserialize, Serialize};

/// Tiles per sector side.
pub const SECTOR_SIZE: i32 = 20;
const TILES_PER_SECTOR: usize = (SECTOR_SIZE * SECTOR_SIZE) as usize;

/// Sector coordinate within a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SectorCoord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl SectorCoord {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The sector containing an in-bounds tile.
    pub fn of(loc: &TilePoint) -> Self {
        Self {
            x: loc.x.div_euclid(SECTOR_SIZE),
            y: loc.y.div_euclid(SECTOR_SIZE),
            z: loc.z,
        }
    }

    /// Top-left tile of this sector. Saturates for coordinates past the
    /// edge of any map.
    pub fn origin(&self, w: u32) -> TilePoint {
        TilePoint::new(w, self.x.saturating_mul(SECTOR_SIZE), self.y.saturating_mul(SECTOR_SIZE), self.z)
    }
}

impl std::fmt::Display for SectorCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{},{}", self.x, self.y, self.z)
    }
}

/// Row-major tile storage for one sector.
#[derive(Debug, Clone, PartialEq)]
pub struct Sector {
    tiles: Vec<Tile>,
}

impl Sector {
    /// All floor 0, no items. Also the placeholder shape while a load is pending.
    pub fn blank() -> Self {
        Self {
            tiles: vec![Tile::default(); TILES_PER_SECTOR],
        }
    }

    pub fn from_tiles(tiles: Vec<Tile>) -> Result<Self, MapError> {
        if tiles.len() != TILES_PER_SECTOR {
            return Err(MapError::SectorSize {
                expected: TILES_PER_SECTOR,
                got: tiles.len(),
            });
        }
        Ok(Self { tiles })
    }

    fn index(loc: &TilePoint) -> usize {
        let lx = loc.x.rem_euclid(SECTOR_SIZE);
        let ly = loc.y.rem_euclid(SECTOR_SIZE);
        (ly * SECTOR_SIZE + lx) as usize
    }

    pub fn tile(&self, loc: &TilePoint) -> &Tile {
        &self.tiles[Self::index(loc)]
    }

    pub fn tile_mut(&mut self, loc: &TilePoint) -> &mut Tile {
        &mut self.tiles[Self::index(loc)]
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub fn tiles_mut(&mut self) -> &mut [Tile] {
        &mut self.tiles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sector_coord_of() {
        assert_eq!(SectorCoord::of(&TilePoint::new(0, 0, 0, 0)), SectorCoord::new(0, 0, 0));
        assert_eq!(SectorCoord::of(&TilePoint::new(0, 19, 20, 1)), SectorCoord::new(0, 1, 1));
        assert_eq!(SectorCoord::new(2, 3, 0).origin(1), TilePoint::new(1, 40, 60, 0));
        assert_eq!(SectorCoord::new(214_748_365, 0, 0).origin(0).x, i32::MAX);
    }

    #[test]
    fn test_local_indexing_is_row_major() {
        let mut sector = Sector::blank();
        sector.tile_mut(&TilePoint::new(0, 21, 40, 0)).floor = 7;
        assert_eq!(sector.tiles()[1].floor, 7);
        sector.tile_mut(&TilePoint::new(0, 0, 1, 0)).floor = 9;
        assert_eq!(sector.tiles()[SECTOR_SIZE as usize].floor, 9);
    }

    #[test]
    fn test_from_tiles_checks_size() {
        assert!(Sector::from_tiles(vec![Tile::default(); 3]).is_err());
        assert!(Sector::from_tiles(vec![Tile::default(); TILES_PER_SECTOR]).is_ok());
    }
}
