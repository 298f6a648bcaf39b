//! SpatialStore: partitions of lazily loaded sectors plus creature occupancy.
//!
//! Reads are synchronous. Addressing a sector for the first time installs an
//! empty placeholder and starts its load; the real data replaces the
//! placeholder once [`WorldMap::poll_loads`] sees the load finish, or as soon
//! as someone awaits [`WorldMap::ensure_sector_loaded`].

pub mod nearest;
pub mod partition;
pub mod sector;

pub use partition::{FailedLoad, Partition, RetryPolicy, SectorLoad};
pub use sector::{SECTOR_SIZE, Sector, SectorCoord};

use crate::content::Content;
use crate::error::MapError;
use crate::persistence::Store;
use protocol::{CreatureId, Item, Tile, TilePoint};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

static VOID_TILE: Tile = Tile::with_floor(0);

/// Partial tile update; `None` leaves the field unchanged.
#[derive(Debug, Clone, Default)]
pub struct TilePatch {
    pub floor: Option<u32>,
    pub item: Option<Option<Item>>,
}

/// A failed load, tagged with its partition.
#[derive(Debug, Clone)]
pub struct LoadFailure {
    pub w: u32,
    pub failure: FailedLoad,
}

pub struct WorldMap {
    partitions: BTreeMap<u32, Partition>,
    store: Option<Arc<dyn Store>>,
    occupants: HashMap<TilePoint, CreatureId>,
    retry: RetryPolicy,
    tick: u64,
}

impl WorldMap {
    /// Without a store every sector starts out blank and resident.
    pub fn new(store: Option<Arc<dyn Store>>, retry: RetryPolicy) -> Self {
        Self {
            partitions: BTreeMap::new(),
            store,
            occupants: HashMap::new(),
            retry,
            tick: 0,
        }
    }

    pub fn add_partition(&mut self, w: u32, width: i32, height: i32, depth: i32) {
        self.partitions.insert(w, Partition::new(w, width, height, depth));
    }

    pub fn partition(&self, w: u32) -> Option<&Partition> {
        self.partitions.get(&w)
    }

    pub fn partitions(&self) -> impl Iterator<Item = (u32, &Partition)> {
        self.partitions.iter().map(|(w, p)| (*w, p))
    }

    pub fn partition_mut(&mut self, w: u32) -> Result<&mut Partition, MapError> {
        self.partitions.get_mut(&w).ok_or(MapError::UnknownPartition(w))
    }

    pub fn in_bounds(&self, loc: &TilePoint) -> bool {
        self.partitions.get(&loc.w).is_some_and(|p| p.in_bounds(loc))
    }

    fn check_bounds(&self, loc: &TilePoint) -> Result<(), MapError> {
        if self.in_bounds(loc) {
            Ok(())
        } else {
            Err(MapError::OutOfBounds(*loc))
        }
    }

    /// The tile at `loc`, or a void tile when out of bounds.
    pub fn tile(&mut self, loc: &TilePoint) -> &Tile {
        if !self.in_bounds(loc) {
            return &VOID_TILE;
        }
        let store = self.store.as_ref();
        match self.partitions.get_mut(&loc.w) {
            Some(partition) => partition.tile(loc, store),
            None => &VOID_TILE,
        }
    }

    /// Like [`tile`](Self::tile) but never creates placeholders.
    pub fn peek_tile(&self, loc: &TilePoint) -> Option<&Tile> {
        let partition = self.partitions.get(&loc.w)?;
        if !partition.in_bounds(loc) {
            return None;
        }
        partition.peek_tile(loc)
    }

    pub fn item(&mut self, loc: &TilePoint) -> Option<&Item> {
        self.tile(loc).item.as_ref()
    }

    /// Mutable tile access. The caller emits the matching broadcast.
    pub fn tile_mut(&mut self, loc: &TilePoint) -> Result<&mut Tile, MapError> {
        self.check_bounds(loc)?;
        let store = self.store.as_ref();
        let partition = self
            .partitions
            .get_mut(&loc.w)
            .ok_or(MapError::UnknownPartition(loc.w))?;
        Ok(partition.tile_mut(loc, store))
    }

    pub fn set_floor(&mut self, loc: &TilePoint, floor: u32) -> Result<(), MapError> {
        self.tile_mut(loc)?.floor = floor;
        Ok(())
    }

    /// Replace the item on a tile, returning what was there.
    pub fn set_item(&mut self, loc: &TilePoint, item: Option<Item>) -> Result<Option<Item>, MapError> {
        let tile = self.tile_mut(loc)?;
        Ok(std::mem::replace(&mut tile.item, item))
    }

    pub fn set_tile(&mut self, loc: &TilePoint, patch: TilePatch) -> Result<(), MapError> {
        let tile = self.tile_mut(loc)?;
        if let Some(floor) = patch.floor {
            tile.floor = floor;
        }
        if let Some(item) = patch.item {
            tile.item = item;
        }
        Ok(())
    }

    pub fn occupant(&self, loc: &TilePoint) -> Option<CreatureId> {
        self.occupants.get(loc).copied()
    }

    /// Record `id` as standing on `loc`. Fails if another creature is there.
    pub fn claim(&mut self, loc: TilePoint, id: CreatureId) -> bool {
        match self.occupants.get(&loc) {
            Some(&other) if other != id => false,
            _ => {
                self.occupants.insert(loc, id);
                true
            }
        }
    }

    pub fn release(&mut self, loc: &TilePoint, id: CreatureId) {
        if self.occupants.get(loc) == Some(&id) {
            self.occupants.remove(loc);
        }
    }

    /// Rebuild the occupancy index from authoritative creature positions.
    pub fn sync_occupants(&mut self, positions: impl IntoIterator<Item = (CreatureId, TilePoint)>) {
        self.occupants.clear();
        for (id, loc) in positions {
            self.occupants.entry(loc).or_insert(id);
        }
    }

    /// False when out of bounds, occupied by a creature, or holding a
    /// non-walkable item. Placeholder tiles are walkable.
    pub fn walkable(&mut self, loc: &TilePoint, content: &Content) -> bool {
        if !self.in_bounds(loc) || self.occupants.contains_key(loc) {
            return false;
        }
        match &self.tile(loc).item {
            Some(item) => content.item(item.kind).walkable,
            None => true,
        }
    }

    /// [`walkable`](Self::walkable) after the owning sector has really loaded.
    pub async fn walkable_async(&mut self, loc: &TilePoint, content: &Content) -> bool {
        if !self.in_bounds(loc) {
            return false;
        }
        if self.ensure_loaded_for(loc).await.is_err() {
            return false;
        }
        self.walkable(loc, content)
    }

    /// Start or join the load of a sector without waiting for it.
    pub fn sector_load(&mut self, w: u32, coord: SectorCoord) -> Result<Option<SectorLoad>, MapError> {
        let store = self.store.clone();
        let partition = self.partition_mut(w)?;
        if !partition.sector_in_bounds(coord) {
            return Err(MapError::OutOfBounds(coord.origin(w)));
        }
        Ok(partition.request(coord, store.as_ref()))
    }

    /// Trigger or join the load of a sector and wait until its real data
    /// has replaced the placeholder.
    pub async fn ensure_sector_loaded(&mut self, w: u32, coord: SectorCoord) -> Result<(), MapError> {
        let Some(load) = self.sector_load(w, coord)? else {
            return Ok(());
        };
        let result = load.await;
        let (policy, tick) = (self.retry, self.tick);
        self.partition_mut(w)?
            .complete_load(coord, result.clone(), &policy, tick);
        result.map(|_| ()).map_err(MapError::from)
    }

    pub async fn ensure_loaded_for(&mut self, loc: &TilePoint) -> Result<(), MapError> {
        self.check_bounds(loc)?;
        self.ensure_sector_loaded(loc.w, SectorCoord::of(loc)).await
    }

    /// Install finished loads and restart due retries in every partition.
    pub fn poll_loads(&mut self, tick: u64) -> Vec<LoadFailure> {
        self.tick = tick;
        let store = self.store.clone();
        let policy = self.retry;
        let mut failures = Vec::new();
        for (w, partition) in self.partitions.iter_mut() {
            for failure in partition.poll(tick, &policy, store.as_ref()) {
                failures.push(LoadFailure { w: *w, failure });
            }
        }
        failures
    }

    pub fn pending_loads(&self) -> usize {
        self.partitions.values().map(Partition::pending_count).sum()
    }

    pub fn sector(&self, w: u32, coord: SectorCoord) -> Option<&Sector> {
        self.partitions.get(&w)?.sector(coord)
    }

    pub fn set_sector(&mut self, w: u32, coord: SectorCoord, sector: Sector) -> Result<(), MapError> {
        self.partition_mut(w)?.set_sector(coord, sector);
        Ok(())
    }

    /// Resident dirty sectors of every partition, drained.
    pub fn take_dirty(&mut self) -> Vec<(u32, SectorCoord, Vec<Tile>)> {
        let mut out = Vec::new();
        for (w, partition) in self.partitions.iter_mut() {
            for (coord, tiles) in partition.take_dirty() {
                out.push((*w, coord, tiles));
            }
        }
        out
    }

    /// First location (rings outward from `origin`, see [`nearest::ring`])
    /// that is in bounds and satisfies `predicate`.
    pub fn find_nearest(
        &mut self,
        origin: TilePoint,
        range: i32,
        include_origin: bool,
        mut predicate: impl FnMut(&mut WorldMap, TilePoint) -> bool,
    ) -> Option<TilePoint> {
        for loc in nearest::search_order(origin, range, include_origin) {
            if self.in_bounds(&loc) && predicate(self, loc) {
                return Some(loc);
            }
        }
        None
    }

    pub fn find_nearest_walkable(&mut self, origin: TilePoint, range: i32, content: &Content) -> Option<TilePoint> {
        self.find_nearest(origin, range, true, |map, loc| map.walkable(&loc, content))
    }
}
