//! One map level: a lazily populated grid of sectors.

use super::sector::{SECTOR_SIZE, Sector, SectorCoord};
use crate::config::MapConfig;
use crate::error::LoadError;
use crate::persistence::Store;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use protocol::{Tile, TilePoint};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A sector load that any number of waiters can join.
pub type SectorLoad = Shared<BoxFuture<'static, Result<Arc<Sector>, LoadError>>>;

/// Exponential backoff for failed loads.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub limit: u32,
    pub base_ticks: u64,
    pub max_ticks: u64,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> u64 {
        let shift = attempt.saturating_sub(1).min(32);
        self.base_ticks.saturating_mul(1u64 << shift).min(self.max_ticks)
    }
}

impl From<&MapConfig> for RetryPolicy {
    fn from(config: &MapConfig) -> Self {
        Self {
            limit: config.load_retry_limit,
            base_ticks: config.load_retry_base_ticks,
            max_ticks: config.load_retry_max_ticks,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        (&MapConfig::default()).into()
    }
}

#[derive(Debug)]
struct Slot {
    sector: Sector,
    /// False while this is the placeholder of a pending or failed load.
    resident: bool,
}

#[derive(Debug, Clone, Copy)]
struct RetryState {
    failures: u32,
    /// `None` while a retry is in flight or once retries are exhausted.
    next_attempt: Option<u64>,
}

/// Outcome of a load that completed with an error.
#[derive(Debug, Clone)]
pub struct FailedLoad {
    pub coord: SectorCoord,
    pub error: LoadError,
    pub failures: u32,
    pub will_retry: bool,
}

pub struct Partition {
    w: u32,
    pub width: i32,
    pub height: i32,
    pub depth: i32,
    slots: HashMap<SectorCoord, Slot>,
    pending: HashMap<SectorCoord, SectorLoad>,
    retries: HashMap<SectorCoord, RetryState>,
    dirty: HashSet<SectorCoord>,
}

impl Partition {
    pub fn new(w: u32, width: i32, height: i32, depth: i32) -> Self {
        Self {
            w,
            width,
            height,
            depth,
            slots: HashMap::new(),
            pending: HashMap::new(),
            retries: HashMap::new(),
            dirty: HashSet::new(),
        }
    }

    pub fn in_bounds(&self, loc: &TilePoint) -> bool {
        loc.x >= 0
            && loc.y >= 0
            && loc.z >= 0
            && loc.x < self.width
            && loc.y < self.height
            && loc.z < self.depth
    }

    /// Checked in sector units so huge coordinates never reach tile math.
    pub fn sector_in_bounds(&self, coord: SectorCoord) -> bool {
        let (span_x, span_y) = self.sector_span();
        coord.x >= 0 && coord.y >= 0 && coord.z >= 0 && coord.x < span_x && coord.y < span_y && coord.z < self.depth
    }

    pub fn is_resident(&self, coord: SectorCoord) -> bool {
        self.slots.get(&coord).is_some_and(|slot| slot.resident)
    }

    pub fn is_pending(&self, coord: SectorCoord) -> bool {
        self.pending.contains_key(&coord)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Start a load for `coord`, or join the one in flight.
    ///
    /// Returns `None` when the sector is already resident. Without a store the
    /// sector becomes resident (blank) immediately.
    pub fn sector_load(&mut self, coord: SectorCoord, store: Option<&Arc<dyn Store>>) -> Option<SectorLoad> {
        if self.is_resident(coord) {
            return None;
        }
        if let Some(load) = self.pending.get(&coord) {
            return Some(load.clone());
        }

        let Some(store) = store else {
            self.slots.insert(
                coord,
                Slot {
                    sector: Sector::blank(),
                    resident: true,
                },
            );
            return None;
        };

        self.slots.entry(coord).or_insert_with(|| Slot {
            sector: Sector::blank(),
            resident: false,
        });

        let request = store.load_sector(self.w, coord);
        let load = async move {
            match request.await {
                Ok(Some(tiles)) => Sector::from_tiles(tiles)
                    .map(Arc::new)
                    .map_err(|e| LoadError(e.to_string())),
                Ok(None) => Ok(Arc::new(Sector::blank())),
                Err(e) => Err(LoadError(e.to_string())),
            }
        }
        .boxed()
        .shared();
        self.pending.insert(coord, load.clone());
        Some(load)
    }

    /// An explicit request: like [`sector_load`](Self::sector_load) but forgets
    /// earlier failures so retries start over.
    pub fn request(&mut self, coord: SectorCoord, store: Option<&Arc<dyn Store>>) -> Option<SectorLoad> {
        if !self.is_pending(coord) {
            self.retries.remove(&coord);
        }
        self.sector_load(coord, store)
    }

    /// Install the result of a load. Only the first completion of a given load
    /// has any effect.
    pub fn complete_load(
        &mut self,
        coord: SectorCoord,
        result: Result<Arc<Sector>, LoadError>,
        policy: &RetryPolicy,
        tick: u64,
    ) -> Option<FailedLoad> {
        if self.pending.remove(&coord).is_none() {
            return None;
        }

        match result {
            Ok(sector) => {
                self.retries.remove(&coord);
                self.slots.insert(
                    coord,
                    Slot {
                        sector: Arc::unwrap_or_clone(sector),
                        resident: true,
                    },
                );
                None
            }
            Err(error) => {
                let state = self.retries.entry(coord).or_insert(RetryState {
                    failures: 0,
                    next_attempt: None,
                });
                state.failures += 1;
                let failures = state.failures;
                let will_retry = failures <= policy.limit;
                state.next_attempt = will_retry.then(|| tick + policy.delay(failures));
                Some(FailedLoad {
                    coord,
                    error,
                    failures,
                    will_retry,
                })
            }
        }
    }

    /// Install every load that has finished and restart loads whose backoff
    /// expired. Returns the loads that failed this call.
    pub fn poll(&mut self, tick: u64, policy: &RetryPolicy, store: Option<&Arc<dyn Store>>) -> Vec<FailedLoad> {
        let finished: Vec<_> = self
            .pending
            .iter()
            .filter_map(|(coord, load)| load.clone().now_or_never().map(|result| (*coord, result)))
            .collect();

        let mut failed = Vec::new();
        for (coord, result) in finished {
            if let Some(failure) = self.complete_load(coord, result, policy, tick) {
                failed.push(failure);
            }
        }

        let due: Vec<SectorCoord> = self
            .retries
            .iter()
            .filter(|(_, state)| state.next_attempt.is_some_and(|at| at <= tick))
            .map(|(coord, _)| *coord)
            .collect();
        for coord in due {
            if let Some(state) = self.retries.get_mut(&coord) {
                state.next_attempt = None;
            }
            self.sector_load(coord, store);
        }

        failed
    }

    /// The sector holding `loc`, creating a placeholder (and starting its load)
    /// the first time it is addressed.
    fn slot_mut(&mut self, coord: SectorCoord, store: Option<&Arc<dyn Store>>) -> &mut Slot {
        if !self.slots.contains_key(&coord) {
            self.sector_load(coord, store);
        }
        self.slots.entry(coord).or_insert_with(|| Slot {
            sector: Sector::blank(),
            resident: false,
        })
    }

    /// Caller must bounds-check `loc` first.
    pub fn tile(&mut self, loc: &TilePoint, store: Option<&Arc<dyn Store>>) -> &Tile {
        self.slot_mut(SectorCoord::of(loc), store).sector.tile(loc)
    }

    /// Caller must bounds-check `loc` first. Marks the sector dirty.
    pub fn tile_mut(&mut self, loc: &TilePoint, store: Option<&Arc<dyn Store>>) -> &mut Tile {
        let coord = SectorCoord::of(loc);
        self.dirty.insert(coord);
        self.slot_mut(coord, store).sector.tile_mut(loc)
    }

    /// Tile lookup that never creates placeholders or starts loads.
    pub fn peek_tile(&self, loc: &TilePoint) -> Option<&Tile> {
        self.slots
            .get(&SectorCoord::of(loc))
            .map(|slot| slot.sector.tile(loc))
    }

    /// The sector at `coord`, placeholder or real.
    pub fn sector(&self, coord: SectorCoord) -> Option<&Sector> {
        self.slots.get(&coord).map(|slot| &slot.sector)
    }

    /// Replace a sector wholesale. Any load in flight for it is dropped.
    pub fn set_sector(&mut self, coord: SectorCoord, sector: Sector) {
        self.pending.remove(&coord);
        self.retries.remove(&coord);
        self.dirty.insert(coord);
        self.slots.insert(
            coord,
            Slot {
                sector,
                resident: true,
            },
        );
    }

    /// Resident sectors only; a placeholder is never handed out for saving.
    pub fn sector_for_save(&self, coord: SectorCoord) -> Option<&Sector> {
        self.slots
            .get(&coord)
            .filter(|slot| slot.resident)
            .map(|slot| &slot.sector)
    }

    /// Drain the dirty set, returning resident sectors' tiles for saving.
    pub fn take_dirty(&mut self) -> Vec<(SectorCoord, Vec<Tile>)> {
        let mut out = Vec::new();
        for coord in std::mem::take(&mut self.dirty) {
            if let Some(sector) = self.sector_for_save(coord) {
                out.push((coord, sector.tiles().to_vec()));
            }
        }
        out.sort_by_key(|(coord, _)| *coord);
        out
    }

    pub fn mark_dirty(&mut self, coord: SectorCoord) {
        self.dirty.insert(coord);
    }

    /// Coordinates of all resident sectors, sorted.
    pub fn resident_coords(&self) -> Vec<SectorCoord> {
        let mut coords: Vec<_> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.resident)
            .map(|(coord, _)| *coord)
            .collect();
        coords.sort();
        coords
    }

    pub fn sector_mut_for_growth(&mut self, coord: SectorCoord) -> Option<&mut Sector> {
        let slot = self.slots.get_mut(&coord).filter(|slot| slot.resident)?;
        self.dirty.insert(coord);
        Some(&mut slot.sector)
    }

    /// Sectors per side along x and y.
    pub fn sector_span(&self) -> (i32, i32) {
        (
            (self.width + SECTOR_SIZE - 1) / SECTOR_SIZE,
            (self.height + SECTOR_SIZE - 1) / SECTOR_SIZE,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            limit: 2,
            base_ticks: 10,
            max_ticks: 15,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = policy();
        assert_eq!(policy.delay(1), 10);
        assert_eq!(policy.delay(2), 15);
        assert_eq!(policy.delay(40), 15);
    }

    #[test]
    fn test_sector_bounds_use_sector_units() {
        let partition = Partition::new(0, 45, 40, 2);
        assert!(partition.sector_in_bounds(SectorCoord::new(2, 1, 1)));
        assert!(!partition.sector_in_bounds(SectorCoord::new(3, 0, 0)));
        assert!(!partition.sector_in_bounds(SectorCoord::new(0, 2, 0)));
        assert!(!partition.sector_in_bounds(SectorCoord::new(0, 0, 2)));
        assert!(!partition.sector_in_bounds(SectorCoord::new(-1, 0, 0)));
        assert!(!partition.sector_in_bounds(SectorCoord::new(214_748_365, 0, 0)));
        assert!(!partition.sector_in_bounds(SectorCoord::new(0, i32::MAX, 0)));
    }

    #[test]
    fn test_without_store_sectors_are_resident_at_once() {
        let mut partition = Partition::new(0, 40, 40, 1);
        let loc = TilePoint::new(0, 25, 3, 0);
        assert_eq!(partition.tile(&loc, None).floor, 0);
        assert!(partition.is_resident(SectorCoord::of(&loc)));
        assert_eq!(partition.pending_count(), 0);
    }

    #[test]
    fn test_placeholder_then_real_data() {
        let memory = MemoryStore::new();
        let coord = SectorCoord::new(1, 0, 0);
        let mut tiles = vec![Tile::with_floor(5); (SECTOR_SIZE * SECTOR_SIZE) as usize];
        tiles[0].floor = 9;
        memory.put_sector(0, coord, tiles);
        let store: Arc<dyn Store> = Arc::new(memory.clone());

        let mut partition = Partition::new(0, 40, 40, 1);
        let loc = coord.origin(0);
        assert_eq!(partition.tile(&loc, Some(&store)).floor, 0);
        assert!(partition.is_pending(coord));
        assert!(partition.sector_for_save(coord).is_none());

        assert!(partition.poll(1, &policy(), Some(&store)).is_empty());
        assert_eq!(partition.tile(&loc, Some(&store)).floor, 9);
        assert_eq!(memory.sector_loads(), 1);
    }

    #[test]
    fn test_failed_load_retries_with_backoff_then_gives_up() {
        let memory = MemoryStore::new();
        memory.fail_sector_loads(10);
        let store: Arc<dyn Store> = Arc::new(memory.clone());
        let coord = SectorCoord::new(0, 0, 0);
        let mut partition = Partition::new(0, 20, 20, 1);
        let policy = policy();

        partition.sector_load(coord, Some(&store));
        let failed = partition.poll(0, &policy, Some(&store));
        assert_eq!(failed.len(), 1);
        assert!(failed[0].will_retry);

        // Not due yet.
        assert!(partition.poll(5, &policy, Some(&store)).is_empty());
        assert_eq!(memory.sector_loads(), 1);

        // Retry starts at tick 10 and fails on the following poll.
        assert!(partition.poll(10, &policy, Some(&store)).is_empty());
        assert_eq!(memory.sector_loads(), 2);
        let failed = partition.poll(11, &policy, Some(&store));
        assert_eq!(failed[0].failures, 2);
        assert!(failed[0].will_retry);

        partition.poll(26, &policy, Some(&store));
        let failed = partition.poll(27, &policy, Some(&store));
        assert_eq!(failed[0].failures, 3);
        assert!(!failed[0].will_retry);

        partition.poll(10_000, &policy, Some(&store));
        assert_eq!(memory.sector_loads(), 3);
        assert!(!partition.is_resident(coord));

        // A fresh request starts over.
        memory.fail_sector_loads(0);
        assert!(partition.request(coord, Some(&store)).is_some());
        assert!(partition.poll(10_001, &policy, Some(&store)).is_empty());
        assert!(partition.is_resident(coord));
    }

    #[test]
    fn test_complete_load_is_idempotent() {
        let memory = MemoryStore::new();
        let store: Arc<dyn Store> = Arc::new(memory);
        let coord = SectorCoord::new(0, 0, 0);
        let mut partition = Partition::new(0, 20, 20, 1);
        partition.sector_load(coord, Some(&store));
        partition.tile_mut(&coord.origin(0), Some(&store)).floor = 3;

        let blank = Arc::new(Sector::blank());
        assert!(partition.complete_load(coord, Ok(blank.clone()), &policy(), 0).is_none());
        partition.tile_mut(&coord.origin(0), Some(&store)).floor = 4;
        // A late duplicate completion must not clobber the live sector.
        assert!(partition.complete_load(coord, Ok(blank), &policy(), 0).is_none());
        assert_eq!(partition.tile(&coord.origin(0), Some(&store)).floor, 4);
    }

    #[test]
    fn test_take_dirty_skips_placeholders() {
        let memory = MemoryStore::new();
        let store: Arc<dyn Store> = Arc::new(memory);
        let mut partition = Partition::new(0, 40, 20, 1);
        partition.tile_mut(&TilePoint::new(0, 1, 1, 0), Some(&store)).floor = 2;
        assert!(partition.take_dirty().is_empty());

        partition.poll(0, &policy(), Some(&store));
        partition.tile_mut(&TilePoint::new(0, 1, 1, 0), Some(&store)).floor = 2;
        let dirty = partition.take_dirty();
        assert_eq!(dirty.len(), 1);
        assert_eq!(dirty[0].1[SECTOR_SIZE as usize + 1].floor, 2);
    }
}
