//! The world aggregate.
//!
//! Owns the map, every loaded container, every creature and its behaviour
//! state, and the players currently in the world. Everything is keyed by
//! numeric id and reached through this one value.

use crate::ai::CreatureState;
use crate::config::Config;
use crate::content::{Content, ItemClass};
use crate::entity::{Container, Creature, Player};
use crate::error::StoreError;
use crate::persistence::{PartitionMeta, Store, WorldMeta};
use crate::spatial::{RetryPolicy, WorldMap};
use protocol::{ContainerId, ContainerKind, CreatureId, Item, ItemLocation, PlayerId, TilePoint};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

/// Counts of units written by [`World::save`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveReport {
    pub sectors: usize,
    pub containers: usize,
    pub players: usize,
    pub failures: usize,
}

pub struct World {
    pub content: Arc<Content>,
    pub map: WorldMap,
    pub containers: HashMap<ContainerId, Container>,
    pub creatures: BTreeMap<CreatureId, Creature>,
    pub states: BTreeMap<CreatureId, CreatureState>,
    /// Players currently in the world.
    pub players: BTreeMap<PlayerId, Player>,
    /// Lowercased player name to id, for every player ever created.
    pub player_names: BTreeMap<String, PlayerId>,
    pub epoch: u64,
    next_container_id: ContainerId,
    next_creature_id: CreatureId,
    next_player_id: PlayerId,
    store: Option<Arc<dyn Store>>,
}

impl World {
    /// An empty world with no partitions.
    pub fn new(content: Arc<Content>, store: Option<Arc<dyn Store>>, retry: RetryPolicy) -> Self {
        Self {
            content,
            map: WorldMap::new(store.clone(), retry),
            containers: HashMap::new(),
            creatures: BTreeMap::new(),
            states: BTreeMap::new(),
            players: BTreeMap::new(),
            player_names: BTreeMap::new(),
            epoch: 0,
            next_container_id: 1,
            next_creature_id: 1,
            next_player_id: 1,
            store,
        }
    }

    /// Open the persisted world, or start a fresh one sized by `config.world`.
    pub async fn open(config: &Config, content: Arc<Content>, store: Option<Arc<dyn Store>>) -> Result<Self, StoreError> {
        let mut world = World::new(content, store.clone(), RetryPolicy::from(&config.map));
        let meta = match &store {
            Some(store) => store.load_meta().await?,
            None => None,
        };

        match meta {
            Some(meta) => {
                info!(
                    "Opened world: {} partitions, {} players, epoch {}",
                    meta.partitions.len(),
                    meta.player_names.len(),
                    meta.epoch
                );
                for (w, partition) in &meta.partitions {
                    world.map.add_partition(*w, partition.width, partition.height, partition.depth);
                }
                world.next_container_id = meta.next_container_id.max(1);
                world.next_creature_id = meta.next_creature_id.max(1);
                world.next_player_id = meta.next_player_id.max(1);
                world.epoch = meta.epoch;
                world.player_names = meta.player_names;
            }
            None => {
                let size = &config.world;
                info!("Creating new world {}x{}x{}", size.width, size.height, size.depth);
                world.map.add_partition(0, size.width, size.height, size.depth);
            }
        }
        Ok(world)
    }

    pub fn store(&self) -> Option<&Arc<dyn Store>> {
        self.store.as_ref()
    }

    pub fn meta(&self) -> WorldMeta {
        WorldMeta {
            next_container_id: self.next_container_id,
            next_creature_id: self.next_creature_id,
            next_player_id: self.next_player_id,
            epoch: self.epoch,
            partitions: self
                .map
                .partitions()
                .map(|(w, p)| {
                    (
                        w,
                        PartitionMeta {
                            width: p.width,
                            height: p.height,
                            depth: p.depth,
                        },
                    )
                })
                .collect(),
            player_names: self.player_names.clone(),
        }
    }

    pub fn allocate_player_id(&mut self) -> PlayerId {
        let id = self.next_player_id;
        self.next_player_id += 1;
        id
    }

    pub fn make_container(&mut self, kind: ContainerKind, size: usize) -> ContainerId {
        let id = self.next_container_id;
        self.next_container_id += 1;
        self.containers.insert(id, Container::new(id, kind, size));
        id
    }

    /// Load a container from the store unless it is already in memory.
    /// Returns whether the container exists.
    pub async fn ensure_container_loaded(&mut self, id: ContainerId) -> Result<bool, StoreError> {
        if self.containers.contains_key(&id) {
            return Ok(true);
        }
        let Some(store) = self.store.clone() else {
            return Ok(false);
        };
        match store.load_container(id).await? {
            Some(record) => {
                self.containers.insert(id, Container::from_record(id, record));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// The container backing a container-class item, made on first access.
    /// The new id is written back onto the item.
    pub fn container_for_item(&mut self, location: &ItemLocation) -> Option<ContainerId> {
        let item = self.item_at(location)?;
        let meta = self.content.item(item.kind);
        if meta.class != ItemClass::Container {
            return None;
        }
        if let Some(id) = item.container_id {
            return Some(id);
        }
        let capacity = meta.capacity;
        let id = self.make_container(ContainerKind::Normal, capacity);
        match location {
            ItemLocation::World { loc } => {
                if let Ok(tile) = self.map.tile_mut(loc) {
                    if let Some(item) = tile.item.as_mut() {
                        item.container_id = Some(id);
                    }
                }
            }
            ItemLocation::Container { id: owner, index: Some(index) } => {
                if let Some(Some(item)) = self
                    .containers
                    .get_mut(owner)
                    .and_then(|container| container.items.get_mut(*index))
                {
                    item.container_id = Some(id);
                }
            }
            ItemLocation::Container { index: None, .. } => {}
        }
        Some(id)
    }

    /// A copy of the item at `location`. A container location without an
    /// index never holds an item.
    pub fn item_at(&mut self, location: &ItemLocation) -> Option<Item> {
        match location {
            ItemLocation::World { loc } => self.map.item(loc).cloned(),
            ItemLocation::Container { id, index: Some(index) } => {
                self.containers.get(id).and_then(|c| c.item(*index)).cloned()
            }
            ItemLocation::Container { index: None, .. } => None,
        }
    }

    /// Register a creature, its behaviour state and its tile occupancy.
    /// The creature's id is assigned here.
    pub fn register_creature(&mut self, mut creature: Creature) -> CreatureId {
        let id = self.next_creature_id;
        self.next_creature_id += 1;
        creature.id = id;
        if !self.map.claim(creature.pos, id) {
            warn!("Creature {} registered on occupied tile {}", id, creature.pos);
        }
        self.states.insert(id, CreatureState::new(creature.pos));
        self.creatures.insert(id, creature);
        id
    }

    /// Remove a creature from every index. Other creatures forget it.
    pub fn unregister_creature(&mut self, id: CreatureId) -> Option<Creature> {
        let creature = self.creatures.remove(&id)?;
        self.map.release(&creature.pos, id);
        self.states.remove(&id);
        for state in self.states.values_mut() {
            state.forget(id);
        }
        Some(creature)
    }

    /// Move a creature's position and occupancy. Fails, changing nothing,
    /// when another creature holds `to`. No walkability check.
    pub fn relocate_creature(&mut self, id: CreatureId, to: TilePoint) -> bool {
        if self.map.occupant(&to).is_some_and(|other| other != id) {
            return false;
        }
        let Some(creature) = self.creatures.get_mut(&id) else {
            return false;
        };
        self.map.release(&creature.pos, id);
        creature.pos = to;
        self.map.claim(to, id);
        true
    }

    /// Rebuild tile occupancy from creature positions.
    pub fn sync_occupants(&mut self) {
        let positions = self.creatures.values().map(|c| (c.id, c.pos));
        self.map.sync_occupants(positions);
    }

    pub fn player_for_creature(&self, creature_id: CreatureId) -> Option<&Player> {
        self.players.values().find(|p| p.creature_id == creature_id)
    }

    pub fn player_by_equipment(&self, container_id: ContainerId) -> Option<&Player> {
        self.players.values().find(|p| p.equipment_container_id == container_id)
    }

    pub fn player_by_inventory(&self, container_id: ContainerId) -> Option<&Player> {
        self.players.values().find(|p| p.container_id == container_id)
    }

    /// Write one player (and their containers) to the store.
    pub async fn save_player(&self, player_id: PlayerId) -> Result<(), StoreError> {
        let Some(store) = self.store.clone() else {
            return Ok(());
        };
        let Some(player) = self.players.get(&player_id) else {
            return Err(StoreError::NotFound(format!("player {}", player_id)));
        };
        let Some(creature) = self.creatures.get(&player.creature_id) else {
            return Err(StoreError::NotFound(format!("creature {}", player.creature_id)));
        };
        for id in [player.container_id, player.equipment_container_id] {
            if let Some(container) = self.containers.get(&id) {
                store.save_container(id, container.to_record()).await?;
            }
        }
        store.save_player(player.to_record(creature)).await?;
        store.save_meta(self.meta()).await
    }

    /// Write world metadata, dirty resident sectors, loaded containers and
    /// online players. Each unit is written on its own; a failure is logged
    /// and counted without stopping the rest. Sectors that fail stay dirty.
    pub async fn save(&mut self) -> Result<SaveReport, StoreError> {
        let mut report = SaveReport::default();
        let Some(store) = self.store.clone() else {
            return Ok(report);
        };
        let mut first_error = None;

        for (w, coord, tiles) in self.map.take_dirty() {
            match store.save_sector(w, coord, tiles).await {
                Ok(()) => report.sectors += 1,
                Err(e) => {
                    warn!("Failed to save sector {} {}: {}", w, coord, e);
                    if let Ok(partition) = self.map.partition_mut(w) {
                        partition.mark_dirty(coord);
                    }
                    report.failures += 1;
                    first_error.get_or_insert(e);
                }
            }
        }

        let mut container_ids: Vec<_> = self.containers.keys().copied().collect();
        container_ids.sort_unstable();
        for id in container_ids {
            let Some(record) = self.containers.get(&id).map(Container::to_record) else {
                continue;
            };
            match store.save_container(id, record).await {
                Ok(()) => report.containers += 1,
                Err(e) => {
                    warn!("Failed to save container {}: {}", id, e);
                    report.failures += 1;
                    first_error.get_or_insert(e);
                }
            }
        }

        let records: Vec<_> = self
            .players
            .values()
            .filter_map(|p| self.creatures.get(&p.creature_id).map(|c| p.to_record(c)))
            .collect();
        for record in records {
            let id = record.id;
            match store.save_player(record).await {
                Ok(()) => report.players += 1,
                Err(e) => {
                    warn!("Failed to save player {}: {}", id, e);
                    report.failures += 1;
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Err(e) = store.save_meta(self.meta()).await {
            report.failures += 1;
            first_error.get_or_insert(e);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}
