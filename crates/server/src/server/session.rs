//! Accounts, player creation and entering or leaving the world.

use super::client::{ConnectionId, PlayerSession};
use super::game::{GameState, SPAWN_SEARCH_RANGE};
use crate::content::EquipSlot;
use crate::entity::{INVENTORY_SIZE, Player};
use crate::error::{CommandError, StoreError};
use crate::persistence::{AccountRecord, Store};
use crate::scripts::ScriptEvent;
use protocol::{ContainerKind, Event, PlayerId, PlayerSummary, ReplyData};
use std::sync::Arc;
use tracing::{info, warn};

const MAX_NAME_LEN: usize = 20;

fn check_name(name: &str) -> Result<(), CommandError> {
    if name.is_empty() {
        return Err(CommandError::Account("name must not be empty".to_string()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(CommandError::Account(format!("name must be at most {} characters", MAX_NAME_LEN)));
    }
    Ok(())
}

/// Usernames also key account records, so they are limited to ASCII
/// letters, digits and `_`.
fn check_username(username: &str) -> Result<(), CommandError> {
    check_name(username)?;
    if !username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(CommandError::Account(
            "username may only contain letters, digits and _".to_string(),
        ));
    }
    Ok(())
}

impl GameState {
    fn require_store(&self) -> Result<Arc<dyn Store>, CommandError> {
        self.world
            .store()
            .cloned()
            .ok_or_else(|| StoreError::Unavailable("no store configured".to_string()).into())
    }

    fn account_of(&self, connection: ConnectionId) -> Result<String, CommandError> {
        self.connections
            .get(&connection)
            .and_then(|c| c.account.clone())
            .ok_or(CommandError::NotLoggedIn)
    }

    async fn account_reply(&self, store: &Arc<dyn Store>, account: &AccountRecord) -> ReplyData {
        let mut players = Vec::new();
        for &id in &account.player_ids {
            match store.load_player(id).await {
                Ok(Some(record)) => players.push(PlayerSummary { id, name: record.name }),
                Ok(None) => warn!("Account {} lists missing player {}", account.username, id),
                Err(e) => warn!("Failed to load player {}: {}", id, e),
            }
        }
        ReplyData::Account {
            username: account.username.clone(),
            players,
        }
    }

    pub(super) async fn register_account(
        &mut self,
        connection: ConnectionId,
        username: String,
        password: String,
    ) -> Result<Option<ReplyData>, CommandError> {
        let store = self.require_store()?;
        let username = username.trim().to_string();
        check_username(&username)?;
        if password.is_empty() {
            return Err(CommandError::Account("password must not be empty".to_string()));
        }
        if store.load_account(&username).await?.is_some() {
            return Err(CommandError::Account("username is taken".to_string()));
        }

        let account = AccountRecord {
            username: username.clone(),
            password,
            player_ids: Vec::new(),
        };
        store.save_account(account.clone()).await?;
        info!("Registered account {}", username);

        if let Some(client) = self.connections.get_mut(&connection) {
            client.account = Some(username);
        }
        Ok(Some(self.account_reply(&store, &account).await))
    }

    pub(super) async fn login(
        &mut self,
        connection: ConnectionId,
        username: String,
        password: String,
    ) -> Result<Option<ReplyData>, CommandError> {
        let store = self.require_store()?;
        let username = username.trim();
        if check_username(username).is_err() {
            return Err(CommandError::Account("invalid username or password".to_string()));
        }
        let account = match store.load_account(username).await? {
            Some(account) if account.password == password => account,
            _ => return Err(CommandError::Account("invalid username or password".to_string())),
        };
        info!("Connection {} logged in as {}", connection, account.username);

        if let Some(client) = self.connections.get_mut(&connection) {
            client.account = Some(account.username.clone());
        }
        Ok(Some(self.account_reply(&store, &account).await))
    }

    /// Create a player on the logged-in account with the starter kit, placed
    /// near the spawn point. The player is saved but not entered.
    pub(super) async fn create_player(
        &mut self,
        connection: ConnectionId,
        name: String,
    ) -> Result<Option<ReplyData>, CommandError> {
        let store = self.require_store()?;
        let username = self.account_of(connection)?;
        let name = name.trim().to_string();
        check_name(&name)?;
        let key = name.to_lowercase();
        if self.world.player_names.contains_key(&key) {
            return Err(CommandError::Account("that name is taken".to_string()));
        }
        let mut account = store
            .load_account(&username)
            .await?
            .ok_or_else(|| CommandError::Account(format!("unknown account {}", username)))?;

        let content = self.world.content.clone();
        let spawn = self.spawn_point();
        self.world.map.ensure_loaded_for(&spawn).await?;
        let pos = self
            .world
            .map
            .find_nearest_walkable(spawn, SPAWN_SEARCH_RANGE, &content)
            .unwrap_or(spawn);

        let inventory_id = self.world.make_container(ContainerKind::Normal, INVENTORY_SIZE);
        let equipment_id = self.world.make_container(ContainerKind::Equipment, EquipSlot::COUNT);
        let starter = content.starter();
        if let Some(inventory) = self.world.containers.get_mut(&inventory_id) {
            for item in &starter.inventory {
                if inventory.add(item.clone(), &content).is_err() {
                    warn!("Starter item {} does not fit the inventory", item.kind);
                }
            }
        }
        if let Some(equipment) = self.world.containers.get_mut(&equipment_id) {
            for item in &starter.equipment {
                match content.item(item.kind).equip_slot {
                    Some(slot) => equipment.items[slot.index()] = Some(item.clone()),
                    None => warn!("Starter equipment {} has no slot", item.kind),
                }
            }
        }

        let player_id = self.world.allocate_player_id();
        let record = Player::new_record(player_id, &name, pos, inventory_id, equipment_id);
        account.player_ids.push(player_id);
        let containers: Vec<_> = [inventory_id, equipment_id]
            .into_iter()
            .filter_map(|id| self.world.containers.remove(&id).map(|c| (id, c.to_record())))
            .collect();

        // The name is only kept once every record is stored.
        self.world.player_names.insert(key.clone(), player_id);
        let meta = self.world.meta();
        let saved: Result<(), StoreError> = async {
            for (id, container) in containers {
                store.save_container(id, container).await?;
            }
            store.save_player(record).await?;
            store.save_account(account).await?;
            store.save_meta(meta).await
        }
        .await;
        if let Err(e) = saved {
            self.world.player_names.remove(&key);
            warn!("Creating player {} for {} failed: {}", name, username, e);
            return Err(e.into());
        }

        info!("{} created player {} ({})", username, name, player_id);
        self.queue_script_event(ScriptEvent::PlayerCreated { player_id });
        Ok(Some(ReplyData::PlayerCreated { player_id }))
    }

    /// Load a player of the logged-in account into the world and send the
    /// client everything it needs to start drawing.
    pub(super) async fn enter_world(&mut self, connection: ConnectionId, player_id: PlayerId) -> Result<(), CommandError> {
        let store = self.require_store()?;
        let username = self.account_of(connection)?;
        if self.connections.get(&connection).is_some_and(|c| c.in_world()) || self.world.players.contains_key(&player_id) {
            return Err(CommandError::AlreadyInWorld);
        }
        let owns = store
            .load_account(&username)
            .await?
            .is_some_and(|account| account.player_ids.contains(&player_id));
        if !owns {
            return Err(CommandError::NotAllowed);
        }
        let mut record = store
            .load_player(player_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("player {}", player_id)))?;

        for id in [record.container_id, record.equipment_container_id] {
            if !self.world.ensure_container_loaded(id).await? {
                return Err(CommandError::UnknownContainer(id));
            }
        }

        let content = self.world.content.clone();
        if !self.world.map.in_bounds(&record.pos) {
            record.pos = self.spawn_point();
        }
        self.world.map.ensure_loaded_for(&record.pos).await?;
        if !self.world.map.walkable(&record.pos, &content) {
            record.pos = self
                .world
                .map
                .find_nearest_walkable(record.pos, SPAWN_SEARCH_RANGE, &content)
                .ok_or(CommandError::Rejected("no free tile near your position"))?;
        }

        let (player, creature) = Player::from_record(record, 0);
        let creature_id = self.world.register_creature(creature);
        let player = Player { creature_id, ..player };
        let pos = self.world.creatures.get(&creature_id).map(|c| c.pos).unwrap_or_default();

        if let Some(creature) = self.world.creatures.get_mut(&creature_id) {
            if let Some(equipment) = self.world.containers.get(&player.equipment_container_id) {
                creature.apply_equipment(equipment, &content);
            }
            if let Some(inventory) = self.world.containers.get(&player.container_id) {
                creature.light = inventory.light(&content);
            }
        }

        let session = PlayerSession {
            player_id,
            creature_id,
            container_id: player.container_id,
            equipment_container_id: player.equipment_container_id,
            is_admin: player.is_admin,
        };
        if let Some(client) = self.connections.get_mut(&connection) {
            client.session = Some(session);
            client.subscribed.insert(creature_id);
        }

        let name = player.name.clone();
        let skills = player.skill_list();
        self.world.players.insert(player_id, player);

        self.router.send(
            connection,
            Event::Initialize {
                is_admin: session.is_admin,
                player_id,
                creature_id,
                container_id: session.container_id,
                equipment_container_id: session.equipment_container_id,
                skills,
                seconds_per_world_tick: self.config.world.seconds_per_world_tick,
                ticks_per_world_day: self.config.world.ticks_per_world_day,
            },
        );
        self.router.send(connection, Event::Time { epoch: self.world.epoch });
        let welcome = format!(
            "Welcome, {}! Players online: {}. It is {}.",
            name,
            self.players_online().join(", "),
            self.time_description()
        );
        self.router.send(
            connection,
            Event::Chat {
                from: "World".to_string(),
                to: "global".to_string(),
                message: welcome,
            },
        );
        if let Some(partition) = self.world.map.partition(pos.w) {
            let event = Event::InitializePartition {
                w: pos.w,
                width: partition.width,
                height: partition.height,
                depth: partition.depth,
            };
            self.router.send(connection, event);
        }
        if let Some(creature) = self.world.creatures.get(&creature_id) {
            let view = creature.view();
            self.router.send(
                connection,
                Event::SetCreature {
                    partial: false,
                    creature: view,
                },
            );
        }
        for id in [session.equipment_container_id, session.container_id] {
            if let Some(view) = self.world.containers.get(&id).map(|c| c.view()) {
                self.router.send(connection, Event::Container { container: view });
            }
        }

        info!("{} entered the world at {}", name, pos);
        self.broadcast_chat("World", &format!("{} has entered the world.", name));
        self.animation(pos, "WarpIn");
        self.queue_script_event(ScriptEvent::PlayerEntered { player_id, creature_id });
        Ok(())
    }
}
