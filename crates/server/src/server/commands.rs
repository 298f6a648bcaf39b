//! CommandDispatcher: one handler per [`Command`] variant.
//!
//! Handlers validate before they mutate and queue their events through the
//! router. A handler that returns an error has changed nothing.

use super::client::{ActiveDialogue, ConnectionId};
use super::game::{GameState, ITEM_SEARCH_RANGE};
use crate::content::{HAND, ItemClass, MAX_STACK, MINE, MINED};
use crate::entity::item;
use crate::error::CommandError;
use crate::spatial::SectorCoord;
use protocol::{
    Command, ContainerId, CreatureActionKind, CreatureId, CreatureView, DialoguePart, DialogueView, Event, Item,
    ItemLocation, ReplyData, TilePoint, UsageOption,
};
use tracing::{debug, warn};

impl GameState {
    pub(super) async fn dispatch(
        &mut self,
        connection: ConnectionId,
        command: Command,
    ) -> Result<Option<ReplyData>, CommandError> {
        if !command.allowed_before_login() {
            self.session(connection)?;
        }

        match command {
            Command::Move { loc } => self.handle_move(connection, loc).map(|()| None),
            Command::MoveItem { from, to } => self.move_item(connection, from, to).await.map(|()| None),
            Command::Use {
                tool_index,
                location,
                usage_index,
            } => self.use_item(connection, tool_index, location, usage_index),
            Command::RequestContainer { container_id, loc } => {
                self.request_container(connection, container_id, loc).await.map(|()| None)
            }
            Command::CloseContainer { container_id } => {
                if let Some(client) = self.connections.get_mut(&connection) {
                    client.registered_containers.remove(&container_id);
                }
                Ok(None)
            }
            Command::RequestSector { loc } => self.request_sector(connection, loc).await.map(|()| None),
            Command::RequestCreature { id } => {
                let creature = self.world.creatures.get(&id).ok_or(CommandError::UnknownCreature(id))?;
                let view = creature.view();
                self.router.send(
                    connection,
                    Event::SetCreature {
                        partial: false,
                        creature: view,
                    },
                );
                Ok(None)
            }
            Command::RequestPartition { w } => {
                let partition = self.world.map.partition_mut(w)?;
                let event = Event::InitializePartition {
                    w,
                    width: partition.width,
                    height: partition.height,
                    depth: partition.depth,
                };
                self.router.send(connection, event);
                Ok(None)
            }
            Command::CreatureAction { creature_id, action } => {
                self.creature_action(connection, creature_id, action).map(|()| None)
            }
            Command::Chat { to, message } => self.handle_chat(connection, &to, &message).await.map(|()| None),
            Command::RegisterAccount { username, password } => {
                self.register_account(connection, username, password).await
            }
            Command::Login { username, password } => self.login(connection, username, password).await,
            Command::CreatePlayer { name } => self.create_player(connection, name).await,
            Command::EnterWorld { player_id } => self.enter_world(connection, player_id).await.map(|()| None),
            Command::Logout => {
                self.leave_world(connection).await;
                Ok(None)
            }
            Command::DialogueResponse { choice_index } => {
                self.dialogue_response(connection, choice_index).map(|()| None)
            }
            Command::AdminSetFloor { loc, floor } => {
                self.check_admin(connection, &loc)?;
                self.set_floor(loc, floor)?;
                Ok(None)
            }
            Command::AdminSetItem { loc, item } => {
                self.check_admin(connection, &loc)?;
                self.set_world_item(loc, item)?;
                Ok(None)
            }
        }
    }

    fn check_admin(&self, connection: ConnectionId, loc: &TilePoint) -> Result<(), CommandError> {
        if !self.session(connection)?.is_admin {
            return Err(CommandError::NotAllowed);
        }
        if !self.world.map.in_bounds(loc) {
            return Err(CommandError::OutOfBounds);
        }
        Ok(())
    }

    /// Walk onto a tile. A mine floor needs a pick in the inventory and is
    /// dug out first, dropping a random ore.
    fn handle_move(&mut self, connection: ConnectionId, loc: TilePoint) -> Result<(), CommandError> {
        let session = self.session(connection)?;
        let content = self.world.content.clone();
        if !self.world.map.in_bounds(&loc) {
            return Err(CommandError::OutOfBounds);
        }
        if !self.world.map.walkable(&loc, &content) {
            return Err(CommandError::NotWalkable);
        }

        if self.world.map.tile(&loc).floor == MINE {
            let has_pick = content.item_by_name("Pick").is_some_and(|pick| {
                self.world
                    .containers
                    .get(&session.container_id)
                    .is_some_and(|inventory| inventory.has_item(pick.id))
            });
            if !has_pick {
                return Err(CommandError::Rejected("you need a pick to mine"));
            }

            self.set_floor(loc, MINED)?;
            if let Some(ore) = content.random_item_of_class(ItemClass::Ore, &mut self.rng) {
                self.add_item_near(loc, Item::new(ore.id, 1));
            }
            self.animation(loc, "MiningSound");
        }

        self.move_creature(session.creature_id, loc);
        Ok(())
    }

    /// Bounds and access checks for one end of an item move. Containers are
    /// loaded on demand.
    async fn check_location(&mut self, connection: ConnectionId, location: &ItemLocation) -> Result<(), CommandError> {
        match *location {
            ItemLocation::World { loc } => {
                if self.world.map.in_bounds(&loc) {
                    Ok(())
                } else {
                    Err(CommandError::OutOfBounds)
                }
            }
            ItemLocation::Container { id, index } => {
                if !self.world.ensure_container_loaded(id).await? {
                    return Err(CommandError::UnknownContainer(id));
                }
                let allowed = self
                    .connections
                    .get(&connection)
                    .is_some_and(|client| client.can_access_container(id));
                if !allowed {
                    return Err(CommandError::NotAllowed);
                }
                match (index, self.world.containers.get(&id)) {
                    (Some(index), Some(container)) if !container.has_slot(index) => Err(CommandError::InvalidSlot),
                    _ => Ok(()),
                }
            }
        }
    }

    /// Move an item between any two item locations. Either both ends change
    /// (and each gets a `setItem`) or nothing does.
    async fn move_item(
        &mut self,
        connection: ConnectionId,
        from: ItemLocation,
        to: ItemLocation,
    ) -> Result<(), CommandError> {
        if from == to {
            return Ok(());
        }
        self.check_location(connection, &from).await?;
        self.check_location(connection, &to).await?;

        let content = self.world.content.clone();
        let item = self.world.item_at(&from).ok_or(CommandError::NoItem)?;

        // Dropping onto a container item puts the item inside it.
        let mut to = to;
        if let Some(target) = self.world.item_at(&to) {
            if content.item(target.kind).class == ItemClass::Container {
                let id = self
                    .world
                    .container_for_item(&to)
                    .ok_or(CommandError::Rejected("that container cannot be opened"))?;
                if !self.world.ensure_container_loaded(id).await? {
                    return Err(CommandError::UnknownContainer(id));
                }
                to = ItemLocation::container(id, None);
            } else if target.kind != item.kind {
                return Err(CommandError::Rejected("something else is already there"));
            }
        }

        let meta = content.item(item.kind);
        if !meta.moveable {
            return Err(CommandError::Rejected("that cannot be moved"));
        }
        if let ItemLocation::Container { id, .. } = to {
            if meta.class == ItemClass::Container && item.container_id == Some(id) {
                return Err(CommandError::Rejected("a container cannot hold itself"));
            }
        }

        let to = match to {
            ItemLocation::Container { id, index } => {
                let container = self
                    .world
                    .containers
                    .get(&id)
                    .ok_or(CommandError::UnknownContainer(id))?;
                let index = match index {
                    Some(index) if container.accepts(index, &item, &content) => index,
                    Some(_) => return Err(CommandError::Rejected("that does not fit there")),
                    None => container
                        .slot_for(&item, &content)
                        .ok_or(CommandError::Rejected("container is full"))?,
                };
                ItemLocation::container(id, Some(index))
            }
            world => world,
        };
        if to == from {
            return Ok(());
        }

        let placed = match self.world.item_at(&to) {
            None => item,
            Some(existing) if existing.kind != item.kind => {
                return Err(CommandError::Rejected("something else is already there"));
            }
            Some(_) if !meta.stackable => return Err(CommandError::Rejected("those do not stack")),
            Some(existing) => {
                let quantity = existing.quantity.saturating_add(item.quantity);
                if quantity > MAX_STACK {
                    return Err(CommandError::Rejected("stack is full"));
                }
                Item { quantity, ..item }
            }
        };

        self.set_item_at(&from, None)?;
        self.set_item_at(&to, Some(placed))?;
        Ok(())
    }

    /// Use an inventory item (or the hand) on a world location.
    ///
    /// Every write is planned first: products must all find a tile and a
    /// success tool must fit the inventory, otherwise nothing changes.
    fn use_item(
        &mut self,
        connection: ConnectionId,
        tool_index: i32,
        location: ItemLocation,
        usage_index: Option<usize>,
    ) -> Result<Option<ReplyData>, CommandError> {
        let session = self.session(connection)?;
        let ItemLocation::World { loc } = location else {
            return Err(CommandError::Rejected("items can only be used on the world"));
        };
        if !self.world.map.in_bounds(&loc) {
            return Err(CommandError::OutOfBounds);
        }
        let content = self.world.content.clone();

        let tool_slot = match tool_index {
            -1 => None,
            index => Some(usize::try_from(index).map_err(|_| CommandError::InvalidSlot)?),
        };
        let tool = match tool_slot {
            None => Item::new(HAND, 0),
            Some(index) => self
                .world
                .containers
                .get(&session.container_id)
                .and_then(|inventory| inventory.item(index))
                .cloned()
                .ok_or(CommandError::NoItem)?,
        };
        let focus = self.world.map.item(&loc).cloned();
        let focus_kind = focus.as_ref().map_or(0, |f| f.kind);

        let uses = content.uses(tool.kind, focus_kind);
        let recipe = match usage_index {
            Some(index) => uses.get(index).ok_or(CommandError::NoUsage)?,
            None if uses.len() > 1 => {
                let usages = uses
                    .iter()
                    .enumerate()
                    .map(|(usage_index, u)| UsageOption {
                        usage_index,
                        tool: u.tool,
                        focus: u.focus,
                        products: u.products.clone(),
                        skill: u.skill.clone(),
                    })
                    .collect();
                return Ok(Some(ReplyData::Usages { usages }));
            }
            None => uses.first().ok_or(CommandError::NoUsage)?,
        };

        let mut tool_after = Some(tool.clone());
        item::consume(&mut tool_after, recipe.tool_quantity_consumed);
        let mut focus_after = focus.clone();
        item::consume(&mut focus_after, recipe.focus_quantity_consumed);

        let mut products = recipe.products.clone();
        if let (Some(first), Some(container_id)) = (products.first_mut(), focus.as_ref().and_then(|f| f.container_id)) {
            first.container_id = Some(container_id);
        }

        // Planned world slots, in first-touched order.
        let mut planned: Vec<(TilePoint, Option<Item>)> = vec![(loc, focus_after)];
        for product in products {
            let spot = self
                .world
                .map
                .find_nearest(loc, ITEM_SEARCH_RANGE, true, |map, at| {
                    let slot = match planned.iter().find(|(p, _)| *p == at) {
                        Some((_, slot)) => slot.clone(),
                        None => map.tile(&at).item.clone(),
                    };
                    item::fits(slot.as_ref(), &product, &content)
                })
                .ok_or(CommandError::Rejected("no room for what this makes"))?;
            match planned.iter_mut().find(|(p, _)| *p == spot) {
                Some((_, slot)) => item::place(slot, product),
                None => {
                    let mut slot = self.world.map.item(&spot).cloned();
                    item::place(&mut slot, product);
                    planned.push((spot, slot));
                }
            }
        }

        let success_tool = recipe.success_tool.map(|kind| Item::new(kind, 1));
        if let Some(new_tool) = &success_tool {
            let mut inventory = self
                .world
                .containers
                .get(&session.container_id)
                .cloned()
                .ok_or(CommandError::UnknownContainer(session.container_id))?;
            if let Some(index) = tool_slot {
                inventory.items[index] = tool_after.clone();
            }
            if inventory.slot_for(new_tool, &content).is_none() {
                return Err(CommandError::Rejected("no room in your inventory"));
            }
        }

        if let Some(index) = tool_slot {
            if recipe.tool_quantity_consumed > 0 {
                self.set_container_item(session.container_id, index, tool_after)?;
            }
        }
        if let Some(new_tool) = success_tool {
            if self.add_item_to_container(session.container_id, new_tool).is_err() {
                warn!("Inventory {} rejected a planned item", session.container_id);
            }
        }
        for (spot, slot) in planned {
            if self.world.map.item(&spot) != slot.as_ref() {
                self.set_world_item(spot, slot)?;
            }
        }
        if let Some(floor) = recipe.success_floor {
            self.set_floor(loc, floor)?;
        }
        if let Some(key) = &recipe.animation {
            self.animation(loc, key);
        }
        if recipe.skill_success_xp > 0 {
            if let Some(skill) = recipe.skill.as_deref().and_then(|name| content.skill_by_name(name)) {
                self.grant_xp(session.player_id, skill.id, recipe.skill_success_xp);
            }
        }
        Ok(None)
    }

    /// Open a container by id or by the container item on a tile. The
    /// client may address its slots until it closes it. Another player's
    /// inventory and equipment are never opened by id.
    async fn request_container(
        &mut self,
        connection: ConnectionId,
        container_id: Option<ContainerId>,
        loc: Option<TilePoint>,
    ) -> Result<(), CommandError> {
        let id = match (container_id, loc) {
            (Some(id), None) => {
                let session = self.session(connection)?;
                let owner = self
                    .world
                    .player_by_inventory(id)
                    .or_else(|| self.world.player_by_equipment(id))
                    .map(|p| p.id);
                if owner.is_some_and(|owner| owner != session.player_id) {
                    return Err(CommandError::NotAllowed);
                }
                id
            }
            (None, Some(loc)) => {
                if !self.world.map.in_bounds(&loc) {
                    return Err(CommandError::OutOfBounds);
                }
                self.world
                    .container_for_item(&ItemLocation::world(loc))
                    .ok_or(CommandError::Rejected("there is no container there"))?
            }
            _ => return Err(CommandError::Rejected("expected one of containerId or loc")),
        };
        if !self.world.ensure_container_loaded(id).await? {
            return Err(CommandError::UnknownContainer(id));
        }
        let Some(view) = self.world.containers.get(&id).map(|c| c.view()) else {
            return Err(CommandError::UnknownContainer(id));
        };

        if let Some(client) = self.connections.get_mut(&connection) {
            client.registered_containers.insert(id);
        }
        self.router.send(connection, Event::Container { container: view });
        Ok(())
    }

    /// Send the tiles of a sector, awaiting its load. `loc` is in sector
    /// coordinates.
    async fn request_sector(&mut self, connection: ConnectionId, loc: TilePoint) -> Result<(), CommandError> {
        if loc.x < 0 || loc.y < 0 || loc.z < 0 {
            return Err(CommandError::OutOfBounds);
        }
        let coord = SectorCoord::new(loc.x, loc.y, loc.z);
        if !self.world.map.partition_mut(loc.w)?.sector_in_bounds(coord) {
            return Err(CommandError::OutOfBounds);
        }
        self.world.map.ensure_sector_loaded(loc.w, coord).await?;
        let tiles = self
            .world
            .map
            .sector(loc.w, coord)
            .map(|sector| sector.tiles().to_vec())
            .unwrap_or_default();
        self.router.send(connection, Event::Sector { loc, tiles });
        Ok(())
    }

    fn creature_action(
        &mut self,
        connection: ConnectionId,
        creature_id: CreatureId,
        action: CreatureActionKind,
    ) -> Result<(), CommandError> {
        let session = self.session(connection)?;
        let creature = self
            .world
            .creatures
            .get_mut(&creature_id)
            .ok_or(CommandError::UnknownCreature(creature_id))?;
        if creature.is_player() {
            return Err(CommandError::Rejected("players cannot be targeted"));
        }

        match action {
            CreatureActionKind::Attack => {
                if let Some(state) = self.world.states.get_mut(&session.creature_id) {
                    state.attack(creature_id);
                }
            }
            CreatureActionKind::Tame => {
                if !creature.tameable || creature.tamed_by.is_some() {
                    return Err(CommandError::Rejected("that creature cannot be tamed"));
                }
                creature.tamed_by = Some(session.player_id);
                if let Some(state) = self.world.states.get_mut(&creature_id) {
                    state.follow(session.creature_id);
                }
                self.creature_update(CreatureView {
                    id: creature_id,
                    tamed_by: Some(session.player_id),
                    ..CreatureView::default()
                });
            }
            CreatureActionKind::Speak => {
                let lines = creature
                    .template_id
                    .and_then(|id| self.world.content.monster(id))
                    .map(|template| template.dialogue.clone())
                    .unwrap_or_default();
                if lines.is_empty() {
                    return Err(CommandError::Rejected("it has nothing to say"));
                }
                let dialogue = DialogueView {
                    speakers: vec![session.creature_id, creature_id],
                    parts: lines
                        .into_iter()
                        .map(|text| DialoguePart {
                            speaker: 1,
                            text,
                            choices: Vec::new(),
                        })
                        .collect(),
                };
                if let Some(client) = self.connections.get_mut(&connection) {
                    client.dialogue = Some(ActiveDialogue {
                        dialogue: dialogue.clone(),
                        part: 0,
                    });
                }
                self.router.send(
                    connection,
                    Event::Dialogue {
                        dialogue: Some(dialogue),
                        index: 0,
                    },
                );
            }
        }
        Ok(())
    }

    /// Advance the active dialogue; past the last part it ends with index -1.
    fn dialogue_response(&mut self, connection: ConnectionId, choice_index: Option<usize>) -> Result<(), CommandError> {
        let client = self.connections.get_mut(&connection).ok_or(CommandError::NotLoggedIn)?;
        let Some(active) = client.dialogue.as_mut() else {
            return Err(CommandError::Rejected("no dialogue in progress"));
        };
        debug!("Connection {} answered dialogue part {} with {:?}", connection, active.part, choice_index);

        active.part += 1;
        let index = if active.part < active.dialogue.parts.len() {
            active.part as i32
        } else {
            client.dialogue = None;
            -1
        };
        self.router.send(connection, Event::Dialogue { dialogue: None, index });
        Ok(())
    }
}
