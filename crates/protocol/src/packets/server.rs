//! Server -> Client events and replies.

use crate::{ContainerId, CreatureId, Item, ItemLocation, PlayerId, Tile, TilePoint};
use serde::{Deserialize, Serialize};

/// Sprite reference for a creature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graphics {
    pub file: String,
    pub index: u32,
}

/// A current/max pair (life, stamina, mana).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Meter {
    pub current: i32,
    pub max: i32,
}

impl Meter {
    pub const fn full(max: i32) -> Self {
        Self { current: max, max }
    }

    /// Adjust `current` by `delta`, clamped to `[0, max]`.
    pub fn adjust(&mut self, delta: i32) {
        self.current = (self.current + delta).clamp(0, self.max);
    }
}

/// Combat stats derived from a creature's template or equipment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombatStats {
    pub armor: i32,
    pub attack_speed: u32,
    pub damage_low: i32,
    pub damage_high: i32,
    pub magic_defense: i32,
    pub melee_defense: i32,
    pub missile_defense: i32,
}

impl Default for CombatStats {
    fn default() -> Self {
        Self {
            armor: 0,
            attack_speed: 1,
            damage_low: 1,
            damage_high: 1,
            magic_defense: 0,
            melee_defense: 0,
            missile_defense: 0,
        }
    }
}

/// Creature state as sent to clients.
///
/// Everything except `id` is optional so the same type carries both full
/// snapshots and partial (changed-fields-only) updates.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatureView {
    pub id: CreatureId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pos: Option<TilePoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graphics: Option<Graphics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_player: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tamed_by: Option<PlayerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub life: Option<Meter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stamina: Option<Meter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mana: Option<Meter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub light: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<CombatStats>,
    /// Item type worn in each equipment slot, for drawing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appearance: Option<Vec<Option<u32>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContainerKind {
    #[default]
    Normal,
    Equipment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerView {
    pub id: ContainerId,
    #[serde(rename = "type")]
    pub kind: ContainerKind,
    pub items: Vec<Option<Item>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillXp {
    pub skill: u32,
    pub xp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialoguePart {
    /// Index into [`DialogueView::speakers`].
    pub speaker: usize,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueView {
    pub speakers: Vec<CreatureId>,
    pub parts: Vec<DialoguePart>,
}

/// Outbound event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "args",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum Event {
    Initialize {
        is_admin: bool,
        player_id: PlayerId,
        creature_id: CreatureId,
        container_id: ContainerId,
        equipment_container_id: ContainerId,
        skills: Vec<SkillXp>,
        seconds_per_world_tick: u32,
        ticks_per_world_day: u32,
    },
    InitializePartition {
        w: u32,
        width: i32,
        height: i32,
        depth: i32,
    },
    /// Bulk tile payload. `loc` is a sector coordinate; `tiles` is row-major.
    Sector { loc: TilePoint, tiles: Vec<Tile> },
    Container { container: ContainerView },
    SetFloor { loc: TilePoint, floor: u32 },
    SetItem {
        location: ItemLocation,
        item: Option<Item>,
    },
    SetCreature {
        partial: bool,
        creature: CreatureView,
    },
    RemoveCreature { id: CreatureId },
    Animation { loc: TilePoint, key: String },
    Xp { skill: u32, xp: u64 },
    Chat {
        from: String,
        to: String,
        message: String,
    },
    Time { epoch: u64 },
    /// `dialogue` is only present on the first part; index -1 ends it.
    Dialogue {
        dialogue: Option<DialogueView>,
        index: i32,
    },
    Log { msg: String },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Initialize { .. } => "initialize",
            Event::InitializePartition { .. } => "initializePartition",
            Event::Sector { .. } => "sector",
            Event::Container { .. } => "container",
            Event::SetFloor { .. } => "setFloor",
            Event::SetItem { .. } => "setItem",
            Event::SetCreature { .. } => "setCreature",
            Event::RemoveCreature { .. } => "removeCreature",
            Event::Animation { .. } => "animation",
            Event::Xp { .. } => "xp",
            Event::Chat { .. } => "chat",
            Event::Time { .. } => "time",
            Event::Dialogue { .. } => "dialogue",
            Event::Log { .. } => "log",
        }
    }
}

/// One recipe offered back to the client when a `use` is ambiguous.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageOption {
    pub usage_index: usize,
    pub tool: u32,
    pub focus: u32,
    pub products: Vec<Item>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSummary {
    pub id: PlayerId,
    pub name: String,
}

/// Successful command result payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ReplyData {
    /// The `use` matched several recipes; resend with a `usageIndex`.
    Usages { usages: Vec<UsageOption> },
    Account {
        username: String,
        players: Vec<PlayerSummary>,
    },
    PlayerCreated { player_id: PlayerId },
}

/// Reply to a single command, correlated through the envelope id.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Reply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ReplyData>,
}

impl Reply {
    pub fn ok(result: Option<ReplyData>) -> Self {
        Self { error: None, result }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            result: None,
        }
    }
}

/// Anything the server writes to a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Event(Event),
    Reply(Reply),
}

impl From<Event> for ServerMessage {
    fn from(event: Event) -> Self {
        ServerMessage::Event(event)
    }
}

impl From<Reply> for ServerMessage {
    fn from(reply: Reply) -> Self {
        ServerMessage::Reply(reply)
    }
}
