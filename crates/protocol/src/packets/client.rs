//! Client -> Server commands.

use crate::{ContainerId, CreatureId, Item, ItemLocation, PlayerId, TilePoint};
use serde::{Deserialize, Serialize};

/// What a client wants to do with another creature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CreatureActionKind {
    Attack,
    Tame,
    Speak,
}

/// Parsed client command.
///
/// The set is closed: every variant has exactly one handler on the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "args",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum Command {
    /// Walk the player's creature to a tile.
    Move { loc: TilePoint },
    /// Move an item between the world and/or containers.
    MoveItem { from: ItemLocation, to: ItemLocation },
    /// Use an inventory item (or the bare hand, index -1) on a location.
    Use {
        tool_index: i32,
        location: ItemLocation,
        #[serde(default)]
        usage_index: Option<usize>,
    },
    /// Open a container by id, or the container item lying at `loc`.
    RequestContainer {
        #[serde(default)]
        container_id: Option<ContainerId>,
        #[serde(default)]
        loc: Option<TilePoint>,
    },
    CloseContainer { container_id: ContainerId },
    /// Request the tiles of a sector. `loc` holds sector (not tile) coordinates.
    RequestSector { loc: TilePoint },
    RequestCreature { id: CreatureId },
    RequestPartition { w: u32 },
    CreatureAction {
        creature_id: CreatureId,
        #[serde(rename = "type")]
        action: CreatureActionKind,
    },
    /// Chat line. Lines starting with `/` are chat commands.
    Chat {
        #[serde(default = "default_chat_channel")]
        to: String,
        message: String,
    },
    RegisterAccount { username: String, password: String },
    Login { username: String, password: String },
    CreatePlayer { name: String },
    EnterWorld { player_id: PlayerId },
    Logout,
    DialogueResponse {
        #[serde(default)]
        choice_index: Option<usize>,
    },
    AdminSetFloor { loc: TilePoint, floor: u32 },
    AdminSetItem {
        loc: TilePoint,
        #[serde(default)]
        item: Option<Item>,
    },
}

fn default_chat_channel() -> String {
    "global".to_string()
}

impl Command {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Move { .. } => "move",
            Command::MoveItem { .. } => "moveItem",
            Command::Use { .. } => "use",
            Command::RequestContainer { .. } => "requestContainer",
            Command::CloseContainer { .. } => "closeContainer",
            Command::RequestSector { .. } => "requestSector",
            Command::RequestCreature { .. } => "requestCreature",
            Command::RequestPartition { .. } => "requestPartition",
            Command::CreatureAction { .. } => "creatureAction",
            Command::Chat { .. } => "chat",
            Command::RegisterAccount { .. } => "registerAccount",
            Command::Login { .. } => "login",
            Command::CreatePlayer { .. } => "createPlayer",
            Command::EnterWorld { .. } => "enterWorld",
            Command::Logout => "logout",
            Command::DialogueResponse { .. } => "dialogueResponse",
            Command::AdminSetFloor { .. } => "adminSetFloor",
            Command::AdminSetItem { .. } => "adminSetItem",
        }
    }

    /// Commands that may be issued before a player has entered the world.
    pub fn allowed_before_login(&self) -> bool {
        matches!(
            self,
            Command::RegisterAccount { .. }
                | Command::Login { .. }
                | Command::CreatePlayer { .. }
                | Command::EnterWorld { .. }
                | Command::RequestPartition { .. }
                | Command::RequestSector { .. }
        )
    }
}
