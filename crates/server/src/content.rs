//! Static game content: item metadata, usage recipes, monsters and skills.
//!
//! The catalog is read once at startup (built-in TOML or `[content] path`) and
//! is read-only afterwards.

use anyhow::Context as _;
use protocol::{Graphics, Item};
use rand::Rng;
use rand::seq::IndexedRandom;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// Item type of the bare hand (as a tool) and of "nothing" (as a focus).
pub const HAND: u32 = 0;
/// Floor that can be mined with a pick.
pub const MINE: u32 = 1;
/// Floor left behind once a mine floor has been dug out.
pub const MINED: u32 = 19;
/// Largest quantity a single stack may hold.
pub const MAX_STACK: u32 = 10_000;

const BUILTIN: &str = include_str!("content/builtin.toml");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum ItemClass {
    #[default]
    Normal,
    Armor,
    Ammo,
    Ball,
    CaveDown,
    CaveUp,
    Container,
    Ore,
    Plant,
    Shield,
    Wand,
    Weapon,
}

/// Equipment slot, in equipment container order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum EquipSlot {
    Head,
    Weapon,
    Chest,
    Shield,
    Legs,
}

impl EquipSlot {
    pub const COUNT: usize = 5;

    pub fn index(self) -> usize {
        match self {
            EquipSlot::Head => 0,
            EquipSlot::Weapon => 1,
            EquipSlot::Chest => 2,
            EquipSlot::Shield => 3,
            EquipSlot::Legs => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum TrapEffect {
    Warp,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ItemMeta {
    pub id: u32,
    pub name: String,
    pub class: ItemClass,
    pub equip_slot: Option<EquipSlot>,
    pub moveable: bool,
    pub walkable: bool,
    pub stackable: bool,
    pub light: u32,
    /// Relative weight when picking a random item of a class.
    pub rarity: f64,
    /// World ticks until the item turns into `growth_item` (or vanishes).
    pub growth_delta: Option<u32>,
    pub growth_item: Option<u32>,
    pub trap_effect: Option<TrapEffect>,
    pub damage_low: i32,
    pub damage_high: i32,
    pub attack_speed: u32,
    pub armor_level: i32,
    /// Slot count of the container backing a container-class item.
    pub capacity: usize,
}

impl Default for ItemMeta {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            class: ItemClass::Normal,
            equip_slot: None,
            moveable: true,
            walkable: true,
            stackable: false,
            light: 0,
            rarity: 1.0,
            growth_delta: None,
            growth_item: None,
            trap_effect: None,
            damage_low: 0,
            damage_high: 0,
            attack_speed: 0,
            armor_level: 0,
            capacity: 10,
        }
    }
}

/// A tool-on-focus recipe.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemUse {
    pub tool: u32,
    pub focus: u32,
    #[serde(default)]
    pub tool_quantity_consumed: u32,
    #[serde(default)]
    pub focus_quantity_consumed: u32,
    /// Item added to the actor's inventory on success.
    #[serde(default)]
    pub success_tool: Option<u32>,
    /// Floor the focus tile turns into on success.
    #[serde(default)]
    pub success_floor: Option<u32>,
    #[serde(default)]
    pub products: Vec<Item>,
    #[serde(default)]
    pub skill: Option<String>,
    #[serde(default)]
    pub skill_success_xp: u64,
    #[serde(default)]
    pub animation: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TreasureEntry {
    pub item: String,
    pub quantity: u32,
    /// Percent chance, 0..=100.
    pub chance: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonsterTemplate {
    pub id: u32,
    pub name: String,
    pub graphics: Graphics,
    #[serde(default)]
    pub life: Option<i32>,
    #[serde(default)]
    pub stamina: Option<i32>,
    #[serde(default)]
    pub mana: Option<i32>,
    #[serde(default = "default_speed")]
    pub speed: u32,
    #[serde(default)]
    pub roam: Option<i32>,
    #[serde(default)]
    pub eat_grass: bool,
    #[serde(default)]
    pub tameable: bool,
    #[serde(default = "default_damage")]
    pub damage_low: i32,
    #[serde(default = "default_damage")]
    pub damage_high: i32,
    #[serde(default)]
    pub melee_defense: i32,
    #[serde(default)]
    pub magic_defense: i32,
    #[serde(default)]
    pub missile_defense: i32,
    #[serde(default)]
    pub dead_item: Option<String>,
    #[serde(default)]
    pub treasure: Vec<TreasureEntry>,
    /// Lines spoken when a player talks to the creature.
    #[serde(default)]
    pub dialogue: Vec<String>,
}

fn default_speed() -> u32 {
    1
}
fn default_damage() -> i32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct Skill {
    pub id: u32,
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StarterKit {
    #[serde(default)]
    pub inventory: Vec<Item>,
    #[serde(default)]
    pub equipment: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Catalog {
    #[serde(default)]
    items: Vec<ItemMeta>,
    #[serde(default)]
    uses: Vec<ItemUse>,
    #[serde(default)]
    monsters: Vec<MonsterTemplate>,
    #[serde(default)]
    skills: Vec<Skill>,
    #[serde(default)]
    starter: StarterKit,
}

/// Read-only content table.
#[derive(Debug)]
pub struct Content {
    items: HashMap<u32, ItemMeta>,
    uses: HashMap<(u32, u32), Vec<ItemUse>>,
    monsters: Vec<MonsterTemplate>,
    skills: Vec<Skill>,
    starter: StarterKit,
    unknown: ItemMeta,
}

impl Content {
    /// The catalog compiled into the binary.
    pub fn builtin() -> anyhow::Result<Self> {
        Self::parse(BUILTIN)
    }

    /// Load from `path` when given, otherwise the built-in catalog.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading content catalog {}", path.display()))?;
                let content = Self::parse(&text)?;
                info!("Loaded content catalog from {}", path.display());
                Ok(content)
            }
            None => Self::builtin(),
        }
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let catalog: Catalog = toml::from_str(text).context("parsing content catalog")?;

        let mut items = HashMap::with_capacity(catalog.items.len());
        for meta in catalog.items {
            if let Some(previous) = items.insert(meta.id, meta) {
                anyhow::bail!("duplicate item id {}", previous.id);
            }
        }

        let mut uses: HashMap<(u32, u32), Vec<ItemUse>> = HashMap::new();
        for item_use in catalog.uses {
            uses.entry((item_use.tool, item_use.focus))
                .or_default()
                .push(item_use);
        }

        Ok(Self {
            items,
            uses,
            monsters: catalog.monsters,
            skills: catalog.skills,
            starter: catalog.starter,
            unknown: ItemMeta {
                name: "Unknown".to_string(),
                moveable: false,
                ..ItemMeta::default()
            },
        })
    }

    /// Metadata for an item type. Unknown types get a non-moveable placeholder.
    pub fn item(&self, kind: u32) -> &ItemMeta {
        self.items.get(&kind).unwrap_or(&self.unknown)
    }

    pub fn item_by_name(&self, name: &str) -> Option<&ItemMeta> {
        self.items.values().find(|meta| meta.name.eq_ignore_ascii_case(name))
    }

    /// All recipes for using `tool` on `focus`.
    pub fn uses(&self, tool: u32, focus: u32) -> &[ItemUse] {
        self.uses.get(&(tool, focus)).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Pick a random item of `class`, weighted by rarity.
    pub fn random_item_of_class<R: Rng + ?Sized>(&self, class: ItemClass, rng: &mut R) -> Option<&ItemMeta> {
        let mut candidates: Vec<&ItemMeta> =
            self.items.values().filter(|meta| meta.class == class).collect();
        // HashMap order is not stable; sort so a seeded rng picks deterministically.
        candidates.sort_by_key(|meta| meta.id);
        candidates
            .choose_weighted(rng, |meta| meta.rarity.max(0.0))
            .ok()
            .copied()
    }

    pub fn monster(&self, id: u32) -> Option<&MonsterTemplate> {
        self.monsters.iter().find(|m| m.id == id)
    }

    pub fn monster_by_name(&self, name: &str) -> Option<&MonsterTemplate> {
        self.monsters.iter().find(|m| m.name.eq_ignore_ascii_case(name))
    }

    pub fn skills(&self) -> &[Skill] {
        &self.skills
    }

    pub fn skill_by_name(&self, name: &str) -> Option<&Skill> {
        self.skills.iter().find(|s| s.name.eq_ignore_ascii_case(name))
    }

    pub fn starter(&self) -> &StarterKit {
        &self.starter
    }
}
