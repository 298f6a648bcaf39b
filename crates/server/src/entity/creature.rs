//! Creatures: players' avatars and monsters.

use super::container::Container;
use crate::content::{Content, ItemClass, MonsterTemplate};
use protocol::{CombatStats, CreatureId, CreatureView, Graphics, Meter, PlayerId, TilePoint};

/// Food a player starts with.
pub const PLAYER_FOOD: u32 = 100;
/// Food a monster starts with.
pub const MONSTER_FOOD: u32 = 10;
/// Life, stamina and mana of a monster whose template leaves them unset.
const DEFAULT_METER: i32 = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct Creature {
    pub id: CreatureId,
    pub name: String,
    pub pos: TilePoint,
    pub graphics: Graphics,
    /// Set for player avatars.
    pub player_id: Option<PlayerId>,
    /// Monster template this creature was made from.
    pub template_id: Option<u32>,
    pub tamed_by: Option<PlayerId>,
    pub speed: u32,
    pub life: Meter,
    pub stamina: Meter,
    pub mana: Meter,
    pub light: u32,
    pub stats: CombatStats,
    /// Item type worn per equipment slot.
    pub appearance: Vec<Option<u32>>,
    pub food: u32,
    pub eat_grass: bool,
    pub roam: Option<i32>,
    pub tameable: bool,
}

impl Creature {
    pub fn from_template(id: CreatureId, template: &MonsterTemplate, pos: TilePoint) -> Self {
        Self {
            id,
            name: template.name.clone(),
            pos,
            graphics: template.graphics.clone(),
            player_id: None,
            template_id: Some(template.id),
            tamed_by: None,
            speed: template.speed,
            life: Meter::full(template.life.unwrap_or(DEFAULT_METER)),
            stamina: Meter::full(template.stamina.unwrap_or(DEFAULT_METER)),
            mana: Meter::full(template.mana.unwrap_or(DEFAULT_METER)),
            light: 0,
            stats: CombatStats {
                armor: 0,
                attack_speed: template.speed.max(1),
                damage_low: template.damage_low,
                damage_high: template.damage_high.max(template.damage_low),
                magic_defense: template.magic_defense,
                melee_defense: template.melee_defense,
                missile_defense: template.missile_defense,
            },
            appearance: Vec::new(),
            food: MONSTER_FOOD,
            eat_grass: template.eat_grass,
            roam: template.roam,
            tameable: template.tameable,
        }
    }

    pub fn is_player(&self) -> bool {
        self.player_id.is_some()
    }

    pub fn is_dead(&self) -> bool {
        self.life.current <= 0
    }

    /// Full snapshot.
    pub fn view(&self) -> CreatureView {
        CreatureView {
            id: self.id,
            name: Some(self.name.clone()),
            pos: Some(self.pos),
            graphics: Some(self.graphics.clone()),
            is_player: Some(self.is_player()),
            tamed_by: self.tamed_by,
            speed: Some(self.speed),
            life: Some(self.life),
            stamina: Some(self.stamina),
            mana: Some(self.mana),
            light: Some(self.light),
            stats: Some(self.stats),
            appearance: Some(self.appearance.clone()),
        }
    }

    /// Empty partial update; callers fill in the changed fields.
    pub fn partial(&self) -> CreatureView {
        CreatureView {
            id: self.id,
            ..CreatureView::default()
        }
    }

    /// Recompute appearance and combat stats from worn equipment.
    ///
    /// A weapon sets damage and attack speed; every worn piece adds its
    /// armor level.
    pub fn apply_equipment(&mut self, equipment: &Container, content: &Content) {
        self.appearance = equipment.items.iter().map(|slot| slot.as_ref().map(|item| item.kind)).collect();
        let mut stats = CombatStats {
            magic_defense: self.stats.magic_defense,
            melee_defense: self.stats.melee_defense,
            missile_defense: self.stats.missile_defense,
            ..CombatStats::default()
        };
        for item in equipment.items.iter().flatten() {
            let meta = content.item(item.kind);
            if meta.class == ItemClass::Weapon {
                stats.damage_low = meta.damage_low.max(1);
                stats.damage_high = meta.damage_high.max(stats.damage_low);
                stats.attack_speed = meta.attack_speed.max(1);
            }
            stats.armor += meta.armor_level;
        }
        self.stats = stats;
    }
}
