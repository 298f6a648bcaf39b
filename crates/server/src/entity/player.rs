//! Persistent player records while the player is in the world.

use super::creature::{Creature, PLAYER_FOOD};
use crate::persistence::PlayerRecord;
use protocol::{ContainerId, CreatureId, Graphics, Meter, PlayerId, SkillXp, TilePoint};
use std::collections::BTreeMap;

const PLAYER_GRAPHICS: &str = "rpgwo-player0.png";
const PLAYER_SPEED: u32 = 2;
const PLAYER_METER: i32 = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub is_admin: bool,
    pub skills: BTreeMap<u32, u64>,
    pub container_id: ContainerId,
    pub equipment_container_id: ContainerId,
    pub creature_id: CreatureId,
}

impl Player {
    /// A brand-new player's record, before it has ever entered the world.
    pub fn new_record(
        id: PlayerId,
        name: &str,
        pos: TilePoint,
        container_id: ContainerId,
        equipment_container_id: ContainerId,
    ) -> PlayerRecord {
        PlayerRecord {
            id,
            name: name.to_string(),
            is_admin: true,
            skills: BTreeMap::new(),
            container_id,
            equipment_container_id,
            pos,
            life: Meter::full(PLAYER_METER),
            stamina: Meter::full(PLAYER_METER),
            mana: Meter::full(PLAYER_METER),
        }
    }

    /// Split a stored record into the session's player and its avatar.
    pub fn from_record(record: PlayerRecord, creature_id: CreatureId) -> (Player, Creature) {
        let creature = Creature {
            id: creature_id,
            name: record.name.clone(),
            pos: record.pos,
            graphics: Graphics {
                file: PLAYER_GRAPHICS.to_string(),
                index: record.id % 5,
            },
            player_id: Some(record.id),
            template_id: None,
            tamed_by: None,
            speed: PLAYER_SPEED,
            life: record.life,
            stamina: record.stamina,
            mana: record.mana,
            light: 0,
            stats: Default::default(),
            appearance: Vec::new(),
            food: PLAYER_FOOD,
            eat_grass: false,
            roam: None,
            tameable: false,
        };
        let player = Player {
            id: record.id,
            name: record.name,
            is_admin: record.is_admin,
            skills: record.skills,
            container_id: record.container_id,
            equipment_container_id: record.equipment_container_id,
            creature_id,
        };
        (player, creature)
    }

    pub fn to_record(&self, creature: &Creature) -> PlayerRecord {
        PlayerRecord {
            id: self.id,
            name: self.name.clone(),
            is_admin: self.is_admin,
            skills: self.skills.clone(),
            container_id: self.container_id,
            equipment_container_id: self.equipment_container_id,
            pos: creature.pos,
            // A dead player comes back with some life.
            life: if creature.is_dead() {
                Meter::full(creature.life.max)
            } else {
                creature.life
            },
            stamina: creature.stamina,
            mana: creature.mana,
        }
    }

    /// Add xp to a skill, returning the new total.
    pub fn grant_xp(&mut self, skill: u32, xp: u64) -> u64 {
        let total = self.skills.entry(skill).or_insert(0);
        *total += xp;
        *total
    }

    pub fn skill_list(&self) -> Vec<SkillXp> {
        self.skills
            .iter()
            .map(|(&skill, &xp)| SkillXp { skill, xp })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_round_trip_keeps_position_and_skills() {
        let pos = TilePoint::new(0, 12, 14, 0);
        let record = Player::new_record(3, "Ada", pos, 10, 11);
        let (mut player, mut creature) = Player::from_record(record, 42);
        assert_eq!(player.creature_id, 42);
        assert_eq!(creature.player_id, Some(3));
        assert_eq!(player.grant_xp(4, 10), 10);
        assert_eq!(player.grant_xp(4, 5), 15);

        creature.pos = pos.offset(1, 0);
        let saved = player.to_record(&creature);
        assert_eq!(saved.pos, pos.offset(1, 0));
        assert_eq!(saved.skills.get(&4), Some(&15));
        assert_eq!(player.skill_list(), vec![SkillXp { skill: 4, xp: 15 }]);
    }

    #[test]
    fn test_dead_player_saved_with_full_life() {
        let record = Player::new_record(1, "Bo", TilePoint::default(), 1, 2);
        let (player, mut creature) = Player::from_record(record, 9);
        creature.life.adjust(-1000);
        assert_eq!(player.to_record(&creature).life, Meter::full(PLAYER_METER));
    }
}
