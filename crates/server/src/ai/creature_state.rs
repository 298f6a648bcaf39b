//! Per-creature behaviour, advanced once per tick.
//!
//! A state never mutates the world itself: [`CreatureState::update`] returns
//! an [`Intent`] that the game applies (and broadcasts).

use super::pathfind::{self, Goal};
use crate::config::CreatureConfig;
use crate::content::Content;
use crate::entity::Creature;
use crate::spatial::WorldMap;
use protocol::{CreatureId, TilePoint};
use rand::Rng;
use std::collections::{BTreeMap, VecDeque};

/// What a creature wants to do this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Idle,
    Step(TilePoint),
    Attack(CreatureId),
}

/// Read access to everything a state looks at while deciding.
pub struct Surroundings<'a> {
    pub map: &'a mut WorldMap,
    pub content: &'a Content,
    pub creatures: &'a BTreeMap<CreatureId, Creature>,
    pub config: &'a CreatureConfig,
    pub tick: u64,
}

#[derive(Debug, Clone)]
pub struct CreatureState {
    /// Roaming is centred here.
    pub home: TilePoint,
    pub path: VecDeque<TilePoint>,
    pub destination: Option<TilePoint>,
    pub goal: Goal,
    pub follow: Option<CreatureId>,
    pub target: Option<CreatureId>,
    /// Set by a teleport; suppresses stairs and warps until the next ordinary move.
    pub warped: bool,
    warped_at: u64,
    next_move: u64,
    next_attack: u64,
    blocked: u32,
}

impl CreatureState {
    pub fn new(home: TilePoint) -> Self {
        Self {
            home,
            path: VecDeque::new(),
            destination: None,
            goal: Goal::Reach,
            follow: None,
            target: None,
            warped: false,
            warped_at: 0,
            next_move: 0,
            next_attack: 0,
            blocked: 0,
        }
    }

    pub fn mark_warped(&mut self, tick: u64) {
        self.warped = true;
        self.warped_at = tick;
        self.clear_destination();
    }

    pub fn set_destination(&mut self, to: TilePoint, goal: Goal) {
        self.destination = Some(to);
        self.goal = goal;
        self.path.clear();
        self.blocked = 0;
    }

    pub fn clear_destination(&mut self) {
        self.destination = None;
        self.path.clear();
        self.blocked = 0;
    }

    /// Set a destination and plan the route to it right away.
    pub fn move_to(&mut self, from: TilePoint, to: TilePoint, goal: Goal, surroundings: &mut Surroundings) -> bool {
        self.set_destination(to, goal);
        self.plan(from, surroundings)
    }

    pub fn follow(&mut self, leader: CreatureId) {
        self.follow = Some(leader);
    }

    pub fn attack(&mut self, target: CreatureId) {
        self.target = Some(target);
    }

    /// Drop every reference to a creature that left the world.
    pub fn forget(&mut self, id: CreatureId) {
        if self.target == Some(id) {
            self.target = None;
            self.clear_destination();
        }
        if self.follow == Some(id) {
            self.follow = None;
            self.clear_destination();
        }
    }

    fn plan(&mut self, from: TilePoint, surroundings: &mut Surroundings) -> bool {
        let Some(to) = self.destination else {
            return false;
        };
        let radius = surroundings.config.path_search_radius;
        match pathfind::find_path(surroundings.map, surroundings.content, from, to, self.goal, radius) {
            Some(steps) => {
                self.path = steps.into();
                true
            }
            None => {
                self.path.clear();
                false
            }
        }
    }

    /// Count a failed step; past the repath limit the destination is dropped.
    fn note_blocked(&mut self, config: &CreatureConfig) {
        self.path.clear();
        self.blocked += 1;
        if self.blocked > config.repath_limit {
            self.destination = None;
            self.blocked = 0;
        }
    }

    pub fn update<R: Rng + ?Sized>(&mut self, creature: &Creature, surroundings: &mut Surroundings, rng: &mut R) -> Intent {
        let tick = surroundings.tick;
        if self.warped && tick <= self.warped_at + 1 {
            return Intent::Idle;
        }

        if let Some(intent) = self.think_combat(creature, surroundings) {
            return intent;
        }
        if creature.is_player() {
            return Intent::Idle;
        }
        if self.target.is_none() {
            self.think_follow(creature, surroundings);
        }
        if self.destination.is_none() && self.follow.is_none() && self.target.is_none() {
            self.think_roam(creature, surroundings, rng);
        }

        self.step(creature, surroundings)
    }

    fn think_combat(&mut self, creature: &Creature, surroundings: &mut Surroundings) -> Option<Intent> {
        let target_id = self.target?;
        let radius = surroundings.config.path_search_radius;
        let target_pos = match surroundings.creatures.get(&target_id) {
            Some(target) if target.pos.same_plane(&creature.pos) && target.pos.chebyshev(&creature.pos) <= radius => {
                target.pos
            }
            _ => {
                self.target = None;
                self.clear_destination();
                return None;
            }
        };

        if creature.pos.chebyshev(&target_pos) <= 1 {
            if surroundings.tick >= self.next_attack {
                let speed = u64::from(creature.stats.attack_speed.max(1));
                self.next_attack = surroundings.tick + (surroundings.config.attack_ticks_base / speed).max(1);
                return Some(Intent::Attack(target_id));
            }
            return Some(Intent::Idle);
        }

        if !creature.is_player() && self.destination != Some(target_pos) {
            self.set_destination(target_pos, Goal::Adjacent);
        }
        None
    }

    fn think_follow(&mut self, creature: &Creature, surroundings: &mut Surroundings) {
        let Some(leader_id) = self.follow else {
            return;
        };
        match surroundings.creatures.get(&leader_id) {
            None => {
                self.follow = None;
                self.clear_destination();
            }
            Some(leader) if leader.pos.same_plane(&creature.pos) => {
                if leader.pos.chebyshev(&creature.pos) <= 1 {
                    self.clear_destination();
                } else if self.destination != Some(leader.pos) {
                    self.set_destination(leader.pos, Goal::Adjacent);
                }
            }
            // Waits until the leader comes back to this level.
            Some(_) => self.clear_destination(),
        }
    }

    fn think_roam<R: Rng + ?Sized>(&mut self, creature: &Creature, surroundings: &mut Surroundings, rng: &mut R) {
        let Some(radius) = creature.roam.filter(|&r| r > 0) else {
            return;
        };
        if !rng.random_ratio(1, 20) {
            return;
        }
        let spot = self
            .home
            .offset(rng.random_range(-radius..=radius), rng.random_range(-radius..=radius));
        if spot != creature.pos && surroundings.map.walkable(&spot, surroundings.content) {
            self.set_destination(spot, Goal::Reach);
        }
    }

    fn step(&mut self, creature: &Creature, surroundings: &mut Surroundings) -> Intent {
        let tick = surroundings.tick;
        let Some(destination) = self.destination else {
            return Intent::Idle;
        };
        if tick < self.next_move {
            return Intent::Idle;
        }
        if self.goal.satisfied(creature.pos, destination) {
            self.clear_destination();
            return Intent::Idle;
        }
        if self.path.is_empty() && !self.plan(creature.pos, surroundings) {
            self.note_blocked(surroundings.config);
            return Intent::Idle;
        }

        let Some(&next) = self.path.front() else {
            return Intent::Idle;
        };
        if next.chebyshev(&creature.pos) == 1
            && next.same_plane(&creature.pos)
            && pathfind::passable(surroundings.map, surroundings.content, &next)
        {
            self.path.pop_front();
            self.blocked = 0;
            let speed = u64::from(creature.speed.max(1));
            self.next_move = tick + (surroundings.config.move_ticks_base / speed).max(1);
            Intent::Step(next)
        } else {
            self.note_blocked(surroundings.config);
            Intent::Idle
        }
    }
}
