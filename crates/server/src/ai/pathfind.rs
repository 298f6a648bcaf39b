//! Bounded A* over the tile grid.

use crate::content::{Content, MINE};
use crate::spatial::WorldMap;
use protocol::TilePoint;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Neighbour order; fixed so equal-cost searches always pick the same path.
const DIRECTIONS: [(i32, i32); 8] = [(0, -1), (1, 0), (0, 1), (-1, 0), (1, -1), (1, 1), (-1, 1), (-1, -1)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Goal {
    /// Stand on the target tile.
    Reach,
    /// Stand on any tile touching the target (the target itself may be occupied).
    Adjacent,
}

impl Goal {
    pub fn satisfied(self, at: TilePoint, target: TilePoint) -> bool {
        match self {
            Goal::Reach => at == target,
            Goal::Adjacent => at.chebyshev(&target) <= 1 && at != target,
        }
    }
}

const STRAIGHT: i32 = 10;
const DIAGONAL: i32 = 14;

/// Octile distance in step-cost units.
fn estimate(a: &TilePoint, b: &TilePoint) -> i32 {
    let dx = (a.x - b.x).abs();
    let dy = (a.y - b.y).abs();
    STRAIGHT * dx.max(dy) + (DIAGONAL - STRAIGHT) * dx.min(dy)
}

pub(crate) fn passable(map: &mut WorldMap, content: &Content, loc: &TilePoint) -> bool {
    map.walkable(loc, content) && map.tile(loc).floor != MINE
}

/// Steps from `from` (exclusive) towards `to`, never leaving the square of
/// half-width `radius` around `from`. Mine floors are avoided.
///
/// Returns `None` when the goal cannot be reached inside the square.
pub fn find_path(
    map: &mut WorldMap,
    content: &Content,
    from: TilePoint,
    to: TilePoint,
    goal: Goal,
    radius: i32,
) -> Option<Vec<TilePoint>> {
    if !from.same_plane(&to) || from.chebyshev(&to) > radius {
        return None;
    }
    if goal.satisfied(from, to) {
        return Some(Vec::new());
    }

    let mut open = BinaryHeap::new();
    let mut came_from: HashMap<TilePoint, TilePoint> = HashMap::new();
    let mut cost: HashMap<TilePoint, i32> = HashMap::new();
    cost.insert(from, 0);
    open.push(Reverse((estimate(&from, &to), 0, from)));

    while let Some(Reverse((_, g, current))) = open.pop() {
        if goal.satisfied(current, to) {
            let mut path = vec![current];
            let mut at = current;
            while let Some(&previous) = came_from.get(&at) {
                if previous == from {
                    break;
                }
                path.push(previous);
                at = previous;
            }
            path.reverse();
            return Some(path);
        }
        if cost.get(&current).is_some_and(|&best| g > best) {
            continue;
        }

        for (dx, dy) in DIRECTIONS {
            let next = current.offset(dx, dy);
            if next.chebyshev(&from) > radius || !passable(map, content, &next) {
                continue;
            }
            let step = if dx != 0 && dy != 0 { DIAGONAL } else { STRAIGHT };
            let next_cost = g + step;
            if cost.get(&next).is_some_and(|&best| best <= next_cost) {
                continue;
            }
            cost.insert(next, next_cost);
            came_from.insert(next, current);
            open.push(Reverse((next_cost + estimate(&next, &to), next_cost, next)));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::RetryPolicy;
    use protocol::Item;

    fn setup() -> (WorldMap, Content) {
        let mut map = WorldMap::new(None, RetryPolicy::default());
        map.add_partition(0, 40, 40, 1);
        (map, Content::builtin().unwrap())
    }

    #[test]
    fn test_straight_line() {
        let (mut map, content) = setup();
        let from = TilePoint::new(0, 5, 5, 0);
        let path = find_path(&mut map, &content, from, from.offset(3, 0), Goal::Reach, 10).unwrap();
        assert_eq!(path, vec![from.offset(1, 0), from.offset(2, 0), from.offset(3, 0)]);
    }

    #[test]
    fn test_routes_around_wall() {
        let (mut map, content) = setup();
        let boulder = content.item_by_name("Boulder").unwrap().id;
        let from = TilePoint::new(0, 5, 5, 0);
        for dy in -1..=1 {
            map.set_item(&from.offset(1, dy), Some(Item::new(boulder, 1))).unwrap();
        }
        let to = from.offset(2, 0);
        let path = find_path(&mut map, &content, from, to, Goal::Reach, 10).unwrap();
        assert_eq!(path.last(), Some(&to));
        assert!(path.iter().all(|p| map.walkable(p, &content)));
        assert_eq!(path.len(), 4);
    }

    #[test]
    fn test_adjacent_goal_stops_next_to_occupied_target() {
        let (mut map, content) = setup();
        let from = TilePoint::new(0, 5, 5, 0);
        let to = from.offset(4, 0);
        map.claim(to, 9);
        assert!(find_path(&mut map, &content, from, to, Goal::Reach, 10).is_none());
        let path = find_path(&mut map, &content, from, to, Goal::Adjacent, 10).unwrap();
        assert_eq!(path.last(), Some(&from.offset(3, 0)));
    }

    #[test]
    fn test_out_of_radius_and_mines() {
        let (mut map, content) = setup();
        let from = TilePoint::new(0, 5, 5, 0);
        assert!(find_path(&mut map, &content, from, from.offset(8, 0), Goal::Reach, 4).is_none());

        let target = from.offset(1, 0);
        map.set_floor(&target, MINE).unwrap();
        assert!(find_path(&mut map, &content, from, target, Goal::Reach, 4).is_none());
    }
}
