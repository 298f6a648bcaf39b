//! Deterministic outward ring search order.

use protocol::TilePoint;

/// Perimeter of the square ring at Chebyshev distance `radius` around `origin`.
///
/// Rows go top to bottom. The top and bottom rows run left to right; each
/// row in between yields its left column before its right column.
pub fn ring(origin: TilePoint, radius: i32) -> Vec<TilePoint> {
    if radius == 0 {
        return vec![origin];
    }

    let mut points = Vec::with_capacity((radius * 8) as usize);
    for y in origin.y - radius..=origin.y + radius {
        if y == origin.y - radius || y == origin.y + radius {
            for x in origin.x - radius..=origin.x + radius {
                points.push(TilePoint { x, y, ..origin });
            }
        } else {
            points.push(TilePoint { x: origin.x - radius, y, ..origin });
            points.push(TilePoint { x: origin.x + radius, y, ..origin });
        }
    }
    points
}

/// Every point within `range`, nearest rings first.
pub fn search_order(origin: TilePoint, range: i32, include_origin: bool) -> impl Iterator<Item = TilePoint> {
    let first = if include_origin { 0 } else { 1 };
    (first..=range).flat_map(move |radius| ring(origin, radius))
}
