use pathfinding::prelude::bfs;

use crate::types::{ParkGrid, Vec2};
use crate::world::walkable_neighbors;

/// Route lookup consumed by the movement engine. A result shorter than two
/// waypoints means the target is unreachable.
pub trait PathFinder {
    fn find_path(&self, start: Vec2, end: Vec2, grid: &ParkGrid) -> Option<Vec<Vec2>>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct GridPathFinder;

impl PathFinder for GridPathFinder {
    fn find_path(&self, start: Vec2, end: Vec2, grid: &ParkGrid) -> Option<Vec<Vec2>> {
        if grid.path_at(start).is_none() || grid.path_at(end).is_none() {
            return None;
        }
        bfs(
            &start,
            |pos| {
                walkable_neighbors(grid, *pos)
                    .into_iter()
                    .map(|(_, next)| next)
                    .collect::<Vec<_>>()
            },
            |pos| *pos == end,
        )
    }
}

pub fn usable_route(route: Option<Vec<Vec2>>) -> Option<Vec<Vec2>> {
    route.filter(|waypoints| waypoints.len() >= 2)
}
