use std::collections::{HashSet, VecDeque};

use crate::constants::{queue_max_length, shop_effect};
use crate::rng::Rng;
use crate::types::{
    Building, Direction, ParkConfig, ParkGrid, ParkState, PatrolArea, PathTile, Ride, RideKind,
    RideQueue, RideStats, RideStatus, Scenery, Shop, ShopKind, Staff, StaffKind, StaffState, Vec2,
};

/// A guest may step from `from` towards `dir` only when both tiles carry
/// path and both facing edges are open. An asymmetric edge blocks silently.
pub fn can_traverse(grid: &ParkGrid, from: Vec2, dir: Direction) -> bool {
    let Some(origin) = grid.path_at(from) else {
        return false;
    };
    if !origin.edges.has(dir) {
        return false;
    }
    grid.path_at(from.step(dir))
        .map(|target| target.edges.has(dir.opposite()))
        .unwrap_or(false)
}

pub fn is_walkable(grid: &ParkGrid, pos: Vec2) -> bool {
    grid.path_at(pos).is_some()
}

pub fn is_queue_tile(grid: &ParkGrid, pos: Vec2) -> bool {
    grid.path_at(pos).map(|path| path.queue).unwrap_or(false)
}

pub fn walkable_neighbors(grid: &ParkGrid, pos: Vec2) -> Vec<(Direction, Vec2)> {
    Direction::ALL
        .into_iter()
        .filter(|dir| can_traverse(grid, pos, *dir))
        .map(|dir| (dir, pos.step(dir)))
        .collect()
}

pub fn connected_queue_tiles(grid: &ParkGrid, ride_id: u32, entry: Vec2) -> usize {
    let belongs = |pos: Vec2| {
        grid.path_at(pos)
            .map(|path| path.queue && path.ride_id == Some(ride_id))
            .unwrap_or(false)
    };
    if !belongs(entry) {
        return 0;
    }

    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    seen.insert(entry);
    queue.push_back(entry);
    while let Some(pos) = queue.pop_front() {
        for (_, next) in walkable_neighbors(grid, pos) {
            if belongs(next) && seen.insert(next) {
                queue.push_back(next);
            }
        }
    }
    seen.len()
}

pub fn ride_max_queue_length(grid: &ParkGrid, ride: &Ride) -> usize {
    queue_max_length(connected_queue_tiles(grid, ride.id, ride.queue.entry))
}

pub fn ride_exit_tiles(grid: &ParkGrid, ride: &Ride) -> Vec<Vec2> {
    let mut out = Vec::new();
    for y in (ride.position.y - 1)..=(ride.position.y + ride.size.y) {
        for x in (ride.position.x - 1)..=(ride.position.x + ride.size.x) {
            let pos = Vec2::new(x, y);
            if ride.contains(pos) {
                continue;
            }
            let touches = Direction::ALL
                .into_iter()
                .any(|dir| ride.contains(pos.step(dir)));
            if !touches {
                continue;
            }
            if is_walkable(grid, pos) && !is_queue_tile(grid, pos) {
                out.push(pos);
            }
        }
    }
    out
}

pub fn queue_entry_exit_tiles(grid: &ParkGrid, ride: &Ride) -> Vec<Vec2> {
    walkable_neighbors(grid, ride.queue.entry)
        .into_iter()
        .map(|(_, pos)| pos)
        .filter(|pos| !is_queue_tile(grid, *pos))
        .collect()
}

pub fn lay_path(grid: &mut ParkGrid, pos: Vec2) {
    if let Some(tile) = grid.tile_mut(pos) {
        if tile.path.is_none() {
            tile.path = Some(PathTile::default());
        }
    }
}

pub fn connect(grid: &mut ParkGrid, a: Vec2, b: Vec2) -> bool {
    let Some(dir) = Direction::between(a, b) else {
        return false;
    };
    lay_path(grid, a);
    lay_path(grid, b);
    if let Some(path) = grid.tile_mut(a).and_then(|tile| tile.path.as_mut()) {
        path.edges.set(dir, true);
    }
    if let Some(path) = grid.tile_mut(b).and_then(|tile| tile.path.as_mut()) {
        path.edges.set(dir.opposite(), true);
    }
    true
}

pub fn lay_path_line(grid: &mut ParkGrid, from: Vec2, to: Vec2) {
    lay_path(grid, from);
    if from.x != to.x && from.y != to.y {
        return;
    }
    let step_x = (to.x - from.x).signum();
    let step_y = (to.y - from.y).signum();
    let mut current = from;
    while current != to {
        let next = Vec2::new(current.x + step_x, current.y + step_y);
        connect(grid, current, next);
        current = next;
    }
}

impl ParkState {
    fn allocate_entity_id(&mut self) -> u32 {
        let id = self.next_entity_id;
        self.next_entity_id = self.next_entity_id.saturating_add(1);
        id
    }

    /// Places a ride footprint and its queue line. `queue_tiles[0]` is the
    /// entry and is joined to any adjacent plain path tile; the last queue
    /// tile is the boarding entrance.
    pub fn add_ride(
        &mut self,
        kind: RideKind,
        position: Vec2,
        size: Vec2,
        queue_tiles: &[Vec2],
    ) -> u32 {
        let id = self.allocate_entity_id();
        let profile = kind.profile();

        for y in position.y..position.y + size.y {
            for x in position.x..position.x + size.x {
                if let Some(tile) = self.grid.tile_mut(Vec2::new(x, y)) {
                    tile.building = Some(Building::Ride { ride_id: id });
                }
            }
        }

        for pos in queue_tiles {
            lay_path(&mut self.grid, *pos);
            if let Some(path) = self.grid.tile_mut(*pos).and_then(|tile| tile.path.as_mut()) {
                path.queue = true;
                path.ride_id = Some(id);
            }
        }
        for pair in queue_tiles.windows(2) {
            connect(&mut self.grid, pair[0], pair[1]);
        }
        if let Some(entry) = queue_tiles.first().copied() {
            for dir in Direction::ALL {
                let neighbor = entry.step(dir);
                if is_walkable(&self.grid, neighbor) && !is_queue_tile(&self.grid, neighbor) {
                    connect(&mut self.grid, entry, neighbor);
                }
            }
        }

        let entry = queue_tiles.first().copied().unwrap_or(position);
        let entrance = queue_tiles.last().copied().unwrap_or(position);
        let mut ride = Ride {
            id,
            name: format!("{:?} {}", kind, id),
            kind,
            position,
            size,
            entrance,
            queue: RideQueue {
                entry,
                guest_ids: Vec::new(),
                max_length: 0,
            },
            status: RideStatus::Open,
            cycle_timer: 0,
            price: profile.price,
            stats: RideStats {
                capacity: profile.capacity,
                ride_time: profile.ride_time,
                total_riders: 0,
                total_revenue: 0,
                uptime: 100.0,
                reliability: profile.reliability,
                last_breakdown_tick: None,
            },
            excitement: profile.excitement,
            intensity: profile.intensity,
            nausea: profile.nausea,
            built_tick: self.tick,
        };
        ride.queue.max_length = ride_max_queue_length(&self.grid, &ride);
        self.rides.push(ride);
        id
    }

    pub fn add_shop(&mut self, kind: ShopKind, position: Vec2, access: Vec2) -> u32 {
        let id = self.allocate_entity_id();
        if let Some(tile) = self.grid.tile_mut(position) {
            tile.building = Some(Building::Shop { shop_id: id });
        }
        lay_path(&mut self.grid, access);
        self.shops.push(Shop {
            id,
            kind,
            position,
            access,
            price: shop_effect(kind).price,
            open: true,
            total_sales: 0,
            total_revenue: 0,
        });
        id
    }

    pub fn hire_staff(
        &mut self,
        kind: StaffKind,
        position: Vec2,
        patrol_area: Option<PatrolArea>,
    ) -> u32 {
        let id = self.allocate_entity_id();
        self.staff.push(Staff {
            id,
            kind,
            x: position.x,
            y: position.y,
            direction: Direction::North,
            progress: 0.0,
            state: StaffState::Idle,
            fatigue: 0.0,
            patrol_area,
            wage: kind.default_wage(),
        });
        id
    }
}

pub fn generate_demo_park(seed: u32, config: ParkConfig) -> ParkState {
    let mut grid = ParkGrid::new(32, 20);
    let entrance = Vec2::new(16, 19);

    lay_path_line(&mut grid, Vec2::new(2, 12), Vec2::new(29, 12));
    lay_path_line(&mut grid, Vec2::new(16, 12), entrance);
    if let Some(tile) = grid.tile_mut(entrance) {
        tile.building = Some(Building::Entrance);
    }

    let mut rng = Rng::new(seed ^ 0x5eed);
    for _ in 0..24 {
        let pos = Vec2::new(rng.range_i32(0, 31), rng.range_i32(0, 19));
        if let Some(tile) = grid.tile_mut(pos) {
            if tile.path.is_none() && tile.building.is_none() {
                tile.scenery = Some(if rng.chance(0.7) {
                    Scenery::Tree
                } else {
                    Scenery::Flowers
                });
            }
        }
    }

    let mut park = ParkState::new(grid, entrance, config, seed);

    park.add_ride(
        RideKind::Carousel,
        Vec2::new(3, 7),
        Vec2::new(3, 3),
        &[Vec2::new(4, 11), Vec2::new(4, 10)],
    );
    lay_path_line(&mut park.grid, Vec2::new(6, 7), Vec2::new(6, 12));
    park.add_ride(
        RideKind::FerrisWheel,
        Vec2::new(9, 7),
        Vec2::new(3, 3),
        &[Vec2::new(10, 11), Vec2::new(10, 10)],
    );
    lay_path_line(&mut park.grid, Vec2::new(12, 7), Vec2::new(12, 12));
    park.add_ride(
        RideKind::Coaster,
        Vec2::new(20, 5),
        Vec2::new(6, 4),
        &[
            Vec2::new(21, 11),
            Vec2::new(21, 10),
            Vec2::new(22, 10),
            Vec2::new(22, 9),
        ],
    );
    lay_path_line(&mut park.grid, Vec2::new(26, 5), Vec2::new(26, 12));
    park.add_ride(
        RideKind::LogFlume,
        Vec2::new(3, 14),
        Vec2::new(4, 3),
        &[Vec2::new(4, 13)],
    );
    lay_path_line(&mut park.grid, Vec2::new(7, 16), Vec2::new(7, 12));
    park.add_ride(
        RideKind::SpinningCups,
        Vec2::new(20, 14),
        Vec2::new(3, 3),
        &[Vec2::new(21, 13)],
    );
    lay_path_line(&mut park.grid, Vec2::new(23, 16), Vec2::new(23, 12));

    park.add_shop(ShopKind::FoodStall, Vec2::new(13, 11), Vec2::new(13, 12));
    park.add_shop(ShopKind::DrinkStall, Vec2::new(14, 11), Vec2::new(14, 12));
    park.add_shop(ShopKind::IceCreamStall, Vec2::new(17, 13), Vec2::new(16, 13));
    park.add_shop(ShopKind::Restroom, Vec2::new(15, 14), Vec2::new(16, 14));
    park.add_shop(ShopKind::FirstAid, Vec2::new(17, 15), Vec2::new(16, 15));

    park.hire_staff(StaffKind::Handyman, Vec2::new(16, 12), None);
    park.hire_staff(
        StaffKind::Mechanic,
        Vec2::new(12, 12),
        Some(PatrolArea {
            min_x: 2,
            min_y: 9,
            max_x: 29,
            max_y: 13,
        }),
    );
    park.hire_staff(StaffKind::Entertainer, Vec2::new(8, 12), None);
    park.hire_staff(StaffKind::Security, Vec2::new(24, 12), None);
    park
}
