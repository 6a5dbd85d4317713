use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::guest_state::GuestState;
use crate::rng::Rng;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    North,
    East,
    South,
    West,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
    ];

    pub fn opposite(self) -> Self {
        match self {
            Self::North => Self::South,
            Self::East => Self::West,
            Self::South => Self::North,
            Self::West => Self::East,
        }
    }

    pub fn delta(self) -> (i32, i32) {
        match self {
            Self::North => (0, -1),
            Self::East => (1, 0),
            Self::South => (0, 1),
            Self::West => (-1, 0),
        }
    }

    pub fn between(from: Vec2, to: Vec2) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|dir| from.step(*dir) == to)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: i32,
    pub y: i32,
}

impl Vec2 {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn step(self, dir: Direction) -> Self {
        let (dx, dy) = dir.delta();
        Self::new(self.x + dx, self.y + dy)
    }

    pub fn manhattan(self, other: Vec2) -> i32 {
        (self.x - other.x).abs() + (self.y - other.y).abs()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edges {
    pub north: bool,
    pub east: bool,
    pub south: bool,
    pub west: bool,
}

impl Edges {
    pub fn all() -> Self {
        Self {
            north: true,
            east: true,
            south: true,
            west: true,
        }
    }

    pub fn has(&self, dir: Direction) -> bool {
        match dir {
            Direction::North => self.north,
            Direction::East => self.east,
            Direction::South => self.south,
            Direction::West => self.west,
        }
    }

    pub fn set(&mut self, dir: Direction, open: bool) {
        match dir {
            Direction::North => self.north = open,
            Direction::East => self.east = open,
            Direction::South => self.south = open,
            Direction::West => self.west = open,
        }
    }

    pub fn open_directions(&self) -> Vec<Direction> {
        Direction::ALL
            .into_iter()
            .filter(|dir| self.has(*dir))
            .collect()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathTile {
    pub edges: Edges,
    pub queue: bool,
    pub ride_id: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Building {
    Entrance,
    Shop {
        #[serde(rename = "shopId")]
        shop_id: u32,
    },
    Ride {
        #[serde(rename = "rideId")]
        ride_id: u32,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackPiece {
    pub ride_id: u32,
    pub connections: Edges,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenery {
    Tree,
    Flowers,
    Fountain,
    Bench,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Tile {
    pub path: Option<PathTile>,
    pub building: Option<Building>,
    pub track: Option<TrackPiece>,
    pub scenery: Option<Scenery>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParkGrid {
    pub width: i32,
    pub height: i32,
    pub tiles: Vec<Tile>,
}

impl ParkGrid {
    pub fn new(width: i32, height: i32) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        Self {
            width,
            height,
            tiles: vec![Tile::default(); (width * height) as usize],
        }
    }

    pub fn in_bounds(&self, pos: Vec2) -> bool {
        pos.x >= 0 && pos.y >= 0 && pos.x < self.width && pos.y < self.height
    }

    pub fn tile(&self, pos: Vec2) -> Option<&Tile> {
        if !self.in_bounds(pos) {
            return None;
        }
        self.tiles.get((pos.y * self.width + pos.x) as usize)
    }

    pub fn tile_mut(&mut self, pos: Vec2) -> Option<&mut Tile> {
        if !self.in_bounds(pos) {
            return None;
        }
        self.tiles.get_mut((pos.y * self.width + pos.x) as usize)
    }

    pub fn path_at(&self, pos: Vec2) -> Option<&PathTile> {
        self.tile(pos).and_then(|tile| tile.path.as_ref())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Needs {
    pub hunger: f32,
    pub thirst: f32,
    pub bathroom: f32,
    pub energy: f32,
    pub nausea: f32,
    pub happiness: f32,
}

impl Default for Needs {
    fn default() -> Self {
        Self {
            hunger: 200.0,
            thirst: 200.0,
            bathroom: 200.0,
            energy: 220.0,
            nausea: 0.0,
            happiness: 180.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ThoughtKind {
    Hungry,
    Thirsty,
    NeedRestroom,
    Tired,
    Sick,
    RideWasGreat {
        #[serde(rename = "rideId")]
        ride_id: u32,
    },
    QueueTooLong {
        #[serde(rename = "rideId")]
        ride_id: u32,
    },
    CannotFind,
    OutOfMoney,
    GoingHome,
    EnjoyedShop {
        #[serde(rename = "shopId")]
        shop_id: u32,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thought {
    pub tick: u64,
    pub kind: ThoughtKind,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Guest {
    pub id: u32,
    pub x: i32,
    pub y: i32,
    pub progress: f32,
    pub direction: Direction,
    pub state: GuestState,
    pub needs: Needs,
    pub money: i32,
    pub path: Vec<Vec2>,
    pub path_index: usize,
    pub age: u64,
    pub max_age: u64,
    pub thoughts: VecDeque<Thought>,
    pub preferred_intensity: f32,
    pub rides_ridden: u32,
}

impl Guest {
    pub fn position(&self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }

    pub fn is_departed(&self) -> bool {
        self.age >= self.max_age
    }

    pub fn has_active_path(&self) -> bool {
        self.path.len() >= 2 && self.path_index + 1 < self.path.len()
    }

    pub fn clear_path(&mut self) {
        self.path.clear();
        self.path_index = 0;
        self.progress = 0.0;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaffKind {
    Handyman,
    Mechanic,
    Entertainer,
    Security,
}

impl StaffKind {
    pub fn default_wage(self) -> i32 {
        match self {
            Self::Handyman => 50,
            Self::Mechanic => 80,
            Self::Entertainer => 55,
            Self::Security => 60,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaffState {
    Idle,
    Walking,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatrolArea {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

impl PatrolArea {
    pub fn contains(&self, pos: Vec2) -> bool {
        pos.x >= self.min_x && pos.x <= self.max_x && pos.y >= self.min_y && pos.y <= self.max_y
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Staff {
    pub id: u32,
    pub kind: StaffKind,
    pub x: i32,
    pub y: i32,
    pub direction: Direction,
    pub progress: f32,
    pub state: StaffState,
    pub fatigue: f32,
    pub patrol_area: Option<PatrolArea>,
    pub wage: i32,
}

impl Staff {
    pub fn position(&self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    Open,
    Closed,
    Broken,
    Testing,
    Building,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideKind {
    Carousel,
    FerrisWheel,
    SpinningCups,
    LogFlume,
    Coaster,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RideProfile {
    pub capacity: u32,
    pub ride_time: u32,
    pub price: i32,
    pub excitement: f32,
    pub intensity: f32,
    pub nausea: f32,
    pub reliability: f32,
}

impl RideKind {
    pub fn profile(self) -> RideProfile {
        match self {
            Self::Carousel => RideProfile {
                capacity: 16,
                ride_time: 40,
                price: 2,
                excitement: 30.0,
                intensity: 10.0,
                nausea: 8.0,
                reliability: 0.97,
            },
            Self::FerrisWheel => RideProfile {
                capacity: 24,
                ride_time: 60,
                price: 2,
                excitement: 40.0,
                intensity: 15.0,
                nausea: 10.0,
                reliability: 0.96,
            },
            Self::SpinningCups => RideProfile {
                capacity: 12,
                ride_time: 30,
                price: 3,
                excitement: 50.0,
                intensity: 45.0,
                nausea: 90.0,
                reliability: 0.93,
            },
            Self::LogFlume => RideProfile {
                capacity: 8,
                ride_time: 50,
                price: 4,
                excitement: 70.0,
                intensity: 50.0,
                nausea: 40.0,
                reliability: 0.9,
            },
            Self::Coaster => RideProfile {
                capacity: 20,
                ride_time: 45,
                price: 6,
                excitement: 110.0,
                intensity: 90.0,
                nausea: 70.0,
                reliability: 0.85,
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideQueue {
    pub entry: Vec2,
    pub guest_ids: Vec<u32>,
    pub max_length: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideStats {
    pub capacity: u32,
    pub ride_time: u32,
    pub total_riders: u64,
    pub total_revenue: i64,
    pub uptime: f32,
    pub reliability: f32,
    pub last_breakdown_tick: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ride {
    pub id: u32,
    pub name: String,
    pub kind: RideKind,
    pub position: Vec2,
    pub size: Vec2,
    pub entrance: Vec2,
    pub queue: RideQueue,
    pub status: RideStatus,
    pub cycle_timer: u32,
    pub price: i32,
    pub stats: RideStats,
    pub excitement: f32,
    pub intensity: f32,
    pub nausea: f32,
    pub built_tick: u64,
}

impl Ride {
    pub fn contains(&self, pos: Vec2) -> bool {
        pos.x >= self.position.x
            && pos.y >= self.position.y
            && pos.x < self.position.x + self.size.x
            && pos.y < self.position.y + self.size.y
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShopKind {
    FoodStall,
    DrinkStall,
    IceCreamStall,
    Restroom,
    FirstAid,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shop {
    pub id: u32,
    pub kind: ShopKind,
    pub position: Vec2,
    pub access: Vec2,
    pub price: i32,
    pub open: bool,
    pub total_sales: u64,
    pub total_revenue: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finance {
    pub cash: i64,
    pub entrance_revenue: i64,
    pub ride_revenue: i64,
    pub shop_revenue: i64,
    pub staff_cost: i64,
    pub maintenance_cost: i64,
    pub income: i64,
    pub expenses: i64,
    pub entrance_fee: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParkStats {
    pub rating: f32,
    pub cleanliness: f32,
    pub excitement: f32,
    pub nausea: f32,
    pub guests_in_park: usize,
    pub total_guests_admitted: u64,
}

impl Default for ParkStats {
    fn default() -> Self {
        Self {
            rating: 0.0,
            cleanliness: 100.0,
            excitement: 0.0,
            nausea: 0.0,
            guests_in_park: 0,
            total_guests_admitted: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParkClock {
    pub year: u32,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
}

impl Default for ParkClock {
    fn default() -> Self {
        Self {
            year: 1,
            month: 3,
            day: 1,
            hour: 9,
            minute: 0,
        }
    }
}

impl ParkClock {
    pub fn advance_minute(&mut self) {
        self.minute += 1;
        if self.minute < 60 {
            return;
        }
        self.minute = 0;
        self.hour += 1;
        if self.hour < 24 {
            return;
        }
        self.hour = 0;
        self.day += 1;
        if self.day <= 30 {
            return;
        }
        self.day = 1;
        self.month += 1;
        if self.month <= 12 {
            return;
        }
        self.month = 1;
        self.year += 1;
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParkConfig {
    pub park_open: bool,
    pub spawn_interval_ticks: u64,
    pub max_guests: usize,
    pub payroll_interval_ticks: u64,
    pub breakdown_interval_ticks: u64,
    pub repair_ticks: u64,
    pub repair_cost: i64,
    pub guest_money_min: i32,
    pub guest_money_max: i32,
    pub guest_lifetime_min: u64,
    pub guest_lifetime_max: u64,
}

impl Default for ParkConfig {
    fn default() -> Self {
        Self {
            park_open: true,
            spawn_interval_ticks: 20,
            max_guests: 300,
            payroll_interval_ticks: 1_440,
            breakdown_interval_ticks: 600,
            repair_ticks: 120,
            repair_cost: 40,
            guest_money_min: 40,
            guest_money_max: 120,
            guest_lifetime_min: 3_000,
            guest_lifetime_max: 6_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParkState {
    pub tick: u64,
    pub clock: ParkClock,
    /// 0 pauses the park; otherwise each host tick is one simulation step.
    pub speed: u8,
    pub grid: ParkGrid,
    pub entrance: Vec2,
    pub guests: Vec<Guest>,
    pub staff: Vec<Staff>,
    pub rides: Vec<Ride>,
    pub shops: Vec<Shop>,
    pub finance: Finance,
    pub stats: ParkStats,
    pub config: ParkConfig,
    pub next_guest_id: u32,
    pub next_entity_id: u32,
    pub rng: Rng,
}

pub const DEFAULT_ENTRANCE_FEE: i32 = 10;

impl ParkState {
    pub fn new(grid: ParkGrid, entrance: Vec2, config: ParkConfig, seed: u32) -> Self {
        let finance = Finance {
            cash: 10_000,
            entrance_fee: DEFAULT_ENTRANCE_FEE,
            ..Finance::default()
        };
        Self {
            tick: 0,
            clock: ParkClock::default(),
            speed: 1,
            grid,
            entrance,
            guests: Vec::new(),
            staff: Vec::new(),
            rides: Vec::new(),
            shops: Vec::new(),
            finance,
            stats: ParkStats::default(),
            config,
            next_guest_id: 1,
            next_entity_id: 1,
            rng: Rng::new(seed),
        }
    }

    pub fn ride(&self, ride_id: u32) -> Option<&Ride> {
        self.rides.iter().find(|ride| ride.id == ride_id)
    }

    pub fn shop(&self, shop_id: u32) -> Option<&Shop> {
        self.shops.iter().find(|shop| shop.id == shop_id)
    }

    pub fn guest(&self, guest_id: u32) -> Option<&Guest> {
        self.guests.iter().find(|guest| guest.id == guest_id)
    }
}
