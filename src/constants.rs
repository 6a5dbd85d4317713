use crate::types::ShopKind;

pub const TICK_RATE: u32 = 10;
pub const TICK_MS: u64 = 1000 / TICK_RATE as u64;

pub const NEED_MAX: f32 = 255.0;
pub const HUNGER_DECAY: f32 = 1.2;
pub const THIRST_DECAY: f32 = 1.5;
pub const BATHROOM_DECAY: f32 = 0.6;
pub const NAUSEA_RECOVERY: f32 = 0.8;
pub const ENERGY_DECAY: f32 = 0.7;
pub const HUNGRY_THRESHOLD: f32 = 80.0;
pub const TIRED_THRESHOLD: f32 = 60.0;

pub const GUEST_SPEED: f32 = 0.4;
pub const STAFF_SPEED: f32 = 0.3;
pub const MAX_THOUGHTS: usize = 5;

pub const LEAVE_MONEY_THRESHOLD: i32 = 2;
pub const LEAVE_HAPPINESS_THRESHOLD: f32 = 30.0;
pub const LEAVE_ENERGY_THRESHOLD: f32 = 20.0;
pub const SEEK_RESTROOM_THRESHOLD: f32 = 60.0;
pub const SEEK_FIRST_AID_THRESHOLD: f32 = 150.0;
pub const SEEK_DRINK_THRESHOLD: f32 = 100.0;
pub const SEEK_FOOD_THRESHOLD: f32 = 100.0;
pub const RIDE_DECISION_CHANCE: f32 = 0.05;

pub const QUEUE_SLOTS_PER_TILE: usize = 4;
pub const QUEUE_MIN_LENGTH: usize = 8;
pub const QUEUE_MAX_LENGTH: usize = 80;
pub const QUEUE_DEFAULT_LENGTH: usize = 30;
pub const BOARDING_TICKS: u32 = 8;

pub const ENTERTAINER_RANGE: i32 = 4;
pub const ENTERTAINER_HAPPINESS: f32 = 0.6;
pub const SECURITY_RANGE: i32 = 3;
pub const SECURITY_HAPPINESS: f32 = 0.3;
pub const SECURITY_NAUSEA: f32 = 0.5;
pub const HANDYMAN_CLEAN_BOOST: f32 = 0.05;
pub const LITTER_PER_GUEST: f32 = 0.002;
pub const MECHANIC_RELIABILITY_BOOST: f32 = 0.0005;
pub const MECHANIC_UPTIME_BOOST: f32 = 0.01;
pub const STAFF_FATIGUE_PER_TICK: f32 = 0.002;

pub const RATING_HAPPINESS_WEIGHT: f32 = 0.7;
pub const RATING_CLEANLINESS_WEIGHT: f32 = 0.2;
pub const RATING_PER_RIDE: f32 = 12.0;
pub const RATING_RIDE_BONUS_CAP: f32 = 160.0;

pub const HEARTBEAT_INTERVAL_MS: u64 = 5_000;
pub const LEADER_TIMEOUT_MS: u64 = 15_000;
pub const TURN_INTERVAL_MS: u64 = 3_000;
pub const STATE_REQUEST_DELAYS_MS: [u64; 3] = [1_000, 2_000, 4_000];
pub const STORE_RETRY_DELAYS_MS: [u64; 3] = [500, 1_000, 2_000];
pub const DEFAULT_AGENT_COUNT: usize = 200;

pub fn shop_effect(kind: ShopKind) -> ShopEffect {
    match kind {
        ShopKind::FoodStall => ShopEffect {
            hunger: 100.0,
            thirst: 0.0,
            bathroom: 0.0,
            nausea: 0.0,
            happiness: 6.0,
            price: 5,
            service_ticks: 12,
        },
        ShopKind::DrinkStall => ShopEffect {
            hunger: 0.0,
            thirst: 100.0,
            bathroom: 0.0,
            nausea: 0.0,
            happiness: 4.0,
            price: 3,
            service_ticks: 8,
        },
        ShopKind::IceCreamStall => ShopEffect {
            hunger: 40.0,
            thirst: 30.0,
            bathroom: 0.0,
            nausea: 0.0,
            happiness: 8.0,
            price: 4,
            service_ticks: 8,
        },
        ShopKind::Restroom => ShopEffect {
            hunger: 0.0,
            thirst: 0.0,
            bathroom: 150.0,
            nausea: 0.0,
            happiness: 2.0,
            price: 0,
            service_ticks: 10,
        },
        ShopKind::FirstAid => ShopEffect {
            hunger: 0.0,
            thirst: 0.0,
            bathroom: 0.0,
            nausea: -120.0,
            happiness: 3.0,
            price: 0,
            service_ticks: 20,
        },
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShopEffect {
    pub hunger: f32,
    pub thirst: f32,
    pub bathroom: f32,
    pub nausea: f32,
    pub happiness: f32,
    pub price: i32,
    pub service_ticks: u32,
}

pub fn queue_max_length(connected_queue_tiles: usize) -> usize {
    if connected_queue_tiles == 0 {
        return QUEUE_DEFAULT_LENGTH;
    }
    (connected_queue_tiles * QUEUE_SLOTS_PER_TILE).clamp(QUEUE_MIN_LENGTH, QUEUE_MAX_LENGTH)
}

pub fn ride_cycle_ticks(ride_time: u32) -> u32 {
    ride_time.saturating_add(BOARDING_TICKS).max(1)
}
