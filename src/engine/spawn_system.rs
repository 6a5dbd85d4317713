use std::collections::VecDeque;

use tracing::debug;

use super::utils::charge;
use super::ParkTick;
use crate::guest_state::GuestState;
use crate::types::{Direction, Guest, Needs};

const MIN_PREFERRED_INTENSITY: i32 = 20;
const MAX_PREFERRED_INTENSITY: i32 = 100;

impl ParkTick<'_> {
    pub(super) fn spawn_guests(&mut self) {
        let config = &self.state.config;
        if !config.park_open || config.spawn_interval_ticks == 0 {
            return;
        }
        if self.state.tick % config.spawn_interval_ticks != 0 {
            return;
        }
        if self.state.guests.len() >= config.max_guests {
            return;
        }
        if self.state.grid.path_at(self.state.entrance).is_none() {
            return;
        }

        let guest = self.make_guest();
        debug!(guest_id = guest.id, tick = self.state.tick, "guest admitted");
        self.state.guests.push(guest);
        self.state.stats.total_guests_admitted += 1;
    }

    fn make_guest(&mut self) -> Guest {
        let id = self.state.next_guest_id;
        self.state.next_guest_id = self.state.next_guest_id.saturating_add(1);

        let config = self.state.config.clone();
        let rng = &mut self.state.rng;
        let mut money = rng.range_i32(config.guest_money_min, config.guest_money_max);
        let lifetime = rng.range_i32(
            config.guest_lifetime_min.min(i32::MAX as u64) as i32,
            config.guest_lifetime_max.min(i32::MAX as u64) as i32,
        );
        let preferred_intensity =
            rng.range_i32(MIN_PREFERRED_INTENSITY, MAX_PREFERRED_INTENSITY) as f32;
        let direction = rng
            .pick(&Direction::ALL)
            .copied()
            .unwrap_or(Direction::North);

        let fee = self.state.finance.entrance_fee.max(0);
        let paid = charge(&mut money, fee);
        self.ledger.entrance += paid as i64;

        let entrance = self.state.entrance;
        Guest {
            id,
            x: entrance.x,
            y: entrance.y,
            progress: 0.0,
            direction,
            state: GuestState::Wandering,
            needs: Needs::default(),
            money,
            path: Vec::new(),
            path_index: 0,
            age: 0,
            max_age: lifetime.max(1) as u64,
            thoughts: VecDeque::new(),
            preferred_intensity,
            rides_ridden: 0,
        }
    }
}
