use std::collections::HashMap;

use super::utils::{charge, clamp_need, push_thought};
use super::ParkTick;
use crate::constants::ride_cycle_ticks;
use crate::guest_state::{GuestEvent, GuestState};
use crate::types::{Guest, RideStatus, ThoughtKind};
use crate::world::ride_max_queue_length;

fn ids_of(guests: &[Guest], members: &[(u64, usize)]) -> Vec<u32> {
    members.iter().map(|(_, slot)| guests[*slot].id).collect()
}

impl ParkTick<'_> {
    /// FIFO admission per ride. Queue membership is read from guest state
    /// each tick; `ride.queue.guest_ids` is the rebuilt view of it.
    pub(super) fn dispatch_queues(&mut self) {
        let tick = self.state.tick;

        let mut queued: HashMap<u32, Vec<(u64, usize)>> = HashMap::new();
        for (slot, guest) in self.state.guests.iter().enumerate() {
            if let GuestState::Queuing {
                ride_id,
                joined_tick,
            } = guest.state
            {
                queued.entry(ride_id).or_default().push((joined_tick, slot));
            }
        }

        // Guests queued for a ride that no longer exists go back to wandering.
        for (ride_id, members) in queued.iter() {
            if self.index.rides.contains_key(ride_id) {
                continue;
            }
            for (_, slot) in members {
                let guest = &mut self.state.guests[*slot];
                guest.state = guest.state.apply(GuestEvent::Evicted);
            }
        }

        for ride_idx in 0..self.state.rides.len() {
            let max_length = ride_max_queue_length(&self.state.grid, &self.state.rides[ride_idx]);
            let ride_id = self.state.rides[ride_idx].id;
            let mut members = queued.remove(&ride_id).unwrap_or_default();
            // stable: equal join ticks keep list order
            members.sort_by_key(|(joined_tick, _)| *joined_tick);

            let status = self.state.rides[ride_idx].status;
            let keep = match status {
                RideStatus::Closed | RideStatus::Building => 0,
                _ => max_length,
            };
            if members.len() > keep {
                for (_, slot) in members.drain(keep..) {
                    let guest = &mut self.state.guests[slot];
                    guest.state = guest.state.apply(GuestEvent::Evicted);
                    let kind = if keep == 0 {
                        ThoughtKind::CannotFind
                    } else {
                        ThoughtKind::QueueTooLong { ride_id }
                    };
                    push_thought(guest, tick, kind);
                }
            }

            let ride = &mut self.state.rides[ride_idx];
            ride.queue.max_length = max_length;
            if status != RideStatus::Open {
                ride.cycle_timer = 0;
                ride.queue.guest_ids = ids_of(&self.state.guests, &members);
                continue;
            }

            if ride.cycle_timer > 0 {
                ride.cycle_timer -= 1;
                if ride.cycle_timer > 0 {
                    ride.queue.guest_ids = ids_of(&self.state.guests, &members);
                    continue;
                }
            }

            let boarding = members.len().min(ride.stats.capacity as usize);
            let price = ride.price;
            let ride_time = ride.stats.ride_time;
            let happiness_gain = ride.excitement / 12.0;
            let nausea_gain = ride.nausea / 8.0;
            let mut revenue = 0i64;
            for (_, slot) in members.drain(..boarding) {
                let guest = &mut self.state.guests[slot];
                revenue += charge(&mut guest.money, price) as i64;
                guest.needs.happiness = clamp_need(guest.needs.happiness + happiness_gain);
                guest.needs.nausea = clamp_need(guest.needs.nausea + nausea_gain);
                guest.state = guest.state.apply(GuestEvent::Boarded { ride_time });
            }

            ride.stats.total_riders += boarding as u64;
            ride.stats.total_revenue += revenue;
            ride.cycle_timer = ride_cycle_ticks(ride_time);
            ride.queue.guest_ids = ids_of(&self.state.guests, &members);
            self.ledger.ride += revenue;
        }
    }
}
