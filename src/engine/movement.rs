use super::utils::{charge, clamp_need, pick_wander_direction, push_thought};
use super::ParkTick;
use crate::constants::{shop_effect, GUEST_SPEED};
use crate::guest_state::{GuestEvent, GuestState};
use crate::types::{Direction, Guest, RideStatus, ThoughtKind, Vec2};
use crate::world::{can_traverse, is_queue_tile, queue_entry_exit_tiles, ride_exit_tiles};

impl ParkTick<'_> {
    pub(super) fn update_guests(&mut self) {
        let mut guests = std::mem::take(&mut self.state.guests);
        for guest in guests.iter_mut() {
            guest.age = guest.age.saturating_add(1);
            self.advance_guest(guest);
        }
        guests.retain(|guest| !guest.is_departed());
        self.state.guests = guests;
    }

    fn advance_guest(&mut self, guest: &mut Guest) {
        match guest.state {
            GuestState::Queuing { .. } => {}
            GuestState::OnRide { ride_id, .. } => {
                if guest.state.count_down() {
                    self.leave_ride(guest, ride_id);
                }
            }
            GuestState::AtShop { shop_id, .. } => {
                if guest.state.count_down() {
                    self.finish_shop_visit(guest, shop_id);
                }
            }
            GuestState::Wandering => {
                if guest.progress == 0.0 && !guest.has_active_path() {
                    guest.clear_path();
                    if !self.decide(guest) {
                        self.plan_wander_step(guest);
                    }
                }
                self.follow_path(guest);
            }
            GuestState::HeadingToShop { .. }
            | GuestState::HeadingToRide { .. }
            | GuestState::LeavingPark => self.follow_path(guest),
        }
    }

    fn plan_wander_step(&mut self, guest: &mut Guest) {
        let pos = guest.position();
        let Some(options) = self
            .state
            .grid
            .path_at(pos)
            .map(|path| path.edges.open_directions())
        else {
            return;
        };
        let Some(dir) = pick_wander_direction(&options, guest.direction, &mut self.state.rng)
        else {
            return;
        };
        let next = pos.step(dir);
        if !can_traverse(&self.state.grid, pos, dir) || is_queue_tile(&self.state.grid, next) {
            return;
        }
        guest.direction = dir;
        guest.path = vec![pos, next];
        guest.path_index = 0;
    }

    fn follow_path(&mut self, guest: &mut Guest) {
        if guest.has_active_path() {
            guest.progress += GUEST_SPEED;
            if guest.progress < 1.0 {
                return;
            }
            let from = guest.path[guest.path_index];
            let to = guest.path[guest.path_index + 1];
            let step = Direction::between(from, to)
                .filter(|dir| can_traverse(&self.state.grid, from, *dir));
            let Some(dir) = step else {
                self.lose_target(guest);
                return;
            };
            guest.path_index += 1;
            guest.x = to.x;
            guest.y = to.y;
            guest.direction = dir;
            guest.progress = 0.0;
            if guest.has_active_path() {
                return;
            }
        }
        self.arrive(guest);
    }

    fn arrive(&mut self, guest: &mut Guest) {
        let pos = guest.position();
        match guest.state {
            GuestState::HeadingToShop { shop_id } => {
                let service = self
                    .index
                    .shops
                    .get(&shop_id)
                    .map(|idx| &self.state.shops[*idx])
                    .filter(|shop| shop.open && shop.access == pos)
                    .map(|shop| shop_effect(shop.kind).service_ticks);
                match service {
                    Some(service_ticks) => {
                        guest.state = guest
                            .state
                            .apply(GuestEvent::ArrivedAtShop { service_ticks });
                        guest.clear_path();
                    }
                    None => self.lose_target(guest),
                }
            }
            GuestState::HeadingToRide { ride_id } => {
                let joinable = self
                    .index
                    .rides
                    .get(&ride_id)
                    .map(|idx| &self.state.rides[*idx])
                    .is_some_and(|ride| {
                        ride.status == RideStatus::Open
                            && ride.queue.entry == pos
                            && self
                                .state
                                .grid
                                .path_at(pos)
                                .is_some_and(|path| path.queue && path.ride_id == Some(ride_id))
                    });
                if joinable {
                    guest.state = guest.state.apply(GuestEvent::ArrivedAtQueue {
                        tick: self.state.tick,
                    });
                    guest.clear_path();
                } else {
                    self.lose_target(guest);
                }
            }
            GuestState::LeavingPark => {
                guest.clear_path();
                guest.age = guest.max_age.saturating_add(1);
            }
            _ => {
                if !guest.path.is_empty() {
                    guest.clear_path();
                }
            }
        }
    }

    fn lose_target(&mut self, guest: &mut Guest) {
        guest.clear_path();
        if guest.state == GuestState::LeavingPark {
            // No way out any more; leave from where they stand.
            guest.age = guest.max_age.saturating_add(1);
            return;
        }
        guest.state = guest.state.apply(GuestEvent::TargetLost);
        push_thought(guest, self.state.tick, ThoughtKind::CannotFind);
    }

    fn leave_ride(&mut self, guest: &mut Guest, ride_id: u32) {
        let ride = self.index.rides.get(&ride_id).map(|idx| &self.state.rides[*idx]);
        let exits: Vec<Vec2> = match ride {
            Some(ride) => {
                let beside = ride_exit_tiles(&self.state.grid, ride);
                if beside.is_empty() {
                    queue_entry_exit_tiles(&self.state.grid, ride)
                } else {
                    beside
                }
            }
            None => Vec::new(),
        };
        let thrilled = ride.is_some_and(|ride| ride.excitement >= ride.intensity);
        if let Some(exit) = self.state.rng.pick(&exits).copied() {
            guest.x = exit.x;
            guest.y = exit.y;
        }
        guest.clear_path();
        guest.state = guest.state.apply(GuestEvent::Finished);
        guest.rides_ridden += 1;
        if thrilled {
            push_thought(guest, self.state.tick, ThoughtKind::RideWasGreat { ride_id });
        }
    }

    fn finish_shop_visit(&mut self, guest: &mut Guest, shop_id: u32) {
        guest.state = guest.state.apply(GuestEvent::Finished);
        let Some(idx) = self.index.shops.get(&shop_id).copied() else {
            return;
        };
        let shop = &mut self.state.shops[idx];
        let effect = shop_effect(shop.kind);
        let needs = &mut guest.needs;
        needs.hunger = clamp_need(needs.hunger + effect.hunger);
        needs.thirst = clamp_need(needs.thirst + effect.thirst);
        needs.bathroom = clamp_need(needs.bathroom + effect.bathroom);
        needs.nausea = clamp_need(needs.nausea + effect.nausea);
        needs.happiness = clamp_need(needs.happiness + effect.happiness);

        let paid = charge(&mut guest.money, shop.price) as i64;
        shop.total_sales += 1;
        shop.total_revenue += paid;
        self.ledger.shop += paid;
        push_thought(guest, self.state.tick, ThoughtKind::EnjoyedShop { shop_id });
    }
}
