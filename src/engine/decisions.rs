use super::utils::push_thought;
use super::ParkTick;
use crate::constants::{
    LEAVE_ENERGY_THRESHOLD, LEAVE_HAPPINESS_THRESHOLD, LEAVE_MONEY_THRESHOLD,
    RIDE_DECISION_CHANCE, SEEK_DRINK_THRESHOLD, SEEK_FIRST_AID_THRESHOLD, SEEK_FOOD_THRESHOLD,
    SEEK_RESTROOM_THRESHOLD,
};
use crate::guest_state::GuestEvent;
use crate::routing::usable_route;
use crate::types::{Guest, RideStatus, ShopKind, ThoughtKind, Vec2};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum Intent {
    Leave,
    Shop(&'static [ShopKind]),
    Ride,
}

const RESTROOM: &[ShopKind] = &[ShopKind::Restroom];
const FIRST_AID: &[ShopKind] = &[ShopKind::FirstAid];
const DRINK: &[ShopKind] = &[ShopKind::DrinkStall, ShopKind::IceCreamStall];
const FOOD: &[ShopKind] = &[ShopKind::FoodStall, ShopKind::IceCreamStall];

pub(super) fn wants_to_leave(guest: &Guest) -> bool {
    guest.money <= LEAVE_MONEY_THRESHOLD
        || guest.needs.happiness < LEAVE_HAPPINESS_THRESHOLD
        || guest.needs.energy < LEAVE_ENERGY_THRESHOLD
        || guest.age.saturating_mul(100) >= guest.max_age.saturating_mul(95)
}

pub(super) fn need_intents(guest: &Guest) -> Vec<Intent> {
    if wants_to_leave(guest) {
        return vec![Intent::Leave];
    }
    let needs = &guest.needs;
    let mut intents = Vec::new();
    if needs.bathroom < SEEK_RESTROOM_THRESHOLD {
        intents.push(Intent::Shop(RESTROOM));
    }
    if needs.nausea > SEEK_FIRST_AID_THRESHOLD {
        intents.push(Intent::Shop(FIRST_AID));
    }
    if needs.thirst < SEEK_DRINK_THRESHOLD {
        intents.push(Intent::Shop(DRINK));
    }
    if needs.hunger < SEEK_FOOD_THRESHOLD {
        intents.push(Intent::Shop(FOOD));
    }
    intents
}

impl ParkTick<'_> {
    pub(super) fn decide(&mut self, guest: &mut Guest) -> bool {
        let mut intents = need_intents(guest);
        if intents.is_empty() && self.state.rng.chance(RIDE_DECISION_CHANCE) {
            intents.push(Intent::Ride);
        }
        for intent in intents {
            let committed = match intent {
                Intent::Leave => self.head_for_exit(guest),
                Intent::Shop(kinds) => self.head_for_shop(guest, kinds),
                Intent::Ride => self.head_for_ride(guest),
            };
            if committed {
                return true;
            }
        }
        false
    }

    fn route(&self, from: Vec2, to: Vec2) -> Option<Vec<Vec2>> {
        if from == to {
            return Some(vec![from]);
        }
        usable_route(self.path_finder.find_path(from, to, &self.state.grid))
    }

    fn head_for_exit(&mut self, guest: &mut Guest) -> bool {
        let tick = self.state.tick;
        let Some(route) = self.route(guest.position(), self.state.entrance) else {
            push_thought(guest, tick, ThoughtKind::CannotFind);
            return false;
        };
        if guest.money <= LEAVE_MONEY_THRESHOLD {
            push_thought(guest, tick, ThoughtKind::OutOfMoney);
        }
        push_thought(guest, tick, ThoughtKind::GoingHome);
        self.assign_route(guest, route, GuestEvent::DecidedToLeave)
    }

    fn head_for_shop(&mut self, guest: &mut Guest, kinds: &[ShopKind]) -> bool {
        let origin = guest.position();
        let mut candidates: Vec<(i32, u32, Vec2)> = self
            .state
            .shops
            .iter()
            .filter(|shop| shop.open && kinds.contains(&shop.kind) && shop.price <= guest.money)
            .map(|shop| (origin.manhattan(shop.access), shop.id, shop.access))
            .collect();
        candidates.sort_unstable();

        for (_, shop_id, access) in candidates {
            if let Some(route) = self.route(origin, access) {
                return self.assign_route(guest, route, GuestEvent::ChoseShop { shop_id });
            }
        }
        false
    }

    fn head_for_ride(&mut self, guest: &mut Guest) -> bool {
        let tick = self.state.tick;
        let mut saw_full_queue = None;
        let candidates: Vec<(u32, Vec2)> = self
            .state
            .rides
            .iter()
            .filter(|ride| {
                ride.status == RideStatus::Open
                    && ride.price <= guest.money
                    && ride.intensity <= guest.preferred_intensity
            })
            .filter(|ride| {
                let full = ride.queue.guest_ids.len() >= ride.queue.max_length;
                if full {
                    saw_full_queue = Some(ride.id);
                }
                !full
            })
            .map(|ride| (ride.id, ride.queue.entry))
            .collect();

        if candidates.is_empty() {
            if let Some(ride_id) = saw_full_queue {
                push_thought(guest, tick, ThoughtKind::QueueTooLong { ride_id });
            }
            return false;
        }
        let Some((ride_id, entry)) = self.state.rng.pick(&candidates).copied() else {
            return false;
        };
        match self.route(guest.position(), entry) {
            Some(route) => self.assign_route(guest, route, GuestEvent::ChoseRide { ride_id }),
            None => {
                push_thought(guest, tick, ThoughtKind::CannotFind);
                false
            }
        }
    }

    fn assign_route(&self, guest: &mut Guest, route: Vec<Vec2>, event: GuestEvent) -> bool {
        let Some(next) = guest.state.transition(event) else {
            return false;
        };
        guest.state = next;
        guest.path = route;
        guest.path_index = 0;
        guest.progress = 0.0;
        true
    }
}
