use tracing::debug;

use super::utils::{clamp_need, pick_wander_direction};
use super::ParkTick;
use crate::constants::{
    ENTERTAINER_HAPPINESS, ENTERTAINER_RANGE, HANDYMAN_CLEAN_BOOST, LITTER_PER_GUEST,
    MECHANIC_RELIABILITY_BOOST, MECHANIC_UPTIME_BOOST, SECURITY_HAPPINESS, SECURITY_NAUSEA,
    SECURITY_RANGE, STAFF_FATIGUE_PER_TICK, STAFF_SPEED,
};
use crate::types::{RideStatus, Staff, StaffKind, StaffState, Vec2};
use crate::world::{can_traverse, is_queue_tile};

const BREAKDOWN_UPTIME_PENALTY: f32 = 5.0;

impl ParkTick<'_> {
    pub(super) fn apply_staff_effects(&mut self) {
        self.buff_nearby_guests();
        self.move_staff();
        self.update_cleanliness();
        self.service_rides();
    }

    fn buff_nearby_guests(&mut self) {
        let entertainers: Vec<Vec2> = self.staff_positions(StaffKind::Entertainer);
        let guards: Vec<Vec2> = self.staff_positions(StaffKind::Security);
        if entertainers.is_empty() && guards.is_empty() {
            return;
        }
        for guest in self.state.guests.iter_mut() {
            let pos = guest.position();
            if entertainers
                .iter()
                .any(|staff| staff.manhattan(pos) <= ENTERTAINER_RANGE)
            {
                guest.needs.happiness = clamp_need(guest.needs.happiness + ENTERTAINER_HAPPINESS);
            }
            if guards.iter().any(|staff| staff.manhattan(pos) <= SECURITY_RANGE) {
                guest.needs.happiness = clamp_need(guest.needs.happiness + SECURITY_HAPPINESS);
                guest.needs.nausea = clamp_need(guest.needs.nausea - SECURITY_NAUSEA);
            }
        }
    }

    fn staff_positions(&self, kind: StaffKind) -> Vec<Vec2> {
        self.state
            .staff
            .iter()
            .filter(|staff| staff.kind == kind)
            .map(Staff::position)
            .collect()
    }

    fn staff_count(&self, kind: StaffKind) -> usize {
        self.state
            .staff
            .iter()
            .filter(|staff| staff.kind == kind)
            .count()
    }

    fn move_staff(&mut self) {
        let mut staff = std::mem::take(&mut self.state.staff);
        for member in staff.iter_mut() {
            member.fatigue += STAFF_FATIGUE_PER_TICK;
            self.patrol_step(member);
        }
        self.state.staff = staff;
    }

    fn patrol_step(&mut self, member: &mut Staff) {
        let pos = member.position();
        if member.progress == 0.0 {
            let grid = &self.state.grid;
            let options: Vec<_> = grid
                .path_at(pos)
                .map(|path| path.edges.open_directions())
                .unwrap_or_default()
                .into_iter()
                .filter(|dir| {
                    let next = pos.step(*dir);
                    can_traverse(grid, pos, *dir)
                        && !is_queue_tile(grid, next)
                        && member
                            .patrol_area
                            .map(|area| area.contains(next))
                            .unwrap_or(true)
                })
                .collect();
            match pick_wander_direction(&options, member.direction, &mut self.state.rng) {
                Some(dir) => {
                    member.direction = dir;
                    member.state = StaffState::Walking;
                }
                None => {
                    member.state = StaffState::Idle;
                    return;
                }
            }
        }

        member.progress += STAFF_SPEED;
        if member.progress < 1.0 {
            return;
        }
        member.progress = 0.0;
        if can_traverse(&self.state.grid, pos, member.direction) {
            let next = pos.step(member.direction);
            member.x = next.x;
            member.y = next.y;
        } else {
            member.state = StaffState::Idle;
        }
    }

    fn update_cleanliness(&mut self) {
        let handymen = self.staff_count(StaffKind::Handyman) as f32;
        let guests = self.state.guests.len() as f32;
        if handymen == 0.0 && guests == 0.0 {
            return;
        }
        let stats = &mut self.state.stats;
        stats.cleanliness = (stats.cleanliness + handymen * HANDYMAN_CLEAN_BOOST
            - guests * LITTER_PER_GUEST)
            .clamp(0.0, 100.0);
    }

    fn service_rides(&mut self) {
        let mechanics = self.staff_count(StaffKind::Mechanic);
        let tick = self.state.tick;
        let config = self.state.config.clone();

        for ride in self.state.rides.iter_mut() {
            match ride.status {
                RideStatus::Open => {
                    if mechanics > 0 {
                        let boost = mechanics as f32;
                        ride.stats.uptime =
                            (ride.stats.uptime + MECHANIC_UPTIME_BOOST * boost).min(100.0);
                        ride.stats.reliability =
                            (ride.stats.reliability + MECHANIC_RELIABILITY_BOOST * boost).min(1.0);
                    }
                    let age = tick.saturating_sub(ride.built_tick);
                    let due = config.breakdown_interval_ticks > 0
                        && age > 0
                        && age % config.breakdown_interval_ticks == 0;
                    if !due {
                        continue;
                    }
                    let failure = (1.0 - ride.stats.reliability).max(0.0);
                    if self.state.rng.chance(failure) {
                        ride.status = RideStatus::Broken;
                        ride.cycle_timer = 0;
                        ride.stats.last_breakdown_tick = Some(tick);
                        ride.stats.uptime = (ride.stats.uptime - BREAKDOWN_UPTIME_PENALTY).max(0.0);
                        debug!(ride_id = ride.id, tick, "ride broke down");
                    }
                }
                RideStatus::Broken => {
                    let since = ride
                        .stats
                        .last_breakdown_tick
                        .map(|at| tick.saturating_sub(at))
                        .unwrap_or(u64::MAX);
                    if mechanics > 0 && since >= config.repair_ticks {
                        ride.status = RideStatus::Open;
                        ride.cycle_timer = 0;
                        self.ledger.maintenance += config.repair_cost;
                        debug!(ride_id = ride.id, tick, "ride repaired");
                    }
                }
                RideStatus::Closed | RideStatus::Testing | RideStatus::Building => {}
            }
        }
    }
}
