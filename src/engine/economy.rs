use super::{ParkTick, TickLedger};
use crate::constants::{
    RATING_CLEANLINESS_WEIGHT, RATING_HAPPINESS_WEIGHT, RATING_PER_RIDE, RATING_RIDE_BONUS_CAP,
};
use crate::types::{Finance, ParkStats, ParkState, RideStatus};

pub fn settle(finance: &mut Finance, ledger: &TickLedger) {
    finance.entrance_revenue += ledger.entrance;
    finance.ride_revenue += ledger.ride;
    finance.shop_revenue += ledger.shop;
    finance.staff_cost += ledger.staff;
    finance.maintenance_cost += ledger.maintenance;
    finance.income += ledger.revenue();
    finance.expenses += ledger.expenses();
    finance.cash += ledger.revenue() - ledger.expenses();
}

/// Rating blends mean guest happiness, cleanliness and a capped ride bonus.
/// With no guests there is no mean to blend, so the previous rating stands.
pub fn park_rating(state: &ParkState) -> Option<f32> {
    if state.guests.is_empty() {
        return None;
    }
    let happiness = state
        .guests
        .iter()
        .map(|guest| guest.needs.happiness)
        .sum::<f32>()
        / state.guests.len() as f32;
    let ride_bonus = (state.rides.len() as f32 * RATING_PER_RIDE).min(RATING_RIDE_BONUS_CAP);
    Some(
        happiness * RATING_HAPPINESS_WEIGHT
            + state.stats.cleanliness * RATING_CLEANLINESS_WEIGHT
            + ride_bonus,
    )
}

fn refresh_stats(state: &ParkState) -> ParkStats {
    let open: Vec<f32> = state
        .rides
        .iter()
        .filter(|ride| ride.status == RideStatus::Open)
        .map(|ride| ride.excitement)
        .collect();
    let excitement = if open.is_empty() {
        0.0
    } else {
        open.iter().sum::<f32>() / open.len() as f32
    };
    let nausea = if state.guests.is_empty() {
        0.0
    } else {
        state
            .guests
            .iter()
            .map(|guest| guest.needs.nausea)
            .sum::<f32>()
            / state.guests.len() as f32
    };
    ParkStats {
        rating: park_rating(state).unwrap_or(state.stats.rating),
        excitement,
        nausea,
        guests_in_park: state.guests.len(),
        ..state.stats.clone()
    }
}

impl ParkTick<'_> {
    pub(super) fn settle_economy(&mut self) {
        let interval = self.state.config.payroll_interval_ticks;
        if interval > 0 && self.state.tick % interval == 0 {
            self.ledger.staff += self
                .state
                .staff
                .iter()
                .map(|staff| staff.wage as i64)
                .sum::<i64>();
        }
        settle(&mut self.state.finance, &self.ledger);
        self.state.stats = refresh_stats(&self.state);
    }
}
