use super::utils::{clamp_need, push_thought};
use super::ParkTick;
use crate::constants::{
    BATHROOM_DECAY, ENERGY_DECAY, HUNGER_DECAY, HUNGRY_THRESHOLD, NAUSEA_RECOVERY,
    THIRST_DECAY, TIRED_THRESHOLD,
};
use crate::types::{Guest, Needs, ThoughtKind};

pub fn update_needs(mut guest: Guest) -> Guest {
    guest.needs = decay(guest.needs);
    guest
}

fn decay(needs: Needs) -> Needs {
    let mut next = Needs {
        hunger: clamp_need(needs.hunger - HUNGER_DECAY),
        thirst: clamp_need(needs.thirst - THIRST_DECAY),
        bathroom: clamp_need(needs.bathroom - BATHROOM_DECAY),
        energy: clamp_need(needs.energy - ENERGY_DECAY),
        nausea: clamp_need(needs.nausea - NAUSEA_RECOVERY),
        happiness: needs.happiness,
    };
    if next.hunger < HUNGRY_THRESHOLD || next.thirst < HUNGRY_THRESHOLD {
        next.happiness -= 1.0;
    }
    if next.energy < TIRED_THRESHOLD {
        next.happiness -= 1.0;
    }
    next.happiness = clamp_need(next.happiness);
    next
}

fn crossed_below(before: f32, after: f32, threshold: f32) -> bool {
    before >= threshold && after < threshold
}

impl ParkTick<'_> {
    pub(super) fn update_guest_needs(&mut self) {
        let tick = self.state.tick;
        for guest in self.state.guests.iter_mut() {
            let before = guest.needs;
            guest.needs = decay(before);

            let after = guest.needs;
            if crossed_below(before.hunger, after.hunger, HUNGRY_THRESHOLD) {
                push_thought(guest, tick, ThoughtKind::Hungry);
            }
            if crossed_below(before.thirst, after.thirst, HUNGRY_THRESHOLD) {
                push_thought(guest, tick, ThoughtKind::Thirsty);
            }
            if crossed_below(before.energy, after.energy, TIRED_THRESHOLD) {
                push_thought(guest, tick, ThoughtKind::Tired);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::constants::NEED_MAX;

    fn needs_with(hunger: f32, thirst: f32, energy: f32) -> Needs {
        Needs {
            hunger,
            thirst,
            energy,
            ..Needs::default()
        }
    }

    #[test]
    fn content_guest_keeps_happiness() {
        let next = decay(Needs::default());
        assert_eq!(next.happiness, Needs::default().happiness);
        assert!(next.hunger < Needs::default().hunger);
    }

    #[test]
    fn hunger_and_fatigue_penalties_stack() {
        let next = decay(needs_with(50.0, 200.0, 30.0));
        assert_eq!(next.happiness, Needs::default().happiness - 2.0);

        // hunger and thirst share one penalty
        let next = decay(needs_with(50.0, 50.0, 200.0));
        assert_eq!(next.happiness, Needs::default().happiness - 1.0);
    }

    #[test]
    fn update_needs_touches_only_needs() {
        let guest = crate::types::Guest {
            id: 9,
            x: 1,
            y: 1,
            progress: 0.4,
            direction: crate::types::Direction::South,
            state: crate::guest_state::GuestState::Wandering,
            needs: Needs::default(),
            money: 12,
            path: Vec::new(),
            path_index: 0,
            age: 10,
            max_age: 20,
            thoughts: Default::default(),
            preferred_intensity: 40.0,
            rides_ridden: 0,
        };
        let next = update_needs(guest.clone());
        assert_eq!(next.needs, decay(guest.needs));
        assert_eq!(
            Guest {
                needs: guest.needs,
                ..next
            },
            guest
        );
    }

    #[test]
    fn nausea_recovers_towards_zero() {
        let mut needs = Needs::default();
        needs.nausea = 0.5;
        assert_eq!(decay(needs).nausea, 0.0);
    }

    proptest! {
        #[test]
        fn needs_stay_within_bounds(
            hunger in 0.0f32..=NEED_MAX,
            thirst in 0.0f32..=NEED_MAX,
            bathroom in 0.0f32..=NEED_MAX,
            energy in 0.0f32..=NEED_MAX,
            nausea in 0.0f32..=NEED_MAX,
            happiness in 0.0f32..=NEED_MAX,
        ) {
            let next = decay(Needs { hunger, thirst, bathroom, energy, nausea, happiness });
            for value in [next.hunger, next.thirst, next.bathroom, next.energy, next.nausea, next.happiness] {
                prop_assert!((0.0..=NEED_MAX).contains(&value));
            }
        }
    }
}
