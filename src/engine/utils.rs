use crate::constants::{MAX_THOUGHTS, NEED_MAX};
use crate::rng::Rng;
use crate::types::{Direction, Guest, Thought, ThoughtKind};

pub(super) fn clamp_need(value: f32) -> f32 {
    value.clamp(0.0, NEED_MAX)
}

pub(super) fn push_thought(guest: &mut Guest, tick: u64, kind: ThoughtKind) {
    if guest.thoughts.back().map(|thought| thought.kind) == Some(kind) {
        return;
    }
    if guest.thoughts.len() >= MAX_THOUGHTS {
        guest.thoughts.pop_front();
    }
    guest.thoughts.push_back(Thought { tick, kind });
}

pub(super) fn pick_wander_direction(
    options: &[Direction],
    facing: Direction,
    rng: &mut Rng,
) -> Option<Direction> {
    let forward: Vec<Direction> = options
        .iter()
        .copied()
        .filter(|dir| *dir != facing.opposite())
        .collect();
    if forward.is_empty() {
        return options.first().copied();
    }
    rng.pick(&forward).copied()
}

/// Deducts up to `price` and returns what was actually paid.
pub(super) fn charge(money: &mut i32, price: i32) -> i32 {
    let before = *money;
    *money = (*money - price.max(0)).max(0);
    before - *money
}
