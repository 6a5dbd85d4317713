use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GuestState {
    Wandering,
    HeadingToShop {
        #[serde(rename = "shopId")]
        shop_id: u32,
    },
    HeadingToRide {
        #[serde(rename = "rideId")]
        ride_id: u32,
    },
    Queuing {
        #[serde(rename = "rideId")]
        ride_id: u32,
        #[serde(rename = "joinedTick")]
        joined_tick: u64,
    },
    OnRide {
        #[serde(rename = "rideId")]
        ride_id: u32,
        remaining: u32,
    },
    AtShop {
        #[serde(rename = "shopId")]
        shop_id: u32,
        remaining: u32,
    },
    LeavingPark,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuestEvent {
    ChoseShop { shop_id: u32 },
    ChoseRide { ride_id: u32 },
    ArrivedAtShop { service_ticks: u32 },
    ArrivedAtQueue { tick: u64 },
    Boarded { ride_time: u32 },
    Finished,
    Evicted,
    TargetLost,
    DecidedToLeave,
}

impl GuestState {
    pub fn transition(self, event: GuestEvent) -> Option<GuestState> {
        use GuestEvent as E;
        use GuestState as S;

        match (self, event) {
            (S::Wandering, E::ChoseShop { shop_id }) => Some(S::HeadingToShop { shop_id }),
            (S::Wandering, E::ChoseRide { ride_id }) => Some(S::HeadingToRide { ride_id }),
            (S::HeadingToShop { shop_id }, E::ArrivedAtShop { service_ticks }) => {
                Some(S::AtShop {
                    shop_id,
                    remaining: service_ticks.max(1),
                })
            }
            (S::HeadingToRide { ride_id }, E::ArrivedAtQueue { tick }) => Some(S::Queuing {
                ride_id,
                joined_tick: tick,
            }),
            (S::Queuing { ride_id, .. }, E::Boarded { ride_time }) => Some(S::OnRide {
                ride_id,
                remaining: ride_time.max(1),
            }),
            (S::OnRide { .. } | S::AtShop { .. }, E::Finished) => Some(S::Wandering),
            (S::Queuing { .. }, E::Evicted) => Some(S::Wandering),
            (S::HeadingToShop { .. } | S::HeadingToRide { .. }, E::TargetLost) => {
                Some(S::Wandering)
            }
            (
                S::Wandering | S::HeadingToShop { .. } | S::HeadingToRide { .. },
                E::DecidedToLeave,
            ) => Some(S::LeavingPark),
            _ => None,
        }
    }

    pub fn apply(self, event: GuestEvent) -> GuestState {
        self.transition(event).unwrap_or(self)
    }

    /// Decrements the ride/shop countdown. Returns true once it hits zero.
    pub fn count_down(&mut self) -> bool {
        match self {
            GuestState::OnRide { remaining, .. } | GuestState::AtShop { remaining, .. } => {
                *remaining = remaining.saturating_sub(1);
                *remaining == 0
            }
            _ => false,
        }
    }

    pub fn queued_for(&self) -> Option<u32> {
        match self {
            GuestState::Queuing { ride_id, .. } => Some(*ride_id),
            _ => None,
        }
    }

    pub fn is_occupied(&self) -> bool {
        matches!(
            self,
            GuestState::Queuing { .. } | GuestState::OnRide { .. } | GuestState::AtShop { .. }
        )
    }
}
