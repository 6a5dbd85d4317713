pub mod civ;
pub mod constants;
pub mod engine;
pub mod error;
pub mod guest_state;
pub mod rng;
pub mod routing;
pub mod server_utils;
pub mod sync;
pub mod types;
pub mod world;
