mod agents;
mod codec;
mod turn;
mod types;

pub use self::agents::{apply_decision, initialize_agents, AgentDecider, ArchetypeDecider};
pub use self::codec::{decode_state, decompress_state, encode_state};
pub use self::turn::{
    apply_delta, character_stats, compute_awards, compute_stats, detect_events, new_session,
    process_turn, set_view_index, update_rankings,
};
pub use self::types::*;
