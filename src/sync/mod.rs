mod channel;
mod election;
mod file_store;
mod machine;
mod protocol;
mod provider;
mod retry;
mod store;

pub use self::channel::{ChannelLink, LocalHub, DEFAULT_MEMBER_QUEUE};
pub use self::election::{elect_leader, Viewer};
pub use self::file_store::FileSessionStore;
pub use self::machine::{
    Command, Input, LoadPurpose, Role, SyncConfig, SyncMachine, SyncNotice, TurnBroadcastMode,
};
pub use self::protocol::{
    parse_client_frame, parse_sync_message, ChannelEvent, ClientFrame, SyncMessage, TurnUpdate,
};
pub use self::provider::{SyncProvider, SyncSnapshot};
pub use self::retry::{Attempt, RetryOutcome, RetryPolicy};
pub use self::store::{now_ms, ClaimOutcome, LeaderSlot, MemorySessionStore, SessionRecord, SessionStore};
