use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("empty payload")]
    Empty,

    #[error("declared length {0} is out of range")]
    BadLength(usize),

    #[error("decompression failed: {0}")]
    Decompress(#[from] lz4_flex::block::DecompressError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeltaError {
    #[error("turn gap: at turn {current}, received delta for turn {received}")]
    TurnGap { current: u32, received: u32 },

    #[error("delta references unknown agent {0}")]
    UnknownAgent(u32),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("channel closed")]
    ChannelClosed,

    #[error("could not join channel: {0}")]
    JoinFailed(String),

    #[error("failed to persist session state")]
    SaveFailed,

    #[error("session store unreachable")]
    StoreUnavailable,

    #[error("session state unavailable after {attempts} attempts")]
    LoadExhausted { attempts: usize },

    #[error("rejected turn delta: {0}")]
    Delta(#[from] DeltaError),
}
