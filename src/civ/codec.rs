use tracing::warn;

use crate::error::CodecError;

use super::types::CivilizationSessionState;

/// Snapshots larger than this are treated as corrupt rather than allocated.
const MAX_DECOMPRESSED_BYTES: usize = 64 * 1024 * 1024;

pub fn encode_state(state: &CivilizationSessionState) -> Result<Vec<u8>, CodecError> {
    let json = serde_json::to_vec(state)?;
    Ok(lz4_flex::compress_prepend_size(&json))
}

pub fn decode_state(bytes: &[u8]) -> Result<CivilizationSessionState, CodecError> {
    if bytes.is_empty() {
        return Err(CodecError::Empty);
    }
    let declared = bytes
        .get(..4)
        .map(|prefix| u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize);
    match declared {
        Some(size) if size > 0 && size <= MAX_DECOMPRESSED_BYTES => {}
        Some(size) => return Err(CodecError::BadLength(size)),
        None => return Err(CodecError::BadLength(bytes.len())),
    }
    let json = lz4_flex::decompress_size_prepended(bytes)?;
    Ok(serde_json::from_slice(&json)?)
}

/// Store-facing variant: empty or corrupt payloads read as "no session".
pub fn decompress_state(bytes: &[u8]) -> Option<CivilizationSessionState> {
    match decode_state(bytes) {
        Ok(state) => Some(state),
        Err(CodecError::Empty) if bytes.is_empty() => None,
        Err(err) => {
            warn!(error = %err, bytes = bytes.len(), "discarding unreadable session payload");
            None
        }
    }
}
