//! Job identifier helpers.

/// Width of an EVM word in bytes.
pub const EVM_WORD_LEN: usize = 32;

/// Returns `true` when an event's embedded job id belongs to `expected`.
pub fn matches_job_id(expected: &str, actual: &str) -> bool {
    expected == actual
}

/// Encode a job id as a 32-byte word: ASCII bytes right-padded with zeros,
/// truncated if longer than a word.
pub fn job_id_to_bytes32(job_id: &str) -> [u8; EVM_WORD_LEN] {
    let mut word = [0u8; EVM_WORD_LEN];
    let bytes = job_id.as_bytes();
    let n = bytes.len().min(EVM_WORD_LEN);
    word[..n].copy_from_slice(&bytes[..n]);
    word
}

/// `job_id_to_bytes32` as a `0x`-prefixed lowercase hex topic.
pub fn job_id_topic(job_id: &str) -> String {
    format!("0x{}", hex::encode(job_id_to_bytes32(job_id)))
}

/// Returns `true` when `topic` (hex, any case, optional `0x`) encodes `job_id`.
pub fn topic_matches_job_id(topic: &str, job_id: &str) -> bool {
    let topic = topic.strip_prefix("0x").unwrap_or(topic);
    topic.eq_ignore_ascii_case(&hex::encode(job_id_to_bytes32(job_id)))
}
