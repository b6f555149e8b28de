//! Runlog (`OracleRequest`) payload layout.
//!
//! ```text
//! offset  field
//! 0       requester            ┐
//! 32      request id           │
//! 64      payment              │ dataPrefix = [32, 192)
//! 96      callback address     │
//! 128     callback function    │
//! 160     expiration           ┘
//! 192     data version
//! 224     data location
//! 256     data length (N)
//! 288     CBOR parameters, N bytes
//! ```

use chainrelay_core::canonical::{
    CanonicalRequest, ADDRESS_KEY, DATA_PREFIX_KEY, FUNCTION_SELECTOR_KEY,
};
use chainrelay_core::error::DecodeError;

use crate::cbor::parse_cbor_map;

/// EVM word size.
pub const WORD: usize = 32;
/// Start of the request id (after the requester word).
pub const REQUEST_ID_START: usize = WORD;
/// End of the expiration word.
pub const EXPIRATION_END: usize = REQUEST_ID_START + 5 * WORD;
/// Start of the data length word (after version and location words).
pub const DATA_LENGTH_START: usize = EXPIRATION_END + 2 * WORD;
/// Start of the CBOR segment; also the minimum payload length.
pub const CBOR_START: usize = DATA_LENGTH_START + WORD;

/// Selector of the oracle fulfillment entrypoint, sent with every request.
pub const FULFILLMENT_SELECTOR: &str = "0x4ab0d190";

/// The two slices a runlog payload is split into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunlogParts<'a> {
    /// Request id through expiration.
    pub prefix: &'a [u8],
    /// CBOR-encoded request parameters.
    pub cbor: &'a [u8],
}

/// Split a payload into its header prefix and CBOR segment.
pub fn split_runlog(data: &[u8]) -> Result<RunlogParts<'_>, DecodeError> {
    if data.len() < CBOR_START {
        return Err(DecodeError::MalformedPayload {
            len: data.len(),
            required: CBOR_START,
        });
    }
    let declared = word_to_u64(&data[DATA_LENGTH_START..CBOR_START]);
    let available = data.len() - CBOR_START;
    let end = usize::try_from(declared)
        .ok()
        .filter(|n| *n <= available)
        .map(|n| CBOR_START + n)
        .ok_or(DecodeError::TruncatedPayload {
            declared,
            available,
        })?;
    Ok(RunlogParts {
        prefix: &data[REQUEST_ID_START..EXPIRATION_END],
        cbor: &data[CBOR_START..end],
    })
}

/// Decode a runlog payload emitted by `address` into a canonical request.
pub fn decode_runlog(data: &[u8], address: &str) -> Result<CanonicalRequest, DecodeError> {
    let parts = split_runlog(data)?;
    let mut request = CanonicalRequest::from(parse_cbor_map(parts.cbor)?);
    request.merge_synthesized([
        (ADDRESS_KEY, address.to_string()),
        (DATA_PREFIX_KEY, format!("0x{}", hex::encode(parts.prefix))),
        (FUNCTION_SELECTOR_KEY, FULFILLMENT_SELECTOR.to_string()),
    ]);
    Ok(request)
}

/// Big-endian 32-byte word → u64, saturating when the high bytes are set.
fn word_to_u64(word: &[u8]) -> u64 {
    let (high, low) = word.split_at(word.len() - 8);
    if high.iter().any(|b| *b != 0) {
        return u64::MAX;
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(low);
    u64::from_be_bytes(buf)
}
