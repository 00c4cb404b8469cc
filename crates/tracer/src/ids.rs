//! W3C-compliant identifier generation: 32 lowercase hex chars for trace
//! ids, 16 for span ids, cryptographically random, never all-zero.

use rand::RngCore;

pub const TRACE_ID_HEX_LEN: usize = 32;
pub const SPAN_ID_HEX_LEN: usize = 16;

pub fn generate_trace_id(rng: &mut dyn RngCore) -> String {
    loop {
        let mut bytes = [0u8; 16];
        rng.fill_bytes(&mut bytes);
        if bytes.iter().any(|b| *b != 0) {
            return hex::encode(bytes);
        }
    }
}

pub fn generate_span_id(rng: &mut dyn RngCore) -> String {
    loop {
        let mut bytes = [0u8; 8];
        rng.fill_bytes(&mut bytes);
        if bytes.iter().any(|b| *b != 0) {
            return hex::encode(bytes);
        }
    }
}

/// Lowercase hex of exactly `len` chars, not all zeros.
pub fn is_valid_id(id: &str, len: usize) -> bool {
    id.len() == len
        && id.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        && id.bytes().any(|b| b != b'0')
}
