use rand_core::{OsRng, RngCore};

const ALPHABET: &[u8; 52] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
pub const ID_SUFFIX_LEN: usize = 29;
pub const COMPLETION_ID_PREFIX: &str = "chatcmpl-";

// Largest multiple of the alphabet size that fits in a byte; higher bytes are rejected.
const REJECT_FROM: u8 = (256 / ALPHABET.len() * ALPHABET.len()) as u8;

/// Random letters from the OS CSPRNG, uniform over `[a-zA-Z]`.
pub fn random_letters(len: usize) -> String {
    let mut out = String::with_capacity(len);
    let mut buf = [0u8; 64];
    while out.len() < len {
        OsRng.fill_bytes(&mut buf);
        for &byte in buf.iter().filter(|b| **b < REJECT_FROM) {
            if out.len() == len {
                break;
            }
            out.push(ALPHABET[byte as usize % ALPHABET.len()] as char);
        }
    }
    out
}

pub fn completion_id() -> String {
    format!("{COMPLETION_ID_PREFIX}{}", random_letters(ID_SUFFIX_LEN))
}
