//! Shared-secret handshake.
//!
//! The server sends a random salt under a random request id; the client
//! answers on the same id with `HMAC-SHA256(secret, salt)`; the server
//! confirms with an empty keep-alive on `id + 1`.

use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SALT_LEN: usize = 32;
pub const PROOF_LEN: usize = 32;

/// Fresh random salt for one handshake.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill(&mut salt[..]);
    salt
}

/// Request id for the handshake frame.
///
/// Never 0 (reserved for pushes) and never `u16::MAX`, so the confirming
/// keep-alive id `id + 1` cannot wrap onto 0.
pub fn handshake_id() -> u16 {
    rand::thread_rng().gen_range(1..u16::MAX)
}

/// Id the server confirms a handshake on.
pub fn confirmation_id(handshake_id: u16) -> u16 {
    handshake_id.wrapping_add(1)
}

fn mac(secret: &[u8], salt: &[u8]) -> HmacSha256 {
    // HMAC accepts keys of any length, including empty.
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret)
        .unwrap_or_else(|_| unreachable!("HMAC takes keys of any length"));
    mac.update(salt);
    mac
}

/// Proof that the holder of `secret` saw `salt`.
pub fn compute_proof(secret: &[u8], salt: &[u8]) -> [u8; PROOF_LEN] {
    mac(secret, salt).finalize().into_bytes().into()
}

/// Constant-time check of a client's proof.
pub fn verify_proof(secret: &[u8], salt: &[u8], proof: &[u8]) -> bool {
    mac(secret, salt).verify_slice(proof).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proof_matches_known_vector() {
        // RFC 4231 test case 2.
        let proof = compute_proof(b"Jefe", b"what do ya want for nothing?");
        let expected = [
            0x5b, 0xdc, 0xc1, 0x46, 0xbf, 0x60, 0x75, 0x4e, 0x6a, 0x04, 0x24, 0x26, 0x08, 0x95,
            0x75, 0xc7, 0x5a, 0x00, 0x3f, 0x08, 0x9d, 0x27, 0x39, 0x83, 0x9d, 0xec, 0x58, 0xb9,
            0x64, 0xec, 0x38, 0x43,
        ];
        assert_eq!(proof, expected);
    }

    #[test]
    fn test_verify() {
        let salt = generate_salt();
        let proof = compute_proof(b"secret", &salt);
        assert!(verify_proof(b"secret", &salt, &proof));
        assert!(!verify_proof(b"other", &salt, &proof));
        assert!(!verify_proof(b"secret", &salt, &proof[..16]));
    }

    #[test]
    fn test_handshake_ids_leave_room_for_confirmation() {
        for _ in 0..1000 {
            let id = handshake_id();
            assert_ne!(id, 0);
            assert_ne!(confirmation_id(id), 0);
        }
    }
}
