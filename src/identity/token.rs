//! Signed identity tokens.
//!
//! Token format: `{uuid}.{hex(hmac_sha256(secret, uuid_text))}`.
//!
//! The MAC covers the identifier text exactly as it appears in the token, so a
//! different spelling of the same UUID is a different (unsigned) message.
//! Decoding collapses every failure into `None`; callers get one rejection path.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::config::ConfigError;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct IdentityCodec {
    // Keyed once; cloned per signature.
    mac: HmacSha256,
}

impl std::fmt::Debug for IdentityCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("IdentityCodec { .. }")
    }
}

impl IdentityCodec {
    pub fn new(secret: &[u8]) -> Result<Self, ConfigError> {
        if secret.is_empty() {
            return Err(ConfigError::MissingSecret);
        }
        let mac = HmacSha256::new_from_slice(secret).map_err(|_| ConfigError::MissingSecret)?;
        Ok(Self { mac })
    }

    fn sign(&self, text: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(text.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    pub fn encode(&self, user_id: Uuid) -> String {
        let id = user_id.hyphenated().to_string();
        let signature = self.sign(&id);
        format!("{}.{}", id, signature)
    }

    pub fn decode(&self, token: &str) -> Option<Uuid> {
        let (id_part, sig_part) = token.split_once('.')?;
        let user_id = Uuid::try_parse(id_part).ok()?;
        let expected = self.sign(id_part);
        // Length mismatch short-circuits inside ct_eq; the expected length is public.
        if bool::from(expected.as_bytes().ct_eq(sig_part.as_bytes())) {
            Some(user_id)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn codec() -> IdentityCodec {
        IdentityCodec::new(b"test-secret-for-identity-tokens").unwrap()
    }

    #[test]
    fn round_trip_many_ids() {
        let c = codec();
        for _ in 0..500 {
            let id = Uuid::new_v4();
            assert_eq!(c.decode(&c.encode(id)), Some(id));
        }
        assert_eq!(c.decode(&c.encode(Uuid::nil())), Some(Uuid::nil()));
    }

    #[test]
    fn encoding_is_deterministic_and_well_formed() {
        let c = codec();
        let id = Uuid::new_v4();
        let t1 = c.encode(id);
        assert_eq!(t1, c.encode(id));
        let (prefix, sig) = t1.split_once('.').unwrap();
        assert_eq!(prefix, id.to_string());
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|ch| ch.is_ascii_hexdigit() && !ch.is_ascii_uppercase()));
    }

    #[test]
    fn every_single_byte_flip_is_rejected() {
        let c = codec();
        for _ in 0..8 {
            let token = c.encode(Uuid::new_v4());
            let bytes = token.as_bytes();
            for i in 0..bytes.len() {
                for mask in [0x01u8, 0x20, 0x80] {
                    let mut forged = bytes.to_vec();
                    forged[i] ^= mask;
                    // Flips that leave invalid UTF-8 cannot even reach decode as &str.
                    let Ok(s) = String::from_utf8(forged) else { continue };
                    assert_eq!(c.decode(&s), None, "flip at {} with mask {:#x} accepted: {}", i, mask, s);
                }
            }
        }
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let a = IdentityCodec::new(b"secret-a").unwrap();
        let b = IdentityCodec::new(b"secret-b").unwrap();
        let id = Uuid::new_v4();
        assert_eq!(b.decode(&a.encode(id)), None);
    }

    #[test]
    fn swapped_identifier_is_rejected() {
        let c = codec();
        let victim = Uuid::new_v4();
        let attacker = c.encode(Uuid::new_v4());
        let (_, sig) = attacker.split_once('.').unwrap();
        assert_eq!(c.decode(&format!("{}.{}", victim, sig)), None);
    }

    #[test]
    fn malformed_inputs_are_uniformly_invalid() {
        let c = codec();
        let id = Uuid::new_v4();
        let good = c.encode(id);
        let (prefix, sig) = good.split_once('.').unwrap();
        let cases = vec![
            String::new(),
            ".".to_string(),
            "no-separator".to_string(),
            prefix.to_string(),
            format!("{}.", prefix),
            format!(".{}", sig),
            format!("not-a-uuid.{}", sig),
            format!("{}.{}.extra", prefix, sig),
            format!("{}.{}", prefix, sig.to_uppercase()),
            format!("{}.{}", prefix.to_uppercase(), sig),
            format!("{}.{}", id.simple(), sig),
        ];
        for case in cases {
            assert_eq!(c.decode(&case), None, "accepted {:?}", case);
        }
    }

    #[test]
    fn empty_secret_is_a_configuration_error() {
        assert_eq!(IdentityCodec::new(b"").unwrap_err(), ConfigError::MissingSecret);
    }

    fn median_decode_time(c: &IdentityCodec, tokens: &[String], rounds: usize) -> Duration {
        let mut samples = Vec::with_capacity(rounds);
        for _ in 0..rounds {
            let start = Instant::now();
            for t in tokens {
                std::hint::black_box(c.decode(std::hint::black_box(t)));
            }
            samples.push(start.elapsed());
        }
        samples.sort();
        samples[samples.len() / 2]
    }

    #[test]
    fn decode_time_does_not_track_matching_prefix() {
        let c = codec();
        let mut close = Vec::new();
        let mut far = Vec::new();
        for _ in 0..32 {
            let good = c.encode(Uuid::new_v4());
            let (prefix, sig) = good.split_once('.').unwrap();
            // Close forgery: only the final hex digit differs.
            let mut near = sig.to_string();
            let last = near.pop().unwrap();
            near.push(if last == '0' { '1' } else { '0' });
            close.push(format!("{}.{}", prefix, near));
            // Far forgery: the first hex digit already differs.
            let first = sig.chars().next().unwrap();
            let flipped = if first == '0' { '1' } else { '0' };
            far.push(format!("{}.{}{}", prefix, flipped, &sig[1..]));
        }

        // Warm up, then interleave measurements so drift affects both sets.
        median_decode_time(&c, &close, 20);
        median_decode_time(&c, &far, 20);
        let mut close_t = Duration::ZERO;
        let mut far_t = Duration::ZERO;
        for _ in 0..5 {
            close_t += median_decode_time(&c, &close, 60);
            far_t += median_decode_time(&c, &far, 60);
        }

        let ratio = close_t.as_secs_f64() / far_t.as_secs_f64();
        assert!((0.5..2.0).contains(&ratio), "close/far decode time ratio {:.3} suggests early exit", ratio);
    }
}
