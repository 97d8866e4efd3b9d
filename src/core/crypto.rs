//! Cipher primitive for the crypt packet payload.
//!
//! A keyed, length-preserving keystream transform. Both directions of the
//! transform also produce three independent 16-bit checksums plus one
//! combined checksum, all computed over the *plaintext* and the effective
//! key. The transport layer compares the three sub-checksums against the
//! packet header to detect cipher desynchronization; the combined checksum
//! is carried forward into the next outgoing header as a continuity token.
//!
//! `check2` depends on the plaintext alone; `check0`, `check1`, and the
//! combined checksum mix in keystream material, so a wrong key is caught
//! even when the garbled plaintext happens to sum the same.
//!
//! When `override_key` is present it supersedes the rolling 32-bit key
//! entirely. The transport uses this during brute-force recovery, trying
//! every override byte `0..=254` against a header whose checksums did not
//! match under the rolling key.

/// Checksums computed over one packet's plaintext.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Checksums {
    /// Combined checksum, carried into the next header in this direction.
    pub combined: u16,
    pub check0: u16,
    pub check1: u16,
    pub check2: u16,
}

/// Keystream generator. The multiplier/increment pair is the classic
/// 32-bit linear congruential step; the high half of the state is the
/// stream, the low half never reaches the wire.
struct KeyStream {
    state: u32,
}

impl KeyStream {
    fn new(key: u32) -> Self {
        Self { state: key }
    }

    fn next_byte(&mut self) -> u8 {
        self.state = self.state.wrapping_mul(0x0003_43FD).wrapping_add(0x0026_9EC3);
        (self.state >> 16) as u8
    }
}

/// Running checksum state, fed one plaintext/keystream byte pair at a time.
#[derive(Default)]
struct CheckAccum {
    c0: u16,
    c1: u16,
    c2: u16,
}

impl CheckAccum {
    fn push(&mut self, plain: u8, stream: u8) {
        self.c0 = self.c0.wrapping_add(u16::from(plain ^ stream));
        self.c1 = self.c1.rotate_left(1) ^ u16::from(plain.wrapping_add(stream));
        self.c2 = self.c2.wrapping_add(u16::from(plain));
    }

    fn finish(self) -> Checksums {
        Checksums {
            combined: (self.c0 ^ self.c1).wrapping_add(self.c2),
            check0: self.c0,
            check1: self.c1,
            check2: self.c2,
        }
    }
}

fn effective_key(key: u32, override_key: Option<u8>) -> u32 {
    match override_key {
        Some(k) => u32::from(k),
        None => key,
    }
}

/// Encrypt `plain` under `key`, producing ciphertext of the same length
/// and the four plaintext checksums.
pub fn encrypt(plain: &[u8], key: u32, override_key: Option<u8>) -> (Vec<u8>, Checksums) {
    let mut stream = KeyStream::new(effective_key(key, override_key));
    let mut acc = CheckAccum::default();
    let mut out = Vec::with_capacity(plain.len());

    for &p in plain {
        let s = stream.next_byte();
        acc.push(p, s);
        out.push(p ^ s);
    }

    (out, acc.finish())
}

/// Decrypt `cipher` under `key`, producing plaintext of the same length
/// and the same four checksums `encrypt` produced for it.
pub fn decrypt(cipher: &[u8], key: u32, override_key: Option<u8>) -> (Vec<u8>, Checksums) {
    let mut stream = KeyStream::new(effective_key(key, override_key));
    let mut acc = CheckAccum::default();
    let mut out = Vec::with_capacity(cipher.len());

    for &c in cipher {
        let s = stream.next_byte();
        let p = c ^ s;
        acc.push(p, s);
        out.push(p);
    }

    (out, acc.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &[u8] = &[0x74, 0x65, 0x73, 0x74];

    #[test]
    fn round_trip_reproduces_plaintext_and_checksums() {
        for key in [0u32, 3, 995_117, 0x7FFF_FFFF, 0x8000_0000, 0xFFFF_FFFF] {
            let (cipher, enc_checks) = encrypt(SAMPLE, key, None);
            let (plain, dec_checks) = decrypt(&cipher, key, None);
            assert_eq!(plain, SAMPLE);
            assert_eq!(enc_checks, dec_checks);
        }
    }

    #[test]
    fn length_is_preserved() {
        for len in [0usize, 1, 2, 13, 64, 4096] {
            let plain = vec![0xA5u8; len];
            let (cipher, _) = encrypt(&plain, 12345, None);
            assert_eq!(cipher.len(), len);
        }
    }

    #[test]
    fn empty_input_round_trips() {
        let (cipher, enc_checks) = encrypt(&[], 42, None);
        assert!(cipher.is_empty());
        let (plain, dec_checks) = decrypt(&cipher, 42, None);
        assert!(plain.is_empty());
        assert_eq!(enc_checks, dec_checks);
    }

    #[test]
    fn check2_depends_on_plaintext_only() {
        let (_, a) = encrypt(SAMPLE, 0, None);
        let (_, b) = encrypt(SAMPLE, 0xDEAD_BEEF, None);
        assert_eq!(a.check2, b.check2);
        // The keyed checksums must not collide for these two keys.
        assert_ne!((a.check0, a.check1), (b.check0, b.check1));
    }

    #[test]
    fn different_keys_produce_different_ciphertext() {
        let (a, _) = encrypt(SAMPLE, 1, None);
        let (b, _) = encrypt(SAMPLE, 2, None);
        assert_ne!(a, b);
    }

    #[test]
    fn override_key_supersedes_rolling_key() {
        let (with_override, oc) = encrypt(SAMPLE, 0xDEAD_BEEF, Some(0x5A));
        let (as_plain_key, pc) = encrypt(SAMPLE, 0x5A, None);
        assert_eq!(with_override, as_plain_key);
        assert_eq!(oc, pc);

        let (plain, checks) = decrypt(&with_override, 0, Some(0x5A));
        assert_eq!(plain, SAMPLE);
        assert_eq!(checks, oc);
    }

    #[test]
    fn checksums_are_deterministic() {
        let (_, a) = encrypt(SAMPLE, 995_117, None);
        let (_, b) = encrypt(SAMPLE, 995_117, None);
        assert_eq!(a, b);
    }
}
