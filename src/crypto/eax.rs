//! AES-128-EAX composed from block-cipher primitives.
//!
//! Built directly on the raw AES block operation and CTR mode rather than
//! a packaged AEAD, because the RA2 wire format pins down every detail of
//! the composition: OMAC tweak prefixes 0/1/2, the CMAC subkey doubling
//! construction, and the tag as the XOR of the three MACs.
//!
//! ```text
//! N' = OMAC(0 || nonce)
//! H' = OMAC(1 || associated data)
//! C  = CTR(key, counter = N', plaintext)
//! C' = OMAC(2 || C)
//! tag = N' ^ H' ^ C'          wire = C || tag
//! ```

use aes::Aes128;
use aes::cipher::{BlockEncrypt, KeyInit, KeyIvInit, StreamCipher, generic_array::GenericArray};
use ctr::Ctr128BE;

type Aes128Ctr = Ctr128BE<Aes128>;

/// CMAC subkey finalization constants, indexed by the top two bits of the
/// encrypted zero block.
const DOUBLING_LUT: [u8; 4] = [0x00, 0x87, 0x0e, 0x89];

pub struct AesEax {
    key: [u8; 16],
    cipher: Aes128,
    k1: [u8; 16],
    k2: [u8; 16],
}

impl AesEax {
    pub fn new(key: &[u8; 16]) -> Self {
        let cipher = Aes128::new(GenericArray::from_slice(key));
        let (k1, k2) = derive_subkeys(&cipher);
        Self {
            key: *key,
            cipher,
            k1,
            k2,
        }
    }

    /// Encrypt and authenticate. Returns `ciphertext || 16-byte tag`.
    pub fn encrypt(&self, nonce: &[u8; 16], ad: &[u8], plaintext: &[u8]) -> Vec<u8> {
        let n_cmac = self.cmac(0, nonce);

        let mut out = vec![0u8; plaintext.len() + 16];
        out[..plaintext.len()].copy_from_slice(plaintext);
        self.ctr(&n_cmac, &mut out[..plaintext.len()]);

        let ad_cmac = self.cmac(1, ad);
        let c_cmac = self.cmac(2, &out[..plaintext.len()]);
        for i in 0..16 {
            out[plaintext.len() + i] = n_cmac[i] ^ ad_cmac[i] ^ c_cmac[i];
        }

        out
    }

    /// Verify and decrypt `ciphertext || tag`. Returns `None` on any tag
    /// byte mismatch — the full tag is recomputed and compared before any
    /// plaintext is produced.
    pub fn decrypt(&self, nonce: &[u8; 16], ad: &[u8], data: &[u8]) -> Option<Vec<u8>> {
        if data.len() < 16 {
            return None;
        }
        let (ciphertext, tag) = data.split_at(data.len() - 16);

        let n_cmac = self.cmac(0, nonce);
        let ad_cmac = self.cmac(1, ad);
        let c_cmac = self.cmac(2, ciphertext);

        for i in 0..16 {
            if n_cmac[i] ^ ad_cmac[i] ^ c_cmac[i] != tag[i] {
                return None;
            }
        }

        let mut out = ciphertext.to_vec();
        self.ctr(&n_cmac, &mut out);
        Some(out)
    }

    fn ctr(&self, counter: &[u8; 16], data: &mut [u8]) {
        let mut ctr = Aes128Ctr::new(
            GenericArray::from_slice(&self.key),
            GenericArray::from_slice(counter),
        );
        ctr.apply_keystream(data);
    }

    /// OMAC over `prefix_block || data` where the prefix block is a zero
    /// block ending in the tweak byte.
    fn cmac(&self, tweak: u8, data: &[u8]) -> [u8; 16] {
        let mut acc = [0u8; 16];
        let mut prefix = [0u8; 16];
        prefix[15] = tweak;

        if data.is_empty() {
            // The prefix block itself is the final (complete) block.
            xor16(&mut prefix, &self.k1);
            self.cbc_step(&mut acc, &prefix);
            return acc;
        }

        self.cbc_step(&mut acc, &prefix);

        let r = data.len() % 16;
        if r == 0 {
            let n = data.len() / 16;
            for block in data[..(n - 1) * 16].chunks_exact(16) {
                self.cbc_step(&mut acc, block);
            }
            let mut last = [0u8; 16];
            last.copy_from_slice(&data[(n - 1) * 16..]);
            xor16(&mut last, &self.k1);
            self.cbc_step(&mut acc, &last);
        } else {
            for block in data[..data.len() - r].chunks_exact(16) {
                self.cbc_step(&mut acc, block);
            }
            let mut last = [0u8; 16];
            last[..r].copy_from_slice(&data[data.len() - r..]);
            last[r] = 0x80;
            xor16(&mut last, &self.k2);
            self.cbc_step(&mut acc, &last);
        }

        acc
    }

    /// One CBC-MAC round: `acc = E(acc ^ block)`.
    fn cbc_step(&self, acc: &mut [u8; 16], block: &[u8]) {
        for (a, b) in acc.iter_mut().zip(block) {
            *a ^= b;
        }
        let ga = GenericArray::from_mut_slice(acc);
        self.cipher.encrypt_block(ga);
    }
}

/// Derive K1 and K2 from the encryption of the all-zero block: K1 is one
/// doubling in GF(2^128), K2 is two, with the reduction polynomial folded
/// in from the lookup table according to the bits shifted out.
fn derive_subkeys(cipher: &Aes128) -> ([u8; 16], [u8; 16]) {
    let mut l = [0u8; 16];
    let ga = GenericArray::from_mut_slice(&mut l);
    cipher.encrypt_block(ga);

    let v = l[0] >> 6;
    let mut k1 = [0u8; 16];
    let mut k2 = [0u8; 16];
    for i in 0..15 {
        k1[i] = (l[i + 1] >> 7) | (l[i] << 1);
        k2[i] = (l[i + 1] >> 6) | (l[i] << 2);
    }
    k2[14] ^= v >> 1;
    k2[15] = (l[15] << 2) ^ DOUBLING_LUT[v as usize];
    k1[15] = (l[15] << 1) ^ DOUBLING_LUT[(v >> 1) as usize];

    (k1, k2)
}

fn xor16(target: &mut [u8; 16], other: &[u8; 16]) {
    for (t, o) in target.iter_mut().zip(other) {
        *t ^= o;
    }
}

// ── Tests ────────────────────────────────────────────────────────
