use super::consts::{INIT_P, INIT_S};
use crate::error::Cs2Error;

pub const BLOCK_SIZE: usize = 8;

const ROUNDS: usize = 16;

/// Blowfish cipher used by CatSystem2 archives.
///
/// This is the engine's own little-endian flavor of the algorithm: the
/// two 32-bit halves of every 8-byte block are read and written as
/// little-endian words.
#[derive(Clone)]
pub struct Blowfish {
    p: [u32; 18],
    s: [[u32; 256]; 4],
}

impl std::fmt::Debug for Blowfish {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blowfish").finish()
    }
}

impl Blowfish {
    /// Builds the key schedule from an arbitrary-length key.
    pub fn new(key: &[u8]) -> anyhow::Result<Self> {
        if key.is_empty() {
            return Err(
                Cs2Error::Custom("Blowfish key must not be empty".to_owned())
                    .into(),
            );
        }
        let mut p = INIT_P;

        let mut j = 0;
        for subkey in p.iter_mut() {
            let mut data = 0u32;
            for k in 0..4 {
                data = (data << 8) | u32::from(key[(j + k) % key.len()]);
            }
            *subkey ^= data;
            j = (j + 4) % key.len();
        }

        let mut cipher = Self { p, s: INIT_S };

        // The schedule is its own plaintext during construction.
        let mut l = 0u32;
        let mut r = 0u32;
        for i in (0..cipher.p.len()).step_by(2) {
            let (nl, nr) = cipher.encipher(l, r);
            cipher.p[i] = nl;
            cipher.p[i + 1] = nr;
            l = nl;
            r = nr;
        }
        for sbox in 0..4 {
            for i in (0..256).step_by(2) {
                let (nl, nr) = cipher.encipher(l, r);
                cipher.s[sbox][i] = nl;
                cipher.s[sbox][i + 1] = nr;
                l = nl;
                r = nr;
            }
        }
        Ok(cipher)
    }

    /// Encrypts `buf` in place. The length must be a positive multiple of 8.
    pub fn encrypt(&self, buf: &mut [u8]) -> anyhow::Result<()> {
        self.check_len(buf.len())?;
        self.encrypt_blocks(buf);
        Ok(())
    }

    /// Decrypts `buf` in place. The length must be a positive multiple of 8.
    pub fn decrypt(&self, buf: &mut [u8]) -> anyhow::Result<()> {
        self.check_len(buf.len())?;
        self.decrypt_blocks(buf);
        Ok(())
    }

    fn check_len(&self, len: usize) -> anyhow::Result<()> {
        if len == 0 || len % BLOCK_SIZE != 0 {
            return Err(Cs2Error::BlockAlignment(len).into());
        }
        Ok(())
    }

    pub(crate) fn encrypt_blocks(&self, buf: &mut [u8]) {
        for block in buf.chunks_exact_mut(BLOCK_SIZE) {
            let l = read_u32_le(&block[0..4]);
            let r = read_u32_le(&block[4..8]);
            let (l, r) = self.encipher(l, r);
            block[0..4].copy_from_slice(&l.to_le_bytes());
            block[4..8].copy_from_slice(&r.to_le_bytes());
        }
    }

    pub(crate) fn decrypt_blocks(&self, buf: &mut [u8]) {
        for block in buf.chunks_exact_mut(BLOCK_SIZE) {
            let l = read_u32_le(&block[0..4]);
            let r = read_u32_le(&block[4..8]);
            let (l, r) = self.decipher(l, r);
            block[0..4].copy_from_slice(&l.to_le_bytes());
            block[4..8].copy_from_slice(&r.to_le_bytes());
        }
    }

    #[inline]
    fn round(&self, x: u32) -> u32 {
        let a = (x >> 24) as usize;
        let b = (x >> 16) as usize & 0xFF;
        let c = (x >> 8) as usize & 0xFF;
        let d = x as usize & 0xFF;
        (self.s[0][a].wrapping_add(self.s[1][b]) ^ self.s[2][c])
            .wrapping_add(self.s[3][d])
    }

    #[inline]
    fn encipher(&self, mut xl: u32, mut xr: u32) -> (u32, u32) {
        xl ^= self.p[0];
        for i in 1..=ROUNDS {
            if i % 2 == 1 {
                xr ^= self.round(xl) ^ self.p[i];
            } else {
                xl ^= self.round(xr) ^ self.p[i];
            }
        }
        xr ^= self.p[ROUNDS + 1];
        (xr, xl)
    }

    #[inline]
    fn decipher(&self, mut xl: u32, mut xr: u32) -> (u32, u32) {
        xl ^= self.p[ROUNDS + 1];
        for i in (1..=ROUNDS).rev() {
            if i % 2 == 0 {
                xr ^= self.round(xl) ^ self.p[i];
            } else {
                xl ^= self.round(xr) ^ self.p[i];
            }
        }
        xr ^= self.p[0];
        (xr, xl)
    }
}

#[inline]
fn read_u32_le(buf: &[u8]) -> u32 {
    u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
}
