use super::blowfish::{Blowfish, BLOCK_SIZE};
use crate::error::Cs2Error;
use std::io::{self, Read, Seek, SeekFrom};

const DEFAULT_BUFFER_SIZE: usize = 8;

/// Read adapter that decrypts Blowfish data on the fly.
///
/// The wrapped reader's position at construction time becomes the
/// stream's zero offset. Bytes past the cutoff length (the largest
/// multiple of 8 not exceeding `length`) are passed through verbatim,
/// the archive format never encrypts a partial trailing block.
#[derive(Debug)]
pub struct BlowfishStream<R> {
    cipher: Blowfish,
    inner: R,
    buf: Vec<u8>,
    decrypted_pos: u64,
    decrypted_len: u64,
    pos: u64,
    length: u64,
    cutoff: u64,
    zero_pos: u64,
}

#[derive(Debug, Default, PartialEq)]
struct ReadSegments {
    leftover: u64,
    fresh: u64,
    edge: u64,
    outside: u64,
}

impl<R: Read + Seek> BlowfishStream<R> {
    pub fn new(cipher: Blowfish, inner: R, length: u64) -> anyhow::Result<Self> {
        Self::with_buffer_size(cipher, inner, length, DEFAULT_BUFFER_SIZE)
    }

    pub fn with_buffer_size(
        cipher: Blowfish,
        mut inner: R,
        length: u64,
        buffer_size: usize,
    ) -> anyhow::Result<Self> {
        if buffer_size < BLOCK_SIZE || buffer_size % BLOCK_SIZE != 0 {
            return Err(Cs2Error::BlockAlignment(buffer_size).into());
        }
        let zero_pos = inner.seek(SeekFrom::Current(0))?;
        Ok(Self {
            cipher,
            inner,
            buf: vec![0; buffer_size],
            decrypted_pos: 0,
            decrypted_len: 0,
            pos: 0,
            length,
            cutoff: length - length % BLOCK_SIZE as u64,
            zero_pos,
        })
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Splits a read request into the four segments served by `read`:
    /// bytes still cached in the decrypted buffer, whole blocks
    /// decrypted straight into the caller's buffer, a sub-block edge
    /// that refills the cache, and the plaintext tail past the cutoff.
    fn read_segments(&self, mut count: u64) -> ReadSegments {
        let mut pos = self.pos;
        let mut segments = ReadSegments::default();

        let buffered_end = self.decrypted_pos + self.decrypted_len;
        if pos >= self.decrypted_pos && pos < buffered_end {
            segments.leftover = (buffered_end - pos).min(count);
            count -= segments.leftover;
            pos += segments.leftover;
            if count == 0 {
                return segments;
            }
        }

        if pos < self.cutoff {
            segments.fresh = (self.cutoff - pos).min(count - count % BLOCK_SIZE as u64);
            count -= segments.fresh;
            pos += segments.fresh;
            if count == 0 {
                return segments;
            }
        }

        let edge = self.cutoff.saturating_sub(pos);
        if count < edge {
            segments.edge = count;
            return segments;
        }

        segments.outside = self.length.saturating_sub(pos).min(count);
        segments
    }

    /// Reads and decrypts one buffer's worth starting at the aligned
    /// position `pos`, replacing the cached leftover region.
    fn fill_buffer(&mut self, pos: u64) -> io::Result<()> {
        self.decrypted_pos = pos;
        self.decrypted_len = (self.cutoff - pos).min(self.buf.len() as u64);
        let len = self.decrypted_len as usize;
        self.inner.read_exact(&mut self.buf[..len])?;
        self.cipher.decrypt_blocks(&mut self.buf[..len]);
        Ok(())
    }

    fn set_position(&mut self, pos: u64) -> io::Result<()> {
        self.pos = pos;
        if pos < self.decrypted_pos || pos > self.decrypted_pos + self.decrypted_len {
            if pos >= self.cutoff {
                self.inner.seek(SeekFrom::Start(self.zero_pos + pos))?;
            } else {
                let aligned = pos - pos % BLOCK_SIZE as u64;
                self.inner.seek(SeekFrom::Start(self.zero_pos + aligned))?;
                if pos != aligned {
                    // The block is needed as soon as reading resumes.
                    self.fill_buffer(aligned)?;
                }
            }
        } else {
            let buffered_end = self.decrypted_pos + self.decrypted_len;
            self.inner.seek(SeekFrom::Start(self.zero_pos + buffered_end))?;
        }
        Ok(())
    }
}

impl<R: Read + Seek> Read for BlowfishStream<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        let start = self.pos;
        let segments = self.read_segments(out.len() as u64);
        let mut offset = 0;

        if segments.leftover != 0 {
            let index = (self.pos - self.decrypted_pos) as usize;
            let count = segments.leftover as usize;
            out[offset..offset + count].copy_from_slice(&self.buf[index..index + count]);
            offset += count;
            self.pos += segments.leftover;
        }

        if segments.fresh != 0 {
            let count = segments.fresh as usize;
            self.inner.read_exact(&mut out[offset..offset + count])?;
            self.cipher.decrypt_blocks(&mut out[offset..offset + count]);
            offset += count;
            self.pos += segments.fresh;
        }

        if segments.edge != 0 {
            self.fill_buffer(self.pos)?;
            let count = segments.edge as usize;
            out[offset..offset + count].copy_from_slice(&self.buf[..count]);
            self.pos += segments.edge;
        } else if segments.outside != 0 {
            let count = segments.outside as usize;
            self.inner.read_exact(&mut out[offset..offset + count])?;
            self.pos += segments.outside;
        }

        Ok((self.pos - start) as usize)
    }
}

impl<R: Read + Seek> Seek for BlowfishStream<R> {
    fn seek(&mut self, from: SeekFrom) -> io::Result<u64> {
        let target = match from {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(offset) => self.pos as i64 + offset,
            SeekFrom::End(offset) => self.length as i64 + offset,
        };
        if target < 0 || target as u64 > self.length {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("seek target {} outside stream of length {}", target, self.length),
            ));
        }
        self.set_position(target as u64)?;
        Ok(self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn make_stream(
        plain: &[u8],
        buffer_size: usize,
    ) -> BlowfishStream<Cursor<Vec<u8>>> {
        let cipher = Blowfish::new(b"test key").unwrap();
        let cutoff = plain.len() - plain.len() % BLOCK_SIZE;
        let mut encrypted = plain.to_vec();
        if cutoff > 0 {
            cipher.encrypt(&mut encrypted[..cutoff]).unwrap();
        }
        BlowfishStream::with_buffer_size(
            cipher,
            Cursor::new(encrypted),
            plain.len() as u64,
            buffer_size,
        )
        .unwrap()
    }

    fn plaintext(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(7)).collect()
    }

    #[test]
    fn whole_stream_read() {
        let plain = plaintext(53);
        let mut stream = make_stream(&plain, 8);
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, plain);
    }

    #[test]
    fn byte_at_a_time_matches_bulk() {
        let plain = plaintext(53);
        let mut stream = make_stream(&plain, 8);
        let mut out = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match stream.read(&mut byte).unwrap() {
                0 => break,
                _ => out.push(byte[0]),
            }
        }
        assert_eq!(out, plain);
    }

    #[test]
    fn irregular_chunks_match_bulk() {
        let plain = plaintext(100);
        for &chunk in &[3usize, 5, 7, 8, 13, 64] {
            let mut stream = make_stream(&plain, 16);
            let mut out = Vec::new();
            let mut buf = vec![0u8; chunk];
            loop {
                let read = stream.read(&mut buf).unwrap();
                if read == 0 {
                    break;
                }
                out.extend_from_slice(&buf[..read]);
            }
            assert_eq!(out, plain, "chunk size {}", chunk);
        }
    }

    #[test]
    fn tail_passes_through_unencrypted() {
        let plain = plaintext(21);
        let mut stream = make_stream(&plain, 8);
        stream.seek(SeekFrom::Start(16)).unwrap();
        let mut tail = Vec::new();
        stream.read_to_end(&mut tail).unwrap();
        assert_eq!(tail, &plain[16..]);
    }

    #[test]
    fn unaligned_seek_primes_buffer() {
        let plain = plaintext(64);
        let mut stream = make_stream(&plain, 8);
        stream.seek(SeekFrom::Start(13)).unwrap();
        let mut out = [0u8; 6];
        stream.read_exact(&mut out).unwrap();
        assert_eq!(out, plain[13..19]);
        assert_eq!(stream.position(), 19);
    }

    #[test]
    fn seek_from_end_and_current() {
        let plain = plaintext(40);
        let mut stream = make_stream(&plain, 8);
        stream.seek(SeekFrom::End(-8)).unwrap();
        let mut out = [0u8; 8];
        stream.read_exact(&mut out).unwrap();
        assert_eq!(out, plain[32..]);
        stream.seek(SeekFrom::Current(-16)).unwrap();
        stream.read_exact(&mut out).unwrap();
        assert_eq!(out, plain[24..32]);
    }

    #[test]
    fn seek_outside_bounds_is_rejected() {
        let plain = plaintext(24);
        let mut stream = make_stream(&plain, 8);
        assert!(stream.seek(SeekFrom::Current(-1)).is_err());
        assert!(stream.seek(SeekFrom::End(1)).is_err());
    }

    #[test]
    fn respects_zero_offset() {
        let plain = plaintext(16);
        let cipher = Blowfish::new(b"test key").unwrap();
        let mut encrypted = plain.clone();
        cipher.encrypt(&mut encrypted).unwrap();
        let mut backing = vec![0xEE; 10];
        backing.extend_from_slice(&encrypted);
        let mut cursor = Cursor::new(backing);
        cursor.seek(SeekFrom::Start(10)).unwrap();
        let mut stream = BlowfishStream::new(cipher, cursor, 16).unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, plain);
    }

    #[test]
    fn rejects_bad_buffer_size() {
        let cipher = Blowfish::new(b"k").unwrap();
        let cursor = Cursor::new(vec![0u8; 8]);
        assert!(BlowfishStream::with_buffer_size(cipher, cursor, 8, 12).is_err());
    }

    #[test]
    fn segment_split_prefers_cached_bytes() {
        let plain = plaintext(32);
        let mut stream = make_stream(&plain, 8);
        stream.seek(SeekFrom::Start(3)).unwrap();
        let segments = stream.read_segments(16);
        assert_eq!(
            segments,
            ReadSegments { leftover: 5, fresh: 8, edge: 3, outside: 0 }
        );
    }
}
