pub mod image;

pub fn zlib_decompress(buf: &[u8]) -> anyhow::Result<Vec<u8>> {
    use flate2::read::ZlibDecoder;
    use std::io::Read;

    let mut decoder = ZlibDecoder::new(buf);
    let mut ret = Vec::with_capacity(buf.len());
    decoder.read_to_end(&mut ret)?;
    Ok(ret)
}

/// Inflates `buf`, keeping whatever came out when the stream turns out
/// to be truncated or the declared output size is too small.
///
/// CatSystem2 ships alpha masks with both defects and renders them
/// anyway, so data and output-buffer errors return the partial output
/// instead of failing the frame.
pub fn zlib_decompress_partial(buf: &[u8], decompressed_len: usize) -> Vec<u8> {
    use flate2::{Decompress, FlushDecompress};

    let mut ret = Vec::with_capacity(decompressed_len);
    let mut inflater = Decompress::new(true);
    let _ = inflater.decompress_vec(buf, &mut ret, FlushDecompress::Finish);
    ret
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deflate(data: &[u8]) -> Vec<u8> {
        use flate2::{read::ZlibEncoder, Compression};
        use std::io::Read;

        let mut encoder = ZlibEncoder::new(data, Compression::default());
        let mut ret = Vec::new();
        encoder.read_to_end(&mut ret).unwrap();
        ret
    }

    #[test]
    fn decompress_roundtrip() {
        let data: Vec<u8> = (0..512u32).map(|i| (i % 7) as u8).collect();
        let compressed = deflate(&data);
        assert_eq!(zlib_decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn strict_decompress_rejects_garbage() {
        assert!(zlib_decompress(&[0xDE, 0xAD, 0xBE, 0xEF]).is_err());
    }

    #[test]
    fn partial_decompress_survives_truncation() {
        let data: Vec<u8> = (0..4096u32).map(|i| (i * 31 % 251) as u8).collect();
        let compressed = deflate(&data);
        let truncated = &compressed[..compressed.len() / 2];
        let partial = zlib_decompress_partial(truncated, data.len());
        assert!(!partial.is_empty());
        assert!(partial.len() <= data.len());
        assert_eq!(partial[..], data[..partial.len()]);
    }

    #[test]
    fn partial_decompress_clamps_to_declared_length() {
        let data = vec![0x5Au8; 256];
        let compressed = deflate(&data);
        let partial = zlib_decompress_partial(&compressed, 100);
        assert_eq!(partial, &data[..100]);
    }
}
