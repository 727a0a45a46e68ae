pub fn flip_vertical(buf: Vec<u8>, width_in_bytes: usize) -> Vec<u8> {
    buf.chunks_exact(width_in_bytes)
        .rev()
        .flatten()
        .copied()
        .collect()
}

pub fn remove_stride_padding(
    buf: Vec<u8>,
    width_in_bytes: usize,
    padding: usize,
) -> Vec<u8> {
    if padding == 0 {
        return buf;
    }
    buf.chunks_exact(width_in_bytes)
        .map(|c| &c[..width_in_bytes - padding])
        .flatten()
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flips_rows() {
        let buf = vec![1, 2, 3, 4, 5, 6];
        assert_eq!(flip_vertical(buf, 2), vec![5, 6, 3, 4, 1, 2]);
    }

    #[test]
    fn strips_row_padding() {
        let buf = vec![1, 2, 0, 3, 4, 0];
        assert_eq!(remove_stride_padding(buf, 3, 1), vec![1, 2, 3, 4]);
        let buf = vec![1, 2, 3, 4];
        assert_eq!(remove_stride_padding(buf, 2, 0), vec![1, 2, 3, 4]);
    }
}
