//! Fixed-size framing for the streamed representation.
//!
//! The provider serializes the response once and emits it as consecutive slices of exactly
//! `chunk_size` bytes; only the final slice may be shorter. Slices never carry document
//! boundaries, so the receiver concatenates every chunk before parsing.

pub const DEFAULT_CHUNK_SIZE: usize = 65_536;

/// Split `payload` into owned chunks of `chunk_size` bytes. A zero `chunk_size` is treated as
/// one byte. An empty payload yields no chunks.
pub fn split_into_chunks(payload: &[u8], chunk_size: usize) -> Vec<Vec<u8>> {
    payload
        .chunks(chunk_size.max(1))
        .map(<[u8]>::to_vec)
        .collect()
}

/// Concatenate chunks in arrival order.
pub fn reassemble<I, C>(chunks: I) -> Vec<u8>
where
    I: IntoIterator<Item = C>,
    C: AsRef<[u8]>,
{
    let mut out = Vec::new();
    for chunk in chunks {
        out.extend_from_slice(chunk.as_ref());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| b'a' + (i % 26) as u8).collect()
    }

    #[test]
    fn chunking_round_trips_at_boundary_lengths() {
        for len in [0, 1, 65_536, 65_537, 200_000] {
            let original = payload(len);
            let chunks = split_into_chunks(&original, DEFAULT_CHUNK_SIZE);
            assert_eq!(chunks.len(), len.div_ceil(DEFAULT_CHUNK_SIZE), "len {len}");
            if let Some((last, full)) = chunks.split_last() {
                assert!(full.iter().all(|chunk| chunk.len() == DEFAULT_CHUNK_SIZE));
                assert!(!last.is_empty() && last.len() <= DEFAULT_CHUNK_SIZE);
            }
            assert_eq!(reassemble(&chunks), original, "len {len}");
        }
    }

    #[test]
    fn small_chunk_size_splits_document() {
        let document = br#"{"prompt":"x","images":["aGk="]}"#;
        let chunks = split_into_chunks(document, 4);
        assert_eq!(chunks.len(), 8);
        assert_eq!(chunks[0], b"{\"pr");
        assert_eq!(reassemble(chunks), document.to_vec());
    }

    #[test]
    fn zero_chunk_size_does_not_loop() {
        let chunks = split_into_chunks(b"abc", 0);
        assert_eq!(chunks, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }
}
