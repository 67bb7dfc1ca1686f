//! Stateful splitter turning a byte stream into length-delimited frames.
//!
//! Wire shape: `[length:4 BE][payload:length]`. The decoder keeps the
//! partial header, the remaining payload length and the payload buffer
//! between calls, so chunks can be cut anywhere.

/// Fatal framing errors. The connection must be closed on any of them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FramingError {
    /// A frame declared a zero length.
    #[error("zero-length frame")]
    ZeroLength,

    /// A frame declared a length above the current bound.
    #[error("frame length {len} exceeds max {max}")]
    TooLong {
        /// Declared length.
        len: usize,
        /// Bound in force when the header was read.
        max: usize,
    },
}

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Per-connection frame decoder.
///
/// After the first [`FramingError`] the decoder is poisoned and discards
/// everything fed to it.
#[derive(Debug)]
pub struct FrameDecoder {
    header: [u8; LENGTH_PREFIX_SIZE],
    header_len: usize,
    /// Payload bytes still expected for the current frame; 0 while reading a header.
    remaining: usize,
    payload: Vec<u8>,
    max_frame_len: usize,
    poisoned: bool,
}

impl FrameDecoder {
    /// Create a decoder rejecting frames longer than `max_frame_len`.
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            header: [0; LENGTH_PREFIX_SIZE],
            header_len: 0,
            remaining: 0,
            payload: Vec::new(),
            max_frame_len,
            poisoned: false,
        }
    }

    /// Change the length bound, typically once the handshake completes.
    pub fn set_max_frame_len(&mut self, max_frame_len: usize) {
        self.max_frame_len = max_frame_len;
    }

    /// Current length bound.
    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    /// Whether a framing error has been seen.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Feed one chunk; frames are produced lazily as the iterator is driven.
    ///
    /// Bytes left unconsumed when the iterator is dropped are lost, so drive
    /// it to completion.
    pub fn decode<'a>(&'a mut self, chunk: &'a [u8]) -> Frames<'a> {
        Frames {
            decoder: self,
            chunk,
            pos: 0,
        }
    }

    fn next_frame(
        &mut self,
        chunk: &[u8],
        pos: &mut usize,
    ) -> Option<Result<Vec<u8>, FramingError>> {
        if self.poisoned {
            *pos = chunk.len();
            return None;
        }

        while *pos < chunk.len() {
            if self.remaining == 0 {
                self.header[self.header_len] = chunk[*pos];
                self.header_len += 1;
                *pos += 1;
                if self.header_len < LENGTH_PREFIX_SIZE {
                    continue;
                }

                self.header_len = 0;
                let len = u32::from_be_bytes(self.header) as usize;
                if len == 0 {
                    return Some(Err(self.poison(FramingError::ZeroLength)));
                }
                if len > self.max_frame_len {
                    return Some(Err(self.poison(FramingError::TooLong {
                        len,
                        max: self.max_frame_len,
                    })));
                }
                self.remaining = len;
                self.payload = Vec::with_capacity(len);
            }

            let take = self.remaining.min(chunk.len() - *pos);
            self.payload.extend_from_slice(&chunk[*pos..*pos + take]);
            *pos += take;
            self.remaining -= take;
            if self.remaining == 0 {
                return Some(Ok(std::mem::take(&mut self.payload)));
            }
        }
        None
    }

    fn poison(&mut self, err: FramingError) -> FramingError {
        self.poisoned = true;
        self.payload = Vec::new();
        self.remaining = 0;
        err
    }
}

/// Lazy sequence of frames decoded from one chunk.
pub struct Frames<'a> {
    decoder: &'a mut FrameDecoder,
    chunk: &'a [u8],
    pos: usize,
}

impl Iterator for Frames<'_> {
    type Item = Result<Vec<u8>, FramingError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.decoder.next_frame(self.chunk, &mut self.pos)
    }
}

/// Prefix `payload` with its 4-byte big-endian length.
pub fn encode_length_prefixed(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_of(payloads: &[&[u8]]) -> Vec<u8> {
        payloads
            .iter()
            .flat_map(|p| encode_length_prefixed(p))
            .collect()
    }

    fn collect(decoder: &mut FrameDecoder, chunk: &[u8]) -> Vec<Result<Vec<u8>, FramingError>> {
        decoder.decode(chunk).collect()
    }

    #[test]
    fn test_many_frames_in_one_chunk() {
        let bytes = stream_of(&[b"a", b"hello", b"xyz"]);
        let mut decoder = FrameDecoder::new(1024);

        let frames = collect(&mut decoder, &bytes);
        assert_eq!(
            frames,
            vec![Ok(b"a".to_vec()), Ok(b"hello".to_vec()), Ok(b"xyz".to_vec())]
        );
    }

    #[test]
    fn test_every_split_point_yields_same_frames() {
        let payloads: [&[u8]; 3] = [b"first", b"\x01", b"third frame payload"];
        let bytes = stream_of(&payloads);

        for split in 0..=bytes.len() {
            let mut decoder = FrameDecoder::new(1024);
            let mut frames = collect(&mut decoder, &bytes[..split]);
            frames.extend(collect(&mut decoder, &bytes[split..]));

            let expected: Vec<Result<Vec<u8>, FramingError>> =
                payloads.iter().map(|p| Ok(p.to_vec())).collect();
            assert_eq!(frames, expected, "split at {split}");
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let bytes = stream_of(&[b"one", b"two"]);
        let mut decoder = FrameDecoder::new(1024);

        let mut frames = Vec::new();
        for byte in &bytes {
            frames.extend(collect(&mut decoder, std::slice::from_ref(byte)));
        }
        assert_eq!(frames, vec![Ok(b"one".to_vec()), Ok(b"two".to_vec())]);
    }

    #[test]
    fn test_chunk_with_no_complete_frame() {
        let bytes = stream_of(&[b"payload"]);
        let mut decoder = FrameDecoder::new(1024);

        assert!(collect(&mut decoder, &bytes[..2]).is_empty());
        assert!(collect(&mut decoder, &bytes[2..6]).is_empty());
        assert_eq!(
            collect(&mut decoder, &bytes[6..]),
            vec![Ok(b"payload".to_vec())]
        );
    }

    #[test]
    fn test_zero_length_is_fatal() {
        let mut decoder = FrameDecoder::new(1024);
        let frames = collect(&mut decoder, &[0, 0, 0, 0, 0, 0, 0, 1, 9]);
        assert_eq!(frames, vec![Err(FramingError::ZeroLength)]);
        assert!(decoder.is_poisoned());
    }

    #[test]
    fn test_oversize_is_fatal_and_poisons() {
        let mut decoder = FrameDecoder::new(8);
        let mut bytes = (9u32).to_be_bytes().to_vec();
        bytes.extend_from_slice(&[0; 9]);

        let frames = collect(&mut decoder, &bytes);
        assert_eq!(frames, vec![Err(FramingError::TooLong { len: 9, max: 8 })]);

        // Nothing is emitted afterwards, even for valid data.
        let valid = stream_of(&[b"ok"]);
        assert!(collect(&mut decoder, &valid).is_empty());
    }

    #[test]
    fn test_frames_before_bad_header_are_delivered() {
        let mut bytes = stream_of(&[b"good"]);
        bytes.extend_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF]);
        let mut decoder = FrameDecoder::new(1024);

        let frames = collect(&mut decoder, &bytes);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], Ok(b"good".to_vec()));
        assert!(matches!(frames[1], Err(FramingError::TooLong { .. })));
    }

    #[test]
    fn test_raise_bound_after_handshake() {
        let big = vec![7u8; 2000];
        let bytes = stream_of(&[b"register", &big]);
        let mut decoder = FrameDecoder::new(1024);

        let mut iter_frames = Vec::new();
        {
            let mut frames = decoder.decode(&bytes[..12]);
            iter_frames.extend(frames.by_ref());
        }
        assert_eq!(iter_frames, vec![Ok(b"register".to_vec())]);

        decoder.set_max_frame_len(4096);
        assert_eq!(decoder.max_frame_len(), 4096);
        assert_eq!(collect(&mut decoder, &bytes[12..]), vec![Ok(big)]);
    }

    #[test]
    fn test_length_prefix_is_big_endian() {
        let framed = encode_length_prefixed(&[1, 2, 3]);
        assert_eq!(framed, vec![0, 0, 0, 3, 1, 2, 3]);
    }
}
