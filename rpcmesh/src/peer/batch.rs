//! Outbound write batching.

/// Per-connection buffer of encoded frames waiting for the next flush.
///
/// Frames are concatenated as they arrive; the connection task drains the
/// buffer on its send-interval timer, or earlier once `flush_threshold`
/// bytes have accumulated.
#[derive(Debug, Default)]
pub(crate) struct SendBatch {
    buf: Vec<u8>,
    flush_threshold: Option<usize>,
}

impl SendBatch {
    pub(crate) fn new(flush_threshold: Option<usize>) -> Self {
        Self {
            buf: Vec::new(),
            flush_threshold,
        }
    }

    /// Append one frame. Returns true when the buffer crossed the flush threshold.
    pub(crate) fn push(&mut self, frame: &[u8]) -> bool {
        self.buf.extend_from_slice(frame);
        self.flush_threshold
            .is_some_and(|threshold| self.buf.len() >= threshold)
    }

    /// Everything buffered so far, or `None` when empty.
    pub(crate) fn take(&mut self) -> Option<Vec<u8>> {
        if self.buf.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buf))
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_are_concatenated_in_order() {
        let mut batch = SendBatch::new(None);
        assert!(!batch.push(b"one"));
        assert!(!batch.push(b"two"));
        assert_eq!(batch.len(), 6);
        assert_eq!(batch.take(), Some(b"onetwo".to_vec()));
        assert_eq!(batch.take(), None);
    }

    #[test]
    fn test_threshold_requests_flush() {
        let mut batch = SendBatch::new(Some(8));
        assert!(!batch.push(&[0; 5]));
        assert!(batch.push(&[0; 3]));
        assert_eq!(batch.take().map(|b| b.len()), Some(8));
        assert!(!batch.push(&[0; 1]));
    }
}
