use crate::models::audio_models::AudioFrame;

/// Reusable scratch region sized to exactly one capture period.
///
/// Owned by the capture loop and never shared. The only way out is
/// `copy_out`, which hands a consumer its own copy of the bytes.
#[derive(Debug)]
pub struct FrameBuffer {
    data: Box<[u8]>,
}

impl FrameBuffer {
    pub fn new(frame_size: usize) -> Self {
        Self {
            data: vec![0u8; frame_size].into_boxed_slice(),
        }
    }

    /// Region handed to `Capturer::read_frame`.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Frame size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether a read of `bytes_read` bytes filled the whole frame.
    pub fn is_complete(&self, bytes_read: usize) -> bool {
        bytes_read == self.data.len()
    }

    /// Copy the current contents into a freshly allocated frame.
    pub fn copy_out(&self, sequence: u64) -> AudioFrame {
        AudioFrame::new(self.data.to_vec(), sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sized_to_one_frame() {
        let buffer = FrameBuffer::new(882);
        assert_eq!(buffer.len(), 882);
        assert!(buffer.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn copy_out_matches_what_was_read() {
        let mut buffer = FrameBuffer::new(4);
        buffer.as_mut_slice().copy_from_slice(&[1, 2, 3, 4]);

        let frame = buffer.copy_out(0);
        assert_eq!(frame.as_bytes(), &[1, 2, 3, 4]);
    }

    #[test]
    fn copies_are_independent_of_later_reads() {
        let mut buffer = FrameBuffer::new(2);
        buffer.as_mut_slice().copy_from_slice(&[5, 6]);
        let first = buffer.copy_out(0);

        buffer.as_mut_slice().copy_from_slice(&[7, 8]);
        let second = buffer.copy_out(1);

        assert_eq!(first.as_bytes(), &[5, 6]);
        assert_eq!(second.as_bytes(), &[7, 8]);
        assert_eq!(second.sequence(), 1);
    }

    #[test]
    fn completeness_requires_exact_length() {
        let buffer = FrameBuffer::new(8);
        assert!(buffer.is_complete(8));
        assert!(!buffer.is_complete(7));
        assert!(!buffer.is_complete(0));
    }
}
