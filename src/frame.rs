//! Captured frames.
//!
//! A `Frame` is produced once by the capture stage and then moved, never
//! shared, through the frame channel into the inference stage. Pixels are
//! private; detectors read them through `Frame::pixels()` and cannot mutate
//! them.

/// One captured frame.
///
/// Deliberately not `Clone`: ownership moves on a successful channel send.
pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Capture time, epoch milliseconds.
    pub captured_at: u64,
    /// Sequence number assigned by the capture source.
    pub sequence: u64,
}

impl Frame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, captured_at: u64, sequence: u64) -> Self {
        Self {
            pixels,
            width,
            height,
            captured_at,
            sequence,
        }
    }

    /// Read-only pixel access for detectors.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

impl std::fmt::Debug for Frame {
    // Never dump pixel data into logs.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("captured_at", &self.captured_at)
            .field("sequence", &self.sequence)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_omits_pixels() {
        let frame = Frame::new(vec![7u8; 12], 2, 2, 1_000, 1);
        let rendered = format!("{:?}", frame);
        assert!(rendered.contains("bytes: 12"));
        assert!(!rendered.contains("[7"));
    }

    #[test]
    fn pixels_are_readable() {
        let frame = Frame::new(vec![1, 2, 3], 1, 1, 0, 0);
        assert_eq!(frame.pixels(), &[1, 2, 3]);
        assert_eq!(frame.byte_len(), 3);
    }
}
