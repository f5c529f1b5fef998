//! Stream descriptors.

/// Format of a sample stream at one point in an effects chain.
///
/// Both fields are always positive; a chain is well formed when every
/// adjacent effect pair agrees on the stream at the seam.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stream {
    /// Sample rate in Hz.
    pub fs: u32,
    /// Number of interleaved channels per frame.
    pub channels: usize,
}

impl Stream {
    pub fn new(fs: u32, channels: usize) -> Self {
        Self { fs, channels }
    }
}

impl std::fmt::Display for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ch @ {}Hz", self.channels, self.fs)
    }
}
