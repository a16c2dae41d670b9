use std::io;

/// Types that can be written as the body of a frame.
pub trait Serialize {
    /// Writes the owned part of the body into `buf`.
    ///
    /// # Arguments
    /// * `buf` - The frame buffer, already holding the length prefix.
    ///
    /// # Returns
    /// An optional trailing slice that the sender writes straight from `self` without copying.
    fn serialize<'a>(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]>;
}

/// Types that can be rebuilt from the body of a frame.
pub trait Deserialize: Sized {
    /// Parses a frame body.
    ///
    /// # Arguments
    /// * `buf` - The frame body, without the length prefix.
    ///
    /// # Returns
    /// The parsed value or an `InvalidData` io error.
    fn deserialize(buf: &[u8]) -> io::Result<Self>;
}
