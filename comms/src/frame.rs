//! Frames are a big endian `u64` body length followed by the body.

use std::io;

/// Size of the length prefix.
pub(crate) const PREFIX_LEN: usize = size_of::<u64>();

/// Upper bound for a single frame body, anything larger is treated as a corrupted stream.
pub const MAX_FRAME_LEN: usize = 1 << 30;

fn too_long(len: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("frame of {len} bytes exceeds the {MAX_FRAME_LEN} bytes limit"),
    )
}

pub(crate) fn encode_len(len: usize) -> io::Result<[u8; PREFIX_LEN]> {
    if len > MAX_FRAME_LEN {
        return Err(too_long(len));
    }

    Ok((len as u64).to_be_bytes())
}

pub(crate) fn decode_len(prefix: [u8; PREFIX_LEN]) -> io::Result<usize> {
    let len = u64::from_be_bytes(prefix);
    match usize::try_from(len) {
        Ok(len) if len <= MAX_FRAME_LEN => Ok(len),
        _ => Err(too_long(len as usize)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_is_big_endian() {
        assert_eq!(encode_len(258).unwrap(), [0, 0, 0, 0, 0, 0, 1, 2]);
        assert_eq!(decode_len([0, 0, 0, 0, 0, 0, 1, 2]).unwrap(), 258);
    }

    #[test]
    fn test_limit_applies_both_ways() {
        assert!(encode_len(MAX_FRAME_LEN + 1).is_err());
        assert!(decode_len(u64::MAX.to_be_bytes()).is_err());
    }
}
