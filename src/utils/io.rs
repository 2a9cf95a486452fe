//! Length-prefixed and level encodings shared by the manifest and table formats.

use std::io::{self, Read, Write};

use integer_encoding::VarIntReader;
use integer_encoding::VarIntWriter;

use crate::config::MAX_NUM_LEVELS;

/// Extra encoders for every [`std::io::Write`] implementor.
pub(crate) trait WriteHelpers {
    /// Write `slice` preceded by its length as a varint32. Returns the total bytes written.
    fn write_length_prefixed_slice(&mut self, slice: &[u8]) -> io::Result<usize>;
}

impl<W: Write> WriteHelpers for W {
    fn write_length_prefixed_slice(&mut self, slice: &[u8]) -> io::Result<usize> {
        let prefix_length = self.write_varint(slice.len() as u32)?;
        self.write_all(slice)?;

        Ok(prefix_length + slice.len())
    }
}

/// Extra decoders for every [`std::io::Read`] implementor.
pub(crate) trait ReadHelpers {
    /// Read and decode a stored varint32-encoded level, rejecting levels that do not exist.
    fn read_level(&mut self) -> io::Result<usize>;

    /// Read a slice written by [`WriteHelpers::write_length_prefixed_slice`].
    fn read_length_prefixed_slice(&mut self) -> io::Result<Vec<u8>>;
}

impl<R: Read> ReadHelpers for R {
    fn read_level(&mut self) -> io::Result<usize> {
        let level = self.read_varint::<u32>()? as usize;
        if level >= MAX_NUM_LEVELS {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Level {} is past the deepest level.", level),
            ));
        }

        Ok(level)
    }

    fn read_length_prefixed_slice(&mut self) -> io::Result<Vec<u8>> {
        let length = self.read_varint::<u32>()? as usize;
        let mut buf = vec![0_u8; length];
        self.read_exact(&mut buf)?;

        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    use super::*;

    #[test]
    fn length_prefixed_slices_can_be_read_back() {
        let mut buf: Vec<u8> = vec![];
        buf.write_length_prefixed_slice(b"hello").unwrap();
        buf.write_length_prefixed_slice(b"").unwrap();

        let mut reader = Cursor::new(buf);
        assert_eq!(reader.read_length_prefixed_slice().unwrap(), b"hello".to_vec());
        assert_eq!(reader.read_length_prefixed_slice().unwrap(), Vec::<u8>::new());
        assert!(reader.read_length_prefixed_slice().is_err());
    }

    #[test]
    fn reading_a_level_past_the_maximum_fails() {
        let mut buf: Vec<u8> = vec![];
        buf.write_varint(3_u32).unwrap();
        buf.write_varint(MAX_NUM_LEVELS as u32).unwrap();

        let mut reader = Cursor::new(buf);
        assert_eq!(reader.read_level().unwrap(), 3);
        assert!(reader.read_level().is_err());
    }
}
