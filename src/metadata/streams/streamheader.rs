use crate::{file::io::read_le, Error::OutOfBounds, Result};

/// A stream header of the metadata root (ECMA-335 II.24.2.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHeader {
    /// Offset of the stream, relative to the metadata root
    pub offset: u32,
    /// Size of the stream in bytes
    pub size: u32,
    /// Name of the stream, e.g. `#~` or `#Strings`
    pub name: String,
}

impl StreamHeader {
    /// Parse a stream header.
    ///
    /// Any name is accepted here, deciding what to do with unknown streams is up to the
    /// caller.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for truncated data and
    /// [`crate::Error::Malformed`] for an unterminated name.
    pub fn from(data: &[u8]) -> Result<StreamHeader> {
        if data.len() < 9 {
            return Err(OutOfBounds);
        }

        let name_bytes = &data[8..std::cmp::min(data.len(), 8 + 32)];
        let Some(name_end) = name_bytes.iter().position(|byte| *byte == 0) else {
            return Err(malformed_error!("Stream header name is not terminated"));
        };
        let name = String::from_utf8_lossy(&name_bytes[..name_end]).into_owned();

        Ok(StreamHeader {
            offset: read_le::<u32>(data)?,
            size: read_le::<u32>(&data[4..])?,
            name,
        })
    }

    /// Size of this header on disk, with the name padded to a 4 byte boundary.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        8 + ((self.name.len() + 1 + 3) & !3)
    }

    /// Append the on-disk form of this header.
    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.offset.to_le_bytes());
        out.extend_from_slice(&self.size.to_le_bytes());
        let start = out.len();
        out.extend_from_slice(self.name.as_bytes());
        out.push(0);
        while (out.len() - start) % 4 != 0 {
            out.push(0);
        }
    }
}
