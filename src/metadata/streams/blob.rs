//! The `#Blob` heap (ECMA-335 II.24.2.4).
//!
//! Each entry is prefixed with its compressed length. Signatures, marshalling descriptors and
//! custom attribute values live here.

use crate::{
    file::parser::{encode_compressed_uint, Parser},
    Result,
};

/// An owned, growable `#Blob` heap.
#[derive(Debug, Clone)]
pub struct Blob {
    data: Vec<u8>,
}

impl Blob {
    /// Create a heap from its on-disk bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the first entry is not the empty blob.
    pub fn from(data: &[u8]) -> Result<Blob> {
        if data.is_empty() {
            return Ok(Blob { data: vec![0] });
        }

        if data[0] != 0 {
            return Err(malformed_error!("Provided #Blob heap does not start with an empty blob"));
        }

        Ok(Blob {
            data: data.to_vec(),
        })
    }

    /// Get the blob at `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the blob exceeds the heap.
    pub fn get(&self, index: u32) -> Result<&[u8]> {
        let mut parser = Parser::new(&self.data);
        parser.seek(index as usize)?;
        let len = parser.read_compressed_uint()? as usize;
        parser.read_bytes(len)
    }

    /// Append `value` and return its index.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the blob is too large to be encoded.
    pub fn append(&mut self, value: &[u8]) -> Result<u32> {
        if value.is_empty() {
            return Ok(0);
        }

        let index = self.data.len() as u32;
        encode_compressed_uint(value.len() as u32, &mut self.data)?;
        self.data.extend_from_slice(value);
        Ok(index)
    }

    /// The raw heap.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Size of the heap in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the heap holds nothing but the empty blob.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.len() <= 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crafted() {
        #[rustfmt::skip]
        let data = [
            0x00,
            0x03, 0x20, 0x00, 0x01,
            0x01, 0x14,
        ];

        let blob = Blob::from(&data).unwrap();
        assert_eq!(blob.get(0).unwrap(), &[] as &[u8]);
        assert_eq!(blob.get(1).unwrap(), &[0x20, 0x00, 0x01]);
        assert_eq!(blob.get(5).unwrap(), &[0x14]);
        assert!(blob.get(7).is_err());
    }

    #[test]
    fn append() {
        let mut blob = Blob::from(&[0x00]).unwrap();
        let index = blob.append(&[0x06, 0x08]).unwrap();
        assert_eq!(index, 1);
        assert_eq!(blob.get(index).unwrap(), &[0x06, 0x08]);
        assert_eq!(blob.append(&[]).unwrap(), 0);

        let large = vec![0xAB; 200];
        let index = blob.append(&large).unwrap();
        assert_eq!(index, 4);
        assert_eq!(blob.get(index).unwrap(), large.as_slice());
        assert_eq!(blob.len(), 4 + 2 + 200);
    }
}
