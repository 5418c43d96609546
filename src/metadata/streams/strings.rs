//! The `#Strings` heap (ECMA-335 II.24.2.3).
//!
//! Identifier strings are stored NUL-terminated and referenced by byte offset. The heap is
//! owned so that new identifiers (wrapper names, referenced types) can be appended; existing
//! entries are reused whenever an identical string is already present.

use std::{ffi::CStr, str};

use crate::{Error::OutOfBounds, Result};

/// An owned, growable `#Strings` heap.
#[derive(Debug, Clone)]
pub struct Strings {
    data: Vec<u8>,
}

impl Strings {
    /// Create a heap from its on-disk bytes.
    ///
    /// An absent heap is represented by an empty slice and starts out holding only the
    /// mandatory empty string at index 0.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the first byte is not the empty string.
    pub fn from(data: &[u8]) -> Result<Strings> {
        if data.is_empty() {
            return Ok(Strings { data: vec![0] });
        }

        if data[0] != 0 {
            return Err(malformed_error!("Provided #String heap does not start with NUL"));
        }

        Ok(Strings {
            data: data.to_vec(),
        })
    }

    /// Get the string at `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for an index past the heap and
    /// [`crate::Error::Malformed`] for unterminated or non UTF-8 data.
    pub fn get(&self, index: u32) -> Result<&str> {
        let index = index as usize;
        if index >= self.data.len() {
            return Err(OutOfBounds);
        }

        match CStr::from_bytes_until_nul(&self.data[index..]) {
            Ok(result) => match result.to_str() {
                Ok(result) => Ok(result),
                Err(_) => Err(malformed_error!("Invalid string at index - {}", index)),
            },
            Err(_) => Err(malformed_error!("Invalid string at index - {}", index)),
        }
    }

    /// Find `value` in the heap, or append it, and return its index.
    ///
    /// Any NUL-terminated occurrence is reused, including the tail of a longer entry.
    pub fn intern(&mut self, value: &str) -> u32 {
        if value.is_empty() {
            return 0;
        }

        let needle = value.as_bytes();
        if let Some(index) = self
            .data
            .windows(needle.len() + 1)
            .position(|window| &window[..needle.len()] == needle && window[needle.len()] == 0)
        {
            return index as u32;
        }

        let index = self.data.len() as u32;
        self.data.extend_from_slice(needle);
        self.data.push(0);
        index
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

    /// Returns `true` if the heap holds nothing but the empty string.
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
            0x3c, 0x4d, 0x6f, 0x64, 0x75, 0x6c, 0x65, 0x3e, 0x00,
            0x53, 0x79, 0x73, 0x74, 0x65, 0x6d, 0x2e, 0x54, 0x65, 0x78, 0x74, 0x00,
            0x4f, 0x62, 0x6a, 0x65, 0x63, 0x74, 0x00,
        ];

        let strings = Strings::from(&data).unwrap();
        assert_eq!(strings.get(0).unwrap(), "");
        assert_eq!(strings.get(1).unwrap(), "<Module>");
        assert_eq!(strings.get(10).unwrap(), "System.Text");
        assert_eq!(strings.get(17).unwrap(), "Text");
        assert_eq!(strings.get(22).unwrap(), "Object");
        assert!(strings.get(29).is_err());
    }

    #[test]
    fn intern_reuses() {
        let mut strings = Strings::from(b"\0System.Text\0").unwrap();
        assert_eq!(strings.intern("System.Text"), 1);
        assert_eq!(strings.intern("Text"), 8);
        assert_eq!(strings.intern(""), 0);

        let index = strings.intern("StringBuilder");
        assert_eq!(index, 13);
        assert_eq!(strings.get(index).unwrap(), "StringBuilder");
        assert_eq!(strings.len(), 27);
    }

    #[test]
    fn absent_and_invalid() {
        let strings = Strings::from(&[]).unwrap();
        assert!(strings.is_empty());
        assert!(Strings::from(b"A\0").is_err());
    }
}
