//! Little-endian primitive access for PE and metadata structures.
//!
//! Every on-disk structure this crate touches (PE headers, the CLI header, metadata streams,
//! method bodies) is little-endian. The helpers here read and write fixed-size integers at a
//! moving offset with bounds checking, and handle the 2-or-4 byte indices that metadata
//! tables use for heap and row references.

use crate::{Error::OutOfBounds, Result};

/// Fixed-size integers that can be read from and written to little-endian byte slices.
pub trait CilIO: Sized {
    /// Byte representation of the type
    type Bytes: Sized + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Build the value from its little-endian representation
    fn from_le_bytes(bytes: Self::Bytes) -> Self;

    /// Produce the little-endian representation of the value
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_cil_io {
    ($($ty:ty),*) => {
        $(
            impl CilIO for $ty {
                type Bytes = [u8; std::mem::size_of::<$ty>()];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }

                fn to_le_bytes(self) -> Self::Bytes {
                    <$ty>::to_le_bytes(self)
                }
            }
        )*
    };
}

impl_cil_io!(u8, i8, u16, i16, u32, i32, u64, i64);

/// Read a value from the start of `data`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if `data` is too short.
pub fn read_le<T: CilIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Read a value at `offset` and advance the offset past it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the read would exceed `data`.
pub fn read_le_at<T: CilIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(OutOfBounds);
    };
    if end > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(OutOfBounds);
    };

    *offset = end;
    Ok(T::from_le_bytes(read))
}

/// Read a 2 or 4 byte index, depending on `is_large`, widened to `u32`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the read would exceed `data`.
pub fn read_le_at_dyn(data: &[u8], offset: &mut usize, is_large: bool) -> Result<u32> {
    let res = if is_large {
        read_le_at::<u32>(data, offset)?
    } else {
        u32::from(read_le_at::<u16>(data, offset)?)
    };

    Ok(res)
}

/// Write `value` at `offset` and advance the offset past it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the write would exceed `data`.
pub fn write_le_at<T: CilIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    let bytes = value.to_le_bytes();
    let bytes = bytes.as_ref();

    let Some(end) = offset.checked_add(bytes.len()) else {
        return Err(OutOfBounds);
    };
    if end > data.len() {
        return Err(OutOfBounds);
    }

    data[*offset..end].copy_from_slice(bytes);
    *offset = end;

    Ok(())
}

/// Append a 2 or 4 byte index, depending on `is_large`, to a growing buffer.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if a small index cannot hold `value`.
pub fn push_le_dyn(buffer: &mut Vec<u8>, value: u32, is_large: bool) -> Result<()> {
    if is_large {
        buffer.extend_from_slice(&value.to_le_bytes());
    } else {
        let Ok(small) = u16::try_from(value) else {
            return Err(malformed_error!(
                "Index 0x{:X} does not fit into a 2 byte column",
                value
            ));
        };
        buffer.extend_from_slice(&small.to_le_bytes());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_sequence() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07];
        let mut offset = 0;

        assert_eq!(read_le_at::<u8>(&data, &mut offset).unwrap(), 0x01);
        assert_eq!(read_le_at::<u16>(&data, &mut offset).unwrap(), 0x0302);
        assert_eq!(read_le_at::<u32>(&data, &mut offset).unwrap(), 0x0706_0504);
        assert_eq!(offset, 7);
        assert!(matches!(
            read_le_at::<u8>(&data, &mut offset),
            Err(crate::Error::OutOfBounds)
        ));
    }

    #[test]
    fn read_dyn() {
        let data = [0xAA, 0xBB, 0xCC, 0xDD];

        let mut offset = 0;
        assert_eq!(read_le_at_dyn(&data, &mut offset, false).unwrap(), 0xBBAA);
        assert_eq!(offset, 2);

        let mut offset = 0;
        assert_eq!(read_le_at_dyn(&data, &mut offset, true).unwrap(), 0xDDCC_BBAA);
        assert_eq!(offset, 4);
    }

    #[test]
    fn write_and_push() {
        let mut data = [0u8; 6];
        let mut offset = 0;
        write_le_at(&mut data, &mut offset, 0x1234_u16).unwrap();
        write_le_at(&mut data, &mut offset, 0xDEAD_BEEF_u32).unwrap();
        assert_eq!(data, [0x34, 0x12, 0xEF, 0xBE, 0xAD, 0xDE]);
        assert!(write_le_at(&mut data, &mut offset, 1_u8).is_err());

        let mut buffer = Vec::new();
        push_le_dyn(&mut buffer, 0x0102, false).unwrap();
        push_le_dyn(&mut buffer, 0x0102, true).unwrap();
        assert_eq!(buffer, [0x02, 0x01, 0x02, 0x01, 0x00, 0x00]);
        assert!(push_le_dyn(&mut buffer, 0x1_0000, false).is_err());
    }
}
