//! The CLI header (ECMA-335 II.25.3.3).
//!
//! Located through the CLR runtime header data directory, it points at the metadata root
//! and carries the runtime flags that pin a module to a processor architecture.

use bitflags::bitflags;

use crate::{file::parser::Parser, Error::OutOfBounds, Result};

/// Size of the CLI header in bytes
pub const COR20_HEADER_SIZE: usize = 72;
/// Offset of `MetaData.VirtualAddress` within the CLI header
pub const COR20_METADATA_RVA_OFFSET: usize = 8;
/// Offset of `MetaData.Size` within the CLI header
pub const COR20_METADATA_SIZE_OFFSET: usize = 12;
/// Offset of `EntryPointToken` within the CLI header
pub const COR20_ENTRY_POINT_OFFSET: usize = 20;

bitflags! {
    /// Runtime flags of the CLI header
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CorFlags: u32 {
        /// The image contains IL code only
        const ILONLY = 0x0000_0001;
        /// The image may only be loaded into a 32-bit process
        const REQUIRED_32BIT = 0x0000_0002;
        /// The image is strong-name signed
        const STRONGNAMESIGNED = 0x0000_0008;
        /// The entry point is a native function
        const NATIVE_ENTRYPOINT = 0x0000_0010;
        /// The image prefers to be loaded into a 32-bit process
        const PREFERRED_32BIT = 0x0002_0000;
    }
}

/// The parsed CLI header.
#[derive(Debug, Clone)]
pub struct Cor20Header {
    /// Size of the header in bytes, always 72
    pub cb: u32,
    /// Minimum major runtime version
    pub major_runtime_version: u16,
    /// Minimum minor runtime version
    pub minor_runtime_version: u16,
    /// RVA of the metadata root
    pub meta_data_rva: u32,
    /// Size of the metadata
    pub meta_data_size: u32,
    /// Runtime flags, see [`CorFlags`]
    pub flags: u32,
    /// Entry point `MethodDef` or `File` token, 0 for libraries without one
    pub entry_point_token: u32,
    /// RVA of managed resources
    pub resource_rva: u32,
    /// Size of managed resources
    pub resource_size: u32,
    /// RVA of the strong name signature
    pub strong_name_signature_rva: u32,
    /// Size of the strong name signature
    pub strong_name_signature_size: u32,
    /// RVA of the vtable fixup array
    pub vtable_fixups_rva: u32,
    /// Size of the vtable fixup array
    pub vtable_fixups_size: u32,
}

impl Cor20Header {
    /// Parse the CLI header.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for truncated data and
    /// [`crate::Error::Malformed`] for an invalid size or metadata location.
    pub fn read(data: &[u8]) -> Result<Cor20Header> {
        if data.len() < COR20_HEADER_SIZE {
            return Err(OutOfBounds);
        }

        let mut parser = Parser::new(data);

        let cb = parser.read_le::<u32>()?;
        if cb as usize != COR20_HEADER_SIZE {
            return Err(malformed_error!(
                "Invalid CLR header size: expected 72, got {}",
                cb
            ));
        }

        let major_runtime_version = parser.read_le::<u16>()?;
        let minor_runtime_version = parser.read_le::<u16>()?;

        let meta_data_rva = parser.read_le::<u32>()?;
        let meta_data_size = parser.read_le::<u32>()?;
        if meta_data_rva == 0 || meta_data_size == 0 {
            return Err(malformed_error!("Metadata location cannot be zero"));
        }

        let flags = parser.read_le::<u32>()?;
        let entry_point_token = parser.read_le::<u32>()?;
        let resource_rva = parser.read_le::<u32>()?;
        let resource_size = parser.read_le::<u32>()?;
        let strong_name_signature_rva = parser.read_le::<u32>()?;
        let strong_name_signature_size = parser.read_le::<u32>()?;
        // CodeManagerTable, reserved
        parser.advance_by(8)?;
        let vtable_fixups_rva = parser.read_le::<u32>()?;
        let vtable_fixups_size = parser.read_le::<u32>()?;

        Ok(Cor20Header {
            cb,
            major_runtime_version,
            minor_runtime_version,
            meta_data_rva,
            meta_data_size,
            flags,
            entry_point_token,
            resource_rva,
            resource_size,
            strong_name_signature_rva,
            strong_name_signature_size,
            vtable_fixups_rva,
            vtable_fixups_size,
        })
    }

    /// The runtime flags.
    #[must_use]
    pub fn cor_flags(&self) -> CorFlags {
        CorFlags::from_bits_truncate(self.flags)
    }
}
