//! PE image access.
//!
//! [`File`] holds a private, owned copy of a PE image together with the header values the
//! export pipeline needs: machine type, characteristics, alignments, the section table and
//! the data directories for the CLI header, the debug directory and the certificate table.
//! Owning the bytes (instead of keeping the mapping alive) lets the pipeline rewrite the
//! file on disk while the parsed image is still in use.

pub mod io;
pub mod parser;

use std::{fs, path::Path};

use goblin::pe::PE;
use memmap2::Mmap;

use crate::{
    Error::{Empty, GoblinErr},
    Result,
};

/// `IMAGE_FILE_MACHINE_I386`
pub const MACHINE_I386: u16 = 0x014C;
/// `IMAGE_FILE_MACHINE_AMD64`
pub const MACHINE_AMD64: u16 = 0x8664;
/// `IMAGE_FILE_DLL`
pub const CHARACTERISTIC_DLL: u16 = 0x2000;

/// Index of the certificate (security) table in the data directory array
pub const DIRECTORY_SECURITY: usize = 4;
/// Index of the debug directory in the data directory array
pub const DIRECTORY_DEBUG: usize = 6;
/// Index of the CLI header in the data directory array
pub const DIRECTORY_CLR: usize = 14;

/// One entry of the PE section table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Section name, without trailing NUL padding
    pub name: String,
    /// `VirtualSize`
    pub virtual_size: u32,
    /// `VirtualAddress`
    pub virtual_address: u32,
    /// `SizeOfRawData`
    pub size_of_raw_data: u32,
    /// `PointerToRawData`
    pub pointer_to_raw_data: u32,
    /// `Characteristics`
    pub characteristics: u32,
}

impl Section {
    /// End of the raw data of this section in the file.
    #[must_use]
    pub fn raw_end(&self) -> u64 {
        u64::from(self.pointer_to_raw_data) + u64::from(self.size_of_raw_data)
    }

    /// End of this section in the loaded image.
    #[must_use]
    pub fn virtual_end(&self) -> u64 {
        u64::from(self.virtual_address)
            + u64::from(std::cmp::max(self.virtual_size, self.size_of_raw_data))
    }
}

/// An owned PE image with the header values relevant for rewriting it.
pub struct File {
    data: Vec<u8>,
    machine: u16,
    characteristics: u16,
    is_64: bool,
    pe_offset: usize,
    optional_header_offset: usize,
    section_table_offset: usize,
    file_alignment: u32,
    section_alignment: u32,
    size_of_headers: u32,
    sections: Vec<Section>,
    clr: (u32, u32),
    debug: Option<(u32, u32)>,
}

impl File {
    /// Load a PE image from disk.
    ///
    /// The file is memory-mapped for parsing and copied into an owned buffer, so the file
    /// itself is not held open afterwards.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be read, [`crate::Error::Empty`]
    /// for an empty file, and parsing errors as described in [`File::from_mem`].
    pub fn from_file(path: &Path) -> Result<File> {
        let file = fs::File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Err(Empty);
        }

        let mmap = unsafe { Mmap::map(&file)? };
        Self::from_mem(mmap.to_vec())
    }

    /// Load a PE image from memory.
    ///
    /// # Errors
    /// Returns [`crate::Error::GoblinErr`] if the PE structure is invalid and
    /// [`crate::Error::Malformed`] if the image has no optional header or no CLI header
    /// data directory.
    pub fn from_mem(data: Vec<u8>) -> Result<File> {
        if data.is_empty() {
            return Err(Empty);
        }

        let pe = PE::parse(&data).map_err(GoblinErr)?;
        let Some(optional_header) = pe.header.optional_header else {
            return Err(malformed_error!("File does not have an OptionalHeader"));
        };

        let clr = match optional_header.data_directories.get_clr_runtime_header() {
            Some(dir) if dir.virtual_address != 0 && dir.size != 0 => {
                (dir.virtual_address, dir.size)
            }
            _ => {
                return Err(malformed_error!(
                    "File does not have a CLR runtime header directory"
                ))
            }
        };

        let debug = match optional_header.data_directories.get_debug_table() {
            Some(dir) if dir.virtual_address != 0 && dir.size != 0 => {
                Some((dir.virtual_address, dir.size))
            }
            _ => None,
        };

        let sections = pe
            .sections
            .iter()
            .map(|section| Section {
                name: std::str::from_utf8(&section.name)
                    .unwrap_or("")
                    .trim_end_matches('\0')
                    .to_string(),
                virtual_size: section.virtual_size,
                virtual_address: section.virtual_address,
                size_of_raw_data: section.size_of_raw_data,
                pointer_to_raw_data: section.pointer_to_raw_data,
                characteristics: section.characteristics,
            })
            .collect();

        // PE signature (4) + COFF header (20)
        let pe_offset = pe.header.dos_header.pe_pointer as usize;
        let optional_header_offset = pe_offset + 24;
        let section_table_offset =
            optional_header_offset + usize::from(pe.header.coff_header.size_of_optional_header);

        Ok(File {
            machine: pe.header.coff_header.machine,
            characteristics: pe.header.coff_header.characteristics,
            is_64: pe.is_64,
            pe_offset,
            optional_header_offset,
            section_table_offset,
            file_alignment: optional_header.windows_fields.file_alignment,
            section_alignment: optional_header.windows_fields.section_alignment,
            size_of_headers: optional_header.windows_fields.size_of_headers,
            sections,
            clr,
            debug,
            data,
        })
    }

    /// The raw image.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The raw image, for in-place patching.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// COFF `Machine`.
    #[must_use]
    pub fn machine(&self) -> u16 {
        self.machine
    }

    /// COFF `Characteristics`.
    #[must_use]
    pub fn characteristics(&self) -> u16 {
        self.characteristics
    }

    /// `true` for PE32+ images.
    #[must_use]
    pub fn is_64(&self) -> bool {
        self.is_64
    }

    /// `true` if the image declares itself as a DLL.
    #[must_use]
    pub fn is_dll(&self) -> bool {
        self.characteristics & CHARACTERISTIC_DLL != 0
    }

    /// Offset of the `PE\0\0` signature.
    #[must_use]
    pub fn pe_offset(&self) -> usize {
        self.pe_offset
    }

    /// Offset of the optional header.
    #[must_use]
    pub fn optional_header_offset(&self) -> usize {
        self.optional_header_offset
    }

    /// Offset of the first section header.
    #[must_use]
    pub fn section_table_offset(&self) -> usize {
        self.section_table_offset
    }

    /// Offset of the data directory entry with the given index.
    #[must_use]
    pub fn data_directory_offset(&self, index: usize) -> usize {
        let base = if self.is_64 { 112 } else { 96 };
        self.optional_header_offset + base + index * 8
    }

    /// `FileAlignment`.
    #[must_use]
    pub fn file_alignment(&self) -> u32 {
        self.file_alignment
    }

    /// `SectionAlignment`.
    #[must_use]
    pub fn section_alignment(&self) -> u32 {
        self.section_alignment
    }

    /// `SizeOfHeaders`.
    #[must_use]
    pub fn size_of_headers(&self) -> u32 {
        self.size_of_headers
    }

    /// The section table.
    #[must_use]
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// RVA and size of the CLI header.
    #[must_use]
    pub fn clr(&self) -> (u32, u32) {
        self.clr
    }

    /// RVA and size of the debug directory, if present.
    #[must_use]
    pub fn debug_directory(&self) -> Option<(u32, u32)> {
        self.debug
    }

    /// Translate a relative virtual address into a file offset.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if no section maps `rva`.
    pub fn rva_to_offset(&self, rva: u32) -> Result<usize> {
        if rva < self.size_of_headers {
            return Ok(rva as usize);
        }

        for section in &self.sections {
            if u64::from(rva) >= u64::from(section.virtual_address)
                && u64::from(rva) < section.virtual_end()
            {
                let delta = rva - section.virtual_address;
                if delta >= section.size_of_raw_data {
                    return Err(malformed_error!(
                        "RVA 0x{:X} maps to uninitialized data of section {}",
                        rva,
                        section.name
                    ));
                }
                return Ok(section.pointer_to_raw_data as usize + delta as usize);
            }
        }

        Err(malformed_error!(
            "RVA could not be converted to offset - 0x{:X}",
            rva
        ))
    }

    /// Borrow `len` bytes at an RVA.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range exceeds the image.
    pub fn slice_at_rva(&self, rva: u32, len: usize) -> Result<&[u8]> {
        let offset = self.rva_to_offset(rva)?;
        match offset.checked_add(len) {
            Some(end) if end <= self.data.len() => Ok(&self.data[offset..end]),
            _ => Err(crate::Error::OutOfBounds),
        }
    }
}
