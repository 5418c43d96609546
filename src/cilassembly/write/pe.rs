//! PE structure updates for the appended metadata section.
//!
//! Offsets are relative to the start of the optional header unless noted otherwise; they
//! are identical for PE32 and PE32+ up to the checksum field.

use crate::{cilassembly::write::output::Output, file::File, Error, Result};

/// Size of one section header
pub const SECTION_HEADER_SIZE: usize = 40;
/// Offset of `NumberOfSections`, relative to the PE signature
pub const NUMBER_OF_SECTIONS_OFFSET: usize = 6;
/// Offset of `SizeOfInitializedData` in the optional header
pub const SIZE_OF_INITIALIZED_DATA_OFFSET: usize = 8;
/// Offset of `SizeOfImage` in the optional header
pub const SIZE_OF_IMAGE_OFFSET: usize = 56;
/// Offset of `SizeOfHeaders` in the optional header
pub const SIZE_OF_HEADERS_OFFSET: usize = 60;
/// Offset of `CheckSum` in the optional header
pub const CHECKSUM_OFFSET: usize = 64;
/// Size of one `IMAGE_DEBUG_DIRECTORY` entry
pub const DEBUG_ENTRY_SIZE: usize = 28;
/// Offset of `PointerToRawData` in a section header
const SECTION_POINTER_TO_RAW_DATA: usize = 20;
/// Offset of `PointerToRawData` in a debug directory entry
const DEBUG_POINTER_TO_RAW_DATA: usize = 24;
/// `IMAGE_SCN_CNT_INITIALIZED_DATA | IMAGE_SCN_MEM_READ`
pub const META_SECTION_CHARACTERISTICS: u32 = 0x4000_0040;

/// Placement of the appended section.
///
/// If the header area has no room for another section header, it grows by whole file
/// alignment units and the raw data of every original section moves down by
/// [`SectionPlacement::raw_shift`]. Virtual addresses never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionPlacement {
    /// `VirtualAddress`
    pub virtual_address: u32,
    /// `VirtualSize`, the unpadded content length
    pub virtual_size: u32,
    /// `PointerToRawData`
    pub pointer_to_raw_data: u32,
    /// `SizeOfRawData`, the content length padded to the file alignment
    pub size_of_raw_data: u32,
    /// `SizeOfHeaders` of the output
    pub size_of_headers: u32,
    /// File offset where the raw data of the original sections starts
    pub raw_start: u32,
    /// Distance the original raw data moves in the output
    pub raw_shift: u32,
}

impl SectionPlacement {
    /// Place `content_len` bytes behind the last section of `file`, both in the file and
    /// in the loaded image.
    ///
    /// # Errors
    /// Returns [`crate::Error::WriteLayout`] if the grown header area would overlap the
    /// first section in memory, or if the placement overflows 32 bits.
    pub fn after_last_section(file: &File, content_len: usize) -> Result<SectionPlacement> {
        let section_alignment = u64::from(file.section_alignment().max(1));
        let file_alignment = u64::from(file.file_alignment().max(1));
        let size_of_headers = u64::from(file.size_of_headers());

        let raw_start = file
            .sections()
            .iter()
            .filter(|section| section.size_of_raw_data != 0)
            .map(|section| u64::from(section.pointer_to_raw_data))
            .min()
            .unwrap_or(size_of_headers);
        let table_end =
            (file.section_table_offset() + (file.sections().len() + 1) * SECTION_HEADER_SIZE) as u64;

        let (headers, raw_shift) = if table_end <= size_of_headers.min(raw_start) {
            (size_of_headers, 0)
        } else {
            let headers = align_to(table_end, file_alignment);
            let first_rva = file
                .sections()
                .iter()
                .map(|section| u64::from(section.virtual_address))
                .min()
                .unwrap_or(u64::MAX);
            if headers > first_rva {
                return Err(Error::WriteLayout(format!(
                    "no room for another section header (headers would end at 0x{headers:X}, first section at RVA 0x{first_rva:X})"
                )));
            }
            (headers, align_to(headers.saturating_sub(raw_start), file_alignment))
        };

        let virtual_end = file.sections().iter().map(|s| s.virtual_end()).max().unwrap_or(0);
        let raw_end = file.sections().iter().map(|s| s.raw_end()).max().unwrap_or(0);

        let virtual_address = align_to(virtual_end, section_alignment);
        let pointer_to_raw_data = align_to((raw_end + raw_shift).max(headers), file_alignment);
        let size_of_raw_data = align_to(content_len as u64, file_alignment);

        let fits = |value: u64| u32::try_from(value).map_err(|_| {
            Error::WriteLayout(format!("section placement 0x{value:X} exceeds 32 bits"))
        });

        Ok(SectionPlacement {
            virtual_address: fits(virtual_address)?,
            virtual_size: fits(content_len as u64)?,
            pointer_to_raw_data: fits(pointer_to_raw_data)?,
            size_of_raw_data: fits(size_of_raw_data)?,
            size_of_headers: fits(headers)?,
            raw_start: fits(raw_start)?,
            raw_shift: fits(raw_shift)?,
        })
    }

    /// Where a file offset of the original image lands in the output.
    #[must_use]
    pub fn relocate(&self, offset: u64) -> u64 {
        if offset >= u64::from(self.raw_start) {
            offset + u64::from(self.raw_shift)
        } else {
            offset
        }
    }

    /// Size of the output file: everything up to and including this section.
    #[must_use]
    pub fn file_end(&self) -> u64 {
        u64::from(self.pointer_to_raw_data) + u64::from(self.size_of_raw_data)
    }

    /// Encoded section header named `name`.
    #[must_use]
    pub fn header(&self, name: &str) -> [u8; SECTION_HEADER_SIZE] {
        let mut header = [0u8; SECTION_HEADER_SIZE];
        let name = name.as_bytes();
        let len = name.len().min(8);
        header[..len].copy_from_slice(&name[..len]);
        header[8..12].copy_from_slice(&self.virtual_size.to_le_bytes());
        header[12..16].copy_from_slice(&self.virtual_address.to_le_bytes());
        header[16..20].copy_from_slice(&self.size_of_raw_data.to_le_bytes());
        header[20..24].copy_from_slice(&self.pointer_to_raw_data.to_le_bytes());
        // relocations, line numbers and their counts stay zero
        header[36..40].copy_from_slice(&META_SECTION_CHARACTERISTICS.to_le_bytes());
        header
    }
}

/// Register the appended section in the COFF and optional headers.
///
/// Updates `NumberOfSections`, `SizeOfInitializedData` and `SizeOfImage` and writes the
/// section header. The checksum is left to [`update_checksum`].
///
/// # Errors
/// Returns [`crate::Error::WriteLayout`] if a header field lies outside the output.
pub fn register_section(
    file: &File,
    output: &mut Output,
    placement: &SectionPlacement,
    name: &str,
) -> Result<()> {
    let data = file.data();
    let header_offset = file.section_table_offset() + file.sections().len() * SECTION_HEADER_SIZE;
    output.write_at(header_offset as u64, &placement.header(name))?;

    let sections_offset = file.pe_offset() + NUMBER_OF_SECTIONS_OFFSET;
    let count = u16::from_le_bytes([data[sections_offset], data[sections_offset + 1]]);
    output.write_u16_le_at(sections_offset as u64, count + 1)?;

    let optional = file.optional_header_offset();
    let initialized_offset = optional + SIZE_OF_INITIALIZED_DATA_OFFSET;
    let initialized = read_u32(data, initialized_offset)?;
    output.write_u32_le_at(
        initialized_offset as u64,
        initialized.wrapping_add(placement.size_of_raw_data),
    )?;

    let image_size = align_to(
        u64::from(placement.virtual_address) + u64::from(placement.virtual_size),
        u64::from(file.section_alignment().max(1)),
    );
    output.write_u32_le_at(
        (optional + SIZE_OF_IMAGE_OFFSET) as u64,
        u32::try_from(image_size)
            .map_err(|_| Error::WriteLayout("SizeOfImage exceeds 32 bits".to_string()))?,
    )?;

    Ok(())
}

/// Apply a grown header area: store `SizeOfHeaders` and move the raw data pointers of
/// the original sections and of the debug directory entries.
///
/// The section data itself must already be copied to its relocated offsets.
///
/// # Errors
/// Returns [`crate::Error::WriteLayout`] if a field lies outside the output and
/// [`crate::Error::Malformed`] if the debug directory cannot be located.
pub fn apply_header_growth(file: &File, output: &mut Output, placement: &SectionPlacement) -> Result<()> {
    output.write_u32_le_at(
        (file.optional_header_offset() + SIZE_OF_HEADERS_OFFSET) as u64,
        placement.size_of_headers,
    )?;
    if placement.raw_shift == 0 {
        return Ok(());
    }

    for (index, section) in file.sections().iter().enumerate() {
        if section.size_of_raw_data == 0 || section.pointer_to_raw_data == 0 {
            continue;
        }
        let field = file.section_table_offset() + index * SECTION_HEADER_SIZE + SECTION_POINTER_TO_RAW_DATA;
        output.write_u32_le_at(field as u64, relocated_u32(placement, section.pointer_to_raw_data)?)?;
    }

    if let Some((rva, size)) = file.debug_directory() {
        let entries = file.rva_to_offset(rva)?;
        for entry in 0..size as usize / DEBUG_ENTRY_SIZE {
            let field = entries + entry * DEBUG_ENTRY_SIZE + DEBUG_POINTER_TO_RAW_DATA;
            let pointer = read_u32(file.data(), field)?;
            if pointer == 0 {
                continue;
            }
            output.write_u32_le_at(placement.relocate(field as u64), relocated_u32(placement, pointer)?)?;
        }
    }

    Ok(())
}

/// Recompute the PE checksum over the whole output and store it.
///
/// # Errors
/// Returns [`crate::Error::WriteLayout`] if the checksum field lies outside the output.
pub fn update_checksum(file: &File, output: &mut Output) -> Result<()> {
    let checksum_offset = file.optional_header_offset() + CHECKSUM_OFFSET;
    let checksum = pe_checksum(output.as_slice(), checksum_offset);
    output.write_u32_le_at(checksum_offset as u64, checksum)
}

/// The PE image checksum.
///
/// The file is summed as little-endian 16-bit words with end-around carry, skipping the
/// 4-byte checksum field; an odd trailing byte counts as a word of its own. The file size
/// is added to the folded 16-bit sum, the result is not folded again.
#[must_use]
pub fn pe_checksum(data: &[u8], checksum_offset: usize) -> u32 {
    let mut checksum: u64 = 0;
    let mut offset = 0;
    while offset < data.len() {
        if offset >= checksum_offset && offset < checksum_offset + 4 {
            offset += 2;
            continue;
        }

        let word = if offset + 1 < data.len() {
            u64::from(u16::from_le_bytes([data[offset], data[offset + 1]]))
        } else {
            u64::from(data[offset])
        };

        checksum += word;
        if checksum > 0xFFFF {
            checksum = (checksum & 0xFFFF) + (checksum >> 16);
        }

        offset += 2;
    }

    (checksum + data.len() as u64) as u32
}

/// Round `value` up to a multiple of `alignment` (a power of two).
#[must_use]
pub fn align_to(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

fn relocated_u32(placement: &SectionPlacement, offset: u32) -> Result<u32> {
    u32::try_from(placement.relocate(u64::from(offset)))
        .map_err(|_| Error::WriteLayout(format!("relocated offset of 0x{offset:X} exceeds 32 bits")))
}

fn read_u32(data: &[u8], offset: usize) -> Result<u32> {
    crate::file::io::read_le::<u32>(data.get(offset..).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::FixtureBuilder;

    #[test]
    fn alignment() {
        assert_eq!(align_to(5, 4), 8);
        assert_eq!(align_to(8, 4), 8);
        assert_eq!(align_to(0, 0x200), 0);
        assert_eq!(align_to(0x201, 0x200), 0x400);
    }

    #[test]
    fn checksum_skips_its_own_field() {
        let mut data = vec![0u8; 16];
        data[0] = 0x01;
        data[2] = 0x02;
        let clean = pe_checksum(&data, 8);

        data[8..12].copy_from_slice(&[0xFF; 4]);
        assert_eq!(pe_checksum(&data, 8), clean);
        // 1 + 2 + file size
        assert_eq!(clean, 1 + 2 + 16);
    }

    #[test]
    fn checksum_folds_carries() {
        let data = [0xFF, 0xFF, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00];
        // 0xFFFF + 2 = 0x10001 -> 0x0002, + 8
        assert_eq!(pe_checksum(&data, 4), 0x0A);
    }

    #[test]
    fn checksum_odd_length() {
        let data = [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x05];
        assert_eq!(pe_checksum(&data, 0), 5 + 7);
    }

    #[test]
    fn placement_after_text() {
        let file = File::from_mem(FixtureBuilder::x64().build()).unwrap();
        let text = file.sections()[0].clone();
        let placement = SectionPlacement::after_last_section(&file, 0x123).unwrap();

        assert_eq!(u64::from(placement.virtual_address) % 0x2000, 0);
        assert!(u64::from(placement.virtual_address) >= text.virtual_end());
        assert_eq!(u64::from(placement.pointer_to_raw_data), text.raw_end());
        assert_eq!(placement.size_of_raw_data, 0x200);
        assert_eq!(placement.virtual_size, 0x123);

        let header = placement.header(".meta");
        assert_eq!(&header[..8], b".meta\0\0\0");
        assert_eq!(&header[36..], &[0x40, 0x00, 0x00, 0x40]);
    }

    #[test]
    fn checksum_length_not_folded() {
        let mut data = vec![0u8; 0x20];
        data[0..2].copy_from_slice(&0xFFF0u16.to_le_bytes());
        assert_eq!(pe_checksum(&data, 8), 0xFFF0 + 0x20);
    }

    #[test]
    fn placement_keeps_raw_data_with_room() {
        let file = File::from_mem(FixtureBuilder::x64().build()).unwrap();
        let placement = SectionPlacement::after_last_section(&file, 0x10).unwrap();
        assert_eq!(placement.raw_shift, 0);
        assert_eq!(placement.size_of_headers, file.size_of_headers());
        assert_eq!(placement.relocate(0x400), 0x400);
    }

    #[test]
    fn placement_grows_full_headers() {
        for fixture in [FixtureBuilder::x86(), FixtureBuilder::x64()] {
            let file = File::from_mem(fixture.sections_to_fill_headers().build()).unwrap();
            assert_eq!(file.sections().len(), 3);
            let text = file.sections()[0].clone();

            let placement = SectionPlacement::after_last_section(&file, 0x10).unwrap();
            assert_eq!(placement.size_of_headers, 0x400);
            assert_eq!(placement.raw_start, 0x200);
            assert_eq!(placement.raw_shift, 0x200);
            assert_eq!(placement.relocate(0x1F0), 0x1F0);
            assert_eq!(placement.relocate(0x200), 0x400);
            assert_eq!(u64::from(placement.pointer_to_raw_data), text.raw_end() + 0x200);
            assert!(u64::from(placement.virtual_address) >= file.sections()[2].virtual_end());
        }
    }
}
