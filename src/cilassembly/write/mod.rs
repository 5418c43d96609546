//! Binary generation for edited [`crate::cilassembly::CilAssembly`] instances.
//!
//! The original sections are never resized and keep their virtual addresses. Everything
//! that changed is placed in one new section appended behind the last one, which keeps
//! every RVA of the original image (method bodies, resources, the CLI header itself)
//! valid. When the header area is full, as in a 32-bit library with `.text`, `.rsrc` and
//! `.reloc`, it grows by one file alignment unit and the section data moves down in the
//! file.
//!
//! # Architecture
//!
//! The pipeline consists of several phases:
//!
//! ## Phase 1: Layout Planning
//! Bodies of added methods are laid out 4-byte aligned at the start of the new `.meta`
//! section, followed by the rebuilt metadata. The section goes to the next section
//! alignment boundary behind the highest virtual address and to the next file alignment
//! boundary behind the highest raw data, see [`crate::cilassembly::write::pe::SectionPlacement`].
//!
//! ## Phase 2: Metadata Serialization
//! Added methods receive their final RVAs and the metadata root is rebuilt with freshly
//! sized streams, see [`crate::cilassembly::write::metadata`].
//!
//! ## Phase 3: Memory Mapping and Copy
//! The output is mapped at its final size, see [`crate::cilassembly::write::output::Output`],
//! and the image is copied up to the end of its last section, the section data shifted
//! behind a grown header area if necessary. Trailing overlay data such
//! as an Authenticode signature is not carried over, the certificate table directory is
//! cleared instead: any signature is invalid after the edit anyway.
//!
//! ## Phase 4: PE and CLI Header Updates
//! The old metadata is zeroed, moved raw data pointers and `SizeOfHeaders` are updated,
//! the section header is added, `NumberOfSections`, `SizeOfInitializedData` and
//! `SizeOfImage` are updated, and the CLI header is re-pointed
//! to the new metadata with the current entry point token.
//!
//! ## Phase 5: Finalization
//! The checksum is recomputed over the finished image and the file is moved into place.

pub mod metadata;
pub mod output;
pub mod pe;

use std::path::Path;

use crate::{
    cilassembly::{
        write::{
            metadata::{build_metadata, Heaps},
            output::Output,
            pe::SectionPlacement,
        },
        CilAssembly,
    },
    file::DIRECTORY_SECURITY,
    metadata::{
        cor20header::{
            COR20_ENTRY_POINT_OFFSET, COR20_METADATA_RVA_OFFSET, COR20_METADATA_SIZE_OFFSET,
        },
        tables::{col, TableId},
    },
    Result,
};

/// Name of the section holding the rebuilt metadata
pub const META_SECTION_NAME: &str = ".meta";

/// Write `assembly` to `output_path`, which may be the file it was loaded from.
///
/// # Errors
/// Returns [`crate::Error::WriteLayout`] if the new section cannot be placed,
/// [`crate::Error::Malformed`] if the metadata cannot be serialized and
/// [`crate::Error::FileError`] for I/O failures.
pub fn write_assembly_to_file<P: AsRef<Path>>(assembly: &CilAssembly, output_path: P) -> Result<()> {
    let file = assembly.file();

    // Phase 1: Layout planning
    let virtual_address = SectionPlacement::after_last_section(file, 0)?.virtual_address;
    let mut content = Vec::new();
    let mut tables = assembly.tables().clone();
    for (method, body) in assembly.added_bodies() {
        pad_to_4(&mut content);
        let rva = virtual_address + content.len() as u32;
        tables.set_value(TableId::MethodDef, *method, col::methoddef::RVA, rva)?;
        content.extend_from_slice(body);
    }
    pad_to_4(&mut content);

    // Phase 2: Metadata serialization
    let metadata_offset = content.len() as u32;
    let metadata = build_metadata(
        assembly.runtime_version(),
        assembly.root_flags(),
        &tables,
        &Heaps {
            strings: assembly.strings().data(),
            user_strings: assembly.user_strings(),
            guids: assembly.guids(),
            blobs: assembly.blobs().data(),
        },
    )?;
    content.extend_from_slice(&metadata);

    let placement = SectionPlacement::after_last_section(file, content.len())?;
    log::debug!(
        "Placing {} at RVA 0x{:X} / file offset 0x{:X}: {} bytes of bodies, {} bytes of metadata",
        META_SECTION_NAME,
        placement.virtual_address,
        placement.pointer_to_raw_data,
        metadata_offset,
        metadata.len()
    );

    // Phase 3: Memory mapping and copy
    let mut output = Output::create(output_path, placement.file_end())?;
    let image_end = file
        .sections()
        .iter()
        .map(|section| section.raw_end())
        .max()
        .unwrap_or(0)
        .max(u64::from(file.size_of_headers()));
    let copy_len = (image_end as usize).min(file.data().len());
    let headers_len = (placement.raw_start as usize).min(copy_len);
    output.write_at(0, &file.data()[..headers_len])?;
    output.write_at(
        placement.relocate(headers_len as u64),
        &file.data()[headers_len..copy_len],
    )?;

    // Phase 4: PE and CLI header updates
    let cor20 = assembly.cor20header();
    let old_metadata = file.rva_to_offset(cor20.meta_data_rva)?;
    output.zero_range(
        placement.relocate(old_metadata as u64),
        cor20.meta_data_size as usize,
    )?;

    output.write_at(u64::from(placement.pointer_to_raw_data), &content)?;
    pe::apply_header_growth(file, &mut output, &placement)?;
    pe::register_section(file, &mut output, &placement, META_SECTION_NAME)?;
    output.zero_range(file.data_directory_offset(DIRECTORY_SECURITY) as u64, 8)?;

    let clr = placement.relocate(file.rva_to_offset(file.clr().0)? as u64);
    output.write_u32_le_at(
        clr + COR20_METADATA_RVA_OFFSET as u64,
        placement.virtual_address + metadata_offset,
    )?;
    output.write_u32_le_at(clr + COR20_METADATA_SIZE_OFFSET as u64, metadata.len() as u32)?;
    output.write_u32_le_at(
        clr + COR20_ENTRY_POINT_OFFSET as u64,
        assembly.entry_point().value(),
    )?;

    // Phase 5: Finalization
    pe::update_checksum(file, &mut output)?;
    output.finalize()
}

fn pad_to_4(buffer: &mut Vec<u8>) {
    while buffer.len() % 4 != 0 {
        buffer.push(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cilassembly::NewMethod,
        file::File,
        metadata::{method::MethodBody, tables::CodedIndexType},
        test::FixtureBuilder,
    };
    use tempfile::tempdir;

    fn load(data: Vec<u8>) -> CilAssembly {
        CilAssembly::from_file(File::from_mem(data).unwrap()).unwrap()
    }

    #[test]
    fn rewrite_unchanged() {
        let image = FixtureBuilder::x64().export("Invoke", 0).build();
        let assembly = load(image.clone());

        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("Extension.dll");
        assembly.write_to_file(&path).unwrap();

        let written = std::fs::read(&path).unwrap();
        let reloaded = load(written.clone());
        assert_eq!(reloaded.file().sections().len(), 2);
        assert_eq!(reloaded.file().sections()[1].name, ".meta");
        assert_eq!(
            reloaded.tables().rows(TableId::MethodDef),
            assembly.tables().rows(TableId::MethodDef)
        );
        assert_eq!(reloaded.strings().data(), assembly.strings().data());

        // the old metadata is gone
        let old = assembly.file().rva_to_offset(assembly.cor20header().meta_data_rva).unwrap();
        let size = assembly.cor20header().meta_data_size as usize;
        assert!(written[old..old + size].iter().all(|byte| *byte == 0));

        // headers are consistent
        let file = reloaded.file();
        let checksum_offset = file.optional_header_offset() + pe::CHECKSUM_OFFSET;
        let stored = u32::from_le_bytes(written[checksum_offset..checksum_offset + 4].try_into().unwrap());
        assert_eq!(stored, pe::pe_checksum(&written, checksum_offset));
        assert_eq!(written.len() as u64, file.sections()[1].raw_end());
    }

    #[test]
    fn added_body_gets_rva() {
        let image = FixtureBuilder::x86().export("Invoke", 0).build();
        let mut assembly = load(image);

        let extends = (TableId::TypeRef, 1);
        let container = assembly.add_type_def(0x101, "Arma3.DllExport", "DllExportWrapper", extends).unwrap();
        let method = assembly
            .add_method(
                container,
                NewMethod {
                    flags: 0x0096,
                    impl_flags: 0,
                    name: "RVExtensionVersion".to_string(),
                    signature: vec![0x02, 0x00, 0x01],
                    params: Vec::new(),
                    body: MethodBody::encode_tiny(&[0x2A]).unwrap(),
                },
            )
            .unwrap();

        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("Extension.dll");
        assembly.write_to_file(&path).unwrap();

        let reloaded = load(std::fs::read(&path).unwrap());
        let rva = reloaded
            .tables()
            .value(TableId::MethodDef, method, col::methoddef::RVA)
            .unwrap();
        assert_eq!(rva, reloaded.file().sections()[1].virtual_address);
        assert_eq!(reloaded.file().slice_at_rva(rva, 2).unwrap(), &[0x06, 0x2A]);

        let extends = reloaded
            .tables()
            .value(TableId::TypeDef, container, col::typedef::EXTENDS)
            .unwrap();
        assert_eq!(
            CodedIndexType::TypeDefOrRef.decode(extends).unwrap(),
            (TableId::TypeRef, 1)
        );
        assert_eq!(reloaded.type_def_name(container).unwrap(), ("Arma3.DllExport", "DllExportWrapper"));
    }

    #[test]
    fn full_header_area_grows() {
        let image = FixtureBuilder::x86()
            .sections_to_fill_headers()
            .debug_directory()
            .export("Invoke", 0)
            .build();
        let assembly = load(image);
        let original = assembly.file();
        assert_eq!(original.size_of_headers(), 0x200);

        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("Extension.dll");
        assembly.write_to_file(&path).unwrap();

        let written = std::fs::read(&path).unwrap();
        let reloaded = load(written.clone());
        let file = reloaded.file();
        assert_eq!(file.size_of_headers(), 0x400);

        let names: Vec<&str> = file.sections().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, [".text", ".rsrc", ".reloc", ".meta"]);
        let (text, moved) = (&original.sections()[0], &file.sections()[0]);
        assert_eq!(moved.virtual_address, text.virtual_address);
        assert_eq!(moved.pointer_to_raw_data, text.pointer_to_raw_data + 0x200);
        assert_eq!(file.sections()[1].pointer_to_raw_data, 0);

        // method bodies are still found through their unchanged RVAs
        for row in 1..=assembly.tables().rows(TableId::MethodDef).len() as u32 {
            let rva = assembly.tables().value(TableId::MethodDef, row, col::methoddef::RVA).unwrap();
            assert_eq!(
                reloaded.file().slice_at_rva(rva, 2).unwrap(),
                original.slice_at_rva(rva, 2).unwrap()
            );
        }
        assert_eq!(reloaded.strings().data(), assembly.strings().data());

        // the debug data pointer follows the section data
        let (debug_rva, _) = file.debug_directory().unwrap();
        let entry = file.slice_at_rva(debug_rva, 28).unwrap();
        let data_rva = u32::from_le_bytes(entry[20..24].try_into().unwrap());
        let data_pointer = u32::from_le_bytes(entry[24..28].try_into().unwrap()) as usize;
        assert_eq!(data_pointer, file.rva_to_offset(data_rva).unwrap());
        assert_eq!(&written[data_pointer..data_pointer + 4], b"RSDS");

        let checksum_offset = file.optional_header_offset() + pe::CHECKSUM_OFFSET;
        let stored = u32::from_le_bytes(written[checksum_offset..checksum_offset + 4].try_into().unwrap());
        assert_eq!(stored, pe::pe_checksum(&written, checksum_offset));
        assert_eq!(written.len() as u64, file.sections()[3].raw_end());
    }

    #[test]
    fn overlay_and_certificate_dropped() {
        let image = FixtureBuilder::x64().export("Invoke", 0).certificate().build();
        let assembly = load(image.clone());
        assert!(image.len() as u64 > assembly.file().sections()[0].raw_end());

        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("Extension.dll");
        assembly.write_to_file(&path).unwrap();

        let written = std::fs::read(&path).unwrap();
        let security = assembly.file().data_directory_offset(DIRECTORY_SECURITY);
        assert_eq!(&written[security..security + 8], &[0; 8]);

        let reloaded = load(written);
        assert_eq!(
            reloaded.file().sections()[1].pointer_to_raw_data as u64,
            assembly.file().sections()[0].raw_end()
        );
    }
}
