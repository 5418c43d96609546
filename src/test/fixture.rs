//! Synthesized .NET libraries.
//!
//! [`FixtureBuilder`] produces the smallest PE image the pipeline accepts: one `.text`
//! section holding the CLI header, the method bodies and the metadata, in the layout a C#
//! compiler would emit for
//!
//! ```csharp
//! namespace Demo {
//!     public class Extension {
//!         [ArmaDllExport(ArmaExport.RVExtension)]
//!         public static string Invoke(string function) => null;
//!     }
//! }
//! ```
//!
//! Fixed rows every fixture carries:
//!
//! | Table       | Row | Content                                                  |
//! |-------------|-----|----------------------------------------------------------|
//! | TypeRef     | 1   | `System.Object` in `mscorlib`                            |
//! | TypeRef     | 2   | `Arma3.DllExport.ArmaDllExportAttribute`                 |
//! | TypeRef     | 3   | `Arma3.DllExport.ArmaExport`                             |
//! | TypeRef     | 4   | `System.Text.StringBuilder`, only with an args export    |
//! | TypeDef     | 1   | `<Module>`                                               |
//! | TypeDef     | 2   | `Demo.Extension`                                         |
//! | MethodDef   | 1   | `Extension::.ctor`, exports follow from row 2            |
//! | MemberRef   | 1   | `ArmaDllExportAttribute::.ctor(ArmaExport)`              |
//! | MemberRef   | 2   | `Object::.ctor()`                                        |
//! | AssemblyRef | 1   | `mscorlib`                                               |
//! | AssemblyRef | 2   | `Arma3.DllExport`                                        |

use std::path::{Path, PathBuf};

use crate::{
    cilassembly::write::metadata::{build_metadata, Heaps},
    metadata::{
        streams::{Blob, Strings},
        tables::{CodedIndexType, MetadataTables, TableId},
    },
};

const FILE_ALIGNMENT: u32 = 0x200;
const SECTION_ALIGNMENT: u32 = 0x2000;
const TEXT_RVA: u32 = 0x2000;
const TEXT_RAW: u32 = 0x200;
const PE_OFFSET: usize = 0x80;
const CLI_HEADER_RVA: u32 = TEXT_RVA + 8;
const BODIES_RVA: u32 = CLI_HEADER_RVA + 72;

/// `.ctor`: ldarg.0; call Object::.ctor; ret
const CTOR_BODY: [u8; 8] = [0x1E, 0x02, 0x28, 0x02, 0x00, 0x00, 0x0A, 0x2A];
/// ldnull; ret
const RETURN_NULL: [u8; 3] = [0x0A, 0x14, 0x2A];
/// ldc.i4.0; ret
const RETURN_ZERO: [u8; 3] = [0x0A, 0x16, 0x2A];
/// ret
const RETURN: [u8; 2] = [0x06, 0x2A];
/// ldtoken TypeRef 2; pop; ret
const TOUCH_MARKER: [u8; 8] = [0x1E, 0xD0, 0x02, 0x00, 0x00, 0x01, 0x26, 0x2A];

struct FixtureExport {
    name: String,
    kind: i32,
    flags: u32,
}

/// Builder for synthesized .NET libraries, see the module documentation for the rows.
pub struct FixtureBuilder {
    machine: u16,
    cor_flags: u32,
    dll: bool,
    exports: Vec<FixtureExport>,
    marker_in_il: bool,
    fill_headers: bool,
    certificate: bool,
    debug_directory: bool,
}

impl FixtureBuilder {
    fn new(machine: u16, cor_flags: u32) -> Self {
        FixtureBuilder {
            machine,
            cor_flags,
            dll: true,
            exports: Vec::new(),
            marker_in_il: false,
            fill_headers: false,
            certificate: false,
            debug_directory: false,
        }
    }

    /// PE32+ `AMD64` library.
    pub fn x64() -> Self {
        Self::new(0x8664, 0x0000_0001)
    }

    /// PE32 `I386` library with `32BITREQUIRED`.
    pub fn x86() -> Self {
        Self::new(0x014C, 0x0000_0003)
    }

    /// PE32 `I386` library without `32BITREQUIRED`.
    pub fn any_cpu() -> Self {
        Self::new(0x014C, 0x0000_0001)
    }

    /// Clear `IMAGE_FILE_DLL`.
    pub fn executable(mut self) -> Self {
        self.dll = false;
        self
    }

    /// A `public static` method of `Demo.Extension` marked with the given kind value.
    ///
    /// The signature follows the kind: `string(string)` for 0, `string()` for 1,
    /// `int32(StringBuilder, string, string*, int32)` for 2, `void(native int)` for 3,
    /// `void(native int, int32)` for 4 and `string(string)` for anything else.
    pub fn export(self, name: &str, kind: i32) -> Self {
        self.export_with_flags(name, kind, 0x0096)
    }

    /// A marked method with explicit `MethodAttributes`.
    pub fn export_with_flags(mut self, name: &str, kind: i32, flags: u32) -> Self {
        self.exports.push(FixtureExport {
            name: name.to_string(),
            kind,
            flags,
        });
        self
    }

    /// Add `Extension::Touch`, which loads the marker attribute type with `ldtoken`.
    pub fn reference_marker_in_il(mut self) -> Self {
        self.marker_in_il = true;
        self
    }

    /// Add two empty sections, leaving no room for another section header.
    pub fn sections_to_fill_headers(mut self) -> Self {
        self.fill_headers = true;
        self
    }

    /// Append an attribute certificate behind the last section.
    pub fn certificate(mut self) -> Self {
        self.certificate = true;
        self
    }

    /// Add a debug directory.
    pub fn debug_directory(mut self) -> Self {
        self.debug_directory = true;
        self
    }

    /// Write the image to `dir/name` and return the path.
    pub fn write_to(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, self.build()).unwrap();
        path
    }

    /// Produce the image.
    pub fn build(&self) -> Vec<u8> {
        let (bodies, rvas) = self.bodies();
        let metadata = self.metadata(&rvas);

        // .text: IAT placeholder, CLI header, bodies, metadata, debug directory
        let mut text = vec![0u8; 8];
        let metadata_rva = BODIES_RVA + bodies.len() as u32;
        text.extend_from_slice(&self.cli_header(metadata_rva, metadata.len() as u32));
        text.extend_from_slice(&bodies);
        text.extend_from_slice(&metadata);
        let debug_rva = TEXT_RVA + text.len() as u32;
        if self.debug_directory {
            // IMAGE_DEBUG_DIRECTORY with an unknown type and 4 bytes of data right behind it
            let data_rva = debug_rva + 28;
            let mut entry = [0u8; 28];
            put_u32(&mut entry, 16, 4);
            put_u32(&mut entry, 20, data_rva);
            put_u32(&mut entry, 24, TEXT_RAW + (data_rva - TEXT_RVA));
            text.extend_from_slice(&entry);
            text.extend_from_slice(b"RSDS");
        }

        let text_virtual_size = text.len() as u32;
        let text_raw_size = align(text_virtual_size, FILE_ALIGNMENT);
        text.resize(text_raw_size as usize, 0);

        let mut sections = vec![SectionSpec {
            name: *b".text\0\0\0",
            virtual_size: text_virtual_size,
            virtual_address: TEXT_RVA,
            size_of_raw_data: text_raw_size,
            pointer_to_raw_data: TEXT_RAW,
            characteristics: 0x6000_0020,
        }];
        let mut virtual_end = align(TEXT_RVA + text_virtual_size, SECTION_ALIGNMENT);
        if self.fill_headers {
            for name in [*b".rsrc\0\0\0", *b".reloc\0\0"] {
                sections.push(SectionSpec {
                    name,
                    virtual_size: 0x10,
                    virtual_address: virtual_end,
                    size_of_raw_data: 0,
                    pointer_to_raw_data: 0,
                    characteristics: 0x4000_0040,
                });
                virtual_end += SECTION_ALIGNMENT;
            }
        }

        let mut image = vec![0u8; TEXT_RAW as usize];
        image.extend_from_slice(&text);

        let certificate_offset = image.len() as u32;
        if self.certificate {
            // WIN_CERTIFICATE, revision 2, PKCS#7
            image.extend_from_slice(&16u32.to_le_bytes());
            image.extend_from_slice(&0x0200u16.to_le_bytes());
            image.extend_from_slice(&0x0002u16.to_le_bytes());
            image.extend_from_slice(&[0xAB; 8]);
        }

        let mut directories = [(0u32, 0u32); 16];
        directories[14] = (CLI_HEADER_RVA, 72);
        if self.certificate {
            directories[4] = (certificate_offset, 16);
        }
        if self.debug_directory {
            directories[6] = (debug_rva, 28);
        }

        self.write_headers(&mut image, &sections, virtual_end, text_raw_size, &directories);
        image
    }

    fn is_64(&self) -> bool {
        self.machine == 0x8664
    }

    fn has_args_export(&self) -> bool {
        self.exports.iter().any(|export| export.kind == 2)
    }

    fn bodies(&self) -> (Vec<u8>, Vec<u32>) {
        let mut bodies = Vec::new();
        let mut rvas = Vec::new();

        let mut push = |body: &[u8]| {
            while bodies.len() % 4 != 0 {
                bodies.push(0);
            }
            rvas.push(BODIES_RVA + bodies.len() as u32);
            bodies.extend_from_slice(body);
        };

        push(&CTOR_BODY);
        for export in &self.exports {
            match export.kind {
                0 | 1 => push(&RETURN_NULL),
                2 => push(&RETURN_ZERO),
                3 | 4 => push(&RETURN),
                _ => push(&RETURN_NULL),
            }
        }
        if self.marker_in_il {
            push(&TOUCH_MARKER);
        }

        while bodies.len() % 4 != 0 {
            bodies.push(0);
        }
        (bodies, rvas)
    }

    fn metadata(&self, rvas: &[u32]) -> Vec<u8> {
        let mut strings = Strings::from(&[]).unwrap();
        let mut blobs = Blob::from(&[]).unwrap();
        let guids = [0x5Au8; 16];
        let mut tables = MetadataTables::new();

        let type_def_or_ref = |rid| CodedIndexType::TypeDefOrRef.encode(TableId::TypeRef, rid).unwrap();
        let scope = |rid| {
            CodedIndexType::ResolutionScope
                .encode(TableId::AssemblyRef, rid)
                .unwrap()
        };

        let name = strings.intern("Fixture.dll");
        tables.rows_mut(TableId::Module).push(vec![0, name, 1, 0, 0]);

        let mut type_ref = |strings: &mut Strings, scope: u32, namespace: &str, name: &str| {
            let name = strings.intern(name);
            let namespace = strings.intern(namespace);
            tables.rows_mut(TableId::TypeRef).push(vec![scope, name, namespace]);
        };
        type_ref(&mut strings, scope(1), "System", "Object");
        type_ref(&mut strings, scope(2), "Arma3.DllExport", "ArmaDllExportAttribute");
        type_ref(&mut strings, scope(2), "Arma3.DllExport", "ArmaExport");
        if self.has_args_export() {
            type_ref(&mut strings, scope(1), "System.Text", "StringBuilder");
        }

        // <Module> and Demo.Extension, both starting at the first field and method
        let name = strings.intern("<Module>");
        tables
            .rows_mut(TableId::TypeDef)
            .push(vec![0, name, 0, 0, 1, 1]);
        let name = strings.intern("Extension");
        let namespace = strings.intern("Demo");
        tables
            .rows_mut(TableId::TypeDef)
            .push(vec![0x0010_0001, name, namespace, type_def_or_ref(1), 1, 1]);

        // .ctor
        let name = strings.intern(".ctor");
        let signature = blobs.append(&[0x20, 0x00, 0x01]).unwrap();
        tables
            .rows_mut(TableId::MethodDef)
            .push(vec![rvas[0], 0, 0x1886, name, signature, 1]);

        let string_builder = type_def_or_ref(4) as u8;
        let mut body_index = 1;
        for export in &self.exports {
            let (signature, params): (Vec<u8>, &[&str]) = match export.kind {
                1 => (vec![0x00, 0x00, 0x0E], &[]),
                2 => (
                    vec![0x00, 0x04, 0x08, 0x12, string_builder, 0x0E, 0x0F, 0x0E, 0x08],
                    &["output", "function", "argv", "argc"],
                ),
                3 => (vec![0x00, 0x01, 0x01, 0x18], &["callback"]),
                4 => (vec![0x00, 0x02, 0x01, 0x18, 0x08], &["args", "argc"]),
                _ => (vec![0x00, 0x01, 0x0E, 0x0E], &["function"]),
            };

            let param_list = tables.row_count(TableId::Param) + 1;
            for (sequence, param) in params.iter().enumerate() {
                let name = strings.intern(param);
                tables
                    .rows_mut(TableId::Param)
                    .push(vec![0, sequence as u32 + 1, name]);
            }

            let name = strings.intern(&export.name);
            let signature = blobs.append(&signature).unwrap();
            tables.rows_mut(TableId::MethodDef).push(vec![
                rvas[body_index],
                0,
                export.flags,
                name,
                signature,
                param_list,
            ]);
            body_index += 1;
        }

        if self.marker_in_il {
            let name = strings.intern("Touch");
            let signature = blobs.append(&[0x00, 0x00, 0x01]).unwrap();
            let param_list = tables.row_count(TableId::Param) + 1;
            tables.rows_mut(TableId::MethodDef).push(vec![
                rvas[body_index],
                0,
                0x0096,
                name,
                signature,
                param_list,
            ]);
        }

        // ArmaDllExportAttribute::.ctor(valuetype ArmaExport), Object::.ctor()
        let member_ref_parent = |rid| {
            CodedIndexType::MemberRefParent
                .encode(TableId::TypeRef, rid)
                .unwrap()
        };
        let name = strings.intern(".ctor");
        let signature = blobs
            .append(&[0x20, 0x01, 0x01, 0x11, type_def_or_ref(3) as u8])
            .unwrap();
        tables
            .rows_mut(TableId::MemberRef)
            .push(vec![member_ref_parent(2), name, signature]);
        let signature = blobs.append(&[0x20, 0x00, 0x01]).unwrap();
        tables
            .rows_mut(TableId::MemberRef)
            .push(vec![member_ref_parent(1), name, signature]);

        let constructor = CodedIndexType::CustomAttributeType
            .encode(TableId::MemberRef, 1)
            .unwrap();
        for (index, export) in self.exports.iter().enumerate() {
            let parent = CodedIndexType::HasCustomAttribute
                .encode(TableId::MethodDef, index as u32 + 2)
                .unwrap();
            let mut value = vec![0x01, 0x00];
            value.extend_from_slice(&export.kind.to_le_bytes());
            value.extend_from_slice(&[0x00, 0x00]);
            let value = blobs.append(&value).unwrap();
            tables
                .rows_mut(TableId::CustomAttribute)
                .push(vec![parent, constructor, value]);
        }

        let name = strings.intern("Fixture");
        tables
            .rows_mut(TableId::Assembly)
            .push(vec![0x8004, 1, 0, 0, 0, 0, 0, name, 0]);

        let token = blobs
            .append(&[0xB7, 0x7A, 0x5C, 0x56, 0x19, 0x34, 0xE0, 0x89])
            .unwrap();
        let name = strings.intern("mscorlib");
        tables
            .rows_mut(TableId::AssemblyRef)
            .push(vec![4, 0, 0, 0, 0, token, name, 0, 0]);
        let name = strings.intern("Arma3.DllExport");
        tables
            .rows_mut(TableId::AssemblyRef)
            .push(vec![1, 0, 0, 0, 0, 0, name, 0, 0]);

        build_metadata(
            "v4.0.30319",
            0,
            &tables,
            &Heaps {
                strings: strings.data(),
                user_strings: &[],
                guids: &guids,
                blobs: blobs.data(),
            },
        )
        .unwrap()
    }

    fn cli_header(&self, metadata_rva: u32, metadata_size: u32) -> [u8; 72] {
        let mut header = [0u8; 72];
        header[0..4].copy_from_slice(&72u32.to_le_bytes());
        header[4..6].copy_from_slice(&2u16.to_le_bytes());
        header[6..8].copy_from_slice(&5u16.to_le_bytes());
        header[8..12].copy_from_slice(&metadata_rva.to_le_bytes());
        header[12..16].copy_from_slice(&metadata_size.to_le_bytes());
        header[16..20].copy_from_slice(&self.cor_flags.to_le_bytes());
        header
    }

    fn write_headers(
        &self,
        image: &mut [u8],
        sections: &[SectionSpec],
        size_of_image: u32,
        size_of_code: u32,
        directories: &[(u32, u32); 16],
    ) {
        // DOS header
        image[0..2].copy_from_slice(b"MZ");
        image[0x3C..0x40].copy_from_slice(&(PE_OFFSET as u32).to_le_bytes());

        // PE signature and COFF header
        let optional_size: u16 = if self.is_64() { 0xF0 } else { 0xE0 };
        let mut characteristics: u16 = 0x0002;
        characteristics |= if self.is_64() { 0x0020 } else { 0x0100 };
        if self.dll {
            characteristics |= 0x2000;
        }

        let coff = PE_OFFSET + 4;
        image[PE_OFFSET..coff].copy_from_slice(b"PE\0\0");
        put_u16(image, coff, self.machine);
        put_u16(image, coff + 2, sections.len() as u16);
        put_u16(image, coff + 16, optional_size);
        put_u16(image, coff + 18, characteristics);

        // optional header
        let optional = coff + 20;
        put_u16(image, optional, if self.is_64() { 0x020B } else { 0x010B });
        image[optional + 2] = 48;
        put_u32(image, optional + 4, size_of_code);
        put_u32(image, optional + 20, TEXT_RVA);
        if self.is_64() {
            image[optional + 24..optional + 32].copy_from_slice(&0x1_8000_0000u64.to_le_bytes());
        } else {
            put_u32(image, optional + 28, 0x1000_0000);
        }
        put_u32(image, optional + 32, SECTION_ALIGNMENT);
        put_u32(image, optional + 36, FILE_ALIGNMENT);
        put_u16(image, optional + 40, 4);
        put_u16(image, optional + 48, 4);
        put_u32(image, optional + 56, size_of_image);
        put_u32(image, optional + 60, TEXT_RAW);
        put_u16(image, optional + 68, 3);
        put_u16(image, optional + 70, 0x8560);

        let (rva_count, directory_base) = if self.is_64() {
            (optional + 108, optional + 112)
        } else {
            (optional + 92, optional + 96)
        };
        put_u32(image, rva_count, 16);
        for (index, (rva, size)) in directories.iter().enumerate() {
            put_u32(image, directory_base + index * 8, *rva);
            put_u32(image, directory_base + index * 8 + 4, *size);
        }

        // section table
        let mut header = optional + usize::from(optional_size);
        for section in sections {
            image[header..header + 8].copy_from_slice(&section.name);
            put_u32(image, header + 8, section.virtual_size);
            put_u32(image, header + 12, section.virtual_address);
            put_u32(image, header + 16, section.size_of_raw_data);
            put_u32(image, header + 20, section.pointer_to_raw_data);
            put_u32(image, header + 36, section.characteristics);
            header += 40;
        }
    }
}

struct SectionSpec {
    name: [u8; 8],
    virtual_size: u32,
    virtual_address: u32,
    size_of_raw_data: u32,
    pointer_to_raw_data: u32,
    characteristics: u32,
}

fn align(value: u32, alignment: u32) -> u32 {
    (value + alignment - 1) & !(alignment - 1)
}

fn put_u16(image: &mut [u8], offset: usize, value: u16) {
    image[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(image: &mut [u8], offset: usize, value: u32) {
    image[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
