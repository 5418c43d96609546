//! Serialization of the metadata root and its streams (ECMA-335 II.24.2).

use crate::{
    metadata::{
        root::Root,
        streams::StreamHeader,
        tables::{MetadataTables, HEAP_LARGE_BLOB, HEAP_LARGE_GUID, HEAP_LARGE_STRINGS},
    },
    Result,
};

/// The heaps written next to the tables stream.
pub struct Heaps<'a> {
    /// `#Strings`
    pub strings: &'a [u8],
    /// `#US`, omitted when empty
    pub user_strings: &'a [u8],
    /// `#GUID`
    pub guids: &'a [u8],
    /// `#Blob`
    pub blobs: &'a [u8],
}

impl Heaps<'_> {
    /// `HeapSizes` flags of the tables stream for these heaps.
    #[must_use]
    pub fn heap_sizes(&self) -> u8 {
        let mut flags = 0;
        if self.strings.len() >= 0x10000 {
            flags |= HEAP_LARGE_STRINGS;
        }
        if self.guids.len() / 16 >= 0x10000 {
            flags |= HEAP_LARGE_GUID;
        }
        if self.blobs.len() >= 0x10000 {
            flags |= HEAP_LARGE_BLOB;
        }
        flags
    }
}

/// Serialize a complete metadata block: root, `#~`, `#Strings`, `#US`, `#GUID` and
/// `#Blob`, every stream padded to 4 bytes.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if a table value does not fit its column.
pub fn build_metadata(
    version: &str,
    flags: u16,
    tables: &MetadataTables,
    heaps: &Heaps<'_>,
) -> Result<Vec<u8>> {
    let tables_stream = tables.write(heaps.heap_sizes())?;

    let mut streams: Vec<(&str, &[u8])> = vec![
        ("#~", tables_stream.as_slice()),
        ("#Strings", heaps.strings),
    ];
    if !heaps.user_strings.is_empty() {
        streams.push(("#US", heaps.user_strings));
    }
    streams.push(("#GUID", heaps.guids));
    streams.push(("#Blob", heaps.blobs));

    let names: Vec<&str> = streams.iter().map(|(name, _)| *name).collect();
    let mut offset = Root::header_size(version, &names);

    let mut headers = Vec::with_capacity(streams.len());
    for (name, data) in &streams {
        let size = padded(data.len());
        headers.push(StreamHeader {
            offset: offset as u32,
            size: size as u32,
            name: (*name).to_string(),
        });
        offset += size;
    }

    let mut out = Root::write_header(version, flags, &headers);
    for (_, data) in &streams {
        out.extend_from_slice(data);
        out.resize(padded(out.len()), 0);
    }

    Ok(out)
}

fn padded(len: usize) -> usize {
    (len + 3) & !3
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{
        streams::{Blob, Strings},
        tables::TableId,
    };

    #[test]
    fn streams_round_trip_through_root() {
        let mut tables = MetadataTables::new();
        tables.rows_mut(TableId::Module).push(vec![0, 1, 1, 0, 0]);

        let strings = b"\0Fixture.dll\0";
        let guids = [0x11u8; 16];
        let blobs = [0x00, 0x01, 0x14];
        let heaps = Heaps {
            strings,
            user_strings: &[],
            guids: &guids,
            blobs: &blobs,
        };

        let data = build_metadata("v4.0.30319", 0, &tables, &heaps).unwrap();
        let root = Root::read(&data).unwrap();
        let names: Vec<&str> = root.stream_headers.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, ["#~", "#Strings", "#GUID", "#Blob"]);

        for header in &root.stream_headers {
            assert_eq!(header.offset % 4, 0);
            assert_eq!(header.size % 4, 0);
        }

        let strings_header = &root.stream_headers[1];
        let start = strings_header.offset as usize;
        let heap = Strings::from(&data[start..start + strings_header.size as usize]).unwrap();
        assert_eq!(heap.get(1).unwrap(), "Fixture.dll");

        let blob_header = &root.stream_headers[3];
        let start = blob_header.offset as usize;
        let heap = Blob::from(&data[start..start + blob_header.size as usize]).unwrap();
        assert_eq!(heap.get(1).unwrap(), &[0x14]);

        let tables_header = &root.stream_headers[0];
        let start = tables_header.offset as usize;
        let decoded =
            MetadataTables::read(&data[start..start + tables_header.size as usize]).unwrap();
        assert_eq!(decoded.rows(TableId::Module), tables.rows(TableId::Module));
    }

    #[test]
    fn large_heaps() {
        let strings = vec![0u8; 0x10000];
        let heaps = Heaps {
            strings: &strings,
            user_strings: &[],
            guids: &[],
            blobs: &[0],
        };
        assert_eq!(heaps.heap_sizes(), HEAP_LARGE_STRINGS);
    }
}
