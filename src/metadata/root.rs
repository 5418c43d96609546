//! The metadata root (ECMA-335 II.24.2.1).
//!
//! The root starts with the `BSJB` signature, followed by the runtime version string and the
//! directory of streams. Parsing keeps the version string as stored (including its NUL
//! padding); [`Root::write_header`] rebuilds the root for a new set of stream sizes.

use crate::{
    file::io::{read_le, read_le_at},
    metadata::streams::StreamHeader,
    Error::OutOfBounds,
    Result,
};

/// The magic signature of a metadata root, `BSJB`.
pub const CIL_HEADER_MAGIC: u32 = 0x424A_5342;

/// The parsed metadata root.
#[derive(Debug, Clone)]
pub struct Root {
    /// Magic signature, [`CIL_HEADER_MAGIC`]
    pub signature: u32,
    /// Major version, 1
    pub major_version: u16,
    /// Minor version, 1
    pub minor_version: u16,
    /// Reserved, 0
    pub reserved: u32,
    /// Length of the version string including padding
    pub length: u32,
    /// Runtime version string, e.g. `v4.0.30319`
    pub version: String,
    /// Reserved, 0
    pub flags: u16,
    /// Directory of streams
    pub stream_headers: Vec<StreamHeader>,
}

impl Root {
    /// Parse the metadata root and its stream directory.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for a wrong signature or an inconsistent stream
    /// directory and [`crate::Error::OutOfBounds`] for truncated data.
    pub fn read(data: &[u8]) -> Result<Root> {
        if data.len() < 20 {
            return Err(OutOfBounds);
        }

        let signature = read_le::<u32>(data)?;
        if signature != CIL_HEADER_MAGIC {
            return Err(malformed_error!(
                "CIL_HEADER_MAGIC does not match - {}",
                signature
            ));
        }

        let version_string_length = read_le_at::<u32>(data, &mut 12)? as usize;
        let Some(version_end) = version_string_length.checked_add(16) else {
            return Err(malformed_error!(
                "Version string length causing integer overflow - {}",
                version_string_length
            ));
        };
        if version_end + 4 > data.len() {
            return Err(OutOfBounds);
        }

        let version_bytes = &data[16..version_end];
        let version = String::from_utf8_lossy(
            &version_bytes[..version_bytes
                .iter()
                .position(|byte| *byte == 0)
                .unwrap_or(version_bytes.len())],
        )
        .into_owned();

        let mut cursor = version_end;
        let flags = read_le_at::<u16>(data, &mut cursor)?;
        let stream_count = read_le_at::<u16>(data, &mut cursor)?;
        if stream_count == 0 || usize::from(stream_count) * 9 > data.len() {
            return Err(malformed_error!("Invalid stream count - {}", stream_count));
        }

        let mut stream_headers = Vec::with_capacity(usize::from(stream_count));
        let mut stream_offset = version_end + 4;
        for _ in 0..stream_count {
            if stream_offset > data.len() {
                return Err(OutOfBounds);
            }

            let header = StreamHeader::from(&data[stream_offset..])?;
            match header.offset.checked_add(header.size) {
                Some(end) if end as usize <= data.len() => {}
                Some(_) => return Err(OutOfBounds),
                None => {
                    return Err(malformed_error!(
                        "Stream offset and size cause integer overflow - {} + {}",
                        header.offset,
                        header.size
                    ))
                }
            }

            stream_offset += header.encoded_size();
            stream_headers.push(header);
        }

        Ok(Root {
            signature,
            major_version: read_le::<u16>(&data[4..])?,
            minor_version: read_le::<u16>(&data[6..])?,
            reserved: read_le::<u32>(&data[8..])?,
            length: version_string_length as u32,
            version,
            flags,
            stream_headers,
        })
    }

    /// Size of a root header holding `version` and the given stream names.
    #[must_use]
    pub fn header_size(version: &str, stream_names: &[&str]) -> usize {
        let streams: usize = stream_names
            .iter()
            .map(|name| 8 + ((name.len() + 1 + 3) & !3))
            .sum();
        16 + padded_version_length(version) + 4 + streams
    }

    /// Serialize a metadata root header with the given version and stream directory.
    ///
    /// The stream offsets in `streams` must already be relative to the start of the root.
    #[must_use]
    pub fn write_header(version: &str, flags: u16, streams: &[StreamHeader]) -> Vec<u8> {
        let version_length = padded_version_length(version);

        let mut out = Vec::with_capacity(64);
        out.extend_from_slice(&CIL_HEADER_MAGIC.to_le_bytes());
        out.extend_from_slice(&1_u16.to_le_bytes());
        out.extend_from_slice(&1_u16.to_le_bytes());
        out.extend_from_slice(&0_u32.to_le_bytes());
        out.extend_from_slice(&(version_length as u32).to_le_bytes());
        out.extend_from_slice(version.as_bytes());
        out.resize(16 + version_length, 0);
        out.extend_from_slice(&flags.to_le_bytes());
        out.extend_from_slice(&(streams.len() as u16).to_le_bytes());
        for stream in streams {
            stream.write(&mut out);
        }

        out
    }
}

/// Version string length including the terminating NUL, padded to 4 bytes.
fn padded_version_length(version: &str) -> usize {
    (version.len() + 1 + 3) & !3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crafted() {
        #[rustfmt::skip]
        let header_bytes = [
            0x42, 0x53, 0x4A, 0x42,
            0x01, 0x00,
            0x01, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x08, 0x00, 0x00, 0x00,
            b'v', b'4', b'.', b'0', 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00,
            0x01, 0x00,
            0x24, 0x00, 0x00, 0x00, // StreamHeader
            0x04, 0x00, 0x00, 0x00,
            0x23, 0x7E, 0x00, 0x00,
            0xAA, 0xBB, 0xCC, 0xDD,
        ];

        let parsed_header = Root::read(&header_bytes).unwrap();

        assert_eq!(parsed_header.signature, CIL_HEADER_MAGIC);
        assert_eq!(parsed_header.major_version, 1);
        assert_eq!(parsed_header.minor_version, 1);
        assert_eq!(parsed_header.length, 8);
        assert_eq!(parsed_header.version, "v4.0");
        assert_eq!(parsed_header.flags, 0);
        assert_eq!(parsed_header.stream_headers.len(), 1);
        assert_eq!(parsed_header.stream_headers[0].offset, 0x24);
        assert_eq!(parsed_header.stream_headers[0].size, 4);
        assert_eq!(parsed_header.stream_headers[0].name, "#~");
    }

    #[test]
    fn bad_signature() {
        let mut header_bytes = [0u8; 40];
        header_bytes[0] = 0x42;
        assert!(matches!(
            Root::read(&header_bytes),
            Err(crate::Error::Malformed { .. })
        ));
    }

    #[test]
    fn stream_outside_data() {
        #[rustfmt::skip]
        let header_bytes = [
            0x42, 0x53, 0x4A, 0x42,
            0x01, 0x00,
            0x01, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x04, 0x00, 0x00, 0x00,
            b'v', b'4', 0x00, 0x00,
            0x00, 0x00,
            0x01, 0x00,
            0x20, 0x00, 0x00, 0x00,
            0x00, 0x01, 0x00, 0x00,
            0x23, 0x7E, 0x00, 0x00,
        ];

        assert!(Root::read(&header_bytes).is_err());
    }

    #[test]
    fn write_then_read() {
        let streams = vec![
            StreamHeader {
                offset: 0x40,
                size: 0x08,
                name: "#~".to_string(),
            },
            StreamHeader {
                offset: 0x48,
                size: 0x04,
                name: "#Strings".to_string(),
            },
        ];

        let mut data = Root::write_header("v4.0.30319", 0, &streams);
        assert_eq!(data.len(), Root::header_size("v4.0.30319", &["#~", "#Strings"]));
        data.resize(0x4C, 0);

        let root = Root::read(&data).unwrap();
        assert_eq!(root.version, "v4.0.30319");
        assert_eq!(root.length, 12);
        assert_eq!(root.stream_headers, streams);
    }
}
