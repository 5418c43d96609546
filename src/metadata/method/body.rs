//! Method body headers and exception sections (ECMA-335 II.25.4).
//!
//! Bodies are read to locate the instruction stream and the class tokens of typed
//! exception clauses, both of which carry metadata tokens that have to follow row
//! renumbering. New bodies are always small enough for the tiny header format.

use crate::{
    file::io::{read_le, read_le_at},
    metadata::method::{ExceptionHandler, ExceptionHandlerFlags, MethodBodyFlags, SectionFlags},
    Error::OutOfBounds,
    Result,
};

/// Largest code size a tiny header can describe
pub const TINY_CODE_SIZE_MAX: usize = 0x3F;

/// Describes one method that has been compiled to CIL bytecode.
#[derive(Debug, Clone)]
pub struct MethodBody {
    /// Size of the method (length of all instructions, not counting the header) in bytes
    pub size_code: usize,
    /// Size of the method header in bytes
    pub size_header: usize,
    /// `MetaData` token for a signature describing the layout of the local variables for the method. 0 == no local variables
    pub local_var_sig_token: u32,
    /// Maximum number of items on the operand stack
    pub max_stack: usize,
    /// Flag, indicating the type of the method header
    pub is_fat: bool,
    /// Flag, indicating to call default constructor on all local variables
    pub is_init_local: bool,
    /// A list of exception handlers this method has
    pub exception_handlers: Vec<ExceptionHandler>,
}

impl MethodBody {
    /// Create a `MethodBody` object from a sequence of bytes starting at the header.
    ///
    /// # Errors
    /// Returns an error if the data is empty, out of bounds, or malformed.
    pub fn from(data: &[u8]) -> Result<MethodBody> {
        if data.is_empty() {
            return Err(malformed_error!("Provided data for body parsing is empty"));
        }

        let first_byte = read_le::<u8>(data)?;
        match MethodBodyFlags::from_bits_truncate(u16::from(first_byte & 0b_00000011_u8)) {
            MethodBodyFlags::TINY_FORMAT => {
                let size_code = (first_byte >> 2) as usize;
                if size_code + 1 > data.len() {
                    return Err(OutOfBounds);
                }

                Ok(MethodBody {
                    size_code,
                    size_header: 1,
                    local_var_sig_token: 0,
                    max_stack: 8,
                    is_fat: false,
                    is_init_local: false,
                    exception_handlers: Vec::new(),
                })
            }
            MethodBodyFlags::FAT_FORMAT => {
                if data.len() < 12 {
                    return Err(OutOfBounds);
                }

                let first_duo = read_le::<u16>(data)?;

                let size_header = usize::from(first_duo >> 12) * 4;
                if size_header < 12 {
                    return Err(malformed_error!(
                        "Fat method header too small - {}",
                        size_header
                    ));
                }

                let size_code = read_le::<u32>(&data[4..])? as usize;
                match size_code.checked_add(size_header) {
                    Some(end) if end <= data.len() => {}
                    _ => return Err(OutOfBounds),
                }

                let local_var_sig_token = read_le::<u32>(&data[8..])?;
                let flags_header =
                    MethodBodyFlags::from_bits_truncate(first_duo & 0b_0000111111111111_u16);
                let max_stack = read_le::<u16>(&data[2..])? as usize;

                // II.25.4.5, extra sections only carry exception handling data
                let mut exception_handlers = Vec::new();
                if flags_header.contains(MethodBodyFlags::MORE_SECTS) {
                    let mut cursor = (size_header + size_code + 3) & !3;
                    loop {
                        if cursor + 4 > data.len() {
                            return Err(OutOfBounds);
                        }

                        let section_flags =
                            SectionFlags::from_bits_truncate(read_le::<u8>(&data[cursor..])?);
                        if !section_flags.contains(SectionFlags::EHTABLE) {
                            return Err(malformed_error!(
                                "Unsupported method data section - 0x{:02X}",
                                section_flags.bits()
                            ));
                        }

                        let section_start = cursor;
                        if section_flags.contains(SectionFlags::FAT_FORMAT) {
                            let section_size =
                                (read_le::<u32>(&data[cursor..])? >> 8) as usize;
                            if section_size < 4 || data.len() < cursor + section_size {
                                return Err(OutOfBounds);
                            }

                            cursor += 4;
                            for _ in 0..(section_size - 4) / 24 {
                                let clause_start = cursor;
                                #[allow(clippy::cast_possible_truncation)]
                                let flags = ExceptionHandlerFlags::from_bits_retain(
                                    read_le_at::<u32>(data, &mut cursor)? as u16,
                                );
                                exception_handlers.push(ExceptionHandler {
                                    flags,
                                    try_offset: read_le_at::<u32>(data, &mut cursor)?,
                                    try_length: read_le_at::<u32>(data, &mut cursor)?,
                                    handler_offset: read_le_at::<u32>(data, &mut cursor)?,
                                    handler_length: read_le_at::<u32>(data, &mut cursor)?,
                                    class_token_or_filter: read_le_at::<u32>(data, &mut cursor)?,
                                    class_token_position: clause_start + 20,
                                });
                            }
                            cursor = section_start + section_size;
                        } else {
                            let section_size = usize::from(read_le::<u8>(&data[cursor + 1..])?);
                            if section_size < 4 || data.len() < cursor + section_size {
                                return Err(OutOfBounds);
                            }

                            cursor += 4;
                            for _ in 0..(section_size - 4) / 12 {
                                let clause_start = cursor;
                                exception_handlers.push(ExceptionHandler {
                                    flags: ExceptionHandlerFlags::from_bits_retain(read_le_at::<
                                        u16,
                                    >(
                                        data,
                                        &mut cursor,
                                    )?),
                                    try_offset: u32::from(read_le_at::<u16>(data, &mut cursor)?),
                                    try_length: u32::from(read_le_at::<u8>(data, &mut cursor)?),
                                    handler_offset: u32::from(read_le_at::<u16>(
                                        data,
                                        &mut cursor,
                                    )?),
                                    handler_length: u32::from(read_le_at::<u8>(data, &mut cursor)?),
                                    class_token_or_filter: read_le_at::<u32>(data, &mut cursor)?,
                                    class_token_position: clause_start + 8,
                                });
                            }
                            cursor = section_start + section_size;
                        }

                        if !section_flags.contains(SectionFlags::MORE_SECTS) {
                            break;
                        }
                        cursor = (cursor + 3) & !3;
                    }
                }

                Ok(MethodBody {
                    size_code,
                    size_header,
                    local_var_sig_token,
                    max_stack,
                    is_fat: true,
                    is_init_local: flags_header.contains(MethodBodyFlags::INIT_LOCALS),
                    exception_handlers,
                })
            }
            _ => Err(malformed_error!(
                "MethodHeader is neither FAT nor TINY - {}",
                first_byte
            )),
        }
    }

    /// Get the full size of this method, header and code
    #[must_use]
    pub fn size(&self) -> usize {
        self.size_code + self.size_header
    }

    /// Byte range of the instruction stream, relative to the start of the header
    #[must_use]
    pub fn code_range(&self) -> std::ops::Range<usize> {
        self.size_header..self.size()
    }

    /// Encode a body with a tiny header: no locals, no exception handlers, a maximum stack
    /// depth of 8.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `code` is longer than [`TINY_CODE_SIZE_MAX`].
    pub fn encode_tiny(code: &[u8]) -> Result<Vec<u8>> {
        if code.len() > TINY_CODE_SIZE_MAX {
            return Err(malformed_error!(
                "Code size {} exceeds the tiny header format",
                code.len()
            ));
        }

        #[allow(clippy::cast_possible_truncation)]
        let header = ((code.len() as u8) << 2) | MethodBodyFlags::TINY_FORMAT.bits() as u8;

        let mut body = Vec::with_capacity(code.len() + 1);
        body.push(header);
        body.extend_from_slice(code);
        Ok(body)
    }
}
