use crate::{
    file::parser::Parser,
    metadata::signatures::{
        SignatureMethod, TypeSignature, ELEMENT_TYPE, MAX_RECURSION_DEPTH, SIGNATURE_HEADER,
    },
    Result,
};

/// Decoder for method and type signatures.
///
/// ```rust
/// use rvexport::metadata::signatures::{SignatureParser, TypeSignature};
///
/// // int32 (string[]), static
/// let mut parser = SignatureParser::new(&[0x00, 0x01, 0x08, 0x1D, 0x0E]);
/// let signature = parser.parse_method_signature()?;
/// assert_eq!(signature.return_type, TypeSignature::I4);
/// assert_eq!(
///     signature.params,
///     vec![TypeSignature::SzArray(Box::new(TypeSignature::String))]
/// );
/// # Ok::<(), rvexport::Error>(())
/// ```
pub struct SignatureParser<'a> {
    parser: Parser<'a>,
    depth: usize,
}

impl<'a> SignatureParser<'a> {
    /// Create a parser over a signature blob.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        SignatureParser {
            parser: Parser::new(data),
            depth: 0,
        }
    }

    /// Parse a single type.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for unknown element types or excessive nesting and
    /// [`crate::Error::OutOfBounds`] for truncated data.
    pub fn parse_type(&mut self) -> Result<TypeSignature> {
        self.depth += 1;
        if self.depth >= MAX_RECURSION_DEPTH {
            return Err(malformed_error!(
                "Signature nesting exceeds {} levels",
                MAX_RECURSION_DEPTH
            ));
        }

        let result = self.parse_type_inner();
        self.depth -= 1;
        result
    }

    fn parse_type_inner(&mut self) -> Result<TypeSignature> {
        self.skip_custom_mods()?;

        let current_byte = self.parser.read_le::<u8>()?;
        match current_byte {
            ELEMENT_TYPE::VOID => Ok(TypeSignature::Void),
            ELEMENT_TYPE::BOOLEAN => Ok(TypeSignature::Boolean),
            ELEMENT_TYPE::CHAR => Ok(TypeSignature::Char),
            ELEMENT_TYPE::I1 => Ok(TypeSignature::I1),
            ELEMENT_TYPE::U1 => Ok(TypeSignature::U1),
            ELEMENT_TYPE::I2 => Ok(TypeSignature::I2),
            ELEMENT_TYPE::U2 => Ok(TypeSignature::U2),
            ELEMENT_TYPE::I4 => Ok(TypeSignature::I4),
            ELEMENT_TYPE::U4 => Ok(TypeSignature::U4),
            ELEMENT_TYPE::I8 => Ok(TypeSignature::I8),
            ELEMENT_TYPE::U8 => Ok(TypeSignature::U8),
            ELEMENT_TYPE::R4 => Ok(TypeSignature::R4),
            ELEMENT_TYPE::R8 => Ok(TypeSignature::R8),
            ELEMENT_TYPE::STRING => Ok(TypeSignature::String),
            ELEMENT_TYPE::PTR => Ok(TypeSignature::Ptr(Box::new(self.parse_type()?))),
            ELEMENT_TYPE::BYREF => Ok(TypeSignature::ByRef(Box::new(self.parse_type()?))),
            ELEMENT_TYPE::VALUETYPE => Ok(TypeSignature::ValueType(
                self.parser.read_compressed_token()?,
            )),
            ELEMENT_TYPE::CLASS => Ok(TypeSignature::Class(self.parser.read_compressed_token()?)),
            ELEMENT_TYPE::VAR => Ok(TypeSignature::GenericParamType(
                self.parser.read_compressed_uint()?,
            )),
            ELEMENT_TYPE::ARRAY => {
                let base = self.parse_type()?;
                let rank = self.parser.read_compressed_uint()?;

                let num_sizes = self.parser.read_compressed_uint()?;
                let mut sizes = Vec::new();
                for _ in 0..num_sizes {
                    sizes.push(self.parser.read_compressed_uint()?);
                }

                let num_lo_bounds = self.parser.read_compressed_uint()?;
                let mut lower_bounds = Vec::new();
                for _ in 0..num_lo_bounds {
                    lower_bounds.push(self.parser.read_compressed_uint()?);
                }

                Ok(TypeSignature::Array {
                    base: Box::new(base),
                    rank,
                    sizes,
                    lower_bounds,
                })
            }
            ELEMENT_TYPE::GENERICINST => {
                let peek_byte = self.parser.peek_byte()?;
                if peek_byte != ELEMENT_TYPE::CLASS && peek_byte != ELEMENT_TYPE::VALUETYPE {
                    return Err(malformed_error!(
                        "GENERICINST - Next byte is not TYPE_CLASS or TYPE_VALUE - {}",
                        peek_byte
                    ));
                }

                let base_type = self.parse_type()?;
                let arg_count = self.parser.read_compressed_uint()?;

                let mut type_args = Vec::new();
                for _ in 0..arg_count {
                    type_args.push(self.parse_type()?);
                }

                Ok(TypeSignature::GenericInst(Box::new(base_type), type_args))
            }
            ELEMENT_TYPE::TYPEDBYREF => Ok(TypeSignature::TypedByRef),
            ELEMENT_TYPE::I => Ok(TypeSignature::I),
            ELEMENT_TYPE::U => Ok(TypeSignature::U),
            ELEMENT_TYPE::FNPTR => Ok(TypeSignature::FnPtr(Box::new(
                self.parse_method_signature()?,
            ))),
            ELEMENT_TYPE::OBJECT => Ok(TypeSignature::Object),
            ELEMENT_TYPE::SZARRAY => Ok(TypeSignature::SzArray(Box::new(self.parse_type()?))),
            ELEMENT_TYPE::MVAR => Ok(TypeSignature::GenericParamMethod(
                self.parser.read_compressed_uint()?,
            )),
            ELEMENT_TYPE::PINNED => Ok(TypeSignature::Pinned(Box::new(self.parse_type()?))),
            _ => Err(malformed_error!(
                "Unsupported ELEMENT_TYPE - {}",
                current_byte
            )),
        }
    }

    fn skip_custom_mods(&mut self) -> Result<()> {
        while self.parser.has_more_data() {
            let next_byte = self.parser.peek_byte()?;
            if next_byte != ELEMENT_TYPE::CMOD_OPT && next_byte != ELEMENT_TYPE::CMOD_REQD {
                break;
            }

            self.parser.advance_by(1)?;
            self.parser.read_compressed_token()?;
        }

        Ok(())
    }

    /// Parse a method signature, `MethodDefSig`, `MethodRefSig` or `StandAloneMethodSig`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for invalid signatures and
    /// [`crate::Error::OutOfBounds`] for truncated data.
    pub fn parse_method_signature(&mut self) -> Result<SignatureMethod> {
        let convention_byte = self.parser.read_le::<u8>()?;
        let generic_param_count = if convention_byte & SIGNATURE_HEADER::GENERIC != 0 {
            self.parser.read_compressed_uint()?
        } else {
            0
        };

        let param_count = self.parser.read_compressed_uint()?;
        let return_type = self.parse_type()?;

        let mut params = Vec::new();
        let mut varargs = Vec::new();
        let mut after_sentinel = false;
        for _ in 0..param_count {
            if self.parser.peek_byte()? == ELEMENT_TYPE::SENTINEL {
                self.parser.advance_by(1)?;
                after_sentinel = true;
            }

            let param = self.parse_type()?;
            if after_sentinel {
                varargs.push(param);
            } else {
                params.push(param);
            }
        }

        Ok(SignatureMethod {
            has_this: convention_byte & SIGNATURE_HEADER::HAS_THIS != 0,
            explicit_this: convention_byte & SIGNATURE_HEADER::EXPLICIT_THIS != 0,
            calling_convention: convention_byte & 0x0F,
            generic_param_count,
            return_type,
            params,
            varargs,
        })
    }
}

/// Parse a method signature blob.
///
/// # Errors
/// Returns an error if the signature data is malformed.
pub fn parse_method_signature(data: &[u8]) -> Result<SignatureMethod> {
    SignatureParser::new(data).parse_method_signature()
}

/// Parse a bare type, e.g. a `TypeSpec` blob.
///
/// # Errors
/// Returns an error if the signature data is malformed.
pub fn parse_type_signature(data: &[u8]) -> Result<TypeSignature> {
    SignatureParser::new(data).parse_type()
}
