//! Token-level traversal of signature blobs.

use crate::{
    file::parser::{encode_compressed_token, Parser},
    metadata::{
        signatures::{ELEMENT_TYPE, MAX_RECURSION_DEPTH, SIGNATURE_HEADER},
        token::Token,
    },
    Result,
};

/// How a blob column starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobShape {
    /// A bare type, as stored in `TypeSpec`
    Type,
    /// A signature with a leading kind byte: field, method, property, locals or
    /// method instantiation
    Signature,
}

/// Copy a signature blob, passing every embedded `TypeDefOrRef` token through `map`.
///
/// All other bytes are copied verbatim, so the result is identical to the input when
/// `map` returns every token unchanged.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for blobs that do not follow the signature grammar
/// and any error returned by `map`.
pub fn rewrite_tokens<F>(blob: &[u8], shape: BlobShape, map: F) -> Result<Vec<u8>>
where
    F: FnMut(Token) -> Result<Token>,
{
    let mut rewriter = TokenRewriter {
        parser: Parser::new(blob),
        out: Vec::with_capacity(blob.len()),
        map,
        depth: 0,
    };

    match shape {
        BlobShape::Type => rewriter.walk_type()?,
        BlobShape::Signature => rewriter.walk_signature()?,
    }

    // trailing bytes are preserved, some compilers pad blobs
    let rest = rewriter.parser.pos();
    rewriter.out.extend_from_slice(&blob[rest..]);
    Ok(rewriter.out)
}

/// All `TypeDefOrRef` tokens embedded in a signature blob, in encounter order.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for blobs that do not follow the signature grammar.
pub fn collect_tokens(blob: &[u8], shape: BlobShape) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    rewrite_tokens(blob, shape, |token| {
        tokens.push(token);
        Ok(token)
    })?;
    Ok(tokens)
}

struct TokenRewriter<'a, F> {
    parser: Parser<'a>,
    out: Vec<u8>,
    map: F,
    depth: usize,
}

impl<F> TokenRewriter<'_, F>
where
    F: FnMut(Token) -> Result<Token>,
{
    fn copy_byte(&mut self) -> Result<u8> {
        let byte = self.parser.read_le::<u8>()?;
        self.out.push(byte);
        Ok(byte)
    }

    // the raw bytes are kept, signed lower bounds would not survive a re-encode
    fn copy_uint(&mut self) -> Result<u32> {
        let start = self.parser.pos();
        let value = self.parser.read_compressed_uint()?;
        let bytes_read = self.parser.pos() - start;
        self.parser.seek(start)?;
        let raw = self.parser.read_bytes(bytes_read)?;
        self.out.extend_from_slice(raw);
        Ok(value)
    }

    fn copy_token(&mut self) -> Result<()> {
        let token = self.parser.read_compressed_token()?;
        let mapped = (self.map)(token)?;
        encode_compressed_token(mapped, &mut self.out)
    }

    fn walk_signature(&mut self) -> Result<()> {
        let kind = self.parser.peek_byte()?;
        match kind {
            SIGNATURE_HEADER::FIELD => {
                self.copy_byte()?;
                self.walk_type()
            }
            SIGNATURE_HEADER::LOCAL_SIG | SIGNATURE_HEADER::METHOD_SPEC => {
                self.copy_byte()?;
                let count = self.copy_uint()?;
                for _ in 0..count {
                    self.walk_type()?;
                }
                Ok(())
            }
            _ if kind & 0x0F == SIGNATURE_HEADER::PROPERTY => {
                self.copy_byte()?;
                let count = self.copy_uint()?;
                self.walk_type()?;
                for _ in 0..count {
                    self.walk_type()?;
                }
                Ok(())
            }
            _ => self.walk_method(),
        }
    }

    fn walk_method(&mut self) -> Result<()> {
        let convention_byte = self.copy_byte()?;
        if convention_byte & SIGNATURE_HEADER::GENERIC != 0 {
            self.copy_uint()?;
        }

        let count = self.copy_uint()?;
        self.walk_type()?;
        for _ in 0..count {
            self.walk_type()?;
        }

        Ok(())
    }

    fn walk_type(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth >= MAX_RECURSION_DEPTH {
            return Err(malformed_error!(
                "Signature nesting exceeds {} levels",
                MAX_RECURSION_DEPTH
            ));
        }

        let result = self.walk_type_inner();
        self.depth -= 1;
        result
    }

    fn walk_type_inner(&mut self) -> Result<()> {
        let element_type = self.copy_byte()?;
        match element_type {
            ELEMENT_TYPE::VOID..=ELEMENT_TYPE::STRING
            | ELEMENT_TYPE::TYPEDBYREF
            | ELEMENT_TYPE::I
            | ELEMENT_TYPE::U
            | ELEMENT_TYPE::OBJECT => Ok(()),
            ELEMENT_TYPE::PTR
            | ELEMENT_TYPE::SZARRAY
            | ELEMENT_TYPE::BYREF
            | ELEMENT_TYPE::PINNED
            | ELEMENT_TYPE::SENTINEL => self.walk_type(),
            ELEMENT_TYPE::VALUETYPE | ELEMENT_TYPE::CLASS => self.copy_token(),
            ELEMENT_TYPE::CMOD_REQD | ELEMENT_TYPE::CMOD_OPT => {
                self.copy_token()?;
                self.walk_type()
            }
            ELEMENT_TYPE::VAR | ELEMENT_TYPE::MVAR => self.copy_uint().map(|_| ()),
            ELEMENT_TYPE::ARRAY => {
                self.walk_type()?;
                self.copy_uint()?;
                let sizes = self.copy_uint()?;
                for _ in 0..sizes {
                    self.copy_uint()?;
                }
                let lower_bounds = self.copy_uint()?;
                for _ in 0..lower_bounds {
                    self.copy_uint()?;
                }
                Ok(())
            }
            ELEMENT_TYPE::GENERICINST => {
                let base = self.copy_byte()?;
                if base != ELEMENT_TYPE::CLASS && base != ELEMENT_TYPE::VALUETYPE {
                    return Err(malformed_error!(
                        "GENERICINST - Next byte is not TYPE_CLASS or TYPE_VALUE - {}",
                        base
                    ));
                }
                self.copy_token()?;
                let count = self.copy_uint()?;
                for _ in 0..count {
                    self.walk_type()?;
                }
                Ok(())
            }
            ELEMENT_TYPE::FNPTR => self.walk_method(),
            _ => Err(malformed_error!(
                "Unsupported ELEMENT_TYPE - {}",
                element_type
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::tables::TableId;

    fn shift_type_refs(token: Token) -> Result<Token> {
        if token.table_id() == Some(TableId::TypeRef) {
            Ok(Token::from_parts(TableId::TypeRef, token.row() - 1))
        } else {
            Ok(token)
        }
    }

    #[test]
    fn identity_is_byte_exact() {
        #[rustfmt::skip]
        let blobs: [&[u8]; 5] = [
            &[0x06, 0x12, 0x09],
            &[0x07, 0x02, 0x45, 0x10, 0x08, 0x1D, 0x11, 0x0C],
            &[0x28, 0x00, 0x0E],
            &[0x0A, 0x01, 0x12, 0x05],
            // int32[2...] with a negative lower bound
            &[0x00, 0x01, 0x01, 0x14, 0x08, 0x01, 0x00, 0x01, 0x7F],
        ];

        for blob in blobs {
            let copy = rewrite_tokens(blob, BlobShape::Signature, Ok).unwrap();
            assert_eq!(copy, blob);
        }
    }

    #[test]
    fn shifts_type_refs() {
        #[rustfmt::skip]
        let blob = [
            0x20, 0x02,
            0x12, 0x0D,                         // class TypeRef 3
            0x15, 0x12, 0x09, 0x01, 0x11, 0x10, // Gen<TypeRef 2><TypeDef 4>
            0x1B, 0x00, 0x01, 0x01, 0x1F, 0x0D, 0x12, 0x09, // fnptr void (modreq(TypeRef 3) TypeRef 2)
        ];

        let rewritten = rewrite_tokens(&blob, BlobShape::Signature, shift_type_refs).unwrap();

        #[rustfmt::skip]
        let expected = [
            0x20, 0x02,
            0x12, 0x09,
            0x15, 0x12, 0x05, 0x01, 0x11, 0x10,
            0x1B, 0x00, 0x01, 0x01, 0x1F, 0x09, 0x12, 0x05,
        ];
        assert_eq!(rewritten, expected);
    }

    #[test]
    fn collects_type_spec_tokens() {
        let tokens = collect_tokens(&[0x15, 0x12, 0x09, 0x01, 0x12, 0x0D], BlobShape::Type)
            .unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::from_parts(TableId::TypeRef, 2),
                Token::from_parts(TableId::TypeRef, 3)
            ]
        );
    }

    #[test]
    fn grows_compressed_token() {
        // TypeRef 31 encodes in one byte, TypeRef 32 needs two
        let rewritten = rewrite_tokens(&[0x06, 0x12, 0x7D], BlobShape::Signature, |_| {
            Ok(Token::from_parts(TableId::TypeRef, 32))
        })
        .unwrap();
        assert_eq!(rewritten, vec![0x06, 0x12, 0x80, 0x81]);
    }

    #[test]
    fn rejects_garbage() {
        assert!(rewrite_tokens(&[0x06, 0x17], BlobShape::Signature, Ok).is_err());
        assert!(rewrite_tokens(&[0x06, 0x12], BlobShape::Signature, Ok).is_err());
    }
}
