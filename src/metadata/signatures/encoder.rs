use crate::{
    file::parser::{encode_compressed_token, encode_compressed_uint},
    metadata::signatures::{
        SignatureMethod, TypeSignature, ELEMENT_TYPE, MAX_RECURSION_DEPTH, SIGNATURE_HEADER,
    },
    Result,
};

/// Encode a method signature into its blob form.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for tokens that can not be encoded as
/// `TypeDefOrRef` or for excessive nesting.
pub fn encode_method_signature(signature: &SignatureMethod) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_method(signature, &mut out, 0)?;
    Ok(out)
}

fn write_method(signature: &SignatureMethod, out: &mut Vec<u8>, depth: usize) -> Result<()> {
    let mut convention_byte = signature.calling_convention & 0x0F;
    if signature.has_this {
        convention_byte |= SIGNATURE_HEADER::HAS_THIS;
    }
    if signature.explicit_this {
        convention_byte |= SIGNATURE_HEADER::EXPLICIT_THIS;
    }
    if signature.generic_param_count > 0 {
        convention_byte |= SIGNATURE_HEADER::GENERIC;
    }
    out.push(convention_byte);

    if signature.generic_param_count > 0 {
        encode_compressed_uint(signature.generic_param_count, out)?;
    }

    let param_count = signature.params.len() + signature.varargs.len();
    encode_compressed_uint(param_count as u32, out)?;
    write_type(&signature.return_type, out, depth + 1)?;
    for param in &signature.params {
        write_type(param, out, depth + 1)?;
    }
    if !signature.varargs.is_empty() {
        out.push(ELEMENT_TYPE::SENTINEL);
        for param in &signature.varargs {
            write_type(param, out, depth + 1)?;
        }
    }

    Ok(())
}

fn write_type(signature: &TypeSignature, out: &mut Vec<u8>, depth: usize) -> Result<()> {
    if depth >= MAX_RECURSION_DEPTH {
        return Err(malformed_error!(
            "Signature nesting exceeds {} levels",
            MAX_RECURSION_DEPTH
        ));
    }

    match signature {
        TypeSignature::Void => out.push(ELEMENT_TYPE::VOID),
        TypeSignature::Boolean => out.push(ELEMENT_TYPE::BOOLEAN),
        TypeSignature::Char => out.push(ELEMENT_TYPE::CHAR),
        TypeSignature::I1 => out.push(ELEMENT_TYPE::I1),
        TypeSignature::U1 => out.push(ELEMENT_TYPE::U1),
        TypeSignature::I2 => out.push(ELEMENT_TYPE::I2),
        TypeSignature::U2 => out.push(ELEMENT_TYPE::U2),
        TypeSignature::I4 => out.push(ELEMENT_TYPE::I4),
        TypeSignature::U4 => out.push(ELEMENT_TYPE::U4),
        TypeSignature::I8 => out.push(ELEMENT_TYPE::I8),
        TypeSignature::U8 => out.push(ELEMENT_TYPE::U8),
        TypeSignature::R4 => out.push(ELEMENT_TYPE::R4),
        TypeSignature::R8 => out.push(ELEMENT_TYPE::R8),
        TypeSignature::String => out.push(ELEMENT_TYPE::STRING),
        TypeSignature::TypedByRef => out.push(ELEMENT_TYPE::TYPEDBYREF),
        TypeSignature::I => out.push(ELEMENT_TYPE::I),
        TypeSignature::U => out.push(ELEMENT_TYPE::U),
        TypeSignature::Object => out.push(ELEMENT_TYPE::OBJECT),
        TypeSignature::Ptr(base) => {
            out.push(ELEMENT_TYPE::PTR);
            write_type(base, out, depth + 1)?;
        }
        TypeSignature::ByRef(base) => {
            out.push(ELEMENT_TYPE::BYREF);
            write_type(base, out, depth + 1)?;
        }
        TypeSignature::SzArray(base) => {
            out.push(ELEMENT_TYPE::SZARRAY);
            write_type(base, out, depth + 1)?;
        }
        TypeSignature::Pinned(base) => {
            out.push(ELEMENT_TYPE::PINNED);
            write_type(base, out, depth + 1)?;
        }
        TypeSignature::ValueType(token) => {
            out.push(ELEMENT_TYPE::VALUETYPE);
            encode_compressed_token(*token, out)?;
        }
        TypeSignature::Class(token) => {
            out.push(ELEMENT_TYPE::CLASS);
            encode_compressed_token(*token, out)?;
        }
        TypeSignature::GenericParamType(index) => {
            out.push(ELEMENT_TYPE::VAR);
            encode_compressed_uint(*index, out)?;
        }
        TypeSignature::GenericParamMethod(index) => {
            out.push(ELEMENT_TYPE::MVAR);
            encode_compressed_uint(*index, out)?;
        }
        TypeSignature::Array {
            base,
            rank,
            sizes,
            lower_bounds,
        } => {
            out.push(ELEMENT_TYPE::ARRAY);
            write_type(base, out, depth + 1)?;
            encode_compressed_uint(*rank, out)?;
            encode_compressed_uint(sizes.len() as u32, out)?;
            for size in sizes {
                encode_compressed_uint(*size, out)?;
            }
            encode_compressed_uint(lower_bounds.len() as u32, out)?;
            for bound in lower_bounds {
                encode_compressed_uint(*bound, out)?;
            }
        }
        TypeSignature::GenericInst(base, args) => {
            out.push(ELEMENT_TYPE::GENERICINST);
            write_type(base, out, depth + 1)?;
            encode_compressed_uint(args.len() as u32, out)?;
            for arg in args {
                write_type(arg, out, depth + 1)?;
            }
        }
        TypeSignature::FnPtr(method) => {
            out.push(ELEMENT_TYPE::FNPTR);
            write_method(method, out, depth + 1)?;
        }
    }

    Ok(())
}
