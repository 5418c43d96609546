//! Signature blobs (ECMA-335 II.23.2).
//!
//! Two views of the same grammar live here. [`SignatureParser`] decodes method and type
//! signatures into [`TypeSignature`] trees, which the export pipeline uses to inspect user
//! methods and to build wrapper signatures through [`encode_method_signature`].
//! [`rewrite_tokens`] walks any signature blob without building a tree and re-encodes
//! every embedded `TypeDefOrRef` token, which is how rows can be renumbered without
//! touching anything else in the blob.
//!
//! # Examples
//!
//! ```rust
//! use rvexport::metadata::signatures::{parse_method_signature, TypeSignature};
//!
//! // string (string), default calling convention
//! let signature = parse_method_signature(&[0x00, 0x01, 0x0E, 0x0E])?;
//! assert_eq!(signature.return_type, TypeSignature::String);
//! assert_eq!(signature.params, vec![TypeSignature::String]);
//! # Ok::<(), rvexport::Error>(())
//! ```

mod encoder;
mod parser;
mod rewriter;
mod types;

pub use encoder::encode_method_signature;
pub use parser::{parse_method_signature, parse_type_signature, SignatureParser};
pub use rewriter::{collect_tokens, rewrite_tokens, BlobShape};
pub use types::{SignatureMethod, TypeSignature};

/// Maximum nesting depth accepted while walking a signature
pub(crate) const MAX_RECURSION_DEPTH: usize = 50;

#[allow(non_snake_case, dead_code, missing_docs)]
/// Element type bytes of signature blobs (ECMA-335 II.23.1.16)
pub mod ELEMENT_TYPE {
    pub const END: u8 = 0x00;
    pub const VOID: u8 = 0x01;
    pub const BOOLEAN: u8 = 0x02;
    pub const CHAR: u8 = 0x03;
    pub const I1: u8 = 0x04;
    pub const U1: u8 = 0x05;
    pub const I2: u8 = 0x06;
    pub const U2: u8 = 0x07;
    pub const I4: u8 = 0x08;
    pub const U4: u8 = 0x09;
    pub const I8: u8 = 0x0a;
    pub const U8: u8 = 0x0b;
    pub const R4: u8 = 0x0c;
    pub const R8: u8 = 0x0d;
    pub const STRING: u8 = 0x0e;
    // Followed by type
    pub const PTR: u8 = 0x0f;
    // Followed by type
    pub const BYREF: u8 = 0x10;
    // Followed by TypeDef or TypeRef token
    pub const VALUETYPE: u8 = 0x11;
    // Followed by TypeDef or TypeRef token
    pub const CLASS: u8 = 0x12;
    // Generic parameter in a generic type definition, represented as number
    pub const VAR: u8 = 0x13;
    // type rank boundsCount bound1 … loCount lo1 …
    pub const ARRAY: u8 = 0x14;
    // Generic type instantiation. Followed by type type-arg-count type-1 ... type-n
    pub const GENERICINST: u8 = 0x15;
    pub const TYPEDBYREF: u8 = 0x16;
    // System.IntPtr
    pub const I: u8 = 0x18;
    // System.UIntPtr
    pub const U: u8 = 0x19;
    // Followed by full method signature
    pub const FNPTR: u8 = 0x1b;
    // System.Object
    pub const OBJECT: u8 = 0x1c;
    // Single-dim array with 0 lower bound
    pub const SZARRAY: u8 = 0x1d;
    // Generic parameter in a generic method definition, represented as number
    pub const MVAR: u8 = 0x1e;
    // Required modifier : followed by a TypeDef or TypeRef token
    pub const CMOD_REQD: u8 = 0x1f;
    // Optional modifier : followed by a TypeDef or TypeRef token
    pub const CMOD_OPT: u8 = 0x20;
    // Sentinel for vararg method signature
    pub const SENTINEL: u8 = 0x41;
    // Denotes a local variable that points at a pinned object
    pub const PINNED: u8 = 0x45;
}

#[allow(non_snake_case, dead_code, missing_docs)]
/// Leading bytes of signature blobs (ECMA-335 II.23.2.1 - II.23.2.15)
pub mod SIGNATURE_HEADER {
    pub const DEFAULT: u8 = 0x00;
    pub const C: u8 = 0x01;
    pub const STDCALL: u8 = 0x02;
    pub const THISCALL: u8 = 0x03;
    pub const FASTCALL: u8 = 0x04;
    pub const VARARG: u8 = 0x05;
    pub const FIELD: u8 = 0x06;
    pub const LOCAL_SIG: u8 = 0x07;
    pub const PROPERTY: u8 = 0x08;
    pub const METHOD_SPEC: u8 = 0x0a;
    pub const GENERIC: u8 = 0x10;
    pub const HAS_THIS: u8 = 0x20;
    pub const EXPLICIT_THIS: u8 = 0x40;
}
