use crate::metadata::token::Token;

/// A type as it appears in a signature blob.
///
/// Custom modifiers are skipped while parsing, they do not take part in the shape checks
/// this crate performs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeSignature {
    /// void
    Void,
    /// bool
    Boolean,
    /// char
    Char,
    /// signed 8bit integer
    I1,
    /// unsigned 8bit integer
    U1,
    /// signed 16bit integer
    I2,
    /// unsigned 16bit integer
    U2,
    /// signed 32bit integer
    I4,
    /// unsigned 32bit integer
    U4,
    /// signed 64bit integer
    I8,
    /// unsigned 64bit integer
    U8,
    /// 32bit floating-point
    R4,
    /// 64bit floating-point
    R8,
    /// System.String
    String,
    /// An unmanaged pointer
    Ptr(Box<TypeSignature>),
    /// A managed reference
    ByRef(Box<TypeSignature>),
    /// A value type, `TypeDef`, `TypeRef` or `TypeSpec` token
    ValueType(Token),
    /// A reference type, `TypeDef`, `TypeRef` or `TypeSpec` token
    Class(Token),
    /// Generic parameter of the declaring type
    GenericParamType(u32),
    /// Generic parameter of the method
    GenericParamMethod(u32),
    /// A general array with rank, sizes and lower bounds
    Array {
        /// Element type
        base: Box<TypeSignature>,
        /// Number of dimensions
        rank: u32,
        /// Declared sizes
        sizes: Vec<u32>,
        /// Declared lower bounds, in their signed compressed encoding
        lower_bounds: Vec<u32>,
    },
    /// A single-dimensional, zero-based array
    SzArray(Box<TypeSignature>),
    /// A generic instantiation and its arguments
    GenericInst(Box<TypeSignature>, Vec<TypeSignature>),
    /// System.TypedReference
    TypedByRef,
    /// Native signed integer
    I,
    /// Native unsigned integer
    U,
    /// A function pointer
    FnPtr(Box<SignatureMethod>),
    /// System.Object
    Object,
    /// A pinned local
    Pinned(Box<TypeSignature>),
}

/// A `MethodDefSig`, `MethodRefSig` or `StandAloneMethodSig` (ECMA-335 II.23.2.1 - 3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureMethod {
    /// Instance method, `HASTHIS`
    pub has_this: bool,
    /// `EXPLICITTHIS`
    pub explicit_this: bool,
    /// Calling convention, the low nibble of the leading byte
    pub calling_convention: u8,
    /// Number of generic parameters, 0 for non-generic methods
    pub generic_param_count: u32,
    /// Return type
    pub return_type: TypeSignature,
    /// Parameter types, in declaration order
    pub params: Vec<TypeSignature>,
    /// Parameter types following the vararg sentinel
    pub varargs: Vec<TypeSignature>,
}

impl SignatureMethod {
    /// A static, non-generic method with the given calling convention.
    #[must_use]
    pub fn new_static(
        calling_convention: u8,
        return_type: TypeSignature,
        params: Vec<TypeSignature>,
    ) -> Self {
        SignatureMethod {
            has_this: false,
            explicit_this: false,
            calling_convention,
            generic_param_count: 0,
            return_type,
            params,
            varargs: Vec::new(),
        }
    }
}
