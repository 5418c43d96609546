//! Attribute flags of methods, parameters and types, and the method body header flags.

use bitflags::bitflags;

/// Bitmask for `CODE_TYPE` extraction
pub const METHOD_IMPL_CODE_TYPE_MASK: u32 = 0x0003;
/// Bitmask for `ACCESS` state extraction
pub const METHOD_ACCESS_MASK: u32 = 0x0007;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Method implementation code type flags
    pub struct MethodImplCodeType: u32 {
        /// Method impl is IL
        const IL = 0x0000;
        /// Method impl is native
        const NATIVE = 0x0001;
        /// Method impl is OPTIL
        const OPTIL = 0x0002;
        /// Method impl is provided by the runtime
        const RUNTIME = 0x0003;
    }
}

impl MethodImplCodeType {
    /// Extract code type from raw implementation flags
    #[must_use]
    pub fn from_impl_flags(flags: u32) -> Self {
        Self::from_bits_truncate(flags & METHOD_IMPL_CODE_TYPE_MASK)
    }

    /// `true` if the body is CIL
    #[must_use]
    pub fn is_il(flags: u32) -> bool {
        flags & METHOD_IMPL_CODE_TYPE_MASK == 0
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Method access flags
    pub struct MethodAccessFlags: u32 {
        /// Member not referenceable
        const COMPILER_CONTROLLED = 0x0000;
        /// Accessible only by the parent type
        const PRIVATE = 0x0001;
        /// Accessible by sub-types only in this Assembly
        const FAM_AND_ASSEM = 0x0002;
        /// Accessibly by anyone in the Assembly
        const ASSEM = 0x0003;
        /// Accessible only by type and sub-types
        const FAMILY = 0x0004;
        /// Accessibly by sub-types anywhere, plus anyone in assembly
        const FAM_OR_ASSEM = 0x0005;
        /// Accessibly by anyone who has visibility to this scope
        const PUBLIC = 0x0006;
    }
}

impl MethodAccessFlags {
    /// Extract access flags from raw method attributes
    #[must_use]
    pub fn from_method_flags(flags: u32) -> Self {
        Self::from_bits_truncate(flags & METHOD_ACCESS_MASK)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Method modifiers and properties
    pub struct MethodModifiers: u32 {
        /// Defined on type, else per instance
        const STATIC = 0x0010;
        /// Method cannot be overridden
        const FINAL = 0x0020;
        /// Method is virtual
        const VIRTUAL = 0x0040;
        /// Method hides by name+sig, else just by name
        const HIDE_BY_SIG = 0x0080;
        /// Method always gets a new slot in the vtable
        const NEW_SLOT = 0x0100;
        /// Method does not provide an implementation
        const ABSTRACT = 0x0400;
        /// Method is special
        const SPECIAL_NAME = 0x0800;
        /// CLI provides 'special' behavior, dpending upon the name of the method
        const RTSPECIAL_NAME = 0x1000;
        /// Implementation is forwarded through PInvoke
        const PINVOKE_IMPL = 0x2000;
    }
}

impl MethodModifiers {
    /// Extract method modifiers from raw method attributes
    #[must_use]
    pub fn from_method_flags(flags: u32) -> Self {
        Self::from_bits_truncate(flags & !METHOD_ACCESS_MASK)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Flags that a method body can have
    pub struct MethodBodyFlags: u16 {
        /// Tiny method header format
        const TINY_FORMAT = 0x2;
        /// Fat method header format
        const FAT_FORMAT = 0x3;
        /// Flag of the fat method header, showing that there are more data sections appended to the header
        const MORE_SECTS = 0x8;
        /// Flag to indicate that this method should call the default constructor on all local variables
        const INIT_LOCALS = 0x10;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Flags that a method body section can have
    pub struct SectionFlags: u8 {
        /// Indicates that this section contains exception handling data
        const EHTABLE = 0x1;
        /// Reserved, shall be 0
        const OPT_ILTABLE = 0x2;
        /// Indicates that the data section format is far
        const FAT_FORMAT = 0x40;
        /// Indicates that the data section is followed by another one
        const MORE_SECTS = 0x80;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Parameter attributes (ECMA-335 II.23.1.13)
    pub struct ParamAttributes: u16 {
        /// Parameter is \[In\]
        const IN = 0x0001;
        /// Parameter is \[Out\]
        const OUT = 0x0002;
        /// Parameter is optional
        const OPTIONAL = 0x0010;
        /// Parameter has a default value
        const HAS_DEFAULT = 0x1000;
        /// Parameter has marshalling information
        const HAS_FIELD_MARSHAL = 0x2000;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// The type attributes the wrapper container is created with (ECMA-335 II.23.1.15)
    pub struct TypeAttributes: u32 {
        /// Class is public scope
        const PUBLIC = 0x0000_0001;
        /// Class is abstract
        const ABSTRACT = 0x0000_0080;
        /// Class cannot be extended
        const SEALED = 0x0000_0100;
        /// Calling static members does not initialize the type
        const BEFORE_FIELD_INIT = 0x0010_0000;
    }
}

/// `NATIVE_TYPE_LPSTR`, a marshalling descriptor for ANSI C strings (ECMA-335 II.23.4)
pub const NATIVE_TYPE_LPSTR: u8 = 0x14;
