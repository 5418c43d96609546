use bitflags::bitflags;

bitflags! {
    /// Exception handler flags defining the type of exception handling clause.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExceptionHandlerFlags: u16 {
        /// A typed exception clause, the clause carries the token of the caught type
        const EXCEPTION = 0x0000;
        /// An exception filter and handler clause
        const FILTER = 0x0001;
        /// A finally clause
        const FINALLY = 0x0002;
        /// A fault clause (finally that executes only on exception)
        const FAULT = 0x0004;
    }
}

/// One clause of a method's exception handling table (ECMA-335 II.25.4.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Flags describing the type of exception handler (catch, filter, finally, fault).
    pub flags: ExceptionHandlerFlags,
    /// Offset in bytes of try block from start of method body.
    pub try_offset: u32,
    /// Length in bytes of the try block.
    pub try_length: u32,
    /// Location of the handler for this try block.
    pub handler_offset: u32,
    /// Size of the handler code in bytes.
    pub handler_length: u32,
    /// Class token for typed clauses, filter offset for filter clauses.
    pub class_token_or_filter: u32,
    /// Position of `class_token_or_filter` relative to the start of the method body.
    pub class_token_position: usize,
}

impl ExceptionHandler {
    /// `true` if `class_token_or_filter` holds a type token.
    #[must_use]
    pub fn has_class_token(&self) -> bool {
        self.flags.bits()
            & (ExceptionHandlerFlags::FILTER
                | ExceptionHandlerFlags::FINALLY
                | ExceptionHandlerFlags::FAULT)
                .bits()
            == 0
    }
}
