//! Method bodies and the attribute flags of methods, parameters and types.

mod body;
mod exceptions;
mod types;

pub use body::{MethodBody, TINY_CODE_SIZE_MAX};
pub use exceptions::{ExceptionHandler, ExceptionHandlerFlags};
pub use types::*;
