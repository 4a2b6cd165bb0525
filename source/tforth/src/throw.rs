//! Throw codes.
//!
//! Negative codes from -1 to -255 are the standard ones; codes from -256
//! down are private to this runtime. Image errors use their own range, see
//! [`crate::image::ImageError`].

use crate::Cell;

pub const ABORT: Cell = -1;
pub const ABORT_QUOTE: Cell = -2;
pub const STACK_OVERFLOW: Cell = -3;
pub const STACK_UNDERFLOW: Cell = -4;
pub const RETURN_STACK_OVERFLOW: Cell = -5;
pub const RETURN_STACK_UNDERFLOW: Cell = -6;
pub const DICTIONARY_OVERFLOW: Cell = -8;
pub const INVALID_ADDRESS: Cell = -9;
pub const DIVISION_BY_ZERO: Cell = -10;
pub const OUT_OF_RANGE: Cell = -11;
pub const UNDEFINED_WORD: Cell = -13;
pub const COMPILE_ONLY: Cell = -14;
pub const ZERO_LENGTH_NAME: Cell = -16;
pub const PARSED_STRING_OVERFLOW: Cell = -18;
pub const NAME_TOO_LONG: Cell = -19;
pub const UNSUPPORTED: Cell = -21;
pub const CONTROL_MISMATCH: Cell = -22;
pub const INVALID_NUMERIC_ARGUMENT: Cell = -24;
pub const NOT_CREATED: Cell = -31;
pub const INVALID_NAME_ARGUMENT: Cell = -32;
pub const FILE_IO: Cell = -37;
pub const NO_SUCH_FILE: Cell = -38;
pub const FLOAT_STACK_OVERFLOW: Cell = -44;
pub const FLOAT_STACK_UNDERFLOW: Cell = -45;
pub const QUIT: Cell = -56;
pub const ALLOCATE: Cell = -59;
pub const FREE: Cell = -60;
pub const RESIZE: Cell = -61;

pub const BYE: Cell = -256;
pub const SEMICOLON: Cell = -257;
pub const DEFERRED: Cell = -258;
pub const INCLUDE_DEPTH: Cell = -259;

/// A short description of a throw code, if it is one we know.
pub fn message(code: Cell) -> Option<&'static str> {
    Some(match code {
        ABORT => "ABORT",
        ABORT_QUOTE => "ABORT\"",
        STACK_OVERFLOW => "Stack overflow!",
        STACK_UNDERFLOW => "Stack underflow!",
        RETURN_STACK_OVERFLOW => "Return stack overflow!",
        RETURN_STACK_UNDERFLOW => "Return stack underflow!",
        DICTIONARY_OVERFLOW => "Dictionary overflow!",
        INVALID_ADDRESS => "Invalid memory address!",
        DIVISION_BY_ZERO => "Division by zero!",
        OUT_OF_RANGE => "Result out of range!",
        UNDEFINED_WORD => "Undefined word!",
        COMPILE_ONLY => "Interpreting a compile-only word!",
        ZERO_LENGTH_NAME => "Attempt to use zero-length string as a name!",
        PARSED_STRING_OVERFLOW => "Parsed string overflow!",
        NAME_TOO_LONG => "Definition name too long!",
        UNSUPPORTED => "Unsupported operation!",
        CONTROL_MISMATCH => "Control structure mismatch!",
        INVALID_NUMERIC_ARGUMENT => "Invalid numeric argument!",
        NOT_CREATED => ">BODY used on non-CREATEd definition!",
        INVALID_NAME_ARGUMENT => "Invalid name argument!",
        FILE_IO => "File I/O exception!",
        NO_SUCH_FILE => "Non-existent file!",
        FLOAT_STACK_OVERFLOW => "Floating-point stack overflow!",
        FLOAT_STACK_UNDERFLOW => "Floating-point stack underflow!",
        QUIT => "QUIT",
        ALLOCATE => "ALLOCATE failed!",
        FREE => "FREE failed!",
        RESIZE => "RESIZE failed!",
        BYE => "BYE",
        SEMICOLON => "Stack depth changed between : and ; . Probably unbalanced conditional!",
        DEFERRED => "Not a DEFERred word!",
        INCLUDE_DEPTH => "Include nesting too deep!",
        _ => return None,
    })
}
