#![cfg_attr(not(any(test, feature = "use-std")), no_std)]

extern crate alloc;

pub mod dictionary;
pub mod double;
pub mod heap;
pub mod host;
pub mod image;
pub mod input;
pub mod memory;
pub mod number;
pub mod output;
pub mod stack;
pub mod task;
pub mod throw;
pub mod token;
pub mod vm;

#[cfg(any(test, feature = "_force_test_utils"))]
pub mod testutil;

pub use crate::{
    dictionary::Lookup,
    host::{CustomFunction, Host},
    task::Task,
    token::{Prim, Xt},
    vm::{Forth, ForthParams},
};
use crate::{dictionary::DictError, image::ImageError, stack::StackError};

/// One Forth cell.
pub type Cell = i32;
/// A cell viewed as unsigned.
pub type UCell = u32;

/// Size of a cell in bytes.
pub const CELL: usize = core::mem::size_of::<Cell>();

pub const TRUE: Cell = -1;
pub const FALSE: Cell = 0;

#[inline]
pub(crate) fn flag(b: bool) -> Cell {
    if b {
        TRUE
    } else {
        FALSE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Run,
    Compile,
}

/// Everything that can go wrong while running Forth code.
///
/// Every variant maps onto a throw code with [`Error::code`], which is what
/// `CATCH` hands back to Forth code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    DataStack(StackError),
    ReturnStack(StackError),
    LocalsStack(StackError),
    FloatStack(StackError),
    Dictionary(DictError),
    Image(ImageError),
    InvalidAddress(UCell),
    BadToken(Cell),
    DivideByZero,
    UndefinedWord,
    InterpretingCompileOnlyWord,
    ControlMismatch,
    LineTooLong,
    IncludeTooDeep,
    /// Raised by `THROW`, `ABORT`, `BYE` and friends.
    Throw(Cell),
}

impl Error {
    pub fn code(&self) -> Cell {
        match self {
            Error::DataStack(StackError::StackEmpty) => throw::STACK_UNDERFLOW,
            Error::DataStack(_) => throw::STACK_OVERFLOW,
            Error::ReturnStack(StackError::StackEmpty) => throw::RETURN_STACK_UNDERFLOW,
            Error::ReturnStack(_) => throw::RETURN_STACK_OVERFLOW,
            Error::LocalsStack(StackError::StackEmpty) => throw::RETURN_STACK_UNDERFLOW,
            Error::LocalsStack(_) => throw::RETURN_STACK_OVERFLOW,
            Error::FloatStack(StackError::StackEmpty) => throw::FLOAT_STACK_UNDERFLOW,
            Error::FloatStack(_) => throw::FLOAT_STACK_OVERFLOW,
            Error::Dictionary(DictError::NameTooLong) => throw::NAME_TOO_LONG,
            Error::Dictionary(DictError::ZeroLengthName) => throw::ZERO_LENGTH_NAME,
            Error::Dictionary(DictError::OutOfRange) => throw::INVALID_ADDRESS,
            Error::Dictionary(_) => throw::DICTIONARY_OVERFLOW,
            Error::Image(ie) => ie.code(),
            Error::InvalidAddress(_) => throw::INVALID_ADDRESS,
            Error::BadToken(_) => throw::INVALID_ADDRESS,
            Error::DivideByZero => throw::DIVISION_BY_ZERO,
            Error::UndefinedWord => throw::UNDEFINED_WORD,
            Error::InterpretingCompileOnlyWord => throw::COMPILE_ONLY,
            Error::ControlMismatch => throw::CONTROL_MISMATCH,
            Error::LineTooLong => throw::PARSED_STRING_OVERFLOW,
            Error::IncludeTooDeep => throw::INCLUDE_DEPTH,
            Error::Throw(code) => *code,
        }
    }

    /// Is this the request to leave the runtime?
    pub fn is_bye(&self) -> bool {
        self.code() == throw::BYE
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Image(ie) => f.write_str(ie.message()),
            Error::InvalidAddress(addr) => write!(f, "invalid memory address {addr:#010x}"),
            Error::BadToken(tok) => write!(f, "invalid execution token {tok:#x}"),
            other => match throw::message(other.code()) {
                Some(msg) => f.write_str(msg),
                None => write!(f, "THROW code {}", other.code()),
            },
        }
    }
}

impl From<StackError> for Error {
    fn from(se: StackError) -> Self {
        Error::DataStack(se)
    }
}

impl From<DictError> for Error {
    fn from(de: DictError) -> Self {
        Error::Dictionary(de)
    }
}

impl From<ImageError> for Error {
    fn from(ie: ImageError) -> Self {
        Error::Image(ie)
    }
}

impl From<core::fmt::Error> for Error {
    fn from(_: core::fmt::Error) -> Self {
        Error::Throw(throw::FILE_IO)
    }
}

trait ReplaceErr {
    type OK;
    fn replace_err<NE>(self, t: NE) -> Result<Self::OK, NE>;
}

impl<T, OE> ReplaceErr for Result<T, OE> {
    type OK = T;
    #[inline]
    fn replace_err<NE>(self, e: NE) -> Result<Self::OK, NE> {
        match self {
            Ok(t) => Ok(t),
            Err(_e) => Err(e),
        }
    }
}

impl<T> ReplaceErr for Option<T> {
    type OK = T;
    #[inline]
    fn replace_err<NE>(self, e: NE) -> Result<Self::OK, NE> {
        self.ok_or(e)
    }
}

#[cfg(test)]
pub mod test {
    use crate::{Forth, ForthParams};

    #[derive(Default)]
    struct TestContext {
        contents: Vec<i32>,
    }

    impl crate::Host for TestContext {}

    // Takes one value off the stack, and stores it in the vec
    fn squirrel(ctxt: &mut TestContext, args: &[i32]) -> i32 {
        ctxt.contents.push(args[0]);
        0
    }

    static CUSTOM: &[crate::CustomFunction<TestContext>] =
        &[crate::custom!("SQUIRREL", squirrel, 1, false)];

    #[test]
    fn forth() {
        let mut forth =
            Forth::new(ForthParams::default(), TestContext::default(), CUSTOM).unwrap();
        let lines = &[
            ("2 3 + .", "5 ok.\n"),
            (": YAY 2 3 + . ;", "ok.\n"),
            ("YAY YAY YAY", "5 5 5 ok.\n"),
            (": BOOP YAY YAY ;", "ok.\n"),
            ("BOOP", "5 5 ok.\n"),
            (": ERR IF BOOP BOOP BOOP ELSE YAY YAY THEN ;", "ok.\n"),
            (": ERF IF BOOP BOOP BOOP THEN YAY YAY ;", "ok.\n"),
            ("0 ERR", "5 5 ok.\n"),
            ("1 ERR", "5 5 5 5 5 5 ok.\n"),
            ("0 ERF", "5 5 ok.\n"),
            ("1 ERF", "5 5 5 5 5 5 5 5 ok.\n"),
            (": ONE 1 . ;", "ok.\n"),
            (": TWO 2 . ;", "ok.\n"),
            (": SIX 6 . ;", "ok.\n"),
            (": NIF IF ONE IF TWO TWO ELSE SIX THEN ONE THEN ;", "ok.\n"),
            ("  0 NIF", "ok.\n"),
            ("0 1 NIF", "1 6 1 ok.\n"),
            ("1 1 NIF", "1 2 2 1 ok.\n"),
            ("42 EMIT", "*ok.\n"),
            (": STAR 42 EMIT ;", "ok.\n"),
            ("STAR STAR STAR", "***ok.\n"),
            (": SLOOP ONE 5 0 DO STAR STAR LOOP SIX ;", "ok.\n"),
            ("SLOOP", "1 **********6 ok.\n"),
            (": COUNTUP 10 0 DO I . LOOP ;", "ok.\n"),
            ("COUNTUP", "0 1 2 3 4 5 6 7 8 9 ok.\n"),
            (": SMOD 10 0 DO I 3 MOD 0= IF STAR THEN LOOP ;", "ok.\n"),
            ("SMOD", "****ok.\n"),
            (": BEEP .\" hello, world!\" ;", "ok.\n"),
            ("BEEP", "hello, world!ok.\n"),
            ("123 CONSTANT X", "ok.\n"),
            ("X .", "123 ok.\n"),
            ("4 X + .", "127 ok.\n"),
            ("VARIABLE Y", "ok.\n"),
            ("Y @ .", "0 ok.\n"),
            ("10 Y !", "ok.\n"),
            ("Y @ .", "10 ok.\n"),
            ("CREATE Z 4 CELLS ALLOT", "ok.\n"),
            ("10 Z ! 20 Z CELL+ ! 30 Z 2 CELLS + ! 40 Z 3 CELLS + !", "ok.\n"),
            (
                "Z @ . Z CELL+ @ . Z 2 CELLS + @ . Z 3 CELLS + @ .",
                "10 20 30 40 ok.\n",
            ),
        ];

        for (line, out) in lines {
            println!("{}", line);
            forth.fill_input(line).unwrap();
            forth.process_line().unwrap();
            print!(" => {}", forth.output.as_str());
            assert_eq!(forth.output.as_str(), *out);
            forth.output.clear();
        }

        // An unterminated definition stays hidden...
        forth.fill_input(": DERP BOOP YAY").unwrap();
        forth.process_line().unwrap();
        forth.output.clear();
        // ...and an undefined word inside it unwinds everything.
        forth.fill_input("YAAY ;").unwrap();
        assert!(forth.process_line().is_err());
        forth.output.clear();
        forth.fill_input("DERP").unwrap();
        assert!(forth.process_line().is_err());

        forth.output.clear();
        forth.fill_input("BOOP YAY").unwrap();
        forth.process_line().unwrap();
        assert_eq!(forth.output.as_str(), "5 5 5 ok.\n");
        assert_eq!(forth.task().data_stack.depth(), 0);
        assert_eq!(forth.task().return_stack.depth(), 0);

        let lines = &[
            ("5 6 SQUIRREL SQUIRREL", "ok.\n"),
            (": SQLOOP 10 0 DO I SQUIRREL LOOP ;", "ok.\n"),
            ("SQLOOP", "ok.\n"),
        ];

        forth.output.clear();
        for (line, out) in lines {
            println!("{}", line);
            forth.fill_input(line).unwrap();
            forth.process_line().unwrap();
            print!(" => {}", forth.output.as_str());
            assert_eq!(forth.output.as_str(), *out);
            forth.output.clear();
        }

        let context = forth.release();
        assert_eq!(&context.contents, &[6, 5, 0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }
}
