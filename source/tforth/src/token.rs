//! Execution tokens.
//!
//! In memory an execution token is a single cell. Cells below
//! [`PRIMITIVE_LIMIT`] name a primitive; anything else is the code space
//! offset of a secondary's body. Code space never hands out offsets below
//! the limit, so the two never collide.

use crate::{memory::NAME_BASE, Cell, Error, UCell};

/// Upper bound on primitive ids, and the first usable code space offset.
pub const PRIMITIVE_LIMIT: usize = 0x200;

/// A decoded execution token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Xt {
    /// Built into the inner interpreter.
    Primitive(Prim),
    /// A threaded body at this code space offset.
    Secondary(usize),
}

impl Xt {
    #[inline]
    pub fn to_cell(self) -> Cell {
        match self {
            Xt::Primitive(p) => Cell::from(p.id()),
            Xt::Secondary(off) => off as Cell,
        }
    }

    #[inline]
    pub fn from_cell(cell: Cell) -> Result<Self, Error> {
        let raw = cell as UCell;
        if (raw as usize) < PRIMITIVE_LIMIT {
            Prim::from_id(raw as usize)
                .map(Xt::Primitive)
                .ok_or(Error::BadToken(cell))
        } else if raw < NAME_BASE {
            Ok(Xt::Secondary(raw as usize))
        } else {
            Err(Error::BadToken(cell))
        }
    }

    #[inline]
    pub fn is_primitive(&self) -> bool {
        matches!(self, Xt::Primitive(_))
    }
}

impl From<Prim> for Xt {
    fn from(p: Prim) -> Self {
        Xt::Primitive(p)
    }
}

// Generates `Prim`, its name table and the immediate flags in one place, so
// that ids stay dense and in declaration order. Ids are part of the image
// format: only ever append.
macro_rules! primitives {
    ($( $variant:ident = $name:literal $(, $imm:ident)? ; )*) => {
        /// Every primitive the inner interpreter knows how to run.
        #[repr(u16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Prim {
            $( $variant, )*
        }

        impl Prim {
            pub const ALL: &'static [Prim] = &[ $( Prim::$variant, )* ];

            /// The dictionary name of this primitive.
            pub const fn name(self) -> &'static str {
                match self {
                    $( Prim::$variant => $name, )*
                }
            }

            /// Does this primitive run at compile time?
            pub const fn is_immediate(self) -> bool {
                match self {
                    $( Prim::$variant => primitives!(@imm $($imm)?), )*
                }
            }
        }
    };
    (@imm) => { false };
    (@imm immediate) => { true };
}

primitives! {
    // threading and control flow
    Exit = "EXIT";
    Literal = "(LITERAL)";
    TwoLiteral = "(2LITERAL)";
    ALiteral = "(ALITERAL)";
    FLiteral = "(FLITERAL)";
    Branch = "BRANCH";
    ZeroBranch = "0BRANCH";
    DoP = "(DO)";
    QDoP = "(?DO)";
    LoopP = "(LOOP)";
    PlusLoopP = "(+LOOP)";
    LeaveP = "(LEAVE)";
    Unloop = "UNLOOP";
    LoopI = "I";
    LoopJ = "J";
    Execute = "EXECUTE";
    Catch = "CATCH";
    Throw = "THROW";
    ErrorQ = "?ERROR";
    Abort = "ABORT";
    AbortQuoteP = "(ABORT\")";
    Bye = "BYE";
    Quit = "QUIT";
    Noop = "NOOP";
    CreateP = "(CREATE)";
    DoesP = "(DOES>)";
    DeferP = "(DEFER)";
    ConstantP = "(CONSTANT)";
    TwoConstantP = "(2CONSTANT)";
    ValueP = "(VALUE)";
    DotQuoteP = "(.\")";
    SQuoteP = "(S\")";
    CQuoteP = "(C\")";
    CallC = "CALL-C";
    LocalEntry = "(LOCAL.ENTRY)";
    LocalExit = "(LOCAL.EXIT)";
    LocalFetch = "(LOCAL@)";
    LocalStore = "(LOCAL!)";
    LocalPlusStore = "(LOCAL+!)";

    // data and return stack
    Dup = "DUP";
    Drop = "DROP";
    Swap = "SWAP";
    Over = "OVER";
    Rot = "ROT";
    MinusRot = "-ROT";
    Nip = "NIP";
    Tuck = "TUCK";
    Pick = "PICK";
    Roll = "ROLL";
    QDup = "?DUP";
    TwoDup = "2DUP";
    TwoDrop = "2DROP";
    TwoSwap = "2SWAP";
    TwoOver = "2OVER";
    Depth = "DEPTH";
    SpFetch = "SP@";
    SpStore = "SP!";
    ClearStack = "CLEARSTACK";
    ToR = ">R";
    RFrom = "R>";
    RFetch = "R@";
    RDrop = "RDROP";
    TwoToR = "2>R";
    TwoRFrom = "2R>";
    TwoRFetch = "2R@";
    RpFetch = "RP@";
    RpStore = "RP!";

    // single cell arithmetic and logic
    Plus = "+";
    Minus = "-";
    Star = "*";
    Slash = "/";
    Mod = "MOD";
    SlashMod = "/MOD";
    StarSlash = "*/";
    StarSlashMod = "*/MOD";
    Negate = "NEGATE";
    Abs = "ABS";
    Min = "MIN";
    Max = "MAX";
    OnePlus = "1+";
    OneMinus = "1-";
    TwoPlus = "2+";
    TwoMinus = "2-";
    TwoStar = "2*";
    TwoSlash = "2/";
    And = "AND";
    Or = "OR";
    Xor = "XOR";
    Invert = "INVERT";
    LShift = "LSHIFT";
    RShift = "RSHIFT";
    ARShift = "ARSHIFT";
    Equal = "=";
    NotEqual = "<>";
    Less = "<";
    Greater = ">";
    ULess = "U<";
    UGreater = "U>";
    ZeroEqual = "0=";
    ZeroNotEqual = "0<>";
    ZeroLess = "0<";
    ZeroGreater = "0>";
    True = "TRUE";
    False = "FALSE";
    CellSize = "CELL";
    Cells = "CELLS";
    CellPlus = "CELL+";
    Chars = "CHARS";
    CharPlus = "CHAR+";
    Within = "WITHIN";

    // double cell arithmetic
    DPlus = "D+";
    DMinus = "D-";
    UMStar = "UM*";
    MStar = "M*";
    UMSlashMod = "UM/MOD";
    MUSlashMod = "MU/MOD";
    SMSlashRem = "SM/REM";
    FMSlashMod = "FM/MOD";
    SToD = "S>D";
    DToS = "D>S";
    DNegate = "DNEGATE";
    DAbs = "DABS";
    DZeroEqual = "D0=";
    DEqual = "D=";
    DLess = "D<";

    // memory
    Fetch = "@";
    Store = "!";
    CFetch = "C@";
    CStore = "C!";
    WFetch = "W@";
    WStore = "W!";
    PlusStore = "+!";
    TwoFetch = "2@";
    TwoStore = "2!";
    CMove = "CMOVE";
    CMoveUp = "CMOVE>";
    Move = "MOVE";
    Fill = "FILL";
    Erase = "ERASE";
    Compare = "COMPARE";
    Scan = "SCAN";
    Skip = "SKIP";
    Here = "HERE";
    Allot = "ALLOT";
    Comma = ",";
    CComma = "C,";
    WComma = "W,";
    Align = "ALIGN";
    Aligned = "ALIGNED";
    Count = "COUNT";
    ToBody = ">BODY";
    BodyOffset = "BODY_OFFSET";
    Pad = "PAD";
    Allocate = "ALLOCATE";
    Free = "FREE";
    Resize = "RESIZE";

    // console
    Emit = "EMIT";
    Type = "TYPE";
    Cr = "CR";
    Space = "SPACE";
    Spaces = "SPACES";
    Key = "KEY";
    KeyQ = "KEY?";
    Accept = "ACCEPT";
    Dot = ".";
    UDot = "U.";
    DotS = ".S";
    DDot = "D.";
    Question = "?";
    Eol = "EOL";
    FlushEmit = "FLUSHEMIT";
    Sleep = "(SLEEP)";
    Dump = "DUMP";

    // dictionary and compiler
    Find = "FIND";
    FindNfa = "FINDNFA";
    Tick = "'";
    BracketTick = "[']", immediate;
    NameFrom = "NAME>";
    ToName = ">NAME";
    IdDot = "ID.";
    PrevName = "PREVNAME";
    Latest = "LATEST";
    Words = "WORDS";
    Immediate = "IMMEDIATE";
    Create = "CREATE";
    Variable = "VARIABLE";
    Constant = "CONSTANT";
    TwoConstant = "2CONSTANT";
    TwoVariable = "2VARIABLE";
    Value = "VALUE";
    To = "TO", immediate;
    Defer = "DEFER";
    Is = "IS", immediate;
    Does = "DOES>", immediate;
    Colon = ":";
    ColonNoName = ":NONAME";
    Semicolon = ";", immediate;
    Recurse = "RECURSE", immediate;
    Postpone = "POSTPONE", immediate;
    BracketCompile = "[COMPILE]", immediate;
    LeftBracket = "[", immediate;
    RightBracket = "]";
    LiteralWord = "LITERAL", immediate;
    TwoLiteralWord = "2LITERAL", immediate;
    ALiteralWord = "ALITERAL", immediate;
    CompileComma = "COMPILE,";
    Locals = "{", immediate;
    LocalArrow = "->", immediate;
    LocalPlusArrow = "+->", immediate;

    // control structures
    If = "IF", immediate;
    Else = "ELSE", immediate;
    Then = "THEN", immediate;
    Begin = "BEGIN", immediate;
    Again = "AGAIN", immediate;
    Until = "UNTIL", immediate;
    While = "WHILE", immediate;
    Repeat = "REPEAT", immediate;
    Do = "DO", immediate;
    QDo = "?DO", immediate;
    Loop = "LOOP", immediate;
    PlusLoop = "+LOOP", immediate;
    Leave = "LEAVE", immediate;

    // parsing and input sources
    Word = "WORD";
    Parse = "PARSE";
    ParseName = "PARSE-NAME";
    Source = "SOURCE";
    SetSource = "SET-SOURCE";
    SourceId = "SOURCE-ID";
    PushSourceId = "PUSH-SOURCE-ID";
    PopSourceId = "POP-SOURCE-ID";
    SourceLineFetch = "SOURCE-LINE-NUMBER@";
    SourceLineStore = "SOURCE-LINE-NUMBER!";
    Refill = "REFILL";
    Interpret = "INTERPRET";
    Evaluate = "EVALUATE";
    NumberQ = "NUMBER?";
    Paren = "(", immediate;
    Backslash = "\\", immediate;
    DotQuote = ".\"", immediate;
    DotParen = ".(", immediate;
    SQuote = "S\"", immediate;
    CQuote = "C\"", immediate;
    AbortQuote = "ABORT\"", immediate;
    Char = "CHAR";
    BracketChar = "[CHAR]", immediate;
    Decimal = "DECIMAL";
    Hex = "HEX";
    Binary = "BINARY";

    // files
    OpenFile = "OPEN-FILE";
    CreateFile = "CREATE-FILE";
    CloseFile = "CLOSE-FILE";
    ReadFile = "READ-FILE";
    WriteFile = "WRITE-FILE";
    ReadLine = "READ-LINE";
    FileSize = "FILE-SIZE";
    FilePosition = "FILE-POSITION";
    RepositionFile = "REPOSITION-FILE";
    ResizeFile = "RESIZE-FILE";
    FlushFile = "FLUSH-FILE";
    DeleteFile = "DELETE-FILE";
    RenameFile = "RENAME-FILE";
    ReadOnly = "R/O";
    ReadWrite = "R/W";
    WriteOnly = "W/O";
    Bin = "BIN";
    IncludeFile = "INCLUDE-FILE";
    Included = "INCLUDED";
    Include = "INCLUDE";
    SaveForth = "SAVE-FORTH";
    Turnkey = "TURNKEY";

    // system variables
    VarBase = "BASE";
    VarState = "STATE";
    VarToIn = ">IN";
    VarNumTib = "#TIB";
    VarEcho = "ECHO";
    VarOut = "OUT";
    VarByeCode = "BYE-CODE";
    VarReturnCode = "RETURN-CODE";
    VarContext = "CONTEXT";
    VarDp = "DP";
    VarHeadersPtr = "HEADERS-PTR";
    VarHeadersBase = "HEADERS-BASE";
    VarHeadersLimit = "HEADERS-LIMIT";
    VarCodeBase = "CODE-BASE";
    VarCodeLimit = "CODE-LIMIT";
    VarTraceFlags = "TRACE-FLAGS";
    VarTraceLevel = "TRACE-LEVEL";
    VarTraceStack = "TRACE-STACK";
    VarQuiet = "QUIET";

    // floating point
    FPlus = "F+";
    FMinus = "F-";
    FStar = "F*";
    FSlash = "F/";
    FDup = "FDUP";
    FDrop = "FDROP";
    FSwap = "FSWAP";
    FDepth = "FDEPTH";
    FDot = "F.";
    FLiteralWord = "FLITERAL", immediate;
}

impl Prim {
    /// Number of primitives, recorded in saved images.
    pub const COUNT: usize = Prim::ALL.len();

    #[inline]
    pub const fn id(self) -> u16 {
        self as u16
    }

    #[inline]
    pub fn from_id(id: usize) -> Option<Prim> {
        Prim::ALL.get(id).copied()
    }

    /// Should this primitive get a dictionary entry in this build?
    pub fn is_available(self) -> bool {
        cfg_if::cfg_if! {
            if #[cfg(feature = "floats")] {
                true
            } else {
                !matches!(
                    self,
                    Prim::FLiteral
                        | Prim::FPlus
                        | Prim::FMinus
                        | Prim::FStar
                        | Prim::FSlash
                        | Prim::FDup
                        | Prim::FDrop
                        | Prim::FSwap
                        | Prim::FDepth
                        | Prim::FDot
                        | Prim::FLiteralWord
                )
            }
        }
    }
}

#[cfg(test)]
pub mod test {
    use super::*;

    #[test]
    fn ids_are_dense_and_below_the_limit() {
        assert!(Prim::COUNT < PRIMITIVE_LIMIT);
        for (idx, p) in Prim::ALL.iter().enumerate() {
            assert_eq!(p.id() as usize, idx);
            assert_eq!(Prim::from_id(idx), Some(*p));
        }
        assert_eq!(Prim::from_id(Prim::COUNT), None);
    }

    #[test]
    fn names_fit_a_header() {
        for p in Prim::ALL {
            assert!(!p.name().is_empty() && p.name().len() <= 31, "{p:?}");
        }
    }

    #[test]
    fn cell_encoding() {
        assert_eq!(Xt::from_cell(0), Ok(Xt::Primitive(Prim::Exit)));
        assert_eq!(Xt::from_cell(Xt::Primitive(Prim::Dup).to_cell()), Ok(Xt::Primitive(Prim::Dup)));
        assert_eq!(Xt::from_cell(0x400), Ok(Xt::Secondary(0x400)));
        assert_eq!(Xt::from_cell(Prim::COUNT as Cell), Err(Error::BadToken(Prim::COUNT as Cell)));
        assert!(Xt::from_cell(-1).is_err());
        assert!(Prim::Semicolon.is_immediate());
        assert!(!Prim::Dup.is_immediate());
    }
}
