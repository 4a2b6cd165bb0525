//! The outer interpreter and the compiling words.
//!
//! Control structures keep their state on the data stack as `addr tag`
//! pairs, so a colon definition that leaves one unresolved also fails the
//! depth check in `;`.

use alloc::vec::Vec;
use core::fmt::Write;

use crate::{
    dictionary::{Lookup, NameDisplay},
    host::Host,
    memory::{Region, POCKET_BASE},
    number::{self, Number},
    task::SCRATCH_SIZE,
    throw,
    token::{Prim, Xt},
    vm::Forth,
    Cell, Error, Mode, ReplaceErr, UCell, CELL,
};

/// Most names one `{ ... }` may declare.
pub const MAX_LOCALS: usize = 16;

// Control flow tags.
const ORIG: Cell = 1;
const DEST: Cell = 2;
const DO_SYS: Cell = 3;

/// A definition under construction.
#[derive(Debug, Clone, Copy)]
struct Definition {
    xt: Xt,
    /// Data stack depth at `:`.
    depth: usize,
    noname: bool,
}

#[derive(Debug, Default)]
pub(crate) struct Compiler {
    current: Option<Definition>,
    /// Set once `{` has compiled a frame for the current definition.
    frame: bool,
    locals: Vec<Vec<u8>>,
    /// Unresolved `LEAVE` and `?DO` branches, one list per open loop.
    leaves: Vec<Vec<usize>>,
}

impl Compiler {
    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }

    fn end_locals(&mut self) {
        self.frame = false;
        self.locals.clear();
    }

    fn local_index(&self, name: &[u8], case_insensitive: bool) -> Option<usize> {
        self.locals.iter().position(|local| {
            if case_insensitive {
                local.eq_ignore_ascii_case(name)
            } else {
                local[..] == *name
            }
        })
    }
}

impl<T: Host + 'static> Forth<T> {
    /// Interpret the rest of the input buffer.
    pub(crate) fn interpret(&mut self) -> Result<(), Error> {
        while let Some((start, len)) = self.task.input.parse_name() {
            let name = self.task.input.bytes()[start..start + len].to_vec();
            self.interpret_word(&name)?;
        }
        Ok(())
    }

    fn interpret_word(&mut self, name: &[u8]) -> Result<(), Error> {
        if self.mode == Mode::Compile {
            if let Some(idx) = self.local_index(name) {
                self.dict.comma_xt(Xt::Primitive(Prim::LocalFetch))?;
                self.dict.comma(idx as Cell)?;
                return Ok(());
            }
        }
        match self.dict.find(name) {
            Lookup::Immediate(xt) => self.execute(xt),
            Lookup::Normal(xt) if self.mode == Mode::Compile => self.compile_xt(xt),
            Lookup::Normal(xt) => self.execute(xt),
            Lookup::NotFound => self.interpret_number(name),
        }
    }

    fn interpret_number(&mut self, name: &[u8]) -> Result<(), Error> {
        let compiling = self.mode == Mode::Compile;
        match number::convert(name, self.vars.base) {
            Number::Single(n) if compiling => self.compile_literal(n),
            Number::Single(n) => self.push(n),
            Number::Double((lo, hi)) if compiling => self.compile_double(lo as Cell, hi as Cell),
            Number::Double(d) => self.push_double(d),
            #[cfg(feature = "floats")]
            Number::Float(f) if compiling => self.compile_float(f),
            #[cfg(feature = "floats")]
            Number::Float(f) => self.fpush(f),
            Number::NotANumber => Err(self.undefined(name)),
        }
    }

    /// Report an unknown name and produce the error for it.
    fn undefined(&mut self, name: &[u8]) -> Error {
        let _ = writeln!(self.output, "{} ?", NameDisplay(name));
        Error::UndefinedWord
    }

    fn local_index(&self, name: &[u8]) -> Option<usize> {
        self.compiler
            .local_index(name, self.params.case_insensitive)
    }

    pub(crate) fn require_compile(&self) -> Result<(), Error> {
        match self.mode {
            Mode::Compile => Ok(()),
            Mode::Run => Err(Error::InterpretingCompileOnlyWord),
        }
    }

    /// The next blank delimited word, which must exist.
    fn parse_word_name(&mut self) -> Result<Vec<u8>, Error> {
        let (start, len) = self
            .task
            .input
            .parse_name()
            .replace_err(Error::Throw(throw::ZERO_LENGTH_NAME))?;
        Ok(self.task.input.bytes()[start..start + len].to_vec())
    }

    fn find_xt(&mut self, name: &[u8]) -> Result<Xt, Error> {
        match self.dict.find(name) {
            Lookup::Normal(xt) | Lookup::Immediate(xt) => Ok(xt),
            Lookup::NotFound => Err(self.undefined(name)),
        }
    }

    // -- compiling tokens --

    pub(crate) fn compile_xt(&mut self, xt: Xt) -> Result<(), Error> {
        if xt == Xt::Primitive(Prim::Exit) && self.compiler.frame {
            self.dict.comma_xt(Xt::Primitive(Prim::LocalExit))?;
        }
        self.dict.comma_xt(xt)?;
        Ok(())
    }

    pub(crate) fn compile_literal(&mut self, val: Cell) -> Result<(), Error> {
        self.dict.comma_xt(Xt::Primitive(Prim::Literal))?;
        self.dict.comma(val)?;
        Ok(())
    }

    pub(crate) fn compile_double(&mut self, lo: Cell, hi: Cell) -> Result<(), Error> {
        self.dict.comma_xt(Xt::Primitive(Prim::TwoLiteral))?;
        self.dict.comma(lo)?;
        self.dict.comma(hi)?;
        Ok(())
    }

    // Inline string compiled after `prim`, text up to `delim`.
    fn compile_string(&mut self, prim: Prim, delim: u8) -> Result<(), Error> {
        let (start, len) = self.task.input.parse(delim);
        self.dict.comma_xt(Xt::Primitive(prim))?;
        self.dict
            .counted_string(&self.task.input.bytes()[start..start + len])
            .replace_err(Error::Throw(throw::PARSED_STRING_OVERFLOW))?;
        Ok(())
    }

    // -- defining words --

    /// Start a hidden header for `name`, noting a redefinition.
    fn define(&mut self, name: &[u8]) -> Result<Xt, Error> {
        if self.dict.find_nfa(name).is_some() {
            tracing::info!(name = %NameDisplay(name), "redefined");
            if !self.vars.quiet {
                let _ = writeln!(self.output, "{} redefined.", NameDisplay(name));
            }
        }
        Ok(self.dict.create_entry(name)?)
    }

    pub(crate) fn create(&mut self) -> Result<(), Error> {
        let name = self.parse_word_name()?;
        self.define(&name)?;
        self.dict.comma_xt(Xt::Primitive(Prim::CreateP))?;
        self.dict.comma(0)?;
        self.dict.unsmudge();
        Ok(())
    }

    /// Define a word whose body is `prim` followed by `cells`.
    pub(crate) fn define_with(&mut self, prim: Prim, cells: &[Cell]) -> Result<(), Error> {
        let name = self.parse_word_name()?;
        self.define(&name)?;
        self.dict.comma_xt(Xt::Primitive(prim))?;
        for cell in cells {
            self.dict.comma(*cell)?;
        }
        self.dict.unsmudge();
        Ok(())
    }

    pub(crate) fn colon(&mut self) -> Result<(), Error> {
        let name = self.parse_word_name()?;
        let xt = self.define(&name)?;
        self.start_definition(xt, false);
        Ok(())
    }

    pub(crate) fn colon_noname(&mut self) -> Result<(), Error> {
        self.dict.check_room()?;
        self.dict.align();
        let xt = Xt::Secondary(self.dict.here());
        self.start_definition(xt, true);
        Ok(())
    }

    fn start_definition(&mut self, xt: Xt, noname: bool) {
        self.compiler.reset();
        self.compiler.current = Some(Definition {
            xt,
            depth: self.task.data_stack.depth(),
            noname,
        });
        self.mode = Mode::Compile;
    }

    pub(crate) fn semicolon(&mut self) -> Result<(), Error> {
        self.require_compile()?;
        let def = self.compiler.current.ok_or(Error::ControlMismatch)?;
        self.compile_xt(Xt::Primitive(Prim::Exit))?;
        self.compiler.reset();
        self.mode = Mode::Run;
        if self.task.data_stack.depth() != def.depth {
            return Err(Error::Throw(throw::SEMICOLON));
        }
        if def.noname {
            self.push(def.xt.to_cell())?;
        } else {
            self.dict.unsmudge();
        }
        Ok(())
    }

    pub(crate) fn recurse(&mut self) -> Result<(), Error> {
        self.require_compile()?;
        let def = self.compiler.current.ok_or(Error::ControlMismatch)?;
        self.compile_xt(def.xt)
    }

    pub(crate) fn does(&mut self) -> Result<(), Error> {
        self.require_compile()?;
        if self.compiler.frame {
            self.dict.comma_xt(Xt::Primitive(Prim::LocalExit))?;
            self.compiler.end_locals();
        }
        self.dict.comma_xt(Xt::Primitive(Prim::DoesP))?;
        self.dict.comma_xt(Xt::Primitive(Prim::Exit))?;
        Ok(())
    }

    /// `TO`, `->` and `+->`. Work on locals and VALUEs, in either state.
    pub(crate) fn to(&mut self, plus: bool) -> Result<(), Error> {
        let name = self.parse_word_name()?;
        if self.mode == Mode::Compile {
            if let Some(idx) = self.local_index(&name) {
                let prim = if plus { Prim::LocalPlusStore } else { Prim::LocalStore };
                self.dict.comma_xt(Xt::Primitive(prim))?;
                self.dict.comma(idx as Cell)?;
                return Ok(());
            }
        }
        let xt = self.find_xt(&name)?;
        let addr = self
            .body_if(xt, Prim::ValueP)
            .ok_or(Error::Throw(throw::INVALID_NAME_ARGUMENT))?;
        let store = if plus { Prim::PlusStore } else { Prim::Store };
        self.store_into(addr, store)
    }

    pub(crate) fn is(&mut self) -> Result<(), Error> {
        let name = self.parse_word_name()?;
        let xt = self.find_xt(&name)?;
        let addr = self
            .body_if(xt, Prim::DeferP)
            .ok_or(Error::Throw(throw::DEFERRED))?;
        self.store_into(addr, Prim::Store)
    }

    // Compile `(ALITERAL) addr` and the store, or do the store now.
    fn store_into(&mut self, addr: Cell, store: Prim) -> Result<(), Error> {
        if self.mode == Mode::Compile {
            self.dict.comma_xt(Xt::Primitive(Prim::ALiteral))?;
            self.dict.comma(addr)?;
            self.dict.comma_xt(Xt::Primitive(store))?;
            return Ok(());
        }
        let val = self.pop()?;
        let val = match store {
            Prim::PlusStore => self.fetch(addr)?.wrapping_add(val),
            _ => val,
        };
        self.store(addr, val)
    }

    // Address of the cell after `runtime` when `xt` was made by it.
    fn body_if(&self, xt: Xt, runtime: Prim) -> Option<Cell> {
        let Xt::Secondary(body) = xt else {
            return None;
        };
        let token = self.dict.fetch(body).ok()?;
        (token == Cell::from(runtime.id())).then(|| Region::Code.addr(body + CELL))
    }

    pub(crate) fn postpone(&mut self) -> Result<(), Error> {
        self.require_compile()?;
        let name = self.parse_word_name()?;
        match self.dict.find(&name) {
            Lookup::Immediate(xt) => self.compile_xt(xt),
            Lookup::Normal(xt) => {
                self.compile_literal(xt.to_cell())?;
                self.dict.comma_xt(Xt::Primitive(Prim::CompileComma))?;
                Ok(())
            }
            Lookup::NotFound => Err(self.undefined(&name)),
        }
    }

    pub(crate) fn bracket_compile(&mut self) -> Result<(), Error> {
        self.require_compile()?;
        let name = self.parse_word_name()?;
        let xt = self.find_xt(&name)?;
        self.compile_xt(xt)
    }

    pub(crate) fn tick(&mut self) -> Result<Xt, Error> {
        let name = self.parse_word_name()?;
        self.find_xt(&name)
    }

    pub(crate) fn bracket_tick(&mut self) -> Result<(), Error> {
        self.require_compile()?;
        let xt = self.tick()?;
        self.compile_literal(xt.to_cell())
    }

    /// `{ a b | c -- comment }`
    pub(crate) fn declare_locals(&mut self) -> Result<(), Error> {
        self.require_compile()?;
        if self.compiler.frame {
            return Err(Error::Throw(throw::UNSUPPORTED));
        }
        let mut names: Vec<Vec<u8>> = Vec::new();
        let mut init = None;
        let mut comment = false;
        loop {
            let word = self.parse_word_name().replace_err(Error::ControlMismatch)?;
            match word.as_slice() {
                b"}" => break,
                _ if comment => {}
                b"--" => comment = true,
                b"|" if init.is_none() => init = Some(names.len()),
                _ if names.len() >= MAX_LOCALS => return Err(Error::Throw(throw::UNSUPPORTED)),
                _ => names.push(word.clone()),
            }
        }
        let total = names.len();
        let init = init.unwrap_or(total);
        self.dict.comma_xt(Xt::Primitive(Prim::LocalEntry))?;
        self.dict.comma(((total << 8) | init) as Cell)?;
        self.compiler.frame = true;
        self.compiler.locals = names;
        Ok(())
    }

    // -- control structures --

    fn push_ctrl(&mut self, addr: usize, tag: Cell) -> Result<(), Error> {
        self.push(addr as Cell)?;
        self.push(tag)
    }

    fn pop_ctrl(&mut self, tag: Cell) -> Result<usize, Error> {
        if self.pop()? != tag {
            return Err(Error::ControlMismatch);
        }
        Ok(self.pop()? as UCell as usize)
    }

    /// Compile `prim` with a blank offset, returning the offset's address.
    fn compile_branch(&mut self, prim: Prim) -> Result<usize, Error> {
        self.require_compile()?;
        self.dict.comma_xt(Xt::Primitive(prim))?;
        Ok(self.dict.comma(0)?)
    }

    fn resolve(&mut self, at: usize, target: usize) -> Result<(), Error> {
        let offset = target as Cell - at as Cell;
        Ok(self.dict.store(at, offset)?)
    }

    pub(crate) fn compile_if(&mut self) -> Result<(), Error> {
        let orig = self.compile_branch(Prim::ZeroBranch)?;
        self.push_ctrl(orig, ORIG)
    }

    pub(crate) fn compile_else(&mut self) -> Result<(), Error> {
        self.require_compile()?;
        let prev = self.pop_ctrl(ORIG)?;
        let orig = self.compile_branch(Prim::Branch)?;
        self.resolve(prev, self.dict.here())?;
        self.push_ctrl(orig, ORIG)
    }

    pub(crate) fn compile_then(&mut self) -> Result<(), Error> {
        self.require_compile()?;
        let orig = self.pop_ctrl(ORIG)?;
        self.resolve(orig, self.dict.here())
    }

    pub(crate) fn compile_begin(&mut self) -> Result<(), Error> {
        self.require_compile()?;
        self.push_ctrl(self.dict.here(), DEST)
    }

    /// `AGAIN` and `UNTIL`.
    pub(crate) fn compile_back(&mut self, prim: Prim) -> Result<(), Error> {
        self.require_compile()?;
        let dest = self.pop_ctrl(DEST)?;
        let at = self.compile_branch(prim)?;
        self.resolve(at, dest)
    }

    pub(crate) fn compile_while(&mut self) -> Result<(), Error> {
        self.require_compile()?;
        let dest = self.pop_ctrl(DEST)?;
        let orig = self.compile_branch(Prim::ZeroBranch)?;
        self.push_ctrl(orig, ORIG)?;
        self.push_ctrl(dest, DEST)
    }

    pub(crate) fn compile_repeat(&mut self) -> Result<(), Error> {
        self.compile_back(Prim::Branch)?;
        let orig = self.pop_ctrl(ORIG)?;
        self.resolve(orig, self.dict.here())
    }

    /// `DO` and `?DO`. The loop body starts right after the runtime word.
    pub(crate) fn compile_do(&mut self, prim: Prim) -> Result<(), Error> {
        self.require_compile()?;
        let mut leaves = Vec::new();
        if prim == Prim::QDoP {
            leaves.push(self.compile_branch(prim)?);
        } else {
            self.dict.comma_xt(Xt::Primitive(prim))?;
        }
        self.compiler.leaves.push(leaves);
        self.push_ctrl(self.dict.here(), DO_SYS)
    }

    /// `LOOP` and `+LOOP`.
    pub(crate) fn compile_loop(&mut self, prim: Prim) -> Result<(), Error> {
        self.require_compile()?;
        let dest = self.pop_ctrl(DO_SYS)?;
        let at = self.compile_branch(prim)?;
        self.resolve(at, dest)?;
        let leaves = self.compiler.leaves.pop().unwrap_or_default();
        let end = self.dict.here();
        for leave in leaves {
            self.resolve(leave, end)?;
        }
        Ok(())
    }

    pub(crate) fn compile_leave(&mut self) -> Result<(), Error> {
        self.require_compile()?;
        if self.compiler.leaves.is_empty() {
            return Err(Error::ControlMismatch);
        }
        let at = self.compile_branch(Prim::LeaveP)?;
        if let Some(leaves) = self.compiler.leaves.last_mut() {
            leaves.push(at);
        }
        Ok(())
    }

    // -- parsing words --

    /// `WORD ( char -- c-addr )`: copy the next word into the pocket as a
    /// counted string.
    pub(crate) fn word(&mut self) -> Result<(), Error> {
        let delim = self.pop()? as u8;
        let (start, len) = self.task.input.word(delim);
        if len > u8::MAX as usize {
            return Err(Error::Throw(throw::PARSED_STRING_OVERFLOW));
        }
        let task = &mut self.task;
        task.pocket[0] = len as u8;
        task.pocket[1..=len].copy_from_slice(&task.input.bytes()[start..start + len]);
        self.push(POCKET_BASE as Cell)
    }

    pub(crate) fn parse_char(&mut self) -> Result<Cell, Error> {
        let name = self.parse_word_name()?;
        Ok(Cell::from(name[0]))
    }

    pub(crate) fn s_quote(&mut self) -> Result<(), Error> {
        if self.mode == Mode::Compile {
            return self.compile_string(Prim::SQuoteP, b'"');
        }
        let (start, len) = self.task.input.parse(b'"');
        if len > SCRATCH_SIZE {
            return Err(Error::Throw(throw::PARSED_STRING_OVERFLOW));
        }
        let task = &mut self.task;
        let off = task.next_scratch();
        task.scratch[off..off + len].copy_from_slice(&task.input.bytes()[start..start + len]);
        self.push(Region::Scratch.addr(off))?;
        self.push(len as Cell)
    }

    pub(crate) fn c_quote(&mut self) -> Result<(), Error> {
        self.require_compile()?;
        self.compile_string(Prim::CQuoteP, b'"')
    }

    pub(crate) fn dot_quote(&mut self) -> Result<(), Error> {
        if self.mode == Mode::Compile {
            return self.compile_string(Prim::DotQuoteP, b'"');
        }
        let (start, len) = self.task.input.parse(b'"');
        self.output
            .push_bstr(&self.task.input.bytes()[start..start + len]);
        Ok(())
    }

    pub(crate) fn abort_quote(&mut self) -> Result<(), Error> {
        self.require_compile()?;
        self.compile_string(Prim::AbortQuoteP, b'"')
    }

    /// `NUMBER? ( c-addr -- 0 | n 1 | d 2 )` on a counted string.
    pub(crate) fn number_q(&mut self) -> Result<(), Error> {
        let text = self.counted_at_top()?;
        match number::convert(&text, self.vars.base) {
            Number::Single(n) => {
                self.push(n)?;
                self.push(1)
            }
            Number::Double(d) => {
                self.push_double(d)?;
                self.push(2)
            }
            _ => self.push(0),
        }
    }

    // -- dictionary words --

    // Pops a counted string address, leaving it readable as bytes.
    fn counted_at_top(&mut self) -> Result<Vec<u8>, Error> {
        let addr = self.pop()?;
        let len = self.c_fetch(addr)?;
        self.read_bytes(addr.wrapping_add(1), usize::from(len))
    }

    /// `FIND ( c-addr -- c-addr 0 | xt 1 | xt -1 )`
    pub(crate) fn find_word(&mut self) -> Result<(), Error> {
        let addr = self.task.data_stack.try_peek()?;
        let name = self.counted_at_top()?;
        match self.dict.find(&name) {
            Lookup::Immediate(xt) => {
                self.push(xt.to_cell())?;
                self.push(1)
            }
            Lookup::Normal(xt) => {
                self.push(xt.to_cell())?;
                self.push(-1)
            }
            Lookup::NotFound => {
                self.push(addr)?;
                self.push(0)
            }
        }
    }

    /// `FINDNFA ( c-addr -- c-addr 0 | nfa 1 | nfa -1 )`
    pub(crate) fn find_nfa(&mut self) -> Result<(), Error> {
        let addr = self.task.data_stack.try_peek()?;
        let name = self.counted_at_top()?;
        let found = self
            .dict
            .find_nfa(&name)
            .and_then(|nfa| self.dict.entry(nfa))
            .map(|e| (e.nfa, e.is_immediate()));
        match found {
            Some((nfa, immediate)) => {
                self.push(Region::Name.addr(nfa))?;
                self.push(if immediate { 1 } else { -1 })
            }
            None => {
                self.push(addr)?;
                self.push(0)
            }
        }
    }

    fn pop_nfa(&mut self) -> Result<usize, Error> {
        let addr = self.pop()?;
        match Region::split(addr as UCell) {
            Some((Region::Name, nfa)) if self.dict.entry(nfa).is_some() => Ok(nfa),
            _ => Err(Error::InvalidAddress(addr as UCell)),
        }
    }

    /// `NAME> ( nfa -- xt )`
    pub(crate) fn name_from(&mut self) -> Result<(), Error> {
        let nfa = self.pop_nfa()?;
        let xt = self.dict.entry(nfa).map(|e| e.xt).unwrap_or_default();
        self.push(xt)
    }

    /// `>NAME ( xt -- nfa | 0 )`
    pub(crate) fn to_name(&mut self) -> Result<(), Error> {
        let xt = self.pop_xt()?;
        let nfa = self.dict.name_of(xt).map_or(0, |nfa| Region::Name.addr(nfa));
        self.push(nfa)
    }

    pub(crate) fn id_dot(&mut self) -> Result<(), Error> {
        let nfa = self.pop_nfa()?;
        if let Some(entry) = self.dict.entry(nfa) {
            self.output.push_bstr(entry.name);
        }
        Ok(())
    }

    pub(crate) fn prev_name(&mut self) -> Result<(), Error> {
        let nfa = self.pop_nfa()?;
        let prev = self.dict.prev_name(nfa).map_or(0, |nfa| Region::Name.addr(nfa));
        self.push(prev)
    }

    pub(crate) fn words(&mut self) {
        for entry in self.dict.entries().filter(|e| !e.is_hidden()) {
            self.output.push_bstr(entry.name);
            self.output.emit(b' ');
            if self.output.column() > 64 {
                self.output.push_str("\n");
            }
        }
        if self.output.column() != 0 {
            self.output.push_str("\n");
        }
    }
}

#[cfg(test)]
pub mod test {
    use crate::{testutil::blocking_runtest, throw, Forth, ForthParams};

    #[test]
    fn control_structures() {
        blocking_runtest(
            r#"
            > : SIGN DUP 0< IF DROP -1 ELSE 0> IF 1 ELSE 0 THEN THEN ;
            > -5 SIGN . 0 SIGN . 7 SIGN .
            < -1 0 1 ok.
            > : COUNT-UP 0 BEGIN DUP 5 < WHILE 1+ DUP . REPEAT DROP ;
            > COUNT-UP
            < 1 2 3 4 5 ok.
            > : FOREVER 0 BEGIN 1+ DUP 3 = IF EXIT THEN AGAIN ;
            > FOREVER .
            < 3 ok.
            x : BROKEN IF ;
            x : SWAPPED BEGIN THEN ;
            x THEN
            "#,
        );
    }

    #[test]
    fn defining_words() {
        blocking_runtest(
            r#"
            > 5 VALUE FIVE FIVE .
            < 5 ok.
            > 7 TO FIVE FIVE .
            < 7 ok.
            > : BUMP 10 +-> FIVE ; BUMP FIVE .
            < 17 ok.
            > 1 2 2CONSTANT PAIR PAIR . .
            < 2 1 ok.
            > DEFER GREET
            > GREET
            > : HI ." hi" ; ' HI IS GREET GREET
            < hiok.
            > : CONST CREATE , DOES> @ ;
            > 42 CONST ANSWER ANSWER .
            < 42 ok.
            > ' ANSWER >BODY @ .
            < 42 ok.
            > :NONAME 3 4 + ; EXECUTE .
            < 7 ok.
            > : FACT DUP 1 > IF DUP 1- RECURSE * THEN ; 5 FACT .
            < 120 ok.
            x 3 TO GREET
            x ' GREET IS FIVE
            x ' + >BODY
            "#,
        );
    }

    #[test]
    fn locals() {
        blocking_runtest(
            r#"
            > : DIFF { a b -- a-b } a b - ;
            > 10 3 DIFF .
            < 7 ok.
            > : ACC { n | total -- } n 0 DO I +-> total LOOP total ;
            > 5 ACC .
            < 10 ok.
            > : SWAPPY { x y } y -> x x y + x ;
            > 1 2 SWAPPY . .
            < 2 4 ok.
            > : EARLY { x } x 0< IF -1 EXIT THEN x ;
            > -3 EARLY . 4 EARLY .
            < -1 4 ok.
            "#,
        );
    }

    #[test]
    fn parsing_words() {
        blocking_runtest(
            r#"
            > CHAR A . : AT [CHAR] @ ; AT .
            < 65 64 ok.
            > S" hello" TYPE
            < hellook.
            > : GREETING S" hi there" ; GREETING TYPE
            < hi thereok.
            > : CNT C" abc" COUNT . DROP ; CNT
            < 3 ok.
            > 32 WORD  spaced COUNT TYPE
            < spacedok.
            > .( now) ( ignored ) 1 . \ also ignored
            < now1 ok.
            > : NUM C" 1F" ; HEX NUM NUMBER? DECIMAL . .
            < 1 31 ok.
            "#,
        );
    }

    #[test]
    fn interpreted_strings_alternate_buffers() {
        blocking_runtest(
            r#"
            > S" abc" S" xyz" 2SWAP TYPE TYPE
            < abcxyzok.
            > S" one" S" two" S" three" TYPE TYPE 2DROP
            < threetwook.
            "#,
        );
    }

    #[test]
    fn postpone_and_literals() {
        blocking_runtest(
            r#"
            > : MY-IF POSTPONE IF ; IMMEDIATE
            > : TEST MY-IF 1 ELSE 2 THEN ; 0 TEST . -1 TEST .
            < 2 1 ok.
            > : PLUS POSTPONE + ; IMMEDIATE
            > : ADDER PLUS ; 3 4 ADDER .
            < 7 ok.
            > : LIT [ 6 7 * ] LITERAL ; LIT .
            < 42 ok.
            > : DLIT [ 1. ] 2LITERAL ; DLIT D.
            < 1 ok.
            > : TK ['] DUP ; 5 TK EXECUTE . .
            < 5 5 ok.
            "#,
        );
    }

    #[test]
    fn dictionary_words() {
        blocking_runtest(
            r#"
            > ' DUP >NAME ID.
            < DUPok.
            > ' DUP >NAME NAME> ' DUP = .
            < -1 ok.
            > : HIDDEN-TEST ; LATEST ID.
            < HIDDEN-TESTok.
            "#,
        );
    }

    #[test]
    fn unbalanced_definitions_stay_hidden() {
        let mut forth = Forth::new(ForthParams::default(), (), &[]).unwrap();
        forth.fill_input(": KEEP 1 ;").unwrap();
        forth.process_line().unwrap();
        forth.fill_input(": KEEP 2 IF ;").unwrap();
        let err = forth.process_line().unwrap_err();
        assert_eq!(err.code(), throw::SEMICOLON);
        forth.output.clear();
        forth.fill_input("KEEP .").unwrap();
        forth.process_line().unwrap();
        assert_eq!(forth.output.as_str(), "1 ok.\n");
    }

    #[test]
    fn redefinition_keeps_old_callers() {
        let mut forth = Forth::new(ForthParams::default(), (), &[]).unwrap();
        for line in [": A 1 ;", ": B A ;", ": A 2 ;"] {
            forth.fill_input(line).unwrap();
            forth.process_line().unwrap();
        }
        assert!(forth.output.as_str().contains("A redefined."));
        forth.output.clear();
        forth.fill_input("A . B .").unwrap();
        forth.process_line().unwrap();
        assert_eq!(forth.output.as_str(), "2 1 ok.\n");
    }
}
