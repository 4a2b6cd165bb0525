//! The address space seen by Forth code.
//!
//! Addresses are cells. The top nibble picks a region and the rest is an
//! offset into it, so `@`, `!`, `MOVE` and friends can reach the code and
//! name arenas, the task buffers, the system variables and the heap
//! without any of them having a real pointer.

use alloc::vec::Vec;

use crate::{
    dictionary::{read_cell, CODE_START},
    heap::Heap,
    host::Host,
    token::Prim,
    vm::Forth,
    Cell, Error, Mode, UCell, CELL,
};

pub const CODE_BASE: UCell = 0x0000_0000;
pub const NAME_BASE: UCell = 0x1000_0000;
pub const TIB_BASE: UCell = 0x2000_0000;
pub const POCKET_BASE: UCell = 0x2100_0000;
pub const PAD_BASE: UCell = 0x2200_0000;
pub const SCRATCH_BASE: UCell = 0x2300_0000;
pub const USER_BASE: UCell = 0x3000_0000;
pub const HEAP_BASE: UCell = 0x4000_0000;

const REGION_MASK: UCell = 0xF000_0000;
const TASK_MASK: UCell = 0xFF00_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Code,
    Name,
    Tib,
    Pocket,
    Pad,
    Scratch,
    User,
    Heap,
}

impl Region {
    pub fn base(self) -> UCell {
        match self {
            Region::Code => CODE_BASE,
            Region::Name => NAME_BASE,
            Region::Tib => TIB_BASE,
            Region::Pocket => POCKET_BASE,
            Region::Pad => PAD_BASE,
            Region::Scratch => SCRATCH_BASE,
            Region::User => USER_BASE,
            Region::Heap => HEAP_BASE,
        }
    }

    /// Split an address into its region and offset.
    pub fn split(addr: UCell) -> Option<(Region, usize)> {
        let region = match addr & REGION_MASK {
            CODE_BASE => Region::Code,
            NAME_BASE => Region::Name,
            USER_BASE => Region::User,
            HEAP_BASE => Region::Heap,
            TIB_BASE => match addr & TASK_MASK {
                TIB_BASE => Region::Tib,
                POCKET_BASE => Region::Pocket,
                PAD_BASE => Region::Pad,
                SCRATCH_BASE => Region::Scratch,
                _ => return None,
            },
            _ => return None,
        };
        Some((region, (addr - region.base()) as usize))
    }

    #[inline]
    pub fn addr(self, offset: usize) -> Cell {
        self.base().wrapping_add(offset as UCell) as Cell
    }
}

macro_rules! user_vars {
    ($( $var:ident => $prim:ident ),* $(,)?) => {
        /// The system variables, in address order.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum UserVar {
            $( $var, )*
        }

        impl UserVar {
            pub const ALL: &'static [UserVar] = &[ $( UserVar::$var, )* ];

            pub fn from_prim(p: Prim) -> Option<Self> {
                match p {
                    $( Prim::$prim => Some(UserVar::$var), )*
                    _ => None,
                }
            }
        }
    };
}

user_vars! {
    Base => VarBase,
    State => VarState,
    ToIn => VarToIn,
    NumTib => VarNumTib,
    Echo => VarEcho,
    Out => VarOut,
    ByeCode => VarByeCode,
    ReturnCode => VarReturnCode,
    Context => VarContext,
    Dp => VarDp,
    HeadersPtr => VarHeadersPtr,
    HeadersBase => VarHeadersBase,
    HeadersLimit => VarHeadersLimit,
    CodeBase => VarCodeBase,
    CodeLimit => VarCodeLimit,
    TraceFlags => VarTraceFlags,
    TraceLevel => VarTraceLevel,
    TraceStack => VarTraceStack,
    Quiet => VarQuiet,
}

impl UserVar {
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    #[inline]
    pub fn addr(self) -> Cell {
        Region::User.addr(self.index() * CELL)
    }

    pub fn from_offset(offset: usize) -> Option<Self> {
        if offset % CELL != 0 {
            return None;
        }
        UserVar::ALL.get(offset / CELL).copied()
    }
}

/// Values behind the system variables that are not owned by some other
/// part of the VM.
#[derive(Debug, Clone)]
pub(crate) struct Vars {
    pub base: UCell,
    pub echo: Cell,
    pub bye_code: Cell,
    pub return_code: Cell,
    pub trace_flags: Cell,
    pub trace_level: Cell,
    pub trace_stack: Cell,
    pub quiet: bool,
}

impl Default for Vars {
    fn default() -> Self {
        Self {
            base: 10,
            echo: 0,
            bye_code: 0,
            return_code: 0,
            trace_flags: 0,
            trace_level: 0,
            trace_stack: 0,
            quiet: false,
        }
    }
}

impl<T: Host + 'static> Forth<T> {
    pub fn user_fetch(&self, var: UserVar) -> Cell {
        match var {
            UserVar::Base => self.vars.base as Cell,
            UserVar::State => crate::flag(self.mode == Mode::Compile),
            UserVar::ToIn => self.task.input.to_in() as Cell,
            UserVar::NumTib => self.task.input.len() as Cell,
            UserVar::Echo => self.vars.echo,
            UserVar::Out => self.output.column() as Cell,
            UserVar::ByeCode => self.vars.bye_code,
            UserVar::ReturnCode => self.vars.return_code,
            UserVar::Context => match self.dict.latest() {
                0 => 0,
                nfa => Region::Name.addr(nfa),
            },
            UserVar::Dp => Region::Code.addr(self.dict.here()),
            UserVar::HeadersPtr => Region::Name.addr(self.dict.hp()),
            UserVar::HeadersBase => Region::Name.addr(0),
            UserVar::HeadersLimit => Region::Name.addr(self.dict.name_limit()),
            UserVar::CodeBase => Region::Code.addr(CODE_START),
            UserVar::CodeLimit => Region::Code.addr(self.dict.code_limit()),
            UserVar::TraceFlags => self.vars.trace_flags,
            UserVar::TraceLevel => self.vars.trace_level,
            UserVar::TraceStack => self.vars.trace_stack,
            UserVar::Quiet => crate::flag(self.vars.quiet),
        }
    }

    pub fn user_store(&mut self, var: UserVar, val: Cell) -> Result<(), Error> {
        match var {
            UserVar::Base => self.vars.base = val as UCell,
            UserVar::State => {
                self.mode = if val != 0 { Mode::Compile } else { Mode::Run };
            }
            UserVar::ToIn => self.task.input.set_to_in(val.max(0) as usize),
            UserVar::NumTib => self.task.input.set_len(val.max(0) as usize),
            UserVar::Echo => self.vars.echo = val,
            UserVar::Out => self.output.set_column(val.max(0) as usize),
            UserVar::ByeCode => self.vars.bye_code = val,
            UserVar::ReturnCode => self.vars.return_code = val,
            UserVar::Context => {
                let nfa = match val {
                    0 => 0,
                    addr => self.region_offset(addr, Region::Name)?,
                };
                self.dict.set_latest(nfa)?;
            }
            UserVar::Dp => {
                let dp = self.region_offset(val, Region::Code)?;
                self.dict.set_here(dp)?;
            }
            UserVar::HeadersPtr => {
                let hp = self.region_offset(val, Region::Name)?;
                self.dict.set_hp(hp)?;
            }
            UserVar::HeadersBase
            | UserVar::HeadersLimit
            | UserVar::CodeBase
            | UserVar::CodeLimit => return Err(Error::Throw(crate::throw::UNSUPPORTED)),
            UserVar::TraceFlags => self.vars.trace_flags = val,
            UserVar::TraceLevel => self.vars.trace_level = val,
            UserVar::TraceStack => self.vars.trace_stack = val,
            UserVar::Quiet => self.vars.quiet = val != 0,
        }
        Ok(())
    }

    fn region_offset(&self, addr: Cell, want: Region) -> Result<usize, Error> {
        match Region::split(addr as UCell) {
            Some((region, off)) if region == want => Ok(off),
            _ => Err(Error::InvalidAddress(addr as UCell)),
        }
    }

    /// Borrow `len` bytes starting at `addr`.
    pub fn bytes(&self, addr: Cell, len: usize) -> Result<&[u8], Error> {
        let bad = Error::InvalidAddress(addr as UCell);
        let (region, off) = Region::split(addr as UCell).ok_or(bad)?;
        let end = off.checked_add(len).ok_or(bad)?;
        let found = match region {
            Region::Code => self.dict.code().get(off..end),
            Region::Name => self.dict.names().get(off..end),
            Region::Tib => self.task.input.bytes().get(off..end),
            Region::Pocket => self.task.pocket.get(off..end),
            Region::Pad => self.task.pad.get(off..end),
            Region::Scratch => self.task.scratch.get(off..end),
            Region::User => None,
            Region::Heap => self.heap.bytes(off, len),
        };
        found.ok_or(bad)
    }

    pub fn bytes_mut(&mut self, addr: Cell, len: usize) -> Result<&mut [u8], Error> {
        let bad = Error::InvalidAddress(addr as UCell);
        let (region, off) = Region::split(addr as UCell).ok_or(bad)?;
        let end = off.checked_add(len).ok_or(bad)?;
        let found = match region {
            Region::Code => self.dict.code_mut().get_mut(off..end),
            Region::Name => self.dict.names_mut().get_mut(off..end),
            Region::Tib => self.task.input.bytes_mut().get_mut(off..end),
            Region::Pocket => self.task.pocket.get_mut(off..end),
            Region::Pad => self.task.pad.get_mut(off..end),
            Region::Scratch => self.task.scratch.get_mut(off..end),
            Region::User => None,
            Region::Heap => self.heap.bytes_mut(off, len),
        };
        found.ok_or(bad)
    }

    /// Copy of the bytes at `addr`, for when the source and destination of
    /// an operation may be the same region.
    pub fn read_bytes(&self, addr: Cell, len: usize) -> Result<Vec<u8>, Error> {
        self.bytes(addr, len).map(<[u8]>::to_vec)
    }

    pub fn write_bytes(&mut self, addr: Cell, data: &[u8]) -> Result<(), Error> {
        self.bytes_mut(addr, data.len())?.copy_from_slice(data);
        Ok(())
    }

    fn user_var_at(addr: Cell) -> Option<UserVar> {
        match Region::split(addr as UCell)? {
            (Region::User, off) => UserVar::from_offset(off),
            _ => None,
        }
    }

    pub fn fetch(&self, addr: Cell) -> Result<Cell, Error> {
        if let Some(var) = Self::user_var_at(addr) {
            return Ok(self.user_fetch(var));
        }
        let bytes = self.bytes(addr, CELL)?;
        read_cell(bytes, 0).ok_or(Error::InvalidAddress(addr as UCell))
    }

    pub fn store(&mut self, addr: Cell, val: Cell) -> Result<(), Error> {
        if let Some(var) = Self::user_var_at(addr) {
            return self.user_store(var, val);
        }
        self.write_bytes(addr, &val.to_ne_bytes())
    }

    pub fn c_fetch(&self, addr: Cell) -> Result<u8, Error> {
        Ok(self.bytes(addr, 1)?[0])
    }

    pub fn c_store(&mut self, addr: Cell, val: u8) -> Result<(), Error> {
        self.bytes_mut(addr, 1)?[0] = val;
        Ok(())
    }

    pub fn w_fetch(&self, addr: Cell) -> Result<u16, Error> {
        let b = self.bytes(addr, 2)?;
        Ok(u16::from_ne_bytes([b[0], b[1]]))
    }

    pub fn w_store(&mut self, addr: Cell, val: u16) -> Result<(), Error> {
        self.write_bytes(addr, &val.to_ne_bytes())
    }
}

#[cfg(test)]
pub mod test {
    use super::*;

    #[test]
    fn regions_split() {
        assert_eq!(Region::split(0x200), Some((Region::Code, 0x200)));
        assert_eq!(Region::split(NAME_BASE + 12), Some((Region::Name, 12)));
        assert_eq!(Region::split(PAD_BASE + 3), Some((Region::Pad, 3)));
        assert_eq!(Region::split(0x2400_0000), None);
        assert_eq!(Region::split(0x8000_0000), None);
        assert_eq!(Region::split(UserVar::Base.addr() as UCell), Some((Region::User, 0)));
    }

    #[test]
    fn user_vars_are_dense() {
        for (idx, var) in UserVar::ALL.iter().enumerate() {
            assert_eq!(var.index(), idx);
            assert_eq!(UserVar::from_offset(idx * CELL), Some(*var));
        }
        assert_eq!(UserVar::from_offset(1), None);
        assert_eq!(UserVar::from_prim(Prim::VarState), Some(UserVar::State));
        assert_eq!(UserVar::from_prim(Prim::Dup), None);
    }
}
