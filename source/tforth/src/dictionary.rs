//! The dictionary: header records in name space, threaded code and data in
//! code space.
//!
//! Both regions are plain byte arenas and everything stored in them is an
//! offset from the start of its own region, so a dictionary can be written
//! out and read back in without any fix-ups.

use alloc::{boxed::Box, vec, vec::Vec};

use crate::{
    token::{Xt, PRIMITIVE_LIMIT},
    Cell, CELL,
};

/// Precedence bit, kept for image compatibility.
pub const FLAG_PRECEDENCE: u8 = 0x80;
pub const FLAG_IMMEDIATE: u8 = 0x40;
/// Set while a definition is under construction.
pub const FLAG_SMUDGE: u8 = 0x20;
pub const NAME_SIZE_MASK: u8 = 0x1F;
pub const MAX_NAME_LEN: usize = NAME_SIZE_MASK as usize;

/// Headroom that must remain in both regions before a new definition is
/// started.
pub const DIC_SAFETY_MARGIN: usize = 400;

/// First name space offset handed out. Offset 0 is the end of the chain.
pub const NAME_START: usize = CELL;
/// First code space offset handed out. Everything below is primitive ids.
pub const CODE_START: usize = PRIMITIVE_LIMIT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DictError {
    NameTooLong,
    ZeroLengthName,
    HeaderRoom,
    CodeRoom,
    OutOfRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    NotFound,
    Normal(Xt),
    Immediate(Xt),
}

/// A view of one header.
#[derive(Debug, Clone, Copy)]
pub struct Entry<'a> {
    pub nfa: usize,
    pub name: &'a [u8],
    pub xt: Cell,
    pub flags: u8,
}

impl Entry<'_> {
    #[inline]
    pub fn is_immediate(&self) -> bool {
        self.flags & FLAG_IMMEDIATE != 0
    }

    #[inline]
    pub fn is_hidden(&self) -> bool {
        self.flags & FLAG_SMUDGE != 0
    }
}

#[inline]
pub const fn align_up(n: usize) -> usize {
    (n + CELL - 1) & !(CELL - 1)
}

pub struct Dictionary {
    names: Box<[u8]>,
    hp: usize,
    code: Box<[u8]>,
    dp: usize,
    latest: usize,
    case_insensitive: bool,
}

impl Dictionary {
    pub fn new(name_size: usize, code_size: usize, case_insensitive: bool) -> Self {
        Self {
            names: vec![0; name_size.max(NAME_START)].into_boxed_slice(),
            hp: NAME_START,
            code: vec![0; code_size.max(CODE_START)].into_boxed_slice(),
            dp: CODE_START,
            latest: 0,
            case_insensitive,
        }
    }

    /// Rebuild a dictionary from region snapshots, as read from an image.
    ///
    /// The snapshots are extended to the requested sizes. Pointers outside
    /// their region are refused.
    pub fn from_parts(
        mut names: Vec<u8>,
        name_size: usize,
        hp: usize,
        mut code: Vec<u8>,
        code_size: usize,
        dp: usize,
        latest: usize,
        case_insensitive: bool,
    ) -> Result<Self, DictError> {
        names.resize(name_size.max(names.len()), 0);
        code.resize(code_size.max(code.len()).max(CODE_START), 0);
        let names_ok = names.is_empty() || (hp >= NAME_START && hp <= names.len());
        let code_ok = (CODE_START..=code.len()).contains(&dp);
        let latest_ok = latest == 0 || latest < hp;
        if !(names_ok && code_ok && latest_ok) {
            return Err(DictError::OutOfRange);
        }
        Ok(Self {
            names: names.into_boxed_slice(),
            hp: hp.max(NAME_START.min(name_size)),
            code: code.into_boxed_slice(),
            dp,
            latest,
            case_insensitive,
        })
    }

    // -- name space --

    /// NFA of the newest entry, 0 when the dictionary is empty.
    #[inline]
    pub fn latest(&self) -> usize {
        self.latest
    }

    #[inline]
    pub fn set_latest(&mut self, nfa: usize) -> Result<(), DictError> {
        if nfa != 0 && nfa >= self.hp {
            return Err(DictError::OutOfRange);
        }
        self.latest = nfa;
        Ok(())
    }

    /// Next free name space offset.
    #[inline]
    pub fn hp(&self) -> usize {
        self.hp
    }

    pub fn set_hp(&mut self, hp: usize) -> Result<(), DictError> {
        if hp < NAME_START || hp > self.names.len() {
            return Err(DictError::OutOfRange);
        }
        self.hp = hp;
        Ok(())
    }

    #[inline]
    pub fn name_limit(&self) -> usize {
        self.names.len()
    }

    /// Does this image carry headers at all? Turnkey images do not.
    #[inline]
    pub fn has_names(&self) -> bool {
        self.names.len() > NAME_START
    }

    #[inline]
    pub fn names(&self) -> &[u8] {
        &self.names
    }

    #[inline]
    pub fn names_mut(&mut self) -> &mut [u8] {
        &mut self.names
    }

    pub fn check_room(&self) -> Result<(), DictError> {
        if self.names.len().saturating_sub(self.hp) < DIC_SAFETY_MARGIN {
            return Err(DictError::HeaderRoom);
        }
        if self.code.len().saturating_sub(self.dp) < DIC_SAFETY_MARGIN {
            return Err(DictError::CodeRoom);
        }
        Ok(())
    }

    /// Append a hidden header for a new secondary whose body starts at the
    /// (aligned) end of code space.
    pub fn create_entry(&mut self, name: &[u8]) -> Result<Xt, DictError> {
        self.check_name(name)?;
        self.check_room()?;
        self.align();
        let xt = Xt::Secondary(self.dp);
        self.push_header(name, xt.to_cell(), FLAG_SMUDGE)?;
        Ok(xt)
    }

    /// Append a visible header naming an existing token.
    pub fn create_alias(&mut self, name: &[u8], xt: Xt, immediate: bool) -> Result<usize, DictError> {
        self.check_name(name)?;
        let flags = if immediate { FLAG_IMMEDIATE } else { 0 };
        self.push_header(name, xt.to_cell(), flags)
    }

    fn check_name(&self, name: &[u8]) -> Result<(), DictError> {
        match name.len() {
            0 => Err(DictError::ZeroLengthName),
            n if n > MAX_NAME_LEN => Err(DictError::NameTooLong),
            _ => Ok(()),
        }
    }

    fn push_header(&mut self, name: &[u8], xt: Cell, flags: u8) -> Result<usize, DictError> {
        let hp = align_up(self.hp);
        let nfa = hp + 2 * CELL;
        let end = align_up(nfa + 1 + name.len());
        if end > self.names.len() {
            return Err(DictError::HeaderRoom);
        }
        write_cell(&mut self.names, hp, self.latest as Cell);
        write_cell(&mut self.names, hp + CELL, xt);
        self.names[nfa] = name.len() as u8 | flags;
        self.names[nfa + 1..nfa + 1 + name.len()].copy_from_slice(name);
        self.names[nfa + 1 + name.len()..end].fill(0);
        self.hp = end;
        self.latest = nfa;
        tracing::trace!(nfa, name = %NameDisplay(name), "header");
        Ok(nfa)
    }

    fn set_flag(&mut self, nfa: usize, flag: u8, on: bool) {
        if let Some(byte) = self.names.get_mut(nfa) {
            if on {
                *byte |= flag;
            } else {
                *byte &= !flag;
            }
        }
    }

    /// Reveal the latest entry.
    pub fn unsmudge(&mut self) {
        if self.latest != 0 {
            self.set_flag(self.latest, FLAG_SMUDGE, false);
        }
    }

    /// Mark the latest entry immediate.
    pub fn immediate(&mut self) {
        if self.latest != 0 {
            self.set_flag(self.latest, FLAG_IMMEDIATE, true);
        }
    }

    pub fn entry(&self, nfa: usize) -> Option<Entry<'_>> {
        if nfa < 2 * CELL || nfa >= self.hp {
            return None;
        }
        let flags = *self.names.get(nfa)?;
        let len = (flags & NAME_SIZE_MASK) as usize;
        let name = self.names.get(nfa + 1..nfa + 1 + len)?;
        Some(Entry {
            nfa,
            name,
            xt: read_cell(&self.names, nfa - CELL)?,
            flags: flags & !NAME_SIZE_MASK,
        })
    }

    /// The entry defined just before `nfa`.
    pub fn prev_name(&self, nfa: usize) -> Option<usize> {
        if nfa < 2 * CELL || nfa >= self.hp {
            return None;
        }
        match read_cell(&self.names, nfa - 2 * CELL)? as usize {
            0 => None,
            prev if prev < nfa => Some(prev),
            // links only ever point backwards, anything else is corrupt
            _ => None,
        }
    }

    /// Every entry, newest first, hidden ones included.
    pub fn entries(&self) -> impl Iterator<Item = Entry<'_>> + '_ {
        let first = if self.latest == 0 { None } else { Some(self.latest) };
        core::iter::successors(first, move |nfa| self.prev_name(*nfa))
            .filter_map(move |nfa| self.entry(nfa))
    }

    fn names_match(&self, a: &[u8], b: &[u8]) -> bool {
        if self.case_insensitive {
            a.eq_ignore_ascii_case(b)
        } else {
            a == b
        }
    }

    /// NFA of the newest visible entry called `name`.
    pub fn find_nfa(&self, name: &[u8]) -> Option<usize> {
        self.entries()
            .find(|e| !e.is_hidden() && self.names_match(e.name, name))
            .map(|e| e.nfa)
    }

    pub fn find(&self, name: &[u8]) -> Lookup {
        let Some(entry) = self
            .entries()
            .find(|e| !e.is_hidden() && self.names_match(e.name, name))
        else {
            return Lookup::NotFound;
        };
        match Xt::from_cell(entry.xt) {
            Ok(xt) if entry.is_immediate() => Lookup::Immediate(xt),
            Ok(xt) => Lookup::Normal(xt),
            Err(_) => Lookup::NotFound,
        }
    }

    /// NFA of the newest entry for `xt`.
    pub fn name_of(&self, xt: Xt) -> Option<usize> {
        let cell = xt.to_cell();
        self.entries().find(|e| e.xt == cell).map(|e| e.nfa)
    }

    /// The token of the newest entry, hidden or not.
    pub fn latest_xt(&self) -> Option<Xt> {
        let entry = self.entry(self.latest)?;
        Xt::from_cell(entry.xt).ok()
    }

    // -- code space --

    #[inline]
    pub fn here(&self) -> usize {
        self.dp
    }

    pub fn set_here(&mut self, dp: usize) -> Result<(), DictError> {
        if !(CODE_START..=self.code.len()).contains(&dp) {
            return Err(DictError::OutOfRange);
        }
        self.dp = dp;
        Ok(())
    }

    #[inline]
    pub fn code_limit(&self) -> usize {
        self.code.len()
    }

    #[inline]
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    #[inline]
    pub fn code_mut(&mut self) -> &mut [u8] {
        &mut self.code
    }

    pub fn align(&mut self) {
        let aligned = align_up(self.dp).min(self.code.len());
        self.code[self.dp..aligned].fill(0);
        self.dp = aligned;
    }

    /// Move `HERE` by `n` bytes, which may be negative.
    pub fn allot(&mut self, n: Cell) -> Result<(), DictError> {
        let new = self.dp as i64 + n as i64;
        if new < CODE_START as i64 {
            return Err(DictError::OutOfRange);
        }
        if new > self.code.len() as i64 {
            return Err(DictError::CodeRoom);
        }
        self.dp = new as usize;
        Ok(())
    }

    fn reserve(&mut self, n: usize) -> Result<usize, DictError> {
        let at = self.dp;
        if at + n > self.code.len() {
            return Err(DictError::CodeRoom);
        }
        self.dp += n;
        Ok(at)
    }

    pub fn comma(&mut self, val: Cell) -> Result<usize, DictError> {
        let at = self.reserve(CELL)?;
        write_cell(&mut self.code, at, val);
        Ok(at)
    }

    pub fn comma_xt(&mut self, xt: Xt) -> Result<usize, DictError> {
        self.comma(xt.to_cell())
    }

    pub fn c_comma(&mut self, val: u8) -> Result<usize, DictError> {
        let at = self.reserve(1)?;
        self.code[at] = val;
        Ok(at)
    }

    pub fn w_comma(&mut self, val: u16) -> Result<usize, DictError> {
        let at = self.reserve(2)?;
        self.code[at..at + 2].copy_from_slice(&val.to_ne_bytes());
        Ok(at)
    }

    /// Lay down a counted string and realign.
    pub fn counted_string(&mut self, s: &[u8]) -> Result<usize, DictError> {
        if s.len() > u8::MAX as usize {
            return Err(DictError::NameTooLong);
        }
        let at = self.c_comma(s.len() as u8)?;
        let body = self.reserve(s.len())?;
        self.code[body..body + s.len()].copy_from_slice(s);
        self.align();
        Ok(at)
    }

    #[inline]
    pub fn fetch(&self, off: usize) -> Result<Cell, DictError> {
        read_cell(&self.code, off).ok_or(DictError::OutOfRange)
    }

    #[inline]
    pub fn store(&mut self, off: usize, val: Cell) -> Result<(), DictError> {
        if off + CELL > self.code.len() {
            return Err(DictError::OutOfRange);
        }
        write_cell(&mut self.code, off, val);
        Ok(())
    }
}

#[inline]
pub(crate) fn read_cell(buf: &[u8], off: usize) -> Option<Cell> {
    let bytes = buf.get(off..off.checked_add(CELL)?)?;
    let mut arr = [0u8; CELL];
    arr.copy_from_slice(bytes);
    Some(Cell::from_ne_bytes(arr))
}

#[inline]
pub(crate) fn write_cell(buf: &mut [u8], off: usize, val: Cell) {
    buf[off..off + CELL].copy_from_slice(&val.to_ne_bytes());
}

/// Shows a name the way Forth would print it.
pub struct NameDisplay<'a>(pub &'a [u8]);

impl core::fmt::Display for NameDisplay<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for &b in self.0 {
            core::fmt::Write::write_char(f, char::from(b))?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub mod test {
    use super::*;
    use crate::token::Prim;

    #[test]
    fn headers_link_backwards() {
        let mut dict = Dictionary::new(4096, 4096, false);
        dict.create_alias(b"DUP", Xt::Primitive(Prim::Dup), false).unwrap();
        dict.create_alias(b"IF", Xt::Primitive(Prim::If), true).unwrap();

        let names: Vec<_> = dict.entries().map(|e| e.name).collect();
        assert_eq!(names, [&b"IF"[..], b"DUP"]);
        assert_eq!(dict.find(b"DUP"), Lookup::Normal(Xt::Primitive(Prim::Dup)));
        assert_eq!(dict.find(b"IF"), Lookup::Immediate(Xt::Primitive(Prim::If)));
        assert_eq!(dict.find(b"dup"), Lookup::NotFound);
        assert_eq!(dict.name_of(Xt::Primitive(Prim::Dup)), dict.find_nfa(b"DUP"));
    }

    #[test]
    fn case_folding_is_optional() {
        let mut dict = Dictionary::new(4096, 4096, true);
        dict.create_alias(b"SWAP", Xt::Primitive(Prim::Swap), false).unwrap();
        assert_eq!(dict.find(b"swap"), Lookup::Normal(Xt::Primitive(Prim::Swap)));
    }

    #[test]
    fn new_entries_start_hidden() {
        let mut dict = Dictionary::new(4096, 4096, false);
        let xt = dict.create_entry(b"SQUARE").unwrap();
        assert_eq!(xt, Xt::Secondary(CODE_START));
        assert_eq!(dict.find(b"SQUARE"), Lookup::NotFound);
        dict.comma_xt(Xt::Primitive(Prim::Exit)).unwrap();
        dict.unsmudge();
        assert_eq!(dict.find(b"SQUARE"), Lookup::Normal(xt));
        assert_eq!(dict.latest_xt(), Some(xt));
    }

    #[test]
    fn redefinition_shadows() {
        let mut dict = Dictionary::new(4096, 4096, false);
        let first = dict.create_entry(b"X").unwrap();
        dict.comma(1).unwrap();
        dict.unsmudge();
        let second = dict.create_entry(b"X").unwrap();
        dict.comma(2).unwrap();
        dict.unsmudge();
        assert_ne!(first, second);
        assert_eq!(dict.find(b"X"), Lookup::Normal(second));
        assert_eq!(dict.fetch(CODE_START).unwrap(), 1);
    }

    #[test]
    fn names_are_checked() {
        let mut dict = Dictionary::new(4096, 4096, false);
        assert_eq!(dict.create_entry(b""), Err(DictError::ZeroLengthName));
        assert_eq!(dict.create_entry(&[b'A'; 32]), Err(DictError::NameTooLong));
        assert!(dict.create_entry(&[b'A'; 31]).is_ok());
    }

    #[test]
    fn room_is_checked_before_defining() {
        let mut dict = Dictionary::new(4096, CODE_START + DIC_SAFETY_MARGIN + 8, false);
        dict.create_entry(b"A").unwrap();
        dict.allot(16).unwrap();
        assert_eq!(dict.create_entry(b"B"), Err(DictError::CodeRoom));

        let dict = Dictionary::new(NAME_START + 100, 4096, false);
        assert_eq!(dict.check_room(), Err(DictError::HeaderRoom));
    }

    #[test]
    fn code_space_helpers() {
        let mut dict = Dictionary::new(4096, 4096, false);
        dict.c_comma(7).unwrap();
        assert_eq!(dict.here(), CODE_START + 1);
        dict.align();
        assert_eq!(dict.here(), CODE_START + CELL);
        let at = dict.counted_string(b"hi").unwrap();
        assert_eq!(&dict.code()[at..at + 3], b"\x02hi");
        assert_eq!(dict.here() % CELL, 0);
        assert_eq!(dict.allot(-4096), Err(DictError::OutOfRange));
    }
}
