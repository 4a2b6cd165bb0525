//! The primitives.
//!
//! [`Forth::dispatch`] is the body of the inner interpreter: one arm per
//! [`Prim`]. Words that need the parser or the compiler live in
//! `vm::compiler`, file and source words in `vm::files`.

use core::fmt::Write;

use crate::{
    dictionary::align_up,
    double::{self, Double},
    host::{Host, MAX_CUSTOM_PARAMS},
    memory::{Region, UserVar, PAD_BASE},
    throw,
    token::{Prim, Xt},
    vm::{Flow, Forth},
    Cell, Error, UCell, CELL, FALSE, TRUE,
};

pub mod floats;

impl<T: Host + 'static> Forth<T> {
    pub(crate) fn dispatch(&mut self, prim: Prim) -> Result<Flow, Error> {
        match prim {
            // threading and control flow
            Prim::Exit => self.exit()?,
            Prim::Literal | Prim::ALiteral => {
                let val = self.operand()?;
                self.push(val)?;
            }
            Prim::TwoLiteral => {
                let lo = self.operand()?;
                let hi = self.operand()?;
                self.push(lo)?;
                self.push(hi)?;
            }
            Prim::FLiteral => self.fliteral_runtime()?,
            Prim::Branch => self.branch()?,
            Prim::ZeroBranch => {
                if self.pop()? == 0 {
                    self.branch()?;
                } else {
                    self.task.ip += CELL;
                }
            }
            Prim::DoP => {
                let start = self.pop()?;
                let limit = self.pop()?;
                self.rpush(start)?;
                self.rpush(limit)?;
            }
            Prim::QDoP => {
                let start = self.pop()?;
                let limit = self.pop()?;
                if start == limit {
                    self.branch()?;
                } else {
                    self.rpush(start)?;
                    self.rpush(limit)?;
                    self.task.ip += CELL;
                }
            }
            Prim::LoopP => self.loop_step(1, false)?,
            Prim::PlusLoopP => {
                let delta = self.pop()?;
                self.loop_step(delta, true)?;
            }
            Prim::LeaveP => {
                self.rpop()?;
                self.rpop()?;
                self.branch()?;
            }
            Prim::Unloop => {
                self.rpop()?;
                self.rpop()?;
            }
            Prim::LoopI => {
                let i = self.rpeek(1)?;
                self.push(i)?;
            }
            Prim::LoopJ => {
                let j = self.rpeek(3)?;
                self.push(j)?;
            }
            Prim::Execute => return Ok(Flow::Execute(self.pop_xt()?)),
            Prim::Catch => {
                let xt = self.pop_xt()?;
                match self.execute(xt) {
                    Ok(()) => self.push(0)?,
                    Err(error) if error.is_bye() => return Err(error),
                    Err(error) => self.push(error.code())?,
                }
            }
            Prim::Throw => {
                let code = self.pop()?;
                if code != 0 {
                    return Err(Error::Throw(code));
                }
            }
            Prim::ErrorQ => {
                let code = self.pop()?;
                let flag = self.pop()?;
                if flag != 0 {
                    return Err(Error::Throw(code));
                }
            }
            Prim::Abort => return Err(Error::Throw(throw::ABORT)),
            Prim::AbortQuoteP => {
                let (addr, len) = self.inline_string()?;
                if self.pop()? != 0 {
                    self.abort_msg = Some(self.read_bytes(addr, len)?);
                    return Err(Error::Throw(throw::ABORT_QUOTE));
                }
            }
            Prim::Bye => return Err(Error::Throw(throw::BYE)),
            Prim::Quit => return Err(Error::Throw(throw::QUIT)),
            Prim::Noop => {}
            Prim::CreateP => return self.create_runtime(),
            Prim::DoesP => self.does_runtime()?,
            Prim::DeferP => {
                let target = self.operand()?;
                self.exit()?;
                return Ok(Flow::Execute(Xt::from_cell(target)?));
            }
            Prim::ConstantP | Prim::ValueP => {
                let val = self.operand()?;
                self.push(val)?;
                self.exit()?;
            }
            Prim::TwoConstantP => {
                let lo = self.operand()?;
                let hi = self.operand()?;
                self.push(lo)?;
                self.push(hi)?;
                self.exit()?;
            }
            Prim::DotQuoteP => {
                let (addr, len) = self.inline_string()?;
                let text = self.read_bytes(addr, len)?;
                self.output.push_bstr(&text);
            }
            Prim::SQuoteP => {
                let (addr, len) = self.inline_string()?;
                self.push(addr)?;
                self.push(len as Cell)?;
            }
            Prim::CQuoteP => {
                let (addr, _) = self.inline_string()?;
                self.push(addr - 1)?;
            }
            Prim::CallC => self.call_c()?,
            Prim::LocalEntry => self.local_entry()?,
            Prim::LocalExit => self.local_exit()?,
            Prim::LocalFetch => {
                let idx = self.operand()?;
                let val = *self.local_slot(idx)?;
                self.push(val)?;
            }
            Prim::LocalStore => {
                let idx = self.operand()?;
                let val = self.pop()?;
                *self.local_slot(idx)? = val;
            }
            Prim::LocalPlusStore => {
                let idx = self.operand()?;
                let val = self.pop()?;
                let slot = self.local_slot(idx)?;
                *slot = slot.wrapping_add(val);
            }

            // data and return stack
            Prim::Dup => {
                let a = self.peek()?;
                self.push(a)?;
            }
            Prim::Drop => {
                self.pop()?;
            }
            Prim::Swap => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(b)?;
                self.push(a)?;
            }
            Prim::Over => {
                let a = self.task.data_stack.try_peek_back_n(1)?;
                self.push(a)?;
            }
            Prim::Rot => {
                let c = self.pop()?;
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(b)?;
                self.push(c)?;
                self.push(a)?;
            }
            Prim::MinusRot => {
                let c = self.pop()?;
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(c)?;
                self.push(a)?;
                self.push(b)?;
            }
            Prim::Nip => {
                let b = self.pop()?;
                self.pop()?;
                self.push(b)?;
            }
            Prim::Tuck => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(b)?;
                self.push(a)?;
                self.push(b)?;
            }
            Prim::Pick => {
                let n = self.pop_usize()?;
                let val = self.task.data_stack.try_peek_back_n(n)?;
                self.push(val)?;
            }
            Prim::Roll => {
                let n = self.pop_usize()?;
                self.task.data_stack.roll(n)?;
            }
            Prim::QDup => {
                let a = self.peek()?;
                if a != 0 {
                    self.push(a)?;
                }
            }
            Prim::TwoDup => {
                let b = self.task.data_stack.try_peek_back_n(0)?;
                let a = self.task.data_stack.try_peek_back_n(1)?;
                self.push(a)?;
                self.push(b)?;
            }
            Prim::TwoDrop => {
                self.pop()?;
                self.pop()?;
            }
            Prim::TwoSwap => {
                let d = self.pop()?;
                let c = self.pop()?;
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(c)?;
                self.push(d)?;
                self.push(a)?;
                self.push(b)?;
            }
            Prim::TwoOver => {
                let b = self.task.data_stack.try_peek_back_n(2)?;
                let a = self.task.data_stack.try_peek_back_n(3)?;
                self.push(a)?;
                self.push(b)?;
            }
            Prim::Depth => {
                let depth = self.task.data_stack.depth();
                self.push(depth as Cell)?;
            }
            Prim::SpFetch => {
                let depth = self.task.data_stack.depth();
                self.push(depth as Cell)?;
            }
            Prim::SpStore => {
                let depth = self.pop_usize()?;
                self.task.data_stack.set_depth(depth)?;
            }
            Prim::ClearStack => self.task.data_stack.clear(),
            Prim::ToR => {
                let a = self.pop()?;
                self.rpush(a)?;
            }
            Prim::RFrom => {
                let a = self.rpop()?;
                self.push(a)?;
            }
            Prim::RFetch => {
                let a = self.rpeek(0)?;
                self.push(a)?;
            }
            Prim::RDrop => {
                self.rpop()?;
            }
            Prim::TwoToR => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.rpush(a)?;
                self.rpush(b)?;
            }
            Prim::TwoRFrom => {
                let b = self.rpop()?;
                let a = self.rpop()?;
                self.push(a)?;
                self.push(b)?;
            }
            Prim::TwoRFetch => {
                let b = self.rpeek(0)?;
                let a = self.rpeek(1)?;
                self.push(a)?;
                self.push(b)?;
            }
            Prim::RpFetch => {
                let depth = self.task.return_stack.depth();
                self.push(depth as Cell)?;
            }
            Prim::RpStore => {
                let depth = self.pop_usize()?;
                self.task
                    .return_stack
                    .set_depth(depth)
                    .map_err(Error::ReturnStack)?;
            }

            // single cell arithmetic and logic
            Prim::Plus => self.binary(Cell::wrapping_add)?,
            Prim::Minus => self.binary(Cell::wrapping_sub)?,
            Prim::Star => self.binary(Cell::wrapping_mul)?,
            Prim::Slash => {
                let (_, quot) = self.divide()?;
                self.push(quot)?;
            }
            Prim::Mod => {
                let (rem, _) = self.divide()?;
                self.push(rem)?;
            }
            Prim::SlashMod => {
                let (rem, quot) = self.divide()?;
                self.push(rem)?;
                self.push(quot)?;
            }
            Prim::StarSlash => {
                let (_, quot) = self.star_slash()?;
                self.push(quot)?;
            }
            Prim::StarSlashMod => {
                let (rem, quot) = self.star_slash()?;
                self.push(rem)?;
                self.push(quot)?;
            }
            Prim::Negate => self.unary(Cell::wrapping_neg)?,
            Prim::Abs => self.unary(Cell::wrapping_abs)?,
            Prim::Min => self.binary(Cell::min)?,
            Prim::Max => self.binary(Cell::max)?,
            Prim::OnePlus => self.unary(|a| a.wrapping_add(1))?,
            Prim::OneMinus => self.unary(|a| a.wrapping_sub(1))?,
            Prim::TwoPlus => self.unary(|a| a.wrapping_add(2))?,
            Prim::TwoMinus => self.unary(|a| a.wrapping_sub(2))?,
            Prim::TwoStar => self.unary(|a| a.wrapping_shl(1))?,
            Prim::TwoSlash => self.unary(|a| a >> 1)?,
            Prim::And => self.binary(|a, b| a & b)?,
            Prim::Or => self.binary(|a, b| a | b)?,
            Prim::Xor => self.binary(|a, b| a ^ b)?,
            Prim::Invert => self.unary(|a| !a)?,
            Prim::LShift => self.binary(|a, n| match (n as UCell) < 32 {
                true => ((a as UCell) << n) as Cell,
                false => 0,
            })?,
            Prim::RShift => self.binary(|a, n| match (n as UCell) < 32 {
                true => ((a as UCell) >> n) as Cell,
                false => 0,
            })?,
            Prim::ARShift => self.binary(|a, n| a >> (n as UCell).min(31))?,
            Prim::Equal => self.compare(|a, b| a == b)?,
            Prim::NotEqual => self.compare(|a, b| a != b)?,
            Prim::Less => self.compare(|a, b| a < b)?,
            Prim::Greater => self.compare(|a, b| a > b)?,
            Prim::ULess => self.compare(|a, b| (a as UCell) < (b as UCell))?,
            Prim::UGreater => self.compare(|a, b| (a as UCell) > (b as UCell))?,
            Prim::ZeroEqual => self.unary(|a| crate::flag(a == 0))?,
            Prim::ZeroNotEqual => self.unary(|a| crate::flag(a != 0))?,
            Prim::ZeroLess => self.unary(|a| crate::flag(a < 0))?,
            Prim::ZeroGreater => self.unary(|a| crate::flag(a > 0))?,
            Prim::True => self.push(TRUE)?,
            Prim::False => self.push(FALSE)?,
            Prim::CellSize => self.push(CELL as Cell)?,
            Prim::Cells => self.unary(|a| a.wrapping_mul(CELL as Cell))?,
            Prim::CellPlus => self.unary(|a| a.wrapping_add(CELL as Cell))?,
            Prim::Chars => {}
            Prim::CharPlus => self.unary(|a| a.wrapping_add(1))?,
            Prim::Within => {
                let hi = self.pop()?;
                let lo = self.pop()?;
                let n = self.pop()?;
                let inside = (n.wrapping_sub(lo) as UCell) < (hi.wrapping_sub(lo) as UCell);
                self.push(crate::flag(inside))?;
            }

            // double cell arithmetic
            Prim::DPlus => {
                let b = self.pop_double()?;
                let a = self.pop_double()?;
                self.push_double(double::d_add(a, b))?;
            }
            Prim::DMinus => {
                let b = self.pop_double()?;
                let a = self.pop_double()?;
                self.push_double(double::d_sub(a, b))?;
            }
            Prim::UMStar => {
                let b = self.pop()? as UCell;
                let a = self.pop()? as UCell;
                self.push_double(double::um_star(a, b))?;
            }
            Prim::MStar => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push_double(double::m_star(a, b))?;
            }
            Prim::UMSlashMod => {
                let u = self.pop()? as UCell;
                let ud = self.pop_double()?;
                let (rem, quot) = double::um_slash_mod(ud, u).ok_or(Error::DivideByZero)?;
                self.push(rem as Cell)?;
                self.push(quot as Cell)?;
            }
            Prim::MUSlashMod => {
                let u = self.pop()? as UCell;
                let ud = self.pop_double()?;
                let (rem, quot) = double::mu_slash_mod(ud, u).ok_or(Error::DivideByZero)?;
                self.push(rem as Cell)?;
                self.push_double(quot)?;
            }
            Prim::SMSlashRem => {
                let n = self.pop()?;
                let d = self.pop_double()?;
                let (rem, quot) = double::sm_slash_rem(d, n).ok_or(Error::DivideByZero)?;
                self.push(rem)?;
                self.push(quot)?;
            }
            Prim::FMSlashMod => {
                let n = self.pop()?;
                let d = self.pop_double()?;
                let (rem, quot) = double::fm_slash_mod(d, n).ok_or(Error::DivideByZero)?;
                self.push(rem)?;
                self.push(quot)?;
            }
            Prim::SToD => {
                let n = self.pop()?;
                self.push_double(double::from_cell(n))?;
            }
            Prim::DToS => {
                let (lo, _) = self.pop_double()?;
                self.push(lo as Cell)?;
            }
            Prim::DNegate => {
                let d = self.pop_double()?;
                self.push_double(double::d_negate(d))?;
            }
            Prim::DAbs => {
                let d = self.pop_double()?;
                self.push_double(double::d_abs(d))?;
            }
            Prim::DZeroEqual => {
                let d = self.pop_double()?;
                self.push(crate::flag(d == (0, 0)))?;
            }
            Prim::DEqual => {
                let b = self.pop_double()?;
                let a = self.pop_double()?;
                self.push(crate::flag(a == b))?;
            }
            Prim::DLess => {
                let b = self.pop_double()?;
                let a = self.pop_double()?;
                self.push(crate::flag(double::d_less(a, b)))?;
            }

            // memory
            Prim::Fetch => {
                let addr = self.pop()?;
                let val = self.fetch(addr)?;
                self.push(val)?;
            }
            Prim::Store => {
                let addr = self.pop()?;
                let val = self.pop()?;
                self.store(addr, val)?;
            }
            Prim::CFetch => {
                let addr = self.pop()?;
                let val = self.c_fetch(addr)?;
                self.push(Cell::from(val))?;
            }
            Prim::CStore => {
                let addr = self.pop()?;
                let val = self.pop()?;
                self.c_store(addr, val as u8)?;
            }
            Prim::WFetch => {
                let addr = self.pop()?;
                let val = self.w_fetch(addr)?;
                self.push(Cell::from(val))?;
            }
            Prim::WStore => {
                let addr = self.pop()?;
                let val = self.pop()?;
                self.w_store(addr, val as u16)?;
            }
            Prim::PlusStore => {
                let addr = self.pop()?;
                let val = self.pop()?;
                let old = self.fetch(addr)?;
                self.store(addr, old.wrapping_add(val))?;
            }
            Prim::TwoFetch => {
                let addr = self.pop()?;
                let x1 = self.fetch(addr.wrapping_add(CELL as Cell))?;
                let x2 = self.fetch(addr)?;
                self.push(x1)?;
                self.push(x2)?;
            }
            Prim::TwoStore => {
                let addr = self.pop()?;
                let x2 = self.pop()?;
                let x1 = self.pop()?;
                self.store(addr, x2)?;
                self.store(addr.wrapping_add(CELL as Cell), x1)?;
            }
            Prim::CMove => {
                let (src, dst, len) = self.pop_move_args()?;
                for i in 0..len as Cell {
                    let b = self.c_fetch(src.wrapping_add(i))?;
                    self.c_store(dst.wrapping_add(i), b)?;
                }
            }
            Prim::CMoveUp => {
                let (src, dst, len) = self.pop_move_args()?;
                for i in (0..len as Cell).rev() {
                    let b = self.c_fetch(src.wrapping_add(i))?;
                    self.c_store(dst.wrapping_add(i), b)?;
                }
            }
            Prim::Move => {
                let (src, dst, len) = self.pop_move_args()?;
                let bytes = self.read_bytes(src, len)?;
                self.write_bytes(dst, &bytes)?;
            }
            Prim::Fill => {
                let byte = self.pop()? as u8;
                let len = self.pop_len()?;
                let addr = self.pop()?;
                self.bytes_mut(addr, len)?.fill(byte);
            }
            Prim::Erase => {
                let len = self.pop_len()?;
                let addr = self.pop()?;
                self.bytes_mut(addr, len)?.fill(0);
            }
            Prim::Compare => {
                let len2 = self.pop_len()?;
                let addr2 = self.pop()?;
                let len1 = self.pop_len()?;
                let addr1 = self.pop()?;
                let ord = self.bytes(addr1, len1)?.cmp(self.bytes(addr2, len2)?);
                self.push(ord as Cell)?;
            }
            Prim::Scan | Prim::Skip => {
                let byte = self.pop()? as u8;
                let len = self.pop_len()?;
                let addr = self.pop()?;
                let want = prim == Prim::Scan;
                let skipped = self
                    .bytes(addr, len)?
                    .iter()
                    .position(|b| (*b == byte) == want)
                    .unwrap_or(len);
                self.push(addr.wrapping_add(skipped as Cell))?;
                self.push((len - skipped) as Cell)?;
            }
            Prim::Here => {
                let here = Region::Code.addr(self.dict.here());
                self.push(here)?;
            }
            Prim::Allot => {
                let n = self.pop()?;
                self.dict.allot(n)?;
            }
            Prim::Comma => {
                let val = self.pop()?;
                self.dict.comma(val)?;
            }
            Prim::CComma => {
                let val = self.pop()?;
                self.dict.c_comma(val as u8)?;
            }
            Prim::WComma => {
                let val = self.pop()?;
                self.dict.w_comma(val as u16)?;
            }
            Prim::Align => self.dict.align(),
            Prim::Aligned => self.unary(|a| align_up(a as UCell as usize) as Cell)?,
            Prim::Count => {
                let addr = self.pop()?;
                let len = self.c_fetch(addr)?;
                self.push(addr.wrapping_add(1))?;
                self.push(Cell::from(len))?;
            }
            Prim::ToBody => {
                let xt = self.pop_xt()?;
                let body = self.body_of(xt)?;
                self.push(body)?;
            }
            Prim::BodyOffset => self.push(2 * CELL as Cell)?,
            Prim::Pad => self.push(PAD_BASE as Cell)?,
            Prim::Allocate => {
                let size = self.pop()?;
                let block = usize::try_from(size)
                    .ok()
                    .and_then(|size| self.heap.allocate(size));
                match block {
                    Some(off) => {
                        self.push(Region::Heap.addr(off))?;
                        self.push(0)?;
                    }
                    None => {
                        self.push(0)?;
                        self.push(throw::ALLOCATE)?;
                    }
                }
            }
            Prim::Free => {
                let addr = self.pop()?;
                let freed = self
                    .heap_offset(addr)
                    .map(|off| self.heap.free(off).is_ok());
                let ior = if freed == Some(true) { 0 } else { throw::FREE };
                self.push(ior)?;
            }
            Prim::Resize => {
                let size = self.pop()?;
                let addr = self.pop()?;
                match self.resize(addr, size) {
                    Some(new) => {
                        self.push(new)?;
                        self.push(0)?;
                    }
                    None => {
                        self.push(addr)?;
                        self.push(throw::RESIZE)?;
                    }
                }
            }

            // console
            Prim::Emit => {
                let c = self.pop()?;
                self.output.emit(c as u8);
            }
            Prim::Type => {
                let len = self.pop_len()?;
                let addr = self.pop()?;
                let text = self.read_bytes(addr, len)?;
                self.output.push_bstr(&text);
            }
            Prim::Cr => self.output.push_str("\n"),
            Prim::Space => self.output.emit(b' '),
            Prim::Spaces => {
                let n = self.pop()?;
                for _ in 0..n.max(0) {
                    self.output.emit(b' ');
                }
            }
            Prim::Key => {
                self.flush_output();
                let key = self
                    .host_ctxt
                    .console_key()
                    .ok_or(Error::Throw(throw::BYE))?;
                self.push(Cell::from(key))?;
            }
            Prim::KeyQ => {
                let ready = self.host_ctxt.key_available();
                self.push(crate::flag(ready))?;
            }
            Prim::Accept => {
                let max = self.pop_len()?;
                let addr = self.pop()?;
                self.flush_output();
                let line = self
                    .host_ctxt
                    .console_accept(max)
                    .ok_or(Error::Throw(throw::BYE))?;
                let len = line.len().min(max);
                self.write_bytes(addr, &line[..len])?;
                self.push(len as Cell)?;
            }
            Prim::Dot => {
                let n = self.pop()?;
                self.print_double(double::from_cell(n))?;
                self.output.emit(b' ');
            }
            Prim::UDot => {
                let n = self.pop()? as UCell;
                self.print_double((n, 0))?;
                self.output.emit(b' ');
            }
            Prim::DotS => self.dot_s()?,
            Prim::DDot => {
                let d = self.pop_double()?;
                self.print_double(d)?;
                self.output.emit(b' ');
            }
            Prim::Question => {
                let addr = self.pop()?;
                let n = self.fetch(addr)?;
                self.print_double(double::from_cell(n))?;
                self.output.emit(b' ');
            }
            Prim::Eol => self.push(Cell::from(b'\n'))?,
            Prim::FlushEmit => self.flush_output(),
            Prim::Sleep => {
                let ms = self.pop()?;
                self.host_ctxt.sleep_ms(ms.max(0) as u32);
            }
            Prim::Dump => {
                let len = self.pop_len()?;
                let addr = self.pop()?;
                self.dump(addr, len)?;
            }

            // dictionary and compiler
            Prim::Find => self.find_word()?,
            Prim::FindNfa => self.find_nfa()?,
            Prim::Tick => {
                let xt = self.tick()?;
                self.push(xt.to_cell())?;
            }
            Prim::BracketTick => self.bracket_tick()?,
            Prim::NameFrom => self.name_from()?,
            Prim::ToName => self.to_name()?,
            Prim::IdDot => self.id_dot()?,
            Prim::PrevName => self.prev_name()?,
            Prim::Latest => {
                let nfa = self.dict.latest();
                self.push(if nfa == 0 { 0 } else { Region::Name.addr(nfa) })?;
            }
            Prim::Words => self.words(),
            Prim::Immediate => self.dict.immediate(),
            Prim::Create => self.create()?,
            Prim::Variable => {
                self.create()?;
                self.dict.comma(0)?;
            }
            Prim::TwoVariable => {
                self.create()?;
                self.dict.comma(0)?;
                self.dict.comma(0)?;
            }
            Prim::Constant => {
                let val = self.pop()?;
                self.define_with(Prim::ConstantP, &[val])?;
            }
            Prim::TwoConstant => {
                let hi = self.pop()?;
                let lo = self.pop()?;
                self.define_with(Prim::TwoConstantP, &[lo, hi])?;
            }
            Prim::Value => {
                let val = self.pop()?;
                self.define_with(Prim::ValueP, &[val])?;
            }
            Prim::Defer => {
                self.define_with(Prim::DeferP, &[Xt::Primitive(Prim::Noop).to_cell()])?;
            }
            Prim::To | Prim::LocalArrow => self.to(false)?,
            Prim::LocalPlusArrow => self.to(true)?,
            Prim::Is => self.is()?,
            Prim::Does => self.does()?,
            Prim::Colon => self.colon()?,
            Prim::ColonNoName => self.colon_noname()?,
            Prim::Semicolon => self.semicolon()?,
            Prim::Recurse => self.recurse()?,
            Prim::Postpone => self.postpone()?,
            Prim::BracketCompile => self.bracket_compile()?,
            Prim::LeftBracket => self.mode = crate::Mode::Run,
            Prim::RightBracket => self.mode = crate::Mode::Compile,
            Prim::LiteralWord => {
                self.require_compile()?;
                let val = self.pop()?;
                self.compile_literal(val)?;
            }
            Prim::TwoLiteralWord => {
                self.require_compile()?;
                let hi = self.pop()?;
                let lo = self.pop()?;
                self.compile_double(lo, hi)?;
            }
            Prim::ALiteralWord => {
                self.require_compile()?;
                let addr = self.pop()?;
                self.dict.comma_xt(Xt::Primitive(Prim::ALiteral))?;
                self.dict.comma(addr)?;
            }
            Prim::CompileComma => {
                let xt = self.pop_xt()?;
                self.compile_xt(xt)?;
            }
            Prim::Locals => self.declare_locals()?,

            // control structures
            Prim::If => self.compile_if()?,
            Prim::Else => self.compile_else()?,
            Prim::Then => self.compile_then()?,
            Prim::Begin => self.compile_begin()?,
            Prim::Again => self.compile_back(Prim::Branch)?,
            Prim::Until => self.compile_back(Prim::ZeroBranch)?,
            Prim::While => self.compile_while()?,
            Prim::Repeat => self.compile_repeat()?,
            Prim::Do => self.compile_do(Prim::DoP)?,
            Prim::QDo => self.compile_do(Prim::QDoP)?,
            Prim::Loop => self.compile_loop(Prim::LoopP)?,
            Prim::PlusLoop => self.compile_loop(Prim::PlusLoopP)?,
            Prim::Leave => self.compile_leave()?,

            // parsing and input sources
            Prim::Word => self.word()?,
            Prim::Parse => {
                let delim = self.pop()? as u8;
                let (start, len) = self.task.input.parse(delim);
                self.push(Region::Tib.addr(start))?;
                self.push(len as Cell)?;
            }
            Prim::ParseName => {
                let (start, len) = self
                    .task
                    .input
                    .parse_name()
                    .unwrap_or((self.task.input.len(), 0));
                self.push(Region::Tib.addr(start))?;
                self.push(len as Cell)?;
            }
            Prim::Source => {
                self.push(Region::Tib.addr(0))?;
                self.push(self.task.input.len() as Cell)?;
            }
            Prim::SetSource => self.set_source()?,
            Prim::SourceId => {
                let id = self.task.input.source().to_cell();
                self.push(id)?;
            }
            Prim::PushSourceId => self.push_source_id()?,
            Prim::PopSourceId => self.pop_source_id()?,
            Prim::SourceLineFetch => {
                let line = self.task.input.line_number();
                self.push(line)?;
            }
            Prim::SourceLineStore => {
                let line = self.pop()?;
                self.task.input.set_line_number(line);
            }
            Prim::Refill => {
                let more = self.refill()?;
                self.push(crate::flag(more))?;
            }
            Prim::Interpret => self.interpret()?,
            Prim::Evaluate => {
                let len = self.pop_len()?;
                let addr = self.pop()?;
                let text = self.read_bytes(addr, len)?;
                self.evaluate(&text)?;
            }
            Prim::NumberQ => self.number_q()?,
            Prim::Paren => {
                self.task.input.parse(b')');
            }
            Prim::Backslash => {
                let len = self.task.input.len();
                self.task.input.set_to_in(len);
            }
            Prim::DotQuote => self.dot_quote()?,
            Prim::DotParen => {
                let (start, len) = self.task.input.parse(b')');
                let text = &self.task.input.bytes()[start..start + len];
                self.output.push_bstr(text);
            }
            Prim::SQuote => self.s_quote()?,
            Prim::CQuote => self.c_quote()?,
            Prim::AbortQuote => self.abort_quote()?,
            Prim::Char => {
                let c = self.parse_char()?;
                self.push(c)?;
            }
            Prim::BracketChar => {
                self.require_compile()?;
                let c = self.parse_char()?;
                self.compile_literal(c)?;
            }
            Prim::Decimal => self.vars.base = 10,
            Prim::Hex => self.vars.base = 16,
            Prim::Binary => self.vars.base = 2,

            // files
            Prim::OpenFile => self.open_file(false)?,
            Prim::CreateFile => self.open_file(true)?,
            Prim::CloseFile => self.close_file()?,
            Prim::ReadFile => self.read_file()?,
            Prim::WriteFile => self.write_file()?,
            Prim::ReadLine => self.read_line()?,
            Prim::FileSize => self.file_size()?,
            Prim::FilePosition => self.file_position()?,
            Prim::RepositionFile => self.reposition_file()?,
            Prim::ResizeFile => self.resize_file()?,
            Prim::FlushFile => self.flush_file()?,
            Prim::DeleteFile => self.delete_file()?,
            Prim::RenameFile => self.rename_file()?,
            Prim::ReadOnly => self.push(crate::host::FileMode::READ_ONLY.0)?,
            Prim::ReadWrite => self.push(crate::host::FileMode::READ_WRITE.0)?,
            Prim::WriteOnly => self.push(crate::host::FileMode::WRITE_ONLY.0)?,
            Prim::Bin => self.unary(|mode| mode | crate::host::FileMode::BIN)?,
            Prim::IncludeFile => {
                let fid = self.pop()?;
                self.include_file(crate::host::FileId(fid))?;
            }
            Prim::Included => {
                let len = self.pop_len()?;
                let addr = self.pop()?;
                let name = self.read_bytes(addr, len)?;
                self.included(&name)?;
            }
            Prim::Include => self.include()?,
            Prim::SaveForth => self.save_forth(false)?,
            Prim::Turnkey => self.save_forth(true)?,

            // system variables
            Prim::VarBase
            | Prim::VarState
            | Prim::VarToIn
            | Prim::VarNumTib
            | Prim::VarEcho
            | Prim::VarOut
            | Prim::VarByeCode
            | Prim::VarReturnCode
            | Prim::VarContext
            | Prim::VarDp
            | Prim::VarHeadersPtr
            | Prim::VarHeadersBase
            | Prim::VarHeadersLimit
            | Prim::VarCodeBase
            | Prim::VarCodeLimit
            | Prim::VarTraceFlags
            | Prim::VarTraceLevel
            | Prim::VarTraceStack
            | Prim::VarQuiet => {
                let var = UserVar::from_prim(prim).ok_or(Error::BadToken(prim.id().into()))?;
                self.push(var.addr())?;
            }

            // floating point
            Prim::FPlus
            | Prim::FMinus
            | Prim::FStar
            | Prim::FSlash
            | Prim::FDup
            | Prim::FDrop
            | Prim::FSwap
            | Prim::FDepth
            | Prim::FDot
            | Prim::FLiteralWord => self.float_op(prim)?,
        }
        Ok(Flow::Next)
    }

    // -- threading --

    #[inline]
    fn exit(&mut self) -> Result<(), Error> {
        let ip = self.rpop()?;
        self.task.ip = ip as UCell as usize;
        Ok(())
    }

    /// Add the offset stored at `ip` to `ip`.
    #[inline]
    fn branch(&mut self) -> Result<(), Error> {
        let at = self.task.ip;
        let offset = self
            .dict
            .fetch(at)
            .map_err(|_| Error::InvalidAddress(at as UCell))?;
        let target = at as i64 + i64::from(offset);
        if target <= 0 {
            return Err(Error::InvalidAddress(target as UCell));
        }
        self.task.ip = target as usize;
        Ok(())
    }

    // The loop ends when the index crosses the boundary between
    // `limit - 1` and `limit`, in either direction.
    fn loop_step(&mut self, delta: Cell, plus: bool) -> Result<(), Error> {
        let limit = self.rpop()?;
        let index = self.rpop()?;
        let new_index = index.wrapping_add(delta);
        let done = if plus {
            let old_diff = index.wrapping_sub(limit);
            ((old_diff ^ old_diff.wrapping_add(delta)) & (old_diff ^ delta)) < 0
        } else {
            new_index == limit
        };
        if done {
            self.task.ip += CELL;
            Ok(())
        } else {
            self.rpush(new_index)?;
            self.rpush(limit)?;
            self.branch()
        }
    }

    fn rpeek(&self, n: usize) -> Result<Cell, Error> {
        self.task
            .return_stack
            .try_peek_back_n(n)
            .map_err(Error::ReturnStack)
    }

    /// Step over the counted string at `ip`, returning the address and
    /// length of its text.
    fn inline_string(&mut self) -> Result<(Cell, usize), Error> {
        let at = self.task.ip;
        let len = *self
            .dict
            .code()
            .get(at)
            .ok_or(Error::InvalidAddress(at as UCell))? as usize;
        let end = align_up(at + 1 + len);
        if end > self.dict.code_limit() {
            return Err(Error::InvalidAddress(end as UCell));
        }
        self.task.ip = end;
        Ok((Region::Code.addr(at + 1), len))
    }

    // The body of a CREATEd word is `(CREATE) does-or-0 data...`.
    fn create_runtime(&mut self) -> Result<Flow, Error> {
        let does = self.operand()?;
        let data = Region::Code.addr(self.task.ip);
        self.push(data)?;
        self.exit()?;
        if does == 0 {
            Ok(Flow::Next)
        } else {
            Ok(Flow::Execute(Xt::from_cell(does)?))
        }
    }

    // Point the latest CREATEd word at the code after `(DOES>) EXIT`.
    fn does_runtime(&mut self) -> Result<(), Error> {
        let body = match self.dict.latest_xt() {
            Some(Xt::Secondary(body)) if self.dict.fetch(body) == Ok(Prim::CreateP.id().into()) => body,
            _ => return Err(Error::Throw(throw::NOT_CREATED)),
        };
        let does = self.task.ip + CELL;
        self.dict.store(body + CELL, does as Cell)?;
        Ok(())
    }

    /// The data field of a word made by a defining word.
    pub(crate) fn body_of(&self, xt: Xt) -> Result<Cell, Error> {
        let Xt::Secondary(body) = xt else {
            return Err(Error::Throw(throw::NOT_CREATED));
        };
        let token = self.dict.fetch(body).ok().map(Xt::from_cell);
        let offset = match token {
            Some(Ok(Xt::Primitive(Prim::CreateP))) => 2 * CELL,
            Some(Ok(Xt::Primitive(
                Prim::ConstantP | Prim::TwoConstantP | Prim::ValueP | Prim::DeferP,
            ))) => CELL,
            _ => return Err(Error::Throw(throw::NOT_CREATED)),
        };
        Ok(Region::Code.addr(body + offset))
    }

    fn call_c(&mut self) -> Result<(), Error> {
        let idx = self.operand()?;
        let custom = self.custom;
        let func = usize::try_from(idx)
            .ok()
            .and_then(|idx| custom.get(idx))
            .ok_or(Error::Throw(throw::UNSUPPORTED))?;
        let mut args = [0 as Cell; MAX_CUSTOM_PARAMS as usize];
        let count = usize::from(func.params).min(args.len());
        for arg in args[..count].iter_mut().rev() {
            *arg = self.pop()?;
        }
        let ret = (func.func)(&mut self.host_ctxt, &args[..count]);
        if func.returns {
            self.push(ret)?;
        }
        Ok(())
    }

    // -- locals --
    //
    // A frame is the caller's frame pointer followed by one slot per local.
    // `lp` is the locals stack depth just above the saved pointer.

    fn local_entry(&mut self) -> Result<(), Error> {
        let op = self.operand()?;
        let total = ((op >> 8) & 0xFF) as usize;
        let init = (op & 0xFF) as usize;
        let locals = &mut self.task.locals_stack;
        locals.push(self.task.lp as Cell).map_err(Error::LocalsStack)?;
        self.task.lp = locals.depth();
        for _ in 0..total {
            locals.push(0).map_err(Error::LocalsStack)?;
        }
        for slot in (0..init.min(total)).rev() {
            let val = self.task.data_stack.try_pop()?;
            self.task
                .locals_stack
                .overwrite_back_n(total - 1 - slot, val)
                .map_err(Error::LocalsStack)?;
        }
        Ok(())
    }

    fn local_exit(&mut self) -> Result<(), Error> {
        let locals = &mut self.task.locals_stack;
        locals.set_depth(self.task.lp).map_err(Error::LocalsStack)?;
        let saved = locals.try_pop().map_err(Error::LocalsStack)?;
        self.task.lp = saved as usize;
        Ok(())
    }

    fn local_slot(&mut self, idx: Cell) -> Result<&mut Cell, Error> {
        let depth = self.task.locals_stack.depth();
        let pos = usize::try_from(idx)
            .ok()
            .and_then(|idx| self.task.lp.checked_add(idx))
            .ok_or(Error::Throw(throw::INVALID_ADDRESS))?;
        let from_top = depth
            .checked_sub(pos + 1)
            .ok_or(Error::LocalsStack(crate::stack::StackError::StackEmpty))?;
        self.task
            .locals_stack
            .try_peek_back_n_mut(from_top)
            .map_err(Error::LocalsStack)
    }

    // -- stack helpers --

    #[inline]
    fn peek(&self) -> Result<Cell, Error> {
        Ok(self.task.data_stack.try_peek()?)
    }

    #[inline]
    fn unary(&mut self, f: impl FnOnce(Cell) -> Cell) -> Result<(), Error> {
        let a = self.pop()?;
        self.push(f(a))
    }

    #[inline]
    fn binary(&mut self, f: impl FnOnce(Cell, Cell) -> Cell) -> Result<(), Error> {
        let b = self.pop()?;
        let a = self.pop()?;
        self.push(f(a, b))
    }

    #[inline]
    fn compare(&mut self, f: impl FnOnce(Cell, Cell) -> bool) -> Result<(), Error> {
        self.binary(|a, b| crate::flag(f(a, b)))
    }

    // Symmetric division, like C.
    fn divide(&mut self) -> Result<(Cell, Cell), Error> {
        let b = self.pop()?;
        let a = self.pop()?;
        if b == 0 {
            return Err(Error::DivideByZero);
        }
        Ok((a.wrapping_rem(b), a.wrapping_div(b)))
    }

    fn star_slash(&mut self) -> Result<(Cell, Cell), Error> {
        let n3 = self.pop()?;
        let n2 = self.pop()?;
        let n1 = self.pop()?;
        double::sm_slash_rem(double::m_star(n1, n2), n3).ok_or(Error::DivideByZero)
    }

    pub(crate) fn pop_double(&mut self) -> Result<Double, Error> {
        let hi = self.pop()?;
        let lo = self.pop()?;
        Ok((lo as UCell, hi as UCell))
    }

    pub(crate) fn push_double(&mut self, (lo, hi): Double) -> Result<(), Error> {
        self.push(lo as Cell)?;
        self.push(hi as Cell)
    }

    /// Pop a byte count. Negative counts are refused.
    pub(crate) fn pop_len(&mut self) -> Result<usize, Error> {
        self.pop_usize()
    }

    fn pop_move_args(&mut self) -> Result<(Cell, Cell, usize), Error> {
        let len = self.pop_len()?;
        let dst = self.pop()?;
        let src = self.pop()?;
        Ok((src, dst, len))
    }

    // -- heap --

    fn heap_offset(&self, addr: Cell) -> Option<usize> {
        match Region::split(addr as UCell)? {
            (Region::Heap, off) => Some(off),
            _ => None,
        }
    }

    // The old block survives any failure.
    fn resize(&mut self, addr: Cell, size: Cell) -> Option<Cell> {
        let size = usize::try_from(size).ok()?;
        if addr == 0 {
            return self.heap.allocate(size).map(|off| Region::Heap.addr(off));
        }
        let old = self.heap_offset(addr)?;
        let old_size = self.heap.size_of(old)?;
        let keep = old_size.min(size);
        let data = self.heap.bytes(old, keep)?.to_vec();
        let new = self.heap.allocate(size)?;
        self.heap.bytes_mut(new, keep)?.copy_from_slice(&data);
        if self.heap.free(old).is_err() {
            let _ = self.heap.free(new);
            return None;
        }
        Some(Region::Heap.addr(new))
    }

    // -- number output --

    fn base(&self) -> Result<UCell, Error> {
        match self.vars.base {
            base @ 2..=36 => Ok(base),
            _ => Err(Error::Throw(throw::INVALID_NUMERIC_ARGUMENT)),
        }
    }

    /// Print a signed double in `BASE`.
    pub(crate) fn print_double(&mut self, d: Double) -> Result<(), Error> {
        let base = self.base()?;
        let negative = double::is_negative(d);
        let mut mag = double::d_abs(d);
        let mut buf = [0u8; 66];
        let mut at = buf.len();
        loop {
            let (digit, rest) = double::mu_slash_mod(mag, base).ok_or(Error::DivideByZero)?;
            at -= 1;
            buf[at] = match digit as u8 {
                d @ 0..=9 => b'0' + d,
                d => b'A' + d - 10,
            };
            mag = rest;
            if mag == (0, 0) {
                break;
            }
        }
        if negative {
            at -= 1;
            buf[at] = b'-';
        }
        self.output.push_bstr(&buf[at..]);
        Ok(())
    }

    fn dot_s(&mut self) -> Result<(), Error> {
        let items: alloc::vec::Vec<Cell> = self.task.data_stack.iter_bottom_up().collect();
        let _ = write!(self.output, "<{}> ", items.len());
        for item in items {
            self.print_double(double::from_cell(item))?;
            self.output.emit(b' ');
        }
        Ok(())
    }

    fn dump(&mut self, addr: Cell, len: usize) -> Result<(), Error> {
        let bytes = self.read_bytes(addr, len)?;
        for (row, chunk) in bytes.chunks(16).enumerate() {
            let at = (addr as UCell).wrapping_add(row as UCell * 16);
            let _ = write!(self.output, "{at:08X}: ");
            for b in chunk {
                let _ = write!(self.output, "{b:02X} ");
            }
            for _ in chunk.len()..16 {
                self.output.push_str("   ");
            }
            for &b in chunk {
                self.output
                    .emit(if (0x20..0x7F).contains(&b) { b } else { b'.' });
            }
            self.output.push_str("\n");
        }
        Ok(())
    }
}

#[cfg(test)]
pub mod test {
    use crate::{testutil::blocking_runtest, throw, Forth, ForthParams};

    #[test]
    fn stack_words() {
        blocking_runtest(
            r#"
            > 1 2 3 ROT .S
            < <3> 2 3 1 ok.
            > CLEARSTACK 1 2 3 -ROT .S
            < <3> 3 1 2 ok.
            > CLEARSTACK 1 2 3 4 2SWAP .S
            < <4> 3 4 1 2 ok.
            > CLEARSTACK 1 2 3 4 2OVER .S
            < <6> 1 2 3 4 1 2 ok.
            > CLEARSTACK 10 20 30 2 PICK .
            < 10 ok.
            > 2 ROLL .S
            < <3> 20 30 10 ok.
            > CLEARSTACK 5 >R R@ R> + .
            < 10 ok.
            x CLEARSTACK DROP
            "#,
        );
    }

    #[test]
    fn arithmetic() {
        blocking_runtest(
            r#"
            > 7 2 / . 7 2 MOD . -7 2 / . -7 2 MOD .
            < 3 1 -3 -1 ok.
            > 7 2 /MOD . .
            < 3 1 ok.
            > 10 20 30 */ .
            < 6 ok.
            > -1 1 RSHIFT 2147483647 = .
            < -1 ok.
            > -8 1 ARSHIFT . -8 2/ .
            < -4 -4 ok.
            > 5 0 10 WITHIN . 10 0 10 WITHIN .
            < -1 0 ok.
            > HEX FF . DECIMAL 255 .
            < FF 255 ok.
            > -1 U.
            < 4294967295 ok.
            x 10 0 /
            x 1 2 0 */
            "#,
        );
    }

    #[test]
    fn doubles() {
        blocking_runtest(
            r#"
            > 1. 2. D+ D.
            < 3 ok.
            > -5. DABS D. 5 S>D DNEGATE D.
            < 5 -5 ok.
            > 65536 65536 UM* D.
            < 4294967296 ok.
            > -7 S>D 2 FM/MOD . .
            < -4 1 ok.
            > -7 S>D 2 SM/REM . .
            < -3 -1 ok.
            > 1. 2. D< . 1. 1. D= . 0. D0= .
            < -1 -1 -1 ok.
            "#,
        );
    }

    #[test]
    fn memory_words() {
        blocking_runtest(
            r#"
            > CREATE BUF 16 ALLOT
            > 65 BUF C! BUF C@ .
            < 65 ok.
            > 1 2 BUF 2! BUF 2@ . .
            < 2 1 ok.
            > BUF 16 ERASE BUF @ .
            < 0 ok.
            > BUF 4 66 FILL BUF 4 TYPE
            < BBBBok.
            > BUF 4 BUF 4 COMPARE .
            < 0 ok.
            > 3 ALIGNED .
            < 4 ok.
            > 10 BUF ! 5 BUF +! BUF ?
            < 15 ok.
            x -1 @
            "#,
        );
    }

    #[test]
    fn heap_words() {
        blocking_runtest(
            r#"
            > 100 ALLOCATE . CONSTANT BLK
            < 0 ok.
            > 42 BLK ! BLK @ .
            < 42 ok.
            > BLK 200 RESIZE . DUP @ .
            < 0 42 ok.
            > FREE .
            < 0 ok.
            > PAD FREE .
            < -60 ok.
            "#,
        );
    }

    #[test]
    fn stray_local_operands_throw() {
        let mut forth = Forth::new(ForthParams::default(), (), &[]).unwrap();
        forth.fill_input(": BAD [ ' (LOCAL@) COMPILE, -1 , ] ;").unwrap();
        forth.process_line().unwrap();
        forth.fill_input("BAD").unwrap();
        let err = forth.process_line().unwrap_err();
        assert_eq!(err.code(), throw::INVALID_ADDRESS);
    }

    #[test]
    fn heap_stores_stay_inside_blocks() {
        blocking_runtest(
            r#"
            > 100 ALLOCATE . VALUE BLK
            < 0 ok.
            x 2147418112 BLK 108 + !
            x BLK 8 - @
            > 7 BLK 100 + ! BLK 100 + @ .
            < 7 ok.
            > 1000 ALLOCATE . FREE . BLK FREE .
            < 0 0 0 ok.
            "#,
        );
    }

    #[test]
    fn system_heap_reuses_freed_blocks() {
        blocking_runtest(
            r#"
            ( heap_kind system )
            ( heap_size 8192 )
            > : CHURN 100 0 DO 1000 ALLOCATE THROW FREE THROW LOOP ;
            > CHURN CHURN 1000 ALLOCATE . FREE .
            < 0 0 ok.
            "#,
        );
    }

    #[test]
    fn loops() {
        blocking_runtest(
            r#"
            > : COUNTDOWN 0 10 DO I . -2 +LOOP ;
            > COUNTDOWN
            < 10 8 6 4 2 0 ok.
            > : NEST 3 0 DO 2 0 DO J . I . LOOP LOOP ;
            > NEST
            < 0 0 0 1 1 0 1 1 2 0 2 1 ok.
            > : FIRST 100 0 DO I 3 = IF I LEAVE THEN LOOP ;
            > FIRST .
            < 3 ok.
            > : EMPTY 0 0 ?DO 1 . LOOP 2 . ;
            > EMPTY
            < 2 ok.
            "#,
        );
    }

    #[test]
    fn catch_and_throw() {
        blocking_runtest(
            r#"
            > : THROWER 99 THROW ;
            > 1 2 ' THROWER CATCH . . .
            < 99 2 1 ok.
            > : SAFE 5 ;
            > ' SAFE CATCH . .
            < 0 5 ok.
            > 0 THROW
            > : CHECKED ABORT" bad things" ;
            > 0 ' CHECKED CATCH .
            < 0 ok.
            x 1 CHECKED
            "#,
        );
    }
}
