//! Floating point primitives.
//!
//! Floats live on their own stack in the task. Without the `floats`
//! feature none of these words get a dictionary entry, and a token that
//! reaches them anyway is refused.

use crate::{host::Host, token::Prim, vm::Forth, Error};

cfg_if::cfg_if! {
    if #[cfg(feature = "floats")] {
        use core::fmt::Write;

        use crate::{token::Xt, Cell, UCell};

        impl<T: Host + 'static> Forth<T> {
            pub(crate) fn float_op(&mut self, prim: Prim) -> Result<(), Error> {
                match prim {
                    Prim::FPlus => self.float_binary(|a, b| a + b)?,
                    Prim::FMinus => self.float_binary(|a, b| a - b)?,
                    Prim::FStar => self.float_binary(|a, b| a * b)?,
                    Prim::FSlash => self.float_binary(|a, b| a / b)?,
                    Prim::FDup => {
                        let a = self.task.float_stack.try_peek().map_err(Error::FloatStack)?;
                        self.fpush(a)?;
                    }
                    Prim::FDrop => {
                        self.fpop()?;
                    }
                    Prim::FSwap => {
                        let b = self.fpop()?;
                        let a = self.fpop()?;
                        self.fpush(b)?;
                        self.fpush(a)?;
                    }
                    Prim::FDepth => {
                        let depth = self.task.float_stack.depth();
                        self.push(depth as Cell)?;
                    }
                    Prim::FDot => {
                        let a = self.fpop()?;
                        write!(self.output, "{a} ")?;
                    }
                    Prim::FLiteralWord => {
                        self.require_compile()?;
                        let a = self.fpop()?;
                        self.compile_float(a)?;
                    }
                    _ => return Err(Error::BadToken(prim.id().into())),
                }
                Ok(())
            }

            /// `(FLITERAL)` carries its value as two cells, low half first.
            pub(crate) fn fliteral_runtime(&mut self) -> Result<(), Error> {
                let lo = self.operand()? as UCell as u64;
                let hi = self.operand()? as UCell as u64;
                self.fpush(f64::from_bits(hi << 32 | lo))
            }

            pub(crate) fn compile_float(&mut self, val: f64) -> Result<(), Error> {
                let bits = val.to_bits();
                self.dict.check_room()?;
                self.dict.comma_xt(Xt::Primitive(Prim::FLiteral))?;
                self.dict.comma(bits as u32 as Cell)?;
                self.dict.comma((bits >> 32) as u32 as Cell)?;
                Ok(())
            }

            pub(crate) fn fpush(&mut self, val: f64) -> Result<(), Error> {
                self.task.float_stack.push(val).map_err(Error::FloatStack)
            }

            pub(crate) fn fpop(&mut self) -> Result<f64, Error> {
                self.task.float_stack.try_pop().map_err(Error::FloatStack)
            }

            fn float_binary(&mut self, f: impl FnOnce(f64, f64) -> f64) -> Result<(), Error> {
                let b = self.fpop()?;
                let a = self.fpop()?;
                self.fpush(f(a, b))
            }
        }
    } else {
        impl<T: Host + 'static> Forth<T> {
            pub(crate) fn float_op(&mut self, _prim: Prim) -> Result<(), Error> {
                Err(Error::Throw(crate::throw::UNSUPPORTED))
            }

            pub(crate) fn fliteral_runtime(&mut self) -> Result<(), Error> {
                Err(Error::Throw(crate::throw::UNSUPPORTED))
            }
        }
    }
}

#[cfg(all(test, feature = "floats"))]
pub mod test {
    use crate::testutil::blocking_runtest;

    #[test]
    fn float_words() {
        blocking_runtest(
            r#"
            > 1.5E 2.5E F+ F.
            < 4 ok.
            > 1E 4E F/ F.
            < 0.25 ok.
            > 3E FDUP F* F.
            < 9 ok.
            > FDEPTH .
            < 0 ok.
            > : HALF 0.5E ;
            > HALF HALF F+ F.
            < 1 ok.
            x FDROP
            "#,
        );
    }
}
