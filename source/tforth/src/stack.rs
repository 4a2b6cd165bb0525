use alloc::{boxed::Box, vec};

/// A fixed capacity stack that grows downwards.
///
/// `cur` is the index of the top item, and equals the capacity when the
/// stack is empty. Popping leaves the old value in place, so restoring an
/// earlier depth with [`Stack::set_depth`] brings back exactly what was
/// there before.
pub struct Stack<T: Copy> {
    buf: Box<[T]>,
    cur: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackError {
    StackEmpty,
    StackFull,
    OverwriteInvalid,
}

impl<T: Copy + Default> Stack<T> {
    pub fn new(items: usize) -> Self {
        Self {
            buf: vec![T::default(); items].into_boxed_slice(),
            cur: items,
        }
    }
}

impl<T: Copy> Stack<T> {
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn push(&mut self, item: T) -> Result<(), StackError> {
        if self.cur == 0 {
            return Err(StackError::StackFull);
        }
        self.cur -= 1;
        self.buf[self.cur] = item;
        Ok(())
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.buf.len() - self.cur
    }

    /// Move the top of the stack so that `depth` items are live.
    ///
    /// Items uncovered by growing the depth are whatever was last stored
    /// in those slots.
    #[inline]
    pub fn set_depth(&mut self, depth: usize) -> Result<(), StackError> {
        if depth > self.buf.len() {
            return Err(StackError::StackFull);
        }
        self.cur = self.buf.len() - depth;
        Ok(())
    }

    #[inline]
    pub fn try_pop(&mut self) -> Result<T, StackError> {
        match self.pop() {
            Some(v) => Ok(v),
            None => Err(StackError::StackEmpty),
        }
    }

    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        let val = self.buf.get(self.cur).copied()?;
        self.cur += 1;
        Some(val)
    }

    #[inline]
    pub fn try_peek(&self) -> Result<T, StackError> {
        self.peek().ok_or(StackError::StackEmpty)
    }

    #[inline]
    pub fn peek(&self) -> Option<T> {
        self.buf.get(self.cur).copied()
    }

    #[inline]
    pub fn peek_mut(&mut self) -> Option<&mut T> {
        self.buf.get_mut(self.cur)
    }

    #[inline]
    pub fn peek_back_n(&self, n: usize) -> Option<T> {
        self.buf.get(self.cur.checked_add(n)?).copied()
    }

    #[inline]
    pub fn try_peek_back_n(&self, n: usize) -> Result<T, StackError> {
        self.peek_back_n(n).ok_or(StackError::StackEmpty)
    }

    #[inline]
    pub fn try_peek_back_n_mut(&mut self, n: usize) -> Result<&mut T, StackError> {
        let idx = self.cur.checked_add(n).ok_or(StackError::StackEmpty)?;
        self.buf.get_mut(idx).ok_or(StackError::StackEmpty)
    }

    #[inline]
    pub fn overwrite_back_n(&mut self, n: usize, item: T) -> Result<(), StackError> {
        let slot = self
            .try_peek_back_n_mut(n)
            .map_err(|_| StackError::OverwriteInvalid)?;
        *slot = item;
        Ok(())
    }

    /// Remove the item `n` places below the top and push it on top.
    pub fn roll(&mut self, n: usize) -> Result<(), StackError> {
        if n >= self.depth() {
            return Err(StackError::StackEmpty);
        }
        self.buf[self.cur..=self.cur + n].rotate_right(1);
        Ok(())
    }

    #[inline]
    pub fn clear(&mut self) {
        self.cur = self.buf.len();
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cur == self.buf.len()
    }

    /// Live items, from the bottom of the stack up to the top.
    pub fn iter_bottom_up(&self) -> impl Iterator<Item = T> + '_ {
        self.buf[self.cur..].iter().rev().copied()
    }
}

#[cfg(test)]
pub mod test {
    use super::{Stack, StackError};

    #[test]
    fn stack() {
        const ITEMS: usize = 16;
        let mut stack = Stack::<i32>::new(ITEMS);

        for _ in 0..3 {
            for i in 0..(ITEMS as i32) {
                assert!(stack.push(i).is_ok());
            }
            assert_eq!(stack.push(100), Err(StackError::StackFull));
            for i in (0..(ITEMS as i32)).rev() {
                assert_eq!(stack.pop().unwrap(), i);
            }
            assert!(stack.pop().is_none());
        }
    }

    #[test]
    fn set_depth_restores_popped_items() {
        let mut stack = Stack::<i32>::new(8);
        stack.push(1).unwrap();
        stack.push(2).unwrap();
        stack.push(3).unwrap();
        assert_eq!(stack.try_pop(), Ok(3));
        assert_eq!(stack.try_pop(), Ok(2));
        stack.set_depth(3).unwrap();
        assert_eq!(stack.iter_bottom_up().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(stack.set_depth(9), Err(StackError::StackFull));
    }

    #[test]
    fn roll_and_peek() {
        let mut stack = Stack::<i32>::new(8);
        for i in 1..=4 {
            stack.push(i).unwrap();
        }
        assert_eq!(stack.try_peek_back_n(3), Ok(1));
        assert_eq!(stack.try_peek_back_n(4), Err(StackError::StackEmpty));
        stack.roll(3).unwrap();
        assert_eq!(stack.iter_bottom_up().collect::<Vec<_>>(), vec![2, 3, 4, 1]);
        stack.overwrite_back_n(0, 9).unwrap();
        assert_eq!(stack.try_peek(), Ok(9));
        assert_eq!(stack.roll(4), Err(StackError::StackEmpty));
    }
}
