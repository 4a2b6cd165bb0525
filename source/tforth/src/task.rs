//! Per-task execution state.

use alloc::{boxed::Box, vec};

use portable_atomic::{AtomicUsize, Ordering};

use crate::{input::InputBuf, stack::Stack, Cell};

/// Size of the buffer `WORD` parses into.
pub const POCKET_SIZE: usize = 256;
/// Size of each of the two buffers interpreted `S"` strings land in.
pub const SCRATCH_SIZE: usize = 256;

static NEXT_ID: AtomicUsize = AtomicUsize::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(usize);

impl TaskId {
    fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> usize {
        self.0
    }
}

/// Sizes for a new task, in items for stacks and bytes for buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskParams {
    pub data_stack_size: usize,
    pub return_stack_size: usize,
    pub locals_stack_size: usize,
    pub float_stack_size: usize,
    pub tib_size: usize,
    pub pad_size: usize,
    pub include_depth: usize,
}

/// One set of stacks and input state.
///
/// Only the task installed in a [`Forth`](crate::Forth) runs; others are
/// parked with [`Forth::swap_task`](crate::Forth::swap_task).
pub struct Task {
    id: TaskId,
    pub data_stack: Stack<Cell>,
    pub return_stack: Stack<Cell>,
    pub locals_stack: Stack<Cell>,
    #[cfg(feature = "floats")]
    pub float_stack: Stack<f64>,
    /// Code offset of the next token, 0 when nothing is running.
    pub(crate) ip: usize,
    /// Depth of the locals stack at the base of the current frame.
    pub(crate) lp: usize,
    pub input: InputBuf,
    pub(crate) pocket: Box<[u8]>,
    pub(crate) pad: Box<[u8]>,
    /// Two `SCRATCH_SIZE` halves, used in turn.
    pub(crate) scratch: Box<[u8]>,
    scratch_half: usize,
}

impl Task {
    pub fn new(params: &TaskParams) -> Self {
        let task = Self {
            id: TaskId::next(),
            data_stack: Stack::new(params.data_stack_size),
            return_stack: Stack::new(params.return_stack_size),
            locals_stack: Stack::new(params.locals_stack_size),
            #[cfg(feature = "floats")]
            float_stack: Stack::new(params.float_stack_size),
            ip: 0,
            lp: 0,
            input: InputBuf::new(params.tib_size, params.include_depth),
            pocket: vec![0; POCKET_SIZE].into_boxed_slice(),
            pad: vec![0; params.pad_size].into_boxed_slice(),
            scratch: vec![0; 2 * SCRATCH_SIZE].into_boxed_slice(),
            scratch_half: 0,
        };
        tracing::debug!(id = task.id.0, "task created");
        task
    }

    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Offset of the scratch half the next interpreted string goes in.
    ///
    /// Two strings can be live at once, so `S" a" S" b" RENAME-FILE`
    /// works at the prompt.
    pub(crate) fn next_scratch(&mut self) -> usize {
        let off = self.scratch_half * SCRATCH_SIZE;
        self.scratch_half ^= 1;
        off
    }

    /// Empty every stack and forget any running code.
    pub fn reset_stacks(&mut self) {
        self.data_stack.clear();
        self.return_stack.clear();
        self.locals_stack.clear();
        #[cfg(feature = "floats")]
        self.float_stack.clear();
        self.ip = 0;
        self.lp = 0;
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        tracing::trace!(id = self.id.0, "task dropped");
    }
}

#[cfg(test)]
pub mod test {
    use super::*;

    fn params() -> TaskParams {
        TaskParams {
            data_stack_size: 8,
            return_stack_size: 8,
            locals_stack_size: 8,
            float_stack_size: 8,
            tib_size: 64,
            pad_size: 64,
            include_depth: 4,
        }
    }

    #[test]
    fn tasks_are_independent() {
        let mut a = Task::new(&params());
        let b = Task::new(&params());
        assert_ne!(a.id(), b.id());
        a.data_stack.push(1).unwrap();
        assert_eq!(b.data_stack.depth(), 0);
        a.reset_stacks();
        assert_eq!(a.data_stack.depth(), 0);
    }
}
