use alloc::{boxed::Box, vec::Vec};
use core::fmt::Write;

use crate::{
    dictionary::{Dictionary, NameDisplay},
    heap::{Heap, HeapKind, PoolHeap, SystemHeap},
    host::{CustomFunction, Host, MAX_CUSTOM_PARAMS},
    image::{self, ImageError, SaveRequest},
    input::SourceId,
    memory::Vars,
    output::OutputBuf,
    task::{Task, TaskParams},
    throw,
    token::{Prim, Xt},
    Cell, Error, Mode, UCell, CELL,
};

pub mod builtins;
mod compiler;
mod files;

pub(crate) use self::compiler::Compiler;

/// Sizes and switches for a new VM.
///
/// Stack sizes are in items, everything else in bytes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub struct ForthParams {
    /// Size of the data stack, in cells.
    #[cfg_attr(feature = "serde", serde(default = "ForthParams::default_data_stack_size"))]
    pub data_stack_size: usize,
    /// Size of the return stack, in cells.
    #[cfg_attr(feature = "serde", serde(default = "ForthParams::default_return_stack_size"))]
    pub return_stack_size: usize,
    /// Size of the locals stack, in cells.
    #[cfg_attr(feature = "serde", serde(default = "ForthParams::default_locals_stack_size"))]
    pub locals_stack_size: usize,
    /// Size of the float stack. Ignored without the `floats` feature.
    #[cfg_attr(feature = "serde", serde(default = "ForthParams::default_float_stack_size"))]
    pub float_stack_size: usize,
    /// Longest accepted input line.
    #[cfg_attr(feature = "serde", serde(default = "ForthParams::default_tib_size"))]
    pub tib_size: usize,
    #[cfg_attr(feature = "serde", serde(default = "ForthParams::default_pad_size"))]
    pub pad_size: usize,
    /// How many sources may be nested by `INCLUDE` and `EVALUATE`.
    #[cfg_attr(feature = "serde", serde(default = "ForthParams::default_include_depth"))]
    pub include_depth: usize,
    /// Size of the name space, which holds the dictionary headers.
    #[cfg_attr(feature = "serde", serde(default = "ForthParams::default_name_size"))]
    pub name_size: usize,
    /// Size of the code space, which holds compiled code and data.
    #[cfg_attr(feature = "serde", serde(default = "ForthParams::default_code_size"))]
    pub code_size: usize,
    /// Size of the pool behind `ALLOCATE`.
    #[cfg_attr(feature = "serde", serde(default = "ForthParams::default_heap_size"))]
    pub heap_size: usize,
    #[cfg_attr(feature = "serde", serde(default))]
    pub heap_kind: HeapKind,
    /// Match names with ASCII case folding.
    #[cfg_attr(feature = "serde", serde(default))]
    pub case_insensitive: bool,
    /// Start with `QUIET` set: no `ok.` prompts and no redefinition notes.
    #[cfg_attr(feature = "serde", serde(default))]
    pub quiet: bool,
    /// Start with `ECHO` set, so lines read from files are printed.
    #[cfg_attr(feature = "serde", serde(default))]
    pub echo: bool,
}

impl ForthParams {
    pub const DEFAULT_DATA_STACK_SIZE: usize = 512;
    pub const DEFAULT_RETURN_STACK_SIZE: usize = 512;
    pub const DEFAULT_LOCALS_STACK_SIZE: usize = 256;
    pub const DEFAULT_FLOAT_STACK_SIZE: usize = 128;
    pub const DEFAULT_TIB_SIZE: usize = 256;
    pub const DEFAULT_PAD_SIZE: usize = 256;
    pub const DEFAULT_INCLUDE_DEPTH: usize = 16;
    pub const DEFAULT_NAME_SIZE: usize = 120_000;
    pub const DEFAULT_CODE_SIZE: usize = 300_000;
    pub const DEFAULT_HEAP_SIZE: usize = 1024 * 1024;

    pub const fn new() -> Self {
        Self {
            data_stack_size: Self::DEFAULT_DATA_STACK_SIZE,
            return_stack_size: Self::DEFAULT_RETURN_STACK_SIZE,
            locals_stack_size: Self::DEFAULT_LOCALS_STACK_SIZE,
            float_stack_size: Self::DEFAULT_FLOAT_STACK_SIZE,
            tib_size: Self::DEFAULT_TIB_SIZE,
            pad_size: Self::DEFAULT_PAD_SIZE,
            include_depth: Self::DEFAULT_INCLUDE_DEPTH,
            name_size: Self::DEFAULT_NAME_SIZE,
            code_size: Self::DEFAULT_CODE_SIZE,
            heap_size: Self::DEFAULT_HEAP_SIZE,
            heap_kind: HeapKind::FreeList,
            case_insensitive: false,
            quiet: false,
            echo: false,
        }
    }

    pub fn task_params(&self) -> TaskParams {
        TaskParams {
            data_stack_size: self.data_stack_size,
            return_stack_size: self.return_stack_size,
            locals_stack_size: self.locals_stack_size,
            float_stack_size: self.float_stack_size,
            tib_size: self.tib_size,
            pad_size: self.pad_size,
            include_depth: self.include_depth,
        }
    }
}

impl Default for ForthParams {
    fn default() -> Self {
        Self::new()
    }
}

// `serde(default = ...)` wants a path to a function.
#[cfg(feature = "serde")]
impl ForthParams {
    const fn default_data_stack_size() -> usize {
        Self::DEFAULT_DATA_STACK_SIZE
    }

    const fn default_return_stack_size() -> usize {
        Self::DEFAULT_RETURN_STACK_SIZE
    }

    const fn default_locals_stack_size() -> usize {
        Self::DEFAULT_LOCALS_STACK_SIZE
    }

    const fn default_float_stack_size() -> usize {
        Self::DEFAULT_FLOAT_STACK_SIZE
    }

    const fn default_tib_size() -> usize {
        Self::DEFAULT_TIB_SIZE
    }

    const fn default_pad_size() -> usize {
        Self::DEFAULT_PAD_SIZE
    }

    const fn default_include_depth() -> usize {
        Self::DEFAULT_INCLUDE_DEPTH
    }

    const fn default_name_size() -> usize {
        Self::DEFAULT_NAME_SIZE
    }

    const fn default_code_size() -> usize {
        Self::DEFAULT_CODE_SIZE
    }

    const fn default_heap_size() -> usize {
        Self::DEFAULT_HEAP_SIZE
    }
}

/// What the inner interpreter does after a primitive.
pub(crate) enum Flow {
    /// Fetch the next token at `ip`.
    Next,
    /// Run this token instead of fetching.
    Execute(Xt),
}

/// Everything `CATCH` puts back on the way out of a failed execution.
#[derive(Debug, Clone, Copy)]
struct Checkpoint {
    data: usize,
    ret: usize,
    locals: usize,
    #[cfg(feature = "floats")]
    float: usize,
    ip: usize,
    lp: usize,
}

/// Forth is the "context" of the VM/interpreter.
pub struct Forth<T: 'static> {
    pub(crate) mode: Mode,
    pub(crate) task: Task,
    pub dict: Dictionary,
    pub output: OutputBuf,
    pub host_ctxt: T,
    pub(crate) heap: Box<dyn Heap + Send>,
    pub(crate) custom: &'static [CustomFunction<T>],
    pub(crate) params: ForthParams,
    pub(crate) compiler: Compiler,
    pub(crate) vars: Vars,
    /// Message of the last `ABORT"`, shown if nothing catches it.
    pub(crate) abort_msg: Option<Vec<u8>>,
    entry_point: Option<Xt>,
}

impl<T: Host + 'static> Forth<T> {
    /// A fresh VM with every primitive and custom function in its
    /// dictionary.
    pub fn new(
        params: ForthParams,
        host_ctxt: T,
        custom: &'static [CustomFunction<T>],
    ) -> Result<Self, Error> {
        let dict = Dictionary::new(params.name_size, params.code_size, params.case_insensitive);
        let mut forth = Self::with_dictionary(params, host_ctxt, custom, dict);
        forth.install_primitives()?;
        forth.install_custom()?;
        tracing::debug!(
            names = forth.dict.hp(),
            code = forth.dict.here(),
            custom = custom.len(),
            "dictionary built"
        );
        Ok(forth)
    }

    /// A VM whose dictionary is read from a saved image.
    ///
    /// Non-zero stack sizes recorded in the image override `params`. A
    /// turnkey image has no names, so the outer interpreter can't find
    /// anything and only its [`entry_point`](Self::entry_point) is useful.
    pub fn from_image(
        mut params: ForthParams,
        host_ctxt: T,
        custom: &'static [CustomFunction<T>],
        bytes: &[u8],
    ) -> Result<Self, Error> {
        let image = image::load(bytes)?;
        let info = image.info;
        if info.data_stack_size != 0 {
            params.data_stack_size = info.data_stack_size as usize;
        }
        if info.return_stack_size != 0 {
            params.return_stack_size = info.return_stack_size as usize;
        }
        params.name_size = info.name_size as usize;
        params.code_size = info.code_size as usize;

        let dict = Dictionary::from_parts(
            image.names,
            info.name_size as usize,
            info.header_ptr as usize,
            image.code,
            info.code_size as usize,
            info.code_ptr as usize,
            info.context as usize,
            params.case_insensitive,
        )
        .map_err(|_| Error::Image(ImageError::CorruptDic))?;

        let mut forth = Self::with_dictionary(params, host_ctxt, custom, dict);
        if info.entry_point != 0 {
            let xt = Xt::from_cell(info.entry_point as Cell)
                .map_err(|_| Error::Image(ImageError::CorruptDic))?;
            forth.entry_point = Some(xt);
        }
        tracing::info!(
            names = forth.dict.hp(),
            code = forth.dict.here(),
            turnkey = info.is_turnkey(),
            "image loaded"
        );
        Ok(forth)
    }

    fn with_dictionary(
        params: ForthParams,
        host_ctxt: T,
        custom: &'static [CustomFunction<T>],
        dict: Dictionary,
    ) -> Self {
        let heap: Box<dyn Heap + Send> = match params.heap_kind {
            HeapKind::FreeList => Box::new(PoolHeap::new(params.heap_size)),
            HeapKind::System => Box::new(SystemHeap::new(params.heap_size)),
        };
        let vars = Vars {
            quiet: params.quiet,
            echo: crate::flag(params.echo),
            ..Vars::default()
        };
        Self {
            mode: Mode::Run,
            task: Task::new(&params.task_params()),
            dict,
            output: OutputBuf::new(),
            host_ctxt,
            heap,
            custom,
            params,
            compiler: Compiler::default(),
            vars,
            abort_msg: None,
            entry_point: None,
        }
    }

    fn install_primitives(&mut self) -> Result<(), Error> {
        for prim in Prim::ALL.iter().filter(|p| p.is_available()) {
            self.dict
                .create_alias(prim.name().as_bytes(), Xt::Primitive(*prim), prim.is_immediate())?;
        }
        Ok(())
    }

    // Each custom function becomes `CALL-C idx EXIT`.
    fn install_custom(&mut self) -> Result<(), Error> {
        for (idx, func) in self.custom.iter().enumerate() {
            if func.params > MAX_CUSTOM_PARAMS {
                return Err(Error::Image(ImageError::NumParams));
            }
            self.dict.create_entry(func.name.as_bytes())?;
            self.dict.comma_xt(Xt::Primitive(Prim::CallC))?;
            self.dict.comma(idx as Cell)?;
            self.dict.comma_xt(Xt::Primitive(Prim::Exit))?;
            self.dict.unsmudge();
        }
        Ok(())
    }

    /// The token a turnkey image was saved with.
    pub fn entry_point(&self) -> Option<Xt> {
        self.entry_point
    }

    /// What `BYE` should hand back to the host, as set through `BYE-CODE`.
    pub fn bye_code(&self) -> Cell {
        self.vars.bye_code
    }

    /// `RETURN-CODE`, the result a turnkey program leaves for its host.
    pub fn return_code(&self) -> Cell {
        self.vars.return_code
    }

    pub fn params(&self) -> &ForthParams {
        &self.params
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn task_mut(&mut self) -> &mut Task {
        &mut self.task
    }

    /// A new task sized like the current one.
    pub fn new_task(&self) -> Task {
        Task::new(&self.params.task_params())
    }

    /// Install `task` as the running task, handing back the previous one.
    pub fn swap_task(&mut self, task: Task) -> Task {
        tracing::debug!(from = self.task.id().get(), to = task.id().get(), "swap task");
        core::mem::replace(&mut self.task, task)
    }

    /// Serialize the dictionary. With an entry point the image is turnkey
    /// and carries no names.
    pub fn save_image(&self, entry_point: Option<Xt>) -> Result<Vec<u8>, Error> {
        let req = SaveRequest {
            names: self.dict.names(),
            name_limit: self.dict.name_limit(),
            header_ptr: self.dict.hp(),
            context: self.dict.latest(),
            code: self.dict.code(),
            code_limit: self.dict.code_limit(),
            code_ptr: self.dict.here(),
            data_stack_size: self.task.data_stack.capacity(),
            return_stack_size: self.task.return_stack.capacity(),
            entry_point: entry_point.map(Xt::to_cell),
        };
        Ok(image::save(&req)?)
    }

    /// Replace the console line about to be interpreted.
    pub fn fill_input(&mut self, line: &str) -> Result<(), Error> {
        self.task.input.fill(line.as_bytes())
    }

    /// Interpret whatever is in the input buffer.
    ///
    /// On success in interpret state `ok.` is appended to the output. On
    /// failure the error is reported into the output and the task is reset
    /// before the error is handed back.
    pub fn process_line(&mut self) -> Result<(), Error> {
        match self.interpret() {
            Ok(()) => {
                if self.mode == Mode::Run && !self.vars.quiet {
                    self.output.push_str("ok.\n");
                }
                Ok(())
            }
            Err(error) => {
                self.report_error(&error);
                self.reset();
                Err(error)
            }
        }
    }

    /// The top-level driver: read console lines until the console closes or
    /// `BYE` runs, and return `BYE-CODE`.
    pub fn quit(&mut self) -> Cell {
        tracing::info!("VM running");
        loop {
            self.flush_output();
            let Some(line) = self.host_ctxt.console_accept(self.task.input.capacity()) else {
                tracing::debug!("console closed");
                break;
            };
            self.task.input.set_source(SourceId::Console);
            if let Err(error) = self.task.input.fill(&line) {
                self.report_error(&error);
                continue;
            }
            match self.process_line() {
                Err(error) if error.is_bye() => break,
                Err(error) => tracing::debug!(code = error.code(), "line failed"),
                Ok(()) => {}
            }
        }
        self.flush_output();
        self.vars.bye_code
    }

    /// Hand pending output to the host console, if there is one.
    pub fn flush_output(&mut self) {
        if !self.output.is_empty() && self.host_ctxt.console_write(self.output.as_str()) {
            self.output.clear();
        }
    }

    fn report_error(&mut self, error: &Error) {
        let code = error.code();
        if matches!(code, throw::BYE | throw::QUIT | throw::ABORT) {
            return;
        }
        tracing::error!(code, %error, "uncaught error");
        if self.output.column() != 0 {
            self.output.push_str("\n");
        }
        match self.abort_msg.take() {
            Some(msg) if code == throw::ABORT_QUOTE => self.output.push_bstr(&msg),
            _ => {
                let _ = write!(self.output, "Error: {error} ({code})");
            }
        }
        self.output.push_str("\n");
        self.show_position(false);
    }

    /// Print the current line with a marker under `>IN`, or carets up to it.
    pub(crate) fn show_position(&mut self, carets: bool) {
        let input = &self.task.input;
        if input.is_empty() {
            return;
        }
        self.output.push_bstr(input.bytes());
        self.output.push_str("\n");
        let upto = self.task.input.to_in().saturating_sub(1);
        let mark = if carets { b'^' } else { b' ' };
        for _ in 0..upto {
            self.output.emit(mark);
        }
        self.output.push_str("^\n");
    }

    /// Back to a clean interpreter: stacks empty, interpret state, console
    /// input. Pending include files are closed.
    pub fn reset(&mut self) {
        self.task.reset_stacks();
        for source in self.task.input.reset() {
            if let SourceId::File(fid) = source {
                self.host_ctxt.close_file(fid);
            }
        }
        self.mode = Mode::Run;
        self.compiler.reset();
        self.abort_msg = None;
    }

    pub fn release(self) -> T {
        self.host_ctxt
    }

    // -- inner interpreter --

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            data: self.task.data_stack.depth(),
            ret: self.task.return_stack.depth(),
            locals: self.task.locals_stack.depth(),
            #[cfg(feature = "floats")]
            float: self.task.float_stack.depth(),
            ip: self.task.ip,
            lp: self.task.lp,
        }
    }

    fn restore(&mut self, cp: Checkpoint) {
        // Depths recorded earlier never exceed capacity.
        let _ = self.task.data_stack.set_depth(cp.data);
        let _ = self.task.return_stack.set_depth(cp.ret);
        let _ = self.task.locals_stack.set_depth(cp.locals);
        #[cfg(feature = "floats")]
        let _ = self.task.float_stack.set_depth(cp.float);
        self.task.ip = cp.ip;
        self.task.lp = cp.lp;
    }

    /// Run `xt` to completion. On failure every stack depth and the
    /// instruction pointer are put back as they were.
    pub fn execute(&mut self, xt: Xt) -> Result<(), Error> {
        let cp = self.checkpoint();
        let res = self.run(xt);
        if res.is_err() {
            self.restore(cp);
        }
        res
    }

    /// Run `xt`, turning any failure into its throw code. 0 means success.
    pub fn catch(&mut self, xt: Xt) -> Cell {
        match self.execute(xt) {
            Ok(()) => 0,
            Err(error) => {
                tracing::trace!(code = error.code(), "caught");
                error.code()
            }
        }
    }

    fn run(&mut self, xt: Xt) -> Result<(), Error> {
        let saved_ip = self.task.ip;
        self.task.ip = 0;
        let mut xt = xt;
        loop {
            match xt {
                Xt::Secondary(body) => {
                    if self.vars.trace_level > 0 {
                        self.trace_call(body);
                    }
                    self.rpush(self.task.ip as Cell)?;
                    self.task.ip = body;
                }
                Xt::Primitive(prim) => {
                    if let Flow::Execute(next) = self.dispatch(prim)? {
                        xt = next;
                        continue;
                    }
                    if self.task.ip == 0 {
                        break;
                    }
                }
            }
            xt = self.next_token()?;
        }
        self.task.ip = saved_ip;
        Ok(())
    }

    fn trace_call(&self, body: usize) {
        let name = self
            .dict
            .name_of(Xt::Secondary(body))
            .and_then(|nfa| self.dict.entry(nfa))
            .map(|e| e.name)
            .unwrap_or(&b"?"[..]);
        let depth = self.task.return_stack.depth();
        if self.vars.trace_stack != 0 {
            let top: Vec<Cell> = self.task.data_stack.iter_bottom_up().collect();
            tracing::trace!(name = %NameDisplay(name), depth, stack = ?top, "call");
        } else {
            tracing::trace!(name = %NameDisplay(name), depth, "call");
        }
    }

    #[inline]
    fn next_token(&mut self) -> Result<Xt, Error> {
        let cell = self.operand()?;
        Xt::from_cell(cell)
    }

    /// Read the cell at `ip` and step over it.
    #[inline]
    pub(crate) fn operand(&mut self) -> Result<Cell, Error> {
        let ip = self.task.ip;
        let cell = self
            .dict
            .fetch(ip)
            .map_err(|_| Error::InvalidAddress(ip as UCell))?;
        self.task.ip = ip + CELL;
        Ok(cell)
    }

    // -- stack helpers --

    #[inline]
    pub(crate) fn pop(&mut self) -> Result<Cell, Error> {
        Ok(self.task.data_stack.try_pop()?)
    }

    #[inline]
    pub(crate) fn push(&mut self, val: Cell) -> Result<(), Error> {
        Ok(self.task.data_stack.push(val)?)
    }

    #[inline]
    pub(crate) fn rpop(&mut self) -> Result<Cell, Error> {
        self.task.return_stack.try_pop().map_err(Error::ReturnStack)
    }

    #[inline]
    pub(crate) fn rpush(&mut self, val: Cell) -> Result<(), Error> {
        self.task.return_stack.push(val).map_err(Error::ReturnStack)
    }

    #[inline]
    pub(crate) fn pop_usize(&mut self) -> Result<usize, Error> {
        let val = self.pop()?;
        usize::try_from(val).map_err(|_| Error::Throw(throw::INVALID_NUMERIC_ARGUMENT))
    }

    pub(crate) fn pop_xt(&mut self) -> Result<Xt, Error> {
        let cell = self.pop()?;
        Xt::from_cell(cell)
    }
}

#[cfg(test)]
pub mod test {
    use super::*;
    use crate::{input::SourceId, testutil::blocking_runtest, Lookup};

    fn forth() -> Forth<()> {
        Forth::new(ForthParams::default(), (), &[]).unwrap()
    }

    #[test]
    fn square() {
        let mut forth = forth();
        forth.fill_input(": SQUARE DUP * ;").unwrap();
        forth.process_line().unwrap();
        forth.fill_input("5 SQUARE").unwrap();
        forth.process_line().unwrap();
        assert_eq!(forth.task().data_stack.peek(), Some(25));
    }

    #[test]
    fn catch_restores_depths() {
        let mut forth = forth();
        forth.fill_input(": BAD 1 2 3 >R >R -4 THROW ;").unwrap();
        forth.process_line().unwrap();
        forth.fill_input("7 ' BAD CATCH").unwrap();
        forth.process_line().unwrap();
        let stack: Vec<Cell> = forth.task().data_stack.iter_bottom_up().collect();
        assert_eq!(stack, [7, -4]);
        assert_eq!(forth.task().return_stack.depth(), 0);
    }

    #[test]
    fn errors_reset_the_task() {
        let mut forth = forth();
        forth.fill_input("1 2 3 10 0 /").unwrap();
        assert_eq!(forth.process_line().map_err(|e| e.code()), Err(throw::DIVISION_BY_ZERO));
        assert_eq!(forth.task().data_stack.depth(), 0);
        assert!(forth.output.as_str().contains("Division by zero"));
        assert_eq!(forth.task().input.source(), SourceId::Console);
    }

    #[test]
    fn runaway_recursion() {
        let mut forth = forth();
        forth.fill_input(": DOWN RECURSE ;").unwrap();
        forth.process_line().unwrap();
        forth.fill_input("DOWN").unwrap();
        let err = forth.process_line().unwrap_err();
        assert_eq!(err.code(), throw::RETURN_STACK_OVERFLOW);
    }

    #[test]
    fn swap_tasks() {
        let mut forth = forth();
        forth.fill_input("1 2 3").unwrap();
        forth.process_line().unwrap();
        let other = forth.new_task();
        let first = forth.swap_task(other);
        assert_eq!(first.data_stack.depth(), 3);
        assert_eq!(forth.task().data_stack.depth(), 0);
        forth.fill_input("42").unwrap();
        forth.process_line().unwrap();
        let second = forth.swap_task(first);
        assert_eq!(second.data_stack.peek(), Some(42));
        assert_eq!(forth.task().data_stack.depth(), 3);
    }

    #[test]
    fn custom_param_limit() {
        fn nothing(_: &mut (), _: &[Cell]) -> Cell {
            0
        }
        static TOO_MANY: &[CustomFunction<()>] = &[crate::custom!("WIDE", nothing, 6, false)];
        let res = Forth::new(ForthParams::default(), (), TOO_MANY);
        assert!(matches!(res, Err(Error::Image(ImageError::NumParams))));
    }

    #[test]
    fn image_round_trip() {
        let mut forth = forth();
        forth.fill_input(": TRIPLE 3 * ; VARIABLE V 9 V !").unwrap();
        forth.process_line().unwrap();
        let bytes = forth.save_image(None).unwrap();

        let mut loaded = Forth::from_image(ForthParams::default(), (), &[], &bytes).unwrap();
        assert!(loaded.entry_point().is_none());
        loaded.fill_input("V @ TRIPLE .").unwrap();
        loaded.process_line().unwrap();
        assert_eq!(loaded.output.as_str(), "27 ok.\n");
    }

    #[test]
    fn absurd_image_sizes_are_refused() {
        let bytes = forth().save_image(None).unwrap();
        // data and return stack sizes are the sixth and seventh info fields
        let mut bad = bytes.clone();
        bad[40..48].copy_from_slice(&[0x7F, 0xFF, 0xFF, 0xF0, 0x7F, 0xFF, 0xFF, 0xF0]);
        let res = Forth::from_image(ForthParams::default(), (), &[], &bad);
        assert!(matches!(res, Err(Error::Image(ImageError::NoMem))));

        let mut ok = bytes;
        ok[40..44].copy_from_slice(&64u32.to_be_bytes());
        let loaded = Forth::from_image(ForthParams::default(), (), &[], &ok).unwrap();
        assert_eq!(loaded.task().data_stack.capacity(), 64);
    }

    #[test]
    fn turnkey_round_trip() {
        let mut forth = forth();
        forth.fill_input(": MAIN 6 7 * ;").unwrap();
        forth.process_line().unwrap();
        let Lookup::Normal(main) = forth.dict.find(b"MAIN") else {
            panic!("MAIN missing");
        };
        let bytes = forth.save_image(Some(main)).unwrap();

        let mut loaded = Forth::from_image(ForthParams::default(), (), &[], &bytes).unwrap();
        assert!(!loaded.dict.has_names());
        let entry = loaded.entry_point().unwrap();
        loaded.execute(entry).unwrap();
        assert_eq!(loaded.task().data_stack.peek(), Some(42));
    }

    #[test]
    fn interpreter_ui() {
        blocking_runtest(
            r#"
            > 2 3 + .
            < 5 ok.
            > : T1 BEGIN DUP . 1- DUP 0= UNTIL DROP ;
            > 3 T1
            < 3 2 1 ok.
            x : NOPE NOT-A-WORD ;
            > 4 5 SWAP . .
            < 4 5 ok.
            > 1 2 2DUP .S
            < <4> 1 2 1 2 ok.
            "#,
        );
    }
}
