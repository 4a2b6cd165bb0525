//! # Test Utilities
//!
//! Helpers for running "ui tests", or executing forth code at test time, and
//! [`MemHost`], a host whose console and files live in memory.
//!
//! ## UI Tests
//!
//! Forth code provided as a str will have one of the following things for
//! each line:
//!
//! * Configuration values for the VM, specified as "frontmatter comments".
//!   These must appear before any other non-comment lines. Currently accepted:
//!     * `( data_stack_size USIZE )`
//!     * `( return_stack_size USIZE )`
//!     * `( locals_stack_size USIZE )`
//!     * `( tib_size USIZE )`
//!     * `( include_depth USIZE )`
//!     * `( name_size USIZE )`
//!     * `( code_size USIZE )`
//!     * `( heap_size USIZE )`
//!     * `( heap_kind free-list|system )`
//!     * `( case_insensitive BOOL )`
//!     * `( quiet BOOL )`
//! * Comment lines. These are any lines just containing a `( ... )` style forth comment.
//! * Successful input lines, starting with `> ...`.
//! * Successful output lines, starting with `< ...`.
//!     * Any successful input line can have zero or more output lines
//!     * If *no* output lines are specified, ANY successful output is accepted/ignored.
//! * Unsuccessful input lines, starting with `x ...`.
//!     * This line is expected to raise a throw code that nothing catches,
//!       so `process_line` returns an `Err()`.
//!     * Unsuccessful input lines may not have any successful output
//!
//! ### Example
//!
//! ```rust
//! # use tforth::testutil::blocking_runtest;
//! #
//! # blocking_runtest(r#"
//! ( specify VM settings with frontmatter )
//! ( data_stack_size 4 )
//!
//! ( specify input with no output )
//! > : STAR 42 EMIT ;
//!
//! ( specify input and output )
//! > STAR
//! < *ok.
//!
//! ( specify lines that cause exceptions/errors )
//! x STARB
//! x 1 2 3 4 5
//! # "#)
//! ```

use alloc::{
    collections::{BTreeMap, VecDeque},
    string::{String, ToString},
    vec,
    vec::Vec,
};

use crate::{
    heap::HeapKind,
    host::{FileId, FileMode, Host},
    Error, Forth, ForthParams,
};

/// Run the given forth ui test against a fresh VM with no host.
///
/// Does accept any/all/none of the configuration frontmatter listed above.
pub fn blocking_runtest(contents: &str) {
    let tokd = tokenize(contents, true).unwrap();
    let mut forth = Forth::new(tokd.settings, (), &[]).unwrap();
    blocking_steps_with(tokd.steps.as_slice(), &mut forth);
}

/// Run the given forth ui-test against the given forth vm.
///
/// Does not accept ui-tests with frontmatter configuration (will panic)
pub fn blocking_runtest_with<T: Host + 'static>(forth: &mut Forth<T>, contents: &str) {
    let tokd = tokenize(contents, false).unwrap();
    blocking_steps_with(tokd.steps.as_slice(), forth);
}

fn check_output(res: Result<(), Error>, outcome: &Outcome, output: &str) {
    println!("< {output}");
    match (res, outcome) {
        (Ok(()), Outcome::OkAnyOutput) => {}
        (Ok(()), Outcome::OkWithOutput(exp)) => {
            let act_lines = output.lines().collect::<Vec<&str>>();
            assert_eq!(act_lines.len(), exp.len(), "output was:\n{output}");
            act_lines.iter().zip(exp.iter()).for_each(|(a, e)| {
                assert_eq!(a.trim_end(), e.trim_end());
            })
        }
        (Err(_e), Outcome::FatalError) => {}
        (res, exp) => {
            eprintln!("Error!");
            eprintln!("Expected: {exp:?}");
            eprintln!("Got: {res:?}");
            eprintln!("Output:\n{output}");
            panic!();
        }
    }
}

// Runs the given steps against the given forth VM.
//
// Panics on any mismatch
fn blocking_steps_with<T: Host + 'static>(steps: &[Step], forth: &mut Forth<T>) {
    for Step { input, output: outcome } in steps {
        println!("> {input}");
        forth.fill_input(input).unwrap();
        let res = forth.process_line();
        check_output(res, outcome, forth.output.as_str());
        forth.output.clear();
    }
}

#[derive(Debug)]
enum Outcome {
    OkAnyOutput,
    OkWithOutput(Vec<String>),
    FatalError,
}

#[derive(Debug)]
struct Step {
    input: String,
    output: Outcome,
}

#[derive(Default, Debug)]
struct Tokenized {
    settings: ForthParams,
    steps: Vec<Step>,
}

fn setting<V: core::str::FromStr>(split: &mut core::str::SplitWhitespace<'_>) -> V
where
    V::Err: core::fmt::Debug,
{
    split.next().unwrap().parse::<V>().unwrap()
}

fn tokenize(contents: &str, allow_frontmatter: bool) -> Result<Tokenized, ()> {
    let mut output = Tokenized::default();
    let mut frontmatter_done = !allow_frontmatter;

    for line in contents.lines() {
        let Some((tok, remain)) = line.trim_start().split_once(' ') else {
            continue;
        };

        match tok {
            ">" => {
                frontmatter_done = true;
                output.steps.push(Step {
                    input: remain.to_string(),
                    output: Outcome::OkAnyOutput,
                });
            }
            "<" => {
                frontmatter_done = true;
                let cur_step = output.steps.last_mut().unwrap();
                let expected_out = remain.to_string();
                match &mut cur_step.output {
                    Outcome::OkAnyOutput => {
                        cur_step.output = Outcome::OkWithOutput(vec![expected_out]);
                    }
                    Outcome::OkWithOutput(o) => {
                        o.push(expected_out);
                    }
                    Outcome::FatalError => panic!("Fatal error can't set output"),
                }
            }
            "x" => {
                frontmatter_done = true;
                output.steps.push(Step {
                    input: remain.to_string(),
                    output: Outcome::FatalError,
                });
            }
            "(" => {
                let mut split = remain.split_whitespace();
                let settings = &mut output.settings;
                let mut is_comment = false;
                match split.next() {
                    Some("data_stack_size") => settings.data_stack_size = setting(&mut split),
                    Some("return_stack_size") => settings.return_stack_size = setting(&mut split),
                    Some("locals_stack_size") => settings.locals_stack_size = setting(&mut split),
                    Some("tib_size") => settings.tib_size = setting(&mut split),
                    Some("include_depth") => settings.include_depth = setting(&mut split),
                    Some("name_size") => settings.name_size = setting(&mut split),
                    Some("code_size") => settings.code_size = setting(&mut split),
                    Some("heap_size") => settings.heap_size = setting(&mut split),
                    Some("heap_kind") => {
                        settings.heap_kind = match split.next() {
                            Some("free-list") => HeapKind::FreeList,
                            Some("system") => HeapKind::System,
                            other => panic!("unknown heap kind {other:?}"),
                        }
                    }
                    Some("case_insensitive") => settings.case_insensitive = setting(&mut split),
                    Some("quiet") => settings.quiet = setting(&mut split),
                    Some(_) => {
                        is_comment = true;
                    }
                    _ => panic!(),
                }
                if !is_comment {
                    assert!(!frontmatter_done, "Unexpected frontmatter settings!");
                    assert_eq!(Some(")"), split.next());
                }
            }
            _ => {}
        }
    }

    Ok(output)
}

#[derive(Debug)]
struct OpenFile {
    name: Vec<u8>,
    pos: usize,
    mode: FileMode,
}

/// A [`Host`] with an in-memory file system and a scripted console.
///
/// Console input is taken from lines queued with
/// [`with_console_line`](Self::with_console_line), and everything written
/// to the console collects in [`console`](Self::console).
#[derive(Debug, Default)]
pub struct MemHost {
    files: BTreeMap<Vec<u8>, Vec<u8>>,
    open: BTreeMap<FileId, OpenFile>,
    next_fid: i32,
    input: VecDeque<u8>,
    console: String,
}

impl MemHost {
    pub fn with_file(mut self, name: &str, contents: &str) -> Self {
        self.files.insert(name.as_bytes().to_vec(), contents.as_bytes().to_vec());
        self
    }

    pub fn with_console_line(mut self, line: &str) -> Self {
        self.input.extend(line.bytes());
        self.input.push_back(b'\n');
        self
    }

    pub fn file(&self, name: &[u8]) -> Option<&[u8]> {
        self.files.get(name).map(Vec::as_slice)
    }

    pub fn console(&self) -> &str {
        &self.console
    }

    /// How many handles are still open.
    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    fn register(&mut self, name: &[u8], mode: FileMode) -> FileId {
        self.next_fid += 1;
        let fid = FileId(self.next_fid);
        self.open.insert(
            fid,
            OpenFile {
                name: name.to_vec(),
                pos: 0,
                mode,
            },
        );
        fid
    }

    fn contents(&mut self, fid: FileId) -> Option<(&mut OpenFile, &mut Vec<u8>)> {
        let handle = self.open.get_mut(&fid)?;
        let data = self.files.get_mut(&handle.name)?;
        Some((handle, data))
    }
}

impl Host for MemHost {
    fn console_write(&mut self, text: &str) -> bool {
        self.console.push_str(text);
        true
    }

    fn console_key(&mut self) -> Option<u8> {
        self.input.pop_front()
    }

    fn key_available(&mut self) -> bool {
        !self.input.is_empty()
    }

    fn console_accept(&mut self, max: usize) -> Option<Vec<u8>> {
        if self.input.is_empty() {
            return None;
        }
        let mut line = Vec::new();
        while let Some(c) = self.input.pop_front() {
            if c == b'\n' {
                break;
            }
            if line.len() < max {
                line.push(c);
            }
        }
        Some(line)
    }

    fn open_file(&mut self, name: &[u8], mode: FileMode) -> Option<FileId> {
        self.files.contains_key(name).then(|| self.register(name, mode))
    }

    fn create_file(&mut self, name: &[u8], mode: FileMode) -> Option<FileId> {
        self.files.insert(name.to_vec(), Vec::new());
        Some(self.register(name, mode))
    }

    fn close_file(&mut self, fid: FileId) -> bool {
        self.open.remove(&fid).is_some()
    }

    fn read_file(&mut self, fid: FileId, buf: &mut [u8]) -> Option<usize> {
        let (handle, data) = self.contents(fid)?;
        if !handle.mode.readable() {
            return None;
        }
        let rest = data.get(handle.pos..).unwrap_or(&[]);
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        handle.pos += n;
        Some(n)
    }

    fn write_file(&mut self, fid: FileId, buf: &[u8]) -> bool {
        let Some((handle, data)) = self.contents(fid) else {
            return false;
        };
        if !handle.mode.writable() {
            return false;
        }
        let end = handle.pos + buf.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[handle.pos..end].copy_from_slice(buf);
        handle.pos = end;
        true
    }

    fn file_position(&mut self, fid: FileId) -> Option<u64> {
        self.open.get(&fid).map(|h| h.pos as u64)
    }

    fn reposition_file(&mut self, fid: FileId, pos: u64) -> bool {
        match self.open.get_mut(&fid) {
            Some(handle) => {
                handle.pos = pos as usize;
                true
            }
            None => false,
        }
    }

    fn file_size(&mut self, fid: FileId) -> Option<u64> {
        self.contents(fid).map(|(_, data)| data.len() as u64)
    }

    fn resize_file(&mut self, fid: FileId, size: u64) -> bool {
        match self.contents(fid) {
            Some((_, data)) => {
                data.resize(size as usize, 0);
                true
            }
            None => false,
        }
    }

    fn flush_file(&mut self, fid: FileId) -> bool {
        self.open.contains_key(&fid)
    }

    fn delete_file(&mut self, name: &[u8]) -> bool {
        self.files.remove(name).is_some()
    }

    fn rename_file(&mut self, from: &[u8], to: &[u8]) -> bool {
        match self.files.remove(from) {
            Some(data) => {
                self.files.insert(to.to_vec(), data);
                true
            }
            None => false,
        }
    }
}
