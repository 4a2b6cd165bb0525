use alloc::vec::Vec;

use crate::{host::FileId, Cell, Error};

/// Where the text in the input buffer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceId {
    Console,
    /// A string handed to `EVALUATE`.
    Evaluate,
    File(FileId),
}

impl SourceId {
    pub fn to_cell(self) -> Cell {
        match self {
            SourceId::Console => 0,
            SourceId::Evaluate => -1,
            SourceId::File(fid) => fid.0,
        }
    }

    pub fn from_cell(c: Cell) -> Self {
        match c {
            0 => SourceId::Console,
            -1 => SourceId::Evaluate,
            n => SourceId::File(FileId(n)),
        }
    }
}

/// The input state saved when one source includes another.
#[derive(Debug)]
pub struct IncludeFrame {
    pub source: SourceId,
    pub to_in: usize,
    pub line_number: Cell,
    pub line: Vec<u8>,
}

/// The terminal input buffer.
///
/// Holds the current line, the parse cursor (`>IN`) and the stack of
/// suspended sources. Parsing never copies: the parse functions return
/// `(start, len)` ranges into the buffer.
pub struct InputBuf {
    line: Vec<u8>,
    capacity: usize,
    to_in: usize,
    source: SourceId,
    line_number: Cell,
    frames: Vec<IncludeFrame>,
    max_depth: usize,
}

#[inline]
fn is_blank(c: u8) -> bool {
    c <= b' '
}

impl InputBuf {
    pub fn new(capacity: usize, max_depth: usize) -> Self {
        Self {
            line: Vec::with_capacity(capacity),
            capacity,
            to_in: 0,
            source: SourceId::Console,
            line_number: 0,
            frames: Vec::new(),
            max_depth,
        }
    }

    /// Replace the current line, enforcing the buffer size.
    pub fn fill(&mut self, bytes: &[u8]) -> Result<(), Error> {
        if bytes.len() > self.capacity {
            return Err(Error::LineTooLong);
        }
        self.fill_unbounded(bytes);
        Ok(())
    }

    /// Replace the current line with text of any length. Used for strings
    /// handed to `EVALUATE`, which do not come from a device.
    pub fn fill_unbounded(&mut self, bytes: &[u8]) {
        self.line.clear();
        self.line.extend_from_slice(bytes);
        self.to_in = 0;
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.line
    }

    #[inline]
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.line
    }

    /// `#TIB`
    #[inline]
    pub fn len(&self) -> usize {
        self.line.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.line.is_empty()
    }

    /// Storing to `#TIB` truncates the line or pads it with blanks.
    pub fn set_len(&mut self, len: usize) {
        self.line.resize(len.min(self.capacity.max(self.line.len())), b' ');
    }

    #[inline]
    pub fn to_in(&self) -> usize {
        self.to_in
    }

    #[inline]
    pub fn set_to_in(&mut self, to_in: usize) {
        self.to_in = to_in;
    }

    #[inline]
    pub fn exhausted(&self) -> bool {
        self.to_in >= self.line.len()
    }

    #[inline]
    pub fn source(&self) -> SourceId {
        self.source
    }

    #[inline]
    pub fn set_source(&mut self, source: SourceId) {
        self.source = source;
    }

    #[inline]
    pub fn line_number(&self) -> Cell {
        self.line_number
    }

    #[inline]
    pub fn set_line_number(&mut self, line: Cell) {
        self.line_number = line;
    }

    /// Skip leading blanks, then take everything up to the next blank.
    /// `None` when only blanks remain. `>IN` ends past the delimiter.
    pub fn parse_name(&mut self) -> Option<(usize, usize)> {
        let line = &self.line;
        let mut idx = self.to_in.min(line.len());
        while idx < line.len() && is_blank(line[idx]) {
            idx += 1;
        }
        if idx >= line.len() {
            self.to_in = line.len();
            return None;
        }
        let start = idx;
        while idx < line.len() && !is_blank(line[idx]) {
            idx += 1;
        }
        self.to_in = (idx + 1).min(line.len());
        Some((start, idx - start))
    }

    /// Take everything up to `delim` without skipping anything first.
    pub fn parse(&mut self, delim: u8) -> (usize, usize) {
        let line = &self.line;
        let start = self.to_in.min(line.len());
        let mut idx = start;
        while idx < line.len() && !Self::matches(delim, line[idx]) {
            idx += 1;
        }
        self.to_in = (idx + 1).min(line.len());
        (start, idx - start)
    }

    /// Skip leading delimiters, then parse up to the next one. This is the
    /// scanning half of `WORD`.
    pub fn word(&mut self, delim: u8) -> (usize, usize) {
        let line = &self.line;
        let mut idx = self.to_in.min(line.len());
        while idx < line.len() && Self::matches(delim, line[idx]) {
            idx += 1;
        }
        self.to_in = idx;
        self.parse(delim)
    }

    // A space delimiter also matches tabs and other control characters.
    #[inline]
    fn matches(delim: u8, c: u8) -> bool {
        if delim == b' ' {
            is_blank(c)
        } else {
            c == delim
        }
    }

    /// The unparsed tail of the line.
    pub fn remaining(&self) -> &[u8] {
        &self.line[self.to_in.min(self.line.len())..]
    }

    /// Suspend the current source and switch to `source`.
    pub fn push_frame(&mut self, source: SourceId) -> Result<(), Error> {
        if self.frames.len() >= self.max_depth {
            return Err(Error::IncludeTooDeep);
        }
        let line = core::mem::take(&mut self.line);
        self.frames.push(IncludeFrame {
            source: self.source,
            to_in: self.to_in,
            line_number: self.line_number,
            line,
        });
        self.line = Vec::with_capacity(self.capacity);
        self.source = source;
        self.to_in = 0;
        self.line_number = 0;
        Ok(())
    }

    /// Resume the most recently suspended source, returning the one that
    /// was active.
    pub fn pop_frame(&mut self) -> Option<SourceId> {
        let frame = self.frames.pop()?;
        let finished = self.source;
        self.source = frame.source;
        self.to_in = frame.to_in;
        self.line_number = frame.line_number;
        self.line = frame.line;
        Some(finished)
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> impl Iterator<Item = &IncludeFrame> {
        self.frames.iter()
    }

    /// Drop every suspended source and return to the console, handing back
    /// the sources that were abandoned so their files can be closed.
    pub fn reset(&mut self) -> Vec<SourceId> {
        let mut abandoned = Vec::new();
        while let Some(src) = self.pop_frame() {
            abandoned.push(src);
        }
        self.source = SourceId::Console;
        self.line.clear();
        self.to_in = 0;
        abandoned
    }
}

#[cfg(test)]
pub mod test {
    use super::*;

    #[test]
    fn parse_words() {
        let mut input = InputBuf::new(64, 4);
        input.fill(b"  : SQUARE\tDUP * ;").unwrap();
        let mut words = alloc::vec::Vec::new();
        while let Some((start, len)) = input.parse_name() {
            words.push(input.bytes()[start..start + len].to_vec());
        }
        assert_eq!(words, [&b":"[..], b"SQUARE", b"DUP", b"*", b";"]);
        assert!(input.exhausted());
    }

    #[test]
    fn parse_delimited() {
        let mut input = InputBuf::new(64, 4);
        input.fill(b".\" hello world\" rest").unwrap();
        assert_eq!(input.parse_name(), Some((0, 2)));
        let (start, len) = input.parse(b'"');
        assert_eq!(&input.bytes()[start..start + len], b"hello world");
        assert_eq!(input.remaining(), b" rest");

        input.fill(b"xxxabcx").unwrap();
        let (start, len) = input.word(b'x');
        assert_eq!(&input.bytes()[start..start + len], b"abc");
    }

    #[test]
    fn lines_are_bounded() {
        let mut input = InputBuf::new(4, 4);
        assert_eq!(input.fill(b"12345"), Err(Error::LineTooLong));
        input.fill_unbounded(b"12345");
        assert_eq!(input.len(), 5);
    }

    #[test]
    fn frames_nest_and_unwind() {
        let mut input = InputBuf::new(16, 2);
        input.fill(b"outer line").unwrap();
        input.parse_name();
        input.push_frame(SourceId::Evaluate).unwrap();
        input.fill_unbounded(b"inner");
        input.push_frame(SourceId::File(FileId(3))).unwrap();
        assert_eq!(input.push_frame(SourceId::Evaluate), Err(Error::IncludeTooDeep));

        assert_eq!(input.pop_frame(), Some(SourceId::File(FileId(3))));
        assert_eq!(input.bytes(), b"inner");
        assert_eq!(input.reset(), [SourceId::Evaluate]);
        assert_eq!(input.source(), SourceId::Console);
        assert_eq!(input.depth(), 0);
    }
}
