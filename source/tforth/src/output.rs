use alloc::string::String;

/// Text written by the running program, waiting to be handed to the host.
///
/// Bytes are kept as Latin-1 characters so the buffer is always valid
/// UTF-8; [`latin1_bytes`] turns the text back into the bytes the program
/// wrote. The column counter backs the `OUT` variable and is reset by
/// every newline.
#[derive(Default)]
pub struct OutputBuf {
    buf: String,
    column: usize,
}

impl OutputBuf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_str(&mut self, s: &str) {
        for c in s.chars() {
            self.push_char(c);
        }
    }

    pub fn push_bstr(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.emit(b);
        }
    }

    #[inline]
    pub fn emit(&mut self, byte: u8) {
        self.push_char(char::from(byte));
    }

    fn push_char(&mut self, c: char) {
        if c == '\n' {
            self.column = 0;
        } else {
            self.column += 1;
        }
        self.buf.push(c);
    }

    #[inline]
    pub fn column(&self) -> usize {
        self.column
    }

    #[inline]
    pub fn set_column(&mut self, column: usize) {
        self.column = column;
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Drops the pending text. The column is left alone, since the text may
    /// already be on the terminal.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }
}

impl core::fmt::Write for OutputBuf {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        self.push_str(s);
        Ok(())
    }
}

/// The bytes behind text from an [`OutputBuf`], one per `char`.
///
/// Characters above U+00FF can only come from Rust strings pushed with
/// [`OutputBuf::push_str`], and come out as `?`.
pub fn latin1_bytes(text: &str) -> impl Iterator<Item = u8> + '_ {
    text.chars().map(|c| u8::try_from(c).unwrap_or(b'?'))
}
