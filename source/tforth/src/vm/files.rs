//! Input sources, file words and image saving.

use alloc::{vec, vec::Vec};
use core::fmt::Write;

use crate::{
    dictionary::NameDisplay,
    double::Double,
    host::{FileId, FileMode, Host},
    image::ImageError,
    input::SourceId,
    throw,
    token::Xt,
    vm::Forth,
    Cell, Error, UCell, FALSE, TRUE,
};

fn to_double(n: u64) -> Double {
    (n as UCell, (n >> 32) as UCell)
}

fn from_double((lo, hi): Double) -> u64 {
    u64::from(hi) << 32 | u64::from(lo)
}

impl<T: Host + 'static> Forth<T> {
    // -- sources --

    /// Interpret `text` as if it were the input buffer, then resume the
    /// current source.
    pub(crate) fn evaluate(&mut self, text: &[u8]) -> Result<(), Error> {
        self.task.input.push_frame(SourceId::Evaluate)?;
        self.task.input.fill_unbounded(text);
        let res = self.interpret();
        self.task.input.pop_frame();
        res
    }

    /// Read the next line of the current source. `false` when it has none.
    pub(crate) fn refill(&mut self) -> Result<bool, Error> {
        match self.task.input.source() {
            SourceId::Evaluate => Ok(false),
            SourceId::Console => {
                self.flush_output();
                match self.host_ctxt.console_accept(self.task.input.capacity()) {
                    Some(line) => {
                        self.task.input.fill(&line)?;
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
            SourceId::File(fid) => self.refill_from_file(fid),
        }
    }

    fn refill_from_file(&mut self, fid: FileId) -> Result<bool, Error> {
        let max = self.task.input.capacity();
        let Some((line, complete)) = self.next_line(fid, max)? else {
            return Ok(false);
        };
        if !complete {
            return Err(Error::LineTooLong);
        }
        let number = self.task.input.line_number() + 1;
        self.task.input.set_line_number(number);
        self.task.input.fill(&line)?;
        if self.vars.echo != 0 {
            self.output.push_bstr(&line);
            self.output.push_str("\n");
        }
        Ok(true)
    }

    /// Read one line of at most `max` bytes from the current position,
    /// leaving the file just past its terminator. The flag is false when
    /// the line was cut at `max`.
    fn next_line(&mut self, fid: FileId, max: usize) -> Result<Option<(Vec<u8>, bool)>, Error> {
        let io = Error::Throw(throw::FILE_IO);
        let pos = self.host_ctxt.file_position(fid).ok_or(io)?;
        // room for a CR LF after a full line
        let mut buf = vec![0u8; max + 2];
        let n = self.host_ctxt.read_file(fid, &mut buf).ok_or(io)?;
        if n == 0 {
            return Ok(None);
        }
        let read = &buf[..n];
        let strip_cr = |line: &[u8]| match line {
            [rest @ .., b'\r'] => rest.len(),
            _ => line.len(),
        };
        let (len, consumed, complete) = match read.iter().position(|&b| b == b'\n') {
            Some(nl) if strip_cr(&read[..nl]) <= max => (strip_cr(&read[..nl]), nl + 1, true),
            None if n <= max => (strip_cr(read), n, true),
            _ => (max, max, false),
        };
        if !self.host_ctxt.reposition_file(fid, pos + consumed as u64) {
            return Err(io);
        }
        Ok(Some((read[..len].to_vec(), complete)))
    }

    /// Interpret every line of an open file, then close it.
    pub(crate) fn include_file(&mut self, fid: FileId) -> Result<(), Error> {
        if let Err(error) = self.task.input.push_frame(SourceId::File(fid)) {
            self.host_ctxt.close_file(fid);
            return Err(error);
        }
        tracing::debug!(fid = fid.0, level = self.task.input.depth(), "include start");
        let res = self.include_lines(fid);
        if let Err(error) = &res {
            self.report_include_error(error);
        }
        self.task.input.pop_frame();
        self.host_ctxt.close_file(fid);
        tracing::debug!(fid = fid.0, ok = res.is_ok(), "include end");
        res
    }

    fn include_lines(&mut self, fid: FileId) -> Result<(), Error> {
        while self.refill_from_file(fid)? {
            self.interpret()?;
        }
        Ok(())
    }

    fn report_include_error(&mut self, error: &Error) {
        if error.is_bye() {
            return;
        }
        if self.output.column() != 0 {
            self.output.push_str("\n");
        }
        let _ = writeln!(
            self.output,
            "INCLUDE error on line #{}, level = {}",
            self.task.input.line_number(),
            self.task.input.depth(),
        );
        self.show_position(true);
    }

    pub(crate) fn included(&mut self, name: &[u8]) -> Result<(), Error> {
        let Some(fid) = self.host_ctxt.open_file(name, FileMode::READ_ONLY) else {
            tracing::warn!(name = %NameDisplay(name), "could not open include file");
            return Err(Error::Throw(throw::NO_SUCH_FILE));
        };
        tracing::info!(name = %NameDisplay(name), "including");
        self.include_file(fid)
    }

    /// Interpret a whole file from the top level. Failures are reported
    /// and the task reset, as [`process_line`](Self::process_line) does.
    pub fn include_path(&mut self, name: &[u8]) -> Result<(), Error> {
        let res = self.included(name);
        if let Err(error) = &res {
            self.report_error(error);
            self.reset();
        }
        res
    }

    pub(crate) fn include(&mut self) -> Result<(), Error> {
        let (start, len) = self
            .task
            .input
            .parse_name()
            .ok_or(Error::Throw(throw::ZERO_LENGTH_NAME))?;
        let name = self.task.input.bytes()[start..start + len].to_vec();
        self.included(&name)
    }

    /// `SET-SOURCE ( c-addr u -- )`
    pub(crate) fn set_source(&mut self) -> Result<(), Error> {
        let text = self.pop_string()?;
        self.task.input.fill_unbounded(&text);
        Ok(())
    }

    /// `PUSH-SOURCE-ID ( id -- )`
    pub(crate) fn push_source_id(&mut self) -> Result<(), Error> {
        let id = self.pop()?;
        self.task.input.push_frame(SourceId::from_cell(id))
    }

    /// `POP-SOURCE-ID ( -- id )`, 0 when nothing was pushed.
    pub(crate) fn pop_source_id(&mut self) -> Result<(), Error> {
        let id = self.task.input.pop_frame().map_or(0, SourceId::to_cell);
        self.push(id)
    }

    // -- files --

    fn pop_string(&mut self) -> Result<Vec<u8>, Error> {
        let len = self.pop_len()?;
        let addr = self.pop()?;
        self.read_bytes(addr, len)
    }

    fn pop_fid(&mut self) -> Result<FileId, Error> {
        Ok(FileId(self.pop()?))
    }

    fn push_ior(&mut self, ok: bool) -> Result<(), Error> {
        self.push(if ok { 0 } else { throw::FILE_IO })
    }

    /// `OPEN-FILE` and `CREATE-FILE ( c-addr u fam -- fileid ior )`
    pub(crate) fn open_file(&mut self, create: bool) -> Result<(), Error> {
        let mode = FileMode(self.pop()?);
        let name = self.pop_string()?;
        let fid = if create {
            self.host_ctxt.create_file(&name, mode)
        } else {
            self.host_ctxt.open_file(&name, mode)
        };
        match fid {
            Some(fid) => {
                self.push(fid.0)?;
                self.push(0)
            }
            None => {
                tracing::debug!(name = %NameDisplay(&name), create, "open failed");
                self.push(0)?;
                self.push(throw::NO_SUCH_FILE)
            }
        }
    }

    pub(crate) fn close_file(&mut self) -> Result<(), Error> {
        let fid = self.pop_fid()?;
        let ok = self.host_ctxt.close_file(fid);
        self.push_ior(ok)
    }

    /// `READ-FILE ( c-addr u fileid -- u' ior )`
    pub(crate) fn read_file(&mut self) -> Result<(), Error> {
        let fid = self.pop_fid()?;
        let len = self.pop_len()?;
        let addr = self.pop()?;
        let mut buf = vec![0u8; len];
        match self.host_ctxt.read_file(fid, &mut buf) {
            Some(n) => {
                self.write_bytes(addr, &buf[..n])?;
                self.push(n as Cell)?;
                self.push(0)
            }
            None => {
                self.push(0)?;
                self.push(throw::FILE_IO)
            }
        }
    }

    pub(crate) fn write_file(&mut self) -> Result<(), Error> {
        let fid = self.pop_fid()?;
        let data = self.pop_string()?;
        let ok = self.host_ctxt.write_file(fid, &data);
        self.push_ior(ok)
    }

    /// `READ-LINE ( c-addr u fileid -- u' flag ior )`
    pub(crate) fn read_line(&mut self) -> Result<(), Error> {
        let fid = self.pop_fid()?;
        let max = self.pop_len()?;
        let addr = self.pop()?;
        match self.next_line(fid, max) {
            Ok(Some((line, _))) => {
                self.write_bytes(addr, &line)?;
                self.push(line.len() as Cell)?;
                self.push(TRUE)?;
                self.push(0)
            }
            Ok(None) => {
                self.push(0)?;
                self.push(FALSE)?;
                self.push(0)
            }
            Err(error) => {
                self.push(0)?;
                self.push(FALSE)?;
                self.push(error.code())
            }
        }
    }

    fn push_u64(&mut self, val: Option<u64>) -> Result<(), Error> {
        self.push_double(to_double(val.unwrap_or(0)))?;
        self.push_ior(val.is_some())
    }

    pub(crate) fn file_size(&mut self) -> Result<(), Error> {
        let fid = self.pop_fid()?;
        let size = self.host_ctxt.file_size(fid);
        self.push_u64(size)
    }

    pub(crate) fn file_position(&mut self) -> Result<(), Error> {
        let fid = self.pop_fid()?;
        let pos = self.host_ctxt.file_position(fid);
        self.push_u64(pos)
    }

    pub(crate) fn reposition_file(&mut self) -> Result<(), Error> {
        let fid = self.pop_fid()?;
        let pos = from_double(self.pop_double()?);
        let ok = self.host_ctxt.reposition_file(fid, pos);
        self.push_ior(ok)
    }

    pub(crate) fn resize_file(&mut self) -> Result<(), Error> {
        let fid = self.pop_fid()?;
        let size = from_double(self.pop_double()?);
        let ok = self.host_ctxt.resize_file(fid, size);
        self.push_ior(ok)
    }

    pub(crate) fn flush_file(&mut self) -> Result<(), Error> {
        let fid = self.pop_fid()?;
        let ok = self.host_ctxt.flush_file(fid);
        self.push_ior(ok)
    }

    pub(crate) fn delete_file(&mut self) -> Result<(), Error> {
        let name = self.pop_string()?;
        let ok = self.host_ctxt.delete_file(&name);
        self.push_ior(ok)
    }

    /// `RENAME-FILE ( c-addr1 u1 c-addr2 u2 -- ior )`
    pub(crate) fn rename_file(&mut self) -> Result<(), Error> {
        let to = self.pop_string()?;
        let from = self.pop_string()?;
        let ok = self.host_ctxt.rename_file(&from, &to);
        self.push_ior(ok)
    }

    // -- images --

    /// `SAVE-FORTH ( c-addr u -- ior )` and `TURNKEY ( c-addr u xt -- ior )`
    pub(crate) fn save_forth(&mut self, turnkey: bool) -> Result<(), Error> {
        let entry = if turnkey { Some(self.pop_xt()?) } else { None };
        let name = self.pop_string()?;
        let ior = match self.write_image(&name, entry) {
            Ok(()) => 0,
            Err(error) => {
                tracing::warn!(name = %NameDisplay(&name), %error, "image not saved");
                error.code()
            }
        };
        self.push(ior)
    }

    fn write_image(&mut self, name: &[u8], entry: Option<Xt>) -> Result<(), Error> {
        let bytes = self.save_image(entry)?;
        let mode = FileMode(FileMode::WRITE_ONLY.0 | FileMode::BIN);
        let fid = self
            .host_ctxt
            .create_file(name, mode)
            .ok_or(Error::Image(ImageError::OpenFile))?;
        let written = self.host_ctxt.write_file(fid, &bytes);
        let closed = self.host_ctxt.close_file(fid);
        if !(written && closed) {
            return Err(Error::Image(ImageError::WriteFile));
        }
        tracing::info!(
            name = %NameDisplay(name),
            bytes = bytes.len(),
            turnkey = entry.is_some(),
            "image saved"
        );
        Ok(())
    }
}

#[cfg(test)]
pub mod test {
    use crate::{
        testutil::{blocking_runtest_with, MemHost},
        throw, Forth, ForthParams,
    };

    fn forth_with(host: MemHost) -> Forth<MemHost> {
        Forth::new(ForthParams::default(), host, &[]).unwrap()
    }

    #[test]
    fn include_defines_words() {
        let host = MemHost::default()
            .with_file("lib.fs", ": SQUARE DUP * ;\r\n\\ a comment\n: CUBE DUP SQUARE * ;\n")
            .with_file("main.fs", "INCLUDE lib.fs\n3 CUBE");
        let mut forth = forth_with(host);
        blocking_runtest_with(
            &mut forth,
            r#"
            > INCLUDE main.fs .
            < 27 ok.
            > S" lib.fs" INCLUDED 4 SQUARE .
            < SQUARE redefined.
            < CUBE redefined.
            < 16 ok.
            x INCLUDE missing.fs
            "#,
        );
        assert_eq!(forth.task().input.depth(), 0);
    }

    #[test]
    fn include_errors_show_the_line() {
        let host = MemHost::default().with_file("bad.fs", "1 2 +\nOOPS 3\n4\n");
        let mut forth = forth_with(host);
        forth.fill_input("INCLUDE bad.fs").unwrap();
        let err = forth.process_line().unwrap_err();
        assert_eq!(err.code(), throw::UNDEFINED_WORD);
        let out = forth.output.as_str();
        assert!(out.contains("OOPS ?"), "{out}");
        assert!(out.contains("INCLUDE error on line #2, level = 1"), "{out}");
        assert!(out.contains("OOPS 3\n^^^^^\n"), "{out}");
        assert_eq!(forth.task().data_stack.depth(), 0);
        assert!(forth.host_ctxt.open_count() == 0);
    }

    #[test]
    fn evaluate_and_source_ids() {
        let mut forth = forth_with(MemHost::default());
        blocking_runtest_with(
            &mut forth,
            r#"
            > S" 1 2 + ." EVALUATE
            < 3 ok.
            > : EV S" SOURCE-ID" EVALUATE ; EV . SOURCE-ID .
            < -1 0 ok.
            > : SWITCHED 2 PUSH-SOURCE-ID SOURCE-ID POP-SOURCE-ID ;
            > SWITCHED . . SOURCE-ID .
            < 2 2 0 ok.
            > POP-SOURCE-ID .
            < 0 ok.
            > : INNER S" 7 ." EVALUATE ; S" INNER 8 ." EVALUATE
            < 7 8 ok.
            "#,
        );
    }

    #[test]
    fn file_words() {
        let mut forth = forth_with(MemHost::default().with_file("data.txt", "alpha\nbeta\n"));
        blocking_runtest_with(
            &mut forth,
            r#"
            > S" data.txt" R/O OPEN-FILE . VALUE FD
            < 0 ok.
            > FD FILE-SIZE . D.
            < 0 11 ok.
            > PAD 80 FD READ-LINE . . PAD SWAP TYPE
            < 0 -1 alphaok.
            > PAD 80 FD READ-LINE . . PAD SWAP TYPE
            < 0 -1 betaok.
            > PAD 80 FD READ-LINE . . .
            < 0 0 0 ok.
            > FD CLOSE-FILE .
            < 0 ok.
            > S" out.txt" W/O CREATE-FILE . VALUE FO
            < 0 ok.
            > S" written" FO WRITE-FILE . FO CLOSE-FILE .
            < 0 0 ok.
            > S" out.txt" S" moved.txt" RENAME-FILE .
            < 0 ok.
            > S" moved.txt" DELETE-FILE . S" moved.txt" DELETE-FILE .
            < 0 -37 ok.
            > S" nope" R/O OPEN-FILE . .
            < -38 0 ok.
            "#,
        );
        assert!(forth.host_ctxt.file(b"out.txt").is_none());
    }

    #[test]
    fn save_forth_writes_an_image() {
        let mut forth = forth_with(MemHost::default());
        blocking_runtest_with(
            &mut forth,
            r#"
            > : GREET ." hello" ;
            > S" app.dic" SAVE-FORTH .
            < 0 ok.
            > S" app.tk" ' GREET TURNKEY .
            < 0 ok.
            "#,
        );
        let image = forth.host_ctxt.file(b"app.dic").unwrap().to_vec();
        let mut loaded = Forth::from_image(ForthParams::default(), (), &[], &image).unwrap();
        loaded.fill_input("GREET").unwrap();
        loaded.process_line().unwrap();
        assert_eq!(loaded.output.as_str(), "hellook.\n");

        let turnkey = forth.host_ctxt.file(b"app.tk").unwrap().to_vec();
        let mut loaded = Forth::from_image(ForthParams::default(), (), &[], &turnkey).unwrap();
        let entry = loaded.entry_point().unwrap();
        loaded.execute(entry).unwrap();
        assert_eq!(loaded.output.as_str(), "hello");
    }
}
