//! The boundary between the runtime and whatever it is embedded in.
//!
//! All console and file access goes through [`Host`], and native functions
//! callable from Forth are registered as a static table of
//! [`CustomFunction`]s.

use alloc::vec::Vec;

use crate::Cell;

/// A file handle handed out by the host. Never 0 or -1, which name the
/// console and `EVALUATE` as input sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub Cell);

/// A file access method, as built by `R/O`, `W/O`, `R/W` and `BIN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMode(pub Cell);

impl FileMode {
    pub const READ_ONLY: Self = Self(0);
    pub const WRITE_ONLY: Self = Self(1);
    pub const READ_WRITE: Self = Self(2);
    pub const BIN: Cell = 4;

    #[inline]
    pub fn readable(self) -> bool {
        matches!(self.0 & 3, 0 | 2)
    }

    #[inline]
    pub fn writable(self) -> bool {
        matches!(self.0 & 3, 1 | 2)
    }
}

/// Console and file services.
///
/// Every method has a default that reports failure, so a host only needs
/// to provide what it actually supports. `()` is a host with nothing.
pub trait Host {
    /// Write text to the console. Returns `false` if there is no console.
    ///
    /// Each `char` of `text` stands for one byte the program wrote; see
    /// [`latin1_bytes`](crate::output::latin1_bytes).
    fn console_write(&mut self, _text: &str) -> bool {
        false
    }

    /// Block for one key. `None` at end of input.
    fn console_key(&mut self) -> Option<u8> {
        None
    }

    fn key_available(&mut self) -> bool {
        false
    }

    /// Read one line of at most `max` bytes, without its line terminator.
    /// `None` at end of input.
    fn console_accept(&mut self, _max: usize) -> Option<Vec<u8>> {
        None
    }

    fn open_file(&mut self, _name: &[u8], _mode: FileMode) -> Option<FileId> {
        None
    }

    fn create_file(&mut self, _name: &[u8], _mode: FileMode) -> Option<FileId> {
        None
    }

    fn close_file(&mut self, _fid: FileId) -> bool {
        false
    }

    /// Fill as much of `buf` as possible, returning how much was read. 0
    /// means end of file.
    fn read_file(&mut self, _fid: FileId, _buf: &mut [u8]) -> Option<usize> {
        None
    }

    fn write_file(&mut self, _fid: FileId, _buf: &[u8]) -> bool {
        false
    }

    fn file_position(&mut self, _fid: FileId) -> Option<u64> {
        None
    }

    fn reposition_file(&mut self, _fid: FileId, _pos: u64) -> bool {
        false
    }

    fn file_size(&mut self, _fid: FileId) -> Option<u64> {
        None
    }

    fn resize_file(&mut self, _fid: FileId, _size: u64) -> bool {
        false
    }

    fn flush_file(&mut self, _fid: FileId) -> bool {
        false
    }

    fn delete_file(&mut self, _name: &[u8]) -> bool {
        false
    }

    fn rename_file(&mut self, _from: &[u8], _to: &[u8]) -> bool {
        false
    }

    fn sleep_ms(&mut self, _ms: u32) {}
}

impl Host for () {}

/// A native function that Forth code can call by name.
///
/// `func` receives the host context and the popped parameters, first
/// parameter first. Its result is pushed only when `returns` is set.
pub struct CustomFunction<T: 'static> {
    pub name: &'static str,
    pub func: fn(&mut T, &[Cell]) -> Cell,
    pub params: u8,
    pub returns: bool,
}

/// Most parameters a [`CustomFunction`] may take.
pub const MAX_CUSTOM_PARAMS: u8 = 5;

/// Builds a [`CustomFunction`] table entry.
///
/// ```rust
/// fn double(_ctx: &mut (), args: &[i32]) -> i32 {
///     args[0] * 2
/// }
///
/// static TABLE: &[tforth::CustomFunction<()>] = &[tforth::custom!("DOUBLE", double, 1, true)];
/// # assert_eq!(TABLE[0].params, 1);
/// ```
#[macro_export]
macro_rules! custom {
    ($name:literal, $func:expr, $params:expr, $returns:expr) => {
        $crate::host::CustomFunction {
            name: $name,
            func: $func,
            params: $params,
            returns: $returns,
        }
    };
}

#[cfg(feature = "use-std")]
pub mod std_host {
    use std::{
        collections::BTreeMap,
        fs::{File, OpenOptions},
        io::{BufRead, Read, Seek, SeekFrom, Write},
        path::PathBuf,
        string::String,
        vec::Vec,
    };

    use super::{FileId, FileMode, Host};
    use crate::output::latin1_bytes;

    /// A host backed by `std::fs`, stdin and stdout.
    pub struct StdHost {
        files: BTreeMap<FileId, File>,
        next_fid: i32,
    }

    impl Default for StdHost {
        fn default() -> Self {
            Self {
                files: BTreeMap::new(),
                next_fid: 1,
            }
        }
    }

    fn path(name: &[u8]) -> PathBuf {
        PathBuf::from(String::from_utf8_lossy(name).into_owned())
    }

    impl StdHost {
        pub fn new() -> Self {
            Self::default()
        }

        fn register(&mut self, file: File) -> FileId {
            let fid = FileId(self.next_fid);
            self.next_fid += 1;
            self.files.insert(fid, file);
            fid
        }

        fn open_with(&mut self, name: &[u8], opts: &OpenOptions) -> Option<FileId> {
            match opts.open(path(name)) {
                Ok(file) => Some(self.register(file)),
                Err(error) => {
                    tracing::debug!(%error, name = %String::from_utf8_lossy(name), "open failed");
                    None
                }
            }
        }
    }

    impl Host for StdHost {
        fn console_write(&mut self, text: &str) -> bool {
            let bytes = latin1_bytes(text).collect::<Vec<u8>>();
            let mut out = std::io::stdout().lock();
            out.write_all(&bytes).and_then(|_| out.flush()).is_ok()
        }

        fn console_key(&mut self) -> Option<u8> {
            let mut byte = [0u8; 1];
            match std::io::stdin().read(&mut byte) {
                Ok(1) => Some(byte[0]),
                _ => None,
            }
        }

        fn console_accept(&mut self, max: usize) -> Option<Vec<u8>> {
            let mut line = Vec::new();
            match std::io::stdin().lock().read_until(b'\n', &mut line) {
                Ok(0) | Err(_) => None,
                Ok(_) => {
                    while matches!(line.last(), Some(b'\n' | b'\r')) {
                        line.pop();
                    }
                    line.truncate(max);
                    Some(line)
                }
            }
        }

        fn open_file(&mut self, name: &[u8], mode: FileMode) -> Option<FileId> {
            let mut opts = OpenOptions::new();
            opts.read(mode.readable()).write(mode.writable());
            self.open_with(name, &opts)
        }

        fn create_file(&mut self, name: &[u8], mode: FileMode) -> Option<FileId> {
            let mut opts = OpenOptions::new();
            opts.read(mode.readable())
                .write(true)
                .create(true)
                .truncate(true);
            self.open_with(name, &opts)
        }

        fn close_file(&mut self, fid: FileId) -> bool {
            self.files.remove(&fid).is_some()
        }

        fn read_file(&mut self, fid: FileId, buf: &mut [u8]) -> Option<usize> {
            let file = self.files.get_mut(&fid)?;
            let mut total = 0;
            while total < buf.len() {
                match file.read(&mut buf[total..]) {
                    Ok(0) => break,
                    Ok(n) => total += n,
                    Err(error) => {
                        tracing::debug!(%error, ?fid, "read failed");
                        return None;
                    }
                }
            }
            Some(total)
        }

        fn write_file(&mut self, fid: FileId, buf: &[u8]) -> bool {
            match self.files.get_mut(&fid) {
                Some(file) => file.write_all(buf).is_ok(),
                None => false,
            }
        }

        fn file_position(&mut self, fid: FileId) -> Option<u64> {
            self.files.get_mut(&fid)?.stream_position().ok()
        }

        fn reposition_file(&mut self, fid: FileId, pos: u64) -> bool {
            match self.files.get_mut(&fid) {
                Some(file) => file.seek(SeekFrom::Start(pos)).is_ok(),
                None => false,
            }
        }

        fn file_size(&mut self, fid: FileId) -> Option<u64> {
            Some(self.files.get(&fid)?.metadata().ok()?.len())
        }

        fn resize_file(&mut self, fid: FileId, size: u64) -> bool {
            match self.files.get(&fid) {
                Some(file) => file.set_len(size).is_ok(),
                None => false,
            }
        }

        fn flush_file(&mut self, fid: FileId) -> bool {
            match self.files.get_mut(&fid) {
                Some(file) => file.flush().is_ok(),
                None => false,
            }
        }

        fn delete_file(&mut self, name: &[u8]) -> bool {
            std::fs::remove_file(path(name)).is_ok()
        }

        fn rename_file(&mut self, from: &[u8], to: &[u8]) -> bool {
            std::fs::rename(path(from), path(to)).is_ok()
        }

        fn sleep_ms(&mut self, ms: u32) {
            std::thread::sleep(std::time::Duration::from_millis(ms.into()));
        }
    }
}

#[cfg(feature = "use-std")]
pub use self::std_host::StdHost;
