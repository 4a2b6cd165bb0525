//! Saved dictionary images.
//!
//! An image is an IFF-style `FORM` of type `P4TH` holding three chunks:
//!
//! - `P4DI`: thirteen big-endian `u32`s describing the dictionary
//! - `P4NM`: the name space, absent from turnkey images
//! - `P4CD`: the code space
//!
//! Region contents are written as they sit in memory, in host byte order;
//! the info chunk records which order that was so that a mismatched image
//! is refused rather than misread.

use alloc::vec::Vec;

use crate::{dictionary::align_up, token::Prim, Cell, CELL};

pub const ID_FORM: [u8; 4] = *b"FORM";
pub const ID_P4TH: [u8; 4] = *b"P4TH";
pub const ID_P4DI: [u8; 4] = *b"P4DI";
pub const ID_P4NM: [u8; 4] = *b"P4NM";
pub const ID_P4CD: [u8; 4] = *b"P4CD";

pub const FILE_VERSION: u32 = 2;
pub const EARLIEST_FILE_VERSION: u32 = 2;

/// Set in the info flags when the regions hold big-endian cells.
pub const FLAG_BIG_ENDIAN: u32 = 1;

/// Extra room left in each region of a saved image.
pub const NAME_HEADROOM: usize = 1024;
pub const CODE_HEADROOM: usize = 2048;

/// Largest data or return stack, in cells, an image may ask for.
pub const MAX_STACK_CELLS: u32 = 1 << 20;
/// Largest name or code space an image may ask for.
pub const MAX_REGION_SIZE: u32 = 0x0100_0000;

const INFO_FIELDS: usize = 13;

#[cfg(feature = "floats")]
pub const FLOAT_SIZE: u32 = core::mem::size_of::<f64>() as u32;
#[cfg(not(feature = "floats"))]
pub const FLOAT_SIZE: u32 = 0;

macro_rules! image_errors {
    ($( $variant:ident = $n:literal, $msg:literal; )*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum ImageError {
            $( $variant, )*
        }

        impl ImageError {
            pub const ALL: &'static [ImageError] = &[ $( ImageError::$variant, )* ];

            /// The error code, `0x8000_0000 | n`.
            pub fn code(&self) -> Cell {
                let n: u32 = match self {
                    $( ImageError::$variant => $n, )*
                };
                (0x8000_0000 | n) as Cell
            }

            pub fn message(&self) -> &'static str {
                match self {
                    $( ImageError::$variant => $msg, )*
                }
            }

            pub fn from_code(code: Cell) -> Option<Self> {
                Self::ALL.iter().copied().find(|e| e.code() == code)
            }
        }
    };
}

image_errors! {
    NoMem = 1, "insufficient memory";
    TooBig = 2, "data chunk too large";
    NumParams = 3, "incorrect number of parameters";
    OpenFile = 4, "could not open file";
    WrongFile = 5, "wrong type of file format";
    BadFile = 6, "badly formatted file";
    ReadFile = 7, "file read failed";
    WriteFile = 8, "file write failed";
    CorruptDic = 9, "corrupted dictionary";
    NotSupported = 10, "not supported in this version";
    VersionFuture = 11, "version from future";
    VersionPast = 12, "version is obsolete. Rebuild new one.";
    ColonStack = 13, "stack depth changed between : and ; . Probably unbalanced conditional";
    HeaderRoom = 14, "no room left in header space";
    CodeRoom = 15, "no room left in code space";
    NoShell = 16, "attempt to use names in forth compiled with NOSHELL";
    NoNames = 17, "dictionary has no names";
    OutOfRange = 18, "parameter out of range";
    EndianConflict = 19, "endian-ness of dictionary does not match code";
    FloatConflict = 20, "float support mismatch between .dic file and code";
    CellSizeConflict = 21, "cell size mismatch between .dic file and code";
}

/// The `P4DI` chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InfoChunk {
    pub version: u32,
    /// NFA of the newest entry.
    pub context: u32,
    pub header_ptr: u32,
    pub code_ptr: u32,
    /// Token to run on load, 0 for none.
    pub entry_point: u32,
    pub data_stack_size: u32,
    pub return_stack_size: u32,
    pub name_size: u32,
    pub code_size: u32,
    pub num_primitives: u32,
    pub flags: u32,
    pub float_size: u32,
    pub cell_size: u32,
}

impl InfoChunk {
    fn to_fields(self) -> [u32; INFO_FIELDS] {
        [
            self.version,
            self.context,
            self.header_ptr,
            self.code_ptr,
            self.entry_point,
            self.data_stack_size,
            self.return_stack_size,
            self.name_size,
            self.code_size,
            self.num_primitives,
            self.flags,
            self.float_size,
            self.cell_size,
        ]
    }

    fn from_fields(f: [u32; INFO_FIELDS]) -> Self {
        Self {
            version: f[0],
            context: f[1],
            header_ptr: f[2],
            code_ptr: f[3],
            entry_point: f[4],
            data_stack_size: f[5],
            return_stack_size: f[6],
            name_size: f[7],
            code_size: f[8],
            num_primitives: f[9],
            flags: f[10],
            float_size: f[11],
            cell_size: f[12],
        }
    }

    #[inline]
    pub fn is_big_endian(&self) -> bool {
        self.flags & FLAG_BIG_ENDIAN != 0
    }

    #[inline]
    pub fn is_turnkey(&self) -> bool {
        self.name_size == 0
    }

    /// Check the info chunk against what this runtime can load.
    pub fn validate(&self) -> Result<(), ImageError> {
        if self.version > FILE_VERSION {
            return Err(ImageError::VersionFuture);
        }
        if self.version < EARLIEST_FILE_VERSION {
            return Err(ImageError::VersionPast);
        }
        if self.cell_size != CELL as u32 {
            return Err(ImageError::CellSizeConflict);
        }
        if self.num_primitives as usize > Prim::COUNT {
            return Err(ImageError::NotSupported);
        }
        if self.is_big_endian() != cfg!(target_endian = "big") {
            return Err(ImageError::EndianConflict);
        }
        if self.float_size != FLOAT_SIZE {
            return Err(ImageError::FloatConflict);
        }
        // sizes are allocated up front, before any chunk is checked against them
        if self.data_stack_size > MAX_STACK_CELLS
            || self.return_stack_size > MAX_STACK_CELLS
            || self.name_size > MAX_REGION_SIZE
            || self.code_size > MAX_REGION_SIZE
        {
            tracing::warn!(
                data_stack = self.data_stack_size,
                return_stack = self.return_stack_size,
                name_size = self.name_size,
                code_size = self.code_size,
                "image asks for more memory than allowed"
            );
            return Err(ImageError::NoMem);
        }
        Ok(())
    }
}

/// What a dictionary looks like to the image writer.
pub struct SaveRequest<'a> {
    pub names: &'a [u8],
    pub name_limit: usize,
    pub header_ptr: usize,
    pub context: usize,
    pub code: &'a [u8],
    pub code_limit: usize,
    pub code_ptr: usize,
    pub data_stack_size: usize,
    pub return_stack_size: usize,
    /// Set for a turnkey image.
    pub entry_point: Option<Cell>,
}

/// A parsed image, ready to be turned back into a dictionary.
#[derive(Debug)]
pub struct Image {
    pub info: InfoChunk,
    pub names: Vec<u8>,
    pub code: Vec<u8>,
}

fn push_chunk(out: &mut Vec<u8>, id: [u8; 4], payload: &[u8]) {
    out.extend_from_slice(&id);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    if payload.len() % 2 != 0 {
        out.push(0);
    }
}

/// Serialize a dictionary.
pub fn save(req: &SaveRequest<'_>) -> Result<Vec<u8>, ImageError> {
    let turnkey = req.entry_point.is_some();
    let name_size = if turnkey {
        0
    } else {
        align_up(req.name_limit).max(align_up(req.header_ptr) + NAME_HEADROOM)
    };
    let code_size = align_up(req.code_limit).max(align_up(req.code_ptr) + CODE_HEADROOM);

    let names = req.names.get(..req.header_ptr).ok_or(ImageError::OutOfRange)?;
    let code = req.code.get(..req.code_ptr).ok_or(ImageError::OutOfRange)?;

    let info = InfoChunk {
        version: FILE_VERSION,
        context: if turnkey { 0 } else { req.context as u32 },
        header_ptr: if turnkey { 0 } else { req.header_ptr as u32 },
        code_ptr: req.code_ptr as u32,
        entry_point: req.entry_point.unwrap_or(0) as u32,
        data_stack_size: req.data_stack_size as u32,
        return_stack_size: req.return_stack_size as u32,
        name_size: name_size as u32,
        code_size: code_size as u32,
        num_primitives: Prim::COUNT as u32,
        flags: if cfg!(target_endian = "big") { FLAG_BIG_ENDIAN } else { 0 },
        float_size: FLOAT_SIZE,
        cell_size: CELL as u32,
    };

    let mut out = Vec::with_capacity(12 + 8 + INFO_FIELDS * 4 + names.len() + code.len() + 24);
    out.extend_from_slice(&ID_FORM);
    out.extend_from_slice(&[0; 4]);
    out.extend_from_slice(&ID_P4TH);

    let mut info_bytes = Vec::with_capacity(INFO_FIELDS * 4);
    for field in info.to_fields() {
        info_bytes.extend_from_slice(&field.to_be_bytes());
    }
    push_chunk(&mut out, ID_P4DI, &info_bytes);
    if !turnkey {
        push_chunk(&mut out, ID_P4NM, names);
    }
    push_chunk(&mut out, ID_P4CD, code);

    let form_size = (out.len() - 8) as u32;
    out[4..8].copy_from_slice(&form_size.to_be_bytes());
    tracing::debug!(
        bytes = out.len(),
        turnkey,
        header_ptr = req.header_ptr,
        code_ptr = req.code_ptr,
        "image saved"
    );
    Ok(out)
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], ImageError> {
        let end = self.pos.checked_add(n).ok_or(ImageError::ReadFile)?;
        let out = self.buf.get(self.pos..end).ok_or(ImageError::ReadFile)?;
        self.pos = end;
        Ok(out)
    }

    fn id(&mut self) -> Result<[u8; 4], ImageError> {
        let mut id = [0; 4];
        id.copy_from_slice(self.take(4)?);
        Ok(id)
    }

    fn u32(&mut self) -> Result<u32, ImageError> {
        Ok(u32::from_be_bytes(self.id()?))
    }
}

/// Parse and validate an image.
pub fn load(bytes: &[u8]) -> Result<Image, ImageError> {
    let mut rd = Reader { buf: bytes, pos: 0 };
    if rd.id().map_err(|_| ImageError::WrongFile)? != ID_FORM {
        return Err(ImageError::WrongFile);
    }
    let form_size = rd.u32()? as usize;
    let end = 8usize.checked_add(form_size).ok_or(ImageError::BadFile)?;
    if end > bytes.len() {
        return Err(ImageError::ReadFile);
    }
    rd.buf = &bytes[..end];
    if rd.id()? != ID_P4TH {
        return Err(ImageError::BadFile);
    }

    let mut info: Option<InfoChunk> = None;
    let mut names = Vec::new();
    let mut code = Vec::new();

    while rd.pos < end {
        let id = rd.id()?;
        let size = rd.u32()? as usize;
        let payload = rd.take(size)?;
        if size % 2 != 0 && rd.pos < end {
            rd.take(1)?;
        }

        match id {
            ID_P4DI => {
                if payload.len() < INFO_FIELDS * 4 {
                    return Err(ImageError::BadFile);
                }
                let mut fields = [0u32; INFO_FIELDS];
                for (field, raw) in fields.iter_mut().zip(payload.chunks_exact(4)) {
                    *field = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
                }
                let chunk = InfoChunk::from_fields(fields);
                chunk.validate()?;
                tracing::debug!(
                    version = chunk.version,
                    name_size = chunk.name_size,
                    code_size = chunk.code_size,
                    entry_point = chunk.entry_point,
                    "image info"
                );
                info = Some(chunk);
            }
            ID_P4NM => {
                let info = info.as_ref().ok_or(ImageError::BadFile)?;
                if info.is_turnkey() {
                    return Err(ImageError::NoNames);
                }
                if size > info.name_size as usize {
                    return Err(ImageError::TooBig);
                }
                names = payload.to_vec();
            }
            ID_P4CD => {
                let info = info.as_ref().ok_or(ImageError::BadFile)?;
                if size > info.code_size as usize {
                    return Err(ImageError::TooBig);
                }
                code = payload.to_vec();
            }
            other => {
                tracing::warn!(chunk = ?other, size, "skipping unknown image chunk");
            }
        }
    }

    let info = info.ok_or(ImageError::BadFile)?;
    if info.header_ptr as usize > info.name_size as usize
        || info.code_ptr as usize > info.code_size as usize
        || names.len() > info.header_ptr as usize + NAME_HEADROOM
    {
        return Err(ImageError::CorruptDic);
    }
    Ok(Image { info, names, code })
}

#[cfg(test)]
pub mod test {
    use super::*;

    fn request<'a>(names: &'a [u8], code: &'a [u8]) -> SaveRequest<'a> {
        SaveRequest {
            names,
            name_limit: 4096,
            header_ptr: names.len(),
            context: 12,
            code,
            code_limit: 8192,
            code_ptr: code.len(),
            data_stack_size: 128,
            return_stack_size: 128,
            entry_point: None,
        }
    }

    #[test]
    fn round_trip() {
        let names = [7u8; 40];
        let code = [9u8; 600];
        let bytes = save(&request(&names, &code)).unwrap();
        assert_eq!(&bytes[..4], b"FORM");
        assert_eq!(&bytes[8..12], b"P4TH");
        assert_eq!(u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize, bytes.len() - 8);

        let image = load(&bytes).unwrap();
        assert_eq!(image.names, names);
        assert_eq!(image.code, code);
        assert_eq!(image.info.context, 12);
        assert_eq!(image.info.name_size, 4096);
        assert_eq!(image.info.code_size, 8192);
        assert_eq!(image.info.num_primitives as usize, Prim::COUNT);
    }

    #[test]
    fn sizes_keep_headroom() {
        let names = [0u8; 4000];
        let code = [0u8; 8000];
        let image = load(&save(&request(&names, &code)).unwrap()).unwrap();
        assert_eq!(image.info.name_size as usize, 4000 + NAME_HEADROOM);
        assert_eq!(image.info.code_size as usize, 8000 + CODE_HEADROOM);
    }

    #[test]
    fn turnkey_drops_names() {
        let mut req = request(&[1, 2, 3, 4], &[5; 16]);
        req.entry_point = Some(0x200);
        let image = load(&save(&req).unwrap()).unwrap();
        assert!(image.info.is_turnkey());
        assert!(image.names.is_empty());
        assert_eq!(image.info.entry_point, 0x200);
        assert_eq!(image.info.context, 0);
    }

    fn patch_field(bytes: &mut [u8], field: usize, val: u32) {
        // FORM hdr (12) + chunk hdr (8)
        let at = 20 + field * 4;
        bytes[at..at + 4].copy_from_slice(&val.to_be_bytes());
    }

    #[test]
    fn mismatches_are_refused() {
        let good = save(&request(&[0; 8], &[0; 8])).unwrap();

        let mut bad = good.clone();
        patch_field(&mut bad, 12, 8);
        assert_eq!(load(&bad).unwrap_err(), ImageError::CellSizeConflict);

        let mut bad = good.clone();
        patch_field(&mut bad, 10, if cfg!(target_endian = "big") { 0 } else { 1 });
        assert_eq!(load(&bad).unwrap_err(), ImageError::EndianConflict);

        let mut bad = good.clone();
        patch_field(&mut bad, 11, FLOAT_SIZE ^ 8);
        assert_eq!(load(&bad).unwrap_err(), ImageError::FloatConflict);

        let mut bad = good.clone();
        patch_field(&mut bad, 0, FILE_VERSION + 1);
        assert_eq!(load(&bad).unwrap_err(), ImageError::VersionFuture);

        let mut bad = good.clone();
        patch_field(&mut bad, 0, 1);
        assert_eq!(load(&bad).unwrap_err(), ImageError::VersionPast);

        let mut bad = good.clone();
        patch_field(&mut bad, 9, Prim::COUNT as u32 + 1);
        assert_eq!(load(&bad).unwrap_err(), ImageError::NotSupported);
    }

    #[test]
    fn oversized_fields_are_refused() {
        let good = save(&request(&[0; 8], &[0; 8])).unwrap();
        for field in [5, 6] {
            let mut bad = good.clone();
            patch_field(&mut bad, field, 0x7FFF_FFF0);
            assert_eq!(load(&bad).unwrap_err(), ImageError::NoMem);
        }
        for field in [7, 8] {
            let mut bad = good.clone();
            patch_field(&mut bad, field, u32::MAX);
            assert_eq!(load(&bad).unwrap_err(), ImageError::NoMem);
        }

        let mut ok = good.clone();
        patch_field(&mut ok, 5, MAX_STACK_CELLS);
        assert_eq!(load(&ok).unwrap().info.data_stack_size, MAX_STACK_CELLS);
    }

    #[test]
    fn framing_errors() {
        let good = save(&request(&[0; 8], &[0; 8])).unwrap();
        assert_eq!(load(b"JUNKJUNKJUNK").unwrap_err(), ImageError::WrongFile);

        let mut bad = good.clone();
        bad[8..12].copy_from_slice(b"XXXX");
        assert_eq!(load(&bad).unwrap_err(), ImageError::BadFile);

        assert_eq!(load(&good[..good.len() - 4]).unwrap_err(), ImageError::ReadFile);

        // code before info
        let mut bad = Vec::new();
        bad.extend_from_slice(b"FORM");
        bad.extend_from_slice(&12u32.to_be_bytes());
        bad.extend_from_slice(b"P4TH");
        bad.extend_from_slice(b"P4CD");
        bad.extend_from_slice(&0u32.to_be_bytes());
        assert_eq!(load(&bad).unwrap_err(), ImageError::BadFile);
    }

    #[test]
    fn unknown_chunks_are_skipped() {
        let good = save(&request(&[0; 8], &[1; 8])).unwrap();
        let mut with_extra = good.clone();
        with_extra.extend_from_slice(b"XTRA");
        with_extra.extend_from_slice(&3u32.to_be_bytes());
        with_extra.extend_from_slice(&[1, 2, 3, 0]);
        let size = (with_extra.len() - 8) as u32;
        with_extra[4..8].copy_from_slice(&size.to_be_bytes());
        assert_eq!(load(&with_extra).unwrap().code, [1; 8]);
    }

    #[test]
    fn codes_and_messages() {
        assert_eq!(ImageError::NoMem.code(), 0x8000_0001u32 as Cell);
        assert_eq!(ImageError::CellSizeConflict.code(), 0x8000_0015u32 as Cell);
        assert_eq!(ImageError::from_code(ImageError::TooBig.code()), Some(ImageError::TooBig));
        for e in ImageError::ALL {
            assert!(!e.message().is_empty());
        }
    }
}
