//! WASI preview1 ABI types and constants
//!
//! This module defines the stable interface between the host and a guest
//! importing `wasi_snapshot_preview1`: the errno/clock/filetype constants,
//! the fixed struct layouts written into guest memory, scatter/gather
//! descriptor decoding, and the process-exit trap.
//!
//! All struct writers emit little-endian bytes at caller-supplied offsets.

use crate::error::{WasiError, WasiResult};
use crate::memory::GuestMemory;

/// Import module namespace guests link against
pub const MODULE_NAME: &str = "wasi_snapshot_preview1";

/// Required export names
pub mod exports {
    /// The linear memory export name
    pub const MEMORY: &str = "memory";
    /// Entry point of a command-model guest
    pub const START: &str = "_start";
    /// Entry point of a reactor-model guest
    pub const INITIALIZE: &str = "_initialize";
}

/// Guest-visible error numbers
///
/// Values are fixed by the preview1 specification and must not change.
pub mod errno {
    pub const SUCCESS: i32 = 0;
    pub const BADF: i32 = 8;
    pub const EXIST: i32 = 20;
    pub const INVAL: i32 = 28;
    pub const ISDIR: i32 = 31;
    pub const NOENT: i32 = 44;
    pub const NOSYS: i32 = 52;
    pub const NOTDIR: i32 = 54;
}

/// Clock identifiers
pub mod clockid {
    pub const REALTIME: u32 = 0;
    pub const MONOTONIC: u32 = 1;
}

/// File types as reported in `fdstat` and `filestat`
pub mod filetype {
    pub const CHARACTER_DEVICE: u8 = 2;
    pub const DIRECTORY: u8 = 3;
    pub const REGULAR_FILE: u8 = 4;
}

/// `path_open` open flags
pub mod oflags {
    pub const CREAT: u32 = 1;
    pub const DIRECTORY: u32 = 2;
    pub const EXCL: u32 = 4;
    pub const TRUNC: u32 = 8;
}

/// `fd_seek` whence values
pub mod whence {
    pub const SET: u32 = 0;
    pub const CUR: u32 = 1;
    pub const END: u32 = 2;
}

/// Standard file descriptors
pub mod fd {
    pub const STDIN: u32 = 0;
    pub const STDOUT: u32 = 1;
    pub const STDERR: u32 = 2;
    /// Preopen directories are numbered upwards from here
    pub const FIRST_PREOPEN: u32 = 3;
}

/// Control-flow signal raised by an import handler
///
/// `Exit` is not an error: it is how `proc_exit` unwinds out of the guest.
/// The driver catches it and converts it into the process exit code.
/// `Fault` carries genuine host-side failures, which propagate to the
/// embedder untouched.
#[derive(Debug)]
pub enum Trap {
    /// The guest requested process exit with this code
    Exit(i32),
    /// Host-side fault (embedder bug or corrupt guest)
    Fault(WasiError),
}

impl From<WasiError> for Trap {
    fn from(err: WasiError) -> Self {
        Trap::Fault(err)
    }
}

/// One decoded scatter/gather descriptor
///
/// Addresses a `len`-byte region of guest memory at `buf`. Transfers go
/// through the [`GuestMemory`] handle so memory growth between host calls
/// is always observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoVec {
    pub buf: u32,
    pub len: u32,
}

/// Size of one encoded `iovec` record
pub const IOVEC_SIZE: u32 = 8;

/// Decode a guest `iovec` array: `iovs_len` records of `{buf: u32, len: u32}`
pub fn iovecs(mem: &GuestMemory, iovs_ptr: u32, iovs_len: u32) -> WasiResult<Vec<IoVec>> {
    let mut out = Vec::with_capacity(iovs_len as usize);
    for i in 0..iovs_len {
        let base = iovs_ptr + i * IOVEC_SIZE;
        out.push(IoVec {
            buf: mem.read_u32(base)?,
            len: mem.read_u32(base + 4)?,
        });
    }
    Ok(out)
}

/// UTF-8 byte length of a string
pub fn byte_length(s: &str) -> u32 {
    s.len() as u32
}

/// Write a string's UTF-8 bytes at `offset`, returning the byte count
///
/// No NUL terminator is appended; callers that need one include it in `s`
/// or write it separately.
pub fn write_string(mem: &GuestMemory, s: &str, offset: u32) -> WasiResult<u32> {
    mem.write(offset, s.as_bytes())?;
    Ok(s.len() as u32)
}

/// `filestat` struct size (bytes)
pub const FILESTAT_SIZE: u32 = 64;

/// Write a zeroed 64-byte `filestat` with the given file type
///
/// Layout: dev u64 at +0, ino u64 at +8, filetype u8 at +16, nlink u32 at
/// +24, size u64 at +32, atim/mtim/ctim u64 at +40/+48/+56. Callers that
/// report a non-zero size overwrite the field at `ptr + 32`.
pub fn write_filestat(mem: &GuestMemory, ptr: u32, filetype: u8) -> WasiResult<()> {
    let mut buf = [0u8; FILESTAT_SIZE as usize];
    buf[16] = filetype;
    mem.write(ptr, &buf)
}

/// `fdstat` struct size (bytes)
pub const FDSTAT_SIZE: u32 = 24;

/// Write a 24-byte `fdstat`
///
/// Layout: filetype u8 at +0, flags u16 at +2, rights u64 at +8,
/// inheriting rights u64 at +16. Rights are always reported as zero; this
/// host does not enforce them.
pub fn write_fdstat(mem: &GuestMemory, ptr: u32, filetype: u8, flags: u16) -> WasiResult<()> {
    let mut buf = [0u8; FDSTAT_SIZE as usize];
    buf[0] = filetype;
    buf[2..4].copy_from_slice(&flags.to_le_bytes());
    mem.write(ptr, &buf)
}

/// `prestat` struct size (bytes)
pub const PRESTAT_SIZE: u32 = 8;

/// Write an 8-byte `prestat` for a preopen directory
///
/// Layout: tag u8 0 (directory) at +0, path byte length u32 at +4.
pub fn write_prestat(mem: &GuestMemory, ptr: u32, path_len: u32) -> WasiResult<()> {
    let mut buf = [0u8; PRESTAT_SIZE as usize];
    buf[4..8].copy_from_slice(&path_len.to_le_bytes());
    mem.write(ptr, &buf)
}
