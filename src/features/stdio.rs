//! Standard-stream proxies and the plain stdio feature
//!
//! The three standard descriptors are character devices backed by host
//! callbacks. Writes concatenate the guest's scatter list and hand the
//! result to the configured handler, either as raw bytes or as a decoded
//! string. Reads pull from a `consume` callback through a carry-over
//! buffer: whatever the callback over-produces is retained for the next
//! `fd_read`, and an empty chunk means end of input.
//!
//! Closing a standard descriptor invokes the close hook but leaves the
//! descriptor usable; guests routinely close stdio before exit and still
//! expect diagnostics to work afterwards.

use std::rc::Rc;

use super::{arg_u32, require_memory, Feature, SharedState};
use crate::abi::{errno, filetype, iovecs, write_fdstat, IoVec};
use crate::error::WasiResult;
use crate::imports::{ImportName, ImportTable};
use crate::memory::GuestMemory;

/// Payload delivered to a write handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StdioChunk {
    /// UTF-8 decoded output (the default)
    Text(String),
    /// Raw output, produced when `output_buffers` is set
    Bytes(Vec<u8>),
}

impl StdioChunk {
    /// The payload as bytes, whichever variant it is
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            StdioChunk::Text(s) => s.into_bytes(),
            StdioChunk::Bytes(b) => b,
        }
    }
}

/// Host callback receiving guest output
pub type WriteHandler = Box<dyn FnMut(StdioChunk)>;

/// Host callback producing guest input; an empty result means EOF
pub type ConsumeHandler = Box<dyn FnMut() -> Vec<u8>>;

/// Host callback invoked on `fd_close` of a standard descriptor
pub type CloseHandler = Box<dyn FnMut()>;

/// Writable character-device endpoint (stdout, stderr)
#[derive(Default)]
pub struct WritableProxy {
    handler: Option<WriteHandler>,
    output_buffers: bool,
    captured: Vec<u8>,
    on_close: Option<CloseHandler>,
}

impl WritableProxy {
    /// A proxy delivering output to a host handler
    pub fn with_handler(handler: WriteHandler, output_buffers: bool) -> Self {
        Self {
            handler: Some(handler),
            output_buffers,
            captured: Vec::new(),
            on_close: None,
        }
    }

    pub fn with_close(mut self, on_close: CloseHandler) -> Self {
        self.on_close = Some(on_close);
        self
    }

    /// Concatenate the chunks and deliver them; returns total bytes
    pub fn writev(&mut self, chunks: &[Vec<u8>]) -> usize {
        let total: usize = chunks.iter().map(|c| c.len()).sum();
        let mut joined = Vec::with_capacity(total);
        for chunk in chunks {
            joined.extend_from_slice(chunk);
        }

        match &mut self.handler {
            Some(handler) => {
                let payload = if self.output_buffers {
                    StdioChunk::Bytes(joined)
                } else {
                    StdioChunk::Text(String::from_utf8_lossy(&joined).into_owned())
                };
                handler(payload);
            }
            // No handler configured: capture, so embedders and tests can
            // harvest the output afterwards
            None => self.captured.extend_from_slice(&joined),
        }
        total
    }

    pub fn close(&mut self) {
        if let Some(hook) = &mut self.on_close {
            hook();
        }
    }

    /// Drain output captured while no handler was configured
    pub fn take_captured(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.captured)
    }
}

/// Readable character-device endpoint (stdin)
#[derive(Default)]
pub struct ReadableProxy {
    consume: Option<ConsumeHandler>,
    carry: Vec<u8>,
    on_close: Option<CloseHandler>,
}

impl ReadableProxy {
    /// A proxy pulling input from a consume callback
    pub fn with_consume(consume: ConsumeHandler) -> Self {
        Self {
            consume: Some(consume),
            carry: Vec::new(),
            on_close: None,
        }
    }

    pub fn with_close(mut self, on_close: CloseHandler) -> Self {
        self.on_close = Some(on_close);
        self
    }

    /// Pull up to `want` bytes; a short result means EOF for this call
    ///
    /// Bytes the consume callback produced beyond `want` stay in the
    /// carry-over buffer for the next read.
    pub fn read(&mut self, want: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(want.min(self.carry.len()));
        let from_carry = want.min(self.carry.len());
        out.extend(self.carry.drain(..from_carry));

        while out.len() < want {
            let chunk = match &mut self.consume {
                Some(consume) => consume(),
                None => break,
            };
            if chunk.is_empty() {
                break;
            }
            let need = want - out.len();
            if chunk.len() <= need {
                out.extend_from_slice(&chunk);
            } else {
                out.extend_from_slice(&chunk[..need]);
                self.carry.extend_from_slice(&chunk[need..]);
            }
        }
        out
    }

    pub fn close(&mut self) {
        if let Some(hook) = &mut self.on_close {
            hook();
        }
    }
}

/// The three standard streams of one instance
#[derive(Default)]
pub struct StdioProxies {
    pub stdin: ReadableProxy,
    pub stdout: WritableProxy,
    pub stderr: WritableProxy,
}

/// Options for [`use_stdio`]
#[derive(Default)]
pub struct StdioOptions {
    stdin: Option<ConsumeHandler>,
    stdout: Option<WriteHandler>,
    stderr: Option<WriteHandler>,
    output_buffers: bool,
}

impl StdioOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Input source; return an empty buffer to signal EOF
    pub fn stdin(mut self, consume: impl FnMut() -> Vec<u8> + 'static) -> Self {
        self.stdin = Some(Box::new(consume));
        self
    }

    pub fn stdout(mut self, handler: impl FnMut(StdioChunk) + 'static) -> Self {
        self.stdout = Some(Box::new(handler));
        self
    }

    pub fn stderr(mut self, handler: impl FnMut(StdioChunk) + 'static) -> Self {
        self.stderr = Some(Box::new(handler));
        self
    }

    /// Deliver output as raw bytes instead of decoded text
    pub fn output_buffers(mut self, output_buffers: bool) -> Self {
        self.output_buffers = output_buffers;
        self
    }

    pub(crate) fn into_proxies(self) -> StdioProxies {
        let stdin = match self.stdin {
            Some(consume) => ReadableProxy::with_consume(consume),
            None => ReadableProxy::default(),
        };
        let stdout = match self.stdout {
            Some(handler) => WritableProxy::with_handler(handler, self.output_buffers),
            None => WritableProxy::default(),
        };
        let stderr = match self.stderr {
            Some(handler) => WritableProxy::with_handler(handler, self.output_buffers),
            None => WritableProxy::default(),
        };
        StdioProxies {
            stdin,
            stdout,
            stderr,
        }
    }
}

/// Read every iovec region from guest memory and deliver it to a writable
/// proxy; returns the byte count for the `nwritten` pointer
pub(crate) fn writev_from_guest(
    proxy: &mut WritableProxy,
    mem: &GuestMemory,
    iovs: &[IoVec],
) -> WasiResult<u32> {
    let mut chunks = Vec::with_capacity(iovs.len());
    for iov in iovs {
        chunks.push(mem.read(iov.buf, iov.len)?);
    }
    Ok(proxy.writev(&chunks) as u32)
}

/// Fill the iovec regions from a readable proxy; stops early on EOF and
/// returns the byte count for the `nread` pointer
pub(crate) fn readv_to_guest(
    proxy: &mut ReadableProxy,
    mem: &GuestMemory,
    iovs: &[IoVec],
) -> WasiResult<u32> {
    let mut total = 0u32;
    for iov in iovs {
        let bytes = proxy.read(iov.len as usize);
        mem.write(iov.buf, &bytes)?;
        total += bytes.len() as u32;
        if bytes.len() < iov.len as usize {
            break;
        }
    }
    Ok(total)
}

struct StdioFeature {
    options: StdioOptions,
}

/// The plain stdio feature: fds 0-2 without a file system
pub fn use_stdio(options: StdioOptions) -> Box<dyn Feature> {
    Box::new(StdioFeature { options })
}

impl Feature for StdioFeature {
    fn name(&self) -> &'static str {
        "stdio"
    }

    fn install(self: Box<Self>, state: &SharedState, table: &mut ImportTable) {
        state.borrow_mut().stdio = self.options.into_proxies();

        let shared = state.clone();
        table.insert(
            ImportName::FdWrite,
            Rc::new(move |args| {
                let mut state = shared.borrow_mut();
                let mem = require_memory(&state)?;
                let fd = arg_u32(args, 0);
                let iovs = iovecs(&mem, arg_u32(args, 1), arg_u32(args, 2))?;
                let nwritten_ptr = arg_u32(args, 3);

                let proxy = match fd {
                    1 => &mut state.stdio.stdout,
                    2 => &mut state.stdio.stderr,
                    _ => return Ok(errno::BADF),
                };
                let written = writev_from_guest(proxy, &mem, &iovs)?;
                mem.write_u32(nwritten_ptr, written)?;
                Ok(errno::SUCCESS)
            }),
        );

        let shared = state.clone();
        table.insert(
            ImportName::FdRead,
            Rc::new(move |args| {
                let mut state = shared.borrow_mut();
                let mem = require_memory(&state)?;
                let fd = arg_u32(args, 0);
                let iovs = iovecs(&mem, arg_u32(args, 1), arg_u32(args, 2))?;
                let nread_ptr = arg_u32(args, 3);

                if fd != 0 {
                    return Ok(errno::BADF);
                }
                let read = readv_to_guest(&mut state.stdio.stdin, &mem, &iovs)?;
                mem.write_u32(nread_ptr, read)?;
                Ok(errno::SUCCESS)
            }),
        );

        let shared = state.clone();
        table.insert(
            ImportName::FdClose,
            Rc::new(move |args| {
                let mut state = shared.borrow_mut();
                match arg_u32(args, 0) {
                    0 => state.stdio.stdin.close(),
                    1 => state.stdio.stdout.close(),
                    2 => state.stdio.stderr.close(),
                    _ => return Ok(errno::BADF),
                }
                Ok(errno::SUCCESS)
            }),
        );

        let shared = state.clone();
        table.insert(
            ImportName::FdFdstatGet,
            Rc::new(move |args| {
                let state = shared.borrow();
                let mem = require_memory(&state)?;
                let fd = arg_u32(args, 0);
                let buf_ptr = arg_u32(args, 1);

                if fd > 2 {
                    return Ok(errno::BADF);
                }
                write_fdstat(&mem, buf_ptr, filetype::CHARACTER_DEVICE, 0)?;
                Ok(errno::SUCCESS)
            }),
        );
    }
}
