//! Feature providers
//!
//! Each feature contributes a group of `wasi_snapshot_preview1` imports.
//! The embedder selects features at construction time; the driver lets
//! each one install its handlers into the [`ImportTable`] in order and
//! then stubs everything left over with `ENOSYS`. This is what keeps a
//! minimal embedding small: unselected syscalls cost one shared stub.
//!
//! Handlers share state through `Rc<RefCell<WasiState>>`. Guests are
//! single-threaded and a host call always runs to completion before the
//! guest resumes, so the interior mutability is never contended.

mod args;
mod clock;
mod environ;
mod process;
mod random;
pub mod stdio;
mod trace;

pub use args::use_args;
pub use clock::{use_clock, HostClock};
pub use environ::use_environ;
pub use process::use_proc;
pub use random::{use_random, RandomOptions, RandomSource};
pub use stdio::{use_stdio, ReadableProxy, StdioChunk, StdioOptions, StdioProxies, WritableProxy};
pub use trace::use_trace;

use std::cell::RefCell;
use std::rc::Rc;

use crate::abi::Trap;
use crate::error::WasiError;
use crate::fs::MemoryFs;
use crate::imports::ImportTable;
use crate::memory::GuestMemory;

/// State shared by every installed import handler
pub struct WasiState {
    /// Command-line arguments; index 0 is the program name by convention
    pub args: Vec<String>,
    /// Environment entries in a stable, host-chosen order
    pub env: Vec<(String, String)>,
    /// Preopen map: guest path to host hint (informational in-memory)
    pub preopens: Vec<(String, String)>,
    /// Guest memory handle, attached by the driver after instantiation
    pub memory: Option<GuestMemory>,
    /// Standard stream endpoints
    pub stdio: StdioProxies,
    /// Sandboxed file system, present when the fs feature is selected
    pub fs: Option<MemoryFs>,
    /// Random byte source
    pub random: RandomSource,
    /// Wall-clock and monotonic time source
    pub clock: HostClock,
}

impl WasiState {
    pub fn new(
        args: Vec<String>,
        env: Vec<(String, String)>,
        preopens: Vec<(String, String)>,
    ) -> Self {
        Self {
            args,
            env,
            preopens,
            memory: None,
            stdio: StdioProxies::default(),
            fs: None,
            random: RandomSource::default(),
            clock: HostClock::new(),
        }
    }
}

/// Shared handle to the per-instance state
pub type SharedState = Rc<RefCell<WasiState>>;

/// A selectable group of import functions
///
/// `install` runs once, during driver construction, and registers this
/// feature's handlers. Features installed later overwrite earlier handlers
/// for the same import name.
pub trait Feature {
    /// Feature name, used by the tracing wrapper
    fn name(&self) -> &'static str;

    /// Register this feature's handlers
    fn install(self: Box<Self>, state: &SharedState, table: &mut ImportTable);
}

/// Options for [`use_memory_fs`]
#[derive(Default)]
pub struct MemoryFsOptions {
    pub(crate) file_system: Option<MemoryFs>,
    pub(crate) stdio: Option<StdioOptions>,
}

impl MemoryFsOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a pre-seeded file system instead of an empty one
    pub fn with_file_system(mut self, fs: MemoryFs) -> Self {
        self.file_system = Some(fs);
        self
    }

    /// Wire the standard streams of the sandbox
    pub fn with_stdio(mut self, stdio: StdioOptions) -> Self {
        self.stdio = Some(stdio);
        self
    }
}

/// The file-system feature: stdio plus the sandboxed `fd_*`/`path_*` set
pub fn use_memory_fs(options: MemoryFsOptions) -> Box<dyn Feature> {
    crate::fs::wasi::memory_fs_feature(options)
}

/// Options for [`use_all`]
#[derive(Default)]
pub struct AllOptions {
    random: RandomOptions,
    file_system: Option<MemoryFs>,
    stdio: Option<StdioOptions>,
}

impl AllOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_random(mut self, random: RandomOptions) -> Self {
        self.random = random;
        self
    }

    /// Select the file-system provider instead of plain stdio
    pub fn with_file_system(mut self, fs: MemoryFs) -> Self {
        self.file_system = Some(fs);
        self
    }

    pub fn with_stdio(mut self, stdio: StdioOptions) -> Self {
        self.stdio = Some(stdio);
        self
    }
}

/// Every feature, in the standard order
///
/// When a file system is supplied the memory-FS feature handles the
/// descriptor space (installing after plain stdio would anyway shadow
/// it); otherwise plain stdio covers fds 0-2 alone.
pub fn use_all(options: AllOptions) -> Vec<Box<dyn Feature>> {
    let mut features: Vec<Box<dyn Feature>> = vec![
        use_args(),
        use_environ(),
        use_clock(),
        use_proc(),
        use_random(options.random),
    ];

    match options.file_system {
        Some(fs) => {
            let mut fs_options = MemoryFsOptions::new().with_file_system(fs);
            if let Some(stdio) = options.stdio {
                fs_options = fs_options.with_stdio(stdio);
            }
            features.push(use_memory_fs(fs_options));
        }
        None => features.push(use_stdio(options.stdio.unwrap_or_default())),
    }

    features
}

/// Clone the attached memory handle, or fault if the driver has not
/// attached one yet
pub(crate) fn require_memory(state: &WasiState) -> Result<GuestMemory, Trap> {
    state
        .memory
        .clone()
        .ok_or(Trap::Fault(WasiError::MemoryNotAttached))
}

/// Low 32 bits of a raw argument, as a pointer/size
pub(crate) fn arg_u32(args: &[i64], index: usize) -> u32 {
    args[index] as u32
}

/// A raw argument as a signed 32-bit value
pub(crate) fn arg_i32(args: &[i64], index: usize) -> i32 {
    args[index] as i32
}
