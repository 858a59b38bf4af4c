//! skerry - a sandboxed WASI preview1 host core for WebAssembly guests
//!
//! skerry provides the host side of the `wasi_snapshot_preview1` import
//! interface: an embedder instantiates a guest module against the import
//! table produced here, then hands the instance back to the driver to run
//! `_start` (command model) or `_initialize` (reactor model).
//!
//! The crate is split into three layers:
//! - ABI primitives: bit-exact readers/writers for the preview1 structures
//!   in the guest's linear memory ([`abi`], [`memory`])
//! - Feature providers: independently selectable groups of import
//!   functions (args, environ, clock, proc, random, stdio, filesystem,
//!   tracing); anything not supplied by a selected feature is stubbed
//!   with `ENOSYS` ([`features`], [`imports`])
//! - The driver: owns the guest instance, re-derives the linear-memory
//!   view on every host call, and converts the process-exit signal into an
//!   exit code ([`driver`])
//!
//! Platform support:
//! - Browser (wasm32-unknown-unknown): guests run on the WebAssembly API,
//!   imports are bridged through wasm-bindgen closures
//! - Native: the same dispatch path is exercised directly, which is how
//!   the test suite drives it

#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

pub mod abi;
pub mod driver;
pub mod error;
pub mod features;
pub mod fs;
pub mod imports;
pub mod memory;

pub use abi::Trap;
pub use driver::{Instance, Wasi, WasiOptions};
pub use error::{WasiError, WasiResult};
pub use features::{
    use_all, use_args, use_clock, use_environ, use_memory_fs, use_proc, use_random, use_stdio,
    use_trace, AllOptions, Feature, MemoryFsOptions, RandomOptions, StdioOptions,
};
pub use fs::MemoryFs;
pub use imports::{ImportName, ImportTable};
pub use memory::GuestMemory;

/// Console logging helper
#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_namespace = console)]
    pub fn log(s: &str);
}

/// Log to browser console (WASM)
#[cfg(target_arch = "wasm32")]
#[macro_export]
macro_rules! host_log {
    ($($t:tt)*) => {
        $crate::log(&format!($($t)*))
    };
}

/// Log to stderr (native)
#[cfg(not(target_arch = "wasm32"))]
#[macro_export]
macro_rules! host_log {
    ($($t:tt)*) => {
        eprintln!($($t)*)
    };
}
