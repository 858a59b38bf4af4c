//! Error types for the WASI host
//!
//! These are host-side faults surfaced to the embedder. They are distinct
//! from guest-visible errnos, which every import handler returns as a
//! plain `i32` (see [`crate::abi::errno`]).

use std::fmt;

/// Result type for host-side operations
pub type WasiResult<T> = Result<T, WasiError>;

/// Errors surfaced to the embedder
///
/// None of these are visible to the guest: a guest sees errnos, and the
/// only non-errno path out of an import call is the process-exit trap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WasiError {
    /// Required guest export is missing
    MissingExport {
        name: &'static str,
    },

    /// Export exists but has the wrong type
    WrongExportType {
        name: &'static str,
        expected: &'static str,
    },

    /// Guest memory access out of bounds
    MemoryOutOfBounds {
        address: u32,
        len: u32,
        memory_size: u32,
    },

    /// An import handler ran before the driver attached the guest memory
    MemoryNotAttached,

    /// `start` or `initialize` was called on a driver that already ran
    AlreadyStarted,

    /// The guest trapped or threw something that is not the exit signal
    Aborted {
        reason: String,
    },

    /// Building the import object or instantiating the guest failed
    InstantiationFailed {
        reason: String,
    },

    /// The host's random source failed
    RandomSource {
        reason: String,
    },
}

impl fmt::Display for WasiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingExport { name } => {
                write!(f, "missing required export: '{}'", name)
            }
            Self::WrongExportType { name, expected } => {
                write!(f, "export '{}' has wrong type: expected {}", name, expected)
            }
            Self::MemoryOutOfBounds {
                address,
                len,
                memory_size,
            } => {
                write!(
                    f,
                    "memory access out of bounds: address {} + len {} > memory size {}",
                    address, len, memory_size
                )
            }
            Self::MemoryNotAttached => {
                write!(f, "guest memory is not attached to the driver")
            }
            Self::AlreadyStarted => {
                write!(f, "driver entry point was already invoked")
            }
            Self::Aborted { reason } => {
                write!(f, "guest aborted: {}", reason)
            }
            Self::InstantiationFailed { reason } => {
                write!(f, "instantiation failed: {}", reason)
            }
            Self::RandomSource { reason } => {
                write!(f, "random source failed: {}", reason)
            }
        }
    }
}

impl std::error::Error for WasiError {}
