//! Import-name set and table composition
//!
//! WASI preview1 defines a closed set of import names. The host composes
//! an [`ImportTable`] by letting each selected feature install handlers
//! for the names it covers; every remaining name is then stubbed with a
//! handler that reports `ENOSYS`, so a guest linked against a full libc
//! can still boot with only a subset of features selected.

use std::collections::BTreeMap;
use std::rc::Rc;
use std::str::FromStr;

use crate::abi::{errno, Trap};

/// An import handler
///
/// Raw wasm arguments arrive as `i64`; 32-bit parameters occupy the low
/// half. The `Ok` value is the errno returned to the guest.
pub type SyscallFn = Rc<dyn Fn(&[i64]) -> Result<i32, Trap>>;

macro_rules! import_names {
    ($($variant:ident => $name:literal,)*) => {
        /// One name of the fixed `wasi_snapshot_preview1` import set
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum ImportName {
            $($variant,)*
        }

        impl ImportName {
            /// Every name in the preview1 import set
            pub const ALL: &'static [ImportName] = &[$(ImportName::$variant,)*];

            /// The wire name guests import
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(ImportName::$variant => $name,)*
                }
            }
        }

        impl FromStr for ImportName {
            type Err = &'static str;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(ImportName::$variant),)*
                    _ => Err("unknown wasi_snapshot_preview1 import"),
                }
            }
        }
    };
}

import_names! {
    ArgsGet => "args_get",
    ArgsSizesGet => "args_sizes_get",
    ClockResGet => "clock_res_get",
    ClockTimeGet => "clock_time_get",
    EnvironGet => "environ_get",
    EnvironSizesGet => "environ_sizes_get",
    FdAdvise => "fd_advise",
    FdAllocate => "fd_allocate",
    FdClose => "fd_close",
    FdDatasync => "fd_datasync",
    FdFdstatGet => "fd_fdstat_get",
    FdFdstatSetFlags => "fd_fdstat_set_flags",
    FdFdstatSetRights => "fd_fdstat_set_rights",
    FdFilestatGet => "fd_filestat_get",
    FdFilestatSetSize => "fd_filestat_set_size",
    FdFilestatSetTimes => "fd_filestat_set_times",
    FdPread => "fd_pread",
    FdPrestatDirName => "fd_prestat_dir_name",
    FdPrestatGet => "fd_prestat_get",
    FdPwrite => "fd_pwrite",
    FdRead => "fd_read",
    FdReaddir => "fd_readdir",
    FdRenumber => "fd_renumber",
    FdSeek => "fd_seek",
    FdSync => "fd_sync",
    FdTell => "fd_tell",
    FdWrite => "fd_write",
    PathCreateDirectory => "path_create_directory",
    PathFilestatGet => "path_filestat_get",
    PathFilestatSetTimes => "path_filestat_set_times",
    PathLink => "path_link",
    PathOpen => "path_open",
    PathReadlink => "path_readlink",
    PathRemoveDirectory => "path_remove_directory",
    PathRename => "path_rename",
    PathSymlink => "path_symlink",
    PathUnlinkFile => "path_unlink_file",
    PollOneoff => "poll_oneoff",
    ProcExit => "proc_exit",
    ProcRaise => "proc_raise",
    RandomGet => "random_get",
    SchedYield => "sched_yield",
    SockAccept => "sock_accept",
    SockRecv => "sock_recv",
    SockSend => "sock_send",
    SockShutdown => "sock_shutdown",
}

impl std::fmt::Display for ImportName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The composed import table
///
/// Features install handlers in selection order; a later feature replaces
/// an earlier handler for the same name, which is how the file-system
/// feature takes over `fd_read`/`fd_write` from plain stdio in a
/// [`use_all`](crate::features::use_all) configuration.
#[derive(Clone, Default)]
pub struct ImportTable {
    entries: BTreeMap<ImportName, SyscallFn>,
}

impl ImportTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for a name
    pub fn insert(&mut self, name: ImportName, handler: SyscallFn) {
        self.entries.insert(name, handler);
    }

    pub fn get(&self, name: ImportName) -> Option<&SyscallFn> {
        self.entries.get(&name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ImportName, &SyscallFn)> {
        self.entries.iter().map(|(name, f)| (*name, f))
    }

    /// Stub every name no feature supplied with an `ENOSYS` handler
    ///
    /// The stubs never touch guest memory.
    pub fn fill_enosys(&mut self) {
        for &name in ImportName::ALL {
            self.entries
                .entry(name)
                .or_insert_with(|| Rc::new(|_args: &[i64]| Ok(errno::NOSYS)));
        }
    }

    /// Dispatch one import call
    ///
    /// Names missing from the table behave like the `ENOSYS` stub; after
    /// [`fill_enosys`](Self::fill_enosys) that case cannot occur.
    pub fn dispatch(&self, name: ImportName, args: &[i64]) -> Result<i32, Trap> {
        match self.entries.get(&name) {
            Some(handler) => handler(args),
            None => Ok(errno::NOSYS),
        }
    }
}
