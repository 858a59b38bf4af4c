//! WASI bindings for the memory file system
//!
//! This is the bridge between the `fd_*`/`path_*` imports and the node
//! tree: every operation decodes its pointers through the guest-memory
//! handle, resolves paths against the directory descriptor's recorded
//! absolute path, and reports an errno back to the guest.

use std::rc::Rc;

use super::{normalize, parent_path, DeviceKind, FsError, MemoryFs, Node};
use crate::abi::{
    errno, fd as fdnum, filetype, iovecs, oflags, whence, write_fdstat, write_filestat,
    write_prestat,
};
use crate::error::WasiError;
use crate::features::stdio::{readv_to_guest, writev_from_guest, StdioProxies};
use crate::features::{arg_u32, require_memory, Feature, MemoryFsOptions, SharedState};
use crate::imports::{ImportName, ImportTable};
use crate::memory::GuestMemory;

/// Bail out of a syscall with the errno of a file-system error
macro_rules! try_fs {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(err) => return Ok(err.errno()),
        }
    };
}

fn filetype_of(node: &Node) -> u8 {
    match node {
        Node::File(_) => filetype::REGULAR_FILE,
        Node::Directory => filetype::DIRECTORY,
        Node::Device(_) => filetype::CHARACTER_DEVICE,
    }
}

impl MemoryFs {
    /// `path_open`: resolve, honour CREAT/EXCL/TRUNC/DIRECTORY, allocate
    ///
    /// Re-opening a path that already has a descriptor returns that
    /// descriptor, so guests that open the same file repeatedly do not
    /// grow the table.
    pub(crate) fn sys_path_open(
        &mut self,
        mem: &GuestMemory,
        dirfd: u32,
        path_ptr: u32,
        path_len: u32,
        open_flags: u32,
        opened_fd_ptr: u32,
    ) -> Result<i32, WasiError> {
        let rel = mem.read_string(path_ptr, path_len)?;
        let abs = try_fs!(self.resolve(dirfd, &rel));

        if let Some(existing) = self.find_open(&abs) {
            mem.write_u32(opened_fd_ptr, existing)?;
            return Ok(errno::SUCCESS);
        }

        match self.node(&abs).map(filetype_of) {
            Some(existing) => {
                if open_flags & oflags::EXCL != 0 {
                    return Ok(errno::EXIST);
                }
                if open_flags & oflags::DIRECTORY != 0 && existing != filetype::DIRECTORY {
                    return Ok(errno::NOTDIR);
                }
                if open_flags & oflags::TRUNC != 0 {
                    if let Some(Node::File(content)) = self.node_mut(&abs) {
                        content.clear();
                    }
                }
            }
            None => {
                if open_flags & oflags::CREAT == 0 {
                    return Ok(errno::NOENT);
                }
                try_fs!(self.check_parent_dir(&abs));
                self.insert_node(abs.clone(), Node::File(Vec::new()));
            }
        }

        let opened = self.alloc_fd(abs, false);
        mem.write_u32(opened_fd_ptr, opened)?;
        Ok(errno::SUCCESS)
    }

    /// `fd_read`: dispatch on the node kind behind the descriptor
    pub(crate) fn sys_fd_read(
        &mut self,
        stdio: &mut StdioProxies,
        mem: &GuestMemory,
        fd: u32,
        iovs_ptr: u32,
        iovs_len: u32,
        nread_ptr: u32,
    ) -> Result<i32, WasiError> {
        let iovs = iovecs(mem, iovs_ptr, iovs_len)?;
        let (path, position) = {
            let entry = try_fs!(self.entry(fd));
            (entry.path.clone(), entry.position)
        };

        let mut new_position = None;
        let total = match self.node(&path) {
            Some(Node::Device(DeviceKind::Stdin)) => readv_to_guest(&mut stdio.stdin, mem, &iovs)?,
            // Reads from /dev/null are immediate EOF
            Some(Node::Device(DeviceKind::Null)) => 0,
            Some(Node::Device(_)) => return Ok(errno::BADF),
            Some(Node::Directory) => return Ok(errno::ISDIR),
            Some(Node::File(content)) => {
                let mut pos = position as usize;
                let mut total = 0u32;
                for iov in &iovs {
                    let available = content.len().saturating_sub(pos);
                    let take = (iov.len as usize).min(available);
                    if take > 0 {
                        mem.write(iov.buf, &content[pos..pos + take])?;
                    }
                    pos += take;
                    total += take as u32;
                    if take < iov.len as usize {
                        break;
                    }
                }
                new_position = Some(pos as u64);
                total
            }
            None => return Ok(errno::NOENT),
        };

        if let Some(pos) = new_position {
            if let Ok(entry) = self.entry_mut(fd) {
                entry.position = pos;
            }
        }
        mem.write_u32(nread_ptr, total)?;
        Ok(errno::SUCCESS)
    }

    /// `fd_write`: dispatch on the node kind behind the descriptor
    pub(crate) fn sys_fd_write(
        &mut self,
        stdio: &mut StdioProxies,
        mem: &GuestMemory,
        fd: u32,
        iovs_ptr: u32,
        iovs_len: u32,
        nwritten_ptr: u32,
    ) -> Result<i32, WasiError> {
        let iovs = iovecs(mem, iovs_ptr, iovs_len)?;
        let (path, position) = {
            let entry = try_fs!(self.entry(fd));
            (entry.path.clone(), entry.position)
        };

        let mut new_position = None;
        let total = match self.node(&path) {
            Some(Node::Device(DeviceKind::Stdout)) => {
                writev_from_guest(&mut stdio.stdout, mem, &iovs)?
            }
            Some(Node::Device(DeviceKind::Stderr)) => {
                writev_from_guest(&mut stdio.stderr, mem, &iovs)?
            }
            // /dev/null swallows everything
            Some(Node::Device(DeviceKind::Null)) => iovs.iter().map(|iov| iov.len).sum(),
            Some(Node::Device(DeviceKind::Stdin)) => return Ok(errno::BADF),
            Some(Node::Directory) => return Ok(errno::ISDIR),
            Some(Node::File(_)) => {
                let mut chunks = Vec::with_capacity(iovs.len());
                for iov in &iovs {
                    chunks.push(mem.read(iov.buf, iov.len)?);
                }

                // Re-borrow mutably now that guest memory has been read
                let content = match self.node_mut(&path) {
                    Some(Node::File(content)) => content,
                    _ => return Ok(errno::NOENT),
                };
                let mut pos = position as usize;
                let mut total = 0u32;
                for chunk in &chunks {
                    let end = pos + chunk.len();
                    if end > content.len() {
                        // A seek past EOF leaves a hole; fill it with zeros
                        content.resize(end, 0);
                    }
                    content[pos..end].copy_from_slice(chunk);
                    pos = end;
                    total += chunk.len() as u32;
                }
                new_position = Some(pos as u64);
                total
            }
            None => return Ok(errno::NOENT),
        };

        if let Some(pos) = new_position {
            if let Ok(entry) = self.entry_mut(fd) {
                entry.position = pos;
            }
        }
        mem.write_u32(nwritten_ptr, total)?;
        Ok(errno::SUCCESS)
    }

    /// `fd_seek`: whence-relative reposition with clamping at zero
    pub(crate) fn sys_fd_seek(
        &mut self,
        mem: &GuestMemory,
        fd: u32,
        offset: i64,
        whence_value: u32,
        new_offset_ptr: u32,
    ) -> Result<i32, WasiError> {
        if fd < fdnum::FIRST_PREOPEN {
            return Ok(errno::BADF);
        }
        let (path, position) = {
            let entry = try_fs!(self.entry(fd));
            (entry.path.clone(), entry.position)
        };
        let size = match self.node(&path) {
            Some(Node::File(content)) => content.len() as i64,
            _ => return Ok(errno::BADF),
        };

        let base = match whence_value {
            whence::SET => 0,
            whence::CUR => position as i64,
            whence::END => size,
            _ => return Ok(errno::INVAL),
        };

        // Seeking past the end is legal; seeking before zero clamps
        let target = (base as i128 + offset as i128).max(0);
        let new_position = target.min(i64::MAX as i128) as u64;

        if let Ok(entry) = self.entry_mut(fd) {
            entry.position = new_position;
        }
        mem.write_u64(new_offset_ptr, new_position)?;
        Ok(errno::SUCCESS)
    }

    /// `fd_tell`: current position as u64
    pub(crate) fn sys_fd_tell(
        &self,
        mem: &GuestMemory,
        fd: u32,
        offset_ptr: u32,
    ) -> Result<i32, WasiError> {
        if fd < fdnum::FIRST_PREOPEN {
            return Ok(errno::BADF);
        }
        let entry = try_fs!(self.entry(fd));
        mem.write_u64(offset_ptr, entry.position)?;
        Ok(errno::SUCCESS)
    }

    /// `fd_close`: stdio descriptors persist, everything else is dropped
    pub(crate) fn sys_fd_close(&mut self, stdio: &mut StdioProxies, fd: u32) -> i32 {
        match fd {
            fdnum::STDIN => stdio.stdin.close(),
            fdnum::STDOUT => stdio.stdout.close(),
            fdnum::STDERR => stdio.stderr.close(),
            _ => {
                if self.open_files.remove(&fd).is_none() {
                    return errno::BADF;
                }
            }
        }
        errno::SUCCESS
    }

    /// `fd_fdstat_get`: filetype with zeroed flags and rights
    pub(crate) fn sys_fd_fdstat_get(
        &self,
        mem: &GuestMemory,
        fd: u32,
        buf_ptr: u32,
    ) -> Result<i32, WasiError> {
        let entry = try_fs!(self.entry(fd));
        let node = match self.node(&entry.path) {
            Some(node) => node,
            None => return Ok(errno::BADF),
        };
        write_fdstat(mem, buf_ptr, filetype_of(node), 0)?;
        Ok(errno::SUCCESS)
    }

    /// `fd_filestat_get`: zeroed filestat plus the regular-file size
    pub(crate) fn sys_fd_filestat_get(
        &self,
        mem: &GuestMemory,
        fd: u32,
        buf_ptr: u32,
    ) -> Result<i32, WasiError> {
        let entry = try_fs!(self.entry(fd));
        let node = match self.node(&entry.path) {
            Some(node) => node,
            None => return Ok(errno::BADF),
        };
        write_filestat(mem, buf_ptr, filetype_of(node))?;
        if let Node::File(content) = node {
            mem.write_u64(buf_ptr + 32, content.len() as u64)?;
        }
        Ok(errno::SUCCESS)
    }

    /// `fd_prestat_get`: preopen discovery
    pub(crate) fn sys_fd_prestat_get(
        &self,
        mem: &GuestMemory,
        fd: u32,
        buf_ptr: u32,
    ) -> Result<i32, WasiError> {
        let entry = try_fs!(self.entry(fd));
        if !entry.preopen {
            return Ok(errno::BADF);
        }
        write_prestat(mem, buf_ptr, entry.path.len() as u32)?;
        Ok(errno::SUCCESS)
    }

    /// `fd_prestat_dir_name`: the preopen's guest path bytes
    pub(crate) fn sys_fd_prestat_dir_name(
        &self,
        mem: &GuestMemory,
        fd: u32,
        path_ptr: u32,
        path_len: u32,
    ) -> Result<i32, WasiError> {
        let entry = try_fs!(self.entry(fd));
        if !entry.preopen {
            return Ok(errno::BADF);
        }
        if path_len != entry.path.len() as u32 {
            return Ok(errno::INVAL);
        }
        mem.write(path_ptr, entry.path.as_bytes())?;
        Ok(errno::SUCCESS)
    }

    /// `path_create_directory`: ensure the directory below the dirfd
    pub(crate) fn sys_path_create_directory(
        &mut self,
        mem: &GuestMemory,
        dirfd: u32,
        path_ptr: u32,
        path_len: u32,
    ) -> Result<i32, WasiError> {
        let rel = mem.read_string(path_ptr, path_len)?;
        let abs = try_fs!(self.resolve(dirfd, &rel));
        try_fs!(self.ensure_dir(&abs));
        Ok(errno::SUCCESS)
    }

    /// `path_unlink_file`: remove a file entry from its directory
    pub(crate) fn sys_path_unlink_file(
        &mut self,
        mem: &GuestMemory,
        dirfd: u32,
        path_ptr: u32,
        path_len: u32,
    ) -> Result<i32, WasiError> {
        let rel = mem.read_string(path_ptr, path_len)?;
        let abs = try_fs!(self.resolve(dirfd, &rel));
        match self.node(&abs) {
            None => Ok(errno::NOENT),
            Some(Node::Directory) => Ok(errno::ISDIR),
            // The fixed device nodes are part of the sandbox contract
            Some(Node::Device(_)) => Ok(errno::INVAL),
            Some(Node::File(_)) => {
                self.remove_node(&abs);
                Ok(errno::SUCCESS)
            }
        }
    }

    /// `path_remove_directory`: remove a directory, recursion permitted
    pub(crate) fn sys_path_remove_directory(
        &mut self,
        mem: &GuestMemory,
        dirfd: u32,
        path_ptr: u32,
        path_len: u32,
    ) -> Result<i32, WasiError> {
        let rel = mem.read_string(path_ptr, path_len)?;
        let abs = try_fs!(self.resolve(dirfd, &rel));
        match self.node(&abs) {
            None => Ok(errno::NOENT),
            Some(Node::File(_)) | Some(Node::Device(_)) => Ok(errno::NOTDIR),
            Some(Node::Directory) => {
                try_fs!(self.remove(&abs));
                Ok(errno::SUCCESS)
            }
        }
    }

    /// `path_filestat_get`: stat through a path instead of a descriptor
    pub(crate) fn sys_path_filestat_get(
        &self,
        mem: &GuestMemory,
        dirfd: u32,
        path_ptr: u32,
        path_len: u32,
        buf_ptr: u32,
    ) -> Result<i32, WasiError> {
        let rel = mem.read_string(path_ptr, path_len)?;
        let abs = try_fs!(self.resolve(dirfd, &rel));
        match self.node(&abs) {
            None => Ok(errno::NOENT),
            // The stdio bindings have no stat; only /dev/null behaves
            // like an ordinary character device here
            Some(Node::Device(DeviceKind::Stdin))
            | Some(Node::Device(DeviceKind::Stdout))
            | Some(Node::Device(DeviceKind::Stderr)) => Ok(errno::INVAL),
            Some(node) => {
                write_filestat(mem, buf_ptr, filetype_of(node))?;
                if let Node::File(content) = node {
                    mem.write_u64(buf_ptr + 32, content.len() as u64)?;
                }
                Ok(errno::SUCCESS)
            }
        }
    }

    fn node(&self, path: &str) -> Option<&Node> {
        self.nodes.get(path)
    }

    fn node_mut(&mut self, path: &str) -> Option<&mut Node> {
        self.nodes.get_mut(path)
    }

    fn insert_node(&mut self, path: String, node: Node) {
        self.nodes.insert(path, node);
    }

    fn remove_node(&mut self, path: &str) {
        self.nodes.remove(path);
    }

    /// The parent of a to-be-created node must already be a directory
    fn check_parent_dir(&self, path: &str) -> Result<(), FsError> {
        match parent_path(&normalize(path)) {
            None => Ok(()),
            Some(parent) => match self.node(&parent) {
                Some(Node::Directory) => Ok(()),
                Some(_) => Err(FsError::NotDirectory),
                None => Err(FsError::NotFound),
            },
        }
    }
}

struct MemoryFsFeature {
    options: MemoryFsOptions,
}

/// Build the file-system feature (see [`crate::features::use_memory_fs`])
pub(crate) fn memory_fs_feature(options: MemoryFsOptions) -> Box<dyn Feature> {
    Box::new(MemoryFsFeature { options })
}

/// Borrow the file system and stdio proxies out of the shared state
macro_rules! fs_state {
    ($state:expr) => {{
        let state = &mut *$state;
        match state.fs.as_mut() {
            Some(fs) => (fs, &mut state.stdio),
            // Unreachable once install has run; fail soft like a stub
            None => return Ok(errno::NOSYS),
        }
    }};
}

impl Feature for MemoryFsFeature {
    fn name(&self) -> &'static str {
        "memory_fs"
    }

    fn install(self: Box<Self>, state: &SharedState, table: &mut ImportTable) {
        {
            let mut state = state.borrow_mut();
            let mut fs = self.options.file_system.unwrap_or_default();
            let preopens = state.preopens.clone();
            fs.register_preopens(&preopens);
            if let Some(stdio) = self.options.stdio {
                state.stdio = stdio.into_proxies();
            }
            state.fs = Some(fs);
        }

        let shared = state.clone();
        table.insert(
            ImportName::PathOpen,
            Rc::new(move |args| {
                let mut state = shared.borrow_mut();
                let mem = require_memory(&state)?;
                let (fs, _) = fs_state!(state);
                Ok(fs.sys_path_open(
                    &mem,
                    arg_u32(args, 0),
                    // args[1] are the lookup flags; symlinks do not exist
                    // here, so following or not following is the same walk
                    arg_u32(args, 2),
                    arg_u32(args, 3),
                    arg_u32(args, 4),
                    // args[5..=7]: rights and fdflags are not enforced
                    arg_u32(args, 8),
                )?)
            }),
        );

        let shared = state.clone();
        table.insert(
            ImportName::FdRead,
            Rc::new(move |args| {
                let mut state = shared.borrow_mut();
                let mem = require_memory(&state)?;
                let (fs, stdio) = fs_state!(state);
                Ok(fs.sys_fd_read(
                    stdio,
                    &mem,
                    arg_u32(args, 0),
                    arg_u32(args, 1),
                    arg_u32(args, 2),
                    arg_u32(args, 3),
                )?)
            }),
        );

        let shared = state.clone();
        table.insert(
            ImportName::FdWrite,
            Rc::new(move |args| {
                let mut state = shared.borrow_mut();
                let mem = require_memory(&state)?;
                let (fs, stdio) = fs_state!(state);
                Ok(fs.sys_fd_write(
                    stdio,
                    &mem,
                    arg_u32(args, 0),
                    arg_u32(args, 1),
                    arg_u32(args, 2),
                    arg_u32(args, 3),
                )?)
            }),
        );

        let shared = state.clone();
        table.insert(
            ImportName::FdSeek,
            Rc::new(move |args| {
                let mut state = shared.borrow_mut();
                let mem = require_memory(&state)?;
                let (fs, _) = fs_state!(state);
                Ok(fs.sys_fd_seek(
                    &mem,
                    arg_u32(args, 0),
                    args[1],
                    arg_u32(args, 2),
                    arg_u32(args, 3),
                )?)
            }),
        );

        let shared = state.clone();
        table.insert(
            ImportName::FdTell,
            Rc::new(move |args| {
                let mut state = shared.borrow_mut();
                let mem = require_memory(&state)?;
                let (fs, _) = fs_state!(state);
                Ok(fs.sys_fd_tell(&mem, arg_u32(args, 0), arg_u32(args, 1))?)
            }),
        );

        let shared = state.clone();
        table.insert(
            ImportName::FdClose,
            Rc::new(move |args| {
                let mut state = shared.borrow_mut();
                let (fs, stdio) = fs_state!(state);
                Ok(fs.sys_fd_close(stdio, arg_u32(args, 0)))
            }),
        );

        let shared = state.clone();
        table.insert(
            ImportName::FdFdstatGet,
            Rc::new(move |args| {
                let mut state = shared.borrow_mut();
                let mem = require_memory(&state)?;
                let (fs, _) = fs_state!(state);
                Ok(fs.sys_fd_fdstat_get(&mem, arg_u32(args, 0), arg_u32(args, 1))?)
            }),
        );

        let shared = state.clone();
        table.insert(
            ImportName::FdFilestatGet,
            Rc::new(move |args| {
                let mut state = shared.borrow_mut();
                let mem = require_memory(&state)?;
                let (fs, _) = fs_state!(state);
                Ok(fs.sys_fd_filestat_get(&mem, arg_u32(args, 0), arg_u32(args, 1))?)
            }),
        );

        let shared = state.clone();
        table.insert(
            ImportName::FdPrestatGet,
            Rc::new(move |args| {
                let mut state = shared.borrow_mut();
                let mem = require_memory(&state)?;
                let (fs, _) = fs_state!(state);
                Ok(fs.sys_fd_prestat_get(&mem, arg_u32(args, 0), arg_u32(args, 1))?)
            }),
        );

        let shared = state.clone();
        table.insert(
            ImportName::FdPrestatDirName,
            Rc::new(move |args| {
                let mut state = shared.borrow_mut();
                let mem = require_memory(&state)?;
                let (fs, _) = fs_state!(state);
                Ok(fs.sys_fd_prestat_dir_name(
                    &mem,
                    arg_u32(args, 0),
                    arg_u32(args, 1),
                    arg_u32(args, 2),
                )?)
            }),
        );

        let shared = state.clone();
        table.insert(
            ImportName::PathCreateDirectory,
            Rc::new(move |args| {
                let mut state = shared.borrow_mut();
                let mem = require_memory(&state)?;
                let (fs, _) = fs_state!(state);
                Ok(fs.sys_path_create_directory(
                    &mem,
                    arg_u32(args, 0),
                    arg_u32(args, 1),
                    arg_u32(args, 2),
                )?)
            }),
        );

        let shared = state.clone();
        table.insert(
            ImportName::PathUnlinkFile,
            Rc::new(move |args| {
                let mut state = shared.borrow_mut();
                let mem = require_memory(&state)?;
                let (fs, _) = fs_state!(state);
                Ok(fs.sys_path_unlink_file(
                    &mem,
                    arg_u32(args, 0),
                    arg_u32(args, 1),
                    arg_u32(args, 2),
                )?)
            }),
        );

        let shared = state.clone();
        table.insert(
            ImportName::PathRemoveDirectory,
            Rc::new(move |args| {
                let mut state = shared.borrow_mut();
                let mem = require_memory(&state)?;
                let (fs, _) = fs_state!(state);
                Ok(fs.sys_path_remove_directory(
                    &mem,
                    arg_u32(args, 0),
                    arg_u32(args, 1),
                    arg_u32(args, 2),
                )?)
            }),
        );

        let shared = state.clone();
        table.insert(
            ImportName::PathFilestatGet,
            Rc::new(move |args| {
                let mut state = shared.borrow_mut();
                let mem = require_memory(&state)?;
                let (fs, _) = fs_state!(state);
                // args[1] are the lookup flags, irrelevant without symlinks
                Ok(fs.sys_path_filestat_get(
                    &mem,
                    arg_u32(args, 0),
                    arg_u32(args, 2),
                    arg_u32(args, 3),
                    arg_u32(args, 4),
                )?)
            }),
        );
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;
    use crate::features::WasiState;
    use std::cell::RefCell;

    const PATH_AT: u32 = 1024;
    const OPENED_AT: u32 = 2048;
    const IOV_AT: u32 = 64;
    const RES_AT: u32 = 96;
    const DATA_AT: u32 = 4096;

    fn fixture(preopens: &[(&str, &str)]) -> (ImportTable, GuestMemory, SharedState) {
        let state = Rc::new(RefCell::new(WasiState::new(
            vec![],
            vec![],
            preopens
                .iter()
                .map(|(g, h)| (g.to_string(), h.to_string()))
                .collect(),
        )));
        let mem = GuestMemory::with_pages(1);
        state.borrow_mut().memory = Some(mem.clone());

        let mut table = ImportTable::new();
        memory_fs_feature(MemoryFsOptions::new()).install(&state, &mut table);
        (table, mem, state)
    }

    fn open_path(
        table: &ImportTable,
        mem: &GuestMemory,
        dirfd: u32,
        path: &str,
        flags: u32,
    ) -> (i32, u32) {
        mem.write(PATH_AT, path.as_bytes()).unwrap();
        let rc = table
            .dispatch(
                ImportName::PathOpen,
                &[
                    dirfd as i64,
                    0,
                    PATH_AT as i64,
                    path.len() as i64,
                    flags as i64,
                    0,
                    0,
                    0,
                    OPENED_AT as i64,
                ],
            )
            .unwrap();
        (rc, mem.read_u32(OPENED_AT).unwrap())
    }

    fn put_iovec(mem: &GuestMemory, at: u32, buf: u32, len: u32) {
        mem.write_u32(at, buf).unwrap();
        mem.write_u32(at + 4, len).unwrap();
    }

    fn path_call(
        table: &ImportTable,
        mem: &GuestMemory,
        name: ImportName,
        dirfd: u32,
        path: &str,
    ) -> i32 {
        mem.write(PATH_AT, path.as_bytes()).unwrap();
        table
            .dispatch(
                name,
                &[dirfd as i64, PATH_AT as i64, path.len() as i64],
            )
            .unwrap()
    }

    // =========================================================================
    // Preopens
    // =========================================================================

    #[test]
    fn test_prestat_discovery() {
        let (table, mem, _state) = fixture(&[("/sandbox", "/sandbox")]);

        let rc = table.dispatch(ImportName::FdPrestatGet, &[3, 256]).unwrap();
        assert_eq!(rc, errno::SUCCESS);
        let buf = mem.read(256, 8).unwrap();
        assert_eq!(buf[0], 0);
        assert_eq!(u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]), 8);

        let rc = table
            .dispatch(ImportName::FdPrestatDirName, &[3, 512, 8])
            .unwrap();
        assert_eq!(rc, errno::SUCCESS);
        assert_eq!(mem.read(512, 8).unwrap(), b"/sandbox");
    }

    #[test]
    fn test_prestat_length_mismatch() {
        let (table, _mem, _state) = fixture(&[("/sandbox", "/sandbox")]);
        let rc = table
            .dispatch(ImportName::FdPrestatDirName, &[3, 512, 7])
            .unwrap();
        assert_eq!(rc, errno::INVAL);
    }

    #[test]
    fn test_prestat_non_preopen_is_badf() {
        let (table, mem, _state) = fixture(&[("/sandbox", "/sandbox")]);
        let (_, fd) = open_path(&table, &mem, 3, "f.txt", oflags::CREAT);

        let rc = table
            .dispatch(ImportName::FdPrestatGet, &[fd as i64, 256])
            .unwrap();
        assert_eq!(rc, errno::BADF);
        let rc = table.dispatch(ImportName::FdPrestatGet, &[0, 256]).unwrap();
        assert_eq!(rc, errno::BADF);
    }

    // =========================================================================
    // path_open
    // =========================================================================

    #[test]
    fn test_open_missing_without_creat() {
        let (table, mem, _state) = fixture(&[("/sandbox", "/sandbox")]);
        let (rc, _) = open_path(&table, &mem, 3, "missing.txt", 0);
        assert_eq!(rc, errno::NOENT);
    }

    #[test]
    fn test_open_creates_and_numbers_monotonically() {
        let (table, mem, _state) = fixture(&[("/sandbox", "/sandbox")]);

        let (rc, first) = open_path(&table, &mem, 3, "a.txt", oflags::CREAT);
        assert_eq!(rc, errno::SUCCESS);
        assert_eq!(first, 4);

        let (rc, second) = open_path(&table, &mem, 3, "b.txt", oflags::CREAT);
        assert_eq!(rc, errno::SUCCESS);
        assert_eq!(second, 5);

        // Closing does not recycle numbers
        table.dispatch(ImportName::FdClose, &[second as i64]).unwrap();
        let (_, third) = open_path(&table, &mem, 3, "c.txt", oflags::CREAT);
        assert_eq!(third, 6);
    }

    #[test]
    fn test_open_dedup_same_path() {
        let (table, mem, _state) = fixture(&[("/sandbox", "/sandbox")]);
        let (_, first) = open_path(&table, &mem, 3, "same.txt", oflags::CREAT);
        let (rc, second) = open_path(&table, &mem, 3, "./same.txt", 0);
        assert_eq!(rc, errno::SUCCESS);
        assert_eq!(second, first);
    }

    #[test]
    fn test_open_excl_on_existing() {
        let (table, mem, state) = fixture(&[("/sandbox", "/sandbox")]);
        state
            .borrow_mut()
            .fs
            .as_mut()
            .unwrap()
            .add_file("/sandbox/x", b"")
            .unwrap();

        let (rc, _) = open_path(&table, &mem, 3, "x", oflags::CREAT | oflags::EXCL);
        assert_eq!(rc, errno::EXIST);
    }

    #[test]
    fn test_open_trunc_clears_content() {
        let (table, mem, state) = fixture(&[("/sandbox", "/sandbox")]);
        state
            .borrow_mut()
            .fs
            .as_mut()
            .unwrap()
            .add_file("/sandbox/t", b"stale")
            .unwrap();

        let (rc, _) = open_path(&table, &mem, 3, "t", oflags::TRUNC);
        assert_eq!(rc, errno::SUCCESS);
        assert_eq!(
            state.borrow().fs.as_ref().unwrap().read_file("/sandbox/t").unwrap(),
            b""
        );
    }

    #[test]
    fn test_open_directory_flag_on_file() {
        let (table, mem, state) = fixture(&[("/sandbox", "/sandbox")]);
        state
            .borrow_mut()
            .fs
            .as_mut()
            .unwrap()
            .add_file("/sandbox/f", b"")
            .unwrap();

        let (rc, _) = open_path(&table, &mem, 3, "f", oflags::DIRECTORY);
        assert_eq!(rc, errno::NOTDIR);
    }

    #[test]
    fn test_open_create_requires_parent() {
        let (table, mem, _state) = fixture(&[("/sandbox", "/sandbox")]);
        let (rc, _) = open_path(&table, &mem, 3, "no/such/dir.txt", oflags::CREAT);
        assert_eq!(rc, errno::NOENT);
    }

    #[test]
    fn test_open_bad_dirfd() {
        let (table, mem, _state) = fixture(&[("/sandbox", "/sandbox")]);
        let (rc, _) = open_path(&table, &mem, 99, "x", oflags::CREAT);
        assert_eq!(rc, errno::BADF);
    }

    // =========================================================================
    // fd_read / fd_write
    // =========================================================================

    #[test]
    fn test_open_then_read_identity() {
        let (table, mem, state) = fixture(&[("/sandbox", "/sandbox")]);
        state
            .borrow_mut()
            .fs
            .as_mut()
            .unwrap()
            .add_file("/sandbox/greet.txt", b"hello")
            .unwrap();

        let (_, fd) = open_path(&table, &mem, 3, "greet.txt", 0);
        put_iovec(&mem, IOV_AT, DATA_AT, 16);
        let rc = table
            .dispatch(
                ImportName::FdRead,
                &[fd as i64, IOV_AT as i64, 1, RES_AT as i64],
            )
            .unwrap();
        assert_eq!(rc, errno::SUCCESS);
        assert_eq!(mem.read_u32(RES_AT).unwrap(), 5);
        assert_eq!(mem.read(DATA_AT, 5).unwrap(), b"hello");

        // Position advanced to EOF; next read returns zero bytes
        table
            .dispatch(
                ImportName::FdRead,
                &[fd as i64, IOV_AT as i64, 1, RES_AT as i64],
            )
            .unwrap();
        assert_eq!(mem.read_u32(RES_AT).unwrap(), 0);
    }

    #[test]
    fn test_read_across_iovec_partitions() {
        let (table, mem, state) = fixture(&[("/sandbox", "/sandbox")]);
        state
            .borrow_mut()
            .fs
            .as_mut()
            .unwrap()
            .add_file("/sandbox/data", b"abcdefg")
            .unwrap();

        let (_, fd) = open_path(&table, &mem, 3, "data", 0);
        put_iovec(&mem, IOV_AT, DATA_AT, 3);
        put_iovec(&mem, IOV_AT + 8, DATA_AT + 16, 10);
        table
            .dispatch(
                ImportName::FdRead,
                &[fd as i64, IOV_AT as i64, 2, RES_AT as i64],
            )
            .unwrap();
        assert_eq!(mem.read_u32(RES_AT).unwrap(), 7);
        assert_eq!(mem.read(DATA_AT, 3).unwrap(), b"abc");
        assert_eq!(mem.read(DATA_AT + 16, 4).unwrap(), b"defg");
    }

    #[test]
    fn test_write_then_read_back() {
        let (table, mem, state) = fixture(&[("/sandbox", "/sandbox")]);
        let (_, fd) = open_path(&table, &mem, 3, "out", oflags::CREAT);

        mem.write(DATA_AT, b"abcdef").unwrap();
        put_iovec(&mem, IOV_AT, DATA_AT, 6);
        let rc = table
            .dispatch(
                ImportName::FdWrite,
                &[fd as i64, IOV_AT as i64, 1, RES_AT as i64],
            )
            .unwrap();
        assert_eq!(rc, errno::SUCCESS);
        assert_eq!(mem.read_u32(RES_AT).unwrap(), 6);
        assert_eq!(
            state.borrow().fs.as_ref().unwrap().read_file("/sandbox/out").unwrap(),
            b"abcdef"
        );
    }

    #[test]
    fn test_write_past_end_zero_fills_hole() {
        let (table, mem, state) = fixture(&[("/sandbox", "/sandbox")]);
        let (_, fd) = open_path(&table, &mem, 3, "holey", oflags::CREAT);

        // Seek past EOF, then write
        table
            .dispatch(ImportName::FdSeek, &[fd as i64, 4, whence::SET as i64, RES_AT as i64])
            .unwrap();
        mem.write(DATA_AT, b"xy").unwrap();
        put_iovec(&mem, IOV_AT, DATA_AT, 2);
        table
            .dispatch(
                ImportName::FdWrite,
                &[fd as i64, IOV_AT as i64, 1, RES_AT as i64],
            )
            .unwrap();

        assert_eq!(
            state.borrow().fs.as_ref().unwrap().read_file("/sandbox/holey").unwrap(),
            b"\0\0\0\0xy"
        );
    }

    #[test]
    fn test_read_write_directory_is_isdir() {
        let (table, mem, _state) = fixture(&[("/sandbox", "/sandbox")]);
        put_iovec(&mem, IOV_AT, DATA_AT, 4);

        let rc = table
            .dispatch(ImportName::FdRead, &[3, IOV_AT as i64, 1, RES_AT as i64])
            .unwrap();
        assert_eq!(rc, errno::ISDIR);
        let rc = table
            .dispatch(ImportName::FdWrite, &[3, IOV_AT as i64, 1, RES_AT as i64])
            .unwrap();
        assert_eq!(rc, errno::ISDIR);
    }

    #[test]
    fn test_unknown_fd_is_badf() {
        let (table, mem, _state) = fixture(&[("/sandbox", "/sandbox")]);
        put_iovec(&mem, IOV_AT, DATA_AT, 4);
        let rc = table
            .dispatch(ImportName::FdRead, &[42, IOV_AT as i64, 1, RES_AT as i64])
            .unwrap();
        assert_eq!(rc, errno::BADF);
    }

    #[test]
    fn test_devnull_reads_eof_writes_discard() {
        let (table, mem, _state) = fixture(&[("/", "/")]);
        let (rc, fd) = open_path(&table, &mem, 3, "dev/null", 0);
        assert_eq!(rc, errno::SUCCESS);

        mem.write(DATA_AT, b"dropped").unwrap();
        put_iovec(&mem, IOV_AT, DATA_AT, 7);
        table
            .dispatch(
                ImportName::FdWrite,
                &[fd as i64, IOV_AT as i64, 1, RES_AT as i64],
            )
            .unwrap();
        assert_eq!(mem.read_u32(RES_AT).unwrap(), 7);

        table
            .dispatch(
                ImportName::FdRead,
                &[fd as i64, IOV_AT as i64, 1, RES_AT as i64],
            )
            .unwrap();
        assert_eq!(mem.read_u32(RES_AT).unwrap(), 0);
    }

    #[test]
    fn test_stdio_fds_route_to_proxies() {
        let (table, mem, state) = fixture(&[("/sandbox", "/sandbox")]);

        mem.write(DATA_AT, b"to stdout").unwrap();
        put_iovec(&mem, IOV_AT, DATA_AT, 9);
        let rc = table
            .dispatch(ImportName::FdWrite, &[1, IOV_AT as i64, 1, RES_AT as i64])
            .unwrap();
        assert_eq!(rc, errno::SUCCESS);
        assert_eq!(
            state.borrow_mut().stdio.stdout.take_captured(),
            b"to stdout"
        );

        // Writing to stdin is refused
        let rc = table
            .dispatch(ImportName::FdWrite, &[0, IOV_AT as i64, 1, RES_AT as i64])
            .unwrap();
        assert_eq!(rc, errno::BADF);
    }

    // =========================================================================
    // fd_seek / fd_tell / fd_close
    // =========================================================================

    #[test]
    fn test_seek_clamps_negative_to_zero() {
        let (table, mem, _state) = fixture(&[("/sandbox", "/sandbox")]);
        let (_, fd) = open_path(&table, &mem, 3, "s", oflags::CREAT);

        let rc = table
            .dispatch(
                ImportName::FdSeek,
                &[fd as i64, -100, whence::SET as i64, RES_AT as i64],
            )
            .unwrap();
        assert_eq!(rc, errno::SUCCESS);
        assert_eq!(mem.read_u64(RES_AT).unwrap(), 0);

        table
            .dispatch(ImportName::FdTell, &[fd as i64, RES_AT as i64])
            .unwrap();
        assert_eq!(mem.read_u64(RES_AT).unwrap(), 0);
    }

    #[test]
    fn test_seek_whence_variants() {
        let (table, mem, state) = fixture(&[("/sandbox", "/sandbox")]);
        state
            .borrow_mut()
            .fs
            .as_mut()
            .unwrap()
            .add_file("/sandbox/w", b"0123456789")
            .unwrap();
        let (_, fd) = open_path(&table, &mem, 3, "w", 0);

        table
            .dispatch(ImportName::FdSeek, &[fd as i64, 4, whence::SET as i64, RES_AT as i64])
            .unwrap();
        assert_eq!(mem.read_u64(RES_AT).unwrap(), 4);

        table
            .dispatch(ImportName::FdSeek, &[fd as i64, 3, whence::CUR as i64, RES_AT as i64])
            .unwrap();
        assert_eq!(mem.read_u64(RES_AT).unwrap(), 7);

        table
            .dispatch(ImportName::FdSeek, &[fd as i64, -2, whence::END as i64, RES_AT as i64])
            .unwrap();
        assert_eq!(mem.read_u64(RES_AT).unwrap(), 8);

        // Past-EOF seeks are legal
        table
            .dispatch(ImportName::FdSeek, &[fd as i64, 100, whence::END as i64, RES_AT as i64])
            .unwrap();
        assert_eq!(mem.read_u64(RES_AT).unwrap(), 110);

        let rc = table
            .dispatch(ImportName::FdSeek, &[fd as i64, 0, 9, RES_AT as i64])
            .unwrap();
        assert_eq!(rc, errno::INVAL);
    }

    #[test]
    fn test_seek_offset_written_as_u64() {
        let (table, mem, _state) = fixture(&[("/sandbox", "/sandbox")]);
        let (_, fd) = open_path(&table, &mem, 3, "wide", oflags::CREAT);

        // Poison the high half; a 32-bit writer would leave it behind
        mem.write_u64(RES_AT, u64::MAX).unwrap();
        table
            .dispatch(ImportName::FdSeek, &[fd as i64, 5, whence::SET as i64, RES_AT as i64])
            .unwrap();
        assert_eq!(mem.read_u64(RES_AT).unwrap(), 5);
    }

    #[test]
    fn test_seek_stdio_rejected() {
        let (table, _mem, _state) = fixture(&[("/sandbox", "/sandbox")]);
        for fd in 0..3 {
            let rc = table
                .dispatch(ImportName::FdSeek, &[fd, 0, whence::SET as i64, RES_AT as i64])
                .unwrap();
            assert_eq!(rc, errno::BADF);
            let rc = table
                .dispatch(ImportName::FdTell, &[fd, RES_AT as i64])
                .unwrap();
            assert_eq!(rc, errno::BADF);
        }
    }

    #[test]
    fn test_close_semantics() {
        let (table, mem, _state) = fixture(&[("/sandbox", "/sandbox")]);
        let (_, fd) = open_path(&table, &mem, 3, "c", oflags::CREAT);

        assert_eq!(
            table.dispatch(ImportName::FdClose, &[fd as i64]).unwrap(),
            errno::SUCCESS
        );
        assert_eq!(
            table.dispatch(ImportName::FdClose, &[fd as i64]).unwrap(),
            errno::BADF
        );

        // Stdio close is a hook invocation, the descriptor persists
        assert_eq!(
            table.dispatch(ImportName::FdClose, &[1]).unwrap(),
            errno::SUCCESS
        );
        put_iovec(&mem, IOV_AT, DATA_AT, 0);
        let rc = table
            .dispatch(ImportName::FdWrite, &[1, IOV_AT as i64, 1, RES_AT as i64])
            .unwrap();
        assert_eq!(rc, errno::SUCCESS);
    }

    // =========================================================================
    // Stat family
    // =========================================================================

    #[test]
    fn test_fdstat_filetypes() {
        let (table, mem, state) = fixture(&[("/sandbox", "/sandbox")]);
        state
            .borrow_mut()
            .fs
            .as_mut()
            .unwrap()
            .add_file("/sandbox/f", b"x")
            .unwrap();
        let (_, fd) = open_path(&table, &mem, 3, "f", 0);

        table
            .dispatch(ImportName::FdFdstatGet, &[0, 256])
            .unwrap();
        assert_eq!(mem.read(256, 1).unwrap(), vec![filetype::CHARACTER_DEVICE]);

        table
            .dispatch(ImportName::FdFdstatGet, &[3, 256])
            .unwrap();
        assert_eq!(mem.read(256, 1).unwrap(), vec![filetype::DIRECTORY]);

        table
            .dispatch(ImportName::FdFdstatGet, &[fd as i64, 256])
            .unwrap();
        assert_eq!(mem.read(256, 1).unwrap(), vec![filetype::REGULAR_FILE]);

        let rc = table.dispatch(ImportName::FdFdstatGet, &[42, 256]).unwrap();
        assert_eq!(rc, errno::BADF);
    }

    #[test]
    fn test_filestat_reports_size() {
        let (table, mem, state) = fixture(&[("/sandbox", "/sandbox")]);
        state
            .borrow_mut()
            .fs
            .as_mut()
            .unwrap()
            .add_file("/sandbox/sized", b"123456")
            .unwrap();
        let (_, fd) = open_path(&table, &mem, 3, "sized", 0);

        table
            .dispatch(ImportName::FdFilestatGet, &[fd as i64, 256])
            .unwrap();
        assert_eq!(mem.read(256 + 16, 1).unwrap(), vec![filetype::REGULAR_FILE]);
        assert_eq!(mem.read_u64(256 + 32).unwrap(), 6);
    }

    #[test]
    fn test_path_filestat() {
        let (table, mem, state) = fixture(&[("/", "/")]);
        state
            .borrow_mut()
            .fs
            .as_mut()
            .unwrap()
            .add_file("/f.bin", b"abc")
            .unwrap();

        mem.write(PATH_AT, b"f.bin").unwrap();
        let rc = table
            .dispatch(
                ImportName::PathFilestatGet,
                &[3, 0, PATH_AT as i64, 5, 256],
            )
            .unwrap();
        assert_eq!(rc, errno::SUCCESS);
        assert_eq!(mem.read(256 + 16, 1).unwrap(), vec![filetype::REGULAR_FILE]);
        assert_eq!(mem.read_u64(256 + 32).unwrap(), 3);

        mem.write(PATH_AT, b"missing").unwrap();
        let rc = table
            .dispatch(
                ImportName::PathFilestatGet,
                &[3, 0, PATH_AT as i64, 7, 256],
            )
            .unwrap();
        assert_eq!(rc, errno::NOENT);

        // The stdio bindings are not statable through paths
        mem.write(PATH_AT, b"dev/stdin").unwrap();
        let rc = table
            .dispatch(
                ImportName::PathFilestatGet,
                &[3, 0, PATH_AT as i64, 9, 256],
            )
            .unwrap();
        assert_eq!(rc, errno::INVAL);

        // /dev/null stats as a character device
        mem.write(PATH_AT, b"dev/null").unwrap();
        let rc = table
            .dispatch(
                ImportName::PathFilestatGet,
                &[3, 0, PATH_AT as i64, 8, 256],
            )
            .unwrap();
        assert_eq!(rc, errno::SUCCESS);
        assert_eq!(
            mem.read(256 + 16, 1).unwrap(),
            vec![filetype::CHARACTER_DEVICE]
        );
    }

    // =========================================================================
    // Directory operations
    // =========================================================================

    #[test]
    fn test_create_directory() {
        let (table, mem, state) = fixture(&[("/sandbox", "/sandbox")]);
        let rc = path_call(&table, &mem, ImportName::PathCreateDirectory, 3, "a/b/c");
        assert_eq!(rc, errno::SUCCESS);
        assert!(state.borrow().fs.as_ref().unwrap().exists("/sandbox/a/b/c"));

        // Intermediate non-directory components are an error
        state
            .borrow_mut()
            .fs
            .as_mut()
            .unwrap()
            .add_file("/sandbox/file", b"")
            .unwrap();
        let rc = path_call(&table, &mem, ImportName::PathCreateDirectory, 3, "file/sub");
        assert_eq!(rc, errno::NOTDIR);
    }

    #[test]
    fn test_unlink_file() {
        let (table, mem, state) = fixture(&[("/sandbox", "/sandbox")]);
        state
            .borrow_mut()
            .fs
            .as_mut()
            .unwrap()
            .add_file("/sandbox/gone", b"x")
            .unwrap();

        let rc = path_call(&table, &mem, ImportName::PathUnlinkFile, 3, "gone");
        assert_eq!(rc, errno::SUCCESS);
        assert!(!state.borrow().fs.as_ref().unwrap().exists("/sandbox/gone"));

        let rc = path_call(&table, &mem, ImportName::PathUnlinkFile, 3, "gone");
        assert_eq!(rc, errno::NOENT);
    }

    #[test]
    fn test_unlink_directory_is_isdir() {
        let (table, mem, _state) = fixture(&[("/sandbox", "/sandbox")]);
        path_call(&table, &mem, ImportName::PathCreateDirectory, 3, "d");
        let rc = path_call(&table, &mem, ImportName::PathUnlinkFile, 3, "d");
        assert_eq!(rc, errno::ISDIR);
    }

    #[test]
    fn test_unlink_device_is_refused() {
        let (table, mem, state) = fixture(&[("/", "/")]);
        let rc = path_call(&table, &mem, ImportName::PathUnlinkFile, 3, "dev/null");
        assert_eq!(rc, errno::INVAL);
        assert!(state.borrow().fs.as_ref().unwrap().exists("/dev/null"));
    }

    #[test]
    fn test_remove_directory_including_nonempty() {
        let (table, mem, state) = fixture(&[("/sandbox", "/sandbox")]);
        state
            .borrow_mut()
            .fs
            .as_mut()
            .unwrap()
            .add_file("/sandbox/d/inner.txt", b"x")
            .unwrap();

        let rc = path_call(&table, &mem, ImportName::PathRemoveDirectory, 3, "d");
        assert_eq!(rc, errno::SUCCESS);
        let state = state.borrow();
        let fs = state.fs.as_ref().unwrap();
        assert!(!fs.exists("/sandbox/d"));
        assert!(!fs.exists("/sandbox/d/inner.txt"));
    }

    #[test]
    fn test_remove_directory_on_file_is_notdir() {
        let (table, mem, state) = fixture(&[("/sandbox", "/sandbox")]);
        state
            .borrow_mut()
            .fs
            .as_mut()
            .unwrap()
            .add_file("/sandbox/plain", b"")
            .unwrap();
        let rc = path_call(&table, &mem, ImportName::PathRemoveDirectory, 3, "plain");
        assert_eq!(rc, errno::NOTDIR);
    }

    // =========================================================================
    // End-to-end: create, write, seek, read
    // =========================================================================

    #[test]
    fn test_create_write_seek_read() {
        let (table, mem, _state) = fixture(&[("/sandbox", "/sandbox")]);
        let (_, fd) = open_path(&table, &mem, 3, "out", oflags::CREAT);

        mem.write(DATA_AT, b"abcdef").unwrap();
        put_iovec(&mem, IOV_AT, DATA_AT, 6);
        table
            .dispatch(
                ImportName::FdWrite,
                &[fd as i64, IOV_AT as i64, 1, RES_AT as i64],
            )
            .unwrap();

        table
            .dispatch(ImportName::FdSeek, &[fd as i64, 2, whence::SET as i64, RES_AT as i64])
            .unwrap();

        put_iovec(&mem, IOV_AT, DATA_AT + 64, 3);
        table
            .dispatch(
                ImportName::FdRead,
                &[fd as i64, IOV_AT as i64, 1, RES_AT as i64],
            )
            .unwrap();
        assert_eq!(mem.read_u32(RES_AT).unwrap(), 3);
        assert_eq!(mem.read(DATA_AT + 64, 3).unwrap(), b"cde");
    }
}
