//! Guest linear-memory accessor
//!
//! The guest may grow its memory between host calls, which invalidates any
//! previously captured view of the underlying buffer. [`GuestMemory`] is
//! therefore a handle, not a view: every read/write re-derives the current
//! buffer, so imports always observe the memory as it is *now*.
//!
//! All multi-byte accesses are little-endian, as required by the wasm ABI.

use crate::error::{WasiError, WasiResult};

#[cfg(target_arch = "wasm32")]
use js_sys::Uint8Array;
#[cfg(target_arch = "wasm32")]
use wasm_bindgen::JsCast;

#[cfg(not(target_arch = "wasm32"))]
use std::cell::RefCell;
#[cfg(not(target_arch = "wasm32"))]
use std::rc::Rc;

/// wasm page size in bytes (64KB)
pub const PAGE_SIZE: u32 = 65536;

/// Handle to the guest's linear memory
#[cfg(target_arch = "wasm32")]
#[derive(Clone)]
pub struct GuestMemory {
    memory: js_sys::WebAssembly::Memory,
}

/// Handle to a guest memory buffer shared between the embedder and the
/// import handlers. Used natively, where there is no browser WebAssembly
/// object to borrow from.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Clone)]
pub struct GuestMemory {
    data: Rc<RefCell<Vec<u8>>>,
}

#[cfg(target_arch = "wasm32")]
impl GuestMemory {
    /// Wrap an instantiated module's exported memory
    pub fn from_js(memory: js_sys::WebAssembly::Memory) -> Self {
        Self { memory }
    }

    /// Current memory size in bytes
    pub fn size(&self) -> u32 {
        let buffer = self.memory.buffer();
        let array_buffer: js_sys::ArrayBuffer = buffer.unchecked_into();
        array_buffer.byte_length()
    }

    /// Read `len` bytes at `offset`
    pub fn read(&self, offset: u32, len: u32) -> WasiResult<Vec<u8>> {
        self.check_bounds(offset, len)?;
        let array = Uint8Array::new(&self.memory.buffer());
        let mut out = vec![0u8; len as usize];
        array.subarray(offset, offset + len).copy_to(&mut out);
        Ok(out)
    }

    /// Write bytes at `offset`
    pub fn write(&self, offset: u32, data: &[u8]) -> WasiResult<()> {
        self.check_bounds(offset, data.len() as u32)?;
        let array = Uint8Array::new(&self.memory.buffer());
        array
            .subarray(offset, offset + data.len() as u32)
            .copy_from(data);
        Ok(())
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl GuestMemory {
    /// Allocate a fresh memory of `pages` wasm pages
    pub fn with_pages(pages: u32) -> Self {
        Self {
            data: Rc::new(RefCell::new(vec![0u8; (pages * PAGE_SIZE) as usize])),
        }
    }

    /// Grow the memory by `pages` wasm pages, zero-filled
    ///
    /// Clones of this handle observe the new size immediately, which is
    /// exactly the situation import handlers must cope with.
    pub fn grow(&self, pages: u32) {
        let mut data = self.data.borrow_mut();
        let new_len = data.len() + (pages * PAGE_SIZE) as usize;
        data.resize(new_len, 0);
    }

    /// Current memory size in bytes
    pub fn size(&self) -> u32 {
        self.data.borrow().len() as u32
    }

    /// Read `len` bytes at `offset`
    pub fn read(&self, offset: u32, len: u32) -> WasiResult<Vec<u8>> {
        self.check_bounds(offset, len)?;
        let data = self.data.borrow();
        let start = offset as usize;
        Ok(data[start..start + len as usize].to_vec())
    }

    /// Write bytes at `offset`
    pub fn write(&self, offset: u32, data: &[u8]) -> WasiResult<()> {
        self.check_bounds(offset, data.len() as u32)?;
        let mut mem = self.data.borrow_mut();
        let start = offset as usize;
        mem[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }
}

impl GuestMemory {
    fn check_bounds(&self, offset: u32, len: u32) -> WasiResult<()> {
        let size = self.size();
        match offset.checked_add(len) {
            Some(end) if end <= size => Ok(()),
            _ => Err(WasiError::MemoryOutOfBounds {
                address: offset,
                len,
                memory_size: size,
            }),
        }
    }

    /// Read a little-endian u32
    pub fn read_u32(&self, offset: u32) -> WasiResult<u32> {
        let bytes = self.read(offset, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Write a little-endian u32
    pub fn write_u32(&self, offset: u32, value: u32) -> WasiResult<()> {
        self.write(offset, &value.to_le_bytes())
    }

    /// Read a little-endian u64
    pub fn read_u64(&self, offset: u32) -> WasiResult<u64> {
        let bytes = self.read(offset, 8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes);
        Ok(u64::from_le_bytes(raw))
    }

    /// Write a little-endian u64
    pub fn write_u64(&self, offset: u32, value: u64) -> WasiResult<()> {
        self.write(offset, &value.to_le_bytes())
    }

    /// Read a byte range and decode it as UTF-8, lossily
    pub fn read_string(&self, offset: u32, len: u32) -> WasiResult<String> {
        let bytes = self.read(offset, len)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;

    #[test]
    fn test_read_write_roundtrip() {
        let mem = GuestMemory::with_pages(1);
        mem.write(100, b"hello").unwrap();
        assert_eq!(mem.read(100, 5).unwrap(), b"hello");
    }

    #[test]
    fn test_little_endian_scalars() {
        let mem = GuestMemory::with_pages(1);
        mem.write_u32(0, 0x11223344).unwrap();
        assert_eq!(mem.read(0, 4).unwrap(), vec![0x44, 0x33, 0x22, 0x11]);
        assert_eq!(mem.read_u32(0).unwrap(), 0x11223344);

        mem.write_u64(8, 0x0102030405060708).unwrap();
        assert_eq!(mem.read_u64(8).unwrap(), 0x0102030405060708);
        assert_eq!(mem.read(8, 1).unwrap(), vec![0x08]);
    }

    #[test]
    fn test_out_of_bounds() {
        let mem = GuestMemory::with_pages(1);
        let err = mem.read(PAGE_SIZE - 2, 4).unwrap_err();
        assert!(matches!(err, WasiError::MemoryOutOfBounds { .. }));

        let err = mem.write(PAGE_SIZE, b"x").unwrap_err();
        assert!(matches!(err, WasiError::MemoryOutOfBounds { .. }));

        // Offset + len overflowing u32 must not wrap around
        assert!(mem.read(u32::MAX, 2).is_err());
    }

    #[test]
    fn test_grow_visible_through_clone() {
        let mem = GuestMemory::with_pages(1);
        let handle = mem.clone();
        assert!(handle.write(PAGE_SIZE, b"x").is_err());

        mem.grow(1);
        assert_eq!(handle.size(), 2 * PAGE_SIZE);
        handle.write(PAGE_SIZE, b"x").unwrap();
        assert_eq!(mem.read(PAGE_SIZE, 1).unwrap(), b"x");
    }

    #[test]
    fn test_read_string() {
        let mem = GuestMemory::with_pages(1);
        mem.write(10, "greet.txt".as_bytes()).unwrap();
        assert_eq!(mem.read_string(10, 9).unwrap(), "greet.txt");
    }
}
