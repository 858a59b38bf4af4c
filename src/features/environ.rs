//! Environment-variable imports
//!
//! Mirrors the argv protocol with entries packed as `KEY=VALUE\0`. The
//! iteration order is the insertion order of the configured entries, so
//! paired `environ_sizes_get`/`environ_get` calls always agree.

use std::rc::Rc;

use super::{arg_u32, require_memory, Feature, SharedState};
use crate::abi::{errno, write_string};
use crate::imports::{ImportName, ImportTable};

struct EnvironFeature;

/// The environ feature: `environ_get` + `environ_sizes_get`
pub fn use_environ() -> Box<dyn Feature> {
    Box::new(EnvironFeature)
}

fn entry_len(key: &str, value: &str) -> u32 {
    // KEY=VALUE plus the NUL
    key.len() as u32 + 1 + value.len() as u32 + 1
}

impl Feature for EnvironFeature {
    fn name(&self) -> &'static str {
        "environ"
    }

    fn install(self: Box<Self>, state: &SharedState, table: &mut ImportTable) {
        let shared = state.clone();
        table.insert(
            ImportName::EnvironGet,
            Rc::new(move |args| {
                let state = shared.borrow();
                let mem = require_memory(&state)?;
                let environ_ptr = arg_u32(args, 0);
                let environ_buf_ptr = arg_u32(args, 1);

                let mut cursor = environ_buf_ptr;
                for (i, (key, value)) in state.env.iter().enumerate() {
                    mem.write_u32(environ_ptr + 4 * i as u32, cursor)?;
                    cursor += write_string(&mem, key, cursor)?;
                    cursor += write_string(&mem, "=", cursor)?;
                    cursor += write_string(&mem, value, cursor)?;
                    mem.write(cursor, &[0])?;
                    cursor += 1;
                }
                Ok(errno::SUCCESS)
            }),
        );

        let shared = state.clone();
        table.insert(
            ImportName::EnvironSizesGet,
            Rc::new(move |args| {
                let state = shared.borrow();
                let mem = require_memory(&state)?;
                let count_ptr = arg_u32(args, 0);
                let size_ptr = arg_u32(args, 1);

                let buf_size: u32 = state.env.iter().map(|(k, v)| entry_len(k, v)).sum();
                mem.write_u32(count_ptr, state.env.len() as u32)?;
                mem.write_u32(size_ptr, buf_size)?;
                Ok(errno::SUCCESS)
            }),
        );
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;
    use crate::features::WasiState;
    use crate::memory::GuestMemory;
    use std::cell::RefCell;

    fn table_with_env(env: &[(&str, &str)]) -> (ImportTable, GuestMemory) {
        let state = Rc::new(RefCell::new(WasiState::new(
            vec![],
            env.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            vec![],
        )));
        let mem = GuestMemory::with_pages(1);
        state.borrow_mut().memory = Some(mem.clone());

        let mut table = ImportTable::new();
        use_environ().install(&state, &mut table);
        (table, mem)
    }

    #[test]
    fn test_environ_sizes() {
        let (table, mem) = table_with_env(&[("HOME", "/home"), ("TERM", "vt100")]);
        let rc = table
            .dispatch(ImportName::EnvironSizesGet, &[64, 68])
            .unwrap();
        assert_eq!(rc, errno::SUCCESS);
        assert_eq!(mem.read_u32(64).unwrap(), 2);
        // "HOME=/home\0" (11) + "TERM=vt100\0" (11)
        assert_eq!(mem.read_u32(68).unwrap(), 22);
    }

    #[test]
    fn test_environ_layout_matches_sizes() {
        let (table, mem) = table_with_env(&[("A", "1"), ("BB", "22")]);
        table
            .dispatch(ImportName::EnvironSizesGet, &[64, 68])
            .unwrap();
        let total = mem.read_u32(68).unwrap();

        table.dispatch(ImportName::EnvironGet, &[80, 128]).unwrap();
        assert_eq!(mem.read_u32(80).unwrap(), 128);
        assert_eq!(mem.read_u32(84).unwrap(), 128 + 4);
        assert_eq!(mem.read(128, total).unwrap(), b"A=1\0BB=22\0");
    }
}
