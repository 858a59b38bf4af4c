//! Command-line argument imports
//!
//! Guests discover their argv in two calls: `args_sizes_get` reports the
//! count and the packed buffer size, then `args_get` receives two
//! pointers: one for the argv pointer array (stride 4) and one for the
//! buffer the NUL-terminated strings are packed into back-to-back.

use std::rc::Rc;

use super::{arg_u32, require_memory, Feature, SharedState};
use crate::abi::{errno, write_string};
use crate::imports::{ImportName, ImportTable};

struct ArgsFeature;

/// The args feature: `args_get` + `args_sizes_get`
pub fn use_args() -> Box<dyn Feature> {
    Box::new(ArgsFeature)
}

impl Feature for ArgsFeature {
    fn name(&self) -> &'static str {
        "args"
    }

    fn install(self: Box<Self>, state: &SharedState, table: &mut ImportTable) {
        let shared = state.clone();
        table.insert(
            ImportName::ArgsGet,
            Rc::new(move |args| {
                let state = shared.borrow();
                let mem = require_memory(&state)?;
                let argv_ptr = arg_u32(args, 0);
                let argv_buf_ptr = arg_u32(args, 1);

                let mut cursor = argv_buf_ptr;
                for (i, arg) in state.args.iter().enumerate() {
                    mem.write_u32(argv_ptr + 4 * i as u32, cursor)?;
                    let written = write_string(&mem, arg, cursor)?;
                    mem.write(cursor + written, &[0])?;
                    cursor += written + 1;
                }
                Ok(errno::SUCCESS)
            }),
        );

        let shared = state.clone();
        table.insert(
            ImportName::ArgsSizesGet,
            Rc::new(move |args| {
                let state = shared.borrow();
                let mem = require_memory(&state)?;
                let argc_ptr = arg_u32(args, 0);
                let size_ptr = arg_u32(args, 1);

                let buf_size: u32 = state.args.iter().map(|a| a.len() as u32 + 1).sum();
                mem.write_u32(argc_ptr, state.args.len() as u32)?;
                mem.write_u32(size_ptr, buf_size)?;
                Ok(errno::SUCCESS)
            }),
        );
    }
}
