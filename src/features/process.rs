//! Process-control imports
//!
//! `proc_exit` is the one import that does not return to the guest: it
//! raises [`Trap::Exit`], which unwinds out of `_start` and is converted
//! into the process exit code by the driver. `proc_raise` accepts the
//! signal number and does nothing; there is no process to deliver it to.

use std::rc::Rc;

use super::{arg_i32, Feature, SharedState};
use crate::abi::{errno, Trap};
use crate::imports::{ImportName, ImportTable};

struct ProcFeature;

/// The proc feature: `proc_exit` + `proc_raise`
pub fn use_proc() -> Box<dyn Feature> {
    Box::new(ProcFeature)
}

impl Feature for ProcFeature {
    fn name(&self) -> &'static str {
        "proc"
    }

    fn install(self: Box<Self>, _state: &SharedState, table: &mut ImportTable) {
        table.insert(
            ImportName::ProcExit,
            Rc::new(move |args| Err(Trap::Exit(arg_i32(args, 0)))),
        );

        table.insert(
            ImportName::ProcRaise,
            Rc::new(move |_args| Ok(errno::SUCCESS)),
        );
    }
}
