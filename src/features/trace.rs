//! Tracing wrapper
//!
//! A feature that composes a list of inner features and then wraps every
//! import they produced with a logging shim, so each call appears as
//! `name(args...) => result` on the host log. Useful when bringing up a
//! new libc port against the sandbox.

use std::rc::Rc;

use super::{Feature, SharedState};
use crate::abi::Trap;
use crate::imports::{ImportTable, SyscallFn};

struct TraceFeature {
    inner: Vec<Box<dyn Feature>>,
}

/// Wrap a feature list with call logging
pub fn use_trace(inner: Vec<Box<dyn Feature>>) -> Box<dyn Feature> {
    Box::new(TraceFeature { inner })
}

fn render_args(args: &[i64]) -> String {
    args.iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn traced(name: &'static str, handler: SyscallFn) -> SyscallFn {
    Rc::new(move |args| {
        let result = handler(args);
        match &result {
            Ok(code) => crate::host_log!("{}({}) => {}", name, render_args(args), code),
            Err(Trap::Exit(code)) => {
                crate::host_log!("{}({}) => exit({})", name, render_args(args), code)
            }
            Err(Trap::Fault(err)) => {
                crate::host_log!("{}({}) => fault: {}", name, render_args(args), err)
            }
        }
        result
    })
}

impl Feature for TraceFeature {
    fn name(&self) -> &'static str {
        "trace"
    }

    fn install(self: Box<Self>, state: &SharedState, table: &mut ImportTable) {
        let mut composed = ImportTable::new();
        for feature in self.inner {
            feature.install(state, &mut composed);
        }

        for (name, handler) in composed.iter() {
            table.insert(name, traced(name.as_str(), handler.clone()));
        }
    }
}
