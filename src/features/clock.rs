//! Clock imports
//!
//! Two clocks are exposed: REALTIME (nanoseconds since the Unix epoch,
//! sourced from the host's wall clock) and MONOTONIC (nanoseconds since
//! the clock was constructed). Other clock ids report `ENOSYS`.
//!
//! The wall clock is coarse: on the web it comes from `Date.now()`, which
//! only resolves milliseconds, so the advertised resolution stays at one
//! microsecond rather than pretending to more.

use std::rc::Rc;

use super::{arg_u32, require_memory, Feature, SharedState};
use crate::abi::{clockid, errno};
use crate::imports::{ImportName, ImportTable};

/// Advertised REALTIME resolution in nanoseconds
const REALTIME_RESOLUTION_NS: u64 = 1_000;

/// Advertised MONOTONIC resolution in nanoseconds
const MONOTONIC_RESOLUTION_NS: u64 = 5_000;

/// Host time source
pub struct HostClock {
    #[cfg(not(target_arch = "wasm32"))]
    origin: std::time::Instant,
}

impl HostClock {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_arch = "wasm32"))]
            origin: std::time::Instant::now(),
        }
    }

    /// Wall-clock nanoseconds since the Unix epoch
    #[cfg(not(target_arch = "wasm32"))]
    pub fn realtime_ns(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
    }

    /// Wall-clock nanoseconds since the Unix epoch
    #[cfg(target_arch = "wasm32")]
    pub fn realtime_ns(&self) -> u64 {
        (js_sys::Date::now() * 1_000_000.0) as u64
    }

    /// Nanoseconds since this clock was constructed
    #[cfg(not(target_arch = "wasm32"))]
    pub fn monotonic_ns(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }

    /// Nanoseconds since an origin fixed by the host environment
    #[cfg(target_arch = "wasm32")]
    pub fn monotonic_ns(&self) -> u64 {
        (performance_now() * 1_000_000.0) as u64
    }
}

impl Default for HostClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen::prelude::wasm_bindgen]
extern "C" {
    #[wasm_bindgen::prelude::wasm_bindgen(js_namespace = performance, js_name = now)]
    fn performance_now() -> f64;
}

struct ClockFeature;

/// The clock feature: `clock_res_get` + `clock_time_get`
pub fn use_clock() -> Box<dyn Feature> {
    Box::new(ClockFeature)
}

impl Feature for ClockFeature {
    fn name(&self) -> &'static str {
        "clock"
    }

    fn install(self: Box<Self>, state: &SharedState, table: &mut ImportTable) {
        let shared = state.clone();
        table.insert(
            ImportName::ClockResGet,
            Rc::new(move |args| {
                let state = shared.borrow();
                let mem = require_memory(&state)?;
                let out_ptr = arg_u32(args, 1);

                let resolution = match arg_u32(args, 0) {
                    clockid::REALTIME => REALTIME_RESOLUTION_NS,
                    clockid::MONOTONIC => MONOTONIC_RESOLUTION_NS,
                    _ => return Ok(errno::NOSYS),
                };
                mem.write_u64(out_ptr, resolution)?;
                Ok(errno::SUCCESS)
            }),
        );

        let shared = state.clone();
        table.insert(
            ImportName::ClockTimeGet,
            Rc::new(move |args| {
                let state = shared.borrow();
                let mem = require_memory(&state)?;
                // args[1] is the precision hint, which we ignore
                let out_ptr = arg_u32(args, 2);

                let now = match arg_u32(args, 0) {
                    clockid::REALTIME => state.clock.realtime_ns(),
                    clockid::MONOTONIC => state.clock.monotonic_ns(),
                    _ => return Ok(errno::NOSYS),
                };
                mem.write_u64(out_ptr, now)?;
                Ok(errno::SUCCESS)
            }),
        );
    }
}
