//! Random-byte import
//!
//! `random_get` fills a guest buffer with cryptographically secure random
//! bytes. The source is injectable so deterministic embeddings and tests
//! can supply their own; the default goes to the host CSPRNG
//! (`getrandom` natively, `crypto.getRandomValues` on the web).

use std::rc::Rc;

use super::{arg_u32, require_memory, Feature, SharedState};
use crate::abi::errno;
use crate::error::{WasiError, WasiResult};
use crate::imports::{ImportName, ImportTable};

/// Custom random fill hook
pub type RandomFill = Box<dyn FnMut(&mut [u8])>;

/// Random byte source, defaulting to the host CSPRNG
#[derive(Default)]
pub struct RandomSource {
    fill: Option<RandomFill>,
}

impl RandomSource {
    pub fn fill(&mut self, buf: &mut [u8]) -> WasiResult<()> {
        match &mut self.fill {
            Some(hook) => {
                hook(buf);
                Ok(())
            }
            None => host_random_fill(buf),
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn host_random_fill(buf: &mut [u8]) -> WasiResult<()> {
    getrandom::getrandom(buf).map_err(|e| WasiError::RandomSource {
        reason: e.to_string(),
    })
}

#[cfg(target_arch = "wasm32")]
fn host_random_fill(buf: &mut [u8]) -> WasiResult<()> {
    crypto_get_random_values(buf);
    Ok(())
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen::prelude::wasm_bindgen]
extern "C" {
    #[wasm_bindgen::prelude::wasm_bindgen(js_namespace = crypto, js_name = getRandomValues)]
    fn crypto_get_random_values(buf: &mut [u8]);
}

/// Options for [`use_random`]
#[derive(Default)]
pub struct RandomOptions {
    fill: Option<RandomFill>,
}

impl RandomOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the host CSPRNG with a custom fill hook
    pub fn with_fill(mut self, fill: impl FnMut(&mut [u8]) + 'static) -> Self {
        self.fill = Some(Box::new(fill));
        self
    }
}

struct RandomFeature {
    options: RandomOptions,
}

/// The random feature: `random_get`
pub fn use_random(options: RandomOptions) -> Box<dyn Feature> {
    Box::new(RandomFeature { options })
}

impl Feature for RandomFeature {
    fn name(&self) -> &'static str {
        "random"
    }

    fn install(self: Box<Self>, state: &SharedState, table: &mut ImportTable) {
        state.borrow_mut().random = RandomSource {
            fill: self.options.fill,
        };

        let shared = state.clone();
        table.insert(
            ImportName::RandomGet,
            Rc::new(move |args| {
                let mut state = shared.borrow_mut();
                let mem = require_memory(&state)?;
                let buf_ptr = arg_u32(args, 0);
                let len = arg_u32(args, 1);

                let mut bytes = vec![0u8; len as usize];
                state.random.fill(&mut bytes)?;
                mem.write(buf_ptr, &bytes)?;
                Ok(errno::SUCCESS)
            }),
        );
    }
}
