//! Driver: configuration, import-object production, and guest entry
//!
//! The driver owns everything with instance lifetime: the shared state the
//! import handlers mutate, the composed import table, and the one-shot
//! entry into the guest. The guest's linear memory is attached only after
//! instantiation, and every import handler re-derives its view from the
//! handle, so memory growth between calls is always observed.
//!
//! A driver accepts exactly one entry call: either `start` (command
//! model, runs `_start` and returns the exit code) or `initialize`
//! (reactor model, runs `_initialize`).

use std::cell::RefCell;
use std::rc::Rc;

use crate::abi::{exports, Trap};
use crate::error::{WasiError, WasiResult};
use crate::features::{Feature, SharedState, WasiState};
use crate::imports::{ImportName, ImportTable};
use crate::memory::GuestMemory;

#[cfg(target_arch = "wasm32")]
use js_sys::{Object, Reflect};
#[cfg(target_arch = "wasm32")]
use wasm_bindgen::{JsCast, JsValue};

/// Construction options for [`Wasi`]
#[derive(Default)]
pub struct WasiOptions {
    args: Vec<String>,
    env: Vec<(String, String)>,
    preopens: Vec<(String, String)>,
    features: Vec<Box<dyn Feature>>,
}

impl WasiOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one command-line argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append command-line arguments; index 0 is the program name
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add one environment entry
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Grant the guest a preopen directory
    ///
    /// The host hint is informational for the in-memory file system; the
    /// guest path is created as a directory and becomes discoverable via
    /// `fd_prestat_*`.
    pub fn preopen(mut self, guest_path: impl Into<String>, host_hint: impl Into<String>) -> Self {
        self.preopens.push((guest_path.into(), host_hint.into()));
        self
    }

    /// Add one feature provider
    pub fn feature(mut self, feature: Box<dyn Feature>) -> Self {
        self.features.push(feature);
        self
    }

    /// Add a list of feature providers, e.g. from [`crate::use_all`]
    pub fn features(mut self, features: Vec<Box<dyn Feature>>) -> Self {
        self.features.extend(features);
        self
    }
}

/// The WASI preview1 host driver
pub struct Wasi {
    state: SharedState,
    table: ImportTable,
    entered: bool,
}

impl Wasi {
    /// Build the driver: install every feature, then fill the rest of the
    /// import set with `ENOSYS` stubs
    pub fn new(options: WasiOptions) -> Self {
        let state: SharedState = Rc::new(RefCell::new(WasiState::new(
            options.args,
            options.env,
            options.preopens,
        )));

        let mut table = ImportTable::new();
        for feature in options.features {
            feature.install(&state, &mut table);
        }
        table.fill_enosys();

        Self {
            state,
            table,
            entered: false,
        }
    }

    /// The composed import table
    pub fn import_table(&self) -> &ImportTable {
        &self.table
    }

    /// Dispatch one import call, exactly as a guest would
    ///
    /// This is the single entry point shared by the wasm bridge, the
    /// tracing wrapper tests, and native guests.
    pub fn invoke(&self, name: ImportName, args: &[i64]) -> Result<i32, Trap> {
        self.table.dispatch(name, args)
    }

    /// Run a closure over the sandbox file system, if one is installed
    pub fn with_fs<R>(&self, f: impl FnOnce(&mut crate::fs::MemoryFs) -> R) -> Option<R> {
        let mut state = self.state.borrow_mut();
        state.fs.as_mut().map(f)
    }

    /// Drain stdout captured while no handler was configured
    pub fn take_stdout(&self) -> Vec<u8> {
        self.state.borrow_mut().stdio.stdout.take_captured()
    }

    /// Drain stderr captured while no handler was configured
    pub fn take_stderr(&self) -> Vec<u8> {
        self.state.borrow_mut().stdio.stderr.take_captured()
    }

    fn enter(&mut self) -> WasiResult<()> {
        if self.entered {
            return Err(WasiError::AlreadyStarted);
        }
        self.entered = true;
        Ok(())
    }
}

/// Outcome mapping shared by both instance implementations
fn exit_result(result: Result<(), Trap>) -> WasiResult<i32> {
    match result {
        Ok(()) => Ok(0),
        Err(Trap::Exit(code)) => Ok(code),
        Err(Trap::Fault(err)) => Err(err),
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub use native_instance::Instance;
#[cfg(target_arch = "wasm32")]
pub use web_instance::Instance;

#[cfg(not(target_arch = "wasm32"))]
mod native_instance {
    use super::*;

    /// A guest entry point
    pub type EntryFn = Box<dyn FnOnce(&Wasi) -> Result<(), Trap>>;

    /// A native stand-in for an instantiated guest
    ///
    /// Carries the guest memory plus optional `_start`/`_initialize`
    /// entries, so the full driver contract is exercisable without a
    /// WebAssembly engine. The entry closures play the guest: they call
    /// back into the import table the way generated wasm code would.
    #[derive(Default)]
    pub struct Instance {
        pub(super) memory: Option<GuestMemory>,
        pub(super) start: Option<EntryFn>,
        pub(super) initialize: Option<EntryFn>,
    }

    impl Instance {
        pub fn new() -> Self {
            Self::default()
        }

        /// Attach the exported memory
        pub fn with_memory(mut self, memory: GuestMemory) -> Self {
            self.memory = Some(memory);
            self
        }

        /// Provide the `_start` export
        pub fn on_start(mut self, entry: impl FnOnce(&Wasi) -> Result<(), Trap> + 'static) -> Self {
            self.start = Some(Box::new(entry));
            self
        }

        /// Provide the `_initialize` export
        pub fn on_initialize(
            mut self,
            entry: impl FnOnce(&Wasi) -> Result<(), Trap> + 'static,
        ) -> Self {
            self.initialize = Some(Box::new(entry));
            self
        }
    }

    impl Wasi {
        /// Run a command-model guest to completion
        ///
        /// Returns the exit code: the value from `proc_exit`, or 0 when
        /// `_start` returns normally. Host faults propagate as errors.
        pub fn start(&mut self, mut instance: Instance) -> WasiResult<i32> {
            let memory = instance.memory.take().ok_or(WasiError::MissingExport {
                name: exports::MEMORY,
            })?;
            let entry = instance.start.take().ok_or(WasiError::MissingExport {
                name: exports::START,
            })?;
            self.enter()?;

            self.state.borrow_mut().memory = Some(memory);
            exit_result(entry(self))
        }

        /// Initialize a reactor-model guest
        pub fn initialize(&mut self, mut instance: Instance) -> WasiResult<()> {
            let memory = instance.memory.take().ok_or(WasiError::MissingExport {
                name: exports::MEMORY,
            })?;
            let entry = instance.initialize.take().ok_or(WasiError::MissingExport {
                name: exports::INITIALIZE,
            })?;
            self.enter()?;

            self.state.borrow_mut().memory = Some(memory);
            match entry(self) {
                Ok(()) => Ok(()),
                Err(Trap::Exit(_)) => Ok(()),
                Err(Trap::Fault(err)) => Err(err),
            }
        }
    }
}

#[cfg(target_arch = "wasm32")]
mod web_instance {
    use super::*;

    /// Property carried by the thrown process-exit sentinel
    const EXIT_CODE_KEY: &str = "__skerry_exit_code";

    /// An instantiated guest on the browser WebAssembly API
    pub struct Instance {
        inner: js_sys::WebAssembly::Instance,
    }

    impl Instance {
        pub fn from_js(inner: js_sys::WebAssembly::Instance) -> Self {
            Self { inner }
        }

        fn export(&self, name: &'static str) -> WasiResult<JsValue> {
            let value = Reflect::get(&self.inner.exports(), &JsValue::from_str(name))
                .map_err(|_| WasiError::MissingExport { name })?;
            if value.is_undefined() {
                return Err(WasiError::MissingExport { name });
            }
            Ok(value)
        }

        fn memory(&self) -> WasiResult<GuestMemory> {
            let memory: js_sys::WebAssembly::Memory = self
                .export(exports::MEMORY)?
                .dyn_into()
                .map_err(|_| WasiError::WrongExportType {
                    name: exports::MEMORY,
                    expected: "WebAssembly.Memory",
                })?;
            Ok(GuestMemory::from_js(memory))
        }

        fn entry(&self, name: &'static str) -> WasiResult<js_sys::Function> {
            self.export(name)?
                .dyn_into()
                .map_err(|_| WasiError::WrongExportType {
                    name,
                    expected: "Function",
                })
        }

        fn run(&self, name: &'static str) -> Result<(), Trap> {
            match self.entry(name) {
                Ok(entry) => match entry.call0(&JsValue::NULL) {
                    Ok(_) => Ok(()),
                    Err(thrown) => match exit_code_of(&thrown) {
                        Some(code) => Err(Trap::Exit(code)),
                        None => Err(Trap::Fault(WasiError::Aborted {
                            reason: format!("{:?}", thrown),
                        })),
                    },
                },
                Err(err) => Err(Trap::Fault(err)),
            }
        }
    }

    /// Recover the exit code from a thrown sentinel value
    fn exit_code_of(thrown: &JsValue) -> Option<i32> {
        Reflect::get(thrown, &JsValue::from_str(EXIT_CODE_KEY))
            .ok()
            .and_then(|v| v.as_f64())
            .map(|f| f as i32)
    }

    /// Convert a wasm import argument (Number or BigInt) to i64
    fn js_value_to_i64(value: &JsValue) -> i64 {
        if let Some(f) = value.as_f64() {
            return f as i64;
        }
        match js_sys::BigInt::new(value) {
            Ok(big) => i64::try_from(big).unwrap_or(0),
            Err(_) => 0,
        }
    }

    impl Wasi {
        /// Run a command-model guest to completion
        pub fn start(&mut self, instance: Instance) -> WasiResult<i32> {
            let memory = instance.memory()?;
            self.enter()?;
            self.state.borrow_mut().memory = Some(memory);
            exit_result(instance.run(exports::START))
        }

        /// Initialize a reactor-model guest
        pub fn initialize(&mut self, instance: Instance) -> WasiResult<()> {
            let memory = instance.memory()?;
            self.enter()?;
            self.state.borrow_mut().memory = Some(memory);
            match instance.run(exports::INITIALIZE) {
                Ok(()) | Err(Trap::Exit(_)) => Ok(()),
                Err(Trap::Fault(err)) => Err(err),
            }
        }

        /// Build the JS import object, keyed `wasi_snapshot_preview1`
        ///
        /// Each entry is a trampoline into [`Wasi::invoke`]; the exit trap
        /// is thrown as a tagged JS value and caught again in `start`.
        pub fn wasi_import(&self) -> WasiResult<Object> {
            use wasm_bindgen::closure::Closure;

            let namespace = Object::new();
            let table = self.table.clone();

            let dispatcher = Closure::wrap(Box::new(move |index: u32, js_args: js_sys::Array| -> i32 {
                let name = ImportName::ALL[index as usize];
                let mut args = Vec::with_capacity(js_args.length() as usize);
                for value in js_args.iter() {
                    args.push(js_value_to_i64(&value));
                }
                match table.dispatch(name, &args) {
                    Ok(code) => code,
                    Err(Trap::Exit(code)) => {
                        let sentinel = Object::new();
                        let _ = Reflect::set(
                            &sentinel,
                            &JsValue::from_str(EXIT_CODE_KEY),
                            &JsValue::from(code),
                        );
                        wasm_bindgen::throw_val(sentinel.into());
                    }
                    Err(Trap::Fault(err)) => wasm_bindgen::throw_str(&err.to_string()),
                }
            }) as Box<dyn Fn(u32, js_sys::Array) -> i32>);

            // One JS forwarder per import name; wasm-bindgen closures cap
            // out below path_open's nine parameters, so the variadic hop
            // through a JS function covers every signature uniformly.
            let make_forwarder = js_sys::Function::new_with_args(
                "dispatch, index",
                "return function () { return dispatch(index, Array.prototype.slice.call(arguments)); };",
            );

            for (index, name) in ImportName::ALL.iter().enumerate() {
                let forwarder = make_forwarder
                    .call2(
                        &JsValue::NULL,
                        dispatcher.as_ref().unchecked_ref(),
                        &JsValue::from(index as u32),
                    )
                    .map_err(|_| WasiError::InstantiationFailed {
                        reason: format!("failed to build forwarder for {}", name),
                    })?;
                Reflect::set(&namespace, &JsValue::from_str(name.as_str()), &forwarder).map_err(
                    |_| WasiError::InstantiationFailed {
                        reason: format!("failed to register {}", name),
                    },
                )?;
            }
            dispatcher.forget();

            let imports = Object::new();
            Reflect::set(
                &imports,
                &JsValue::from_str(crate::abi::MODULE_NAME),
                &namespace,
            )
            .map_err(|_| WasiError::InstantiationFailed {
                reason: "failed to attach import namespace".to_string(),
            })?;
            Ok(imports)
        }

        /// Compile and instantiate a guest against this driver's imports
        pub async fn instantiate(&self, bytes: &[u8]) -> WasiResult<Instance> {
            let imports = self.wasi_import()?;
            let promise = js_sys::WebAssembly::instantiate_buffer(bytes, &imports);
            let result = wasm_bindgen_futures::JsFuture::from(promise)
                .await
                .map_err(|e| WasiError::InstantiationFailed {
                    reason: format!("{:?}", e),
                })?;

            let instance = Reflect::get(&result, &JsValue::from_str("instance"))
                .map_err(|_| WasiError::InstantiationFailed {
                    reason: "no instance in result".to_string(),
                })?
                .dyn_into::<js_sys::WebAssembly::Instance>()
                .map_err(|_| WasiError::InstantiationFailed {
                    reason: "failed to cast to Instance".to_string(),
                })?;
            Ok(Instance::from_js(instance))
        }
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;
    use crate::abi::errno;
    use crate::features::{use_proc, use_stdio, StdioOptions};

    fn proc_driver() -> Wasi {
        Wasi::new(WasiOptions::new().feature(use_proc()))
    }

    fn guest_memory() -> GuestMemory {
        GuestMemory::with_pages(1)
    }

    #[test]
    fn test_exit_code_passthrough() {
        let mut wasi = proc_driver();
        let instance = Instance::new()
            .with_memory(guest_memory())
            .on_start(|wasi| {
                wasi.invoke(ImportName::ProcExit, &[42])?;
                Ok(())
            });

        assert_eq!(wasi.start(instance).unwrap(), 42);
    }

    #[test]
    fn test_normal_return_is_zero() {
        let mut wasi = proc_driver();
        let instance = Instance::new()
            .with_memory(guest_memory())
            .on_start(|_| Ok(()));
        assert_eq!(wasi.start(instance).unwrap(), 0);
    }

    #[test]
    fn test_start_twice_fails() {
        let mut wasi = proc_driver();
        let first = Instance::new().with_memory(guest_memory()).on_start(|_| Ok(()));
        wasi.start(first).unwrap();

        let second = Instance::new().with_memory(guest_memory()).on_start(|_| Ok(()));
        assert_eq!(wasi.start(second).unwrap_err(), WasiError::AlreadyStarted);
    }

    #[test]
    fn test_start_and_initialize_are_exclusive() {
        let mut wasi = proc_driver();
        let command = Instance::new().with_memory(guest_memory()).on_start(|_| Ok(()));
        wasi.start(command).unwrap();

        let reactor = Instance::new()
            .with_memory(guest_memory())
            .on_initialize(|_| Ok(()));
        assert_eq!(
            wasi.initialize(reactor).unwrap_err(),
            WasiError::AlreadyStarted
        );
    }

    #[test]
    fn test_missing_memory_export() {
        let mut wasi = proc_driver();
        let instance = Instance::new().on_start(|_| Ok(()));
        assert_eq!(
            wasi.start(instance).unwrap_err(),
            WasiError::MissingExport { name: "memory" }
        );
    }

    #[test]
    fn test_missing_start_export() {
        let mut wasi = proc_driver();
        let instance = Instance::new().with_memory(guest_memory());
        assert_eq!(
            wasi.start(instance).unwrap_err(),
            WasiError::MissingExport { name: "_start" }
        );
    }

    #[test]
    fn test_initialize_runs_entry() {
        let mut wasi = proc_driver();
        let instance = Instance::new()
            .with_memory(guest_memory())
            .on_initialize(|wasi| {
                // Reactors may still issue imports during initialization
                assert_eq!(
                    wasi.invoke(ImportName::ProcRaise, &[2]).unwrap(),
                    errno::SUCCESS
                );
                Ok(())
            });
        wasi.initialize(instance).unwrap();
    }

    #[test]
    fn test_unselected_import_is_enosys() {
        let mut wasi = proc_driver();
        let instance = Instance::new()
            .with_memory(guest_memory())
            .on_start(|wasi| {
                assert_eq!(
                    wasi.invoke(ImportName::RandomGet, &[64, 8]).unwrap(),
                    errno::NOSYS
                );
                Ok(())
            });
        assert_eq!(wasi.start(instance).unwrap(), 0);
    }

    #[test]
    fn test_captured_stdout_harvest() {
        let mut wasi = Wasi::new(
            WasiOptions::new()
                .feature(use_proc())
                .feature(use_stdio(StdioOptions::new())),
        );
        let mem = guest_memory();
        mem.write(256, b"out").unwrap();
        mem.write_u32(64, 256).unwrap();
        mem.write_u32(68, 3).unwrap();

        let instance = Instance::new().with_memory(mem).on_start(|wasi| {
            wasi.invoke(ImportName::FdWrite, &[1, 64, 1, 96])?;
            Ok(())
        });
        wasi.start(instance).unwrap();
        assert_eq!(wasi.take_stdout(), b"out");
        assert_eq!(wasi.take_stderr(), b"");
    }
}
