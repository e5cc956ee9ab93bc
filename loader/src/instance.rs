//! Module Instantiator and live instances.

use std::sync::Arc;

use spin::Mutex;
use wasmi::{Linker, Memory, MemoryType, Store};

use crate::config::LoaderConfig;
use crate::engine::{is_memory_failure, result_buffer};
use crate::error::InstantiationError;
use crate::host::{define_helper, HostState};
use crate::module::ModuleDescriptor;
use crate::resolver::{HostBinding, HostImportTable};
use crate::validator::ValidatedModule;

/// Conventional export called once after the start section.
pub const INIT_EXPORT: &str = "initialize";

/// A live instance. Its store is exclusively owned and guarded, so calls into
/// one instance run one at a time.
pub struct ModuleInstance {
    descriptor: Arc<ModuleDescriptor>,
    instance: wasmi::Instance,
    store: Mutex<Store<HostState>>,
    fuel_per_call: Option<u64>,
}

impl core::fmt::Debug for ModuleInstance {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ModuleInstance")
            .field("module", &self.descriptor.name)
            .field("fuel_per_call", &self.fuel_per_call)
            .finish_non_exhaustive()
    }
}

impl ModuleInstance {
    pub fn descriptor(&self) -> &Arc<ModuleDescriptor> {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Console lines the module has written so far.
    pub fn console(&self) -> Vec<String> {
        self.store.lock().data().console().iter().cloned().collect()
    }

    /// Run `f` with exclusive access to the store, refuelled for one call.
    pub(crate) fn with_store<R>(
        &self,
        f: impl FnOnce(&mut Store<HostState>, &wasmi::Instance) -> R,
    ) -> R {
        let mut store = self.store.lock();
        refuel(&mut store, self.fuel_per_call);
        f(&mut store, &self.instance)
    }
}

fn refuel(store: &mut Store<HostState>, fuel: Option<u64>) {
    if let Some(fuel) = fuel {
        if let Err(e) = store.set_fuel(fuel) {
            log::warn!("[instance] {}: could not set fuel: {}", store.data().module(), e);
        }
    }
}

/// Outcome of a successful instantiation.
#[derive(Debug)]
pub struct Instantiated {
    pub instance: ModuleInstance,
    /// Set when `initialize` failed; the instance is still usable.
    pub warning: Option<String>,
}

/// Links resolved imports and runs start-up code.
#[derive(Clone)]
pub struct Instantiator {
    engine: wasmi::Engine,
    max_memory_pages: u32,
    fuel_per_call: Option<u64>,
}

impl Instantiator {
    pub fn new(engine: wasmi::Engine, config: &LoaderConfig) -> Self {
        Instantiator {
            engine,
            max_memory_pages: config.max_memory_pages,
            fuel_per_call: config.fuel_per_call,
        }
    }

    pub fn instantiate(
        &self,
        validated: ValidatedModule,
        table: &HostImportTable,
    ) -> Result<Instantiated, InstantiationError> {
        let ValidatedModule { descriptor, module } = validated;
        let name = descriptor.name.clone();

        if let Some(limits) = descriptor.memory {
            if limits.min_pages > self.max_memory_pages {
                return Err(InstantiationError::OutOfMemory(format!(
                    "module requires {} pages, limit is {}",
                    limits.min_pages, self.max_memory_pages
                )));
            }
        }

        let mut store = Store::new(&self.engine, HostState::new(&name));
        refuel(&mut store, self.fuel_per_call);

        let mut linker = Linker::<HostState>::new(&self.engine);
        for import in table.imports() {
            match &import.binding {
                HostBinding::Helper { helper, signature } => {
                    define_helper(
                        &mut linker,
                        &import.namespace,
                        &import.symbol,
                        *helper,
                        signature,
                    )
                    .map_err(InstantiationError::LinkError)?;
                }
                HostBinding::Memory(limits) => {
                    let ty = MemoryType::new(limits.min_pages, limits.max_pages)
                        .map_err(|e| InstantiationError::LinkError(e.to_string()))?;
                    let memory = Memory::new(&mut store, ty)
                        .map_err(|e| InstantiationError::OutOfMemory(e.to_string()))?;
                    linker
                        .define(&import.namespace, &import.symbol, memory)
                        .map_err(|e| InstantiationError::LinkError(e.to_string()))?;
                    store.data_mut().memory = Some(memory);
                }
            }
        }

        let pre = linker.instantiate(&mut store, &module).map_err(|e| {
            let message = e.to_string();
            if is_memory_failure(&message) {
                InstantiationError::OutOfMemory(message)
            } else {
                InstantiationError::LinkError(message)
            }
        })?;

        let instance = pre.start(&mut store).map_err(|e| {
            let message = store
                .data_mut()
                .take_thrown()
                .unwrap_or_else(|| e.to_string());
            InstantiationError::TrapOnStart(message)
        })?;

        let warning = match descriptor.function(INIT_EXPORT) {
            Some(sig) if sig.params.is_empty() => {
                refuel(&mut store, self.fuel_per_call);
                let mut results = result_buffer(sig);
                let outcome = instance
                    .get_func(&store, INIT_EXPORT)
                    .map(|func| func.call(&mut store, &[], &mut results));
                match outcome {
                    Some(Err(e)) => {
                        let message = store
                            .data_mut()
                            .take_thrown()
                            .unwrap_or_else(|| e.to_string());
                        log::warn!("[instantiator] {}: {} failed: {}", name, INIT_EXPORT, message);
                        Some(format!("{INIT_EXPORT} failed: {message}"))
                    }
                    _ => None,
                }
            }
            _ => None,
        };

        log::info!(
            "[instantiator] {} instantiated ({} host imports)",
            name,
            table.len()
        );

        Ok(Instantiated {
            instance: ModuleInstance {
                descriptor: Arc::new(descriptor),
                instance,
                store: Mutex::new(store),
                fuel_per_call: self.fuel_per_call,
            },
            warning,
        })
    }
}
