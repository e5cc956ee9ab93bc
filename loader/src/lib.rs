//! NeurOS module loader
//!
//! Locates, validates, instantiates and invokes compiled WebAssembly modules
//! on behalf of many independent callers. Failures at any stage are values:
//! a module that cannot load is reported as Failed with the stage and reason,
//! and a call that cannot complete returns a tagged error.
//!
//! # Architecture
//!
//! - `validator` / `parser`: header checks, section walk, compile
//! - `resolver` / `host`: host import table and helper implementations
//! - `instance` / `engine`: linking, start section, `initialize`
//! - `registry` / `source` / `diagnostics`: single-flight cache of module states
//! - `gateway` / `value`: the only call surface for exported functions
//! - `bridge`: manifest loading and explicit degraded replies
//! - `health`: optional retry task for failed loads
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use neuros_loader::{Arg, FileSource, Gateway, LoaderConfig, ModuleRegistry};
//!
//! # async fn run() {
//! let registry = ModuleRegistry::new(LoaderConfig::default(), Arc::new(FileSource::new("public")));
//! registry.load("reasoning_engine", "/wasm/reasoning_engine.wasm").await;
//!
//! let gateway = Gateway::new(registry);
//! match gateway.invoke("reasoning_engine", "validate_ethics_action", &[Arg::from("scan ports")]) {
//!     Ok(value) => println!("{value:?}"),
//!     Err(e) => eprintln!("{e}"),
//! }
//! # }
//! ```

pub mod bridge;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod health;
pub mod host;
pub mod instance;
pub mod module;
pub mod parser;
pub mod registry;
pub mod resolver;
pub mod source;
pub mod validator;
pub mod value;

#[cfg(test)]
mod fixtures;

pub use bridge::{BridgeReply, LoadReport, ModuleBridge};
pub use config::{LoaderConfig, ModuleEntry};
pub use diagnostics::{LoadDiagnostics, LoadOutcome, LoadRecord};
pub use error::{
    ConfigError, FetchError, InstantiationError, InvocationError, InvocationErrorKind, LoadError,
    LoadStage, ResolveError, ValidationError,
};
pub use gateway::{Gateway, InvocationResult};
pub use host::{HostFeatures, HostHelper};
pub use instance::{Instantiated, Instantiator, ModuleInstance};
pub use module::{ExportDecl, ExportKind, FuncSignature, ImportDecl, ImportKind, ModuleDescriptor, ValueType};
pub use registry::{Availability, ModuleRegistry, ModuleState, ModuleStatus};
pub use resolver::{HostImportTable, ImportResolver};
pub use source::{ByteSource, Fetched, FileSource, MemorySource};
pub use validator::{ValidatedModule, Validator};
pub use value::{Arg, ReturnShape, Value};
