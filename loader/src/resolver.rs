//! Import Resolver.
//!
//! Maps every import a module declares to a host binding. Resolution is pure:
//! it reads the descriptor and the enabled feature set, and returns a fresh
//! table for each load.

use crate::error::ResolveError;
use crate::host::{HostFeatures, HostHelper};
use crate::module::{FuncSignature, ImportKind, MemoryLimits, ModuleDescriptor};

/// How a single import is satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostBinding {
    /// A host helper, registered with the signature the host implements.
    Helper {
        helper: HostHelper,
        signature: FuncSignature,
    },
    /// A host-created linear memory with the declared limits.
    Memory(MemoryLimits),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostImport {
    pub namespace: String,
    pub symbol: String,
    pub binding: HostBinding,
}

/// Resolved imports in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostImportTable {
    imports: Vec<HostImport>,
}

impl HostImportTable {
    pub fn imports(&self) -> &[HostImport] {
        &self.imports
    }

    pub fn len(&self) -> usize {
        self.imports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.imports.is_empty()
    }

    /// Feature groups the module actually uses.
    pub fn features_used(&self) -> HostFeatures {
        self.imports
            .iter()
            .fold(HostFeatures::empty(), |acc, i| match &i.binding {
                HostBinding::Helper { helper, .. } => acc | helper.feature(),
                HostBinding::Memory(_) => acc | HostFeatures::HOST_MEMORY,
            })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ImportResolver {
    features: HostFeatures,
}

impl ImportResolver {
    pub fn new(features: HostFeatures) -> Self {
        ImportResolver {
            features: features | HostFeatures::BASELINE,
        }
    }

    pub fn resolve(&self, descriptor: &ModuleDescriptor) -> Result<HostImportTable, ResolveError> {
        let mut imports = Vec::with_capacity(descriptor.declared_imports.len());

        for decl in &descriptor.declared_imports {
            let binding = match &decl.kind {
                ImportKind::Function(declared) => HostHelper::lookup(&decl.namespace, &decl.symbol)
                    .filter(|h| self.features.contains(h.feature()))
                    .map(|helper| HostBinding::Helper {
                        helper,
                        signature: helper.signature(declared),
                    }),
                ImportKind::Memory(limits)
                    if self.features.contains(HostFeatures::HOST_MEMORY)
                        && decl.namespace == "env"
                        && decl.symbol == "memory" =>
                {
                    Some(HostBinding::Memory(*limits))
                }
                ImportKind::Memory(_) | ImportKind::Table | ImportKind::Global => None,
            };

            match binding {
                Some(binding) => imports.push(HostImport {
                    namespace: decl.namespace.clone(),
                    symbol: decl.symbol.clone(),
                    binding,
                }),
                None => {
                    log::warn!(
                        "[resolver] {}: no host binding for {}::{}",
                        descriptor.name,
                        decl.namespace,
                        decl.symbol
                    );
                    return Err(ResolveError::UnresolvedImport {
                        namespace: decl.namespace.clone(),
                        symbol: decl.symbol.clone(),
                    });
                }
            }
        }

        log::debug!(
            "[resolver] {}: {} imports resolved",
            descriptor.name,
            imports.len()
        );
        Ok(HostImportTable { imports })
    }
}
