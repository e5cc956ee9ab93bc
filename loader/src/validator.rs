//! Binary Validator.
//!
//! Checks, in order: length, magic, version, then a section scan and a full
//! compile (without instantiation) to enumerate imports and exports. The
//! result is an immutable [`ModuleDescriptor`] plus the compiled module the
//! instantiator links later.

use crate::error::ValidationError;
use crate::module::{content_hash, ExportKind, ImportKind, ModuleDescriptor};
use crate::parser::{SectionScanner, HEADER_LEN, WASM_MAGIC};

const TEXT_BODY_HINT: &str = "content looks like text, e.g. an HTML error page";
const TEXT_TYPE_HINT: &str = "source reported a text content type";

/// Validated bytes ready for resolution and instantiation.
pub struct ValidatedModule {
    pub descriptor: ModuleDescriptor,
    pub(crate) module: wasmi::Module,
}

impl core::fmt::Debug for ValidatedModule {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ValidatedModule")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Binary Validator bound to the engine that will run the module.
#[derive(Clone)]
pub struct Validator {
    engine: wasmi::Engine,
    supported_versions: Vec<u32>,
}

impl Validator {
    pub fn new(engine: wasmi::Engine, supported_versions: Vec<u32>) -> Self {
        Validator {
            engine,
            supported_versions,
        }
    }

    /// Check length, magic and version. Returns the version on success.
    ///
    /// Never looks past the first 8 bytes.
    pub fn check_header(
        &self,
        bytes: &[u8],
        content_type: Option<&str>,
    ) -> Result<u32, ValidationError> {
        if bytes.len() < HEADER_LEN {
            return Err(ValidationError::TooSmall { len: bytes.len() });
        }

        let observed = [bytes[0], bytes[1], bytes[2], bytes[3]];
        if observed != WASM_MAGIC {
            let hint = if content_type.is_some_and(is_text_content_type) {
                Some(TEXT_TYPE_HINT)
            } else if observed.iter().all(|b| b.is_ascii_graphic() || b.is_ascii_whitespace()) {
                Some(TEXT_BODY_HINT)
            } else {
                None
            };
            return Err(ValidationError::BadMagic { observed, hint });
        }

        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if !self.supported_versions.contains(&version) {
            return Err(ValidationError::UnsupportedVersion { version });
        }

        Ok(version)
    }

    /// Validate a fetched binary and describe it.
    pub fn validate(
        &self,
        name: &str,
        source_location: &str,
        bytes: &[u8],
        content_type: Option<&str>,
    ) -> Result<ValidatedModule, ValidationError> {
        let version = self.check_header(bytes, content_type)?;

        let scanned = SectionScanner::scan(bytes).map_err(|e| ValidationError::MalformedModule {
            message: e.to_string(),
        })?;

        let module = wasmi::Module::new(&self.engine, bytes).map_err(|e| {
            ValidationError::MalformedModule {
                message: e.to_string(),
            }
        })?;

        let has_linear_memory = scanned.memory.is_some()
            || scanned
                .imports
                .iter()
                .any(|i| matches!(i.kind, ImportKind::Memory(_)))
            || scanned
                .exports
                .iter()
                .any(|e| matches!(e.kind, ExportKind::Memory));

        let descriptor = ModuleDescriptor {
            name: name.into(),
            source_location: source_location.into(),
            byte_size: bytes.len(),
            content_hash: content_hash(bytes),
            version,
            declared_imports: scanned.imports,
            declared_exports: scanned.exports,
            has_linear_memory,
            memory: scanned.memory,
            has_start_section: scanned.has_start,
        };

        log::debug!(
            "[validator] {} ok: {} bytes, {} imports, {} exports, hash {}",
            name,
            descriptor.byte_size,
            descriptor.declared_imports.len(),
            descriptor.declared_exports.len(),
            descriptor.content_hash
        );

        Ok(ValidatedModule { descriptor, module })
    }
}

fn is_text_content_type(content_type: &str) -> bool {
    let ct = content_type.trim().to_ascii_lowercase();
    ct.starts_with("text/") || ct.contains("html") || ct.contains("json")
}
