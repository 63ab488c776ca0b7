//! Optional physical-layout modifier lookup.
//!
//! Some downstream consumers can import the hardware's bandwidth-compressed
//! tiling directly if each buffer is tagged with its layout modifier. The
//! query lives in a vendor module loaded by name at startup; absence is
//! expected on most devices and never fatal; delivered buffers simply carry
//! no modifier.

use std::sync::Arc;

use libloading::Library;
use tracing::{debug, info};

use crate::buffer::HandleKey;

/// Resolves the physical-layout modifier for a graphic buffer handle.
pub trait ModifierProvider: Send + Sync {
    /// `None` when the module cannot resolve a modifier for this buffer.
    fn modifier_for(&self, key: HandleKey) -> Option<u64>;
}

/// C signature of the single exported query function.
///
/// Returns 0 on success with the modifier written through `modifier`.
type QueryModifierFn = unsafe extern "C" fn(fd: i32, meta_fd: i32, modifier: *mut u64) -> i32;

const QUERY_SYMBOL: &[u8] = b"veldec_query_modifier\0";

/// A modifier provider backed by a dynamically loaded vendor module.
pub struct DynamicModifierProvider {
    /// The loaded module handle; must live as long as the function pointer.
    _lib: Library,
    query: QueryModifierFn,
}

// SAFETY: the query function is a stateless lookup into the vendor module;
// the Library handle keeps the module loaded for the provider's lifetime.
unsafe impl Send for DynamicModifierProvider {}
unsafe impl Sync for DynamicModifierProvider {}

impl DynamicModifierProvider {
    /// Load the module by name (e.g. `libvendor_layout.so`).
    pub fn load(name: &str) -> Result<Self, ModifierLoadError> {
        // SAFETY: loading a vendor-provided query module; it only exports a
        // lookup function and registers nothing globally.
        let lib = unsafe { Library::new(name) }
            .map_err(|e| ModifierLoadError::LibraryNotFound(format!("{name}: {e}")))?;

        // SAFETY: the symbol signature matches the module's exported C API.
        // The raw pointer is copied out of the Symbol so the borrow on `lib`
        // ends before the library moves into the struct.
        let query = unsafe {
            *lib.get::<QueryModifierFn>(QUERY_SYMBOL).map_err(|e| {
                ModifierLoadError::SymbolNotFound(format!("veldec_query_modifier: {e}"))
            })?
        };

        Ok(Self { _lib: lib, query })
    }
}

impl ModifierProvider for DynamicModifierProvider {
    fn modifier_for(&self, key: HandleKey) -> Option<u64> {
        let mut modifier: u64 = 0;
        // SAFETY: the function pointer stays valid while _lib is loaded, and
        // `modifier` is a valid out-pointer for the duration of the call.
        let rc = unsafe { (self.query)(key.fd, key.meta_fd, &mut modifier) };
        if rc == 0 {
            Some(modifier)
        } else {
            debug!(%key, rc, "modifier query declined");
            None
        }
    }
}

impl std::fmt::Debug for DynamicModifierProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicModifierProvider")
            .field("loaded", &true)
            .finish()
    }
}

/// Probe for the module. Absence is non-fatal by design: the session runs
/// without layout tagging.
pub fn probe(name: &str) -> Option<Arc<dyn ModifierProvider>> {
    match DynamicModifierProvider::load(name) {
        Ok(provider) => {
            info!(module = %name, "layout modifier module loaded");
            Some(Arc::new(provider))
        }
        Err(err) => {
            debug!(module = %name, error = %err, "layout modifier module unavailable");
            None
        }
    }
}

/// Errors from loading the modifier module.
#[derive(Debug, thiserror::Error)]
pub enum ModifierLoadError {
    #[error("modifier module not found: {0}")]
    LibraryNotFound(String),

    #[error("required symbol not found: {0}")]
    SymbolNotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_missing_module_is_none() {
        assert!(probe("libveldec_no_such_module.so").is_none());
    }

    #[test]
    fn load_error_messages() {
        let err = DynamicModifierProvider::load("libveldec_no_such_module.so").unwrap_err();
        assert!(matches!(err, ModifierLoadError::LibraryNotFound(_)));
        assert!(err.to_string().contains("libveldec_no_such_module.so"));
    }
}
