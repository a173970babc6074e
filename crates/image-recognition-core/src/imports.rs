//! Host import tables.
//!
//! An [`ImportTable`] is a named group of host functions (for example the
//! `wasmedge_image` namespace) registered on the linker of one execution
//! context. Tables are created fresh for every context by an
//! [`ImportProvider`] and released when the context goes away.

use tracing::debug;
use wasmtime::Linker;

use crate::HostState;
use image_recognition_common::{AcceleratorConfig, EngineError};

/// A named group of host functions.
pub trait ImportTable: Send {
    /// Import module namespace the guest imports from.
    fn module_name(&self) -> &str;

    /// Register every function of this table on the linker.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ImportRegistration`] if a definition is
    /// rejected.
    fn register(&self, linker: &mut Linker<HostState>) -> Result<(), EngineError>;

    /// Release resources held by the table (sessions, tensors).
    fn release(&self) {}
}

/// Creates the import tables of a new execution context.
///
/// The accelerator configuration is handed over explicitly so that tables
/// never need to consult process-wide state.
pub trait ImportProvider: Send + Sync {
    /// Create fresh import tables.
    fn tables(&self, accelerator: &AcceleratorConfig) -> Vec<Box<dyn ImportTable>>;
}

impl<F> ImportProvider for F
where
    F: Fn(&AcceleratorConfig) -> Vec<Box<dyn ImportTable>> + Send + Sync,
{
    fn tables(&self, accelerator: &AcceleratorConfig) -> Vec<Box<dyn ImportTable>> {
        self(accelerator)
    }
}

/// The import tables owned by one execution context.
///
/// Dropping the set releases every table in registration order, whether
/// or not the context around it finished initializing.
pub struct ImportSet {
    tables: Vec<Box<dyn ImportTable>>,
}

impl ImportSet {
    /// Take ownership of freshly created tables.
    pub fn new(tables: Vec<Box<dyn ImportTable>>) -> Self {
        Self { tables }
    }

    /// Register every table on the linker, in order.
    ///
    /// # Errors
    ///
    /// Stops at the first table that fails to register.
    pub fn register_all(&self, linker: &mut Linker<HostState>) -> Result<(), EngineError> {
        for table in &self.tables {
            table.register(linker)?;
            debug!(module = table.module_name(), "Import table registered");
        }
        Ok(())
    }

    /// Namespaces of the tables in registration order.
    pub fn module_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.module_name()).collect()
    }

    /// Number of tables.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Returns `true` if the set holds no tables.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl Drop for ImportSet {
    fn drop(&mut self) {
        for table in &self.tables {
            table.release();
            debug!(module = table.module_name(), "Import table released");
        }
    }
}

impl std::fmt::Debug for ImportSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportSet")
            .field("modules", &self.module_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::WasmEngine;
    use image_recognition_common::EngineConfig;

    struct Recording {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl ImportTable for Recording {
        fn module_name(&self) -> &str {
            self.name
        }

        fn register(&self, _linker: &mut Linker<HostState>) -> Result<(), EngineError> {
            self.log.lock().push(format!("register:{}", self.name));
            if self.fail {
                return Err(EngineError::import_registration(self.name, "refused"));
            }
            Ok(())
        }

        fn release(&self) {
            self.log.lock().push(format!("release:{}", self.name));
        }
    }

    fn recording(
        name: &'static str,
        log: &Arc<Mutex<Vec<String>>>,
        fail: bool,
    ) -> Box<dyn ImportTable> {
        Box::new(Recording {
            name,
            log: Arc::clone(log),
            fail,
        })
    }

    #[test]
    fn test_register_and_release_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let engine = WasmEngine::new(&EngineConfig::default()).unwrap();
        let mut linker = Linker::new(engine.inner());

        let set = ImportSet::new(vec![
            recording("a", &log, false),
            recording("b", &log, false),
        ]);
        set.register_all(&mut linker).unwrap();
        assert_eq!(set.module_names(), vec!["a", "b"]);
        drop(set);

        assert_eq!(
            *log.lock(),
            vec!["register:a", "register:b", "release:a", "release:b"]
        );
    }

    #[test]
    fn test_registration_stops_at_first_failure() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let engine = WasmEngine::new(&EngineConfig::default()).unwrap();
        let mut linker = Linker::new(engine.inner());

        let set = ImportSet::new(vec![
            recording("a", &log, true),
            recording("b", &log, false),
        ]);
        let result = set.register_all(&mut linker);
        assert!(matches!(
            result,
            Err(EngineError::ImportRegistration { .. })
        ));
        drop(set);

        // Both tables are still released
        assert_eq!(*log.lock(), vec!["register:a", "release:a", "release:b"]);
    }

    #[test]
    fn test_closure_provider() {
        let provider = |_: &AcceleratorConfig| -> Vec<Box<dyn ImportTable>> { Vec::new() };
        let tables = provider.tables(&AcceleratorConfig::default());
        assert!(ImportSet::new(tables).is_empty());
    }
}
