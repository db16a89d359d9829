//! Module declarations and the persistence-facing module boundary.
//!
//! A module is a bounded context that owns entities and their storage
//! rules. It registers itself with the composition root through an explicit
//! [`ModuleDecl`] built at startup; there is no runtime type scanning.

use std::sync::Arc;

use crate::DbHandle;
use crate::model::ModuleModel;

/// Per-module entity-mapping descriptor: a pure function over the
/// module-scoped model view. Applying one twice against two empty spaces
/// yields identical schemas.
pub type EntityDescriptor = fn(&mut ModuleModel<'_>) -> crate::Result<()>;

/// Static declaration of one module: identity, naming defaults, the named
/// connection-string key, and the entity descriptors it owns.
///
/// Created once at process start; immutable afterward.
#[derive(Clone)]
pub struct ModuleDecl {
    pub name: String,
    pub table_prefix: String,
    pub schema: String,
    pub connection: String,
    pub descriptors: Vec<EntityDescriptor>,
}

impl std::fmt::Debug for ModuleDecl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleDecl")
            .field("name", &self.name)
            .field("table_prefix", &self.table_prefix)
            .field("schema", &self.schema)
            .field("connection", &self.connection)
            .field("descriptors", &self.descriptors.len())
            .finish()
    }
}

impl ModuleDecl {
    /// Start declaring a module. Defaults: empty table prefix, `public`
    /// schema, the `"Default"` connection key.
    #[must_use]
    pub fn builder(name: &str) -> ModuleDeclBuilder {
        ModuleDeclBuilder {
            decl: ModuleDecl {
                name: name.to_owned(),
                table_prefix: String::new(),
                schema: "public".to_owned(),
                connection: crate::resolver::DEFAULT_CONNECTION.to_owned(),
                descriptors: Vec::new(),
            },
        }
    }
}

/// Builder for [`ModuleDecl`]; the explicit, statically-typed replacement
/// for reflection-based module discovery.
pub struct ModuleDeclBuilder {
    decl: ModuleDecl,
}

impl ModuleDeclBuilder {
    #[must_use]
    pub fn table_prefix(mut self, prefix: &str) -> Self {
        self.decl.table_prefix = prefix.to_owned();
        self
    }

    #[must_use]
    pub fn schema(mut self, schema: &str) -> Self {
        self.decl.schema = schema.to_owned();
        self
    }

    /// Bind the module to a named connection-string key.
    #[must_use]
    pub fn connection(mut self, key: &str) -> Self {
        self.decl.connection = key.to_owned();
        self
    }

    #[must_use]
    pub fn descriptor(mut self, descriptor: EntityDescriptor) -> Self {
        self.decl.descriptors.push(descriptor);
        self
    }

    #[must_use]
    pub fn build(self) -> ModuleDecl {
        self.decl
    }
}

/// A module's only persistence-facing API boundary.
///
/// Application services depend on the concrete contract (its typed entity
/// accessors), never on the composed schema. `CONNECTION` is the
/// compile-time binding to a connection-string key; the composition root
/// resolves it lazily on first access and calls [`StorageContract::bind`]
/// with the shared handle. A contract can be bound to any handle directly
/// in tests, without a composition root.
pub trait StorageContract: Send + Sync + 'static {
    /// Name of the owning module, as registered with the composition root.
    const MODULE: &'static str;
    /// Connection-string key this contract is bound to.
    const CONNECTION: &'static str;

    fn bind(db: Arc<DbHandle>) -> Self;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let decl = ModuleDecl::builder("ordering").build();
        assert_eq!(decl.name, "ordering");
        assert_eq!(decl.table_prefix, "");
        assert_eq!(decl.schema, "public");
        assert_eq!(decl.connection, "Default");
        assert!(decl.descriptors.is_empty());
    }

    #[test]
    fn builder_overrides() {
        fn noop(_m: &mut ModuleModel<'_>) -> crate::Result<()> {
            Ok(())
        }
        let decl = ModuleDecl::builder("products")
            .table_prefix("prd_")
            .schema("catalog")
            .connection("ProductsDb")
            .descriptor(noop)
            .build();
        assert_eq!(decl.table_prefix, "prd_");
        assert_eq!(decl.schema, "catalog");
        assert_eq!(decl.connection, "ProductsDb");
        assert_eq!(decl.descriptors.len(), 1);
    }
}
