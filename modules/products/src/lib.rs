//! Products module: the product catalog.
//!
//! Declares the `prd_`-prefixed tables and a dedicated connection-string
//! key, so deployments can put the catalog on its own database while
//! everything else shares the default one. When no dedicated entry is
//! configured, the resolver falls back to the default connection.

pub mod entity;
pub mod mapping;
pub mod store;

use crm_db::ModuleDecl;

/// Module name used for registration and diagnostics.
pub const MODULE: &str = "products";

/// Prefix applied to every table this module maps.
pub const TABLE_PREFIX: &str = "prd_";

/// Schema the product tables live in (ignored on engines without schemas).
pub const SCHEMA: &str = "public";

/// Dedicated connection-string key of the products module.
pub const CONNECTION: &str = "ProductsDb";

/// Declaration handed to the composition root.
pub fn module() -> ModuleDecl {
    ModuleDecl::builder(MODULE)
        .table_prefix(TABLE_PREFIX)
        .schema(SCHEMA)
        .connection(CONNECTION)
        .descriptor(mapping::map_products)
        .build()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crm_db::model::ModelSpace;

    #[test]
    fn module_declares_the_catalog_table() {
        let decl = module();
        let mut space = ModelSpace::new();
        space.apply_module(&decl).unwrap();

        let table = space.tables().values().next().unwrap();
        assert_eq!(table.id.name, "prd_products");
        assert_eq!(table.module, MODULE);
        assert_eq!(table.column("name").unwrap().max_length, Some(100));
    }
}
