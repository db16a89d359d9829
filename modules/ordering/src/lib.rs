//! Ordering module: orders and their lines.
//!
//! The module owns the `ord_`-prefixed tables and plugs into a
//! [`crm_db::CompositionRoot`] through [`module`]. Storage access goes
//! through [`store::OrderingStore`], obtained from the root once it is
//! frozen.

pub mod entity;
pub mod mapping;
pub mod store;

use crm_db::ModuleDecl;

/// Module name used for registration and diagnostics.
pub const MODULE: &str = "ordering";

/// Prefix applied to every table this module maps.
pub const TABLE_PREFIX: &str = "ord_";

/// Schema the ordering tables live in (ignored on engines without schemas).
pub const SCHEMA: &str = "public";

/// Connection-string key. Ordering has no dedicated store and rides on
/// whatever the deployment configures as the default connection.
pub const CONNECTION: &str = crm_db::DEFAULT_CONNECTION;

/// Declaration handed to the composition root.
pub fn module() -> ModuleDecl {
    ModuleDecl::builder(MODULE)
        .table_prefix(TABLE_PREFIX)
        .schema(SCHEMA)
        .connection(CONNECTION)
        .descriptor(mapping::map_orders)
        .descriptor(mapping::map_order_lines)
        .build()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crm_db::model::ModelSpace;

    #[test]
    fn module_declares_both_tables() {
        let decl = module();
        let mut space = ModelSpace::new();
        space.apply_module(&decl).unwrap();

        let names: Vec<String> = space.tables().keys().map(|id| id.name.clone()).collect();
        assert_eq!(names, vec!["ord_order_lines", "ord_orders"]);
    }

    #[test]
    fn order_lines_reference_orders() {
        let decl = module();
        let mut space = ModelSpace::new();
        space.apply_module(&decl).unwrap();

        let lines = space
            .tables()
            .values()
            .find(|t| t.id.name == "ord_order_lines")
            .unwrap();
        assert_eq!(lines.references.len(), 1);
        assert_eq!(lines.references[0].target.name, "ord_orders");
    }
}
