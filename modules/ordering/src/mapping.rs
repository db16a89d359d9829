//! Mapping descriptors for the ordering tables.
//!
//! Each descriptor contributes one table to the composed model. They are
//! referenced from [`crate::module`] and run when the composition root
//! collects module declarations.

use crm_db::model::{Col, ModuleModel};

pub fn map_orders(m: &mut ModuleModel<'_>) -> crm_db::Result<()> {
    m.entity("orders")
        .with_conventions()
        .col(Col::new("customer_name").string().not_null().max_length(128))
        .col(Col::new("status").integer().not_null())
        .col(Col::new("total_cents").big_integer().not_null())
        .finish()
}

pub fn map_order_lines(m: &mut ModuleModel<'_>) -> crm_db::Result<()> {
    // product_id is a by-id link into the products context. No reference is
    // declared for it: the two modules may live on different connections.
    m.entity("order_lines")
        .with_conventions()
        .col(Col::new("order_id").uuid().not_null())
        .col(Col::new("product_id").uuid().not_null())
        .col(Col::new("quantity").integer().not_null())
        .col(Col::new("unit_price_cents").big_integer().not_null())
        .references_local("order_id", "orders", "id")
        .finish()
}
