//! Mapping descriptor for the product catalog table.

use crm_db::model::{Col, ModuleModel};

pub fn map_products(m: &mut ModuleModel<'_>) -> crm_db::Result<()> {
    m.entity("products")
        .with_conventions()
        .col(Col::new("name").string().not_null().max_length(100))
        .col(Col::new("price_cents").big_integer().not_null())
        .col(Col::new("stock_count").integer().not_null())
        .col(Col::new("is_active").boolean().not_null())
        .finish()
}
