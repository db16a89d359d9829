//! The modules this host composes, in registration order.

use crm_db::ModuleDecl;

pub fn registered_modules() -> Vec<ModuleDecl> {
    vec![crm_products::module(), crm_ordering::module()]
}
