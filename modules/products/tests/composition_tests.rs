//! Composition scenarios across the products and ordering modules.

#![allow(clippy::unwrap_used)]

use crm_db::model::{Col, ModuleModel};
use crm_db::{
    ComposeError, CompositionRoot, ConnectionResolver, DEFAULT_CONNECTION, ModuleDecl, Phase,
};
use crm_ordering::store::OrderingStore;
use crm_products::store::ProductsStore;
use uuid::Uuid;

fn default_only_resolver() -> ConnectionResolver {
    ConnectionResolver::from_iter([(
        DEFAULT_CONNECTION.to_owned(),
        "sqlite::memory:".to_owned(),
    )])
}

#[tokio::test]
async fn dedicated_key_falls_back_to_default_connection() {
    let resolver = default_only_resolver();
    assert_eq!(
        resolver.resolve(crm_products::CONNECTION).unwrap(),
        resolver.resolve(DEFAULT_CONNECTION).unwrap(),
    );

    let root = CompositionRoot::new(resolver);
    root.register_module(crm_products::module()).unwrap();
    root.register_module(crm_ordering::module()).unwrap();
    root.freeze().unwrap();

    let products = root.contract::<ProductsStore>().await.unwrap();
    let ordering = root.contract::<OrderingStore>().await.unwrap();

    // Same resolved DSN means both modules share one physical handle.
    assert!(std::ptr::eq(products.db(), ordering.db()));

    let tenant = Uuid::new_v4();
    let widget = products.add_product(tenant, "Widget", 1250, 10).await.unwrap();
    let order = ordering
        .create_order(
            tenant,
            "ACME Corp",
            vec![crm_ordering::store::NewOrderLine {
                product_id: widget.id,
                quantity: 2,
                unit_price_cents: widget.price_cents,
            }],
        )
        .await
        .unwrap();
    assert_eq!(order.total_cents, 2500);
}

#[tokio::test]
async fn dedicated_key_gets_its_own_database_when_configured() {
    let dir = tempfile::tempdir().unwrap();
    let products_dsn = format!("sqlite://{}/products.db", dir.path().display());

    let resolver = ConnectionResolver::from_iter([
        (DEFAULT_CONNECTION.to_owned(), "sqlite::memory:".to_owned()),
        (crm_products::CONNECTION.to_owned(), products_dsn),
    ]);
    let root = CompositionRoot::new(resolver);
    root.register_module(crm_products::module()).unwrap();
    root.register_module(crm_ordering::module()).unwrap();
    root.freeze().unwrap();

    let products = root.contract::<ProductsStore>().await.unwrap();
    let ordering = root.contract::<OrderingStore>().await.unwrap();

    assert!(!std::ptr::eq(products.db(), ordering.db()));
    assert!(products.db().dsn().contains("products.db"));

    let tenant = Uuid::new_v4();
    products.add_product(tenant, "Gadget", 990, 5).await.unwrap();
    assert_eq!(products.list_active(tenant).await.unwrap().len(), 1);
    ordering.create_order(tenant, "Initech", vec![]).await.unwrap();
}

fn conflicting_items(m: &mut ModuleModel<'_>) -> crm_db::Result<()> {
    m.entity("Items")
        .schema("dbo")
        .col(Col::new("id").uuid().not_null())
        .primary_key(&["id"])
        .finish()
}

#[tokio::test]
async fn colliding_table_claims_are_rejected_before_ready() {
    let first = ModuleDecl::builder("warehouse")
        .schema("dbo")
        .descriptor(conflicting_items)
        .build();
    let second = ModuleDecl::builder("billing")
        .schema("dbo")
        .descriptor(conflicting_items)
        .build();

    let root = CompositionRoot::new(default_only_resolver());
    root.register_module(first).unwrap();
    let err = root.register_module(second).unwrap_err();

    match err {
        ComposeError::SchemaConflict {
            schema,
            table,
            first_module,
            second_module,
        } => {
            assert_eq!(schema, "dbo");
            assert_eq!(table, "Items");
            assert_eq!(first_module, "warehouse");
            assert_eq!(second_module, "billing");
        }
        other => panic!("expected schema conflict, got {other:?}"),
    }
    assert_eq!(root.phase(), Phase::Composing);
}

#[tokio::test]
async fn contract_for_unregistered_module_is_refused() {
    let root = CompositionRoot::new(default_only_resolver());
    root.register_module(crm_ordering::module()).unwrap();
    root.freeze().unwrap();

    let err = root.contract::<ProductsStore>().await.unwrap_err();
    assert!(matches!(err, ComposeError::Configuration(_)), "{err:?}");
}
