//! Composition-root integration tests on in-memory and file-backed SQLite.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use figment::Figment;
use figment::providers::{Format, Yaml};
use sea_orm::{ConnectionTrait, DbBackend, Statement};

use crm_db::model::{Col, ModuleModel};
use crm_db::{
    CompositionRoot, ConnectionResolver, DEFAULT_CONNECTION, DatabaseConfig, DbHandle, ModuleDecl,
    StorageContract,
};

fn map_folders(m: &mut ModuleModel<'_>) -> crm_db::Result<()> {
    m.entity("folders")
        .with_conventions()
        .col(Col::new("name").string().not_null().max_length(64))
        .finish()
}

fn map_documents(m: &mut ModuleModel<'_>) -> crm_db::Result<()> {
    m.entity("documents")
        .with_conventions()
        .col(Col::new("folder_id").uuid().not_null())
        .col(Col::new("title").string().not_null().max_length(64))
        .references("folder_id", crm_db::TableId::new("public", "fld_folders"), "id")
        .finish()
}

fn folders_module() -> ModuleDecl {
    ModuleDecl::builder("folders")
        .table_prefix("fld_")
        .descriptor(map_folders)
        .build()
}

fn documents_module(connection: &str) -> ModuleDecl {
    ModuleDecl::builder("documents")
        .table_prefix("doc_")
        .connection(connection)
        .descriptor(map_documents)
        .build()
}

struct FoldersStore {
    db: Arc<DbHandle>,
}

impl StorageContract for FoldersStore {
    const MODULE: &'static str = "folders";
    const CONNECTION: &'static str = DEFAULT_CONNECTION;

    fn bind(db: Arc<DbHandle>) -> Self {
        Self { db }
    }
}

async fn table_sql(db: &DbHandle, table: &str) -> String {
    let rows = db
        .conn()
        .query_all(Statement::from_sql_and_values(
            DbBackend::Sqlite,
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?",
            [table.into()],
        ))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1, "table {table} missing");
    rows[0].try_get::<String>("", "sql").unwrap()
}

fn memory_resolver() -> ConnectionResolver {
    ConnectionResolver::from_iter([(
        DEFAULT_CONNECTION.to_owned(),
        "sqlite::memory:".to_owned(),
    )])
}

#[tokio::test]
async fn provision_creates_all_module_tables() {
    let root = CompositionRoot::new(memory_resolver());
    root.register_module(folders_module()).unwrap();
    root.register_module(documents_module(DEFAULT_CONNECTION)).unwrap();
    root.freeze().unwrap();
    root.provision().await.unwrap();

    let store = root.contract::<FoldersStore>().await.unwrap();
    table_sql(&store.db, "fld_folders").await;
    table_sql(&store.db, "doc_documents").await;
}

#[tokio::test]
async fn reference_becomes_a_foreign_key_on_a_shared_connection() {
    let root = CompositionRoot::new(memory_resolver());
    root.register_module(folders_module()).unwrap();
    root.register_module(documents_module(DEFAULT_CONNECTION)).unwrap();
    root.freeze().unwrap();
    root.provision().await.unwrap();

    let store = root.contract::<FoldersStore>().await.unwrap();
    let sql = table_sql(&store.db, "doc_documents").await;
    assert!(sql.contains("FOREIGN KEY"), "{sql}");
}

#[tokio::test]
async fn reference_is_dropped_across_physical_connections() {
    let dir = tempfile::tempdir().unwrap();
    let docs_dsn = format!("sqlite://{}/docs.db", dir.path().display());
    let resolver = ConnectionResolver::from_iter([
        (DEFAULT_CONNECTION.to_owned(), "sqlite::memory:".to_owned()),
        ("DocsDb".to_owned(), docs_dsn),
    ]);

    let root = CompositionRoot::new(resolver);
    root.register_module(folders_module()).unwrap();
    root.register_module(documents_module("DocsDb")).unwrap();
    root.freeze().unwrap();
    root.provision().await.unwrap();

    struct DocsStore {
        db: Arc<DbHandle>,
    }
    impl StorageContract for DocsStore {
        const MODULE: &'static str = "documents";
        const CONNECTION: &'static str = "DocsDb";
        fn bind(db: Arc<DbHandle>) -> Self {
            Self { db }
        }
    }

    let docs = root.contract::<DocsStore>().await.unwrap();
    let sql = table_sql(&docs.db, "doc_documents").await;
    assert!(!sql.contains("FOREIGN KEY"), "{sql}");
}

#[tokio::test]
async fn contract_key_matching_ignores_ascii_case() {
    struct UpperFoldersStore {
        db: Arc<DbHandle>,
    }
    impl StorageContract for UpperFoldersStore {
        const MODULE: &'static str = "folders";
        const CONNECTION: &'static str = "DEFAULT";
        fn bind(db: Arc<DbHandle>) -> Self {
            Self { db }
        }
    }

    let root = CompositionRoot::new(memory_resolver());
    root.register_module(folders_module()).unwrap();
    root.freeze().unwrap();

    // The module registered "Default"; the contract's casing must not matter.
    let store = root.contract::<UpperFoldersStore>().await.unwrap();
    table_sql(&store.db, "fld_folders").await;
}

#[tokio::test]
async fn contracts_are_cached_per_type() {
    let root = CompositionRoot::new(memory_resolver());
    root.register_module(folders_module()).unwrap();
    root.freeze().unwrap();

    let a = root.contract::<FoldersStore>().await.unwrap();
    let b = root.contract::<FoldersStore>().await.unwrap();
    assert!(Arc::ptr_eq(&a, &b));
}

#[tokio::test]
async fn same_modules_compose_to_the_same_fingerprint() {
    let build = || {
        let root = CompositionRoot::new(memory_resolver());
        root.register_module(folders_module()).unwrap();
        root.register_module(documents_module(DEFAULT_CONNECTION)).unwrap();
        root.freeze().unwrap()
    };
    assert_eq!(build().fingerprint(), build().fingerprint());
}

#[tokio::test]
async fn figment_config_drives_the_composition_root() {
    let yaml = r#"
database:
  auto_provision: true
  connections:
    Default: "sqlite::memory:"
  pool:
    max_conns: 4
    acquire_timeout: "5s"
"#;
    let figment = Figment::new().merge(Yaml::string(yaml));
    let cfg = DatabaseConfig::from_figment(&figment).unwrap();
    assert!(cfg.auto_provision);

    let root = CompositionRoot::with_opts(cfg.resolver().unwrap(), cfg.connect_opts());
    root.register_module(folders_module()).unwrap();
    root.freeze().unwrap();
    if cfg.auto_provision {
        root.provision().await.unwrap();
    }

    let store = root.contract::<FoldersStore>().await.unwrap();
    let sql = table_sql(&store.db, "fld_folders").await;
    assert!(sql.contains("varchar(64)"), "{sql}");
}
