//! DDL derivation from the composed schema.
//!
//! The composition layer configures the storage engine, it does not
//! implement SQL: composed tables are turned into `sea_query` create
//! statements (`IF NOT EXISTS`, so re-provisioning is harmless) and handed
//! to sea-orm for dialect rendering and execution.
//!
//! Schema qualification is Postgres-only: `SQLite` has no schemas and on
//! `MySQL` a schema is a database, which the connection already selects.

use sea_orm::ConnectionTrait;
use sea_orm::sea_query::{
    Alias, ColumnDef as SqlColumnDef, ForeignKey, Index, IntoTableRef, Table,
    TableCreateStatement, TableRef,
};

use crate::model::{ColumnKind, Reference, TableDef, TableId};
use crate::{DbEngine, DbHandle, Result};

fn table_ref(id: &TableId, engine: DbEngine) -> TableRef {
    match engine {
        DbEngine::Postgres => (Alias::new(&id.schema), Alias::new(&id.name)).into_table_ref(),
        DbEngine::MySql | DbEngine::Sqlite => Alias::new(&id.name).into_table_ref(),
    }
}

/// Build the create statement for one composed table.
///
/// `emit_reference` decides which declared relations become physical
/// FOREIGN KEYs; the composition root only allows those whose target lives
/// on the same connection binding.
#[must_use]
pub fn create_table_statement(
    table: &TableDef,
    engine: DbEngine,
    emit_reference: &(dyn Fn(&Reference) -> bool + Send + Sync),
) -> TableCreateStatement {
    let mut stmt = Table::create();
    stmt.table(table_ref(&table.id, engine)).if_not_exists();

    for col in &table.columns {
        let mut c = SqlColumnDef::new(Alias::new(&col.name));
        match col.kind {
            ColumnKind::Uuid => {
                c.uuid();
            }
            ColumnKind::String => {
                if let Some(len) = col.max_length {
                    c.string_len(len);
                } else {
                    c.string();
                }
            }
            ColumnKind::Integer => {
                c.integer();
            }
            ColumnKind::BigInteger => {
                c.big_integer();
            }
            ColumnKind::Boolean => {
                c.boolean();
            }
            ColumnKind::Decimal => {
                c.decimal();
            }
            ColumnKind::TimestampTz => {
                c.timestamp_with_time_zone();
            }
            ColumnKind::Json => {
                c.json_binary();
            }
        }
        if !col.nullable {
            c.not_null();
        }
        if col.unique {
            c.unique_key();
        }
        stmt.col(&mut c);
    }

    let mut pk = Index::create();
    for name in &table.primary_key {
        pk.col(Alias::new(name));
    }
    stmt.primary_key(&mut pk);

    for r in table.references.iter().filter(|r| emit_reference(r)) {
        let mut fk = ForeignKey::create();
        fk.name(format!("fk_{}_{}", table.id.name, r.column))
            .from_tbl(table_ref(&table.id, engine))
            .from_col(Alias::new(&r.column))
            .to_tbl(table_ref(&r.target, engine))
            .to_col(Alias::new(&r.target_column));
        stmt.foreign_key(&mut fk);
    }

    stmt
}

/// Render and execute create statements for `tables` against one handle.
///
/// # Errors
/// Propagates storage-engine errors unchanged.
pub async fn apply_tables<'a, I>(
    db: &DbHandle,
    tables: I,
    emit_reference: &(dyn Fn(&Reference) -> bool + Send + Sync),
) -> Result<()>
where
    I: IntoIterator<Item = &'a TableDef>,
{
    let backend = db.conn().get_database_backend();
    for table in tables {
        let stmt = create_table_statement(table, db.engine(), emit_reference);
        db.conn().execute(backend.build(&stmt)).await?;
        tracing::debug!(table = %table.id, "table provisioned");
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::ColumnDef;
    use sea_orm::sea_query::{PostgresQueryBuilder, SqliteQueryBuilder};

    fn sample_table() -> TableDef {
        TableDef {
            id: TableId::new("dbo", "tst_items"),
            module: "testing".to_owned(),
            columns: vec![
                ColumnDef {
                    name: "id".to_owned(),
                    kind: ColumnKind::Uuid,
                    nullable: false,
                    max_length: None,
                    unique: false,
                },
                ColumnDef {
                    name: "label".to_owned(),
                    kind: ColumnKind::String,
                    nullable: false,
                    max_length: Some(64),
                    unique: true,
                },
            ],
            primary_key: vec!["id".to_owned()],
            references: vec![Reference {
                column: "id".to_owned(),
                target: TableId::new("dbo", "tst_parents"),
                target_column: "id".to_owned(),
            }],
        }
    }

    #[test]
    fn postgres_statement_is_schema_qualified() {
        let stmt = create_table_statement(&sample_table(), DbEngine::Postgres, &|_| true);
        let sql = stmt.to_string(PostgresQueryBuilder);
        assert!(sql.contains(r#""dbo"."tst_items""#), "{sql}");
        assert!(sql.contains("IF NOT EXISTS"), "{sql}");
        assert!(sql.contains("varchar(64)"), "{sql}");
        assert!(sql.contains("FOREIGN KEY"), "{sql}");
    }

    #[test]
    fn sqlite_statement_drops_schema_qualifier() {
        let stmt = create_table_statement(&sample_table(), DbEngine::Sqlite, &|_| false);
        let sql = stmt.to_string(SqliteQueryBuilder);
        assert!(sql.contains(r#""tst_items""#), "{sql}");
        assert!(!sql.contains("dbo"), "{sql}");
        assert!(!sql.contains("FOREIGN KEY"), "{sql}");
    }
}
