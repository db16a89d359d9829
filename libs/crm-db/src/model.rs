//! Shared model space and the fluent builders module descriptors write into.
//!
//! Each module's entity-mapping descriptors run against a [`ModuleModel`],
//! a module-scoped view of the shared [`ModelSpace`] that applies the
//! module's table prefix and default schema. Table identity
//! (schema + name) must be globally unique across all composed modules;
//! a collision is a fatal [`ComposeError::SchemaConflict`].

use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Write as _;

use xxhash_rust::xxh3::xxh3_64;

use crate::module::ModuleDecl;
use crate::{ComposeError, Result};

/// Global table identity: schema plus (prefixed) table name.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableId {
    pub schema: String,
    pub name: String,
}

impl TableId {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Column type, engine-agnostic. The DDL layer maps these onto the concrete
/// backend types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnKind {
    Uuid,
    String,
    Integer,
    BigInteger,
    Boolean,
    Decimal,
    TimestampTz,
    Json,
}

/// A fully validated column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub kind: ColumnKind,
    pub nullable: bool,
    pub max_length: Option<u32>,
    pub unique: bool,
}

/// A declared relation to another table (same or different module).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reference {
    pub column: String,
    pub target: TableId,
    pub target_column: String,
}

/// One composed table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableDef {
    pub id: TableId,
    pub module: String,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<String>,
    pub references: Vec<Reference>,
}

impl TableDef {
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// The shared model space all descriptors are applied against.
///
/// Deterministically ordered; never mutated after the composition root
/// freezes it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModelSpace {
    tables: BTreeMap<TableId, TableDef>,
}

impl ModelSpace {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn tables(&self) -> &BTreeMap<TableId, TableDef> {
        &self.tables
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Run every descriptor of `module` against this space.
    ///
    /// All-or-nothing: the descriptors run against a staged copy, and the
    /// copy replaces this space only when every descriptor succeeded. A
    /// rejected module must not leave some of its tables behind.
    ///
    /// # Errors
    /// Surfaces descriptor validation failures and table-identity
    /// collisions.
    pub fn apply_module(&mut self, module: &ModuleDecl) -> Result<()> {
        let mut staged = self.clone();
        let mut scoped = ModuleModel {
            space: &mut staged,
            module,
        };
        for descriptor in &module.descriptors {
            descriptor(&mut scoped)?;
        }
        self.tables = staged.tables;
        Ok(())
    }

    fn insert(&mut self, table: TableDef) -> Result<()> {
        if let Some(existing) = self.tables.get(&table.id) {
            return Err(ComposeError::SchemaConflict {
                schema: table.id.schema,
                table: table.id.name,
                first_module: existing.module.clone(),
                second_module: table.module,
            });
        }
        tracing::debug!(table = %table.id, module = %table.module, "table mapped");
        self.tables.insert(table.id.clone(), table);
        Ok(())
    }

    /// Stable content hash of the composed schema (xxh3 over a canonical
    /// rendering). Two structurally identical spaces produce the same value.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        xxh3_64(self.canonical().as_bytes())
    }

    fn canonical(&self) -> String {
        let mut out = String::new();
        for table in self.tables.values() {
            let _ = write!(out, "{}|module={}", table.id, table.module);
            for c in &table.columns {
                let _ = write!(
                    out,
                    "|col={}:{:?}:null={}:len={:?}:uniq={}",
                    c.name, c.kind, c.nullable, c.max_length, c.unique
                );
            }
            let _ = write!(out, "|pk={}", table.primary_key.join(","));
            for r in &table.references {
                let _ = write!(out, "|ref={}->{}.{}", r.column, r.target, r.target_column);
            }
            out.push('\n');
        }
        out
    }
}

/// Module-scoped view of the shared model space.
///
/// Entity names get the module's table prefix, tables default to the
/// module's schema.
pub struct ModuleModel<'a> {
    space: &'a mut ModelSpace,
    module: &'a ModuleDecl,
}

impl ModuleModel<'_> {
    /// Start declaring one persisted entity. The table name is the module's
    /// prefix plus `name`.
    pub fn entity(&mut self, name: &str) -> EntityBuilder<'_> {
        EntityBuilder {
            space: &mut *self.space,
            module: self.module.name.clone(),
            id: TableId::new(
                self.module.schema.clone(),
                format!("{}{name}", self.module.table_prefix),
            ),
            default_schema: self.module.schema.clone(),
            prefix: self.module.table_prefix.clone(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            references: Vec::new(),
        }
    }

    /// The table identity `entity_name` resolves to inside this module.
    #[must_use]
    pub fn table_id(&self, entity_name: &str) -> TableId {
        TableId::new(
            self.module.schema.clone(),
            format!("{}{entity_name}", self.module.table_prefix),
        )
    }
}

/// Fluent declaration of one table; validated on [`EntityBuilder::finish`].
pub struct EntityBuilder<'a> {
    space: &'a mut ModelSpace,
    module: String,
    id: TableId,
    default_schema: String,
    prefix: String,
    columns: Vec<Col>,
    primary_key: Vec<String>,
    references: Vec<Reference>,
}

impl EntityBuilder<'_> {
    /// Override the schema for this table only.
    #[must_use]
    pub fn schema(mut self, schema: &str) -> Self {
        self.id.schema = schema.to_owned();
        self
    }

    /// Apply the shared conventions every persisted entity follows: a uuid
    /// primary key, the tenant discriminator, and audit timestamps.
    ///
    /// The composition replacement for an inherited base-entity
    /// configuration; descriptors call it explicitly.
    #[must_use]
    pub fn with_conventions(mut self) -> Self {
        self.columns.push(Col::new("id").uuid().not_null());
        self.columns.push(Col::new("tenant_id").uuid().not_null());
        self.columns
            .push(Col::new("created_at").timestamp_tz().not_null());
        self.columns
            .push(Col::new("updated_at").timestamp_tz().not_null());
        self.primary_key = vec!["id".to_owned()];
        self
    }

    #[must_use]
    pub fn col(mut self, col: Col) -> Self {
        self.columns.push(col);
        self
    }

    /// Replace the primary key (conventions already set `id`).
    #[must_use]
    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| (*c).to_owned()).collect();
        self
    }

    /// Declare a relation to an arbitrary table, possibly owned by another
    /// module.
    #[must_use]
    pub fn references(mut self, column: &str, target: TableId, target_column: &str) -> Self {
        self.references.push(Reference {
            column: column.to_owned(),
            target,
            target_column: target_column.to_owned(),
        });
        self
    }

    /// Declare a relation to a sibling entity of the same module.
    #[must_use]
    pub fn references_local(self, column: &str, entity_name: &str, target_column: &str) -> Self {
        let target = TableId::new(
            self.default_schema.clone(),
            format!("{}{entity_name}", self.prefix),
        );
        self.references(column, target, target_column)
    }

    /// Validate the declaration and merge it into the shared model space.
    ///
    /// # Errors
    /// - `Configuration` when a column misses its type, nullability or (for
    ///   required strings) max length, on duplicate column names, or when
    ///   the primary key / a reference names an undeclared column;
    /// - `SchemaConflict` when the table identity is already taken.
    pub fn finish(self) -> Result<()> {
        let mut columns = Vec::with_capacity(self.columns.len());
        for col in self.columns {
            columns.push(col.validate(&self.id)?);
        }

        for (i, c) in columns.iter().enumerate() {
            if columns[..i].iter().any(|other| other.name == c.name) {
                return Err(ComposeError::Configuration(format!(
                    "table '{}': duplicate column '{}'",
                    self.id, c.name
                )));
            }
        }

        if self.primary_key.is_empty() {
            return Err(ComposeError::Configuration(format!(
                "table '{}' declares no primary key",
                self.id
            )));
        }
        for pk in &self.primary_key {
            if !columns.iter().any(|c| &c.name == pk) {
                return Err(ComposeError::Configuration(format!(
                    "table '{}': primary key names undeclared column '{pk}'",
                    self.id
                )));
            }
        }
        for r in &self.references {
            if !columns.iter().any(|c| c.name == r.column) {
                return Err(ComposeError::Configuration(format!(
                    "table '{}': reference from undeclared column '{}'",
                    self.id, r.column
                )));
            }
        }

        self.space.insert(TableDef {
            id: self.id,
            module: self.module,
            columns,
            primary_key: self.primary_key,
            references: self.references,
        })
    }
}

/// One column under declaration. Nullability is tri-state on purpose:
/// leaving it unstated is a configuration error, not a silent default.
#[derive(Clone, Debug)]
pub struct Col {
    name: String,
    kind: Option<ColumnKind>,
    nullable: Option<bool>,
    max_length: Option<u32>,
    unique: bool,
}

impl Col {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            kind: None,
            nullable: None,
            max_length: None,
            unique: false,
        }
    }

    #[must_use]
    pub fn uuid(mut self) -> Self {
        self.kind = Some(ColumnKind::Uuid);
        self
    }

    #[must_use]
    pub fn string(mut self) -> Self {
        self.kind = Some(ColumnKind::String);
        self
    }

    #[must_use]
    pub fn integer(mut self) -> Self {
        self.kind = Some(ColumnKind::Integer);
        self
    }

    #[must_use]
    pub fn big_integer(mut self) -> Self {
        self.kind = Some(ColumnKind::BigInteger);
        self
    }

    #[must_use]
    pub fn boolean(mut self) -> Self {
        self.kind = Some(ColumnKind::Boolean);
        self
    }

    #[must_use]
    pub fn decimal(mut self) -> Self {
        self.kind = Some(ColumnKind::Decimal);
        self
    }

    #[must_use]
    pub fn timestamp_tz(mut self) -> Self {
        self.kind = Some(ColumnKind::TimestampTz);
        self
    }

    #[must_use]
    pub fn json(mut self) -> Self {
        self.kind = Some(ColumnKind::Json);
        self
    }

    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = Some(false);
        self
    }

    #[must_use]
    pub fn null(mut self) -> Self {
        self.nullable = Some(true);
        self
    }

    #[must_use]
    pub fn max_length(mut self, len: u32) -> Self {
        self.max_length = Some(len);
        self
    }

    #[must_use]
    pub fn unique_key(mut self) -> Self {
        self.unique = true;
        self
    }

    fn validate(self, table: &TableId) -> Result<ColumnDef> {
        let kind = self.kind.ok_or_else(|| {
            ComposeError::Configuration(format!(
                "table '{table}': column '{}' has no type",
                self.name
            ))
        })?;
        let nullable = self.nullable.ok_or_else(|| {
            ComposeError::Configuration(format!(
                "table '{table}': column '{}' does not state nullability",
                self.name
            ))
        })?;
        if kind == ColumnKind::String && !nullable && self.max_length.is_none() {
            return Err(ComposeError::Configuration(format!(
                "table '{table}': required string column '{}' has no max length",
                self.name
            )));
        }
        Ok(ColumnDef {
            name: self.name,
            kind,
            nullable,
            max_length: self.max_length,
            unique: self.unique,
        })
    }
}
