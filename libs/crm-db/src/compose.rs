//! The composition root.
//!
//! Collects registered module declarations, merges their entity mappings
//! into one frozen [`ComposedSchema`], and wires each module storage
//! contract to a lazily resolved connection.
//!
//! Lifecycle: `Uninitialized → Composing → Ready → Disposed`. Composition
//! happens once, single-threaded, during process startup; after `Ready` the
//! schema and bindings are immutable, shareable state. Out-of-phase calls
//! fail with [`ComposeError::InvalidState`] — a partially composed schema
//! is worse than none.

use std::any::Any;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use crate::model::{ModelSpace, Reference, TableDef, TableId};
use crate::module::{ModuleDecl, StorageContract};
use crate::resolver::ConnectionResolver;
use crate::{ComposeError, ConnectOpts, DbHandle, Result, ddl};

/// Composition lifecycle phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Composing,
    Ready,
    Disposed,
}

/// Frozen per-module wiring: naming defaults plus the connection key.
#[derive(Clone, Debug)]
pub struct ModuleBinding {
    pub name: String,
    pub table_prefix: String,
    pub schema: String,
    pub connection: String,
}

/// The merged, frozen result of all modules' entity descriptors.
///
/// Built once when the composition root reaches `Ready`; read-only
/// thereafter. Rebuilding requires a process restart.
#[derive(Clone, Debug)]
pub struct ComposedSchema {
    tables: BTreeMap<TableId, TableDef>,
    bindings: Vec<ModuleBinding>,
    fingerprint: u64,
}

impl ComposedSchema {
    #[must_use]
    pub fn tables(&self) -> &BTreeMap<TableId, TableDef> {
        &self.tables
    }

    /// Registration-ordered module bindings.
    #[must_use]
    pub fn bindings(&self) -> &[ModuleBinding] {
        &self.bindings
    }

    #[must_use]
    pub fn binding(&self, module: &str) -> Option<&ModuleBinding> {
        self.bindings.iter().find(|b| b.name == module)
    }

    /// Tables owned by one module, in deterministic order.
    pub fn module_tables(&self, module: &str) -> impl Iterator<Item = &TableDef> {
        self.tables.values().filter(move |t| t.module == module)
    }

    /// Stable content hash of the composed schema.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }
}

struct Registry {
    phase: Phase,
    modules: Vec<ModuleDecl>,
    model: ModelSpace,
    schema: Option<Arc<ComposedSchema>>,
}

/// Host-level component owning the composed schema and the module-to-
/// connection wiring.
///
/// Owns the connection handles (cached per resolved DSN, so modules whose
/// keys resolve to the same string share a pool) but never owns any
/// module's descriptor logic — it only invokes it.
pub struct CompositionRoot {
    resolver: ConnectionResolver,
    connect_opts: ConnectOpts,
    registry: Mutex<Registry>,
    // resolved DSN -> shared handle
    handles: DashMap<String, Arc<DbHandle>>,
    // modules whose DDL has been applied
    provisioned: Mutex<HashSet<String>>,
    // interface type name -> Arc<C>
    contracts: RwLock<HashMap<&'static str, Box<dyn Any + Send + Sync>>>,
    // serializes first-connect + provisioning
    connect_gate: tokio::sync::Mutex<()>,
}

impl CompositionRoot {
    #[must_use]
    pub fn new(resolver: ConnectionResolver) -> Self {
        Self::with_opts(resolver, ConnectOpts::default())
    }

    #[must_use]
    pub fn with_opts(resolver: ConnectionResolver, connect_opts: ConnectOpts) -> Self {
        Self {
            resolver,
            connect_opts,
            registry: Mutex::new(Registry {
                phase: Phase::Uninitialized,
                modules: Vec::new(),
                model: ModelSpace::new(),
                schema: None,
            }),
            handles: DashMap::new(),
            provisioned: Mutex::new(HashSet::new()),
            contracts: RwLock::new(HashMap::new()),
            connect_gate: tokio::sync::Mutex::new(()),
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.registry.lock().phase
    }

    #[must_use]
    pub fn resolver(&self) -> &ConnectionResolver {
        &self.resolver
    }

    /// Register a module and apply its entity descriptors against the
    /// shared model space.
    ///
    /// Accepted while `Uninitialized` or `Composing`; registration order is
    /// the deterministic composition order.
    ///
    /// # Errors
    /// - `InvalidState` once the root is `Ready` or `Disposed` (the frozen
    ///   schema is left untouched);
    /// - `Configuration` on duplicate module names or invalid descriptors;
    /// - `SchemaConflict` when a table identity collides with an already
    ///   registered module.
    pub fn register_module(&self, decl: ModuleDecl) -> Result<()> {
        let mut reg = self.registry.lock();
        match reg.phase {
            Phase::Uninitialized | Phase::Composing => {}
            phase => {
                return Err(ComposeError::InvalidState {
                    operation: "register_module",
                    phase,
                });
            }
        }
        if reg.modules.iter().any(|m| m.name == decl.name) {
            return Err(ComposeError::Configuration(format!(
                "module '{}' is already registered",
                decl.name
            )));
        }

        reg.model.apply_module(&decl)?;
        tracing::debug!(
            module = %decl.name,
            connection = %decl.connection,
            descriptors = decl.descriptors.len(),
            "module registered"
        );
        reg.modules.push(decl);
        reg.phase = Phase::Composing;
        Ok(())
    }

    /// Freeze the composition: run the cross-reference pass, fix the
    /// connection bindings, and produce the immutable composed schema.
    ///
    /// This is the single transition into `Ready` and happens at most once,
    /// also under concurrent startup races.
    ///
    /// # Errors
    /// - `InvalidState` when already `Ready` or `Disposed`;
    /// - `Configuration` when a declared reference targets a table no
    ///   module composed.
    pub fn freeze(&self) -> Result<Arc<ComposedSchema>> {
        let mut reg = self.registry.lock();
        match reg.phase {
            Phase::Uninitialized | Phase::Composing => {}
            phase => {
                return Err(ComposeError::InvalidState {
                    operation: "freeze",
                    phase,
                });
            }
        }

        // Second pass: cross-referenced entities must resolve now that
        // every module has contributed its tables.
        for table in reg.model.tables().values() {
            for r in &table.references {
                if !reg.model.tables().contains_key(&r.target) {
                    return Err(ComposeError::Configuration(format!(
                        "table '{}': reference '{}' targets unknown table '{}'",
                        table.id, r.column, r.target
                    )));
                }
            }
        }

        let schema = Arc::new(ComposedSchema {
            tables: reg.model.tables().clone(),
            bindings: reg
                .modules
                .iter()
                .map(|m| ModuleBinding {
                    name: m.name.clone(),
                    table_prefix: m.table_prefix.clone(),
                    schema: m.schema.clone(),
                    connection: m.connection.clone(),
                })
                .collect(),
            fingerprint: reg.model.fingerprint(),
        });

        reg.schema = Some(Arc::clone(&schema));
        reg.phase = Phase::Ready;
        tracing::info!(
            modules = schema.bindings.len(),
            tables = schema.tables.len(),
            fingerprint = %format_args!("{:016x}", schema.fingerprint),
            "storage composition frozen"
        );
        Ok(schema)
    }

    /// The frozen schema.
    ///
    /// # Errors
    /// `InvalidState` before `Ready` or after `dispose`.
    pub fn schema(&self) -> Result<Arc<ComposedSchema>> {
        let reg = self.registry.lock();
        match (&reg.schema, reg.phase) {
            (Some(schema), Phase::Ready) => Ok(Arc::clone(schema)),
            (_, phase) => Err(ComposeError::InvalidState {
                operation: "schema",
                phase,
            }),
        }
    }

    /// Hand out a module storage contract, resolving and connecting its
    /// binding on first access.
    ///
    /// The handle is cached per resolved DSN and the module's tables are
    /// provisioned at most once per process before the contract is bound.
    ///
    /// # Errors
    /// - `InvalidState` outside `Ready`;
    /// - `Configuration` when the contract's module was never registered,
    ///   its declared key disagrees with the registration, or the key
    ///   cannot be resolved;
    /// - storage-engine errors from connecting/provisioning, unchanged.
    pub async fn contract<C: StorageContract>(&self) -> Result<Arc<C>> {
        let type_key = std::any::type_name::<C>();
        if let Some(existing) = self.lookup_contract::<C>(type_key) {
            return Ok(existing);
        }

        let schema = self.schema()?;
        let binding = schema.binding(C::MODULE).ok_or_else(|| {
            ComposeError::Configuration(format!(
                "contract '{type_key}' belongs to module '{}', which is not registered",
                C::MODULE
            ))
        })?;
        // The resolver treats keys case-insensitively; match that here.
        if !binding.connection.eq_ignore_ascii_case(C::CONNECTION) {
            return Err(ComposeError::Configuration(format!(
                "contract '{type_key}' is bound to connection key '{}' but module '{}' registered '{}'",
                C::CONNECTION,
                C::MODULE,
                binding.connection
            )));
        }

        let db = self.module_handle(&schema, binding).await?;
        let contract = Arc::new(C::bind(db));

        let mut w = self.contracts.write();
        // A concurrent caller may have bound it meanwhile; keep the first.
        if let Some(existing) = w
            .get(type_key)
            .and_then(|boxed| boxed.downcast_ref::<Arc<C>>())
        {
            return Ok(Arc::clone(existing));
        }
        w.insert(type_key, Box::new(Arc::clone(&contract)));
        Ok(contract)
    }

    fn lookup_contract<C: StorageContract>(&self, type_key: &'static str) -> Option<Arc<C>> {
        let r = self.contracts.read();
        r.get(type_key)
            .and_then(|boxed| boxed.downcast_ref::<Arc<C>>())
            .map(Arc::clone)
    }

    /// Eagerly connect and provision every registered module.
    ///
    /// The lazy per-module path in [`CompositionRoot::contract`] makes this
    /// optional; hosts enable it via `database.auto_provision`.
    ///
    /// # Errors
    /// Same failure modes as [`CompositionRoot::contract`].
    pub async fn provision(&self) -> Result<()> {
        let schema = self.schema()?;
        for binding in schema.bindings() {
            self.module_handle(&schema, binding).await?;
        }
        Ok(())
    }

    /// Resolve, connect and provision one module's binding.
    async fn module_handle(
        &self,
        schema: &ComposedSchema,
        binding: &ModuleBinding,
    ) -> Result<Arc<DbHandle>> {
        // Lazy resolution: the key is looked up on first access, so modules
        // that are registered but never exercised cost nothing.
        let dsn = self.resolver.resolve(&binding.connection)?.to_owned();

        if self.provisioned.lock().contains(&binding.name) {
            if let Some(handle) = self.handles.get(&dsn) {
                return Ok(Arc::clone(handle.value()));
            }
        }

        let _gate = self.connect_gate.lock().await;

        let handle = if let Some(handle) = self.handles.get(&dsn) {
            Arc::clone(handle.value())
        } else {
            let handle = Arc::new(DbHandle::connect(&dsn, self.connect_opts.clone()).await?);
            self.handles.insert(dsn.clone(), Arc::clone(&handle));
            handle
        };

        if !self.provisioned.lock().contains(&binding.name) {
            let emit_reference = |r: &Reference| -> bool {
                // A physical FK can only point at a table on the same
                // connection binding.
                schema
                    .tables
                    .get(&r.target)
                    .and_then(|t| schema.binding(&t.module))
                    .and_then(|b| self.resolver.resolve(&b.connection).ok())
                    .is_some_and(|target_dsn| target_dsn == dsn)
            };
            ddl::apply_tables(&handle, schema.module_tables(&binding.name), &emit_reference)
                .await?;
            self.provisioned.lock().insert(binding.name.clone());
            tracing::debug!(module = %binding.name, "module provisioned");
        }

        Ok(handle)
    }

    /// Release held connections. Any further call fails with
    /// `InvalidState`.
    ///
    /// # Errors
    /// `InvalidState` when already `Disposed`.
    pub fn dispose(&self) -> Result<()> {
        let mut reg = self.registry.lock();
        if reg.phase == Phase::Disposed {
            return Err(ComposeError::InvalidState {
                operation: "dispose",
                phase: reg.phase,
            });
        }
        reg.phase = Phase::Disposed;
        reg.schema = None;
        drop(reg);

        self.contracts.write().clear();
        // Dropping a handle closes its pool once the last clone goes away.
        self.handles.clear();
        tracing::info!("storage composition disposed");
        Ok(())
    }
}
