//! The in-memory store: tables, junctions, writes, and deletion.
//!
//! A [`Store`] is a cheaply cloneable handle to shared state. Querysets,
//! managers, and related managers all hold a clone and read a consistent
//! snapshot of the state under a read lock while a query runs. Writes take
//! the write lock for their whole duration, so a multi-row write (a bulk
//! insert, a cascading delete) is never observed half-applied.
//!
//! ## Storage layout
//!
//! Each concrete table maps primary keys to rows holding one value per
//! column. A multi-table child stores its parent's columns followed by its
//! own, under the same primary key as its parent row; writes keep the
//! shared prefix of both rows in sync. Proxy models share their concrete
//! model's table. Many-to-many relations store `(source pk, target pk)`
//! pairs per junction.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use memorm_core::{OrmError, OrmResult};

use crate::executor::{Executor, OutputRow};
use crate::fields::{FieldDef, FieldDefault, FieldType, OnDelete};
use crate::model::{Catalog, ModelSchema, ReverseKind};
use crate::query::compiler::{Compiler, Query, SelectColumn};
use crate::query::custom_lookups::{CustomLookup, LookupRegistry, Transform};
use crate::query::expressions::Expression;
use crate::query::lookups::Q;
use crate::query::queryset::{Manager, QuerySet, Records};
use crate::record::Record;
use crate::related::RelatedManager;
use crate::value::Value;

/// A function producing the base queryset of a custom manager.
pub type ManagerScope =
    Arc<dyn Fn(QuerySet<Records>) -> OrmResult<QuerySet<Records>> + Send + Sync>;

/// Deleted row counts: the total, and per model (or junction) label.
pub type DeleteCounts = (usize, BTreeMap<String, usize>);

#[derive(Debug, Clone, Default)]
pub(crate) struct Table {
    pub rows: BTreeMap<i64, Vec<Value>>,
    pub next_id: i64,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct StoreState {
    pub catalog: Catalog,
    pub tables: HashMap<String, Table>,
    pub junctions: HashMap<String, Vec<(i64, i64)>>,
}

/// The result of running a query.
#[derive(Debug)]
pub(crate) struct Fetched {
    pub schema: Arc<ModelSchema>,
    pub columns: Vec<String>,
    pub annotation_names: Vec<String>,
    pub rows: Vec<OutputRow>,
}

#[derive(Debug, Default)]
struct DeletePlan {
    rows: BTreeMap<String, BTreeSet<i64>>,
    set_null: Vec<(Arc<ModelSchema>, i64, usize)>,
}

impl DeletePlan {
    fn contains(&self, table: &str, pk: i64) -> bool {
        self.rows.get(table).is_some_and(|pks| pks.contains(&pk))
    }
}

impl StoreState {
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn row(&self, table: &str, pk: i64) -> Option<&Vec<Value>> {
        self.tables.get(table).and_then(|t| t.rows.get(&pk))
    }

    pub fn cell(&self, table: &str, pk: i64, column: usize) -> Option<&Value> {
        self.row(table, pk).and_then(|row| row.get(column))
    }

    pub fn junction_rows(&self, key: &str) -> &[(i64, i64)] {
        self.junctions.get(key).map_or(&[], Vec::as_slice)
    }

    // ── Validation ───────────────────────────────────────────────────

    fn clean_row(&self, schema: &ModelSchema, values: Vec<Value>) -> OrmResult<Vec<Value>> {
        schema
            .columns()
            .zip(values)
            .map(|(field, value)| {
                let value = field.clean(&schema.db_table, value)?;
                self.check_foreign_key(field, &value)?;
                Ok(value)
            })
            .collect()
    }

    fn check_foreign_key(&self, field: &FieldDef, value: &Value) -> OrmResult<()> {
        let (FieldType::ForeignKey { to, .. }, Some(pk)) = (&field.field_type, value.as_int()) else {
            return Ok(());
        };
        let target = self.catalog.get(to)?;
        if self.row(&target.db_table, pk).is_none() {
            return Err(OrmError::IntegrityError(format!(
                "FOREIGN KEY constraint failed: {}.{} refers to missing {} {pk}",
                target.db_table, field.name, target.name
            )));
        }
        Ok(())
    }

    fn check_unique(&self, schema: &ModelSchema, values: &[Value], own_pk: Option<i64>) -> OrmResult<()> {
        let Some(table) = self.tables.get(&schema.db_table) else {
            return Ok(());
        };
        for (idx, field) in schema.columns().enumerate() {
            if !field.unique || field.primary_key || values[idx].is_null() {
                continue;
            }
            let clash = table
                .rows
                .iter()
                .any(|(pk, row)| Some(*pk) != own_pk && row[idx].loose_eq(&values[idx]));
            if clash {
                return Err(OrmError::IntegrityError(format!(
                    "UNIQUE constraint failed: {}.{}",
                    schema.db_table, field.name
                )));
            }
        }
        Ok(())
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Inserts a row, allocating a primary key when it is NULL. Multi-table
    /// children insert (or reuse) their parent row first.
    fn insert(&mut self, schema: &Arc<ModelSchema>, values: Vec<Value>) -> OrmResult<Vec<Value>> {
        let mut values = self.clean_row(schema, values)?;
        let pk_index = schema.pk_index();
        let explicit = values[pk_index].as_int();
        if let Some(pk) = explicit {
            if self.row(&schema.db_table, pk).is_some() {
                return Err(OrmError::IntegrityError(format!(
                    "UNIQUE constraint failed: {}.{}",
                    schema.db_table,
                    schema.pk_name()
                )));
            }
        }
        self.check_unique(schema, &values, explicit)?;

        if let Some(parent) = self.catalog.parent_of(schema) {
            let width = parent.columns().count();
            let prefix = values[..width].to_vec();
            let saved = match explicit {
                Some(pk) if self.row(&parent.db_table, pk).is_some() => self.update(&parent, pk, prefix)?,
                _ => self.insert(&parent, prefix)?,
            };
            values[..width].clone_from_slice(&saved);
        }

        let table = self.tables.entry(schema.db_table.clone()).or_default();
        let pk = match values[pk_index].as_int() {
            Some(pk) => pk,
            None => table.next_id + 1,
        };
        table.next_id = table.next_id.max(pk);
        values[pk_index] = Value::Int(pk);
        table.rows.insert(pk, values.clone());
        tracing::trace!(table = %schema.db_table, pk, "Inserted row");
        Ok(values)
    }

    /// Replaces an existing row.
    fn update(&mut self, schema: &Arc<ModelSchema>, pk: i64, values: Vec<Value>) -> OrmResult<Vec<Value>> {
        let mut values = self.clean_row(schema, values)?;
        values[schema.pk_index()] = Value::Int(pk);
        self.check_unique(schema, &values, Some(pk))?;
        self.write_row(schema, pk, values.clone());
        tracing::trace!(table = %schema.db_table, pk, "Updated row");
        Ok(values)
    }

    /// Stores a row and copies the shared column prefix into the parent
    /// and child rows of the same object.
    fn write_row(&mut self, schema: &Arc<ModelSchema>, pk: i64, values: Vec<Value>) {
        let mut current = Arc::clone(schema);
        while let Some(parent) = self.catalog.parent_of(&current) {
            let width = parent.columns().count();
            if let Some(row) = self
                .tables
                .get_mut(&parent.db_table)
                .and_then(|t| t.rows.get_mut(&pk))
            {
                row[..width].clone_from_slice(&values[..width]);
            }
            current = parent;
        }
        self.sync_children(schema, pk, &values);
        self.tables
            .entry(schema.db_table.clone())
            .or_default()
            .rows
            .insert(pk, values);
    }

    fn sync_children(&mut self, schema: &ModelSchema, pk: i64, values: &[Value]) {
        for child in self.catalog.children_of(schema) {
            if let Some(row) = self
                .tables
                .get_mut(&child.db_table)
                .and_then(|t| t.rows.get_mut(&pk))
            {
                row[..values.len()].clone_from_slice(values);
            }
            self.sync_children(&child, pk, values);
        }
    }

    // ── Deletion ─────────────────────────────────────────────────────

    fn referencing(&self, table: &str, column: usize, pk: i64) -> Vec<i64> {
        self.tables.get(table).map_or_else(Vec::new, |t| {
            t.rows
                .iter()
                .filter(|(_, row)| row.get(column).and_then(Value::as_int) == Some(pk))
                .map(|(src, _)| *src)
                .collect()
        })
    }

    /// Collects every row a delete touches, failing on protected
    /// references before anything is changed.
    fn plan_delete(&self, schema: &Arc<ModelSchema>, pks: &[i64]) -> OrmResult<DeletePlan> {
        let mut plan = DeletePlan::default();
        let mut protected: Vec<(String, i64, String)> = Vec::new();
        let mut queue: VecDeque<(Arc<ModelSchema>, i64)> =
            pks.iter().map(|pk| (Arc::clone(schema), *pk)).collect();

        while let Some((schema, pk)) = queue.pop_front() {
            if self.row(&schema.db_table, pk).is_none() {
                continue;
            }
            if !plan
                .rows
                .entry(schema.db_table.clone())
                .or_default()
                .insert(pk)
            {
                continue;
            }
            if let Some(parent) = self.catalog.parent_of(&schema) {
                queue.push_back((parent, pk));
            }
            for child in self.catalog.children_of(&schema) {
                queue.push_back((child, pk));
            }
            for relation in self.catalog.reverse_relations(&schema.db_table) {
                let ReverseKind::ForeignKey { column, on_delete } = relation.kind else {
                    continue;
                };
                for source_pk in self.referencing(&relation.source.db_table, column, pk) {
                    match on_delete {
                        OnDelete::Cascade => queue.push_back((Arc::clone(&relation.source), source_pk)),
                        OnDelete::Protect => protected.push((
                            relation.source.db_table.clone(),
                            source_pk,
                            format!(
                                "Cannot delete some instances of model '{}' because they are referenced through protected foreign keys: '{}.{}'.",
                                schema.name, relation.source.name, relation.field
                            ),
                        )),
                        OnDelete::SetNull => {
                            plan.set_null
                                .push((Arc::clone(&relation.source), source_pk, column));
                        }
                        OnDelete::DoNothing => {}
                    }
                }
            }
        }

        if let Some((_, _, message)) = protected
            .into_iter()
            .find(|(table, pk, _)| !plan.contains(table, *pk))
        {
            return Err(OrmError::ProtectedError(message));
        }
        Ok(plan)
    }

    fn apply_delete(&mut self, plan: &DeletePlan) -> DeleteCounts {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut total = 0;

        for junction in self.catalog.junctions() {
            let Some(pairs) = self.junctions.get_mut(&junction.key) else {
                continue;
            };
            let before = pairs.len();
            pairs.retain(|(source, target)| {
                !plan.contains(&junction.source_table, *source)
                    && !plan.contains(&junction.target_table, *target)
            });
            let removed = before - pairs.len();
            if removed > 0 {
                *counts.entry(junction.label.clone()).or_default() += removed;
                total += removed;
            }
        }

        for (schema, pk, column) in &plan.set_null {
            if plan.contains(&schema.db_table, *pk) {
                continue;
            }
            if let Some(mut row) = self.row(&schema.db_table, *pk).cloned() {
                row[*column] = Value::Null;
                self.write_row(schema, *pk, row);
            }
        }

        for (table, pks) in &plan.rows {
            let label = self
                .catalog
                .concrete_for_table(table)
                .map_or_else(|| table.clone(), |m| m.name.clone());
            let Some(rows) = self.tables.get_mut(table) else {
                continue;
            };
            let removed = pks.iter().filter(|pk| rows.rows.remove(pk).is_some()).count();
            if removed > 0 {
                *counts.entry(label).or_default() += removed;
                total += removed;
            }
        }
        (total, counts)
    }
}

/// The in-memory database.
///
/// # Examples
///
/// ```
/// use memorm_db::fields::{FieldDef, FieldType};
/// use memorm_db::model::ModelSchema;
/// use memorm_db::store::Store;
/// use memorm_db::value::Value;
///
/// let store = Store::new();
/// store
///     .register(ModelSchema::new("Blog").field(FieldDef::new("name", FieldType::CharField)))
///     .unwrap();
/// let blog = store.create("Blog", [("name", Value::from("Beatles Blog"))]).unwrap();
/// assert_eq!(blog.pk(), Some(1));
/// assert_eq!(store.objects("Blog").unwrap().count().unwrap(), 1);
/// ```
#[derive(Clone)]
pub struct Store {
    state: Arc<RwLock<StoreState>>,
    registry: Arc<RwLock<LookupRegistry>>,
    managers: Arc<RwLock<HashMap<(String, String), ManagerScope>>>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("Store")
            .field("models", &state.catalog.schemas().map(|s| s.name.as_str()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// Creates an empty store with the default transforms (`year`,
    /// `month`, `day`, `date`) and the `ne` lookup registered.
    pub fn new() -> Self {
        Self {
            state: Arc::default(),
            registry: Arc::new(RwLock::new(LookupRegistry::with_defaults())),
            managers: Arc::default(),
        }
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn registry(&self) -> RwLockReadGuard<'_, LookupRegistry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Schema ───────────────────────────────────────────────────────

    /// Registers a model. Related models must be registered first.
    pub fn register(&self, schema: ModelSchema) -> OrmResult<Arc<ModelSchema>> {
        let mut state = self.write();
        let schema = state.catalog.register(schema)?;
        state.tables.entry(schema.db_table.clone()).or_default();
        let keys: Vec<String> = state.catalog.junctions().map(|j| j.key.clone()).collect();
        for key in keys {
            state.junctions.entry(key).or_default();
        }
        Ok(schema)
    }

    /// Looks up a registered model.
    pub fn schema(&self, model: &str) -> OrmResult<Arc<ModelSchema>> {
        self.read().catalog.get(model)
    }

    /// Registers a transform usable in filter paths and as a function.
    pub fn register_transform(&self, transform: Transform) {
        tracing::debug!(name = %transform.name, "Registered transform");
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register_transform(transform);
    }

    /// Registers a lookup usable as the last segment of a filter path.
    pub fn register_lookup(&self, lookup: CustomLookup) {
        tracing::debug!(name = %lookup.name, "Registered lookup");
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register_lookup(lookup);
    }

    /// Registers a named manager whose base queryset is produced by
    /// `scope` (for example, a pre-filtered queryset).
    pub fn register_manager<F>(&self, model: &str, name: &str, scope: F) -> OrmResult<()>
    where
        F: Fn(QuerySet<Records>) -> OrmResult<QuerySet<Records>> + Send + Sync + 'static,
    {
        let schema = self.schema(model)?;
        self.managers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((schema.model_name(), name.to_string()), Arc::new(scope));
        Ok(())
    }

    /// The default manager of a model.
    pub fn objects(&self, model: &str) -> OrmResult<Manager> {
        let schema = self.schema(model)?;
        Ok(Manager::new(self.clone(), schema.name.clone(), None))
    }

    /// A named manager registered with [`register_manager`](Self::register_manager).
    pub fn manager(&self, model: &str, name: &str) -> OrmResult<Manager> {
        let schema = self.schema(model)?;
        let scope = self
            .managers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(schema.model_name(), name.to_string()))
            .cloned()
            .ok_or_else(|| {
                OrmError::FieldError(format!("Model '{}' has no manager named '{name}'.", schema.name))
            })?;
        Ok(Manager::new(self.clone(), schema.name.clone(), Some(scope)))
    }

    // ── Writes ───────────────────────────────────────────────────────

    fn build_values<I, K, V>(schema: &ModelSchema, fields: I) -> OrmResult<Vec<Value>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut given: Vec<Option<Value>> = vec![None; schema.columns().count()];
        for (name, value) in fields {
            let name = name.as_ref();
            let field = if name == "pk" {
                schema.pk_field()
            } else {
                schema.get_field(name).or_else(|| schema.field_by_attname(name))
            }
            .ok_or_else(|| {
                OrmError::TypeError(format!(
                    "{}() got unexpected keyword arguments: '{name}'",
                    schema.name
                ))
            })?;
            if field.is_many_to_many() {
                return Err(OrmError::TypeError(format!(
                    "Direct assignment to the forward side of a many-to-many set is prohibited. Use {}.set() instead.",
                    field.name
                )));
            }
            if let Some(idx) = schema.column_index(&field.name) {
                given[idx] = Some(value.into());
            }
        }
        Ok(schema
            .columns()
            .zip(given)
            .map(|(field, value)| {
                value.unwrap_or_else(|| {
                    field
                        .default
                        .as_ref()
                        .map_or(Value::Null, FieldDefault::produce)
                })
            })
            .collect())
    }

    /// Creates and saves an object. Unset fields take their defaults.
    pub fn create<I, K, V>(&self, model: &str, fields: I) -> OrmResult<Record>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let schema = self.schema(model)?;
        let values = Self::build_values(&schema, fields)?;
        let saved = self.write().insert(&schema, values)?;
        Ok(Record::new(schema, saved))
    }

    /// Creates several objects. Either all are inserted or none is.
    pub fn bulk_create<R, I, K, V>(&self, model: &str, rows: R) -> OrmResult<Vec<Record>>
    where
        R: IntoIterator<Item = I>,
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let schema = self.schema(model)?;
        let rows = rows
            .into_iter()
            .map(|fields| Self::build_values(&schema, fields))
            .collect::<OrmResult<Vec<_>>>()?;

        let mut state = self.write();
        let snapshot = state.tables.clone();
        let mut created = Vec::with_capacity(rows.len());
        for values in rows {
            match state.insert(&schema, values) {
                Ok(saved) => created.push(Record::new(Arc::clone(&schema), saved)),
                Err(err) => {
                    state.tables = snapshot;
                    return Err(err);
                }
            }
        }
        tracing::debug!(model = %schema.name, count = created.len(), "Bulk created objects");
        Ok(created)
    }

    /// Fetches one object by primary key.
    pub fn get(&self, model: &str, pk: i64) -> OrmResult<Record> {
        let schema = self.schema(model)?;
        let state = self.read();
        state
            .row(&schema.db_table, pk)
            .map(|row| Record::new(Arc::clone(&schema), row.clone()))
            .ok_or_else(|| {
                OrmError::DoesNotExist(format!("{} matching query does not exist.", schema.name))
            })
    }

    /// Saves an object: inserts it when it has no primary key or its row
    /// is gone, otherwise updates the stored row. Clearing the primary key
    /// of a loaded object and saving it inserts a copy.
    pub fn save(&self, record: &mut Record) -> OrmResult<()> {
        let schema = Arc::clone(record.schema());
        let values = record.values().to_vec();
        let saved = {
            let mut state = self.write();
            match record.pk() {
                Some(pk) if state.row(&schema.db_table, pk).is_some() => {
                    state.update(&schema, pk, values)?
                }
                _ => state.insert(&schema, values)?,
            }
        };
        let annotations = record.annotations().to_vec();
        *record = Record::new(schema, saved).with_annotations(annotations);
        Ok(())
    }

    /// Reloads an object's values from the store.
    pub fn refresh(&self, record: &mut Record) -> OrmResult<()> {
        let pk = record.pk().ok_or_else(|| {
            OrmError::ValueError(format!("Cannot refresh an unsaved {} instance.", record.model()))
        })?;
        let fresh = self.get(&record.schema().name, pk)?;
        let annotations = record.annotations().to_vec();
        *record = Record::new(Arc::clone(record.schema()), fresh.values().to_vec())
            .with_annotations(annotations);
        Ok(())
    }

    /// Deletes an object and everything that cascades from it.
    ///
    /// Returns the number of rows removed and a per-model breakdown, which
    /// includes junction rows under `<Model>_<field>` labels.
    pub fn delete(&self, record: &Record) -> OrmResult<DeleteCounts> {
        let pk = record.pk().ok_or_else(|| {
            OrmError::ValueError(format!(
                "{} object can't be deleted because its id attribute is set to None.",
                record.model()
            ))
        })?;
        self.delete_pks(record.schema(), &[pk])
    }

    pub(crate) fn delete_pks(&self, schema: &Arc<ModelSchema>, pks: &[i64]) -> OrmResult<DeleteCounts> {
        let mut state = self.write();
        let plan = state.plan_delete(schema, pks)?;
        let counts = state.apply_delete(&plan);
        tracing::debug!(model = %schema.name, deleted = counts.0, "Deleted objects");
        Ok(counts)
    }

    /// The related manager for a many-to-many field or a reverse relation
    /// accessor (`entry_set`, or its `related_name`).
    pub fn related(&self, record: &Record, name: &str) -> OrmResult<RelatedManager> {
        let pk = record.pk().ok_or_else(|| {
            OrmError::ValueError(format!(
                "'{}' instance needs to have a primary key value before this relationship can be used.",
                record.model()
            ))
        })?;
        let state = self.read();
        let schema = record.schema();

        if let Some(field) = schema.get_field(name).filter(|f| f.is_many_to_many()) {
            let junction = state
                .catalog
                .junction_for(schema, &field.name)
                .map(|j| j.key.clone())
                .ok_or_else(|| OrmError::FieldError(format!("No junction for '{name}'.")))?;
            let target = state.catalog.get(field.field_type.related_model().unwrap_or_default())?;
            let back = state
                .catalog
                .reverse_relations(&target.db_table)
                .iter()
                .find(|r| matches!(&r.kind, ReverseKind::ManyToMany { junction: j } if *j == junction))
                .map(|r| r.name.clone())
                .ok_or_else(|| OrmError::FieldError(format!("No reverse relation for '{name}'.")))?;
            return Ok(RelatedManager::many_to_many(
                self.clone(),
                pk,
                target,
                back,
                junction,
                false,
            ));
        }

        let relation = state
            .catalog
            .reverse_accessor(&schema.db_table, name)
            .or_else(|| state.catalog.reverse_relation(&schema.db_table, name))
            .ok_or_else(|| {
                OrmError::FieldError(format!("'{}' object has no related manager '{name}'", schema.name))
            })?;
        let source = Arc::clone(&relation.source);
        Ok(match &relation.kind {
            ReverseKind::ForeignKey { .. } => {
                let nullable = source.get_field(&relation.field).is_some_and(|f| f.null);
                RelatedManager::reverse_foreign_key(
                    self.clone(),
                    pk,
                    source,
                    relation.field.clone(),
                    nullable,
                )
            }
            ReverseKind::ManyToMany { junction } => RelatedManager::many_to_many(
                self.clone(),
                pk,
                source,
                relation.field.clone(),
                junction.clone(),
                true,
            ),
        })
    }

    pub(crate) fn link(&self, junction: &str, pairs: &[(i64, i64)]) {
        let mut state = self.write();
        let rows = state.junctions.entry(junction.to_string()).or_default();
        for pair in pairs {
            if !rows.contains(pair) {
                rows.push(*pair);
            }
        }
        tracing::trace!(junction, count = pairs.len(), "Linked rows");
    }

    pub(crate) fn unlink(&self, junction: &str, keep: impl Fn(&(i64, i64)) -> bool) {
        let mut state = self.write();
        if let Some(rows) = state.junctions.get_mut(junction) {
            rows.retain(keep);
        }
        tracing::trace!(junction, "Unlinked rows");
    }

    /// Checks that each pk has a row in the model's table.
    pub(crate) fn ensure_rows(&self, schema: &ModelSchema, pks: &[i64]) -> OrmResult<()> {
        let state = self.read();
        match pks.iter().find(|pk| state.row(&schema.db_table, **pk).is_none()) {
            Some(pk) => Err(OrmError::IntegrityError(format!(
                "FOREIGN KEY constraint failed: {} {pk} does not exist",
                schema.name
            ))),
            None => Ok(()),
        }
    }

    /// Sets one field of the given rows.
    pub(crate) fn set_field(
        &self,
        schema: &Arc<ModelSchema>,
        pks: &[i64],
        field: &str,
        value: &Value,
    ) -> OrmResult<usize> {
        let idx = schema
            .column_index(field)
            .ok_or_else(|| OrmError::FieldError(format!("{} has no field named '{field}'", schema.name)))?;
        let mut state = self.write();
        let mut updated = Vec::with_capacity(pks.len());
        for pk in pks {
            if let Some(mut row) = state.row(&schema.db_table, *pk).cloned() {
                row[idx] = value.clone();
                updated.push((*pk, state.clean_row(schema, row)?));
            }
        }
        let count = updated.len();
        for (pk, row) in updated {
            state.write_row(schema, pk, row);
        }
        Ok(count)
    }

    // ── Query plumbing ───────────────────────────────────────────────

    /// Compiles a query without running it, surfacing name and type
    /// errors.
    pub(crate) fn validate(&self, query: &Query) -> OrmResult<()> {
        let registry = self.registry();
        let state = self.read();
        Compiler::checking(&state.catalog, &registry)
            .compile(query)
            .map(|_| ())
    }

    pub(crate) fn fetch(&self, query: &Query) -> OrmResult<Fetched> {
        let registry = self.registry();
        let state = self.read();
        let compiled = Compiler::new(&state.catalog, &registry).compile(query)?;
        let rows = Executor::new(&state).run(&compiled);
        Ok(Fetched {
            schema: Arc::clone(&compiled.schema),
            columns: compiled.columns(),
            annotation_names: compiled.annotations.iter().map(|a| a.name.clone()).collect(),
            rows,
        })
    }

    pub(crate) fn aggregate(&self, query: &Query, aggregates: &[(String, Expression)]) -> OrmResult<Vec<Value>> {
        let registry = self.registry();
        let state = self.read();
        let (compiled, exprs) = Compiler::new(&state.catalog, &registry).compile_aggregate(query, aggregates)?;
        Ok(Executor::new(&state).aggregate(&compiled, &exprs))
    }

    /// Primary keys of the rows a query matches, without duplicates, in
    /// result order.
    pub(crate) fn matching_pks(&self, query: &Query) -> OrmResult<Vec<i64>> {
        let fetched = self.fetch(query)?;
        let mut seen = BTreeSet::new();
        Ok(fetched
            .rows
            .into_iter()
            .map(|row| row.pk)
            .filter(|pk| seen.insert(*pk))
            .collect())
    }

    /// Applies field assignments (which may reference other fields of the
    /// row) to every row the query matches.
    pub(crate) fn update_matching(&self, query: &Query, assignments: &[(String, Expression)]) -> OrmResult<usize> {
        let schema = self.schema(&query.model)?;
        let mut fields = Vec::with_capacity(assignments.len());
        for (name, _) in assignments {
            let field = schema
                .get_field(name)
                .or_else(|| schema.field_by_attname(name))
                .ok_or_else(|| {
                    OrmError::FieldError(format!(
                        "Cannot resolve keyword '{name}' into field. Choices are: {}",
                        schema.column_names().join(", ")
                    ))
                })?;
            if field.is_many_to_many() || field.primary_key {
                return Err(OrmError::FieldError(format!(
                    "Cannot update model field '{name}' (only non-relations and foreign keys permitted)."
                )));
            }
            fields.push(field.clone());
        }

        let pks = self.matching_pks(query)?;
        if pks.is_empty() {
            return Ok(0);
        }
        let mut values_query = Query::new(query.model.clone());
        values_query.default_ordering = false;
        values_query.add_filter(Q::new("pk__in", pks), false);
        values_query.select = Some(
            assignments
                .iter()
                .map(|(name, expr)| SelectColumn::Expression(name.clone(), expr.clone()))
                .collect(),
        );
        let new_values = self.fetch(&values_query)?.rows;

        let mut state = self.write();
        let mut pending = Vec::with_capacity(new_values.len());
        let mut seen = BTreeSet::new();
        for row in new_values {
            if !seen.insert(row.pk) {
                continue;
            }
            let Some(mut current) = state.row(&schema.db_table, row.pk).cloned() else {
                continue;
            };
            for (field, value) in fields.iter().zip(row.values) {
                if let Some(idx) = schema.column_index(&field.name) {
                    current[idx] = value;
                }
            }
            let cleaned = state.clean_row(&schema, current)?;
            state.check_unique(&schema, &cleaned, Some(row.pk))?;
            pending.push((row.pk, cleaned));
        }
        let count = pending.len();
        for (pk, row) in pending {
            state.write_row(&schema, pk, row);
        }
        tracing::debug!(model = %schema.name, count, "Updated rows");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::OnDelete;

    fn store() -> Store {
        let store = Store::new();
        store
            .register(
                ModelSchema::new("Blog")
                    .field(FieldDef::new("name", FieldType::CharField).unique())
                    .display_field("name"),
            )
            .unwrap();
        store
            .register(ModelSchema::new("Author").field(FieldDef::new("name", FieldType::CharField)))
            .unwrap();
        store
            .register(
                ModelSchema::new("Entry")
                    .field(FieldDef::foreign_key("blog", "Blog", OnDelete::Cascade))
                    .field(FieldDef::new("headline", FieldType::CharField))
                    .field(FieldDef::new("rating", FieldType::IntegerField).default(0))
                    .field(FieldDef::many_to_many("authors", "Author")),
            )
            .unwrap();
        store
    }

    #[test]
    fn test_create_applies_defaults_and_allocates_pks() {
        let store = store();
        let blog = store.create("Blog", [("name", "A")]).unwrap();
        let entry = store
            .create("Entry", [("blog", Value::from(&blog)), ("headline", Value::from("x"))])
            .unwrap();
        assert_eq!(entry.pk(), Some(1));
        assert_eq!(entry.get::<i64>("rating").unwrap(), 0);
        assert_eq!(entry.get::<i64>("blog_id").unwrap(), 1);
    }

    #[test]
    fn test_create_rejects_unknown_and_m2m_fields() {
        let store = store();
        assert!(matches!(
            store.create("Blog", [("nope", "A")]),
            Err(OrmError::TypeError(_))
        ));
        assert!(matches!(
            store.create("Entry", [("authors", Value::List(vec![]))]),
            Err(OrmError::TypeError(_))
        ));
    }

    #[test]
    fn test_integrity_errors() {
        let store = store();
        store.create("Blog", [("name", "A")]).unwrap();
        assert!(matches!(
            store.create("Blog", [("name", "A")]),
            Err(OrmError::IntegrityError(_))
        ));
        assert!(matches!(
            store.create("Entry", [("blog", Value::Int(99)), ("headline", Value::from("x"))]),
            Err(OrmError::IntegrityError(_))
        ));
        assert!(matches!(
            store.create("Entry", [("headline", "x")]),
            Err(OrmError::IntegrityError(_))
        ));
        assert!(matches!(
            store.create("Blog", [("pk", Value::Int(1)), ("name", Value::from("B"))]),
            Err(OrmError::IntegrityError(_))
        ));
    }

    #[test]
    fn test_bulk_create_is_all_or_nothing() {
        let store = store();
        let err = store.bulk_create("Blog", vec![vec![("name", "A")], vec![("name", "A")]]);
        assert!(err.is_err());
        assert_eq!(store.objects("Blog").unwrap().count().unwrap(), 0);
        let created = store
            .bulk_create("Blog", vec![vec![("name", "A")], vec![("name", "B")]])
            .unwrap();
        assert_eq!(created.len(), 2);
        assert_eq!(created[1].pk(), Some(2));
    }

    #[test]
    fn test_save_updates_and_copies() {
        let store = store();
        let mut blog = store.create("Blog", [("name", "A")]).unwrap();
        blog.set("name", "B").unwrap();
        store.save(&mut blog).unwrap();
        assert_eq!(store.get("Blog", 1).unwrap().get::<String>("name").unwrap(), "B");

        blog.set_pk(None);
        blog.set("name", "C").unwrap();
        store.save(&mut blog).unwrap();
        assert_eq!(blog.pk(), Some(2));
        assert_eq!(store.objects("Blog").unwrap().count().unwrap(), 2);
    }

    #[test]
    fn test_get_missing() {
        let store = store();
        match store.get("Blog", 7) {
            Err(OrmError::DoesNotExist(message)) => {
                assert_eq!(message, "Blog matching query does not exist.");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_delete_cascades_and_counts_junction_rows() {
        let store = store();
        let blog = store.create("Blog", [("name", "A")]).unwrap();
        let author = store.create("Author", [("name", "Joe")]).unwrap();
        for headline in ["x", "y"] {
            let entry = store
                .create("Entry", [("blog", Value::from(&blog)), ("headline", Value::from(headline))])
                .unwrap();
            store.related(&entry, "authors").unwrap().add(&[&author]).unwrap();
        }
        let (total, counts) = store.delete(&blog).unwrap();
        assert_eq!(total, 5);
        assert_eq!(counts.get("Blog"), Some(&1));
        assert_eq!(counts.get("Entry"), Some(&2));
        assert_eq!(counts.get("Entry_authors"), Some(&2));
        assert_eq!(store.objects("Author").unwrap().count().unwrap(), 1);
    }

    #[test]
    fn test_debug_lists_models() {
        let store = store();
        let debug = format!("{store:?}");
        assert!(debug.contains("Blog"));
    }
}
