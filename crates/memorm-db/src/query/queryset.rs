//! QuerySet and Manager for building and evaluating queries.
//!
//! A [`QuerySet`] is a lazy description of a query over one model. Chaining
//! methods (`filter`, `exclude`, `order_by`, `annotate`, `values`, slicing)
//! consume the queryset and return a new, unevaluated one; the query is only
//! run against the store when results are needed. The first full evaluation
//! populates a per-queryset result cache that every later read reuses, so a
//! queryset is a snapshot taken at evaluation time, not a live view.
//!
//! The shape of the results is part of the type: `QuerySet<Records>` yields
//! model instances, `QuerySet<Dicts>` yields [`Row`] mappings (`values()`),
//! `QuerySet<Tuples>` yields value tuples (`values_list()`), and
//! `QuerySet<Flat>` yields bare values (`values_list(flat=True)`).
//!
//! A [`Manager`] is the entry point for a model, the equivalent of Django's
//! `Model.objects`. Custom managers are named scope functions registered on
//! the store.
//!
//! # Examples
//!
//! ```
//! use memorm_db::fields::{FieldDef, FieldType};
//! use memorm_db::model::ModelSchema;
//! use memorm_db::query::lookups::Q;
//! use memorm_db::store::Store;
//!
//! let store = Store::new();
//! store
//!     .register(ModelSchema::new("Author").field(FieldDef::new("name", FieldType::CharField)))
//!     .unwrap();
//! store.create("Author", [("name", "Ann")]).unwrap();
//! store.create("Author", [("name", "Bob")]).unwrap();
//!
//! let qs = store.objects("Author").unwrap().filter(Q::new("name__startswith", "A")).unwrap();
//! assert!(!qs.is_evaluated());
//! assert_eq!(qs.len().unwrap(), 1);
//! assert!(qs.is_evaluated());
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use memorm_core::logging::query_span;
use memorm_core::{OrmError, OrmResult, SETTINGS};

use super::compiler::{OrderBy, Query, SelectColumn};
use super::expressions::Expression;
use super::lookups::Q;
use crate::model::ModelSchema;
use crate::record::{Record, Row};
use crate::store::{DeleteCounts, ManagerScope, Store};
use crate::value::Value;

// ============================================================================
// Result shapes
// ============================================================================

/// The shape of the items a queryset yields.
pub trait Shape: Send + Sync + 'static {
    /// The item type.
    type Item: Clone + PartialEq + fmt::Debug + Send + Sync;

    /// Builds one item from an evaluated row.
    #[doc(hidden)]
    fn build(
        schema: &Arc<ModelSchema>,
        columns: &[String],
        annotation_names: &[String],
        values: Vec<Value>,
        annotations: Vec<Value>,
    ) -> Self::Item;

    /// The item as shown by the queryset's `repr`.
    fn repr(item: &Self::Item) -> String;
}

/// Model instances.
#[derive(Debug, Clone, Copy)]
pub struct Records;

/// Field mappings, from `values()`.
#[derive(Debug, Clone, Copy)]
pub struct Dicts;

/// Value tuples, from `values_list()`.
#[derive(Debug, Clone, Copy)]
pub struct Tuples;

/// Single values, from `values_list_flat()`.
#[derive(Debug, Clone, Copy)]
pub struct Flat;

impl Shape for Records {
    type Item = Record;

    fn build(
        schema: &Arc<ModelSchema>,
        _columns: &[String],
        annotation_names: &[String],
        values: Vec<Value>,
        annotations: Vec<Value>,
    ) -> Record {
        Record::new(Arc::clone(schema), values)
            .with_annotations(annotation_names.iter().cloned().zip(annotations).collect())
    }

    fn repr(item: &Record) -> String {
        item.repr()
    }
}

impl Shape for Dicts {
    type Item = Row;

    fn build(
        _schema: &Arc<ModelSchema>,
        columns: &[String],
        _annotation_names: &[String],
        values: Vec<Value>,
        _annotations: Vec<Value>,
    ) -> Row {
        Row::new(columns.to_vec(), values)
    }

    fn repr(item: &Row) -> String {
        item.repr()
    }
}

impl Shape for Tuples {
    type Item = Vec<Value>;

    fn build(
        _schema: &Arc<ModelSchema>,
        _columns: &[String],
        _annotation_names: &[String],
        values: Vec<Value>,
        _annotations: Vec<Value>,
    ) -> Vec<Value> {
        values
    }

    fn repr(item: &Vec<Value>) -> String {
        let parts: Vec<String> = item.iter().map(Value::repr).collect();
        if parts.len() == 1 {
            format!("({},)", parts[0])
        } else {
            format!("({})", parts.join(", "))
        }
    }
}

impl Shape for Flat {
    type Item = Value;

    fn build(
        _schema: &Arc<ModelSchema>,
        _columns: &[String],
        _annotation_names: &[String],
        values: Vec<Value>,
        _annotations: Vec<Value>,
    ) -> Value {
        values.into_iter().next().unwrap_or(Value::Null)
    }

    fn repr(item: &Value) -> String {
        item.repr()
    }
}

// ============================================================================
// Manager
// ============================================================================

/// The entry point for query operations on a model.
///
/// The default manager (`Store::objects`) starts from every row; a named
/// manager (`Store::manager`) starts from the queryset its scope function
/// returns.
#[derive(Clone)]
pub struct Manager {
    store: Store,
    model: String,
    scope: Option<ManagerScope>,
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("model", &self.model)
            .field("scoped", &self.scope.is_some())
            .finish()
    }
}

impl Manager {
    pub(crate) fn new(store: Store, model: String, scope: Option<ManagerScope>) -> Self {
        Self { store, model, scope }
    }

    /// The model this manager queries.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// The base queryset of this manager.
    pub fn get_queryset(&self) -> OrmResult<QuerySet<Records>> {
        let base = QuerySet::new(self.store.clone(), &self.model)?;
        match &self.scope {
            Some(scope) => scope(base),
            None => Ok(base),
        }
    }

    /// All objects in scope.
    pub fn all(&self) -> OrmResult<QuerySet<Records>> {
        self.get_queryset()
    }

    /// An empty queryset.
    pub fn none(&self) -> OrmResult<QuerySet<Records>> {
        Ok(self.get_queryset()?.none())
    }

    /// Objects matching a condition.
    pub fn filter(&self, q: impl Into<Q>) -> OrmResult<QuerySet<Records>> {
        self.get_queryset()?.filter(q)
    }

    /// Objects not matching a condition.
    pub fn exclude(&self, q: impl Into<Q>) -> OrmResult<QuerySet<Records>> {
        self.get_queryset()?.exclude(q)
    }

    /// Objects in the given order.
    pub fn order_by<I, S>(&self, fields: I) -> OrmResult<QuerySet<Records>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.get_queryset()?.order_by(fields)
    }

    /// Objects with a computed value attached.
    pub fn annotate(&self, name: impl Into<String>, expression: impl Into<Expression>) -> OrmResult<QuerySet<Records>> {
        self.get_queryset()?.annotate(name, expression)
    }

    /// Field mappings of the objects in scope.
    pub fn values<I, C>(&self, columns: I) -> OrmResult<QuerySet<Dicts>>
    where
        I: IntoIterator<Item = C>,
        C: Into<SelectColumn>,
    {
        self.get_queryset()?.values(columns)
    }

    /// Value tuples of the objects in scope.
    pub fn values_list<I, C>(&self, columns: I) -> OrmResult<QuerySet<Tuples>>
    where
        I: IntoIterator<Item = C>,
        C: Into<SelectColumn>,
    {
        self.get_queryset()?.values_list(columns)
    }

    /// The single object matching a condition.
    pub fn get(&self, q: impl Into<Q>) -> OrmResult<Record> {
        self.get_queryset()?.get(q)
    }

    /// The first object, by primary key unless ordered.
    pub fn first(&self) -> OrmResult<Option<Record>> {
        self.get_queryset()?.first()
    }

    /// The last object, by primary key unless ordered.
    pub fn last(&self) -> OrmResult<Option<Record>> {
        self.get_queryset()?.last()
    }

    /// The number of objects in scope.
    pub fn count(&self) -> OrmResult<usize> {
        self.get_queryset()?.count()
    }

    /// Aggregates over every object in scope.
    pub fn aggregate<I, K>(&self, aggregates: I) -> OrmResult<Row>
    where
        I: IntoIterator<Item = (K, Expression)>,
        K: Into<String>,
    {
        self.get_queryset()?.aggregate(aggregates)
    }

    /// Creates and saves an object.
    pub fn create<I, K, V>(&self, fields: I) -> OrmResult<Record>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        self.store.create(&self.model, fields)
    }

    /// Creates several objects atomically.
    pub fn bulk_create<R, I, K, V>(&self, rows: R) -> OrmResult<Vec<Record>>
    where
        R: IntoIterator<Item = I>,
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        self.store.bulk_create(&self.model, rows)
    }
}

// ============================================================================
// QuerySet
// ============================================================================

/// A lazy, cacheable query.
///
/// Chaining methods take `self` and return a fresh queryset with an empty
/// cache. Name errors surface at the chaining call that introduced them.
pub struct QuerySet<S: Shape = Records> {
    store: Store,
    query: Query,
    cache: OnceLock<Vec<S::Item>>,
    eval_lock: Mutex<()>,
    shape: PhantomData<S>,
}

impl<S: Shape> Clone for QuerySet<S> {
    /// Clones the query. The copy starts unevaluated.
    fn clone(&self) -> Self {
        Self::from_query(self.store.clone(), self.query.clone())
    }
}

impl<S: Shape> fmt::Debug for QuerySet<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerySet")
            .field("query", &self.query)
            .field("evaluated", &self.is_evaluated())
            .finish_non_exhaustive()
    }
}

impl QuerySet<Records> {
    /// A queryset over every row of a model.
    pub fn new(store: Store, model: &str) -> OrmResult<Self> {
        let schema = store.schema(model)?;
        Ok(Self::from_query(store, Query::new(schema.name.clone())))
    }

    /// Field mappings instead of model instances. With no columns, every
    /// concrete field (foreign keys under their `_id` name) and every
    /// annotation is included.
    pub fn values<I, C>(self, columns: I) -> OrmResult<QuerySet<Dicts>>
    where
        I: IntoIterator<Item = C>,
        C: Into<SelectColumn>,
    {
        self.reshape(columns)
    }

    /// Value tuples instead of model instances.
    pub fn values_list<I, C>(self, columns: I) -> OrmResult<QuerySet<Tuples>>
    where
        I: IntoIterator<Item = C>,
        C: Into<SelectColumn>,
    {
        self.reshape(columns)
    }

    /// Bare values of exactly one column.
    pub fn values_list_flat<I, C>(self, columns: I) -> OrmResult<QuerySet<Flat>>
    where
        I: IntoIterator<Item = C>,
        C: Into<SelectColumn>,
    {
        let columns: Vec<SelectColumn> = columns.into_iter().map(Into::into).collect();
        if columns.len() != 1 {
            return Err(OrmError::ValueError(
                "'flat' is not valid when values_list is called with more than one field.".into(),
            ));
        }
        self.reshape(columns)
    }

    fn reshape<T: Shape, I, C>(self, columns: I) -> OrmResult<QuerySet<T>>
    where
        I: IntoIterator<Item = C>,
        C: Into<SelectColumn>,
    {
        let mut query = self.query;
        let mut columns: Vec<SelectColumn> = columns.into_iter().map(Into::into).collect();
        if columns.is_empty() {
            let schema = self.store.schema(&query.model)?;
            columns = schema
                .columns()
                .map(|f| SelectColumn::Field(f.attname()))
                .chain(query.annotations.iter().map(|(name, _)| SelectColumn::Field(name.clone())))
                .collect();
        }
        query.select = Some(columns);
        let reshaped = QuerySet::from_query(self.store, query);
        reshaped.validate()?;
        Ok(reshaped)
    }

    /// Updates the given fields of every matching row. Values may be
    /// expressions over the row's own fields (`F("rating") + 1`).
    pub fn update<I, K, V>(&self, assignments: I) -> OrmResult<usize>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Expression>,
    {
        if self.query.is_sliced() {
            return Err(OrmError::TypeError(
                "Cannot update a query once a slice has been taken.".into(),
            ));
        }
        let assignments: Vec<(String, Expression)> = assignments
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.store.update_matching(&self.query, &assignments)
    }

    /// Deletes every matching row, cascading like [`Store::delete`].
    pub fn delete(&self) -> OrmResult<DeleteCounts> {
        if self.query.is_sliced() {
            return Err(OrmError::TypeError("Cannot use 'limit' or 'offset' with delete().".into()));
        }
        if self.query.distinct {
            return Err(OrmError::TypeError("Cannot call delete() after .distinct().".into()));
        }
        let schema = self.store.schema(&self.query.model)?;
        let pks = self.store.matching_pks(&self.query)?;
        self.store.delete_pks(&schema, &pks)
    }
}

impl<S: Shape> QuerySet<S> {
    fn from_query(store: Store, query: Query) -> Self {
        Self {
            store,
            query,
            cache: OnceLock::new(),
            eval_lock: Mutex::new(()),
            shape: PhantomData,
        }
    }

    fn chain(self, query: Query) -> OrmResult<Self> {
        let next = Self::from_query(self.store, query);
        next.validate()?;
        Ok(next)
    }

    fn validate(&self) -> OrmResult<()> {
        self.store.validate(&self.query)
    }

    fn ensure_not_sliced(&self, action: &str) -> OrmResult<()> {
        if self.query.is_sliced() {
            return Err(OrmError::TypeError(format!(
                "Cannot {action} a query once a slice has been taken."
            )));
        }
        Ok(())
    }

    /// The query AST.
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// The store this queryset reads from.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Returns `true` once the result cache is populated.
    pub fn is_evaluated(&self) -> bool {
        self.cache.get().is_some()
    }

    // ── Chaining ─────────────────────────────────────────────────────

    /// A fresh, unevaluated copy.
    pub fn all(self) -> Self {
        Self::from_query(self.store, self.query)
    }

    /// Rows matching a condition. Each call joins multi-valued relations
    /// independently of earlier calls.
    pub fn filter(self, q: impl Into<Q>) -> OrmResult<Self> {
        self.ensure_not_sliced("filter")?;
        let mut query = self.query.clone();
        query.add_filter(q, false);
        self.chain(query)
    }

    /// Rows not matching a condition.
    pub fn exclude(self, q: impl Into<Q>) -> OrmResult<Self> {
        self.ensure_not_sliced("filter")?;
        let mut query = self.query.clone();
        query.add_filter(q, true);
        self.chain(query)
    }

    /// Replaces the ordering. A leading `-` sorts descending; no fields
    /// clears every ordering, including the model default.
    pub fn order_by<I, T>(self, fields: I) -> OrmResult<Self>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        self.order_by_with(fields.into_iter().map(|f| OrderBy::parse(f.as_ref())))
    }

    /// Replaces the ordering with explicit [`OrderBy`] terms, which can
    /// place NULLs first or last.
    pub fn order_by_with(self, orders: impl IntoIterator<Item = OrderBy>) -> OrmResult<Self> {
        self.ensure_not_sliced("reorder")?;
        let mut query = self.query.clone();
        query.order_by = orders.into_iter().collect();
        query.default_ordering = false;
        self.chain(query)
    }

    /// Flips the ordering.
    pub fn reverse(self) -> OrmResult<Self> {
        self.ensure_not_sliced("reverse")?;
        let mut query = self.query.clone();
        query.reversed = !query.reversed;
        self.chain(query)
    }

    /// Removes duplicate result rows.
    pub fn distinct(self) -> OrmResult<Self> {
        self.ensure_not_sliced("create distinct fields")?;
        let mut query = self.query.clone();
        query.distinct = true;
        self.chain(query)
    }

    /// An empty queryset, which never touches the store.
    pub fn none(self) -> Self {
        let mut query = self.query.clone();
        query.is_empty = true;
        Self::from_query(self.store, query)
    }

    /// Attaches a computed value to each row. An aggregate computes per
    /// row of the model, or per group after `values()`.
    pub fn annotate(self, name: impl Into<String>, expression: impl Into<Expression>) -> OrmResult<Self> {
        let name = name.into();
        let expression = expression.into();
        if self.query.annotations.iter().any(|(n, _)| *n == name) {
            return Err(OrmError::ValueError(format!(
                "The annotation '{name}' conflicts with another annotation."
            )));
        }
        let mut query = self.query.clone();
        if let Some(select) = &mut query.select {
            if query.group_by.is_none() && expression.contains_aggregate() {
                query.group_by = Some(select.clone());
            }
            select.push(SelectColumn::Field(name.clone()));
        }
        query.annotations.push((name, expression));
        self.chain(query)
    }

    /// Narrows the result to `[start:stop]`, relative to any earlier slice.
    /// Negative bounds fail with `IndexError`. Slicing an evaluated
    /// queryset slices its cached results.
    pub fn slice(&self, start: Option<isize>, stop: Option<isize>) -> OrmResult<Self> {
        let start = non_negative(start)?;
        let stop = non_negative(stop)?;
        let mut query = self.query.clone();
        query.set_limits(start, stop);
        let sliced = Self::from_query(self.store.clone(), query);
        if let Some(items) = self.cache.get() {
            let len = items.len();
            let low = start.unwrap_or(0).min(len);
            let high = stop.unwrap_or(len).clamp(low, len);
            let _ = sliced.cache.set(items[low..high].to_vec());
        }
        Ok(sliced)
    }

    // ── Evaluation ───────────────────────────────────────────────────

    fn fetch_items(&self, query: &Query) -> OrmResult<Vec<S::Item>> {
        let fetched = self.store.fetch(query)?;
        Ok(fetched
            .rows
            .into_iter()
            .map(|row| {
                S::build(
                    &fetched.schema,
                    &fetched.columns,
                    &fetched.annotation_names,
                    row.values,
                    row.annotations,
                )
            })
            .collect())
    }

    /// Evaluates the queryset once; later calls read the cache.
    fn evaluated(&self) -> OrmResult<&[S::Item]> {
        if let Some(items) = self.cache.get() {
            tracing::trace!(model = %self.query.model, "Served queryset from cache");
            return Ok(items);
        }
        let _guard = self.eval_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(items) = self.cache.get() {
            return Ok(items);
        }
        let span = query_span(&self.query.model);
        let _entered = span.enter();
        let items = self.fetch_items(&self.query)?;
        tracing::debug!(rows = items.len(), "Evaluated queryset");
        Ok(self.cache.get_or_init(|| items))
    }

    /// Iterates over the results, evaluating on first use.
    pub fn iter(&self) -> OrmResult<std::slice::Iter<'_, S::Item>> {
        Ok(self.evaluated()?.iter())
    }

    /// The results as a list.
    pub fn items(&self) -> OrmResult<Vec<S::Item>> {
        Ok(self.evaluated()?.to_vec())
    }

    /// The number of results, evaluating and caching them.
    pub fn len(&self) -> OrmResult<usize> {
        Ok(self.evaluated()?.len())
    }

    /// Returns `true` if there are no results, evaluating and caching
    /// them.
    pub fn is_empty(&self) -> OrmResult<bool> {
        Ok(self.evaluated()?.is_empty())
    }

    /// Truthiness: `true` if there is at least one result. Evaluates and
    /// caches.
    pub fn is_truthy(&self) -> OrmResult<bool> {
        Ok(!self.evaluated()?.is_empty())
    }

    /// Membership test. Evaluates and caches.
    pub fn contains(&self, item: &S::Item) -> OrmResult<bool> {
        Ok(self.evaluated()?.contains(item))
    }

    /// The number of results. Uses the cache when populated; otherwise
    /// runs the query without caching.
    pub fn count(&self) -> OrmResult<usize> {
        if let Some(items) = self.cache.get() {
            return Ok(items.len());
        }
        Ok(self.store.fetch(&self.query)?.rows.len())
    }

    /// Returns `true` if the query matches anything. Uses the cache when
    /// populated.
    pub fn exists(&self) -> OrmResult<bool> {
        if let Some(items) = self.cache.get() {
            return Ok(!items.is_empty());
        }
        let mut query = self.query.clone();
        query.set_limits(None, Some(1));
        Ok(!self.store.fetch(&query)?.rows.is_empty())
    }

    /// The result at `index`. An unevaluated queryset fetches just that
    /// row without populating the cache.
    pub fn at(&self, index: isize) -> OrmResult<S::Item> {
        let index = usize::try_from(index)
            .map_err(|_| OrmError::IndexError("Negative indexing is not supported.".into()))?;
        let out_of_range = || OrmError::IndexError("list index out of range".into());
        if let Some(items) = self.cache.get() {
            return items.get(index).cloned().ok_or_else(out_of_range);
        }
        let mut query = self.query.clone();
        query.set_limits(Some(index), Some(index + 1));
        self.fetch_items(&query)?
            .into_iter()
            .next()
            .ok_or_else(out_of_range)
    }

    /// `[start:stop:step]`. A step forces evaluation, so the result is a
    /// list.
    pub fn slice_step(&self, start: Option<isize>, stop: Option<isize>, step: isize) -> OrmResult<Vec<S::Item>> {
        if step == 0 {
            return Err(OrmError::ValueError("slice step cannot be zero".into()));
        }
        let step = usize::try_from(step)
            .map_err(|_| OrmError::IndexError("Negative indexing is not supported.".into()))?;
        let sliced = self.slice(start, stop)?;
        Ok(sliced.evaluated()?.iter().step_by(step).cloned().collect())
    }

    fn first_of(&self, query: Query) -> OrmResult<Option<S::Item>> {
        let mut query = query;
        query.set_limits(None, Some(1));
        Ok(self.fetch_items(&query)?.into_iter().next())
    }

    /// The first result, ordering by primary key unless ordered.
    pub fn first(&self) -> OrmResult<Option<S::Item>> {
        let schema = self.store.schema(&self.query.model)?;
        let mut query = self.query.clone();
        if !query.is_ordered(&schema) {
            query.order_by = vec![OrderBy::asc("pk")];
        }
        self.first_of(query)
    }

    /// The last result, ordering by primary key unless ordered.
    pub fn last(&self) -> OrmResult<Option<S::Item>> {
        self.ensure_not_sliced("reverse")?;
        let schema = self.store.schema(&self.query.model)?;
        let mut query = self.query.clone();
        if query.is_ordered(&schema) {
            query.reversed = !query.reversed;
        } else {
            query.order_by = vec![OrderBy::desc("pk")];
        }
        self.first_of(query)
    }

    /// The single result matching `q` (use `Q::and([])` for no extra
    /// condition). Fails with `DoesNotExist` or `MultipleObjectsReturned`.
    pub fn get(&self, q: impl Into<Q>) -> OrmResult<S::Item> {
        let q = q.into();
        let mut query = self.query.clone();
        if !q.is_empty() {
            if query.is_sliced() {
                return Err(OrmError::TypeError(
                    "Cannot filter a query once a slice has been taken.".into(),
                ));
            }
            query.add_filter(q, false);
        }
        if !query.is_sliced() && !query.distinct {
            query.order_by.clear();
            query.default_ordering = false;
        }
        let limit = SETTINGS.get().max_get_results;
        query.set_limits(None, Some(limit));

        let mut items = self.fetch_items(&query)?;
        match items.len() {
            0 => Err(OrmError::DoesNotExist(format!(
                "{} matching query does not exist.",
                self.query.model
            ))),
            1 => Ok(items.remove(0)),
            n => {
                let returned = if n >= limit {
                    format!("more than {}", limit - 1)
                } else {
                    n.to_string()
                };
                Err(OrmError::MultipleObjectsReturned(format!(
                    "get() returned more than one {} -- it returned {returned}!",
                    self.query.model
                )))
            }
        }
    }

    /// Computes aggregates over the matching rows and returns them as one
    /// mapping. Sliced, distinct, or grouped querysets aggregate over
    /// their result rows.
    pub fn aggregate<I, K>(&self, aggregates: I) -> OrmResult<Row>
    where
        I: IntoIterator<Item = (K, Expression)>,
        K: Into<String>,
    {
        let aggregates: Vec<(String, Expression)> = aggregates
            .into_iter()
            .map(|(k, e)| (k.into(), e))
            .collect();
        let values = self.store.aggregate(&self.query, &aggregates)?;
        Ok(Row::new(
            aggregates.into_iter().map(|(name, _)| name).collect(),
            values,
        ))
    }

    /// The bounded preview used by `Display`. Evaluates and caches.
    pub fn repr(&self) -> OrmResult<String> {
        let items = self.evaluated()?;
        let limit = SETTINGS.get().repr_output_size;
        let mut parts: Vec<String> = items.iter().take(limit).map(S::repr).collect();
        if items.len() > limit {
            parts.push("'...(remaining elements truncated)...'".into());
        }
        Ok(format!("<QuerySet [{}]>", parts.join(", ")))
    }
}

impl<S: Shape> fmt::Display for QuerySet<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.repr() {
            Ok(repr) => f.write_str(&repr),
            Err(err) => write!(f, "<QuerySet error: {err}>"),
        }
    }
}

fn non_negative(bound: Option<isize>) -> OrmResult<Option<usize>> {
    bound
        .map(|b| {
            usize::try_from(b)
                .map_err(|_| OrmError::IndexError("Negative indexing is not supported.".into()))
        })
        .transpose()
}
