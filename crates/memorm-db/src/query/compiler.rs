//! Query AST and compiler.
//!
//! This module defines the [`Query`] AST that a queryset builds through
//! method chaining, and the compiler that resolves it against the model
//! catalog. Compilation turns every `__`-separated path into a chain of
//! relation hops ending at a column, a JSON key path, or a transform
//! chain; picks the lookup operator; checks operator and operand types; and
//! splits the conditions into row filters (WHERE) and group filters
//! (HAVING). The result is evaluated by the executor.
//!
//! This is the equivalent of Django's `django.db.models.sql.query` name
//! resolution (`names_to_path`, `build_filter`, `solve_lookup_type`).

use std::sync::Arc;

use memorm_core::{OrmError, OrmResult};

use super::custom_lookups::{CustomLookup, LookupRegistry, Transform, TransformOutput};
use super::expressions::functions::BuiltinFunc;
use super::expressions::{AggregateFunc, Expression};
use super::lookups::{LookupKind, Q};
use crate::fields::{FieldDef, FieldType};
use crate::model::{Catalog, ModelSchema, ReverseKind};
use crate::value::Value;

/// A column ordering direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    /// The field path or annotation name to order by.
    pub column: String,
    /// Whether to sort in descending order.
    pub descending: bool,
    /// Whether to put nulls first or last. `None` sorts NULL as the
    /// smallest value.
    pub nulls_first: Option<bool>,
}

impl OrderBy {
    /// Creates an ascending order.
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
            nulls_first: None,
        }
    }

    /// Creates a descending order.
    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
            nulls_first: None,
        }
    }

    /// Parses `order_by` syntax: a leading `-` means descending.
    pub fn parse(spec: &str) -> Self {
        spec.strip_prefix('-')
            .map_or_else(|| Self::asc(spec), Self::desc)
    }

    /// The same ordering in the opposite direction.
    #[must_use]
    pub fn reversed(&self) -> Self {
        Self {
            column: self.column.clone(),
            descending: !self.descending,
            nulls_first: self.nulls_first.map(|n| !n),
        }
    }
}

/// A column requested by `values()` / `values_list()`.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectColumn {
    /// A field path (possibly ending in transforms) or annotation name.
    Field(String),
    /// An expression with an alias.
    Expression(String, Expression),
    /// An expression without an alias (`values_list("id", Lower("headline"))`).
    Unnamed(Expression),
}

impl SelectColumn {
    /// Creates an unnamed expression column.
    pub fn expr(expression: impl Into<Expression>) -> Self {
        Self::Unnamed(expression.into())
    }

    /// The output name of the column, when it has one.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Field(name) | Self::Expression(name, _) => Some(name),
            Self::Unnamed(_) => None,
        }
    }
}

impl From<&str> for SelectColumn {
    fn from(name: &str) -> Self {
        Self::Field(name.to_string())
    }
}

impl From<String> for SelectColumn {
    fn from(name: String) -> Self {
        Self::Field(name)
    }
}

impl<S: Into<String>> From<(S, Expression)> for SelectColumn {
    fn from((alias, expression): (S, Expression)) -> Self {
        Self::Expression(alias.into(), expression)
    }
}

/// One `filter()` or `exclude()` call.
///
/// Each clause joins multi-valued relations independently of every other
/// clause.
#[derive(Debug, Clone, PartialEq)]
pub struct WhereClause {
    /// The combined condition of the call.
    pub condition: Q,
    /// `true` for `exclude()`.
    pub negated: bool,
}

/// The complete query AST.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// The model queried.
    pub model: String,
    /// Filter and exclude clauses, in call order.
    pub where_clauses: Vec<WhereClause>,
    /// Explicit ordering.
    pub order_by: Vec<OrderBy>,
    /// Whether the model's default ordering applies when `order_by` is
    /// empty.
    pub default_ordering: bool,
    /// Whether the ordering is reversed.
    pub reversed: bool,
    /// Slice start.
    pub low_mark: usize,
    /// Slice end (exclusive).
    pub high_mark: Option<usize>,
    /// Named annotations, in call order.
    pub annotations: Vec<(String, Expression)>,
    /// The projection of `values()`; `None` returns model instances.
    pub select: Option<Vec<SelectColumn>>,
    /// Explicit grouping set by `values().annotate()`.
    pub group_by: Option<Vec<SelectColumn>>,
    /// Whether duplicate result rows are removed.
    pub distinct: bool,
    /// Set by `none()`.
    pub is_empty: bool,
}

impl Query {
    /// Creates a new query over a model.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            where_clauses: Vec::new(),
            order_by: Vec::new(),
            default_ordering: true,
            reversed: false,
            low_mark: 0,
            high_mark: None,
            annotations: Vec::new(),
            select: None,
            group_by: None,
            distinct: false,
            is_empty: false,
        }
    }

    /// Appends a filter (or, when `negated`, an exclude) clause.
    pub fn add_filter(&mut self, condition: impl Into<Q>, negated: bool) {
        self.where_clauses.push(WhereClause {
            condition: condition.into(),
            negated,
        });
    }

    /// Returns `true` once a slice has been taken.
    pub const fn is_sliced(&self) -> bool {
        self.low_mark != 0 || self.high_mark.is_some()
    }

    /// Narrows the slice bounds relative to the current ones.
    pub fn set_limits(&mut self, low: Option<usize>, high: Option<usize>) {
        if let Some(high) = high {
            let absolute = self.low_mark.saturating_add(high);
            self.high_mark = Some(self.high_mark.map_or(absolute, |h| h.min(absolute)));
        }
        if let Some(low) = low {
            let absolute = self.low_mark.saturating_add(low);
            self.low_mark = self.high_mark.map_or(absolute, |h| h.min(absolute));
        }
    }

    /// Removes the slice bounds.
    pub fn clear_limits(&mut self) {
        self.low_mark = 0;
        self.high_mark = None;
    }

    /// Returns `true` if any annotation contains an aggregate.
    pub fn has_aggregate_annotations(&self) -> bool {
        self.annotations.iter().any(|(_, e)| e.contains_aggregate())
    }

    /// Returns `true` if an explicit or default ordering applies.
    pub fn is_ordered(&self, schema: &ModelSchema) -> bool {
        !self.order_by.is_empty() || (self.default_ordering && !schema.ordering.is_empty())
    }
}

// ============================================================================
// Compiled form
// ============================================================================

/// One step from a row to related rows.
#[derive(Debug, Clone)]
pub(crate) enum HopKind {
    /// Follow a foreign key column (single-valued).
    Forward { column: usize },
    /// Cross a many-to-many junction, from either side.
    ManyToMany { junction: String, reverse: bool },
    /// Rows of another table whose foreign key points here.
    ReverseFk { source_table: String, column: usize },
}

#[derive(Debug, Clone)]
pub(crate) struct Hop {
    /// The path up to and including this hop (`entry__authors`); the join
    /// identity used for binding related rows.
    pub prefix: String,
    pub kind: HopKind,
    /// The table reached.
    pub table: String,
}

impl Hop {
    pub const fn is_multi(&self) -> bool {
        !matches!(self.kind, HopKind::Forward { .. })
    }
}

/// A field path resolved to hops and a final column.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedPath {
    pub hops: Vec<Hop>,
    pub column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// A compiled expression.
#[derive(Debug, Clone)]
pub(crate) enum CExpr {
    Const(Value),
    Col(ResolvedPath),
    KeyPath(Box<CExpr>, Vec<String>),
    KeyText(Box<CExpr>),
    Outer(Box<CExpr>),
    Transform(Arc<Transform>, Box<CExpr>),
    Func(BuiltinFunc, Vec<CExpr>),
    Agg {
        func: AggregateFunc,
        arg: Box<CExpr>,
        distinct: bool,
        filter: Option<Box<CCond>>,
    },
    AnnotationRef(usize),
    Case {
        whens: Vec<(CCond, CExpr)>,
        default: Box<CExpr>,
    },
    Subquery(Box<CompiledQuery>),
    SubqueryList(Box<CompiledQuery>),
    Exists {
        query: Box<CompiledQuery>,
        negated: bool,
    },
    Arith(ArithOp, Box<CExpr>, Box<CExpr>),
}

#[derive(Debug, Clone)]
pub(crate) enum LookupOp {
    Builtin(LookupKind),
    Custom(Arc<CustomLookup>),
}

/// A compiled condition tree.
#[derive(Debug, Clone)]
pub(crate) enum CCond {
    Lookup {
        lhs: CExpr,
        op: LookupOp,
        rhs: CExpr,
    },
    And(Vec<CCond>),
    Or(Vec<CCond>),
    Not(Box<CCond>),
}

#[derive(Debug, Clone)]
pub(crate) struct CClause {
    pub cond: CCond,
    pub negated: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct CAnnotation {
    pub name: String,
    pub expr: CExpr,
    pub aggregate: bool,
}

#[derive(Debug, Clone)]
pub(crate) enum Grouping {
    None,
    /// One group per base row (and per distinct projected value).
    ByPk,
    /// One group per distinct value of the expressions.
    ByValues(Vec<CExpr>),
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledQuery {
    pub schema: Arc<ModelSchema>,
    pub where_clauses: Vec<CClause>,
    pub having: Vec<CClause>,
    pub annotations: Vec<CAnnotation>,
    pub select: Option<Vec<(String, CExpr)>>,
    pub grouping: Grouping,
    pub order_by: Vec<(CExpr, OrderBy)>,
    pub distinct: bool,
    pub low_mark: usize,
    pub high_mark: Option<usize>,
    pub is_empty: bool,
}

impl CompiledQuery {
    /// Output column names.
    pub fn columns(&self) -> Vec<String> {
        self.select.as_ref().map_or_else(
            || self.schema.column_names(),
            |cols| cols.iter().map(|(name, _)| name.clone()).collect(),
        )
    }
}

// ============================================================================
// Name resolution
// ============================================================================

/// The type family of a lookup's left-hand side, used to reject lookups
/// that make no sense for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LhsKind {
    Text,
    Numeric,
    Temporal,
    Bool,
    JsonDocument,
    JsonKey,
    Any,
}

impl LhsKind {
    fn of_field(field_type: &FieldType) -> Self {
        match field_type {
            FieldType::CharField | FieldType::TextField | FieldType::EmailField => Self::Text,
            FieldType::AutoField
            | FieldType::IntegerField
            | FieldType::FloatField
            | FieldType::ForeignKey { .. }
            | FieldType::ManyToManyField { .. } => Self::Numeric,
            FieldType::BooleanField => Self::Bool,
            FieldType::DateField | FieldType::DateTimeField => Self::Temporal,
            FieldType::JsonField => Self::JsonDocument,
        }
    }

    const fn after(self, output: TransformOutput) -> Self {
        match output {
            TransformOutput::String => Self::Text,
            TransformOutput::Integer | TransformOutput::Float => Self::Numeric,
            TransformOutput::Date => Self::Temporal,
            TransformOutput::Boolean => Self::Bool,
            TransformOutput::SameAsInput => self,
        }
    }
}

#[derive(Debug, Clone)]
struct AnnotationInfo {
    name: String,
    kind: LhsKind,
    aggregate: bool,
}

/// What is visible while compiling one (sub)query.
struct Scope<'s> {
    schema: Arc<ModelSchema>,
    annotations: Vec<AnnotationInfo>,
    outer: Option<&'s Scope<'s>>,
}

impl Scope<'_> {
    fn annotation(&self, name: &str) -> Option<(usize, &AnnotationInfo)> {
        self.annotations
            .iter()
            .enumerate()
            .find(|(_, a)| a.name == name)
    }
}

/// The part of a path that names relations and a field.
struct Walked {
    path: ResolvedPath,
    field: FieldDef,
    /// Index of the first segment after the field.
    rest: usize,
}

/// A resolved left-hand side.
struct Resolved {
    expr: CExpr,
    kind: LhsKind,
    label: String,
    lookup: Option<String>,
}

/// Compiles queries against a catalog and a transform registry.
pub(crate) struct Compiler<'a> {
    catalog: &'a Catalog,
    registry: &'a LookupRegistry,
    /// Accept `OuterRef` at the top level. Used when checking a queryset
    /// that is only meant to run as a subquery.
    deferred_outer: bool,
}

impl<'a> Compiler<'a> {
    pub const fn new(catalog: &'a Catalog, registry: &'a LookupRegistry) -> Self {
        Self {
            catalog,
            registry,
            deferred_outer: false,
        }
    }

    /// A compiler for name and type checking only.
    pub const fn checking(catalog: &'a Catalog, registry: &'a LookupRegistry) -> Self {
        Self {
            catalog,
            registry,
            deferred_outer: true,
        }
    }

    /// Compiles a top-level query.
    pub fn compile(&self, query: &Query) -> OrmResult<CompiledQuery> {
        self.compile_scoped(query, None)
    }

    /// Compiles a query and the expressions of a terminal `aggregate()`
    /// call against it.
    pub fn compile_aggregate(
        &self,
        query: &Query,
        aggregates: &[(String, Expression)],
    ) -> OrmResult<(CompiledQuery, Vec<CExpr>)> {
        let compiled = self.compile_scoped(query, None)?;
        let scope = Scope {
            schema: Arc::clone(&compiled.schema),
            annotations: compiled
                .annotations
                .iter()
                .map(|a| AnnotationInfo {
                    name: a.name.clone(),
                    kind: LhsKind::Any,
                    aggregate: a.aggregate,
                })
                .collect(),
            outer: None,
        };
        let mut exprs = Vec::with_capacity(aggregates.len());
        for (alias, expression) in aggregates {
            if !expression.contains_aggregate() {
                return Err(OrmError::TypeError(format!("{alias} is not an aggregate expression")));
            }
            exprs.push(self.compile_expr(&scope, expression)?.0);
        }
        Ok((compiled, exprs))
    }

    fn compile_scoped(&self, query: &Query, outer: Option<&Scope<'_>>) -> OrmResult<CompiledQuery> {
        let schema = self.catalog.get(&query.model)?;
        let mut scope = Scope {
            schema: Arc::clone(&schema),
            annotations: Vec::new(),
            outer,
        };

        let mut annotations = Vec::with_capacity(query.annotations.len());
        for (name, expression) in &query.annotations {
            if self.field_named(&schema, name).is_some() {
                return Err(OrmError::ValueError(format!(
                    "The annotation '{name}' conflicts with a field on the model."
                )));
            }
            let (expr, kind) = self.compile_expr(&scope, expression)?;
            let aggregate = self.uses_aggregate(&expr, &scope);
            scope.annotations.push(AnnotationInfo {
                name: name.clone(),
                kind,
                aggregate,
            });
            annotations.push(CAnnotation {
                name: name.clone(),
                expr,
                aggregate,
            });
        }

        let mut where_clauses = Vec::new();
        let mut having = Vec::new();
        for clause in &query.where_clauses {
            let cond = self.compile_q(&scope, &clause.condition)?;
            let compiled = CClause {
                negated: clause.negated,
                cond,
            };
            if self.cond_uses_aggregate(&compiled.cond, &scope) {
                having.push(compiled);
            } else {
                where_clauses.push(compiled);
            }
        }

        let select = match &query.select {
            None => None,
            Some(columns) => Some(self.compile_select(&scope, columns)?),
        };

        let has_aggregate = annotations.iter().any(|a| a.aggregate)
            || select
                .iter()
                .flatten()
                .any(|(_, e)| self.uses_aggregate(e, &scope));
        let grouping = match (&query.group_by, has_aggregate) {
            (_, false) => Grouping::None,
            (None, true) => Grouping::ByPk,
            (Some(columns), true) => Grouping::ByValues(
                self.compile_select(&scope, columns)?
                    .into_iter()
                    .map(|(_, e)| e)
                    .collect(),
            ),
        };

        let mut ordering: Vec<OrderBy> = if !query.order_by.is_empty() {
            query.order_by.clone()
        } else if query.default_ordering && !matches!(grouping, Grouping::ByValues(_)) {
            schema.ordering.iter().map(|s| OrderBy::parse(s)).collect()
        } else {
            Vec::new()
        };
        if query.reversed {
            ordering = ordering.iter().map(OrderBy::reversed).collect();
        }
        let mut order_by = Vec::with_capacity(ordering.len());
        for order in ordering {
            let expr = match scope.annotation(&order.column) {
                Some((idx, _)) => CExpr::AnnotationRef(idx),
                None => self.resolve_value(&scope, &order.column)?.0,
            };
            order_by.push((expr, order));
        }

        Ok(CompiledQuery {
            schema,
            where_clauses,
            having,
            annotations,
            select,
            grouping,
            order_by,
            distinct: query.distinct,
            low_mark: query.low_mark,
            high_mark: query.high_mark,
            is_empty: query.is_empty,
        })
    }

    fn compile_select(
        &self,
        scope: &Scope<'_>,
        columns: &[SelectColumn],
    ) -> OrmResult<Vec<(String, CExpr)>> {
        let mut out = Vec::with_capacity(columns.len());
        for (i, column) in columns.iter().enumerate() {
            let compiled = match column {
                SelectColumn::Field(name) => match scope.annotation(name) {
                    Some((idx, _)) => (name.clone(), CExpr::AnnotationRef(idx)),
                    None => (name.clone(), self.resolve_value(scope, name)?.0),
                },
                SelectColumn::Expression(alias, expression) => {
                    (alias.clone(), self.compile_expr(scope, expression)?.0)
                }
                SelectColumn::Unnamed(expression) => {
                    let alias = expression
                        .default_alias()
                        .unwrap_or_else(|| format!("expr{}", i + 1));
                    (alias, self.compile_expr(scope, expression)?.0)
                }
            };
            out.push(compiled);
        }
        Ok(out)
    }

    // ── Paths ────────────────────────────────────────────────────────

    fn field_named<'s>(&self, schema: &'s ModelSchema, name: &str) -> Option<&'s FieldDef> {
        if name == "pk" {
            return schema.pk_field();
        }
        schema
            .get_field(name)
            .or_else(|| schema.field_by_attname(name))
    }

    fn is_traversable(&self, schema: &ModelSchema, name: &str) -> bool {
        self.field_named(schema, name).is_some()
            || self
                .catalog
                .reverse_relation(&schema.db_table, name)
                .is_some()
    }

    fn unknown_field(&self, schema: &ModelSchema, name: &str, scope: Option<&Scope<'_>>) -> OrmError {
        let mut choices: Vec<String> = schema.fields.iter().map(|f| f.name.clone()).collect();
        choices.extend(
            self.catalog
                .reverse_relations(&schema.db_table)
                .iter()
                .map(|r| r.name.clone()),
        );
        if let Some(scope) = scope {
            choices.extend(scope.annotations.iter().map(|a| a.name.clone()));
        }
        choices.sort();
        choices.dedup();
        OrmError::FieldError(format!(
            "Cannot resolve keyword '{name}' into field. Choices are: {}",
            choices.join(", ")
        ))
    }

    /// Follows relations along `segments` until a field that ends the
    /// relational part of the path.
    fn walk_fields(&self, scope: &Scope<'_>, segments: &[&str]) -> OrmResult<Walked> {
        let mut schema = Arc::clone(&scope.schema);
        let mut hops: Vec<Hop> = Vec::new();
        let mut prefix = String::new();
        let mut i = 0;
        loop {
            let segment = segments[i];
            let qualified = if prefix.is_empty() {
                segment.to_string()
            } else {
                format!("{prefix}__{segment}")
            };
            let next = segments.get(i + 1).copied();

            if let Some(field) = self.field_named(&schema, segment).cloned() {
                let column = schema.column_index(&field.name);
                let raw_key = segment != field.name && segment != "pk";
                match &field.field_type {
                    FieldType::ForeignKey { to, .. } if !raw_key => {
                        let target = self.catalog.get(to)?;
                        let column = column.unwrap_or(0);
                        if next.is_some_and(|n| self.is_traversable(&target, n)) {
                            hops.push(Hop {
                                prefix: qualified.clone(),
                                kind: HopKind::Forward { column },
                                table: target.db_table.clone(),
                            });
                            schema = target;
                            prefix = qualified;
                            i += 1;
                            continue;
                        }
                        return Ok(Walked {
                            path: ResolvedPath { hops, column },
                            field,
                            rest: i + 1,
                        });
                    }
                    FieldType::ManyToManyField { to, .. } => {
                        let target = self.catalog.get(to)?;
                        let junction = self
                            .catalog
                            .junction_for(&schema, &field.name)
                            .map(|j| j.key.clone())
                            .ok_or_else(|| self.unknown_field(&schema, segment, None))?;
                        hops.push(Hop {
                            prefix: qualified.clone(),
                            kind: HopKind::ManyToMany {
                                junction,
                                reverse: false,
                            },
                            table: target.db_table.clone(),
                        });
                        schema = target;
                        prefix = qualified;
                        if next.is_some_and(|n| self.is_traversable(&schema, n)) {
                            i += 1;
                            continue;
                        }
                        return Ok(Self::pk_terminal(&schema, hops, i + 1));
                    }
                    _ => {
                        return Ok(Walked {
                            path: ResolvedPath {
                                hops,
                                column: column.unwrap_or(0),
                            },
                            field,
                            rest: i + 1,
                        });
                    }
                }
            }

            if let Some(relation) = self.catalog.reverse_relation(&schema.db_table, segment) {
                let source = Arc::clone(&relation.source);
                let kind = match &relation.kind {
                    ReverseKind::ForeignKey { column, .. } => HopKind::ReverseFk {
                        source_table: source.db_table.clone(),
                        column: *column,
                    },
                    ReverseKind::ManyToMany { junction } => HopKind::ManyToMany {
                        junction: junction.clone(),
                        reverse: true,
                    },
                };
                hops.push(Hop {
                    prefix: qualified.clone(),
                    kind,
                    table: source.db_table.clone(),
                });
                schema = source;
                prefix = qualified;
                if next.is_some_and(|n| self.is_traversable(&schema, n)) {
                    i += 1;
                    continue;
                }
                return Ok(Self::pk_terminal(&schema, hops, i + 1));
            }

            let root = if hops.is_empty() { Some(scope) } else { None };
            return Err(self.unknown_field(&schema, segment, root));
        }
    }

    fn pk_terminal(schema: &ModelSchema, hops: Vec<Hop>, rest: usize) -> Walked {
        let field = schema
            .pk_field()
            .cloned()
            .unwrap_or_else(|| FieldDef::new("id", FieldType::AutoField).primary_key());
        Walked {
            path: ResolvedPath {
                hops,
                column: schema.pk_index(),
            },
            field,
            rest,
        }
    }

    /// Applies registered transforms in `rest`; returns the name of the
    /// first segment that is not a transform, if any.
    fn apply_transforms(
        &self,
        mut expr: CExpr,
        mut kind: LhsKind,
        mut label: String,
        rest: &[&str],
        allow_lookup: bool,
    ) -> OrmResult<Resolved> {
        let (transforms, last) = self.registry.resolve_chain(rest);
        let applied = transforms.len();
        for transform in transforms {
            kind = kind.after(transform.output_type);
            label.clone_from(&transform.name);
            expr = CExpr::Transform(transform, Box::new(expr));
        }
        match last {
            None => Ok(Resolved {
                expr,
                kind,
                label,
                lookup: None,
            }),
            Some(name) if allow_lookup && applied + 1 == rest.len() => Ok(Resolved {
                expr,
                kind,
                label,
                lookup: Some(name.to_string()),
            }),
            Some(name) => Err(OrmError::FieldError(format!(
                "Unsupported lookup '{name}' for {label} or join on the field not permitted."
            ))),
        }
    }

    fn is_lookup_name(&self, name: &str) -> bool {
        self.registry.has_lookup(name) || LookupKind::from_name(name).is_some()
    }

    /// Resolves a path used as a value (`F()`, `values()`, ordering): no
    /// trailing lookup is allowed; JSON segments are keys.
    fn resolve_value(&self, scope: &Scope<'_>, path: &str) -> OrmResult<(CExpr, LhsKind)> {
        self.resolve_path(scope, path, false)
            .map(|resolved| (resolved.expr, resolved.kind))
    }

    fn resolve_path(&self, scope: &Scope<'_>, path: &str, allow_lookup: bool) -> OrmResult<Resolved> {
        let segments: Vec<&str> = path.split("__").collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(OrmError::FieldError(format!("Invalid field path '{path}'.")));
        }

        if let Some((idx, info)) = scope.annotation(segments[0]) {
            return self.apply_transforms(
                CExpr::AnnotationRef(idx),
                info.kind,
                info.name.clone(),
                &segments[1..],
                allow_lookup,
            );
        }

        let walked = self.walk_fields(scope, &segments)?;
        let rest = &segments[walked.rest..];
        let label = walked.field.field_type.kind_name().to_string();
        let column = CExpr::Col(walked.path);

        if walked.field.field_type == FieldType::JsonField {
            let (keys, lookup) = match rest.split_last() {
                Some((last, keys)) if allow_lookup && self.is_lookup_name(last) => {
                    (keys, Some((*last).to_string()))
                }
                _ => (rest, None),
            };
            if keys.is_empty() {
                return Ok(Resolved {
                    expr: column,
                    kind: LhsKind::JsonDocument,
                    label,
                    lookup,
                });
            }
            return Ok(Resolved {
                expr: CExpr::KeyPath(
                    Box::new(column),
                    keys.iter().map(|k| (*k).to_string()).collect(),
                ),
                kind: LhsKind::JsonKey,
                label: "KeyTransform".to_string(),
                lookup,
            });
        }

        self.apply_transforms(
            column,
            LhsKind::of_field(&walked.field.field_type),
            label,
            rest,
            allow_lookup,
        )
    }

    // ── Expressions ──────────────────────────────────────────────────

    fn compile_expr(&self, scope: &Scope<'_>, expression: &Expression) -> OrmResult<(CExpr, LhsKind)> {
        let compiled = match expression {
            Expression::Value(v) => {
                let kind = match v {
                    Value::String(_) => LhsKind::Text,
                    Value::Int(_) | Value::Float(_) => LhsKind::Numeric,
                    Value::Date(_) | Value::DateTime(_) => LhsKind::Temporal,
                    Value::Bool(_) => LhsKind::Bool,
                    Value::Json(_) => LhsKind::JsonDocument,
                    Value::Null | Value::List(_) => LhsKind::Any,
                };
                (CExpr::Const(v.clone()), kind)
            }
            Expression::F(path) => self.resolve_value(scope, path)?,
            Expression::OuterRef(_) if scope.outer.is_none() && self.deferred_outer => {
                (CExpr::Outer(Box::new(CExpr::Const(Value::Null))), LhsKind::Any)
            }
            Expression::OuterRef(path) => {
                let outer = scope.outer.ok_or_else(|| {
                    OrmError::ValueError(
                        "This queryset contains a reference to an outer query and may only be used in a subquery."
                            .into(),
                    )
                })?;
                let (inner, kind) = self.resolve_value(outer, path)?;
                (CExpr::Outer(Box::new(inner)), kind)
            }
            Expression::KeyText(path) => {
                let (inner, _) = self.resolve_value(scope, path)?;
                (CExpr::KeyText(Box::new(inner)), LhsKind::Text)
            }
            Expression::Func { name, args } => self.compile_func(scope, name, args)?,
            Expression::Aggregate {
                func,
                field,
                distinct,
                filter,
            } => {
                if field.contains_aggregate() {
                    return Err(OrmError::FieldError(format!(
                        "Cannot compute {}(..): the argument is an aggregate",
                        func.name()
                    )));
                }
                let (arg, _) = self.compile_expr(scope, field)?;
                let filter = match filter {
                    Some(q) => Some(Box::new(self.compile_q(scope, q)?)),
                    None => None,
                };
                (
                    CExpr::Agg {
                        func: *func,
                        arg: Box::new(arg),
                        distinct: *distinct,
                        filter,
                    },
                    LhsKind::Numeric,
                )
            }
            Expression::Case { whens, default } => {
                let mut compiled = Vec::with_capacity(whens.len());
                let mut kind = LhsKind::Any;
                for when in whens {
                    let cond = self.compile_q(scope, &when.condition)?;
                    let (then, then_kind) = self.compile_expr(scope, &when.then)?;
                    kind = then_kind;
                    compiled.push((cond, then));
                }
                let default = match default {
                    Some(d) => self.compile_expr(scope, d)?.0,
                    None => CExpr::Const(Value::Null),
                };
                (
                    CExpr::Case {
                        whens: compiled,
                        default: Box::new(default),
                    },
                    kind,
                )
            }
            Expression::Subquery(query) => (
                CExpr::Subquery(Box::new(self.compile_scoped(query, Some(scope))?)),
                LhsKind::Any,
            ),
            Expression::Exists { query, negated } => (
                CExpr::Exists {
                    query: Box::new(self.compile_scoped(query, Some(scope))?),
                    negated: *negated,
                },
                LhsKind::Bool,
            ),
            Expression::Add(l, r) => self.compile_arith(scope, ArithOp::Add, l, r)?,
            Expression::Sub(l, r) => self.compile_arith(scope, ArithOp::Sub, l, r)?,
            Expression::Mul(l, r) => self.compile_arith(scope, ArithOp::Mul, l, r)?,
            Expression::Div(l, r) => self.compile_arith(scope, ArithOp::Div, l, r)?,
        };
        Ok(compiled)
    }

    fn compile_arith(
        &self,
        scope: &Scope<'_>,
        op: ArithOp,
        l: &Expression,
        r: &Expression,
    ) -> OrmResult<(CExpr, LhsKind)> {
        let (l, _) = self.compile_expr(scope, l)?;
        let (r, _) = self.compile_expr(scope, r)?;
        Ok((CExpr::Arith(op, Box::new(l), Box::new(r)), LhsKind::Numeric))
    }

    /// Registered single-argument transforms take precedence over the
    /// built-in functions of the same name.
    fn compile_func(
        &self,
        scope: &Scope<'_>,
        name: &str,
        args: &[Expression],
    ) -> OrmResult<(CExpr, LhsKind)> {
        if let [arg] = args {
            if let Some(transform) = self.registry.get_transform(&name.to_lowercase()) {
                let (inner, kind) = self.compile_expr(scope, arg)?;
                let kind = kind.after(transform.output_type);
                return Ok((CExpr::Transform(transform, Box::new(inner)), kind));
            }
        }
        let func = BuiltinFunc::from_name(name)
            .ok_or_else(|| OrmError::FieldError(format!("Unknown function '{name}'.")))?;
        let (min, max) = func.arity();
        if args.len() < min || max.is_some_and(|max| args.len() > max) {
            return Err(OrmError::TypeError(format!(
                "'{name}' takes {} arguments ({} given)",
                max.map_or_else(|| format!("at least {min}"), |max| max.to_string()),
                args.len()
            )));
        }
        let mut compiled = Vec::with_capacity(args.len());
        let mut first_kind = LhsKind::Any;
        for (i, arg) in args.iter().enumerate() {
            let (expr, kind) = self.compile_expr(scope, arg)?;
            if i == 0 {
                first_kind = kind;
            }
            compiled.push(expr);
        }
        let kind = match func {
            BuiltinFunc::Lower | BuiltinFunc::Upper | BuiltinFunc::Trim | BuiltinFunc::Concat => {
                LhsKind::Text
            }
            BuiltinFunc::Length => LhsKind::Numeric,
            _ => first_kind,
        };
        Ok((CExpr::Func(func, compiled), kind))
    }

    // ── Conditions ───────────────────────────────────────────────────

    fn compile_q(&self, scope: &Scope<'_>, q: &Q) -> OrmResult<CCond> {
        match q {
            Q::Filter { path, value } => self.compile_lookup(scope, path, value),
            Q::And(children) => children
                .iter()
                .map(|c| self.compile_q(scope, c))
                .collect::<OrmResult<Vec<_>>>()
                .map(CCond::And),
            Q::Or(children) => children
                .iter()
                .map(|c| self.compile_q(scope, c))
                .collect::<OrmResult<Vec<_>>>()
                .map(CCond::Or),
            Q::Not(inner) => Ok(CCond::Not(Box::new(self.compile_q(scope, inner)?))),
        }
    }

    fn compile_lookup(&self, scope: &Scope<'_>, path: &str, value: &Expression) -> OrmResult<CCond> {
        let resolved = self.resolve_path(scope, path, true)?;
        let (mut rhs, _) = self.compile_expr(scope, value)?;

        let op = match resolved.lookup.as_deref() {
            None => LookupOp::Builtin(LookupKind::Exact),
            Some(name) => {
                if let Some(custom) = self.registry.get_lookup(name) {
                    LookupOp::Custom(custom)
                } else if let Some(kind) = LookupKind::from_name(name) {
                    LookupOp::Builtin(kind)
                } else {
                    return Err(OrmError::FieldError(format!(
                        "Unsupported lookup '{name}' for {} or join on the field not permitted.",
                        resolved.label
                    )));
                }
            }
        };

        let mut kind = match op {
            LookupOp::Builtin(kind) => kind,
            LookupOp::Custom(_) => {
                return Ok(CCond::Lookup {
                    lhs: resolved.expr,
                    op,
                    rhs,
                })
            }
        };
        check_lookup(resolved.kind, &resolved.label, kind)?;
        if let CExpr::Const(operand) = rhs {
            rhs = CExpr::Const(coerce_operand(resolved.kind, &resolved.label, kind, operand)?);
        }

        let is_json = matches!(resolved.kind, LhsKind::JsonDocument | LhsKind::JsonKey);
        if matches!(kind, LookupKind::Exact | LookupKind::IExact)
            && !is_json
            && matches!(rhs, CExpr::Const(Value::Null))
        {
            kind = LookupKind::IsNull;
            rhs = CExpr::Const(Value::Bool(true));
        }
        if kind == LookupKind::In {
            if let CExpr::Subquery(query) = rhs {
                rhs = CExpr::SubqueryList(query);
            }
        }
        Ok(CCond::Lookup {
            lhs: resolved.expr,
            op: LookupOp::Builtin(kind),
            rhs,
        })
    }

    // ── Aggregate detection ──────────────────────────────────────────

    fn uses_aggregate(&self, expr: &CExpr, scope: &Scope<'_>) -> bool {
        expr_uses_aggregate(expr, &|idx| {
            scope.annotations.get(idx).is_some_and(|a| a.aggregate)
        })
    }

    fn cond_uses_aggregate(&self, cond: &CCond, scope: &Scope<'_>) -> bool {
        cond_uses_aggregate(cond, &|idx| {
            scope.annotations.get(idx).is_some_and(|a| a.aggregate)
        })
    }
}

/// Returns `true` if the expression contains an aggregate, directly or
/// through an aggregate annotation (as reported by `is_aggregate`).
pub(crate) fn expr_uses_aggregate(expr: &CExpr, is_aggregate: &dyn Fn(usize) -> bool) -> bool {
    match expr {
        CExpr::Agg { .. } => true,
        CExpr::AnnotationRef(idx) => is_aggregate(*idx),
        CExpr::KeyPath(inner, _) | CExpr::KeyText(inner) | CExpr::Transform(_, inner) => {
            expr_uses_aggregate(inner, is_aggregate)
        }
        CExpr::Func(_, args) => args.iter().any(|a| expr_uses_aggregate(a, is_aggregate)),
        CExpr::Case { whens, default } => {
            whens.iter().any(|(c, t)| {
                cond_uses_aggregate(c, is_aggregate) || expr_uses_aggregate(t, is_aggregate)
            }) || expr_uses_aggregate(default, is_aggregate)
        }
        CExpr::Arith(_, l, r) => {
            expr_uses_aggregate(l, is_aggregate) || expr_uses_aggregate(r, is_aggregate)
        }
        CExpr::Const(_)
        | CExpr::Col(_)
        | CExpr::Outer(_)
        | CExpr::Subquery(_)
        | CExpr::SubqueryList(_)
        | CExpr::Exists { .. } => false,
    }
}

fn cond_uses_aggregate(cond: &CCond, is_aggregate: &dyn Fn(usize) -> bool) -> bool {
    match cond {
        CCond::Lookup { lhs, rhs, .. } => {
            expr_uses_aggregate(lhs, is_aggregate) || expr_uses_aggregate(rhs, is_aggregate)
        }
        CCond::And(children) | CCond::Or(children) => {
            children.iter().any(|c| cond_uses_aggregate(c, is_aggregate))
        }
        CCond::Not(inner) => cond_uses_aggregate(inner, is_aggregate),
    }
}

/// Rejects operators that make no sense for the left-hand side.
fn check_lookup(kind: LhsKind, label: &str, lookup: LookupKind) -> OrmResult<()> {
    let unsupported = || {
        Err(OrmError::LookupTypeError(format!(
            "Unsupported lookup '{}' for {label}",
            lookup.name()
        )))
    };
    match kind {
        LhsKind::JsonDocument => match lookup {
            LookupKind::Exact
            | LookupKind::IsNull
            | LookupKind::In
            | LookupKind::Contains
            | LookupKind::ContainedBy
            | LookupKind::HasKey
            | LookupKind::HasKeys
            | LookupKind::HasAnyKeys => Ok(()),
            _ => unsupported(),
        },
        LhsKind::JsonKey | LhsKind::Any => Ok(()),
        LhsKind::Text => {
            if lookup.is_json_only() {
                unsupported()
            } else {
                Ok(())
            }
        }
        LhsKind::Numeric | LhsKind::Temporal | LhsKind::Bool => {
            if lookup.is_json_only() || lookup.is_text_pattern() || lookup == LookupKind::Contains {
                unsupported()
            } else {
                Ok(())
            }
        }
    }
}

/// Checks the shape of a literal operand and converts strings into the
/// numbers and dates the field stores.
fn coerce_operand(kind: LhsKind, label: &str, lookup: LookupKind, operand: Value) -> OrmResult<Value> {
    let type_error = |message: &str| Err(OrmError::LookupTypeError(message.to_string()));
    match lookup {
        LookupKind::In => match operand {
            Value::List(items) => items
                .into_iter()
                .map(|item| coerce_scalar(kind, label, item))
                .collect::<OrmResult<Vec<_>>>()
                .map(Value::List),
            _ => type_error("The 'in' lookup requires a list of values."),
        },
        LookupKind::Range => match operand {
            Value::List(items) if items.len() == 2 => items
                .into_iter()
                .map(|item| coerce_scalar(kind, label, item))
                .collect::<OrmResult<Vec<_>>>()
                .map(Value::List),
            _ => type_error("The 'range' lookup requires a list of two values."),
        },
        LookupKind::IsNull => match operand {
            Value::Bool(_) => Ok(operand),
            _ => type_error("The QuerySet value for an isnull lookup must be True or False."),
        },
        LookupKind::HasKey => match operand {
            Value::String(_) => Ok(operand),
            _ => type_error("The 'has_key' lookup requires a string key."),
        },
        LookupKind::HasKeys | LookupKind::HasAnyKeys => match &operand {
            Value::List(items) if items.iter().all(|i| matches!(i, Value::String(_))) => Ok(operand),
            _ => type_error(&format!("The '{}' lookup requires a list of string keys.", lookup.name())),
        },
        LookupKind::Contains | LookupKind::ContainedBy
            if matches!(kind, LhsKind::JsonDocument | LhsKind::JsonKey) =>
        {
            match operand {
                Value::Null => type_error(&format!("The '{}' lookup requires a document.", lookup.name())),
                Value::Json(_) => Ok(operand),
                other => Ok(Value::Json(other.to_json())),
            }
        }
        LookupKind::Exact | LookupKind::Gt | LookupKind::Gte | LookupKind::Lt | LookupKind::Lte => {
            coerce_scalar(kind, label, operand)
        }
        _ => Ok(operand),
    }
}

fn coerce_scalar(kind: LhsKind, label: &str, value: Value) -> OrmResult<Value> {
    match (kind, value) {
        (LhsKind::Numeric, Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .or_else(|_| s.trim().parse::<f64>().map(Value::Float))
            .map_err(|_| OrmError::ValueError(format!("Field '{label}' expected a number but got '{s}'."))),
        (LhsKind::Temporal, Value::String(s)) => s
            .parse::<chrono::NaiveDate>()
            .map(Value::Date)
            .or_else(|_| s.parse::<chrono::NaiveDateTime>().map(Value::DateTime))
            .map_err(|_| {
                OrmError::ValueError(format!("'{s}' value has an invalid date format for {label}."))
            }),
        (_, value) => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::OnDelete;
    use crate::query::expressions::functions::{count, lower};
    use crate::query::expressions::OuterRef;

    fn catalog() -> Catalog {
        let mut catalog = Catalog::new();
        catalog
            .register(
                ModelSchema::new("Blog")
                    .field(FieldDef::new("name", FieldType::CharField))
                    .field(FieldDef::new("tagline", FieldType::TextField)),
            )
            .unwrap();
        catalog
            .register(ModelSchema::new("Author").field(FieldDef::new("name", FieldType::CharField)))
            .unwrap();
        catalog
            .register(
                ModelSchema::new("Entry")
                    .field(FieldDef::foreign_key("blog", "Blog", OnDelete::Cascade))
                    .field(FieldDef::new("headline", FieldType::CharField))
                    .field(FieldDef::new("pub_date", FieldType::DateField))
                    .field(FieldDef::new("rating", FieldType::IntegerField))
                    .field(FieldDef::many_to_many("authors", "Author"))
                    .ordering(["-pub_date"]),
            )
            .unwrap();
        catalog
            .register(
                ModelSchema::new("Dog")
                    .field(FieldDef::new("name", FieldType::CharField))
                    .field(FieldDef::new("data", FieldType::JsonField).null()),
            )
            .unwrap();
        catalog
    }

    fn compile(query: &Query) -> OrmResult<CompiledQuery> {
        let catalog = catalog();
        let registry = LookupRegistry::with_defaults();
        Compiler::new(&catalog, &registry).compile(query)
    }

    fn filtered(model: &str, q: Q) -> OrmResult<CompiledQuery> {
        let mut query = Query::new(model);
        query.add_filter(q, false);
        compile(&query)
    }

    #[test]
    fn test_order_by_parse() {
        assert_eq!(OrderBy::parse("-rating"), OrderBy::desc("rating"));
        assert_eq!(OrderBy::parse("headline"), OrderBy::asc("headline"));
        assert!(OrderBy::parse("-rating").reversed() == OrderBy::asc("rating"));
    }

    #[test]
    fn test_set_limits_composes() {
        let mut query = Query::new("entry");
        query.set_limits(Some(5), Some(10));
        assert_eq!((query.low_mark, query.high_mark), (5, Some(10)));
        query.set_limits(Some(1), Some(3));
        assert_eq!((query.low_mark, query.high_mark), (6, Some(8)));
        query.set_limits(Some(0), Some(100));
        assert_eq!((query.low_mark, query.high_mark), (6, Some(8)));
        assert!(query.is_sliced());
        query.clear_limits();
        assert!(!query.is_sliced());
    }

    #[test]
    fn test_set_limits_saturates_huge_offsets() {
        let mut query = Query::new("entry");
        query.set_limits(Some(usize::MAX), None);
        query.set_limits(Some(usize::MAX), None);
        assert_eq!((query.low_mark, query.high_mark), (usize::MAX, None));
        query.set_limits(None, Some(1));
        assert_eq!((query.low_mark, query.high_mark), (usize::MAX, Some(usize::MAX)));
    }

    #[test]
    fn test_resolve_forward_and_reverse_paths() {
        let compiled = filtered("Entry", Q::new("blog__name", "Beatles Blog")).unwrap();
        match &compiled.where_clauses[0].cond {
            CCond::Lookup {
                lhs: CExpr::Col(path),
                ..
            } => {
                assert_eq!(path.hops.len(), 1);
                assert!(!path.hops[0].is_multi());
                assert_eq!(path.hops[0].table, "blog");
            }
            other => panic!("unexpected {other:?}"),
        }

        let compiled = filtered("Blog", Q::new("entry__authors__name", "Joe")).unwrap();
        match &compiled.where_clauses[0].cond {
            CCond::Lookup {
                lhs: CExpr::Col(path),
                ..
            } => {
                let prefixes: Vec<&str> = path.hops.iter().map(|h| h.prefix.as_str()).collect();
                assert_eq!(prefixes, vec!["entry", "entry__authors"]);
                assert!(path.hops.iter().all(Hop::is_multi));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_fk_terminal_forms() {
        for path in ["blog", "blog_id", "blog__id", "blog__pk"] {
            assert!(filtered("Entry", Q::new(path, 3)).is_ok(), "{path}");
        }
    }

    #[test]
    fn test_unknown_field_lists_choices() {
        let err = filtered("Entry", Q::new("nope", 1)).unwrap_err();
        match err {
            OrmError::FieldError(message) => {
                assert!(message.starts_with("Cannot resolve keyword 'nope' into field."));
                assert!(message.contains("authors, blog, headline, id, pub_date, rating"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            filtered("Blog", Q::new("entry__nope", 1)),
            Err(OrmError::FieldError(_))
        ));
    }

    #[test]
    fn test_unsupported_lookup_is_field_error() {
        assert!(matches!(
            filtered("Entry", Q::new("headline__bogus", "x")),
            Err(OrmError::FieldError(_))
        ));
    }

    #[test]
    fn test_lookup_type_errors() {
        assert!(matches!(
            filtered("Dog", Q::new("data__gt", 1)),
            Err(OrmError::LookupTypeError(_))
        ));
        assert!(matches!(
            filtered("Entry", Q::new("rating__startswith", "4")),
            Err(OrmError::LookupTypeError(_))
        ));
        assert!(matches!(
            filtered("Entry", Q::new("headline__has_key", "x")),
            Err(OrmError::LookupTypeError(_))
        ));
        assert!(matches!(
            filtered("Entry", Q::new("rating__in", 4)),
            Err(OrmError::LookupTypeError(_))
        ));
        assert!(matches!(
            filtered("Entry", Q::new("rating__isnull", "yes")),
            Err(OrmError::LookupTypeError(_))
        ));
        assert!(matches!(
            filtered("Entry", Q::new("rating", "many")),
            Err(OrmError::ValueError(_))
        ));
    }

    #[test]
    fn test_json_paths() {
        let compiled = filtered("Dog", Q::new("data__owner__name", "Bob")).unwrap();
        match &compiled.where_clauses[0].cond {
            CCond::Lookup {
                lhs: CExpr::KeyPath(_, keys),
                op: LookupOp::Builtin(LookupKind::Exact),
                ..
            } => assert_eq!(keys, &vec!["owner".to_string(), "name".to_string()]),
            other => panic!("unexpected {other:?}"),
        }
        let compiled = filtered("Dog", Q::new("data__has_key", "owner")).unwrap();
        assert!(matches!(
            &compiled.where_clauses[0].cond,
            CCond::Lookup { lhs: CExpr::Col(_), op: LookupOp::Builtin(LookupKind::HasKey), .. }
        ));
    }

    #[test]
    fn test_exact_none_becomes_isnull_except_json() {
        let compiled = filtered("Entry", Q::new("headline", Value::Null)).unwrap();
        assert!(matches!(
            &compiled.where_clauses[0].cond,
            CCond::Lookup { op: LookupOp::Builtin(LookupKind::IsNull), .. }
        ));
        let compiled = filtered("Dog", Q::new("data", Value::Null)).unwrap();
        assert!(matches!(
            &compiled.where_clauses[0].cond,
            CCond::Lookup { op: LookupOp::Builtin(LookupKind::Exact), .. }
        ));
    }

    #[test]
    fn test_date_string_operand_is_parsed() {
        let compiled = filtered("Entry", Q::new("pub_date", "2005-05-02")).unwrap();
        match &compiled.where_clauses[0].cond {
            CCond::Lookup {
                rhs: CExpr::Const(Value::Date(d)),
                ..
            } => assert_eq!(d.to_string(), "2005-05-02"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_transforms_require_registration() {
        assert!(filtered("Entry", Q::new("pub_date__year", 2008)).is_ok());
        assert!(matches!(
            filtered("Entry", Q::new("headline__lower", "x")),
            Err(OrmError::FieldError(_))
        ));
        let catalog = catalog();
        let mut registry = LookupRegistry::with_defaults();
        registry.register_transform(Transform::lower());
        let mut query = Query::new("Entry");
        query.add_filter(Q::new("headline__lower__startswith", "new"), false);
        assert!(Compiler::new(&catalog, &registry).compile(&query).is_ok());
    }

    #[test]
    fn test_having_split() {
        let mut query = Query::new("Blog");
        query.annotations.push(("n".into(), count("entry")));
        query.add_filter(Q::new("n__gt", 1), false);
        query.add_filter(Q::new("name", "x"), false);
        let compiled = compile(&query).unwrap();
        assert_eq!(compiled.having.len(), 1);
        assert_eq!(compiled.where_clauses.len(), 1);
        assert!(matches!(compiled.grouping, Grouping::ByPk));
    }

    #[test]
    fn test_values_grouping() {
        let mut query = Query::new("Blog");
        query.select = Some(vec!["entry__authors".into()]);
        query.group_by = query.select.clone();
        query.annotations.push(("entries".into(), count("entry")));
        query
            .select
            .as_mut()
            .unwrap()
            .push(SelectColumn::Field("entries".into()));
        let compiled = compile(&query).unwrap();
        assert!(matches!(compiled.grouping, Grouping::ByValues(ref v) if v.len() == 1));
        assert_eq!(compiled.columns(), vec!["entry__authors", "entries"]);
    }

    #[test]
    fn test_annotation_conflicting_with_field() {
        let mut query = Query::new("Entry");
        query.annotations.push(("headline".into(), lower(Expression::f("headline"))));
        assert!(matches!(compile(&query), Err(OrmError::ValueError(_))));
    }

    #[test]
    fn test_outer_ref_requires_subquery() {
        let mut query = Query::new("Entry");
        query.add_filter(Q::new("rating", OuterRef::new("rating")), false);
        assert!(matches!(compile(&query), Err(OrmError::ValueError(_))));

        let mut inner = Query::new("Entry");
        inner.add_filter(Q::new("blog", OuterRef::new("pk")), false);
        let mut outer = Query::new("Blog");
        outer
            .annotations
            .push(("latest".into(), Expression::Subquery(Box::new(inner))));
        assert!(compile(&outer).is_ok());
    }

    #[test]
    fn test_default_ordering_applies() {
        let compiled = compile(&Query::new("Entry")).unwrap();
        assert_eq!(compiled.order_by.len(), 1);
        assert!(compiled.order_by[0].1.descending);
        let mut query = Query::new("Entry");
        query.reversed = true;
        let compiled = compile(&query).unwrap();
        assert!(!compiled.order_by[0].1.descending);
    }

    #[test]
    fn test_func_arity() {
        let mut query = Query::new("Entry");
        query.annotations.push((
            "c".into(),
            crate::query::expressions::functions::coalesce(vec![Expression::f("rating")]),
        ));
        assert!(matches!(compile(&query), Err(OrmError::TypeError(_))));
    }
}
