//! Model schemas, index descriptors, and the catalog of registered models.
//!
//! A [`ModelSchema`] is the plain configuration struct that stands in for a
//! Django model class and its `class Meta`: the field list, default
//! ordering, indexes, the field used by `__str__`, and the inheritance kind.
//! Schemas are registered with a [`Catalog`], which resolves inherited
//! fields, relation targets, reverse relations, and many-to-many junctions.
//!
//! # Examples
//!
//! ```
//! use memorm_db::fields::{FieldDef, FieldType, OnDelete};
//! use memorm_db::model::{Catalog, Index, ModelSchema};
//!
//! let mut catalog = Catalog::new();
//! catalog
//!     .register(
//!         ModelSchema::new("Blog")
//!             .field(FieldDef::new("name", FieldType::CharField).max_length(100))
//!             .display_field("name"),
//!     )
//!     .unwrap();
//! let entry = catalog
//!     .register(
//!         ModelSchema::new("Entry")
//!             .field(FieldDef::foreign_key("blog", "Blog", OnDelete::Cascade))
//!             .field(FieldDef::new("headline", FieldType::CharField))
//!             .index(Index::new(["blog", "-headline"])),
//!     )
//!     .unwrap();
//! assert_eq!(entry.pk_name(), "id");
//! assert!(catalog.reverse_relation("blog", "entry").is_some());
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use memorm_core::{OrmError, OrmResult};

use crate::fields::{FieldDef, FieldType, OnDelete};
use crate::query::expressions::Expression;
use crate::query::lookups::Q;

/// Maximum length of an index name.
pub const MAX_INDEX_NAME_LENGTH: usize = 30;

/// The inheritance kind of a model.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum InheritanceType {
    /// A concrete model with its own table.
    #[default]
    None,
    /// A proxy: same table and fields as the named parent, different
    /// behaviour (managers, ordering, display).
    Proxy(String),
    /// Multi-table inheritance: the child has its own table holding the
    /// parent's columns plus its own, and every child row has a parent row
    /// with the same primary key.
    MultiTable(String),
}

/// The schema of a model, equivalent to a Django model class plus its
/// `class Meta` options.
#[derive(Debug, Clone)]
pub struct ModelSchema {
    /// The object name of the model (e.g., "Entry").
    pub name: String,
    /// The table the rows live in. Proxies share their parent's table.
    pub db_table: String,
    /// Field definitions, including inherited ones once registered.
    pub fields: Vec<FieldDef>,
    /// Declarative index metadata.
    pub indexes: Vec<Index>,
    /// Default ordering, in `order_by` syntax (`"-pub_date"`).
    pub ordering: Vec<String>,
    /// The field rendered by `Display` (Django's `__str__`).
    pub display_field: Option<String>,
    /// The inheritance kind.
    pub inheritance: InheritanceType,
}

impl ModelSchema {
    /// Creates a schema with no fields. The table is named after the
    /// lowercased model name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            db_table: name.to_lowercase(),
            name,
            fields: Vec::new(),
            indexes: Vec::new(),
            ordering: Vec::new(),
            display_field: None,
            inheritance: InheritanceType::None,
        }
    }

    /// Adds a field.
    #[must_use]
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Adds an index.
    #[must_use]
    pub fn index(mut self, index: Index) -> Self {
        self.indexes.push(index);
        self
    }

    /// Sets the default ordering.
    #[must_use]
    pub fn ordering<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ordering = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the field used when displaying instances.
    #[must_use]
    pub fn display_field(mut self, field: impl Into<String>) -> Self {
        self.display_field = Some(field.into());
        self
    }

    /// Overrides the table name.
    #[must_use]
    pub fn db_table(mut self, table: impl Into<String>) -> Self {
        self.db_table = table.into();
        self
    }

    /// Declares this model a proxy of `parent`.
    #[must_use]
    pub fn proxy_of(mut self, parent: impl Into<String>) -> Self {
        self.inheritance = InheritanceType::Proxy(parent.into());
        self
    }

    /// Declares this model a multi-table child of `parent`.
    #[must_use]
    pub fn inherits(mut self, parent: impl Into<String>) -> Self {
        self.inheritance = InheritanceType::MultiTable(parent.into());
        self
    }

    /// The lowercased model name used for lookups and reverse relations.
    pub fn model_name(&self) -> String {
        self.name.to_lowercase()
    }

    /// Returns the field with the given name.
    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Returns the foreign key whose raw-key name (`blog_id`) is `attname`.
    pub fn field_by_attname(&self, attname: &str) -> Option<&FieldDef> {
        self.fields
            .iter()
            .find(|f| matches!(f.field_type, FieldType::ForeignKey { .. }) && f.attname() == attname)
    }

    /// The fields stored as columns, in column order (many-to-many fields
    /// have no column).
    pub fn columns(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| !f.is_many_to_many())
    }

    /// The column names, in column order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns().map(|f| f.name.clone()).collect()
    }

    /// The position of a field among the columns.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns().position(|f| f.name == name)
    }

    /// The primary key field.
    pub fn pk_field(&self) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.primary_key)
    }

    /// The name of the primary key field (`"id"` unless declared otherwise).
    pub fn pk_name(&self) -> &str {
        self.pk_field().map_or("id", |f| f.name.as_str())
    }

    /// The position of the primary key among the columns.
    pub fn pk_index(&self) -> usize {
        self.columns().position(|f| f.primary_key).unwrap_or(0)
    }

    /// Returns `true` for proxy models.
    pub const fn is_proxy(&self) -> bool {
        matches!(self.inheritance, InheritanceType::Proxy(_))
    }
}

// ============================================================================
// Indexes
// ============================================================================

/// The access method of an index. Metadata only; the in-memory store does
/// not build indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum IndexType {
    /// Standard B-tree index.
    #[default]
    BTree,
    /// Hash index.
    Hash,
    /// Generalized Inverted Index, for documents and arrays.
    Gin,
    /// Generalized Search Tree.
    Gist,
    /// Block Range Index.
    Brin,
}

/// One field of an index, with its direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexField {
    /// The field name.
    pub name: String,
    /// Whether the field is indexed in descending order.
    pub descending: bool,
}

impl IndexField {
    /// Parses `"-field"` syntax.
    pub fn parse(spec: &str) -> Self {
        spec.strip_prefix('-').map_or_else(
            || Self {
                name: spec.to_string(),
                descending: false,
            },
            |name| Self {
                name: name.to_string(),
                descending: true,
            },
        )
    }
}

/// A declarative index descriptor, the equivalent of `models.Index`.
///
/// Indexes are validated when their model is registered but are never used
/// for query planning.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Index {
    /// Indexed fields with direction.
    pub fields: Vec<IndexField>,
    /// Indexed expressions (functional index).
    pub expressions: Vec<Expression>,
    /// The index name.
    pub name: Option<String>,
    /// Partial-index condition.
    pub condition: Option<Q>,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
    /// Storage tablespace hint.
    pub db_tablespace: Option<String>,
    /// Operator classes, one per field.
    pub opclasses: Vec<String>,
    /// Access method.
    pub index_type: IndexType,
}

impl Index {
    /// An index over fields given in `"-field"` syntax.
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            fields: fields
                .into_iter()
                .map(|f| IndexField::parse(f.as_ref()))
                .collect(),
            ..Self::default()
        }
    }

    /// A functional index over expressions (e.g. `Lower("username")`).
    pub fn on_expressions(expressions: Vec<Expression>) -> Self {
        Self {
            expressions,
            ..Self::default()
        }
    }

    /// Sets the index name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Makes this a partial index.
    #[must_use]
    pub fn condition(mut self, condition: impl Into<Q>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Marks the index unique.
    #[must_use]
    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Sets the tablespace hint.
    #[must_use]
    pub fn tablespace(mut self, tablespace: impl Into<String>) -> Self {
        self.db_tablespace = Some(tablespace.into());
        self
    }

    /// Sets operator classes.
    #[must_use]
    pub fn opclasses<I, S>(mut self, opclasses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.opclasses = opclasses.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the access method.
    #[must_use]
    pub const fn using(mut self, index_type: IndexType) -> Self {
        self.index_type = index_type;
        self
    }

    /// Checks the descriptor against a model's fields.
    pub fn validate(&self, schema: &ModelSchema) -> OrmResult<()> {
        if self.fields.is_empty() && self.expressions.is_empty() {
            return Err(OrmError::ValueError(
                "At least one field or expression is required to define an index.".into(),
            ));
        }
        if !self.fields.is_empty() && !self.expressions.is_empty() {
            return Err(OrmError::ValueError(
                "Index.fields and expressions are mutually exclusive.".into(),
            ));
        }
        if self.name.is_none() {
            let reason = if !self.expressions.is_empty() {
                Some("expressions")
            } else if self.condition.is_some() {
                Some("a condition")
            } else if !self.opclasses.is_empty() {
                Some("opclasses")
            } else {
                None
            };
            if let Some(reason) = reason {
                return Err(OrmError::ValueError(format!(
                    "An index must be named to use {reason}."
                )));
            }
        }
        if let Some(name) = &self.name {
            if name.chars().count() > MAX_INDEX_NAME_LENGTH {
                return Err(OrmError::ValueError(format!(
                    "Index names cannot be longer than {MAX_INDEX_NAME_LENGTH} characters."
                )));
            }
        }
        if !self.opclasses.is_empty() && self.opclasses.len() != self.fields.len() {
            return Err(OrmError::ValueError(
                "Index.fields and Index.opclasses must have the same number of elements.".into(),
            ));
        }

        let known = |name: &str| {
            name == "pk" || schema.get_field(name).is_some() || schema.field_by_attname(name).is_some()
        };
        let mut referenced: Vec<&str> = self.fields.iter().map(|f| f.name.as_str()).collect();
        for expr in &self.expressions {
            collect_field_refs(expr, &mut referenced);
        }
        if let Some(condition) = &self.condition {
            for (path, operand) in condition.leaves() {
                referenced.push(first_segment(path));
                collect_field_refs(operand, &mut referenced);
            }
        }
        match referenced.into_iter().find(|name| !known(name)) {
            Some(missing) => Err(OrmError::FieldError(format!(
                "'{}' index refers to the nonexistent field '{missing}'.",
                schema.name
            ))),
            None => Ok(()),
        }
    }

    /// The index name, or a generated one (`<table>_<fields>_idx`, cut to
    /// the maximum length).
    pub fn effective_name(&self, schema: &ModelSchema) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        let fields: Vec<&str> = self.fields.iter().map(|f| f.name.as_str()).collect();
        let mut name = format!("{}_{}", schema.db_table, fields.join("_"));
        name.truncate(MAX_INDEX_NAME_LENGTH - 4);
        name.push_str("_idx");
        name
    }
}

fn first_segment(path: &str) -> &str {
    path.split("__").next().unwrap_or(path)
}

fn collect_field_refs<'a>(expr: &'a Expression, out: &mut Vec<&'a str>) {
    match expr {
        Expression::F(path) | Expression::KeyText(path) => out.push(first_segment(path)),
        Expression::Func { args, .. } => {
            for arg in args {
                collect_field_refs(arg, out);
            }
        }
        Expression::Aggregate { field, .. } => collect_field_refs(field, out),
        Expression::Case { whens, default } => {
            for when in whens {
                collect_field_refs(&when.then, out);
            }
            if let Some(default) = default {
                collect_field_refs(default, out);
            }
        }
        Expression::Add(l, r)
        | Expression::Sub(l, r)
        | Expression::Mul(l, r)
        | Expression::Div(l, r) => {
            collect_field_refs(l, out);
            collect_field_refs(r, out);
        }
        Expression::Value(_)
        | Expression::OuterRef(_)
        | Expression::Subquery(_)
        | Expression::Exists { .. } => {}
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Index:")?;
        if !self.fields.is_empty() {
            let fields: Vec<String> = self
                .fields
                .iter()
                .map(|field| {
                    let sign = if field.descending { "-" } else { "" };
                    format!("'{sign}{}'", field.name)
                })
                .collect();
            write!(f, " fields=[{}]", fields.join(", "))?;
        }
        if !self.expressions.is_empty() {
            write!(f, " expressions={}", self.expressions.len())?;
        }
        if let Some(name) = &self.name {
            write!(f, " name='{name}'")?;
        }
        if self.condition.is_some() {
            write!(f, " condition=partial")?;
        }
        if let Some(ts) = &self.db_tablespace {
            write!(f, " db_tablespace='{ts}'")?;
        }
        if !self.opclasses.is_empty() {
            let ops: Vec<String> = self.opclasses.iter().map(|o| format!("'{o}'")).collect();
            write!(f, " opclasses=[{}]", ops.join(", "))?;
        }
        if self.unique {
            write!(f, " unique")?;
        }
        write!(f, ">")
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// How a reverse relation reaches its source rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReverseKind {
    /// A foreign key column on the source table.
    ForeignKey {
        /// Column index of the key on the source schema.
        column: usize,
        /// The delete behaviour of the key.
        on_delete: OnDelete,
    },
    /// A many-to-many junction, traversed from the target side.
    ManyToMany {
        /// The junction key.
        junction: String,
    },
}

/// A relation seen from its target: `blog.entry_set`, or the query name
/// `entry` in `Blog.objects.filter(entry__headline=...)`.
#[derive(Debug, Clone)]
pub struct ReverseRelation {
    /// The name used in query paths (`related_name`, else the source model
    /// name).
    pub name: String,
    /// The name of the related manager (`related_name`, else `<model>_set`).
    pub accessor: String,
    /// The model declaring the relation.
    pub source: Arc<ModelSchema>,
    /// The declaring field.
    pub field: String,
    /// How to reach source rows.
    pub kind: ReverseKind,
}

/// The implicit table of a many-to-many relation, holding
/// `(source pk, target pk)` pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Junction {
    /// Storage key (`<source table>_<field>`).
    pub key: String,
    /// The label used in deletion counts (`Entry_authors`).
    pub label: String,
    /// Table of the declaring model.
    pub source_table: String,
    /// Table of the target model.
    pub target_table: String,
}

/// The registry of model schemas and the relations between them.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    models: BTreeMap<String, Arc<ModelSchema>>,
    reverse: HashMap<String, Vec<ReverseRelation>>,
    junctions: BTreeMap<String, Junction>,
    junction_for: HashMap<(String, String), String>,
}

impl Catalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a schema, resolving inheritance, relation targets, reverse
    /// relations, and junctions. Returns the resolved schema.
    pub fn register(&mut self, schema: ModelSchema) -> OrmResult<Arc<ModelSchema>> {
        let key = schema.model_name();
        if self.models.contains_key(&key) {
            return Err(OrmError::IntegrityError(format!(
                "Model '{}' is already registered.",
                schema.name
            )));
        }
        let own_fields = schema.fields.clone();
        let mut resolved = self.resolve_inheritance(schema)?;

        let mut seen = std::collections::HashSet::new();
        for field in &resolved.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(OrmError::ValueError(format!(
                    "Field '{}' is declared more than once on '{}'.",
                    field.name, resolved.name
                )));
            }
        }

        for field in &mut resolved.fields {
            let target_name = match &field.field_type {
                FieldType::ForeignKey { to, .. } | FieldType::ManyToManyField { to, .. } => {
                    to.clone()
                }
                _ => continue,
            };
            let target = if target_name == "self" || target_name.to_lowercase() == key {
                key.clone()
            } else {
                self.models
                    .get(&target_name.to_lowercase())
                    .map(|m| m.model_name())
                    .ok_or_else(|| {
                        OrmError::IntegrityError(format!(
                            "Field '{}.{}' refers to unregistered model '{target_name}'.",
                            resolved.name, field.name
                        ))
                    })?
            };
            if let FieldType::ForeignKey { on_delete, .. } = &field.field_type {
                if *on_delete == OnDelete::SetNull && !field.null {
                    return Err(OrmError::ValueError(format!(
                        "Field '{}.{}' specifies on_delete=SET_NULL, but cannot be null.",
                        resolved.name, field.name
                    )));
                }
            }
            match &mut field.field_type {
                FieldType::ForeignKey { to, .. } | FieldType::ManyToManyField { to, .. } => {
                    *to = target;
                }
                _ => {}
            }
        }

        if let Some(display) = &resolved.display_field {
            if resolved.get_field(display).is_none() {
                return Err(OrmError::FieldError(format!(
                    "display field '{display}' is not a field of '{}'.",
                    resolved.name
                )));
            }
        }
        for index in &resolved.indexes {
            index.validate(&resolved)?;
        }

        let resolved = Arc::new(resolved);
        self.models.insert(key.clone(), Arc::clone(&resolved));
        self.link_relations(&resolved, &own_fields);
        tracing::debug!(model = %resolved.name, table = %resolved.db_table, "Registered model");
        Ok(resolved)
    }

    fn resolve_inheritance(&self, mut schema: ModelSchema) -> OrmResult<ModelSchema> {
        match schema.inheritance.clone() {
            InheritanceType::None => {
                if schema.pk_field().is_none() {
                    schema
                        .fields
                        .insert(0, FieldDef::new("id", FieldType::AutoField).primary_key());
                }
            }
            InheritanceType::Proxy(parent) => {
                let parent = self.get(&parent)?;
                if !schema.fields.is_empty() {
                    return Err(OrmError::ValueError(format!(
                        "Proxy model '{}' contains model fields.",
                        schema.name
                    )));
                }
                schema.fields.clone_from(&parent.fields);
                schema.db_table.clone_from(&parent.db_table);
                if schema.ordering.is_empty() {
                    schema.ordering.clone_from(&parent.ordering);
                }
                if schema.display_field.is_none() {
                    schema.display_field.clone_from(&parent.display_field);
                }
            }
            InheritanceType::MultiTable(parent) => {
                let parent = self.get(&parent)?;
                if let Some(clash) = schema
                    .fields
                    .iter()
                    .find(|f| f.primary_key || parent.get_field(&f.name).is_some())
                {
                    return Err(OrmError::ValueError(format!(
                        "Local field '{}' in class '{}' clashes with field of the same name from base class '{}'.",
                        clash.name, schema.name, parent.name
                    )));
                }
                let mut fields = parent.fields.clone();
                fields.append(&mut schema.fields);
                schema.fields = fields;
                if schema.ordering.is_empty() {
                    schema.ordering.clone_from(&parent.ordering);
                }
                if schema.display_field.is_none() {
                    schema.display_field.clone_from(&parent.display_field);
                }
            }
        }
        Ok(schema)
    }

    fn link_relations(&mut self, schema: &Arc<ModelSchema>, own_fields: &[FieldDef]) {
        let model_name = schema.model_name();
        // Inherited many-to-many fields share the declaring model's junction.
        let parent = match &schema.inheritance {
            InheritanceType::MultiTable(parent) | InheritanceType::Proxy(parent) => {
                self.get(parent).ok()
            }
            InheritanceType::None => None,
        };
        if let Some(parent) = parent {
            let parent_name = parent.model_name();
            let inherited: Vec<(String, String)> = self
                .junction_for
                .iter()
                .filter(|((model, _), _)| *model == parent_name)
                .map(|((_, field), key)| (field.clone(), key.clone()))
                .collect();
            for (field, key) in inherited {
                self.junction_for.insert((model_name.clone(), field), key);
            }
        }
        if schema.is_proxy() {
            return;
        }
        for field in &schema.fields {
            if !own_fields.iter().any(|own| own.name == field.name) {
                continue;
            }
            let (target, related_name) = match &field.field_type {
                FieldType::ForeignKey {
                    to, related_name, ..
                }
                | FieldType::ManyToManyField {
                    to, related_name, ..
                } => (to.clone(), related_name.clone()),
                _ => continue,
            };
            let Some(target) = self.models.get(&target).cloned() else {
                continue;
            };
            let kind = match &field.field_type {
                FieldType::ForeignKey { on_delete, .. } => ReverseKind::ForeignKey {
                    column: schema.column_index(&field.name).unwrap_or(0),
                    on_delete: *on_delete,
                },
                _ => {
                    let key = format!("{}_{}", schema.db_table, field.name);
                    self.junctions.insert(
                        key.clone(),
                        Junction {
                            key: key.clone(),
                            label: format!("{}_{}", schema.name, field.name),
                            source_table: schema.db_table.clone(),
                            target_table: target.db_table.clone(),
                        },
                    );
                    self.junction_for
                        .insert((model_name.clone(), field.name.clone()), key.clone());
                    ReverseKind::ManyToMany { junction: key }
                }
            };
            self.reverse
                .entry(target.db_table.clone())
                .or_default()
                .push(ReverseRelation {
                    name: related_name.clone().unwrap_or_else(|| model_name.clone()),
                    accessor: related_name.unwrap_or_else(|| format!("{model_name}_set")),
                    source: Arc::clone(schema),
                    field: field.name.clone(),
                    kind,
                });
        }
    }

    /// Looks up a model by name (case-insensitive).
    pub fn get(&self, name: &str) -> OrmResult<Arc<ModelSchema>> {
        self.models
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| OrmError::FieldError(format!("No model named '{name}' is registered.")))
    }

    /// Returns `true` if a model with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(&name.to_lowercase())
    }

    /// All registered schemas, by model name.
    pub fn schemas(&self) -> impl Iterator<Item = &Arc<ModelSchema>> {
        self.models.values()
    }

    /// The multi-table parent of a schema.
    pub fn parent_of(&self, schema: &ModelSchema) -> Option<Arc<ModelSchema>> {
        match &schema.inheritance {
            InheritanceType::MultiTable(parent) => self.get(parent).ok(),
            _ => None,
        }
    }

    /// The concrete multi-table children of a schema.
    pub fn children_of(&self, schema: &ModelSchema) -> Vec<Arc<ModelSchema>> {
        self.models
            .values()
            .filter(|m| match &m.inheritance {
                InheritanceType::MultiTable(parent) => {
                    self.get(parent).is_ok_and(|p| p.db_table == schema.db_table)
                }
                _ => false,
            })
            .cloned()
            .collect()
    }

    /// The concrete (non-proxy) schema storing a table.
    pub fn concrete_for_table(&self, table: &str) -> Option<Arc<ModelSchema>> {
        self.models
            .values()
            .find(|m| m.db_table == table && !m.is_proxy())
            .cloned()
    }

    /// Reverse relations pointing at a table.
    pub fn reverse_relations(&self, table: &str) -> &[ReverseRelation] {
        self.reverse.get(table).map_or(&[], Vec::as_slice)
    }

    /// The reverse relation with the given query name.
    pub fn reverse_relation(&self, table: &str, name: &str) -> Option<&ReverseRelation> {
        self.reverse_relations(table).iter().find(|r| r.name == name)
    }

    /// The reverse relation whose related-manager name is `accessor`.
    pub fn reverse_accessor(&self, table: &str, accessor: &str) -> Option<&ReverseRelation> {
        self.reverse_relations(table)
            .iter()
            .find(|r| r.accessor == accessor)
    }

    /// The junction backing a model's many-to-many field.
    pub fn junction_for(&self, model: &ModelSchema, field: &str) -> Option<&Junction> {
        self.junction_for
            .get(&(model.model_name(), field.to_string()))
            .and_then(|key| self.junctions.get(key))
    }

    /// Looks up a junction by key.
    pub fn junction(&self, key: &str) -> Option<&Junction> {
        self.junctions.get(key)
    }

    /// All junctions.
    pub fn junctions(&self) -> impl Iterator<Item = &Junction> {
        self.junctions.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::expressions::functions::lower;

    fn blog() -> ModelSchema {
        ModelSchema::new("Blog")
            .field(FieldDef::new("name", FieldType::CharField).max_length(100))
            .field(FieldDef::new("tagline", FieldType::TextField))
            .display_field("name")
    }

    fn book() -> ModelSchema {
        ModelSchema::new("Book")
            .field(FieldDef::new("title", FieldType::CharField))
            .field(FieldDef::new("author", FieldType::CharField))
            .field(FieldDef::new("pages", FieldType::IntegerField))
            .field(FieldDef::new("published_date", FieldType::DateField))
    }

    #[test]
    fn test_register_adds_auto_pk() {
        let mut catalog = Catalog::new();
        let schema = catalog.register(blog()).unwrap();
        assert_eq!(schema.pk_name(), "id");
        assert_eq!(schema.column_names(), vec!["id", "name", "tagline"]);
        assert_eq!(schema.pk_index(), 0);
        assert_eq!(schema.db_table, "blog");
    }

    #[test]
    fn test_register_twice_fails() {
        let mut catalog = Catalog::new();
        catalog.register(blog()).unwrap();
        assert!(matches!(
            catalog.register(blog()),
            Err(OrmError::IntegrityError(_))
        ));
    }

    #[test]
    fn test_unknown_relation_target() {
        let mut catalog = Catalog::new();
        let schema = ModelSchema::new("Entry").field(FieldDef::foreign_key(
            "blog",
            "Blog",
            OnDelete::Cascade,
        ));
        assert!(matches!(
            catalog.register(schema),
            Err(OrmError::IntegrityError(_))
        ));
    }

    #[test]
    fn test_reverse_relations_and_junctions() {
        let mut catalog = Catalog::new();
        catalog.register(blog()).unwrap();
        catalog
            .register(ModelSchema::new("Author").field(FieldDef::new("name", FieldType::CharField)))
            .unwrap();
        let entry = catalog
            .register(
                ModelSchema::new("Entry")
                    .field(FieldDef::foreign_key("blog", "Blog", OnDelete::Cascade))
                    .field(FieldDef::many_to_many("authors", "Author")),
            )
            .unwrap();
        let rel = catalog.reverse_relation("blog", "entry").unwrap();
        assert_eq!(rel.accessor, "entry_set");
        assert!(matches!(rel.kind, ReverseKind::ForeignKey { column: 1, .. }));
        let junction = catalog.junction_for(&entry, "authors").unwrap();
        assert_eq!(junction.label, "Entry_authors");
        assert_eq!(junction.target_table, "author");
        assert!(catalog.reverse_relation("author", "entry").is_some());
        // Many-to-many fields have no column.
        assert_eq!(entry.column_names(), vec!["id", "blog"]);
    }

    #[test]
    fn test_related_name() {
        let mut catalog = Catalog::new();
        catalog.register(blog()).unwrap();
        catalog
            .register(
                ModelSchema::new("Entry").field(
                    FieldDef::foreign_key("blog", "Blog", OnDelete::Cascade)
                        .related_name("entries"),
                ),
            )
            .unwrap();
        let rel = catalog.reverse_relation("blog", "entries").unwrap();
        assert_eq!(rel.accessor, "entries");
    }

    #[test]
    fn test_proxy_shares_table() {
        let mut catalog = Catalog::new();
        catalog.register(blog()).unwrap();
        let proxy = catalog
            .register(ModelSchema::new("BlogProxy").proxy_of("Blog"))
            .unwrap();
        assert_eq!(proxy.db_table, "blog");
        assert_eq!(proxy.fields.len(), 3);
        assert_eq!(proxy.display_field.as_deref(), Some("name"));
    }

    #[test]
    fn test_proxy_with_fields_rejected() {
        let mut catalog = Catalog::new();
        catalog.register(blog()).unwrap();
        let proxy = ModelSchema::new("BlogProxy")
            .proxy_of("Blog")
            .field(FieldDef::new("x", FieldType::IntegerField));
        assert!(matches!(catalog.register(proxy), Err(OrmError::ValueError(_))));
    }

    #[test]
    fn test_multi_table_child() {
        let mut catalog = Catalog::new();
        catalog.register(blog()).unwrap();
        let child = catalog
            .register(
                ModelSchema::new("ThemeBlog")
                    .inherits("Blog")
                    .field(FieldDef::new("theme", FieldType::CharField)),
            )
            .unwrap();
        assert_eq!(child.db_table, "themeblog");
        assert_eq!(child.column_names(), vec!["id", "name", "tagline", "theme"]);
        let parent = catalog.get("blog").unwrap();
        assert_eq!(catalog.children_of(&parent).len(), 1);
        assert_eq!(catalog.parent_of(&child).unwrap().name, "Blog");
    }

    #[test]
    fn test_multi_table_clash() {
        let mut catalog = Catalog::new();
        catalog.register(blog()).unwrap();
        let child = ModelSchema::new("ThemeBlog")
            .inherits("Blog")
            .field(FieldDef::new("name", FieldType::CharField));
        assert!(matches!(catalog.register(child), Err(OrmError::ValueError(_))));
    }

    #[test]
    fn test_set_null_requires_null() {
        let mut catalog = Catalog::new();
        catalog.register(blog()).unwrap();
        let entry = ModelSchema::new("Entry").field(FieldDef::foreign_key(
            "blog",
            "Blog",
            OnDelete::SetNull,
        ));
        assert!(matches!(catalog.register(entry), Err(OrmError::ValueError(_))));
    }

    #[test]
    fn test_index_field_parse() {
        let index = Index::new(["author", "-published_date"]);
        assert_eq!(index.fields[0], IndexField { name: "author".into(), descending: false });
        assert_eq!(
            index.fields[1],
            IndexField { name: "published_date".into(), descending: true }
        );
    }

    #[test]
    fn test_index_validation() {
        let mut catalog = Catalog::new();
        let schema = catalog.register(book()).unwrap();

        assert!(Index::new(["title"]).validate(&schema).is_ok());
        assert!(Index::new(["author", "-published_date"]).validate(&schema).is_ok());
        assert!(Index::new(["title"])
            .named("book_title_large_idx")
            .condition(Q::new("pages__gt", 400))
            .validate(&schema)
            .is_ok());
        assert!(Index::on_expressions(vec![lower(Expression::f("title"))])
            .named("title_lower_idx")
            .validate(&schema)
            .is_ok());
    }

    #[test]
    fn test_index_validation_errors() {
        let mut catalog = Catalog::new();
        let schema = catalog.register(book()).unwrap();

        let missing = Index::new(["isbn"]).validate(&schema);
        assert!(matches!(missing, Err(OrmError::FieldError(_))));

        let too_long = Index::new(["title"])
            .named("an_index_name_that_is_far_too_long")
            .validate(&schema);
        assert!(matches!(too_long, Err(OrmError::ValueError(_))));

        let unnamed_condition = Index::new(["title"])
            .condition(Q::new("pages__gt", 400))
            .validate(&schema);
        assert!(matches!(unnamed_condition, Err(OrmError::ValueError(_))));

        let opclass_mismatch = Index::new(["title", "-pages"])
            .named("custom_index_name")
            .opclasses(["varchar_pattern_ops"])
            .validate(&schema);
        assert!(matches!(opclass_mismatch, Err(OrmError::ValueError(_))));

        let empty = Index::default().validate(&schema);
        assert!(matches!(empty, Err(OrmError::ValueError(_))));

        let mut both = Index::new(["title"]).named("both_idx");
        both.expressions.push(Expression::f("title"));
        assert!(matches!(both.validate(&schema), Err(OrmError::ValueError(_))));

        let unnamed_expr = Index::on_expressions(vec![Expression::f("title")]).validate(&schema);
        assert!(matches!(unnamed_expr, Err(OrmError::ValueError(_))));
    }

    #[test]
    fn test_index_validated_on_register() {
        let mut catalog = Catalog::new();
        let schema = book().index(Index::new(["nope"]));
        assert!(matches!(catalog.register(schema), Err(OrmError::FieldError(_))));
    }

    #[test]
    fn test_index_display_and_name() {
        let mut catalog = Catalog::new();
        let schema = catalog.register(book()).unwrap();
        let index = Index::new(["title", "-pages"])
            .named("custom_index_name")
            .tablespace("fast_indexes")
            .opclasses(["varchar_pattern_ops", "int4_ops"]);
        assert_eq!(
            index.to_string(),
            "<Index: fields=['title', '-pages'] name='custom_index_name' \
             db_tablespace='fast_indexes' opclasses=['varchar_pattern_ops', 'int4_ops']>"
        );
        let generated = Index::new(["published_date", "author"]).effective_name(&schema);
        assert!(generated.ends_with("_idx"));
        assert!(generated.len() <= MAX_INDEX_NAME_LENGTH);
        assert!(generated.starts_with("book_"));
    }

    #[test]
    fn test_index_type_default() {
        let index = Index::new(["title"]).using(IndexType::Gin);
        assert_eq!(index.index_type, IndexType::Gin);
        assert_eq!(Index::new(["title"]).index_type, IndexType::BTree);
    }
}
