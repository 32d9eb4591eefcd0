//! Query execution over the in-memory tables.
//!
//! The executor takes a [`CompiledQuery`](crate::query::compiler) and
//! produces result rows in the same stages a SQL engine would:
//!
//! 1. scan the base table in primary key order;
//! 2. apply each WHERE clause, joining the multi-valued relations it
//!    mentions independently of every other clause (a row that matches
//!    through several related rows appears once per match);
//! 3. join the multi-valued relations needed by annotations, projections,
//!    grouping, and ordering (LEFT JOIN: a row without related rows is kept
//!    with NULLs);
//! 4. group and compute aggregates;
//! 5. apply HAVING clauses, order, project, remove duplicates, and slice.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::query::compiler::{
    expr_uses_aggregate, CClause, CCond, CExpr, CompiledQuery, Grouping, Hop, HopKind, LookupOp,
    OrderBy, ResolvedPath,
};
use crate::query::evaluator;
use crate::query::lookups::LookupKind;
use crate::store::StoreState;
use crate::value::Value;

/// Related row chosen for each multi-valued join prefix (`None` for a LEFT
/// JOIN that found nothing).
type Bindings = BTreeMap<String, Option<i64>>;

#[derive(Debug, Clone)]
struct Candidate {
    pk: i64,
    bindings: Bindings,
}

#[derive(Debug)]
struct Group {
    members: Vec<Candidate>,
    aggregates: Vec<Value>,
}

/// One result row.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct OutputRow {
    /// Primary key of the base row.
    pub pk: i64,
    /// Projected values, or every column for model instances.
    pub values: Vec<Value>,
    /// Annotation values (model instances only).
    pub annotations: Vec<Value>,
}

/// Everything an expression can see while being evaluated for one row.
#[derive(Clone, Copy)]
struct RowCtx<'a> {
    query: &'a CompiledQuery,
    cand: &'a Candidate,
    /// Precomputed aggregate annotation values of the row's group.
    aggregates: Option<&'a [Value]>,
    /// The rows aggregated over.
    group: Option<&'a [Candidate]>,
    /// The row of the enclosing query, for `OuterRef`.
    outer: Option<&'a RowCtx<'a>>,
}

impl<'a> RowCtx<'a> {
    const fn row(query: &'a CompiledQuery, cand: &'a Candidate, outer: Option<&'a RowCtx<'a>>) -> Self {
        Self {
            query,
            cand,
            aggregates: None,
            group: None,
            outer,
        }
    }

    fn of_group(query: &'a CompiledQuery, group: &'a Group, outer: Option<&'a RowCtx<'a>>) -> Self {
        let grouped = !matches!(query.grouping, Grouping::None);
        Self {
            query,
            cand: &group.members[0],
            aggregates: grouped.then_some(group.aggregates.as_slice()),
            group: grouped.then_some(group.members.as_slice()),
            outer,
        }
    }
}

/// Evaluates compiled queries against a consistent snapshot of the store.
pub(crate) struct Executor<'s> {
    state: &'s StoreState,
    reverse_index: RefCell<HashMap<(String, usize), HashMap<i64, Vec<i64>>>>,
}

impl<'s> Executor<'s> {
    pub fn new(state: &'s StoreState) -> Self {
        Self {
            state,
            reverse_index: RefCell::new(HashMap::new()),
        }
    }

    /// Runs a query and returns its rows.
    pub fn run(&self, query: &CompiledQuery) -> Vec<OutputRow> {
        let rows: Vec<OutputRow> = self
            .finished(query, None)
            .into_iter()
            .map(|(_, row)| row)
            .collect();
        tracing::trace!(table = %query.schema.db_table, rows = rows.len(), "query executed");
        rows
    }

    /// Evaluates terminal aggregate expressions over the rows of a query.
    pub fn aggregate(&self, query: &CompiledQuery, exprs: &[CExpr]) -> Vec<Value> {
        let over_groups = !matches!(query.grouping, Grouping::None)
            || query.distinct
            || query.low_mark > 0
            || query.high_mark.is_some();
        if over_groups {
            let groups: Vec<Group> = self
                .finished(query, None)
                .into_iter()
                .map(|(group, _)| group)
                .collect();
            return exprs
                .iter()
                .map(|expr| self.eval_over_groups(expr, query, &groups))
                .collect();
        }

        let candidates = self.filtered(query, None);
        let mut prefixes = Vec::new();
        for expr in exprs {
            collect_expr(expr, query, &mut prefixes);
        }
        let members = self.expand(query, candidates, &sorted(prefixes));
        let anchor = Candidate {
            pk: 0,
            bindings: Bindings::new(),
        };
        let ctx = RowCtx {
            query,
            cand: members.first().unwrap_or(&anchor),
            aggregates: None,
            group: Some(members.as_slice()),
            outer: None,
        };
        exprs.iter().map(|expr| self.eval(expr, &ctx)).collect()
    }

    // ── Pipeline ─────────────────────────────────────────────────────

    /// Base rows that pass every WHERE clause.
    fn filtered(&self, query: &CompiledQuery, outer: Option<&RowCtx<'_>>) -> Vec<Candidate> {
        if query.is_empty {
            return Vec::new();
        }
        let mut candidates: Vec<Candidate> = self
            .state
            .table(&query.schema.db_table)
            .map(|table| {
                table
                    .rows
                    .keys()
                    .map(|pk| Candidate {
                        pk: *pk,
                        bindings: Bindings::new(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        for clause in &query.where_clauses {
            candidates = self.apply_clause(query, clause, candidates, outer);
        }
        candidates
    }

    /// Groups after HAVING and ordering, paired with their projected rows,
    /// after DISTINCT and slicing.
    fn finished(&self, query: &CompiledQuery, outer: Option<&RowCtx<'_>>) -> Vec<(Group, OutputRow)> {
        let candidates = self.filtered(query, outer);
        let candidates = self.expand(query, candidates, &output_prefixes(query));

        let mut groups = self.group(query, candidates, outer);
        if !query.having.is_empty() {
            groups.retain(|group| {
                let ctx = RowCtx::of_group(query, group, outer);
                query
                    .having
                    .iter()
                    .all(|clause| self.test(&clause.cond, &ctx) != clause.negated)
            });
        }
        let groups = self.sort(query, groups, outer);

        let mut rows: Vec<(Group, OutputRow)> = groups
            .into_iter()
            .map(|group| {
                let row = self.project(query, &group, outer);
                (group, row)
            })
            .collect();

        if query.distinct {
            let mut seen = HashSet::new();
            rows.retain(|(_, row)| {
                let key: Vec<String> = row
                    .values
                    .iter()
                    .chain(&row.annotations)
                    .map(group_key)
                    .collect();
                seen.insert(key)
            });
        }

        let high = query.high_mark.unwrap_or(usize::MAX);
        rows.into_iter()
            .skip(query.low_mark)
            .take(high.saturating_sub(query.low_mark))
            .collect()
    }

    fn apply_clause(
        &self,
        query: &CompiledQuery,
        clause: &CClause,
        candidates: Vec<Candidate>,
        outer: Option<&RowCtx<'_>>,
    ) -> Vec<Candidate> {
        let mut prefixes = Vec::new();
        collect_cond(&clause.cond, query, &mut prefixes);
        let prefixes = sorted(prefixes);

        let mut out = Vec::with_capacity(candidates.len());
        for cand in candidates {
            let combos = self.combinations(query, cand.pk, &prefixes, Bindings::new());
            if clause.negated {
                let matched = combos.into_iter().any(|bindings| {
                    let local = Candidate {
                        pk: cand.pk,
                        bindings,
                    };
                    self.test(&clause.cond, &RowCtx::row(query, &local, outer))
                });
                if !matched {
                    out.push(cand);
                }
                continue;
            }
            for bindings in combos {
                let local = Candidate {
                    pk: cand.pk,
                    bindings,
                };
                if self.test(&clause.cond, &RowCtx::row(query, &local, outer)) {
                    let mut merged = cand.clone();
                    for (prefix, related) in local.bindings {
                        merged.bindings.entry(prefix).or_insert(related);
                    }
                    out.push(merged);
                }
            }
        }
        out
    }

    /// Joins the given prefixes that are not bound yet.
    fn expand(&self, query: &CompiledQuery, candidates: Vec<Candidate>, prefixes: &[Vec<Hop>]) -> Vec<Candidate> {
        if prefixes.is_empty() {
            return candidates;
        }
        let mut out = Vec::with_capacity(candidates.len());
        for cand in candidates {
            let pk = cand.pk;
            for bindings in self.combinations(query, pk, prefixes, cand.bindings) {
                out.push(Candidate { pk, bindings });
            }
        }
        out
    }

    /// Every combination of related rows for the prefixes, starting from
    /// `start`. Prefixes are expected parent-first.
    fn combinations(&self, query: &CompiledQuery, pk: i64, prefixes: &[Vec<Hop>], start: Bindings) -> Vec<Bindings> {
        let mut result = vec![start];
        for hops in prefixes {
            let Some((last, parents)) = hops.split_last() else {
                continue;
            };
            let mut next = Vec::with_capacity(result.len());
            for bindings in result {
                if bindings.contains_key(&last.prefix) {
                    next.push(bindings);
                    continue;
                }
                let related = self
                    .walk(&query.schema.db_table, pk, parents, &bindings)
                    .map(|parent| self.related(last, parent))
                    .unwrap_or_default();
                if related.is_empty() {
                    let mut bound = bindings;
                    bound.insert(last.prefix.clone(), None);
                    next.push(bound);
                } else {
                    for target in related {
                        let mut bound = bindings.clone();
                        bound.insert(last.prefix.clone(), Some(target));
                        next.push(bound);
                    }
                }
            }
            result = next;
        }
        result
    }

    fn group(&self, query: &CompiledQuery, candidates: Vec<Candidate>, outer: Option<&RowCtx<'_>>) -> Vec<Group> {
        if matches!(query.grouping, Grouping::None) {
            return candidates
                .into_iter()
                .map(|cand| Group {
                    members: vec![cand],
                    aggregates: Vec::new(),
                })
                .collect();
        }

        let is_aggregate = |idx: usize| query.annotations.get(idx).is_some_and(|a| a.aggregate);
        let mut groups: Vec<Group> = Vec::new();
        let mut index: HashMap<Vec<String>, usize> = HashMap::new();
        for cand in candidates {
            let key: Vec<String> = {
                let ctx = RowCtx::row(query, &cand, outer);
                match &query.grouping {
                    Grouping::ByValues(exprs) => exprs
                        .iter()
                        .map(|e| group_key(&self.eval(e, &ctx)))
                        .collect(),
                    _ => std::iter::once(cand.pk.to_string())
                        .chain(
                            query
                                .select
                                .iter()
                                .flatten()
                                .filter(|(_, e)| !expr_uses_aggregate(e, &is_aggregate))
                                .map(|(_, e)| group_key(&self.eval(e, &ctx))),
                        )
                        .collect(),
                }
            };
            if let Some(&i) = index.get(&key) {
                groups[i].members.push(cand);
            } else {
                index.insert(key, groups.len());
                groups.push(Group {
                    members: vec![cand],
                    aggregates: Vec::new(),
                });
            }
        }

        for group in &mut groups {
            let ctx = RowCtx {
                query,
                cand: &group.members[0],
                aggregates: None,
                group: Some(group.members.as_slice()),
                outer,
            };
            let aggregates = query
                .annotations
                .iter()
                .map(|a| {
                    if a.aggregate {
                        self.eval(&a.expr, &ctx)
                    } else {
                        Value::Null
                    }
                })
                .collect();
            group.aggregates = aggregates;
        }
        groups
    }

    fn sort(&self, query: &CompiledQuery, groups: Vec<Group>, outer: Option<&RowCtx<'_>>) -> Vec<Group> {
        if query.order_by.is_empty() {
            return groups;
        }
        let mut keyed: Vec<(Vec<Value>, Group)> = groups
            .into_iter()
            .map(|group| {
                let keys = {
                    let ctx = RowCtx::of_group(query, &group, outer);
                    query
                        .order_by
                        .iter()
                        .map(|(expr, _)| self.eval(expr, &ctx))
                        .collect()
                };
                (keys, group)
            })
            .collect();
        keyed.sort_by(|(a, _), (b, _)| {
            a.iter()
                .zip(b)
                .zip(&query.order_by)
                .map(|((x, y), (_, order))| order_cmp(x, y, order))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        });
        keyed.into_iter().map(|(_, group)| group).collect()
    }

    fn project(&self, query: &CompiledQuery, group: &Group, outer: Option<&RowCtx<'_>>) -> OutputRow {
        let ctx = RowCtx::of_group(query, group, outer);
        let pk = ctx.cand.pk;
        match &query.select {
            Some(columns) => OutputRow {
                pk,
                values: columns
                    .iter()
                    .map(|(_, expr)| {
                        let value = self.eval(expr, &ctx);
                        if is_key_path(expr, query) {
                            decode_key_value(value)
                        } else {
                            value
                        }
                    })
                    .collect(),
                annotations: Vec::new(),
            },
            None => OutputRow {
                pk,
                values: self
                    .state
                    .row(&query.schema.db_table, pk)
                    .cloned()
                    .unwrap_or_default(),
                annotations: (0..query.annotations.len())
                    .map(|idx| self.annotation_value(idx, &ctx))
                    .collect(),
            },
        }
    }

    // ── Relations ────────────────────────────────────────────────────

    /// Follows hops from a base row; returns the pk reached.
    fn walk(&self, base_table: &str, pk: i64, hops: &[Hop], bindings: &Bindings) -> Option<i64> {
        let mut current = Some(pk);
        let mut table = base_table;
        for hop in hops {
            current = match &hop.kind {
                HopKind::Forward { column } => current
                    .and_then(|p| self.state.cell(table, p, *column))
                    .and_then(Value::as_int),
                HopKind::ManyToMany { .. } | HopKind::ReverseFk { .. } => {
                    bindings.get(&hop.prefix).copied().flatten()
                }
            };
            table = &hop.table;
        }
        current
    }

    /// The rows reached by a multi-valued hop from `parent`, in pk order.
    fn related(&self, hop: &Hop, parent: i64) -> Vec<i64> {
        match &hop.kind {
            HopKind::Forward { .. } => Vec::new(),
            HopKind::ManyToMany { junction, reverse } => {
                let mut targets: Vec<i64> = self
                    .state
                    .junction_rows(junction)
                    .iter()
                    .filter_map(|&(source, target)| {
                        if *reverse {
                            (target == parent).then_some(source)
                        } else {
                            (source == parent).then_some(target)
                        }
                    })
                    .collect();
                targets.sort_unstable();
                targets
            }
            HopKind::ReverseFk { source_table, column } => {
                let mut index = self.reverse_index.borrow_mut();
                let by_target = index
                    .entry((source_table.clone(), *column))
                    .or_insert_with(|| {
                        let mut map: HashMap<i64, Vec<i64>> = HashMap::new();
                        if let Some(table) = self.state.table(source_table) {
                            for (pk, row) in &table.rows {
                                if let Some(target) = row.get(*column).and_then(Value::as_int) {
                                    map.entry(target).or_default().push(*pk);
                                }
                            }
                        }
                        map
                    });
                by_target.get(&parent).cloned().unwrap_or_default()
            }
        }
    }

    // ── Evaluation ───────────────────────────────────────────────────

    fn column(&self, ctx: &RowCtx<'_>, path: &ResolvedPath) -> Value {
        let base = ctx.query.schema.db_table.as_str();
        let Some(pk) = self.walk(base, ctx.cand.pk, &path.hops, &ctx.cand.bindings) else {
            return Value::Null;
        };
        let table = path.hops.last().map_or(base, |hop| hop.table.as_str());
        self.state
            .cell(table, pk, path.column)
            .cloned()
            .unwrap_or(Value::Null)
    }

    fn annotation_value(&self, idx: usize, ctx: &RowCtx<'_>) -> Value {
        let Some(annotation) = ctx.query.annotations.get(idx) else {
            return Value::Null;
        };
        match ctx.aggregates {
            Some(aggregates) if annotation.aggregate => {
                aggregates.get(idx).cloned().unwrap_or(Value::Null)
            }
            _ => self.eval(&annotation.expr, ctx),
        }
    }

    fn eval(&self, expr: &CExpr, ctx: &RowCtx<'_>) -> Value {
        match expr {
            CExpr::Const(value) => value.clone(),
            CExpr::Col(path) => self.column(ctx, path),
            CExpr::KeyPath(doc, keys) => match self.eval(doc, ctx) {
                Value::Json(doc) => evaluator::key_lookup(&doc, keys)
                    .map_or(Value::Null, |found| Value::Json(found.clone())),
                _ => Value::Null,
            },
            CExpr::KeyText(inner) => match self.eval(inner, ctx) {
                Value::Json(serde_json::Value::String(s)) => Value::String(s),
                Value::Json(serde_json::Value::Null) => Value::Null,
                Value::Json(other) => Value::String(other.to_string()),
                other => other,
            },
            CExpr::Outer(inner) => ctx.outer.map_or(Value::Null, |outer| self.eval(inner, outer)),
            CExpr::Transform(transform, inner) => transform.apply(&self.eval(inner, ctx)),
            CExpr::Func(func, args) => {
                let args: Vec<Value> = args.iter().map(|a| self.eval(a, ctx)).collect();
                func.apply(&args)
            }
            CExpr::Agg {
                func,
                arg,
                distinct,
                filter,
            } => {
                let members = ctx.group.unwrap_or(std::slice::from_ref(ctx.cand));
                let values = members
                    .iter()
                    .filter_map(|member| {
                        let member_ctx = RowCtx::row(ctx.query, member, ctx.outer);
                        if filter
                            .as_ref()
                            .is_some_and(|f| !self.test(f, &member_ctx))
                        {
                            return None;
                        }
                        Some(self.eval(arg, &member_ctx))
                    })
                    .collect();
                evaluator::aggregate(*func, values, *distinct)
            }
            CExpr::AnnotationRef(idx) => self.annotation_value(*idx, ctx),
            CExpr::Case { whens, default } => whens
                .iter()
                .find(|(cond, _)| self.test(cond, ctx))
                .map_or_else(|| self.eval(default, ctx), |(_, then)| self.eval(then, ctx)),
            CExpr::Subquery(query) => self
                .finished(query, Some(ctx))
                .into_iter()
                .next()
                .map_or(Value::Null, |(_, row)| first_column(query, row)),
            CExpr::SubqueryList(query) => Value::List(
                self.finished(query, Some(ctx))
                    .into_iter()
                    .map(|(_, row)| first_column(query, row))
                    .collect(),
            ),
            CExpr::Exists { query, negated } => {
                Value::Bool(self.finished(query, Some(ctx)).is_empty() == *negated)
            }
            CExpr::Arith(op, l, r) => evaluator::arith(*op, &self.eval(l, ctx), &self.eval(r, ctx)),
        }
    }

    /// Evaluates a terminal aggregate over already grouped rows.
    fn eval_over_groups(&self, expr: &CExpr, query: &CompiledQuery, groups: &[Group]) -> Value {
        match expr {
            CExpr::Agg {
                func,
                arg,
                distinct,
                filter,
            } => {
                let values = groups
                    .iter()
                    .filter_map(|group| {
                        let ctx = RowCtx::of_group(query, group, None);
                        if filter.as_ref().is_some_and(|f| !self.test(f, &ctx)) {
                            return None;
                        }
                        Some(self.eval(arg, &ctx))
                    })
                    .collect();
                evaluator::aggregate(*func, values, *distinct)
            }
            CExpr::Func(func, args) => {
                let args: Vec<Value> = args
                    .iter()
                    .map(|a| self.eval_over_groups(a, query, groups))
                    .collect();
                func.apply(&args)
            }
            CExpr::Transform(transform, inner) => {
                transform.apply(&self.eval_over_groups(inner, query, groups))
            }
            CExpr::Arith(op, l, r) => evaluator::arith(
                *op,
                &self.eval_over_groups(l, query, groups),
                &self.eval_over_groups(r, query, groups),
            ),
            CExpr::Const(value) => value.clone(),
            _ => Value::Null,
        }
    }

    fn test(&self, cond: &CCond, ctx: &RowCtx<'_>) -> bool {
        match cond {
            CCond::And(children) => children.iter().all(|c| self.test(c, ctx)),
            CCond::Or(children) => children.iter().any(|c| self.test(c, ctx)),
            CCond::Not(inner) => !self.test(inner, ctx),
            CCond::Lookup { lhs, op, rhs } => {
                let rhs = self.eval(rhs, ctx);
                if let CExpr::KeyPath(doc, keys) = lhs {
                    // A missing key only satisfies `isnull=True`, and only in
                    // an object or array. NULL, JSON null, and scalar
                    // documents satisfy nothing.
                    return match self.eval(doc, ctx) {
                        Value::Json(doc) if doc.is_object() || doc.is_array() => {
                            match evaluator::key_lookup(&doc, keys) {
                                Some(found) => {
                                    evaluator::matches(op, &Value::Json(found.clone()), &rhs)
                                }
                                None => {
                                    matches!(op, LookupOp::Builtin(LookupKind::IsNull))
                                        && rhs == Value::Bool(true)
                                }
                            }
                        }
                        _ => false,
                    };
                }
                evaluator::matches(op, &self.eval(lhs, ctx), &rhs)
            }
        }
    }
}

fn first_column(query: &CompiledQuery, row: OutputRow) -> Value {
    if query.select.is_some() {
        row.values.into_iter().next().unwrap_or(Value::Null)
    } else {
        Value::Int(row.pk)
    }
}

/// Sort comparison: NULL sorts first ascending and last descending unless
/// the ordering says otherwise.
fn order_cmp(x: &Value, y: &Value, order: &OrderBy) -> Ordering {
    let nulls_first = order.nulls_first.unwrap_or(!order.descending);
    match (x.is_null(), y.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) if nulls_first => Ordering::Less,
        (true, false) => Ordering::Greater,
        (false, true) if nulls_first => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => {
            let ordering = x.sort_cmp(y);
            if order.descending {
                ordering.reverse()
            } else {
                ordering
            }
        }
    }
}

fn group_key(value: &Value) -> String {
    match value {
        Value::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => format!("Int({f:.0})"),
        other => format!("{other:?}"),
    }
}

fn is_key_path(expr: &CExpr, query: &CompiledQuery) -> bool {
    match expr {
        CExpr::KeyPath(..) => true,
        CExpr::AnnotationRef(idx) => query
            .annotations
            .get(*idx)
            .is_some_and(|a| is_key_path(&a.expr, query)),
        _ => false,
    }
}

/// Values read from inside a JSON document come back as plain scalars; a
/// JSON `null` becomes NULL.
fn decode_key_value(value: Value) -> Value {
    match value {
        Value::Json(doc) => Value::from_json_scalar(&doc),
        other => other,
    }
}

// ── Join prefix collection ──────────────────────────────────────────────

fn add_path(path: &ResolvedPath, out: &mut Vec<Vec<Hop>>) {
    for (i, hop) in path.hops.iter().enumerate() {
        if hop.is_multi()
            && !out
                .iter()
                .any(|p| p.last().is_some_and(|last| last.prefix == hop.prefix))
        {
            out.push(path.hops[..=i].to_vec());
        }
    }
}

fn collect_expr(expr: &CExpr, query: &CompiledQuery, out: &mut Vec<Vec<Hop>>) {
    match expr {
        CExpr::Col(path) => add_path(path, out),
        CExpr::KeyPath(inner, _) | CExpr::KeyText(inner) | CExpr::Transform(_, inner) => {
            collect_expr(inner, query, out);
        }
        CExpr::Func(_, args) => args.iter().for_each(|a| collect_expr(a, query, out)),
        CExpr::Agg { arg, filter, .. } => {
            collect_expr(arg, query, out);
            if let Some(filter) = filter {
                collect_cond(filter, query, out);
            }
        }
        CExpr::AnnotationRef(idx) => {
            if let Some(annotation) = query.annotations.get(*idx) {
                collect_expr(&annotation.expr, query, out);
            }
        }
        CExpr::Case { whens, default } => {
            for (cond, then) in whens {
                collect_cond(cond, query, out);
                collect_expr(then, query, out);
            }
            collect_expr(default, query, out);
        }
        CExpr::Arith(_, l, r) => {
            collect_expr(l, query, out);
            collect_expr(r, query, out);
        }
        CExpr::Const(_)
        | CExpr::Outer(_)
        | CExpr::Subquery(_)
        | CExpr::SubqueryList(_)
        | CExpr::Exists { .. } => {}
    }
}

fn collect_cond(cond: &CCond, query: &CompiledQuery, out: &mut Vec<Vec<Hop>>) {
    match cond {
        CCond::Lookup { lhs, rhs, .. } => {
            collect_expr(lhs, query, out);
            collect_expr(rhs, query, out);
        }
        CCond::And(children) | CCond::Or(children) => {
            children.iter().for_each(|c| collect_cond(c, query, out));
        }
        CCond::Not(inner) => collect_cond(inner, query, out),
    }
}

/// Prefixes joined for the output: annotations, projections, grouping and
/// ordering.
fn output_prefixes(query: &CompiledQuery) -> Vec<Vec<Hop>> {
    let mut out = Vec::new();
    for annotation in &query.annotations {
        collect_expr(&annotation.expr, query, &mut out);
    }
    for (_, expr) in query.select.iter().flatten() {
        collect_expr(expr, query, &mut out);
    }
    if let Grouping::ByValues(exprs) = &query.grouping {
        for expr in exprs {
            collect_expr(expr, query, &mut out);
        }
    }
    for (expr, _) in &query.order_by {
        collect_expr(expr, query, &mut out);
    }
    sorted(out)
}

/// Parents before children.
fn sorted(mut prefixes: Vec<Vec<Hop>>) -> Vec<Vec<Hop>> {
    prefixes.sort_by_key(Vec::len);
    prefixes
}
