//! Related managers for many-to-many fields and reverse foreign keys.
//!
//! Obtained with [`Store::related`]. A related manager is bound to one
//! owner object and scopes its querysets to the objects related to it.

use std::sync::Arc;

use memorm_core::{OrmError, OrmResult};

use crate::model::ModelSchema;
use crate::query::lookups::Q;
use crate::query::queryset::{QuerySet, Records};
use crate::record::Record;
use crate::store::Store;
use crate::value::Value;

#[derive(Debug, Clone)]
enum RelatedKind {
    /// `reverse` is set when the owner sits on the target side of the
    /// junction.
    ManyToMany { junction: String, reverse: bool },
    ReverseForeignKey { field: String, nullable: bool },
}

/// The manager for the objects related to one owner object.
#[derive(Debug, Clone)]
pub struct RelatedManager {
    store: Store,
    owner: i64,
    target: Arc<ModelSchema>,
    /// The filter path from the related model back to the owner.
    path: String,
    kind: RelatedKind,
}

impl RelatedManager {
    pub(crate) fn many_to_many(
        store: Store,
        owner: i64,
        target: Arc<ModelSchema>,
        path: String,
        junction: String,
        reverse: bool,
    ) -> Self {
        Self {
            store,
            owner,
            target,
            path,
            kind: RelatedKind::ManyToMany { junction, reverse },
        }
    }

    pub(crate) fn reverse_foreign_key(
        store: Store,
        owner: i64,
        target: Arc<ModelSchema>,
        field: String,
        nullable: bool,
    ) -> Self {
        Self {
            store,
            owner,
            target,
            path: field.clone(),
            kind: RelatedKind::ReverseForeignKey { field, nullable },
        }
    }

    /// The related model.
    pub fn model(&self) -> &str {
        &self.target.name
    }

    /// All related objects, as a lazy queryset.
    pub fn all(&self) -> OrmResult<QuerySet<Records>> {
        QuerySet::new(self.store.clone(), &self.target.name)?.filter(Q::new(self.path.clone(), self.owner))
    }

    /// Related objects matching a condition.
    pub fn filter(&self, q: impl Into<Q>) -> OrmResult<QuerySet<Records>> {
        self.all()?.filter(q)
    }

    /// The number of related objects.
    pub fn count(&self) -> OrmResult<usize> {
        self.all()?.count()
    }

    fn pks_of(&self, records: &[&Record]) -> OrmResult<Vec<i64>> {
        records
            .iter()
            .map(|record| {
                if record.schema().db_table != self.target.db_table {
                    return Err(OrmError::TypeError(format!(
                        "'{}' instance expected, got {}",
                        self.target.name,
                        record.repr()
                    )));
                }
                record.pk().ok_or_else(|| {
                    OrmError::ValueError(format!(
                        "Cannot add \"{}\": instance is not saved yet.",
                        record.repr()
                    ))
                })
            })
            .collect()
    }

    fn pair(&self, reverse: bool, other: i64) -> (i64, i64) {
        if reverse {
            (other, self.owner)
        } else {
            (self.owner, other)
        }
    }

    /// Relates the given objects to the owner. Adding an already related
    /// object is a no-op.
    pub fn add(&self, records: &[&Record]) -> OrmResult<()> {
        let pks = self.pks_of(records)?;
        self.store.ensure_rows(&self.target, &pks)?;
        match &self.kind {
            RelatedKind::ManyToMany { junction, reverse } => {
                let pairs: Vec<_> = pks.iter().map(|pk| self.pair(*reverse, *pk)).collect();
                self.store.link(junction, &pairs);
            }
            RelatedKind::ReverseForeignKey { field, .. } => {
                self.store
                    .set_field(&self.target, &pks, field, &Value::Int(self.owner))?;
            }
        }
        Ok(())
    }

    /// Unrelates the given objects. For a reverse foreign key this sets
    /// the key to NULL, which requires a nullable field.
    pub fn remove(&self, records: &[&Record]) -> OrmResult<()> {
        let pks = self.pks_of(records)?;
        match &self.kind {
            RelatedKind::ManyToMany { junction, reverse } => {
                let pairs: Vec<_> = pks.iter().map(|pk| self.pair(*reverse, *pk)).collect();
                self.store.unlink(junction, |pair| !pairs.contains(pair));
            }
            RelatedKind::ReverseForeignKey { field, nullable } => {
                if !nullable {
                    return Err(OrmError::TypeError(format!(
                        "'{}' object has no attribute 'remove': {}.{field} is not nullable",
                        self.target.name, self.target.name
                    )));
                }
                let related = self.all()?.values_list_flat(["pk"])?.items()?;
                if let Some(pk) = pks.iter().find(|pk| !related.contains(&Value::Int(**pk))) {
                    return Err(OrmError::DoesNotExist(format!(
                        "{} {pk} is not related to this object.",
                        self.target.name
                    )));
                }
                self.store.set_field(&self.target, &pks, field, &Value::Null)?;
            }
        }
        Ok(())
    }

    /// Unrelates every related object.
    pub fn clear(&self) -> OrmResult<()> {
        match &self.kind {
            RelatedKind::ManyToMany { junction, reverse } => {
                let (owner, reverse) = (self.owner, *reverse);
                self.store.unlink(junction, |(source, target)| {
                    if reverse {
                        *target != owner
                    } else {
                        *source != owner
                    }
                });
            }
            RelatedKind::ReverseForeignKey { field, nullable } => {
                if !nullable {
                    return Err(OrmError::TypeError(format!(
                        "'{}' object has no attribute 'clear': {}.{field} is not nullable",
                        self.target.name, self.target.name
                    )));
                }
                let pks = self.store.matching_pks(self.all()?.query())?;
                self.store.set_field(&self.target, &pks, field, &Value::Null)?;
            }
        }
        tracing::trace!(model = %self.target.name, owner = self.owner, "Cleared related objects");
        Ok(())
    }

    /// Replaces the related set with exactly the given objects.
    pub fn set(&self, records: &[&Record]) -> OrmResult<()> {
        let wanted = self.pks_of(records)?;
        let current = self.store.matching_pks(self.all()?.query())?;
        let stale: Vec<i64> = current.iter().copied().filter(|pk| !wanted.contains(pk)).collect();
        if !stale.is_empty() {
            match &self.kind {
                RelatedKind::ManyToMany { junction, reverse } => {
                    let pairs: Vec<_> = stale.iter().map(|pk| self.pair(*reverse, *pk)).collect();
                    self.store.unlink(junction, |pair| !pairs.contains(pair));
                }
                RelatedKind::ReverseForeignKey { field, nullable } => {
                    if !nullable {
                        return Err(OrmError::TypeError(format!(
                            "Cannot unset {}.{field}: the field is not nullable",
                            self.target.name
                        )));
                    }
                    self.store.set_field(&self.target, &stale, field, &Value::Null)?;
                }
            }
        }
        let fresh: Vec<&Record> = records
            .iter()
            .copied()
            .filter(|r| r.pk().is_some_and(|pk| !current.contains(&pk)))
            .collect();
        self.add(&fresh)
    }

    /// Creates a new related object and relates it to the owner.
    pub fn create<I, K, V>(&self, fields: I) -> OrmResult<Record>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let fields = fields.into_iter().map(|(k, v)| (k.as_ref().to_string(), v.into()));
        match &self.kind {
            RelatedKind::ManyToMany { .. } => {
                let record = self.store.create(&self.target.name, fields)?;
                self.add(&[&record])?;
                Ok(record)
            }
            RelatedKind::ReverseForeignKey { field, .. } => {
                let owner = std::iter::once((field.clone(), Value::Int(self.owner)));
                self.store.create(&self.target.name, fields.chain(owner))
            }
        }
    }
}
