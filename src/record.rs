//! Record metadata: table, keys, columns and relations.
//!
//! `Record` is implemented by hand for each mapped struct. It gives the
//! engine everything it needs to build statements for the type and to
//! hand eager-loaded rows back to the parent.

use crate::executor::EngineError;
use crate::row::{FromRow, Row};
use crate::statement::NestedPreload;
use crate::value::is_zero_value;
use sea_query::Value;
use std::fmt;

/// Type of relationship between records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationType {
    /// One-to-one relationship
    HasOne,
    /// One-to-many relationship
    HasMany,
    /// Many-to-one relationship (`belongs_to`)
    BelongsTo,
}

/// A relation that can be preloaded by name
///
/// Related rows match a parent when `related.to_col == parent.from_col`.
/// For `BelongsTo` that is `(foreign key, related primary key)`; for
/// `HasOne`/`HasMany` it is `(primary key, related foreign key)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    /// Name used in `preload(..)`
    pub name: &'static str,
    pub rel_type: RelationType,
    /// Table of the related records
    pub to_table: &'static str,
    /// Column on this record
    pub from_col: &'static str,
    /// Column on the related table
    pub to_col: &'static str,
    /// Soft-delete column of the related table
    pub soft_delete: Option<&'static str>,
}

impl Relation {
    pub fn belongs_to(name: &'static str, to_table: &'static str, foreign_key: &'static str) -> Self {
        Self {
            name,
            rel_type: RelationType::BelongsTo,
            to_table,
            from_col: foreign_key,
            to_col: "id",
            soft_delete: None,
        }
    }

    pub fn has_many(name: &'static str, to_table: &'static str, foreign_key: &'static str) -> Self {
        Self {
            name,
            rel_type: RelationType::HasMany,
            to_table,
            from_col: "id",
            to_col: foreign_key,
            soft_delete: None,
        }
    }

    pub fn has_one(name: &'static str, to_table: &'static str, foreign_key: &'static str) -> Self {
        Self {
            rel_type: RelationType::HasOne,
            ..Self::has_many(name, to_table, foreign_key)
        }
    }

    /// Override the column on this record (`id` by default for has-one/has-many)
    #[must_use]
    pub fn from_col(mut self, column: &'static str) -> Self {
        self.from_col = column;
        self
    }

    /// Override the column on the related table (`id` by default for belongs-to)
    #[must_use]
    pub fn to_col(mut self, column: &'static str) -> Self {
        self.to_col = column;
        self
    }

    /// Hide related rows whose `column` is set, unless the statement is unscoped
    #[must_use]
    pub fn soft_delete(mut self, column: &'static str) -> Self {
        self.soft_delete = Some(column);
        self
    }
}

/// A mapped table row
pub trait Record: FromRow + fmt::Debug {
    /// Table name
    const TABLE: &'static str;

    /// Primary key columns
    const PRIMARY_KEY: &'static [&'static str] = &["id"];

    /// Soft-delete timestamp column, if the table uses one
    const SOFT_DELETE: Option<&'static str> = None;

    /// Every column with its current value
    fn values(&self) -> Vec<(&'static str, Value)>;

    /// Relations available to `preload`
    fn relations() -> Vec<Relation> {
        Vec::new()
    }

    /// Store eager-loaded rows for `relation`; rows already belong to `self`
    fn attach(&mut self, relation: &str, rows: &[Row]) -> Result<(), EngineError> {
        let _ = rows;
        Err(EngineError::UnknownRelation(relation.to_string()))
    }

    /// Continue a dotted preload path below `relation`.
    ///
    /// Called after `relation` has been attached to every record in
    /// `records`; collect the attached children and pass them to
    /// `nested.load`.
    ///
    /// ```ignore
    /// fn preload_nested(owners: &mut [&mut Self], relation: &str, nested: &NestedPreload<'_>) -> Result<(), EngineError> {
    ///     match relation {
    ///         "Pets" => nested.load(&mut owners.iter_mut().flat_map(|o| o.pets.iter_mut()).collect::<Vec<_>>()),
    ///         other => Err(EngineError::UnknownRelation(other.to_string())),
    ///     }
    /// }
    /// ```
    fn preload_nested(
        records: &mut [&mut Self],
        relation: &str,
        nested: &NestedPreload<'_>,
    ) -> Result<(), EngineError>
    where
        Self: Sized,
    {
        let _ = (records, nested);
        Err(EngineError::UnknownRelation(relation.to_string()))
    }

    fn column_value(&self, column: &str) -> Option<Value> {
        self.values()
            .into_iter()
            .find(|(name, _)| *name == column)
            .map(|(_, value)| value)
    }

    fn primary_key_values(&self) -> Vec<(&'static str, Value)> {
        self.values()
            .into_iter()
            .filter(|(name, _)| Self::PRIMARY_KEY.contains(name))
            .collect()
    }

    /// Whether every primary key column holds its zero value
    fn has_zero_primary_key(&self) -> bool {
        self.primary_key_values()
            .iter()
            .all(|(_, value)| is_zero_value(value))
    }

    /// Columns holding non-zero values, as used for struct-style conditions
    fn non_zero_values(&self) -> Vec<(&'static str, Value)> {
        self.values()
            .into_iter()
            .filter(|(_, value)| !is_zero_value(value))
            .collect()
    }
}

pub(crate) fn find_relation<M: Record>(name: &str) -> Result<Relation, EngineError> {
    M::relations()
        .into_iter()
        .find(|rel| rel.name == name)
        .ok_or_else(|| EngineError::UnknownRelation(name.to_string()))
}

/// Column assignments for `UPDATE ... SET`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assignments(Vec<(String, Value)>);

impl Assignments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an assignment
    #[must_use]
    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        let column = column.into();
        let value = value.into();
        match self.0.iter_mut().find(|(c, _)| *c == column) {
            Some(slot) => slot.1 = value,
            None => self.0.push((column, value)),
        }
        self
    }

    /// Non-zero, non-key columns of `record`
    pub fn from_record<M: Record>(record: &M) -> Self {
        record
            .non_zero_values()
            .into_iter()
            .filter(|(name, _)| !M::PRIMARY_KEY.contains(name))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(c, v)| (c.as_str(), v))
    }

    /// Drop assignments to `columns`
    pub(crate) fn without(&self, columns: &[String]) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(c, _)| !columns.contains(c))
                .cloned()
                .collect(),
        )
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Assignments {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Assignments::new(), |acc, (k, v)| acc.set(k, v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{Owner, Pet};

    #[test]
    fn test_relation_builders() {
        let rel = Relation::belongs_to("Owner", "owners", "owner_id");
        assert_eq!(rel.rel_type, RelationType::BelongsTo);
        assert_eq!((rel.from_col, rel.to_col), ("owner_id", "id"));

        let rel = Relation::has_many("Pets", "pets", "owner_id");
        assert_eq!((rel.from_col, rel.to_col), ("id", "owner_id"));

        let rel = Relation::has_one("Profile", "profiles", "user_id").from_col("uid");
        assert_eq!(rel.rel_type, RelationType::HasOne);
        assert_eq!((rel.from_col, rel.to_col), ("uid", "user_id"));
        assert_eq!(rel.soft_delete, None);

        let rel = Relation::has_many("Toys", "toys", "pet_id").soft_delete("deleted_at");
        assert_eq!(rel.soft_delete, Some("deleted_at"));
    }

    #[test]
    fn test_find_relation() {
        assert_eq!(find_relation::<Pet>("Owner").unwrap().to_table, "owners");
        assert!(matches!(
            find_relation::<Pet>("Vet"),
            Err(EngineError::UnknownRelation(_))
        ));
        assert_eq!(find_relation::<Owner>("Pets").unwrap().to_col, "owner_id");
    }

    #[test]
    fn test_primary_key_helpers() {
        let pet = Pet::new(0, "Rex", "active");
        assert!(pet.has_zero_primary_key());
        let pet = Pet::new(3, "Rex", "active");
        assert!(!pet.has_zero_primary_key());
        assert_eq!(pet.column_value("name"), Some(Value::from("Rex")));
    }

    #[test]
    fn test_assignments_from_record_skips_zero_and_key() {
        let pet = Pet::new(9, "Rex", "");
        let set = Assignments::from_record(&pet);
        assert_eq!(set.len(), 1);
        assert_eq!(set.iter().next(), Some(("name", &Value::from("Rex"))));
    }

    #[test]
    fn test_assignments_set_replaces() {
        let set = Assignments::new().set("status", "active").set("status", "sold");
        assert_eq!(set.len(), 1);
        let set: Assignments = [("a", 1i64), ("b", 2i64)].into_iter().collect();
        assert_eq!(set.without(&["a".to_string()]).len(), 1);
    }
}
