//! Record metadata resolution.
//!
//! Turns a record shape and the column names of a result set into a column
//! plan: one bound field per column, in column order. Plans are computed per
//! query and never cached, since two queries over the same shape may alias
//! their columns differently.

use crate::db::record::{FieldSlot, RecordShape};
use crate::error::{DbError, DbResult};
use crate::models::FieldType;
use std::collections::HashMap;
use tracing::debug;

/// Field index bound to each result column, in column order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnPlan {
    fields: Vec<usize>,
    field_types: Vec<FieldType>,
}

impl ColumnPlan {
    /// Index of the field bound to `column`.
    pub fn field_index(&self, column: usize) -> Option<usize> {
        self.fields.get(column).copied()
    }

    /// Scan slot type for `column`.
    pub fn field_type(&self, column: usize) -> Option<FieldType> {
        self.field_types.get(column).copied()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// `(column, field index, slot type)` triples in column order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, FieldType)> + '_ {
        self.fields
            .iter()
            .zip(&self.field_types)
            .enumerate()
            .map(|(column, (&field, &ty))| (column, field, ty))
    }
}

/// Resolve result columns to fields by name.
///
/// Column names are matched case-insensitively against each field's override
/// name, or its own name when there is no override. Transient fields never
/// match. A column without a matching field is fatal, as is a result set with
/// more columns than the shape has fields. Fields left unmatched keep their
/// default value.
pub fn resolve_columns<R>(shape: &RecordShape<R>, columns: &[String]) -> DbResult<ColumnPlan> {
    if columns.len() > shape.len() {
        return Err(DbError::mapping(
            format!(
                "Result set column count ({}) greater than record field count ({})",
                columns.len(),
                shape.len()
            ),
            shape.name(),
        ));
    }

    let mut by_key = HashMap::with_capacity(shape.len());
    for (index, field) in shape.fields().iter().enumerate() {
        if field.is_transient() {
            debug!(
                target: "persistence",
                record = shape.name(),
                field = field.name(),
                "Bypassing transient field"
            );
            continue;
        }
        by_key.insert(field.lookup_key(), index);
    }

    let mut fields = Vec::with_capacity(columns.len());
    let mut field_types = Vec::with_capacity(columns.len());
    for column in columns {
        let key = column.to_lowercase();
        let index = *by_key.get(&key).ok_or_else(|| {
            DbError::mapping(format!("No field found for column {}", key), shape.name())
        })?;
        fields.push(index);
        field_types.push(shape.fields()[index].field_type());
    }

    Ok(ColumnPlan {
        fields,
        field_types,
    })
}

/// Bind columns to fields strictly by position.
///
/// The result set must have exactly one column per declared field.
pub fn resolve_positional<R>(shape: &RecordShape<R>, column_count: usize) -> DbResult<ColumnPlan> {
    if column_count != shape.len() {
        return Err(DbError::mapping(
            format!(
                "Result set column count ({}) differs from record field count ({})",
                column_count,
                shape.len()
            ),
            shape.name(),
        ));
    }
    Ok(ColumnPlan {
        fields: (0..column_count).collect(),
        field_types: shape.fields().iter().map(|f| f.field_type()).collect(),
    })
}

/// Scan layout for a multi-shape row: one slot per flattened field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatPlan {
    slots: Vec<FieldSlot>,
}

impl FlatPlan {
    pub fn slots(&self) -> &[FieldSlot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Lay out the flattened fields of several shapes against a result set.
///
/// Columns are sliced by position in shape order, not by name, so the
/// column count must equal the total field count exactly.
pub fn flatten_shapes(slots: Vec<FieldSlot>, columns: &[String]) -> DbResult<FlatPlan> {
    if columns.len() != slots.len() {
        return Err(DbError::mapping(
            format!(
                "Result set column count ({}) differs from record fields count ({})",
                columns.len(),
                slots.len()
            ),
            joined_names(&slots),
        ));
    }

    for slot in slots.iter().filter(|s| s.transient) {
        debug!(
            target: "persistence",
            record = slot.record,
            field = slot.field,
            "Bypassing transient field"
        );
    }

    Ok(FlatPlan { slots })
}

fn joined_names(slots: &[FieldSlot]) -> String {
    let mut names: Vec<&str> = Vec::new();
    for slot in slots {
        if names.last() != Some(&slot.record) {
            names.push(slot.record);
        }
    }
    names.join("+")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::record::Record;
    use crate::field;

    #[derive(Debug, Default)]
    struct Account {
        id: i64,
        name: String,
        is_active: bool,
    }

    impl Record for Account {
        fn shape() -> RecordShape<Self> {
            RecordShape::new("Account")
                .with(field!(Account, id).column("account_id"))
                .with(field!(Account, name))
                .with(field!(Account, is_active).transient())
        }
    }

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_override_binds_case_insensitively() {
        let plan = resolve_columns(&Account::shape(), &cols(&["NAME", "Account_Id"])).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.field_index(0), Some(1));
        assert_eq!(plan.field_index(1), Some(0));
        assert_eq!(plan.field_type(0), Some(FieldType::Text));
        assert_eq!(plan.field_type(1), Some(FieldType::Int));
    }

    #[test]
    fn test_field_name_ignored_when_override_present() {
        let err = resolve_columns(&Account::shape(), &cols(&["id"])).unwrap_err();
        assert!(err.to_string().contains("No field found for column id"));
    }

    #[test]
    fn test_transient_field_never_matches() {
        let err = resolve_columns(&Account::shape(), &cols(&["is_active"])).unwrap_err();
        assert!(matches!(err, DbError::Mapping { .. }));
    }

    #[test]
    fn test_too_many_columns_is_fatal() {
        let err = resolve_columns(&Account::shape(), &cols(&["account_id", "name", "x", "y"]))
            .unwrap_err();
        assert!(err.to_string().contains("greater than record field count"));
    }

    #[test]
    fn test_fewer_columns_than_fields_allowed() {
        let plan = resolve_columns(&Account::shape(), &cols(&["name"])).unwrap();
        let triples: Vec<_> = plan.iter().collect();
        assert_eq!(triples, vec![(0, 1, FieldType::Text)]);
    }

    #[test]
    fn test_positional_requires_exact_count() {
        assert!(resolve_positional(&Account::shape(), 2).is_err());
        let plan = resolve_positional(&Account::shape(), 3).unwrap();
        assert_eq!(plan.field_index(2), Some(2));
        assert_eq!(plan.field_type(2), Some(FieldType::Bool));
    }

    #[test]
    fn test_flatten_requires_exact_count() {
        let slots = Account::shape().slots();
        let err = flatten_shapes(slots.clone(), &cols(&["a", "b"])).unwrap_err();
        assert!(err.to_string().contains("record: Account"));

        let plan = flatten_shapes(slots, &cols(&["a", "b", "c"])).unwrap();
        assert_eq!(plan.len(), 3);
        assert!(plan.slots()[2].transient);
    }

    #[test]
    fn test_joined_names_deduplicates_consecutive_records() {
        let mut slots = Account::shape().slots();
        slots.extend(RecordShape::<Account>::new("Order").with(field!(Account, id)).slots());
        assert_eq!(joined_names(&slots), "Account+Order");
    }
}
