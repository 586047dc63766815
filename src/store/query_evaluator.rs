use std::cmp::Ordering;

use crate::api::{
    Cursor, DocumentSnapshot, FieldFilter, FilterOperator, OrderBy, OrderDirection, QueryDefinition,
};
use crate::model::{FieldPath, ResourcePath};
use crate::value::{FieldValue, ValueKind};

/// Applies filters, ordering, the start-after cursor and the limit of `definition`.
///
/// Documents are ordered by the explicit `order_by` clauses and then by key, so
/// every query has a total order and cursors are unambiguous.
pub(crate) fn apply_query_to_documents(
    documents: Vec<DocumentSnapshot>,
    definition: &QueryDefinition,
) -> Vec<DocumentSnapshot> {
    let mut filtered: Vec<DocumentSnapshot> = documents
        .into_iter()
        .filter(|snapshot| snapshot.exists())
        .filter(|snapshot| definition.matches_collection(snapshot.key()))
        .filter(|snapshot| document_satisfies_filters(snapshot, definition.filters()))
        .collect();

    filtered.sort_by(|left, right| compare_snapshots(left, right, definition.order_by()));

    if let Some(cursor) = definition.start_after() {
        filtered.retain(|snapshot| {
            compare_snapshot_to_cursor(snapshot, cursor, definition.order_by()) == Ordering::Greater
        });
    }

    if let Some(limit) = definition.limit() {
        filtered.truncate(limit as usize);
    }

    filtered
}

/// Reads `field` from a snapshot, `null` when absent.
pub(crate) fn field_value(snapshot: &DocumentSnapshot, field: &FieldPath) -> FieldValue {
    if field == &FieldPath::document_id() {
        return FieldValue::from_reference(snapshot.key().path().canonical_string());
    }
    snapshot
        .data()
        .and_then(|map| map.get_path(field))
        .cloned()
        .unwrap_or_else(FieldValue::null)
}

fn document_satisfies_filters(snapshot: &DocumentSnapshot, filters: &[FieldFilter]) -> bool {
    filters.iter().all(|filter| {
        let value = field_value(snapshot, filter.field());
        evaluate_filter(filter, &value)
    })
}

fn evaluate_filter(filter: &FieldFilter, value: &FieldValue) -> bool {
    let expected = filter.value();
    match filter.operator() {
        FilterOperator::Equal => value == expected,
        FilterOperator::NotEqual => !value.is_null() && value != expected,
        FilterOperator::LessThan => comparable(value, expected) == Some(Ordering::Less),
        FilterOperator::LessThanOrEqual => matches!(
            comparable(value, expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        FilterOperator::GreaterThan => comparable(value, expected) == Some(Ordering::Greater),
        FilterOperator::GreaterThanOrEqual => matches!(
            comparable(value, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        FilterOperator::ArrayContains => match value.kind() {
            ValueKind::Array(array) => array.contains(expected),
            _ => false,
        },
        FilterOperator::In => match expected.kind() {
            ValueKind::Array(candidates) => candidates.contains(value),
            _ => false,
        },
    }
}

/// Compares two values of the same type class; `None` across type classes.
fn comparable(left: &FieldValue, right: &FieldValue) -> Option<Ordering> {
    if type_order(left) != type_order(right) {
        return None;
    }
    Some(compare_values(left, right))
}

/// Total order over values: type class first, then value.
pub(crate) fn compare_values(left: &FieldValue, right: &FieldValue) -> Ordering {
    match (left.kind(), right.kind()) {
        (ValueKind::Boolean(a), ValueKind::Boolean(b)) => a.cmp(b),
        (ValueKind::Integer(a), ValueKind::Integer(b)) => a.cmp(b),
        (ValueKind::Double(a), ValueKind::Double(b)) => a.total_cmp(b),
        (ValueKind::Integer(a), ValueKind::Double(b)) => (*a as f64).total_cmp(b),
        (ValueKind::Double(a), ValueKind::Integer(b)) => a.total_cmp(&(*b as f64)),
        (ValueKind::Timestamp(a), ValueKind::Timestamp(b)) => a.cmp(b),
        (ValueKind::String(a), ValueKind::String(b)) => a.cmp(b),
        (ValueKind::Reference(a), ValueKind::Reference(b)) => {
            match (ResourcePath::from_string(a), ResourcePath::from_string(b)) {
                (Ok(a), Ok(b)) => ResourcePath::comparator(&a, &b),
                _ => a.cmp(b),
            }
        }
        (ValueKind::Array(a), ValueKind::Array(b)) => {
            for (l, r) in a.values().iter().zip(b.values()) {
                match compare_values(l, r) {
                    Ordering::Equal => continue,
                    ordering => return ordering,
                }
            }
            a.values().len().cmp(&b.values().len())
        }
        (ValueKind::Map(a), ValueKind::Map(b)) => {
            for ((lk, lv), (rk, rv)) in a.fields().iter().zip(b.fields()) {
                match lk.cmp(rk).then_with(|| compare_values(lv, rv)) {
                    Ordering::Equal => continue,
                    ordering => return ordering,
                }
            }
            a.fields().len().cmp(&b.fields().len())
        }
        _ => type_order(left).cmp(&type_order(right)),
    }
}

fn type_order(value: &FieldValue) -> u8 {
    match value.kind() {
        ValueKind::Null => 0,
        ValueKind::Boolean(_) => 1,
        ValueKind::Integer(_) | ValueKind::Double(_) => 2,
        ValueKind::Timestamp(_) | ValueKind::ServerTimestamp => 3,
        ValueKind::String(_) => 4,
        ValueKind::Reference(_) => 5,
        ValueKind::Array(_) => 6,
        ValueKind::Map(_) => 7,
    }
}

fn apply_direction(ordering: Ordering, direction: OrderDirection) -> Ordering {
    match direction {
        OrderDirection::Ascending => ordering,
        OrderDirection::Descending => ordering.reverse(),
    }
}

fn compare_snapshots(left: &DocumentSnapshot, right: &DocumentSnapshot, order_by: &[OrderBy]) -> Ordering {
    for order in order_by {
        let ordering = compare_values(
            &field_value(left, order.field()),
            &field_value(right, order.field()),
        );
        let ordering = apply_direction(ordering, order.direction());
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    ResourcePath::comparator(left.key().path(), right.key().path())
}

fn compare_snapshot_to_cursor(snapshot: &DocumentSnapshot, cursor: &Cursor, order_by: &[OrderBy]) -> Ordering {
    for (order, bound) in order_by.iter().zip(cursor.values()) {
        let ordering = compare_values(&field_value(snapshot, order.field()), bound);
        let ordering = apply_direction(ordering, order.direction());
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    ResourcePath::comparator(snapshot.key().path(), cursor.key().path())
}
