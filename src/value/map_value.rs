use std::collections::BTreeMap;

use crate::model::FieldPath;
use crate::value::{FieldValue, ValueKind};

/// Ordered field map; the body of every stored document.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MapValue {
    fields: BTreeMap<String, FieldValue>,
}

impl MapValue {
    pub fn new(fields: BTreeMap<String, FieldValue>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub fn into_fields(self) -> BTreeMap<String, FieldValue> {
        self.fields
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: FieldValue) -> Option<FieldValue> {
        self.fields.insert(field.into(), value)
    }

    pub fn remove(&mut self, field: &str) -> Option<FieldValue> {
        self.fields.remove(field)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Resolves a nested field, descending through map values.
    pub fn get_path(&self, path: &FieldPath) -> Option<&FieldValue> {
        let (first, rest) = path.segments().split_first()?;
        let mut current = self.fields.get(first)?;
        for segment in rest {
            match current.kind() {
                ValueKind::Map(child) => current = child.fields.get(segment)?,
                _ => return None,
            }
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_nested_paths() {
        let mut inner = BTreeMap::new();
        inner.insert("city".to_string(), FieldValue::from_string("Kyoto"));
        let mut fields = BTreeMap::new();
        fields.insert("address".to_string(), FieldValue::from_map(inner));
        let map = MapValue::new(fields);

        let path = FieldPath::from_dot_separated("address.city").unwrap();
        assert_eq!(map.get_path(&path), Some(&FieldValue::from_string("Kyoto")));
        let missing = FieldPath::from_dot_separated("address.zip").unwrap();
        assert_eq!(map.get_path(&missing), None);
    }
}
