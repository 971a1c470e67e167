//! The raw domain model: a plain JSON field bag with a fixed collection
//! and a positive integer id.

use serde_json::{Map, Value};

use super::{element_id, HasCollection, Id, Result, StoreError};

/// One raw domain object as delivered by the server.
///
/// Identity is `(collection, id)` and is immutable; fields only change by
/// replacing the whole model through a store write.
#[derive(Debug, Clone)]
pub struct Model {
    collection: String,
    id: Id,
    fields: Map<String, Value>,
}

impl Model {
    /// Builds a model from an inbound JSON object. The payload must carry a
    /// positive integer `id` field.
    pub fn new(collection: impl Into<String>, fields: Value) -> Result<Self> {
        let collection = collection.into();
        let fields = match fields {
            Value::Object(fields) => fields,
            other => {
                return Err(StoreError::InvalidModel(format!(
                    "payload for '{}' must be a JSON object, got {}",
                    collection, other
                )))
            }
        };
        let id = fields
            .get("id")
            .and_then(Value::as_u64)
            .filter(|id| *id > 0 && *id <= Id::MAX as u64)
            .ok_or_else(|| {
                StoreError::InvalidModel(format!(
                    "payload for '{}' is missing a positive integer id",
                    collection
                ))
            })? as Id;
        Ok(Self {
            collection,
            id,
            fields,
        })
    }

    /// Reconstructs a model from its serialized mirror form.
    pub fn from_json_str(collection: &str, raw: &str) -> Result<Self> {
        Self::new(collection, serde_json::from_str::<Value>(raw)?)
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn element_id(&self) -> String {
        element_id(&self.collection, self.id)
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Reads a single foreign-id field. Non-numeric and non-positive values
    /// resolve to `None`.
    pub fn id_field(&self, key: &str) -> Option<Id> {
        self.field(key)?
            .as_u64()
            .filter(|id| *id > 0 && *id <= Id::MAX as u64)
            .map(|id| id as Id)
    }

    /// Reads an array-of-foreign-ids field, silently dropping entries that
    /// are not positive integers.
    pub fn id_list_field(&self, key: &str) -> Option<Vec<Id>> {
        Some(
            self.field(key)?
                .as_array()?
                .iter()
                .filter_map(|v| v.as_u64())
                .filter(|id| *id > 0 && *id <= Id::MAX as u64)
                .map(|id| id as Id)
                .collect(),
        )
    }

    /// Reads a numeric field, used as sort key by ordered relations.
    pub fn number_field(&self, key: &str) -> Option<f64> {
        self.field(key)?.as_f64()
    }

    /// Reads a generic content-object field: `{"collection": ..., "id": ...}`.
    pub fn content_object_field(&self, key: &str) -> Option<(String, Id)> {
        let object = self.field(key)?.as_object()?;
        let collection = object.get("collection")?.as_str()?.to_string();
        let id = object
            .get("id")?
            .as_u64()
            .filter(|id| *id > 0 && *id <= Id::MAX as u64)? as Id;
        Some((collection, id))
    }

    /// True if the given field points at `id`, either as a single foreign id
    /// or as a member of a foreign-id array. This is the reverse-relation
    /// scan predicate.
    pub fn references(&self, key: &str, id: Id) -> bool {
        match self.field(key) {
            Some(Value::Number(n)) => n.as_u64() == Some(id as u64),
            Some(Value::Array(items)) => items.iter().any(|v| v.as_u64() == Some(id as u64)),
            _ => false,
        }
    }

    /// Serializes the field bag for the data store's json mirror.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.fields)?)
    }
}

impl HasCollection for Model {
    fn collection_string(&self) -> &str {
        &self.collection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_model_requires_positive_id() {
        assert!(Model::new("demo/widget", json!({ "id": 1, "name": "A" })).is_ok());
        assert!(Model::new("demo/widget", json!({ "id": 0 })).is_err());
        assert!(Model::new("demo/widget", json!({ "name": "A" })).is_err());
        assert!(Model::new("demo/widget", json!([1, 2])).is_err());
    }

    #[test]
    fn test_field_accessors() {
        let model = Model::new(
            "motions/motion",
            json!({
                "id": 5,
                "category_id": 9,
                "supporter_ids": [3, 0, 4, "x"],
                "weight": 2.5,
                "content_object": { "collection": "topics/topic", "id": 7 }
            }),
        )
        .unwrap();

        assert_eq!(model.id_field("category_id"), Some(9));
        assert_eq!(model.id_list_field("supporter_ids"), Some(vec![3, 4]));
        assert_eq!(model.number_field("weight"), Some(2.5));
        assert_eq!(
            model.content_object_field("content_object"),
            Some(("topics/topic".to_string(), 7))
        );
        assert_eq!(model.element_id(), "motions/motion:5");
    }

    #[test]
    fn test_references_scalar_and_array() {
        let model = Model::new(
            "demo/widget",
            json!({ "id": 1, "owner_id": 4, "tag_ids": [7, 8] }),
        )
        .unwrap();
        assert!(model.references("owner_id", 4));
        assert!(!model.references("owner_id", 5));
        assert!(model.references("tag_ids", 8));
        assert!(!model.references("tag_ids", 9));
        assert!(!model.references("missing", 1));
    }

    #[test]
    fn test_json_round_trip() {
        let model = Model::new("demo/widget", json!({ "id": 3, "name": "B" })).unwrap();
        let raw = model.to_json_string().unwrap();
        let restored = Model::from_json_str("demo/widget", &raw).unwrap();
        assert_eq!(restored.id(), 3);
        assert_eq!(restored.field("name"), Some(&json!("B")));
    }
}
