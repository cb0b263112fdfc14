//! Queue message data model.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A message fetched from, or destined for, a remote queue.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// The remote identifier of this message, assigned by the queue when fetched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// The opaque body of this message.
    #[serde(default)]
    pub body: String,
    /// Any additional metadata fields attached by the remote queue.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Message {
    /// Create a new message with the given body and no identifier.
    pub fn new<B: Into<String>>(body: B) -> Self {
        Self {
            id: None,
            body: body.into(),
            fields: Map::new(),
        }
    }

    /// Create a new message with the given identifier and body.
    pub fn with_id<I: Into<String>, B: Into<String>>(id: I, body: B) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::new(body)
        }
    }

    /// The identifier of this message, if it has a non-empty one.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }

    /// View this message as a JSON object of its metadata fields, `id` and `body`.
    pub fn to_value(&self) -> Value {
        let mut obj = self.fields.clone();
        if let Some(id) = &self.id {
            obj.insert("id".into(), Value::String(id.clone()));
        }
        obj.insert("body".into(), Value::String(self.body.clone()));
        Value::Object(obj)
    }
}

/// A delivery of either a single item or a batch of items.
#[derive(Clone, Debug, PartialEq)]
pub enum Delivery<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> Delivery<T> {
    /// Flatten this delivery into a vector.
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::One(item) => vec![item],
            Self::Many(items) => items,
        }
    }

    /// The number of items in this delivery.
    pub fn len(&self) -> usize {
        match self {
            Self::One(_) => 1,
            Self::Many(items) => items.len(),
        }
    }

    /// Check if this delivery holds no items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> From<T> for Delivery<T> {
    fn from(item: T) -> Self {
        Self::One(item)
    }
}

impl<T> From<Vec<T>> for Delivery<T> {
    fn from(items: Vec<T>) -> Self {
        Self::Many(items)
    }
}
