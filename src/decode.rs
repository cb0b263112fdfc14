//! JSON decoding & enrichment of message bodies.
//!
//! A `JsonDecoder` sits between a queue's consumer stream and the final consumer. It parses the
//! JSON document found at a dot-separated path of each message (the `body` by default) and
//! enriches the parsed object with fields copied from the source message, such as its `id`.

use futures::future;
use futures::stream::{Stream, StreamExt};
use serde_json::{Map, Value};

use crate::error::Error;
use crate::message::{Delivery, Message};

/// A value merged into each decoded object.
#[derive(Clone, Debug, PartialEq)]
pub enum Enrichment {
    /// Copy the value at this dot-separated path of the source message to the same path of the
    /// decoded object.
    Field(String),
    /// Deep-merge this object into the decoded object.
    Merge(Map<String, Value>),
}

/// A decoder of JSON message bodies.
#[derive(Clone, Debug)]
pub struct JsonDecoder {
    /// The dot-separated path of the JSON document to parse. `None` decodes the message as is.
    pub parse_field: Option<String>,
    /// Enrichments applied to each decoded object, in order.
    pub enrich_with: Vec<Enrichment>,
}

impl Default for JsonDecoder {
    fn default() -> Self {
        Self {
            parse_field: Some("body".into()),
            enrich_with: vec![Enrichment::Field("id".into())],
        }
    }
}

impl JsonDecoder {
    /// Decode a single message.
    pub fn decode(&self, msg: &Message) -> Result<Value, Error> {
        let source = msg.to_value();
        let mut parsed = match &self.parse_field {
            None => source.clone(),
            Some(path) => match lookup(&source, path) {
                Some(Value::String(raw)) if !raw.is_empty() => serde_json::from_str(raw).map_err(|err| Error::Parse {
                    reason: err.to_string(),
                    message: Box::new(msg.clone()),
                })?,
                Some(Value::Null) | Some(Value::String(_)) | None => {
                    return Err(Error::Parse {
                        reason: format!("object does not contain field {}", path),
                        message: Box::new(msg.clone()),
                    })
                }
                Some(_) => {
                    return Err(Error::Parse {
                        reason: format!("field {} is not a JSON string", path),
                        message: Box::new(msg.clone()),
                    })
                }
            },
        };

        if !parsed.is_object() {
            if !self.enrich_with.is_empty() {
                tracing::trace!("skipping enrichment of a non-object document");
            }
            return Ok(parsed);
        }
        for enrichment in self.enrich_with.iter() {
            match enrichment {
                Enrichment::Field(path) => {
                    if let Some(val) = lookup(&source, path) {
                        assign(&mut parsed, path, val.clone());
                    }
                }
                Enrichment::Merge(src) => {
                    if let Value::Object(obj) = &mut parsed {
                        merge(obj, src);
                    }
                }
            }
        }
        Ok(parsed)
    }

    /// Decode a delivery of one or many messages.
    ///
    /// Messages which fail to decode are skipped & reported to `on_error`. A batch yields a batch
    /// of the decoded values; `None` is returned when nothing could be decoded.
    pub fn decode_delivery<F>(&self, delivery: Delivery<Message>, mut on_error: F) -> Option<Delivery<Value>>
    where
        F: FnMut(Error),
    {
        match delivery {
            Delivery::One(msg) => match self.decode(&msg) {
                Ok(val) => Some(Delivery::One(val)),
                Err(err) => {
                    on_error(err);
                    None
                }
            },
            Delivery::Many(msgs) => {
                let decoded: Vec<Value> = msgs
                    .iter()
                    .filter_map(|msg| self.decode(msg).map_err(&mut on_error).ok())
                    .collect();
                if decoded.is_empty() {
                    None
                } else {
                    Some(Delivery::Many(decoded))
                }
            }
        }
    }

    /// Adapt a stream of messages into a stream of decoded values, reporting failures to `on_error`.
    pub fn decode_stream<S, F>(self, stream: S, mut on_error: F) -> impl Stream<Item = Value>
    where
        S: Stream<Item = Message>,
        F: FnMut(Error),
    {
        stream.filter_map(move |msg| {
            let res = match self.decode(&msg) {
                Ok(val) => Some(val),
                Err(err) => {
                    tracing::debug!(error = ?err, "error decoding message");
                    on_error(err);
                    None
                }
            };
            future::ready(res)
        })
    }
}

/// Get the value at the given dot-separated path.
fn lookup<'a>(val: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(val, |val, key| match val {
        Value::Array(items) => key.parse::<usize>().ok().and_then(|idx| items.get(idx)),
        _ => val.get(key),
    })
}

/// Set the value at the given dot-separated path, creating intermediate objects as needed.
fn assign(target: &mut Value, path: &str, val: Value) {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(obj) = target {
        match rest {
            None => {
                obj.insert(head.to_string(), val);
            }
            Some(rest) => assign(obj.entry(head).or_insert(Value::Null), rest, val),
        }
    }
}

/// Deep-merge the given object into the target.
fn merge(target: &mut Map<String, Value>, src: &Map<String, Value>) {
    for (key, val) in src {
        match (target.get_mut(key), val) {
            (Some(Value::Object(existing)), Value::Object(nested)) => merge(existing, nested),
            _ => {
                target.insert(key.clone(), val.clone());
            }
        }
    }
}
