use anyhow::{bail, Result};
use futures::stream::StreamExt;
use serde_json::{json, Map, Value};

use crate::decode::{Enrichment, JsonDecoder};
use crate::error::Error;
use crate::message::{Delivery, Message};

#[test]
fn default_decoder_parses_body_and_enriches_with_id() -> Result<()> {
    let msg = Message::with_id("42", r#"{"job": "resize", "size": 3}"#);

    let decoded = JsonDecoder::default().decode(&msg)?;

    assert_eq!(decoded, json!({"job": "resize", "size": 3, "id": "42"}), "unexpected decoded value");
    Ok(())
}

#[test]
fn decoder_supports_nested_paths_and_merges() -> Result<()> {
    let mut msg = Message::with_id("7", "ignored");
    msg.fields.insert("payload".into(), json!({"raw": "{\"a\": {\"b\": 1}}"}));
    msg.fields.insert("meta".into(), json!({"source": "billing"}));
    let mut extra = Map::new();
    extra.insert("a".into(), json!({"c": 2}));
    let decoder = JsonDecoder {
        parse_field: Some("payload.raw".into()),
        enrich_with: vec![Enrichment::Field("meta.source".into()), Enrichment::Merge(extra)],
    };

    let decoded = decoder.decode(&msg)?;

    assert_eq!(decoded, json!({"a": {"b": 1, "c": 2}, "meta": {"source": "billing"}}), "unexpected decoded value");
    Ok(())
}

#[test]
fn decoder_reports_missing_field_and_invalid_json() -> Result<()> {
    let decoder = JsonDecoder::default();

    match decoder.decode(&Message::with_id("1", "")) {
        Err(Error::Parse { reason, .. }) => assert!(reason.contains("body"), "unexpected reason {}", reason),
        other => bail!("expected a parse error for an empty body, got {:?}", other),
    }
    match decoder.decode(&Message::with_id("2", "{not json")) {
        Err(err @ Error::Parse { .. }) => assert_eq!(err.message().and_then(|msg| msg.id()), Some("2"), "expected the source message"),
        other => bail!("expected a parse error for invalid JSON, got {:?}", other),
    }
    Ok(())
}

#[test]
fn decoder_leaves_non_object_documents_unenriched() -> Result<()> {
    let decoded = JsonDecoder::default().decode(&Message::with_id("1", "[1, 2]"))?;

    assert_eq!(decoded, json!([1, 2]), "expected the array to be returned as parsed");
    Ok(())
}

#[test]
fn decode_delivery_handles_single_messages_and_batches() -> Result<()> {
    let decoder = JsonDecoder::default();
    let mut errors = vec![];

    let one = decoder.decode_delivery(Delivery::One(Message::with_id("1", "{}")), |err| errors.push(err));
    assert_eq!(one, Some(Delivery::One(json!({"id": "1"}))), "unexpected single delivery");

    let batch = vec![Message::with_id("1", "{}"), Message::with_id("2", "oops"), Message::with_id("3", "{\"x\": 1}")];
    let many = decoder.decode_delivery(Delivery::Many(batch), |err| errors.push(err));
    assert_eq!(many, Some(Delivery::Many(vec![json!({"id": "1"}), json!({"x": 1, "id": "3"})])), "unexpected batch delivery");

    let none = decoder.decode_delivery(Delivery::Many(vec![Message::with_id("4", "oops")]), |err| errors.push(err));
    assert_eq!(none, None, "expected nothing from an undecodable batch");
    assert_eq!(errors.len(), 2, "expected 2 reported errors, got {}", errors.len());

    Ok(())
}

#[tokio::test]
async fn decode_stream_skips_and_reports_bad_messages() -> Result<()> {
    let msgs = vec![Message::with_id("1", "{\"n\": 1}"), Message::with_id("2", "bad"), Message::with_id("3", "{\"n\": 3}")];
    let mut failed = vec![];

    let decoded: Vec<Value> = JsonDecoder::default()
        .decode_stream(futures::stream::iter(msgs), |err| failed.extend(err.message().and_then(|msg| msg.id.clone())))
        .collect()
        .await;

    assert_eq!(decoded, vec![json!({"n": 1, "id": "1"}), json!({"n": 3, "id": "3"})], "unexpected decoded stream");
    assert_eq!(failed, vec!["2".to_string()], "expected the bad message to be reported");
    Ok(())
}
