use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Status marking a certificate or outcome that is still under manual review.
pub const UNDER_BEHANDLING: &str = "UNDER_BEHANDLING";

/// Decodes `bytes` as a JSON object into `T`. Arrays and scalars are rejected even where
/// the derived impl of `T` would take them.
pub fn decode_object<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, serde_json::Error> {
    let object: Map<String, Value> = serde_json::from_slice(bytes)?;
    serde_json::from_value(Value::Object(object))
}

/// The part of a received certificate the primary filter looks at.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrimaryRecord {
    #[serde(rename = "merknader", default)]
    pub annotations: Option<Vec<Annotation>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    #[serde(rename = "type")]
    pub kind: String,
}

impl PrimaryRecord {
    pub fn under_review(&self) -> bool {
        self.annotations
            .iter()
            .flatten()
            .any(|a| a.kind == UNDER_BEHANDLING)
    }
}

/// The part of a rule evaluation outcome the outcome filter looks at.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    #[serde(rename = "ruleHits")]
    pub rule_hits: Vec<RuleHit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleHit {
    #[serde(rename = "ruleName")]
    pub name: String,
}

impl OutcomeRecord {
    pub fn under_review(&self) -> bool {
        self.rule_hits.iter().any(|h| h.name == UNDER_BEHANDLING)
    }
}

/// Untouched payloads of a certificate and its outcome, written to the sink as base64
/// strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedRecord {
    #[serde(rename = "receivedSykmelding", with = "base64_bytes")]
    pub received_sykmelding: Bytes,
    #[serde(rename = "behandlingsUtfall", with = "base64_bytes")]
    pub behandlings_utfall: Bytes,
}

impl CombinedRecord {
    pub fn new(received_sykmelding: &Bytes, behandlings_utfall: &Bytes) -> Self {
        CombinedRecord {
            received_sykmelding: received_sykmelding.clone(),
            behandlings_utfall: behandlings_utfall.clone(),
        }
    }
}

mod base64_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(v: &Bytes, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(v))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_without_annotations_is_not_under_review() {
        let rec: PrimaryRecord = serde_json::from_str(r#"{"id":"abc","merknader":null}"#).unwrap();
        assert!(!rec.under_review());
        let rec: PrimaryRecord = serde_json::from_str(r#"{"id":"abc"}"#).unwrap();
        assert!(!rec.under_review());
    }

    #[test]
    fn primary_annotation_type_is_matched() {
        let rec: PrimaryRecord = serde_json::from_str(
            r#"{"merknader":[{"type":"TILBAKEDATERT","beskrivelse":null},{"type":"UNDER_BEHANDLING"}]}"#,
        ).unwrap();
        assert!(rec.under_review());
    }

    #[test]
    fn outcome_requires_rule_hits() {
        assert!(serde_json::from_str::<OutcomeRecord>(r#"{"status":"OK"}"#).is_err());
        let rec: OutcomeRecord = serde_json::from_str(
            r#"{"status":"MANUAL_PROCESSING","ruleHits":[{"ruleName":"UNDER_BEHANDLING","messageForUser":""}]}"#,
        ).unwrap();
        assert!(rec.under_review());
    }

    #[test]
    fn combined_record_encodes_payloads_as_base64() {
        let combined = CombinedRecord::new(&Bytes::from_static(b"{\"a\":1}"), &Bytes::from_static(&[0xff, 0x00]));
        let json = serde_json::to_string(&combined).unwrap();
        assert_eq!(json, r#"{"receivedSykmelding":"eyJhIjoxfQ==","behandlingsUtfall":"/wA="}"#);
        let back: CombinedRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, combined);
    }
}
