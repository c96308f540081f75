//! Lead records and custom-question metadata embedded in a job payload.
//!
//! Lead batches are serialized by the upload path straight from nullable
//! database columns, so a single field may arrive as an absent key, `null`,
//! a plain string, or a wrapped value object such as
//! `{"String": "x", "Valid": true}`. Every field here decodes to a plain
//! string; anything that is not a valid value decodes to `""`.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use tracing::warn;

/// A purchased lead as carried in the job payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LeadRecord {
    #[serde(rename = "EmailHash", default, deserialize_with = "text")]
    pub email: String,
    #[serde(rename = "FullName", default, deserialize_with = "text")]
    pub full_name: String,
    #[serde(rename = "PhoneHash", default, deserialize_with = "text")]
    pub phone: String,
    #[serde(rename = "CompanyName", default, deserialize_with = "text")]
    pub company_name: String,
    #[serde(rename = "EmployeeSize", default, deserialize_with = "text")]
    pub employee_size: String,
    #[serde(rename = "RevenueSize", default, deserialize_with = "text")]
    pub revenue_size: String,
    #[serde(rename = "PublisherName", default, deserialize_with = "text")]
    pub publisher_name: String,
    #[serde(rename = "LinkedinCompany", default, deserialize_with = "text")]
    pub linkedin_company: String,
    #[serde(rename = "LinkedinContact", default, deserialize_with = "text")]
    pub linkedin_contact: String,
    #[serde(rename = "DownloadedAssetName", default, deserialize_with = "text")]
    pub downloaded_asset_name: String,
    #[serde(rename = "State", default, deserialize_with = "text")]
    pub state: String,
    #[serde(rename = "Region", default, deserialize_with = "text")]
    pub region: String,
    #[serde(rename = "Address", default, deserialize_with = "text")]
    pub address: String,
    #[serde(rename = "Industry", default, deserialize_with = "text")]
    pub industry: String,
    #[serde(rename = "IpAddress", default, deserialize_with = "ip_address")]
    pub ip_address: String,
    #[serde(rename = "CapturedAt", default, deserialize_with = "timestamp")]
    pub captured_at: String,
    /// Custom-question id to answer text.
    #[serde(rename = "CustomAnswers", default, deserialize_with = "custom_answers")]
    pub custom_answers: HashMap<String, String>,
}

impl LeadRecord {
    pub fn answer(&self, question_id: &str) -> &str {
        self.custom_answers
            .get(question_id)
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// Custom question attached to the campaign; becomes an extra CSV column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Question {
    #[serde(default, deserialize_with = "text")]
    pub id: String,
    #[serde(default, deserialize_with = "text")]
    pub question_text: String,
    #[serde(default, deserialize_with = "display_order")]
    pub display_order: i64,
}

// =============================================================================
// Field decoders
// =============================================================================

fn is_marked_invalid(map: &Map<String, Value>) -> bool {
    matches!(map.get("Valid"), Some(Value::Bool(false)))
}

/// Plain string, or the `String` member of a valid wrapped value.
pub(crate) fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(map) if !is_marked_invalid(map) => map
            .get("String")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    }
}

pub(crate) fn text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().map(text_of).unwrap_or_default())
}

/// `{"IPNet": {"IP": "10.0.0.1", ...}, "Valid": true}` or a plain string.
fn ip_address<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => s,
        Some(Value::Object(map)) if !is_marked_invalid(&map) => map
            .get("IPNet")
            .and_then(|net| net.get("IP"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    })
}

/// `{"Time": "2024-05-01T10:00:00Z", "Valid": true}` or a plain string.
fn timestamp<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => s,
        Some(Value::Object(map)) if !is_marked_invalid(&map) => map
            .get("Time")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    })
}

/// A direct answer map, or `{"RawMessage": {...}, "Valid": true}`.
fn custom_answers<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let Some(Value::Object(map)) = value else {
        return Ok(HashMap::new());
    };

    let answers = if map.contains_key("RawMessage") {
        let valid = matches!(map.get("Valid"), Some(Value::Bool(true)));
        match map.get("RawMessage") {
            Some(Value::Object(inner)) if valid => inner.clone(),
            _ => Map::new(),
        }
    } else {
        map
    };

    Ok(answers
        .iter()
        .map(|(id, answer)| (id.clone(), text_of(answer)))
        .collect())
}

fn display_order<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        _ => 0,
    })
}

/// Questions are optional metadata: a malformed list is ignored rather than
/// failing the job.
pub(crate) fn questions<'de, D>(deserializer: D) -> Result<Vec<Question>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items
            .into_iter()
            .enumerate()
            .filter_map(|(index, item)| match serde_json::from_value::<Question>(item) {
                Ok(question) => Some(question),
                Err(e) => {
                    warn!(index = index, error = %e, "payload_question_skipped");
                    None
                }
            })
            .collect()),
        Some(_) => {
            warn!("payload_questions_not_a_list");
            Ok(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lead(value: Value) -> LeadRecord {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_text_accepts_plain_and_wrapped_strings() {
        let record = lead(json!({
            "FullName": "Jane Doe",
            "EmailHash": {"String": "j@x.com", "Valid": true},
        }));
        assert_eq!(record.full_name, "Jane Doe");
        assert_eq!(record.email, "j@x.com");
    }

    #[test]
    fn test_invalid_values_decode_to_empty() {
        let record = lead(json!({
            "EmailHash": {"String": "stale@x.com", "Valid": false},
            "FullName": null,
            "PhoneHash": 5551234,
            "CompanyName": {"Valid": true},
        }));
        assert_eq!(record.email, "");
        assert_eq!(record.full_name, "");
        assert_eq!(record.phone, "");
        assert_eq!(record.company_name, "");
        assert_eq!(record.state, "");
    }

    #[test]
    fn test_ip_address_from_ipnet() {
        let record = lead(json!({
            "IpAddress": {"IPNet": {"IP": "203.0.113.7", "Mask": "/////w=="}, "Valid": true}
        }));
        assert_eq!(record.ip_address, "203.0.113.7");

        let invalid = lead(json!({
            "IpAddress": {"IPNet": {"IP": "203.0.113.7"}, "Valid": false}
        }));
        assert_eq!(invalid.ip_address, "");

        let plain = lead(json!({"IpAddress": "198.51.100.2"}));
        assert_eq!(plain.ip_address, "198.51.100.2");
    }

    #[test]
    fn test_timestamp_from_time_object() {
        let record = lead(json!({
            "CapturedAt": {"Time": "2024-05-01T10:00:00Z", "Valid": true}
        }));
        assert_eq!(record.captured_at, "2024-05-01T10:00:00Z");

        let invalid = lead(json!({
            "CapturedAt": {"Time": "0001-01-01T00:00:00Z", "Valid": false}
        }));
        assert_eq!(invalid.captured_at, "");
    }

    #[test]
    fn test_custom_answers_direct_and_wrapped() {
        let direct = lead(json!({
            "CustomAnswers": {"q1": "Yes", "q2": {"String": "Q3", "Valid": true}}
        }));
        assert_eq!(direct.answer("q1"), "Yes");
        assert_eq!(direct.answer("q2"), "Q3");
        assert_eq!(direct.answer("missing"), "");

        let wrapped = lead(json!({
            "CustomAnswers": {"RawMessage": {"q1": "Budget approved"}, "Valid": true}
        }));
        assert_eq!(wrapped.answer("q1"), "Budget approved");

        let invalid = lead(json!({
            "CustomAnswers": {"RawMessage": {"q1": "ignored"}, "Valid": false}
        }));
        assert!(invalid.custom_answers.is_empty());
    }

    #[test]
    fn test_question_display_order_accepts_floats() {
        let question: Question = serde_json::from_value(json!({
            "id": "q1",
            "question_text": "Timeline?",
            "display_order": 2.0
        }))
        .unwrap();
        assert_eq!(question.display_order, 2);

        let defaults: Question = serde_json::from_value(json!({"id": "q2"})).unwrap();
        assert_eq!(defaults.display_order, 0);
        assert_eq!(defaults.question_text, "");
    }
}
