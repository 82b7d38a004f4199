use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::Deserialize;
use serde_json::{Map, Number, Value, json};
use std::time::Duration;

use crate::error::PersistenceError;

const FIRESTORE_API_BASE: &str = "https://firestore.googleapis.com/v1";
const AUTO_ID_LEN: usize = 20;

// --- Codec ---

pub fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                json!({ "integerValue": i.to_string() })
            } else {
                json!({ "doubleValue": n.as_f64().unwrap_or(0.0) })
            }
        }
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => {
            let values: Vec<Value> = items.iter().map(encode_value).collect();
            json!({ "arrayValue": { "values": values } })
        }
        Value::Object(map) => json!({ "mapValue": { "fields": encode_fields(map) } }),
    }
}

pub fn encode_fields(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter()
        .map(|(key, value)| (key.clone(), encode_value(value)))
        .collect()
}

pub fn decode_value(value: &Value) -> Value {
    let Some(object) = value.as_object() else {
        return Value::Null;
    };
    let Some((kind, inner)) = object.iter().next() else {
        return Value::Null;
    };

    match kind.as_str() {
        "nullValue" => Value::Null,
        "booleanValue" => Value::Bool(inner.as_bool().unwrap_or(false)),
        "integerValue" => inner
            .as_str()
            .and_then(|s| s.parse::<i64>().ok())
            .or_else(|| inner.as_i64())
            .map(|i| Value::Number(i.into()))
            .unwrap_or(Value::Null),
        // NaN and Infinity arrive as strings and have no JSON form.
        "doubleValue" => inner
            .as_f64()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        "stringValue" | "timestampValue" | "referenceValue" | "bytesValue" => inner.clone(),
        "arrayValue" => Value::Array(
            inner
                .get("values")
                .and_then(Value::as_array)
                .map(|values| values.iter().map(decode_value).collect())
                .unwrap_or_default(),
        ),
        "mapValue" => Value::Object(
            inner
                .get("fields")
                .and_then(Value::as_object)
                .map(decode_fields)
                .unwrap_or_default(),
        ),
        "geoPointValue" => inner.clone(),
        _ => Value::Null,
    }
}

pub fn decode_fields(fields: &Map<String, Value>) -> Map<String, Value> {
    fields
        .iter()
        .map(|(key, value)| (key.clone(), decode_value(value)))
        .collect()
}

pub fn auto_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(AUTO_ID_LEN)
        .map(char::from)
        .collect()
}

fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

// --- REST client ---

#[derive(Debug, Clone, Deserialize)]
pub struct Document {
    pub name: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Document {
    pub fn id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    pub fn to_json(&self) -> Value {
        Value::Object(decode_fields(&self.fields))
    }
}

#[derive(Debug, Deserialize)]
struct RunQueryItem {
    #[serde(default)]
    document: Option<Document>,
}

#[derive(Debug)]
pub struct FirestoreClient {
    project_id: String,
    client: reqwest::blocking::Client,
}

impl FirestoreClient {
    pub fn new(project_id: String) -> Result<Self, PersistenceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { project_id, client })
    }

    fn database_name(&self) -> String {
        format!("projects/{}/databases/(default)", self.project_id)
    }

    fn documents_url(&self) -> String {
        format!("{}/{}/documents", FIRESTORE_API_BASE, self.database_name())
    }

    pub fn create_with_server_time(
        &self,
        id_token: &str,
        collection_path: &str,
        fields: Map<String, Value>,
        server_time_field: &str,
    ) -> Result<String, PersistenceError> {
        let id = auto_id();
        let name = format!("{}/documents/{}/{}", self.database_name(), collection_path, id);
        let body = json!({
            "writes": [{
                "update": { "name": name, "fields": fields },
                "updateTransforms": [{
                    "fieldPath": server_time_field,
                    "setToServerValue": "REQUEST_TIME",
                }],
                "currentDocument": { "exists": false },
            }]
        });

        let response = self
            .client
            .post(format!("{}:commit", self.documents_url()))
            .bearer_auth(id_token)
            .json(&body)
            .send()?;
        check_status(response, "commit")?;
        Ok(id)
    }

    pub fn list_ordered_desc(
        &self,
        id_token: &str,
        parent_path: &str,
        collection_id: &str,
        order_field: &str,
    ) -> Result<Vec<Document>, PersistenceError> {
        let body = json!({
            "structuredQuery": {
                "from": [{ "collectionId": collection_id }],
                "orderBy": [{
                    "field": { "fieldPath": order_field },
                    "direction": "DESCENDING",
                }],
            }
        });

        let response = self
            .client
            .post(format!("{}/{}:runQuery", self.documents_url(), parent_path))
            .bearer_auth(id_token)
            .json(&body)
            .send()?;
        let response = check_status(response, "runQuery")?;

        let items: Vec<RunQueryItem> = response
            .json()
            .map_err(|e| PersistenceError::Decode(e.to_string()))?;
        Ok(items.into_iter().filter_map(|item| item.document).collect())
    }

    // Deleting a missing document succeeds.
    pub fn delete(
        &self,
        id_token: &str,
        collection_path: &str,
        id: &str,
    ) -> Result<(), PersistenceError> {
        if !is_safe_segment(id) {
            // Such an id cannot name a stored document.
            tracing::debug!(id, "ignoring delete of malformed document id");
            return Ok(());
        }

        let response = self
            .client
            .delete(format!("{}/{}/{}", self.documents_url(), collection_path, id))
            .bearer_auth(id_token)
            .send()?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        check_status(response, "delete")?;
        Ok(())
    }
}

fn check_status(
    response: reqwest::blocking::Response,
    operation: &str,
) -> Result<reqwest::blocking::Response, PersistenceError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().unwrap_or_default();
    tracing::error!(operation, %status, body = %body, "Firestore request failed");
    Err(PersistenceError::Backend(format!(
        "Firestore {} failed with status {}",
        operation, status
    )))
}

pub fn user_document_path(uid: &str) -> Result<String, PersistenceError> {
    if !is_safe_segment(uid) {
        return Err(PersistenceError::Backend(format!("invalid user id '{}'", uid)));
    }
    Ok(format!("users/{}", uid))
}

pub fn user_collection_path(uid: &str, collection: &str) -> Result<String, PersistenceError> {
    Ok(format!("{}/{}", user_document_path(uid)?, collection))
}
