use chrono::{DateTime, Utc};
use rand::Rng;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::auth::FirebaseSession;
use crate::config::BackendMode;
use crate::db::LocalStorage;
use crate::error::PersistenceError;
use crate::firestore::{self, FirestoreClient};
use crate::models::{AnalysisResult, User};

const ANALYSES_COLLECTION: &str = "analyses";
const SAVED_AT_FIELD: &str = "savedAt";

pub trait AnalysisStore {
    fn mode(&self) -> BackendMode;

    // Any id on `analysis` is ignored; the store assigns id and save time.
    fn save_analysis(&self, user: &User, analysis: &AnalysisResult) -> Result<String, PersistenceError>;

    // Most recently saved first.
    fn get_analyses_for_user(&self, user: &User) -> Result<Vec<AnalysisResult>, PersistenceError>;

    fn delete_analysis(&self, user: &User, id: &str) -> Result<(), PersistenceError>;
}

// --- Local storage backend ---

pub fn analyses_key(uid: &str) -> String {
    format!("analyses_{}", uid)
}

pub struct LocalAnalysisStore {
    storage: LocalStorage,
}

impl LocalAnalysisStore {
    pub fn new(storage: LocalStorage) -> Self {
        Self { storage }
    }

    // Records stay as raw JSON here so that one bad entry never costs the
    // others when the list is written back.
    fn load(&self, user: &User) -> Result<Vec<Value>, PersistenceError> {
        let key = analyses_key(&user.uid);
        let Some(raw) = self.storage.get_item(&key)? else {
            return Ok(Vec::new());
        };
        serde_json::from_str::<Vec<Value>>(&raw).map_err(|e| PersistenceError::Decode(format!("{}: {}", key, e)))
    }

    fn write(&self, user: &User, records: &[Value]) -> Result<(), PersistenceError> {
        self.storage.set_json(&analyses_key(&user.uid), records)?;
        Ok(())
    }

    fn new_id(now: DateTime<Utc>) -> String {
        let suffix: u16 = rand::thread_rng().r#gen();
        format!("sim_{}_{:04x}", now.timestamp_millis(), suffix)
    }
}

impl AnalysisStore for LocalAnalysisStore {
    fn mode(&self) -> BackendMode {
        BackendMode::Simulated
    }

    fn save_analysis(&self, user: &User, analysis: &AnalysisResult) -> Result<String, PersistenceError> {
        let mut records = self.load(user)?;
        let now = Utc::now();
        let id = Self::new_id(now);

        let mut record = analysis.without_identity();
        record.id = Some(id.clone());
        record.saved_at = Some(now);
        let record = serde_json::to_value(record).map_err(|e| PersistenceError::Backend(e.to_string()))?;

        records.insert(0, record);
        self.write(user, &records)?;
        info!(uid = %user.uid, id, "saved analysis locally");
        Ok(id)
    }

    fn get_analyses_for_user(&self, user: &User) -> Result<Vec<AnalysisResult>, PersistenceError> {
        let records = match self.load(user) {
            Ok(records) => records,
            Err(PersistenceError::Decode(e)) => {
                warn!(error = %e, "stored analyses are unreadable, treating as empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let mut analyses = Vec::with_capacity(records.len());
        for record in records {
            match serde_json::from_value::<AnalysisResult>(record) {
                Ok(analysis) => analyses.push(analysis),
                Err(e) => warn!(uid = %user.uid, error = %e, "skipping stored analysis that is not an object"),
            }
        }
        Ok(analyses)
    }

    fn delete_analysis(&self, user: &User, id: &str) -> Result<(), PersistenceError> {
        let mut records = self.load(user)?;
        let before = records.len();
        records.retain(|r| r.get("id").and_then(Value::as_str) != Some(id));
        if records.len() != before {
            self.write(user, &records)?;
        }
        Ok(())
    }
}

// --- Firestore backend ---

pub struct FirestoreAnalysisStore {
    client: FirestoreClient,
    session: Arc<FirebaseSession>,
}

impl FirestoreAnalysisStore {
    pub fn new(client: FirestoreClient, session: Arc<FirebaseSession>) -> Self {
        Self { client, session }
    }
}

// The document name is the id. Mistyped sections decode as missing.
fn analysis_from_document(doc: &firestore::Document) -> Result<AnalysisResult, PersistenceError> {
    let mut value = doc.to_json();
    if let Some(object) = value.as_object_mut() {
        object.insert("id".to_string(), Value::String(doc.id().to_string()));
        // A pending server timestamp can come back as null.
        if object.get(SAVED_AT_FIELD).is_some_and(Value::is_null) {
            object.remove(SAVED_AT_FIELD);
        }
    }
    serde_json::from_value(value).map_err(|e| PersistenceError::Decode(format!("{}: {}", doc.id(), e)))
}

impl AnalysisStore for FirestoreAnalysisStore {
    fn mode(&self) -> BackendMode {
        BackendMode::Live
    }

    fn save_analysis(&self, user: &User, analysis: &AnalysisResult) -> Result<String, PersistenceError> {
        let token = self.session.id_token_for(user)?;
        let path = firestore::user_collection_path(&user.uid, ANALYSES_COLLECTION)?;

        let value = serde_json::to_value(analysis.without_identity())
            .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        let fields = value
            .as_object()
            .map(firestore::encode_fields)
            .unwrap_or_default();

        let id = self
            .client
            .create_with_server_time(&token, &path, fields, SAVED_AT_FIELD)
            .inspect_err(|e| error!(error = %e, "could not save analysis"))?;
        info!(uid = %user.uid, id, "saved analysis to Firestore");
        Ok(id)
    }

    fn get_analyses_for_user(&self, user: &User) -> Result<Vec<AnalysisResult>, PersistenceError> {
        let token = self.session.id_token_for(user)?;
        let parent = firestore::user_document_path(&user.uid)?;

        let documents = self
            .client
            .list_ordered_desc(&token, &parent, ANALYSES_COLLECTION, SAVED_AT_FIELD)
            .inspect_err(|e| error!(error = %e, "could not fetch analyses"))?;

        let mut analyses = Vec::with_capacity(documents.len());
        for doc in &documents {
            match analysis_from_document(doc) {
                Ok(analysis) => analyses.push(analysis),
                Err(e) => warn!(error = %e, "skipping stored analysis that is not an object"),
            }
        }
        Ok(analyses)
    }

    fn delete_analysis(&self, user: &User, id: &str) -> Result<(), PersistenceError> {
        let token = self.session.id_token_for(user)?;
        let path = firestore::user_collection_path(&user.uid, ANALYSES_COLLECTION)?;
        self.client
            .delete(&token, &path, id)
            .inspect_err(|e| error!(error = %e, "could not delete analysis"))
    }
}
