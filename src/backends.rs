use std::sync::Arc;
use tracing::{info, warn};

use crate::ai::GeminiProvider;
use crate::analysis::AnalysisGateway;
use crate::auth::{AuthBackend, FirebaseAuth, FirebaseSession, SimulatedAuth};
use crate::config::{BackendMode, Config, FirebaseConfig};
use crate::db::LocalStorage;
use crate::firestore::FirestoreClient;
use crate::store::{AnalysisStore, FirestoreAnalysisStore, LocalAnalysisStore};

pub struct Backends {
    pub gateway: Arc<AnalysisGateway>,
    pub auth: Box<dyn AuthBackend>,
    pub store: Box<dyn AnalysisStore>,
}

impl Backends {
    pub fn from_config(config: &Config, storage: LocalStorage) -> Self {
        let gateway = Arc::new(build_gateway(config));

        let (auth, store) = match &config.firebase {
            Some(firebase) => match build_firebase(firebase, storage.clone()) {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "Firebase unavailable, using simulated auth and storage");
                    simulated_account(storage)
                }
            },
            None => {
                warn!("Firebase config missing or invalid, using simulated auth and storage");
                simulated_account(storage)
            }
        };

        let backends = Self {
            gateway,
            auth,
            store,
        };
        info!(
            analysis = %backends.analysis_mode(),
            auth = %backends.auth.mode(),
            storage = %backends.store.mode(),
            "backends selected"
        );
        backends
    }

    pub fn analysis_mode(&self) -> BackendMode {
        if self.gateway.is_live() {
            BackendMode::Live
        } else {
            BackendMode::Simulated
        }
    }
}

fn build_gateway(config: &Config) -> AnalysisGateway {
    let Some(api_key) = &config.gemini_api_key else {
        warn!("Gemini API key missing or invalid, analysis runs in simulation mode");
        return AnalysisGateway::Simulated {
            delay: config.simulated_delay,
        };
    };

    match GeminiProvider::new(api_key.clone(), config.gemini_model.clone()) {
        Ok(provider) => AnalysisGateway::Live(Box::new(provider)),
        Err(e) => {
            warn!(error = %e, "could not initialize Gemini client, analysis runs in simulation mode");
            AnalysisGateway::Simulated {
                delay: config.simulated_delay,
            }
        }
    }
}

fn build_firebase(
    firebase: &FirebaseConfig,
    storage: LocalStorage,
) -> anyhow::Result<(Box<dyn AuthBackend>, Box<dyn AnalysisStore>)> {
    let session = Arc::new(FirebaseSession::new(firebase.api_key.clone(), storage)?);
    session.restore();
    let client = FirestoreClient::new(firebase.project_id.clone())?;

    let auth = FirebaseAuth::new(session.clone(), firebase.google_id_token.clone());
    let store = FirestoreAnalysisStore::new(client, session);
    Ok((Box::new(auth), Box::new(store)))
}

fn simulated_account(storage: LocalStorage) -> (Box<dyn AuthBackend>, Box<dyn AnalysisStore>) {
    (
        Box::new(SimulatedAuth::new(storage.clone())),
        Box::new(LocalAnalysisStore::new(storage)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_empty_config_selects_simulated_everything() {
        let config = config_from(&[("HOMEWISE_SIMULATED_DELAY_MS", "0")]);
        let backends = Backends::from_config(&config, LocalStorage::open_in_memory().unwrap());

        assert_eq!(backends.analysis_mode(), BackendMode::Simulated);
        assert_eq!(backends.auth.mode(), BackendMode::Simulated);
        assert_eq!(backends.store.mode(), BackendMode::Simulated);
    }

    #[test]
    fn test_credentials_select_live_backends() {
        let config = config_from(&[
            ("GEMINI_API_KEY", "AIzaSyExample-1234567890"),
            ("FIREBASE_API_KEY", "AIzaFirebase"),
            ("FIREBASE_PROJECT_ID", "homewise-demo"),
        ]);
        let backends = Backends::from_config(&config, LocalStorage::open_in_memory().unwrap());

        assert_eq!(backends.analysis_mode(), BackendMode::Live);
        assert_eq!(backends.auth.mode(), BackendMode::Live);
        assert_eq!(backends.store.mode(), BackendMode::Live);
        // No persisted session, so nobody is signed in.
        assert!(backends.auth.current_user().is_none());
    }

    #[test]
    fn test_simulated_backends_share_storage() {
        let config = config_from(&[]);
        let storage = LocalStorage::open_in_memory().unwrap();
        let backends = Backends::from_config(&config, storage.clone());

        let user = backends.auth.login_with_google().unwrap();
        assert!(storage.get_item(crate::auth::SIMULATED_USER_KEY).unwrap().is_some());
        assert!(backends.store.get_analyses_for_user(&user).unwrap().is_empty());
    }
}
