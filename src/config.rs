use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::ai::DEFAULT_MODEL;
use crate::analysis::DEFAULT_SIMULATED_DELAY;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendMode {
    Live,
    Simulated,
}

impl fmt::Display for BackendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendMode::Live => write!(f, "live"),
            BackendMode::Simulated => write!(f, "simulated"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FirebaseConfig {
    pub api_key: String,
    pub project_id: String,
    pub google_id_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub firebase: Option<FirebaseConfig>,
    pub data_dir: PathBuf,
    pub simulated_delay: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        if let Ok(path) = dotenv::dotenv() {
            tracing::debug!(path = %path.display(), "loaded .env");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let gemini_api_key = non_empty("GEMINI_API_KEY")
            .or_else(|| non_empty("API_KEY"))
            .filter(|key| is_usable_gemini_key(key));

        let firebase = match (non_empty("FIREBASE_API_KEY"), non_empty("FIREBASE_PROJECT_ID")) {
            (Some(api_key), Some(project_id)) if !is_placeholder(&api_key) && !is_placeholder(&project_id) => {
                Some(FirebaseConfig {
                    api_key,
                    project_id,
                    google_id_token: non_empty("GOOGLE_ID_TOKEN"),
                })
            }
            _ => None,
        };

        let data_dir = non_empty("HOMEWISE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        let simulated_delay = non_empty("HOMEWISE_SIMULATED_DELAY_MS")
            .and_then(|ms| ms.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_SIMULATED_DELAY);

        Self {
            gemini_api_key,
            gemini_model: non_empty("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            firebase,
            data_dir,
            simulated_delay,
        }
    }

    pub fn analysis_mode(&self) -> BackendMode {
        if self.gemini_api_key.is_some() {
            BackendMode::Live
        } else {
            BackendMode::Simulated
        }
    }

    pub fn account_mode(&self) -> BackendMode {
        if self.firebase.is_some() {
            BackendMode::Live
        } else {
            BackendMode::Simulated
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("homewise.db")
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join("homewise.log")
    }
}

fn is_placeholder(value: &str) -> bool {
    value.to_uppercase().contains("YOUR")
}

fn is_usable_gemini_key(key: &str) -> bool {
    !key.starts_with("YOUR") && key.len() >= 10
}

fn default_data_dir() -> PathBuf {
    // Use XDG data directory or fallback
    if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "homewise") {
        proj_dirs.data_dir().to_path_buf()
    } else {
        PathBuf::from(".homewise")
    }
}
