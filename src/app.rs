use tracing::{debug, error, info};

use crate::analysis::AnalysisResponse;
use crate::auth::AuthBackend;
use crate::error::AnalysisError;
use crate::models::{AnalysisResult, GroundingChunk, User, UserInput};
use crate::store::AnalysisStore;
use crate::validator::{self, CompleteAnalysis};

pub const LOGIN_TO_SAVE: &str = "Please log in to save your analysis.";
pub const SAVE_SUCCEEDED: &str = "Analysis saved successfully!";
pub const SAVE_FAILED: &str = "Failed to save analysis.";
pub const DELETE_FAILED: &str = "Failed to delete analysis.";
pub const LOAD_FAILED: &str = "Failed to load saved analyses.";
pub const COMPARE_NEEDS_TWO: &str = "Select at least two analyses to compare.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Form,
    Loading,
    Results,
    Dashboard,
    Compare,
}

// Only applied while its generation is still current.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisTicket {
    pub generation: u64,
    pub input: UserInput,
}

pub enum ResultsView<'a> {
    Complete(CompleteAnalysis<'a>),
    Incomplete,
}

pub struct App {
    pub view: View,
    pub analysis_result: Option<AnalysisResult>,
    pub citations: Vec<GroundingChunk>,
    pub error: Option<String>,
    pub current_user: Option<User>,
    pub saved_analyses: Vec<AnalysisResult>,
    pub analyses_to_compare: Vec<AnalysisResult>,
    pub alert: Option<String>,
    pub auth_prompt_open: bool,
    generation: u64,
    in_flight: bool,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    pub fn new() -> Self {
        Self {
            view: View::Form,
            analysis_result: None,
            citations: Vec::new(),
            error: None,
            current_user: None,
            saved_analyses: Vec::new(),
            analyses_to_compare: Vec::new(),
            alert: None,
            auth_prompt_open: false,
            generation: 0,
            in_flight: false,
        }
    }

    // --- Analysis lifecycle ---

    pub fn submit(&mut self, input: UserInput) -> Option<AnalysisTicket> {
        if self.view != View::Form || self.in_flight {
            return None;
        }
        self.generation += 1;
        self.in_flight = true;
        self.view = View::Loading;
        self.analysis_result = None;
        self.citations.clear();
        self.error = None;
        info!(generation = self.generation, location = %input.property_location, "analysis submitted");
        Some(AnalysisTicket {
            generation: self.generation,
            input,
        })
    }

    pub fn complete_analysis(
        &mut self,
        ticket: &AnalysisTicket,
        outcome: Result<AnalysisResponse, AnalysisError>,
    ) -> bool {
        if ticket.generation != self.generation {
            debug!(
                ticket = ticket.generation,
                current = self.generation,
                "discarding stale analysis response"
            );
            return false;
        }
        self.in_flight = false;
        if self.view != View::Loading {
            debug!(view = ?self.view, "discarding analysis response, no longer loading");
            return false;
        }

        match outcome {
            Ok(response) => {
                self.analysis_result = Some(response.analysis);
                self.citations = response.citations;
                self.view = View::Results;
                info!(generation = ticket.generation, "analysis ready");
            }
            Err(e) => {
                error!(error = %e, "analysis failed");
                self.error = Some(e.to_string());
                self.view = View::Form;
            }
        }
        true
    }

    pub fn reset(&mut self) {
        // Any response still in flight now belongs to an old generation.
        self.generation += 1;
        self.in_flight = false;
        self.view = View::Form;
        self.analysis_result = None;
        self.citations.clear();
        self.error = None;
    }

    pub fn dismiss_error(&mut self) {
        self.error = None;
    }

    pub fn results_view(&self) -> ResultsView<'_> {
        match self.analysis_result.as_ref().and_then(validator::complete) {
            Some(complete) => ResultsView::Complete(complete),
            None => ResultsView::Incomplete,
        }
    }

    pub fn is_saved(&self) -> bool {
        let Some(id) = self.analysis_result.as_ref().and_then(|r| r.id.as_deref()) else {
            return false;
        };
        self.saved_analyses
            .iter()
            .any(|saved| saved.id.as_deref() == Some(id))
    }

    // --- Saved analyses ---

    pub fn show_dashboard(&mut self, store: &dyn AnalysisStore) {
        let Some(user) = self.current_user.clone() else {
            self.auth_prompt_open = true;
            return;
        };
        match store.get_analyses_for_user(&user) {
            Ok(analyses) => {
                self.saved_analyses = analyses;
                self.view = View::Dashboard;
                info!(count = self.saved_analyses.len(), "showing dashboard");
            }
            Err(e) => {
                error!(error = %e, "could not load saved analyses");
                self.alert = Some(LOAD_FAILED.to_string());
            }
        }
    }

    pub fn view_saved(&mut self, id: &str) -> bool {
        if self.view != View::Dashboard {
            return false;
        }
        let Some(analysis) = self
            .saved_analyses
            .iter()
            .find(|a| a.id.as_deref() == Some(id))
        else {
            return false;
        };
        self.analysis_result = Some(analysis.clone());
        // Citations are never persisted.
        self.citations.clear();
        self.error = None;
        self.view = View::Results;
        true
    }

    pub fn start_compare(&mut self, ids: &[String]) -> bool {
        if self.view != View::Dashboard {
            return false;
        }
        let selected: Vec<AnalysisResult> = self
            .saved_analyses
            .iter()
            .filter(|a| a.id.as_ref().is_some_and(|id| ids.contains(id)))
            .cloned()
            .collect();
        if selected.len() < 2 {
            self.alert = Some(COMPARE_NEEDS_TWO.to_string());
            return false;
        }
        self.analyses_to_compare = selected;
        self.view = View::Compare;
        true
    }

    pub fn save_current(&mut self, store: &dyn AnalysisStore) {
        let Some(user) = self.current_user.clone() else {
            self.alert = Some(LOGIN_TO_SAVE.to_string());
            return;
        };
        if self.is_saved() {
            return;
        }
        let Some(result) = self.analysis_result.as_ref() else {
            return;
        };

        match store.save_analysis(&user, &result.without_identity()) {
            Ok(id) => {
                if let Some(result) = self.analysis_result.as_mut() {
                    result.id = Some(id);
                }
                self.alert = Some(SAVE_SUCCEEDED.to_string());
                self.show_dashboard(store);
            }
            Err(e) => {
                error!(error = %e, "save failed");
                self.alert = Some(SAVE_FAILED.to_string());
            }
        }
    }

    pub fn delete_saved(&mut self, store: &dyn AnalysisStore, id: &str) {
        let Some(user) = self.current_user.clone() else {
            return;
        };
        if let Err(e) = store.delete_analysis(&user, id) {
            error!(error = %e, id, "delete failed");
            self.alert = Some(DELETE_FAILED.to_string());
            return;
        }
        self.saved_analyses.retain(|a| a.id.as_deref() != Some(id));
        self.analyses_to_compare.retain(|a| a.id.as_deref() != Some(id));
        if self.view == View::Compare && self.analyses_to_compare.len() < 2 {
            self.view = View::Dashboard;
        }
    }

    // --- Auth ---

    pub fn open_auth_prompt(&mut self) {
        self.auth_prompt_open = true;
    }

    pub fn close_auth_prompt(&mut self) {
        self.auth_prompt_open = false;
    }

    pub fn dismiss_alert(&mut self) {
        self.alert = None;
    }

    pub fn login(&mut self, auth: &dyn AuthBackend) {
        match auth.login_with_google() {
            Ok(user) => {
                if auth.mode() == crate::config::BackendMode::Simulated {
                    self.alert = Some(format!(
                        "Logged in as simulated user {}. Analyses are saved on this machine only.",
                        user.display_name()
                    ));
                }
            }
            Err(e) => {
                error!(error = %e, "sign-in failed");
                self.alert = Some(e.to_string());
            }
        }
    }

    pub fn logout(&mut self, auth: &dyn AuthBackend) {
        if let Err(e) = auth.logout() {
            error!(error = %e, "sign-out failed");
            self.alert = Some(e.to_string());
        }
    }

    pub fn on_auth_changed(&mut self, user: Option<User>, store: &dyn AnalysisStore) {
        match user {
            Some(user) => {
                info!(uid = %user.uid, "signed in");
                match store.get_analyses_for_user(&user) {
                    Ok(analyses) => self.saved_analyses = analyses,
                    Err(e) => {
                        error!(error = %e, "could not load saved analyses");
                        self.saved_analyses.clear();
                        self.alert = Some(LOAD_FAILED.to_string());
                    }
                }
                self.current_user = Some(user);
                self.auth_prompt_open = false;
            }
            None => {
                if self.current_user.take().is_some() {
                    info!("signed out");
                }
                self.saved_analyses.clear();
                self.analyses_to_compare.clear();
                if matches!(self.view, View::Dashboard | View::Compare) {
                    self.view = View::Form;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::canned_analysis;
    use crate::auth::SimulatedAuth;
    use crate::db::LocalStorage;
    use crate::error::PersistenceError;
    use crate::input::FormFields;
    use crate::store::LocalAnalysisStore;
    use crate::config::BackendMode;

    struct BrokenStore;

    impl AnalysisStore for BrokenStore {
        fn mode(&self) -> BackendMode {
            BackendMode::Live
        }

        fn save_analysis(&self, _: &User, _: &AnalysisResult) -> Result<String, PersistenceError> {
            Err(PersistenceError::Backend("offline".to_string()))
        }

        fn get_analyses_for_user(&self, _: &User) -> Result<Vec<AnalysisResult>, PersistenceError> {
            Err(PersistenceError::Backend("offline".to_string()))
        }

        fn delete_analysis(&self, _: &User, _: &str) -> Result<(), PersistenceError> {
            Err(PersistenceError::Backend("offline".to_string()))
        }
    }

    fn input() -> UserInput {
        FormFields::default().collect().unwrap()
    }

    fn response() -> AnalysisResponse {
        AnalysisResponse {
            analysis: canned_analysis(input()),
            citations: Vec::new(),
        }
    }

    fn local_store() -> LocalAnalysisStore {
        LocalAnalysisStore::new(LocalStorage::open_in_memory().unwrap())
    }

    fn signed_in(store: &dyn AnalysisStore) -> App {
        let mut app = App::new();
        app.on_auth_changed(Some(SimulatedAuth::demo_user()), store);
        app
    }

    #[test]
    fn test_submit_then_success_shows_results() {
        let mut app = App::new();
        let ticket = app.submit(input()).unwrap();
        assert_eq!(app.view, View::Loading);

        assert!(app.complete_analysis(&ticket, Ok(response())));
        assert_eq!(app.view, View::Results);
        assert!(!app.in_flight);
        assert!(matches!(app.results_view(), ResultsView::Complete(_)));
    }

    #[test]
    fn test_failure_returns_to_form_with_message() {
        let mut app = App::new();
        let ticket = app.submit(input()).unwrap();
        let err = AnalysisError::Fetch("The provided Gemini API key is not valid.".to_string());

        assert!(app.complete_analysis(&ticket, Err(err)));
        assert_eq!(app.view, View::Form);
        assert_eq!(app.error.as_deref(), Some("The provided Gemini API key is not valid."));
        assert!(app.analysis_result.is_none());
    }

    #[test]
    fn test_submit_only_from_idle_form() {
        let mut app = App::new();
        let _ticket = app.submit(input()).unwrap();
        assert!(app.submit(input()).is_none());
    }

    #[test]
    fn test_stale_response_after_reset_is_discarded() {
        let mut app = App::new();
        let old = app.submit(input()).unwrap();
        app.reset();
        assert_eq!(app.view, View::Form);

        assert!(!app.complete_analysis(&old, Ok(response())));
        assert_eq!(app.view, View::Form);
        assert!(app.analysis_result.is_none());

        // A fresh request still goes through.
        let new = app.submit(input()).unwrap();
        assert!(!app.complete_analysis(&old, Ok(response())));
        assert_eq!(app.view, View::Loading);
        assert!(app.complete_analysis(&new, Ok(response())));
        assert_eq!(app.view, View::Results);
    }

    #[test]
    fn test_dashboard_requires_user() {
        let store = local_store();
        let mut app = App::new();
        app.show_dashboard(&store);
        assert_eq!(app.view, View::Form);
        assert!(app.auth_prompt_open);

        app.on_auth_changed(Some(SimulatedAuth::demo_user()), &store);
        assert!(!app.auth_prompt_open);
        app.show_dashboard(&store);
        assert_eq!(app.view, View::Dashboard);
    }

    #[test]
    fn test_save_requires_user() {
        let store = local_store();
        let mut app = App::new();
        let ticket = app.submit(input()).unwrap();
        app.complete_analysis(&ticket, Ok(response()));

        app.save_current(&store);
        assert_eq!(app.alert.as_deref(), Some(LOGIN_TO_SAVE));
        assert_eq!(app.view, View::Results);
    }

    #[test]
    fn test_save_navigates_to_dashboard_and_marks_saved() {
        let store = local_store();
        let mut app = signed_in(&store);
        let ticket = app.submit(input()).unwrap();
        app.complete_analysis(&ticket, Ok(response()));
        assert!(!app.is_saved());

        app.save_current(&store);
        assert_eq!(app.alert.as_deref(), Some(SAVE_SUCCEEDED));
        assert_eq!(app.view, View::Dashboard);
        assert_eq!(app.saved_analyses.len(), 1);
        assert!(app.is_saved());
    }

    #[test]
    fn test_failed_save_leaves_state_alone() {
        let mut app = signed_in(&local_store());
        let ticket = app.submit(input()).unwrap();
        app.complete_analysis(&ticket, Ok(response()));

        app.save_current(&BrokenStore);
        assert_eq!(app.alert.as_deref(), Some(SAVE_FAILED));
        assert_eq!(app.view, View::Results);
        assert!(!app.is_saved());
        assert!(app.analysis_result.as_ref().unwrap().id.is_none());
    }

    #[test]
    fn test_view_saved_uses_loaded_list() {
        let store = local_store();
        let user = SimulatedAuth::demo_user();
        let id = store.save_analysis(&user, &canned_analysis(input())).unwrap();
        let mut app = signed_in(&store);
        app.show_dashboard(&store);

        assert!(app.view_saved(&id));
        assert_eq!(app.view, View::Results);
        assert!(app.citations.is_empty());
        assert!(app.is_saved());
    }

    #[test]
    fn test_malformed_saved_record_renders_incomplete() {
        let storage = LocalStorage::open_in_memory().unwrap();
        storage
            .set_item(
                &crate::store::analyses_key(&SimulatedAuth::demo_user().uid),
                r#"[{"id":"sim_1","verdict":{"summary":"partial"}}]"#,
            )
            .unwrap();
        let store = LocalAnalysisStore::new(storage);
        let mut app = signed_in(&store);
        app.show_dashboard(&store);

        assert!(app.view_saved("sim_1"));
        assert!(matches!(app.results_view(), ResultsView::Incomplete));
        app.reset();
        assert_eq!(app.view, View::Form);
    }

    #[test]
    fn test_mistyped_saved_record_renders_incomplete() {
        let storage = LocalStorage::open_in_memory().unwrap();
        storage
            .set_item(
                &crate::store::analyses_key(&SimulatedAuth::demo_user().uid),
                r#"[{"id":"sim_2","verdict":{"decision":"maybe","summary":"?","pros":[],"cons":[]},
                    "marketAnalysis":{"trend":"sideways","sentiment":"50","narrative":""},
                    "affordability":{"monthlyPayment":"lots"}}]"#,
            )
            .unwrap();
        let store = LocalAnalysisStore::new(storage);
        let mut app = signed_in(&store);
        app.show_dashboard(&store);

        assert_eq!(app.saved_analyses.len(), 1);
        assert!(app.view_saved("sim_2"));
        assert!(matches!(app.results_view(), ResultsView::Incomplete));
    }

    #[test]
    fn test_compare_needs_two_and_keeps_dashboard_order() {
        let store = local_store();
        let user = SimulatedAuth::demo_user();
        let first = store.save_analysis(&user, &canned_analysis(input())).unwrap();
        let second = store.save_analysis(&user, &canned_analysis(input())).unwrap();
        let mut app = signed_in(&store);
        app.show_dashboard(&store);

        assert!(!app.start_compare(&[first.clone()]));
        assert_eq!(app.alert.as_deref(), Some(COMPARE_NEEDS_TWO));
        assert_eq!(app.view, View::Dashboard);

        assert!(app.start_compare(&[first.clone(), second.clone(), "unknown".to_string()]));
        assert_eq!(app.view, View::Compare);
        let order: Vec<_> = app
            .analyses_to_compare
            .iter()
            .map(|a| a.id.clone().unwrap())
            .collect();
        // Newest first, as listed on the dashboard.
        assert_eq!(order, vec![second, first]);
    }

    #[test]
    fn test_delete_updates_lists_and_rolls_back_on_failure() {
        let store = local_store();
        let user = SimulatedAuth::demo_user();
        let first = store.save_analysis(&user, &canned_analysis(input())).unwrap();
        let second = store.save_analysis(&user, &canned_analysis(input())).unwrap();
        let mut app = signed_in(&store);
        app.show_dashboard(&store);
        app.start_compare(&[first.clone(), second.clone()]);

        app.delete_saved(&BrokenStore, &first);
        assert_eq!(app.alert.as_deref(), Some(DELETE_FAILED));
        assert_eq!(app.saved_analyses.len(), 2);

        app.delete_saved(&store, &first);
        assert_eq!(app.saved_analyses.len(), 1);
        assert_eq!(app.analyses_to_compare.len(), 1);
        assert_eq!(app.view, View::Dashboard);
        assert_eq!(store.get_analyses_for_user(&user).unwrap().len(), 1);
    }

    #[test]
    fn test_logout_leaves_dashboard() {
        let store = local_store();
        let mut app = signed_in(&store);
        app.show_dashboard(&store);

        app.on_auth_changed(None, &store);
        assert_eq!(app.view, View::Form);
        assert!(app.current_user.is_none());
        assert!(app.saved_analyses.is_empty());
    }

    #[test]
    fn test_load_failure_on_sign_in_alerts() {
        let mut app = App::new();
        app.on_auth_changed(Some(SimulatedAuth::demo_user()), &BrokenStore);
        assert!(app.current_user.is_some());
        assert!(app.saved_analyses.is_empty());
        assert_eq!(app.alert.as_deref(), Some(LOAD_FAILED));

        app.show_dashboard(&BrokenStore);
        assert_eq!(app.view, View::Form);
    }

    #[test]
    fn test_login_through_simulated_backend() {
        let storage = LocalStorage::open_in_memory().unwrap();
        let auth = SimulatedAuth::new(storage.clone());
        let mut app = App::new();
        app.login(&auth);
        assert!(app.alert.as_deref().unwrap().contains("tester@simulation.io"));
        assert_eq!(auth.current_user(), Some(SimulatedAuth::demo_user()));

        app.logout(&auth);
        assert_eq!(auth.current_user(), None);
    }
}
