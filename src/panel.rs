//! Panel controller: script management, run requests and the console view.

use chrono::Utc;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::browser::{BrowserHost, HostError, InjectionRequest, Tab};
use crate::channel::RuntimeInbox;
use crate::log_view::LogView;
use crate::params;
use crate::protocol::{LogLevel, RuntimeMessage};
use crate::script::{ScriptId, ScriptRecord};
use crate::session::{PanelSession, ScriptOption};
use crate::storage::{ScriptStorage, StorageError};
use crate::url_pattern::{PatternError, UrlPattern};

#[derive(Debug, Error)]
pub enum PanelError {
    #[error("Script name is required")]
    MissingName,

    #[error("No code to run")]
    NoCode,

    #[error("No active tab found")]
    NoActiveTab,

    #[error("Extension connection failed. Please REFRESH this page.")]
    BridgeUnavailable(#[source] HostError),

    #[error("{0}")]
    Injection(#[source] HostError),

    #[error("Browser error: {0}")]
    Host(#[from] HostError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Unknown script: {0}")]
    UnknownScript(ScriptId),
}

impl PanelError {
    /// Line shown in the console view for this failure.
    pub fn log_message(&self) -> String {
        match self {
            PanelError::Injection(e) => format!("Execution Error: {}", e),
            other => format!("Error: {}", other),
        }
    }
}

/// Summary of a run request that reached the page
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub tab: Tab,
    /// `None` when no URL pattern is configured
    pub url_matched: Option<bool>,
    pub params: Map<String, Value>,
}

/// Drives one panel instance against a script store and a browser.
pub struct PanelController<S, B> {
    session: PanelSession,
    storage: S,
    browser: B,
    console: LogView,
}

impl<S: ScriptStorage, B: BrowserHost> PanelController<S, B> {
    pub fn new(storage: S, browser: B, console: LogView) -> Self {
        Self {
            session: PanelSession::default(),
            storage,
            browser,
            console,
        }
    }

    pub fn session(&self) -> &PanelSession {
        &self.session
    }

    /// Form state, for editing before save or run.
    pub fn session_mut(&mut self) -> &mut PanelSession {
        &mut self.session
    }

    pub fn console(&self) -> &LogView {
        &self.console
    }

    pub fn browser(&self) -> &B {
        &self.browser
    }

    fn report(&mut self, error: &PanelError) {
        warn!("{}", error);
        self.console.push(LogLevel::Error, error.log_message());
    }

    /// Read the stored collection into the session.
    pub async fn load_scripts(&mut self) -> Result<usize, PanelError> {
        match self.storage.load().await {
            Ok(scripts) => {
                let count = scripts.len();
                self.session.scripts = scripts;
                debug!("Loaded {} scripts", count);
                Ok(count)
            }
            Err(e) => {
                let error = PanelError::from(e);
                self.report(&error);
                Err(error)
            }
        }
    }

    pub fn script_options(&self) -> Vec<ScriptOption> {
        self.session.options()
    }

    /// Load a stored script into the form, or clear the form with `None`.
    pub fn select_script(&mut self, id: Option<&ScriptId>) -> Result<(), PanelError> {
        match id {
            Some(id) if !self.session.select(Some(id)) => Err(PanelError::UnknownScript(id.clone())),
            Some(_) => Ok(()),
            None => {
                self.session.select(None);
                Ok(())
            }
        }
    }

    pub fn add_param_row(&mut self, key: &str, value: &str) {
        self.session.draft.add_param_row(key, value);
    }

    pub fn remove_param_row(&mut self, index: usize) {
        self.session.draft.remove_param_row(index);
    }

    /// Save the form as a script. The stored collection is written in full
    /// and the session only changes once that write succeeded.
    pub async fn save_script(&mut self) -> Result<ScriptId, PanelError> {
        match self.try_save().await {
            Ok((id, name)) => {
                self.console
                    .push(LogLevel::Success, format!("Script \"{}\" saved!", name));
                Ok(id)
            }
            Err(e) => {
                self.report(&e);
                Err(e)
            }
        }
    }

    async fn try_save(&mut self) -> Result<(ScriptId, String), PanelError> {
        let draft = &self.session.draft;
        let name = draft.name.trim().to_string();
        if name.is_empty() {
            return Err(PanelError::MissingName);
        }

        let now = Utc::now().timestamp_millis();
        let id = match &self.session.current {
            Some(id) => id.clone(),
            None => self.session.scripts.fresh_id(now),
        };
        let record = ScriptRecord {
            id: id.to_string(),
            name: name.clone(),
            code: draft.code.clone(),
            url_pattern: draft.url_pattern.trim().to_string(),
            params: params::collect_pairs(&draft.params),
            updated_at: now,
        };

        let mut scripts = self.session.scripts.clone();
        scripts.upsert(id.clone(), record);
        self.storage.store(&scripts).await?;

        self.session.scripts = scripts;
        self.session.current = Some(id.clone());
        info!(script = %id, "saved script {:?}", name);
        Ok((id, name))
    }

    /// Delete the current script if `confirm` agrees. Returns the removed
    /// record, or `None` when there was nothing to delete or it was declined.
    pub async fn delete_script(
        &mut self,
        confirm: impl FnOnce(&ScriptRecord) -> bool,
    ) -> Result<Option<ScriptRecord>, PanelError> {
        let Some(id) = self.session.current.clone() else {
            return Ok(None);
        };
        let Some(record) = self.session.scripts.get(&id) else {
            return Ok(None);
        };
        if !confirm(record) {
            return Ok(None);
        }

        let mut scripts = self.session.scripts.clone();
        let removed = scripts.remove(&id);
        if let Err(e) = self.storage.store(&scripts).await {
            let error = PanelError::from(e);
            self.report(&error);
            return Err(error);
        }

        self.session.scripts = scripts;
        self.session.select(None);
        self.console.push(LogLevel::Info, "Script deleted.");
        info!(script = %id, "deleted script");
        Ok(removed)
    }

    /// Run the form's code in the active tab.
    pub async fn run_script(&mut self) -> Result<RunReport, PanelError> {
        match self.try_run().await {
            Ok(report) => Ok(report),
            Err(e) => {
                self.report(&e);
                Err(e)
            }
        }
    }

    async fn try_run(&mut self) -> Result<RunReport, PanelError> {
        let code = self.session.draft.code.clone();
        if code.is_empty() {
            return Err(PanelError::NoCode);
        }

        let params = params::build_params(&self.session.draft.params);

        let tab = self
            .browser
            .active_tab()
            .await?
            .ok_or(PanelError::NoActiveTab)?;

        let url_matched = self.check_url_pattern(&tab.url);

        if let Err(e) = self
            .browser
            .send_tab_message(tab.id, RuntimeMessage::ping())
            .await
        {
            debug!(tab = %tab.id, "liveness probe failed: {}", e);
            return Err(PanelError::BridgeUnavailable(e));
        }

        self.console
            .push(LogLevel::Info, format!("Running on {}...", tab.url));

        self.browser
            .execute_script(InjectionRequest::main_world(tab.id, code, params.clone()))
            .await
            .map_err(PanelError::Injection)?;

        Ok(RunReport {
            tab,
            url_matched,
            params,
        })
    }

    /// Advisory check of the form's URL pattern; a mismatch only warns.
    fn check_url_pattern(&mut self, url: &str) -> Option<bool> {
        let pattern = self.session.draft.url_pattern.trim().to_string();
        if pattern.is_empty() {
            return None;
        }
        let matched = match UrlPattern::compile(&pattern) {
            Ok(matcher) => matcher.matches(url),
            Err(PatternError::Empty) => return None,
            Err(e) => {
                warn!("{}", e);
                false
            }
        };
        if !matched {
            self.console.push(
                LogLevel::Warn,
                format!("Warning: Current URL does not match pattern \"{}\"", pattern),
            );
        }
        Some(matched)
    }

    /// Render a message forwarded from a content bridge. Returns whether it
    /// produced a log entry.
    pub fn handle_runtime_message(&mut self, message: &RuntimeMessage) -> bool {
        if !message.is_console_log() {
            return false;
        }
        self.console
            .push(message.log_level(), message.rendered_content());
        true
    }

    /// Render everything already waiting in `inbox`.
    pub fn drain_inbox(&mut self, inbox: &mut RuntimeInbox) -> usize {
        inbox
            .drain()
            .iter()
            .filter(|message| self.handle_runtime_message(message))
            .count()
    }

    pub fn clear_console(&mut self) {
        self.console.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::TabId;
    use crate::params::ParamPair;
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Browser that records injections and answers probes from a flag.
    struct RecordingBrowser {
        tab: Option<Tab>,
        bridge: bool,
        injections: Mutex<Vec<InjectionRequest>>,
    }

    impl RecordingBrowser {
        fn on(url: &str) -> Self {
            Self {
                tab: Some(Tab {
                    id: TabId(7),
                    url: url.to_string(),
                }),
                bridge: true,
                injections: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl BrowserHost for RecordingBrowser {
        async fn active_tab(&self) -> Result<Option<Tab>, HostError> {
            Ok(self.tab.clone())
        }

        async fn send_tab_message(
            &self,
            _tab: TabId,
            _message: RuntimeMessage,
        ) -> Result<Value, HostError> {
            if self.bridge {
                Ok(serde_json::json!({ "status": "OK" }))
            } else {
                Err(HostError::NoReceiver)
            }
        }

        async fn execute_script(&self, request: InjectionRequest) -> Result<(), HostError> {
            self.injections.lock().unwrap().push(request);
            Ok(())
        }
    }

    fn panel(browser: RecordingBrowser) -> PanelController<MemoryStorage, RecordingBrowser> {
        PanelController::new(MemoryStorage::new(), browser, LogView::default())
    }

    fn last_line(panel: &PanelController<MemoryStorage, RecordingBrowser>) -> (LogLevel, String) {
        let entry = panel.console().last().unwrap();
        (entry.level, entry.content.clone())
    }

    #[tokio::test]
    async fn test_save_requires_name_and_leaves_store_untouched() {
        let mut panel = panel(RecordingBrowser::on("https://example.com/"));
        panel.session_mut().draft.name = "   ".to_string();
        panel.session_mut().draft.code = "console.log(1)".to_string();

        let err = panel.save_script().await.unwrap_err();
        assert!(matches!(err, PanelError::MissingName));
        assert_eq!(
            last_line(&panel),
            (LogLevel::Error, "Error: Script name is required".to_string())
        );
        assert!(panel.session().scripts.is_empty());
        assert!(panel.storage.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_new_then_overwrite_keeps_id() {
        let mut panel = panel(RecordingBrowser::on("https://example.com/"));
        let draft = &mut panel.session_mut().draft;
        draft.name = " Greet ".to_string();
        draft.code = "console.log(params.name)".to_string();
        draft.url_pattern = " https://example.com/* ".to_string();
        draft.params = vec![ParamPair::new(" name ", " world "), ParamPair::new("", "x")];

        let id = panel.save_script().await.unwrap();
        assert!(id.as_str().starts_with("script_"));
        assert_eq!(
            last_line(&panel),
            (LogLevel::Success, "Script \"Greet\" saved!".to_string())
        );

        let stored = panel.storage.load().await.unwrap();
        let record = stored.get(&id).unwrap();
        assert_eq!(record.name, "Greet");
        assert_eq!(record.url_pattern, "https://example.com/*");
        assert_eq!(record.params, vec![ParamPair::new("name", "world")]);

        panel.session_mut().draft.code = "console.log('v2')".to_string();
        let again = panel.save_script().await.unwrap();
        assert_eq!(again, id);
        let stored = panel.storage.load().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored.get(&id).unwrap().code, "console.log('v2')");
    }

    #[tokio::test]
    async fn test_delete_declined_keeps_script() {
        let mut panel = panel(RecordingBrowser::on("https://example.com/"));
        panel.session_mut().draft.name = "Keep".to_string();
        panel.save_script().await.unwrap();

        let removed = panel.delete_script(|_| false).await.unwrap();
        assert!(removed.is_none());
        assert_eq!(panel.storage.load().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_without_selection_is_noop() {
        let mut panel = panel(RecordingBrowser::on("https://example.com/"));
        let removed = panel.delete_script(|_| true).await.unwrap();
        assert!(removed.is_none());
        assert!(panel.console().is_empty());
    }

    #[tokio::test]
    async fn test_run_rejects_empty_code() {
        let mut panel = panel(RecordingBrowser::on("https://example.com/"));
        let err = panel.run_script().await.unwrap_err();
        assert!(matches!(err, PanelError::NoCode));
        assert_eq!(
            last_line(&panel),
            (LogLevel::Error, "Error: No code to run".to_string())
        );
        assert!(panel.browser().injections.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_without_active_tab() {
        let mut browser = RecordingBrowser::on("https://example.com/");
        browser.tab = None;
        let mut panel = panel(browser);
        panel.session_mut().draft.code = "1".to_string();

        let err = panel.run_script().await.unwrap_err();
        assert!(matches!(err, PanelError::NoActiveTab));
        assert_eq!(
            last_line(&panel),
            (LogLevel::Error, "Error: No active tab found".to_string())
        );
    }

    #[tokio::test]
    async fn test_run_pattern_mismatch_warns_but_runs() {
        let mut panel = panel(RecordingBrowser::on("https://other.com/page"));
        let draft = &mut panel.session_mut().draft;
        draft.code = "console.log(params)".to_string();
        draft.url_pattern = "https://example.com/*".to_string();
        draft.params = vec![ParamPair::new("n", "007")];

        let report = panel.run_script().await.unwrap();
        assert_eq!(report.url_matched, Some(false));

        let lines: Vec<(LogLevel, String)> = panel
            .console()
            .entries()
            .map(|e| (e.level, e.content.clone()))
            .collect();
        assert_eq!(
            lines,
            vec![
                (
                    LogLevel::Warn,
                    "Warning: Current URL does not match pattern \"https://example.com/*\""
                        .to_string()
                ),
                (LogLevel::Info, "Running on https://other.com/page...".to_string()),
            ]
        );

        let injections = panel.browser().injections.lock().unwrap();
        assert_eq!(injections.len(), 1);
        assert_eq!(injections[0].tab, TabId(7));
        assert_eq!(injections[0].params["n"], serde_json::json!(7));
    }

    #[tokio::test]
    async fn test_run_aborts_when_probe_fails() {
        let mut browser = RecordingBrowser::on("https://example.com/");
        browser.bridge = false;
        let mut panel = panel(browser);
        panel.session_mut().draft.code = "console.log(1)".to_string();

        let err = panel.run_script().await.unwrap_err();
        assert!(matches!(err, PanelError::BridgeUnavailable(_)));
        assert_eq!(panel.console().len(), 1);
        assert_eq!(
            last_line(&panel),
            (
                LogLevel::Error,
                "Error: Extension connection failed. Please REFRESH this page.".to_string()
            )
        );
        assert!(panel.browser().injections.lock().unwrap().is_empty());
    }

    #[test]
    fn test_injection_error_log_line() {
        let err = PanelError::Injection(HostError::InjectionRejected("chrome://x".to_string()));
        assert_eq!(
            err.log_message(),
            "Execution Error: Cannot access contents of the page: chrome://x"
        );
    }

    #[test]
    fn test_runtime_messages_render_into_console() {
        let mut panel = panel(RecordingBrowser::on("https://example.com/"));
        assert!(panel.handle_runtime_message(&RuntimeMessage::console(LogLevel::Warn, "w")));
        assert!(!panel.handle_runtime_message(&RuntimeMessage::ping()));
        assert_eq!(last_line(&panel), (LogLevel::Warn, "w".to_string()));

        panel.clear_console();
        assert!(panel.console().is_empty());
    }
}
