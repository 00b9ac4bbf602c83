//! Browser Session Manager.
//!
//! Owns the per-user browser session lifecycle on top of an external
//! automation service:
//!
//! ```text
//! NoSession --find-or-create--> Checking --alive--> Active
//!                               Checking --dead--> delete index entry --> create --> Active
//! ```
//!
//! Every action returns the page's recomputed [`ActionSurface`]. Clicks and
//! typing are only forwarded when their selector appears in the session's most
//! recent surface.

pub mod index;
pub mod service;
pub mod surface;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::Error;
use crate::locks::KeyedLocks;
use crate::Result;

pub use index::{FileSessionIndex, InMemorySessionIndex, SessionIndex};
pub use service::{
    ActionFailure, BrowserAction, BrowserService, ElementSnapshot, FailureReason, HttpBrowserService,
    PageSnapshot, RawObservation,
};
pub use surface::{selector_for, ActionSurface, SurfaceEntry, SurfaceKind};

/// A live session owned by a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserSession {
    pub id: String,
    pub user_id: String,
}

/// Result of one browser action, with the page as it is afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub action: &'static str,
    pub outcome: std::result::Result<String, ActionFailure>,
    pub url: String,
    pub title: String,
    pub surface: ActionSurface,
}

impl Observation {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn failure_reason(&self) -> Option<FailureReason> {
        self.outcome.as_ref().err().map(|f| f.reason)
    }

    /// Text handed back to the model.
    pub fn render(&self) -> String {
        let status = match &self.outcome {
            Ok(message) if message.is_empty() => format!("{} succeeded", self.action),
            Ok(message) => message.clone(),
            Err(failure) => format!("{} failed ({})", self.action, failure),
        };

        let mut text = status;
        if !self.url.is_empty() {
            text.push_str(&format!("\nURL: {}", self.url));
        }
        if !self.title.is_empty() {
            text.push_str(&format!("\nTitle: {}", self.title));
        }
        text.push_str("\n\nAction surface:\n");
        text.push_str(&self.surface.render());
        text
    }
}

#[derive(Debug, Default)]
struct SessionState {
    user_id: String,
    url: String,
    title: String,
    surface: ActionSurface,
}

impl SessionState {
    fn for_user(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            ..Self::default()
        }
    }
}

/// Per-user browser sessions backed by a [`BrowserService`].
pub struct BrowserSessionManager {
    service: Arc<dyn BrowserService>,
    index: Arc<dyn SessionIndex>,
    locks: KeyedLocks,
    sessions: Mutex<HashMap<String, SessionState>>,
    max_links: usize,
}

impl BrowserSessionManager {
    pub fn new(service: Arc<dyn BrowserService>, index: Arc<dyn SessionIndex>, max_links: usize) -> Self {
        Self {
            service,
            index,
            locks: KeyedLocks::new(),
            sessions: Mutex::new(HashMap::new()),
            max_links,
        }
    }

    /// Return the user's live session, creating one if there is none or the
    /// recorded one no longer answers.
    ///
    /// Serialized per user, so two concurrent requests never both create.
    pub async fn get_or_create_session(&self, user_id: &str) -> Result<BrowserSession> {
        let _guard = self.locks.lock(user_id).await;

        if let Some(session_id) = self.index.get(user_id).await? {
            match self.check_alive(&session_id).await {
                Ok(raw) => {
                    // The liveness check never replaces a surface the agent has
                    // already seen; selectors are still validated against it.
                    let mut sessions = self.sessions.lock().await;
                    match sessions.get_mut(&session_id) {
                        Some(state) => state.user_id = user_id.to_string(),
                        None => {
                            let mut state = SessionState::for_user(user_id);
                            if let Some(page) = raw.page {
                                self.apply_page(&mut state, &page);
                            }
                            sessions.insert(session_id.clone(), state);
                        }
                    }
                    debug!("Reusing browser session {} for {}", session_id, user_id);
                    return Ok(BrowserSession {
                        id: session_id,
                        user_id: user_id.to_string(),
                    });
                }
                Err(e) => {
                    warn!(
                        "Browser session {} for {} failed its liveness check ({}), recreating",
                        session_id, user_id, e
                    );
                    self.sessions.lock().await.remove(&session_id);
                    self.index.delete(user_id).await?;
                }
            }
        }

        let session_id = self.service.create_session().await?;
        self.index.put(user_id, &session_id).await?;
        self.sessions
            .lock()
            .await
            .insert(session_id.clone(), SessionState::for_user(user_id));

        info!("Created browser session {} for {}", session_id, user_id);
        Ok(BrowserSession {
            id: session_id,
            user_id: user_id.to_string(),
        })
    }

    /// A no-op action that succeeds only against a live context.
    async fn check_alive(&self, session_id: &str) -> Result<RawObservation> {
        let raw = self
            .service
            .execute_action(session_id, &BrowserAction::GetSurface)
            .await?;
        match &raw.outcome {
            Ok(_) => Ok(raw),
            Err(failure) => Err(Error::Browser(format!("liveness check failed: {}", failure))),
        }
    }

    /// Run one action against a session and return the resulting page.
    ///
    /// Failures of the action itself come back inside the observation; only
    /// service-level problems are errors.
    pub async fn execute(&self, session_id: &str, action: BrowserAction) -> Result<Observation> {
        let action = match self.check_action(session_id, action).await {
            Ok(action) => action,
            Err((name, failure)) => {
                debug!("Rejected {} on {}: {}", name, session_id, failure);
                return Ok(self.observe(session_id, name, Err(failure), None).await);
            }
        };

        debug!("Browser {} on {}", action.name(), session_id);
        let raw = self.service.execute_action(session_id, &action).await?;
        Ok(self.observe(session_id, action.name(), raw.outcome, raw.page).await)
    }

    /// Get-or-create the user's session and run `action` in it. A session
    /// that disappears mid-request is recreated once.
    pub async fn execute_for_user(&self, user_id: &str, action: BrowserAction) -> Result<Observation> {
        let session = self.get_or_create_session(user_id).await?;
        match self.execute(&session.id, action.clone()).await {
            Err(Error::SessionNotFound(_)) => {
                warn!("Browser session {} vanished, recreating for {}", session.id, user_id);
                self.forget(user_id, &session.id).await?;
                let session = self.get_or_create_session(user_id).await?;
                self.execute(&session.id, action).await
            }
            other => other,
        }
    }

    /// Release a session's browser context. The index entry is left alone.
    pub async fn destroy(&self, session_id: &str) -> Result<()> {
        self.service.destroy_session(session_id).await?;
        self.sessions.lock().await.remove(session_id);
        info!("Destroyed browser session {}", session_id);
        Ok(())
    }

    /// Destroy every session this manager knows about and drop their index
    /// entries.
    pub async fn shutdown(&self) {
        let sessions: Vec<(String, SessionState)> = self.sessions.lock().await.drain().collect();
        for (session_id, state) in sessions {
            if let Err(e) = self.service.destroy_session(&session_id).await {
                warn!("Failed to destroy browser session {}: {}", session_id, e);
            }
            if state.user_id.is_empty() {
                continue;
            }
            if let Err(e) = self.index.delete(&state.user_id).await {
                warn!("Failed to clear session index for {}: {}", state.user_id, e);
            }
        }
    }

    /// The most recent surface seen for a session.
    pub async fn current_surface(&self, session_id: &str) -> Option<ActionSurface> {
        self.sessions
            .lock()
            .await
            .get(session_id)
            .map(|s| s.surface.clone())
    }

    async fn forget(&self, user_id: &str, session_id: &str) -> Result<()> {
        let _guard = self.locks.lock(user_id).await;
        self.sessions.lock().await.remove(session_id);
        if self.index.get(user_id).await?.as_deref() == Some(session_id) {
            self.index.delete(user_id).await?;
        }
        Ok(())
    }

    /// Validate an action locally, rewriting selectors to their canonical form.
    async fn check_action(
        &self,
        session_id: &str,
        action: BrowserAction,
    ) -> std::result::Result<BrowserAction, (&'static str, ActionFailure)> {
        let name = action.name();
        match action {
            BrowserAction::Navigate { url } => normalize_url(&url)
                .map(|url| BrowserAction::Navigate { url })
                .map_err(|failure| (name, failure)),
            BrowserAction::Click { selector } => {
                let selector = self.resolve_selector(session_id, &selector).await.map_err(|f| (name, f))?;
                Ok(BrowserAction::Click { selector })
            }
            BrowserAction::Type { selector, text } => {
                let selector = self.resolve_selector(session_id, &selector).await.map_err(|f| (name, f))?;
                Ok(BrowserAction::Type { selector, text })
            }
            BrowserAction::GetSurface => Ok(BrowserAction::GetSurface),
        }
    }

    async fn resolve_selector(&self, session_id: &str, selector: &str) -> std::result::Result<String, ActionFailure> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(session_id)
            .and_then(|s| s.surface.resolve(selector))
            .map(str::to_string)
            .ok_or_else(|| {
                ActionFailure::new(
                    FailureReason::SelectorNotInSurface,
                    format!(
                        "'{}' is not in the current action surface; use a selector from the latest surface or call browser_get_surface",
                        selector
                    ),
                )
            })
    }

    async fn observe(
        &self,
        session_id: &str,
        action: &'static str,
        outcome: std::result::Result<String, ActionFailure>,
        page: Option<PageSnapshot>,
    ) -> Observation {
        let mut untracked = SessionState::default();
        let mut sessions = self.sessions.lock().await;
        let state = match sessions.get_mut(session_id) {
            Some(state) => state,
            None => {
                debug!("Observation for untracked session {}", session_id);
                &mut untracked
            }
        };
        if let Some(page) = page {
            self.apply_page(state, &page);
        }

        Observation {
            action,
            outcome,
            url: state.url.clone(),
            title: state.title.clone(),
            surface: state.surface.clone(),
        }
    }

    fn apply_page(&self, state: &mut SessionState, page: &PageSnapshot) {
        state.url = page.url.clone();
        state.title = page.title.clone();
        state.surface = ActionSurface::extract(page, self.max_links);
    }
}

/// Normalize a user- or model-supplied URL, defaulting to https.
pub fn normalize_url(raw: &str) -> std::result::Result<String, ActionFailure> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ActionFailure::new(FailureReason::NavigationFailed, "empty URL"));
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    match Url::parse(&candidate) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => Ok(url.to_string()),
        Ok(url) => Err(ActionFailure::new(
            FailureReason::NavigationFailed,
            format!("unsupported URL scheme '{}'", url.scheme()),
        )),
        Err(e) => Err(ActionFailure::new(
            FailureReason::NavigationFailed,
            format!("invalid URL '{}': {}", trimmed, e),
        )),
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    fn manager(service: Arc<FakeBrowserService>, index: Arc<InMemorySessionIndex>) -> BrowserSessionManager {
        BrowserSessionManager::new(service, index, 15)
    }

    #[tokio::test]
    async fn test_same_session_twice() {
        let service = Arc::new(example_site());
        let index = Arc::new(InMemorySessionIndex::new());
        let browser = manager(service.clone(), index.clone());

        let first = browser.get_or_create_session("alice").await.unwrap();
        let second = browser.get_or_create_session("alice").await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(service.live_sessions(), 1);
        assert_eq!(index.get("alice").await.unwrap(), Some(first.id));
    }

    #[tokio::test]
    async fn test_restart_recreates_and_heals_index() {
        let service = Arc::new(example_site());
        let index = Arc::new(InMemorySessionIndex::new());
        let browser = manager(service.clone(), index.clone());

        let before = browser.get_or_create_session("alice").await.unwrap();
        service.restart();
        let after = browser.get_or_create_session("alice").await.unwrap();

        assert_ne!(before.id, after.id);
        assert_eq!(index.get("alice").await.unwrap(), Some(after.id));
    }

    #[tokio::test]
    async fn test_stale_index_from_previous_process() {
        let service = Arc::new(example_site());
        let index = Arc::new(InMemorySessionIndex::new());
        index.put("alice", "session-from-yesterday").await.unwrap();

        let browser = manager(service.clone(), index.clone());
        let session = browser.get_or_create_session("alice").await.unwrap();

        assert_ne!(session.id, "session-from-yesterday");
        assert_eq!(index.get("alice").await.unwrap(), Some(session.id));
    }

    #[tokio::test]
    async fn test_users_get_separate_sessions() {
        let service = Arc::new(example_site());
        let browser = manager(service.clone(), Arc::new(InMemorySessionIndex::new()));

        let alice = browser.get_or_create_session("alice").await.unwrap();
        let bob = browser.get_or_create_session("bob").await.unwrap();
        assert_ne!(alice.id, bob.id);
    }

    #[tokio::test]
    async fn test_concurrent_find_or_create_makes_one_session() {
        let service = Arc::new(example_site());
        let browser = Arc::new(manager(service.clone(), Arc::new(InMemorySessionIndex::new())));

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let browser = browser.clone();
                tokio::spawn(async move { browser.get_or_create_session("alice").await.unwrap().id })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(service.live_sessions(), 1);
    }

    #[tokio::test]
    async fn test_navigate_returns_surface() {
        let browser = manager(Arc::new(example_site()), Arc::new(InMemorySessionIndex::new()));
        let session = browser.get_or_create_session("alice").await.unwrap();

        let obs = browser
            .execute(&session.id, BrowserAction::Navigate { url: "example.com".to_string() })
            .await
            .unwrap();

        assert!(obs.is_success());
        assert_eq!(obs.url, "https://example.com/");
        assert!(obs.render().contains("BUTTON: [#login] (Login)"));
        assert!(obs.render().contains("INPUT: [placeholder=\"Search\"] (Search)"));
    }

    #[tokio::test]
    async fn test_selector_must_be_in_surface() {
        let service = Arc::new(example_site());
        let browser = manager(service.clone(), Arc::new(InMemorySessionIndex::new()));
        let session = browser.get_or_create_session("alice").await.unwrap();

        // Nothing loaded yet, so nothing is clickable
        let obs = browser
            .execute(&session.id, BrowserAction::Click { selector: "#login".to_string() })
            .await
            .unwrap();
        assert_eq!(obs.failure_reason(), Some(FailureReason::SelectorNotInSurface));

        browser
            .execute(&session.id, BrowserAction::Navigate { url: "https://example.com".to_string() })
            .await
            .unwrap();
        let guessed = browser
            .execute(&session.id, BrowserAction::Click { selector: "#signin".to_string() })
            .await
            .unwrap();
        assert_eq!(guessed.failure_reason(), Some(FailureReason::SelectorNotInSurface));

        // Only the navigate reached the service
        assert_eq!(service.actions().len(), 1);
    }

    #[tokio::test]
    async fn test_click_accepts_printed_selector() {
        let service = Arc::new(example_site());
        let browser = manager(service.clone(), Arc::new(InMemorySessionIndex::new()));
        let session = browser.get_or_create_session("alice").await.unwrap();
        browser
            .execute(&session.id, BrowserAction::Navigate { url: "example.com".to_string() })
            .await
            .unwrap();

        let obs = browser
            .execute(&session.id, BrowserAction::Click { selector: "[#login]".to_string() })
            .await
            .unwrap();

        assert!(obs.is_success());
        assert_eq!(obs.title, "Dashboard");
        assert_eq!(
            service.actions().last(),
            Some(&BrowserAction::Click { selector: "#login".to_string() })
        );
    }

    #[tokio::test]
    async fn test_distinct_failure_reasons() {
        let service = Arc::new(
            FakeBrowserService::new().with_page(
                "https://forms.test/",
                "Form",
                vec![
                    element("input", &[("name", "email")], ""),
                    element("input", &[("name", "phone")], ""),
                    element("button", &[("id", "send")], "Send"),
                ],
            ),
        );
        let browser = manager(service.clone(), Arc::new(InMemorySessionIndex::new()));
        let session = browser.get_or_create_session("alice").await.unwrap();
        browser
            .execute(&session.id, BrowserAction::Navigate { url: "forms.test".to_string() })
            .await
            .unwrap();

        service.mutate("[name=\"email\"]", |el| el.as_mut().unwrap().editable = false);

        let typed = browser
            .execute(
                &session.id,
                BrowserAction::Type { selector: "[name=\"email\"]".to_string(), text: "a@b.c".to_string() },
            )
            .await
            .unwrap();
        assert_eq!(typed.failure_reason(), Some(FailureReason::NotEditable));

        // Each action refreshes the surface, so reload before the next mutation
        browser
            .execute(&session.id, BrowserAction::Navigate { url: "forms.test".to_string() })
            .await
            .unwrap();
        service.mutate("#send", |el| el.as_mut().unwrap().visible = false);

        let clicked = browser
            .execute(&session.id, BrowserAction::Click { selector: "#send".to_string() })
            .await
            .unwrap();
        assert_eq!(clicked.failure_reason(), Some(FailureReason::NotVisible));

        browser
            .execute(&session.id, BrowserAction::Navigate { url: "forms.test".to_string() })
            .await
            .unwrap();
        service.mutate("[name=\"phone\"]", |el| *el = None);

        let missing = browser
            .execute(
                &session.id,
                BrowserAction::Type { selector: "[name=\"phone\"]".to_string(), text: "555".to_string() },
            )
            .await
            .unwrap();
        assert_eq!(missing.failure_reason(), Some(FailureReason::ElementNotFound));

        let bad_url = browser
            .execute(&session.id, BrowserAction::Navigate { url: "ftp://files.test".to_string() })
            .await
            .unwrap();
        assert_eq!(bad_url.failure_reason(), Some(FailureReason::NavigationFailed));
    }

    #[tokio::test]
    async fn test_execute_for_user_survives_restart() {
        let service = Arc::new(example_site());
        let index = Arc::new(InMemorySessionIndex::new());
        let browser = manager(service.clone(), index.clone());

        let first = browser.get_or_create_session("alice").await.unwrap();
        service.restart();

        // The liveness check inside get_or_create notices the restart
        let obs = browser
            .execute_for_user("alice", BrowserAction::Navigate { url: "example.com".to_string() })
            .await
            .unwrap();
        assert!(obs.is_success());
        assert_ne!(index.get("alice").await.unwrap(), Some(first.id));
    }

    #[tokio::test]
    async fn test_destroy_keeps_index_and_shutdown_clears_it() {
        let service = Arc::new(example_site());
        let index = Arc::new(InMemorySessionIndex::new());
        let browser = manager(service.clone(), index.clone());

        let alice = browser.get_or_create_session("alice").await.unwrap();
        browser.destroy(&alice.id).await.unwrap();
        assert_eq!(index.get("alice").await.unwrap(), Some(alice.id.clone()));
        assert_eq!(service.live_sessions(), 0);

        let bob = browser.get_or_create_session("bob").await.unwrap();
        browser.shutdown().await;
        assert_eq!(index.get("bob").await.unwrap(), None);
        assert!(service.destroyed().contains(&bob.id));
    }

    #[tokio::test]
    async fn test_liveness_check_keeps_observed_surface() {
        let service = Arc::new(example_site());
        let browser = manager(service.clone(), Arc::new(InMemorySessionIndex::new()));

        let nav = browser
            .execute_for_user("alice", BrowserAction::Navigate { url: "example.com".to_string() })
            .await
            .unwrap();
        assert!(nav.surface.contains("#login"));

        // The page changes behind the agent's back
        service.mutate("#login", |el| {
            if let Some(el) = el {
                el.attributes.insert("id".to_string(), "admin".to_string());
            }
        });

        let unseen = browser
            .execute_for_user("alice", BrowserAction::Click { selector: "#admin".to_string() })
            .await
            .unwrap();
        assert_eq!(unseen.failure_reason(), Some(FailureReason::SelectorNotInSurface));

        let session = browser.get_or_create_session("alice").await.unwrap();
        let surface = browser.current_surface(&session.id).await.unwrap();
        assert!(surface.contains("#login"));
        assert!(!surface.contains("#admin"));
        assert_eq!(
            service.actions(),
            vec![BrowserAction::Navigate { url: "https://example.com/".to_string() }]
        );

        // A forwarded action that fails reports the page as it really is
        let stale = browser
            .execute_for_user("alice", BrowserAction::Click { selector: "#login".to_string() })
            .await
            .unwrap();
        assert_eq!(stale.failure_reason(), Some(FailureReason::ElementNotFound));
        assert!(stale.surface.contains("#admin"));
    }

    #[tokio::test]
    async fn test_untracked_session_is_not_recorded() {
        let service = Arc::new(example_site());
        let browser = manager(service.clone(), Arc::new(InMemorySessionIndex::new()));

        let alice = browser.get_or_create_session("alice").await.unwrap();
        browser.destroy(&alice.id).await.unwrap();

        let obs = browser
            .execute(&alice.id, BrowserAction::Click { selector: "#login".to_string() })
            .await
            .unwrap();
        assert_eq!(obs.failure_reason(), Some(FailureReason::SelectorNotInSurface));
        assert!(browser.current_surface(&alice.id).await.is_none());

        browser.shutdown().await;
        assert_eq!(service.destroyed(), vec![alice.id]);
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("example.com").unwrap(), "https://example.com/");
        assert_eq!(normalize_url(" http://a.test/x ").unwrap(), "http://a.test/x");
        assert_eq!(
            normalize_url("").unwrap_err().reason,
            FailureReason::NavigationFailed
        );
        assert!(normalize_url("ftp://files.test").is_err());
    }
}
