//! Collaborator boundary: browser session establishment and page navigation.
//!
//! The pipeline never touches the DOM. It asks a `SearchSession` to position
//! itself (search, next page) and to hand over the currently rendered view as
//! PNG bytes. Real browser drivers live outside this crate; the bundled
//! `DirSession` replays a previously captured screenshot tree so the full
//! pipeline can run without a live browser.

use std::path::PathBuf;

use thiserror::Error;

/// Login credential pair. Treated as opaque; the password is redacted from
/// debug output and never logged or persisted.
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Session establishment failed. Fatal to the whole run.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Login rejected: {0}")]
    InvalidCredentials(String),

    #[error("Session source unavailable: {0}")]
    Unavailable(String),
}

/// Navigation-level failure inside an established session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Rendering surface unavailable: {0}")]
    SurfaceUnavailable(String),
}

/// Outcome of requesting the next result page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageAdvance {
    Advanced,
    NoMoreResults,
}

/// An established, logged-in browsing session positioned on search results.
pub trait SearchSession {
    /// Run a people search for the given institution; leaves the session on
    /// page 1 of the results.
    fn search(&mut self, institution: &str) -> Result<(), SessionError>;

    /// Advance to the next result page.
    fn next_page(&mut self) -> Result<PageAdvance, SessionError>;

    /// PNG bytes of the currently rendered view.
    fn screenshot(&mut self) -> Result<Vec<u8>, SessionError>;
}

/// Establishes sessions. Implemented outside the core for live browsers.
pub trait SessionProvider {
    fn login(&self, credentials: &Credentials) -> Result<Box<dyn SearchSession>, AuthError>;
}

// ──────────────────────────────────────────────
// DirSession — screenshot-tree replay
// ──────────────────────────────────────────────

/// Replays a directory of captured result pages through the pipeline.
///
/// Expects files named `<Institution>_results_page<N>.png` with spaces in
/// the institution replaced by underscores, the layout the live capture
/// tooling writes.
pub struct DirSession {
    root: PathBuf,
    institution: Option<String>,
    page: u32,
}

impl DirSession {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            institution: None,
            page: 1,
        }
    }

    fn page_path(&self, institution: &str, page: u32) -> PathBuf {
        let stem = institution.replace(' ', "_");
        self.root.join(format!("{stem}_results_page{page}.png"))
    }

    fn current_institution(&self) -> Result<&str, SessionError> {
        self.institution
            .as_deref()
            .ok_or_else(|| SessionError::Navigation("No search has been run".into()))
    }
}

impl SearchSession for DirSession {
    fn search(&mut self, institution: &str) -> Result<(), SessionError> {
        self.institution = Some(institution.to_string());
        self.page = 1;
        Ok(())
    }

    fn next_page(&mut self) -> Result<PageAdvance, SessionError> {
        let institution = self.current_institution()?.to_string();
        if self.page_path(&institution, self.page + 1).exists() {
            self.page += 1;
            Ok(PageAdvance::Advanced)
        } else {
            Ok(PageAdvance::NoMoreResults)
        }
    }

    fn screenshot(&mut self) -> Result<Vec<u8>, SessionError> {
        let institution = self.current_institution()?.to_string();
        let path = self.page_path(&institution, self.page);
        std::fs::read(&path)
            .map_err(|e| SessionError::SurfaceUnavailable(format!("{}: {e}", path.display())))
    }
}

/// Provider for `DirSession`. "Login" only verifies the tree exists; there
/// are no credentials to check against a directory.
pub struct DirSessionProvider {
    root: PathBuf,
}

impl DirSessionProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl SessionProvider for DirSessionProvider {
    fn login(&self, _credentials: &Credentials) -> Result<Box<dyn SearchSession>, AuthError> {
        if !self.root.is_dir() {
            return Err(AuthError::Unavailable(format!(
                "screenshot directory {} does not exist",
                self.root.display()
            )));
        }
        Ok(Box::new(DirSession::new(self.root.clone())))
    }
}

// ──────────────────────────────────────────────
// ScriptedSession (testing)
// ──────────────────────────────────────────────

/// Scripted session for pipeline tests: a fixed number of pages per
/// institution, each screenshot a small synthetic payload. Optionally fails
/// the first N screenshot calls to exercise the capture retry path.
pub struct ScriptedSession {
    pages_per_institution: u32,
    page: u32,
    institution: Option<String>,
    screenshot_failures_remaining: u32,
    pub screenshots_taken: u32,
}

impl ScriptedSession {
    pub fn new(pages_per_institution: u32) -> Self {
        Self {
            pages_per_institution,
            page: 1,
            institution: None,
            screenshot_failures_remaining: 0,
            screenshots_taken: 0,
        }
    }

    pub fn failing_first_screenshots(mut self, n: u32) -> Self {
        self.screenshot_failures_remaining = n;
        self
    }
}

impl SearchSession for ScriptedSession {
    fn search(&mut self, institution: &str) -> Result<(), SessionError> {
        self.institution = Some(institution.to_string());
        self.page = 1;
        Ok(())
    }

    fn next_page(&mut self) -> Result<PageAdvance, SessionError> {
        if self.page < self.pages_per_institution {
            self.page += 1;
            Ok(PageAdvance::Advanced)
        } else {
            Ok(PageAdvance::NoMoreResults)
        }
    }

    fn screenshot(&mut self) -> Result<Vec<u8>, SessionError> {
        if self.screenshot_failures_remaining > 0 {
            self.screenshot_failures_remaining -= 1;
            return Err(SessionError::SurfaceUnavailable("scripted failure".into()));
        }
        self.screenshots_taken += 1;
        let label = format!(
            "{}:{}",
            self.institution.as_deref().unwrap_or(""),
            self.page
        );
        Ok(label.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_debug_redacts_password() {
        let creds = Credentials {
            email: "a@example.org".into(),
            password: "hunter2".into(),
        };
        let debug = format!("{creds:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("a@example.org"));
    }

    #[test]
    fn dir_session_reads_pages_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("Staff_College_results_page1.png"), b"one").unwrap();
        std::fs::write(root.join("Staff_College_results_page2.png"), b"two").unwrap();

        let mut session = DirSession::new(root);
        session.search("Staff College").unwrap();
        assert_eq!(session.screenshot().unwrap(), b"one");
        assert_eq!(session.next_page().unwrap(), PageAdvance::Advanced);
        assert_eq!(session.screenshot().unwrap(), b"two");
        assert_eq!(session.next_page().unwrap(), PageAdvance::NoMoreResults);
    }

    #[test]
    fn dir_session_missing_page_is_surface_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = DirSession::new(dir.path());
        session.search("Staff College").unwrap();
        let err = session.screenshot().unwrap_err();
        assert!(matches!(err, SessionError::SurfaceUnavailable(_)));
    }

    #[test]
    fn dir_session_requires_search_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = DirSession::new(dir.path());
        assert!(matches!(
            session.screenshot(),
            Err(SessionError::Navigation(_))
        ));
    }

    #[test]
    fn dir_provider_rejects_missing_root() {
        let provider = DirSessionProvider::new("/nonexistent/screenshots");
        let creds = Credentials {
            email: String::new(),
            password: String::new(),
        };
        assert!(matches!(
            provider.login(&creds),
            Err(AuthError::Unavailable(_))
        ));
    }

    #[test]
    fn scripted_session_exhausts_after_configured_pages() {
        let mut session = ScriptedSession::new(2);
        session.search("NDU").unwrap();
        assert_eq!(session.next_page().unwrap(), PageAdvance::Advanced);
        assert_eq!(session.next_page().unwrap(), PageAdvance::NoMoreResults);
    }
}
