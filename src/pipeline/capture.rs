//! Page capture: turn the currently rendered result view into an image
//! artifact tagged with institution, page number, and timestamp.

use chrono::Utc;
use thiserror::Error;

use crate::models::CaptureArtifact;
use crate::session::{SearchSession, SessionError};

/// Capture failed. Always treated as transient: the controller retries a
/// bounded number of times before skipping the page.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Rendering surface unavailable: {0}")]
    Surface(#[from] SessionError),

    #[error("Capture produced an empty image")]
    EmptyImage,
}

/// Snapshot the session's current view. The caller supplies institution and
/// page index; the session only knows how to render itself.
pub fn capture_page(
    session: &mut dyn SearchSession,
    institution: &str,
    page_number: u32,
) -> Result<CaptureArtifact, CaptureError> {
    let image_png = session.screenshot()?;
    if image_png.is_empty() {
        return Err(CaptureError::EmptyImage);
    }

    tracing::debug!(
        institution,
        page = page_number,
        bytes = image_png.len(),
        "Captured result page"
    );

    Ok(CaptureArtifact {
        image_png,
        institution: institution.to_string(),
        page_number,
        captured_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ScriptedSession;

    #[test]
    fn capture_tags_artifact_with_context() {
        let mut session = ScriptedSession::new(1);
        session.search("NDU").unwrap();
        let artifact = capture_page(&mut session, "NDU", 3).unwrap();
        assert_eq!(artifact.institution, "NDU");
        assert_eq!(artifact.page_number, 3);
        assert!(!artifact.image_png.is_empty());
    }

    #[test]
    fn empty_screenshot_is_capture_error() {
        struct BlankSession;
        impl SearchSession for BlankSession {
            fn search(&mut self, _: &str) -> Result<(), SessionError> {
                Ok(())
            }
            fn next_page(&mut self) -> Result<crate::session::PageAdvance, SessionError> {
                Ok(crate::session::PageAdvance::NoMoreResults)
            }
            fn screenshot(&mut self) -> Result<Vec<u8>, SessionError> {
                Ok(Vec::new())
            }
        }

        let mut session = BlankSession;
        let err = capture_page(&mut session, "NDU", 1).unwrap_err();
        assert!(matches!(err, CaptureError::EmptyImage));
    }

    #[test]
    fn surface_failure_propagates_as_capture_error() {
        let mut session = ScriptedSession::new(1).failing_first_screenshots(1);
        session.search("NDU").unwrap();
        let err = capture_page(&mut session, "NDU", 1).unwrap_err();
        assert!(matches!(err, CaptureError::Surface(_)));
    }
}
