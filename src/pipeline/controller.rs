//! Pipeline orchestration: per institution, per page, drive
//! capture → extract → parse → merge-and-checkpoint, containing every
//! per-page failure so it never escapes past the current institution.
//!
//! The run is sequential by design: each page capture depends on the
//! navigation state of one shared browsing session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::config::RunConfig;
use crate::models::CaptureArtifact;
use crate::pipeline::capture::capture_page;
use crate::pipeline::parser::parse_profiles;
use crate::pipeline::prompt::EXTRACTION_PROMPT;
use crate::pipeline::retry::{run_with_backoff, BackoffPolicy};
use crate::pipeline::store::{ProfileStore, StoreError};
use crate::pipeline::vision::{EndpointError, VisionClient};
use crate::session::{PageAdvance, SearchSession};

/// Run-fatal orchestration failure. Per-page and per-institution problems
/// are contained inside the run; only a checkpoint that cannot be written
/// ends it.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Final per-run report. Exit code stays zero even when pages or whole
/// institutions were skipped; only session-level failures abort the run.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub institutions: Vec<InstitutionSummary>,
    pub total_records: usize,
    pub cancelled: bool,
}

#[derive(Debug, Serialize)]
pub struct InstitutionSummary {
    pub institution: String,
    pub pages_processed: u32,
    pub pages_skipped: u32,
    /// Records newly added this run (resumed records not included).
    pub new_records: usize,
    pub parse_warnings: u32,
    /// Why the institution was abandoned early, when it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

impl InstitutionSummary {
    fn new(institution: &str) -> Self {
        Self {
            institution: institution.to_string(),
            pages_processed: 0,
            pages_skipped: 0,
            new_records: 0,
            parse_warnings: 0,
            aborted: None,
        }
    }
}

/// What processing one page amounted to.
enum PageOutcome {
    /// Parsed and merged; carries the number of records new to the dataset.
    Merged { new: usize },
    /// Capture or extraction retries were exhausted; page abandoned.
    Skipped,
    /// Fatal endpoint error; stop this institution, keep the run alive.
    AbortInstitution(String),
}

pub struct PipelineController<'a> {
    config: &'a RunConfig,
    vision: &'a dyn VisionClient,
    store: ProfileStore,
    endpoint_policy: BackoffPolicy,
    capture_policy: BackoffPolicy,
    sleep: Box<dyn Fn(Duration) + 'a>,
    cancel: Arc<AtomicBool>,
}

impl<'a> PipelineController<'a> {
    pub fn new(config: &'a RunConfig, vision: &'a dyn VisionClient, store: ProfileStore) -> Self {
        let endpoint_policy = BackoffPolicy::new(config.backoff.clone());
        let mut capture_settings = config.backoff.clone();
        capture_settings.max_attempts = config.capture_retry_limit;
        Self {
            config,
            vision,
            store,
            endpoint_policy,
            capture_policy: BackoffPolicy::new(capture_settings),
            sleep: Box::new(|d| std::thread::sleep(d)),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replace the delay sink; tests record delays instead of sleeping.
    pub fn with_sleeper(mut self, sleep: impl Fn(Duration) + 'a) -> Self {
        self.sleep = Box::new(sleep);
        self
    }

    /// Cooperative cancellation handle. Checked between pipeline states,
    /// never mid-call; a final checkpoint still runs after cancellation.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Run the full pipeline over every configured institution.
    pub fn run(mut self, session: &mut dyn SearchSession) -> Result<RunSummary, PipelineError> {
        let run_id = Uuid::new_v4();
        let _span = tracing::info_span!("pipeline_run", %run_id).entered();
        tracing::info!(
            institutions = self.config.institutions.len(),
            resumed_records = self.store.len(),
            "Pipeline starting"
        );

        let mut summaries = Vec::new();
        let institutions = self.config.institutions.clone();
        for institution in &institutions {
            if self.cancelled() {
                tracing::info!("Cancellation requested, stopping before next institution");
                break;
            }
            summaries.push(self.process_institution(session, institution)?);
        }

        // Terminal state: one last checkpoint so nothing completed is lost,
        // cancelled or not.
        self.store.checkpoint()?;

        let summary = RunSummary {
            run_id,
            total_records: self.store.len(),
            cancelled: self.cancelled(),
            institutions: summaries,
        };
        for inst in &summary.institutions {
            tracing::info!(
                institution = %inst.institution,
                pages = inst.pages_processed,
                skipped_pages = inst.pages_skipped,
                new_records = inst.new_records,
                warnings = inst.parse_warnings,
                aborted = inst.aborted.as_deref().unwrap_or(""),
                "Institution complete"
            );
        }
        for (institution, count) in self.store.counts_by_institution() {
            tracing::info!(institution = %institution, records = count, "Dataset total");
        }
        tracing::info!(
            total_records = summary.total_records,
            cancelled = summary.cancelled,
            "Pipeline finished"
        );
        Ok(summary)
    }

    fn process_institution(
        &mut self,
        session: &mut dyn SearchSession,
        institution: &str,
    ) -> Result<InstitutionSummary, PipelineError> {
        let mut summary = InstitutionSummary::new(institution);

        if let Err(e) = session.search(institution) {
            tracing::warn!(institution, error = %e, "Search failed, skipping institution");
            summary.aborted = Some(format!("search failed: {e}"));
            return Ok(summary);
        }

        let mut page = 1u32;
        let mut stalled_pages = 0u32;
        loop {
            if self.cancelled() {
                break;
            }

            match self.process_page(session, institution, page, &mut summary)? {
                PageOutcome::Merged { new } => {
                    summary.pages_processed += 1;
                    summary.new_records += new;
                    if new == 0 {
                        stalled_pages += 1;
                        if stalled_pages >= self.config.stall_page_limit {
                            tracing::info!(
                                institution,
                                page,
                                stalled_pages,
                                "No new records, moving to next institution"
                            );
                            break;
                        }
                    } else {
                        stalled_pages = 0;
                    }
                }
                PageOutcome::Skipped => {
                    summary.pages_skipped += 1;
                }
                PageOutcome::AbortInstitution(reason) => {
                    tracing::warn!(institution, page, reason = %reason, "Institution aborted");
                    summary.aborted = Some(reason);
                    break;
                }
            }

            if page >= self.config.max_pages_per_institution {
                break;
            }
            match session.next_page() {
                Ok(PageAdvance::Advanced) => page += 1,
                Ok(PageAdvance::NoMoreResults) => break,
                Err(e) => {
                    tracing::warn!(institution, page, error = %e, "Pagination failed");
                    summary.aborted = Some(format!("pagination failed: {e}"));
                    break;
                }
            }
        }

        Ok(summary)
    }

    /// One page through all four stages. Returns Err only for store
    /// failures — everything else is contained here.
    fn process_page(
        &mut self,
        session: &mut dyn SearchSession,
        institution: &str,
        page: u32,
        summary: &mut InstitutionSummary,
    ) -> Result<PageOutcome, PipelineError> {
        // Capture, retried within its own bounded budget.
        let artifact = run_with_backoff(
            &self.capture_policy,
            self.sleep.as_ref(),
            |_e| true,
            |attempt| {
                if attempt.number > 0 {
                    tracing::debug!(institution, page, attempt = attempt.number, "Capture retry");
                }
                capture_page(session, institution, page)
            },
        );
        let artifact: CaptureArtifact = match artifact {
            Ok(a) => a,
            Err(e) => {
                tracing::warn!(institution, page, error = %e, "Capture failed, skipping page");
                return Ok(PageOutcome::Skipped);
            }
        };

        // Extraction with exponential backoff on transient endpoint errors.
        let response = run_with_backoff(
            &self.endpoint_policy,
            self.sleep.as_ref(),
            |e: &EndpointError| e.is_transient(),
            |_attempt| self.vision.extract(&artifact, EXTRACTION_PROMPT),
        );
        let response = match response {
            Ok(r) => r,
            Err(e) if e.is_transient() => {
                tracing::warn!(institution, page, error = %e, "Retries exhausted, skipping page");
                return Ok(PageOutcome::Skipped);
            }
            Err(e) => return Ok(PageOutcome::AbortInstitution(e.to_string())),
        };

        // Parse never fails; a warning is recorded and the run moves on.
        let parsed = parse_profiles(&response, institution, page);
        if parsed.warning.is_some() {
            summary.parse_warnings += 1;
        }

        let extracted = parsed.records.len();
        let new = self.store.merge(parsed.records);
        self.store.checkpoint()?;
        tracing::info!(
            institution,
            page,
            extracted,
            new,
            total = self.store.len(),
            "Page merged"
        );
        Ok(PageOutcome::Merged { new })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::pipeline::store::ProfileStore;
    use crate::pipeline::vision::{EndpointError, MockVisionClient};
    use crate::session::ScriptedSession;

    fn test_config(institutions: &[&str]) -> RunConfig {
        let mut config = RunConfig::default();
        config.institutions = institutions.iter().map(|s| s.to_string()).collect();
        config.backoff.base_delay_ms = 10;
        config.backoff.max_delay_ms = 100;
        config
    }

    fn store_in(dir: &tempfile::TempDir) -> ProfileStore {
        ProfileStore::open(dir.path().join("dataset.json")).unwrap()
    }

    fn run(
        config: &RunConfig,
        vision: &MockVisionClient,
        session: &mut ScriptedSession,
        store: ProfileStore,
    ) -> RunSummary {
        PipelineController::new(config, vision, store)
            .with_sleeper(|_| {})
            .run(session)
            .unwrap()
    }

    #[test]
    fn happy_path_collects_and_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&["NDU"]);
        let vision = MockVisionClient::scripted(vec![
            Ok(r#"[{"name": "Jane Roe"}, {"name": "John Doe"}]"#.into()),
            Ok(r#"[{"name": "Mary Major"}]"#.into()),
        ]);
        let mut session = ScriptedSession::new(2);

        let summary = run(&config, &vision, &mut session, store_in(&dir));

        assert_eq!(summary.total_records, 3);
        assert_eq!(summary.institutions.len(), 1);
        let inst = &summary.institutions[0];
        assert_eq!(inst.pages_processed, 2);
        assert_eq!(inst.new_records, 3);
        assert!(inst.aborted.is_none());
        assert!(!summary.cancelled);

        // Dataset survives on disk.
        let reopened = ProfileStore::open(dir.path().join("dataset.json")).unwrap();
        assert_eq!(reopened.len(), 3);
    }

    #[test]
    fn three_rate_limits_then_success_with_growing_delays() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&["NDU"]);
        config.max_pages_per_institution = 1;
        let rate_limited = || EndpointError::Transient {
            status: Some(429),
            message: "rate limited".into(),
        };
        let vision = MockVisionClient::scripted(vec![
            Err(rate_limited()),
            Err(rate_limited()),
            Err(rate_limited()),
            Ok(r#"[{"name": "Jane Roe"}]"#.into()),
        ]);
        let mut session = ScriptedSession::new(1);

        let delays: Arc<Mutex<Vec<Duration>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&delays);
        let summary = PipelineController::new(&config, &vision, store_in(&dir))
            .with_sleeper(move |d| sink.lock().unwrap().push(d))
            .run(&mut session)
            .unwrap();

        assert_eq!(summary.total_records, 1);
        assert_eq!(vision.call_count(), 4);
        let delays = delays.lock().unwrap();
        assert_eq!(delays.len(), 3);
        for pair in delays.windows(2) {
            assert!(pair[1] >= pair[0], "backoff must grow: {delays:?}");
        }
    }

    #[test]
    fn exhausted_transient_retries_skip_the_page_not_the_institution() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&["NDU"]);
        config.backoff.max_attempts = 2;
        // Page 1: two 503s (budget spent); page 2 succeeds.
        let unavailable = || EndpointError::Transient {
            status: Some(503),
            message: "unavailable".into(),
        };
        let vision = MockVisionClient::scripted(vec![
            Err(unavailable()),
            Err(unavailable()),
            Ok(r#"[{"name": "Jane Roe"}]"#.into()),
        ]);
        let mut session = ScriptedSession::new(2);

        let summary = run(&config, &vision, &mut session, store_in(&dir));

        let inst = &summary.institutions[0];
        assert_eq!(inst.pages_skipped, 1);
        assert_eq!(inst.pages_processed, 1);
        assert_eq!(summary.total_records, 1);
        assert!(inst.aborted.is_none());
    }

    #[test]
    fn fatal_endpoint_error_aborts_institution_but_not_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&["NDU", "Eisenhower School"]);
        let vision = MockVisionClient::scripted(vec![
            Err(EndpointError::Fatal {
                status: 401,
                message: "bad key".into(),
            }),
            Ok(r#"[{"name": "Jane Roe"}]"#.into()),
        ]);
        let mut session = ScriptedSession::new(1);

        let summary = run(&config, &vision, &mut session, store_in(&dir));

        assert_eq!(summary.institutions.len(), 2);
        assert!(summary.institutions[0].aborted.is_some());
        assert_eq!(summary.institutions[0].new_records, 0);
        assert!(summary.institutions[1].aborted.is_none());
        assert_eq!(summary.institutions[1].new_records, 1);
        // Fatal errors are not retried.
        assert_eq!(vision.call_count(), 2);
    }

    #[test]
    fn stall_limit_stops_pagination_early() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&["NDU"]);
        config.max_pages_per_institution = 10;
        config.stall_page_limit = 2;
        // Every page reports the same person: page 1 adds one, pages 2-3 add
        // zero new, then the institution stops.
        let vision = MockVisionClient::new(r#"[{"name": "Jane Roe"}]"#);
        let mut session = ScriptedSession::new(10);

        let summary = run(&config, &vision, &mut session, store_in(&dir));

        let inst = &summary.institutions[0];
        assert_eq!(inst.pages_processed, 3);
        assert_eq!(inst.new_records, 1);
        assert_eq!(summary.total_records, 1);
    }

    #[test]
    fn no_more_results_ends_institution() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&["NDU"]);
        config.max_pages_per_institution = 10;
        config.stall_page_limit = 10;
        let vision = MockVisionClient::scripted(vec![
            Ok(r#"[{"name": "Jane Roe"}]"#.into()),
            Ok(r#"[{"name": "John Doe"}]"#.into()),
        ]);
        let mut session = ScriptedSession::new(2);

        let summary = run(&config, &vision, &mut session, store_in(&dir));

        assert_eq!(summary.institutions[0].pages_processed, 2);
        assert_eq!(summary.total_records, 2);
    }

    #[test]
    fn parse_warning_counts_and_run_continues() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&["NDU"]);
        config.stall_page_limit = 5;
        config.max_pages_per_institution = 2;
        let vision = MockVisionClient::scripted(vec![
            Ok("No profiles visible.".into()),
            Ok(r#"[{"name": "Jane Roe"}]"#.into()),
        ]);
        let mut session = ScriptedSession::new(2);

        let summary = run(&config, &vision, &mut session, store_in(&dir));

        let inst = &summary.institutions[0];
        assert_eq!(inst.parse_warnings, 1);
        assert_eq!(inst.pages_processed, 2);
        assert_eq!(summary.total_records, 1);
    }

    #[test]
    fn blank_response_is_not_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&["NDU"]);
        config.max_pages_per_institution = 1;
        let vision = MockVisionClient::new("   ");
        let mut session = ScriptedSession::new(1);

        let summary = run(&config, &vision, &mut session, store_in(&dir));

        assert_eq!(summary.institutions[0].parse_warnings, 0);
        assert_eq!(summary.total_records, 0);
    }

    #[test]
    fn capture_failures_retry_then_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&["NDU"]);
        config.max_pages_per_institution = 1;
        config.capture_retry_limit = 3;
        let vision = MockVisionClient::new(r#"[{"name": "Jane Roe"}]"#);
        let mut session = ScriptedSession::new(1).failing_first_screenshots(2);

        let summary = run(&config, &vision, &mut session, store_in(&dir));

        assert_eq!(summary.total_records, 1);
        assert_eq!(summary.institutions[0].pages_skipped, 0);
    }

    #[test]
    fn capture_budget_exhaustion_skips_page() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&["NDU"]);
        config.max_pages_per_institution = 1;
        config.capture_retry_limit = 2;
        let vision = MockVisionClient::new(r#"[{"name": "Jane Roe"}]"#);
        let mut session = ScriptedSession::new(1).failing_first_screenshots(5);

        let summary = run(&config, &vision, &mut session, store_in(&dir));

        assert_eq!(summary.institutions[0].pages_skipped, 1);
        assert_eq!(summary.total_records, 0);
        assert_eq!(vision.call_count(), 0);
    }

    #[test]
    fn pre_cancelled_run_processes_nothing_but_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&["NDU"]);
        let vision = MockVisionClient::new("[]");
        let mut session = ScriptedSession::new(3);

        let controller = PipelineController::new(&config, &vision, store_in(&dir))
            .with_sleeper(|_| {});
        controller.cancel_flag().store(true, Ordering::Relaxed);
        let summary = controller.run(&mut session).unwrap();

        assert!(summary.cancelled);
        assert!(summary.institutions.is_empty());
        assert_eq!(vision.call_count(), 0);
        // Final checkpoint still ran.
        assert!(dir.path().join("dataset.json").exists());
    }

    #[test]
    fn resumed_records_are_not_double_counted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dataset.json");
        let mut seeded = ProfileStore::open(&path).unwrap();
        seeded.merge(vec![crate::models::ProfileRecord::new("Jane Roe", "NDU", 1).unwrap()]);
        seeded.checkpoint().unwrap();

        let mut config = test_config(&["NDU"]);
        config.max_pages_per_institution = 1;
        let vision = MockVisionClient::new(r#"[{"name": "Jane Roe"}]"#);
        let mut session = ScriptedSession::new(1);

        let store = ProfileStore::open(&path).unwrap();
        let summary = run(&config, &vision, &mut session, store);

        assert_eq!(summary.institutions[0].new_records, 0);
        assert_eq!(summary.total_records, 1);
    }
}
