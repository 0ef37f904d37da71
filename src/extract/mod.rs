//! Scroll-convergence extraction engine
//!
//! Drives a page session through repeated scroll-and-harvest cycles until
//! the content height stops growing, producing the ordered batch of event
//! records currently loadable on the page.
//!
//! Field extraction is best-effort per field: a missing sub-element
//! resolves to that field's sentinel string and never disturbs the other
//! fields or sibling elements. Session faults and the convergence safety
//! cap abort the target but carry the partial batch out in the error.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::HarvestConfig;
use crate::error::HarvestError;
use crate::session::{PageElement, PageSession, SessionFault};

// =============================================================================
// Selectors (reference site DOM)
// =============================================================================

/// Container whose presence signals the event feed has rendered
pub const CONTAINER_SELECTOR: &str = "div.scroller";

/// One event item in the feed
pub const EVENT_ITEM_SELECTOR: &str = "div[class^='event cat']";

/// Free-form timestamp as rendered by the source
pub const DATE_SELECTOR: &str = "span.date_add";

/// Link back to the event's source, on the `href` attribute
pub const SOURCE_LINK_SELECTOR: &str = "a.source-link";

/// Event summary text
pub const SUMMARY_SELECTOR: &str = "div.title";

/// Optional event image, on the `src` attribute
pub const IMAGE_SELECTOR: &str = "label img";

// =============================================================================
// Sentinels
// =============================================================================

/// Sentinel for an event with no date sub-element
pub const DATE_MISSING: &str = "Date not found";

/// Sentinel for an event with no source link
pub const SOURCE_MISSING: &str = "Source not found";

/// Sentinel for an event with no summary text
pub const SUMMARY_MISSING: &str = "Data not found";

/// Sentinel for an event with no image
pub const IMAGE_MISSING: &str = "Image not found";

/// Poll interval while waiting for the container to appear
const CONTAINER_POLL_INTERVAL: Duration = Duration::from_millis(100);

// =============================================================================
// Data model
// =============================================================================

/// One harvested event.
///
/// All four fields are always present; absence at the source is
/// represented by the sentinel strings above, never by a missing field.
/// There is no identity field: two records with identical content are
/// indistinguishable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Free-form timestamp text as rendered by the source
    pub occurred_at: String,

    /// Source URL, or [`SOURCE_MISSING`]
    pub source_ref: String,

    /// Summary text, or [`SUMMARY_MISSING`]
    pub summary: String,

    /// Image URL, or [`IMAGE_MISSING`]
    pub image_ref: String,
}

/// Ordered batch produced by one convergence run for one target.
///
/// Order reflects DOM encounter order at the final stable scroll
/// position; it is not guaranteed stable across runs.
pub type HarvestBatch = Vec<EventRecord>;

// =============================================================================
// Engine
// =============================================================================

/// Harvest all currently-loadable events from an already-navigated page.
///
/// Precondition: the session has navigated to the target URL. The engine
/// waits up to `element_wait_timeout` for [`CONTAINER_SELECTOR`] to
/// appear, then runs the convergence loop: scroll to the bottom, pause
/// for `settle_interval`, extract the suffix of event elements not yet
/// converted, and stop once the content height no longer changes.
///
/// The loop is capped at `max_scroll_cycles`; exceeding it yields
/// [`HarvestError::ConvergenceTimeout`] carrying the partial batch, and a
/// session fault mid-loop yields [`HarvestError::Session`] the same way.
///
/// Side effects: mutates the session's scroll position. The session's
/// lifecycle stays with the caller.
pub async fn harvest_page<S: PageSession>(
    session: &S,
    config: &HarvestConfig,
) -> Result<HarvestBatch, HarvestError> {
    wait_for_container(session, config.element_wait_timeout()).await?;

    let mut events: HarvestBatch = Vec::new();

    let mut last_height = match session.content_height().await {
        Ok(height) => height,
        Err(fault) => return Err(session_error(fault, events)),
    };

    let mut cycles = 0u32;
    loop {
        if cycles >= config.max_scroll_cycles() {
            return Err(HarvestError::ConvergenceTimeout {
                cycles,
                partial: events,
            });
        }
        cycles += 1;

        if let Err(fault) = session.scroll_to_bottom().await {
            return Err(session_error(fault, events));
        }
        tokio::time::sleep(config.settle_interval()).await;

        // Re-querying returns previously seen items again; only the
        // suffix beyond the converted count is extracted.
        let items = match session.find_all(EVENT_ITEM_SELECTOR).await {
            Ok(items) => items,
            Err(fault) => return Err(session_error(fault, events)),
        };
        debug!(
            "Cycle {}: {} event elements in DOM, {} already converted",
            cycles,
            items.len(),
            events.len()
        );
        for item in items.iter().skip(events.len()) {
            events.push(extract_record(item).await);
        }

        let new_height = match session.content_height().await {
            Ok(height) => height,
            Err(fault) => return Err(session_error(fault, events)),
        };
        if new_height == last_height {
            info!(
                "Converged after {} scroll cycles with {} events",
                cycles,
                events.len()
            );
            break;
        }
        last_height = new_height;
    }

    Ok(events)
}

/// Wait for the event container to appear, failing the target if it never does.
async fn wait_for_container<S: PageSession>(
    session: &S,
    timeout: Duration,
) -> Result<(), HarvestError> {
    let start = Instant::now();
    loop {
        match session.find_one(CONTAINER_SELECTOR).await {
            Ok(Some(_)) => return Ok(()),
            Ok(None) => {}
            Err(fault) => return Err(session_error(fault, Vec::new())),
        }
        if start.elapsed() >= timeout {
            return Err(HarvestError::ElementNotFound {
                selector: CONTAINER_SELECTOR.to_string(),
                waited_secs: timeout.as_secs(),
            });
        }
        tokio::time::sleep(CONTAINER_POLL_INTERVAL).await;
    }
}

/// Extract the four record fields from one event element.
///
/// Each field is extracted independently; a gap in one never aborts the
/// others.
async fn extract_record<E: PageElement>(element: &E) -> EventRecord {
    let occurred_at = field_or_sentinel(element.text(DATE_SELECTOR).await, DATE_MISSING);
    let source_ref = field_or_sentinel(
        element.attribute(SOURCE_LINK_SELECTOR, "href").await,
        SOURCE_MISSING,
    );
    let summary = field_or_sentinel(element.text(SUMMARY_SELECTOR).await, SUMMARY_MISSING);
    let image_ref = field_or_sentinel(
        element.attribute(IMAGE_SELECTOR, "src").await,
        IMAGE_MISSING,
    );

    EventRecord {
        occurred_at,
        source_ref,
        summary,
        image_ref,
    }
}

/// Resolve one field extraction to its value or the sentinel.
///
/// A session fault during a single field lookup is treated as a gap too;
/// a genuinely broken session surfaces at the next page-level call.
fn field_or_sentinel(field: Result<Option<String>, SessionFault>, sentinel: &str) -> String {
    match field {
        Ok(Some(value)) => value,
        Ok(None) => sentinel.to_string(),
        Err(fault) => {
            debug!("Field lookup fault treated as gap: {}", fault);
            sentinel.to_string()
        }
    }
}

fn session_error(fault: SessionFault, partial: HarvestBatch) -> HarvestError {
    HarvestError::Session {
        message: fault.to_string(),
        partial,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Clone)]
    struct FakeElement {
        occurred_at: Option<String>,
        source_ref: Option<String>,
        summary: Option<String>,
        image_ref: Option<String>,
        extractions: Arc<AtomicUsize>,
    }

    impl FakeElement {
        fn full(n: usize) -> Self {
            Self {
                occurred_at: Some(format!("{n} minutes ago")),
                source_ref: Some(format!("https://source.example/{n}")),
                summary: Some(format!("event {n}")),
                image_ref: Some(format!("https://img.example/{n}.jpg")),
                extractions: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl PageElement for FakeElement {
        async fn text(&self, selector: &str) -> Result<Option<String>, SessionFault> {
            match selector {
                DATE_SELECTOR => Ok(self.occurred_at.clone()),
                SUMMARY_SELECTOR => {
                    // One count per record conversion
                    self.extractions.fetch_add(1, Ordering::SeqCst);
                    Ok(self.summary.clone())
                }
                other => panic!("unexpected text selector {other}"),
            }
        }

        async fn attribute(
            &self,
            selector: &str,
            _attr: &str,
        ) -> Result<Option<String>, SessionFault> {
            match selector {
                SOURCE_LINK_SELECTOR => Ok(self.source_ref.clone()),
                IMAGE_SELECTOR => Ok(self.image_ref.clone()),
                other => panic!("unexpected attribute selector {other}"),
            }
        }
    }

    /// Scripted session: heights are consumed per `content_height` call,
    /// element batches per scroll cycle.
    struct FakeSession {
        heights: Vec<i64>,
        batches: Vec<Vec<FakeElement>>,
        container_present: bool,
        fail_on_scroll: Option<usize>,
        fail_find_one: bool,
        height_calls: Mutex<usize>,
        scrolls: Mutex<usize>,
    }

    impl FakeSession {
        fn new(heights: Vec<i64>, batches: Vec<Vec<FakeElement>>) -> Self {
            Self {
                heights,
                batches,
                container_present: true,
                fail_on_scroll: None,
                fail_find_one: false,
                height_calls: Mutex::new(0),
                scrolls: Mutex::new(0),
            }
        }

        fn scroll_count(&self) -> usize {
            *self.scrolls.lock().unwrap()
        }
    }

    #[async_trait]
    impl PageSession for FakeSession {
        type Element = FakeElement;

        async fn navigate(&self, _url: &str) -> Result<(), SessionFault> {
            Ok(())
        }

        async fn wait_until_loaded(&self, _timeout: Duration) -> Result<(), SessionFault> {
            Ok(())
        }

        async fn scroll_to_bottom(&self) -> Result<(), SessionFault> {
            let mut scrolls = self.scrolls.lock().unwrap();
            *scrolls += 1;
            if self.fail_on_scroll == Some(*scrolls) {
                return Err(SessionFault::new("browser gone"));
            }
            Ok(())
        }

        async fn content_height(&self) -> Result<i64, SessionFault> {
            let mut calls = self.height_calls.lock().unwrap();
            let index = (*calls).min(self.heights.len() - 1);
            *calls += 1;
            Ok(self.heights[index])
        }

        async fn find_all(&self, _selector: &str) -> Result<Vec<FakeElement>, SessionFault> {
            let scroll = self.scroll_count();
            assert!(scroll > 0, "find_all before first scroll");
            let index = (scroll - 1).min(self.batches.len() - 1);
            Ok(self.batches[index].clone())
        }

        async fn find_one(&self, _selector: &str) -> Result<Option<FakeElement>, SessionFault> {
            if self.fail_find_one {
                return Err(SessionFault::new("connection lost"));
            }
            if self.container_present {
                Ok(Some(FakeElement::full(0)))
            } else {
                Ok(None)
            }
        }
    }

    fn fast_config() -> HarvestConfig {
        HarvestConfig::default()
            .with_settle_interval(Duration::ZERO)
            .with_element_wait_timeout(Duration::ZERO)
    }

    #[tokio::test]
    async fn converges_when_height_stops_growing() {
        let batch = vec![FakeElement::full(1)];
        let session = FakeSession::new(vec![100, 150, 150], vec![batch.clone(), batch]);

        let events = harvest_page(&session, &fast_config()).await.unwrap();

        assert_eq!(session.scroll_count(), 2);
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn extracts_only_the_unseen_suffix() {
        let elements: Vec<FakeElement> = (0..5).map(FakeElement::full).collect();
        let first_batch = elements[..3].to_vec();
        let second_batch = elements.clone();
        let session = FakeSession::new(vec![100, 150, 150], vec![first_batch, second_batch]);

        let events = harvest_page(&session, &fast_config()).await.unwrap();

        assert_eq!(events.len(), 5);
        // Encounter order preserved
        let summaries: Vec<&str> = events.iter().map(|e| e.summary.as_str()).collect();
        assert_eq!(
            summaries,
            vec!["event 0", "event 1", "event 2", "event 3", "event 4"]
        );
        // Each element converted exactly once despite being re-returned
        for element in &elements {
            assert_eq!(element.extractions.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn missing_image_yields_sentinel_without_disturbing_siblings() {
        let mut gapped = FakeElement::full(1);
        gapped.image_ref = None;
        let sibling = FakeElement::full(2);
        let session = FakeSession::new(vec![100, 100], vec![vec![gapped, sibling]]);

        let events = harvest_page(&session, &fast_config()).await.unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].image_ref, IMAGE_MISSING);
        assert_eq!(events[0].occurred_at, "1 minutes ago");
        assert_eq!(events[0].source_ref, "https://source.example/1");
        assert_eq!(events[0].summary, "event 1");
        assert_eq!(events[1].image_ref, "https://img.example/2.jpg");
    }

    #[tokio::test]
    async fn all_fields_missing_yield_all_sentinels() {
        let empty = FakeElement {
            occurred_at: None,
            source_ref: None,
            summary: None,
            image_ref: None,
            extractions: Arc::new(AtomicUsize::new(0)),
        };
        let session = FakeSession::new(vec![100, 100], vec![vec![empty]]);

        let events = harvest_page(&session, &fast_config()).await.unwrap();

        assert_eq!(
            events[0],
            EventRecord {
                occurred_at: DATE_MISSING.to_string(),
                source_ref: SOURCE_MISSING.to_string(),
                summary: SUMMARY_MISSING.to_string(),
                image_ref: IMAGE_MISSING.to_string(),
            }
        );
    }

    #[tokio::test]
    async fn session_fault_preserves_partial_batch() {
        let batch = vec![
            FakeElement::full(0),
            FakeElement::full(1),
            FakeElement::full(2),
        ];
        let mut session = FakeSession::new(vec![100, 150, 200], vec![batch.clone(), batch]);
        session.fail_on_scroll = Some(2);

        let err = harvest_page(&session, &fast_config()).await.unwrap_err();

        match err {
            HarvestError::Session { partial, .. } => assert_eq!(partial.len(), 3),
            other => panic!("expected Session error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn perpetually_growing_page_hits_the_safety_cap() {
        let batch = vec![FakeElement::full(0)];
        // Strictly increasing heights, never converges
        let session = FakeSession::new(
            (0..20).map(|i| 100 + i * 10).collect(),
            vec![batch.clone(), batch],
        );
        let config = fast_config().with_max_scroll_cycles(3);

        let err = harvest_page(&session, &config).await.unwrap_err();

        match err {
            HarvestError::ConvergenceTimeout { cycles, partial } => {
                assert_eq!(cycles, 3);
                assert!(!partial.is_empty());
            }
            other => panic!("expected ConvergenceTimeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dead_session_during_container_wait_is_a_session_error() {
        // A session fault while polling for the container must surface as
        // such, not masquerade as a missing element after the full wait
        let mut session = FakeSession::new(vec![100], vec![vec![]]);
        session.fail_find_one = true;

        let err = harvest_page(&session, &fast_config()).await.unwrap_err();

        match err {
            HarvestError::Session { partial, .. } => assert!(partial.is_empty()),
            other => panic!("expected Session error, got {other:?}"),
        }
        assert_eq!(session.scroll_count(), 0);
    }

    #[tokio::test]
    async fn absent_container_fails_the_target() {
        let mut session = FakeSession::new(vec![100], vec![vec![]]);
        session.container_present = false;

        let err = harvest_page(&session, &fast_config()).await.unwrap_err();

        match err {
            HarvestError::ElementNotFound { selector, .. } => {
                assert_eq!(selector, CONTAINER_SELECTOR);
            }
            other => panic!("expected ElementNotFound, got {other:?}"),
        }
        assert_eq!(session.scroll_count(), 0);
    }
}
