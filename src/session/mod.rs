//! Browser session capability consumed by the extraction engine
//!
//! The engine never talks to chromiumoxide directly; it drives a
//! [`PageSession`] handed in by the caller. The run loop acquires sessions
//! through a [`SessionProvider`] so tests can substitute fakes for the
//! whole browser stack.

mod chrome;

pub use chrome::{BrowserHandle, ChromeSession, ChromeSessionProvider, launch_browser};

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// A browser-level fault: navigation failure, crashed session, lost
/// connection. Distinct from a missing sub-element, which is an expected
/// condition and surfaces as `Ok(None)` on the element accessors.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct SessionFault {
    message: String,
}

impl SessionFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Wrap any underlying driver error.
    pub fn from_err(err: impl std::fmt::Display) -> Self {
        Self {
            message: err.to_string(),
        }
    }
}

/// One element handle returned by [`PageSession::find_all`].
///
/// Both accessors report an absent sub-element as `Ok(None)`; `Err` is
/// reserved for session-level faults.
#[async_trait]
pub trait PageElement: Send + Sync {
    /// Inner text of the first descendant matching `selector`.
    async fn text(&self, selector: &str) -> Result<Option<String>, SessionFault>;

    /// Attribute value of the first descendant matching `selector`.
    async fn attribute(&self, selector: &str, attr: &str)
    -> Result<Option<String>, SessionFault>;
}

/// A live page session already owned by the caller.
///
/// Mutating operations (`navigate`, `scroll_to_bottom`) change the live
/// page; the session's lifecycle (open/close) stays with the caller.
#[async_trait]
pub trait PageSession: Send + Sync {
    type Element: PageElement;

    /// Navigate the session to `url`.
    async fn navigate(&self, url: &str) -> Result<(), SessionFault>;

    /// Wait until the document has finished its initial load.
    async fn wait_until_loaded(&self, timeout: Duration) -> Result<(), SessionFault>;

    /// Scroll to the bottom of the page.
    async fn scroll_to_bottom(&self) -> Result<(), SessionFault>;

    /// Current scrollable content height in CSS pixels.
    async fn content_height(&self) -> Result<i64, SessionFault>;

    /// All elements matching `selector`, in DOM encounter order.
    async fn find_all(&self, selector: &str) -> Result<Vec<Self::Element>, SessionFault>;

    /// First element matching `selector`, or `None` if absent.
    async fn find_one(&self, selector: &str) -> Result<Option<Self::Element>, SessionFault>;
}

/// Scoped acquisition of page sessions, one per target.
///
/// `close` takes the session by value: a session is single-owner and is
/// released on every exit path of target processing.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    type Session: PageSession;

    /// Open a fresh session for one target.
    async fn open(&self, target: &str) -> Result<Self::Session, SessionFault>;

    /// Release the session and its underlying resources.
    async fn close(&self, session: Self::Session);
}
