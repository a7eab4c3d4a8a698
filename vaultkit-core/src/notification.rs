//! User-facing notifications emitted alongside state changes.

use serde::{Deserialize, Serialize};

use crate::types::ContextId;

/// Visual severity of a [`Notification`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    /// An operation completed.
    Success,
    /// Neutral information.
    Info,
    /// Something degraded but recoverable.
    Warning,
    /// An operation failed.
    Error,
}

/// A transient message for the user.
///
/// Notifications are delivered over the bus. With a `target` set they reach
/// a single context, otherwise every connected context shows them. Contexts
/// replace a visible notification carrying the same `group` instead of
/// stacking a duplicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Visual severity.
    pub kind: NotificationKind,
    /// Message shown to the user.
    pub text: String,
    /// Deliver to one context only; `None` broadcasts.
    pub target: Option<ContextId>,
    /// Auto-dismiss after this many milliseconds.
    pub expiration_ms: Option<u64>,
    /// Replacement key for successive notifications about the same concern.
    pub group: Option<String>,
}

impl Notification {
    fn new(kind: NotificationKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            target: None,
            expiration_ms: None,
            group: None,
        }
    }

    /// A broadcast success notification.
    #[must_use]
    pub fn success(text: impl Into<String>) -> Self {
        Self::new(NotificationKind::Success, text)
    }

    /// A broadcast informational notification.
    #[must_use]
    pub fn info(text: impl Into<String>) -> Self {
        Self::new(NotificationKind::Info, text)
    }

    /// A broadcast warning notification.
    #[must_use]
    pub fn warning(text: impl Into<String>) -> Self {
        Self::new(NotificationKind::Warning, text)
    }

    /// A broadcast error notification.
    #[must_use]
    pub fn error(text: impl Into<String>) -> Self {
        Self::new(NotificationKind::Error, text)
    }

    /// Restricts delivery to `context`.
    #[must_use]
    pub fn with_target(mut self, context: ContextId) -> Self {
        self.target = Some(context);
        self
    }

    /// Sets the replacement key.
    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Auto-dismisses the notification after `expiration_ms`.
    #[must_use]
    pub const fn with_expiration_ms(mut self, expiration_ms: u64) -> Self {
        self.expiration_ms = Some(expiration_ms);
        self
    }
}

/// Formats an operation failure as `"{base} ({detail})"`.
///
/// An empty detail string reads as `"unknown error"` so the user never sees
/// bare parentheses.
#[must_use]
pub fn failure_text(base: &str, detail: &str) -> String {
    if detail.is_empty() {
        format!("{base} (unknown error)")
    } else {
        format!("{base} ({detail})")
    }
}
