//! Watch selector construction.
//!
//! A selector is immutable once a watch attempt starts; restarts build a
//! new value via [`WatchSelector::with_resume_token`].

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSelector {
    pub namespace: String,
    pub label_selector: String,
    pub field_selector: Option<String>,
    pub resume_token: Option<String>,
}

impl WatchSelector {
    pub fn new(namespace: impl Into<String>, label_selector: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            label_selector: label_selector.into(),
            field_selector: None,
            resume_token: None,
        }
    }

    #[must_use]
    pub fn with_field_selector(mut self, field_selector: Option<String>) -> Self {
        self.field_selector = field_selector.filter(|value| !value.trim().is_empty());
        self
    }

    /// Selector for a watch restart, resuming from `token`.
    #[must_use]
    pub fn with_resume_token(&self, token: Option<String>) -> Self {
        Self {
            resume_token: token.filter(|value| !value.trim().is_empty()),
            ..self.clone()
        }
    }
}

/// Join `key=value` pairs into a label selector string.
pub fn label_selector(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Join `key=value` pairs into a field selector string; `None` when empty.
pub fn field_selector(pairs: &[(&str, &str)]) -> Option<String> {
    if pairs.is_empty() {
        return None;
    }
    Some(label_selector(pairs))
}
