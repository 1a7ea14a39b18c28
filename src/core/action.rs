//! Atomic actions performed by workers against the live target.

use serde::{Deserialize, Serialize};

/// The kind of an atomic action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Click,
    Type,
    Navigate,
    Scroll,
    Press,
    Extract,
    Wait,
}

impl ActionKind {
    /// Whether a succeeded action of this kind should not be repeated in
    /// the same session. Waiting and scrolling are repeatable.
    pub fn is_dedupable(&self) -> bool {
        !matches!(self, ActionKind::Wait | ActionKind::Scroll)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Click => "click",
            ActionKind::Type => "type",
            ActionKind::Navigate => "navigate",
            ActionKind::Scroll => "scroll",
            ActionKind::Press => "press",
            ActionKind::Extract => "extract",
            ActionKind::Wait => "wait",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single action chosen by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub kind: ActionKind,
    /// Description of the element or location the action applies to.
    pub target: String,
    /// Text to type, key to press, URL to open, and so on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Action {
    pub fn new(kind: ActionKind, target: &str) -> Self {
        Self {
            kind,
            target: target.to_string(),
            value: None,
        }
    }

    pub fn with_value(mut self, value: &str) -> Self {
        self.value = Some(value.to_string());
        self
    }

    pub fn click(target: &str) -> Self {
        Self::new(ActionKind::Click, target)
    }

    pub fn type_text(target: &str, text: &str) -> Self {
        Self::new(ActionKind::Type, target).with_value(text)
    }

    pub fn navigate(url: &str) -> Self {
        Self::new(ActionKind::Navigate, url)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{} {:?} = {:?}", self.kind, self.target, value),
            None => write!(f, "{} {:?}", self.kind, self.target),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedupable_kinds() {
        assert!(ActionKind::Click.is_dedupable());
        assert!(ActionKind::Navigate.is_dedupable());
        assert!(!ActionKind::Wait.is_dedupable());
        assert!(!ActionKind::Scroll.is_dedupable());
    }

    #[test]
    fn test_action_display() {
        assert_eq!(Action::click("Login button").to_string(), "click \"Login button\"");
        assert_eq!(
            Action::type_text("Username", "alice").to_string(),
            "type \"Username\" = \"alice\""
        );
    }

    #[test]
    fn test_action_serialization() {
        let json = serde_json::to_string(&Action::navigate("https://example.com")).unwrap();
        assert_eq!(json, r#"{"kind":"navigate","target":"https://example.com"}"#);
    }
}
