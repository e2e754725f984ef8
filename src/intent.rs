//! Rule-based intent classification
//!
//! Rules are evaluated top to bottom against the lowercased input and the
//! first rule with a matching keyword wins. Matching is a plain substring
//! test, so "this" contains "hi" and classifies as a greeting.

use std::collections::HashMap;
use std::fmt;

/// What the user asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    /// Current time of day
    Time,
    /// Greeting
    Greeting,
    /// Farewell
    Farewell,
    /// Anything else; routed to the inference backend
    Chat,
}

impl Intent {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Time => "time",
            Self::Greeting => "greeting",
            Self::Farewell => "farewell",
            Self::Chat => "chat",
        }
    }

    /// Whether this intent is answered without the backend
    #[must_use]
    pub const fn is_local(self) -> bool {
        !matches!(self, Self::Chat)
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One classification rule
#[derive(Debug, Clone, Copy)]
pub struct IntentRule {
    /// Any of these substrings triggers the rule
    pub keywords: &'static [&'static str],
    /// Intent produced on match
    pub intent: Intent,
}

/// Built-in precedence table; order is observable behavior
pub const DEFAULT_RULES: &[IntentRule] = &[
    IntentRule {
        keywords: &["time"],
        intent: Intent::Time,
    },
    IntentRule {
        keywords: &["hi", "hello"],
        intent: Intent::Greeting,
    },
    IntentRule {
        keywords: &["bye"],
        intent: Intent::Farewell,
    },
];

/// Classification result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentResult {
    /// Matched intent
    pub intent: Intent,
    /// Extracted entities; no built-in rule fills these yet
    pub entities: HashMap<String, String>,
    /// Input text as received
    pub original_text: String,
}

/// Maps text to an intent using an ordered rule list
#[derive(Debug, Clone, Copy)]
pub struct IntentClassifier {
    rules: &'static [IntentRule],
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl IntentClassifier {
    /// Classifier over [`DEFAULT_RULES`]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            rules: DEFAULT_RULES,
        }
    }

    /// Classifier over a custom rule list
    #[must_use]
    pub const fn with_rules(rules: &'static [IntentRule]) -> Self {
        Self { rules }
    }

    /// Classify text; unmatched input falls through to [`Intent::Chat`]
    #[must_use]
    pub fn classify(&self, text: &str) -> IntentResult {
        let lower = text.to_lowercase();

        let intent = self
            .rules
            .iter()
            .find(|rule| rule.keywords.iter().any(|k| lower.contains(k)))
            .map_or(Intent::Chat, |rule| rule.intent);

        IntentResult {
            intent,
            entities: HashMap::new(),
            original_text: text.to_string(),
        }
    }
}
