//! Element resolution strategies.
//!
//! A [`Strategy`] is one way of finding a UI element. Its canonical selector
//! string (`css=…`, `xpath=…`, `label=…`, `placeholder=…`) is what the
//! learned-selector cache stores, so it must round-trip through
//! [`Strategy::parse`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of resolution strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Structural CSS selector.
    Css,
    /// XPath expression, used for relative-to-label searches.
    XPath,
    /// Accessible label contains the pattern (case-insensitive).
    Label,
    /// Placeholder text contains the pattern (case-insensitive).
    Placeholder,
}

impl StrategyKind {
    /// Prefix used in canonical selector strings.
    #[must_use]
    pub const fn prefix(&self) -> &'static str {
        match self {
            Self::Css => "css",
            Self::XPath => "xpath",
            Self::Label => "label",
            Self::Placeholder => "placeholder",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "css" => Some(Self::Css),
            "xpath" => Some(Self::XPath),
            "label" => Some(Self::Label),
            "placeholder" => Some(Self::Placeholder),
            _ => None,
        }
    }
}

/// A single way of resolving an element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Strategy {
    pub kind: StrategyKind,
    pub pattern: String,
}

impl Strategy {
    #[must_use]
    pub fn new(kind: StrategyKind, pattern: impl Into<String>) -> Self {
        Self {
            kind,
            pattern: pattern.into(),
        }
    }

    #[must_use]
    pub fn css(pattern: impl Into<String>) -> Self {
        Self::new(StrategyKind::Css, pattern)
    }

    #[must_use]
    pub fn xpath(pattern: impl Into<String>) -> Self {
        Self::new(StrategyKind::XPath, pattern)
    }

    #[must_use]
    pub fn label(pattern: impl Into<String>) -> Self {
        Self::new(StrategyKind::Label, pattern)
    }

    #[must_use]
    pub fn placeholder(pattern: impl Into<String>) -> Self {
        Self::new(StrategyKind::Placeholder, pattern)
    }

    /// Canonical selector string stored in the learned cache.
    #[must_use]
    pub fn selector(&self) -> String {
        format!("{}={}", self.kind.prefix(), self.pattern)
    }

    /// Parse a selector string back into a strategy.
    ///
    /// Prefixed strings use their prefix. Unprefixed strings starting with
    /// `//` or `(` are XPath; anything else is treated as CSS.
    ///
    /// # Example
    ///
    /// ```rust
    /// use diary_pilot::locator::{Strategy, StrategyKind};
    ///
    /// let s = Strategy::parse("label=Email");
    /// assert_eq!(s.kind, StrategyKind::Label);
    /// assert_eq!(Strategy::parse("//textarea").kind, StrategyKind::XPath);
    /// assert_eq!(Strategy::parse("input#email").kind, StrategyKind::Css);
    /// ```
    #[must_use]
    pub fn parse(selector: &str) -> Self {
        if let Some((prefix, rest)) = selector.split_once('=') {
            if let Some(kind) = StrategyKind::from_prefix(prefix) {
                return Self::new(kind, rest);
            }
        }
        if selector.starts_with("//") || selector.starts_with("(//") {
            Self::xpath(selector)
        } else {
            Self::css(selector)
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.selector())
    }
}
