// src/results.rs

//! Per-package operation results

use crate::version::PackageVersion;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum MessageSeverity {
    Error,
    Warn,
    Inconclusive,
    Note,
}

impl fmt::Display for MessageSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MessageSeverity::Error => "ERROR",
            MessageSeverity::Warn => "WARN",
            MessageSeverity::Inconclusive => "INCONCLUSIVE",
            MessageSeverity::Note => "NOTE",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultMessage {
    pub severity: MessageSeverity,
    pub text: String,
}

/// Outcome for one package of an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageResult {
    pub id: String,
    pub version: Option<PackageVersion>,
    pub install_location: Option<PathBuf>,
    pub messages: Vec<ResultMessage>,
}

impl PackageResult {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: None,
            install_location: None,
            messages: Vec::new(),
        }
    }

    pub fn success(&self) -> bool {
        !self
            .messages
            .iter()
            .any(|m| m.severity == MessageSeverity::Error)
    }

    pub fn push(&mut self, severity: MessageSeverity, text: impl Into<String>) {
        self.messages.push(ResultMessage {
            severity,
            text: text.into(),
        });
    }

    pub fn error(&mut self, text: impl Into<String>) {
        self.push(MessageSeverity::Error, text);
    }

    pub fn warn(&mut self, text: impl Into<String>) {
        self.push(MessageSeverity::Warn, text);
    }

    pub fn note(&mut self, text: impl Into<String>) {
        self.push(MessageSeverity::Note, text);
    }

    pub fn inconclusive(&mut self, text: impl Into<String>) {
        self.push(MessageSeverity::Inconclusive, text);
    }

    /// Messages ordered by severity, most severe first
    pub fn grouped_messages(&self) -> Vec<&ResultMessage> {
        let mut messages: Vec<&ResultMessage> = self.messages.iter().collect();
        messages.sort_by_key(|m| m.severity);
        messages
    }

    pub fn has_warnings(&self) -> bool {
        self.messages
            .iter()
            .any(|m| m.severity == MessageSeverity::Warn)
    }
}

/// Results of one operation keyed by package id, iterated in id order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OperationResults {
    results: BTreeMap<String, PackageResult>,
}

impl OperationResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a result, replacing an earlier one for the same id
    pub fn insert(&mut self, result: PackageResult) {
        self.results.insert(result.id.to_ascii_lowercase(), result);
    }

    pub fn get(&self, id: &str) -> Option<&PackageResult> {
        self.results.get(&id.to_ascii_lowercase())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PackageResult> {
        self.results.values()
    }

    pub fn succeeded(&self) -> usize {
        self.iter().filter(|r| r.success()).count()
    }

    pub fn failed(&self) -> usize {
        self.len() - self.succeeded()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_depends_on_error_messages() {
        let mut result = PackageResult::new("git");
        result.warn("pinned");
        result.note("nothing to do");
        assert!(result.success());
        result.error("boom");
        assert!(!result.success());
        assert_eq!(result.grouped_messages()[0].severity, MessageSeverity::Error);
    }

    #[test]
    fn test_results_sorted_by_id() {
        let mut results = OperationResults::new();
        for id in ["zeta", "Alpha", "mid"] {
            results.insert(PackageResult::new(id));
        }
        let mut failed = PackageResult::new("bad");
        failed.error("not found");
        results.insert(failed);

        let ids: Vec<_> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["Alpha", "bad", "mid", "zeta"]);
        assert_eq!(results.len(), 4);
        assert_eq!(results.failed(), 1);
        assert!(results.contains("ALPHA"));
        assert!(!results.all_succeeded());
    }
}
