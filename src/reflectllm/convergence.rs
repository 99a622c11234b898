//! Convergence detection for critic feedback.
//!
//! The check is a heuristic: a case-insensitive substring match of marker phrases
//! against the feedback text. Phrasings that mean "done" without using a marker
//! are missed, and a marker that appears quoted or negated still fires.
//!
//! ```
//! use reflectllm::convergence::ConvergenceDetector;
//!
//! let detector = ConvergenceDetector::default();
//! assert!(detector.is_converged(Some("No Significant Improvements Needed.")));
//! assert!(!detector.is_converged(Some("IMPROVEMENTS NEEDED: cite sources")));
//! assert!(!detector.is_converged(None));
//! ```

use serde::{Deserialize, Serialize};

/// The phrase the default critic instruction is expected to use when satisfied.
pub const DEFAULT_CONVERGENCE_MARKER: &str = "no significant improvements needed";

/// Every phrase recognised by [`ConvergenceDetector::with_all_markers`].
pub const EXTENDED_CONVERGENCE_MARKERS: [&str; 5] = [
    DEFAULT_CONVERGENCE_MARKER,
    "response is comprehensive and accurate",
    "quality is satisfactory",
    "meets all requirements",
    "excellent response",
];

/// A marker phrase and whether it currently participates in detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvergenceMarker {
    pub phrase: String,
    pub enabled: bool,
}

impl ConvergenceMarker {
    pub fn new(phrase: impl Into<String>) -> Self {
        Self {
            phrase: phrase.into(),
            enabled: true,
        }
    }

    pub fn disabled(phrase: impl Into<String>) -> Self {
        Self {
            phrase: phrase.into(),
            enabled: false,
        }
    }

    /// Markers in this list are tested in order; empty phrases never match.
    pub fn defaults() -> Vec<ConvergenceMarker> {
        vec![ConvergenceMarker::new(DEFAULT_CONVERGENCE_MARKER)]
    }
}

/// Decides whether critic feedback signals that no further refinement is needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvergenceDetector {
    markers: Vec<ConvergenceMarker>,
}

impl Default for ConvergenceDetector {
    fn default() -> Self {
        Self::new(ConvergenceMarker::defaults())
    }
}

impl ConvergenceDetector {
    pub fn new(markers: Vec<ConvergenceMarker>) -> Self {
        Self { markers }
    }

    /// Detector with all of [`EXTENDED_CONVERGENCE_MARKERS`] enabled.
    pub fn with_all_markers() -> Self {
        Self::new(
            EXTENDED_CONVERGENCE_MARKERS
                .iter()
                .map(|phrase| ConvergenceMarker::new(*phrase))
                .collect(),
        )
    }

    pub fn markers(&self) -> &[ConvergenceMarker] {
        &self.markers
    }

    /// Toggle a marker by phrase (case-insensitive), appending it when unknown.
    pub fn set_enabled(&mut self, phrase: &str, enabled: bool) {
        let wanted = phrase.to_lowercase();
        match self
            .markers
            .iter_mut()
            .find(|marker| marker.phrase.to_lowercase() == wanted)
        {
            Some(marker) => marker.enabled = enabled,
            None => self.markers.push(ConvergenceMarker {
                phrase: phrase.to_string(),
                enabled,
            }),
        }
    }

    /// The first enabled marker found in `feedback`, if any.
    pub fn matched_marker(&self, feedback: &str) -> Option<&str> {
        let haystack = feedback.to_lowercase();
        self.markers
            .iter()
            .filter(|marker| marker.enabled && !marker.phrase.is_empty())
            .find(|marker| haystack.contains(&marker.phrase.to_lowercase()))
            .map(|marker| marker.phrase.as_str())
    }

    pub fn is_converged(&self, feedback: Option<&str>) -> bool {
        feedback.map_or(false, |text| self.matched_marker(text).is_some())
    }
}
