//! Acquisition classification from textual scan titles.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Semantic role of an acquired 3-D array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Classification {
    Dark,
    Flat,
    Projection,
}

impl Classification {
    /// All classifications in keyword priority order.
    pub const ALL: [Self; 3] = [Self::Dark, Self::Flat, Self::Projection];

    /// Keyword searched for in lower-cased titles.
    #[must_use]
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Dark => "dark",
            Self::Flat => "flat",
            Self::Projection => "projections",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Every keyword found in a label, in keyword order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelMatches(Vec<Classification>);

impl LabelMatches {
    /// First match in keyword order; this is the classification that is acted on.
    #[must_use]
    pub fn first(&self) -> Option<Classification> {
        self.0.first().copied()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true when more than one keyword matched.
    #[must_use]
    pub fn is_ambiguous(&self) -> bool {
        self.0.len() > 1
    }

    pub fn iter(&self) -> impl Iterator<Item = Classification> + '_ {
        self.0.iter().copied()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Classification] {
        &self.0
    }
}

impl fmt::Display for LabelMatches {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, class) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(class.keyword())?;
        }
        Ok(())
    }
}

/// Finds every classification keyword occurring in `label`, ignoring ASCII case.
///
/// Labels are matched as raw bytes so titles with non-UTF-8 content still classify.
#[must_use]
pub fn classify_label(label: &[u8]) -> LabelMatches {
    let lowered = label.to_ascii_lowercase();
    LabelMatches(
        Classification::ALL
            .into_iter()
            .filter(|class| contains(&lowered, class.keyword().as_bytes()))
            .collect(),
    )
}

/// Classification acted on for `label`: the first keyword match, if any.
#[must_use]
pub fn classify(label: &[u8]) -> Option<Classification> {
    classify_label(label).first()
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}
