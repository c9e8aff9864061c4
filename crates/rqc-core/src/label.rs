use serde::{Deserialize, Serialize};

/// Canonical form of a layer or check label: whitespace removed, lower-cased.
///
/// Every name comparison in the workflow goes through this type, so
/// `" Rebar  Binding"` and `"rebarbinding"` resolve to the same key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelKey(String);

impl LabelKey {
    pub fn new(label: &str) -> Self {
        Self(
            label
                .chars()
                .filter(|c| !c.is_whitespace())
                .flat_map(char::to_lowercase)
                .collect(),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for LabelKey {
    fn from(s: &str) -> Self {
        LabelKey::new(s)
    }
}

impl std::fmt::Display for LabelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trims a caller-supplied label and collapses inner whitespace runs.
pub fn tidy_label(label: &str) -> String {
    label.split_whitespace().collect::<Vec<_>>().join(" ")
}
