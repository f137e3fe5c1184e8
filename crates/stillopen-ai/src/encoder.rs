//! Category frequency scores and integer labels, fitted on the training set.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Reserved label for categories outside the retained set.
pub const OTHER: &str = "other";

/// Category → frequency score and integer label.
///
/// Fitted once per training run and stored in the artifact. Both maps are
/// ordered so the serialized form is stable across runs on the same input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryEncoder {
    pub frequency_map: BTreeMap<String, f64>,
    pub label_map: BTreeMap<String, u32>,
}

impl CategoryEncoder {
    /// Fit over every category of the training set.
    ///
    /// The `top_k` most frequent categories (ties broken lexically) are
    /// retained together with [`OTHER`]; labels are positions in the lexical
    /// order of that set.
    pub fn fit<I, S>(categories: I, top_k: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut total = 0usize;
        for cat in categories {
            *counts.entry(cat.as_ref().to_string()).or_default() += 1;
            total += 1;
        }

        let frequency_map = counts
            .iter()
            .map(|(cat, n)| (cat.clone(), *n as f64 / total as f64))
            .collect();

        let mut ranked: Vec<(&String, &usize)> = counts.iter().collect();
        // BTreeMap iteration is already lexical; a stable sort keeps that
        // order within equal counts.
        ranked.sort_by(|a, b| b.1.cmp(a.1));

        let mut retained: BTreeSet<&str> = ranked
            .into_iter()
            .take(top_k)
            .map(|(cat, _)| cat.as_str())
            .collect();
        retained.insert(OTHER);

        let label_map = retained
            .into_iter()
            .enumerate()
            .map(|(i, cat)| (cat.to_string(), i as u32))
            .collect();

        Self { frequency_map, label_map }
    }

    /// Relative frequency seen at fit time, 0 for unseen categories.
    pub fn frequency(&self, category: &str) -> f64 {
        self.frequency_map.get(category).copied().unwrap_or(0.0)
    }

    pub fn label(&self, category: &str) -> u32 {
        self.label_map
            .get(category)
            .copied()
            .unwrap_or_else(|| self.other_label())
    }

    pub fn other_label(&self) -> u32 {
        self.label_map.get(OTHER).copied().unwrap_or(0)
    }

    /// Number of retained categories, `"other"` included.
    pub fn num_labels(&self) -> usize {
        self.label_map.len()
    }
}
