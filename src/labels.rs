//! Emotion label mapping between names and model output indices.

use std::collections::BTreeMap;

use crate::error::ConfigError;

/// Bidirectional mapping between emotion names and class indices.
///
/// The reverse mapping is derived once on construction and never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
    text2num: BTreeMap<String, usize>,
    num2text: BTreeMap<usize, String>,
}

impl LabelMap {
    /// Build the mapping and its inverse.
    ///
    /// Fails if the mapping is empty or if two names share an index, since
    /// the inverse could not represent both.
    pub fn new(text2num: BTreeMap<String, usize>) -> Result<Self, ConfigError> {
        if text2num.is_empty() {
            return Err(ConfigError::EmptyLabels);
        }

        let mut num2text = BTreeMap::new();
        for (name, &index) in &text2num {
            if let Some(existing) = num2text.insert(index, name.clone()) {
                return Err(ConfigError::DuplicateLabelIndex {
                    index,
                    first: existing,
                    second: name.clone(),
                });
            }
        }

        Ok(Self { text2num, num2text })
    }

    pub fn len(&self) -> usize {
        self.text2num.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text2num.is_empty()
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.text2num.get(label).copied()
    }

    pub fn label_of(&self, index: usize) -> Option<&str> {
        self.num2text.get(&index).map(String::as_str)
    }

    pub fn text2num(&self) -> &BTreeMap<String, usize> {
        &self.text2num
    }

    pub fn num2text(&self) -> &BTreeMap<usize, String> {
        &self.num2text
    }

    /// Label with the highest probability, if any index has a name.
    pub fn argmax<'a>(&'a self, probs: &[f32]) -> Option<(&'a str, f32)> {
        self.ranked(probs).into_iter().next()
    }

    /// All named classes paired with their probability, highest first.
    /// Indices without a label are skipped.
    pub fn ranked<'a>(&'a self, probs: &[f32]) -> Vec<(&'a str, f32)> {
        let mut scored: Vec<(&str, f32)> = probs
            .iter()
            .enumerate()
            .filter_map(|(i, &p)| self.label_of(i).map(|label| (label, p)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(pairs: &[(&str, usize)]) -> BTreeMap<String, usize> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_reverse_mapping() {
        let labels = LabelMap::new(mapping(&[("happy", 0), ("sad", 1)])).unwrap();

        assert_eq!(labels.label_of(0), Some("happy"));
        assert_eq!(labels.label_of(1), Some("sad"));
        assert_eq!(labels.text2num().len(), labels.num2text().len());
        assert_eq!(labels.index_of("sad"), Some(1));
        assert_eq!(labels.label_of(2), None);
    }

    #[test]
    fn test_duplicate_index_rejected() {
        let err = LabelMap::new(mapping(&[("happy", 0), ("joyful", 0)])).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateLabelIndex { index: 0, .. }));
    }

    #[test]
    fn test_empty_rejected() {
        assert!(matches!(
            LabelMap::new(BTreeMap::new()),
            Err(ConfigError::EmptyLabels)
        ));
    }

    #[test]
    fn test_ranked_and_argmax() {
        let labels = LabelMap::new(mapping(&[("angry", 0), ("happy", 1), ("sad", 2)])).unwrap();
        let probs = [0.2, 0.7, 0.1];

        let ranked = labels.ranked(&probs);
        assert_eq!(ranked[0].0, "happy");
        assert_eq!(ranked[2].0, "sad");

        let (label, p) = labels.argmax(&probs).unwrap();
        assert_eq!(label, "happy");
        assert!((p - 0.7).abs() < 1e-6);
    }
}
