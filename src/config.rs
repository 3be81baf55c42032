//! Immutable run configuration shared by every assembly component.

use serde::Deserialize;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Channel order must name at least one acquisition type")]
    EmptyChannelOrder,

    #[error("Channel '{0}' appears more than once in the channel order")]
    DuplicateChannel(String),

    #[error("Histogram bin count must be positive")]
    InvalidHistogramBins,

    #[error("Score threshold must be finite, got {0}")]
    InvalidThreshold(f32),
}

/// Acquisition-type label → keyword list, in document order.
///
/// Order matters: when two keywords of equal length match the same text, the
/// one from the earlier entry wins. Keywords are stored lower-cased and trimmed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeywordTable {
    entries: Vec<(String, Vec<String>)>,
}

impl KeywordTable {
    pub fn new<I, L, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (L, Vec<K>)>,
        L: Into<String>,
        K: AsRef<str>,
    {
        let mut table = Self::default();
        for (label, keywords) in entries {
            table.push(label.into(), keywords.iter().map(|keyword| keyword.as_ref()));
        }
        table
    }

    fn push<'k>(&mut self, label: String, keywords: impl Iterator<Item = &'k str>) {
        let keywords = keywords
            .map(|keyword| keyword.trim().to_lowercase())
            .filter(|keyword| !keyword.is_empty())
            .collect();
        match self.entries.iter_mut().find(|(existing, _)| *existing == label) {
            Some((_, existing)) => existing.extend(keywords),
            None => self.entries.push((label, keywords)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(label, keywords)| (label.as_str(), keywords.as_slice()))
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(label, _)| label.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'de> Deserialize<'de> for KeywordTable {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct TableVisitor;

        impl<'de> Visitor<'de> for TableVisitor {
            type Value = KeywordTable;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of acquisition type to keyword list")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut table = KeywordTable::default();
                while let Some((label, keywords)) = map.next_entry::<String, Vec<String>>()? {
                    if label.trim().is_empty() {
                        return Err(de::Error::custom("acquisition type label is empty"));
                    }
                    table.push(label, keywords.iter().map(String::as_str));
                }
                Ok(table)
            }
        }

        deserializer.deserialize_map(TableVisitor)
    }
}

/// Configuration of one assembly run.
///
/// Built once at startup and shared read-only across all series tasks.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AssemblyConfig {
    /// Keyword table used to classify series.
    pub modalities: KeywordTable,
    /// Output channel slots, in stacking order.
    pub channel_order: Vec<String>,
    /// Missing label → label whose volume fills its slot instead.
    pub imputation: HashMap<String, String>,
    /// Labels eligible as the reference volume, most preferred first.
    pub reference_preference: Vec<String>,
    /// Series worker pool size. `None` lets the pool pick one per core.
    pub workers: Option<usize>,
    /// Upper bound on series processing. `None` waits for every series.
    pub deadline_secs: Option<u64>,
    /// A voxel keeps its winning class only if the winning score is not below this.
    pub score_threshold: f32,
    /// Bin count of the per-channel histogram equalisation.
    pub histogram_bins: usize,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            modalities: KeywordTable::new([
                ("t1", vec!["t1", "t1w", "t1_", "mprage", "spgr", "t1 se", "t1_se"]),
                (
                    "t1c",
                    vec![
                        "t1c", "t1+c", "t1 +c", "t1_c", "t1 post", "t1_post", "post",
                        "contrast", "gad", "gd", "+c", "ce_t1", "t1ce",
                    ],
                ),
                ("t2", vec!["t2", "t2w", "t2_", "t2 tse", "t2_tse"]),
                ("flair", vec!["flair", "dark fluid", "dark_fluid", "tirm"]),
            ]),
            channel_order: ["t1", "t1c", "t2", "flair"].map(String::from).to_vec(),
            imputation: [("t1c", "t1"), ("flair", "t2"), ("t1", "t2"), ("t2", "t1")]
                .into_iter()
                .map(|(missing, substitute)| (missing.to_string(), substitute.to_string()))
                .collect(),
            reference_preference: ["t1c", "t1", "t2", "flair"].map(String::from).to_vec(),
            workers: None,
            deadline_secs: None,
            score_threshold: 0.0,
            histogram_bins: 256,
        }
    }
}

impl AssemblyConfig {
    /// Read and validate a JSON configuration file. Absent keys take defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_order.is_empty() {
            return Err(ConfigError::EmptyChannelOrder);
        }
        let mut seen = HashSet::new();
        for label in &self.channel_order {
            if !seen.insert(label.as_str()) {
                return Err(ConfigError::DuplicateChannel(label.clone()));
            }
        }
        if self.histogram_bins == 0 {
            return Err(ConfigError::InvalidHistogramBins);
        }
        if !self.score_threshold.is_finite() {
            return Err(ConfigError::InvalidThreshold(self.score_threshold));
        }
        Ok(())
    }

    pub fn channel_count(&self) -> usize {
        self.channel_order.len()
    }

    /// Label configured to stand in for `label` when it is absent.
    pub fn substitute_for(&self, label: &str) -> Option<&str> {
        self.imputation.get(label).map(String::as_str)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}
