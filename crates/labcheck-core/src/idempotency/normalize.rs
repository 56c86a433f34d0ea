//! Normalization of raw probe output before comparison.

use std::collections::BTreeSet;

use regex::Regex;

/// Placeholder substituted for every volatile-pattern match.
pub const VOLATILE: &str = "<volatile>";

/// Default volatile patterns: timestamps, UUIDs, and device config banners.
pub fn default_volatile_patterns() -> Vec<String> {
    vec![
        r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?".to_string(),
        r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b".to_string(),
        r"^! (?:Last configuration change|NVRAM config last updated) at .*".to_string(),
        r"^## Last commit: .*".to_string(),
    ]
}

/// Turns probe output into an order-independent set of lines.
#[derive(Debug, Clone)]
pub struct Normalizer {
    patterns: Vec<Regex>,
}

impl Normalizer {
    pub fn new(patterns: &[String]) -> Result<Self, regex::Error> {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Trim each line, mask volatile fields, drop blanks, dedupe and sort.
    pub fn normalize(&self, raw: &str) -> BTreeSet<String> {
        raw.lines()
            .map(|line| self.mask(line.trim()))
            .filter(|line| !line.is_empty())
            .collect()
    }

    fn mask(&self, line: &str) -> String {
        let mut line = line.to_string();
        for pattern in &self.patterns {
            if pattern.is_match(&line) {
                line = pattern.replace_all(&line, VOLATILE).into_owned();
            }
        }
        line
    }
}
