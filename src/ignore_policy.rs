use regex::Regex;

/// Ordered list of patterns identifying images that must never be rewritten.
///
/// Patterns are unanchored: they match anywhere in the raw image string.
#[derive(Debug, Clone, Default)]
pub struct IgnorePolicy {
    patterns: Vec<Regex>,
}

impl IgnorePolicy {
    pub fn new<I, S>(patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|pattern| Regex::new(pattern.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Returns the first pattern, in configured order, found in `image`.
    pub fn matches(&self, image: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|pattern| pattern.is_match(image))
            .map(Regex::as_str)
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
