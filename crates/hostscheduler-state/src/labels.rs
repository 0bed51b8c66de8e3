//! Label key layout for hibernation records.
//!
//! A record is spread over plain resource labels so it survives restarts
//! and shows up in the provider's own tooling:
//!
//! ```text
//! {prefix}-at             = 1760000000      unix seconds
//! {prefix}-pool-00-default = 3              one per pool, NN = listing order
//! {prefix}-pool-01-gpu     = 1
//! ```
//!
//! Keys and values only use lowercase letters, digits, `-` and `_`, and
//! stay within 63 characters.

/// Default label prefix.
pub const DEFAULT_PREFIX: &str = "hibernated";

/// Maximum label key/value length.
pub const MAX_LABEL_LEN: usize = 63;

/// Whether `s` is a valid label key or value fragment.
pub fn is_label_safe(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_LABEL_LEN
        && s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

/// Key layout for one prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelKeys {
    timestamp: String,
    pool_prefix: String,
}

impl LabelKeys {
    pub fn new(prefix: &str) -> Self {
        Self {
            timestamp: format!("{prefix}-at"),
            pool_prefix: format!("{prefix}-pool-"),
        }
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// Key for the pool at position `index`. `None` if the result would
    /// not be a valid label key.
    pub fn pool(&self, index: usize, pool_name: &str) -> Option<String> {
        let key = format!("{}{index:02}-{pool_name}", self.pool_prefix);
        is_label_safe(&key).then_some(key)
    }

    /// Whether `key` belongs to a record under this prefix.
    pub fn owns(&self, key: &str) -> bool {
        key == self.timestamp || key.starts_with(&self.pool_prefix)
    }

    /// Split a pool key into `(index, pool_name)`.
    pub fn parse_pool(&self, key: &str) -> Option<(usize, String)> {
        let rest = key.strip_prefix(&self.pool_prefix)?;
        let (index, name) = rest.split_once('-')?;
        let index = index.parse::<usize>().ok()?;
        if name.is_empty() {
            return None;
        }
        Some((index, name.to_string()))
    }
}

impl Default for LabelKeys {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}
