//! Database configuration.

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the database if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to fsync every journal append and snapshot rewrite.
    pub sync_writes: bool,

    /// Result bound for `text_search` and `search` when the caller passes
    /// a limit of zero or less.
    pub default_search_limit: usize,

    /// Result bound for `list_objects` when the caller passes a limit of
    /// zero or less.
    pub default_list_limit: usize,

    /// Maximum number of documents accepted by one `insert_many`.
    pub max_batch_size: usize,

    /// Journal records after which a collection is compacted automatically
    /// (0 = only on request).
    pub compact_after: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_writes: true,
            default_search_limit: 10,
            default_list_limit: 1000,
            max_batch_size: 10_000,
            compact_after: 4096,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the database if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether writes are synced to disk before returning.
    #[must_use]
    pub const fn sync_writes(mut self, value: bool) -> Self {
        self.sync_writes = value;
        self
    }

    /// Sets the default search bound.
    #[must_use]
    pub const fn default_search_limit(mut self, limit: usize) -> Self {
        self.default_search_limit = limit;
        self
    }

    /// Sets the default object listing bound.
    #[must_use]
    pub const fn default_list_limit(mut self, limit: usize) -> Self {
        self.default_list_limit = limit;
        self
    }

    /// Sets the maximum `insert_many` batch.
    #[must_use]
    pub const fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Sets the automatic compaction threshold.
    #[must_use]
    pub const fn compact_after(mut self, records: usize) -> Self {
        self.compact_after = records;
        self
    }

    /// Resolves a caller-supplied search limit.
    pub(crate) fn search_limit(&self, requested: i64) -> usize {
        resolve_limit(requested, self.default_search_limit)
    }

    /// Resolves a caller-supplied listing limit.
    pub(crate) fn list_limit(&self, requested: i64) -> usize {
        resolve_limit(requested, self.default_list_limit)
    }
}

fn resolve_limit(requested: i64, default: usize) -> usize {
    if requested <= 0 {
        default
    } else {
        usize::try_from(requested).unwrap_or(usize::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.create_if_missing);
        assert!(config.sync_writes);
        assert_eq!(config.default_search_limit, 10);
        assert_eq!(config.default_list_limit, 1000);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .create_if_missing(false)
            .sync_writes(false)
            .compact_after(8);

        assert!(!config.create_if_missing);
        assert!(!config.sync_writes);
        assert_eq!(config.compact_after, 8);
    }

    #[test]
    fn non_positive_limits_use_defaults() {
        let config = Config::default();
        assert_eq!(config.search_limit(0), 10);
        assert_eq!(config.search_limit(-5), 10);
        assert_eq!(config.search_limit(3), 3);
        assert_eq!(config.list_limit(0), 1000);
    }
}
