use std::collections::HashSet;

use super::QueryResult;

/// Decides whether a query result must be hidden behind the censored placeholder
#[derive(Debug, Clone, Default)]
pub struct ContentFilter {
    restrictive: bool,
    blacklist: HashSet<String>,
    whitelist: HashSet<String>,
}

impl ContentFilter {
    pub fn new<I, S>(restrictive: bool, blacklist: I, whitelist: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let normalize = |tags: I| {
            tags.into_iter()
                .map(|tag| tag.as_ref().trim().to_lowercase())
                .filter(|tag| !tag.is_empty())
                .collect::<HashSet<_>>()
        };

        Self {
            restrictive,
            blacklist: normalize(blacklist),
            whitelist: normalize(whitelist),
        }
    }

    pub fn permissive() -> Self {
        Self::default()
    }

    pub fn is_restrictive(&self) -> bool {
        self.restrictive
    }

    /// In restrictive mode, anything rated above safe or carrying a
    /// blacklisted tag is censored. A whitelisted tag is removed from the
    /// blacklist.
    pub fn is_censored(&self, result: &QueryResult) -> bool {
        if !self.restrictive {
            return false;
        }

        if result.rating().is_some_and(|rating| !rating.is_safe()) {
            return true;
        }

        result
            .tags()
            .iter()
            .map(|tag| tag.to_lowercase())
            .any(|tag| self.blacklist.contains(&tag) && !self.whitelist.contains(&tag))
    }
}
