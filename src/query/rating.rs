use serde::{Deserialize, Serialize};
use std::fmt;

/// Content rating attached to a query result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MediaRating {
    #[default]
    Safe,
    Questionable,
    Explicit,
}

impl MediaRating {
    /// Lenient parse: `s`/`safe` and `q`/`questionable` are recognized,
    /// anything else is treated as explicit.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "s" | "safe" => Self::Safe,
            "q" | "questionable" => Self::Questionable,
            _ => Self::Explicit,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Self::Safe => 's',
            Self::Questionable => 'q',
            Self::Explicit => 'e',
        }
    }

    pub fn is_safe(self) -> bool {
        self == Self::Safe
    }
}

impl From<String> for MediaRating {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<MediaRating> for String {
    fn from(rating: MediaRating) -> Self {
        rating.as_char().to_string()
    }
}

impl fmt::Display for MediaRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_lenient() {
        assert_eq!(MediaRating::parse("s"), MediaRating::Safe);
        assert_eq!(MediaRating::parse("Safe"), MediaRating::Safe);
        assert_eq!(MediaRating::parse("q"), MediaRating::Questionable);
        assert_eq!(MediaRating::parse("e"), MediaRating::Explicit);
        assert_eq!(MediaRating::parse("whatever"), MediaRating::Explicit);
    }

    #[test]
    fn test_serde_as_single_char() {
        let json = serde_json::to_string(&MediaRating::Questionable).unwrap();
        assert_eq!(json, "\"q\"");
        let rating: MediaRating = serde_json::from_str("\"safe\"").unwrap();
        assert_eq!(rating, MediaRating::Safe);
    }
}
