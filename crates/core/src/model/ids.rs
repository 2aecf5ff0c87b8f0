use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Error type for parsing an identifier from a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    kind: &'static str,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {} from string", self.kind)
    }
}

impl std::error::Error for ParseIdError {}

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            #[must_use]
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            /// Returns the underlying u64 value
            #[must_use]
            pub const fn value(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim()
                    .parse::<u64>()
                    .map(Self::new)
                    .map_err(|_| ParseIdError {
                        kind: stringify!($name),
                    })
            }
        }
    };
}

numeric_id!(
    /// Unique identifier for a learner.
    UserId
);
numeric_id!(
    /// Unique identifier for a formation (course).
    FormationId
);
numeric_id!(
    /// Unique identifier for a chapter within a formation.
    ChapterId
);
numeric_id!(
    /// Unique identifier for a lesson.
    LessonId
);

/// Human readable, URL-safe formation key (`intro-to-rust`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FormationSlug(String);

impl FormationSlug {
    /// Validate and wrap a slug.
    ///
    /// Slugs are non-empty, lowercase ASCII alphanumerics separated by single
    /// dashes.
    ///
    /// # Errors
    ///
    /// Returns `ParseIdError` when the slug is empty or contains other characters.
    pub fn parse(raw: impl AsRef<str>) -> Result<Self, ParseIdError> {
        let raw = raw.as_ref().trim();
        let valid = !raw.is_empty()
            && !raw.starts_with('-')
            && !raw.ends_with('-')
            && !raw.contains("--")
            && raw
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        if !valid {
            return Err(ParseIdError {
                kind: "FormationSlug",
            });
        }
        Ok(Self(raw.to_owned()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FormationSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for FormationSlug {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for FormationSlug {
    type Error = ParseIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<FormationSlug> for String {
    fn from(slug: FormationSlug) -> Self {
        slug.0
    }
}

/// Identifies one lesson-viewing session, used to correlate log lines.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ViewingSessionId(Uuid);

impl ViewingSessionId {
    #[must_use]
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Debug for ViewingSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ViewingSessionId({})", self.0)
    }
}

impl fmt::Display for ViewingSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lesson_id_display_and_parse() {
        let id = LessonId::new(42);
        assert_eq!(id.to_string(), "42");
        assert_eq!(" 42 ".parse::<LessonId>().unwrap(), id);
        assert_eq!(format!("{id:?}"), "LessonId(42)");
    }

    #[test]
    fn invalid_numeric_id_is_rejected() {
        let err = "abc".parse::<UserId>().unwrap_err();
        assert_eq!(err.to_string(), "failed to parse UserId from string");
    }

    #[test]
    fn ids_serialize_as_plain_numbers() {
        let json = serde_json::to_string(&ChapterId::new(7)).unwrap();
        assert_eq!(json, "7");
    }

    #[test]
    fn slug_accepts_kebab_case() {
        let slug = FormationSlug::parse("rust-101").unwrap();
        assert_eq!(slug.as_str(), "rust-101");
    }

    #[test]
    fn slug_rejects_bad_shapes() {
        for raw in ["", "Rust", "rust_101", "-rust", "rust-", "a--b", "a b"] {
            assert!(FormationSlug::parse(raw).is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn slug_deserialization_validates() {
        let ok: FormationSlug = serde_json::from_str("\"web-basics\"").unwrap();
        assert_eq!(ok.as_str(), "web-basics");
        assert!(serde_json::from_str::<FormationSlug>("\"Web Basics\"").is_err());
    }
}
