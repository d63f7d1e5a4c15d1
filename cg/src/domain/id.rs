//! Course ID generation
//!
//! IDs use the format: `{12-char-hex}-course-{slug}`
//! Example: `0192f3a4b5c6-course-intro-to-rust`

use serde::{Deserialize, Serialize};

/// Generate a course ID from its name
pub fn generate_course_id(name: &str) -> CourseId {
    let uuid = uuid::Uuid::now_v7();
    let hex = uuid.simple().to_string();
    let slug = slugify(name);
    if slug.is_empty() {
        CourseId(format!("{}-course", &hex[..12]))
    } else {
        CourseId(format!("{}-course-{}", &hex[..12], slug))
    }
}

/// Slugify a title for use in IDs
///
/// Keeps alphanumerics (including non-ASCII letters), drops apostrophes and
/// collapses everything else into single hyphens.
pub fn slugify(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .filter_map(|c| {
            if c.is_alphanumeric() {
                Some(c)
            } else if c == '\'' || c == '\u{2019}' || c == '\u{2018}' {
                None
            } else {
                Some('-')
            }
        })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .take(8)
        .collect::<Vec<_>>()
        .join("-")
}

/// Stored course identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CourseId(String);

impl CourseId {
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Does `query` identify this course by full id or unique prefix?
    pub fn matches(&self, query: &str) -> bool {
        !query.is_empty() && (self.0 == query || self.0.starts_with(query))
    }
}

impl std::fmt::Display for CourseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
