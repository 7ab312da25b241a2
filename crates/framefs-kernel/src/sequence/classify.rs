//! Path → sequence classification.
//!
//! A path belongs to a sequence when it ends in `<digits>.<ext>`. The
//! sequence's key is everything before the digit run, so `clip0001.tga`,
//! `clip0002.tga` and `clip0003.TGA` all share the key `clip`.

use std::fmt;
use std::path::Path;

/// Extension of the frame files emitted by the capture pipeline.
pub const DEFAULT_EXTENSION: &str = "tga";

/// Identity of a numbered sequence: the common prefix of its frame paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey(String);

impl GroupKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GroupKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Decides whether a path is a frame of some sequence, and which one.
///
/// Stateless: the answer depends on the path and the configured extension
/// only. Matching is ASCII case-insensitive, anchored at the end of the
/// path, and needs at least one digit before the extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceClassifier {
    /// `.` + extension, e.g. `.tga`.
    suffix: String,
}

impl Default for SequenceClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_EXTENSION)
    }
}

impl SequenceClassifier {
    /// Build a classifier for `extension` (with or without the leading dot).
    pub fn new(extension: &str) -> Self {
        Self {
            suffix: format!(".{}", extension.trim_start_matches('.')),
        }
    }

    /// The extension this classifier matches, without the dot.
    pub fn extension(&self) -> &str {
        &self.suffix[1..]
    }

    /// Classify a path. `None` means "not a frame, pass it through".
    pub fn classify(&self, path: &Path) -> Option<GroupKey> {
        self.classify_str(&path.to_string_lossy())
    }

    /// Classify a path given as a string.
    pub fn classify_str(&self, path: &str) -> Option<GroupKey> {
        let bytes = path.as_bytes();
        let suffix = self.suffix.as_bytes();
        if bytes.len() <= suffix.len() {
            return None;
        }

        let ext_start = bytes.len() - suffix.len();
        if !bytes[ext_start..].eq_ignore_ascii_case(suffix) {
            return None;
        }

        let digits = bytes[..ext_start]
            .iter()
            .rev()
            .take_while(|b| b.is_ascii_digit())
            .count();
        if digits == 0 {
            return None;
        }

        // Digits are ASCII, so this is always a char boundary.
        Some(GroupKey::new(&path[..ext_start - digits]))
    }
}
