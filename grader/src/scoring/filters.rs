//! Output post-filters applied to both outputs before scoring

use serde::{Deserialize, Serialize};

use crate::text::strip_ansi;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostFilter {
    /// Trim leading and trailing whitespace from the whole output
    Trim,
    /// Collapse every whitespace run to one space
    CollapseWhitespace,
    /// Sort lines, for programs whose output order is unspecified
    SortLines,
    Lowercase,
    StripAnsi,
}

impl PostFilter {
    pub fn apply(&self, text: &str) -> String {
        match self {
            PostFilter::Trim => text.trim().to_string(),
            PostFilter::CollapseWhitespace => text.split_whitespace().collect::<Vec<_>>().join(" "),
            PostFilter::SortLines => {
                let mut lines: Vec<&str> = text.lines().collect();
                lines.sort_unstable();
                lines.join("\n")
            }
            PostFilter::Lowercase => text.to_lowercase(),
            PostFilter::StripAnsi => strip_ansi(text),
        }
    }
}

/// Apply an optional filter; empty output passes through untouched
pub fn apply_filter(filter: Option<PostFilter>, text: &str) -> String {
    match filter {
        Some(f) if !text.is_empty() => f.apply(text),
        _ => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filters() {
        assert_eq!(PostFilter::Trim.apply("  x \n"), "x");
        assert_eq!(PostFilter::CollapseWhitespace.apply("a \n\t b"), "a b");
        assert_eq!(PostFilter::SortLines.apply("c\na\nb"), "a\nb\nc");
        assert_eq!(PostFilter::Lowercase.apply("HeLLo"), "hello");
        assert_eq!(PostFilter::StripAnsi.apply("\x1b[1mbold\x1b[0m"), "bold");
        assert_eq!(apply_filter(None, "As Is"), "As Is");
        assert_eq!(apply_filter(Some(PostFilter::Trim), ""), "");
    }

    #[test]
    fn test_filter_names_deserialize() {
        let f: PostFilter = serde_json::from_str("\"sort_lines\"").unwrap();
        assert_eq!(f, PostFilter::SortLines);
    }
}
