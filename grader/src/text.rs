//! Text helpers shared by scrapers, scoring and reports

use lazy_regex::regex;

/// Keep the first `max_lines` lines and `max_len` bytes of `text`, marking
/// the cut with `...`
pub fn abbreviate(text: &str, max_lines: usize, max_len: usize) -> String {
    let line_count = text.split('\n').count();
    if text.len() <= max_len && line_count <= max_lines {
        return text.to_string();
    }
    let mut cut = if text.len() > max_len {
        &text[..floor_char_boundary(text, max_len)]
    } else {
        text
    };
    let mut result = String::new();
    if cut.split('\n').count() > max_lines {
        let kept: Vec<&str> = cut.split('\n').take(max_lines).collect();
        result = kept.join("\n");
        result.push('\n');
        cut = "";
    }
    result.push_str(cut);
    result.push_str("...");
    result
}

/// Abbreviation used in reports: 8 lines, 500 bytes
pub fn abbreviate_default(text: &str) -> String {
    abbreviate(text, 8, 500)
}

/// A short single line fits on one terminal row
pub fn is_single_line(text: &str) -> bool {
    let body = text.strip_suffix('\n').unwrap_or(text);
    !body.contains('\n') && text.len() <= 120
}

/// Remove ANSI color escapes
pub fn strip_ansi(text: &str) -> String {
    regex!(r"\x1b\[[0-9;]*[A-Za-z]").replace_all(text, "").into_owned()
}

/// Parse a number written with thousands separators, e.g. `1,024`
pub fn parse_with_commas(text: &str) -> Option<u64> {
    text.replace(',', "").trim().parse().ok()
}

/// Format a number with thousands separators
pub fn with_commas(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Lines of `text` containing a match for `pattern`
pub fn grep_lines<'a>(pattern: &regex::Regex, text: &'a str) -> Vec<&'a str> {
    text.lines().filter(|line| pattern.is_match(line)).collect()
}

/// Prefix multi-line text with a newline so it starts on its own line
pub fn block(text: &str) -> String {
    if is_single_line(text) {
        text.to_string()
    } else {
        format!("\n{}", text)
    }
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abbreviate_short_text_untouched() {
        assert_eq!(abbreviate("a\nb", 8, 500), "a\nb");
    }

    #[test]
    fn test_abbreviate_by_lines() {
        let text = (1..=20).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
        assert_eq!(abbreviate(&text, 3, 500), "1\n2\n3\n...");
    }

    #[test]
    fn test_abbreviate_by_length() {
        let text = "x".repeat(600);
        let short = abbreviate(&text, 8, 500);
        assert_eq!(short.len(), 503);
        assert!(short.ends_with("..."));
    }

    #[test]
    fn test_abbreviate_multibyte_boundary() {
        let text = "é".repeat(300);
        let short = abbreviate(&text, 8, 501);
        assert!(short.ends_with("..."));
    }

    #[test]
    fn test_commas() {
        assert_eq!(with_commas(1234567), "1,234,567");
        assert_eq!(with_commas(999), "999");
        assert_eq!(parse_with_commas("1,024"), Some(1024));
        assert_eq!(parse_with_commas("n/a"), None);
    }

    #[test]
    fn test_strip_ansi_and_single_line() {
        assert_eq!(strip_ansi("\x1b[01;31merror:\x1b[0m bad"), "error: bad");
        assert!(is_single_line("one line\n"));
        assert!(!is_single_line("two\nlines"));
        assert_eq!(block("a\nb"), "\na\nb");
    }
}
