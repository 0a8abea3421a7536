//! Text handling for `input text`. The device shell splits on spaces and treats
//! several ASCII symbols as operators, so they are escaped or percent-encoded.

/// Escapes text for `input text "<escaped>"`. Backslashes go first so later
/// escapes are not doubled.
pub fn escape_for_shell_input(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '$' => out.push_str("\\$"),
            '`' => out.push_str("\\`"),
            ' ' => out.push_str("%s"),
            '&' => out.push_str("%26"),
            '<' => out.push_str("%3c"),
            '>' => out.push_str("%3e"),
            '|' => out.push_str("%7c"),
            ';' => out.push_str("%3b"),
            other => out.push(other),
        }
    }
    out
}

/// Returns true if the text contains CJK (Chinese/Japanese/Korean) characters.
/// `input text` cannot type these on most devices.
pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(|c| {
        ('\u{4e00}'..='\u{9fff}').contains(&c)
            || ('\u{3040}'..='\u{309f}').contains(&c)
            || ('\u{30a0}'..='\u{30ff}').contains(&c)
            || ('\u{ac00}'..='\u{d7af}').contains(&c)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_shell_operators() {
        assert_eq!(escape_for_shell_input("hello world"), "hello%sworld");
        assert_eq!(escape_for_shell_input("a&b<c>d|e;f"), "a%26b%3cc%3ed%7ce%3bf");
        assert_eq!(escape_for_shell_input(r#"say "hi""#), r#"say%s\"hi\""#);
        assert_eq!(escape_for_shell_input(r"C:\tmp"), r"C:\\tmp");
    }

    #[test]
    fn substitutions_stay_literal_inside_double_quotes() {
        assert_eq!(escape_for_shell_input("a$(id)"), r"a\$(id)");
        assert_eq!(escape_for_shell_input("`reboot`"), r"\`reboot\`");
        assert_eq!(escape_for_shell_input("$HOME"), r"\$HOME");
    }

    #[test]
    fn detects_cjk() {
        assert!(contains_cjk("打开设置"));
        assert!(contains_cjk("カメラ"));
        assert!(!contains_cjk("open settings"));
    }
}
