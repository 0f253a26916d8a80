//! Secret-pattern redaction for anything recorded into a learned
//! constraint pattern. Mirrors the shape of common credential formats
//! rather than trying to be exhaustive — the goal is to keep obvious
//! tokens out of `constraint.learned` events, not to be a secret
//! scanner.

use std::sync::OnceLock;

use regex::Regex;

fn patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r"sk-[A-Za-z0-9]{10,}").unwrap(),
            Regex::new(r"(?i)bearer\s+[A-Za-z0-9._-]{10,}").unwrap(),
            Regex::new(r"[A-Za-z0-9+/]{32,}={0,2}").unwrap(),
        ]
    })
}

pub fn redact(input: &str) -> String {
    let mut out = input.to_string();
    for pattern in patterns() {
        out = pattern.replace_all(&out, "REDACTED").into_owned();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_an_api_key_looking_token() {
        let redacted = redact("used key sk-abcdefghij1234567890 to call out");
        assert!(!redacted.contains("sk-abcdefghij1234567890"));
        assert!(redacted.contains("REDACTED"));
    }

    #[test]
    fn leaves_ordinary_text_untouched() {
        assert_eq!(redact("plain reason code"), "plain reason code");
    }
}
