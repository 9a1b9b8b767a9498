//! Text normalization applied before hashing text blobs and before comparing
//! old and new text content.

/// Normalize text: strip `\r` and, if the result is non-empty and does not
/// end in `\n`, append one. Idempotent.
pub fn sanitize_text(text: &str) -> String {
    let mut out: String = text.chars().filter(|c| *c != '\r').collect();
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use quickcheck::quickcheck;

    use super::sanitize_text;

    #[test]
    fn strips_carriage_returns() {
        assert_eq!(sanitize_text("a\r\nb\r\n"), "a\nb\n");
    }

    #[test]
    fn appends_trailing_newline() {
        assert_eq!(sanitize_text("hello"), "hello\n");
        assert_eq!(sanitize_text("hello\n"), "hello\n");
    }

    #[test]
    fn empty_stays_empty() {
        assert_eq!(sanitize_text(""), "");
    }

    quickcheck! {
        /// sanitize(sanitize(t)) == sanitize(t) for arbitrary input.
        fn idempotent(text: String) -> bool {
            let once = sanitize_text(&text);
            sanitize_text(&once) == once
        }

        /// Sanitized non-empty text always ends with a newline and holds no CR.
        fn normal_form(text: String) -> bool {
            let s = sanitize_text(&text);
            s.is_empty() || (s.ends_with('\n') && !s.contains('\r'))
        }
    }
}
