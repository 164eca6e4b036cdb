//! Placeholder scanning over rendered SQL fragments.
//!
//! A `?` inside a quoted literal (`'what?'`) or quoted identifier
//! (`"col?"`) is text, not a bind position. Doubled quotes inside a quoted
//! run are escapes and do not end it.

/// Replace every bind `?` in `sql`, calling `replacement` with its zero-based
/// position. Quoted runs are copied unchanged.
pub(crate) fn rewrite(sql: &str, mut replacement: impl FnMut(usize) -> String) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut quote: Option<char> = None;
    let mut index = 0;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                out.push(c);
                if c == q {
                    if chars.peek() == Some(&q) {
                        // doubled quote escape
                        if let Some(escaped) = chars.next() {
                            out.push(escaped);
                        }
                    } else {
                        quote = None;
                    }
                }
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    out.push(c);
                }
                '?' => {
                    out.push_str(&replacement(index));
                    index += 1;
                }
                _ => out.push(c),
            },
        }
    }
    out
}

/// Number of bind placeholders in `sql`.
pub(crate) fn count(sql: &str) -> usize {
    let mut n = 0;
    rewrite(sql, |_| {
        n += 1;
        String::new()
    });
    n
}
