//! Lightweight SQL text inspection.
//!
//! Only what the executor needs: placeholder rewriting for PostgreSQL and a
//! coarse statement classification. Quoted text and comments are skipped so
//! that a `?` inside a string literal is never treated as a parameter.

/// Rewrite `?` placeholders to PostgreSQL's `$1..$n` form.
pub fn rewrite_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut chars = sql.chars().peekable();
    let mut index = 0usize;

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' | '`' => {
                out.push(c);
                copy_quoted(&mut chars, &mut out, c);
            }
            '-' if chars.peek() == Some(&'-') => {
                out.push(c);
                for next in chars.by_ref() {
                    out.push(next);
                    if next == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                out.push(c);
                let mut prev = '\0';
                for next in chars.by_ref() {
                    out.push(next);
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
            }
            '?' => {
                index += 1;
                out.push('$');
                out.push_str(&index.to_string());
            }
            _ => out.push(c),
        }
    }
    out
}

/// Copy a quoted section, honoring doubled-quote escapes.
fn copy_quoted(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, out: &mut String, quote: char) {
    while let Some(next) = chars.next() {
        out.push(next);
        if next == quote {
            if chars.peek() == Some(&quote) {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
                continue;
            }
            return;
        }
    }
}

/// First keyword of a statement, uppercased, after leading comments.
pub fn leading_keyword(sql: &str) -> String {
    let mut rest = sql.trim_start();
    loop {
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.split_once('\n').map(|(_, r)| r).unwrap_or("").trim_start();
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.split_once("*/").map(|(_, r)| r).unwrap_or("").trim_start();
        } else {
            break;
        }
    }
    rest.trim_start_matches('(')
        .split(|c: char| !c.is_ascii_alphabetic())
        .next()
        .unwrap_or("")
        .to_ascii_uppercase()
}

/// Whether a statement produces a row set rather than an affected-row count.
pub fn returns_rows(sql: &str) -> bool {
    match leading_keyword(sql).as_str() {
        "SELECT" | "WITH" | "SHOW" | "PRAGMA" | "EXPLAIN" | "DESCRIBE" | "DESC" | "VALUES"
        | "TABLE" => true,
        "INSERT" | "UPDATE" | "DELETE" | "REPLACE" => has_returning_clause(sql),
        _ => false,
    }
}

/// Whether a statement inserts rows.
pub fn is_insert(sql: &str) -> bool {
    matches!(leading_keyword(sql).as_str(), "INSERT" | "REPLACE")
}

fn has_returning_clause(sql: &str) -> bool {
    sql.split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .any(|word| word.eq_ignore_ascii_case("RETURNING"))
}
