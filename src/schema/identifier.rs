//! Identifier validation.
//!
//! Table, column and database names cannot be bound as parameters, so every
//! identifier is checked against a strict allow-list before it is spliced into
//! SQL text.

use crate::error::{DbError, DbResult};

/// Maximum identifier length accepted by every supported driver.
pub const MAX_IDENTIFIER_LEN: usize = 64;

/// Keywords rejected as bare identifiers.
const RESERVED_WORDS: &[&str] = &[
    "add", "all", "alter", "and", "any", "as", "asc", "between", "by", "case", "check", "column",
    "constraint", "create", "cross", "database", "default", "delete", "desc", "distinct", "drop",
    "else", "end", "exists", "foreign", "from", "full", "grant", "group", "having", "in",
    "index", "inner", "insert", "into", "is", "join", "key", "left", "like", "limit", "not",
    "null", "on", "or", "order", "outer", "primary", "references", "revoke", "right", "select",
    "set", "table", "then", "to", "truncate", "union", "unique", "update", "user", "using",
    "values", "view", "when", "where", "with",
];

/// Check whether a word is a reserved SQL keyword.
pub fn is_reserved_word(word: &str) -> bool {
    let lower = word.to_ascii_lowercase();
    RESERVED_WORDS.contains(&lower.as_str())
}

/// Validate an identifier against `^[a-zA-Z][a-zA-Z0-9_]*$`, the length limit
/// and the reserved-word list.
pub fn validate_identifier(name: &str) -> DbResult<()> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(DbError::schema_validation(name, "identifier cannot be empty"));
    };

    if !first.is_ascii_alphabetic() {
        return Err(DbError::schema_validation(
            name,
            "identifier must start with a letter",
        ));
    }

    if let Some(bad) = chars.find(|c| !c.is_ascii_alphanumeric() && *c != '_') {
        return Err(DbError::schema_validation(
            name,
            format!("invalid character '{}'", bad),
        ));
    }

    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(DbError::schema_validation(
            name,
            format!("identifier exceeds {} characters", MAX_IDENTIFIER_LEN),
        ));
    }

    if is_reserved_word(name) {
        return Err(DbError::schema_validation(name, "reserved SQL keyword"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifiers() {
        for name in ["users", "task_statuses", "Todo2", "a", "created_at"] {
            assert!(validate_identifier(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn test_rejects_injection_characters() {
        for name in ["users; DROP TABLE x", "a-b", "tab le", "name'", "x\"y", "é"] {
            assert!(
                matches!(
                    validate_identifier(name),
                    Err(DbError::SchemaValidation { .. })
                ),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn test_rejects_leading_digit_or_underscore() {
        assert!(validate_identifier("1users").is_err());
        assert!(validate_identifier("_users").is_err());
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn test_rejects_reserved_words_case_insensitively() {
        assert!(validate_identifier("select").is_err());
        assert!(validate_identifier("ORDER").is_err());
        assert!(validate_identifier("Key").is_err());
        assert!(validate_identifier("orders").is_ok());
    }

    #[test]
    fn test_length_limit() {
        assert!(validate_identifier(&"a".repeat(MAX_IDENTIFIER_LEN)).is_ok());
        assert!(validate_identifier(&"a".repeat(MAX_IDENTIFIER_LEN + 1)).is_err());
    }
}
