//! Identifier helpers: quoting for SQL rendering, validation for
//! descriptor columns, and the snake_case conversion behind default
//! foreign-key names.

use std::sync::OnceLock;

use regex::Regex;

/// Quote a SQL identifier using ANSI double-quoting.
///
/// Embedded double-quotes are escaped by doubling them (`"` → `""`).
///
/// # Examples
///
/// ```
/// use sqlrel_core::quote_ident;
///
/// assert_eq!(quote_ident("owner_id"), "\"owner_id\"");
/// assert_eq!(quote_ident("user\"name"), "\"user\"\"name\"");
/// ```
#[inline]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a SQL identifier using MySQL backtick quoting.
#[inline]
pub fn quote_ident_mysql(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn identifier_regex() -> Option<&'static Regex> {
    static IDENT: OnceLock<Option<Regex>> = OnceLock::new();
    IDENT
        .get_or_init(|| match Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$") {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!(error = %e, "Identifier pattern failed to compile");
                None
            }
        })
        .as_ref()
}

/// Whether `name` is a plain column/table identifier (letters, digits,
/// underscores, not starting with a digit).
pub fn is_valid_identifier(name: &str) -> bool {
    identifier_regex().is_some_and(|re| re.is_match(name))
}

/// Convert a type name such as `UserRole` or `HTTPRequest` to snake_case
/// (`user_role`, `http_request`).
///
/// # Examples
///
/// ```
/// use sqlrel_core::snake_case;
///
/// assert_eq!(snake_case("Owner"), "owner");
/// assert_eq!(snake_case("DAGItem"), "dag_item");
/// ```
pub fn snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1).copied();
            let boundary = match prev {
                Some(p) if p.is_ascii_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_ascii_uppercase() => next.is_some_and(|n| n.is_ascii_lowercase()),
                _ => false,
            };
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("a\"b\"c"), "\"a\"\"b\"\"c\"");
        assert_eq!(quote_ident_mysql("user`name"), "`user``name`");
    }

    #[test]
    fn test_identifier_validation() {
        assert!(is_valid_identifier("owner_id"));
        assert!(is_valid_identifier("_private"));
        assert!(is_valid_identifier("col2"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("2col"));
        assert!(!is_valid_identifier("owner id"));
        assert!(!is_valid_identifier("id; DROP TABLE x"));
    }

    #[test]
    fn test_snake_case() {
        assert_eq!(snake_case("Owner"), "owner");
        assert_eq!(snake_case("UserRole"), "user_role");
        assert_eq!(snake_case("HTTPRequest"), "http_request");
        assert_eq!(snake_case("Item2Tag"), "item2_tag");
        assert_eq!(snake_case("already_snake"), "already_snake");
    }
}
