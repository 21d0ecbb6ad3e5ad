//! Read-only statement guard
//!
//! Statements from the model are checked here before they reach the
//! database. The scanner understands enough PostgreSQL lexical structure
//! to skip string literals, quoted identifiers, dollar-quoted bodies and
//! comments, so keywords inside them do not count.

use super::GatewayError;

/// Statements may only start with one of these
const ALLOWED_LEADING: &[&str] = &["SELECT", "WITH", "VALUES", "TABLE"];

/// Keywords that mark a statement as writing or administering
const FORBIDDEN: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "MERGE", "DROP", "CREATE", "ALTER", "TRUNCATE", "GRANT", "REVOKE", "COPY", "CALL",
    "DO", "VACUUM", "COMMENT", "LOCK", "REINDEX", "REFRESH", "SET", "RESET", "INTO",
];

#[derive(Debug, PartialEq)]
enum Token {
    Word(String),
    Semicolon,
}

/// Accept a single read-only statement and return it without its trailing semicolon
pub fn check_read_only(statement: &str) -> Result<String, GatewayError> {
    let tokens = scan(statement)?;

    let Some(first) = tokens.iter().find_map(|t| match t {
        Token::Word(w) => Some(w.as_str()),
        Token::Semicolon => None,
    }) else {
        return Err(GatewayError::InvalidArgument("query is empty".to_string()));
    };

    if let Some(pos) = tokens.iter().position(|t| *t == Token::Semicolon)
        && tokens[pos + 1..].iter().any(|t| matches!(t, Token::Word(_)))
    {
        return Err(GatewayError::ReadOnlyViolation(
            "multiple statements are not allowed".to_string(),
        ));
    }

    if !ALLOWED_LEADING.contains(&first) {
        return Err(GatewayError::ReadOnlyViolation(format!(
            "statements starting with {} are not allowed",
            first
        )));
    }

    for token in &tokens {
        if let Token::Word(word) = token
            && FORBIDDEN.contains(&word.as_str())
        {
            return Err(GatewayError::ReadOnlyViolation(format!("keyword {} is not allowed", word)));
        }
    }

    let trimmed = statement.trim();
    let trimmed = trimmed.trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    Ok(trimmed.to_string())
}

/// Tokenize into uppercase bare words and semicolons
fn scan(sql: &str) -> Result<Vec<Token>, GatewayError> {
    let chars: Vec<char> = sql.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' => i = skip_quoted(&chars, i, '\'')?,
            '"' => i = skip_quoted(&chars, i, '"')?,
            '-' if chars.get(i + 1) == Some(&'-') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => i = skip_block_comment(&chars, i)?,
            '$' => i = skip_dollar(&chars, i)?,
            ';' => {
                tokens.push(Token::Semicolon);
                i += 1;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                if word.eq_ignore_ascii_case("e") && chars.get(i) == Some(&'\'') {
                    i = skip_escape_string(&chars, i)?;
                    continue;
                }
                tokens.push(Token::Word(word.to_uppercase()));
            }
            _ => i += 1,
        }
    }

    Ok(tokens)
}

/// Skip a quoted run starting at `start`; a doubled quote is an escape
fn skip_quoted(chars: &[char], start: usize, quote: char) -> Result<usize, GatewayError> {
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == quote {
            if chars.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return Ok(i + 1);
        }
        i += 1;
    }
    Err(GatewayError::InvalidArgument("unterminated quoted text".to_string()))
}

/// `E'...'` where a backslash escapes the next character, quotes included
fn skip_escape_string(chars: &[char], start: usize) -> Result<usize, GatewayError> {
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            '\'' if chars.get(i + 1) == Some(&'\'') => i += 2,
            '\'' => return Ok(i + 1),
            _ => i += 1,
        }
    }
    Err(GatewayError::InvalidArgument("unterminated quoted text".to_string()))
}

/// Block comments nest in PostgreSQL
fn skip_block_comment(chars: &[char], start: usize) -> Result<usize, GatewayError> {
    let mut depth = 0usize;
    let mut i = start;
    while i < chars.len() {
        if chars[i] == '/' && chars.get(i + 1) == Some(&'*') {
            depth += 1;
            i += 2;
        } else if chars[i] == '*' && chars.get(i + 1) == Some(&'/') {
            depth -= 1;
            i += 2;
            if depth == 0 {
                return Ok(i);
            }
        } else {
            i += 1;
        }
    }
    Err(GatewayError::InvalidArgument("unterminated block comment".to_string()))
}

/// `$tag$ ... $tag$`; a lone `$` (positional parameter) is passed over
fn skip_dollar(chars: &[char], start: usize) -> Result<usize, GatewayError> {
    let mut end = start + 1;
    while end < chars.len() && (chars[end].is_alphanumeric() || chars[end] == '_') {
        end += 1;
    }
    if chars.get(end) != Some(&'$') || chars[start + 1..end].first().is_some_and(|c| c.is_ascii_digit()) {
        return Ok(end);
    }

    let tag = &chars[start..=end];
    let mut i = end + 1;
    while i + tag.len() <= chars.len() {
        if chars[i..i + tag.len()] == *tag {
            return Ok(i + tag.len());
        }
        i += 1;
    }
    Err(GatewayError::InvalidArgument("unterminated dollar-quoted text".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected(sql: &str) -> bool {
        matches!(check_read_only(sql), Err(GatewayError::ReadOnlyViolation(_)))
    }

    #[test]
    fn test_plain_select_passes() {
        assert_eq!(
            check_read_only("SELECT name FROM users;").unwrap(),
            "SELECT name FROM users"
        );
        assert_eq!(check_read_only("  select 1  ").unwrap(), "select 1");
    }

    #[test]
    fn test_other_read_forms_pass() {
        assert!(check_read_only("WITH t AS (SELECT 1) SELECT * FROM t").is_ok());
        assert!(check_read_only("VALUES (1), (2)").is_ok());
        assert!(check_read_only("TABLE users").is_ok());
    }

    #[test]
    fn test_write_statements_rejected() {
        assert!(rejected("DROP TABLE users;"));
        assert!(rejected("delete from users"));
        assert!(rejected("INSERT INTO users VALUES (1)"));
        assert!(rejected("UPDATE users SET name = 'x'"));
        assert!(rejected("TRUNCATE users"));
        assert!(rejected("SET search_path TO evil"));
    }

    #[test]
    fn test_stacked_statements_rejected() {
        assert!(rejected("SELECT 1; DROP TABLE users"));
        assert!(rejected("SELECT 1; SELECT 2"));
        assert!(rejected("SELECT E'\\'' ; DROP TABLE users; -- '"));
        assert!(rejected("select e'\\\\'; DELETE FROM users"));
    }

    #[test]
    fn test_escape_strings_are_skipped() {
        assert!(check_read_only("SELECT E'it\\'s; DROP' AS note").is_ok());
        assert!(check_read_only("SELECT E'a''b', E'tab\\there'").is_ok());
        assert!(matches!(
            check_read_only("SELECT E'open\\'"),
            Err(GatewayError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_write_hidden_in_cte_rejected() {
        assert!(rejected("WITH gone AS (DELETE FROM users RETURNING *) SELECT * FROM gone"));
        assert!(rejected("SELECT * INTO backup FROM users"));
    }

    #[test]
    fn test_keywords_inside_literals_ignored() {
        assert!(check_read_only("SELECT 'DROP TABLE users; --' AS note").is_ok());
        assert!(check_read_only("SELECT \"delete\" FROM audit").is_ok());
        assert!(check_read_only("SELECT $body$ DELETE FROM x; $body$").is_ok());
        assert!(check_read_only("SELECT 'it''s; fine'").is_ok());
    }

    #[test]
    fn test_keywords_inside_comments_ignored() {
        assert!(check_read_only("SELECT 1 -- then DROP everything").is_ok());
        assert!(check_read_only("SELECT /* DELETE /* nested */ UPDATE */ 1").is_ok());
    }

    #[test]
    fn test_leading_comment_does_not_hide_statement() {
        assert!(rejected("/* harmless */ DROP TABLE users"));
        assert!(rejected("-- note\nDELETE FROM users"));
    }

    #[test]
    fn test_column_names_containing_keywords_pass() {
        assert!(check_read_only("SELECT updated_at, created_by FROM orders").is_ok());
    }

    #[test]
    fn test_empty_and_unterminated() {
        assert!(matches!(check_read_only("   "), Err(GatewayError::InvalidArgument(_))));
        assert!(matches!(check_read_only(";"), Err(GatewayError::InvalidArgument(_))));
        assert!(matches!(
            check_read_only("SELECT 'open"),
            Err(GatewayError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_positional_parameter_is_not_dollar_quote() {
        assert!(check_read_only("SELECT * FROM users WHERE id = $1").is_ok());
    }
}
