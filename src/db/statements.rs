//! Splitting a submitted query into individual statements.
//!
//! Uses the sqlparser tokenizer so that semicolons inside string literals,
//! quoted identifiers and comments do not split a statement.

use sqlparser::dialect::GenericDialect;
use sqlparser::tokenizer::{Token, Tokenizer};
use tracing::debug;

/// Splits `sql` into statements in submission order.
///
/// Each statement is trimmed and carries no trailing `;`. Statements that are
/// empty or contain only comments are dropped. If the text cannot be
/// tokenized, it is returned as a single statement and left for the backend
/// to reject.
pub fn split_statements(sql: &str) -> Vec<String> {
    let dialect = GenericDialect {};
    let tokens = match Tokenizer::new(&dialect, sql).with_unescape(false).tokenize() {
        Ok(tokens) => tokens,
        Err(e) => {
            debug!("Tokenizer failed ({}), treating query as one statement", e);
            return single_statement(sql);
        }
    };

    let mut statements = Vec::new();
    let mut current: Vec<Token> = Vec::new();

    for token in tokens {
        match token {
            Token::SemiColon => {
                push_statement(&mut statements, &current);
                current.clear();
            }
            Token::EOF => {}
            other => current.push(other),
        }
    }
    push_statement(&mut statements, &current);

    statements
}

fn push_statement(statements: &mut Vec<String>, tokens: &[Token]) {
    if tokens.iter().all(|t| matches!(t, Token::Whitespace(_))) {
        return;
    }
    let text: String = tokens.iter().map(|t| t.to_string()).collect();
    statements.push(text.trim().to_string());
}

fn single_statement(sql: &str) -> Vec<String> {
    let stripped = sql.trim().trim_end_matches(';').trim_end();
    if stripped.is_empty() {
        Vec::new()
    } else {
        vec![stripped.to_string()]
    }
}
