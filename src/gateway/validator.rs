//! Declarative statement validation.
//!
//! The rules are data (`StatementPolicy`); the checks below only walk a
//! token stream. String literals are collapsed to a single token before any
//! rule runs, so their contents never match keywords or column names.

use std::fmt;

use serde::Serialize;

/// Why a statement was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "rule", content = "detail", rename_all = "snake_case")]
pub enum DenyReason {
    /// Nothing to run.
    #[error("empty statement")]
    Empty,

    /// A quoted literal or identifier is never closed.
    #[error("unterminated quoted literal")]
    Unterminated,

    /// SQL comments could hide clauses from the checks.
    #[error("comments are not allowed")]
    Comment,

    /// More than one statement separated by `;`.
    #[error("multiple statements are not allowed")]
    MultipleStatements,

    /// A blacklisted keyword appears anywhere in the statement.
    #[error("keyword '{0}' is not allowed")]
    BlacklistedKeyword(String),

    /// Only reads and note updates are accepted.
    #[error("unsupported statement '{0}'")]
    UnsupportedVerb(String),

    /// A source or target other than the index table.
    #[error("statement must target '{expected}', found '{found}'")]
    WrongTable { expected: String, found: String },

    /// A read without a `FROM` clause.
    #[error("statement has no FROM clause")]
    MissingSource,

    /// A second table comma-joined or `JOIN`ed to the index table.
    #[error("joined sources are not allowed")]
    JoinedSource,

    /// `UPDATE` without a `SET` clause.
    #[error("update has no SET clause")]
    MissingSet,

    /// `UPDATE` without a `WHERE` clause.
    #[error("update has no WHERE clause")]
    MissingWhere,

    /// More than one assignment in `SET`.
    #[error("only a single assignment is allowed")]
    MultipleAssignments,

    /// Assignment to, or reference of, a structural column.
    #[error("column '{0}' cannot be written")]
    ForbiddenColumn(String),
}

/// Validation rules, kept as data so they can be audited at a glance.
#[derive(Debug, Clone, Copy)]
pub struct StatementPolicy {
    /// The only table statements may read from or update.
    pub table: &'static str,

    /// Keywords that reject a statement outright.
    pub blacklist: &'static [&'static str],

    /// The single column an update may assign.
    pub writable_column: &'static str,

    /// Columns an update's `SET` clause may not mention.
    pub protected_columns: &'static [&'static str],
}

/// Policy guarding the `files` index table.
pub const DEFAULT_POLICY: StatementPolicy = StatementPolicy {
    table: "files",
    blacklist: &[
        "pragma", "with", "drop", "truncate", "delete", "insert", "alter", "create", "attach",
        "detach", "vacuum", "reindex", "union", "intersect", "except", "returning",
    ],
    writable_column: "note",
    protected_columns: &[
        "path",
        "name",
        "case_key",
        "ext",
        "size",
        "mtime",
        "ctime",
        "is_directory",
        "updated_at",
    ],
};

/// Keywords that end the source list of a `FROM`.
const SOURCE_TERMINATORS: &[&str] = &[
    "where", "group", "order", "limit", "having", "window", "offset",
];

/// Statement kind accepted by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    /// A read from the index table.
    Select,
    /// A note-only update of the index table.
    Update,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    /// Identifier, keyword or number, lowercased.
    Word(String),
    /// A single-quoted string literal; contents are irrelevant.
    Literal,
    Symbol(char),
}

impl Token {
    fn is_word(&self, word: &str) -> bool {
        matches!(self, Self::Word(w) if w == word)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Word(w) => f.write_str(w),
            Self::Literal => f.write_str("'…'"),
            Self::Symbol(c) => write!(f, "{c}"),
        }
    }
}

fn tokenize(sql: &str) -> Result<Vec<Token>, DenyReason> {
    let mut tokens = Vec::new();
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '\'' => {
                // '' inside a literal is an escaped quote
                loop {
                    match chars.next() {
                        Some('\'') if chars.peek() == Some(&'\'') => {
                            chars.next();
                        }
                        Some('\'') => break,
                        Some(_) => {}
                        None => return Err(DenyReason::Unterminated),
                    }
                }
                tokens.push(Token::Literal);
            }
            '"' | '`' | '[' => {
                let close = if c == '[' { ']' } else { c };
                let mut ident = String::new();
                loop {
                    match chars.next() {
                        Some(ch) if ch == close => break,
                        Some(ch) => ident.push(ch),
                        None => return Err(DenyReason::Unterminated),
                    }
                }
                tokens.push(Token::Word(ident.to_lowercase()));
            }
            '-' if chars.peek() == Some(&'-') => return Err(DenyReason::Comment),
            '/' if chars.peek() == Some(&'*') => return Err(DenyReason::Comment),
            c if c.is_alphanumeric() || c == '_' || c == '$' => {
                let mut word = String::new();
                word.extend(c.to_lowercase());
                while let Some(&next) = chars.peek() {
                    if next.is_alphanumeric() || next == '_' || next == '$' {
                        word.extend(next.to_lowercase());
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Word(word));
            }
            other => tokens.push(Token::Symbol(other)),
        }
    }

    Ok(tokens)
}

/// Check a statement against `policy`, returning its kind when allowed.
pub(crate) fn check(policy: &StatementPolicy, sql: &str) -> Result<StatementKind, DenyReason> {
    let mut tokens = tokenize(sql)?;

    while tokens.last() == Some(&Token::Symbol(';')) {
        tokens.pop();
    }
    if tokens.contains(&Token::Symbol(';')) {
        return Err(DenyReason::MultipleStatements);
    }

    let Some(first) = tokens.first() else {
        return Err(DenyReason::Empty);
    };

    if let Some(banned) = tokens.iter().find_map(|t| match t {
        Token::Word(w) if policy.blacklist.contains(&w.as_str()) => Some(w.clone()),
        _ => None,
    }) {
        return Err(DenyReason::BlacklistedKeyword(banned));
    }

    if first.is_word("select") {
        check_sources(policy, &tokens, true)?;
        Ok(StatementKind::Select)
    } else if first.is_word("update") {
        check_update(policy, &tokens)?;
        Ok(StatementKind::Update)
    } else {
        Err(DenyReason::UnsupportedVerb(first.to_string()))
    }
}

/// Every `FROM` must name the policy table alone.
fn check_sources(
    policy: &StatementPolicy,
    tokens: &[Token],
    require_from: bool,
) -> Result<(), DenyReason> {
    if tokens.iter().any(|t| t.is_word("join")) {
        return Err(DenyReason::JoinedSource);
    }

    let mut seen_from = false;
    let mut i = 0;
    while i < tokens.len() {
        if !tokens[i].is_word("from") {
            i += 1;
            continue;
        }
        seen_from = true;

        let source = tokens.get(i + 1);
        if !source.is_some_and(|t| t.is_word(policy.table)) {
            return Err(DenyReason::WrongTable {
                expected: policy.table.to_string(),
                found: source.map_or_else(|| "nothing".to_string(), ToString::to_string),
            });
        }

        // Alias, `INDEXED BY` and `NOT INDEXED` may follow the table; no
        // second source may appear before the next clause.
        let mut depth = 0usize;
        let mut next = i + 2;
        while let Some(token) = tokens.get(next) {
            match token {
                Token::Symbol('(') => depth += 1,
                Token::Symbol(')') if depth == 0 => break,
                Token::Symbol(')') => depth -= 1,
                Token::Symbol(',') if depth == 0 => return Err(DenyReason::JoinedSource),
                Token::Word(w) if depth == 0 && SOURCE_TERMINATORS.contains(&w.as_str()) => {
                    break
                }
                _ => {}
            }
            next += 1;
        }
        i = next;
    }

    if require_from && !seen_from {
        return Err(DenyReason::MissingSource);
    }
    Ok(())
}

fn check_update(policy: &StatementPolicy, tokens: &[Token]) -> Result<(), DenyReason> {
    match tokens.get(1) {
        Some(t) if t.is_word(policy.table) => {}
        other => {
            return Err(DenyReason::WrongTable {
                expected: policy.table.to_string(),
                found: other.map_or_else(|| "nothing".to_string(), ToString::to_string),
            })
        }
    }

    if !tokens.get(2).is_some_and(|t| t.is_word("set")) {
        return Err(DenyReason::MissingSet);
    }

    let mut depth = 0i32;
    let mut where_at = None;
    let mut set_commas = 0;
    for (i, token) in tokens.iter().enumerate().skip(3) {
        match token {
            Token::Symbol('(') => depth += 1,
            Token::Symbol(')') => depth -= 1,
            Token::Symbol(',') if depth == 0 => set_commas += 1,
            t if depth == 0 && t.is_word("where") => {
                where_at = Some(i);
                break;
            }
            _ => {}
        }
    }

    let set_end = where_at.unwrap_or(tokens.len());
    let assignment = &tokens[3..set_end];
    if assignment.is_empty() {
        return Err(DenyReason::MissingSet);
    }
    if set_commas > 0 {
        return Err(DenyReason::MultipleAssignments);
    }

    let target_ok = assignment[0].is_word(policy.writable_column)
        && assignment.get(1) == Some(&Token::Symbol('='));
    if !target_ok {
        return Err(DenyReason::ForbiddenColumn(assignment[0].to_string()));
    }
    if let Some(Token::Word(col)) = assignment[2..]
        .iter()
        .find(|t| matches!(t, Token::Word(w) if policy.protected_columns.contains(&w.as_str())))
    {
        return Err(DenyReason::ForbiddenColumn(col.clone()));
    }

    // A WHERE must be present. A tautological one is accepted as-is.
    match where_at {
        Some(at) if at + 1 < tokens.len() => {}
        _ => return Err(DenyReason::MissingWhere),
    }

    check_sources(policy, tokens, false)
}
