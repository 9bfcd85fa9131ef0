//! Query gateway.
//!
//! Every user-supplied SQL statement passes through [`QueryGateway`] before it
//! reaches the database. Allowed statements are reads of the `files` table and
//! note-only updates of it; the gateway hands back a [`CertifiedStatement`],
//! the only type [`IndexStore::query`](crate::storage::IndexStore::query)
//! accepts.

mod validator;

use serde::Serialize;

pub use validator::{DenyReason, StatementKind, StatementPolicy, DEFAULT_POLICY};

use crate::server::metrics::QUERY_VERDICTS;
use crate::storage::{IndexStore, QueryOutput};
use crate::Result;

/// A statement that passed validation.
///
/// Only the gateway can construct one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertifiedStatement {
    sql: String,
    kind: StatementKind,
}

impl CertifiedStatement {
    /// The normalized statement text.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub const fn kind(&self) -> StatementKind {
        self.kind
    }
}

/// Outcome of validating one statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allowed(CertifiedStatement),
    Denied { statement: String, reason: DenyReason },
}

impl Verdict {
    /// The normalized statement text.
    #[must_use]
    pub fn statement(&self) -> &str {
        match self {
            Self::Allowed(certified) => certified.sql(),
            Self::Denied { statement, .. } => statement,
        }
    }

    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed(_))
    }

    /// Serializable `{statement, allowed, reason}` summary.
    #[must_use]
    pub fn summary(&self) -> VerdictSummary {
        VerdictSummary {
            statement: self.statement().to_string(),
            allowed: self.is_allowed(),
            reason: match self {
                Self::Allowed(_) => None,
                Self::Denied { reason, .. } => Some(reason.to_string()),
            },
        }
    }
}

/// Wire form of a [`Verdict`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerdictSummary {
    pub statement: String,
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Verdict plus the output of running the statement, when it was allowed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    #[serde(flatten)]
    pub verdict: VerdictSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<QueryOutput>,
}

/// Validates raw SQL against a [`StatementPolicy`].
#[derive(Debug, Clone, Copy)]
pub struct QueryGateway {
    policy: StatementPolicy,
}

impl Default for QueryGateway {
    fn default() -> Self {
        Self::new(DEFAULT_POLICY)
    }
}

impl QueryGateway {
    #[must_use]
    pub const fn new(policy: StatementPolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub const fn policy(&self) -> &StatementPolicy {
        &self.policy
    }

    /// Validate one raw statement.
    ///
    /// Line breaks are folded to spaces and the result is trimmed; the
    /// verdict carries that normalized text.
    #[must_use]
    pub fn validate(&self, raw: &str) -> Verdict {
        let statement = normalize(raw);

        let verdict = match validator::check(&self.policy, &statement) {
            Ok(kind) => Verdict::Allowed(CertifiedStatement {
                sql: statement,
                kind,
            }),
            Err(reason) => Verdict::Denied { statement, reason },
        };

        let (kind, outcome) = match &verdict {
            Verdict::Allowed(c) => (
                match c.kind() {
                    StatementKind::Select => "select",
                    StatementKind::Update => "update",
                },
                "allowed",
            ),
            Verdict::Denied { .. } => ("unknown", "denied"),
        };
        QUERY_VERDICTS.with_label_values(&[kind, outcome]).inc();

        if let Verdict::Denied { statement, reason } = &verdict {
            tracing::info!(
                component = "gateway",
                operation = "validate",
                %reason,
                statement = %statement,
                "Statement denied"
            );
        }

        verdict
    }

    /// Validate `raw` and, if allowed, run it against `store`.
    ///
    /// # Errors
    ///
    /// Returns an error only if an allowed statement fails to execute. A
    /// denial is a normal response.
    pub fn execute(&self, store: &IndexStore, raw: &str) -> Result<QueryResponse> {
        let verdict = self.validate(raw);
        let output = match &verdict {
            Verdict::Allowed(statement) => Some(store.query(statement)?),
            Verdict::Denied { .. } => None,
        };

        Ok(QueryResponse {
            verdict: verdict.summary(),
            output,
        })
    }
}

fn normalize(raw: &str) -> String {
    raw.replace("\r\n", " ")
        .replace(['\n', '\r'], " ")
        .trim()
        .to_string()
}
