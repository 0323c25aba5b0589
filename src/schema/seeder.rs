//! Seed runner for the default broker configuration
//!
//! Rules:
//! - The seed script is split on `;` and every non-empty statement runs once
//! - All statements share one transaction; the first failure discards them all
//! - `run_seed_if_empty` skips seeding when Config already holds rows
//! - Validation checks that every (KEY, COMPONENT) pair of the script exists

use crate::error::{Result, StoreError};
use crate::pool::PoolManager;
use regex::Regex;
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Default Config rows shipped with the broker.
pub const DEFAULT_SEED: &str = include_str!("../../seeds/default_config.sql");

/// A `(KEY, VALUE, COMPONENT)` tuple read from a seed statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeedRow {
    pub key: String,
    pub value: Option<String>,
    pub component: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SeedResult {
    pub statements_executed: usize,
    pub rows_inserted: u64,
    pub skipped: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SeedValidation {
    pub expected: usize,
    pub found: usize,
    pub missing: Vec<String>,
}

impl SeedValidation {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

pub struct SeedRunner {
    script: String,
}

impl SeedRunner {
    pub fn new() -> Self {
        Self::with_script(DEFAULT_SEED)
    }

    pub fn with_script(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let script = fs::read_to_string(path).map_err(|e| StoreError::InvalidRequest {
            message: format!("Failed to read seed file {:?}: {}", path, e),
        })?;
        Ok(Self::with_script(script))
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    pub fn statements(&self) -> Vec<&str> {
        split_statements(&self.script)
    }

    /// Every Config row the script would insert, in script order.
    pub fn rows(&self) -> Result<Vec<SeedRow>> {
        let mut rows = Vec::new();
        for statement in self.statements() {
            rows.extend(parse_seed_rows(statement)?);
        }
        Ok(rows)
    }

    /// Execute every statement of the script inside one transaction.
    pub async fn run_seed(&self, manager: &PoolManager) -> Result<SeedResult> {
        let statements = self.statements();
        let mut client = manager.client().await?;

        let tx = client.transaction().await.map_err(|e| StoreError::SeedFailed {
            statement: 0,
            cause: format!("Failed to open transaction: {}", e),
        })?;

        let mut rows_inserted = 0;

        for (idx, statement) in statements.iter().enumerate() {
            debug!("Executing seed statement #{}", idx + 1);

            let affected = tx.execute(*statement, &[]).await.map_err(|e| {
                let cause = match e.as_db_error() {
                    Some(db_err) => format!(
                        "{} - {}",
                        db_err.message(),
                        db_err.detail().unwrap_or("no additional detail")
                    ),
                    None => e.to_string(),
                };
                warn!("Seed statement #{} failed: {}", idx + 1, cause);

                StoreError::SeedFailed {
                    statement: idx + 1,
                    cause,
                }
            })?;

            rows_inserted += affected;
        }

        tx.commit().await.map_err(|e| StoreError::SeedFailed {
            statement: statements.len(),
            cause: format!("Commit failed: {}", e),
        })?;

        info!(
            "Seed executed {} statements, inserted {} rows",
            statements.len(),
            rows_inserted
        );

        Ok(SeedResult {
            statements_executed: statements.len(),
            rows_inserted,
            skipped: false,
        })
    }

    /// Seed only when Config is empty, so re-running setup never duplicates rows.
    pub async fn run_seed_if_empty(&self, manager: &PoolManager) -> Result<SeedResult> {
        let client = manager.client().await?;

        let row = client
            .query_one(r#"SELECT COUNT(*) FROM "Config""#, &[])
            .await
            .map_err(|e| StoreError::query("seed check: Config", e))?;
        let count: i64 = row.get(0);

        if count > 0 {
            info!("Skipping seed - Config has {} existing rows", count);
            return Ok(SeedResult {
                statements_executed: 0,
                rows_inserted: 0,
                skipped: true,
            });
        }

        drop(client);
        self.run_seed(manager).await
    }

    /// Check that every (KEY, COMPONENT) pair of the script is present.
    pub async fn validate_seed(&self, manager: &PoolManager) -> Result<SeedValidation> {
        let rows = self.rows()?;
        let client = manager.client().await?;

        let mut found = 0;
        let mut missing = Vec::new();

        for row in &rows {
            let exists = client
                .query_opt(
                    r#"SELECT 1 FROM "Config" WHERE "KEY" = $1 AND "COMPONENT" IS NOT DISTINCT FROM $2 LIMIT 1"#,
                    &[&row.key, &row.component],
                )
                .await
                .map_err(|e| StoreError::query("seed validation", e))?;

            if exists.is_some() {
                found += 1;
            } else {
                missing.push(format!(
                    "{}/{}",
                    row.component.as_deref().unwrap_or("NULL"),
                    row.key
                ));
            }
        }

        if !missing.is_empty() {
            warn!(
                "Seed validation: expected {} rows, found {}. Missing: {:?}",
                rows.len(),
                found,
                missing
            );
        }

        Ok(SeedValidation {
            expected: rows.len(),
            found,
            missing,
        })
    }
}

impl Default for SeedRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a script on `;`, strip comments leading each fragment, and drop
/// fragments left blank.
pub fn split_statements(script: &str) -> Vec<&str> {
    script
        .split(';')
        .map(strip_leading_comments)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Skip `--` and `/* */` comments at the start of a fragment. Comments after
/// the first token are left to the server: they may sit inside literals.
fn strip_leading_comments(fragment: &str) -> &str {
    let mut rest = fragment.trim();
    loop {
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.split_once('\n').map_or("", |(_, tail)| tail).trim();
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.split_once("*/").map_or("", |(_, tail)| tail).trim();
        } else {
            return rest;
        }
    }
}

fn insert_regex() -> &'static Regex {
    static INSERT_RE: OnceLock<Regex> = OnceLock::new();
    INSERT_RE.get_or_init(|| {
        Regex::new(
            r#"(?is)^\s*INSERT\s+INTO\s+(?:"?\w+"?\.)?"?(\w+)"?\s*(?:\(([^)]*)\))?\s*VALUES\s*(.*)$"#,
        )
        .expect("insert regex is valid")
    })
}

/// Read the Config tuples of one INSERT statement.
///
/// Statements that target another table yield no rows.
pub fn parse_seed_rows(statement: &str) -> Result<Vec<SeedRow>> {
    let caps = match insert_regex().captures(statement) {
        Some(c) => c,
        None => return Ok(Vec::new()),
    };

    if !caps[1].eq_ignore_ascii_case("config") {
        return Ok(Vec::new());
    }

    let columns: Vec<String> = match caps.get(2) {
        Some(list) => list
            .as_str()
            .split(',')
            .map(|c| c.trim().trim_matches('"').to_ascii_uppercase())
            .collect(),
        None => vec!["KEY".to_string(), "VALUE".to_string(), "COMPONENT".to_string()],
    };

    let position = |name: &str| columns.iter().position(|c| c == name);
    let key_idx = position("KEY").ok_or_else(|| StoreError::InvalidRequest {
        message: "Seed INSERT into Config has no KEY column".to_string(),
    })?;
    let value_idx = position("VALUE");
    let component_idx = position("COMPONENT");

    let mut rows = Vec::new();

    for tuple in scan_tuples(&caps[3])? {
        if tuple.len() != columns.len() {
            return Err(StoreError::InvalidRequest {
                message: format!(
                    "Seed tuple has {} values for {} columns",
                    tuple.len(),
                    columns.len()
                ),
            });
        }

        let key = tuple[key_idx].clone().ok_or_else(|| StoreError::InvalidRequest {
            message: "Seed row has NULL KEY".to_string(),
        })?;

        rows.push(SeedRow {
            key,
            value: value_idx.and_then(|i| tuple[i].clone()),
            component: component_idx.and_then(|i| tuple[i].clone()),
        });
    }

    Ok(rows)
}

/// Split `(a, 'b', NULL), (...)` into value lists.
///
/// Quoted literals are unescaped (`''` becomes `'`), `NULL` becomes `None` and
/// anything else is kept verbatim.
fn scan_tuples(values: &str) -> Result<Vec<Vec<Option<String>>>> {
    let mut tuples = Vec::new();
    let mut chars = values.chars().peekable();

    loop {
        // Skip separators between tuples
        while let Some(&c) = chars.peek() {
            if c == '(' {
                break;
            }
            if !(c.is_whitespace() || c == ',') {
                return Err(StoreError::InvalidRequest {
                    message: format!("Unexpected '{}' between seed tuples", c),
                });
            }
            chars.next();
        }

        if chars.next().is_none() {
            break;
        }

        let mut tuple = Vec::new();
        let mut current = String::new();
        let mut quoted: Option<String> = None;

        loop {
            let ch = chars.next().ok_or_else(|| StoreError::InvalidRequest {
                message: "Unterminated seed tuple".to_string(),
            })?;

            match ch {
                '\'' => {
                    let mut literal = String::new();
                    loop {
                        match chars.next() {
                            Some('\'') if chars.peek() == Some(&'\'') => {
                                chars.next();
                                literal.push('\'');
                            }
                            Some('\'') => break,
                            Some(c) => literal.push(c),
                            None => {
                                return Err(StoreError::InvalidRequest {
                                    message: "Unterminated string literal in seed".to_string(),
                                })
                            }
                        }
                    }
                    quoted = Some(literal);
                }
                ',' | ')' => {
                    tuple.push(finish_value(quoted.take(), &current));
                    current.clear();
                    if ch == ')' {
                        break;
                    }
                }
                c => current.push(c),
            }
        }

        tuples.push(tuple);
    }

    Ok(tuples)
}

fn finish_value(quoted: Option<String>, raw: &str) -> Option<String> {
    if quoted.is_some() {
        return quoted;
    }
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("null") {
        None
    } else {
        Some(raw.to_string())
    }
}
