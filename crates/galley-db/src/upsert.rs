//! The two mirror primitives: batched UPSERT and sanity-gated mirror delete.
//!
//! Both run inside the caller's transaction; a sync run is exactly one
//! transaction containing upsert + mirror delete + the audit row, which is
//! what makes "either old snapshot or new snapshot" observable to readers.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{PgConnection, Postgres};
use tracing::warn;
use uuid::Uuid;

use crate::UPSERT_BATCH_SIZE;

// ---------------------------------------------------------------------------
// Value model
// ---------------------------------------------------------------------------

/// A single bindable column value. Mapping code produces rows as
/// `Vec<DbValue>` so one upsert routine serves every mirror table.
#[derive(Debug, Clone)]
pub enum DbValue {
    Uuid(Uuid),
    OptUuid(Option<Uuid>),
    I64(i64),
    Str(String),
    OptStr(Option<String>),
    Bool(bool),
    Decimal(Decimal),
    OptDecimal(Option<Decimal>),
    Json(Value),
    TsUtc(DateTime<Utc>),
}

fn bind_value<'q>(
    q: Query<'q, Postgres, PgArguments>,
    v: DbValue,
) -> Query<'q, Postgres, PgArguments> {
    match v {
        DbValue::Uuid(x) => q.bind(x),
        DbValue::OptUuid(x) => q.bind(x),
        DbValue::I64(x) => q.bind(x),
        DbValue::Str(x) => q.bind(x),
        DbValue::OptStr(x) => q.bind(x),
        DbValue::Bool(x) => q.bind(x),
        DbValue::Decimal(x) => q.bind(x),
        DbValue::OptDecimal(x) => q.bind(x),
        DbValue::Json(x) => q.bind(x),
        DbValue::TsUtc(x) => q.bind(x),
    }
}

// ---------------------------------------------------------------------------
// Batch upsert
// ---------------------------------------------------------------------------

/// Static description of one mirror table.
#[derive(Debug, Clone, Copy)]
pub struct UpsertSpec {
    pub table: &'static str,
    /// All columns, in the order row values are produced.
    pub columns: &'static [&'static str],
    /// Subset of `columns` forming the conflict key.
    pub conflict: &'static [&'static str],
}

impl UpsertSpec {
    fn statement(&self, rows_in_chunk: usize) -> String {
        let cols = self.columns.join(", ");
        let width = self.columns.len();

        let mut values = String::new();
        for r in 0..rows_in_chunk {
            if r > 0 {
                values.push_str(", ");
            }
            values.push('(');
            for c in 0..width {
                if c > 0 {
                    values.push_str(", ");
                }
                values.push_str(&format!("${}", r * width + c + 1));
            }
            values.push(')');
        }

        let updates: Vec<String> = self
            .columns
            .iter()
            .filter(|c| !self.conflict.contains(c))
            .map(|c| format!("{c} = excluded.{c}"))
            .collect();

        let conflict = self.conflict.join(", ");
        if updates.is_empty() {
            format!(
                "insert into {} ({cols}) values {values} on conflict ({conflict}) do nothing",
                self.table
            )
        } else {
            format!(
                "insert into {} ({cols}) values {values} on conflict ({conflict}) do update set {}",
                self.table,
                updates.join(", ")
            )
        }
    }
}

/// Upsert `rows` in chunks of at most [`UPSERT_BATCH_SIZE`]. Each row must
/// match `spec.columns` in arity and order. Returns the number of rows sent.
pub async fn batch_upsert(
    conn: &mut PgConnection,
    spec: &UpsertSpec,
    rows: Vec<Vec<DbValue>>,
) -> Result<usize> {
    let total = rows.len();
    let width = spec.columns.len();

    for chunk in rows.chunks(UPSERT_BATCH_SIZE) {
        let sql = spec.statement(chunk.len());
        let mut q = sqlx::query(&sql);
        for row in chunk {
            debug_assert_eq!(row.len(), width, "row arity mismatch for {}", spec.table);
            for v in row {
                q = bind_value(q, v.clone());
            }
        }
        q.execute(&mut *conn)
            .await
            .with_context(|| format!("batch upsert into {} failed", spec.table))?;
    }

    Ok(total)
}

// ---------------------------------------------------------------------------
// Mirror delete
// ---------------------------------------------------------------------------

/// Ids that survive the reconcile; everything else in scope is a deletion
/// candidate. Two key flavours cover the POS (uuid) and finance (bigint)
/// mirrors.
#[derive(Debug, Clone)]
pub enum KeySet {
    Uuid(Vec<Uuid>),
    I64(Vec<i64>),
}

impl KeySet {
    pub fn is_empty(&self) -> bool {
        match self {
            KeySet::Uuid(v) => v.is_empty(),
            KeySet::I64(v) => v.is_empty(),
        }
    }
}

/// Optional scope narrowing, e.g. one `root_type` slice of the shared
/// entity table.
#[derive(Debug, Clone)]
pub struct MirrorScope {
    pub column: &'static str,
    pub value: String,
}

/// Outcome of a mirror-delete attempt. Skips are normal operation, not
/// errors; the sync run still ends `success`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorDeleteOutcome {
    Deleted(u64),
    /// Empty upstream set — treated as an API outage, nothing deleted.
    SkippedEmptyUpstream,
    /// Candidate deletions exceeded half the rows in scope.
    SkippedSanityGate { candidates: i64, current: i64 },
}

/// More than half the rows in scope disappearing at once is an upstream
/// fault until proven otherwise.
pub(crate) fn sanity_gate_allows(current: i64, candidates: i64) -> bool {
    candidates * 2 <= current
}

/// Delete rows of `table` whose `key_column` is not in `valid`, subject to
/// the empty-upstream and 50 % sanity gates.
pub async fn mirror_delete(
    conn: &mut PgConnection,
    table: &str,
    key_column: &str,
    valid: &KeySet,
    scope: Option<&MirrorScope>,
) -> Result<MirrorDeleteOutcome> {
    if valid.is_empty() {
        warn!(table, "mirror delete skipped: upstream returned no ids");
        return Ok(MirrorDeleteOutcome::SkippedEmptyUpstream);
    }

    let scope_sql = match scope {
        Some(s) => format!(" and {} = $2", s.column),
        None => String::new(),
    };

    let count_sql = format!("select count(*)::bigint from {table} where true{scope_sql}");
    let candidates_sql = format!(
        "select count(*)::bigint from {table} where not ({key_column} = any($1)){scope_sql}"
    );
    let delete_sql =
        format!("delete from {table} where not ({key_column} = any($1)){scope_sql}");

    let current: i64 = {
        // The count query has no $1; renumber the scope bind.
        let sql = count_sql.replace("$2", "$1");
        let mut q = sqlx::query_as::<_, (i64,)>(&sql);
        if let Some(s) = scope {
            q = q.bind(s.value.clone());
        }
        q.fetch_one(&mut *conn)
            .await
            .with_context(|| format!("mirror delete count on {table} failed"))?
            .0
    };

    let candidates: i64 = {
        let mut q = sqlx::query_as::<_, (i64,)>(&candidates_sql);
        q = match valid {
            KeySet::Uuid(ids) => q.bind(ids.clone()),
            KeySet::I64(ids) => q.bind(ids.clone()),
        };
        if let Some(s) = scope {
            q = q.bind(s.value.clone());
        }
        q.fetch_one(&mut *conn)
            .await
            .with_context(|| format!("mirror delete candidate count on {table} failed"))?
            .0
    };

    if candidates == 0 {
        return Ok(MirrorDeleteOutcome::Deleted(0));
    }

    if !sanity_gate_allows(current, candidates) {
        warn!(
            table,
            candidates, current, "mirror delete skipped: would remove more than 50% of rows"
        );
        return Ok(MirrorDeleteOutcome::SkippedSanityGate {
            candidates,
            current,
        });
    }

    let mut q = sqlx::query(&delete_sql);
    q = match valid {
        KeySet::Uuid(ids) => q.bind(ids.clone()),
        KeySet::I64(ids) => q.bind(ids.clone()),
    };
    if let Some(s) = scope {
        q = q.bind(s.value.clone());
    }
    let res = q
        .execute(&mut *conn)
        .await
        .with_context(|| format!("mirror delete on {table} failed"))?;

    Ok(MirrorDeleteOutcome::Deleted(res.rows_affected()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SPEC: UpsertSpec = UpsertSpec {
        table: "supplier",
        columns: &["id", "name", "deleted", "payload", "synced_at"],
        conflict: &["id"],
    };

    #[test]
    fn statement_numbers_placeholders_per_row() {
        let sql = SPEC.statement(2);
        assert!(sql.starts_with("insert into supplier (id, name, deleted, payload, synced_at)"));
        assert!(sql.contains("($1, $2, $3, $4, $5), ($6, $7, $8, $9, $10)"));
        assert!(sql.contains("on conflict (id) do update set"));
        assert!(sql.contains("name = excluded.name"));
        assert!(!sql.contains("id = excluded.id"), "conflict key must not be updated");
    }

    #[test]
    fn all_conflict_columns_degrade_to_do_nothing() {
        let spec = UpsertSpec {
            table: "t",
            columns: &["a", "b"],
            conflict: &["a", "b"],
        };
        assert!(spec.statement(1).ends_with("do nothing"));
    }

    #[test]
    fn sanity_gate_allows_exactly_half() {
        assert!(sanity_gate_allows(1000, 500));
        assert!(!sanity_gate_allows(1000, 501));
        assert!(sanity_gate_allows(0, 0));
    }

    #[test]
    fn sanity_gate_blocks_eighty_percent_drop() {
        // 1000 local rows, upstream shrank to 200: 800 candidates.
        assert!(!sanity_gate_allows(1000, 800));
    }

    #[test]
    fn keyset_empty_detection() {
        assert!(KeySet::Uuid(vec![]).is_empty());
        assert!(!KeySet::I64(vec![1]).is_empty());
    }
}
