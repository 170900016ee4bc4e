//! `SQLite`-backed implementation of [`StateBackend`] and [`BreakerStore`].
//!
//! Uses a single `Mutex<Connection>` for thread safety. Several backends may
//! open the same file; every breaker mutation is a single statement, so
//! counters stay consistent across processes.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use funnel_types::breaker::{truncate_error, BreakerSnapshot, CircuitState, HealthCounters};
use funnel_types::state::{FilterFingerprint, FilterHistoryEntry, FilterStaleness, LeadRunRecord};
use funnel_types::{Platform, Profile, Run, RunId, Stage};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension};

use crate::backend::{BreakerStore, StateBackend};
use crate::error::{self, StateError};

/// Idempotent DDL for state tables.
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS runs (
    id TEXT PRIMARY KEY,
    platform TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    data TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS leads (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    platform TEXT NOT NULL,
    platform_id TEXT NOT NULL,
    display_name TEXT,
    url TEXT,
    email TEXT,
    follower_count INTEGER,
    first_seen_at TEXT NOT NULL,
    last_seen_at TEXT NOT NULL,
    UNIQUE (platform, platform_id)
);

CREATE TABLE IF NOT EXISTS lead_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    lead_id INTEGER NOT NULL REFERENCES leads(id),
    run_id TEXT NOT NULL,
    stage_reached TEXT NOT NULL,
    prescreen_passed INTEGER,
    prescreen_reason TEXT,
    lead_score REAL,
    tier TEXT,
    synced_to_crm INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_lead_runs_run ON lead_runs (run_id);

CREATE TABLE IF NOT EXISTS filter_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    filter_hash TEXT NOT NULL,
    platform TEXT NOT NULL,
    run_id TEXT NOT NULL,
    total_found INTEGER NOT NULL,
    new_found INTEGER NOT NULL,
    novelty_rate REAL NOT NULL,
    ran_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_filter_history_hash ON filter_history (filter_hash);

CREATE TABLE IF NOT EXISTS breaker_state (
    service TEXT PRIMARY KEY,
    state TEXT NOT NULL DEFAULT 'closed',
    failure_count INTEGER NOT NULL DEFAULT 0,
    last_failure_ms INTEGER
);

CREATE TABLE IF NOT EXISTS breaker_health (
    service TEXT PRIMARY KEY,
    total_success INTEGER NOT NULL DEFAULT 0,
    total_failure INTEGER NOT NULL DEFAULT 0,
    last_success TEXT,
    last_failure TEXT,
    last_error TEXT
);
";

/// `SQLite`-backed state storage.
///
/// Create with [`SqliteStateBackend::open`] for file-backed persistence
/// or [`SqliteStateBackend::in_memory`] for tests.
pub struct SqliteStateBackend {
    conn: Mutex<Connection>,
}

impl SqliteStateBackend {
    /// Open or create a `SQLite` state database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directory can't be created,
    /// or [`StateError::Sqlite`] if the database can't be opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory `SQLite` backend (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Sqlite`] if the in-memory database can't
    /// be initialized.
    pub fn in_memory() -> error::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection lock.
    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StateError::LockPoisoned)
    }

    /// RFC 3339 with fixed precision so stored strings sort chronologically.
    fn format_ts(ts: DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn now_ts() -> String {
        Self::format_ts(Utc::now())
    }

    fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    }

    fn parse_text<T>(idx: usize, raw: &str) -> rusqlite::Result<T>
    where
        T: std::str::FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        raw.parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    }

    fn decode_run(data: &str) -> error::Result<Run> {
        Ok(serde_json::from_str(data)?)
    }

    fn lead_outcome(run: &Run, profile: &Profile) -> LeadRunRecord {
        let stage_reached = profile.stage_reached();
        let (prescreen_passed, prescreen_reason) = match profile.pre_screen() {
            Some((passed, reason)) => (Some(passed), reason.map(str::to_string)),
            None if stage_reached > Stage::PreScreen => (Some(true), None),
            None => (None, None),
        };
        let score = profile.score();
        LeadRunRecord {
            platform: run.platform,
            platform_id: profile.platform_id().to_string(),
            run_id: run.id.clone(),
            stage_reached,
            prescreen_passed,
            prescreen_reason,
            lead_score: score.map(|(s, _)| s),
            tier: score.map(|(_, t)| t),
            synced_to_crm: profile.crm_contact().is_some(),
        }
    }
}

impl StateBackend for SqliteStateBackend {
    fn save_run(&self, run: &Run) -> error::Result<()> {
        let data = serde_json::to_string(run)?;
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO runs (id, platform, status, created_at, updated_at, data) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT(id) DO UPDATE SET status = ?3, updated_at = ?5, data = ?6",
            rusqlite::params![
                run.id.as_str(),
                run.platform.as_str(),
                run.status.as_str(),
                Self::format_ts(run.created_at),
                Self::format_ts(run.updated_at),
                data,
            ],
        )?;
        Ok(())
    }

    fn load_run(&self, id: &RunId) -> error::Result<Option<Run>> {
        let conn = self.lock_conn()?;
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM runs WHERE id = ?1",
                [id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        data.as_deref().map(Self::decode_run).transpose()
    }

    #[allow(clippy::cast_possible_wrap)]
    fn list_runs(&self, limit: usize) -> error::Result<Vec<Run>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT data FROM runs ORDER BY created_at DESC, rowid DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([limit as i64], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.iter().map(|data| Self::decode_run(data)).collect()
    }

    #[allow(clippy::cast_possible_wrap)]
    fn persist_lead_results(&self, run: &Run, profiles: &[Profile]) -> error::Result<u64> {
        if profiles.is_empty() {
            return Ok(0);
        }

        let conn = self.lock_conn()?;
        let tx = conn.unchecked_transaction()?;
        let now = Self::now_ts();
        let mut upsert = tx.prepare(
            "INSERT INTO leads \
             (platform, platform_id, display_name, url, email, follower_count, first_seen_at, last_seen_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7) \
             ON CONFLICT(platform, platform_id) DO UPDATE SET \
             display_name = COALESCE(excluded.display_name, leads.display_name), \
             url = COALESCE(excluded.url, leads.url), \
             email = COALESCE(excluded.email, leads.email), \
             follower_count = COALESCE(excluded.follower_count, leads.follower_count), \
             last_seen_at = excluded.last_seen_at \
             RETURNING id",
        )?;
        let mut link = tx.prepare(
            "INSERT INTO lead_runs \
             (lead_id, run_id, stage_reached, prescreen_passed, prescreen_reason, lead_score, tier, synced_to_crm) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;

        let mut count = 0u64;
        for profile in profiles {
            let outcome = Self::lead_outcome(run, profile);
            let lead_id: i64 = upsert.query_row(
                rusqlite::params![
                    run.platform.as_str(),
                    outcome.platform_id,
                    profile.identity.display_name,
                    profile.identity.url,
                    profile.email(),
                    profile.follower_count().map(|n| n as i64),
                    now,
                ],
                |row| row.get(0),
            )?;
            link.execute(rusqlite::params![
                lead_id,
                outcome.run_id.as_str(),
                outcome.stage_reached.as_str(),
                outcome.prescreen_passed,
                outcome.prescreen_reason,
                outcome.lead_score,
                outcome.tier.map(|t| t.as_str()),
                outcome.synced_to_crm,
            ])?;
            count += 1;
        }
        drop(upsert);
        drop(link);
        tx.commit()?;

        tracing::debug!(run_id = %run.id, leads = count, "Persisted lead results");
        Ok(count)
    }

    fn dedup_profiles(
        &self,
        profiles: Vec<Profile>,
        platform: Platform,
    ) -> error::Result<(Vec<Profile>, u64)> {
        let total = profiles.len();
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT 1 FROM leads WHERE platform = ?1 AND platform_id = ?2 LIMIT 1",
        )?;

        let mut fresh = Vec::with_capacity(total);
        let mut skipped = 0u64;
        for profile in profiles {
            let known = stmt.exists(rusqlite::params![platform.as_str(), profile.platform_id()])?;
            if known {
                skipped += 1;
            } else {
                fresh.push(profile);
            }
        }

        tracing::info!(
            platform = %platform,
            total,
            new = fresh.len(),
            duplicates = skipped,
            "Deduplicated discovery output"
        );
        Ok((fresh, skipped))
    }

    #[allow(clippy::cast_possible_wrap)]
    fn record_filter_history(&self, entry: &FilterHistoryEntry) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO filter_history \
             (filter_hash, platform, run_id, total_found, new_found, novelty_rate, ran_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                entry.fingerprint.as_str(),
                entry.platform.as_str(),
                entry.run_id.as_str(),
                entry.total_found as i64,
                entry.new_found as i64,
                entry.novelty_rate(),
                Self::now_ts(),
            ],
        )?;
        Ok(())
    }

    #[allow(clippy::cast_sign_loss)]
    fn filter_staleness(
        &self,
        fingerprint: &FilterFingerprint,
    ) -> error::Result<Option<FilterStaleness>> {
        let conn = self.lock_conn()?;
        let row = conn
            .query_row(
                "SELECT ran_at, novelty_rate, total_found, new_found FROM filter_history \
                 WHERE filter_hash = ?1 ORDER BY id DESC LIMIT 1",
                [fingerprint.as_str()],
                |row| {
                    let ran_at: String = row.get(0)?;
                    let rate: f64 = row.get(1)?;
                    let total: i64 = row.get(2)?;
                    let new: i64 = row.get(3)?;
                    Ok((Self::parse_ts(0, &ran_at)?, rate, total, new))
                },
            )
            .optional()?;

        Ok(row.map(|(ran_at, rate, total, new)| FilterStaleness {
            last_used_at: ran_at,
            days_since_last_run: (Utc::now() - ran_at).num_days(),
            novelty_pct: (rate * 1000.0).round() / 10.0,
            total_found: total.max(0) as u64,
            new_found: new.max(0) as u64,
        }))
    }

    fn lead_results(&self, run: &RunId) -> error::Result<Vec<LeadRunRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT l.platform, l.platform_id, r.stage_reached, r.prescreen_passed, \
             r.prescreen_reason, r.lead_score, r.tier, r.synced_to_crm \
             FROM lead_runs r JOIN leads l ON l.id = r.lead_id \
             WHERE r.run_id = ?1 ORDER BY r.id",
        )?;
        let rows = stmt
            .query_map([run.as_str()], |row| {
                let platform: String = row.get(0)?;
                let stage: String = row.get(2)?;
                let tier: Option<String> = row.get(6)?;
                Ok(LeadRunRecord {
                    platform: Self::parse_text(0, &platform)?,
                    platform_id: row.get(1)?,
                    run_id: run.clone(),
                    stage_reached: Self::parse_text(2, &stage)?,
                    prescreen_passed: row.get(3)?,
                    prescreen_reason: row.get(4)?,
                    lead_score: row.get(5)?,
                    tier: tier.as_deref().map(|t| Self::parse_text(6, t)).transpose()?,
                    synced_to_crm: row.get(7)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

impl BreakerStore for SqliteStateBackend {
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    fn snapshot(&self, service: &str) -> error::Result<BreakerSnapshot> {
        let conn = self.lock_conn()?;
        let row = conn
            .query_row(
                "SELECT state, failure_count, last_failure_ms FROM breaker_state WHERE service = ?1",
                [service],
                |row| {
                    let state: String = row.get(0)?;
                    let count: i64 = row.get(1)?;
                    let last: Option<i64> = row.get(2)?;
                    Ok(BreakerSnapshot {
                        state: CircuitState::from_stored(&state),
                        failure_count: count.clamp(0, i64::from(u32::MAX)) as u32,
                        last_failure_ms: last,
                    })
                },
            )
            .optional()?;
        Ok(row.unwrap_or_default())
    }

    fn set_state(&self, service: &str, state: CircuitState) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO breaker_state (service, state) VALUES (?1, ?2) \
             ON CONFLICT(service) DO UPDATE SET state = ?2",
            rusqlite::params![service, state.as_str()],
        )?;
        Ok(())
    }

    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    fn increment_failures(&self, service: &str, at_ms: i64) -> error::Result<u32> {
        let conn = self.lock_conn()?;
        let count: i64 = conn.query_row(
            "INSERT INTO breaker_state (service, state, failure_count, last_failure_ms) \
             VALUES (?1, 'closed', 1, ?2) \
             ON CONFLICT(service) DO UPDATE SET \
             failure_count = failure_count + 1, last_failure_ms = ?2 \
             RETURNING failure_count",
            rusqlite::params![service, at_ms],
            |row| row.get(0),
        )?;
        Ok(count.clamp(0, i64::from(u32::MAX)) as u32)
    }

    fn close(&self, service: &str) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO breaker_state (service, state, failure_count) VALUES (?1, 'closed', 0) \
             ON CONFLICT(service) DO UPDATE SET state = 'closed', failure_count = 0",
            [service],
        )?;
        Ok(())
    }

    fn record_success(&self, service: &str) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO breaker_health (service, total_success, last_success) VALUES (?1, 1, ?2) \
             ON CONFLICT(service) DO UPDATE SET \
             total_success = total_success + 1, last_success = ?2",
            rusqlite::params![service, Self::now_ts()],
        )?;
        Ok(())
    }

    fn record_failure(&self, service: &str, message: &str) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO breaker_health (service, total_failure, last_failure, last_error) \
             VALUES (?1, 1, ?2, ?3) \
             ON CONFLICT(service) DO UPDATE SET \
             total_failure = total_failure + 1, last_failure = ?2, last_error = ?3",
            rusqlite::params![service, Self::now_ts(), truncate_error(message)],
        )?;
        Ok(())
    }

    #[allow(clippy::cast_sign_loss)]
    fn health(&self, service: &str) -> error::Result<HealthCounters> {
        let conn = self.lock_conn()?;
        let row = conn
            .query_row(
                "SELECT total_success, total_failure, last_success, last_failure, last_error \
                 FROM breaker_health WHERE service = ?1",
                [service],
                |row| {
                    let ok: i64 = row.get(0)?;
                    let failed: i64 = row.get(1)?;
                    let last_success: Option<String> = row.get(2)?;
                    let last_failure: Option<String> = row.get(3)?;
                    Ok(HealthCounters {
                        total_success: ok.max(0) as u64,
                        total_failure: failed.max(0) as u64,
                        last_success: last_success
                            .as_deref()
                            .map(|s| Self::parse_ts(2, s))
                            .transpose()?,
                        last_failure: last_failure
                            .as_deref()
                            .map(|s| Self::parse_ts(3, s))
                            .transpose()?,
                        last_error: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(row.unwrap_or_default())
    }
}
