//! SQLite-backed compute repository.

#![cfg(feature = "sqlite-persistence")]

use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::credits::Credits;
use crate::error::StoreError;
use crate::models::{
    ExecutionOutcome, ExecutionRecord, ExecutionStatus, Host, HostStatus, PaymentRecord,
    PaymentStatus, ServerDefinition, ServerVisibility, StatisticsDelta,
};
use crate::repository::ComputeRepository;

const HOST_COLUMNS: &str = "host_id, owner_id, name, endpoint, status, location, capabilities_json,
     primary_protocol, compatible_protocols_json, profit_share_percentage, total_executions,
     successful_executions, total_earnings_units, created_at_ms, updated_at_ms, last_seen_at_ms";

const EXECUTION_COLUMNS: &str = "execution_id, requester_id, host_id, server_name, protocol_type,
     function_name, parameters_json, status, cost_units, host_earnings_units,
     platform_earnings_units, created_at_ms, started_at_ms, completed_at_ms, execution_time_ms,
     error_message, result_json, settled_at_ms";

const PAYMENT_COLUMNS: &str =
    "payment_id, host_id, execution_id, amount_units, status, created_at_ms, paid_at_ms";

const SERVER_COLUMNS: &str = "server_id, owner_id, name, protocol_type, endpoint, visibility,
     description, code, app_url, created_at_ms";

#[derive(Clone)]
pub struct SqliteComputeRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteComputeRepository {
    pub fn new(db_path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)
            .map_err(|e| StoreError::Backend(format!("open sqlite compute repo: {}", e)))?;
        let repo = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        repo.ensure_schema()?;
        Ok(repo)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Backend("sqlite compute repo lock poisoned".to_string()))
    }

    fn ensure_schema(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS compute_hosts (
              host_id TEXT PRIMARY KEY,
              owner_id TEXT NOT NULL,
              name TEXT NOT NULL,
              endpoint TEXT NOT NULL,
              status TEXT NOT NULL,
              location TEXT NULL,
              capabilities_json TEXT NOT NULL,
              primary_protocol TEXT NOT NULL,
              compatible_protocols_json TEXT NOT NULL,
              profit_share_percentage INTEGER NOT NULL CHECK (profit_share_percentage BETWEEN 0 AND 100),
              total_executions INTEGER NOT NULL DEFAULT 0,
              successful_executions INTEGER NOT NULL DEFAULT 0,
              total_earnings_units INTEGER NOT NULL DEFAULT 0,
              created_at_ms INTEGER NOT NULL,
              updated_at_ms INTEGER NOT NULL,
              last_seen_at_ms INTEGER NULL
            );
            CREATE TABLE IF NOT EXISTS compute_executions (
              execution_id TEXT PRIMARY KEY,
              requester_id TEXT NOT NULL,
              host_id TEXT NULL REFERENCES compute_hosts(host_id),
              server_name TEXT NOT NULL,
              protocol_type TEXT NOT NULL,
              function_name TEXT NOT NULL,
              parameters_json TEXT NOT NULL,
              status TEXT NOT NULL,
              cost_units INTEGER NOT NULL,
              host_earnings_units INTEGER NULL,
              platform_earnings_units INTEGER NULL,
              created_at_ms INTEGER NOT NULL,
              started_at_ms INTEGER NULL,
              completed_at_ms INTEGER NULL,
              execution_time_ms INTEGER NULL,
              error_message TEXT NULL,
              result_json TEXT NULL,
              settled_at_ms INTEGER NULL
            );
            CREATE TABLE IF NOT EXISTS compute_payments (
              payment_id TEXT PRIMARY KEY,
              host_id TEXT NOT NULL REFERENCES compute_hosts(host_id),
              execution_id TEXT NOT NULL UNIQUE REFERENCES compute_executions(execution_id),
              amount_units INTEGER NOT NULL,
              status TEXT NOT NULL,
              created_at_ms INTEGER NOT NULL,
              paid_at_ms INTEGER NULL
            );
            CREATE TABLE IF NOT EXISTS compute_servers (
              server_id TEXT PRIMARY KEY,
              owner_id TEXT NOT NULL,
              name TEXT NOT NULL,
              protocol_type TEXT NOT NULL,
              endpoint TEXT NOT NULL,
              visibility TEXT NOT NULL,
              description TEXT NULL,
              code TEXT NULL,
              app_url TEXT NULL,
              created_at_ms INTEGER NOT NULL,
              UNIQUE(owner_id, name)
            );
            CREATE INDEX IF NOT EXISTS idx_compute_hosts_status ON compute_hosts(status);
            CREATE INDEX IF NOT EXISTS idx_compute_executions_requester ON compute_executions(requester_id, created_at_ms DESC);
            CREATE INDEX IF NOT EXISTS idx_compute_executions_created ON compute_executions(created_at_ms DESC);
            CREATE INDEX IF NOT EXISTS idx_compute_payments_host ON compute_payments(host_id, created_at_ms DESC);
            "#,
        )
        .map_err(|e| StoreError::Backend(format!("init sqlite compute schema: {}", e)))?;
        add_column_if_missing(&conn, "compute_executions", "settled_at_ms", "INTEGER NULL")?;
        Ok(())
    }

    fn query_hosts(
        conn: &Connection,
        filter_sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<Host>, StoreError> {
        let sql = format!(
            "SELECT {} FROM compute_hosts {} ORDER BY created_at_ms DESC, host_id ASC",
            HOST_COLUMNS, filter_sql
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| StoreError::Backend(format!("prepare list hosts: {}", e)))?;
        let rows = stmt
            .query_map(params, map_row_to_host)
            .map_err(|e| StoreError::Backend(format!("query hosts: {}", e)))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(map_rusqlite_err)?);
        }
        Ok(out)
    }

    fn query_payments(
        &self,
        filter_sql: &str,
        key: &str,
    ) -> Result<Vec<PaymentRecord>, StoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM compute_payments {} ORDER BY created_at_ms DESC, rowid DESC",
            PAYMENT_COLUMNS, filter_sql
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| StoreError::Backend(format!("prepare list payments: {}", e)))?;
        let rows = stmt
            .query_map(params![key], map_row_to_payment)
            .map_err(|e| StoreError::Backend(format!("query payments: {}", e)))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(map_rusqlite_err)?);
        }
        Ok(out)
    }
}

fn load_host(conn: &Connection, host_id: &str) -> Result<Option<Host>, StoreError> {
    conn.query_row(
        &format!("SELECT {} FROM compute_hosts WHERE host_id = ?1", HOST_COLUMNS),
        params![host_id],
        map_row_to_host,
    )
    .optional()
    .map_err(map_rusqlite_err)
}

fn load_execution(
    conn: &Connection,
    execution_id: &str,
) -> Result<Option<ExecutionRecord>, StoreError> {
    conn.query_row(
        &format!(
            "SELECT {} FROM compute_executions WHERE execution_id = ?1",
            EXECUTION_COLUMNS
        ),
        params![execution_id],
        map_row_to_execution,
    )
    .optional()
    .map_err(map_rusqlite_err)
}

fn load_execution_status(
    conn: &Connection,
    execution_id: &str,
) -> Result<ExecutionStatus, StoreError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT status FROM compute_executions WHERE execution_id = ?1",
            params![execution_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(map_rusqlite_err)?;
    let raw = raw.ok_or_else(|| StoreError::ExecutionNotFound(execution_id.to_string()))?;
    ExecutionStatus::from_str(&raw).map_err(StoreError::Backend)
}

/// Claim the settlement of a terminal execution; fails when it is missing,
/// not terminal, or already settled.
fn mark_settled_sql(
    conn: &Connection,
    execution_id: &str,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    let updated = conn
        .execute(
            "UPDATE compute_executions SET settled_at_ms = ?2
             WHERE execution_id = ?1
               AND settled_at_ms IS NULL
               AND status IN ('completed', 'failed')",
            params![execution_id, dt_to_ms(now)],
        )
        .map_err(|e| StoreError::Backend(format!("mark execution settled: {}", e)))?;
    if updated > 0 {
        return Ok(());
    }
    let current: Option<(String, Option<i64>)> = conn
        .query_row(
            "SELECT status, settled_at_ms FROM compute_executions WHERE execution_id = ?1",
            params![execution_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(map_rusqlite_err)?;
    match current {
        None => Err(StoreError::ExecutionNotFound(execution_id.to_string())),
        Some((_, Some(_))) => Err(StoreError::AlreadySettled(execution_id.to_string())),
        Some((raw, None)) => {
            let status = ExecutionStatus::from_str(&raw).map_err(StoreError::Backend)?;
            Err(StoreError::InvalidTransition {
                execution_id: execution_id.to_string(),
                from: status.as_str(),
                to: "settled",
            })
        }
    }
}

fn apply_delta_sql(
    conn: &Connection,
    host_id: &str,
    delta: &StatisticsDelta,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    // SQLite turns an overflowing integer sum into REAL, so the headroom is
    // checked in the WHERE clause instead.
    let updated = conn
        .execute(
            "UPDATE compute_hosts
             SET total_executions = total_executions + ?2,
                 successful_executions = successful_executions + ?3,
                 total_earnings_units = total_earnings_units + ?4,
                 last_seen_at_ms = ?5,
                 updated_at_ms = ?5
             WHERE host_id = ?1 AND total_earnings_units <= ?6 - ?4",
            params![
                host_id,
                i64::from(delta.executed),
                i64::from(delta.succeeded),
                delta.earnings_delta.minor_units(),
                dt_to_ms(now),
                i64::MAX
            ],
        )
        .map_err(|e| StoreError::Backend(format!("apply host statistics: {}", e)))?;
    if updated == 0 {
        return match load_host(conn, host_id)? {
            Some(_) => Err(StoreError::EarningsOverflow(host_id.to_string())),
            None => Err(StoreError::HostNotFound(host_id.to_string())),
        };
    }
    Ok(())
}

impl ComputeRepository for SqliteComputeRepository {
    fn insert_host(&self, host: &Host) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO compute_hosts ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                HOST_COLUMNS
            ),
            params![
                host.host_id,
                host.owner_id,
                host.name,
                host.endpoint,
                host.status.as_str(),
                host.location,
                to_json(&host.capabilities)?,
                host.primary_protocol.as_str(),
                to_json(&host.compatible_protocols)?,
                i64::from(host.profit_share_percentage),
                host.total_executions as i64,
                host.successful_executions as i64,
                host.total_earnings.minor_units(),
                dt_to_ms(host.created_at),
                dt_to_ms(host.updated_at),
                host.last_seen_at.map(dt_to_ms),
            ],
        )
        .map_err(|e| StoreError::Backend(format!("insert host: {}", e)))?;
        Ok(())
    }

    fn get_host(&self, host_id: &str) -> Result<Option<Host>, StoreError> {
        let conn = self.lock()?;
        load_host(&conn, host_id)
    }

    fn list_hosts(&self) -> Result<Vec<Host>, StoreError> {
        let conn = self.lock()?;
        Self::query_hosts(&conn, "", &[])
    }

    fn list_hosts_by_status(&self, status: HostStatus) -> Result<Vec<Host>, StoreError> {
        let conn = self.lock()?;
        Self::query_hosts(&conn, "WHERE status = ?1", &[&status.as_str()])
    }

    fn update_host_status(
        &self,
        host_id: &str,
        status: HostStatus,
        now: DateTime<Utc>,
    ) -> Result<Host, StoreError> {
        let conn = self.lock()?;
        let updated = conn
            .execute(
                "UPDATE compute_hosts SET status = ?2, updated_at_ms = ?3 WHERE host_id = ?1",
                params![host_id, status.as_str(), dt_to_ms(now)],
            )
            .map_err(|e| StoreError::Backend(format!("update host status: {}", e)))?;
        if updated == 0 {
            return Err(StoreError::HostNotFound(host_id.to_string()));
        }
        load_host(&conn, host_id)?.ok_or_else(|| StoreError::HostNotFound(host_id.to_string()))
    }

    fn update_profit_share(
        &self,
        host_id: &str,
        profit_share_percentage: u8,
        now: DateTime<Utc>,
    ) -> Result<Host, StoreError> {
        let conn = self.lock()?;
        let updated = conn
            .execute(
                "UPDATE compute_hosts SET profit_share_percentage = ?2, updated_at_ms = ?3 WHERE host_id = ?1",
                params![host_id, i64::from(profit_share_percentage), dt_to_ms(now)],
            )
            .map_err(|e| StoreError::Backend(format!("update profit share: {}", e)))?;
        if updated == 0 {
            return Err(StoreError::HostNotFound(host_id.to_string()));
        }
        load_host(&conn, host_id)?.ok_or_else(|| StoreError::HostNotFound(host_id.to_string()))
    }

    fn apply_host_statistics(
        &self,
        host_id: &str,
        delta: &StatisticsDelta,
        now: DateTime<Utc>,
    ) -> Result<Host, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::Backend(format!("begin host statistics tx: {}", e)))?;
        apply_delta_sql(&tx, host_id, delta, now)?;
        let host =
            load_host(&tx, host_id)?.ok_or_else(|| StoreError::HostNotFound(host_id.to_string()))?;
        tx.commit()
            .map_err(|e| StoreError::Backend(format!("commit host statistics tx: {}", e)))?;
        Ok(host)
    }

    fn record_settlement(
        &self,
        execution_id: &str,
        host_id: &str,
        delta: &StatisticsDelta,
        payment: Option<&PaymentRecord>,
        now: DateTime<Utc>,
    ) -> Result<Host, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::Backend(format!("begin settlement tx: {}", e)))?;
        mark_settled_sql(&tx, execution_id, now)?;
        if let Some(payment) = payment {
            match tx.execute(
                &format!(
                    "INSERT INTO compute_payments ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    PAYMENT_COLUMNS
                ),
                params![
                    payment.payment_id,
                    payment.host_id,
                    payment.execution_id,
                    payment.amount.minor_units(),
                    payment.status.as_str(),
                    dt_to_ms(payment.created_at),
                    payment.paid_at.map(dt_to_ms),
                ],
            ) {
                Ok(_) => {}
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == ErrorCode::ConstraintViolation =>
                {
                    return Err(StoreError::Backend(format!(
                        "payment already recorded for execution: {}",
                        payment.execution_id
                    )));
                }
                Err(e) => return Err(StoreError::Backend(format!("insert payment: {}", e))),
            }
        }
        apply_delta_sql(&tx, host_id, delta, now)?;
        let host =
            load_host(&tx, host_id)?.ok_or_else(|| StoreError::HostNotFound(host_id.to_string()))?;
        tx.commit()
            .map_err(|e| StoreError::Backend(format!("commit settlement tx: {}", e)))?;
        Ok(host)
    }

    fn insert_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO compute_executions ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
                EXECUTION_COLUMNS
            ),
            params![
                record.execution_id,
                record.requester_id,
                record.host_id,
                record.server_name,
                record.protocol_type.as_str(),
                record.function_name,
                to_json(&record.parameters)?,
                record.status.as_str(),
                record.cost.minor_units(),
                record.host_earnings.map(Credits::minor_units),
                record.platform_earnings.map(Credits::minor_units),
                dt_to_ms(record.created_at),
                record.started_at.map(dt_to_ms),
                record.completed_at.map(dt_to_ms),
                record.execution_time_ms.map(|ms| ms as i64),
                record.error_message,
                record.result.as_ref().map(to_json).transpose()?,
                record.settled_at.map(dt_to_ms),
            ],
        )
        .map_err(|e| StoreError::Backend(format!("insert execution: {}", e)))?;
        Ok(())
    }

    fn get_execution(&self, execution_id: &str) -> Result<Option<ExecutionRecord>, StoreError> {
        let conn = self.lock()?;
        load_execution(&conn, execution_id)
    }

    fn mark_execution_running(
        &self,
        execution_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<ExecutionRecord, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::Backend(format!("begin mark running tx: {}", e)))?;
        let updated = tx
            .execute(
                "UPDATE compute_executions SET status = 'running', started_at_ms = ?2
                 WHERE execution_id = ?1 AND status = 'pending'",
                params![execution_id, dt_to_ms(started_at)],
            )
            .map_err(|e| StoreError::Backend(format!("mark execution running: {}", e)))?;
        if updated == 0 {
            let current = load_execution_status(&tx, execution_id)?;
            return Err(StoreError::invalid_transition(
                execution_id,
                current,
                ExecutionStatus::Running,
            ));
        }
        let record = load_execution(&tx, execution_id)?
            .ok_or_else(|| StoreError::ExecutionNotFound(execution_id.to_string()))?;
        tx.commit()
            .map_err(|e| StoreError::Backend(format!("commit mark running tx: {}", e)))?;
        Ok(record)
    }

    fn finalize_execution(
        &self,
        execution_id: &str,
        outcome: &ExecutionOutcome,
        completed_at: DateTime<Utc>,
    ) -> Result<ExecutionRecord, StoreError> {
        let (result_json, error_message) = match outcome {
            ExecutionOutcome::Completed { result, .. } => (Some(to_json(result)?), None),
            ExecutionOutcome::Failed { error_message, .. } => (None, Some(error_message.clone())),
        };
        let earnings = outcome.earnings();
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::Backend(format!("begin finalize tx: {}", e)))?;
        let updated = tx
            .execute(
                "UPDATE compute_executions
                 SET status = ?2,
                     result_json = ?3,
                     error_message = ?4,
                     execution_time_ms = ?5,
                     host_earnings_units = ?6,
                     platform_earnings_units = ?7,
                     completed_at_ms = ?8
                 WHERE execution_id = ?1 AND status = 'running'",
                params![
                    execution_id,
                    outcome.status().as_str(),
                    result_json,
                    error_message,
                    outcome.execution_time_ms() as i64,
                    earnings.host.minor_units(),
                    earnings.platform.minor_units(),
                    dt_to_ms(completed_at),
                ],
            )
            .map_err(|e| StoreError::Backend(format!("finalize execution: {}", e)))?;
        if updated == 0 {
            let current = load_execution_status(&tx, execution_id)?;
            if current.is_terminal() {
                return Err(StoreError::AlreadyFinalized {
                    execution_id: execution_id.to_string(),
                    status: current.as_str(),
                });
            }
            return Err(StoreError::invalid_transition(
                execution_id,
                current,
                outcome.status(),
            ));
        }
        let record = load_execution(&tx, execution_id)?
            .ok_or_else(|| StoreError::ExecutionNotFound(execution_id.to_string()))?;
        tx.commit()
            .map_err(|e| StoreError::Backend(format!("commit finalize tx: {}", e)))?;
        Ok(record)
    }

    fn list_recent_executions(
        &self,
        requester_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM compute_executions
             WHERE (?1 IS NULL OR requester_id = ?1)
             ORDER BY created_at_ms DESC, rowid DESC
             LIMIT ?2",
            EXECUTION_COLUMNS
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| StoreError::Backend(format!("prepare list executions: {}", e)))?;
        let rows = stmt
            .query_map(params![requester_id, limit as i64], map_row_to_execution)
            .map_err(|e| StoreError::Backend(format!("query executions: {}", e)))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(map_rusqlite_err)?);
        }
        Ok(out)
    }

    fn list_payments_for_host(&self, host_id: &str) -> Result<Vec<PaymentRecord>, StoreError> {
        self.query_payments("WHERE host_id = ?1", host_id)
    }

    fn list_payments_for_execution(
        &self,
        execution_id: &str,
    ) -> Result<Vec<PaymentRecord>, StoreError> {
        self.query_payments("WHERE execution_id = ?1", execution_id)
    }

    fn insert_server(&self, server: &ServerDefinition) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let visibility = match server.visibility {
            ServerVisibility::Public => "public",
            ServerVisibility::Private => "private",
        };
        match conn.execute(
            &format!(
                "INSERT INTO compute_servers ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                SERVER_COLUMNS
            ),
            params![
                server.server_id,
                server.owner_id,
                server.name,
                server.protocol_type.as_str(),
                server.endpoint,
                visibility,
                server.description,
                server.code,
                server.app_url,
                dt_to_ms(server.created_at),
            ],
        ) {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::DuplicateServer(server.name.clone()))
            }
            Err(e) => Err(StoreError::Backend(format!("insert server: {}", e))),
        }
    }

    fn list_servers(&self) -> Result<Vec<ServerDefinition>, StoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM compute_servers ORDER BY created_at_ms DESC, rowid DESC",
            SERVER_COLUMNS
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| StoreError::Backend(format!("prepare list servers: {}", e)))?;
        let rows = stmt
            .query_map([], map_row_to_server)
            .map_err(|e| StoreError::Backend(format!("query servers: {}", e)))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(map_rusqlite_err)?);
        }
        Ok(out)
    }
}

fn map_row_to_host(row: &Row) -> rusqlite::Result<Host> {
    Ok(Host {
        host_id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        endpoint: row.get(3)?,
        status: parse_column(4, &row.get::<_, String>(4)?)?,
        location: row.get(5)?,
        capabilities: json_column(6, &row.get::<_, String>(6)?)?,
        primary_protocol: parse_column(7, &row.get::<_, String>(7)?)?,
        compatible_protocols: json_column(8, &row.get::<_, String>(8)?)?,
        profit_share_percentage: row.get::<_, i64>(9)?.clamp(0, 100) as u8,
        total_executions: row.get::<_, i64>(10)? as u64,
        successful_executions: row.get::<_, i64>(11)? as u64,
        total_earnings: Credits::from_minor_units(row.get(12)?),
        created_at: ms_to_dt(row.get(13)?),
        updated_at: ms_to_dt(row.get(14)?),
        last_seen_at: row.get::<_, Option<i64>>(15)?.map(ms_to_dt),
    })
}

fn map_row_to_execution(row: &Row) -> rusqlite::Result<ExecutionRecord> {
    Ok(ExecutionRecord {
        execution_id: row.get(0)?,
        requester_id: row.get(1)?,
        host_id: row.get(2)?,
        server_name: row.get(3)?,
        protocol_type: parse_column(4, &row.get::<_, String>(4)?)?,
        function_name: row.get(5)?,
        parameters: json_column(6, &row.get::<_, String>(6)?)?,
        status: parse_column(7, &row.get::<_, String>(7)?)?,
        cost: Credits::from_minor_units(row.get(8)?),
        host_earnings: row.get::<_, Option<i64>>(9)?.map(Credits::from_minor_units),
        platform_earnings: row
            .get::<_, Option<i64>>(10)?
            .map(Credits::from_minor_units),
        created_at: ms_to_dt(row.get(11)?),
        started_at: row.get::<_, Option<i64>>(12)?.map(ms_to_dt),
        completed_at: row.get::<_, Option<i64>>(13)?.map(ms_to_dt),
        execution_time_ms: row.get::<_, Option<i64>>(14)?.map(|ms| ms as u64),
        error_message: row.get(15)?,
        result: row
            .get::<_, Option<String>>(16)?
            .map(|raw| json_column(16, &raw))
            .transpose()?,
        settled_at: row.get::<_, Option<i64>>(17)?.map(ms_to_dt),
    })
}

fn map_row_to_payment(row: &Row) -> rusqlite::Result<PaymentRecord> {
    let status = match row.get::<_, String>(4)?.as_str() {
        "paid" => PaymentStatus::Paid,
        _ => PaymentStatus::Pending,
    };
    Ok(PaymentRecord {
        payment_id: row.get(0)?,
        host_id: row.get(1)?,
        execution_id: row.get(2)?,
        amount: Credits::from_minor_units(row.get(3)?),
        status,
        created_at: ms_to_dt(row.get(5)?),
        paid_at: row.get::<_, Option<i64>>(6)?.map(ms_to_dt),
    })
}

fn map_row_to_server(row: &Row) -> rusqlite::Result<ServerDefinition> {
    let visibility = match row.get::<_, String>(5)?.as_str() {
        "public" => ServerVisibility::Public,
        _ => ServerVisibility::Private,
    };
    Ok(ServerDefinition {
        server_id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        protocol_type: parse_column(3, &row.get::<_, String>(3)?)?,
        endpoint: row.get(4)?,
        visibility,
        description: row.get(6)?,
        code: row.get(7)?,
        app_url: row.get(8)?,
        created_at: ms_to_dt(row.get(9)?),
    })
}

fn parse_column<T: FromStr<Err = String>>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    T::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn json_column<T: DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Backend(format!("encode json: {}", e)))
}

fn dt_to_ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn ms_to_dt(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(Utc::now)
}

fn map_rusqlite_err(err: rusqlite::Error) -> StoreError {
    StoreError::Backend(format!("sqlite compute repo: {}", err))
}

fn add_column_if_missing(
    conn: &Connection,
    table: &str,
    column: &str,
    column_def: &str,
) -> Result<(), StoreError> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({})", table))
        .map_err(|e| StoreError::Backend(format!("prepare table_info {}: {}", table, e)))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(|e| StoreError::Backend(format!("query table_info {}: {}", table, e)))?;
    for name in names {
        if name.map_err(map_rusqlite_err)? == column {
            return Ok(());
        }
    }
    conn.execute(
        &format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, column_def),
        [],
    )
    .map_err(|e| StoreError::Backend(format!("alter table {} add {}: {}", table, column, e)))?;
    Ok(())
}
