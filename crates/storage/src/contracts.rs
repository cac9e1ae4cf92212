use super::SqliteStore;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tokenwatch_core_types::{
    normalize_address, Chain, ContractRecord, RiskReport, TokenDetails, Verdict,
};

const CONTRACT_COLUMNS: &str = "address, deployer, chain, deployment_ts, token_name, token_symbol,
    token_decimals, verified, source_code, retry_count, risk_report_json, last_verdict, created_at";

impl SqliteStore {
    /// Returns `false` when a row for the address already exists; the existing
    /// row is left untouched.
    pub fn insert_contract_if_absent(&self, record: &ContractRecord) -> Result<bool> {
        let address = normalize_address(&record.address);
        let (token_name, token_symbol, token_decimals) = match &record.token_details {
            Some(details) => (
                Some(details.name.as_str()),
                Some(details.symbol.as_str()),
                Some(i64::from(details.decimals)),
            ),
            None => (None, None, None),
        };
        let risk_report_json = record
            .risk_report
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("failed to serialize risk report")?;
        let changed = self
            .execute_with_retry(|conn| {
                conn.execute(
                    "INSERT INTO contracts(
                        address, deployer, chain, deployment_ts, token_name, token_symbol,
                        token_decimals, verified, source_code, retry_count, risk_report_json,
                        last_verdict, created_at, updated_at
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)
                     ON CONFLICT(address) DO NOTHING",
                    params![
                        &address,
                        &record.deployer,
                        record.chain.as_str(),
                        record.deployment_ts.to_rfc3339(),
                        token_name,
                        token_symbol,
                        token_decimals,
                        record.verified,
                        record.source_code.as_deref(),
                        i64::from(record.retry_count),
                        risk_report_json,
                        record.last_verdict.map(Verdict::as_str),
                        record.created_at.to_rfc3339(),
                    ],
                )
            })
            .context("failed to insert contract record")?;
        Ok(changed > 0)
    }

    pub fn contract_exists(&self, address: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM contracts WHERE address = ?1 LIMIT 1",
                params![normalize_address(address)],
                |row| row.get(0),
            )
            .optional()
            .context("failed to check contract existence")?;
        Ok(found.is_some())
    }

    pub fn get_contract(&self, address: &str) -> Result<Option<ContractRecord>> {
        let sql = format!("SELECT {CONTRACT_COLUMNS} FROM contracts WHERE address = ?1 LIMIT 1");
        let row = self
            .conn
            .query_row(&sql, params![normalize_address(address)], read_contract_row)
            .optional()
            .context("failed to read contract record")?;
        row.transpose()
    }

    /// Records the sweeper still owns: unverified with retry budget left.
    pub fn list_contracts_pending_verification(
        &self,
        retry_limit: u32,
    ) -> Result<Vec<ContractRecord>> {
        let sql = format!(
            "SELECT {CONTRACT_COLUMNS} FROM contracts
             WHERE verified = 0 AND retry_count < ?1
             ORDER BY created_at ASC, address ASC"
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("failed to prepare pending verification query")?;
        let rows = stmt
            .query_map(params![i64::from(retry_limit)], read_contract_row)
            .context("failed to query contracts pending verification")?;
        let mut out = Vec::new();
        for row in rows {
            let record = row.context("failed to read pending verification row")??;
            out.push(record);
        }
        Ok(out)
    }

    /// Flips `verified` on; there is no path that flips it back.
    pub fn mark_contract_verified(
        &self,
        address: &str,
        source_code: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let address = normalize_address(address);
        self.execute_with_retry(|conn| {
            conn.execute(
                "UPDATE contracts
                 SET verified = 1, source_code = ?2, updated_at = ?3
                 WHERE address = ?1",
                params![&address, source_code, now.to_rfc3339()],
            )
        })
        .context("failed to mark contract verified")?;
        Ok(())
    }

    pub fn increment_contract_retry(&self, address: &str, now: DateTime<Utc>) -> Result<u32> {
        let address = normalize_address(address);
        self.execute_with_retry(|conn| {
            conn.execute(
                "UPDATE contracts
                 SET retry_count = retry_count + 1, updated_at = ?2
                 WHERE address = ?1",
                params![&address, now.to_rfc3339()],
            )
        })
        .context("failed to increment contract retry count")?;
        let retry_count: i64 = self
            .conn
            .query_row(
                "SELECT retry_count FROM contracts WHERE address = ?1",
                params![&address],
                |row| row.get(0),
            )
            .context("failed to read contract retry count")?;
        Ok(u32::try_from(retry_count.max(0)).unwrap_or(u32::MAX))
    }

    pub fn store_risk_report(
        &self,
        address: &str,
        report: &RiskReport,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let address = normalize_address(address);
        let report_json =
            serde_json::to_string(report).context("failed to serialize risk report")?;
        self.execute_with_retry(|conn| {
            conn.execute(
                "UPDATE contracts
                 SET risk_report_json = ?2, last_verdict = ?3, updated_at = ?4
                 WHERE address = ?1",
                params![
                    &address,
                    &report_json,
                    Verdict::Report.as_str(),
                    now.to_rfc3339()
                ],
            )
        })
        .context("failed to store risk report")?;
        Ok(())
    }

    pub fn record_contract_verdict(
        &self,
        address: &str,
        verdict: Verdict,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let address = normalize_address(address);
        self.execute_with_retry(|conn| {
            conn.execute(
                "UPDATE contracts SET last_verdict = ?2, updated_at = ?3 WHERE address = ?1",
                params![&address, verdict.as_str(), now.to_rfc3339()],
            )
        })
        .context("failed to record contract verdict")?;
        Ok(())
    }

    pub fn contract_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM contracts", [], |row| row.get(0))
            .context("failed to count contracts")?;
        Ok(count.max(0) as u64)
    }
}

fn read_contract_row(row: &Row<'_>) -> rusqlite::Result<Result<ContractRecord>> {
    let address: String = row.get(0)?;
    let deployer: String = row.get(1)?;
    let chain_raw: String = row.get(2)?;
    let deployment_ts_raw: String = row.get(3)?;
    let token_name: Option<String> = row.get(4)?;
    let token_symbol: Option<String> = row.get(5)?;
    let token_decimals: Option<i64> = row.get(6)?;
    let verified: bool = row.get(7)?;
    let source_code: Option<String> = row.get(8)?;
    let retry_count: i64 = row.get(9)?;
    let risk_report_json: Option<String> = row.get(10)?;
    let last_verdict_raw: Option<String> = row.get(11)?;
    let created_at_raw: String = row.get(12)?;

    Ok((|| -> Result<ContractRecord> {
        let chain = chain_raw
            .parse::<Chain>()
            .map_err(|error| anyhow!("contract {address}: {error}"))?;
        let token_details = match (token_name, token_symbol, token_decimals) {
            (Some(name), Some(symbol), Some(decimals)) => Some(TokenDetails {
                name,
                symbol,
                decimals: u8::try_from(decimals).unwrap_or(u8::MAX),
            }),
            _ => None,
        };
        let risk_report = risk_report_json
            .as_deref()
            .map(serde_json::from_str::<RiskReport>)
            .transpose()
            .with_context(|| format!("contract {address}: invalid risk_report_json"))?;
        Ok(ContractRecord {
            deployer,
            chain,
            deployment_ts: parse_rfc3339(&deployment_ts_raw)
                .with_context(|| format!("contract {address}: invalid deployment_ts"))?,
            token_details,
            verified,
            source_code,
            retry_count: u32::try_from(retry_count.max(0)).unwrap_or(u32::MAX),
            risk_report,
            last_verdict: last_verdict_raw.as_deref().and_then(Verdict::parse),
            created_at: parse_rfc3339(&created_at_raw)
                .with_context(|| format!("contract {address}: invalid created_at"))?,
            address,
        })
    })())
}

fn parse_rfc3339(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid rfc3339 timestamp: {raw}"))?
        .with_timezone(&Utc))
}
