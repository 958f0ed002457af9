//! Snowflake session over the REST endpoints the official drivers speak.
//!
//! Login trades user/password for a session token scoped to one
//! warehouse/database/schema. Statements are posted with positional bindings
//! and answered with a JSON rowset, optionally split into chunks that are
//! fetched from pre-signed URLs.

use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use uuid::Uuid;

use shelf_kernel::settings::WarehouseSettings;

use crate::{Connection, Connector, DbError, Param, QueryResult, Row};

const LOGIN_PATH: &str = "/session/v1/login-request";
const QUERY_PATH: &str = "/queries/v1/query-request";
const SESSION_PATH: &str = "/session";

const SNOWFLAKE_ACCEPT: &str = "application/snowflake";
const CLIENT_APP_ID: &str = "shelf";

/// Statement accepted but still executing; poll `getResultUrl`.
const QUERY_IN_PROGRESS: &str = "333333";
const QUERY_IN_PROGRESS_ASYNC: &str = "333334";

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    success: bool,
    #[serde(default, deserialize_with = "code_as_string")]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Value,
}

impl Envelope {
    fn code(&self) -> String {
        self.code.clone().unwrap_or_default()
    }

    fn message(&self) -> String {
        self.message.clone().unwrap_or_default()
    }

    fn in_progress(&self) -> bool {
        matches!(
            self.code.as_deref(),
            Some(QUERY_IN_PROGRESS | QUERY_IN_PROGRESS_ASYNC)
        )
    }
}

fn code_as_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(code)) => Some(code),
        Some(other) => Some(other.to_string()),
    })
}

#[derive(Debug, Deserialize)]
struct LoginData {
    token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryData {
    #[serde(default)]
    rowtype: Vec<ColumnType>,
    #[serde(default)]
    rowset: Vec<Vec<Option<String>>>,
    #[serde(default)]
    chunks: Vec<Chunk>,
    #[serde(default)]
    chunk_headers: HashMap<String, String>,
    #[serde(default)]
    stats: Option<Stats>,
    #[serde(default)]
    get_result_url: Option<String>,
    #[serde(default)]
    query_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ColumnType {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Chunk {
    url: String,
    row_count: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Stats {
    #[serde(default)]
    num_rows_inserted: u64,
    #[serde(default)]
    num_rows_updated: u64,
    #[serde(default)]
    num_rows_deleted: u64,
}

impl Stats {
    fn total(&self) -> u64 {
        self.num_rows_inserted + self.num_rows_updated + self.num_rows_deleted
    }
}

fn authorization(token: &str) -> String {
    format!("Snowflake Token=\"{}\"", token)
}

fn decode<T: serde::de::DeserializeOwned>(what: &str, data: Value) -> Result<T, DbError> {
    serde_json::from_value(data).map_err(|err| DbError::Protocol(format!("{}: {}", what, err)))
}

fn bindings(params: &[Param]) -> Value {
    let map: serde_json::Map<String, Value> = params
        .iter()
        .enumerate()
        .map(|(idx, param)| {
            let (kind, value) = match param {
                Param::Int(value) => ("FIXED", value.to_string()),
                Param::Text(value) => ("TEXT", value.clone()),
            };
            ((idx + 1).to_string(), json!({ "type": kind, "value": value }))
        })
        .collect();
    Value::Object(map)
}

/// DML statements without `stats` report their counts as summary columns
/// named "number of rows inserted/updated/deleted".
fn dml_summary(columns: &[String], rows: &[Row]) -> u64 {
    let Some(first) = rows.first() else {
        return 0;
    };
    columns
        .iter()
        .enumerate()
        .filter(|(_, name)| name.starts_with("number of rows"))
        .filter_map(|(idx, _)| first.int(idx).ok())
        .map(|count| count.max(0) as u64)
        .sum()
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

/// Opens one Snowflake session per [`Connector::connect`] call.
pub struct SnowflakeConnector {
    http: reqwest::Client,
    base_url: String,
    settings: WarehouseSettings,
}

impl SnowflakeConnector {
    pub fn new(settings: &WarehouseSettings) -> Result<Self, DbError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(settings.connect_timeout_ms))
            .user_agent(concat!("shelf/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: settings.base_url(),
            settings: settings.clone(),
        })
    }

    /// Account locator without region or cloud suffix.
    fn account_name(&self) -> &str {
        self.settings
            .account
            .split('.')
            .next()
            .unwrap_or(&self.settings.account)
    }

    async fn login(&self) -> Result<String, DbError> {
        let request_id = Uuid::now_v7().to_string();
        let body = json!({
            "data": {
                "CLIENT_APP_ID": CLIENT_APP_ID,
                "CLIENT_APP_VERSION": env!("CARGO_PKG_VERSION"),
                "ACCOUNT_NAME": self.account_name(),
                "LOGIN_NAME": self.settings.user,
                "PASSWORD": self.settings.password,
            }
        });

        let envelope: Envelope = self
            .http
            .post(format!("{}{}", self.base_url, LOGIN_PATH))
            .query(&[
                ("warehouse", self.settings.warehouse.as_str()),
                ("databaseName", self.settings.database.as_str()),
                ("schemaName", self.settings.schema.as_str()),
                ("request_id", request_id.as_str()),
            ])
            .header(ACCEPT, "application/json")
            .timeout(Duration::from_millis(self.settings.connect_timeout_ms))
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !envelope.success {
            return Err(DbError::Login {
                code: envelope.code(),
                message: envelope.message(),
            });
        }

        let data: LoginData = decode("login response", envelope.data)?;
        Ok(data.token)
    }
}

#[async_trait]
impl Connector for SnowflakeConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>, DbError> {
        let token = self.login().await?;

        tracing::debug!(
            account = %self.settings.account,
            warehouse = %self.settings.warehouse,
            "warehouse session opened"
        );

        Ok(Box::new(SnowflakeSession {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            token: Some(token),
            sequence_id: 0,
            query_timeout: Duration::from_millis(self.settings.query_timeout_ms),
        }))
    }
}

struct SnowflakeSession {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
    sequence_id: u64,
    query_timeout: Duration,
}

impl SnowflakeSession {
    fn resolve(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}{}", self.base_url, url)
        }
    }

    async fn poll(&self, token: &str, url: &str) -> Result<Envelope, DbError> {
        let envelope = self
            .http
            .get(self.resolve(url))
            .header(AUTHORIZATION, authorization(token))
            .header(ACCEPT, SNOWFLAKE_ACCEPT)
            .timeout(self.query_timeout)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(envelope)
    }

    async fn fetch_chunk(
        &self,
        chunk: &Chunk,
        headers: &HashMap<String, String>,
    ) -> Result<Vec<Row>, DbError> {
        let mut request = self.http.get(&chunk.url).timeout(self.query_timeout);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let body = request.send().await?.error_for_status()?.text().await?;

        // Chunks are a comma-separated run of row arrays with no outer brackets.
        let rows: Vec<Vec<Option<String>>> = serde_json::from_str(&format!("[{}]", body))
            .map_err(|err| DbError::Protocol(format!("result chunk: {}", err)))?;

        if rows.len() != chunk.row_count {
            return Err(DbError::Protocol(format!(
                "result chunk announced {} rows but held {}",
                chunk.row_count,
                rows.len()
            )));
        }

        Ok(rows.into_iter().map(Row).collect())
    }

    async fn collect(&self, data: QueryData) -> Result<QueryResult, DbError> {
        let columns: Vec<String> = data.rowtype.into_iter().map(|column| column.name).collect();
        let mut rows: Vec<Row> = data.rowset.into_iter().map(Row).collect();

        for chunk in &data.chunks {
            rows.extend(self.fetch_chunk(chunk, &data.chunk_headers).await?);
        }

        let rows_affected = match &data.stats {
            Some(stats) => stats.total(),
            None => dml_summary(&columns, &rows),
        };

        Ok(QueryResult {
            columns,
            rows,
            rows_affected,
        })
    }
}

#[async_trait]
impl Connection for SnowflakeSession {
    async fn query(&mut self, sql: &str, params: &[Param]) -> Result<QueryResult, DbError> {
        let token = self.token.clone().ok_or(DbError::Closed)?;
        self.sequence_id += 1;

        let mut body = json!({
            "sqlText": sql,
            "asyncExec": false,
            "sequenceId": self.sequence_id,
            "querySubmissionTime": unix_millis(),
        });
        if !params.is_empty() {
            body["bindings"] = bindings(params);
        }

        let started = Instant::now();
        let request_id = Uuid::now_v7().to_string();
        let mut envelope: Envelope = self
            .http
            .post(format!("{}{}", self.base_url, QUERY_PATH))
            .query(&[("requestId", request_id.as_str())])
            .header(AUTHORIZATION, authorization(&token))
            .header(ACCEPT, SNOWFLAKE_ACCEPT)
            .timeout(self.query_timeout)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        while envelope.in_progress() {
            if started.elapsed() >= self.query_timeout {
                return Err(DbError::Timeout(self.query_timeout));
            }

            let pending: QueryData = decode("pending query", envelope.data)?;
            let url = pending.get_result_url.ok_or_else(|| {
                DbError::Protocol("running statement without getResultUrl".to_string())
            })?;
            tracing::debug!(query_id = ?pending.query_id, "statement still running");

            tokio::time::sleep(POLL_INTERVAL).await;
            envelope = self.poll(&token, &url).await?;
        }

        if !envelope.success {
            return Err(DbError::Query {
                code: envelope.code(),
                message: envelope.message(),
            });
        }

        let data: QueryData = decode("query response", envelope.data)?;
        self.collect(data).await
    }

    async fn close(&mut self) -> Result<(), DbError> {
        let Some(token) = self.token.take() else {
            return Ok(());
        };

        let envelope: Envelope = self
            .http
            .post(format!("{}{}", self.base_url, SESSION_PATH))
            .query(&[("delete", "true")])
            .header(AUTHORIZATION, authorization(&token))
            .header(ACCEPT, SNOWFLAKE_ACCEPT)
            .timeout(self.query_timeout)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !envelope.success {
            return Err(DbError::Protocol(format!(
                "logout rejected ({}): {}",
                envelope.code(),
                envelope.message()
            )));
        }

        tracing::debug!("warehouse session closed");
        Ok(())
    }
}
