//! Databricks SQL Warehouse
//!
//! Talks to the SQL Statement Execution REST API:
//! - POST /api/2.0/sql/statements submits a statement (waits up to `wait_timeout`)
//! - GET /api/2.0/sql/statements/{id} polls until a terminal state
//! - POST /api/2.0/sql/statements/{id}/cancel releases an abandoned statement
//!
//! Results are requested INLINE as JSON_ARRAY, where every cell is a string or
//! null; cells are converted to typed JSON scalars using the manifest types.

use crate::config::Settings;
use crate::error::{Nl2SqlError, Result};
use crate::warehouse::{QueryOutput, Warehouse};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const STATEMENTS_PATH: &str = "/api/2.0/sql/statements";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct DatabricksWarehouse {
    client: Client,
    base_url: String,
    token: String,
    warehouse_id: String,
    sql_timeout: Duration,
    poll_interval: Duration,
}

#[derive(Debug, Serialize)]
struct StatementRequest<'a> {
    warehouse_id: &'a str,
    statement: &'a str,
    wait_timeout: String,
    on_wait_timeout: &'a str,
    disposition: &'a str,
    format: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    row_limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct StatementResponse {
    statement_id: String,
    status: StatementStatus,
    manifest: Option<Manifest>,
    result: Option<ResultChunk>,
}

#[derive(Debug, Deserialize)]
struct StatementStatus {
    state: StatementState,
    error: Option<ServiceError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum StatementState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
    Closed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct ServiceError {
    message: Option<String>,
    error_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    schema: Option<ManifestSchema>,
}

#[derive(Debug, Deserialize)]
struct ManifestSchema {
    #[serde(default)]
    columns: Vec<ManifestColumn>,
}

#[derive(Debug, Deserialize)]
struct ManifestColumn {
    name: String,
    type_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ResultChunk {
    #[serde(default)]
    data_array: Vec<Vec<Option<String>>>,
    next_chunk_internal_link: Option<String>,
}

/// Fallback for a `query` future dropped mid-poll: cancels the statement from
/// a spawned task. Explicit error paths cancel inline and disarm first.
struct StatementGuard {
    client: Client,
    cancel_url: String,
    token: String,
    statement_id: String,
    armed: bool,
}

impl StatementGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for StatementGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime available to cancel statement {}", self.statement_id);
            return;
        };
        runtime.spawn(send_cancel(
            self.client.clone(),
            self.cancel_url.clone(),
            self.token.clone(),
            self.statement_id.clone(),
        ));
    }
}

async fn send_cancel(client: Client, url: String, token: String, statement_id: String) {
    match client.post(&url).bearer_auth(&token).send().await {
        Ok(response) if response.status().is_success() => {
            info!("Cancelled statement {}", statement_id);
        }
        Ok(response) => {
            warn!("Cancel of statement {} returned {}", statement_id, response.status());
        }
        Err(e) => warn!("Failed to cancel statement {}: {}", statement_id, e),
    }
}

/// Why polling stopped without a result.
enum PollExit {
    /// The warehouse ended the statement itself; nothing to release.
    Finished(Nl2SqlError),
    /// We gave up on a statement that may still be running.
    Abandoned(Nl2SqlError),
}

impl DatabricksWarehouse {
    /// Create a client for one SQL warehouse.
    ///
    /// # Arguments
    /// * `host` - Workspace host, with or without scheme
    /// * `token` - Personal access token
    /// * `warehouse_id` - SQL warehouse id
    /// * `sql_timeout` - Upper bound for one statement, submission to last poll
    pub fn new(host: &str, token: String, warehouse_id: String, sql_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(sql_timeout.max(Duration::from_secs(60)))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Nl2SqlError::Config(format!("Failed to create warehouse HTTP client: {}", e)))?;

        let host = host.trim().trim_end_matches('/');
        let base_url = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("https://{}", host)
        };

        Ok(Self {
            client,
            base_url,
            token,
            warehouse_id,
            sql_timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(
            &settings.databricks_host,
            settings.databricks_token.clone(),
            settings.warehouse_id()?,
            settings.sql_timeout,
        )
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Server-side wait on submission; the API accepts 0 or 5..=50 seconds.
    fn wait_timeout(&self) -> String {
        format!("{}s", self.sql_timeout.as_secs().clamp(5, 50))
    }

    async fn submit(&self, sql: &str, row_limit: Option<usize>) -> Result<StatementResponse> {
        let url = format!("{}{}", self.base_url, STATEMENTS_PATH);
        let body = StatementRequest {
            warehouse_id: &self.warehouse_id,
            statement: sql,
            wait_timeout: self.wait_timeout(),
            on_wait_timeout: "CONTINUE",
            disposition: "INLINE",
            format: "JSON_ARRAY",
            row_limit,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| Nl2SqlError::Warehouse(format!("Failed to submit statement: {}", e)))?;

        parse_response(response).await
    }

    async fn poll(&self, statement_id: &str) -> Result<StatementResponse> {
        let url = format!("{}{}/{}", self.base_url, STATEMENTS_PATH, statement_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| Nl2SqlError::Warehouse(format!("Failed to poll statement {}: {}", statement_id, e)))?;

        parse_response(response).await
    }

    async fn fetch_chunk(&self, link: &str) -> Result<ResultChunk> {
        let url = format!("{}{}", self.base_url, link);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| Nl2SqlError::Warehouse(format!("Failed to fetch result chunk: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Nl2SqlError::Warehouse(format!(
                "Result chunk request failed with status {}: {}",
                status, text
            )));
        }
        response
            .json()
            .await
            .map_err(|e| Nl2SqlError::Warehouse(format!("Failed to parse result chunk: {}", e)))
    }

    fn cancel_url(&self, statement_id: &str) -> String {
        format!("{}{}/{}/cancel", self.base_url, STATEMENTS_PATH, statement_id)
    }

    /// Ask the warehouse to stop a statement. Failures are logged, not returned.
    pub async fn cancel(&self, statement_id: &str) {
        send_cancel(
            self.client.clone(),
            self.cancel_url(statement_id),
            self.token.clone(),
            statement_id.to_string(),
        )
        .await;
    }

    /// Poll until a terminal state, then gather the rows. States the client
    /// does not recognise are polled like `RUNNING`.
    async fn wait_and_collect(
        &self,
        mut response: StatementResponse,
        row_limit: Option<usize>,
        started: Instant,
    ) -> std::result::Result<QueryOutput, PollExit> {
        loop {
            match response.status.state {
                StatementState::Succeeded => break,
                StatementState::Pending | StatementState::Running | StatementState::Unknown => {
                    if started.elapsed() >= self.sql_timeout {
                        return Err(PollExit::Abandoned(Nl2SqlError::Warehouse(format!(
                            "Statement {} timed out after {:?}",
                            response.statement_id, self.sql_timeout
                        ))));
                    }
                    tokio::time::sleep(self.poll_interval).await;
                    response = self
                        .poll(&response.statement_id)
                        .await
                        .map_err(PollExit::Abandoned)?;
                }
                StatementState::Failed | StatementState::Canceled | StatementState::Closed => {
                    return Err(PollExit::Finished(status_error(&response.status)));
                }
            }
        }

        self.collect_output(response, row_limit)
            .await
            .map_err(PollExit::Abandoned)
    }

    /// Gather inline rows, following chunk links until `row_limit` is reached.
    async fn collect_output(
        &self,
        response: StatementResponse,
        row_limit: Option<usize>,
    ) -> Result<QueryOutput> {
        let columns: Vec<ManifestColumn> = response
            .manifest
            .and_then(|m| m.schema)
            .map(|s| s.columns)
            .unwrap_or_default();
        let types: Vec<Option<&str>> = columns.iter().map(|c| c.type_name.as_deref()).collect();

        let mut rows = Vec::new();
        let mut chunk = response.result.unwrap_or_default();
        loop {
            for raw in chunk.data_array {
                if row_limit.is_some_and(|limit| rows.len() >= limit) {
                    break;
                }
                let row = raw
                    .into_iter()
                    .enumerate()
                    .map(|(idx, cell)| convert_cell(cell, types.get(idx).copied().flatten()))
                    .collect();
                rows.push(row);
            }
            let done = row_limit.is_some_and(|limit| rows.len() >= limit);
            match chunk.next_chunk_internal_link {
                Some(link) if !done => {
                    debug!("Fetching next result chunk: {}", link);
                    chunk = self.fetch_chunk(&link).await?;
                }
                _ => break,
            }
        }

        Ok(QueryOutput {
            columns: columns.iter().map(|c| c.name.clone()).collect(),
            rows,
        })
    }
}

#[async_trait]
impl Warehouse for DatabricksWarehouse {
    fn name(&self) -> &'static str {
        "databricks"
    }

    async fn query(&self, sql: &str, row_limit: Option<usize>) -> Result<QueryOutput> {
        let started = Instant::now();
        debug!("Submitting statement to warehouse {}: {}", self.warehouse_id, sql);

        let response = self.submit(sql, row_limit).await?;
        let statement_id = response.statement_id.clone();
        let mut guard = StatementGuard {
            client: self.client.clone(),
            cancel_url: self.cancel_url(&statement_id),
            token: self.token.clone(),
            statement_id: statement_id.clone(),
            armed: true,
        };

        let result = self.wait_and_collect(response, row_limit, started).await;
        if let Err(PollExit::Abandoned(_)) = &result {
            self.cancel(&statement_id).await;
        }
        guard.disarm();

        match result {
            Ok(output) => {
                info!(
                    "Statement finished in {}ms with {} rows",
                    started.elapsed().as_millis(),
                    output.rows.len()
                );
                Ok(output)
            }
            Err(PollExit::Finished(e)) | Err(PollExit::Abandoned(e)) => Err(e),
        }
    }
}

async fn parse_response(response: reqwest::Response) -> Result<StatementResponse> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(Nl2SqlError::Warehouse(format!(
            "Statement request failed with status {}: {}",
            status, text
        )));
    }
    response
        .json()
        .await
        .map_err(|e| Nl2SqlError::Warehouse(format!("Failed to parse statement response: {}", e)))
}

fn status_error(status: &StatementStatus) -> Nl2SqlError {
    match &status.error {
        Some(ServiceError {
            message: Some(message),
            ..
        }) => Nl2SqlError::Warehouse(message.clone()),
        Some(ServiceError {
            error_code: Some(code),
            ..
        }) => Nl2SqlError::Warehouse(format!("Statement failed with {}", code)),
        _ => Nl2SqlError::Warehouse(format!("Statement ended in state {:?}", status.state)),
    }
}

/// Convert one inline cell using the manifest type name.
pub(crate) fn convert_cell(cell: Option<String>, type_name: Option<&str>) -> Value {
    let Some(text) = cell else {
        return Value::Null;
    };
    let type_name = type_name.map(|t| t.to_ascii_uppercase());
    match type_name.as_deref() {
        Some("BYTE" | "SHORT" | "INT" | "LONG" | "TINYINT" | "SMALLINT" | "INTEGER" | "BIGINT") => {
            match text.parse::<i64>() {
                Ok(n) => Value::from(n),
                Err(_) => Value::String(text),
            }
        }
        Some("FLOAT" | "DOUBLE" | "DECIMAL") => match text
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
        {
            Some(n) => Value::Number(n),
            None => Value::String(text),
        },
        Some("BOOLEAN") => match text.as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(text),
        },
        _ => Value::String(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    type Routes = Arc<dyn Fn(&str) -> Value + Send + Sync>;

    /// Local stand-in for the Statement Execution API. Every request is
    /// recorded as `"METHOD /path"` and answered 200 with the routed body.
    struct MockStatementApi {
        base_url: String,
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl MockStatementApi {
        async fn start(routes: impl Fn(&str) -> Value + Send + Sync + 'static) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let base_url = format!("http://{}", listener.local_addr().unwrap());
            let routes: Routes = Arc::new(routes);
            let seen = Arc::new(Mutex::new(Vec::new()));

            let task_seen = seen.clone();
            tokio::spawn(async move {
                while let Ok((socket, _)) = listener.accept().await {
                    tokio::spawn(serve_one(socket, routes.clone(), task_seen.clone()));
                }
            });
            Self { base_url, seen }
        }

        fn requests(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }

        fn warehouse(&self, sql_timeout: Duration) -> DatabricksWarehouse {
            DatabricksWarehouse::new(&self.base_url, "dapi".into(), "wh".into(), sql_timeout)
                .unwrap()
                .with_poll_interval(Duration::from_millis(20))
        }
    }

    async fn serve_one(mut socket: TcpStream, routes: Routes, seen: Arc<Mutex<Vec<String>>>) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        let header_end = loop {
            match socket.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };
        let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
        let content_length = head
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        while buf.len() < header_end + content_length {
            match socket.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        }

        let request = head.split_whitespace().take(2).collect::<Vec<_>>().join(" ");
        seen.lock().unwrap().push(request.clone());
        let body = routes(&request).to_string();
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let _ = socket.write_all(response.as_bytes()).await;
        let _ = socket.shutdown().await;
    }

    fn state(id: &str, state: &str) -> Value {
        json!({"statement_id": id, "status": {"state": state}})
    }

    #[tokio::test]
    async fn test_timed_out_statement_is_cancelled_before_returning() {
        let api = MockStatementApi::start(|request| match request {
            "POST /api/2.0/sql/statements/s1/cancel" => json!({}),
            _ => state("s1", "RUNNING"),
        })
        .await;
        let warehouse = api.warehouse(Duration::from_millis(200));

        let err = warehouse.query("SELECT 1", None).await.unwrap_err();
        assert!(
            matches!(&err, Nl2SqlError::Warehouse(msg) if msg == "Statement s1 timed out after 200ms"),
            "unexpected error: {}",
            err
        );

        // The cancel went out before `query` returned, not from a spawned task.
        let requests = api.requests();
        assert_eq!(requests.first().map(String::as_str), Some("POST /api/2.0/sql/statements"));
        assert!(requests.iter().any(|r| r == "GET /api/2.0/sql/statements/s1"));
        assert_eq!(
            requests.last().map(String::as_str),
            Some("POST /api/2.0/sql/statements/s1/cancel")
        );
        assert_eq!(requests.iter().filter(|r| r.ends_with("/cancel")).count(), 1);
    }

    #[tokio::test]
    async fn test_chunk_following_stops_at_row_limit() {
        let api = MockStatementApi::start(|request| match request {
            "POST /api/2.0/sql/statements" => json!({
                "statement_id": "s2",
                "status": {"state": "SUCCEEDED"},
                "manifest": {"schema": {"columns": [{"name": "n", "type_name": "INT"}]}},
                "result": {
                    "data_array": [["1"], ["2"]],
                    "next_chunk_internal_link": "/api/2.0/sql/statements/s2/result/chunks/1"
                }
            }),
            "GET /api/2.0/sql/statements/s2/result/chunks/1" => json!({
                "data_array": [["3"], ["4"]],
                "next_chunk_internal_link": "/api/2.0/sql/statements/s2/result/chunks/2"
            }),
            _ => json!({"data_array": [["5"]]}),
        })
        .await;
        let warehouse = api.warehouse(Duration::from_secs(5));

        let output = warehouse.query("SELECT n FROM t", Some(3)).await.unwrap();
        assert_eq!(output.columns, vec!["n"]);
        assert_eq!(output.rows, vec![vec![json!(1)], vec![json!(2)], vec![json!(3)]]);
        assert_eq!(
            api.requests(),
            vec![
                "POST /api/2.0/sql/statements",
                "GET /api/2.0/sql/statements/s2/result/chunks/1",
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_poll_is_warehouse_error_without_cancel() {
        let api = MockStatementApi::start(|request| match request {
            "POST /api/2.0/sql/statements" => state("s3", "PENDING"),
            _ => json!({
                "statement_id": "s3",
                "status": {"state": "FAILED", "error": {
                    "error_code": "BAD_REQUEST",
                    "message": "[TABLE_OR_VIEW_NOT_FOUND] main.sales.missing"
                }}
            }),
        })
        .await;
        let warehouse = api.warehouse(Duration::from_secs(5));

        let err = warehouse.query("SELECT * FROM main.sales.missing", None).await.unwrap_err();
        assert!(matches!(err, Nl2SqlError::Warehouse(msg) if msg.contains("TABLE_OR_VIEW_NOT_FOUND")));
        assert!(!api.requests().iter().any(|r| r.ends_with("/cancel")));
    }

    #[tokio::test]
    async fn test_canceled_state_is_warehouse_error() {
        let api = MockStatementApi::start(|_| state("s5", "CANCELED")).await;
        let warehouse = api.warehouse(Duration::from_secs(5));

        let err = warehouse.query("SELECT 1", None).await.unwrap_err();
        assert!(matches!(err, Nl2SqlError::Warehouse(msg) if msg == "Statement ended in state Canceled"));
        assert_eq!(api.requests(), vec!["POST /api/2.0/sql/statements"]);
    }

    #[tokio::test]
    async fn test_unrecognised_state_keeps_polling() {
        let api = MockStatementApi::start(|request| match request {
            "POST /api/2.0/sql/statements" => state("s4", "QUEUED_SOMEWHERE"),
            _ => json!({
                "statement_id": "s4",
                "status": {"state": "SUCCEEDED"},
                "manifest": {"schema": {"columns": [{"name": "ok", "type_name": "BOOLEAN"}]}},
                "result": {"data_array": [["true"]]}
            }),
        })
        .await;
        let warehouse = api.warehouse(Duration::from_secs(5));

        let output = warehouse.query("SELECT true AS ok", None).await.unwrap();
        assert_eq!(output.rows, vec![vec![json!(true)]]);
        assert_eq!(
            api.requests(),
            vec!["POST /api/2.0/sql/statements", "GET /api/2.0/sql/statements/s4"]
        );
    }

    #[test]
    fn test_convert_cell_by_type() {
        assert_eq!(convert_cell(Some("42".into()), Some("LONG")), json!(42));
        assert_eq!(convert_cell(Some("1.5".into()), Some("DECIMAL")), json!(1.5));
        assert_eq!(convert_cell(Some("true".into()), Some("BOOLEAN")), json!(true));
        assert_eq!(convert_cell(Some("2024-01-01".into()), Some("DATE")), json!("2024-01-01"));
        assert_eq!(convert_cell(None, Some("INT")), Value::Null);
        assert_eq!(convert_cell(Some("n/a".into()), Some("INT")), json!("n/a"));
        assert_eq!(convert_cell(Some("x".into()), None), json!("x"));
    }

    #[test]
    fn test_statement_response_parses() {
        let body = json!({
            "statement_id": "01ef",
            "status": {"state": "SUCCEEDED"},
            "manifest": {"schema": {"columns": [
                {"name": "region", "type_name": "STRING"},
                {"name": "total", "type_name": "DOUBLE"}
            ]}},
            "result": {"data_array": [["emea", "10.5"], [null, "3"]]}
        });
        let response: StatementResponse = serde_json::from_value(body).unwrap();
        assert_eq!(response.status.state, StatementState::Succeeded);
        let chunk = response.result.unwrap();
        assert_eq!(chunk.data_array[1][0], None);
    }

    #[test]
    fn test_failed_status_surfaces_server_message() {
        let body = json!({
            "statement_id": "01ef",
            "status": {"state": "FAILED", "error": {
                "error_code": "BAD_REQUEST",
                "message": "[UNRESOLVED_COLUMN] column revenue not found"
            }}
        });
        let response: StatementResponse = serde_json::from_value(body).unwrap();
        let err = status_error(&response.status);
        assert!(matches!(err, Nl2SqlError::Warehouse(msg) if msg.contains("column revenue not found")));
    }

    #[test]
    fn test_unknown_state_tolerated() {
        let status: StatementStatus =
            serde_json::from_value(json!({"state": "QUEUED_SOMEWHERE"})).unwrap();
        assert_eq!(status.state, StatementState::Unknown);
    }

    #[test]
    fn test_base_url_and_wait_timeout() {
        let warehouse = DatabricksWarehouse::new(
            "adb-1.azuredatabricks.net/",
            "dapi".into(),
            "abc".into(),
            Duration::from_secs(90),
        )
        .unwrap();
        assert_eq!(warehouse.base_url, "https://adb-1.azuredatabricks.net");
        assert_eq!(warehouse.wait_timeout(), "50s");
    }
}
