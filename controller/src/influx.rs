use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use tempctl_common::{
    ActuatorError, HeatingState, RecencyWindows, TelemetryError, TelemetryStore, User,
};

const PING_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const HEATING_STATUS_MEASUREMENT: &str = "room_heating_status";
const HEATING_FAULT_MEASUREMENT: &str = "room_heating_fault";

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    series: Vec<Series>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Series {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

/// InfluxDB 1.x reached over its HTTP API. Cheap to share; the underlying
/// client pools connections across rooms. Dropping the last handle drops the
/// pool and closes its connections, so there is no separate close call.
pub struct InfluxStore {
    client: Client,
    base_url: String,
    database: String,
    windows: RecencyWindows,
}

impl InfluxStore {
    pub async fn connect(
        address: &str,
        database: &str,
        windows: RecencyWindows,
    ) -> Result<Self, TelemetryError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| TelemetryError::Query(format!("connecting to influxdb: {err}")))?;

        let store = Self {
            client,
            base_url: address.trim_end_matches('/').to_string(),
            database: database.to_string(),
            windows,
        };
        store.ping().await?;
        Ok(store)
    }

    async fn ping(&self) -> Result<(), TelemetryError> {
        let response = self
            .client
            .get(format!("{}/ping", self.base_url))
            .timeout(PING_TIMEOUT)
            .send()
            .await
            .map_err(|err| TelemetryError::Query(format!("pinging influxdb: {err}")))?;

        if !response.status().is_success() {
            return Err(TelemetryError::Query(format!(
                "pinging influxdb: status {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn query(&self, statement: &str) -> Result<StatementResult, TelemetryError> {
        debug!("influx query: {statement}");
        let response = self
            .client
            .get(format!("{}/query", self.base_url))
            .query(&[("db", self.database.as_str()), ("q", statement), ("epoch", "s")])
            .send()
            .await
            .map_err(|err| TelemetryError::Query(err.to_string()))?;

        let response = check_status(response)
            .await
            .map_err(TelemetryError::Query)?;

        let body: QueryResponse = response
            .json()
            .await
            .map_err(|err| TelemetryError::Malformed(err.to_string()))?;
        first_statement(body)
    }

    async fn write(&self, line: String) -> Result<(), TelemetryError> {
        debug!("influx write: {line}");
        let response = self
            .client
            .post(format!("{}/write", self.base_url))
            .query(&[("db", self.database.as_str()), ("precision", "s")])
            .body(line)
            .send()
            .await
            .map_err(|err| TelemetryError::Write(err.to_string()))?;

        check_status(response).await.map_err(TelemetryError::Write)?;
        Ok(())
    }
}

#[async_trait]
impl TelemetryStore for InfluxStore {
    async fn any_user_present(&self, users: &[User]) -> Result<bool, TelemetryError> {
        let macs: Vec<&str> = users.iter().map(|user| user.mac_address.as_str()).collect();
        let result = self
            .query(&presence_query(&macs, self.windows.presence))
            .await?;
        Ok(!result.series.is_empty())
    }

    async fn current_temperature(&self, room: &str) -> Result<f64, TelemetryError> {
        let window = self.windows.temperature;
        let result = self.query(&temperature_query(room, window)).await?;
        last_value(result, room, window)
    }

    async fn record_heating_state(
        &self,
        room: &str,
        state: HeatingState,
    ) -> Result<(), TelemetryError> {
        self.write(heating_status_line(room, state, Utc::now().timestamp()))
            .await
    }

    async fn record_actuator_fault(
        &self,
        room: &str,
        error: &ActuatorError,
    ) -> Result<(), TelemetryError> {
        self.write(fault_line(room, &error.to_string(), Utc::now().timestamp()))
            .await
    }
}

async fn check_status(response: Response) -> Result<Response, String> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(format!("status {status}: {}", body.trim()))
}

fn first_statement(body: QueryResponse) -> Result<StatementResult, TelemetryError> {
    if let Some(error) = body.error {
        return Err(TelemetryError::Query(error));
    }
    let statement = body
        .results
        .into_iter()
        .next()
        .ok_or_else(|| TelemetryError::Malformed("response has no results".to_string()))?;
    if let Some(error) = statement.error {
        return Err(TelemetryError::Query(error));
    }
    Ok(statement)
}

fn last_value(
    result: StatementResult,
    location: &str,
    window: Duration,
) -> Result<f64, TelemetryError> {
    let Some(series) = result.series.first() else {
        return Err(TelemetryError::NotFound {
            metric: "temperature",
            location: location.to_string(),
            window,
        });
    };

    series
        .values
        .first()
        .and_then(|row| row.get(1))
        .and_then(Value::as_f64)
        .ok_or_else(|| {
            TelemetryError::Malformed(format!("temperature row for {location} has no number"))
        })
}

fn presence_query(macs: &[&str], window: Duration) -> String {
    let pattern = macs
        .iter()
        .map(|mac| escape_regex(mac))
        .collect::<Vec<_>>()
        .join("|");
    format!(
        "SELECT last(uptime) FROM unifi_client WHERE time >= now() - {}s AND mac =~ /{pattern}/",
        window.as_secs()
    )
}

fn temperature_query(location: &str, window: Duration) -> String {
    format!(
        "SELECT last(temperature) FROM environment WHERE \"location\" = '{}' AND time >= now() - {}s",
        escape_literal(location),
        window.as_secs()
    )
}

fn heating_status_line(location: &str, state: HeatingState, timestamp: i64) -> String {
    format!(
        "{HEATING_STATUS_MEASUREMENT},location={} heating={},status={}i {timestamp}",
        escape_tag(location),
        state.is_heating(),
        state.status_code()
    )
}

fn fault_line(location: &str, error: &str, timestamp: i64) -> String {
    format!(
        "{HEATING_FAULT_MEASUREMENT},location={} error=\"{}\" {timestamp}",
        escape_tag(location),
        escape_field_string(error)
    )
}

fn escape_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn escape_regex(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(
            c,
            '\\' | '/' | '.' | '+' | '*' | '?' | '(' | ')' | '[' | ']' | '{' | '}' | '|' | '^' | '$'
        ) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn escape_tag(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | '=' | ' ' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn escape_field_string(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
