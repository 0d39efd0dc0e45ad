//! Azure Table REST client
//!
//! Implements the [`ITableStore`] port over HTTPS. Upserts use
//! insert-or-merge (a `MERGE` request with no `If-Match`), partition
//! queries follow continuation headers, and deletes are per-entity with
//! `If-Match: *`. Shared-key requests are signed with SharedKeyLite;
//! Entra requests carry a bearer token.

use std::time::Duration;

use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::Value;
use sha2::Sha256;
use tracing::{debug, warn};

use metershare_core::config::TableConfig;
use metershare_core::domain::aggregate::UsageAggregateRow;
use metershare_core::ports::credential::Credential;
use metershare_core::ports::table_store::{ITableStore, StoreError, StoreOperation};

use crate::entity::{entity_from_row, row_from_entity};

/// Table service API version
const API_VERSION: &str = "2019-02-02";

/// Bounded per-call timeout; an elapsed timeout fails the whole batch
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for the Azure Table service
pub struct AzureTableClient {
    http: reqwest::Client,
    endpoint: String,
    account: String,
    table: String,
    credential: Credential,
}

impl AzureTableClient {
    /// Creates a client for the configured table
    ///
    /// The endpoint is derived from the storage account name unless the
    /// configuration overrides it (tests point the override at a local
    /// mock server).
    pub fn new(config: &TableConfig, credential: Credential) -> Result<Self, StoreError> {
        let endpoint = config
            .endpoint_override
            .clone()
            .unwrap_or_else(|| format!("https://{}.table.core.windows.net", config.storage_account));
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StoreError::Network(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            account: config.storage_account.clone(),
            table: config.table_name.clone(),
            credential,
        })
    }

    /// URL addressing one entity
    fn entity_url(&self, partition_key: &str, row_key: &str) -> String {
        format!(
            "{}/{}(PartitionKey='{}',RowKey='{}')",
            self.endpoint,
            self.table,
            url_escape(partition_key),
            url_escape(row_key)
        )
    }

    /// URL addressing the table collection
    fn table_url(&self) -> String {
        format!("{}/{}()", self.endpoint, self.table)
    }

    /// Attaches auth and protocol headers to a request
    ///
    /// `resource` is the canonicalized resource path used by
    /// SharedKeyLite signing: `/{account}/{table}` or
    /// `/{account}/{table}(PartitionKey='..',RowKey='..')`. Query
    /// options are never part of the canonicalized resource.
    fn authorize(&self, builder: RequestBuilder, resource: &str) -> Result<RequestBuilder, StoreError> {
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let builder = builder
            .header("x-ms-date", &date)
            .header("x-ms-version", API_VERSION)
            .header("Accept", "application/json;odata=nometadata");

        match &self.credential {
            Credential::Bearer { token, .. } => Ok(builder.bearer_auth(token)),
            Credential::SharedKey { account, key } => {
                let string_to_sign = format!("{date}\n{resource}");
                let signature = sign_shared_key_lite(key, &string_to_sign)?;
                Ok(builder.header(
                    "Authorization",
                    format!("SharedKeyLite {account}:{signature}"),
                ))
            }
        }
    }

    fn canonical_entity_resource(&self, partition_key: &str, row_key: &str) -> String {
        format!(
            "/{}/{}(PartitionKey='{}',RowKey='{}')",
            self.account, self.table, partition_key, row_key
        )
    }

    fn canonical_table_resource(&self) -> String {
        format!("/{}/{}()", self.account, self.table)
    }
}

#[async_trait::async_trait]
impl ITableStore for AzureTableClient {
    async fn upsert_batch(&self, rows: &[UsageAggregateRow]) -> Result<(), StoreError> {
        for row in rows {
            let url = self.entity_url(&row.partition_key, &row.row_key);
            let resource = self.canonical_entity_resource(&row.partition_key, &row.row_key);
            let request = self
                .http
                .request(Method::from_bytes(b"MERGE").expect("MERGE is a valid method"), &url)
                .json(&entity_from_row(row));
            let request = self.authorize(request, &resource)?;

            let response = request
                .send()
                .await
                .map_err(|e| map_transport_error(e, StoreOperation::Write))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                // Rows already confirmed stay written; the caller treats
                // this batch as failed and recomputes next cycle.
                return Err(classify_status(StoreOperation::Write, status, &body));
            }
        }

        debug!(rows = rows.len(), table = %self.table, "Batch upserted");
        Ok(())
    }

    async fn query_partition(
        &self,
        partition_key: &str,
        filter: Option<&str>,
    ) -> Result<Vec<UsageAggregateRow>, StoreError> {
        let mut combined = format!("PartitionKey eq '{}'", partition_key.replace('\'', "''"));
        if let Some(filter) = filter {
            combined = format!("{combined} and {filter}");
        }

        let mut rows = Vec::new();
        let mut continuation: Option<(String, String)> = None;

        loop {
            let mut query: Vec<(&str, String)> = vec![("$filter", combined.clone())];
            if let Some((next_pk, next_rk)) = &continuation {
                query.push(("NextPartitionKey", next_pk.clone()));
                query.push(("NextRowKey", next_rk.clone()));
            }

            let request = self.http.get(self.table_url()).query(&query);
            let request = self.authorize(request, &self.canonical_table_resource())?;

            let response = request
                .send()
                .await
                .map_err(|e| map_transport_error(e, StoreOperation::Query))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(classify_status(StoreOperation::Query, status, &body));
            }

            let next = read_continuation(response.headers());
            let body: Value = response
                .json()
                .await
                .map_err(|e| StoreError::Malformed(e.to_string()))?;

            let Some(entities) = body.get("value").and_then(Value::as_array) else {
                return Err(StoreError::Malformed(
                    "query response missing 'value' array".to_string(),
                ));
            };
            for entity in entities {
                let Some(map) = entity.as_object() else {
                    return Err(StoreError::Malformed("entity is not an object".to_string()));
                };
                rows.push(row_from_entity(map)?);
            }

            match next {
                Some(pair) => continuation = Some(pair),
                None => break,
            }
        }

        debug!(
            partition = partition_key,
            rows = rows.len(),
            "Partition query complete"
        );
        Ok(rows)
    }

    async fn delete_where(&self, partition_key: &str, filter: &str) -> Result<u64, StoreError> {
        let matches = self.query_partition(partition_key, Some(filter)).await?;
        let mut deleted = 0u64;

        for row in &matches {
            let url = self.entity_url(&row.partition_key, &row.row_key);
            let resource = self.canonical_entity_resource(&row.partition_key, &row.row_key);
            let request = self.http.delete(&url).header("If-Match", "*");
            let request = self.authorize(request, &resource)?;

            let response = request
                .send()
                .await
                .map_err(|e| map_transport_error(e, StoreOperation::Delete))?;

            let status = response.status();
            if status == StatusCode::NOT_FOUND {
                // Already gone; another writer got there first.
                continue;
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(classify_status(StoreOperation::Delete, status, &body));
            }
            deleted += 1;
        }

        if deleted > 0 {
            warn!(
                partition = partition_key,
                deleted, "Deleted entities from partition"
            );
        }
        Ok(deleted)
    }
}

/// SharedKeyLite signature: Base64(HMAC-SHA256(key, string_to_sign))
fn sign_shared_key_lite(key_base64: &str, string_to_sign: &str) -> Result<String, StoreError> {
    let key = base64::engine::general_purpose::STANDARD
        .decode(key_base64)
        .map_err(|_| StoreError::Auth("stored account key is not valid base64".to_string()))?;
    let mut mac = Hmac::<Sha256>::new_from_slice(&key)
        .map_err(|_| StoreError::Auth("stored account key has an invalid length".to_string()))?;
    mac.update(string_to_sign.as_bytes());
    Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

/// Maps reqwest transport failures onto the store error taxonomy
fn map_transport_error(err: reqwest::Error, operation: StoreOperation) -> StoreError {
    if err.is_timeout() {
        StoreError::Timeout(REQUEST_TIMEOUT)
    } else if err.is_connect() {
        StoreError::Network(format!("connection failed during {operation}: {err}"))
    } else {
        StoreError::Network(format!("transport failure during {operation}: {err}"))
    }
}

/// Maps HTTP status codes onto the store error taxonomy
fn classify_status(operation: StoreOperation, status: StatusCode, body: &str) -> StoreError {
    let detail = summarize_body(body);
    match status {
        StatusCode::UNAUTHORIZED => StoreError::Auth(detail),
        StatusCode::FORBIDDEN => StoreError::PermissionDenied { operation, detail },
        _ => StoreError::Http {
            status: status.as_u16(),
            detail,
        },
    }
}

/// First line of the error body, bounded, enough for a diagnostic
fn summarize_body(body: &str) -> String {
    let line = body.lines().next().unwrap_or_default();
    let mut detail: String = line.chars().take(200).collect();
    if line.len() > 200 {
        detail.push_str("...");
    }
    detail
}

fn read_continuation(headers: &reqwest::header::HeaderMap) -> Option<(String, String)> {
    let next_pk = headers
        .get("x-ms-continuation-NextPartitionKey")?
        .to_str()
        .ok()?
        .to_string();
    let next_rk = headers
        .get("x-ms-continuation-NextRowKey")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    Some((next_pk, next_rk))
}

fn url_escape(value: &str) -> String {
    value.replace('\'', "''")
}
