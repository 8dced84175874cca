use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{
    Client,
    header::{HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION},
    Method,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

use shared_config::AppConfig;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid header value: {0}")]
    Header(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// PostgREST client authenticated with the backend's service key.
///
/// Cheap to clone: the inner `reqwest::Client` shares its connection pool.
#[derive(Clone)]
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    service_key: String,
}

impl SupabaseClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.supabase_url.trim_end_matches('/').to_string(),
            service_key: config.supabase_service_key.clone(),
        }
    }

    fn get_headers(&self) -> Result<HeaderMap, DbError> {
        let mut headers = HeaderMap::new();

        headers.insert(
            "apikey",
            HeaderValue::from_str(&self.service_key).map_err(|e| DbError::Header(e.to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.service_key))
                .map_err(|e| DbError::Header(e.to_string()))?,
        );

        Ok(headers)
    }

    pub async fn request<T>(&self, method: Method, path: &str, body: Option<Value>) -> Result<T, DbError>
    where T: DeserializeOwned {
        self.request_with_headers(method, path, body, None).await
    }

    pub async fn request_with_headers<T>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        extra_headers: Option<HeaderMap>,
    ) -> Result<T, DbError>
    where T: DeserializeOwned {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making {} request to {}", method, url);

        let mut headers = self.get_headers()?;
        if let Some(extra) = extra_headers {
            headers.extend(extra);
        }

        let mut req = self.client.request(method, &url).headers(headers);

        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await?;
            error!("API error ({}): {}", status, error_text);

            return Err(match status.as_u16() {
                401 | 403 => DbError::Auth(error_text),
                404 => DbError::NotFound(error_text),
                409 => DbError::Conflict(error_text),
                code => DbError::Api { status: code, message: error_text },
            });
        }

        let data = response.json::<T>().await?;
        Ok(data)
    }

    fn representation_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));
        headers
    }

    fn table_path(table: &str, query: &str) -> String {
        if query.is_empty() {
            format!("/rest/v1/{}", table)
        } else {
            format!("/rest/v1/{}?{}", table, query)
        }
    }

    /// `GET /rest/v1/{table}?{query}` decoded into rows.
    pub async fn select<T>(&self, table: &str, query: &str) -> Result<Vec<T>, DbError>
    where T: DeserializeOwned {
        let rows: Vec<Value> = self.request(Method::GET, &Self::table_path(table, query), None).await?;

        rows.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<T>, _>>()
            .map_err(DbError::from)
    }

    pub async fn select_one<T>(&self, table: &str, query: &str) -> Result<Option<T>, DbError>
    where T: DeserializeOwned {
        let query = if query.is_empty() {
            "limit=1".to_string()
        } else {
            format!("{}&limit=1", query)
        };
        let mut rows = self.select(table, &query).await?;
        Ok(if rows.is_empty() { None } else { Some(rows.swap_remove(0)) })
    }

    /// Inserts one row and returns it as stored.
    pub async fn insert<T>(&self, table: &str, body: Value) -> Result<T, DbError>
    where T: DeserializeOwned {
        let mut rows: Vec<T> = self.request_with_headers(
            Method::POST,
            &Self::table_path(table, ""),
            Some(body),
            Some(Self::representation_headers()),
        ).await?;

        if rows.is_empty() {
            return Err(DbError::Api {
                status: 500,
                message: format!("Insert into {} returned no rows", table),
            });
        }

        Ok(rows.swap_remove(0))
    }

    /// Inserts many rows in one request.
    pub async fn insert_many<T>(&self, table: &str, rows: Vec<Value>) -> Result<Vec<T>, DbError>
    where T: DeserializeOwned {
        self.request_with_headers(
            Method::POST,
            &Self::table_path(table, ""),
            Some(Value::Array(rows)),
            Some(Self::representation_headers()),
        ).await
    }

    /// Conditional update. The filter in `query` is evaluated atomically by the
    /// database, so an empty result means no row matched at write time.
    pub async fn update<T>(&self, table: &str, query: &str, body: Value) -> Result<Vec<T>, DbError>
    where T: DeserializeOwned {
        self.request_with_headers(
            Method::PATCH,
            &Self::table_path(table, query),
            Some(body),
            Some(Self::representation_headers()),
        ).await
    }

    /// Deletes matching rows and returns how many were removed.
    pub async fn delete(&self, table: &str, query: &str) -> Result<usize, DbError> {
        let rows: Vec<Value> = self.request_with_headers(
            Method::DELETE,
            &Self::table_path(table, query),
            None,
            Some(Self::representation_headers()),
        ).await?;

        Ok(rows.len())
    }
}

/// Formats an instant for use inside a PostgREST filter.
pub fn pg_timestamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Percent-encodes a free-form value for use inside a PostgREST filter.
pub fn pg_value(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> SupabaseClient {
        SupabaseClient::new(&AppConfig {
            supabase_url: server.uri(),
            supabase_service_key: "service-key".to_string(),
            ..AppConfig::default()
        })
    }

    #[test]
    fn timestamps_use_utc_suffix() {
        let instant = Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap();
        assert_eq!(pg_timestamp(instant), "2026-03-01T09:30:00.000Z");
    }

    #[test]
    fn values_are_percent_encoded() {
        assert_eq!(pg_value("a+b@example.com"), "a%2Bb%40example.com");
    }

    #[tokio::test]
    async fn select_sends_service_key_and_filters() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/doctors"))
            .and(query_param("id", "eq.42"))
            .and(header("apikey", "service-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": 42 }])))
            .mount(&server)
            .await;

        let rows: Vec<Value> = client_for(&server).select("doctors", "id=eq.42").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], 42);
    }

    #[tokio::test]
    async fn conflict_status_maps_to_conflict() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/users"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "code": "23505",
                "message": "duplicate key value violates unique constraint"
            })))
            .mount(&server)
            .await;

        let result: Result<Value, DbError> = client_for(&server)
            .insert("users", json!({ "email": "a@example.com" }))
            .await;
        assert_matches!(result, Err(DbError::Conflict(_)));
    }

    #[tokio::test]
    async fn update_with_no_matching_rows_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/slots"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let rows: Vec<Value> = client_for(&server)
            .update("slots", "id=eq.1&is_booked=eq.false", json!({ "is_booked": true }))
            .await
            .unwrap();
        assert!(rows.is_empty());
    }
}
