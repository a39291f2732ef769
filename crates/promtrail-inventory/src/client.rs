//! [`MetricsSource`] over the Prometheus HTTP API.
//!
//! One HTTP/1 connection per request, each bounded by the client's request
//! timeout. Responses are decoded from the standard
//! `{"status", "data", "errorType", "error"}` envelope.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{Method, Request, StatusCode, Uri, header};
use http_body_util::{BodyExt, Empty};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{UpstreamError, UpstreamResult};
use crate::source::{MetadataInfo, MetricsSource, QueryResult};

const USER_AGENT: &str = "promtrail/0.1";

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    status: String,
    data: Option<T>,
    #[serde(rename = "errorType")]
    error_type: Option<String>,
    error: Option<String>,
}

/// Client for a Prometheus-compatible query API.
#[derive(Debug, Clone)]
pub struct PrometheusClient {
    /// `host:port` to connect to.
    addr: String,
    /// Value of the `Host` header.
    host: String,
    /// Path prefix of the API, without a trailing slash.
    base_path: String,
    request_timeout: Duration,
}

impl PrometheusClient {
    /// Build a client for `base_url` (e.g. `http://prometheus:9090`).
    pub fn new(base_url: &str, request_timeout: Duration) -> UpstreamResult<Self> {
        let uri: Uri = base_url
            .parse()
            .map_err(|_| UpstreamError::InvalidUrl(base_url.to_string()))?;
        if uri.scheme_str() != Some("http") {
            return Err(UpstreamError::InvalidUrl(base_url.to_string()));
        }
        let authority = uri
            .authority()
            .ok_or_else(|| UpstreamError::InvalidUrl(base_url.to_string()))?;
        let addr = match authority.port_u16() {
            Some(port) => format!("{}:{port}", authority.host()),
            None => format!("{}:80", authority.host()),
        };
        Ok(Self {
            addr,
            host: authority.as_str().to_string(),
            base_path: uri.path().trim_end_matches('/').to_string(),
            request_timeout,
        })
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> UpstreamResult<T> {
        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let target = if query.is_empty() {
            format!("{}{path}", self.base_path)
        } else {
            format!("{}{path}?{query}", self.base_path)
        };

        let (status, body) = tokio::time::timeout(self.request_timeout, self.send(&target))
            .await
            .map_err(|_| UpstreamError::Timeout(self.request_timeout))??;
        debug!(%target, status = status.as_u16(), bytes = body.len(), "upstream response");
        decode_response(status, &body, path)
    }

    async fn send(&self, target: &str) -> UpstreamResult<(StatusCode, Bytes)> {
        let stream = tokio::net::TcpStream::connect(&self.addr)
            .await
            .map_err(|e| UpstreamError::Transport(format!("connect {}: {e}", self.addr)))?;
        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| UpstreamError::Transport(format!("handshake: {e}")))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "upstream connection closed with error");
            }
        });

        let req = Request::builder()
            .method(Method::GET)
            .uri(target)
            .header(header::HOST, &self.host)
            .header(header::USER_AGENT, USER_AGENT)
            .header(header::ACCEPT, "application/json")
            .body(Empty::<Bytes>::new())
            .map_err(|e| UpstreamError::InvalidUrl(format!("{target}: {e}")))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| UpstreamError::Transport(format!("request: {e}")))?;
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| UpstreamError::Transport(format!("read body: {e}")))?
            .to_bytes();
        Ok((status, body))
    }
}

fn decode_response<T: DeserializeOwned>(
    status: StatusCode,
    body: &[u8],
    path: &str,
) -> UpstreamResult<T> {
    if status == StatusCode::NOT_FOUND {
        return Err(UpstreamError::NotFound(path.to_string()));
    }
    let envelope: ApiEnvelope<T> = match serde_json::from_slice(body) {
        Ok(envelope) => envelope,
        Err(e) if status.is_success() => return Err(UpstreamError::Decode(e.to_string())),
        Err(_) => {
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body: snippet(body),
            });
        }
    };
    if envelope.status != "success" {
        return Err(UpstreamError::Api {
            error_type: envelope.error_type.unwrap_or_default(),
            message: envelope.error.unwrap_or_default(),
        });
    }
    if !status.is_success() {
        return Err(UpstreamError::Status {
            status: status.as_u16(),
            body: snippet(body),
        });
    }
    envelope
        .data
        .ok_or_else(|| UpstreamError::Decode("response has no data".to_string()))
}

fn snippet(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    text.chars().take(256).collect()
}

/// Unix seconds with millisecond precision, as the API expects.
fn unix_seconds(ts: DateTime<Utc>) -> String {
    format!("{}.{:03}", ts.timestamp(), ts.timestamp_subsec_millis())
}

#[async_trait]
impl MetricsSource for PrometheusClient {
    async fn metadata(
        &self,
        metric: Option<&str>,
        limit: Option<usize>,
    ) -> UpstreamResult<BTreeMap<String, Vec<MetadataInfo>>> {
        let mut params = Vec::new();
        if let Some(metric) = metric {
            params.push(("metric", metric.to_string()));
        }
        if let Some(limit) = limit {
            params.push(("limit", limit.to_string()));
        }
        self.get("/api/v1/metadata", &params).await
    }

    async fn label_values(
        &self,
        label: &str,
        matchers: &[String],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> UpstreamResult<Vec<String>> {
        let mut params = vec![("start", unix_seconds(from)), ("end", unix_seconds(to))];
        params.extend(matchers.iter().map(|m| ("match[]", m.clone())));
        let path = format!("/api/v1/label/{}/values", urlencoding::encode(label));
        self.get(&path, &params).await
    }

    async fn query(&self, expr: &str, at: DateTime<Utc>) -> UpstreamResult<QueryResult> {
        let params = [("query", expr.to_string()), ("time", unix_seconds(at))];
        self.get("/api/v1/query", &params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_base_url() {
        let c = PrometheusClient::new("http://prom:9090/prefix/", Duration::from_secs(1)).unwrap();
        assert_eq!(c.addr, "prom:9090");
        assert_eq!(c.host, "prom:9090");
        assert_eq!(c.base_path, "/prefix");

        let c = PrometheusClient::new("http://prom", Duration::from_secs(1)).unwrap();
        assert_eq!(c.addr, "prom:80");
        assert_eq!(c.base_path, "");
    }

    #[test]
    fn rejects_non_http_urls() {
        assert!(PrometheusClient::new("https://prom:9090", Duration::from_secs(1)).is_err());
        assert!(PrometheusClient::new("not a url", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn decodes_success_envelope() {
        let body = br#"{"status":"success","data":["api","db"]}"#;
        let jobs: Vec<String> = decode_response(StatusCode::OK, body, "/x").unwrap();
        assert_eq!(jobs, vec!["api", "db"]);
    }

    #[test]
    fn decodes_error_envelope() {
        let body = br#"{"status":"error","errorType":"bad_data","error":"parse error"}"#;
        let err = decode_response::<Vec<String>>(StatusCode::BAD_REQUEST, body, "/x").unwrap_err();
        match err {
            UpstreamError::Api {
                error_type,
                message,
            } => {
                assert_eq!(error_type, "bad_data");
                assert_eq!(message, "parse error");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn not_found_and_garbage() {
        assert!(matches!(
            decode_response::<Vec<String>>(StatusCode::NOT_FOUND, b"404 page not found", "/x"),
            Err(UpstreamError::NotFound(_))
        ));
        assert!(matches!(
            decode_response::<Vec<String>>(StatusCode::BAD_GATEWAY, b"<html>", "/x"),
            Err(UpstreamError::Status { status: 502, .. })
        ));
        assert!(matches!(
            decode_response::<Vec<String>>(StatusCode::OK, b"<html>", "/x"),
            Err(UpstreamError::Decode(_))
        ));
    }

    #[test]
    fn timestamps_render_as_unix_seconds() {
        let ts = Utc.timestamp_millis_opt(1_700_000_000_250).unwrap();
        assert_eq!(unix_seconds(ts), "1700000000.250");
    }
}
