//! Probe capabilities.
//!
//! The dispatcher never opens sockets or parses DNS itself; each protocol
//! is reached through one of the traits below. Built-in implementations
//! cover HTTP (reqwest) and TCP (tokio); DNS beyond system A/AAAA lookups
//! and TLS inspection are injected by the embedding application or by
//! tests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Infrastructure-level probe failure.
///
/// Assertion failures (wrong status, wrong record value) are not errors;
/// they are encoded in the Outcome. Only `Timeout` and `Network` are
/// transient and eligible for retry.
#[derive(Debug, Clone, Error)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("probe capability unavailable: {0}")]
    Unsupported(String),
}

impl ProbeError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProbeError::Timeout(_) | ProbeError::Network(_))
    }
}

/// One HTTP request as the dispatcher wants it executed.
#[derive(Debug, Clone)]
pub struct HttpProbeRequest {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub timeout: Duration,
    pub follow_redirects: bool,
    pub verify_ssl: bool,
}

#[derive(Debug, Clone)]
pub struct HttpProbeResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    pub response_time_ms: u64,
}

#[async_trait]
pub trait HttpProbe: Send + Sync {
    async fn send(&self, request: &HttpProbeRequest) -> Result<HttpProbeResponse, ProbeError>;
}

#[derive(Debug, Clone)]
pub struct TcpProbeRequest {
    pub hostname: String,
    pub port: u16,
    pub timeout: Duration,
    /// Payload written after connect.
    pub send: Option<String>,
    /// Read a reply after writing the payload.
    pub read_reply: bool,
}

#[derive(Debug, Clone)]
pub struct TcpProbeReply {
    pub connect_time_ms: u64,
    pub reply: Option<String>,
}

#[async_trait]
pub trait TcpProbe: Send + Sync {
    async fn exchange(&self, request: &TcpProbeRequest) -> Result<TcpProbeReply, ProbeError>;
}

#[derive(Debug, Clone)]
pub struct DnsQuery {
    pub hostname: String,
    pub record_type: String,
    /// Specific nameserver to ask; None means the system resolver.
    pub nameserver: Option<String>,
    pub timeout: Duration,
}

#[async_trait]
pub trait DnsProbe: Send + Sync {
    /// Resolve the record. An empty vector means the name resolved to
    /// nothing (a deterministic outcome, not an error).
    async fn resolve(&self, query: &DnsQuery) -> Result<Vec<String>, ProbeError>;
}

/// Negotiated TLS session as reported by the capability.
#[derive(Debug, Clone)]
pub struct TlsSessionInfo {
    pub protocol: String,
    pub cipher_suite: String,
    pub key_strength_bits: u32,
    pub days_until_expiry: i64,
}

#[async_trait]
pub trait TlsProbe: Send + Sync {
    async fn inspect(
        &self,
        hostname: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<TlsSessionInfo, ProbeError>;
}

/// Capability bundle handed to the dispatcher.
#[derive(Clone)]
pub struct Probes {
    pub http: Arc<dyn HttpProbe>,
    pub tcp: Arc<dyn TcpProbe>,
    pub dns: Arc<dyn DnsProbe>,
    pub tls: Arc<dyn TlsProbe>,
}

impl Probes {
    /// Built-in capabilities: reqwest for HTTP, tokio for TCP, the system
    /// resolver for A/AAAA lookups. TLS inspection must be injected.
    pub fn builtin() -> Self {
        Self {
            http: Arc::new(ReqwestHttpProbe),
            tcp: Arc::new(TokioTcpProbe),
            dns: Arc::new(SystemDnsProbe),
            tls: Arc::new(NoTlsProbe),
        }
    }
}

/// HTTP probe backed by reqwest.
pub struct ReqwestHttpProbe;

#[async_trait]
impl HttpProbe for ReqwestHttpProbe {
    async fn send(&self, request: &HttpProbeRequest) -> Result<HttpProbeResponse, ProbeError> {
        let redirect = if request.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        };
        let client = reqwest::Client::builder()
            .redirect(redirect)
            .danger_accept_invalid_certs(!request.verify_ssl)
            .timeout(request.timeout)
            .build()
            .map_err(|e| ProbeError::Network(e.to_string()))?;

        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| ProbeError::Unsupported(format!("method {}", request.method)))?;

        let mut builder = client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let started = Instant::now();
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ProbeError::Timeout(request.timeout)
            } else {
                ProbeError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let mut headers = BTreeMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str().to_string(), value.to_string());
            }
        }
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                ProbeError::Timeout(request.timeout)
            } else {
                ProbeError::Network(e.to_string())
            }
        })?;

        Ok(HttpProbeResponse {
            status,
            headers,
            body,
            response_time_ms: started.elapsed().as_millis() as u64,
        })
    }
}

/// TCP probe backed by tokio sockets.
pub struct TokioTcpProbe;

#[async_trait]
impl TcpProbe for TokioTcpProbe {
    async fn exchange(&self, request: &TcpProbeRequest) -> Result<TcpProbeReply, ProbeError> {
        let address = format!("{}:{}", request.hostname, request.port);
        let started = Instant::now();

        let connect = TcpStream::connect(&address);
        let mut stream = tokio::time::timeout(request.timeout, connect)
            .await
            .map_err(|_| ProbeError::Timeout(request.timeout))?
            .map_err(|e| ProbeError::Network(e.to_string()))?;
        let connect_time_ms = started.elapsed().as_millis() as u64;

        let mut reply = None;
        if let Some(payload) = &request.send {
            stream
                .write_all(payload.as_bytes())
                .await
                .map_err(|e| ProbeError::Network(e.to_string()))?;

            if request.read_reply {
                let mut buf = vec![0u8; 4096];
                let read = tokio::time::timeout(request.timeout, stream.read(&mut buf))
                    .await
                    .map_err(|_| ProbeError::Timeout(request.timeout))?
                    .map_err(|e| ProbeError::Network(e.to_string()))?;
                reply = Some(String::from_utf8_lossy(&buf[..read]).into_owned());
            }
        }

        Ok(TcpProbeReply {
            connect_time_ms,
            reply,
        })
    }
}

/// System-resolver DNS probe. Handles A/AAAA through the host resolver;
/// custom nameservers and other record types need an injected capability.
pub struct SystemDnsProbe;

#[async_trait]
impl DnsProbe for SystemDnsProbe {
    async fn resolve(&self, query: &DnsQuery) -> Result<Vec<String>, ProbeError> {
        if query.nameserver.is_some() {
            return Err(ProbeError::Unsupported(
                "system resolver cannot target a specific nameserver".to_string(),
            ));
        }
        if query.record_type != "A" && query.record_type != "AAAA" {
            return Err(ProbeError::Unsupported(format!(
                "system resolver cannot query {} records",
                query.record_type
            )));
        }

        let lookup = tokio::net::lookup_host(format!("{}:0", query.hostname));
        let addrs = tokio::time::timeout(query.timeout, lookup)
            .await
            .map_err(|_| ProbeError::Timeout(query.timeout))?
            .map_err(|e| ProbeError::Network(e.to_string()))?;

        let want_v4 = query.record_type == "A";
        Ok(addrs
            .filter(|a| a.is_ipv4() == want_v4)
            .map(|a| a.ip().to_string())
            .collect())
    }
}

/// Placeholder TLS capability; inspecting certificates requires an
/// injected implementation.
pub struct NoTlsProbe;

#[async_trait]
impl TlsProbe for NoTlsProbe {
    async fn inspect(
        &self,
        _hostname: &str,
        _port: u16,
        _timeout: Duration,
    ) -> Result<TlsSessionInfo, ProbeError> {
        Err(ProbeError::Unsupported(
            "no TLS inspection capability configured".to_string(),
        ))
    }
}
