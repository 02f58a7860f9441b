//! Verification client: one plain HTTP/1.1 GET per check.
//!
//! # Request
//!
//! ```text
//! GET /activation/check?hwid=<fingerprint>&product_key=<key> HTTP/1.1
//! Host: activation.example.com
//! User-Agent: activationd/0.1.0
//! Connection: close
//! ```
//!
//! Which query parameters are present depends on the [`Channel`].
//!
//! # Response
//!
//! Everything up to the first blank line is ignored. After that, the first
//! line consisting of exactly `OK` or `FAIL` decides the outcome. Anything
//! else (transport failure, timeout, no token) resolves to
//! [`ActivationState::Activated`].

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use crate::channel::Channel;
use crate::config::DaemonConfig;
use crate::errors::NetworkError;
use crate::hardware::Fingerprint;

/// Sent with every request.
pub const USER_AGENT: &str = concat!("activationd/", env!("CARGO_PKG_VERSION"));

/// Read size per socket read.
const READ_CHUNK: usize = 4096;

/// Responses are never buffered past this; a token has to show up earlier.
const MAX_RESPONSE_BYTES: usize = 64 * 1024;

/// Outcome of a verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationState {
    Activated,
    NotActivated,
}

impl fmt::Display for ActivationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivationState::Activated => write!(f, "activated"),
            ActivationState::NotActivated => write!(f, "not activated"),
        }
    }
}

/// Where the verification server lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            path: path.into(),
        }
    }

    fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn host_header(&self) -> String {
        if self.port == 80 {
            self.host.clone()
        } else {
            self.authority()
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "http://{}{}", self.host_header(), self.path)
    }
}

/// Anything that can answer "is this copy activated?".
pub trait Verifier {
    fn verify(
        &self,
        fingerprint: &Fingerprint,
        key: &str,
        channel: Channel,
    ) -> impl Future<Output = ActivationState>;
}

/// Talks to the verification endpoint over a raw TCP connection.
#[derive(Debug, Clone)]
pub struct VerificationClient {
    endpoint: Endpoint,
    timeout: Duration,
}

impl VerificationClient {
    pub fn new(endpoint: Endpoint, timeout: Duration) -> Self {
        Self { endpoint, timeout }
    }

    pub fn from_config(config: &DaemonConfig) -> Self {
        Self::new(
            Endpoint::new(
                config.server.host.clone(),
                config.server.port,
                config.server.path.clone(),
            ),
            config.request_timeout(),
        )
    }

    /// Send `request` and scan the reply until a token, end of stream, or the deadline.
    ///
    /// `Ok(None)` means the exchange completed but carried no recognisable token.
    async fn exchange(&self, request: &str) -> Result<Option<ActivationState>, NetworkError> {
        let deadline = Instant::now() + self.timeout;
        let addr = self.endpoint.authority();

        let mut stream = timeout_at(deadline, TcpStream::connect(&addr))
            .await
            .map_err(|_| NetworkError::Timeout(self.timeout, "connect"))?
            .map_err(|source| NetworkError::Connect { addr, source })?;

        timeout_at(deadline, stream.write_all(request.as_bytes()))
            .await
            .map_err(|_| NetworkError::Timeout(self.timeout, "send"))?
            .map_err(NetworkError::Send)?;

        let mut response = Vec::with_capacity(READ_CHUNK);
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            let n = timeout_at(deadline, stream.read(&mut chunk))
                .await
                .map_err(|_| NetworkError::Timeout(self.timeout, "response"))?
                .map_err(NetworkError::Receive)?;

            if n == 0 {
                return Ok(scan_response(&String::from_utf8_lossy(&response), true));
            }

            response.extend_from_slice(&chunk[..n]);

            if let Some(state) = scan_response(&String::from_utf8_lossy(&response), false) {
                return Ok(Some(state));
            }

            if response.len() >= MAX_RESPONSE_BYTES {
                debug!(
                    "Giving up on response after {} bytes without a token",
                    response.len()
                );
                return Ok(None);
            }
        }
    }
}

impl Verifier for VerificationClient {
    async fn verify(
        &self,
        fingerprint: &Fingerprint,
        key: &str,
        channel: Channel,
    ) -> ActivationState {
        let request = build_request(&self.endpoint, fingerprint, key, channel);
        debug!(%channel, endpoint = %self.endpoint, "Sending activation check");

        match self.exchange(&request).await {
            Ok(Some(state)) => {
                debug!(%state, "Verification server answered");
                state
            }
            Ok(None) => {
                warn!(
                    endpoint = %self.endpoint,
                    "No OK/FAIL line in verification response, assuming activated"
                );
                ActivationState::Activated
            }
            Err(e) => {
                warn!(endpoint = %self.endpoint, "Verification failed ({e}), assuming activated");
                ActivationState::Activated
            }
        }
    }
}

/// Build the GET request for `channel`.
///
/// OEM sends only `hwid`, Retail sends `hwid` and `product_key`, Volume sends
/// only `product_key`. An empty key is still sent as `product_key=`.
pub fn build_request(
    endpoint: &Endpoint,
    fingerprint: &Fingerprint,
    key: &str,
    channel: Channel,
) -> String {
    let mut params = Vec::with_capacity(2);
    if channel.sends_hwid() {
        params.push(format!("hwid={}", urlencoding::encode(fingerprint.as_str())));
    }
    if channel.sends_product_key() {
        params.push(format!("product_key={}", urlencoding::encode(key)));
    }

    format!(
        "GET {}?{} HTTP/1.1\r\nHost: {}\r\nUser-Agent: {}\r\nAccept: */*\r\nConnection: close\r\n\r\n",
        endpoint.path,
        params.join("&"),
        endpoint.host_header(),
        USER_AGENT,
    )
}

/// Find the verdict in a (possibly partial) response.
///
/// With `complete == false` the trailing unterminated line is held back,
/// since more bytes may still extend it.
pub fn scan_response(response: &str, complete: bool) -> Option<ActivationState> {
    let mut lines: Vec<&str> = response.split('\n').collect();
    if !complete {
        lines.pop();
    }

    let mut in_body = false;
    for line in lines {
        let line = line.trim();
        if !in_body {
            in_body = line.is_empty();
            continue;
        }
        match line {
            "OK" => return Some(ActivationState::Activated),
            "FAIL" => return Some(ActivationState::NotActivated),
            _ => {}
        }
    }

    None
}
