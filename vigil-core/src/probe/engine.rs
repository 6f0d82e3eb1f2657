use std::error::Error as StdError;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, LOCATION, RANGE};
use reqwest::{Client, Response, Url};
use tokio::sync::Semaphore;
use tracing::{debug, instrument};

use super::cert::ssl_info_from_der;
use super::types::{HeaderSummary, ProbeRequest, ProbeResponse, ProbeResult, RequestMethod};
use crate::config::CheckConfig;
use crate::error::{ErrorCode, Result};

const ACCEPT_VALUE: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const ACCEPT_LANGUAGE_VALUE: &str = "en-US,en;q=0.9";

/// A single HTTP(S) attempt. Implementations never follow redirects or retry.
pub trait HttpProbe: Send + Sync {
    fn request(&self, request: ProbeRequest<'_>) -> impl Future<Output = ProbeResult> + Send;
}

/// reqwest-backed probe engine shared by every check in a run.
///
/// HTTPS is tried with certificate verification first; a handshake rejected
/// for trust reasons is repeated without verification so the certificate can
/// still be reported (with `valid_by_trust_store = false`).
#[derive(Debug, Clone)]
pub struct HttpProbeEngine {
    strict: Client,
    lenient: Client,
    https_sockets: Arc<Semaphore>,
    http_sockets: Arc<Semaphore>,
    keep_alive: bool,
    max_body_bytes: usize,
}

impl HttpProbeEngine {
    pub fn new(config: &CheckConfig) -> Result<Self> {
        let strict = build_client(config, false)?;
        let lenient = build_client(config, true)?;
        let sockets = config.max_sockets.max(1);

        Ok(Self {
            strict,
            lenient,
            https_sockets: Arc::new(Semaphore::new(sockets)),
            http_sockets: Arc::new(Semaphore::new(sockets)),
            keep_alive: config.keep_alive,
            max_body_bytes: config.max_body_bytes,
        })
    }

    /// Issues one request. Cancellation drops the in-flight connection and
    /// reports [`ErrorCode::Demote`].
    #[instrument(skip(self, request), fields(url = %request.url, method = %request.method))]
    pub async fn probe(&self, request: ProbeRequest<'_>) -> ProbeResult {
        let url = match Url::parse(request.url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => url,
            _ => return Err(ErrorCode::InvalidUrl),
        };

        let attempt = tokio::time::timeout(request.timeout, self.dispatch(&url, request.method));

        let outcome = match request.cancel {
            Some(cancel) => {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ErrorCode::Demote),
                    outcome = attempt => outcome,
                }
            }
            None => attempt.await,
        };

        match outcome {
            Ok(result) => result,
            Err(_) => {
                debug!("Request timed out");
                Err(ErrorCode::Timeout)
            }
        }
    }

    async fn dispatch(&self, url: &Url, method: RequestMethod) -> ProbeResult {
        let https = url.scheme() == "https";
        let sockets = if https {
            &self.https_sockets
        } else {
            &self.http_sockets
        };
        let _permit = sockets.acquire().await.map_err(|_| ErrorCode::Unknown)?;

        let mut start = Instant::now();
        let (mut response, trusted) = match send(&self.strict, url, method).await {
            Ok(response) => (response, true),
            Err(e) if https && is_tls_rejection(&e) => {
                debug!(error = %e, "Certificate rejected, repeating without verification");
                start = Instant::now();
                let response = send(&self.lenient, url, method)
                    .await
                    .map_err(|e| classify_error(&e))?;
                (response, false)
            }
            Err(e) => {
                let code = classify_error(&e);
                debug!(error = %e, code = %code, "Request failed");
                return Err(code);
            }
        };
        let response_time_ms = start.elapsed().as_millis() as u64;

        let http_code = response.status().as_u16();
        let headers = HeaderSummary::from_headers(response.headers());
        let redirect_location = redirect_target(url, response.headers());
        let ssl = if https {
            response
                .extensions()
                .get::<reqwest::tls::TlsInfo>()
                .and_then(|info| info.peer_certificate())
                .map(|der| ssl_info_from_der(der, url.host_str().unwrap_or_default(), trusted, Utc::now()))
        } else {
            None
        };

        if method == RequestMethod::Get && self.keep_alive {
            self.drain_body(&mut response).await;
        }

        debug!(http_code, response_time_ms, "Response received");
        Ok(ProbeResponse {
            http_code,
            response_time_ms,
            headers,
            redirect_location,
            ssl,
        })
    }

    /// Reads (and discards) up to the body cap so the connection can be reused.
    async fn drain_body(&self, response: &mut Response) {
        let mut read = 0usize;
        while let Ok(Some(chunk)) = response.chunk().await {
            read += chunk.len();
            if self.max_body_bytes > 0 && read > self.max_body_bytes {
                break;
            }
        }
    }
}

impl HttpProbe for HttpProbeEngine {
    fn request(&self, request: ProbeRequest<'_>) -> impl Future<Output = ProbeResult> + Send {
        self.probe(request)
    }
}

fn build_client(config: &CheckConfig, accept_invalid: bool) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_VALUE));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(ACCEPT_LANGUAGE_VALUE));

    let idle = if config.keep_alive {
        config.max_idle_sockets
    } else {
        0
    };

    let mut builder = Client::builder()
        .user_agent(config.user_agent.as_str())
        .default_headers(headers)
        .redirect(reqwest::redirect::Policy::none())
        .tls_info(true)
        .http1_only()
        .pool_max_idle_per_host(idle);

    if accept_invalid {
        builder = builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true);
    }
    if config.force_ipv4 {
        builder = builder.local_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }

    Ok(builder.build()?)
}

fn send(
    client: &Client,
    url: &Url,
    method: RequestMethod,
) -> impl Future<Output = reqwest::Result<Response>> {
    let builder = match method {
        RequestMethod::Head => client.head(url.clone()),
        RequestMethod::Get => client.get(url.clone()).header(RANGE, "bytes=0-0"),
    };
    builder.send()
}

/// Absolute `Location` targets are kept verbatim; relative ones are resolved
/// against the URL that was requested.
fn redirect_target(url: &Url, headers: &HeaderMap) -> Option<String> {
    let location = headers.get(LOCATION)?.to_str().ok()?.trim();
    if location.is_empty() {
        return None;
    }
    let lower = location.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return Some(location.to_string());
    }
    Some(
        url.join(location)
            .map(|joined| joined.to_string())
            .unwrap_or_else(|_| location.to_string()),
    )
}

fn sources(error: &reqwest::Error) -> impl Iterator<Item = &(dyn StdError + 'static)> {
    std::iter::successors(error.source(), |e| {
        let e: &(dyn StdError + 'static) = *e;
        e.source()
    })
}

fn is_tls_rejection(error: &reqwest::Error) -> bool {
    sources(error).any(|e| {
        if e.downcast_ref::<native_tls::Error>().is_some() {
            return true;
        }
        let message = e.to_string().to_lowercase();
        message.contains("certificate") || message.contains("handshake")
    })
}

/// Folds a reqwest failure into the result taxonomy.
pub fn classify_error(error: &reqwest::Error) -> ErrorCode {
    if error.is_timeout() {
        return ErrorCode::Timeout;
    }
    if error.is_builder() {
        return ErrorCode::InvalidUrl;
    }

    for source in sources(error) {
        if let Some(io) = source.downcast_ref::<std::io::Error>() {
            if let Some(code) = ErrorCode::from_io(io) {
                return code;
            }
        }
        if source.downcast_ref::<native_tls::Error>().is_some() {
            return ErrorCode::TlsFail;
        }
        let message = source.to_string().to_lowercase();
        if message.contains("dns error") || message.contains("failed to lookup address") {
            return ErrorCode::DnsFail;
        }
    }

    ErrorCode::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio_util::sync::CancellationToken;

    /// Serves `response` to every connection after reading the request head.
    async fn serve(response: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 1024];
                    loop {
                        match socket.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => buf.extend_from_slice(&chunk[..n]),
                        }
                        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                            break;
                        }
                    }
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        port
    }

    /// Accepts connections and never answers.
    async fn silent() -> (u16, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        (port, handle)
    }

    /// HTTPS server with a fresh self-signed certificate. Handshakes run on
    /// a plain thread; the first connection waits `first_delay` before its
    /// handshake starts.
    fn serve_self_signed(first_delay: Duration) -> u16 {
        use std::io::{Read, Write};

        let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let identity = native_tls::Identity::from_pkcs8(
            generated.cert.pem().as_bytes(),
            generated.key_pair.serialize_pem().as_bytes(),
        )
        .unwrap();
        let acceptor = native_tls::TlsAcceptor::new(identity).unwrap();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        std::thread::spawn(move || {
            for (n, stream) in listener.incoming().enumerate() {
                let Ok(stream) = stream else { break };
                if n == 0 {
                    std::thread::sleep(first_delay);
                }
                let Ok(mut tls) = acceptor.accept(stream) else {
                    continue;
                };
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match tls.read(&mut chunk) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let _ = tls.write_all(
                    b"HTTP/1.1 200 OK\r\nServer: tls-unit\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                );
                let _ = tls.shutdown();
            }
        });
        port
    }

    fn engine() -> HttpProbeEngine {
        HttpProbeEngine::new(&CheckConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_plain_http_ok() {
        let port = serve(
            "HTTP/1.1 200 OK\r\nServer: unit\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let url = format!("http://127.0.0.1:{}", port);

        let response = engine()
            .probe(ProbeRequest::new(&url, RequestMethod::Head, Duration::from_secs(5)))
            .await
            .unwrap();

        assert_eq!(response.http_code, 200);
        assert_eq!(response.headers.server.as_deref(), Some("unit"));
        assert!(response.redirect_location.is_none());
        assert!(response.ssl.is_none());
    }

    #[tokio::test]
    async fn test_untrusted_certificate_still_reports_ssl() {
        let port = serve_self_signed(Duration::ZERO);
        let url = format!("https://127.0.0.1:{}", port);

        let response = engine()
            .probe(ProbeRequest::new(&url, RequestMethod::Head, Duration::from_secs(10)))
            .await
            .unwrap();

        assert_eq!(response.http_code, 200);
        assert_eq!(response.headers.server.as_deref(), Some("tls-unit"));
        let ssl = response.ssl.unwrap();
        assert!(ssl.enabled);
        assert!(!ssl.valid_by_trust_store);
        assert!(ssl.self_signed);
        assert!(ssl.valid_to.is_some());
    }

    #[tokio::test]
    async fn test_rejected_handshake_is_not_timed() {
        let port = serve_self_signed(Duration::from_millis(1_500));
        let url = format!("https://127.0.0.1:{}", port);

        let started = Instant::now();
        let response = engine()
            .probe(ProbeRequest::new(&url, RequestMethod::Head, Duration::from_secs(10)))
            .await
            .unwrap();

        assert!(started.elapsed() >= Duration::from_millis(1_500));
        assert!(
            response.response_time_ms < 1_000,
            "{}ms",
            response.response_time_ms
        );
        assert!(!response.ssl.unwrap().valid_by_trust_store);
    }

    #[tokio::test]
    async fn test_relative_redirect_resolves_against_request_url() {
        let port = serve(
            "HTTP/1.1 301 Moved Permanently\r\nLocation: /next\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let url = format!("http://127.0.0.1:{}/start/here", port);

        let response = engine()
            .probe(ProbeRequest::new(&url, RequestMethod::Get, Duration::from_secs(5)))
            .await
            .unwrap();

        assert_eq!(response.http_code, 301);
        assert!(response.is_redirect());
        assert_eq!(
            response.redirect_location,
            Some(format!("http://127.0.0.1:{}/next", port))
        );
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let (port, _server) = silent().await;
        let url = format!("http://127.0.0.1:{}", port);

        let result = engine()
            .probe(ProbeRequest::new(&url, RequestMethod::Head, Duration::from_millis(200)))
            .await;

        assert_eq!(result, Err(ErrorCode::Timeout));
    }

    #[tokio::test]
    async fn test_cancellation_reports_demote() {
        let (port, _server) = silent().await;
        let url = format!("http://127.0.0.1:{}", port);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let result = engine()
            .probe(
                ProbeRequest::new(&url, RequestMethod::Head, Duration::from_secs(10))
                    .with_cancel(Some(&cancel)),
            )
            .await;

        assert_eq!(result, Err(ErrorCode::Demote));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_invalid_urls() {
        let engine = engine();
        for url in ["not a url", "ftp://a.example/", "http://"] {
            let result = engine
                .probe(ProbeRequest::new(url, RequestMethod::Head, Duration::from_secs(1)))
                .await;
            assert_eq!(result, Err(ErrorCode::InvalidUrl), "{}", url);
        }
    }

    #[tokio::test]
    async fn test_closed_port_is_refused() {
        let port = {
            let spare = TcpListener::bind("127.0.0.1:0").await.unwrap();
            spare.local_addr().unwrap().port()
        };
        let url = format!("http://127.0.0.1:{}", port);

        let result = engine()
            .probe(ProbeRequest::new(&url, RequestMethod::Head, Duration::from_secs(5)))
            .await;

        assert_eq!(result, Err(ErrorCode::ConnectionRefused));
    }

    #[test]
    fn test_redirect_target_keeps_absolute_locations() {
        let base = Url::parse("https://a.example/path").unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(LOCATION, HeaderValue::from_static("https://b.example"));
        assert_eq!(
            redirect_target(&base, &headers).as_deref(),
            Some("https://b.example")
        );

        headers.insert(LOCATION, HeaderValue::from_static("other"));
        assert_eq!(
            redirect_target(&base, &headers).as_deref(),
            Some("https://a.example/other")
        );
    }
}
