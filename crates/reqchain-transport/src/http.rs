//! `reqwest`-backed transport.

use std::time::Duration;

use reqchain_engine::Transport;
use reqchain_types::{Config, HttpConfig, Outcome, Payload, TransportError};
use reqwest::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
use reqwest::Method;
use tokio::runtime::Handle;

use crate::request::{append_cookie_pairs, is_json_content_type, normalize_body, parse_headers};

/// HTTP client settings.
#[derive(Debug, Clone, Default)]
pub struct HttpOptions {
    /// Skip TLS certificate verification.
    pub accept_invalid_certs: bool,
}

/// Executes HTTP configs with a shared async client.
///
/// The engine calls [`Transport::execute`] from a blocking worker thread; each
/// call drives one request to completion on `handle`. Cookies set by a
/// response are kept in the client's store for the rest of the run.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    handle: Handle,
}

impl HttpTransport {
    /// # Errors
    ///
    /// Fails if the TLS backend cannot be initialized.
    pub fn new(options: &HttpOptions, handle: Handle) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .danger_accept_invalid_certs(options.accept_invalid_certs)
            .build()
            .map_err(|e| TransportError::InvalidRequest(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, handle })
    }

    async fn send(
        &self,
        http: &HttpConfig,
        cookie: &[u8],
        timeout: Duration,
        outcome: &mut Outcome,
    ) -> Result<(), TransportError> {
        let url = std::str::from_utf8(http.url.trim_ascii())
            .map_err(|_| TransportError::InvalidRequest("URL is not valid UTF-8".into()))?;
        if url.is_empty() {
            return Err(TransportError::InvalidRequest("missing URL".into()));
        }
        let method = match http.method.trim_ascii() {
            b"" => Method::GET,
            m => Method::from_bytes(&m.to_ascii_uppercase()).map_err(|_| {
                TransportError::InvalidRequest(format!(
                    "invalid method {:?}",
                    String::from_utf8_lossy(m)
                ))
            })?,
        };

        let headers = parse_headers(&http.headers);
        let mut request = self.client.request(method.clone(), url).timeout(timeout);
        for (name, value) in &headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let has_cookie_header = headers.iter().any(|(n, _)| n.eq_ignore_ascii_case("cookie"));
        if !cookie.is_empty() && !has_cookie_header {
            request = request.header(COOKIE, cookie.to_vec());
        }
        if !http.body.is_empty() {
            let body = if is_json_content_type(&headers) {
                http.body.clone()
            } else {
                normalize_body(&http.body)
            };
            request = request.body(body);
        }

        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                TransportError::Timeout {
                    after_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                }
            } else if e.is_builder() {
                TransportError::InvalidRequest(e.to_string())
            } else {
                TransportError::Request(e.to_string())
            }
        };

        let response = request.send().await.map_err(classify)?;
        let status = response.status();
        outcome.status = Some(status.as_u16());
        outcome.is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.to_ascii_lowercase().contains("json"));
        append_cookie_pairs(
            response.headers().get_all(SET_COOKIE).iter().map(|v| v.as_bytes()),
            &mut outcome.cookie,
        );
        let body = response.bytes().await.map_err(classify)?;
        outcome.raw.extend_from_slice(&body);

        tracing::debug!(
            method = %method,
            url,
            status = status.as_u16(),
            bytes = body.len(),
            "HTTP response received"
        );
        Ok(())
    }
}

impl Transport for HttpTransport {
    fn execute(
        &self,
        config: &Config,
        timeout: Duration,
        outcome: &mut Outcome,
    ) -> Result<(), TransportError> {
        match &config.payload {
            Payload::Http(http) => {
                self.handle
                    .block_on(self.send(http, &config.cookie, timeout, outcome))
            }
            Payload::Grpc(_) => Err(TransportError::Unsupported("grpc")),
            Payload::Repeat(_) => Err(TransportError::Unsupported("repeat")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread::JoinHandle;

    use reqchain_types::{ConfigType, FieldKey};

    /// Serve one connection with `response`, returning the raw request.
    fn serve_once(response: String, delay: Duration) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = format!("http://{}", listener.local_addr().unwrap());
        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            let head_end = loop {
                let n = stream.read(&mut buf).unwrap();
                request.extend_from_slice(&buf[..n]);
                if let Some(i) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                    break i + 4;
                }
                if n == 0 {
                    break request.len();
                }
            };
            let head = String::from_utf8_lossy(&request[..head_end]).to_ascii_lowercase();
            let body_len = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            while request.len() < head_end + body_len {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            std::thread::sleep(delay);
            let _ = stream.write_all(response.as_bytes());
            String::from_utf8_lossy(&request).into_owned()
        });
        (addr, handle)
    }

    fn http_config(url: &str, method: &str, headers: &str, body: &str) -> Config {
        let mut cfg = Config::blank(ConfigType::Http);
        cfg.set_field(FieldKey::Url, url.as_bytes()).unwrap();
        cfg.set_field(FieldKey::Method, method.as_bytes()).unwrap();
        cfg.set_field(FieldKey::Headers, headers.as_bytes()).unwrap();
        cfg.set_field(FieldKey::Body, body.as_bytes()).unwrap();
        cfg
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn captures_body_status_and_cookies() {
        let body = r#"{"token":"T1"}"#;
        let (addr, server) = serve_once(
            format!(
                "HTTP/1.1 201 Created\r\nContent-Type: application/json\r\nSet-Cookie: sid=abc; Path=/\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            ),
            Duration::ZERO,
        );
        let transport = HttpTransport::new(&HttpOptions::default(), Handle::current()).unwrap();
        let mut cfg = http_config(
            &format!("{addr}/login"),
            "post",
            "{\n  X-Trace: 1\n}",
            "\n   user=admin\n   &pass=x\n",
        );
        cfg.cookie.extend_from_slice(b"seed=1");

        let (result, outcome) = tokio::task::spawn_blocking(move || {
            let mut outcome = Outcome::default();
            let result = transport.execute(&cfg, Duration::from_secs(2), &mut outcome);
            (result, outcome)
        })
        .await
        .unwrap();

        result.unwrap();
        assert_eq!(outcome.status, Some(201));
        assert!(outcome.is_json);
        assert_eq!(outcome.raw, body.as_bytes());
        assert_eq!(outcome.cookie, b"sid=abc");

        let request = server.join().unwrap();
        assert!(request.starts_with("POST /login HTTP/1.1\r\n"));
        let lower = request.to_ascii_lowercase();
        assert!(lower.contains("x-trace: 1\r\n"));
        assert!(lower.contains("cookie: seed=1\r\n"));
        assert!(request.ends_with("\r\n\r\nuser=admin\n&pass=x"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn slow_server_times_out() {
        let (addr, server) = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n".to_string(),
            Duration::from_millis(500),
        );
        let transport = HttpTransport::new(&HttpOptions::default(), Handle::current()).unwrap();
        let cfg = http_config(&addr, "", "", "");

        let result = tokio::task::spawn_blocking(move || {
            transport.execute(&cfg, Duration::from_millis(100), &mut Outcome::default())
        })
        .await
        .unwrap();

        assert_eq!(result, Err(TransportError::Timeout { after_ms: 100 }));
        let _ = server.join();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn rejects_unusable_configs() {
        let transport = HttpTransport::new(&HttpOptions::default(), Handle::current()).unwrap();
        let grpc = Config::blank(ConfigType::Grpc);
        let no_url = http_config("", "GET", "", "");
        let bad_method = http_config("http://127.0.0.1:1", "GE T", "", "");

        let results = tokio::task::spawn_blocking(move || {
            let mut outcome = Outcome::default();
            [
                transport.execute(&grpc, Duration::from_secs(1), &mut outcome),
                transport.execute(&no_url, Duration::from_secs(1), &mut outcome),
                transport.execute(&bad_method, Duration::from_secs(1), &mut outcome),
            ]
        })
        .await
        .unwrap();

        assert_eq!(results[0], Err(TransportError::Unsupported("grpc")));
        assert_eq!(
            results[1],
            Err(TransportError::InvalidRequest("missing URL".into()))
        );
        assert!(matches!(results[2], Err(TransportError::InvalidRequest(_))));
    }
}
