//! One-shot loopback listener receiving the browser-flow redirect.

use std::net::{Ipv4Addr, SocketAddr};
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use rand::Rng;
use rand::rngs::OsRng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::REDIRECT_PATH;
use crate::errors::{AuthError, Result, keys};

const STATE_CHARACTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789.-_";
const MAX_REQUEST_BYTES: usize = 8192;
const READ_TIMEOUT: Duration = Duration::from_secs(10);

fn random_state() -> String {
    let mut rng = OsRng;
    let len = rng.gen_range(96..128);
    (0..len)
        .map(|_| char::from(STATE_CHARACTERS[rng.gen_range(0..STATE_CHARACTERS.len())]))
        .collect()
}

enum Callback {
    Code(String),
    Denied(String),
    /// Request without `code` or `error`, e.g. a favicon fetch.
    Unrelated,
}

pub struct LoopbackServer {
    listener: TcpListener,
    port: u16,
    state: String,
    done_message: String,
}

impl LoopbackServer {
    /// Binds to the first free port of `ports` on the loopback interface.
    pub async fn bind(ports: RangeInclusive<u16>, done_message: impl Into<String>) -> Result<Self> {
        let mut failures = Vec::new();
        for port in ports.clone() {
            match TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await {
                Ok(listener) => {
                    let port = listener.local_addr().map_err(AuthError::unknown)?.port();
                    info!(port, "Loopback listener bound");
                    return Ok(Self {
                        listener,
                        port,
                        state: random_state(),
                        done_message: done_message.into(),
                    });
                }
                Err(e) => {
                    debug!(port, "Unable to bind loopback port: {}", e);
                    failures.push(format!("{port}: {e}"));
                }
            }
        }
        Err(AuthError::unknown(anyhow!(
            "Unable to bind to any port in {:?} ({})",
            ports,
            failures.join(", ")
        )))
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}{}", self.port, REDIRECT_PATH)
    }

    /// Serves requests until one carries `code` or `error`, answers it and
    /// shuts the listener down. Returns the authorization code.
    ///
    /// Every connection is served on its own task, so an idle peer cannot
    /// hold up the redirect.
    pub async fn accept(self) -> Result<String> {
        let expected = Arc::new(Expected {
            port: self.port,
            state: self.state,
            done_message: self.done_message,
        });
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = accepted.map_err(AuthError::unknown)?;
                    if !peer.ip().is_loopback() {
                        warn!(%peer, "Dropped non-loopback connection");
                        continue;
                    }
                    connections.spawn(serve(stream, peer, Arc::clone(&expected)));
                }
                Some(joined) = connections.join_next() => match joined {
                    Ok(Some(result)) => {
                        info!("Browser redirect handled, closing listener");
                        return result;
                    }
                    Ok(None) => {}
                    Err(e) => debug!("Loopback connection task failed: {}", e),
                },
            }
        }
    }
}

struct Expected {
    port: u16,
    state: String,
    done_message: String,
}

/// Answers one connection. `Some` once the redirect arrived.
async fn serve(mut stream: TcpStream, peer: SocketAddr, expected: Arc<Expected>) -> Option<Result<String>> {
    let callback = match tokio::time::timeout(READ_TIMEOUT, read_callback(&mut stream, peer, &expected)).await {
        Ok(Ok(callback)) => callback,
        Ok(Err(e)) => {
            warn!("Malformed loopback request: {}", e);
            respond(&mut stream, "400 Bad Request", "Invalid request").await;
            return None;
        }
        Err(_) => {
            debug!(%peer, "Dropped idle loopback connection");
            return None;
        }
    };

    match callback {
        Callback::Unrelated => {
            respond(&mut stream, "404 Not Found", "Not found").await;
            None
        }
        Callback::Denied(error) => {
            respond(&mut stream, "200 OK", "Authorization was not granted.").await;
            if error == "access_denied" {
                return Some(Err(AuthError::friendly(keys::CANCEL, "Authorization was denied")));
            }
            Some(Err(AuthError::unknown(anyhow!("Authorization failed: {error}"))))
        }
        Callback::Code(code) => {
            respond(&mut stream, "200 OK", &expected.done_message).await;
            Some(Ok(code))
        }
    }
}

async fn read_callback(stream: &mut TcpStream, peer: SocketAddr, expected: &Expected) -> anyhow::Result<Callback> {
    let mut buffer = vec![0u8; MAX_REQUEST_BYTES];
    let mut size = 0;
    while size < buffer.len() {
        let read = stream.read(&mut buffer[size..]).await?;
        if read == 0 {
            break;
        }
        size += read;
        if buffer[..size].windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    if size == 0 {
        return Err(anyhow!("empty request from {peer}"));
    }

    let request = String::from_utf8_lossy(&buffer[..size]);
    let request_line = request.lines().next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let path = parts.next().unwrap_or_default();
    if method != "GET" || !path.starts_with('/') {
        return Err(anyhow!("unexpected {method:?} request"));
    }

    let url = Url::parse(&format!("http://localhost:{}{path}", expected.port))?;
    let mut code = None;
    let mut state = None;
    let mut error = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    if code.is_none() && error.is_none() {
        return Ok(Callback::Unrelated);
    }
    if state.as_deref() != Some(expected.state.as_str()) {
        return Err(anyhow!("state mismatch"));
    }
    Ok(match (code, error) {
        (_, Some(error)) => Callback::Denied(error),
        (Some(code), None) if !code.is_empty() => Callback::Code(code),
        _ => return Err(anyhow!("empty authorization code")),
    })
}

async fn respond(stream: &mut TcpStream, status: &str, message: &str) {
    let body = format!(
        "<!doctype html><html><head><meta charset=\"utf-8\"><title>In-Game Account Switcher</title></head>\
        <body style=\"font-family: sans-serif; padding: 24px;\"><h2>{message}</h2></body></html>"
    );
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        debug!("Unable to answer loopback request: {}", e);
    }
    let _ = stream.shutdown().await;
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    async fn get(port: u16, path: &str) -> String {
        let mut stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost:{port}\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[test]
    fn test_random_state() {
        let a = random_state();
        assert!((96..128).contains(&a.len()));
        assert!(a.bytes().all(|b| STATE_CHARACTERS.contains(&b)));
        assert_ne!(a, random_state());
    }

    #[tokio::test]
    async fn test_accepts_one_redirect_then_closes() {
        let server = LoopbackServer::bind(0..=0, "All done").await.unwrap();
        let port = server.port();
        let state = server.state().to_string();
        assert!(server.redirect_uri().starts_with(&format!("http://localhost:{port}/")));
        let task = tokio::spawn(server.accept());

        let favicon = get(port, "/favicon.ico").await;
        assert!(favicon.starts_with("HTTP/1.1 404"));

        let response = get(port, &format!("{REDIRECT_PATH}?code=M.C123&state={state}")).await;
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("All done"));

        assert_eq!(task.await.unwrap().unwrap(), "M.C123");
        assert!(TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await.is_err());
    }

    #[tokio::test]
    async fn test_state_mismatch_is_ignored() {
        let server = LoopbackServer::bind(0..=0, "done").await.unwrap();
        let port = server.port();
        let state = server.state().to_string();
        let task = tokio::spawn(server.accept());

        let forged = get(port, "/in_game_account_switcher?code=evil&state=forged").await;
        assert!(forged.starts_with("HTTP/1.1 400"));

        get(port, &format!("/in_game_account_switcher?code=good&state={state}")).await;
        assert_eq!(task.await.unwrap().unwrap(), "good");
    }

    #[tokio::test]
    async fn test_idle_connection_does_not_block_redirect() {
        let server = LoopbackServer::bind(0..=0, "done").await.unwrap();
        let port = server.port();
        let state = server.state().to_string();
        let task = tokio::spawn(server.accept());

        let _idle = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let path = format!("/in_game_account_switcher?code=good&state={state}");
        let redirect = get(port, &path);
        let response = tokio::time::timeout(Duration::from_secs(3), redirect)
            .await
            .expect("redirect answered while another connection is idle");
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert_eq!(task.await.unwrap().unwrap(), "good");
    }

    #[tokio::test]
    async fn test_access_denied_cancels() {
        let server = LoopbackServer::bind(0..=0, "done").await.unwrap();
        let port = server.port();
        let state = server.state().to_string();
        let task = tokio::spawn(server.accept());

        get(port, &format!("/in_game_account_switcher?error=access_denied&state={state}")).await;
        let err = task.await.unwrap().unwrap_err();
        assert_eq!(err.friendly_key(), Some(keys::CANCEL));
    }

    #[tokio::test]
    async fn test_bind_fails_when_range_taken() {
        let taken = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = taken.local_addr().unwrap().port();
        assert!(LoopbackServer::bind(port..=port, "done").await.is_err());
    }
}
