use reqwest::{Client, Response, StatusCode};
use thiserror::Error;
use uuid::Uuid;

use crate::config::{AuthConfig, UserAgentInfo};
use crate::errors::{AuthError, Result};

/// Longest response body excerpt kept in error messages.
const BODY_SNIPPET_CHARS: usize = 200;

/// Non-success response of one exchange step.
#[derive(Error, Debug)]
#[error("{step} failed with HTTP {status}: {body_snippet}")]
pub struct StatusError {
    pub step: &'static str,
    pub status: StatusCode,
    pub body_snippet: String,
}

/// `IAS/<version> (<session>; <loader> <loaderVersion>; Minecraft <game>; <runtime>)`
pub fn user_agent(info: &UserAgentInfo, session: Uuid) -> String {
    format!(
        "IAS/{} ({}; {} {}; Minecraft {}; {})",
        info.version, session, info.loader, info.loader_version, info.game_version, info.runtime
    )
}

pub(crate) fn build_client(config: &AuthConfig) -> Result<Client> {
    let agent = user_agent(&config.user_agent, Uuid::new_v4());
    let http = Client::builder()
        .connect_timeout(config.http_timeouts.connect)
        .timeout(config.http_timeouts.request)
        .user_agent(agent)
        .build()?;
    Ok(http)
}

/// Replaces every secret occurrence, then truncates.
pub(crate) fn redact(body: &str, secrets: &[&str]) -> String {
    let mut out = body.to_string();
    for secret in secrets.iter().filter(|s| !s.is_empty()) {
        out = out.replace(secret, "[REDACTED]");
    }
    out.chars().take(BODY_SNIPPET_CHARS).collect()
}

/// Reads the status and full text body of a response.
pub(crate) async fn read(response: Response) -> Result<(StatusCode, String)> {
    let status = response.status();
    let body = response.text().await?;
    Ok((status, body))
}

pub(crate) fn status_error(
    step: &'static str,
    status: StatusCode,
    body: &str,
    secrets: &[&str],
) -> AuthError {
    AuthError::unknown(StatusError {
        step,
        status,
        body_snippet: redact(body, secrets),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_format() {
        let info = UserAgentInfo {
            version: "9.0.0".into(),
            loader: "fabric".into(),
            loader_version: "0.16.0".into(),
            game_version: "1.21".into(),
            runtime: "Java 21".into(),
        };
        let session = Uuid::nil();
        assert_eq!(
            user_agent(&info, session),
            "IAS/9.0.0 (00000000-0000-0000-0000-000000000000; fabric 0.16.0; Minecraft 1.21; Java 21)"
        );
    }

    #[test]
    fn test_redact_hides_secrets_before_truncating() {
        let body = format!("{{\"error\":\"bad\",\"code\":\"{}\"}}", "s".repeat(300));
        let secret = "s".repeat(300);
        let redacted = redact(&body, &[&secret, ""]);
        assert_eq!(redacted, "{\"error\":\"bad\",\"code\":\"[REDACTED]\"}");

        let long = "x".repeat(500);
        assert_eq!(redact(&long, &[]).len(), BODY_SNIPPET_CHARS);
    }
}
