//! Handshake URL construction.

use url::Url;

use crate::errors::{ClientError, Result};

fn invalid(base: &str, reason: impl Into<String>) -> ClientError {
    ClientError::InvalidUrl {
        url: base.to_owned(),
        reason: reason.into(),
    }
}

/// Append the agent identity to `base` as the `agentId` query parameter.
pub fn handshake_url(base: &str, agent_id: &str) -> Result<String> {
    if agent_id.is_empty() {
        return Err(ClientError::MissingAgentId);
    }
    let mut url = Url::parse(base.trim()).map_err(|e| invalid(base, e.to_string()))?;

    match url.scheme() {
        "ws" | "wss" => {}
        other => return Err(invalid(base, format!("scheme must be ws or wss, got {other}"))),
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid(base, "missing host"));
    }
    if url.fragment().is_some() {
        return Err(invalid(base, "fragments are not allowed"));
    }

    let _ = url.query_pairs_mut().append_pair("agentId", agent_id);
    Ok(url.into())
}
