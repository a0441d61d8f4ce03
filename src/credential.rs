use std::path::Path;

use tracing::warn;

// Re-read on every call so a refreshed token is picked up without a restart.
pub async fn read_bearer_token(path: Option<&Path>) -> Option<String> {
    let path = path?;
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => {
            let token = raw.trim();
            if token.is_empty() {
                warn!(path = %path.display(), "token file is empty, sending unauthenticated");
                None
            } else {
                Some(token.to_string())
            }
        }
        Err(err) => {
            warn!(path = %path.display(), "token file unreadable, sending unauthenticated: {err}");
            None
        }
    }
}

pub fn authorization_value(token: &str) -> String {
    if token.starts_with("Bearer ") {
        token.to_string()
    } else {
        format!("Bearer {token}")
    }
}
