use std::path::Path;

use anyhow::{Context, Result};

pub const TOKEN_VAR: &str = "HUGGINGFACE_TOKEN";

/// Where the hub access token came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    /// `--hf-token` or the `HUGGINGFACE_TOKEN` environment variable.
    Environment,
    /// The dotenv-style secret store file.
    SecretStore,
    /// Nothing configured here; the hub client falls back to its cached login.
    HubCache,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: Option<String>,
    pub source: TokenSource,
}

/// Resolves the hub token. The command line / environment wins over the secret store.
pub fn resolve(explicit: Option<String>, secrets_file: &Path) -> Result<Credential> {
    if let Some(token) = explicit.filter(|t| !t.trim().is_empty()) {
        return Ok(Credential {
            token: Some(token),
            source: TokenSource::Environment,
        });
    }
    if let Some(token) = read_secret(secrets_file, TOKEN_VAR)? {
        return Ok(Credential {
            token: Some(token),
            source: TokenSource::SecretStore,
        });
    }
    Ok(Credential {
        token: None,
        source: TokenSource::HubCache,
    })
}

/// Looks up `key` in a dotenv-style file without touching the process environment.
fn read_secret(path: &Path, key: &str) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let entries = dotenv::from_path_iter(path)
        .with_context(|| format!("failed to open secret store {}", path.display()))?;
    for entry in entries {
        let (name, value) =
            entry.with_context(|| format!("failed to parse secret store {}", path.display()))?;
        if name == key && !value.trim().is_empty() {
            return Ok(Some(value));
        }
    }
    Ok(None)
}
