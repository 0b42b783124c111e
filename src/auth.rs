//! Bearer credentials for the Gmail API
//!
//! The engine treats a credential as an opaque bearer string. Where it comes
//! from is the job of a [`CredentialProvider`]: the OAuth2 installed flow with
//! an on-disk token cache, or a static token handed in by the caller.

use async_trait::async_trait;
use google_gmail1::{hyper_rustls, hyper_util, yup_oauth2};
use std::env;
use std::fmt;
use std::path::Path;

use crate::error::{GmailError, Result};

/// Scopes needed to modify messages and manage labels
pub const REQUIRED_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.modify",
    "https://www.googleapis.com/auth/gmail.labels",
];

/// Environment variable holding a static bearer token
pub const TOKEN_ENV_VAR: &str = "GMAIL_ACCESS_TOKEN";

type Connector = hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>;

/// Opaque bearer token
///
/// `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&"<redacted>").finish()
    }
}

/// Source of bearer credentials, queried once per batch
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Obtain a usable credential or fail with [`GmailError::AuthError`]
    async fn get_credential(&self) -> Result<Credential>;
}

/// Credential provider backed by the OAuth2 installed-application flow
///
/// Tokens are persisted to disk and refreshed by the authenticator, so after
/// the first interactive consent no browser round-trip is needed.
pub struct OAuthCredentialProvider {
    auth: yup_oauth2::authenticator::Authenticator<Connector>,
}

impl OAuthCredentialProvider {
    /// Build the authenticator from a `credentials.json` client secret
    ///
    /// # Arguments
    /// * `credentials_path` - Path to the OAuth2 client secret JSON file
    /// * `token_cache_path` - Path where access/refresh tokens are cached
    pub async fn new(credentials_path: &Path, token_cache_path: &Path) -> Result<Self> {
        let secret = yup_oauth2::read_application_secret(credentials_path)
            .await
            .map_err(|e| {
                GmailError::AuthError(format!(
                    "Failed to read credentials from {:?}: {}",
                    credentials_path, e
                ))
            })?;

        if let Some(parent) = token_cache_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // HTTPRedirect opens a browser for user authorization
        let auth = yup_oauth2::InstalledFlowAuthenticator::builder(
            secret,
            yup_oauth2::InstalledFlowReturnMethod::HTTPRedirect,
        )
        .persist_tokens_to_disk(token_cache_path)
        .build()
        .await
        .map_err(|e| GmailError::AuthError(format!("Failed to build authenticator: {}", e)))?;

        Ok(Self { auth })
    }
}

#[async_trait]
impl CredentialProvider for OAuthCredentialProvider {
    async fn get_credential(&self) -> Result<Credential> {
        let token = self
            .auth
            .token(REQUIRED_SCOPES)
            .await
            .map_err(|e| GmailError::AuthError(format!("Failed to obtain token: {}", e)))?;

        token
            .token()
            .filter(|t| !t.is_empty())
            .map(Credential::new)
            .ok_or_else(|| GmailError::AuthError("Token response had no access token".to_string()))
    }
}

/// Credential provider returning a fixed token, or failing when none is set
#[derive(Clone, Default)]
pub struct StaticCredentialProvider {
    token: Option<String>,
}

impl StaticCredentialProvider {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.trim().is_empty()),
        }
    }

    /// Read the token from `GMAIL_ACCESS_TOKEN`
    pub fn from_env() -> Self {
        Self::new(env::var(TOKEN_ENV_VAR).ok())
    }

    pub fn is_configured(&self) -> bool {
        self.token.is_some()
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn get_credential(&self) -> Result<Credential> {
        self.token
            .as_deref()
            .map(Credential::new)
            .ok_or_else(|| GmailError::AuthError("No access token configured".to_string()))
    }
}

/// Restrict the token cache to its owner (0600)
#[cfg(unix)]
pub async fn secure_token_file(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = tokio::fs::metadata(path).await?.permissions();
    perms.set_mode(0o600);
    tokio::fs::set_permissions(path, perms).await?;
    Ok(())
}

/// Windows relies on the profile directory ACLs
#[cfg(windows)]
pub async fn secure_token_file(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_credential_debug_is_redacted() {
        let credential = Credential::new("ya29.secret-token");
        let debug = format!("{:?}", credential);
        assert!(!debug.contains("secret"));
        assert!(debug.contains("redacted"));
        assert_eq!(credential.as_str(), "ya29.secret-token");
    }

    #[tokio::test]
    async fn test_static_provider_returns_token() {
        let provider = StaticCredentialProvider::new(Some("abc".to_string()));
        assert!(provider.is_configured());
        assert_eq!(provider.get_credential().await.unwrap().as_str(), "abc");
    }

    #[tokio::test]
    async fn test_static_provider_without_token_is_auth_error() {
        for token in [None, Some(String::new()), Some("   ".to_string())] {
            let provider = StaticCredentialProvider::new(token);
            assert!(!provider.is_configured());
            let err = provider.get_credential().await.unwrap_err();
            assert!(matches!(err, GmailError::AuthError(_)));
        }
    }

    #[tokio::test]
    async fn test_oauth_provider_missing_secret_file() {
        let dir = TempDir::new().unwrap();
        let result = OAuthCredentialProvider::new(
            &dir.path().join("missing.json"),
            &dir.path().join("token.json"),
        )
        .await;
        match result {
            Err(GmailError::AuthError(msg)) => assert!(msg.contains("Failed to read credentials")),
            Err(other) => panic!("expected AuthError, got {:?}", other),
            Ok(_) => panic!("expected AuthError"),
        }
    }

    #[tokio::test]
    async fn test_secure_token_file() {
        let temp_file = NamedTempFile::new().unwrap();
        tokio::fs::write(temp_file.path(), "{}").await.unwrap();

        secure_token_file(temp_file.path()).await.unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let metadata = tokio::fs::metadata(temp_file.path()).await.unwrap();
            assert_eq!(metadata.permissions().mode() & 0o777, 0o600);
        }
    }

    #[test]
    fn test_scopes_constants() {
        assert_eq!(REQUIRED_SCOPES.len(), 2);
        assert!(REQUIRED_SCOPES.contains(&"https://www.googleapis.com/auth/gmail.modify"));
        assert!(REQUIRED_SCOPES.contains(&"https://www.googleapis.com/auth/gmail.labels"));
    }
}
