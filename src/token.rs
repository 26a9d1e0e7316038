use crate::error::ApiError;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Source of the bearer token attached to every request.
///
/// `Ok(None)` means "no signed-in user"; requests then go out unauthenticated.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<Option<String>, ApiError>;
}

/// Provider that never yields a token.
pub struct NoToken;

#[async_trait]
impl TokenProvider for NoToken {
    async fn token(&self) -> Result<Option<String>, ApiError> {
        Ok(None)
    }
}

pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Result<Option<String>, ApiError> {
        Ok(Some(self.0.clone()).filter(|t| !t.is_empty()))
    }
}

/// Token persisted on disk between sessions.
#[derive(Debug, Clone)]
pub struct StoredToken {
    path: PathBuf,
}

impl StoredToken {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<String>, ApiError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => {
                let token = contents.trim();
                Ok((!token.is_empty()).then(|| token.to_string()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ApiError::Token(format!(
                "Failed to read {}: {e}",
                self.path.display()
            ))),
        }
    }

    pub fn save(&self, token: &str) -> Result<(), ApiError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ApiError::Token(format!("Failed to create {}: {e}", parent.display())))?;
        }
        std::fs::write(&self.path, token)
            .map_err(|e| ApiError::Token(format!("Failed to write {}: {e}", self.path.display())))
    }

    pub fn clear(&self) -> Result<(), ApiError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ApiError::Token(format!(
                "Failed to remove {}: {e}",
                self.path.display()
            ))),
        }
    }
}

#[async_trait]
impl TokenProvider for StoredToken {
    async fn token(&self) -> Result<Option<String>, ApiError> {
        self.load()
    }
}

/// Asks the primary provider first and falls back to the stored token when
/// it fails or has nothing. Never fails itself.
pub struct TokenChain<P> {
    primary: P,
    fallback: StoredToken,
}

impl<P: TokenProvider> TokenChain<P> {
    pub fn new(primary: P, fallback: StoredToken) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl<P: TokenProvider> TokenProvider for TokenChain<P> {
    async fn token(&self) -> Result<Option<String>, ApiError> {
        match self.primary.token().await {
            Ok(Some(token)) if !token.is_empty() => return Ok(Some(token)),
            Ok(_) => {}
            Err(e) => log::warn!("Could not get auth token from primary provider: {e}"),
        }
        match self.fallback.load() {
            Ok(token) => Ok(token),
            Err(e) => {
                log::warn!("Stored token unavailable, continuing unauthenticated: {e}");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    #[async_trait]
    impl TokenProvider for Failing {
        async fn token(&self) -> Result<Option<String>, ApiError> {
            Err(ApiError::Token("provider offline".to_string()))
        }
    }

    #[tokio::test]
    async fn test_stored_token_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let stored = StoredToken::new(dir.path().join("nested/auth_token"));
        assert_eq!(stored.load().unwrap(), None);

        stored.save("abc123\n").unwrap();
        assert_eq!(stored.token().await.unwrap(), Some("abc123".to_string()));

        stored.clear().unwrap();
        assert_eq!(stored.load().unwrap(), None);
        stored.clear().unwrap();
    }

    #[tokio::test]
    async fn test_chain_prefers_primary() {
        let dir = tempfile::tempdir().unwrap();
        let stored = StoredToken::new(dir.path().join("auth_token"));
        stored.save("stored").unwrap();
        let chain = TokenChain::new(StaticToken("live".into()), stored);
        assert_eq!(chain.token().await.unwrap(), Some("live".to_string()));
    }

    #[tokio::test]
    async fn test_chain_falls_back_on_failure_or_empty() {
        let dir = tempfile::tempdir().unwrap();
        let stored = StoredToken::new(dir.path().join("auth_token"));
        stored.save("stored").unwrap();

        let chain = TokenChain::new(Failing, stored.clone());
        assert_eq!(chain.token().await.unwrap(), Some("stored".to_string()));

        let chain = TokenChain::new(NoToken, stored);
        assert_eq!(chain.token().await.unwrap(), Some("stored".to_string()));
    }

    #[tokio::test]
    async fn test_chain_with_nothing_is_unauthenticated() {
        let dir = tempfile::tempdir().unwrap();
        let chain = TokenChain::new(Failing, StoredToken::new(dir.path().join("missing")));
        assert_eq!(chain.token().await.unwrap(), None);
    }
}
