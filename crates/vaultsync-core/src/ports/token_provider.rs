//! Token provider port
//!
//! Supplies access tokens for the remote store. The OAuth flow, token
//! storage and background refresh all live behind this trait.

/// Port trait for access-token management
#[async_trait::async_trait]
pub trait ITokenProvider: Send + Sync {
    /// A currently valid access token, refreshed automatically when expired
    async fn get_access_token(&self) -> anyhow::Result<String>;

    /// Force a fresh token after the remote store answered 401
    ///
    /// The engine calls this at most once per failed request. An error here
    /// means the user has to authenticate again.
    async fn refresh_after_unauthorized(&self) -> anyhow::Result<String>;
}
