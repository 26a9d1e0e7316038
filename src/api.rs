use crate::config::Config;
use crate::error::ApiError;
use crate::models::{
    collect_wire, issue_from_wire, payment_from_wire, property_from_wire, resident_from_wire,
    Issue, IssueStatus, NewIssue, NewPayment, NewProperty, NewUser, Payment, Priority, Property,
    Resident,
};
use crate::token::{NoToken, StoredToken, TokenChain, TokenProvider};
use async_trait::async_trait;
use reqwest::{Method, Url};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// The slice of the backend the dashboard depends on.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn list_residents(&self) -> Result<Vec<Resident>, ApiError>;
    async fn list_payments(&self) -> Result<Vec<Payment>, ApiError>;
    async fn list_properties(&self) -> Result<Vec<Property>, ApiError>;
    async fn list_issues(&self) -> Result<Vec<Issue>, ApiError>;
    /// Profile of the signed-in user.
    async fn current_user(&self) -> Result<Resident, ApiError>;
    async fn update_issue_status(&self, issue_id: &str, status: IssueStatus)
        -> Result<(), ApiError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserQuery {
    pub role: Option<String>,
    pub status: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl UserQuery {
    pub fn residents() -> Self {
        Self {
            role: Some("resident".to_string()),
            ..Self::default()
        }
    }

    fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        push_opt(&mut pairs, "page", self.page);
        push_opt(&mut pairs, "limit", self.limit);
        push_opt(&mut pairs, "role", self.role.as_ref());
        push_opt(&mut pairs, "status", self.status.as_ref());
        pairs
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueQuery {
    pub status: Option<IssueStatus>,
    pub priority: Option<Priority>,
    pub category: Option<String>,
    pub unit: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl IssueQuery {
    fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        push_opt(&mut pairs, "page", self.page);
        push_opt(&mut pairs, "limit", self.limit);
        push_opt(&mut pairs, "status", self.status.map(IssueStatus::as_str));
        push_opt(&mut pairs, "priority", self.priority.map(Priority::as_str));
        push_opt(&mut pairs, "category", self.category.as_ref());
        push_opt(&mut pairs, "unit", self.unit.as_ref());
        pairs
    }
}

fn push_opt(pairs: &mut Vec<(&'static str, String)>, key: &'static str, value: Option<impl ToString>) {
    if let Some(v) = value {
        pairs.push((key, v.to_string()));
    }
}

/// `body[key]` as an array, empty when absent.
fn collection(body: &Value, key: &str) -> Vec<Value> {
    body.get(key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// HTTP client for the property backend. Attaches a bearer token when the
/// provider has one and normalizes error bodies into [`ApiError`].
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, tokens: Arc<dyn TokenProvider>) -> Self {
        Self::with_http_client(reqwest::Client::new(), base_url, tokens)
    }

    /// Use a preconfigured reqwest client (proxies, timeouts, TLS roots).
    pub fn with_http_client(
        http: reqwest::Client,
        base_url: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http,
            base_url,
            tokens,
        }
    }

    /// Client using the persisted token file from `config`, if any.
    pub fn from_config(config: &Config) -> Self {
        let tokens: Arc<dyn TokenProvider> = match &config.token_file {
            Some(path) => Arc::new(TokenChain::new(NoToken, StoredToken::new(path))),
            None => Arc::new(NoToken),
        };
        Self::new(config.api_base_url.clone(), tokens)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn url(&self, segments: &[&str], query: &[(&str, String)]) -> Result<Url, ApiError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ApiError::Config(format!("Invalid API URL {}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|()| ApiError::Config(format!("API URL cannot be a base: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn call(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<Value, ApiError> {
        let url = self.url(segments, query)?;
        log::info!("API call: {method} {url}");

        let token = match self.tokens.token().await {
            Ok(token) => token,
            Err(e) => {
                log::warn!("Could not get auth token: {e}");
                None
            }
        };

        let mut request = self.http.request(method.clone(), url.clone());
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|e| {
            log::error!("API call failed: {method} {url}: {e}");
            ApiError::from(e)
        })?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let err = ApiError::from_response(
                status.as_u16(),
                status.canonical_reason().unwrap_or(""),
                &text,
            );
            log::error!("API error: {method} {url}: {err}");
            return Err(err);
        }

        log::debug!("{method} {url} succeeded ({} bytes)", text.len());
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| ApiError::Decode {
            endpoint: url.path().to_string(),
            reason: e.to_string(),
        })
    }

    async fn get(&self, segments: &[&str], query: &[(&str, String)]) -> Result<Value, ApiError> {
        self.call(Method::GET, segments, query, None).await
    }

    async fn send_json(
        &self,
        method: Method,
        segments: &[&str],
        payload: &impl Serialize,
    ) -> Result<Value, ApiError> {
        let body = serde_json::to_value(payload).map_err(|e| ApiError::Decode {
            endpoint: segments.join("/"),
            reason: e.to_string(),
        })?;
        self.call(method, segments, &[], Some(body)).await
    }

    // Users

    pub async fn list_users(&self, query: &UserQuery) -> Result<Vec<Resident>, ApiError> {
        let body = self.get(&["users"], &query.pairs()).await?;
        let users = collect_wire(&collection(&body, "users"), |v| Some(resident_from_wire(v)));
        log::debug!("list_users: {} users", users.len());
        Ok(users)
    }

    pub async fn create_user(&self, user: &NewUser) -> Result<Value, ApiError> {
        log::info!("create_user: email={}, role={}", user.email, user.role);
        self.send_json(Method::POST, &["users"], user).await
    }

    // Properties

    pub async fn create_property(&self, property: &NewProperty) -> Result<Value, ApiError> {
        log::info!("create_property: address={}", property.address);
        self.send_json(Method::POST, &["properties"], property).await
    }

    // Payments

    pub async fn create_payment(&self, payment: &NewPayment) -> Result<Value, ApiError> {
        log::info!("create_payment: amount={}", payment.amount);
        self.send_json(Method::POST, &["payments"], payment).await
    }

    // Issues

    pub async fn list_issues_filtered(&self, query: &IssueQuery) -> Result<Vec<Issue>, ApiError> {
        let body = self.get(&["issues"], &query.pairs()).await?;
        Ok(collect_wire(&collection(&body, "issues"), issue_from_wire))
    }

    pub async fn create_issue(&self, issue: &NewIssue) -> Result<Value, ApiError> {
        log::info!("create_issue: title={}", issue.title);
        self.send_json(Method::POST, &["issues"], issue).await
    }
}

#[async_trait]
impl Backend for ApiClient {
    async fn list_residents(&self) -> Result<Vec<Resident>, ApiError> {
        self.list_users(&UserQuery::residents()).await
    }

    async fn list_payments(&self) -> Result<Vec<Payment>, ApiError> {
        let body = self.get(&["payments"], &[]).await?;
        Ok(collect_wire(&collection(&body, "payments"), |v| {
            Some(payment_from_wire(v))
        }))
    }

    async fn list_properties(&self) -> Result<Vec<Property>, ApiError> {
        let body = self.get(&["properties"], &[]).await?;
        Ok(collect_wire(&collection(&body, "properties"), |v| {
            Some(property_from_wire(v))
        }))
    }

    async fn list_issues(&self) -> Result<Vec<Issue>, ApiError> {
        self.list_issues_filtered(&IssueQuery::default()).await
    }

    /// Accepts both `{user: {...}}` and a bare object.
    async fn current_user(&self) -> Result<Resident, ApiError> {
        let body = self.get(&["users", "me"], &[]).await?;
        let user = body.get("user").unwrap_or(&body);
        if !user.is_object() {
            return Err(ApiError::Decode {
                endpoint: "/users/me".to_string(),
                reason: "expected a user object".to_string(),
            });
        }
        Ok(resident_from_wire(user))
    }

    async fn update_issue_status(
        &self,
        issue_id: &str,
        status: IssueStatus,
    ) -> Result<(), ApiError> {
        log::info!("update_issue_status: issue_id={issue_id}, status={}", status.as_str());
        self.call(
            Method::PATCH,
            &["issues", issue_id, "status"],
            &[],
            Some(json!({ "status": status })),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> ApiClient {
        ApiClient::new(base, Arc::new(NoToken))
    }

    #[test]
    fn test_url_joins_segments() {
        let api = client("http://localhost:3001/api/");
        assert_eq!(
            api.url(&["issues", "abc", "status"], &[]).unwrap().as_str(),
            "http://localhost:3001/api/issues/abc/status"
        );
    }

    #[test]
    fn test_url_escapes_ids() {
        let api = client("http://localhost:3001/api");
        let url = api.url(&["issues", "a/b c", "status"], &[]).unwrap();
        assert_eq!(url.path(), "/api/issues/a%2Fb%20c/status");
    }

    #[test]
    fn test_url_query_pairs() {
        let api = client("http://localhost:3001/api");
        let url = api.url(&["users"], &UserQuery::residents().pairs()).unwrap();
        assert_eq!(url.as_str(), "http://localhost:3001/api/users?role=resident");

        let query = IssueQuery {
            status: Some(IssueStatus::InProgress),
            unit: Some("4B".into()),
            ..IssueQuery::default()
        };
        let url = api.url(&["issues"], &query.pairs()).unwrap();
        assert_eq!(url.query(), Some("status=in-progress&unit=4B"));
    }

    #[test]
    fn test_invalid_base_url() {
        let api = client("not a url");
        assert!(matches!(api.url(&["users"], &[]), Err(ApiError::Config(_))));
    }

    #[test]
    fn test_collection_missing_key_is_empty() {
        assert!(collection(&json!({ "other": [] }), "issues").is_empty());
        assert!(collection(&Value::Null, "issues").is_empty());
        assert_eq!(collection(&json!({ "issues": [1, 2] }), "issues").len(), 2);
    }
}
