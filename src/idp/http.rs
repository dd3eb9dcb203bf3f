use async_trait::async_trait;
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

use super::{
    IdentityProvider, NewRemoteUser, OrganizationPayload, RemoteError, RemoteOrganization, RemoteUser, RoleDefinition,
    UserProfilePayload,
};
use crate::config::IdpConfig;

/// Refresh tokens this long before they expire
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Management API client using the client-credentials grant
pub struct HttpIdentityProvider {
    client: reqwest::Client,
    endpoint: String,
    client_id: String,
    client_secret: String,
    token: RwLock<Option<CachedToken>>,
}

impl HttpIdentityProvider {
    pub fn new(config: &IdpConfig) -> Result<Self, RemoteError> {
        let endpoint = Url::parse(&config.endpoint)
            .map_err(|e| RemoteError::transport(format!("invalid identity provider endpoint {}: {}", config.endpoint, e)))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| RemoteError::transport(format!("failed to build http client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.as_str().trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            token: RwLock::new(None),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api{}", self.endpoint, path)
    }

    async fn access_token(&self) -> Result<String, RemoteError> {
        {
            let token = self.token.read().await;
            if let Some(cached) = token.as_ref() {
                if cached.expires_at > Instant::now() + TOKEN_REFRESH_MARGIN {
                    return Ok(cached.value.clone());
                }
            }
        }

        let mut token = self.token.write().await;
        // Another caller may have refreshed while we waited for the write lock
        if let Some(cached) = token.as_ref() {
            if cached.expires_at > Instant::now() + TOKEN_REFRESH_MARGIN {
                return Ok(cached.value.clone());
            }
        }

        let fresh = self.fetch_token().await?;
        let value = fresh.value.clone();
        *token = Some(fresh);
        Ok(value)
    }

    async fn fetch_token(&self) -> Result<CachedToken, RemoteError> {
        let resource = format!("{}/api", self.endpoint);
        let response = self
            .client
            .post(format!("{}/oidc/token", self.endpoint))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[
                ("grant_type", "client_credentials"),
                ("resource", resource.as_str()),
                ("scope", "all"),
            ])
            .send()
            .await
            .map_err(|e| RemoteError::transport(format!("token request failed: {}", e)))?;

        let response = Self::expect(response, &[StatusCode::OK]).await?;
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::transport(format!("invalid token response: {}", e)))?;

        info!(expires_in = body.expires_in, "obtained identity provider access token");
        Ok(CachedToken {
            value: body.access_token,
            expires_at: Instant::now() + Duration::from_secs(body.expires_in),
        })
    }

    async fn invalidate_token(&self) {
        *self.token.write().await = None;
    }

    async fn send_once(&self, method: &Method, path: &str, body: Option<&Value>) -> Result<Response, RemoteError> {
        let token = self.access_token().await?;
        let mut request = self
            .client
            .request(method.clone(), self.api_url(path))
            .bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }
        request
            .send()
            .await
            .map_err(|e| RemoteError::transport(format!("{} {} failed: {}", method, path, e)))
    }

    /// Send with one retry on 401, after dropping the cached token
    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Response, RemoteError> {
        let response = self.send_once(&method, path, body).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            debug!(%method, path, "access token rejected, refreshing");
            self.invalidate_token().await;
            return self.send_once(&method, path, body).await;
        }
        Ok(response)
    }

    async fn expect(response: Response, ok: &[StatusCode]) -> Result<Response, RemoteError> {
        let status = response.status();
        if ok.contains(&status) {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        Err(RemoteError::from_status(status.as_u16(), &text))
    }

    async fn call_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        ok: &[StatusCode],
    ) -> Result<T, RemoteError> {
        let response = Self::expect(self.send(method, path, body).await?, ok).await?;
        response
            .json()
            .await
            .map_err(|e| RemoteError::transport(format!("invalid response from {}: {}", path, e)))
    }

    async fn call_empty(&self, method: Method, path: &str, body: Option<&Value>, ok: &[StatusCode]) -> Result<(), RemoteError> {
        Self::expect(self.send(method, path, body).await?, ok).await?;
        Ok(())
    }
}

fn to_body<T: serde::Serialize>(value: &T) -> Result<Value, RemoteError> {
    serde_json::to_value(value).map_err(|e| RemoteError::transport(format!("failed to encode request: {}", e)))
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn create_organization(&self, payload: &OrganizationPayload) -> Result<RemoteOrganization, RemoteError> {
        let body = to_body(payload)?;
        self.call_json(Method::POST, "/organizations", Some(&body), &[StatusCode::CREATED, StatusCode::OK])
            .await
    }

    async fn update_organization(&self, id: &str, payload: &OrganizationPayload) -> Result<RemoteOrganization, RemoteError> {
        let body = to_body(payload)?;
        self.call_json(Method::PATCH, &format!("/organizations/{}", id), Some(&body), &[StatusCode::OK])
            .await
    }

    async fn delete_organization(&self, id: &str) -> Result<(), RemoteError> {
        self.call_empty(
            Method::DELETE,
            &format!("/organizations/{}", id),
            None,
            &[StatusCode::NO_CONTENT, StatusCode::OK],
        )
        .await
    }

    async fn create_user(&self, user: &NewRemoteUser) -> Result<RemoteUser, RemoteError> {
        let body = to_body(user)?;
        self.call_json(Method::POST, "/users", Some(&body), &[StatusCode::CREATED, StatusCode::OK])
            .await
    }

    async fn update_user(&self, id: &str, profile: &UserProfilePayload) -> Result<RemoteUser, RemoteError> {
        let body = to_body(profile)?;
        self.call_json(Method::PATCH, &format!("/users/{}", id), Some(&body), &[StatusCode::OK])
            .await
    }

    async fn delete_user(&self, id: &str) -> Result<(), RemoteError> {
        self.call_empty(
            Method::DELETE,
            &format!("/users/{}", id),
            None,
            &[StatusCode::NO_CONTENT, StatusCode::OK],
        )
        .await
    }

    async fn set_user_suspended(&self, id: &str, suspended: bool) -> Result<(), RemoteError> {
        let body = json!({ "isSuspended": suspended });
        self.call_empty(
            Method::PATCH,
            &format!("/users/{}/is-suspended", id),
            Some(&body),
            &[StatusCode::OK],
        )
        .await
    }

    async fn assign_user_to_organization(&self, org_id: &str, user_id: &str) -> Result<(), RemoteError> {
        let body = json!({ "userIds": [user_id] });
        self.call_empty(
            Method::POST,
            &format!("/organizations/{}/users", org_id),
            Some(&body),
            &[StatusCode::CREATED, StatusCode::OK],
        )
        .await
    }

    async fn assign_user_roles(&self, user_id: &str, role_ids: &[String]) -> Result<(), RemoteError> {
        let body = json!({ "roleIds": role_ids });
        self.call_empty(
            Method::POST,
            &format!("/users/{}/roles", user_id),
            Some(&body),
            &[StatusCode::CREATED, StatusCode::OK],
        )
        .await
    }

    async fn assign_organization_roles(&self, org_id: &str, user_id: &str, role_ids: &[String]) -> Result<(), RemoteError> {
        let body = json!({ "organizationRoleIds": role_ids });
        self.call_empty(
            Method::POST,
            &format!("/organizations/{}/users/{}/roles", org_id, user_id),
            Some(&body),
            &[StatusCode::CREATED, StatusCode::OK],
        )
        .await
    }

    async fn find_organization_role(&self, name: &str) -> Result<RoleDefinition, RemoteError> {
        let roles: Vec<RoleDefinition> = self
            .call_json(Method::GET, "/organization-roles", None, &[StatusCode::OK])
            .await?;
        roles
            .into_iter()
            .find(|r| r.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| RemoteError::transport(format!("organization role {} not found", name)))
    }

    async fn set_jit_roles(&self, org_id: &str, role_ids: &[String]) -> Result<(), RemoteError> {
        let body = json!({ "organizationRoleIds": role_ids });
        self.call_empty(
            Method::POST,
            &format!("/organizations/{}/jit/roles", org_id),
            Some(&body),
            &[StatusCode::CREATED, StatusCode::OK],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(endpoint: &str) -> IdpConfig {
        IdpConfig {
            endpoint: endpoint.to_string(),
            client_id: "m2m".to_string(),
            client_secret: "secret".to_string(),
            request_timeout_secs: 5,
        }
    }

    #[test]
    fn builds_management_urls() {
        let client = HttpIdentityProvider::new(&config("https://auth.example.com/")).unwrap();
        assert_eq!(client.api_url("/organizations"), "https://auth.example.com/api/organizations");
    }

    #[test]
    fn rejects_invalid_endpoint() {
        assert!(HttpIdentityProvider::new(&config("not a url")).is_err());
    }
}
