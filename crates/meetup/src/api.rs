//! Typed calls for accounts and activities.

use crate::client::{ApiRequest, Transport};
use crate::error::{ClientError, ClientResult};
use crate::protocol::{Activity, ActivityForm, CurrentUser, Profile};
use crate::token::{TokenStore, bare_token};
use serde_json::json;
use std::sync::Arc;

/// Account and activity endpoints. The token store is shared with the
/// transport, so a successful `login` authenticates every later call.
#[derive(Clone)]
pub struct MeetupApi<T> {
    transport: T,
    tokens: Arc<dyn TokenStore>,
}

impl<T: Transport> MeetupApi<T> {
    pub fn new(transport: T, tokens: Arc<dyn TokenStore>) -> Self {
        Self { transport, tokens }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn is_authenticated(&self) -> bool {
        self.tokens.token().is_some()
    }

    pub async fn register(&self, email: &str, password: &str) -> ClientResult<()> {
        let resp = self
            .transport
            .request(ApiRequest::post(
                "/users",
                json!({ "email": email, "password": password }),
            ))
            .await?;
        resp.ensure_success()?;
        tracing::info!(email, "account registered");
        Ok(())
    }

    /// Log in and store the bearer token from the response's `Authorization` header.
    pub async fn login(&self, email: &str, password: &str) -> ClientResult<()> {
        let resp = self
            .transport
            .request(ApiRequest::post(
                "/login",
                json!({ "email": email, "password": password }),
            ))
            .await?;
        resp.ensure_success()?;

        let header = resp.authorization.as_deref().ok_or_else(|| {
            ClientError::protocol("login response carried no Authorization header")
        })?;
        let token = bare_token(header);
        if token.is_empty() {
            return Err(ClientError::protocol("login response carried an empty token"));
        }
        self.tokens.set_token(token)?;
        tracing::info!(email, "logged in");
        Ok(())
    }

    /// End the session. The local token is dropped even if the server call fails.
    pub async fn logout(&self) -> ClientResult<()> {
        let result = match self.transport.request(ApiRequest::delete("/logout")).await {
            Ok(resp) => resp.ensure_success(),
            Err(e) => Err(e),
        };
        self.tokens.clear_token()?;
        if let Err(e) = &result {
            tracing::warn!(err = %e, "server logout failed; local token cleared");
        }
        result
    }

    pub async fn current_user(&self) -> ClientResult<CurrentUser> {
        self.authed()?;
        self.transport
            .request(ApiRequest::get("/current_user"))
            .await?
            .into_result()
    }

    /// Patch the logged-in user's profile (`age`, `personality`, ...).
    pub async fn update_current_user(&self, patch: serde_json::Value) -> ClientResult<CurrentUser> {
        self.authed()?;
        self.transport
            .request(ApiRequest::patch("/current_user", patch))
            .await?
            .into_result()
    }

    pub async fn get_user(&self, username: &str) -> ClientResult<Profile> {
        self.transport
            .request(ApiRequest::get(format!("/users/{username}")))
            .await?
            .into_result()
    }

    pub async fn list_activities(&self) -> ClientResult<Vec<Activity>> {
        self.transport
            .request(ApiRequest::get("/activities"))
            .await?
            .into_result()
    }

    pub async fn get_activity(&self, id: i64) -> ClientResult<Activity> {
        self.transport
            .request(ApiRequest::get(format!("/activities/{id}")))
            .await?
            .into_result()
    }

    pub async fn create_activity(&self, form: &ActivityForm) -> ClientResult<Activity> {
        self.authed()?;
        let resp = self
            .transport
            .request(ApiRequest::post("/activities", json!({ "activity": form })))
            .await?;
        let activity: Activity = resp.into_result()?;
        tracing::info!(activity = activity.id, "activity created");
        Ok(activity)
    }

    pub async fn update_activity(&self, id: i64, form: &ActivityForm) -> ClientResult<Activity> {
        self.authed()?;
        self.transport
            .request(ApiRequest::patch(
                format!("/activities/{id}"),
                json!({ "activity": form }),
            ))
            .await?
            .into_result()
    }

    pub async fn join_activity(&self, id: i64) -> ClientResult<()> {
        self.authed()?;
        let resp = self
            .transport
            .request(ApiRequest::post(format!("/activities/{id}/join"), json!({})))
            .await?;
        resp.ensure_success()?;
        tracing::info!(activity = id, "joined activity");
        Ok(())
    }

    fn authed(&self) -> ClientResult<()> {
        if self.is_authenticated() {
            Ok(())
        } else {
            Err(ClientError::NotAuthenticated)
        }
    }
}
