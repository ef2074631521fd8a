use super::backend::TestBackend;
use anyhow::{Context, Result};
use meetup::chat::ChatSessionManager;
use meetup::protocol::CurrentUser;
use meetup::{
    ApiClient, CableConnection, ClientConfig, GenerationPoller, MeetupApi, MemoryTokenStore,
    PollPolicy, TokenStore,
};
use std::sync::Arc;

pub type TestChat = ChatSessionManager<ApiClient, CableConnection>;

/// One logged-in user talking to a [`TestBackend`].
pub struct TestClient {
    pub config: ClientConfig,
    pub tokens: Arc<dyn TokenStore>,
    pub client: ApiClient,
    pub api: MeetupApi<ApiClient>,
}

impl TestClient {
    /// A client with no session yet.
    pub fn anonymous(backend: &TestBackend) -> Result<Self> {
        let config = ClientConfig::new(&backend.api_url())?;
        let tokens: Arc<dyn TokenStore> = Arc::new(MemoryTokenStore::new());
        let client = ApiClient::new(&config, tokens.clone())?;
        let api = MeetupApi::new(client.clone(), tokens.clone());
        Ok(Self {
            config,
            tokens,
            client,
            api,
        })
    }

    /// Register `email` and log in as that account.
    pub async fn signup(backend: &TestBackend, email: &str) -> Result<Self> {
        let this = Self::anonymous(backend)?;
        this.api
            .register(email, "password123")
            .await
            .with_context(|| format!("register {email}"))?;
        this.api
            .login(email, "password123")
            .await
            .with_context(|| format!("login {email}"))?;
        Ok(this)
    }

    pub async fn me(&self) -> Result<CurrentUser> {
        Ok(self.api.current_user().await?)
    }

    /// Open a cable socket with this client's token.
    pub async fn cable(&self) -> Result<CableConnection> {
        let token = self.tokens.token().context("client is not logged in")?;
        Ok(CableConnection::connect(&self.config.cable_url, &token).await?)
    }

    /// A chat manager wired to a fresh cable socket.
    pub async fn chat(&self) -> Result<TestChat> {
        let cable = self.cable().await?;
        Ok(ChatSessionManager::new(
            self.client.clone(),
            cable,
            self.tokens.clone(),
        ))
    }

    pub fn poller(&self, policy: PollPolicy) -> GenerationPoller<ApiClient> {
        GenerationPoller::new(self.client.clone(), policy)
    }
}
