pub mod api;
pub mod cable;
pub mod chat;
pub mod client;
pub mod config;
pub mod error;
pub mod poller;
pub mod protocol;
pub mod token;

pub use api::MeetupApi;
pub use cable::{CableConnection, ChannelEvent, ChannelTransport, Subscription};
pub use chat::{ChatSessionManager, ChatUpdate, ConnectionState, SendOutcome};
pub use client::{ApiClient, ApiRequest, ApiResponse, Transport};
pub use config::{ClientConfig, DEFAULT_API_URL, PollPolicy};
pub use error::{ClientError, ClientResult};
pub use poller::{Generated, GenerationPoller};
pub use token::{FileTokenStore, MemoryTokenStore, TokenStore};
