use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use meetup::chat::{ChatSessionManager, ChatUpdate, ConnectionState, SendOutcome};
use meetup::protocol::{ActivityForm, Message};
use meetup::{
    ApiClient, CableConnection, ClientConfig, ClientError, FileTokenStore, GenerationPoller,
    MeetupApi, PollPolicy, TokenStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "meetup", about = "meetup CLI")]
struct Cli {
    /// Base URL of the meetup API (defaults to localhost).
    #[arg(long, global = true, env = "MEETUP_API_URL")]
    api_url: Option<String>,

    /// State directory holding the session token.
    #[arg(long, global = true, env = "MEETUP_STATE_DIR")]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create an account.
    Register {
        email: String,
        /// Password (prompted when omitted).
        #[arg(long)]
        password: Option<String>,
    },
    /// Log in and store the session token.
    Login {
        email: String,
        /// Password (prompted when omitted).
        #[arg(long)]
        password: Option<String>,
    },
    /// Log out and forget the session token.
    Logout,
    /// Show the logged-in user.
    Whoami,
    /// List activities.
    Activities,
    /// Show one activity.
    Activity { id: i64 },
    /// Create an activity.
    Create {
        #[command(flatten)]
        fields: ActivityFields,
    },
    /// Edit an activity you created. Only the given fields change.
    Edit {
        id: i64,
        #[command(flatten)]
        fields: ActivityFields,
    },
    /// Join an activity.
    Join { id: i64 },
    /// Show a user's public profile.
    User { username: String },
    /// Update your own profile.
    Profile {
        /// Birth date, e.g. 1999-04-23.
        #[arg(long)]
        birth_date: Option<String>,
        /// 1 (very extroverted) to 7 (very introverted).
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=7))]
        personality: Option<u32>,
    },
    /// Open the live chat of an activity. Lines typed on stdin are sent.
    Chat {
        /// Activity ID.
        id: i64,
    },
    /// Generate an activity description (Ctrl-C cancels).
    Generate {
        #[arg(long)]
        title: String,
        #[arg(long)]
        location: String,
        #[arg(long, default_value = "")]
        start_time: String,
        #[arg(long, default_value_t = 5)]
        max_participants: u32,
        #[arg(long, default_value_t = 18)]
        min_age: u32,
        #[arg(long, default_value_t = 26)]
        max_age: u32,
        /// Maximum number of status polls.
        #[arg(long)]
        attempts: Option<u32>,
        /// Milliseconds between status polls.
        #[arg(long)]
        interval_ms: Option<u64>,
    },
}

#[derive(clap::Args, Default)]
struct ActivityFields {
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    location: Option<String>,
    #[arg(long)]
    start_time: Option<String>,
    #[arg(long)]
    max_participants: Option<u32>,
    #[arg(long)]
    min_age: Option<u32>,
    #[arg(long)]
    max_age: Option<u32>,
}

impl ActivityFields {
    /// Overwrite the fields of `form` that were given on the command line.
    fn apply(self, form: &mut ActivityForm) {
        if let Some(v) = self.title {
            form.title = v;
        }
        if let Some(v) = self.description {
            form.description = v;
        }
        if let Some(v) = self.location {
            form.location = v;
        }
        if let Some(v) = self.start_time {
            form.start_time = v;
        }
        if let Some(v) = self.max_participants {
            form.max_participants = v;
        }
        if let Some(v) = self.min_age {
            form.minimum_age = v;
        }
        if let Some(v) = self.max_age {
            form.maximum_age = v;
        }
    }
}

/// Everything a command needs to talk to the backend.
struct App {
    config: ClientConfig,
    tokens: Arc<dyn TokenStore>,
    client: ApiClient,
    api: MeetupApi<ApiClient>,
}

impl App {
    fn new(api_url: Option<&str>, state_dir: Option<PathBuf>) -> Result<Self> {
        let config = ClientConfig::resolve(api_url)?;
        let state_dir = match state_dir {
            Some(dir) => dir,
            None => meetup::config::default_state_dir()?,
        };
        let store = FileTokenStore::open(&state_dir)
            .with_context(|| format!("failed to open state dir {}", state_dir.display()))?;
        let tokens: Arc<dyn TokenStore> = Arc::new(store);
        let client = ApiClient::new(&config, tokens.clone())?;
        let api = MeetupApi::new(client.clone(), tokens.clone());
        Ok(Self {
            config,
            tokens,
            client,
            api,
        })
    }

    /// Turn a client error into something a user can act on.
    fn explain(&self, err: ClientError) -> anyhow::Error {
        match err {
            ClientError::NotAuthenticated | ClientError::Http { status: 401, .. } => {
                anyhow::Error::new(err).context("not logged in. Try: meetup login <email>")
            }
            e if e.is_transient() => {
                let hint = format!("is the meetup backend reachable at {}?", self.config.api_url);
                anyhow::Error::new(e).context(hint)
            }
            other => other.into(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "meetup=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let ctx = App::new(cli.api_url.as_deref(), cli.state_dir)?;

    match cli.command {
        Command::Register { email, password } => {
            let password = password_or_prompt(password)?;
            ctx.api.register(&email, &password).await?;
            println!("Registered {email}. Log in with: meetup login {email}");
            Ok(())
        }
        Command::Login { email, password } => {
            let password = password_or_prompt(password)?;
            ctx.api.login(&email, &password).await?;
            println!("Logged in.");
            Ok(())
        }
        Command::Logout => {
            if let Err(e) = ctx.api.logout().await {
                eprintln!("warning: {e}");
            }
            println!("Logged out.");
            Ok(())
        }
        Command::Whoami => {
            let user = ctx.api.current_user().await.map_err(|e| ctx.explain(e))?;
            print_json(&user)
        }
        Command::Activities => {
            let activities = ctx.api.list_activities().await?;
            for a in &activities {
                println!(
                    "{:>5}  {}  @ {}  ({}/{})  {}",
                    a.id,
                    a.title,
                    a.location,
                    a.participants.len(),
                    a.max_participants,
                    a.start_time
                );
            }
            Ok(())
        }
        Command::Activity { id } => {
            let activity = ctx.api.get_activity(id).await?;
            print_json(&activity)
        }
        Command::Create { fields } => {
            let mut form = ActivityForm::default();
            fields.apply(&mut form);
            if form.title.trim().is_empty() || form.location.trim().is_empty() {
                anyhow::bail!("--title and --location are required");
            }
            let activity = ctx.api.create_activity(&form).await.map_err(|e| ctx.explain(e))?;
            println!("Created activity {}.", activity.id);
            Ok(())
        }
        Command::Edit { id, fields } => {
            let current = ctx.api.get_activity(id).await.map_err(|e| ctx.explain(e))?;
            let mut form = ActivityForm::from(&current);
            fields.apply(&mut form);
            let activity = ctx
                .api
                .update_activity(id, &form)
                .await
                .map_err(|e| ctx.explain(e))?;
            print_json(&activity)
        }
        Command::User { username } => {
            let profile = ctx.api.get_user(&username).await.map_err(|e| ctx.explain(e))?;
            print_json(&profile)
        }
        Command::Profile {
            birth_date,
            personality,
        } => {
            let Some(patch) = profile_patch(birth_date, personality) else {
                anyhow::bail!("nothing to update; pass --birth-date and/or --personality");
            };
            let user = ctx
                .api
                .update_current_user(patch)
                .await
                .map_err(|e| ctx.explain(e))?;
            print_json(&user)
        }
        Command::Join { id } => {
            ctx.api.join_activity(id).await.map_err(|e| ctx.explain(e))?;
            println!("Joined activity {id}.");
            Ok(())
        }
        Command::Chat { id } => cmd_chat(&ctx, id).await,
        Command::Generate {
            title,
            location,
            start_time,
            max_participants,
            min_age,
            max_age,
            attempts,
            interval_ms,
        } => {
            let mut policy = ctx.config.poll.clone();
            if let Some(n) = attempts {
                policy.max_attempts = n;
            }
            if let Some(ms) = interval_ms {
                policy.interval = Duration::from_millis(ms);
            }
            let activity = serde_json::json!({
                "title": title,
                "location": location,
                "start_time": start_time,
                "max_participants": max_participants,
                "minimum_age": min_age,
                "maximum_age": max_age,
            });
            cmd_generate(&ctx, activity, policy).await
        }
    }
}

async fn cmd_chat(ctx: &App, activity_id: i64) -> Result<()> {
    let me = ctx.api.current_user().await.map_err(|e| ctx.explain(e))?;
    let token = ctx
        .tokens
        .token()
        .ok_or_else(|| ctx.explain(ClientError::NotAuthenticated))?;
    let cable = CableConnection::connect(&ctx.config.cable_url, &token).await?;

    let mut chat = ChatSessionManager::new(ctx.client.clone(), cable, ctx.tokens.clone());
    chat.open(activity_id, me.id)?;
    eprintln!("Joining chat for activity {activity_id}. Ctrl-D or Ctrl-C to leave.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    enum Input {
        Update(Option<ChatUpdate>),
        Line(Option<String>),
        Quit,
    }

    loop {
        let input = tokio::select! {
            update = chat.next_update() => Input::Update(update),
            line = lines.next_line() => Input::Line(line.ok().flatten()),
            _ = tokio::signal::ctrl_c() => Input::Quit,
        };

        match input {
            Input::Update(None) | Input::Quit => break,
            Input::Update(Some(update)) => match update {
                ChatUpdate::Message(m) => print_message(&m),
                ChatUpdate::HistoryLoaded { added } => {
                    for m in &added {
                        print_message(m);
                    }
                }
                ChatUpdate::HistoryFailed(e) => eprintln!("could not load history: {e}"),
                ChatUpdate::State(ConnectionState::Connected) => eprintln!("-- connected --"),
                ChatUpdate::State(ConnectionState::Disconnected) => {
                    eprintln!("-- disconnected --");
                    break;
                }
                ChatUpdate::State(_) => {}
            },
            Input::Line(None) => break,
            Input::Line(Some(text)) => match chat.send(&text) {
                SendOutcome::Sent | SendOutcome::Empty => {}
                SendOutcome::NotConnected => eprintln!("not connected; message not sent"),
            },
        }
    }

    chat.close();
    Ok(())
}

async fn cmd_generate(
    ctx: &App,
    activity: serde_json::Value,
    policy: PollPolicy,
) -> Result<()> {
    let poller = GenerationPoller::new(ctx.client.clone(), policy);
    let cancel = CancellationToken::new();

    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    eprintln!("Generating description...");
    match poller.run_with_cancel(activity, &cancel).await {
        Ok(generated) => {
            println!("{}", generated.description);
            Ok(())
        }
        Err(ClientError::Cancelled) => {
            eprintln!("Cancelled.");
            Ok(())
        }
        Err(e) => Err(ctx.explain(e)),
    }
}

fn print_message(m: &Message) {
    println!("[{}] {}: {}", m.created_at, m.sender.username, m.body);
}

fn password_or_prompt(password: Option<String>) -> Result<String> {
    match password {
        Some(p) => Ok(p),
        None => rpassword::prompt_password("Password: ").context("failed to read password"),
    }
}

/// Only the given fields go into the patch; `None` when there is nothing to send.
fn profile_patch(birth_date: Option<String>, personality: Option<u32>) -> Option<serde_json::Value> {
    let mut patch = serde_json::Map::new();
    if let Some(date) = birth_date {
        patch.insert("birth_date".to_string(), date.into());
    }
    if let Some(p) = personality {
        patch.insert("personality".to_string(), p.into());
    }
    (!patch.is_empty()).then_some(serde_json::Value::Object(patch))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
