use std::collections::HashSet;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use tokio::io::{AsyncBufReadExt, BufReader};

use orchid_client::api::client::ApiClient;
use orchid_client::api::models::ChatMessage;
use orchid_client::app::{Session, Settings};
use orchid_client::conversations::{
    Conversation, conversation_messages, derive_conversations, ensure_conversation, find_conversation,
};
use orchid_client::identity::Directory;
use orchid_client::live::{ChannelUpdate, ConversationView, LiveChannel, PollScope, UpdateKind};
use orchid_client::storage::LocalStore;
use orchid_client::ui::{chat_view, login, sidebar};
use orchid_client::{ClientError, Result};

#[derive(Parser)]
#[command(name = "orchid", version, about = "Orchid community board messaging client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Save server and account details
    Login {
        /// Board URL (e.g. https://board.example)
        #[arg(long)]
        server: String,
        /// Account email
        #[arg(long)]
        email: String,
        /// Legacy username, for accounts created before email sign-in
        #[arg(long)]
        username: Option<String>,
        /// API bearer token
        #[arg(long)]
        token: Option<String>,
    },
    /// List conversations
    Conversations,
    /// Open a conversation and follow it live; each input line is sent
    Open {
        /// Room key, email, username or display name
        who: String,
    },
    /// Send one message
    Send {
        /// Recipient email, username or room key
        to: String,
        /// Message text
        text: String,
    },
    /// Mark a message as read
    Read { id: String },
    /// Delete a message
    Delete { id: String },
    /// List the user directory
    Users,
    /// Viewed-post tracking
    Posts {
        #[command(subcommand)]
        action: PostsAction,
    },
    /// Cached location
    Location {
        #[command(subcommand)]
        action: LocationAction,
    },
}

#[derive(Subcommand)]
enum PostsAction {
    /// Record that a post was opened
    Viewed { id: String },
    /// Show recently viewed posts
    List {
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Subcommand)]
enum LocationAction {
    /// Cache a location fix
    Set {
        #[arg(allow_negative_numbers = true)]
        lat: f64,
        #[arg(allow_negative_numbers = true)]
        lon: f64,
    },
    /// Show the cached fix if it is fresh enough
    Show {
        /// Maximum age in seconds
        #[arg(long, default_value_t = 3600)]
        max_age: u64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    env_logger::init();
    let cli = Cli::parse();

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<()> {
    match command {
        Command::Login { server, email, username, token } => {
            let form = login::LoginForm { server, email, username, token };
            println!("{}", login::run(&form).await?);
        }
        Command::Conversations => {
            let (session, client) = connect()?;
            let directory = client.users_or_empty().await;
            let messages = client.fetch_my_messages(session.identity()).await;
            let convs = derive_conversations(&messages, session.identity(), &directory);
            print!("{}", sidebar::render(&convs));
        }
        Command::Open { who } => {
            let settings = Settings::load();
            let session = Session::from_settings(&settings)?;
            open_conversation(&session, settings.poll_interval_secs, &who).await?;
        }
        Command::Send { to, text } => {
            if text.trim().is_empty() {
                return Err(ClientError::EmptyMessage);
            }
            let (session, client) = connect()?;
            let directory = client.users_or_empty().await;
            let messages = client.fetch_my_messages(session.identity()).await;
            let conv = select_conversation(&session, &directory, &messages, &to);
            let sent = client.send_message(session.identity(), &conv, &text).await?;
            println!("sent {} to {}", sent.id, conv.other_user_name);
        }
        Command::Read { id } => {
            let (_, client) = connect()?;
            client.mark_read(&id).await?;
            println!("marked {id} read");
        }
        Command::Delete { id } => {
            let (_, client) = connect()?;
            client.delete_message(&id).await?;
            println!("deleted {id}");
        }
        Command::Users => {
            let (_, client) = connect()?;
            let directory = client.users().await?;
            for user in directory.users() {
                println!(
                    "{}  {}  {}",
                    user.label().unwrap_or("-"),
                    user.user_name.as_deref().unwrap_or("-"),
                    user.email.as_deref().unwrap_or("-"),
                );
            }
        }
        Command::Posts { action } => {
            let store = LocalStore::open_default()?;
            match action {
                PostsAction::Viewed { id } => store.mark_post_viewed(&id)?,
                PostsAction::List { limit } => {
                    for id in store.viewed_posts(limit)? {
                        println!("{id}");
                    }
                }
            }
        }
        Command::Location { action } => {
            let store = LocalStore::open_default()?;
            match action {
                LocationAction::Set { lat, lon } => store.cache_location(lat, lon)?,
                LocationAction::Show { max_age } => match store.cached_location(Duration::from_secs(max_age))? {
                    Some(fix) => println!("{:.5}, {:.5}", fix.lat, fix.lon),
                    None => println!("no fresh location cached"),
                },
            }
        }
    }
    Ok(())
}

fn connect() -> Result<(Session, ApiClient)> {
    let session = Session::from_settings(&Settings::load())?;
    let client = ApiClient::new(&session)?;
    Ok((session, client))
}

/// Existing conversation matching `who`, or a fresh one for a first contact.
fn select_conversation(
    session: &Session,
    directory: &Directory,
    messages: &[ChatMessage],
    who: &str,
) -> Conversation {
    let mut convs = derive_conversations(messages, session.identity(), directory);
    if let Some(c) = find_conversation(&convs, who) {
        return c.clone();
    }
    let idx = ensure_conversation(&mut convs, session.identity(), who, directory, messages);
    convs.swap_remove(idx)
}

async fn open_conversation(session: &Session, poll_secs: u64, who: &str) -> Result<()> {
    let identity = session.identity();
    let client = ApiClient::new(session)?;
    let directory = client.users_or_empty().await;
    let messages = client.fetch_my_messages(identity).await;
    let conv = select_conversation(session, &directory, &messages, who);

    let mut view = ConversationView::new(conv.id.clone());
    view.apply(ChannelUpdate {
        room: conv.id.clone(),
        kind: UpdateKind::Refetch(conversation_messages(&messages, identity, &directory, &conv.id)),
    });
    client.mark_conversation_read(identity, view.messages_mut()).await;

    println!("-- {} [{}] (Ctrl-C to leave)", conv.other_user_name, conv.id);
    print!("{}", chat_view::render(&view, identity, &conv.other_user_name));
    let mut shown: HashSet<String> = view.messages().iter().map(|m| m.id.clone()).collect();

    let scope = PollScope {
        identity: identity.clone(),
        directory,
    };
    let (mut channel, mut updates) = LiveChannel::new(client.clone(), scope, poll_secs);
    channel.open(&conv.id);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            Some(update) = updates.recv() => {
                if view.apply(update) {
                    client.mark_conversation_read(identity, view.messages_mut()).await;
                    for msg in view.messages() {
                        if shown.insert(msg.id.clone()) {
                            println!("{}", chat_view::render_message(msg, identity, &conv.other_user_name));
                        }
                    }
                }
            }
            line = lines.next_line() => {
                let Some(text) = line? else { break };
                match client.send_message(identity, &conv, &text).await {
                    Ok(sent) => {
                        shown.insert(sent.id.clone());
                        println!("{}", chat_view::render_message(&sent, identity, &conv.other_user_name));
                        view.push_local(sent);
                    }
                    Err(ClientError::EmptyMessage) => println!("(empty message not sent)"),
                    Err(e) => log::warn!("send failed: {e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    channel.close();
    Ok(())
}
