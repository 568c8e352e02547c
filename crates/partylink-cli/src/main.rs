//! Command-line client for Partylink parties

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use partylink_core::{
    AccountId, ClientConfig, JoinStrategy, MetaValue, Notification, PartyClient, PartyConfig,
    PartyEvent, PartyId, PartyPrivacy, StaticSession,
};

#[derive(Parser)]
#[command(name = "partylink")]
#[command(about = "Join and manage real-time multiplayer parties", long_about = None)]
struct Cli {
    /// Base URL of the party REST service
    #[arg(long, env = "PARTYLINK_SERVICE_URL")]
    service_url: Option<String>,

    /// URL of the presence stream
    #[arg(long, env = "PARTYLINK_STREAM_URL")]
    stream_url: Option<String>,

    /// Application namespace
    #[arg(long, env = "PARTYLINK_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Account id to authenticate as
    #[arg(long, env = "PARTYLINK_ACCOUNT")]
    account: String,

    /// Display name shown to other members
    #[arg(long, env = "PARTYLINK_DISPLAY_NAME")]
    display_name: Option<String>,

    /// Access token
    #[arg(long, env = "PARTYLINK_TOKEN")]
    token: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a party and watch it until interrupted
    Create {
        /// Maximum number of members
        #[arg(long, default_value_t = 16)]
        max_size: u32,
        /// Privacy level: public, friends or private
        #[arg(long, default_value = "public", value_parser = parse_privacy)]
        privacy: PartyPrivacy,
    },
    /// Join an existing party and watch it until interrupted
    Join {
        /// Party id to join
        party_id: String,
        /// Negotiate over the stream instead of the REST endpoint
        #[arg(long)]
        legacy: bool,
    },
    /// List pending invitations
    Invitations,
    /// Accept the invitation from the given account
    Accept {
        /// Account that sent the invitation
        from: String,
    },
    /// Decline the invitation from the given account
    Decline {
        /// Account that sent the invitation
        from: String,
    },
    /// Rejoin the party the service still tracks and watch it
    Restore,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let client = build_client(&cli)?;
    client.connect().await.context("connecting stream")?;

    match cli.command {
        Commands::Create { max_size, privacy } => {
            let config = PartyConfig {
                max_size,
                privacy,
                ..Default::default()
            };
            let party = client.create_party(config).await.context("creating party")?;
            println!("created {}", party.id());
            party.me().set("Ready_b", false).await?;
            watch(&client).await;
        }
        Commands::Join { party_id, legacy } => {
            let strategy = if legacy {
                JoinStrategy::LegacyHandshake
            } else {
                JoinStrategy::RestPush
            };
            let party = client
                .join_party(&PartyId::new(party_id), strategy)
                .await
                .context("joining party")?;
            println!("joined {}", party.id());
            watch(&client).await;
        }
        Commands::Invitations => {
            let invitations = client.invitations().await.context("fetching invitations")?;
            if invitations.is_empty() {
                println!("no pending invitations");
            }
            for invitation in invitations {
                println!("{} from {}", invitation.party_id, invitation.sent_by);
            }
        }
        Commands::Accept { from } => {
            let invitation = find_invitation(&client, &from).await?;
            let party = client
                .accept_invitation(&invitation)
                .await
                .context("accepting invitation")?;
            println!("joined {}", party.id());
            watch(&client).await;
        }
        Commands::Decline { from } => {
            let invitation = find_invitation(&client, &from).await?;
            client
                .decline_invitation(&invitation)
                .await
                .context("declining invitation")?;
            println!("declined invitation from {from}");
        }
        Commands::Restore => match client.restore().await.context("restoring")? {
            Some(party) => {
                println!("restored {}", party.id());
                watch(&client).await;
            }
            None => println!("no tracked party"),
        },
    }
    Ok(())
}

fn build_client(cli: &Cli) -> Result<PartyClient> {
    let mut config = ClientConfig::default();
    config.namespace = cli.namespace.clone();
    if let Some(url) = &cli.service_url {
        config.party_service_url = url.clone();
    }
    if let Some(url) = &cli.stream_url {
        config.stream_url = url.clone();
        config.stream_host = url
            .trim_start_matches("wss://")
            .trim_start_matches("ws://")
            .split('/')
            .next()
            .unwrap_or("stream")
            .to_string();
    }
    let display_name = cli.display_name.clone().unwrap_or_else(|| cli.account.clone());
    let session = Arc::new(StaticSession::new(
        AccountId::new(cli.account.clone()),
        display_name,
        cli.token.clone(),
    ));
    Ok(PartyClient::new(config, session))
}

fn parse_privacy(raw: &str) -> Result<PartyPrivacy, String> {
    match raw.to_ascii_lowercase().as_str() {
        "public" => Ok(PartyPrivacy::Public),
        "friends" => Ok(PartyPrivacy::Friends),
        "private" => Ok(PartyPrivacy::Private),
        other => Err(format!("unknown privacy level: {other}")),
    }
}

async fn find_invitation(
    client: &PartyClient,
    from: &str,
) -> Result<partylink_core::Invitation> {
    let sender = AccountId::new(from);
    client
        .invitations()
        .await
        .context("fetching invitations")?
        .into_iter()
        .find(|i| i.sent_by == sender)
        .with_context(|| format!("no invitation from {from}"))
}

/// Print party events until interrupted
async fn watch(client: &PartyClient) {
    let mut events = client.events();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                if let Err(e) = client.leave_current().await {
                    eprintln!("leave failed: {e}");
                }
                client.disconnect();
                return;
            }
            event = events.recv() => {
                let Ok(event) = event else { return };
                print_event(&event);
            }
        }
    }
}

fn print_event(event: &PartyEvent) {
    match event {
        PartyEvent::Connected => println!("stream connected"),
        PartyEvent::Disconnected { will_retry } => {
            println!("stream lost (retrying: {will_retry})")
        }
        PartyEvent::SessionRefreshed => println!("stream session refreshed"),
        PartyEvent::Presence { from, available, status } => {
            println!("presence {from}: available={available} status={}", status.status)
        }
        PartyEvent::Notification(n) => print_notification(n),
    }
}

fn print_notification(n: &Notification) {
    match n {
        Notification::MemberJoined { account_id, .. } => println!("+ {account_id} joined"),
        Notification::MemberLeft { account_id, .. } => println!("- {account_id} left"),
        Notification::MemberKicked { account_id, .. } => println!("- {account_id} kicked"),
        Notification::MemberExpired { account_id, .. } => println!("- {account_id} expired"),
        Notification::MemberNewCaptain { account_id, .. } => {
            println!("* {account_id} is now captain")
        }
        Notification::MemberStateUpdated {
            account_id,
            member_state_updated,
            ..
        } => {
            for (key, value) in member_state_updated {
                let decoded = decode(key, value);
                println!("  {account_id}: {key} = {decoded}");
            }
        }
        Notification::PartyUpdated { revision, .. } => println!("party updated (rev {revision})"),
        Notification::Ping { sent_by, .. } => println!("! invitation from {sent_by}"),
        Notification::Chat { sent_by, message } => println!("<{sent_by}> {message}"),
        other => println!("{other:?}"),
    }
}

fn decode(key: &str, encoded: &str) -> String {
    let mut meta = partylink_core::Meta::new();
    meta.set_raw(key, encoded);
    match meta.get(key) {
        MetaValue::Json(v) => v.to_string(),
        other => other.encode(),
    }
}
