//! # relaypad-peer
//!
//! Terminal peer for the relaypad network.
//!
//! Joins a shared topic through a relay rendezvous node, discovers the
//! other members, negotiates private chat sessions, and runs collaborative
//! document sessions over an editor channel.

mod coordinator;
mod doc;
mod doc_session;
mod nicknames;
mod session;

use clap::Parser;
use libp2p::Multiaddr;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use relaypad_net::{extract_peer_id, spawn_swarm, SwarmConfig};
use relaypad_shared::topics::{short_peer_id, validate_shared_topic};

use crate::coordinator::{Coordinator, PeerCommand, PeerEvent};

#[derive(Parser, Debug)]
#[command(name = "relaypad-peer", about = "Ephemeral P2P chat and collaborative editing")]
struct Cli {
    /// Relay multiaddr including its peer id,
    /// e.g. /ip4/203.0.113.7/tcp/4003/ws/p2p/12D3KooW...
    #[arg(long, env = "RELAY_ADDR")]
    relay: Multiaddr,

    /// Shared topic to join.
    #[arg(long, default_value = relaypad_shared::constants::APP_NAME)]
    topic: String,

    /// Display name announced to other peers.
    #[arg(long)]
    nickname: Option<String>,

    /// Accept incoming session requests without prompting.
    #[arg(long)]
    auto_accept: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,relaypad_peer=debug")),
        )
        .init();

    let cli = Cli::parse();

    let relay_peer_id = extract_peer_id(&cli.relay)
        .ok_or_else(|| anyhow::anyhow!("relay address must end in /p2p/<peer-id>"))?;
    validate_shared_topic(&cli.topic)?;

    let keypair = libp2p::identity::Keypair::generate_ed25519();
    let (cmd_tx, notif_rx, local_peer_id) =
        spawn_swarm(keypair, SwarmConfig::default()).await?;

    let nickname = cli
        .nickname
        .unwrap_or_else(|| short_peer_id(&local_peer_id.to_string()).to_string());

    info!(
        peer_id = %local_peer_id,
        nickname = %nickname,
        topic = %cli.topic,
        "Starting relaypad peer"
    );

    let (command_tx, command_rx) = mpsc::channel::<PeerCommand>(32);
    let (event_tx, mut event_rx) = mpsc::channel::<PeerEvent>(64);

    let coordinator = Coordinator::new(
        local_peer_id,
        nickname,
        cli.topic,
        cli.relay,
        relay_peer_id,
        cli.auto_accept,
        cmd_tx,
        event_tx,
    );
    let mut coordinator_handle = tokio::spawn(coordinator.run(notif_rx, command_rx));

    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            print_event(event);
        }
    });

    tokio::select! {
        result = &mut coordinator_handle => {
            // Relay unreachable or swarm failure; nothing to do but exit.
            return result?;
        }
        result = repl(command_tx) => {
            result?;
        }
    }

    coordinator_handle.await??;
    Ok(())
}

/// Read commands from stdin until EOF or `/quit`.
async fn repl(command_tx: mpsc::Sender<PeerCommand>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    print_help();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some(command) = parse_command(line) else {
            print_help();
            continue;
        };
        let quitting = matches!(command, PeerCommand::Shutdown);
        command_tx.send(command).await?;
        if quitting {
            break;
        }
    }
    Ok(())
}

fn parse_command(line: &str) -> Option<PeerCommand> {
    let mut parts = line.splitn(2, ' ');
    let verb = parts.next()?;
    let rest = parts.next().unwrap_or("").trim();

    match verb {
        "/peers" => Some(PeerCommand::ListPeers),
        "/connect" if !rest.is_empty() => Some(PeerCommand::Connect(rest.to_string())),
        "/accept" if !rest.is_empty() => Some(PeerCommand::Accept(rest.to_string())),
        "/reject" if !rest.is_empty() => Some(PeerCommand::Reject(rest.to_string())),
        "/msg" => {
            let mut args = rest.splitn(2, ' ');
            let peer = args.next()?.to_string();
            let content = args.next()?.to_string();
            Some(PeerCommand::Say { peer, content })
        }
        "/end" if !rest.is_empty() => Some(PeerCommand::End(rest.to_string())),
        "/edit" => Some(PeerCommand::OpenEditor(if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        })),
        "/insert" => {
            let mut args = rest.splitn(2, ' ');
            let index = args.next()?.parse().ok()?;
            let text = args.next()?.to_string();
            Some(PeerCommand::Insert { index, text })
        }
        "/delete" => {
            let mut args = rest.split(' ');
            let index = args.next()?.parse().ok()?;
            let len = args.next()?.parse().ok()?;
            Some(PeerCommand::Delete { index, len })
        }
        "/show" => Some(PeerCommand::ShowDoc),
        "/quit" => Some(PeerCommand::Shutdown),
        _ => None,
    }
}

fn print_help() {
    println!(
        "commands:\n  \
         /peers                  list discovered peers\n  \
         /connect <peer>         request a private session\n  \
         /accept <peer>          accept a pending request\n  \
         /reject <peer>          reject a pending request\n  \
         /msg <peer> <text>      send a chat message\n  \
         /end <peer>             end a session\n  \
         /edit [channel]         open (or join) a collaborative document\n  \
         /insert <idx> <text>    insert into the document\n  \
         /delete <idx> <len>     delete from the document\n  \
         /show                   print the document\n  \
         /quit                   exit"
    );
}

fn print_event(event: PeerEvent) {
    match event {
        PeerEvent::Discovered { peer_id, nickname } => {
            println!("* discovered {nickname} ({peer_id})");
        }
        PeerEvent::PeerConnected { peer_id, relayed } => {
            let path = if relayed { "relayed" } else { "direct" };
            println!("* connected to {peer_id} ({path})");
        }
        PeerEvent::PeerDisconnected { peer_id } => {
            println!("* disconnected from {peer_id}");
        }
        PeerEvent::NicknameChanged { peer_id, nickname } => {
            println!("* {} is now known as {nickname}", short_peer_id(&peer_id));
        }
        PeerEvent::SessionRequest { peer_id, nickname } => {
            println!("* {nickname} wants to chat: /accept {peer_id} or /reject {peer_id}");
        }
        PeerEvent::SessionConnected { peer_id, topic } => {
            println!("* session open with {peer_id} on {topic}");
        }
        PeerEvent::SessionRejected { peer_id } => {
            println!("* {peer_id} rejected the request");
        }
        PeerEvent::Chat { sender, content } => {
            println!("<{sender}> {content}");
        }
        PeerEvent::EditorOpened { topic, client_id } => {
            println!("* editor open on {topic} (client {client_id}); share the channel name");
        }
        PeerEvent::EditorPeerJoined { client_id } => {
            println!("* editor participant joined (client {client_id})");
        }
        PeerEvent::EditorAwareness {
            client_id,
            nickname,
            cursor,
        } => match cursor {
            Some(cursor) => {
                println!("* {nickname} (client {client_id}) is at position {cursor}");
            }
            None => println!("* {nickname} is in the editor (client {client_id})"),
        },
        PeerEvent::DocChanged { contents } => {
            println!("--- document ---\n{contents}\n----------------");
        }
        PeerEvent::Info(info) => {
            println!("* {info}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert!(matches!(parse_command("/peers"), Some(PeerCommand::ListPeers)));
        assert!(matches!(
            parse_command("/connect 12D3KooWA"),
            Some(PeerCommand::Connect(p)) if p == "12D3KooWA"
        ));
        match parse_command("/msg alice hello there") {
            Some(PeerCommand::Say { peer, content }) => {
                assert_eq!(peer, "alice");
                assert_eq!(content, "hello there");
            }
            other => panic!("unexpected: {other:?}"),
        }
        match parse_command("/insert 4 some text") {
            Some(PeerCommand::Insert { index, text }) => {
                assert_eq!(index, 4);
                assert_eq!(text, "some text");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(
            parse_command("/delete 2 5"),
            Some(PeerCommand::Delete { index: 2, len: 5 })
        ));
        assert!(matches!(
            parse_command("/edit"),
            Some(PeerCommand::OpenEditor(None))
        ));
        assert!(matches!(
            parse_command("/edit editor-demo-123"),
            Some(PeerCommand::OpenEditor(Some(_)))
        ));
        assert!(parse_command("/nonsense").is_none());
        assert!(parse_command("/connect").is_none());
    }
}
