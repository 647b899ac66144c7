use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};

use chatsync::conversations::{
    CacheUpdate, ConversationId, DraftMessage, Message, MessageId, UpdateKind, UserId,
};
use chatsync::history::{LoadOutcome, OlderOutcome};
use chatsync::transport::TransportEvent;
use chatsync::{LiveBridge, SyncError};

/// Line-oriented session over a [`LiveBridge`].
pub struct App {
    pub should_quit: bool,
    bridge: Arc<LiveBridge>,
    user: UserId,

    updates: broadcast::Receiver<CacheUpdate>,
    status_tx: mpsc::UnboundedSender<String>,
    status_rx: mpsc::UnboundedReceiver<String>,
}

impl App {
    pub fn new(bridge: Arc<LiveBridge>, user: UserId) -> Self {
        let updates = bridge.cache().subscribe();
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        Self {
            should_quit: false,
            bridge,
            user,
            updates,
            status_tx,
            status_rx,
        }
    }

    pub async fn run(
        &mut self,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        auto_open: Option<&str>,
    ) -> Result<()> {
        self.add_status_message(format!(
            "chatsync v{} - signed in as {}",
            env!("CARGO_PKG_VERSION"),
            self.user
        ));
        if let Some(conversation) = auto_open {
            self.open_conversation(conversation).await;
        }

        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        while !self.should_quit {
            tokio::select! {
                line = lines.next_line() => match line? {
                    Some(line) => self.submit_input(&line).await?,
                    None => self.should_quit = true,
                },
                event = events.recv() => match event {
                    Some(event) => self.bridge.handle_event(event).await,
                    None => {
                        self.add_status_message("Push transport stopped".to_string());
                        self.should_quit = true;
                    }
                },
                update = self.updates.recv() => match update {
                    Ok(update) => self.show_update(update),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        self.add_status_message(format!("Missed {skipped} updates, reprinting"));
                        self.list_messages();
                    }
                    Err(broadcast::error::RecvError::Closed) => {}
                },
                Some(status) = self.status_rx.recv() => self.add_status_message(status),
            }
        }

        self.bridge.close().await;
        Ok(())
    }

    async fn submit_input(&mut self, line: &str) -> Result<()> {
        let input = line.trim();
        if input.is_empty() {
            return Ok(());
        }

        if input.starts_with('/') {
            self.handle_command(input).await?;
        } else {
            self.send_message(input);
        }
        Ok(())
    }

    async fn handle_command(&mut self, input: &str) -> Result<()> {
        let parts: Vec<&str> = input[1..].split_whitespace().collect();
        if parts.is_empty() {
            return Ok(());
        }

        match parts[0].to_lowercase().as_str() {
            "open" | "o" | "join" => {
                if parts.len() != 2 {
                    self.add_status_message("Usage: /open <conversation>".to_string());
                    return Ok(());
                }
                self.open_conversation(parts[1]).await;
            }
            "close" | "leave" => {
                self.bridge.close().await;
                self.add_status_message("Closed conversation".to_string());
            }
            "older" | "more" => self.load_older(),
            "list" | "ls" => self.list_messages(),
            "edit" | "e" => {
                if parts.len() < 3 {
                    self.add_status_message("Usage: /edit <message> <text>".to_string());
                    return Ok(());
                }
                self.edit_message(parts[1].into(), parts[2..].join(" "));
            }
            "delete" | "del" => {
                if parts.len() != 2 {
                    self.add_status_message("Usage: /delete <message>".to_string());
                    return Ok(());
                }
                self.delete_message(parts[1].into());
            }
            "chats" => self.list_conversations(),
            "new" => {
                if parts.len() != 2 {
                    self.add_status_message("Usage: /new <user>".to_string());
                    return Ok(());
                }
                self.add_conversation(parts[1].into());
            }
            "drop" => {
                if parts.len() != 2 {
                    self.add_status_message("Usage: /drop <conversation>".to_string());
                    return Ok(());
                }
                self.delete_conversation(parts[1].into());
            }
            "help" | "h" => self.show_help(),
            "quit" | "q" | "exit" => self.should_quit = true,
            _ => {
                self.add_status_message(format!(
                    "Unknown command: {}. Type /help for available commands.",
                    parts[0]
                ));
            }
        }

        Ok(())
    }

    async fn open_conversation(&mut self, id: &str) {
        let conversation = ConversationId::new(id);
        self.bridge.switch(&conversation).await;

        // Loaded off the input loop; a result for a conversation we already
        // left is discarded by the loader.
        let bridge = Arc::clone(&self.bridge);
        let status_tx = self.status_tx.clone();
        tokio::spawn(async move {
            let status = match bridge.history().load_initial(&conversation).await {
                LoadOutcome::CacheHit => format!("#{conversation} (cached)"),
                LoadOutcome::Loaded { fetched, has_more } => format!(
                    "#{conversation}: loaded {fetched} messages{}",
                    if has_more { ", /older for more" } else { "" }
                ),
                LoadOutcome::InFlight => format!("#{conversation} is still loading"),
                LoadOutcome::Stale => return,
                LoadOutcome::Failed => format!("Could not load #{conversation}, try /open again"),
            };
            let _ = status_tx.send(status);
        });
    }

    fn load_older(&mut self) {
        let bridge = Arc::clone(&self.bridge);
        let status_tx = self.status_tx.clone();
        tokio::spawn(async move {
            let status = match bridge.load_older().await {
                OlderOutcome::Merged { merged, has_more } => format!(
                    "Loaded {merged} older messages{}",
                    if has_more { "" } else { " (start of history)" }
                ),
                OlderOutcome::Exhausted => "Start of history".to_string(),
                OlderOutcome::Failed => "Could not load older messages".to_string(),
                OlderOutcome::Skipped | OlderOutcome::Stale => return,
            };
            let _ = status_tx.send(status);
        });
    }

    fn send_message(&mut self, content: &str) {
        let Some(conversation) = self.bridge.current() else {
            self.add_status_message(SyncError::NotOpen.to_string());
            return;
        };

        let draft = DraftMessage::new(self.user.clone(), content);
        let bridge = Arc::clone(&self.bridge);
        let status_tx = self.status_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = bridge.send(&conversation, draft).await {
                let _ = status_tx.send(format!("Message not sent ({e}); retype to retry"));
            }
        });
    }

    fn edit_message(&mut self, id: MessageId, content: String) {
        let Some(conversation) = self.bridge.current() else {
            self.add_status_message(SyncError::NotOpen.to_string());
            return;
        };

        let bridge = Arc::clone(&self.bridge);
        let status_tx = self.status_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = bridge.update(&conversation, &id, &content).await {
                let _ = status_tx.send(format!("Edit of {id} failed: {e}"));
            }
        });
    }

    fn delete_message(&mut self, id: MessageId) {
        let Some(conversation) = self.bridge.current() else {
            self.add_status_message(SyncError::NotOpen.to_string());
            return;
        };

        let bridge = Arc::clone(&self.bridge);
        let status_tx = self.status_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = bridge.remove(&conversation, &id).await {
                let _ = status_tx.send(format!("Delete of {id} failed: {e}"));
            }
        });
    }

    fn list_conversations(&mut self) {
        let bridge = Arc::clone(&self.bridge);
        let status_tx = self.status_tx.clone();
        let user = self.user.clone();
        tokio::spawn(async move {
            let conversations = match bridge.conversations_for(&user).await {
                Ok(conversations) => conversations,
                Err(e) => {
                    let _ = status_tx.send(format!("Could not list conversations: {e}"));
                    return;
                }
            };
            if conversations.is_empty() {
                let _ = status_tx.send("No conversations".to_string());
            }
            for conversation in conversations {
                let peer = conversation
                    .other_participant(&user)
                    .map_or_else(|| "?".to_string(), |peer| peer.to_string());
                let preview = match bridge.last_message(&conversation).await {
                    Ok(Some(message)) => message.body().text,
                    Ok(None) => "No recent message".to_string(),
                    Err(_) => "...".to_string(),
                };
                let _ = status_tx.send(format!("#{} with {peer}: {preview}", conversation.id));
            }
        });
    }

    fn add_conversation(&mut self, receiver: UserId) {
        let bridge = Arc::clone(&self.bridge);
        let status_tx = self.status_tx.clone();
        let user = self.user.clone();
        tokio::spawn(async move {
            let status = match bridge.add_conversation(&user, &receiver).await {
                Ok(conversation) => format!("Created #{} with {receiver}", conversation.id),
                Err(e) => format!("Could not create conversation: {e}"),
            };
            let _ = status_tx.send(status);
        });
    }

    fn delete_conversation(&mut self, conversation: ConversationId) {
        let bridge = Arc::clone(&self.bridge);
        let status_tx = self.status_tx.clone();
        tokio::spawn(async move {
            let status = match bridge.delete_conversation(&conversation).await {
                Ok(()) => format!("Deleted #{conversation}"),
                Err(e) => format!("Could not delete #{conversation}: {e}"),
            };
            let _ = status_tx.send(status);
        });
    }

    fn show_update(&mut self, update: CacheUpdate) {
        if self.bridge.current().as_ref() != Some(&update.conversation) {
            return;
        }
        match update.kind {
            UpdateKind::Appended(id) | UpdateKind::Patched(id) => {
                if let Some(message) = self
                    .bridge
                    .cache()
                    .get(&update.conversation)
                    .into_iter()
                    .find(|m| m.id == id)
                {
                    println!("{}", format_message(&message));
                }
            }
            UpdateKind::Removed(id) => println!("  (message {id} deleted)"),
            UpdateKind::Replaced | UpdateKind::MergedOlder(_) => self.list_messages(),
            UpdateKind::Cursor | UpdateKind::Forgotten => {}
        }
    }

    fn list_messages(&mut self) {
        let Some(conversation) = self.bridge.current() else {
            self.add_status_message("No conversation open. Use /open <conversation>".to_string());
            return;
        };
        for message in self.bridge.cache().get(&conversation) {
            println!("{}", format_message(&message));
        }
    }

    fn show_help(&mut self) {
        let help_text = [
            "Commands:",
            "/open <conversation> - Open a conversation and load its history",
            "/close - Close the open conversation",
            "/older - Load older messages",
            "/list - Print the cached messages",
            "/edit <message> <text> - Edit a message",
            "/delete <message> - Delete a message",
            "/chats - List your conversations",
            "/new <user> - Start a conversation with a user",
            "/drop <conversation> - Delete a conversation",
            "/quit - Exit",
            "Anything else is sent to the open conversation.",
        ];

        for line in help_text {
            self.add_status_message(line.to_string());
        }
    }

    pub fn add_status_message(&mut self, message: String) {
        println!("[{}] {}", chrono::Local::now().format("%H:%M:%S"), message);
    }
}

fn format_message(message: &Message) -> String {
    let body = message.body();
    let image = body
        .image_url
        .map(|url| format!(" [image: {url}]"))
        .unwrap_or_default();
    format!(
        "{} <{}> {}{} ({})",
        message.timestamp.with_timezone(&chrono::Local).format("%H:%M"),
        message.author_id,
        body.text,
        image,
        message.id
    )
}
