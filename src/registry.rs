use axum::extract::ws;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, Instant};
use uuid::Uuid;

use crate::config::RoomsConfig;
use crate::content::WordCatalog;
use crate::game::session::{
    ConnectIntent, EventOutcome, RoomSummary, validate_identity, validate_name,
};
use crate::game::{ClientToServerMessage, GameError, ImpostorGame};

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const CODE_LENGTH: usize = 4;

/// Canonical form of a client-supplied room code, or `None` when the
/// input cannot possibly be one.
pub fn normalize_code(input: &str) -> Option<String> {
    let code = input.trim().to_ascii_uppercase();
    if code.len() == CODE_LENGTH && code.bytes().all(|b| b.is_ascii_uppercase()) {
        Some(code)
    } else {
        None
    }
}

fn random_code(rng: &mut impl Rng) -> String {
    (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Draws codes until one is free, failing fast after `max_attempts`
/// rather than looping unboundedly.
fn generate_code(
    existing: &HashMap<String, RoomActorHandle>,
    max_attempts: u32,
) -> Result<String, GameError> {
    let mut rng = rand::thread_rng();
    for _ in 0..max_attempts {
        let code = random_code(&mut rng);
        if !existing.contains_key(&code) {
            return Ok(code);
        }
    }
    Err(GameError::CodeExhaustion)
}

#[derive(Debug, Serialize, Clone)]
pub struct RoomDetails {
    pub code: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
pub enum RoomManagerMessage {
    CreateRoom {
        identity: String,
        name: String,
        respond_to: oneshot::Sender<Result<(RoomDetails, RoomActorHandle), GameError>>,
    },
    GetRoom {
        code: String,
        respond_to: oneshot::Sender<Option<RoomActorHandle>>,
    },
    RoomClosed {
        code: String,
    },
}

/// Owns the code -> room map: the only cross-room shared state.
pub struct RoomManagerActor {
    receiver: mpsc::Receiver<RoomManagerMessage>,
    rooms: HashMap<String, RoomActorHandle>,
    self_sender: mpsc::Sender<RoomManagerMessage>,
    rooms_config: RoomsConfig,
    catalog: Arc<WordCatalog>,
}

impl RoomManagerActor {
    fn new(
        receiver: mpsc::Receiver<RoomManagerMessage>,
        self_sender: mpsc::Sender<RoomManagerMessage>,
        rooms_config: RoomsConfig,
        catalog: Arc<WordCatalog>,
    ) -> Self {
        RoomManagerActor { receiver, rooms: HashMap::new(), self_sender, rooms_config, catalog }
    }

    #[tracing::instrument(skip(self, msg), fields(
        msg_type = %std::any::type_name_of_val(&msg)
    ))]
    async fn handle_message(&mut self, msg: RoomManagerMessage) {
        match msg {
            RoomManagerMessage::CreateRoom { identity, name, respond_to } => {
                let _ = respond_to.send(self.create_room(identity, name).await);
            }
            RoomManagerMessage::GetRoom { code, respond_to } => {
                tracing::debug!(room.code = %code, "Received GetRoom request");
                let _ = respond_to.send(self.rooms.get(&code).cloned());
            }
            RoomManagerMessage::RoomClosed { code } => {
                if self.rooms.remove(&code).is_some() {
                    tracing::info!(
                        room.code = %code,
                        rooms.open = self.rooms.len(),
                        "Cleaning up room after actor shutdown"
                    );
                } else {
                    tracing::warn!(room.code = %code, "Received shutdown for unknown room");
                }
            }
        }
    }

    async fn create_room(
        &mut self,
        identity: String,
        name: String,
    ) -> Result<(RoomDetails, RoomActorHandle), GameError> {
        validate_identity(&identity)?;
        let name = validate_name(&name)?;
        if self.rooms.len() >= self.rooms_config.max_rooms {
            tracing::warn!(
                rooms.open = self.rooms.len(),
                rooms.max = self.rooms_config.max_rooms,
                "Rejecting room creation at capacity"
            );
            return Err(GameError::Capacity);
        }
        let code = generate_code(&self.rooms, self.rooms_config.code_attempts)?;

        let manager_handle = RoomManagerHandle { sender: self.self_sender.clone() };
        let handle = RoomActorHandle::spawn(
            code.clone(),
            identity.clone(),
            name,
            32,
            manager_handle,
            Arc::clone(&self.catalog),
            self.rooms_config.clone(),
        )
        .await;
        self.rooms.insert(code.clone(), handle.clone());

        tracing::info!(
            room.code = %code,
            host.identity = %identity,
            rooms.open = self.rooms.len(),
            "Created room"
        );
        Ok((RoomDetails { code, created_at: Utc::now() }, handle))
    }
}

#[tracing::instrument(skip(actor))]
pub async fn run_room_manager_actor(mut actor: RoomManagerActor) {
    tracing::info!("RoomManager actor started");
    while let Some(msg) = actor.receiver.recv().await {
        actor.handle_message(msg).await;
    }
    tracing::info!("RoomManager actor stopped");
}

#[derive(Clone, Debug)]
pub struct RoomManagerHandle {
    sender: mpsc::Sender<RoomManagerMessage>,
}

impl RoomManagerHandle {
    pub fn spawn(buffer_size: usize, rooms_config: RoomsConfig, catalog: Arc<WordCatalog>) -> Self {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let actor = RoomManagerActor::new(receiver, sender.clone(), rooms_config, catalog);
        let handle = Self { sender };
        tokio::spawn(run_room_manager_actor(actor));
        handle
    }

    pub async fn create_room(
        &self,
        identity: String,
        name: String,
    ) -> Result<(RoomDetails, RoomActorHandle), GameError> {
        let (respond_to, rx) = oneshot::channel();
        self.sender
            .send(RoomManagerMessage::CreateRoom { identity, name, respond_to })
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to send CreateRoom");
                GameError::Internal
            })?;
        rx.await.map_err(|e| {
            tracing::error!(error = %e, "RoomManager gave no CreateRoom response");
            GameError::Internal
        })?
    }

    /// Room lookup by raw client input; malformed codes resolve to `None`.
    pub async fn get_room(&self, raw_code: &str) -> Option<RoomActorHandle> {
        let code = normalize_code(raw_code)?;
        let (respond_to, rx) = oneshot::channel();
        if self
            .sender
            .send(RoomManagerMessage::GetRoom { code, respond_to })
            .await
            .is_err()
        {
            return None;
        }
        rx.await.ok().flatten()
    }

    pub async fn notify_room_closed(&self, code: String) -> Result<(), String> {
        self.sender
            .send(RoomManagerMessage::RoomClosed { code })
            .await
            .map_err(|e| format!("Failed to send RoomClosed: {e}"))
    }
}

#[derive(Debug)]
pub enum RoomActorMessage {
    Connect {
        conn_id: Uuid,
        intent: ConnectIntent,
        client_tx: mpsc::Sender<ws::Message>,
        respond_to: oneshot::Sender<Result<(), GameError>>,
    },
    ClientEvent {
        conn_id: Uuid,
        identity: String,
        message: ClientToServerMessage,
    },
    ClientDisconnected {
        conn_id: Uuid,
    },
    GuessTimeout {
        seq: u64,
    },
    Summary {
        respond_to: oneshot::Sender<RoomSummary>,
    },
}

/// Serializes every mutation of one room. The guess countdown is a
/// one-shot task posting back into this actor's inbox, so a timer fire
/// can never interleave with a disconnect or a submitted guess.
pub struct RoomActor {
    receiver: mpsc::Receiver<RoomActorMessage>,
    game: ImpostorGame,
    manager_handle: RoomManagerHandle,
    guess_timer: Option<tokio::task::JoinHandle<()>>,
}

impl RoomActor {
    fn new(
        receiver: mpsc::Receiver<RoomActorMessage>,
        game: ImpostorGame,
        manager_handle: RoomManagerHandle,
    ) -> Self {
        RoomActor { receiver, game, manager_handle, guess_timer: None }
    }

    async fn handle_message(
        &mut self,
        msg: RoomActorMessage,
        self_sender: &mpsc::Sender<RoomActorMessage>,
    ) -> bool {
        match msg {
            RoomActorMessage::Connect { conn_id, intent, client_tx, respond_to } => {
                let result = self.game.connect(conn_id, intent, client_tx).await;
                let _ = respond_to.send(result);
                false
            }
            RoomActorMessage::ClientEvent { conn_id, identity, message } => {
                tracing::trace!(
                    client.conn = %conn_id,
                    event.kind = message.kind(),
                    "Processing event from client"
                );
                let outcome = self.game.handle_event(conn_id, &identity, message).await;
                self.apply(outcome, self_sender)
            }
            RoomActorMessage::ClientDisconnected { conn_id } => {
                let outcome = self.game.handle_disconnect(conn_id).await;
                self.apply(outcome, self_sender)
            }
            RoomActorMessage::GuessTimeout { seq } => {
                let outcome = self.game.handle_guess_timeout(seq).await;
                self.apply(outcome, self_sender)
            }
            RoomActorMessage::Summary { respond_to } => {
                let _ = respond_to.send(self.game.summary());
                false
            }
        }
    }

    /// Performs the actor-side effects an engine call asked for.
    /// Returns true when the room should shut down.
    fn apply(&mut self, outcome: EventOutcome, self_sender: &mpsc::Sender<RoomActorMessage>) -> bool {
        match outcome {
            EventOutcome::Handled => false,
            EventOutcome::ArmGuessTimer { seconds, seq } => {
                if let Some(old) = self.guess_timer.take() {
                    old.abort();
                }
                let sender = self_sender.clone();
                self.guess_timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(seconds)).await;
                    if sender.send(RoomActorMessage::GuessTimeout { seq }).await.is_err() {
                        tracing::debug!("Room actor gone before guess timeout fired");
                    }
                }));
                false
            }
            EventOutcome::DisarmGuessTimer => {
                if let Some(timer) = self.guess_timer.take() {
                    timer.abort();
                }
                false
            }
            EventOutcome::CloseRoom => {
                tracing::info!("Room {} is empty, shutting down", self.game.code());
                true
            }
        }
    }
}

#[tracing::instrument(skip(actor, self_sender, inactivity), fields(room.code = %actor.game.code()))]
pub async fn run_room_actor(
    mut actor: RoomActor,
    self_sender: mpsc::Sender<RoomActorMessage>,
    inactivity: Duration,
) {
    tracing::info!("Room actor started");
    let mut last_activity = Instant::now();

    loop {
        tokio::select! {
            maybe_msg = actor.receiver.recv() => {
                match maybe_msg {
                    Some(msg) => {
                        if matches!(
                            msg,
                            RoomActorMessage::Connect { .. } | RoomActorMessage::ClientEvent { .. }
                        ) {
                            last_activity = Instant::now();
                        }
                        let should_shutdown = actor.handle_message(msg, &self_sender).await;
                        if should_shutdown {
                            break;
                        }
                    }
                    None => {
                        tracing::info!("Room actor channel closed. Shutting down");
                        break;
                    }
                }
            }
            _ = tokio::time::sleep_until(last_activity + inactivity) => {
                tracing::info!("Room expired after inactivity");
                break;
            }
        }
    }

    if let Some(timer) = actor.guess_timer.take() {
        timer.abort();
    }
    if let Err(e) = actor
        .manager_handle
        .notify_room_closed(actor.game.code().to_string())
        .await
    {
        tracing::error!(error = %e, "Failed to notify RoomManager of shutdown");
    }
    tracing::info!("Room actor stopped");
}

#[derive(Clone, Debug)]
pub struct RoomActorHandle {
    pub sender: mpsc::Sender<RoomActorMessage>,
    pub code: String,
}

impl RoomActorHandle {
    pub async fn spawn(
        code: String,
        host_identity: String,
        host_name: String,
        buffer_size: usize,
        manager_handle: RoomManagerHandle,
        catalog: Arc<WordCatalog>,
        rooms_config: RoomsConfig,
    ) -> Self {
        let inactivity = Duration::from_secs(rooms_config.inactivity_seconds);
        let game =
            ImpostorGame::new(code.clone(), host_identity, host_name, catalog, rooms_config).await;
        let (sender, receiver) = mpsc::channel(buffer_size);
        let actor = RoomActor::new(receiver, game, manager_handle);
        tokio::spawn(run_room_actor(actor, sender.clone(), inactivity));
        Self { sender, code }
    }

    pub async fn connect(
        &self,
        conn_id: Uuid,
        intent: ConnectIntent,
        client_tx: mpsc::Sender<ws::Message>,
    ) -> Result<(), GameError> {
        let (respond_to, rx) = oneshot::channel();
        self.sender
            .send(RoomActorMessage::Connect { conn_id, intent, client_tx, respond_to })
            .await
            .map_err(|_| GameError::NotFound)?;
        rx.await.map_err(|_| GameError::NotFound)?
    }

    pub async fn process_event(
        &self,
        conn_id: Uuid,
        identity: String,
        message: ClientToServerMessage,
    ) -> Result<(), String> {
        self.sender
            .send(RoomActorMessage::ClientEvent { conn_id, identity, message })
            .await
            .map_err(|e| format!("Failed to send event: {e}"))
    }

    pub async fn client_disconnected(&self, conn_id: Uuid) {
        if self
            .sender
            .send(RoomActorMessage::ClientDisconnected { conn_id })
            .await
            .is_err()
        {
            tracing::debug!("Room {} already closed at disconnect", self.code);
        }
    }

    pub async fn summary(&self) -> Option<RoomSummary> {
        let (respond_to, rx) = oneshot::channel();
        self.sender
            .send(RoomActorMessage::Summary { respond_to })
            .await
            .ok()?;
        rx.await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ContentConfig, ContentSourceType};

    fn test_rooms_config(max_rooms: usize) -> RoomsConfig {
        RoomsConfig {
            max_rooms,
            max_players: 8,
            guess_seconds: 30,
            inactivity_seconds: 600,
            code_attempts: 50,
        }
    }

    async fn test_catalog() -> Arc<WordCatalog> {
        let config = ContentConfig {
            source_type: ContentSourceType::Embedded,
            file_path: None,
            http_url: None,
        };
        Arc::new(WordCatalog::new(config).await.unwrap())
    }

    #[test]
    fn normalize_code_canonicalizes_and_rejects() {
        assert_eq!(normalize_code(" abcd "), Some("ABCD".to_string()));
        assert_eq!(normalize_code("WXYZ"), Some("WXYZ".to_string()));
        assert_eq!(normalize_code("abc"), None);
        assert_eq!(normalize_code("abcde"), None);
        assert_eq!(normalize_code("ab1d"), None);
        assert_eq!(normalize_code(""), None);
    }

    #[test]
    fn random_codes_match_the_format() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let code = random_code(&mut rng);
            assert_eq!(code.len(), CODE_LENGTH);
            assert!(code.bytes().all(|b| b.is_ascii_uppercase()));
        }
    }

    #[tokio::test]
    async fn create_room_returns_a_valid_code() {
        let manager = RoomManagerHandle::spawn(8, test_rooms_config(10), test_catalog().await);
        let (details, handle) = manager
            .create_room("host-id".to_string(), "Alice".to_string())
            .await
            .unwrap();
        assert!(normalize_code(&details.code).is_some());
        assert_eq!(handle.code, details.code);

        let found = manager.get_room(&details.code).await;
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn creation_fails_at_capacity() {
        let manager = RoomManagerHandle::spawn(8, test_rooms_config(1), test_catalog().await);
        manager
            .create_room("host-1".to_string(), "Alice".to_string())
            .await
            .unwrap();
        let result = manager
            .create_room("host-2".to_string(), "Bob".to_string())
            .await;
        assert_eq!(result.map(|(d, _)| d.code), Err(GameError::Capacity));
    }

    #[tokio::test]
    async fn creation_validates_identity_and_name() {
        let manager = RoomManagerHandle::spawn(8, test_rooms_config(10), test_catalog().await);
        let result = manager.create_room(String::new(), "Alice".to_string()).await;
        assert!(matches!(result, Err(GameError::Validation(_))));
        let result = manager.create_room("host-id".to_string(), "   ".to_string()).await;
        assert!(matches!(result, Err(GameError::Validation(_))));
    }

    #[tokio::test]
    async fn unknown_or_malformed_codes_resolve_to_none() {
        let manager = RoomManagerHandle::spawn(8, test_rooms_config(10), test_catalog().await);
        assert!(manager.get_room("QQQQ").await.is_none());
        assert!(manager.get_room("not a code").await.is_none());
    }

    #[tokio::test]
    async fn room_actor_accepts_connections_and_reports_summaries() {
        let manager = RoomManagerHandle::spawn(8, test_rooms_config(10), test_catalog().await);
        let (details, handle) = manager
            .create_room("host-id".to_string(), "Alice".to_string())
            .await
            .unwrap();

        let (tx, _host_rx) = mpsc::channel(32);
        handle
            .connect(
                Uuid::new_v4(),
                ConnectIntent::Create { identity: "host-id".to_string() },
                tx,
            )
            .await
            .unwrap();

        let (tx, _join_rx) = mpsc::channel(32);
        handle
            .connect(
                Uuid::new_v4(),
                ConnectIntent::Join { identity: "friend-id".to_string(), name: "Bob".to_string() },
                tx,
            )
            .await
            .unwrap();

        let summary = handle.summary().await.unwrap();
        assert_eq!(summary.code, details.code);
        assert_eq!(summary.players, 2);
        assert_eq!(summary.phase, crate::game::Phase::Lobby);
    }
}
