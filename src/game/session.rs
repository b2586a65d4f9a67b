use axum::extract::ws;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::Sender as TokioMpscSender;
use tokio::time::{Duration, Instant};
use uuid::Uuid;

use crate::config::RoomsConfig;
use crate::content::{MIN_WORDS, WordCatalog, parse_custom_words};
use crate::game::guess::{GuessState, GuessTrigger, is_correct_guess};
use crate::game::messages::{ServerToClientMessage, SessionSnapshot};
use crate::game::tally::{self, VoteOutcome};
use crate::game::{
    ClientToServerMessage, GameError, Identity, MAX_IMPOSTOR_COUNT, MIN_PLAYERS, Phase, Player,
    Role, TurnEntry, WordMode, roles,
};

const MAX_NAME_LEN: usize = 24;
const MAX_IDENTITY_LEN: usize = 64;
const CUSTOM_WORDS_PREVIEW: usize = 5;

pub fn validate_identity(identity: &str) -> Result<(), GameError> {
    if identity.is_empty() || identity.len() > MAX_IDENTITY_LEN {
        return Err(GameError::Validation("Invalid identity token".to_string()));
    }
    Ok(())
}

pub fn validate_name(name: &str) -> Result<String, GameError> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
        return Err(GameError::Validation(format!(
            "Names must be 1-{MAX_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

/// How a fresh connection wants to attach to a room.
#[derive(Debug, Clone)]
pub enum ConnectIntent {
    Create { identity: Identity },
    Join { identity: Identity, name: String },
    Reconnect { identity: Identity },
}

/// Side effects the room actor must perform after an engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Handled,
    /// A guess window opened; arm a one-shot timer carrying `seq`.
    ArmGuessTimer { seconds: u64, seq: u64 },
    /// The pending guess resolved or was cleared; abort the timer.
    DisarmGuessTimer,
    /// The room has no members left; the actor should shut down.
    CloseRoom,
}

#[derive(Debug)]
struct Connection {
    conn_id: Uuid,
    tx: TokioMpscSender<ws::Message>,
}

/// Summary returned by the HTTP room probe.
#[derive(Debug, Clone, Serialize)]
pub struct RoomSummary {
    pub code: String,
    pub phase: Phase,
    pub players: usize,
    pub max_players: usize,
    pub created_at: DateTime<Utc>,
}

/// One room's complete game state. Owned by exactly one room actor;
/// every method runs under that actor's serialization.
#[derive(Debug)]
pub struct ImpostorGame {
    code: String,
    host: Identity,
    phase: Phase,
    mode: WordMode,
    category: String,
    custom_words: Vec<String>,
    impostor_count: usize,
    players: Vec<Player>,
    roles: HashMap<Identity, Role>,
    secret_word: Option<String>,
    ballots: HashMap<Identity, Identity>,
    turn_order: Vec<TurnEntry>,
    guess: GuessState,
    /// Bumped on every guess-window entry so a late timer message from a
    /// previous window can be told apart from the live one.
    guess_seq: u64,
    connections: HashMap<Identity, Connection>,
    catalog: Arc<WordCatalog>,
    config: RoomsConfig,
    created_at: DateTime<Utc>,
}

impl ImpostorGame {
    pub async fn new(
        code: String,
        host_identity: Identity,
        host_name: String,
        catalog: Arc<WordCatalog>,
        config: RoomsConfig,
    ) -> Self {
        let category = catalog.default_category().await;
        let host = Player {
            identity: host_identity.clone(),
            name: host_name,
            is_host: true,
            eliminated: false,
        };
        Self {
            code,
            host: host_identity,
            phase: Phase::Lobby,
            mode: WordMode::Preset,
            category,
            custom_words: Vec::new(),
            impostor_count: 1,
            players: vec![host],
            roles: HashMap::new(),
            secret_word: None,
            ballots: HashMap::new(),
            turn_order: Vec::new(),
            guess: GuessState::Idle,
            guess_seq: 0,
            connections: HashMap::new(),
            catalog,
            config,
            created_at: Utc::now(),
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            code: self.code.clone(),
            phase: self.phase,
            players: self.players.len(),
            max_players: self.config.max_players,
            created_at: self.created_at,
        }
    }

    // ----- connection lifecycle -----

    /// Attach a socket to this room. On failure nothing is bound and the
    /// caller reports the error on the raw socket.
    pub async fn connect(
        &mut self,
        conn_id: Uuid,
        intent: ConnectIntent,
        client_tx: TokioMpscSender<ws::Message>,
    ) -> Result<(), GameError> {
        match intent {
            ConnectIntent::Create { identity } => {
                if identity != self.host {
                    return Err(GameError::Validation(
                        "Create handshake must come from the room creator".to_string(),
                    ));
                }
                self.bind(identity.clone(), conn_id, client_tx);
                self.send_to(
                    &identity,
                    &ServerToClientMessage::SessionCreated {
                        code: self.code.clone(),
                        players: self.players.clone(),
                        mode: self.mode,
                        category: self.category.clone(),
                        impostor_count: self.impostor_count,
                    },
                )
                .await;
                Ok(())
            }
            ConnectIntent::Join { identity, name } => {
                validate_identity(&identity)?;
                let name = validate_name(&name)?;
                if self.phase != Phase::Lobby {
                    return Err(GameError::NotLobby);
                }
                if self.players.len() >= self.config.max_players {
                    return Err(GameError::RoomFull);
                }
                if self.is_member(&identity) {
                    return Err(GameError::AlreadyJoined);
                }
                self.players.push(Player {
                    identity: identity.clone(),
                    name,
                    is_host: false,
                    eliminated: false,
                });
                self.bind(identity.clone(), conn_id, client_tx);
                tracing::info!("Room {}: player {} joined", self.code, identity);
                self.send_to(
                    &identity,
                    &ServerToClientMessage::SessionJoined {
                        code: self.code.clone(),
                        players: self.players.clone(),
                        mode: self.mode,
                        category: self.category.clone(),
                        impostor_count: self.impostor_count,
                    },
                )
                .await;
                self.broadcast_player_list().await;
                Ok(())
            }
            ConnectIntent::Reconnect { identity } => {
                if !self.is_member(&identity) {
                    return Err(GameError::NotFound);
                }
                self.bind(identity.clone(), conn_id, client_tx);
                tracing::info!("Room {}: player {} reconnected", self.code, identity);
                let snapshot = self.snapshot_for(&identity);
                self.send_to(
                    &identity,
                    &ServerToClientMessage::ReconnectSuccess { snapshot },
                )
                .await;
                if self.guess.pending_guesser() == Some(&identity) {
                    let seconds = self.guess.seconds_remaining();
                    self.send_to(
                        &identity,
                        &ServerToClientMessage::ImpostorGuessPrompt { seconds },
                    )
                    .await;
                }
                Ok(())
            }
        }
    }

    /// A new binding for an identity supersedes any previous one; the old
    /// socket's channel is dropped, which closes it.
    fn bind(&mut self, identity: Identity, conn_id: Uuid, tx: TokioMpscSender<ws::Message>) {
        if let Some(old) = self.connections.insert(identity.clone(), Connection { conn_id, tx }) {
            tracing::debug!(
                "Room {}: connection {} for {} superseded by {}",
                self.code,
                old.conn_id,
                identity,
                conn_id
            );
        }
    }

    fn is_current_connection(&self, identity: &str, conn_id: Uuid) -> bool {
        self.connections
            .get(identity)
            .is_some_and(|c| c.conn_id == conn_id)
    }

    /// Socket closed. Only acted on when the socket still holds the live
    /// binding; events from superseded sockets are discarded here.
    pub async fn handle_disconnect(&mut self, conn_id: Uuid) -> EventOutcome {
        let Some(identity) = self
            .connections
            .iter()
            .find(|(_, c)| c.conn_id == conn_id)
            .map(|(id, _)| id.clone())
        else {
            return EventOutcome::Handled;
        };
        tracing::info!("Room {}: player {} disconnected", self.code, identity);
        self.remove_or_unbind(&identity).await
    }

    // ----- event dispatch -----

    pub async fn handle_event(
        &mut self,
        conn_id: Uuid,
        identity: &str,
        message: ClientToServerMessage,
    ) -> EventOutcome {
        if !self.is_current_connection(identity, conn_id) {
            tracing::trace!(
                "Room {}: ignoring event from superseded connection {}",
                self.code,
                conn_id
            );
            return EventOutcome::Handled;
        }

        use ClientToServerMessage::*;
        let result = match message {
            CreateSession { .. } | JoinSession { .. } | Reconnect { .. } => Err(
                GameError::StateConflict("This connection is already bound to a room".to_string()),
            ),
            LeaveSession => return self.handle_leave(identity).await,
            StartGame => self.handle_start_game(identity).await,
            SelectMode { mode } => self.handle_select_mode(identity, mode).await,
            SelectCategory { name } => self.handle_select_category(identity, name).await,
            SubmitCustomWords { text } => self.handle_submit_custom_words(identity, &text).await,
            SetImpostorCount { count } => self.handle_set_impostor_count(identity, count).await,
            StartVoting => self.handle_start_voting(identity).await,
            SubmitVote { target } => self.handle_submit_vote(identity, target).await,
            EndVoting => self.handle_end_voting(identity).await,
            SubmitWordGuess { text } => self.handle_submit_word_guess(identity, &text).await,
            NextRound => self.handle_next_round(identity).await,
            EndRound => self.handle_end_round(identity).await,
            PlayAgain => self.handle_play_again(identity).await,
            KickPlayer { target } => self.handle_kick(identity, &target).await,
        };

        match result {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::debug!("Room {}: rejected action from {}: {}", self.code, identity, err);
                self.send_error(identity, &err).await;
                EventOutcome::Handled
            }
        }
    }

    /// Stale-timer-proof entry point for the guess countdown.
    pub async fn handle_guess_timeout(&mut self, seq: u64) -> EventOutcome {
        if seq != self.guess_seq {
            return EventOutcome::Handled;
        }
        self.resolve_guess(GuessTrigger::TimedOut).await;
        EventOutcome::Handled
    }

    // ----- lobby configuration -----

    async fn handle_select_mode(
        &mut self,
        identity: &str,
        mode: WordMode,
    ) -> Result<EventOutcome, GameError> {
        self.require_host(identity)?;
        self.require_lobby("changing the word mode")?;
        self.mode = mode;
        self.broadcast(&ServerToClientMessage::ModeChanged { mode }).await;
        Ok(EventOutcome::Handled)
    }

    async fn handle_select_category(
        &mut self,
        identity: &str,
        name: String,
    ) -> Result<EventOutcome, GameError> {
        self.require_host(identity)?;
        self.require_lobby("changing the category")?;
        if self.catalog.words_for(&name).await.is_none() {
            return Err(GameError::Validation(format!("Unknown category '{name}'")));
        }
        self.category = name.clone();
        self.broadcast(&ServerToClientMessage::CategorySelected { name }).await;
        Ok(EventOutcome::Handled)
    }

    async fn handle_submit_custom_words(
        &mut self,
        identity: &str,
        text: &str,
    ) -> Result<EventOutcome, GameError> {
        self.require_host(identity)?;
        self.require_lobby("changing the custom words")?;
        self.custom_words = parse_custom_words(text);
        let count = self.custom_words.len();
        self.broadcast(&ServerToClientMessage::CustomWordsUpdated {
            count,
            valid: count >= MIN_WORDS,
            preview: self
                .custom_words
                .iter()
                .take(CUSTOM_WORDS_PREVIEW)
                .cloned()
                .collect(),
        })
        .await;
        Ok(EventOutcome::Handled)
    }

    async fn handle_set_impostor_count(
        &mut self,
        identity: &str,
        count: usize,
    ) -> Result<EventOutcome, GameError> {
        self.require_host(identity)?;
        self.require_lobby("changing the impostor count")?;
        if count == 0 || count > MAX_IMPOSTOR_COUNT {
            return Err(GameError::Validation(format!(
                "Impostor count must be between 1 and {MAX_IMPOSTOR_COUNT}"
            )));
        }
        self.impostor_count = count;
        self.broadcast(&ServerToClientMessage::ImpostorCountChanged { count }).await;
        Ok(EventOutcome::Handled)
    }

    // ----- phase transitions -----

    async fn handle_start_game(&mut self, identity: &str) -> Result<EventOutcome, GameError> {
        self.require_host(identity)?;
        self.require_lobby("starting the game")?;
        if self.players.len() < MIN_PLAYERS {
            return Err(GameError::Validation(format!(
                "Need at least {MIN_PLAYERS} players to start"
            )));
        }
        if self.impostor_count >= self.players.len() {
            return Err(GameError::Validation(
                "There must be fewer impostors than players".to_string(),
            ));
        }
        let words = self.active_words().await?;
        let assignment = roles::assign(&self.players, self.impostor_count, &words)?;

        for p in &mut self.players {
            p.eliminated = false;
        }
        self.ballots.clear();
        self.roles = assignment.roles;
        self.secret_word = Some(assignment.secret_word);
        self.turn_order = assignment.turn_order;
        self.phase = Phase::Discussion;

        tracing::info!(
            "Room {}: game started with {} players, {} impostor(s)",
            self.code,
            self.players.len(),
            self.impostor_count
        );

        let category = self.category_label();
        for player in self.players.clone() {
            let role = self.roles.get(&player.identity).copied().unwrap_or(Role::Crew);
            let word = match role {
                Role::Crew => self.secret_word.clone(),
                Role::Impostor => None,
            };
            self.send_to(
                &player.identity,
                &ServerToClientMessage::RoleAssigned { role, category: category.clone(), word },
            )
            .await;
        }

        self.broadcast_phase().await;
        self.broadcast(&ServerToClientMessage::TurnOrder { order: self.turn_order.clone() })
            .await;
        self.broadcast_player_list().await;
        Ok(EventOutcome::Handled)
    }

    async fn handle_start_voting(&mut self, identity: &str) -> Result<EventOutcome, GameError> {
        self.require_host(identity)?;
        if self.phase != Phase::Discussion {
            return Err(GameError::StateConflict(
                "Voting can only start from the discussion phase".to_string(),
            ));
        }
        self.ballots.clear();
        self.phase = Phase::Voting;
        self.broadcast_phase().await;
        self.broadcast_vote_update().await;
        Ok(EventOutcome::Handled)
    }

    async fn handle_submit_vote(
        &mut self,
        identity: &str,
        target: Identity,
    ) -> Result<EventOutcome, GameError> {
        if self.phase != Phase::Voting {
            return Err(GameError::StateConflict("There is no vote in progress".to_string()));
        }
        let voter_eliminated = self
            .players
            .iter()
            .find(|p| p.identity == identity)
            .map(|p| p.eliminated)
            .unwrap_or(true);
        if voter_eliminated {
            return Err(GameError::Validation("Eliminated players cannot vote".to_string()));
        }
        let target_ok = self
            .players
            .iter()
            .any(|p| p.identity == target && !p.eliminated);
        if !target_ok {
            return Err(GameError::Validation("Invalid vote target".to_string()));
        }

        // Overwriting an earlier ballot is allowed.
        self.ballots.insert(identity.to_string(), target);
        self.broadcast_vote_update().await;

        if self.ballots.len() >= self.living_count() {
            return Ok(self.run_tally().await);
        }
        Ok(EventOutcome::Handled)
    }

    async fn handle_end_voting(&mut self, identity: &str) -> Result<EventOutcome, GameError> {
        self.require_host(identity)?;
        if self.phase != Phase::Voting {
            return Err(GameError::StateConflict("There is no vote in progress".to_string()));
        }
        Ok(self.run_tally().await)
    }

    async fn handle_next_round(&mut self, identity: &str) -> Result<EventOutcome, GameError> {
        self.require_host(identity)?;
        if self.phase != Phase::Results {
            return Err(GameError::StateConflict(
                "The next round can only start from the results phase".to_string(),
            ));
        }
        if self.guess.is_pending() {
            return Err(GameError::StateConflict(
                "Waiting for the impostor's last guess".to_string(),
            ));
        }
        if tally::decide_winner(&self.players, &self.roles).is_some() {
            return Err(GameError::GameAlreadyDecided);
        }
        self.turn_order.retain(|t| {
            self.players
                .iter()
                .any(|p| p.identity == t.identity && !p.eliminated)
        });
        self.ballots.clear();
        self.phase = Phase::Discussion;
        self.broadcast_phase().await;
        self.broadcast(&ServerToClientMessage::TurnOrder { order: self.turn_order.clone() })
            .await;
        Ok(EventOutcome::Handled)
    }

    async fn handle_end_round(&mut self, identity: &str) -> Result<EventOutcome, GameError> {
        self.require_host(identity)?;
        if !matches!(self.phase, Phase::Discussion | Phase::Voting | Phase::Results) {
            return Err(GameError::StateConflict("No round is in progress".to_string()));
        }
        self.reset_round();
        tracing::info!("Room {}: round ended early by host", self.code);
        self.broadcast(&ServerToClientMessage::GameReset).await;
        self.broadcast_phase().await;
        self.broadcast_player_list().await;
        Ok(EventOutcome::DisarmGuessTimer)
    }

    async fn handle_play_again(&mut self, identity: &str) -> Result<EventOutcome, GameError> {
        self.require_host(identity)?;
        if self.phase != Phase::Ended {
            return Err(GameError::StateConflict(
                "A new game can only start once the current one has ended".to_string(),
            ));
        }
        self.reset_round();
        self.broadcast(&ServerToClientMessage::GameReset).await;
        self.broadcast_phase().await;
        self.broadcast_player_list().await;
        // Re-announce the session configuration for rejoining screens.
        self.broadcast(&ServerToClientMessage::ModeChanged { mode: self.mode }).await;
        self.broadcast(&ServerToClientMessage::CategorySelected { name: self.category.clone() })
            .await;
        let count = self.custom_words.len();
        self.broadcast(&ServerToClientMessage::CustomWordsUpdated {
            count,
            valid: count >= MIN_WORDS,
            preview: self
                .custom_words
                .iter()
                .take(CUSTOM_WORDS_PREVIEW)
                .cloned()
                .collect(),
        })
        .await;
        self.broadcast(&ServerToClientMessage::ImpostorCountChanged {
            count: self.impostor_count,
        })
        .await;
        Ok(EventOutcome::Handled)
    }

    async fn handle_kick(
        &mut self,
        identity: &str,
        target: &str,
    ) -> Result<EventOutcome, GameError> {
        self.require_host(identity)?;
        if target == identity {
            return Err(GameError::Validation("The host cannot kick themselves".to_string()));
        }
        if !self.is_member(target) {
            return Err(GameError::NotFound);
        }

        let mut outcome = EventOutcome::Handled;
        if self.guess.pending_guesser().map(String::as_str) == Some(target) {
            self.resolve_guess(GuessTrigger::Disconnected).await;
            outcome = EventOutcome::DisarmGuessTimer;
        }

        self.send_to(
            target,
            &ServerToClientMessage::Kicked { reason: "Removed by the host".to_string() },
        )
        .await;
        self.connections.remove(target);
        self.players.retain(|p| p.identity != target);
        self.ballots.retain(|voter, t| voter != target && t != target);
        self.turn_order.retain(|t| t.identity != target);
        tracing::info!("Room {}: player {} kicked by host", self.code, target);
        self.broadcast_player_list().await;

        if matches!(self.phase, Phase::Discussion | Phase::Voting | Phase::Results) {
            if !self.evaluate_win().await && self.phase == Phase::Voting {
                self.broadcast_vote_update().await;
            }
        }
        Ok(outcome)
    }

    async fn handle_submit_word_guess(
        &mut self,
        identity: &str,
        text: &str,
    ) -> Result<EventOutcome, GameError> {
        if self.guess.pending_guesser().map(String::as_str) != Some(identity) {
            return Err(GameError::StateConflict(
                "There is no guess pending for you".to_string(),
            ));
        }
        self.resolve_guess(GuessTrigger::Submitted(text.to_string())).await;
        Ok(EventOutcome::DisarmGuessTimer)
    }

    /// LeaveSession, or a socket dropping while it holds the live binding.
    async fn handle_leave(&mut self, identity: &str) -> EventOutcome {
        self.remove_or_unbind(identity).await
    }

    async fn remove_or_unbind(&mut self, identity: &str) -> EventOutcome {
        self.connections.remove(identity);

        if self.phase == Phase::Lobby {
            // In lobby, leaving means leaving for real.
            self.players.retain(|p| p.identity != identity);
            if self.players.is_empty() {
                return EventOutcome::CloseRoom;
            }
            if self.host == identity {
                let heir = &mut self.players[0];
                heir.is_host = true;
                self.host = heir.identity.clone();
                tracing::info!("Room {}: host migrated to {}", self.code, self.host);
            }
            self.broadcast_player_list().await;
            return EventOutcome::Handled;
        }

        // Mid-game members are kept for reconnection.
        if self.guess.pending_guesser().map(String::as_str) == Some(identity) {
            self.resolve_guess(GuessTrigger::Disconnected).await;
            return EventOutcome::DisarmGuessTimer;
        }
        EventOutcome::Handled
    }

    // ----- tally / guess / win -----

    async fn run_tally(&mut self) -> EventOutcome {
        let result = tally::tally(&self.players, &self.ballots);
        self.phase = Phase::Results;

        let mut eliminated_player = None;
        if let VoteOutcome::Eliminated(target) = &result.outcome
            && let Some(p) = self.players.iter_mut().find(|p| p.identity == *target)
        {
            p.eliminated = true;
            eliminated_player = Some(p.clone());
        }
        if let Some(ep) = &eliminated_player {
            self.ballots
                .retain(|voter, target| voter != &ep.identity && target != &ep.identity);
        }

        self.broadcast(&ServerToClientMessage::VoteResults {
            counts: result.counts,
            eliminated: eliminated_player.clone(),
            tie: result.outcome == VoteOutcome::Tie,
            no_votes: result.outcome == VoteOutcome::NoVotes,
        })
        .await;
        self.broadcast_player_list().await;
        self.broadcast_phase().await;

        if let Some(ep) = eliminated_player
            && self.roles.get(&ep.identity) == Some(&Role::Impostor)
            && self.living_impostors() == 0
        {
            // The last impostor gets one shot at the word before the crew
            // can be declared winners.
            return self.enter_guess_window(ep).await;
        }

        self.evaluate_win().await;
        EventOutcome::Handled
    }

    async fn enter_guess_window(&mut self, guesser: Player) -> EventOutcome {
        let seconds = self.config.guess_seconds;
        self.guess_seq += 1;
        self.guess = GuessState::Awaiting {
            guesser: guesser.identity.clone(),
            deadline: Instant::now() + Duration::from_secs(seconds),
        };
        tracing::info!(
            "Room {}: last impostor {} gets {}s to guess the word",
            self.code,
            guesser.identity,
            seconds
        );
        self.send_to(&guesser.identity, &ServerToClientMessage::ImpostorGuessPrompt { seconds })
            .await;
        self.broadcast_except(
            &guesser.identity,
            &ServerToClientMessage::ImpostorGuessing { name: guesser.name.clone(), seconds },
        )
        .await;
        EventOutcome::ArmGuessTimer { seconds, seq: self.guess_seq }
    }

    /// The single resolution point for the guess window. Whichever of
    /// submit, timeout and disconnect arrives first wins; the state swap
    /// to `Idle` makes every later call a no-op.
    async fn resolve_guess(&mut self, trigger: GuessTrigger) -> bool {
        let GuessState::Awaiting { guesser, .. } =
            std::mem::replace(&mut self.guess, GuessState::Idle)
        else {
            return false;
        };

        let correct = match &trigger {
            GuessTrigger::Submitted(text) => self
                .secret_word
                .as_deref()
                .is_some_and(|secret| is_correct_guess(secret, text)),
            GuessTrigger::TimedOut | GuessTrigger::Disconnected => false,
        };

        if matches!(trigger, GuessTrigger::Submitted(_)) {
            self.broadcast(&ServerToClientMessage::ImpostorGuessResult { correct }).await;
        }

        let (winner, reason) = if correct {
            (crate::game::Winner::Impostor, "guessed the secret word".to_string())
        } else {
            let reason = match trigger {
                GuessTrigger::Submitted(_) => "the impostor failed to guess the word",
                GuessTrigger::TimedOut => "the impostor ran out of time",
                GuessTrigger::Disconnected => "the impostor left before guessing",
            };
            (crate::game::Winner::Crew, reason.to_string())
        };

        tracing::info!(
            "Room {}: guess window for {} resolved, winner: {:?}",
            self.code,
            guesser,
            winner
        );
        self.phase = Phase::Ended;
        self.broadcast(&ServerToClientMessage::GameEnded { winner, reason }).await;
        self.broadcast_phase().await;
        true
    }

    /// Returns true when the game just ended.
    async fn evaluate_win(&mut self) -> bool {
        let Some(winner) = tally::decide_winner(&self.players, &self.roles) else {
            return false;
        };
        let reason = match winner {
            crate::game::Winner::Crew => "all impostors have been eliminated",
            crate::game::Winner::Impostor => "the impostors reached parity with the crew",
        };
        self.phase = Phase::Ended;
        self.broadcast(&ServerToClientMessage::GameEnded {
            winner,
            reason: reason.to_string(),
        })
        .await;
        self.broadcast_phase().await;
        true
    }

    fn reset_round(&mut self) {
        self.roles.clear();
        self.secret_word = None;
        self.ballots.clear();
        self.turn_order.clear();
        self.guess = GuessState::Idle;
        for p in &mut self.players {
            p.eliminated = false;
        }
        self.phase = Phase::Lobby;
    }

    // ----- snapshot / helpers -----

    fn snapshot_for(&self, identity: &str) -> SessionSnapshot {
        let role = self.roles.get(identity).copied();
        let player = self.players.iter().find(|p| p.identity == identity);
        SessionSnapshot {
            code: self.code.clone(),
            phase: self.phase,
            is_host: self.host == identity,
            role,
            word: match role {
                Some(Role::Crew) => self.secret_word.clone(),
                _ => None,
            },
            eliminated: player.map(|p| p.eliminated).unwrap_or(false),
            turn_order: self.turn_order.clone(),
            pending_guess: self.guess.pending_guesser().map(String::as_str) == Some(identity),
            mode: self.mode,
            impostor_count: self.impostor_count,
            category: self.category_label(),
            custom_word_count: self.custom_words.len(),
            players: self.players.clone(),
        }
    }

    async fn active_words(&self) -> Result<Vec<String>, GameError> {
        match self.mode {
            WordMode::Preset => {
                let words = self
                    .catalog
                    .words_for(&self.category)
                    .await
                    .ok_or_else(|| {
                        GameError::Validation(format!(
                            "Category '{}' is not available",
                            self.category
                        ))
                    })?;
                if words.len() < MIN_WORDS {
                    return Err(GameError::Validation(format!(
                        "Category '{}' has too few words",
                        self.category
                    )));
                }
                Ok(words)
            }
            WordMode::Custom => {
                if self.custom_words.len() < MIN_WORDS {
                    return Err(GameError::Validation(format!(
                        "Custom mode needs at least {MIN_WORDS} words"
                    )));
                }
                Ok(self.custom_words.clone())
            }
        }
    }

    fn category_label(&self) -> String {
        match self.mode {
            WordMode::Preset => self.category.clone(),
            WordMode::Custom => "Custom".to_string(),
        }
    }

    fn require_host(&self, identity: &str) -> Result<(), GameError> {
        if self.host != identity {
            return Err(GameError::NotHost);
        }
        Ok(())
    }

    fn require_lobby(&self, action: &str) -> Result<(), GameError> {
        if self.phase != Phase::Lobby {
            return Err(GameError::StateConflict(format!(
                "The lobby is required for {action}"
            )));
        }
        Ok(())
    }

    fn is_member(&self, identity: &str) -> bool {
        self.players.iter().any(|p| p.identity == identity)
    }

    fn living_count(&self) -> usize {
        self.players.iter().filter(|p| !p.eliminated).count()
    }

    fn living_impostors(&self) -> usize {
        self.players
            .iter()
            .filter(|p| !p.eliminated && self.roles.get(&p.identity) == Some(&Role::Impostor))
            .count()
    }

    // ----- outbound plumbing -----

    async fn send_to(&self, identity: &str, message: &ServerToClientMessage) {
        if let Some(conn) = self.connections.get(identity) {
            match message.to_ws_text() {
                Ok(ws_msg) => {
                    if conn.tx.send(ws_msg).await.is_err() {
                        tracing::warn!("Room {}: failed to send to {}", self.code, identity);
                    }
                }
                Err(e) => {
                    tracing::error!("Room {}: failed to serialize message: {}", self.code, e);
                }
            }
        }
    }

    async fn broadcast(&self, message: &ServerToClientMessage) {
        if self.connections.is_empty() {
            return;
        }
        match message.to_ws_text() {
            Ok(ws_msg) => {
                for (identity, conn) in &self.connections {
                    if conn.tx.send(ws_msg.clone()).await.is_err() {
                        tracing::warn!("Room {}: failed to broadcast to {}", self.code, identity);
                    }
                }
            }
            Err(e) => {
                tracing::error!("Room {}: failed to serialize broadcast: {}", self.code, e);
            }
        }
    }

    async fn broadcast_except(&self, excluded: &str, message: &ServerToClientMessage) {
        match message.to_ws_text() {
            Ok(ws_msg) => {
                for (identity, conn) in &self.connections {
                    if identity != excluded && conn.tx.send(ws_msg.clone()).await.is_err() {
                        tracing::warn!("Room {}: failed to broadcast to {}", self.code, identity);
                    }
                }
            }
            Err(e) => {
                tracing::error!("Room {}: failed to serialize broadcast: {}", self.code, e);
            }
        }
    }

    async fn broadcast_player_list(&self) {
        self.broadcast(&ServerToClientMessage::PlayerList { players: self.players.clone() })
            .await;
    }

    async fn broadcast_phase(&self) {
        self.broadcast(&ServerToClientMessage::PhaseChanged { phase: self.phase }).await;
    }

    async fn broadcast_vote_update(&self) {
        self.broadcast(&ServerToClientMessage::VoteUpdate {
            submitted: self.ballots.len(),
            total: self.living_count(),
        })
        .await;
    }

    async fn send_error(&self, identity: &str, err: &GameError) {
        self.send_to(
            identity,
            &ServerToClientMessage::GameError { message: err.to_string() },
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ContentConfig, ContentSourceType};
    use crate::game::Winner;
    use tokio::sync::mpsc;

    fn test_rooms_config() -> RoomsConfig {
        RoomsConfig {
            max_rooms: 10,
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

    struct TestClient {
        conn_id: Uuid,
        rx: mpsc::Receiver<ws::Message>,
    }

    impl TestClient {
        fn drain(&mut self) -> Vec<ServerToClientMessage> {
            let mut out = Vec::new();
            while let Ok(msg) = self.rx.try_recv() {
                if let ws::Message::Text(text) = msg {
                    out.push(serde_json::from_str(text.as_str()).unwrap());
                }
            }
            out
        }
    }

    async fn new_room(host: &str) -> (ImpostorGame, TestClient) {
        let mut game = ImpostorGame::new(
            "ABCD".to_string(),
            host.to_string(),
            format!("{host}-name"),
            test_catalog().await,
            test_rooms_config(),
        )
        .await;
        let (tx, rx) = mpsc::channel(256);
        let conn_id = Uuid::new_v4();
        game.connect(conn_id, ConnectIntent::Create { identity: host.to_string() }, tx)
            .await
            .unwrap();
        (game, TestClient { conn_id, rx })
    }

    async fn join(game: &mut ImpostorGame, identity: &str) -> TestClient {
        let (tx, rx) = mpsc::channel(256);
        let conn_id = Uuid::new_v4();
        game.connect(
            conn_id,
            ConnectIntent::Join {
                identity: identity.to_string(),
                name: format!("{identity}-name"),
            },
            tx,
        )
        .await
        .unwrap();
        TestClient { conn_id, rx }
    }

    /// Pin down who the impostors are after a (random) assignment.
    fn force_roles(game: &mut ImpostorGame, impostors: &[&str]) {
        let identities: Vec<Identity> =
            game.players.iter().map(|p| p.identity.clone()).collect();
        for identity in identities {
            let role = if impostors.contains(&identity.as_str()) {
                Role::Impostor
            } else {
                Role::Crew
            };
            game.roles.insert(identity, role);
        }
    }

    /// Dispatch an event as `identity` over its currently bound
    /// connection, the way the room actor would.
    async fn send_as(
        game: &mut ImpostorGame,
        identity: &str,
        message: ClientToServerMessage,
    ) -> EventOutcome {
        let conn_id = game.connections.get(identity).unwrap().conn_id;
        game.handle_event(conn_id, identity, message).await
    }

    fn has_error(messages: &[ServerToClientMessage]) -> bool {
        messages
            .iter()
            .any(|m| matches!(m, ServerToClientMessage::GameError { .. }))
    }

    // Scenario A: 3 players, 1 impostor, category "Animals".
    #[tokio::test]
    async fn start_game_assigns_one_impostor_and_a_shared_word() {
        let (mut game, mut host) = new_room("p1").await;
        let mut p2 = join(&mut game, "p2").await;
        let mut p3 = join(&mut game, "p3").await;
        send_as(&mut game, "p1", ClientToServerMessage::SelectCategory {
            name: "Animals".to_string(),
        })
        .await;
        host.drain();
        p2.drain();
        p3.drain();

        let outcome = send_as(&mut game, "p1", ClientToServerMessage::StartGame).await;
        assert_eq!(outcome, EventOutcome::Handled);
        assert_eq!(game.phase, Phase::Discussion);

        let mut impostors = 0;
        let mut crew_words = Vec::new();
        for client in [&mut host, &mut p2, &mut p3] {
            let messages = client.drain();
            let role_msg = messages
                .iter()
                .find(|m| matches!(m, ServerToClientMessage::RoleAssigned { .. }))
                .expect("every player gets a private role message");
            if let ServerToClientMessage::RoleAssigned { role, category, word } = role_msg {
                assert_eq!(category, "Animals");
                match role {
                    Role::Impostor => {
                        impostors += 1;
                        assert!(word.is_none(), "impostors must not see the word");
                    }
                    Role::Crew => {
                        crew_words.push(word.clone().expect("crew must see the word"));
                    }
                }
            }
            assert!(messages.iter().any(|m| matches!(
                m,
                ServerToClientMessage::PhaseChanged { phase: Phase::Discussion }
            )));
            assert!(messages.iter().any(
                |m| matches!(m, ServerToClientMessage::TurnOrder { order } if order.len() == 3)
            ));
        }
        assert_eq!(impostors, 1);
        assert_eq!(crew_words.len(), 2);
        assert!(!crew_words[0].is_empty());
        assert_eq!(crew_words[0], crew_words[1]);
    }

    #[tokio::test]
    async fn only_the_host_may_start_the_game() {
        let (mut game, _host) = new_room("p1").await;
        let mut p2 = join(&mut game, "p2").await;
        p2.drain();
        send_as(&mut game, "p2", ClientToServerMessage::StartGame).await;
        assert_eq!(game.phase, Phase::Lobby);
        assert!(has_error(&p2.drain()));
    }

    #[tokio::test]
    async fn starting_needs_two_players_and_room_for_crew() {
        let (mut game, mut host) = new_room("p1").await;
        host.drain();
        send_as(&mut game, "p1", ClientToServerMessage::StartGame).await;
        assert_eq!(game.phase, Phase::Lobby);
        assert!(has_error(&host.drain()));

        // Two players but two impostors requested: also invalid.
        let _p2 = join(&mut game, "p2").await;
        game.impostor_count = 2;
        send_as(&mut game, "p1", ClientToServerMessage::StartGame).await;
        assert_eq!(game.phase, Phase::Lobby);
        assert!(has_error(&host.drain()));
    }

    // Scenario B: votes {p1->p2, p3->p2, p4->p2} eliminate p2; p2 being
    // the sole impostor opens the guess window.
    #[tokio::test]
    async fn unique_plurality_eliminates_and_last_impostor_gets_to_guess() {
        let (mut game, mut host) = new_room("p1").await;
        let mut p2 = join(&mut game, "p2").await;
        let _p3 = join(&mut game, "p3").await;
        let _p4 = join(&mut game, "p4").await;
        send_as(&mut game, "p1", ClientToServerMessage::StartGame).await;
        force_roles(&mut game, &["p2"]);

        send_as(&mut game, "p1", ClientToServerMessage::StartVoting).await;
        host.drain();
        p2.drain();
        for voter in ["p1", "p3", "p4"] {
            let outcome = send_as(&mut game, voter, ClientToServerMessage::SubmitVote {
                target: "p2".to_string(),
            })
            .await;
            assert_eq!(outcome, EventOutcome::Handled);
        }
        // Not everyone voted, so the host closes the vote.
        let outcome = send_as(&mut game, "p1", ClientToServerMessage::EndVoting).await;
        assert_eq!(outcome, EventOutcome::ArmGuessTimer { seconds: 30, seq: 1 });

        assert_eq!(game.phase, Phase::Results);
        assert!(game.guess.is_pending());
        assert!(game.players.iter().find(|p| p.identity == "p2").unwrap().eliminated);

        let host_messages = host.drain();
        let results = host_messages
            .iter()
            .find(|m| matches!(m, ServerToClientMessage::VoteResults { .. }))
            .expect("vote results are broadcast");
        if let ServerToClientMessage::VoteResults { counts, eliminated, tie, no_votes } = results {
            assert_eq!(counts.iter().find(|c| c.identity == "p2").unwrap().votes, 3);
            assert_eq!(eliminated.as_ref().unwrap().identity, "p2");
            assert!(!tie);
            assert!(!no_votes);
        }
        assert!(host_messages.iter().any(
            |m| matches!(m, ServerToClientMessage::ImpostorGuessing { seconds: 30, .. })
        ));
        assert!(p2.drain().iter().any(
            |m| matches!(m, ServerToClientMessage::ImpostorGuessPrompt { seconds: 30 })
        ));
    }

    #[tokio::test]
    async fn vote_auto_tallies_once_every_living_player_has_voted() {
        let (mut game, _host) = new_room("p1").await;
        let _p2 = join(&mut game, "p2").await;
        let _p3 = join(&mut game, "p3").await;
        let _p4 = join(&mut game, "p4").await;
        send_as(&mut game, "p1", ClientToServerMessage::StartGame).await;
        force_roles(&mut game, &["p2"]);
        send_as(&mut game, "p1", ClientToServerMessage::StartVoting).await;

        send_as(&mut game, "p1", ClientToServerMessage::SubmitVote { target: "p3".into() })
            .await;
        send_as(&mut game, "p2", ClientToServerMessage::SubmitVote { target: "p3".into() })
            .await;
        send_as(&mut game, "p4", ClientToServerMessage::SubmitVote { target: "p3".into() })
            .await;
        assert_eq!(game.phase, Phase::Voting);
        send_as(&mut game, "p3", ClientToServerMessage::SubmitVote { target: "p1".into() })
            .await;
        // Fourth ballot was the last missing one: tally ran by itself.
        assert_eq!(game.phase, Phase::Results);
        assert!(game.players.iter().find(|p| p.identity == "p3").unwrap().eliminated);
    }

    #[tokio::test]
    async fn tied_vote_eliminates_nobody() {
        let (mut game, mut host) = new_room("p1").await;
        let _p2 = join(&mut game, "p2").await;
        let _p3 = join(&mut game, "p3").await;
        let _p4 = join(&mut game, "p4").await;
        send_as(&mut game, "p1", ClientToServerMessage::StartGame).await;
        force_roles(&mut game, &["p2"]);
        send_as(&mut game, "p1", ClientToServerMessage::StartVoting).await;
        host.drain();

        send_as(&mut game, "p1", ClientToServerMessage::SubmitVote { target: "p2".into() })
            .await;
        send_as(&mut game, "p2", ClientToServerMessage::SubmitVote { target: "p1".into() })
            .await;
        send_as(&mut game, "p3", ClientToServerMessage::SubmitVote { target: "p2".into() })
            .await;
        send_as(&mut game, "p4", ClientToServerMessage::SubmitVote { target: "p1".into() })
            .await;

        assert_eq!(game.phase, Phase::Results);
        assert!(game.players.iter().all(|p| !p.eliminated));
        assert!(host.drain().iter().any(|m| matches!(
            m,
            ServerToClientMessage::VoteResults { tie: true, eliminated: None, .. }
        )));
    }

    #[tokio::test]
    async fn closing_an_empty_vote_reports_no_votes() {
        let (mut game, mut host) = new_room("p1").await;
        let _p2 = join(&mut game, "p2").await;
        let _p3 = join(&mut game, "p3").await;
        send_as(&mut game, "p1", ClientToServerMessage::StartGame).await;
        force_roles(&mut game, &["p2"]);
        send_as(&mut game, "p1", ClientToServerMessage::StartVoting).await;
        host.drain();

        send_as(&mut game, "p1", ClientToServerMessage::EndVoting).await;
        assert_eq!(game.phase, Phase::Results);
        assert!(game.players.iter().all(|p| !p.eliminated));
        assert!(host.drain().iter().any(|m| matches!(
            m,
            ServerToClientMessage::VoteResults { no_votes: true, eliminated: None, .. }
        )));
    }

    #[tokio::test]
    async fn ballots_only_accept_living_members_as_targets() {
        let (mut game, mut host) = new_room("p1").await;
        let _p2 = join(&mut game, "p2").await;
        let _p3 = join(&mut game, "p3").await;
        send_as(&mut game, "p1", ClientToServerMessage::StartGame).await;
        force_roles(&mut game, &["p2"]);
        send_as(&mut game, "p1", ClientToServerMessage::StartVoting).await;
        host.drain();

        send_as(&mut game, "p1", ClientToServerMessage::SubmitVote { target: "ghost".into() })
            .await;
        assert!(game.ballots.is_empty());
        assert!(has_error(&host.drain()));
    }

    // Scenario C: secret "Dog ", guess "dog" -> impostor wins.
    #[tokio::test]
    async fn correct_guess_wins_the_game_for_the_impostor() {
        let (mut game, mut host) = new_room("p1").await;
        let mut p2 = join(&mut game, "p2").await;
        let _p3 = join(&mut game, "p3").await;
        let _p4 = join(&mut game, "p4").await;
        send_as(&mut game, "p1", ClientToServerMessage::StartGame).await;
        force_roles(&mut game, &["p2"]);
        game.secret_word = Some("Dog ".to_string());
        send_as(&mut game, "p1", ClientToServerMessage::StartVoting).await;
        for voter in ["p1", "p3", "p4"] {
            send_as(&mut game, voter, ClientToServerMessage::SubmitVote {
                target: "p2".to_string(),
            })
            .await;
        }
        send_as(&mut game, "p1", ClientToServerMessage::EndVoting).await;
        assert!(game.guess.is_pending());
        host.drain();
        p2.drain();

        let outcome = send_as(&mut game, "p2", ClientToServerMessage::SubmitWordGuess {
            text: "dog".to_string(),
        })
        .await;
        assert_eq!(outcome, EventOutcome::DisarmGuessTimer);
        assert_eq!(game.phase, Phase::Ended);
        assert!(!game.guess.is_pending());

        let messages = host.drain();
        assert!(messages.iter().any(
            |m| matches!(m, ServerToClientMessage::ImpostorGuessResult { correct: true })
        ));
        assert!(messages.iter().any(|m| matches!(
            m,
            ServerToClientMessage::GameEnded { winner: Winner::Impostor, reason }
                if reason == "guessed the secret word"
        )));
    }

    #[tokio::test]
    async fn wrong_guess_hands_the_win_to_the_crew() {
        let (mut game, mut host) = new_room("p1").await;
        let _p2 = join(&mut game, "p2").await;
        let _p3 = join(&mut game, "p3").await;
        send_as(&mut game, "p1", ClientToServerMessage::StartGame).await;
        force_roles(&mut game, &["p2"]);
        game.secret_word = Some("Dog".to_string());
        send_as(&mut game, "p1", ClientToServerMessage::StartVoting).await;
        for voter in ["p1", "p3"] {
            send_as(&mut game, voter, ClientToServerMessage::SubmitVote {
                target: "p2".to_string(),
            })
            .await;
        }
        send_as(&mut game, "p1", ClientToServerMessage::EndVoting).await;
        host.drain();

        send_as(&mut game, "p2", ClientToServerMessage::SubmitWordGuess {
            text: "cat".to_string(),
        })
        .await;
        assert_eq!(game.phase, Phase::Ended);
        assert!(host.drain().iter().any(|m| matches!(
            m,
            ServerToClientMessage::GameEnded { winner: Winner::Crew, .. }
        )));
    }

    #[tokio::test]
    async fn guess_resolution_is_idempotent() {
        let (mut game, mut host) = new_room("p1").await;
        let _p2 = join(&mut game, "p2").await;
        let _p3 = join(&mut game, "p3").await;
        send_as(&mut game, "p1", ClientToServerMessage::StartGame).await;
        force_roles(&mut game, &["p2"]);
        game.secret_word = Some("Dog".to_string());
        send_as(&mut game, "p1", ClientToServerMessage::StartVoting).await;
        for voter in ["p1", "p3"] {
            send_as(&mut game, voter, ClientToServerMessage::SubmitVote {
                target: "p2".to_string(),
            })
            .await;
        }
        send_as(&mut game, "p1", ClientToServerMessage::EndVoting).await;
        let seq = game.guess_seq;
        host.drain();

        send_as(&mut game, "p2", ClientToServerMessage::SubmitWordGuess {
            text: "Dog".to_string(),
        })
        .await;
        let ended: Vec<_> = host
            .drain()
            .into_iter()
            .filter(|m| matches!(m, ServerToClientMessage::GameEnded { .. }))
            .collect();
        assert_eq!(ended.len(), 1);
        assert!(matches!(
            ended[0],
            ServerToClientMessage::GameEnded { winner: Winner::Impostor, .. }
        ));

        // A racing timer fire must not change the declared winner.
        game.handle_guess_timeout(seq).await;
        assert_eq!(game.phase, Phase::Ended);
        assert!(
            !host
                .drain()
                .iter()
                .any(|m| matches!(m, ServerToClientMessage::GameEnded { .. }))
        );
    }

    #[tokio::test]
    async fn stale_guess_timer_is_ignored() {
        let (mut game, _host) = new_room("p1").await;
        let _p2 = join(&mut game, "p2").await;
        let _p3 = join(&mut game, "p3").await;
        send_as(&mut game, "p1", ClientToServerMessage::StartGame).await;
        force_roles(&mut game, &["p2"]);
        send_as(&mut game, "p1", ClientToServerMessage::StartVoting).await;
        for voter in ["p1", "p3"] {
            send_as(&mut game, voter, ClientToServerMessage::SubmitVote {
                target: "p2".to_string(),
            })
            .await;
        }
        send_as(&mut game, "p1", ClientToServerMessage::EndVoting).await;
        let live_seq = game.guess_seq;

        game.handle_guess_timeout(live_seq - 1).await;
        assert!(game.guess.is_pending(), "stale timer must not resolve the live window");

        game.handle_guess_timeout(live_seq).await;
        assert_eq!(game.phase, Phase::Ended);
    }

    #[tokio::test]
    async fn guesser_disconnect_resolves_for_the_crew() {
        let (mut game, mut host) = new_room("p1").await;
        let p2 = join(&mut game, "p2").await;
        let _p3 = join(&mut game, "p3").await;
        send_as(&mut game, "p1", ClientToServerMessage::StartGame).await;
        force_roles(&mut game, &["p2"]);
        send_as(&mut game, "p1", ClientToServerMessage::StartVoting).await;
        for voter in ["p1", "p3"] {
            send_as(&mut game, voter, ClientToServerMessage::SubmitVote {
                target: "p2".to_string(),
            })
            .await;
        }
        send_as(&mut game, "p1", ClientToServerMessage::EndVoting).await;
        host.drain();

        let outcome = game.handle_disconnect(p2.conn_id).await;
        assert_eq!(outcome, EventOutcome::DisarmGuessTimer);
        assert_eq!(game.phase, Phase::Ended);
        assert!(host.drain().iter().any(|m| matches!(
            m,
            ServerToClientMessage::GameEnded { winner: Winner::Crew, .. }
        )));
    }

    // Scenario D: end round early mid-discussion.
    #[tokio::test]
    async fn end_round_early_hard_resets_without_a_winner() {
        let (mut game, mut host) = new_room("p1").await;
        let _p2 = join(&mut game, "p2").await;
        let _p3 = join(&mut game, "p3").await;
        send_as(&mut game, "p1", ClientToServerMessage::StartGame).await;
        host.drain();

        let outcome = send_as(&mut game, "p1", ClientToServerMessage::EndRound).await;
        assert_eq!(outcome, EventOutcome::DisarmGuessTimer);
        assert_eq!(game.phase, Phase::Lobby);
        assert!(game.roles.is_empty());
        assert!(game.secret_word.is_none());
        assert!(game.ballots.is_empty());
        assert!(game.turn_order.is_empty());
        assert!(game.players.iter().all(|p| !p.eliminated));

        let messages = host.drain();
        assert!(messages.iter().any(|m| matches!(m, ServerToClientMessage::GameReset)));
        assert!(
            !messages
                .iter()
                .any(|m| matches!(m, ServerToClientMessage::GameEnded { .. }))
        );
    }

    #[tokio::test]
    async fn play_again_needs_an_ended_game_and_reannounces_config() {
        let (mut game, mut host) = new_room("p1").await;
        let _p2 = join(&mut game, "p2").await;
        host.drain();
        send_as(&mut game, "p1", ClientToServerMessage::PlayAgain).await;
        assert!(has_error(&host.drain()));

        game.phase = Phase::Ended;
        send_as(&mut game, "p1", ClientToServerMessage::PlayAgain).await;
        assert_eq!(game.phase, Phase::Lobby);
        let messages = host.drain();
        assert!(messages.iter().any(|m| matches!(m, ServerToClientMessage::GameReset)));
        assert!(messages.iter().any(|m| matches!(m, ServerToClientMessage::ModeChanged { .. })));
        assert!(
            messages
                .iter()
                .any(|m| matches!(m, ServerToClientMessage::CategorySelected { .. }))
        );
        assert!(
            messages
                .iter()
                .any(|m| matches!(m, ServerToClientMessage::ImpostorCountChanged { .. }))
        );
    }

    #[tokio::test]
    async fn next_round_prunes_turn_order_and_fails_once_decided() {
        let (mut game, mut host) = new_room("p1").await;
        let _p2 = join(&mut game, "p2").await;
        let _p3 = join(&mut game, "p3").await;
        let _p4 = join(&mut game, "p4").await;
        send_as(&mut game, "p1", ClientToServerMessage::StartGame).await;
        force_roles(&mut game, &["p2"]);
        send_as(&mut game, "p1", ClientToServerMessage::StartVoting).await;
        for voter in ["p1", "p2", "p4"] {
            send_as(&mut game, voter, ClientToServerMessage::SubmitVote {
                target: "p3".to_string(),
            })
            .await;
        }
        send_as(&mut game, "p1", ClientToServerMessage::EndVoting).await;
        assert_eq!(game.phase, Phase::Results);
        host.drain();

        send_as(&mut game, "p1", ClientToServerMessage::NextRound).await;
        assert_eq!(game.phase, Phase::Discussion);
        assert_eq!(game.turn_order.len(), 3);
        assert!(game.turn_order.iter().all(|t| t.identity != "p3"));

        // Force a decided position and confirm next-round refuses.
        game.phase = Phase::Results;
        for p in &mut game.players {
            if p.identity == "p4" {
                p.eliminated = true;
            }
        }
        host.drain();
        send_as(&mut game, "p1", ClientToServerMessage::NextRound).await;
        assert_eq!(game.phase, Phase::Results);
        assert!(has_error(&host.drain()));
    }

    #[tokio::test]
    async fn kicking_a_crew_member_can_hand_impostors_the_game() {
        let (mut game, mut host) = new_room("p1").await;
        let _p2 = join(&mut game, "p2").await;
        let mut p3 = join(&mut game, "p3").await;
        send_as(&mut game, "p1", ClientToServerMessage::StartGame).await;
        force_roles(&mut game, &["p2"]);
        host.drain();

        send_as(&mut game, "p1", ClientToServerMessage::KickPlayer {
            target: "p3".to_string(),
        })
        .await;
        assert!(p3.drain().iter().any(|m| matches!(m, ServerToClientMessage::Kicked { .. })));
        assert_eq!(game.players.len(), 2);
        // One impostor vs one crew is parity: impostors win.
        assert_eq!(game.phase, Phase::Ended);
        assert!(host.drain().iter().any(|m| matches!(
            m,
            ServerToClientMessage::GameEnded { winner: Winner::Impostor, .. }
        )));
    }

    #[tokio::test]
    async fn host_cannot_kick_themselves_and_lobby_kicks_skip_win_checks() {
        let (mut game, mut host) = new_room("p1").await;
        let _p2 = join(&mut game, "p2").await;
        host.drain();

        send_as(&mut game, "p1", ClientToServerMessage::KickPlayer {
            target: "p1".to_string(),
        })
        .await;
        assert!(has_error(&host.drain()));
        assert_eq!(game.players.len(), 2);

        send_as(&mut game, "p1", ClientToServerMessage::KickPlayer {
            target: "p2".to_string(),
        })
        .await;
        assert_eq!(game.players.len(), 1);
        assert_eq!(game.phase, Phase::Lobby);
    }

    #[tokio::test]
    async fn reconnect_restores_phase_role_word_and_elimination() {
        let (mut game, _host) = new_room("p1").await;
        let _p2 = join(&mut game, "p2").await;
        let _p3 = join(&mut game, "p3").await;
        send_as(&mut game, "p1", ClientToServerMessage::StartGame).await;
        force_roles(&mut game, &["p2"]);
        game.secret_word = Some("Falcon".to_string());

        // Crew member p3 drops and comes back.
        let (tx, mut rx) = mpsc::channel(256);
        game.connect(Uuid::new_v4(), ConnectIntent::Reconnect { identity: "p3".to_string() }, tx)
            .await
            .unwrap();
        let raw = rx.try_recv().unwrap();
        let ws::Message::Text(text) = raw else { panic!("expected text frame") };
        let msg: ServerToClientMessage = serde_json::from_str(text.as_str()).unwrap();
        let ServerToClientMessage::ReconnectSuccess { snapshot } = msg else {
            panic!("expected ReconnectSuccess, got {msg:?}");
        };
        assert_eq!(snapshot.phase, Phase::Discussion);
        assert_eq!(snapshot.role, Some(Role::Crew));
        assert_eq!(snapshot.word.as_deref(), Some("Falcon"));
        assert!(!snapshot.eliminated);
        assert!(!snapshot.is_host);
        assert_eq!(snapshot.turn_order.len(), 3);
        assert!(!snapshot.pending_guess);

        // The impostor's snapshot must not contain the word.
        let (tx, mut rx) = mpsc::channel(256);
        game.connect(Uuid::new_v4(), ConnectIntent::Reconnect { identity: "p2".to_string() }, tx)
            .await
            .unwrap();
        let ws::Message::Text(text) = rx.try_recv().unwrap() else { panic!() };
        let ServerToClientMessage::ReconnectSuccess { snapshot } =
            serde_json::from_str(text.as_str()).unwrap()
        else {
            panic!("expected ReconnectSuccess");
        };
        assert_eq!(snapshot.role, Some(Role::Impostor));
        assert!(snapshot.word.is_none());
    }

    #[tokio::test]
    async fn reconnect_rejects_strangers() {
        let (mut game, _host) = new_room("p1").await;
        let (tx, _rx) = mpsc::channel(256);
        let result = game
            .connect(Uuid::new_v4(), ConnectIntent::Reconnect { identity: "ghost".to_string() }, tx)
            .await;
        assert_eq!(result, Err(GameError::NotFound));
    }

    #[tokio::test]
    async fn superseded_connections_are_deaf_and_mute() {
        let (mut game, host) = new_room("p1").await;
        let _p2 = join(&mut game, "p2").await;

        // Host opens a second connection; the first one is superseded.
        let (tx, _rx) = mpsc::channel(256);
        game.connect(Uuid::new_v4(), ConnectIntent::Reconnect { identity: "p1".to_string() }, tx)
            .await
            .unwrap();

        // Events from the old socket are discarded...
        game.handle_event(host.conn_id, "p1", ClientToServerMessage::StartGame).await;
        assert_eq!(game.phase, Phase::Lobby);

        // ...and so is its eventual disconnect: p1 stays a member.
        game.handle_disconnect(host.conn_id).await;
        assert_eq!(game.players.len(), 2);
        assert!(game.connections.contains_key("p1"));
    }

    #[tokio::test]
    async fn lobby_disconnect_removes_player_and_migrates_host() {
        let (mut game, host) = new_room("p1").await;
        let mut p2 = join(&mut game, "p2").await;
        let p3 = join(&mut game, "p3").await;
        p2.drain();

        assert_eq!(game.handle_disconnect(host.conn_id).await, EventOutcome::Handled);
        assert_eq!(game.players.len(), 2);
        assert_eq!(game.host, "p2");
        assert!(game.players[0].is_host);
        assert!(p2.drain().iter().any(|m| matches!(
            m,
            ServerToClientMessage::PlayerList { players }
                if players.first().is_some_and(|p| p.is_host && p.identity == "p2")
        )));

        game.handle_disconnect(p2.conn_id).await;
        assert_eq!(game.handle_disconnect(p3.conn_id).await, EventOutcome::CloseRoom);
        assert!(game.players.is_empty());
    }

    #[tokio::test]
    async fn mid_game_disconnect_keeps_membership() {
        let (mut game, _host) = new_room("p1").await;
        let _p2 = join(&mut game, "p2").await;
        let p3 = join(&mut game, "p3").await;
        send_as(&mut game, "p1", ClientToServerMessage::StartGame).await;
        force_roles(&mut game, &["p2"]);

        game.handle_disconnect(p3.conn_id).await;
        assert_eq!(game.players.len(), 3);
        assert!(!game.connections.contains_key("p3"));
    }

    #[tokio::test]
    async fn custom_word_mode_round_trip() {
        let (mut game, mut host) = new_room("p1").await;
        let _p2 = join(&mut game, "p2").await;
        send_as(&mut game, "p1", ClientToServerMessage::SelectMode {
            mode: WordMode::Custom,
        })
        .await;
        host.drain();

        // Too few words: recorded, flagged invalid, game cannot start.
        send_as(&mut game, "p1", ClientToServerMessage::SubmitCustomWords {
            text: "alpha, beta".to_string(),
        })
        .await;
        assert!(host.drain().iter().any(|m| matches!(
            m,
            ServerToClientMessage::CustomWordsUpdated { count: 2, valid: false, .. }
        )));
        send_as(&mut game, "p1", ClientToServerMessage::StartGame).await;
        assert_eq!(game.phase, Phase::Lobby);
        host.drain();

        send_as(&mut game, "p1", ClientToServerMessage::SubmitCustomWords {
            text: "alpha, beta, gamma, delta, epsilon".to_string(),
        })
        .await;
        send_as(&mut game, "p1", ClientToServerMessage::StartGame).await;
        assert_eq!(game.phase, Phase::Discussion);
        let messages = host.drain();
        let role_msg = messages
            .iter()
            .find(|m| matches!(m, ServerToClientMessage::RoleAssigned { .. }))
            .unwrap();
        if let ServerToClientMessage::RoleAssigned { category, .. } = role_msg {
            assert_eq!(category, "Custom");
        }
        assert!(
            ["alpha", "beta", "gamma", "delta", "epsilon"]
                .contains(&game.secret_word.as_deref().unwrap())
        );
    }

    #[tokio::test]
    async fn join_rules_enforced_in_lobby_only() {
        let (mut game, _host) = new_room("p1").await;
        let _p2 = join(&mut game, "p2").await;

        let (tx, _rx) = mpsc::channel(256);
        let result = game
            .connect(
                Uuid::new_v4(),
                ConnectIntent::Join { identity: "p2".to_string(), name: "Dup".to_string() },
                tx,
            )
            .await;
        assert_eq!(result, Err(GameError::AlreadyJoined));

        send_as(&mut game, "p1", ClientToServerMessage::StartGame).await;
        let (tx, _rx) = mpsc::channel(256);
        let result = game
            .connect(
                Uuid::new_v4(),
                ConnectIntent::Join { identity: "p9".to_string(), name: "Late".to_string() },
                tx,
            )
            .await;
        assert_eq!(result, Err(GameError::NotLobby));
    }
}
