use serde::{Deserialize, Serialize};

use crate::game::tally::VoteCount;
use crate::game::{Identity, Phase, Player, Role, TurnEntry, Winner, WordMode};

/// Messages sent from a game client (WebSocket) to the server.
///
/// Exactly one of `CreateSession`, `JoinSession` or `Reconnect` must be
/// the first frame on a fresh connection; it establishes the
/// (identity, room) binding every later message is dispatched under.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "messageType", content = "payload")]
pub enum ClientToServerMessage {
    CreateSession { identity: Identity, name: String },
    JoinSession { code: String, identity: Identity, name: String },
    Reconnect { identity: Identity, code: String, name: String },
    /// Explicitly leave the room and close the connection.
    LeaveSession,
    StartGame,
    SelectMode { mode: WordMode },
    SelectCategory { name: String },
    SubmitCustomWords { text: String },
    SetImpostorCount { count: usize },
    StartVoting,
    SubmitVote { target: Identity },
    EndVoting,
    SubmitWordGuess { text: String },
    NextRound,
    EndRound,
    PlayAgain,
    KickPlayer { target: Identity },
}

impl ClientToServerMessage {
    /// Stable per-variant key for the per-connection rate limiter.
    pub fn kind(&self) -> &'static str {
        use ClientToServerMessage::*;
        match self {
            CreateSession { .. } => "create-session",
            JoinSession { .. } => "join-session",
            Reconnect { .. } => "reconnect",
            LeaveSession => "leave-session",
            StartGame => "start-game",
            SelectMode { .. } => "select-mode",
            SelectCategory { .. } => "select-category",
            SubmitCustomWords { .. } => "submit-custom-words",
            SetImpostorCount { .. } => "set-impostor-count",
            StartVoting => "start-voting",
            SubmitVote { .. } => "submit-vote",
            EndVoting => "end-voting",
            SubmitWordGuess { .. } => "submit-word-guess",
            NextRound => "next-round",
            EndRound => "end-round",
            PlayAgain => "play-again",
            KickPlayer { .. } => "kick-player",
        }
    }

    /// True for the handshake variants that may open a connection.
    pub fn is_handshake(&self) -> bool {
        matches!(
            self,
            ClientToServerMessage::CreateSession { .. }
                | ClientToServerMessage::JoinSession { .. }
                | ClientToServerMessage::Reconnect { .. }
        )
    }
}

/// State a returning client needs to resume without replay.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SessionSnapshot {
    pub code: String,
    pub phase: Phase,
    pub is_host: bool,
    pub role: Option<Role>,
    /// Present iff the reconnecting player is crew in an active game.
    pub word: Option<String>,
    pub eliminated: bool,
    pub turn_order: Vec<TurnEntry>,
    pub pending_guess: bool,
    pub mode: WordMode,
    pub impostor_count: usize,
    pub category: String,
    pub custom_word_count: usize,
    pub players: Vec<Player>,
}

/// Messages sent from the server to game clients.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "messageType", content = "payload")]
pub enum ServerToClientMessage {
    SessionCreated {
        code: String,
        players: Vec<Player>,
        mode: WordMode,
        category: String,
        impostor_count: usize,
    },
    SessionJoined {
        code: String,
        players: Vec<Player>,
        mode: WordMode,
        category: String,
        impostor_count: usize,
    },
    PlayerList { players: Vec<Player> },
    PhaseChanged { phase: Phase },
    ModeChanged { mode: WordMode },
    CategorySelected { name: String },
    CustomWordsUpdated {
        count: usize,
        valid: bool,
        preview: Vec<String>,
    },
    ImpostorCountChanged { count: usize },
    /// Private. Crew receive the secret word, impostors only the category.
    RoleAssigned {
        role: Role,
        category: String,
        word: Option<String>,
    },
    TurnOrder { order: Vec<TurnEntry> },
    VoteUpdate { submitted: usize, total: usize },
    VoteResults {
        counts: Vec<VoteCount>,
        eliminated: Option<Player>,
        tie: bool,
        no_votes: bool,
    },
    /// Private prompt to the eliminated impostor.
    ImpostorGuessPrompt { seconds: u64 },
    /// Everyone else learns who is guessing and for how long.
    ImpostorGuessing { name: String, seconds: u64 },
    ImpostorGuessResult { correct: bool },
    GameEnded { winner: Winner, reason: String },
    GameReset,
    Kicked { reason: String },
    JoinError { message: String },
    GameError { message: String },
    ReconnectSuccess { snapshot: SessionSnapshot },
    ReconnectFailed { message: String },
}

impl ServerToClientMessage {
    pub fn to_ws_text(&self) -> Result<axum::extract::ws::Message, serde_json::Error> {
        serde_json::to_string(self)
            .map(|json_string| axum::extract::ws::Message::Text(json_string.into()))
    }
}

pub fn client_message_from_ws_text(text: &str) -> Result<ClientToServerMessage, serde_json::Error> {
    serde_json::from_str(text)
}
