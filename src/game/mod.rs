use serde::{Deserialize, Serialize};

pub mod error;
pub mod guess;
pub mod messages;
pub mod roles;
pub mod session;
pub mod tally;

pub use error::GameError;
pub use messages::{ClientToServerMessage, ServerToClientMessage};
pub use session::ImpostorGame;

/// Opaque client-persisted token identifying a person across reconnects.
pub type Identity = String;

pub const MIN_PLAYERS: usize = 2;
pub const MAX_IMPOSTOR_COUNT: usize = 3;

/// Room lifecycle phases. The impostor guess window is not a phase of its
/// own; it overlays `Results` and resolves into `Ended`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Lobby,
    Discussion,
    Voting,
    Results,
    Ended,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Impostor,
    Crew,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WordMode {
    Preset,
    Custom,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Winner {
    Impostor,
    Crew,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub identity: Identity,
    pub name: String,
    pub is_host: bool,
    pub eliminated: bool,
}

/// One slot in the presentation turn order. Deliberately carries no role
/// information; it is shuffled independently of role assignment.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TurnEntry {
    pub identity: Identity,
    pub name: String,
}
