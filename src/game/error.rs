use thiserror::Error;

/// Everything a client action can fail with. None of these are fatal to
/// the process; they are reported privately to the requester and leave
/// room state untouched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GameError {
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("Only the host can do that")]
    NotHost,
    #[error("That action is not valid right now: {0}")]
    StateConflict(String),
    #[error("The server is at capacity, try again later")]
    Capacity,
    #[error("This room is full")]
    RoomFull,
    #[error("The game has already started")]
    NotLobby,
    #[error("You are already in this room")]
    AlreadyJoined,
    #[error("Could not allocate a room code")]
    CodeExhaustion,
    #[error("Room or player not found")]
    NotFound,
    #[error("The game has already been decided")]
    GameAlreadyDecided,
    #[error("Slow down")]
    RateLimited,
    #[error("Internal server error")]
    Internal,
}
