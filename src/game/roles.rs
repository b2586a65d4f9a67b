use rand::seq::SliceRandom;
use rand::{Rng, thread_rng};
use std::collections::HashMap;

use crate::game::{GameError, Identity, Player, Role, TurnEntry};

/// Result of the lobby -> discussion assignment step.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub roles: HashMap<Identity, Role>,
    pub secret_word: String,
    pub turn_order: Vec<TurnEntry>,
}

/// Partitions `players` into impostors and crew and picks the secret word.
///
/// Two independent shuffles: one decides who the impostors are, the other
/// becomes the turn order, so turn position carries no information about
/// roles.
pub fn assign(
    players: &[Player],
    impostor_count: usize,
    words: &[String],
) -> Result<Assignment, GameError> {
    if impostor_count == 0 || impostor_count >= players.len() {
        return Err(GameError::Validation(format!(
            "{} impostors does not fit a room of {} players",
            impostor_count,
            players.len()
        )));
    }
    if words.is_empty() {
        return Err(GameError::Validation(
            "No words available in the active word source".to_string(),
        ));
    }

    let mut rng = thread_rng();

    let secret_word = words[rng.gen_range(0..words.len())].clone();

    let mut role_draw: Vec<&Player> = players.iter().collect();
    role_draw.shuffle(&mut rng);
    let roles = role_draw
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let role = if i < impostor_count { Role::Impostor } else { Role::Crew };
            (p.identity.clone(), role)
        })
        .collect();

    let mut turn_order: Vec<TurnEntry> = players
        .iter()
        .map(|p| TurnEntry { identity: p.identity.clone(), name: p.name.clone() })
        .collect();
    turn_order.shuffle(&mut rng);

    Ok(Assignment { roles, secret_word, turn_order })
}
