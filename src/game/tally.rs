use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::game::{Identity, Player, Role, Winner};

/// Per-player vote count as broadcast in the results message.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VoteCount {
    pub identity: Identity,
    pub name: String,
    pub votes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteOutcome {
    /// Nobody voted; nobody is eliminated.
    NoVotes,
    /// Two or more players share the maximum; nobody is eliminated.
    Tie,
    Eliminated(Identity),
}

#[derive(Debug, Clone)]
pub struct TallyResult {
    pub counts: Vec<VoteCount>,
    pub outcome: VoteOutcome,
}

/// Computes the plurality outcome of a ballot map.
///
/// Counts are produced for every non-eliminated player, in player-list
/// order. Ballots from eliminated voters or pointing at eliminated or
/// unknown targets are ignored defensively; the ballot map is supposed to
/// never contain them.
pub fn tally(players: &[Player], ballots: &HashMap<Identity, Identity>) -> TallyResult {
    let mut counts: Vec<VoteCount> = players
        .iter()
        .filter(|p| !p.eliminated)
        .map(|p| VoteCount { identity: p.identity.clone(), name: p.name.clone(), votes: 0 })
        .collect();

    let living_voter = |identity: &Identity| {
        players
            .iter()
            .any(|p| !p.eliminated && p.identity == *identity)
    };

    for (voter, target) in ballots {
        if !living_voter(voter) {
            continue;
        }
        if let Some(entry) = counts.iter_mut().find(|c| c.identity == *target) {
            entry.votes += 1;
        }
    }

    let max = counts.iter().map(|c| c.votes).max().unwrap_or(0);
    let at_max: Vec<&VoteCount> = counts.iter().filter(|c| c.votes == max).collect();
    let outcome = if max == 0 {
        VoteOutcome::NoVotes
    } else if at_max.len() > 1 {
        VoteOutcome::Tie
    } else {
        VoteOutcome::Eliminated(at_max[0].identity.clone())
    };

    TallyResult { counts, outcome }
}

/// Win-condition evaluator over the non-eliminated players.
///
/// Zero living impostors is a crew win. Living impostors reaching the
/// living crew count is an impostor win: parity is enough, the check is
/// `>=` on purpose. Anything else means the game continues.
pub fn decide_winner(players: &[Player], roles: &HashMap<Identity, Role>) -> Option<Winner> {
    let mut impostors = 0usize;
    let mut crew = 0usize;
    for p in players.iter().filter(|p| !p.eliminated) {
        match roles.get(&p.identity) {
            Some(Role::Impostor) => impostors += 1,
            Some(Role::Crew) => crew += 1,
            None => {}
        }
    }
    if impostors == 0 {
        Some(Winner::Crew)
    } else if impostors >= crew {
        Some(Winner::Impostor)
    } else {
        None
    }
}
