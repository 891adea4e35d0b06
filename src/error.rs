//! Error types for the matchmaking engine
//!
//! All fallible operations return [`Result`], an `anyhow` alias. Engine-level
//! failures are raised as [`MatchmakingError`] so callers can downcast and
//! react to the error class.

use crate::types::{GameMode, MatchId, PlayerId};

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// How a failure should be handled by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Rejected locally, no mutation, the user sees a rejection
    Validation,
    /// Stale timer or action on an advanced phase, silently dropped
    Race,
    /// Gateway failure for a single recipient
    Delivery,
    /// Store call failed, surfaced to the caller
    Persistence,
    /// Resource exhaustion or broken internal state
    Fatal,
}

/// Custom error types for specific matchmaking scenarios
#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    #[error("Player {player_id} is already in a lobby slot")]
    AlreadyInLobby { player_id: PlayerId },

    #[error("Player {player_id} is already in a match or queue")]
    AlreadyInMatch { player_id: PlayerId },

    #[error("Player {player_id} is banned")]
    PlayerBanned { player_id: PlayerId },

    #[error("Slot {slot} of mode {mode} is full")]
    SlotFull { mode: GameMode, slot: usize },

    #[error("Slot {slot} does not exist for mode {mode}")]
    InvalidSlot { mode: GameMode, slot: usize },

    #[error("Player {player_id} is not in slot {slot} of mode {mode}")]
    NotInSlot {
        player_id: PlayerId,
        mode: GameMode,
        slot: usize,
    },

    #[error("Player {player_id} is not a clan member")]
    NotInClan { player_id: PlayerId },

    #[error("Players {first} and {second} are not in the same clan")]
    NotClanmates { first: PlayerId, second: PlayerId },

    #[error("Clan {clan_id} already occupies slot {slot} of mode {mode}")]
    ClanAlreadyInSlot {
        clan_id: u64,
        mode: GameMode,
        slot: usize,
    },

    #[error("Mode {mode} requires a clan pair to join")]
    PairRequired { mode: GameMode },

    #[error("Mode {mode} does not accept clan pairs")]
    PairNotAllowed { mode: GameMode },

    #[error("No pending invite from {inviter} to {invitee}")]
    InviteNotFound { inviter: PlayerId, invitee: PlayerId },

    #[error("Clan {clan_id} is already queued")]
    ClanAlreadyQueued { clan_id: u64 },

    #[error("Clan {clan_id} is not queued")]
    ClanNotQueued { clan_id: u64 },

    #[error("No free slot left in mode {mode}")]
    NoFreeSlot { mode: GameMode },

    #[error("Match not found: {match_id}")]
    MatchNotFound { match_id: MatchId },

    #[error("Player {player_id} is not a participant of match {match_id}")]
    NotAParticipant { player_id: PlayerId, match_id: MatchId },

    #[error("Not your turn in match {match_id}")]
    NotYourTurn { match_id: MatchId },

    #[error("Action {action} is not valid in the current phase of match {match_id}")]
    InvalidAction { match_id: MatchId, action: String },

    #[error("Map {map} is not in the remaining pool of match {match_id}")]
    MapUnavailable { match_id: MatchId, map: String },

    #[error("Player {player_id} cannot be picked in match {match_id}")]
    PlayerUnavailable { player_id: PlayerId, match_id: MatchId },

    #[error("Match {match_id} is not ready for a result")]
    MatchNotReady { match_id: MatchId },

    #[error("Match {match_id} was already closed as {status}")]
    MatchClosed { match_id: MatchId, status: String },

    #[error("Match {match_id} is already being settled for the other side")]
    ConflictingWinner { match_id: MatchId },

    #[error("Stale timer for match {match_id}")]
    StaleTimer { match_id: MatchId },

    #[error("Phase already advanced in match {match_id}")]
    PhaseAdvanced { match_id: MatchId },

    #[error("Delivery to {player_id} failed: {reason}")]
    DeliveryFailed { player_id: PlayerId, reason: String },

    #[error("Persistence failed: {reason}")]
    PersistenceFailed { reason: String },

    #[error("Player {player_id} is not an administrator")]
    NotAnAdministrator { player_id: PlayerId },

    #[error("Invite from {inviter} to {invitee} has expired")]
    InviteExpired { inviter: PlayerId, invitee: PlayerId },

    #[error("Player not found: {player_id}")]
    PlayerNotFound { player_id: PlayerId },

    #[error("Clan not found: {clan_id}")]
    ClanNotFound { clan_id: u64 },

    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("AMQP connection failed: {message}")]
    AmqpConnectionFailed { message: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl MatchmakingError {
    /// Classify the error for handling decisions
    pub fn class(&self) -> ErrorClass {
        match self {
            MatchmakingError::StaleTimer { .. } | MatchmakingError::PhaseAdvanced { .. } => {
                ErrorClass::Race
            }
            MatchmakingError::DeliveryFailed { .. }
            | MatchmakingError::AmqpConnectionFailed { .. } => ErrorClass::Delivery,
            MatchmakingError::PersistenceFailed { .. } => ErrorClass::Persistence,
            MatchmakingError::NoFreeSlot { .. }
            | MatchmakingError::ConfigurationError { .. }
            | MatchmakingError::InternalError { .. } => ErrorClass::Fatal,
            _ => ErrorClass::Validation,
        }
    }

    /// Short label used in metrics
    pub fn reason(&self) -> &'static str {
        match self {
            MatchmakingError::AlreadyInLobby { .. } => "already_in_lobby",
            MatchmakingError::AlreadyInMatch { .. } => "already_in_match",
            MatchmakingError::PlayerBanned { .. } => "banned",
            MatchmakingError::SlotFull { .. } => "slot_full",
            MatchmakingError::InvalidSlot { .. } => "invalid_slot",
            MatchmakingError::InvalidRequest { .. } => "invalid_request",
            MatchmakingError::MapUnavailable { .. } => "map_unavailable",
            MatchmakingError::PlayerUnavailable { .. } => "player_unavailable",
            MatchmakingError::NotYourTurn { .. } => "not_your_turn",
            MatchmakingError::NoFreeSlot { .. } => "no_free_slot",
            MatchmakingError::StaleTimer { .. } => "stale_timer",
            MatchmakingError::PhaseAdvanced { .. } => "phase_advanced",
            MatchmakingError::PersistenceFailed { .. } => "persistence",
            MatchmakingError::NotAnAdministrator { .. } => "not_admin",
            MatchmakingError::InviteExpired { .. } => "invite_expired",
            _ => "other",
        }
    }
}

/// Classify any error, treating foreign errors as fatal
pub fn classify(error: &anyhow::Error) -> ErrorClass {
    error
        .downcast_ref::<MatchmakingError>()
        .map(MatchmakingError::class)
        .unwrap_or(ErrorClass::Fatal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        let not_turn: anyhow::Error = MatchmakingError::NotYourTurn { match_id: 3 }.into();
        assert_eq!(classify(&not_turn), ErrorClass::Validation);

        let stale: anyhow::Error = MatchmakingError::StaleTimer { match_id: 3 }.into();
        assert_eq!(classify(&stale), ErrorClass::Race);

        let store: anyhow::Error = MatchmakingError::PersistenceFailed {
            reason: "disk".to_string(),
        }
        .into();
        assert_eq!(classify(&store), ErrorClass::Persistence);

        let exhausted: anyhow::Error = MatchmakingError::NoFreeSlot {
            mode: GameMode::Duel,
        }
        .into();
        assert_eq!(classify(&exhausted), ErrorClass::Fatal);

        assert_eq!(classify(&anyhow::anyhow!("boom")), ErrorClass::Fatal);
    }
}
