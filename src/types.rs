//! Common types used throughout the matchmaking engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for players
pub type PlayerId = String;

/// Unique identifier for clans
pub type ClanId = u64;

/// Unique identifier for matches, shared by pending and active phases
pub type MatchId = u64;

/// Starting rating for new players and clans
pub const DEFAULT_RATING: i64 = 1000;

/// Game modes offered by the lobby registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GameMode {
    #[serde(rename = "1x1")]
    Duel,
    #[serde(rename = "2x2")]
    Duo,
    #[serde(rename = "5x5")]
    Squad,
    #[serde(rename = "2x2_clan")]
    ClanDuo,
}

impl GameMode {
    /// Every mode, in display order
    pub const ALL: [GameMode; 4] = [
        GameMode::Duel,
        GameMode::Duo,
        GameMode::Squad,
        GameMode::ClanDuo,
    ];

    /// Clan modes fill by clan pair instead of by individual
    pub fn is_clan(&self) -> bool {
        matches!(self, GameMode::ClanDuo)
    }

    /// Team modes go through captain selection and the draft
    pub fn is_drafted(&self) -> bool {
        matches!(self, GameMode::Duo | GameMode::Squad)
    }
}

impl std::fmt::Display for GameMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GameMode::Duel => write!(f, "1x1"),
            GameMode::Duo => write!(f, "2x2"),
            GameMode::Squad => write!(f, "5x5"),
            GameMode::ClanDuo => write!(f, "2x2_clan"),
        }
    }
}

/// One of the two sides of a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    A,
    B,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::A => write!(f, "A"),
            Side::B => write!(f, "B"),
        }
    }
}

/// Ban state of a player account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "until", rename_all = "lowercase")]
pub enum BanState {
    #[default]
    None,
    Until(DateTime<Utc>),
    Permanent,
}

impl BanState {
    /// Whether the ban still blocks the player at `now`
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        match self {
            BanState::None => false,
            BanState::Until(until) => *until > now,
            BanState::Permanent => true,
        }
    }
}

/// Player account as seen by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub display_name: String,
    pub rating: i64,
    pub level: u8,
    pub matches: u32,
    pub wins: u32,
    pub losses: u32,
    pub warnings: u32,
    pub ban: BanState,
    pub vip_until: Option<DateTime<Utc>>,
    pub clan_id: Option<ClanId>,
}

impl Player {
    pub fn new(id: impl Into<PlayerId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            rating: DEFAULT_RATING,
            level: crate::roster::level_for_rating(DEFAULT_RATING),
            matches: 0,
            wins: 0,
            losses: 0,
            warnings: 0,
            ban: BanState::None,
            vip_until: None,
            clan_id: None,
        }
    }

    pub fn is_vip_at(&self, now: DateTime<Utc>) -> bool {
        self.vip_until.is_some_and(|until| until > now)
    }
}

/// Clan account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clan {
    pub id: ClanId,
    pub name: String,
    pub members: Vec<PlayerId>,
    pub rating: i64,
    pub matches: u32,
    pub wins: u32,
    pub losses: u32,
    pub experience: i64,
    pub level: u32,
}

impl Clan {
    pub fn new(id: ClanId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            members: Vec::new(),
            rating: DEFAULT_RATING,
            matches: 0,
            wins: 0,
            losses: 0,
            experience: 0,
            level: 1,
        }
    }
}

/// Lifecycle status of a match record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Pending,
    Active,
    Disputed,
    Finished,
    Cancelled,
}

impl MatchStatus {
    /// Finished and cancelled matches accept no further actions
    pub fn is_closed(&self) -> bool {
        matches!(self, MatchStatus::Finished | MatchStatus::Cancelled)
    }
}

impl std::fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            MatchStatus::Pending => "pending",
            MatchStatus::Active => "active",
            MatchStatus::Disputed => "disputed",
            MatchStatus::Finished => "finished",
            MatchStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", label)
    }
}

/// Phase a match is in; part of every timer fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    Confirmation,
    SideChoice,
    Pick,
    Ban,
    Finished,
}

impl std::fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            PhaseKind::Confirmation => "confirmation",
            PhaseKind::SideChoice => "side_choice",
            PhaseKind::Pick => "pick",
            PhaseKind::Ban => "ban",
            PhaseKind::Finished => "finished",
        };
        write!(f, "{}", label)
    }
}

/// Player action inside a match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MatchAction {
    Accept,
    ChooseSide { side: Side },
    Pick { player_id: PlayerId },
    Ban { map: String },
}

impl std::fmt::Display for MatchAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchAction::Accept => write!(f, "accept"),
            MatchAction::ChooseSide { side } => write!(f, "choose_side:{}", side),
            MatchAction::Pick { player_id } => write!(f, "pick:{}", player_id),
            MatchAction::Ban { map } => write!(f, "ban:{}", map),
        }
    }
}

/// Administrator command answering a submitted result or overriding a match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdminCommand {
    DecideWinner { match_id: MatchId, winner: Side },
    Cancel { match_id: MatchId, reason: String },
    Annul { match_id: MatchId, player_id: PlayerId },
    AdjustRating { player_id: PlayerId, delta: i64 },
}

impl std::fmt::Display for AdminCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdminCommand::DecideWinner { match_id, winner } => {
                write!(f, "decide_winner:{}:{}", match_id, winner)
            }
            AdminCommand::Cancel { match_id, .. } => write!(f, "cancel:{}", match_id),
            AdminCommand::Annul {
                match_id,
                player_id,
            } => write!(f, "annul:{}:{}", match_id, player_id),
            AdminCommand::AdjustRating { player_id, delta } => {
                write!(f, "adjust_rating:{}:{:+}", player_id, delta)
            }
        }
    }
}

/// Where a clan invite leads once accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InviteTarget {
    Slot { slot: usize },
    ClanQueue,
}

/// Result evidence submitted by a participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEvidence {
    pub submitted_by: PlayerId,
    /// Opaque reference to the uploaded proof, e.g. a screenshot id
    pub attachment: String,
    pub note: Option<String>,
}

/// Content of an outbound prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PromptContent {
    SlotJoined {
        mode: GameMode,
        slot: usize,
        occupancy: usize,
        capacity: usize,
    },
    LeftSlot {
        mode: GameMode,
        slot: usize,
    },
    ConfirmMatch {
        mode: GameMode,
        roster: Vec<PlayerId>,
        timeout_secs: u64,
    },
    ConfirmationProgress {
        accepted: usize,
        total: usize,
    },
    ChooseSide {
        timeout_secs: u64,
    },
    PickPlayer {
        available: Vec<PlayerId>,
        timeout_secs: u64,
    },
    BanMap {
        remaining: Vec<String>,
        timeout_secs: u64,
    },
    WaitingForTurn {
        turn_holder: PlayerId,
        phase: PhaseKind,
    },
    TurnTaken {
        by: PlayerId,
        action: MatchAction,
        automatic: bool,
    },
    MatchReady {
        mode: GameMode,
        side_a: Vec<PlayerId>,
        side_b: Vec<PlayerId>,
        map: String,
        stake: i64,
    },
    Rejected {
        reason: String,
    },
    Warning {
        warnings: u32,
        threshold: u32,
    },
    Banned {
        until: DateTime<Utc>,
    },
    Requeued {
        mode: GameMode,
        slot: usize,
    },
    NoFreeSlot {
        mode: GameMode,
    },
    MatchCancelled {
        reason: String,
    },
    ClanInvite {
        inviter: PlayerId,
        target: InviteTarget,
    },
    InviteDeclined {
        invitee: PlayerId,
    },
    ClanQueued {
        waiting: usize,
    },
    ClanQueueWithdrawn,
    ResultSubmitted {
        evidence: ResultEvidence,
    },
    Settled {
        winner: Side,
        delta: i64,
        new_rating: i64,
        level: u8,
    },
    Annulled,
    RatingAdjusted {
        delta: i64,
        new_rating: i64,
        level: u8,
    },
    InviteExpired {
        inviter: PlayerId,
        invitee: PlayerId,
    },
    AdminApplied {
        command: AdminCommand,
    },
}

/// Outbound prompt for a single recipient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub player_id: PlayerId,
    pub match_id: Option<MatchId>,
    pub content: PromptContent,
    /// Actions the recipient may answer with
    pub actions: Vec<MatchAction>,
    /// Commands offered to administrators
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub admin_actions: Vec<AdminCommand>,
}

impl Prompt {
    pub fn new(player_id: impl Into<PlayerId>, content: PromptContent) -> Self {
        Self {
            player_id: player_id.into(),
            match_id: None,
            content,
            actions: Vec::new(),
            admin_actions: Vec::new(),
        }
    }

    pub fn for_match(mut self, match_id: MatchId) -> Self {
        self.match_id = Some(match_id);
        self
    }

    pub fn with_actions(mut self, actions: Vec<MatchAction>) -> Self {
        self.actions = actions;
        self
    }

    pub fn with_admin_actions(mut self, commands: Vec<AdminCommand>) -> Self {
        self.admin_actions = commands;
        self
    }
}

/// Inbound request decoded from the messaging gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayRequest {
    Join {
        player_id: PlayerId,
        mode: GameMode,
        slot: usize,
    },
    Leave {
        player_id: PlayerId,
        mode: GameMode,
        slot: usize,
    },
    InviteClanmate {
        inviter: PlayerId,
        invitee: PlayerId,
        target: InviteTarget,
    },
    RespondInvite {
        invitee: PlayerId,
        inviter: PlayerId,
        accept: bool,
    },
    WithdrawClanQueue {
        player_id: PlayerId,
    },
    Action {
        player_id: PlayerId,
        match_id: MatchId,
        action: MatchAction,
    },
    SubmitResult {
        match_id: MatchId,
        evidence: ResultEvidence,
    },
    Admin {
        admin_id: PlayerId,
        command: AdminCommand,
    },
}

impl GatewayRequest {
    /// Player the request originates from
    pub fn player_id(&self) -> &str {
        match self {
            GatewayRequest::Join { player_id, .. }
            | GatewayRequest::Leave { player_id, .. }
            | GatewayRequest::WithdrawClanQueue { player_id }
            | GatewayRequest::Action { player_id, .. } => player_id,
            GatewayRequest::InviteClanmate { inviter, .. } => inviter,
            GatewayRequest::RespondInvite { invitee, .. } => invitee,
            GatewayRequest::SubmitResult { evidence, .. } => &evidence.submitted_by,
            GatewayRequest::Admin { admin_id, .. } => admin_id,
        }
    }
}
