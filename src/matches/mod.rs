//! Match lifecycle
//!
//! Confirmation, captain and side selection, the draft, the map veto and
//! settlement planning. The types here are synchronous; the engine drives
//! them under each session's lock and owns the timers.

pub mod draft;
pub mod session;
pub mod settlement;
pub mod timer;
pub mod veto;

pub use draft::{assign_sides, pick_captains, DraftPick, DraftState, SideAssignment};
pub use session::{MatchSession, PendingMatch, Session, TurnEvent};
pub use settlement::{plan_settlement, vip_bonus, SettlementEntry, SettlementReport};
pub use timer::{TimerKey, TimerRegistry};
pub use veto::{BanOutcome, VetoState};
