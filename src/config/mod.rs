//! Configuration management for the scrim-room service
//!
//! This module handles configuration loading from environment variables and
//! TOML files, validation, and default values for the matchmaking service.

pub mod app;

pub use app::{
    validate_config, validate_matchmaking, AmqpSettings, AppConfig, MatchmakingSettings,
    ServiceSettings,
};
