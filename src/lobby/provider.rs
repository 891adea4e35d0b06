//! Mode provider traits and implementations
//!
//! This module defines the per-mode rules the registry and the match
//! pipeline read: capacity, slot pool size, veto map pool and stake range.

use crate::error::{MatchmakingError, Result};
use crate::types::GameMode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::RangeInclusive;

/// Map pool used by the duel mode
pub const DUEL_MAP_POOL: [&str; 7] = [
    "Temple", "Yard", "Bridge", "Pool", "Desert", "Pipeline", "Cableway",
];

/// Map pool used by team and clan modes
pub const TEAM_MAP_POOL: [&str; 7] = [
    "Sandstone", "Province", "Breeze", "Dune", "Zone 7", "Rust", "Hanami",
];

/// Configuration for a specific game mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeConfiguration {
    pub mode: GameMode,
    /// Players needed to fill a slot (clan mode: two pairs)
    pub capacity: usize,
    /// Number of slots offered, indexed from 1
    pub slot_count: usize,
    /// Ordered veto pool
    pub map_pool: Vec<String>,
    /// Lowest stake that may be drawn
    pub stake_min: i64,
    /// Highest stake that may be drawn
    pub stake_max: i64,
}

impl ModeConfiguration {
    /// 1x1: two players, duel map pool
    pub fn duel() -> Self {
        Self {
            mode: GameMode::Duel,
            capacity: 2,
            slot_count: 10,
            map_pool: DUEL_MAP_POOL.iter().map(|m| m.to_string()).collect(),
            stake_min: 5,
            stake_max: 15,
        }
    }

    /// 2x2: four players drafted by two captains
    pub fn duo() -> Self {
        Self {
            mode: GameMode::Duo,
            capacity: 4,
            slot_count: 10,
            map_pool: TEAM_MAP_POOL.iter().map(|m| m.to_string()).collect(),
            stake_min: 20,
            stake_max: 30,
        }
    }

    /// 5x5: ten players drafted by two captains
    pub fn squad() -> Self {
        Self {
            mode: GameMode::Squad,
            capacity: 10,
            slot_count: 10,
            map_pool: TEAM_MAP_POOL.iter().map(|m| m.to_string()).collect(),
            stake_min: 25,
            stake_max: 35,
        }
    }

    /// 2x2 clan: two clan pairs with fixed teams
    pub fn clan_duo() -> Self {
        Self {
            mode: GameMode::ClanDuo,
            capacity: 4,
            slot_count: 10,
            map_pool: TEAM_MAP_POOL.iter().map(|m| m.to_string()).collect(),
            stake_min: 25,
            stake_max: 35,
        }
    }

    /// Default configuration for a mode
    pub fn for_mode(mode: GameMode) -> Self {
        match mode {
            GameMode::Duel => Self::duel(),
            GameMode::Duo => Self::duo(),
            GameMode::Squad => Self::squad(),
            GameMode::ClanDuo => Self::clan_duo(),
        }
    }

    /// Stake range as an inclusive range
    pub fn stake_range(&self) -> RangeInclusive<i64> {
        self.stake_min..=self.stake_max
    }

    /// Players per side
    pub fn team_size(&self) -> usize {
        self.capacity / 2
    }
}

/// Trait for providing mode configurations
pub trait ModeProvider: Send + Sync {
    /// Get configuration for a specific mode
    fn get_mode_config(&self, mode: GameMode) -> Result<ModeConfiguration>;

    /// Get all modes offered
    fn available_modes(&self) -> Vec<GameMode>;

    /// Validate a mode configuration
    fn validate_config(&self, config: &ModeConfiguration) -> Result<()>;
}

/// Static mode provider holding one configuration per mode
#[derive(Debug, Clone)]
pub struct StaticModeProvider {
    configs: HashMap<GameMode, ModeConfiguration>,
}

impl StaticModeProvider {
    /// Create a provider with the default configuration of every mode
    pub fn new() -> Self {
        let configs = GameMode::ALL
            .iter()
            .map(|mode| (*mode, ModeConfiguration::for_mode(*mode)))
            .collect();
        Self { configs }
    }

    /// Create with custom configurations, falling back to defaults for missing modes
    pub fn with_configs(configs: Vec<ModeConfiguration>) -> Result<Self> {
        let mut provider = Self::new();
        for config in configs {
            provider.update_config(config)?;
        }
        Ok(provider)
    }

    /// Replace the configuration of one mode
    pub fn update_config(&mut self, config: ModeConfiguration) -> Result<()> {
        self.validate_config(&config)?;
        self.configs.insert(config.mode, config);
        Ok(())
    }
}

impl Default for StaticModeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeProvider for StaticModeProvider {
    fn get_mode_config(&self, mode: GameMode) -> Result<ModeConfiguration> {
        self.configs.get(&mode).cloned().ok_or_else(|| {
            MatchmakingError::ConfigurationError {
                message: format!("No configuration for mode {}", mode),
            }
            .into()
        })
    }

    fn available_modes(&self) -> Vec<GameMode> {
        let mut modes: Vec<GameMode> = self.configs.keys().copied().collect();
        modes.sort();
        modes
    }

    fn validate_config(&self, config: &ModeConfiguration) -> Result<()> {
        if config.capacity < 2 || config.capacity % 2 != 0 {
            return Err(MatchmakingError::ConfigurationError {
                message: format!("Mode {} needs an even capacity of at least 2", config.mode),
            }
            .into());
        }

        if config.mode == GameMode::Duel && config.capacity != 2 {
            return Err(MatchmakingError::ConfigurationError {
                message: "Duel mode must hold exactly 2 players".to_string(),
            }
            .into());
        }

        if config.mode.is_clan() && config.capacity != 4 {
            return Err(MatchmakingError::ConfigurationError {
                message: "Clan mode must hold exactly two pairs".to_string(),
            }
            .into());
        }

        if config.slot_count == 0 {
            return Err(MatchmakingError::ConfigurationError {
                message: format!("Mode {} needs at least one slot", config.mode),
            }
            .into());
        }

        if config.map_pool.len() < 2 {
            return Err(MatchmakingError::ConfigurationError {
                message: format!("Mode {} needs at least two maps to veto", config.mode),
            }
            .into());
        }

        let mut seen = std::collections::HashSet::new();
        if !config.map_pool.iter().all(|map| seen.insert(map)) {
            return Err(MatchmakingError::ConfigurationError {
                message: format!("Mode {} has duplicate maps in its pool", config.mode),
            }
            .into());
        }

        if config.stake_min <= 0 || config.stake_min > config.stake_max {
            return Err(MatchmakingError::ConfigurationError {
                message: format!("Mode {} has an invalid stake range", config.mode),
            }
            .into());
        }

        Ok(())
    }
}
