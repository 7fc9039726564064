//! Server tunables.
//!
//! Values come from an optional TOML file, then command-line overrides are
//! applied on top by `main`. All durations are expressed in ticks so that
//! timeouts stay tied to simulation progress rather than wall-clock time.

use crate::error::ServerError;
use serde::Deserialize;
use shared::{Tick, DAY_TICKS};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Simulation steps per second.
    pub tick_rate: u32,
    pub max_clients: usize,
    /// Company roles are numbered `0..max_companies`.
    pub max_companies: u8,
    pub server_name: String,
    pub game_password: Option<String>,
    /// Keyed by company index written as a string, as TOML keys must be.
    pub company_passwords: HashMap<String, String>,

    /// How far past the current tick peers may simulate.
    pub look_ahead_ticks: Tick,
    pub sync_interval_ticks: Tick,
    /// A catching-up peer within this many ticks of the server becomes active.
    pub active_tolerance_ticks: Tick,

    pub lag_warn_ticks: Tick,
    pub lag_kill_ticks: Tick,
    pub catch_up_kill_ticks: Tick,
    pub password_timeout_ticks: Tick,
    pub join_timeout_ticks: Tick,
    pub snapshot_timeout_ticks: Tick,

    pub snapshot_chunk_size: usize,
    pub initial_chunks_per_pump: usize,
    pub max_chunks_per_pump: usize,
    /// Packets a connection may have queued before its queue is full.
    pub outbound_capacity: usize,
    pub max_commands_per_tick: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3979,
            tick_rate: 30,
            max_clients: 16,
            max_companies: 15,
            server_name: "server".to_string(),
            game_password: None,
            company_passwords: HashMap::new(),
            look_ahead_ticks: 1,
            sync_interval_ticks: DAY_TICKS,
            active_tolerance_ticks: DAY_TICKS,
            lag_warn_ticks: DAY_TICKS,
            lag_kill_ticks: 3 * DAY_TICKS,
            catch_up_kill_ticks: 30 * DAY_TICKS,
            password_timeout_ticks: 30 * DAY_TICKS,
            join_timeout_ticks: 10 * DAY_TICKS,
            snapshot_timeout_ticks: 30 * DAY_TICKS,
            snapshot_chunk_size: 4096,
            initial_chunks_per_pump: 1,
            max_chunks_per_pump: 256,
            outbound_capacity: 1024,
            max_commands_per_tick: 16,
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: &Path) -> Result<Self, ServerError> {
        let text = std::fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn company_password(&self, company: u8) -> Option<&str> {
        self.company_passwords
            .get(&company.to_string())
            .map(String::as_str)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Rejects settings the tick loop cannot work with.
    pub fn validate(&self) -> Result<(), ServerError> {
        let invalid = |reason: &str| Err(ServerError::InvalidConfig(reason.to_string()));

        if self.tick_rate == 0 {
            return invalid("tick_rate must be positive");
        }
        if self.max_clients == 0 {
            return invalid("max_clients must be positive");
        }
        if self.sync_interval_ticks == 0 {
            return invalid("sync_interval_ticks must be positive");
        }
        if self.lag_warn_ticks >= self.lag_kill_ticks {
            return invalid("lag_warn_ticks must be below lag_kill_ticks");
        }
        if self.catch_up_kill_ticks < self.lag_kill_ticks {
            return invalid("catch_up_kill_ticks must not be below lag_kill_ticks");
        }
        if self.snapshot_chunk_size == 0 {
            return invalid("snapshot_chunk_size must be positive");
        }
        if self.initial_chunks_per_pump == 0
            || self.initial_chunks_per_pump > self.max_chunks_per_pump
        {
            return invalid("initial_chunks_per_pump must be within 1..=max_chunks_per_pump");
        }
        if self.outbound_capacity <= self.max_chunks_per_pump {
            return invalid("outbound_capacity must exceed max_chunks_per_pump");
        }
        for key in self.company_passwords.keys() {
            match key.parse::<u8>() {
                Ok(company) if company < self.max_companies => {}
                _ => return invalid("company password keys must be company indices"),
            }
        }
        Ok(())
    }
}
