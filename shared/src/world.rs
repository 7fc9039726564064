//! The simulation collaborator and a small deterministic reference world.
//!
//! The synchronization core never looks inside a world. It only asks it to
//! execute commands, advance one tick, produce a checksum and (de)serialize a
//! snapshot.

use crate::command::{Command, CommandCode, CommandSpec, CommandTable};
use crate::{Role, Tick};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorldError {
    #[error("snapshot encoding failed: {0}")]
    Encode(#[from] bincode::Error),
}

/// A deterministic simulation driven only by scheduled commands.
///
/// Two worlds restored from the same snapshot, fed the same commands at the
/// same ticks, must report the same checksum.
pub trait World: Sized {
    /// Applies one command. Called only at the command's scheduled tick.
    fn execute(&mut self, command: &Command);

    /// Advances the simulation by one tick, after that tick's commands ran.
    fn step(&mut self, tick: Tick);

    fn checksum(&self) -> u64;

    fn snapshot(&self) -> Result<Vec<u8>, WorldError>;

    fn restore(bytes: &[u8]) -> Result<Self, WorldError>;
}

pub const CMD_BUILD: CommandCode = CommandCode(1);
pub const CMD_DEMOLISH: CommandCode = CommandCode(2);
pub const CMD_TRANSFER_FUNDS: CommandCode = CommandCode(3);
pub const CMD_PAUSE: CommandCode = CommandCode(4);
pub const CMD_PLACE_SIGN: CommandCode = CommandCode(5);

const STARTING_FUNDS: i64 = 100_000;

/// Companies own tiles, earn income per owned tile each tick and can move
/// money between each other. Spectators may only place signs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerWorld {
    pub tick: Tick,
    pub paused: bool,
    pub funds: BTreeMap<u8, i64>,
    pub tiles: BTreeMap<u32, u8>,
    pub signs: BTreeMap<u32, String>,
    pub executed: u64,
    noise: u64,
}

impl LedgerWorld {
    pub fn new() -> Self {
        Self {
            noise: 0x9E37_79B9_7F4A_7C15,
            ..Self::default()
        }
    }

    /// Command codes this world understands.
    pub fn command_table() -> CommandTable {
        let mut table = CommandTable::new();
        table
            .register(
                CMD_BUILD,
                CommandSpec {
                    name: "build",
                    ..Default::default()
                },
            )
            .register(
                CMD_DEMOLISH,
                CommandSpec {
                    name: "demolish",
                    ..Default::default()
                },
            )
            .register(
                CMD_TRANSFER_FUNDS,
                CommandSpec {
                    name: "transfer-funds",
                    ..Default::default()
                },
            )
            .register(
                CMD_PAUSE,
                CommandSpec {
                    name: "pause",
                    server_only: true,
                    spectator_allowed: true,
                },
            )
            .register(
                CMD_PLACE_SIGN,
                CommandSpec {
                    name: "place-sign",
                    spectator_allowed: true,
                    ..Default::default()
                },
            );
        table
    }

    pub fn funds_of(&self, company: u8) -> i64 {
        self.funds.get(&company).copied().unwrap_or(STARTING_FUNDS)
    }

    fn funds_mut(&mut self, company: u8) -> &mut i64 {
        self.funds.entry(company).or_insert(STARTING_FUNDS)
    }
}

impl World for LedgerWorld {
    fn execute(&mut self, command: &Command) {
        self.executed += 1;
        let param = |i: usize| command.params.get(i).copied().unwrap_or(0);

        match (command.code, command.role) {
            (CMD_BUILD, Role::Company(company)) => {
                if !self.tiles.contains_key(&command.tile) {
                    self.tiles.insert(command.tile, company);
                    *self.funds_mut(company) -= i64::from(param(0));
                }
            }
            (CMD_DEMOLISH, Role::Company(company)) => {
                if self.tiles.get(&command.tile) == Some(&company) {
                    self.tiles.remove(&command.tile);
                }
            }
            (CMD_TRANSFER_FUNDS, Role::Company(company)) => {
                let amount = i64::from(param(0));
                let target = param(1) as u8;
                if target != company && self.funds_of(company) >= amount {
                    *self.funds_mut(company) -= amount;
                    *self.funds_mut(target) += amount;
                }
            }
            (CMD_PAUSE, _) => self.paused = param(0) != 0,
            (CMD_PLACE_SIGN, _) => {
                self.signs.insert(command.tile, command.text.clone());
            }
            _ => {}
        }

        self.noise = mix(self.noise ^ u64::from(command.code.0) ^ u64::from(command.tile));
    }

    fn step(&mut self, tick: Tick) {
        self.tick = tick;
        if self.paused {
            return;
        }

        let mut income: BTreeMap<u8, i64> = BTreeMap::new();
        for owner in self.tiles.values() {
            *income.entry(*owner).or_insert(0) += 1;
        }
        for (company, amount) in income {
            *self.funds_mut(company) += amount;
        }
        self.noise = mix(self.noise.wrapping_add(u64::from(tick)));
    }

    fn checksum(&self) -> u64 {
        // Fields in declaration order; BTreeMaps keep iteration stable.
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.tick.to_le_bytes());
        hasher.update(&[u8::from(self.paused)]);
        hasher.update(&(self.funds.len() as u32).to_le_bytes());
        for (company, funds) in &self.funds {
            hasher.update(&[*company]);
            hasher.update(&funds.to_le_bytes());
        }
        hasher.update(&(self.tiles.len() as u32).to_le_bytes());
        for (tile, owner) in &self.tiles {
            hasher.update(&tile.to_le_bytes());
            hasher.update(&[*owner]);
        }
        hasher.update(&(self.signs.len() as u32).to_le_bytes());
        for (tile, text) in &self.signs {
            hasher.update(&tile.to_le_bytes());
            hasher.update(&(text.len() as u32).to_le_bytes());
            hasher.update(text.as_bytes());
        }
        hasher.update(&self.executed.to_le_bytes());
        hasher.update(&self.noise.to_le_bytes());
        u64::from(hasher.finalize())
    }

    fn snapshot(&self) -> Result<Vec<u8>, WorldError> {
        Ok(bincode::serialize(self)?)
    }

    fn restore(bytes: &[u8]) -> Result<Self, WorldError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

fn mix(mut x: u64) -> u64 {
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51_afd7_ed55_8ccd);
    x ^= x >> 33;
    x
}
