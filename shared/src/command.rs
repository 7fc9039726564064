//! Player commands and the table that says who may issue them.

use crate::{ClientId, Role, Tick, MAX_COMMAND_PARAMS, MAX_COMMAND_TEXT};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommandCode(pub u16);

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cmd{}", self.0)
    }
}

/// A command as issued by a peer, before the server has scheduled it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub role: Role,
    pub code: CommandCode,
    pub params: Vec<u32>,
    pub tile: u32,
    pub text: String,
    /// Opaque id the issuer uses to route the execution result back.
    pub callback_id: u8,
}

impl CommandRequest {
    /// Checks the shape limits every command must respect.
    pub fn is_well_formed(&self) -> bool {
        self.params.len() <= MAX_COMMAND_PARAMS && self.text.len() <= MAX_COMMAND_TEXT
    }
}

/// A scheduled command. Never modified after the server assigns `tick`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub origin: ClientId,
    pub role: Role,
    pub code: CommandCode,
    pub params: Vec<u32>,
    pub tile: u32,
    pub text: String,
    pub tick: Tick,
    pub callback_id: u8,
    /// Set only on the copy delivered back to the issuer.
    pub is_echo: bool,
}

impl Command {
    pub fn scheduled(origin: ClientId, request: CommandRequest, tick: Tick) -> Self {
        Self {
            origin,
            role: request.role,
            code: request.code,
            params: request.params,
            tile: request.tile,
            text: request.text,
            tick,
            callback_id: request.callback_id,
            is_echo: false,
        }
    }

    /// The copy of this command addressed to `recipient`.
    ///
    /// Only the issuer gets the echo flag and its callback id.
    pub fn addressed_to(&self, recipient: ClientId) -> Command {
        let is_echo = recipient == self.origin;
        Command {
            is_echo,
            callback_id: if is_echo { self.callback_id } else { 0 },
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandSpec {
    pub name: &'static str,
    /// Only the server (client id 0) may issue it.
    pub server_only: bool,
    /// Spectators may issue it.
    pub spectator_allowed: bool,
}

/// The set of command codes the simulation understands.
#[derive(Debug, Clone, Default)]
pub struct CommandTable {
    specs: BTreeMap<CommandCode, CommandSpec>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, code: CommandCode, spec: CommandSpec) -> &mut Self {
        self.specs.insert(code, spec);
        self
    }

    pub fn get(&self, code: CommandCode) -> Option<&CommandSpec> {
        self.specs.get(&code)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CommandRequest {
        CommandRequest {
            role: Role::Company(1),
            code: CommandCode(3),
            params: vec![10, 20],
            tile: 77,
            text: "depot".to_string(),
            callback_id: 9,
        }
    }

    #[test]
    fn test_well_formed_limits() {
        let mut req = request();
        assert!(req.is_well_formed());

        req.params = vec![0; MAX_COMMAND_PARAMS + 1];
        assert!(!req.is_well_formed());

        let mut req = request();
        req.text = "x".repeat(MAX_COMMAND_TEXT + 1);
        assert!(!req.is_well_formed());
    }

    #[test]
    fn test_echo_only_for_issuer() {
        let command = Command::scheduled(ClientId(4), request(), 120);

        let echo = command.addressed_to(ClientId(4));
        assert!(echo.is_echo);
        assert_eq!(echo.callback_id, 9);

        let other = command.addressed_to(ClientId(5));
        assert!(!other.is_echo);
        assert_eq!(other.callback_id, 0);
        assert_eq!(other.tick, 120);
        assert_eq!(other.params, vec![10, 20]);
    }

    #[test]
    fn test_table_lookup() {
        let mut table = CommandTable::new();
        table.register(
            CommandCode(1),
            CommandSpec {
                name: "build",
                ..Default::default()
            },
        );

        assert_eq!(table.len(), 1);
        assert_eq!(table.get(CommandCode(1)).map(|s| s.name), Some("build"));
        assert!(table.get(CommandCode(2)).is_none());
    }
}
