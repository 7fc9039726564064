//! Random command generation for headless peers.

use rand::Rng;
use shared::world::{CMD_BUILD, CMD_DEMOLISH, CMD_PLACE_SIGN, CMD_TRANSFER_FUNDS};
use shared::{CommandRequest, Role};

/// Tiles a bot picks from.
pub const MAP_TILES: u32 = 256;

/// Picks a command `role` is allowed to issue.
pub fn random_command<R: Rng>(rng: &mut R, role: Role, companies: u8) -> CommandRequest {
    let tile = rng.gen_range(0..MAP_TILES);
    let callback_id = rng.gen();

    let (code, params, text) = match role {
        Role::Spectator => (
            CMD_PLACE_SIGN,
            Vec::new(),
            format!("sign {}", rng.gen_range(0..1000)),
        ),
        Role::Company(_) => match rng.gen_range(0..10) {
            0..=5 => (CMD_BUILD, vec![rng.gen_range(0..500)], String::new()),
            6..=7 => (CMD_DEMOLISH, Vec::new(), String::new()),
            8 => (
                CMD_TRANSFER_FUNDS,
                vec![rng.gen_range(1..1000), u32::from(rng.gen_range(0..companies.max(1)))],
                String::new(),
            ),
            _ => (CMD_PLACE_SIGN, Vec::new(), "hq".to_string()),
        },
    };

    CommandRequest {
        role,
        code,
        params,
        tile,
        text,
        callback_id,
    }
}
