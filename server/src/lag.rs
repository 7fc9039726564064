//! Per-client lag measurement and eviction.
//!
//! Lag is `current_tick - last_acknowledged_tick`. Active clients get a warn
//! threshold and a kill threshold; clients still catching up from a snapshot
//! baseline only get a (much larger) kill threshold. Clients that stall during
//! the handshake are timed out by how long they have sat in one state.

use crate::join::JoinState;
use crate::registry::ClientConnection;
use log::warn;
use shared::{ClientId, ErrorCode, Tick};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
pub struct LagThresholds {
    pub warn: Tick,
    pub kill: Tick,
    pub catch_up_kill: Tick,
    pub password_timeout: Tick,
    pub join_timeout: Tick,
    pub snapshot_timeout: Tick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LagVerdict {
    Healthy,
    /// First check above the warn threshold since the client was last healthy.
    Warn { lag: Tick },
    Evict(ErrorCode),
}

#[derive(Debug, Clone, Copy)]
struct AckRecord {
    last_ack_tick: Tick,
    server_tick_at_ack: Tick,
    warned: bool,
}

pub struct LagSupervisor {
    thresholds: LagThresholds,
    records: HashMap<ClientId, AckRecord>,
}

impl LagSupervisor {
    pub fn new(thresholds: LagThresholds) -> Self {
        Self {
            thresholds,
            records: HashMap::new(),
        }
    }

    /// Starts tracking a client whose simulation resumes at `baseline`.
    pub fn track(&mut self, client_id: ClientId, baseline: Tick, server_tick: Tick) {
        self.records.insert(
            client_id,
            AckRecord {
                last_ack_tick: baseline,
                server_tick_at_ack: server_tick,
                warned: false,
            },
        );
    }

    /// Records an acknowledgement. Acks never move a client backwards.
    pub fn record_ack(&mut self, client_id: ClientId, ack_tick: Tick, server_tick: Tick) {
        if let Some(record) = self.records.get_mut(&client_id) {
            if ack_tick >= record.last_ack_tick {
                record.last_ack_tick = ack_tick;
                record.server_tick_at_ack = server_tick;
            }
        }
    }

    pub fn forget(&mut self, client_id: ClientId) {
        self.records.remove(&client_id);
    }

    pub fn is_tracking(&self, client_id: ClientId) -> bool {
        self.records.contains_key(&client_id)
    }

    pub fn lag_of(&self, client_id: ClientId, current: Tick) -> Option<Tick> {
        self.records
            .get(&client_id)
            .map(|record| current.saturating_sub(record.last_ack_tick))
    }

    /// Server tick at which the client last acknowledged progress.
    pub fn last_ack_at(&self, client_id: ClientId) -> Option<Tick> {
        self.records.get(&client_id).map(|r| r.server_tick_at_ack)
    }

    /// Decides what to do about `connection` at tick `current`.
    pub fn inspect(&mut self, connection: &ClientConnection, current: Tick) -> LagVerdict {
        let t = self.thresholds;
        let in_state = current.saturating_sub(connection.state_since);

        match connection.state {
            JoinState::Authorizing if in_state > t.password_timeout => {
                LagVerdict::Evict(ErrorCode::TimeoutPassword)
            }
            JoinState::Inactive | JoinState::Authorized if in_state > t.join_timeout => {
                LagVerdict::Evict(ErrorCode::TimeoutJoin)
            }
            JoinState::ReceivingSnapshot if in_state > t.snapshot_timeout => {
                LagVerdict::Evict(ErrorCode::TimeoutSnapshot)
            }
            JoinState::SnapshotComplete | JoinState::CatchingUp => {
                match self.lag_of(connection.id, current) {
                    Some(lag) if lag > t.catch_up_kill => LagVerdict::Evict(ErrorCode::Kicked),
                    _ => LagVerdict::Healthy,
                }
            }
            JoinState::Active => self.inspect_active(connection.id, current),
            _ => LagVerdict::Healthy,
        }
    }

    fn inspect_active(&mut self, client_id: ClientId, current: Tick) -> LagVerdict {
        let t = self.thresholds;
        let Some(record) = self.records.get_mut(&client_id) else {
            return LagVerdict::Healthy;
        };
        let lag = current.saturating_sub(record.last_ack_tick);

        if lag > t.kill {
            return LagVerdict::Evict(ErrorCode::Kicked);
        }
        if lag > t.warn {
            if record.warned {
                return LagVerdict::Healthy;
            }
            record.warned = true;
            warn!(
                "Client {} is lagging {} ticks behind (last ack at server tick {})",
                client_id, lag, record.server_tick_at_ack
            );
            return LagVerdict::Warn { lag };
        }
        record.warned = false;
        LagVerdict::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> LagThresholds {
        LagThresholds {
            warn: 10,
            kill: 20,
            catch_up_kill: 100,
            password_timeout: 50,
            join_timeout: 30,
            snapshot_timeout: 40,
        }
    }

    fn connection(id: u32, state: JoinState, since: Tick) -> ClientConnection {
        let mut connection = ClientConnection::new(ClientId(id), since, 8);
        connection.state = state;
        connection
    }

    #[test]
    fn test_healthy_below_warn() {
        let mut lag = LagSupervisor::new(thresholds());
        let conn = connection(1, JoinState::Active, 0);
        lag.track(conn.id, 100, 100);

        assert_eq!(lag.inspect(&conn, 110), LagVerdict::Healthy);
        assert_eq!(lag.lag_of(conn.id, 110), Some(10));
    }

    #[test]
    fn test_warns_once_per_incident() {
        let mut lag = LagSupervisor::new(thresholds());
        let conn = connection(1, JoinState::Active, 0);
        lag.track(conn.id, 100, 100);

        assert_eq!(lag.inspect(&conn, 111), LagVerdict::Warn { lag: 11 });
        assert_eq!(lag.inspect(&conn, 112), LagVerdict::Healthy);

        lag.record_ack(conn.id, 112, 112);
        assert_eq!(lag.inspect(&conn, 113), LagVerdict::Healthy);
        assert_eq!(lag.inspect(&conn, 123), LagVerdict::Warn { lag: 11 });
    }

    #[test]
    fn test_kill_threshold_evicts() {
        let mut lag = LagSupervisor::new(thresholds());
        let conn = connection(1, JoinState::Active, 0);
        lag.track(conn.id, 100, 100);

        assert_ne!(lag.inspect(&conn, 120), LagVerdict::Evict(ErrorCode::Kicked));
        assert_eq!(lag.inspect(&conn, 121), LagVerdict::Evict(ErrorCode::Kicked));
    }

    #[test]
    fn test_catching_up_has_looser_threshold() {
        let mut lag = LagSupervisor::new(thresholds());
        let conn = connection(1, JoinState::CatchingUp, 0);
        lag.track(conn.id, 100, 100);

        assert_eq!(lag.inspect(&conn, 150), LagVerdict::Healthy);
        assert_eq!(lag.inspect(&conn, 201), LagVerdict::Evict(ErrorCode::Kicked));
    }

    #[test]
    fn test_stale_ack_ignored() {
        let mut lag = LagSupervisor::new(thresholds());
        lag.track(ClientId(1), 50, 50);
        lag.record_ack(ClientId(1), 60, 61);
        lag.record_ack(ClientId(1), 55, 62);

        assert_eq!(lag.lag_of(ClientId(1), 70), Some(10));
        assert_eq!(lag.last_ack_at(ClientId(1)), Some(61));
    }

    #[test]
    fn test_handshake_timeouts() {
        let mut lag = LagSupervisor::new(thresholds());

        let authorizing = connection(1, JoinState::Authorizing, 0);
        assert_eq!(lag.inspect(&authorizing, 50), LagVerdict::Healthy);
        assert_eq!(
            lag.inspect(&authorizing, 51),
            LagVerdict::Evict(ErrorCode::TimeoutPassword)
        );

        let inactive = connection(2, JoinState::Inactive, 0);
        assert_eq!(lag.inspect(&inactive, 31), LagVerdict::Evict(ErrorCode::TimeoutJoin));

        let downloading = connection(3, JoinState::ReceivingSnapshot, 10);
        assert_eq!(lag.inspect(&downloading, 50), LagVerdict::Healthy);
        assert_eq!(
            lag.inspect(&downloading, 51),
            LagVerdict::Evict(ErrorCode::TimeoutSnapshot)
        );
    }

    #[test]
    fn test_waiting_never_times_out() {
        let mut lag = LagSupervisor::new(thresholds());
        let waiting = connection(1, JoinState::AwaitingSnapshot, 0);
        assert_eq!(lag.inspect(&waiting, 10_000), LagVerdict::Healthy);
    }

    #[test]
    fn test_forget_stops_tracking() {
        let mut lag = LagSupervisor::new(thresholds());
        lag.track(ClientId(1), 0, 0);
        assert!(lag.is_tracking(ClientId(1)));
        lag.forget(ClientId(1));
        lag.forget(ClientId(1));
        assert!(!lag.is_tracking(ClientId(1)));
        assert_eq!(lag.lag_of(ClientId(1), 10), None);
    }
}
