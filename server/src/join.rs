//! Per-connection join lifecycle.
//!
//! All legal transitions and the packets each state accepts are listed here,
//! so message handlers never re-check state by hand.

use shared::{ClientPacket, PeerStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JoinState {
    Inactive,
    Authorizing,
    Authorized,
    AwaitingSnapshot,
    ReceivingSnapshot,
    SnapshotComplete,
    CatchingUp,
    Active,
    Disconnected,
}

impl JoinState {
    /// Whether `self -> next` is a legal transition.
    pub fn can_advance_to(self, next: JoinState) -> bool {
        use JoinState::*;

        match (self, next) {
            (Disconnected, _) => false,
            (_, Disconnected) => true,
            (Inactive, Authorizing) | (Inactive, Authorized) => true,
            (Authorizing, Authorized) => true,
            (Authorized, AwaitingSnapshot) | (Authorized, ReceivingSnapshot) => true,
            (AwaitingSnapshot, ReceivingSnapshot) => true,
            (ReceivingSnapshot, SnapshotComplete) => true,
            (SnapshotComplete, CatchingUp) => true,
            (CatchingUp, Active) => true,
            _ => false,
        }
    }

    /// Whether a packet of this kind may arrive while in `self`.
    pub fn accepts(self, packet: &ClientPacket) -> bool {
        use JoinState::*;

        match packet {
            ClientPacket::Quit { .. } => self != Disconnected,
            ClientPacket::Join { .. } => self == Inactive,
            ClientPacket::Password { .. } => self == Authorizing,
            ClientPacket::RequestSnapshot => self == Authorized,
            ClientPacket::SnapshotAck => self == ReceivingSnapshot,
            ClientPacket::Ack { .. } => matches!(self, SnapshotComplete | CatchingUp | Active),
            ClientPacket::Desync { .. } => matches!(self, CatchingUp | Active),
            ClientPacket::Command(_) | ClientPacket::Chat { .. } => self == Active,
        }
    }

    /// Whether other peers have been told this client exists.
    pub fn is_announced(self) -> bool {
        self >= JoinState::Authorized && self != JoinState::Disconnected
    }

    /// Whether sequenced commands are routed to this connection at all.
    pub fn follows_commands(self) -> bool {
        matches!(
            self,
            JoinState::ReceivingSnapshot
                | JoinState::SnapshotComplete
                | JoinState::CatchingUp
                | JoinState::Active
        )
    }

    /// Whether the connection is told about frame progress every tick.
    pub fn receives_frames(self) -> bool {
        matches!(
            self,
            JoinState::SnapshotComplete | JoinState::CatchingUp | JoinState::Active
        )
    }

    /// The status shown to other peers, if this client is visible at all.
    pub fn status(self) -> Option<PeerStatus> {
        match self {
            JoinState::Authorized => Some(PeerStatus::Authorized),
            JoinState::AwaitingSnapshot => Some(PeerStatus::Waiting),
            JoinState::ReceivingSnapshot => Some(PeerStatus::Downloading),
            JoinState::SnapshotComplete | JoinState::CatchingUp => Some(PeerStatus::Joining),
            JoinState::Active => Some(PeerStatus::Active),
            JoinState::Inactive | JoinState::Authorizing | JoinState::Disconnected => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{ChatDestination, PasswordKind};

    const ALL: [JoinState; 9] = [
        JoinState::Inactive,
        JoinState::Authorizing,
        JoinState::Authorized,
        JoinState::AwaitingSnapshot,
        JoinState::ReceivingSnapshot,
        JoinState::SnapshotComplete,
        JoinState::CatchingUp,
        JoinState::Active,
        JoinState::Disconnected,
    ];

    #[test]
    fn test_happy_path_is_legal() {
        let path = [
            JoinState::Inactive,
            JoinState::Authorizing,
            JoinState::Authorized,
            JoinState::AwaitingSnapshot,
            JoinState::ReceivingSnapshot,
            JoinState::SnapshotComplete,
            JoinState::CatchingUp,
            JoinState::Active,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_advance_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_optional_steps_can_be_skipped() {
        assert!(JoinState::Inactive.can_advance_to(JoinState::Authorized));
        assert!(JoinState::Authorized.can_advance_to(JoinState::ReceivingSnapshot));
    }

    #[test]
    fn test_no_backward_or_skipping_transitions() {
        assert!(!JoinState::Active.can_advance_to(JoinState::CatchingUp));
        assert!(!JoinState::Authorized.can_advance_to(JoinState::Active));
        assert!(!JoinState::ReceivingSnapshot.can_advance_to(JoinState::CatchingUp));
        assert!(!JoinState::Inactive.can_advance_to(JoinState::Inactive));
    }

    #[test]
    fn test_disconnect_reachable_from_everywhere_but_itself() {
        for state in ALL {
            let expected = state != JoinState::Disconnected;
            assert_eq!(state.can_advance_to(JoinState::Disconnected), expected);
        }
    }

    #[test]
    fn test_packet_acceptance() {
        let chat = ClientPacket::Chat {
            destination: ChatDestination::Broadcast,
            text: "hi".to_string(),
        };
        let password = ClientPacket::Password {
            kind: PasswordKind::Game,
            value: String::new(),
        };

        assert!(JoinState::Active.accepts(&chat));
        assert!(!JoinState::CatchingUp.accepts(&chat));
        assert!(JoinState::Authorizing.accepts(&password));
        assert!(!JoinState::Authorized.accepts(&password));
        assert!(!JoinState::Authorized.accepts(&ClientPacket::SnapshotAck));
        assert!(JoinState::ReceivingSnapshot.accepts(&ClientPacket::SnapshotAck));
        assert!(JoinState::CatchingUp.accepts(&ClientPacket::Ack { tick: 1 }));
        assert!(!JoinState::Authorized.accepts(&ClientPacket::Ack { tick: 1 }));
    }

    #[test]
    fn test_visibility() {
        assert!(!JoinState::Authorizing.is_announced());
        assert!(JoinState::Authorized.is_announced());
        assert!(!JoinState::Disconnected.is_announced());
        assert_eq!(JoinState::Authorizing.status(), None);
        assert_eq!(JoinState::CatchingUp.status(), Some(PeerStatus::Joining));
    }
}
