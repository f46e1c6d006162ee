use std::fmt::{Display, Formatter};

use transport::TransportDirection;

/// The part a ping process plays. Each role is a combination of capabilities rather than a
///  separate code path: producing messages (running a sender), consuming messages (running a
///  receiver), and echoing consumed messages instead of measuring them.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Role {
    /// send only
    Source,
    /// receive only, measuring latency
    Receiver,
    /// send and measure the echoed messages
    Initiator,
    /// echo every received message back
    Reflector,
}

impl Role {
    pub fn produces(&self) -> bool {
        matches!(self, Role::Source | Role::Initiator)
    }

    pub fn consumes(&self) -> bool {
        matches!(self, Role::Receiver | Role::Initiator | Role::Reflector)
    }

    pub fn echoes(&self) -> bool {
        matches!(self, Role::Reflector)
    }

    pub fn transport_direction(&self) -> TransportDirection {
        match self {
            Role::Source => TransportDirection::SendOnly,
            Role::Receiver => TransportDirection::ReceiveOnly,
            Role::Initiator | Role::Reflector => TransportDirection::Duplex,
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Role::Source => "source",
            Role::Receiver => "receiver",
            Role::Initiator => "initiator",
            Role::Reflector => "reflector",
        };
        write!(f, "{}", name)
    }
}
