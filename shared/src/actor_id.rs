use std::fmt;

/// Identifies a physical process and a virtual partition within it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    pub process: i32,
    pub sub_process: i32,
}

impl Address {
    pub const fn new(process: i32, sub_process: i32) -> Self {
        Self {
            process,
            sub_process,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.process, self.sub_process)
    }
}

/// Identifies one logical actor instance anywhere in the system.
///
/// An `instance_id` of 0 is reserved: [`ActorId::NONE`] marks a frame that is
/// not addressed to any actor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId {
    pub address: Address,
    pub instance_id: i64,
}

impl ActorId {
    pub const NONE: ActorId = ActorId {
        address: Address::new(0, 0),
        instance_id: 0,
    };

    pub const fn new(address: Address, instance_id: i64) -> Self {
        Self {
            address,
            instance_id,
        }
    }

    /// Whether this id names an actor (non-zero instance)
    pub fn is_valid(&self) -> bool {
        self.instance_id != 0
    }

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.instance_id)
    }
}
