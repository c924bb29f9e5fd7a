use crate::messages::{
    message::{Message, Request},
    message_kinds::MessageKinds,
};

pub mod error;
pub use error::ProtocolError;

// Protocol Plugin
pub trait ProtocolPlugin {
    fn build(&self, protocol: &mut Protocol) -> Result<(), ProtocolError>;
}

/// The set of message types two peers agree on. Built once, then locked and
/// shared read-only, typically as `Arc<Protocol>`.
#[derive(Clone, Default)]
pub struct Protocol {
    pub message_kinds: MessageKinds,
    locked: bool,
}

impl Protocol {
    pub fn builder() -> Self {
        Self::default()
    }

    pub fn add_plugin<P: ProtocolPlugin>(&mut self, plugin: P) -> Result<&mut Self, ProtocolError> {
        self.check_lock()?;
        plugin.build(self)?;
        Ok(self)
    }

    pub fn add_message<M: Message>(&mut self) -> Result<&mut Self, ProtocolError> {
        self.check_lock()?;
        self.message_kinds.add_message::<M>()?;
        Ok(self)
    }

    pub fn add_request<Q: Request>(&mut self) -> Result<&mut Self, ProtocolError> {
        self.check_lock()?;
        self.message_kinds.add_request::<Q>()?;
        Ok(self)
    }

    pub fn lock(&mut self) -> Result<(), ProtocolError> {
        self.check_lock()?;
        self.locked = true;
        Ok(())
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Returns Err if protocol is locked
    pub fn check_lock(&self) -> Result<(), ProtocolError> {
        if self.locked {
            Err(ProtocolError::AlreadyLocked)
        } else {
            Ok(())
        }
    }

    /// Takes the configured protocol out of the builder and locks it
    pub fn build(&mut self) -> Result<Self, ProtocolError> {
        self.check_lock()?;
        let mut protocol = std::mem::take(self);
        protocol.locked = true;
        Ok(protocol)
    }
}
