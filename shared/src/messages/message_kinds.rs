use std::{any::TypeId, collections::HashMap};

use crate::{
    messages::{
        error::MessageKindsError,
        message::{Message, Request},
    },
    types::Opcode,
};

/// What a registered opcode is used for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageRole {
    /// One-way message
    Message,
    /// Expects a reply carrying `response`
    Request { response: Opcode },
    /// Reply to `request`
    Response { request: Opcode },
}

#[derive(Clone, Debug)]
pub struct MessageKind {
    pub opcode: Opcode,
    pub name: &'static str,
    pub role: MessageRole,
    type_id: TypeId,
}

impl MessageKind {
    fn of<M: Message>(role: MessageRole) -> Self {
        Self {
            opcode: M::opcode(),
            name: M::name(),
            role,
            type_id: TypeId::of::<M>(),
        }
    }

    pub fn is<M: Message>(&self) -> bool {
        self.type_id == TypeId::of::<M>()
    }
}

/// Opcode registry for every message type a Protocol knows
#[derive(Clone, Default)]
pub struct MessageKinds {
    kinds: HashMap<Opcode, MessageKind>,
}

impl MessageKinds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_message<M: Message>(&mut self) -> Result<(), MessageKindsError> {
        self.insert(MessageKind::of::<M>(MessageRole::Message))
    }

    pub fn add_request<Q: Request>(&mut self) -> Result<(), MessageKindsError> {
        let request = Q::opcode();
        let response = <Q::Response as Message>::opcode();
        self.insert(MessageKind::of::<Q>(MessageRole::Request { response }))?;
        // a Response type may answer several requests; keep the first pairing
        match self.kinds.get(&response) {
            Some(existing) if existing.is::<Q::Response>() => Ok(()),
            _ => self.insert(MessageKind::of::<Q::Response>(MessageRole::Response { request })),
        }
    }

    pub fn kind(&self, opcode: Opcode) -> Result<&MessageKind, MessageKindsError> {
        self.kinds
            .get(&opcode)
            .ok_or(MessageKindsError::OpcodeNotFound { opcode })
    }

    pub fn contains(&self, opcode: Opcode) -> bool {
        self.kinds.contains_key(&opcode)
    }

    pub fn is_request(&self, opcode: Opcode) -> bool {
        matches!(
            self.kinds.get(&opcode).map(|kind| kind.role),
            Some(MessageRole::Request { .. })
        )
    }

    pub fn name(&self, opcode: Opcode) -> &'static str {
        self.kinds
            .get(&opcode)
            .map(|kind| kind.name)
            .unwrap_or("<unregistered>")
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    fn insert(&mut self, kind: MessageKind) -> Result<(), MessageKindsError> {
        if let Some(existing) = self.kinds.get(&kind.opcode) {
            return Err(MessageKindsError::DuplicateOpcode {
                opcode: kind.opcode,
                existing: existing.name,
                incoming: kind.name,
            });
        }
        self.kinds.insert(kind.opcode, kind);
        Ok(())
    }
}
