use std::{any::Any, collections::HashMap};

use courier_shared::{ActorId, Address};

use crate::{error::RouteError, transport::Endpoint};

/// Where a frame addressed to an ActorId has to go
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Route {
    /// An actor registered in this process, by instance id
    Local(i64),
    /// Another process, reached over the Channel for this endpoint
    Remote(Endpoint),
}

/// Resolves ActorIds to local actors or to the endpoint of the process
/// hosting them
pub struct Router {
    address: Address,
    actors: HashMap<i64, Box<dyn Any + Send>>,
    routes: HashMap<Address, Endpoint>,
}

impl Router {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            actors: HashMap::new(),
            routes: HashMap::new(),
        }
    }

    /// Address of this process
    pub fn address(&self) -> Address {
        self.address
    }

    /// Maps a remote process address to the endpoint serving it
    pub fn add_route(&mut self, address: Address, endpoint: impl Into<Endpoint>) {
        self.routes.insert(address, endpoint.into());
    }

    pub fn remove_route(&mut self, address: &Address) -> Option<Endpoint> {
        self.routes.remove(address)
    }

    /// Registers `actor` under `instance_id`, returning any actor it replaced
    pub fn register_actor<A: Any + Send>(
        &mut self,
        instance_id: i64,
        actor: A,
    ) -> Option<Box<dyn Any + Send>> {
        self.actors.insert(instance_id, Box::new(actor))
    }

    pub fn remove_actor(&mut self, instance_id: i64) -> Option<Box<dyn Any + Send>> {
        self.actors.remove(&instance_id)
    }

    pub fn actor_mut<A: Any>(&mut self, instance_id: i64) -> Option<&mut A> {
        self.actors.get_mut(&instance_id)?.downcast_mut::<A>()
    }

    pub fn actor_count(&self) -> usize {
        self.actors.len()
    }

    /// The ActorId of a local instance
    pub fn local_actor_id(&self, instance_id: i64) -> ActorId {
        ActorId::new(self.address, instance_id)
    }

    pub fn route(&self, actor: ActorId) -> Result<Route, RouteError> {
        if !actor.is_valid() {
            return Err(RouteError::InvalidActor { actor });
        }
        if actor.address == self.address {
            return if self.actors.contains_key(&actor.instance_id) {
                Ok(Route::Local(actor.instance_id))
            } else {
                Err(RouteError::ActorNotFound { actor })
            };
        }
        match self.routes.get(&actor.address) {
            Some(endpoint) => Ok(Route::Remote(endpoint.clone())),
            None => Err(RouteError::UnknownAddress {
                address: actor.address,
                actor,
            }),
        }
    }

    pub(crate) fn actor_entry(&mut self, instance_id: i64) -> Option<&mut (dyn Any + Send + 'static)> {
        self.actors.get_mut(&instance_id).map(|actor| &mut **actor)
    }
}
