use std::default::Default;

use courier_shared::Address;

use crate::ServiceConfig;

/// Contains Config properties which will be used by a Node
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// The Service the Node pumps
    pub service: ServiceConfig,
    /// Address of this process. ActorIds carrying it are served by locally
    /// registered actors.
    pub address: Address,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            address: Address::new(1, 0),
        }
    }
}
