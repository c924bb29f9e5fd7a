mod node;
pub use node::Node;

mod node_config;
pub use node_config::NodeConfig;

mod node_events;
pub use node_events::{NodeEvent, NodeEvents, SessionClosedEvent, SessionOpenedEvent};
