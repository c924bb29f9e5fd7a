pub mod pump;
pub mod test_node;

pub use pump::{pump_all, pump_until, pump_while_quiet, wait_for};
pub use test_node::{client_node, inner_node, node_with, server_node, TransportKind};
