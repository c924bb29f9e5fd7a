use std::{
    thread,
    time::{Duration, Instant},
};

use courier_service::Node;

const TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Pumps every node once
pub fn pump_all(nodes: &mut [&mut Node]) {
    for node in nodes.iter_mut() {
        if let Err(error) = node.pump() {
            panic!("pump failed: {}", error);
        }
    }
}

/// Pumps all nodes until `done` holds. Returns false on timeout.
pub fn pump_until<F>(nodes: &mut [&mut Node], mut done: F) -> bool
where
    F: FnMut(&mut [&mut Node]) -> bool,
{
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        pump_all(nodes);
        if done(nodes) {
            return true;
        }
        thread::sleep(POLL_INTERVAL);
    }
    false
}

/// Keeps pumping for `duration`, for checks that nothing else happens
pub fn pump_while_quiet(nodes: &mut [&mut Node], duration: Duration) {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        pump_all(nodes);
        thread::sleep(POLL_INTERVAL);
    }
}

/// Polls `done` without pumping anything, for state owned by other threads
pub fn wait_for<F: FnMut() -> bool>(mut done: F) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(POLL_INTERVAL);
    }
    false
}
