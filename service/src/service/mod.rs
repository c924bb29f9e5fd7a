mod service;
pub use service::{FrameSink, Service};

mod service_config;
pub use service_config::ServiceConfig;
