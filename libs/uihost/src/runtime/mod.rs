mod host_runtime;
mod runner;

pub use host_runtime::{Host, HostBuilder, HostError};
pub use runner::{run, ShutdownOptions};
