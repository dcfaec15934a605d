mod client;

pub use callbridge_realtime_types as types;
pub use client::config::{Config, ConfigBuilder};
pub use client::stats::Stats;
pub use client::{Client, ClientTx, ServerRx, connect_with_config};
