//! Node binary: reads configuration, installs telemetry, and runs the
//! transaction execution and block production core against an in-memory
//! fixture. Wiring a real DB, WASM engine, P2P plugin, or wallet is left
//! to the external collaborators named out of scope for this core.

use std::net::SocketAddr;

use chain_config::ChainConfig;
use chain_telemetry::metrics::{
    Counter,
    Error as MetricsError,
    Metrics,
    RegisteringBuilder,
};
use chain_test_utils::Fixture;
use serde::{
    Deserialize,
    Serialize,
};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Config {
    #[serde(default = "default_log")]
    log: String,
    metrics_addr: Option<SocketAddr>,
}

fn default_log() -> String {
    "info".to_string()
}

impl ChainConfig for Config {
    const PREFIX: &'static str = "CHAIN_NODE_";
}

struct NodeMetrics {
    blocks_produced: Counter,
}

chain_telemetry::metric_names! {
    pub const BLOCKS_PRODUCED = "blocks_produced_total";
}

impl Metrics for NodeMetrics {
    type Config = ();

    fn register(builder: &mut RegisteringBuilder, _config: &Self::Config) -> Result<Self, MetricsError> {
        let blocks_produced = builder.new_counter_factory(BLOCKS_PRODUCED, "blocks committed by this node")?.register()?;
        Ok(Self {
            blocks_produced,
        })
    }
}

fn main() -> chain_eyre::eyre::Result<()> {
    chain_eyre::install()?;
    let config: Config = chain_config::get_config().unwrap_or(Config {
        log: default_log(),
        metrics_addr: None,
    });

    let mut telemetry = chain_telemetry::configure().set_filter_directives(&config.log);
    if let Some(addr) = &config.metrics_addr {
        telemetry = telemetry.set_metrics(addr, "chain-node");
    }
    let (metrics, _guard) = telemetry.try_init::<NodeMetrics>(&())?;

    let mut fixture = Fixture::new();
    fixture.create_account("eosio");
    let block_id = fixture.produce_block(|_controller| {});
    metrics.blocks_produced.increment(1);
    tracing::info!(block_id = %hex::encode(block_id), "committed block");

    Ok(())
}
