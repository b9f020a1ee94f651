use serde::Deserialize;

pub mod pipeline;
pub mod processor;
pub mod sampler;
pub mod scanner;

#[cfg(test)]
pub(crate) mod testutil;

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Config {
    /// Seconds between scan ticks (chain head poll cadence)
    pub poll_interval_secs: Option<u64>,

    /// Statically tracked account addresses, sampled in addition to every
    /// address observed in persisted transactions
    #[serde(default)]
    pub tracked_addresses: Vec<String>,

    /// Forward blocks that must be ingested before a balance sample is taken
    pub min_blocks_per_sample: Option<u64>,

    /// Seconds without a block-triggered sample before a fallback sample is
    /// taken at the latest block
    pub sample_timeout_secs: Option<u64>,

    /// Max in-flight blocks between a scanner and its processor
    pub channel_capacity: Option<usize>,
}
