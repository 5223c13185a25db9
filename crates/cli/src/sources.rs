use std::sync::Arc;

use sluice_core::{Config, EventSource};

/// One stream-backed source per configured binding.
#[cfg(feature = "rabbitmq")]
pub fn build_sources(config: &Config) -> anyhow::Result<Vec<Arc<dyn EventSource>>> {
    use sluice_stream::{RabbitMqStreamClient, StreamClient, StreamEventSource};

    anyhow::ensure!(!config.sources.is_empty(), "no sources configured (set SLUICE_SOURCES)");

    let client: Arc<dyn StreamClient> = Arc::new(RabbitMqStreamClient::new(
        config.stream.dsn.clone(),
        config.stream.read_timeout,
    ));

    Ok(config
        .sources
        .iter()
        .map(|binding| {
            Arc::new(StreamEventSource::new(
                client.clone(),
                binding.stream_name.clone(),
                binding.source_name.clone(),
            )) as Arc<dyn EventSource>
        })
        .collect())
}

#[cfg(not(feature = "rabbitmq"))]
pub fn build_sources(_config: &Config) -> anyhow::Result<Vec<Arc<dyn EventSource>>> {
    anyhow::bail!("built without a stream client; enable the `rabbitmq` feature")
}
