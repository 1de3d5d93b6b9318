use std::sync::Arc;

use simple_logger::SimpleLogger;

use tmqtt::{Broker, BrokerSettings, DefaultSecurity};
use tmqtt_net::Builder;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    SimpleLogger::new().with_level(log::LevelFilter::Info).init()?;

    let broker = Broker::new(BrokerSettings::default(), Arc::new(DefaultSecurity));
    broker.start();
    broker.serve(Builder::new().name("external/tcp").laddr(([0, 0, 0, 0], 1883).into()).bind()?).await?;
    Ok(())
}
