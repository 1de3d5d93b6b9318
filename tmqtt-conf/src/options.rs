use structopt::StructOpt;

#[derive(StructOpt, Debug, Clone, Default)]
#[structopt(name = "tmqttd", about = "MQTT v3.1/v3.1.1 broker")]
pub struct Options {
    /// Config filename
    #[structopt(name = "config", short = "f", long)]
    pub cfg_name: Option<String>,

    /// Listen port, overrides listener.addr
    #[structopt(name = "port", short = "p", long)]
    pub port: Option<u16>,

    /// Worker loop count, overrides mqtt.workers
    #[structopt(name = "workers", short = "w", long)]
    pub workers: Option<usize>,
}
