#![deny(unsafe_code)]

use std::process;
use std::sync::Arc;
use std::time::Duration;

use structopt::StructOpt;

use tmqtt::logger::{config_logger, logger_init};
use tmqtt::{Broker, BrokerSettings, DefaultSecurity};
use tmqtt_conf::{Options, Settings};
use tmqtt_net::Builder;

#[tokio::main]
async fn main() {
    //init config
    let settings = Settings::init(Options::from_args()).expect("settings init failed");

    //init log
    let logger = config_logger(&settings.log);
    logger_init(&logger, settings.log.level.inner()).expect("logger init failed");
    let _ = Settings::logs();

    let listen_cfg = &settings.listener;
    let listener = Builder::new()
        .name(format!("external/tcp/{}", listen_cfg.addr))
        .laddr(listen_cfg.addr)
        .backlog(listen_cfg.backlog)
        .nodelay(listen_cfg.nodelay)
        .reuseaddr(listen_cfg.reuseaddr)
        .reuseport(listen_cfg.reuseport)
        .bind()
        .unwrap_or_else(|e| {
            log::error!("listen mqtt failed: {}", e);
            process::exit(1);
        });

    let broker = Broker::new(BrokerSettings::from(settings), Arc::new(DefaultSecurity));
    broker.start();

    let server = broker.clone();
    tokio::spawn(async move {
        if let Err(e) = server.serve(listener).await {
            log::error!("serve mqtt failed: {}", e);
            process::exit(1);
        }
    });

    tokio::signal::ctrl_c().await.expect("signal ctrl c");
    broker.shutdown();
    tokio::time::sleep(Duration::from_secs(1)).await;
}
