use std::{
    env,
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use miette::{Context, IntoDiagnostic, Result};
use relay_proto::NodeId;
use relay_worker::Worker;

mod config;

#[derive(Debug, clap::Parser)]
struct Opt {
    /// Id of this node, unique within the cluster.
    id: NodeId,

    /// Number of nodes in the cluster.
    n: u16,

    /// Port on which to accept the master.
    port: u16,

    /// Path to config file.
    #[clap(long, short)]
    config: Option<PathBuf>,

    /// Host on which every node listens.
    /// Overrides the config file.
    #[clap(long)]
    host: Option<IpAddr>,

    /// Port of node 0's peer listener.
    /// Overrides the config file.
    #[clap(long)]
    peer_base_port: Option<u16>,
}

fn main() -> Result<()> {
    if env::var_os("RUST_LOG").is_none() {
        env::set_var("RUST_LOG", "info");
    }

    pretty_env_logger::init_timed();

    let opt = <Opt as clap::Parser>::parse();
    log::debug!("opt: {:#?}", opt);

    let mut config: config::Relay = match &opt.config {
        Some(path) => toml::from_str(
            std::fs::read_to_string(path)
                .into_diagnostic()
                .wrap_err("failed to open config file")?
                .as_str(),
        )
        .into_diagnostic()
        .wrap_err("failed to parse config")?,
        None => config::Relay::default(),
    };
    if let Some(host) = opt.host {
        config.host = host;
    }
    if let Some(peer_base_port) = opt.peer_base_port {
        config.peer_base_port = peer_base_port;
    }
    log::debug!("config: {:#?}", config);

    let mut worker = Worker::start(&relay_worker::Config {
        local_id: opt.id,
        node_count: opt.n,
        control_addr: SocketAddr::new(config.host, opt.port),
        host: config.host,
        peer_base_port: config.peer_base_port,
        connect_timeout: config.connect_timeout_ms,
    })
    .wrap_err_with(|| format!("failed to start node {}", opt.id))?;

    let shutdown = Arc::new(AtomicBool::new(false));
    log::debug!("starting shutdown signal handler");
    ctrlc::set_handler({
        let shutdown = shutdown.clone();
        move || {
            shutdown.store(true, Ordering::SeqCst);
        }
    })
    .into_diagnostic()
    .wrap_err("failed to set shutdown signal handler")?;

    worker.run(&shutdown);

    Ok(())
}
