use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use weft::{Config, Multicaster, PeerCache, Switch, Topology, UdpDemarc};

/// WEFT overlay node.
#[derive(Parser, Debug)]
#[command(name = "weft", version, about)]
struct Args {
    /// Path to a config file (overrides the standard search paths).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// UDP bind address (overrides the config).
    #[arg(short, long)]
    bind: Option<String>,
}

fn main() {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let (mut config, loaded) = match &args.config {
        Some(path) => match Config::load_from_paths(std::slice::from_ref(path)) {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Failed to load config");
                std::process::exit(1);
            }
        },
        None => match Config::load() {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Failed to load config");
                std::process::exit(1);
            }
        },
    };
    for path in &loaded {
        info!(path = %path.display(), "Loaded config");
    }
    if let Some(bind) = args.bind {
        config.transports.udp.bind = vec![bind];
    }

    let identity = match config.create_identity() {
        Ok(identity) => Arc::new(identity),
        Err(e) => {
            error!(error = %e, "Failed to initialize identity");
            std::process::exit(1);
        }
    };
    info!(address = %identity.address(), wpub = %identity.wpub(), "Identity ready");

    let cache = if config.cache.enabled {
        let dir = config
            .cache
            .dir
            .clone()
            .or_else(|| dirs::data_dir().map(|d| d.join("weft").join("peers")));
        match dir.map(PeerCache::open) {
            Some(Ok(cache)) => Some(Arc::new(cache)),
            Some(Err(e)) => {
                error!(error = %e, "Failed to open peer cache");
                std::process::exit(1);
            }
            None => None,
        }
    } else {
        None
    };

    let bind_addrs = match config.bind_addrs() {
        Ok(addrs) => addrs,
        Err(e) => {
            error!(error = %e, "Bad bind address");
            std::process::exit(1);
        }
    };
    let demarc = match UdpDemarc::bind(&bind_addrs) {
        Ok(demarc) => Arc::new(demarc),
        Err(e) => {
            error!(error = %e, "Failed to bind");
            std::process::exit(1);
        }
    };

    let topology = Arc::new(Topology::new(Arc::clone(&identity), cache));
    let switch = Arc::new(Switch::new(
        Arc::clone(&identity),
        Arc::clone(&topology),
        Arc::clone(&demarc) as Arc<dyn weft::Demarc>,
        Arc::new(Multicaster::new()),
    ));

    match config.root_entries() {
        Ok(roots) => {
            for (root_identity, bootstrap) in roots {
                topology.add_root(root_identity, bootstrap);
                switch.send_hello(root_identity.address());
            }
        }
        Err(e) => {
            error!(error = %e, "Bad root entry");
            std::process::exit(1);
        }
    }
    match config.physical_entries() {
        Ok(entries) => {
            for (cidr, path_config) in entries {
                topology.set_physical_path_configuration(Some(cidr), Some(path_config));
            }
        }
        Err(e) => {
            error!(error = %e, "Bad physical path entry");
            std::process::exit(1);
        }
    }
    // Networks are joined once a tap implementation hands frames to the
    // switch; validate the configuration up front regardless.
    match config.network_entries() {
        Ok(entries) => {
            for (id, policy) in &entries {
                info!(
                    network = %format_args!("{:016x}", id),
                    open = policy.open,
                    members = policy.members.len(),
                    "Configured network"
                );
            }
        }
        Err(e) => {
            error!(error = %e, "Bad network entry");
            std::process::exit(1);
        }
    }

    let _reader_threads = demarc.run(Arc::clone(&switch));
    info!("Switch running");

    // Timer thread doubles as the topology maintenance driver.
    let mut last_topology_tick = weft::now_ms();
    loop {
        let delay = switch.do_timer_tasks();
        std::thread::sleep(Duration::from_millis(delay as u64));
        let now = weft::now_ms();
        if now - last_topology_tick >= 1_000 {
            topology.do_periodic_tasks(now);
            last_topology_tick = now;
        }
    }
}
