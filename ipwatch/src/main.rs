mod config;
mod error;
#[cfg(any(target_os = "windows", test))]
mod tables;
#[cfg(any(target_os = "windows", test))]
mod watch;

use crate::config::WatchConfig;
use clap::{Parser, Subcommand};
use std::net::Ipv4Addr;
use std::path::PathBuf;

#[tokio::main]
async fn main() -> error::Result<()> {
    if std::env::var_os("RUST_LOG").is_none() {
        unsafe {
            std::env::set_var("RUST_LOG", "info");
        }
    }
    pretty_env_logger::init();

    let args = Args::parse();
    let cfg = WatchConfig::load(args.config.as_deref())?;

    run(args.command.with_config(&cfg)).await
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file, the bundled one when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
enum Command {
    /// Report address and route changes until ctrl-c
    Watch {
        #[arg(long)]
        address: bool,
        #[arg(long)]
        route: bool,
        /// Stop after this many changes
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Print the IPv4 forward table
    Routes,
    /// Print the IPv4 address table
    Addresses {
        #[arg(long)]
        sorted: bool,
    },
    /// Print every adapter with its addresses, gateways and DNS servers
    Adapters,
    /// Add a static route
    RouteAdd(RouteArgs),
    /// Delete a route
    RouteDelete(RouteArgs),
}

impl Command {
    /// Settles the watched kinds and the limit against the config.
    fn with_config(self, cfg: &WatchConfig) -> Self {
        match self {
            Command::Watch {
                address,
                route,
                limit,
            } => {
                let (address, route) = cfg.kinds(address, route);
                Command::Watch {
                    address,
                    route,
                    limit: limit.or(cfg.limit),
                }
            }
            other => other,
        }
    }
}

/// Route as given on the command line.
#[derive(clap::Args, Debug, PartialEq)]
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
struct RouteArgs {
    /// Destination network
    #[arg(long)]
    dest: Ipv4Addr,
    #[arg(long, default_value = "255.255.255.255")]
    mask: Ipv4Addr,
    /// Next hop
    #[arg(long)]
    gateway: Ipv4Addr,
    /// Interface index, see `ipwatch addresses`
    #[arg(long = "if-index")]
    if_index: u32,
    #[arg(long, default_value_t = 1)]
    metric: u32,
}

#[cfg(target_os = "windows")]
async fn run(command: Command) -> error::Result<()> {
    use iphelper::IpChangeNotify;
    use iphelper::system::SystemApi;
    use log::info;

    match command {
        Command::Watch {
            address,
            route,
            limit,
        } => {
            let notify = IpChangeNotify::new(address, route)?;
            let tally = watch::Tally::new(address, route, limit);
            let seen = watch::run(&notify, tally).await?;
            info!("{} changes seen", seen);
        }
        Command::Routes => tables::print_routes(&*SystemApi::shared()?)?,
        Command::Addresses { sorted } => tables::print_addresses(&*SystemApi::shared()?, sorted)?,
        Command::Adapters => tables::print_adapters(&*SystemApi::shared()?)?,
        Command::RouteAdd(args) => tables::add_route(&*SystemApi::shared()?, &args)?,
        Command::RouteDelete(args) => tables::delete_route(&*SystemApi::shared()?, &args)?,
    }

    Ok(())
}

#[cfg(not(target_os = "windows"))]
async fn run(_command: Command) -> error::Result<()> {
    Err(error::Error::Unsupported("ipwatch"))
}
