use std::{error::Error, net::SocketAddr, path::PathBuf, sync::Arc};

use clap::Parser;
use log::{info, warn};
use parley::{ChatServer, ServerConfig, config::default_address};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Listen for new connections at address
    #[arg(long, default_value_t = default_address())]
    address: SocketAddr,
    /// Directory for `chat.log` and `requests.log`
    #[arg(long, default_value = ".")]
    dir: PathBuf,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    if !cli.dir.is_dir() {
        return Err(format!("'{}' is not a directory", cli.dir.display()).into());
    }

    let server = Arc::new(ChatServer::new(ServerConfig::new(cli.address, cli.dir)));
    let address = server.start()?;
    println!("listening at {address}, press Ctrl-C to stop");

    let handle = Arc::clone(&server);
    if let Err(e) = ctrlc::set_handler(move || {
        info!("interrupted");
        handle.close();
    }) {
        warn!("couldn't install the Ctrl-C handler: {e}");
    }

    server.wait_until_stopped()?;
    Ok(())
}
