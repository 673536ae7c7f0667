use std::{error::Error, io, net::SocketAddr};

use clap::Parser;
use parley::{ClientConfig, client::Console, config::default_address};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Chat server address
    #[arg(long, default_value_t = default_address())]
    address: SocketAddr,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    println!("type a message, ':fetch [lastId]' to read messages, ':quit' to leave");
    parley::client::run(ClientConfig::new(cli.address), io::stdin(), Console::stdout())?;
    Ok(())
}
