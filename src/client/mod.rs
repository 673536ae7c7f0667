//! Chat client.
//!
//! Three actors, each on its own thread, talking only through channels:
//!
//! - [`InputCapture`] reads blocks of console input,
//! - [`Session`] turns each block into a request and reports the outcome,
//! - [`Connector`] performs the network round trip.
//!
//! Input capture sends an [`InputMessage`] and then waits for an [`InputResponse`],
//! which the session only sends once the cycle is over, so a single block is ever
//! in flight.
mod connector;
mod console;
mod input;
mod message;
mod queue;
mod session;

use std::{
    io::{self, Read},
    sync::mpsc,
    thread,
};

use log::{error, info};

use crate::config::ClientConfig;

pub use connector::Connector;
pub use console::Console;
pub use input::InputCapture;
pub use message::{Command, InputMessage, InputResponse, ServerMessage, UIMessage};
pub use queue::{Consumer, Producer, QueueStats, queue};
pub use session::Session;

/// Runs the client over `input` until it ends or the user quits.
pub fn run<R>(config: ClientConfig, input: R, console: Console) -> io::Result<()>
where
    R: Read + Send + 'static,
{
    let (to_session, from_input) = queue();
    let (to_input, from_session) = queue();
    let (to_connector, connector_inbox) = mpsc::channel();
    let (connector_outbox, from_connector) = mpsc::channel();

    info!("chatting with {}", config.address);
    let connector = Connector::new(config.clone(), connector_inbox, connector_outbox);
    let connector = thread::Builder::new()
        .name("connector".to_string())
        .spawn(move || connector.run())?;

    let capture = InputCapture::new(input, console.clone(), to_session, from_session);
    let capture = thread::Builder::new()
        .name("input".to_string())
        .spawn(move || capture.run())?;

    Session::new(
        config,
        console,
        (from_input, to_input),
        (to_connector, from_connector),
    )
    .run();

    for (name, handle) in [("input", capture), ("connector", connector)] {
        if handle.join().is_err() {
            error!("{name} thread panicked");
        }
    }
    info!("client stopped");
    Ok(())
}
