use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc::{Receiver, RecvTimeoutError, Sender},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use log::{debug, info, warn};

use crate::{
    config::ClientConfig,
    protocol::{Response, ResponseBody},
};

use super::{
    console::Console,
    message::{Command, InputMessage, InputResponse, ServerMessage, UIMessage},
    queue::{Consumer, Producer},
};

/// Drives one request/response cycle per input block.
///
/// Every block is turned into a request for the connector and the reply is
/// awaited for at most `reply_timeout`. Whatever the outcome, input capture is
/// only acknowledged once the cycle is over.
pub struct Session {
    config: ClientConfig,
    console: Console,
    from_input: Consumer<InputMessage>,
    to_input: Producer<InputResponse>,
    to_connector: Sender<ServerMessage>,
    from_connector: Receiver<UIMessage>,
    cycle: u64,
}

impl Session {
    pub fn new(
        config: ClientConfig,
        console: Console,
        (from_input, to_input): (Consumer<InputMessage>, Producer<InputResponse>),
        (to_connector, from_connector): (Sender<ServerMessage>, Receiver<UIMessage>),
    ) -> Self {
        Self {
            config,
            console,
            from_input,
            to_input,
            to_connector,
            from_connector,
            cycle: 0,
        }
    }

    /// Runs until input capture stops.
    pub fn run(mut self) {
        if !self.acknowledge() {
            return;
        }

        loop {
            match self.from_input.recv_timeout(self.config.poll_interval) {
                Ok(input) => {
                    self.handle(input);
                    if !self.acknowledge() {
                        return;
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    info!("input closed, ending session");
                    return;
                }
            }
        }
    }

    fn acknowledge(&self) -> bool {
        let sent = self.to_input.send(InputResponse).is_ok();
        if !sent {
            debug!("input capture stopped");
        }
        sent
    }

    fn handle(&mut self, input: InputMessage) {
        // Input capture stops on quit itself.
        let Some(command) = Command::parse(&input.block).filter(|c| *c != Command::Quit) else {
            return;
        };
        let request = match command.to_request() {
            Ok(request) => request,
            Err(e) => {
                self.console.failure(format!("can't send {command}: {e}"));
                return;
            }
        };

        self.cycle += 1;
        let cycle = self.cycle;
        debug!("cycle {cycle}: sending {request}");
        if self.to_connector.send(ServerMessage { cycle, request }).is_err() {
            self.console.failure("connection handler stopped");
            return;
        }

        let spinner = Spinner::start(self.console.clone(), self.config.spinner_interval);
        let outcome = self.await_reply(cycle);
        spinner.stop();

        match outcome {
            Ok(response) if response.is_ok() => self.console.success(&response),
            Ok(Response {
                body: ResponseBody::Message(reason),
                ..
            }) => self.console.failure(reason),
            Ok(response) => self.console.failure(format!("unexpected reply {response}")),
            Err(reason) => self.console.failure(reason),
        }
    }

    /// Waits for the reply to `cycle`, dropping late replies to earlier ones.
    fn await_reply(&self, cycle: u64) -> Result<Response, String> {
        let deadline = Instant::now() + self.config.reply_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.from_connector.recv_timeout(remaining) {
                Ok(reply) if reply.cycle == cycle => return Ok(reply.response),
                Ok(reply) => debug!("discarding stale reply to cycle {}", reply.cycle),
                Err(RecvTimeoutError::Timeout) => {
                    warn!("cycle {cycle}: no reply in {:?}", self.config.reply_timeout);
                    return Err(format!(
                        "no reply from the server in {:?}",
                        self.config.reply_timeout
                    ));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err("connection handler stopped".to_string());
                }
            }
        }
    }
}

/// Activity indicator redrawn until stopped.
struct Spinner {
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    console: Console,
}

impl Spinner {
    fn start(console: Console, interval: Duration) -> Self {
        let cancel = Arc::new(AtomicBool::new(false));
        let handle = {
            let (cancel, console) = (Arc::clone(&cancel), console.clone());
            thread::Builder::new()
                .name("spinner".to_string())
                .spawn(move || {
                    let mut tick = 0;
                    while !cancel.load(Ordering::SeqCst) {
                        console.spinner(tick);
                        tick += 1;
                        thread::sleep(interval);
                    }
                })
        };

        let handle = handle
            .inspect_err(|e| warn!("couldn't start the activity indicator: {e}"))
            .ok();
        Self {
            cancel,
            handle,
            console,
        }
    }

    fn stop(mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("activity indicator panicked");
            }
            self.console.clear_spinner();
        }
    }
}
