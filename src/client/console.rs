//! Terminal output shared by the client actors.
use std::{
    io::{self, Write},
    sync::{Arc, Mutex, PoisonError},
};

use log::warn;

use crate::protocol::{Response, ResponseBody};

const PROMPT: &str = "> ";
const SPINNER_FRAMES: [char; 4] = ['|', '/', '-', '\\'];

/// Handle on the output stream. Clones write to the same stream, one call at a
/// time.
#[derive(Clone)]
pub struct Console {
    out: Arc<Mutex<dyn Write + Send>>,
}

impl Console {
    pub fn new(out: Arc<Mutex<dyn Write + Send>>) -> Self {
        Self { out }
    }

    pub fn stdout() -> Self {
        Self::new(Arc::new(Mutex::new(io::stdout())))
    }

    pub fn prompt(&self) {
        self.write(PROMPT);
    }

    pub fn success(&self, response: &Response) {
        let text = match &response.body {
            ResponseBody::Message(message) => format!("{message}\n"),
            ResponseBody::Messages(messages) if messages.is_empty() => {
                "no new messages\n".to_string()
            }
            ResponseBody::Messages(messages) => messages
                .iter()
                .map(|m| format!("{m}\n"))
                .collect::<String>(),
        };
        self.write(&text);
    }

    pub fn failure(&self, reason: impl AsRef<str>) {
        self.write(&format!("error: {}\n", reason.as_ref()));
    }

    /// Draws frame `tick` of the activity indicator over the previous one.
    pub fn spinner(&self, tick: usize) {
        self.write(&format!("\r{}", SPINNER_FRAMES[tick % SPINNER_FRAMES.len()]));
    }

    pub fn clear_spinner(&self) {
        self.write("\r \r");
    }

    fn write(&self, text: &str) {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = out.write_all(text.as_bytes()).and_then(|_| out.flush()) {
            warn!("couldn't write to the console: {e}");
        }
    }
}
