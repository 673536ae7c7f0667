use std::io::{self, BufRead, BufReader, Read};

use log::{debug, info, warn};

use super::{
    console::Console,
    message::{InputMessage, InputResponse, QUIT},
    queue::{Consumer, Producer},
};

/// Reads console input one block at a time.
///
/// A block is every line already available when the first one arrives, so text
/// pasted as a whole is sent as one message. Before reading a block the capture
/// waits for the session to acknowledge the previous one, which keeps at most one
/// block in flight.
pub struct InputCapture<R: Read> {
    reader: BufReader<R>,
    console: Console,
    to_session: Producer<InputMessage>,
    from_session: Consumer<InputResponse>,
}

impl<R: Read> InputCapture<R> {
    pub fn new(
        input: R,
        console: Console,
        to_session: Producer<InputMessage>,
        from_session: Consumer<InputResponse>,
    ) -> Self {
        Self {
            reader: BufReader::new(input),
            console,
            to_session,
            from_session,
        }
    }

    /// Runs until end of input, `:quit`, or the session going away. Dropping the
    /// capture afterwards tells the session to stop.
    pub fn run(mut self) {
        loop {
            if self.from_session.recv().is_err() {
                debug!("session stopped, no more input");
                return;
            }

            let block = loop {
                self.console.prompt();
                match self.read_block() {
                    Ok(Some(block)) if block.trim().is_empty() => continue,
                    Ok(Some(block)) => break block,
                    Ok(None) => {
                        info!("end of input");
                        return;
                    }
                    Err(e) => {
                        warn!("couldn't read input: {e}");
                        return;
                    }
                }
            };

            if block.trim() == QUIT {
                info!("quit requested");
                return;
            }
            if self.to_session.send(InputMessage { block }).is_err() {
                debug!("session stopped, dropping input");
                return;
            }
        }
    }

    /// Reads one line, then keeps reading while more input is already buffered.
    /// `None` at end of input.
    fn read_block(&mut self) -> io::Result<Option<String>> {
        let mut block = String::new();
        loop {
            if self.reader.read_line(&mut block)? == 0 {
                break;
            }
            if self.reader.buffer().is_empty() {
                break;
            }
        }

        Ok((!block.is_empty()).then_some(block))
    }
}
