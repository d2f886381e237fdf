use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::commands::{Command, CommandSource};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Reads one key per step from the terminal: ESC (or Ctrl+C) ends the
/// session, any other key advances.
///
/// `shutdown` is shared with the signal handler so a Ctrl+C delivered outside
/// raw mode still ends the session at the next prompt.
pub struct KeyboardCommands {
    shutdown: Arc<AtomicBool>,
}

impl KeyboardCommands {
    pub fn new(shutdown: Arc<AtomicBool>) -> Self {
        Self { shutdown }
    }

    fn wait_for_key(&self) -> eyre::Result<Command> {
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                return Ok(Command::Terminate);
            }
            if !event::poll(POLL_INTERVAL)? {
                continue;
            }
            if let Event::Key(KeyEvent {
                code,
                kind: KeyEventKind::Press,
                modifiers,
                ..
            }) = event::read()?
            {
                return Ok(match code {
                    KeyCode::Esc => Command::Terminate,
                    KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => {
                        Command::Terminate
                    }
                    _ => Command::Advance,
                });
            }
        }
    }
}

impl CommandSource for KeyboardCommands {
    fn next_command(&mut self) -> eyre::Result<Command> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Ok(Command::Terminate);
        }
        info!("Press any key to continue! (or press ESC to quit!)");

        // Raw mode only while waiting, so log output keeps its line breaks.
        enable_raw_mode()?;
        let command = self.wait_for_key();
        disable_raw_mode()?;

        if command.as_ref().is_ok_and(|c| *c == Command::Terminate) {
            self.shutdown.store(true, Ordering::Relaxed);
        }
        command
    }
}
