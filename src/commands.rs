use ::std::collections::VecDeque;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Run the next motion step.
    Advance,
    /// End the session.
    Terminate,
}

/// Where the control loop gets its go/stop signal from between steps.
pub trait CommandSource {
    /// Blocks until the next command is available.
    fn next_command(&mut self) -> eyre::Result<Command>;
}

/// A fixed sequence of commands; terminates once exhausted.
#[derive(Clone, Debug, Default)]
pub struct ScriptedCommands {
    commands: VecDeque<Command>,
}

impl ScriptedCommands {
    pub fn new(commands: impl IntoIterator<Item = Command>) -> Self {
        Self {
            commands: commands.into_iter().collect(),
        }
    }

    /// `steps` advances followed by a terminate.
    pub fn advance(steps: usize) -> Self {
        Self::new(
            ::std::iter::repeat(Command::Advance)
                .take(steps)
                .chain([Command::Terminate]),
        )
    }
}

impl CommandSource for ScriptedCommands {
    fn next_command(&mut self) -> eyre::Result<Command> {
        Ok(self.commands.pop_front().unwrap_or(Command::Terminate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_terminates_when_exhausted() {
        let mut commands = ScriptedCommands::advance(2);
        let drawn: Vec<Command> = (0..4).map(|_| commands.next_command().unwrap()).collect();
        assert_eq!(
            drawn,
            vec![
                Command::Advance,
                Command::Advance,
                Command::Terminate,
                Command::Terminate
            ]
        );
    }
}
