use anyhow::{Context, Result};
use handsign::OperatorCommand;
use std::io::BufRead;

/// The operator control surface, polled once per capture cycle.
pub trait OperatorInput {
    /// The command entered this cycle, `None` if the operator did nothing.
    fn poll(&mut self) -> Result<Option<OperatorCommand>>;
}

/// Reads one command per line: `c` or a space captures, `n` skips to the
/// next letter, `q` finishes. An empty line lets the cycle pass. End of input
/// finishes the session.
pub struct LineInput<R> {
    reader: R,
    buf: String,
}

impl<R: BufRead> LineInput<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: String::new(),
        }
    }
}

impl<R: BufRead> OperatorInput for LineInput<R> {
    fn poll(&mut self) -> Result<Option<OperatorCommand>> {
        self.buf.clear();
        let read = self
            .reader
            .read_line(&mut self.buf)
            .context("Failed to read operator input")?;
        if read == 0 {
            return Ok(Some(OperatorCommand::Finish));
        }
        let line = self.buf.trim_end_matches(['\r', '\n']);
        Ok(parse_command(line))
    }
}

fn parse_command(line: &str) -> Option<OperatorCommand> {
    if line == " " {
        return Some(OperatorCommand::Capture);
    }
    match line.trim().to_ascii_lowercase().as_str() {
        "c" => Some(OperatorCommand::Capture),
        "n" => Some(OperatorCommand::Advance),
        "q" => Some(OperatorCommand::Finish),
        "" => None,
        other => {
            tracing::warn!("Unknown command {:?}; use c, n or q", other);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_commands_are_parsed_per_line() {
        let mut input = LineInput::new(Cursor::new("c\n \nN\n\nx\nq\n"));
        let mut commands = Vec::new();
        for _ in 0..6 {
            commands.push(input.poll().unwrap());
        }
        assert_eq!(
            commands,
            vec![
                Some(OperatorCommand::Capture),
                Some(OperatorCommand::Capture),
                Some(OperatorCommand::Advance),
                None,
                None,
                Some(OperatorCommand::Finish),
            ]
        );
    }

    #[test]
    fn test_end_of_input_finishes() {
        let mut input = LineInput::new(Cursor::new("c"));
        assert_eq!(input.poll().unwrap(), Some(OperatorCommand::Capture));
        assert_eq!(input.poll().unwrap(), Some(OperatorCommand::Finish));
    }
}
