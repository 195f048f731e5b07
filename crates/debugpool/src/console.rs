//! Relaying stdin lines to a debugger session.

use std::io::{BufRead, Write};

use tracing::debug;

use debugpool_core::Error;
use debugpool_session::commands::RUN;
use debugpool_session::{Session, SessionState};

/// Feed each input line to `session`, printing replies to `out`.
///
/// A running target is interrupted before the next line is handled. A line
/// mentioning `run` lets the target run; other lines are passed through as
/// debugger commands. At end of input the session is ended.
pub fn interact(
    session: &mut Session,
    input: impl BufRead,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    writeln!(out, "debugger on {}", session.device())?;
    out.flush()?;

    for line in input.lines() {
        let line = line?;
        if session.state() == SessionState::Running {
            writeln!(out, "interrupting target first")?;
            write!(out, "{}", session.interrupt()?)?;
        }

        let command = line.trim();
        if command.contains(RUN) {
            write!(out, "{}", session.run_continue()?)?;
            writeln!(out, "target running")?;
        } else if command.is_empty() {
            writeln!(out, "no command: {line:?}")?;
        } else {
            match session.run_command(command) {
                Ok(reply) => write!(out, "{reply}")?,
                Err(e @ (Error::CommandNotAllowed(_) | Error::InvalidInput(_))) => {
                    writeln!(out, "refused: {e}")?
                }
                Err(e) => return Err(e.into()),
            }
        }
        out.flush()?;
    }

    debug!("End of input, closing session on {}", session.device());
    if session.state() == SessionState::Running {
        write!(out, "{}", session.interrupt()?)?;
    }
    session.end()?;
    Ok(())
}
