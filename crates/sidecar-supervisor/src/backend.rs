use crate::SupervisorError;
use std::io;
use std::path::PathBuf;
use std::process::{Command, Output};
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    pub name: String,
    pub cols: u16,
    pub rows: u16,
    pub cwd: PathBuf,
    pub term: String,
    /// Program and arguments, run without a shell.
    pub command: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TmuxSessionInfo {
    pub name: String,
    pub windows: u32,
    pub attached: bool,
    pub created: Option<u64>,
}

/// The tmux operations the supervisor needs. Implemented by the CLI and by
/// an in-memory fake for tests.
pub trait TmuxBackend: Send + Sync {
    fn new_session(&self, spec: &NewSession) -> Result<(), SupervisorError>;
    fn has_session(&self, name: &str) -> Result<bool, SupervisorError>;
    fn kill_session(&self, name: &str) -> Result<(), SupervisorError>;
    fn resize(&self, name: &str, cols: u16, rows: u16) -> Result<(), SupervisorError>;
    fn send_keys(&self, name: &str, keys: &[String], literal: bool) -> Result<(), SupervisorError>;
    /// Visible pane content with escape sequences.
    fn capture(&self, name: &str) -> Result<Vec<u8>, SupervisorError>;
    fn cursor(&self, name: &str) -> Result<Option<(u16, u16)>, SupervisorError>;
    fn list_sessions(&self) -> Result<Vec<TmuxSessionInfo>, SupervisorError>;
}

#[derive(Debug, Clone)]
pub struct TmuxCli {
    program: PathBuf,
}

impl Default for TmuxCli {
    fn default() -> Self {
        Self {
            program: PathBuf::from("tmux"),
        }
    }
}

impl TmuxCli {
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn output(&self, args: &[String]) -> Result<Output, SupervisorError> {
        trace!(args = ?args, "tmux");
        Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|err| match err.kind() {
                io::ErrorKind::NotFound => SupervisorError::TmuxUnavailable,
                _ => SupervisorError::Io(err),
            })
    }

    fn run(&self, args: &[String]) -> Result<Vec<u8>, SupervisorError> {
        let output = self.output(args)?;
        if !output.status.success() {
            return Err(SupervisorError::Tmux {
                command: args.first().cloned().unwrap_or_default(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

fn strings<const N: usize>(args: [&str; N]) -> Vec<String> {
    args.iter().map(|arg| arg.to_string()).collect()
}

impl TmuxBackend for TmuxCli {
    fn new_session(&self, spec: &NewSession) -> Result<(), SupervisorError> {
        let mut args = strings(["new-session", "-d", "-s", &spec.name]);
        args.extend(strings([
            "-x",
            &spec.cols.to_string(),
            "-y",
            &spec.rows.to_string(),
            "-c",
            &*spec.cwd.to_string_lossy(),
            "env",
            &format!("TERM={}", spec.term),
        ]));
        args.extend(spec.command.iter().cloned());
        self.run(&args).map(|_| ())
    }

    fn has_session(&self, name: &str) -> Result<bool, SupervisorError> {
        let output = self.output(&strings(["has-session", "-t", &format!("={name}")]))?;
        Ok(output.status.success())
    }

    fn kill_session(&self, name: &str) -> Result<(), SupervisorError> {
        self.run(&strings(["kill-session", "-t", &format!("={name}")]))
            .map(|_| ())
    }

    fn resize(&self, name: &str, cols: u16, rows: u16) -> Result<(), SupervisorError> {
        self.run(&strings([
            "resize-window",
            "-t",
            name,
            "-x",
            &cols.to_string(),
            "-y",
            &rows.to_string(),
        ]))
        .map(|_| ())
    }

    fn send_keys(&self, name: &str, keys: &[String], literal: bool) -> Result<(), SupervisorError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut args = strings(["send-keys", "-t", name]);
        if literal {
            args.push("-l".to_string());
        }
        args.extend(keys.iter().cloned());
        self.run(&args).map(|_| ())
    }

    fn capture(&self, name: &str) -> Result<Vec<u8>, SupervisorError> {
        self.run(&strings(["capture-pane", "-p", "-e", "-t", name]))
    }

    fn cursor(&self, name: &str) -> Result<Option<(u16, u16)>, SupervisorError> {
        let stdout = self.run(&strings([
            "display-message",
            "-p",
            "-t",
            name,
            "#{cursor_x},#{cursor_y}",
        ]))?;
        Ok(parse_cursor(&String::from_utf8_lossy(&stdout)))
    }

    fn list_sessions(&self) -> Result<Vec<TmuxSessionInfo>, SupervisorError> {
        let output = self.output(&strings([
            "list-sessions",
            "-F",
            "#{session_name}\t#{session_windows}\t#{session_attached}\t#{session_created}",
        ]))?;
        if !output.status.success() {
            // No server running means no sessions.
            return Ok(Vec::new());
        }
        Ok(parse_session_list(&String::from_utf8_lossy(&output.stdout)))
    }
}

pub(crate) fn parse_cursor(raw: &str) -> Option<(u16, u16)> {
    let (x, y) = raw.trim().split_once(',')?;
    Some((x.trim().parse().ok()?, y.trim().parse().ok()?))
}

pub(crate) fn parse_session_list(raw: &str) -> Vec<TmuxSessionInfo> {
    raw.lines()
        .filter_map(|line| {
            let mut fields = line.split('\t');
            let name = fields.next()?.trim();
            if name.is_empty() {
                return None;
            }
            let windows = fields.next().and_then(|v| v.trim().parse().ok()).unwrap_or(1);
            let attached = fields
                .next()
                .and_then(|v| v.trim().parse::<u32>().ok())
                .is_some_and(|count| count > 0);
            let created = fields.next().and_then(|v| v.trim().parse().ok());
            Some(TmuxSessionInfo {
                name: name.to_string(),
                windows,
                attached,
                created,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_list_sessions_format() {
        let sessions = parse_session_list("work\t3\t1\t1700000000\nscratch\t1\t0\t1700000100\n\n");
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].name, "work");
        assert_eq!(sessions[0].windows, 3);
        assert!(sessions[0].attached);
        assert!(!sessions[1].attached);
        assert_eq!(sessions[1].created, Some(1_700_000_100));
    }

    #[test]
    fn parses_cursor_position() {
        assert_eq!(parse_cursor("12,4\n"), Some((12, 4)));
        assert_eq!(parse_cursor("garbage"), None);
    }

    #[test]
    fn missing_binary_is_reported_as_unavailable() {
        let tmux = TmuxCli::with_program("/nonexistent/tmux-binary");
        assert!(matches!(
            tmux.has_session("x"),
            Err(SupervisorError::TmuxUnavailable)
        ));
    }
}
