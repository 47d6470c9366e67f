use crate::backend::TmuxBackend;
use crate::SupervisorError;
use std::time::Instant;

/// A parsed copy of a session's visible pane.
#[derive(Clone)]
pub struct ScreenSnapshot {
    pub session: String,
    pub screen: vt100::Screen,
    /// (row, col) reported by tmux, falling back to the emulator's cursor.
    pub cursor: (u16, u16),
    pub captured_at: Instant,
    pub truncated: bool,
}

impl ScreenSnapshot {
    pub fn size(&self) -> (u16, u16) {
        self.screen.size()
    }

    /// Plain text rows, trailing blanks trimmed.
    pub fn text_lines(&self) -> Vec<String> {
        let (_, cols) = self.screen.size();
        self.screen
            .rows(0, cols)
            .map(|row| row.trim_end().to_string())
            .collect()
    }
}

impl std::fmt::Debug for ScreenSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScreenSnapshot")
            .field("session", &self.session)
            .field("size", &self.screen.size())
            .field("cursor", &self.cursor)
            .field("truncated", &self.truncated)
            .finish()
    }
}

/// Owned inputs for one capture, runnable off the host loop.
#[derive(Debug, Clone)]
pub struct CaptureJob<B> {
    backend: B,
    pub session: String,
    pub cols: u16,
    pub rows: u16,
    pub max_bytes: usize,
}

impl<B: TmuxBackend> CaptureJob<B> {
    pub fn new(backend: B, session: String, cols: u16, rows: u16, max_bytes: usize) -> Self {
        Self {
            backend,
            session,
            cols,
            rows,
            max_bytes,
        }
    }

    pub fn run(&self) -> Result<ScreenSnapshot, SupervisorError> {
        if self.cols == 0 || self.rows == 0 {
            return Err(SupervisorError::InvalidSize {
                cols: self.cols,
                rows: self.rows,
            });
        }
        let raw = self.backend.capture(&self.session)?;
        let (bytes, truncated) = tail_lines(&raw, self.max_bytes);

        let mut parser = vt100::Parser::new(self.rows, self.cols, 0);
        // capture-pane separates rows with bare newlines.
        let mut normalized = Vec::with_capacity(bytes.len() + bytes.len() / 16);
        let mut lines = bytes.split(|b| *b == b'\n').peekable();
        while let Some(line) = lines.next() {
            normalized.extend_from_slice(line);
            if lines.peek().is_some() {
                normalized.extend_from_slice(b"\r\n");
            }
        }
        parser.process(&normalized);

        let screen = parser.screen().clone();
        let cursor = match self.backend.cursor(&self.session)? {
            Some((x, y)) => (y, x),
            None => screen.cursor_position(),
        };
        Ok(ScreenSnapshot {
            session: self.session.clone(),
            screen,
            cursor,
            captured_at: Instant::now(),
            truncated,
        })
    }
}

/// Keeps at most `max_bytes` from the end, starting on a line boundary so no
/// escape sequence is cut in half.
fn tail_lines(raw: &[u8], max_bytes: usize) -> (&[u8], bool) {
    if max_bytes == 0 || raw.len() <= max_bytes {
        return (raw, false);
    }
    let start = raw.len() - max_bytes;
    let cut = raw[start..]
        .iter()
        .position(|b| *b == b'\n')
        .map(|offset| start + offset + 1)
        .unwrap_or(start);
    (&raw[cut..], true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeTmux;

    #[test]
    fn capture_parses_rows_and_colors() {
        let tmux = FakeTmux::default();
        tmux.insert_session("viewer", 20, 3);
        tmux.set_screen("viewer", b"\x1b[31mred\x1b[0m line\nsecond\n".to_vec());
        let snapshot = CaptureJob::new(tmux, "viewer".to_string(), 20, 3, 4096)
            .run()
            .expect("capture");
        let lines = snapshot.text_lines();
        assert_eq!(lines[0], "red line");
        assert_eq!(lines[1], "second");
        let cell = snapshot.screen.cell(0, 0).expect("cell");
        assert_eq!(cell.fgcolor(), vt100::Color::Idx(1));
        assert!(!snapshot.truncated);
    }

    #[test]
    fn oversized_capture_keeps_the_tail_on_a_line_boundary() {
        let raw = b"first line\nsecond line\nthird\n";
        let (tail, truncated) = tail_lines(raw, 14);
        assert!(truncated);
        assert_eq!(tail, b"third\n");
    }

    #[test]
    fn zero_size_is_rejected() {
        let tmux = FakeTmux::default();
        let job = CaptureJob::new(tmux, "x".to_string(), 0, 10, 1024);
        assert!(matches!(job.run(), Err(SupervisorError::InvalidSize { .. })));
    }
}
