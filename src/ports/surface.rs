use crate::error::AppError;
use std::sync::Mutex;

/// The rendering/input widget bound to one PTY. Implemented by the
/// presentation layer; the engine only reads text and writes status lines.
pub trait TerminalSurface: Send + Sync {
    /// Render bytes on screen as if the child had printed them.
    fn feed_text(&self, bytes: &[u8]);

    /// Send bytes to the child process as keyboard input.
    fn feed_child(&self, bytes: &[u8]) -> Result<(), AppError>;

    /// `(column, row)` of the cursor.
    fn cursor_position(&self) -> (usize, usize);

    fn text_range(&self, start_row: usize, start_col: usize, end_row: usize, end_col: usize) -> Option<String>;

    fn row_count(&self) -> usize;

    fn column_count(&self) -> usize;

    fn current_directory_uri(&self) -> Option<String>;

    /// False once the widget is unrealized or orphaned from its container.
    fn is_attached(&self) -> bool {
        true
    }
}

/// Text of the last `lines` rows of the surface.
pub fn tail_text(surface: &dyn TerminalSurface, lines: usize) -> Option<String> {
    let rows = surface.row_count();
    if rows == 0 || lines == 0 {
        return None;
    }
    let start_row = rows.saturating_sub(lines);
    let end_col = surface.column_count().saturating_sub(1);
    surface.text_range(start_row, 0, rows - 1, end_col)
}

/// Text of the row the cursor sits on.
pub fn cursor_line(surface: &dyn TerminalSurface) -> Option<String> {
    let (_, row) = surface.cursor_position();
    surface.text_range(row, 0, row, surface.column_count())
}

#[derive(Debug, Default)]
struct BufferState {
    lines: Vec<String>,
    child_input: Vec<u8>,
    directory_uri: Option<String>,
    detached: bool,
}

/// In-memory surface: a growing list of rows with the cursor on the last
/// one. Used by the headless binary and by tests.
#[derive(Debug)]
pub struct BufferSurface {
    columns: usize,
    state: Mutex<BufferState>,
}

impl BufferSurface {
    pub fn new(columns: usize) -> Self {
        Self {
            columns,
            state: Mutex::new(BufferState {
                lines: vec![String::new()],
                ..Default::default()
            }),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut BufferState) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    /// Append text as screen output, honoring `\n` and dropping `\r`.
    pub fn write_output(&self, text: &str) {
        self.with_state(|state| {
            for (index, segment) in text.split('\n').enumerate() {
                if index > 0 {
                    state.lines.push(String::new());
                }
                let cleaned: String = segment.chars().filter(|c| *c != '\r').collect();
                if let Some(last) = state.lines.last_mut() {
                    last.push_str(&cleaned);
                }
            }
        });
    }

    pub fn set_directory_uri(&self, uri: Option<&str>) {
        self.with_state(|state| state.directory_uri = uri.map(str::to_string));
    }

    pub fn detach(&self) {
        self.with_state(|state| state.detached = true);
    }

    pub fn screen_text(&self) -> String {
        self.with_state(|state| state.lines.join("\n"))
    }

    /// Everything written to the child so far, lossily decoded.
    pub fn child_input(&self) -> String {
        self.with_state(|state| String::from_utf8_lossy(&state.child_input).into_owned())
    }
}

impl TerminalSurface for BufferSurface {
    fn feed_text(&self, bytes: &[u8]) {
        self.write_output(&String::from_utf8_lossy(bytes));
    }

    fn feed_child(&self, bytes: &[u8]) -> Result<(), AppError> {
        self.with_state(|state| {
            if state.detached {
                return Err(AppError::ProcessError("surface is detached".to_string()));
            }
            state.child_input.extend_from_slice(bytes);
            Ok(())
        })
    }

    fn cursor_position(&self) -> (usize, usize) {
        self.with_state(|state| {
            let row = state.lines.len().saturating_sub(1);
            let col = state.lines.last().map(|l| l.chars().count()).unwrap_or(0);
            (col, row)
        })
    }

    fn text_range(&self, start_row: usize, start_col: usize, end_row: usize, end_col: usize) -> Option<String> {
        self.with_state(|state| {
            if start_row >= state.lines.len() || start_row > end_row {
                return None;
            }
            let last_row = end_row.min(state.lines.len() - 1);
            let rows: Vec<String> = (start_row..=last_row)
                .map(|row| {
                    let line = &state.lines[row];
                    let from = if row == start_row { start_col } else { 0 };
                    let to = if row == end_row { end_col.saturating_add(1) } else { usize::MAX };
                    line.chars().skip(from).take(to.saturating_sub(from)).collect()
                })
                .collect();
            Some(rows.join("\n"))
        })
    }

    fn row_count(&self) -> usize {
        self.with_state(|state| state.lines.len())
    }

    fn column_count(&self) -> usize {
        self.columns
    }

    fn current_directory_uri(&self) -> Option<String> {
        self.with_state(|state| state.directory_uri.clone())
    }

    fn is_attached(&self) -> bool {
        self.with_state(|state| !state.detached)
    }
}
