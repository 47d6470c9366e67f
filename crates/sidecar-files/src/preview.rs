use crate::FileOpError;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

pub const TAB_WIDTH: usize = 8;
pub const MAX_PREVIEW_BYTES: u64 = 2 * 1024 * 1024;
pub const BINARY_SNIFF_BYTES: usize = 8000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewContent {
    /// Tab-expanded lines.
    Text { lines: Vec<String> },
    Binary { size: u64 },
    TooLarge { size: u64 },
    Directory { entries: usize },
    Empty,
}

impl PreviewContent {
    pub fn lines(&self) -> &[String] {
        match self {
            PreviewContent::Text { lines } => lines,
            _ => &[],
        }
    }

    /// One-line text shown instead of content.
    pub fn placeholder(&self) -> Option<String> {
        match self {
            PreviewContent::Text { .. } => None,
            PreviewContent::Binary { size } => Some(format!("binary file ({})", human_size(*size))),
            PreviewContent::TooLarge { size } => {
                Some(format!("file too large to preview ({})", human_size(*size)))
            }
            PreviewContent::Directory { entries } => Some(format!("directory, {entries} entries")),
            PreviewContent::Empty => Some("empty file".to_string()),
        }
    }
}

pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Git's heuristic: a NUL byte in the first few kilobytes.
fn looks_binary(bytes: &[u8]) -> bool {
    bytes[..bytes.len().min(BINARY_SNIFF_BYTES)].contains(&0)
}

pub fn load_preview(path: &Path, max_bytes: u64) -> Result<PreviewContent, FileOpError> {
    let meta = fs::metadata(path).map_err(|err| match err.kind() {
        std::io::ErrorKind::NotFound => FileOpError::NotFound(path.to_path_buf()),
        _ => FileOpError::io(path, err),
    })?;
    if meta.is_dir() {
        let entries = fs::read_dir(path)
            .map_err(|err| FileOpError::io(path, err))?
            .count();
        return Ok(PreviewContent::Directory { entries });
    }
    let size = meta.len();
    if size == 0 {
        return Ok(PreviewContent::Empty);
    }
    if size > max_bytes {
        return Ok(PreviewContent::TooLarge { size });
    }

    let mut bytes = Vec::with_capacity(size as usize);
    File::open(path)
        .and_then(|mut file| file.read_to_end(&mut bytes))
        .map_err(|err| FileOpError::io(path, err))?;
    if looks_binary(&bytes) {
        return Ok(PreviewContent::Binary { size });
    }
    let text = String::from_utf8_lossy(&bytes);
    let lines = text
        .lines()
        .map(|line| expand_tabs(line.strip_suffix('\r').unwrap_or(line), TAB_WIDTH))
        .collect();
    Ok(PreviewContent::Text { lines })
}

/// Replaces tabs with spaces up to the next multiple of `width` columns.
pub fn expand_tabs(line: &str, width: usize) -> String {
    if !line.contains('\t') {
        return line.to_string();
    }
    let width = width.max(1);
    let mut out = String::with_capacity(line.len() + width);
    let mut col = 0;
    for c in line.chars() {
        if c == '\t' {
            let pad = width - col % width;
            out.extend(std::iter::repeat(' ').take(pad));
            col += pad;
        } else {
            out.push(c);
            col += 1;
        }
    }
    out
}

/// Splits one line into chunks of at most `width` chars. An empty line
/// yields one empty chunk.
pub fn wrap_line(line: &str, width: usize) -> Vec<String> {
    if width == 0 {
        return vec![line.to_string()];
    }
    let chars: Vec<char> = line.chars().collect();
    if chars.is_empty() {
        return vec![String::new()];
    }
    chars
        .chunks(width)
        .map(|chunk| chunk.iter().collect())
        .collect()
}
