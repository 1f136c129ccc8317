// src/ui/mod.rs

//! Terminal output plumbing.
//!
//! Workers never write to stdout directly; everything goes through an
//! [`OutputSink`], which serializes writes so concurrent task output can
//! interleave at line granularity but never inside a line. A buffered sink
//! backs grouped log order (flush one task's output as a block) and tests.

use std::io::Write;
use std::sync::{Arc, Mutex};

/// ANSI color codes cycled per package so interleaved prefixes stay
/// readable.
const PREFIX_COLORS: &[&str] = &["36", "33", "35", "32", "34", "91", "93", "95"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrefixStyle {
    /// `pkg:task: ` before every line.
    #[default]
    Task,
    /// No prefix at all (`--log-prefix=none`).
    None,
}

enum SinkTarget {
    Stdout,
    Buffer(Vec<u8>),
}

struct SinkState {
    target: SinkTarget,
    use_color: bool,
}

/// Thread-safe, line-oriented output destination.
#[derive(Clone)]
pub struct OutputSink {
    state: Arc<Mutex<SinkState>>,
    prefix_style: PrefixStyle,
}

impl OutputSink {
    pub fn stdout(use_color: bool, prefix_style: PrefixStyle) -> Self {
        Self {
            state: Arc::new(Mutex::new(SinkState {
                target: SinkTarget::Stdout,
                use_color,
            })),
            prefix_style,
        }
    }

    /// In-memory sink; used for grouped log order and tests.
    pub fn buffered() -> Self {
        Self {
            state: Arc::new(Mutex::new(SinkState {
                target: SinkTarget::Buffer(Vec::new()),
                use_color: false,
            })),
            prefix_style: PrefixStyle::Task,
        }
    }

    pub fn with_prefix_style(mut self, style: PrefixStyle) -> Self {
        self.prefix_style = style;
        self
    }

    /// Write one line of task output, prefixed per the configured style.
    pub fn task_line(&self, label: &str, line: &str) {
        match self.prefix_style {
            PrefixStyle::None => self.line(line),
            PrefixStyle::Task => {
                let state = self.state.lock().unwrap();
                let rendered = if state.use_color {
                    let color = color_for(label);
                    format!("\x1b[{color}m{label}:\x1b[0m {line}\n")
                } else {
                    format!("{label}: {line}\n")
                };
                Self::write(state, rendered.as_bytes());
            }
        }
    }

    /// Write one unprefixed line.
    pub fn line(&self, line: &str) {
        let state = self.state.lock().unwrap();
        Self::write(state, format!("{line}\n").as_bytes());
    }

    fn write(mut state: std::sync::MutexGuard<'_, SinkState>, bytes: &[u8]) {
        match &mut state.target {
            SinkTarget::Stdout => {
                let stdout = std::io::stdout();
                let mut lock = stdout.lock();
                let _ = lock.write_all(bytes);
                let _ = lock.flush();
            }
            SinkTarget::Buffer(buffer) => buffer.extend_from_slice(bytes),
        }
    }

    /// Contents of a buffered sink.
    pub fn buffered_contents(&self) -> String {
        let state = self.state.lock().unwrap();
        match &state.target {
            SinkTarget::Buffer(buffer) => String::from_utf8_lossy(buffer).into_owned(),
            SinkTarget::Stdout => String::new(),
        }
    }

    /// Flush a buffered sink's contents into another sink as one block.
    pub fn flush_into(&self, other: &OutputSink) {
        let contents = self.buffered_contents();
        if contents.is_empty() {
            return;
        }
        let state = other.state.lock().unwrap();
        Self::write(state, contents.as_bytes());
    }
}

/// Stable color assignment by label.
fn color_for(label: &str) -> &'static str {
    let mut sum: usize = 0;
    for byte in label.bytes() {
        sum = sum.wrapping_add(byte as usize);
    }
    PREFIX_COLORS[sum % PREFIX_COLORS.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_lines_are_prefixed() {
        let sink = OutputSink::buffered();
        sink.task_line("web:build", "hello");
        assert_eq!(sink.buffered_contents(), "web:build: hello\n");
    }

    #[test]
    fn prefix_none_drops_the_label() {
        let sink = OutputSink::buffered().with_prefix_style(PrefixStyle::None);
        sink.task_line("web:build", "hello");
        assert_eq!(sink.buffered_contents(), "hello\n");
    }

    #[test]
    fn flush_into_moves_blocks() {
        let group = OutputSink::buffered();
        group.task_line("web:build", "one");
        group.task_line("web:build", "two");

        let target = OutputSink::buffered();
        group.flush_into(&target);
        assert_eq!(target.buffered_contents(), "web:build: one\nweb:build: two\n");
    }

    #[test]
    fn color_assignment_is_stable() {
        assert_eq!(color_for("web:build"), color_for("web:build"));
    }
}
