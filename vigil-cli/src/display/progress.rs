//! Progress bars for check runs, and a tracing writer that prints through
//! the active bar so log lines never tear it.

use std::io::Write;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// The bar currently owning the terminal, if any.
static ACTIVE_BAR: Mutex<Option<ProgressBar>> = Mutex::new(None);

fn active_bar() -> MutexGuard<'static, Option<ProgressBar>> {
    ACTIVE_BAR.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Prints a line above the active bar, or to stderr when no bar is shown.
pub fn println_above(line: &str) {
    match active_bar().clone() {
        Some(bar) if !bar.is_hidden() => bar.println(line),
        _ => eprintln!("{}", line),
    }
}

/// A bar registered as the tracing output target until dropped.
pub struct RunProgress {
    bar: ProgressBar,
}

impl RunProgress {
    /// Main-pass or second-pass bar over `total` checks.
    pub fn bar(total: usize, prefix: &str) -> Self {
        let bar = ProgressBar::with_draw_target(Some(total as u64), ProgressDrawTarget::stderr());
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} {prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {wide_msg} ETA {eta}")
        {
            bar.set_style(style.progress_chars("█▓░"));
        }
        bar.set_prefix(prefix.to_string());
        bar.enable_steady_tick(Duration::from_millis(200));
        Self::register(bar)
    }

    /// Spinner for a single-domain check.
    pub fn spinner(message: &str) -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
            .template("{spinner:.cyan} {msg}")
        {
            bar.set_style(style);
        }
        bar.set_message(message.to_string());
        bar.enable_steady_tick(Duration::from_millis(80));
        Self::register(bar)
    }

    fn register(bar: ProgressBar) -> Self {
        *active_bar() = Some(bar.clone());
        Self { bar }
    }

    pub fn handle(&self) -> ProgressBar {
        self.bar.clone()
    }
}

impl Drop for RunProgress {
    fn drop(&mut self) {
        self.bar.finish_and_clear();
        let mut guard = active_bar();
        if guard.as_ref().is_some_and(|active| active.is_finished()) {
            *guard = None;
        }
    }
}

/// Line-buffered writer that routes complete lines through [`println_above`].
pub struct ProgressWriter {
    buffer: Vec<u8>,
}

impl ProgressWriter {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    fn emit(line: &[u8]) {
        let text = String::from_utf8_lossy(line);
        let text = text.trim_end();
        if !text.is_empty() {
            println_above(text);
        }
    }
}

impl Default for ProgressWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for ProgressWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            Self::emit(&line);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            Self::emit(&rest);
        }
        Ok(())
    }
}

impl Drop for ProgressWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// `MakeWriter` for the console tracing layer.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProgressWriterFactory;

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for ProgressWriterFactory {
    type Writer = ProgressWriter;

    fn make_writer(&'a self) -> Self::Writer {
        ProgressWriter::new()
    }
}
