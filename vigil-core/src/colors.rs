//! Terminal palette for check output.
//!
//! Standard ANSI bright colors only, so output stays readable on any terminal
//! theme. Each color is named for what it marks rather than its hue.

use colored::{ColoredString, Colorize};

pub trait StatusPalette {
    /// Online results, valid certificates
    fn good(&self) -> ColoredString;
    /// Offline results, invalid or expiring certificates
    fn bad(&self) -> ColoredString;
    /// Redirects, retries, soon-to-expire data
    fn caution(&self) -> ColoredString;
    /// Lane demotions
    fn demoted(&self) -> ColoredString;
    /// Ramp changes and section headings
    fn accent(&self) -> ColoredString;
    fn label(&self) -> ColoredString;
    fn value(&self) -> ColoredString;
    /// Timestamps, separators, secondary detail
    fn muted(&self) -> ColoredString;
}

impl<S: AsRef<str>> StatusPalette for S {
    fn good(&self) -> ColoredString {
        self.as_ref().bright_green()
    }

    fn bad(&self) -> ColoredString {
        self.as_ref().bright_red()
    }

    fn caution(&self) -> ColoredString {
        self.as_ref().bright_yellow()
    }

    fn demoted(&self) -> ColoredString {
        self.as_ref().bright_magenta()
    }

    fn accent(&self) -> ColoredString {
        self.as_ref().bright_purple()
    }

    fn label(&self) -> ColoredString {
        self.as_ref().bright_cyan()
    }

    fn value(&self) -> ColoredString {
        self.as_ref().bright_white()
    }

    fn muted(&self) -> ColoredString {
        self.as_ref().bright_black()
    }
}
