//! Terminal output for the binaries: timed stages and a live status line.
//! Spinners only on a TTY; plain `eprintln!` lines otherwise.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

impl UiMode {
    pub fn parse(flag: Option<&str>) -> Self {
        match flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool) -> Self {
        Self { mode, is_tty }
    }

    /// `NO_COLOR` or `FACEMARK_PLAIN` turn auto mode plain.
    pub fn from_env(flag: Option<&str>) -> Self {
        use std::io::IsTerminal;

        let mut mode = UiMode::parse(flag);
        let plain_env =
            std::env::var_os("NO_COLOR").is_some() || std::env::var_os("FACEMARK_PLAIN").is_some();
        if mode == UiMode::Auto && plain_env {
            mode = UiMode::Plain;
        }
        Self::new(mode, std::io::stderr().is_terminal())
    }

    fn pretty(&self) -> bool {
        self.is_tty && self.mode != UiMode::Plain
    }

    fn spinner(template: &str) -> ProgressBar {
        let spinner = ProgressBar::new_spinner();
        spinner.set_draw_target(ProgressDrawTarget::stderr());
        spinner.enable_steady_tick(Duration::from_millis(120));
        let style = ProgressStyle::with_template(template)
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        spinner.set_style(style);
        spinner
    }

    /// Announce a stage; completion and duration are printed when the guard drops.
    pub fn stage(&self, name: &str) -> StageGuard {
        if self.pretty() {
            let spinner = Self::spinner("{spinner} {msg}");
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }

    /// Single line redrawn in place. Plain mode prints at most once per
    /// `plain_every`.
    pub fn status_line(&self, plain_every: Duration) -> StatusLine {
        let spinner = self
            .pretty()
            .then(|| Self::spinner("{spinner} [{elapsed}] {msg}"));
        StatusLine {
            spinner,
            plain_every,
            last_plain: None,
        }
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let message = format!("✔ {} ({})", self.name, format_duration(self.start.elapsed()));
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

pub struct StatusLine {
    spinner: Option<ProgressBar>,
    plain_every: Duration,
    last_plain: Option<Instant>,
}

impl StatusLine {
    pub fn update(&mut self, message: &str) {
        if let Some(spinner) = &self.spinner {
            spinner.set_message(message.to_string());
            return;
        }
        let due = self
            .last_plain
            .map_or(true, |last| last.elapsed() >= self.plain_every);
        if due {
            eprintln!("{message}");
            self.last_plain = Some(Instant::now());
        }
    }

    pub fn finish(&mut self, message: &str) {
        match self.spinner.take() {
            Some(spinner) => spinner.finish_with_message(message.to_string()),
            None => eprintln!("{message}"),
        }
    }
}

pub fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
