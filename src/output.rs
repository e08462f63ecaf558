use std::io::{self, Write};
use std::time::Duration;

use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::app::{Confirmer, ProgressEvent, ProgressSink};
use crate::error::CometxError;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, event: ProgressEvent) {
        tracing::debug!(message = %event.message, "progress");
    }
}

pub struct ConsoleSink {
    spinner: ProgressBar,
}

impl ConsoleSink {
    pub fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
            spinner.set_style(style);
        }
        spinner.enable_steady_tick(Duration::from_millis(120));
        Self { spinner }
    }

    pub fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for ConsoleSink {
    fn event(&self, event: ProgressEvent) {
        let message = event
            .message
            .split_once("; ")
            .map(|(_, detail)| detail.to_string())
            .unwrap_or(event.message);
        match event.elapsed {
            Some(elapsed) => self
                .spinner
                .set_message(format!("{message} in {:.1}s", elapsed.as_secs_f64())),
            None => self.spinner.set_message(message),
        }
    }
}

impl Confirmer for ConsoleSink {
    fn confirm(&self, prompt: &str) -> Result<bool, CometxError> {
        self.spinner.suspend(|| {
            Confirm::new()
                .with_prompt(prompt)
                .default(false)
                .interact()
                .map_err(|err| CometxError::Filesystem(err.to_string()))
        })
    }
}
