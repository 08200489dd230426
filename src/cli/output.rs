use anyhow::Result;
use clap::ValueEnum;
use serde::Serialize;

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Human,
    Json,
}

impl OutputFormat {
    /// Prints `payload` as JSON, or hands `human` the job of printing lines.
    pub fn emit<T, F>(self, payload: &T, human: F) -> Result<()>
    where
        T: Serialize + ?Sized,
        F: FnOnce(),
    {
        match self {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(payload)?),
            OutputFormat::Human => human(),
        }
        Ok(())
    }
}
