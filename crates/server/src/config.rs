// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// NWB conversion workflow server.
#[derive(Debug, Parser)]
#[command(name = "axon", version, about)]
pub struct Config {
    /// Host address to bind to.
    #[arg(long, env = "AXON_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// HTTP port to listen on.
    #[arg(long, env = "AXON_PORT", default_value = "8777")]
    pub port: u16,

    /// Directory for uploaded recordings.
    #[arg(long, env = "AXON_UPLOAD_DIR", default_value = "data/uploads")]
    pub upload_dir: PathBuf,

    /// Directory for NWB outputs and reports.
    #[arg(long, env = "AXON_OUTPUT_DIR", default_value = "data/outputs")]
    pub output_dir: PathBuf,

    /// Base URL of the OpenAI-compatible language-model endpoint.
    #[arg(long, env = "AXON_LLM_BASE_URL", default_value = "https://api.openai.com/v1")]
    pub llm_base_url: String,

    /// Model name for structured-output calls.
    #[arg(long, env = "AXON_LLM_MODEL", default_value = "gpt-4o-mini")]
    pub llm_model: String,

    /// API key for the language-model endpoint.
    #[arg(long, env = "AXON_LLM_API_KEY", hide_env_values = true)]
    pub llm_api_key: Option<String>,

    /// Language-model call deadline in seconds.
    #[arg(long, env = "AXON_LLM_TIMEOUT", default_value = "180")]
    pub llm_timeout: u64,

    /// Converter command (program plus arguments, whitespace-separated).
    /// Receives the conversion request as JSON on stdin.
    #[arg(long, env = "AXON_CONVERTER_CMD")]
    pub converter_cmd: Option<String>,

    /// Converter deadline in seconds.
    #[arg(long, env = "AXON_CONVERTER_TIMEOUT", default_value = "900")]
    pub converter_timeout: u64,

    /// Validator command; the NWB path is appended as the final argument,
    /// and a JSON issue list is read from stdout.
    #[arg(long, env = "AXON_VALIDATOR_CMD")]
    pub validator_cmd: Option<String>,

    /// Validator deadline in seconds.
    #[arg(long, env = "AXON_VALIDATOR_TIMEOUT", default_value = "300")]
    pub validator_timeout: u64,

    /// Log format (json or text).
    #[arg(long, env = "AXON_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "AXON_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.converter_cmd.as_deref().map(str::trim).unwrap_or_default().is_empty() {
            anyhow::bail!("--converter-cmd (or AXON_CONVERTER_CMD) must be specified");
        }
        if self.validator_cmd.as_deref().map(str::trim).unwrap_or_default().is_empty() {
            anyhow::bail!("--validator-cmd (or AXON_VALIDATOR_CMD) must be specified");
        }
        if !matches!(self.log_format.as_str(), "json" | "text") {
            anyhow::bail!("invalid log format: {}", self.log_format);
        }
        Ok(())
    }

    /// Split a command string into program + arguments.
    pub fn split_command(command: &str) -> Vec<String> {
        command.split_whitespace().map(str::to_owned).collect()
    }

    pub fn llm_deadline(&self) -> Duration {
        Duration::from_secs(self.llm_timeout)
    }

    pub fn converter_deadline(&self) -> Duration {
        Duration::from_secs(self.converter_timeout)
    }

    pub fn validator_deadline(&self) -> Duration {
        Duration::from_secs(self.validator_timeout)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
