// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Axon: NWB conversion workflow orchestrator.

pub mod bus;
pub mod config;
pub mod converse;
pub mod convert;
pub mod error;
pub mod evaluate;
pub mod events;
pub mod format;
pub mod metadata;
pub mod model;
pub mod policy;
pub mod report;
pub mod session;
pub mod store;
pub mod test_support;
pub mod transport;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::bus::Bus;
use crate::config::Config;
use crate::converse::ConversationAgent;
use crate::convert::{CommandConverter, ConversionAgent, Converter};
use crate::evaluate::{CommandValidator, EvaluationAgent, Validator};
use crate::events::EventBus;
use crate::model::{LanguageModel, OpenAiModel};
use crate::report::{FileReporter, Reporter};
use crate::store::SessionStore;
use crate::transport::{build_router, App};

/// External capabilities the orchestrator consumes.
pub struct Capabilities {
    pub model: Arc<dyn LanguageModel>,
    pub converter: Arc<dyn Converter>,
    pub validator: Arc<dyn Validator>,
    pub reporter: Arc<dyn Reporter>,
}

/// Per-capability call deadlines.
#[derive(Debug, Clone, Copy)]
pub struct Deadlines {
    pub model: Duration,
    pub converter: Duration,
    pub validator: Duration,
}

impl Default for Deadlines {
    fn default() -> Self {
        Self {
            model: Duration::from_secs(180),
            converter: Duration::from_secs(900),
            validator: Duration::from_secs(300),
        }
    }
}

/// Wire the store, bus, and agents into one application value.
///
/// Explicit dependency injection: a long-lived process holds one
/// application, tests construct fresh ones per case.
pub fn assemble(
    caps: Capabilities,
    deadlines: Deadlines,
    upload_dir: PathBuf,
    output_dir: PathBuf,
    shutdown: CancellationToken,
) -> Arc<App> {
    let store = Arc::new(SessionStore::new(EventBus::new()));
    let bus = Bus::new();

    bus.register_conversation(Arc::new(ConversationAgent::new(
        Arc::clone(&store),
        Arc::clone(&caps.model),
        caps.reporter,
        deadlines.model,
    )));
    bus.register_conversion(Arc::new(ConversionAgent::new(
        Arc::clone(&store),
        Arc::clone(&caps.model),
        caps.converter,
        output_dir,
        deadlines.converter,
        deadlines.model,
    )));
    bus.register_evaluation(Arc::new(EvaluationAgent::new(
        Arc::clone(&store),
        caps.model,
        caps.validator,
        deadlines.validator,
        deadlines.model,
    )));

    Arc::new(App {
        store,
        bus,
        upload_dir,
        session_id: uuid::Uuid::new_v4().to_string(),
        shutdown,
    })
}

/// Run the server until shutdown.
pub async fn run(config: Config) -> anyhow::Result<()> {
    config.validate()?;

    tokio::fs::create_dir_all(&config.upload_dir).await?;
    tokio::fs::create_dir_all(&config.output_dir).await?;

    let converter_cmd =
        Config::split_command(config.converter_cmd.as_deref().unwrap_or_default());
    let validator_cmd =
        Config::split_command(config.validator_cmd.as_deref().unwrap_or_default());

    let caps = Capabilities {
        model: Arc::new(OpenAiModel::new(
            config.llm_base_url.clone(),
            config.llm_model.clone(),
            config.llm_api_key.clone(),
            config.llm_deadline(),
        )),
        converter: Arc::new(CommandConverter::new(&converter_cmd)?),
        validator: Arc::new(CommandValidator::new(&validator_cmd)?),
        reporter: Arc::new(FileReporter),
    };
    let deadlines = Deadlines {
        model: config.llm_deadline(),
        converter: config.converter_deadline(),
        validator: config.validator_deadline(),
    };

    let shutdown = CancellationToken::new();
    let app = assemble(
        caps,
        deadlines,
        config.upload_dir.clone(),
        config.output_dir.clone(),
        shutdown.clone(),
    );

    let ctrl_c_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_shutdown.cancel();
        }
    });

    let addr = format!("{}:{}", config.host, config.port);
    info!("axon listening on {addr}");
    let router = build_router(app);
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    Ok(())
}
