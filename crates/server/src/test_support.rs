// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: builders, capability mocks, and helpers.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::convert::{ConvertRequest, Converter};
use crate::evaluate::Validator;
use crate::model::ScriptedModel;
use crate::report::FileReporter;
use crate::session::{ConversionStatus, MetadataMap, Session, ValidationIssue};
use crate::store::Expect;
use crate::transport::App;
use crate::{assemble, Capabilities, Deadlines};

/// Converter double: writes a small deterministic file, or fails with a
/// scripted error.  Captures every request for inspection.
#[derive(Default)]
pub struct MockConverter {
    failures: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<ConvertRequest>>,
}

impl MockConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `convert` call fails with this message.
    pub fn fail_next(&self, message: impl Into<String>) {
        self.failures.lock().push_back(message.into());
    }

    pub fn requests(&self) -> Vec<ConvertRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Converter for MockConverter {
    async fn convert(&self, req: ConvertRequest) -> anyhow::Result<()> {
        self.requests.lock().push(req.clone());
        if let Some(message) = self.failures.lock().pop_front() {
            anyhow::bail!(message);
        }
        let body = serde_json::json!({
            "format": req.format,
            "metadata": req.metadata,
            "parameters": req.parameters,
        });
        tokio::fs::write(&req.output_path, serde_json::to_vec(&body)?).await?;
        Ok(())
    }
}

/// Validator double: pops the next scripted issue list per call; an empty
/// queue validates clean.  `fail_next` simulates a validator crash.
#[derive(Default)]
pub struct MockValidator {
    scripts: Mutex<VecDeque<Result<Vec<ValidationIssue>, String>>>,
    calls: Mutex<Vec<PathBuf>>,
}

impl MockValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_issues(&self, issues: Vec<ValidationIssue>) {
        self.scripts.lock().push_back(Ok(issues));
    }

    pub fn fail_next(&self, message: impl Into<String>) {
        self.scripts.lock().push_back(Err(message.into()));
    }

    pub fn calls(&self) -> Vec<PathBuf> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Validator for MockValidator {
    async fn validate(&self, path: &std::path::Path) -> anyhow::Result<Vec<ValidationIssue>> {
        self.calls.lock().push(path.to_path_buf());
        match self.scripts.lock().pop_front() {
            Some(Ok(issues)) => Ok(issues),
            Some(Err(message)) => Err(anyhow::anyhow!(message)),
            None => Ok(vec![]),
        }
    }
}

/// Test-only handle bundling the application with its capability doubles.
pub struct AppCtx {
    pub app: Arc<App>,
    pub model: Arc<ScriptedModel>,
    pub converter: Arc<MockConverter>,
    pub validator: Arc<MockValidator>,
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    _tmp: Option<tempfile::TempDir>,
}

/// Builder for constructing an application in tests with fresh mocks and
/// a throwaway data directory.
pub struct AppBuilder {
    model: Arc<ScriptedModel>,
    converter: Arc<MockConverter>,
    validator: Arc<MockValidator>,
    deadlines: Deadlines,
    dirs: Option<(PathBuf, PathBuf)>,
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            model: Arc::new(ScriptedModel::new()),
            converter: Arc::new(MockConverter::new()),
            validator: Arc::new(MockValidator::new()),
            deadlines: Deadlines {
                model: Duration::from_secs(5),
                converter: Duration::from_secs(5),
                validator: Duration::from_secs(5),
            },
            dirs: None,
        }
    }

    pub fn deadlines(mut self, deadlines: Deadlines) -> Self {
        self.deadlines = deadlines;
        self
    }

    pub fn dirs(mut self, upload_dir: PathBuf, output_dir: PathBuf) -> Self {
        self.dirs = Some((upload_dir, output_dir));
        self
    }

    pub fn build(self) -> AppCtx {
        let (tmp, upload_dir, output_dir) = match self.dirs {
            Some((upload, output)) => (None, upload, output),
            None => {
                // OK to panic in test-only code — infra setup failure is fatal.
                #[allow(clippy::expect_used)]
                let tmp = tempfile::tempdir().expect("create tempdir");
                let upload = tmp.path().join("uploads");
                let output = tmp.path().join("outputs");
                #[allow(clippy::expect_used)]
                {
                    std::fs::create_dir_all(&upload).expect("create upload dir");
                    std::fs::create_dir_all(&output).expect("create output dir");
                }
                (Some(tmp), upload, output)
            }
        };

        let model: Arc<dyn crate::model::LanguageModel> = Arc::clone(&self.model) as Arc<dyn crate::model::LanguageModel>;
        let converter: Arc<dyn Converter> = Arc::clone(&self.converter) as Arc<dyn Converter>;
        let validator: Arc<dyn Validator> = Arc::clone(&self.validator) as Arc<dyn Validator>;
        let caps = Capabilities {
            model,
            converter,
            validator,
            reporter: Arc::new(FileReporter),
        };
        let app = assemble(
            caps,
            self.deadlines,
            upload_dir.clone(),
            output_dir.clone(),
            CancellationToken::new(),
        );

        AppCtx {
            app,
            model: self.model,
            converter: self.converter,
            validator: self.validator,
            upload_dir,
            output_dir,
            _tmp: tmp,
        }
    }
}

impl AppCtx {
    /// Write an input file and park the session at `uploaded`, the way a
    /// completed `/api/upload` would.
    pub async fn seed_upload(&self, filename: &str, bytes: &[u8], auto: MetadataMap) -> PathBuf {
        let path = self.upload_dir.join(filename);
        #[allow(clippy::expect_used)]
        tokio::fs::write(&path, bytes).await.expect("write input");
        let checksum = crate::convert::sha256_hex(bytes);
        #[allow(clippy::expect_used)]
        self.app
            .store
            .transition(Expect::Any, ConversionStatus::Uploaded, |s| {
                let fresh = Session {
                    created_at: crate::session::epoch_ms(),
                    input_path: Some(path.clone()),
                    uploaded_filenames: vec![filename.to_owned()],
                    input_checksum: Some(checksum.clone()),
                    auto_extracted_metadata: auto.clone(),
                    ..Session::default()
                };
                *s = fresh;
            })
            .expect("seed upload");
        path
    }

    /// Poll until the session reaches `status` or the deadline passes.
    pub async fn wait_for_status(&self, status: ConversionStatus, timeout: Duration) -> Session {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let session = self.app.store.snapshot();
            if session.status == status {
                return session;
            }
            #[allow(clippy::panic)]
            if tokio::time::Instant::now() > deadline {
                panic!("session never reached {status}, still {}", session.status);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Poll until the session reaches a terminal status.
    pub async fn wait_terminal(&self, timeout: Duration) -> Session {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let session = self.app.store.snapshot();
            if session.status.is_terminal() {
                return session;
            }
            #[allow(clippy::panic)]
            if tokio::time::Instant::now() > deadline {
                panic!("session never reached a terminal status, still {}", session.status);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Full metadata covering every DANDI-required field.
pub fn complete_metadata() -> MetadataMap {
    let mut map = MetadataMap::new();
    map.insert("experimenter".to_owned(), "Ramón y Cajal, Santiago".into());
    map.insert("institution".to_owned(), "Instituto Cajal".into());
    map.insert("subject_id".to_owned(), "mouse-042".into());
    map.insert("species".to_owned(), "Mus musculus".into());
    map.insert("sex".to_owned(), "M".into());
    map
}

/// A confident, unambiguous format guess for the scripted model.
pub fn confident_guess(format: &str) -> crate::format::FormatGuess {
    crate::format::FormatGuess {
        format: format.to_owned(),
        confidence: 95,
        indicators: vec!["file extension".to_owned()],
        alternatives: vec![],
        ambiguous: false,
    }
}

/// One validator issue with the given severity and code.
pub fn issue(severity: crate::session::Severity, code: &str, location: &str) -> ValidationIssue {
    ValidationIssue {
        severity,
        code: code.to_owned(),
        message: format!("issue {code}"),
        location: location.to_owned(),
    }
}

/// Spawn the HTTP server on a random port for integration testing.
pub async fn spawn_http_server(
    app: Arc<App>,
) -> anyhow::Result<(std::net::SocketAddr, tokio::task::JoinHandle<()>)> {
    let router = crate::transport::build_router(app);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok((addr, handle))
}
