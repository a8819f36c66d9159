//! Shared fixtures: in-process fakes for the browser, subprocesses and the
//! timestamp authority, plus a temporary store.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use evidence_preserver::capture::browser::{BrowserLauncher, BrowserSession, PAGE_TEXT};
use evidence_preserver::capture::ytdlp::YtDlpVideoDownloader;
use evidence_preserver::capture::{CaptureOptions, PreserveEvidence};
use evidence_preserver::config::Config;
use evidence_preserver::db::{Cookie, Database, Evidence, EvidenceStatus, Vault};
use evidence_preserver::http::HttpClient;
use evidence_preserver::pipeline::ProcessJob;
use evidence_preserver::shell::{CommandOutput, CommandRunner, CommandSpec};
use evidence_preserver::tsa::TsaService;
use scraper::{Html, Selector};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TSA_RESPONSE_BYTES: &[u8] = b"fake-timestamp-response";
pub const TSA_DATE: &str = "2024-03-01T10:20:30Z";

pub const OPENSSL_REPLY_TEXT: &str = "Status info:\nStatus: Granted.\n\nTST info:\n\
    Version: 1\nHash Algorithm: sha512\nSerial number: 0x01\n\
    Time stamp: Mar  1 10:20:30 2024 GMT\nAccuracy: unspecified\n";

// ---------------------------------------------------------------------------
// Browser
// ---------------------------------------------------------------------------

/// Browser double that fetches pages over HTTP and reads them with `scraper`.
#[derive(Default)]
pub struct FakeBrowser {
    pub crash_on_navigate: bool,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub cookies_set: Mutex<Vec<Cookie>>,
    pub scripts: Mutex<Vec<String>>,
}

impl FakeBrowser {
    pub fn crashing() -> Self {
        Self {
            crash_on_navigate: true,
            ..Default::default()
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct FakeLauncher(pub Arc<FakeBrowser>);

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn open(&self) -> Result<Box<dyn BrowserSession>> {
        self.0.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            browser: Arc::clone(&self.0),
            html: Mutex::new(None),
            crashed: Mutex::new(false),
        }))
    }
}

pub struct FakeSession {
    browser: Arc<FakeBrowser>,
    html: Mutex<Option<String>>,
    crashed: Mutex<bool>,
}

impl FakeSession {
    fn check(&self) -> Result<()> {
        if *self.crashed.lock().unwrap() {
            return Err(anyhow!("Page crashed!"));
        }
        Ok(())
    }

    fn document(&self) -> Result<Html> {
        let html = self.html.lock().unwrap().clone();
        let html = html.ok_or_else(|| anyhow!("no page loaded"))?;
        Ok(Html::parse_document(&html))
    }
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn set_cookies(&self, cookies: &[Cookie], _url: &str) -> Result<()> {
        self.check()?;
        self.browser
            .cookies_set
            .lock()
            .unwrap()
            .extend(cookies.iter().cloned());
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        self.check()?;
        if self.browser.crash_on_navigate {
            *self.crashed.lock().unwrap() = true;
            return Err(anyhow!("Page crashed!"));
        }
        let body = reqwest::get(url).await?.text().await?;
        *self.html.lock().unwrap() = Some(body);
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        self.check()?;
        self.browser
            .scripts
            .lock()
            .unwrap()
            .push(script.to_string());
        if script == PAGE_TEXT {
            let doc = self.document()?;
            let body = Selector::parse("body").unwrap();
            let text = doc
                .select(&body)
                .next()
                .map(|b| b.text().collect::<Vec<_>>().join(" "))
                .unwrap_or_default();
            return Ok(serde_json::Value::String(text));
        }
        Ok(serde_json::Value::Null)
    }

    async fn screenshot(&self, path: &Path) -> Result<()> {
        self.check()?;
        tokio::fs::write(path, b"viewport-jpeg").await?;
        Ok(())
    }

    async fn full_page_screenshot(&self, path: &Path) -> Result<()> {
        self.check()?;
        tokio::fs::write(path, b"full-page-jpeg").await?;
        Ok(())
    }

    async fn title(&self) -> Result<Option<String>> {
        self.check()?;
        let doc = self.document()?;
        let title = Selector::parse("title").unwrap();
        Ok(doc
            .select(&title)
            .next()
            .map(|t| t.text().collect::<String>()))
    }

    async fn close(&self) -> Result<()> {
        self.browser.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Subprocesses (openssl, yt-dlp)
// ---------------------------------------------------------------------------

/// What the fake yt-dlp does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoBehaviour {
    /// Exits 1 reporting an unsupported URL.
    Unsupported,
    /// Writes the output file and exits 0.
    Download,
    /// Exits 1 with an unrelated error.
    Broken,
    /// The binary cannot be started.
    Missing,
}

/// Scripted stand-in for the `openssl` and `yt-dlp` binaries.
pub struct ScriptedRunner {
    pub video: VideoBehaviour,
    pub openssl_fails: bool,
    pub calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new(video: VideoBehaviour) -> Self {
        Self {
            video,
            openssl_fails: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls_to(&self, program: &str) -> Vec<CommandSpec> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.program == program)
            .cloned()
            .collect()
    }

    async fn openssl(&self, command: &CommandSpec) -> std::io::Result<CommandOutput> {
        if self.openssl_fails {
            return Ok(CommandOutput {
                code: Some(1),
                stdout: Vec::new(),
                stderr: b"unable to load certificate".to_vec(),
            });
        }
        if command.has_arg("-query") {
            let data = tokio::fs::read(command.arg_after("-data").unwrap()).await?;
            let mut request = b"tsq:".to_vec();
            request.extend(data);
            tokio::fs::write(command.arg_after("-out").unwrap(), request).await?;
            return Ok(ok_output(""));
        }
        if command.has_arg("-reply") {
            return Ok(ok_output(OPENSSL_REPLY_TEXT));
        }
        Ok(ok_output("Verification: OK\n"))
    }

    async fn ytdlp(&self, command: &CommandSpec) -> std::io::Result<CommandOutput> {
        match self.video {
            VideoBehaviour::Unsupported => Ok(CommandOutput {
                code: Some(1),
                stdout: Vec::new(),
                stderr: b"ERROR: Unsupported URL: http://example.test/\n".to_vec(),
            }),
            VideoBehaviour::Download => {
                tokio::fs::write(command.arg_after("--output").unwrap(), b"fake-video").await?;
                Ok(ok_output(""))
            }
            VideoBehaviour::Broken => Ok(CommandOutput {
                code: Some(1),
                stdout: Vec::new(),
                stderr: b"ERROR: unable to extract player response\n".to_vec(),
            }),
            VideoBehaviour::Missing => Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "No such file or directory",
            )),
        }
    }
}

fn ok_output(stdout: &str) -> CommandOutput {
    CommandOutput {
        code: Some(0),
        stdout: stdout.as_bytes().to_vec(),
        stderr: Vec::new(),
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, command: &CommandSpec) -> std::io::Result<CommandOutput> {
        self.calls.lock().unwrap().push(command.clone());
        match command.program.as_str() {
            "openssl" => self.openssl(command).await,
            "yt-dlp" => self.ytdlp(command).await,
            other => Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("unexpected program {other}"),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

pub struct TestEnv {
    pub dir: TempDir,
    pub config: Config,
    pub vault: Arc<Vault>,
    pub server: MockServer,
    pub browser: Arc<FakeBrowser>,
    pub runner: Arc<ScriptedRunner>,
}

pub async fn setup_db() -> (Database, TempDir) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let db = Database::new(&dir.path().join("test.db"))
        .await
        .expect("Failed to create database");
    (db, dir)
}

pub async fn setup(video: VideoBehaviour) -> TestEnv {
    setup_with(FakeBrowser::default(), ScriptedRunner::new(video)).await
}

pub async fn setup_with(browser: FakeBrowser, runner: ScriptedRunner) -> TestEnv {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let server = MockServer::start().await;

    let mut config = Config::for_testing(dir.path());
    config.tsa_url = format!("{}/tsr", server.uri());

    let db = Database::new(&config.database_path)
        .await
        .expect("Failed to create database");

    TestEnv {
        dir,
        config,
        vault: Arc::new(Vault::new(db)),
        server,
        browser: Arc::new(browser),
        runner: Arc::new(runner),
    }
}

impl TestEnv {
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.server.uri())
    }

    /// Answer timestamp requests with [`TSA_RESPONSE_BYTES`].
    pub async fn mount_tsa(&self) {
        Mock::given(method("POST"))
            .and(path("/tsr"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(TSA_RESPONSE_BYTES))
            .mount(&self.server)
            .await;
    }

    pub async fn mount_page(&self, route: &str, content_type: &str, body: &[u8]) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body.to_vec(), content_type))
            .mount(&self.server)
            .await;
    }

    pub fn capture(&self) -> PreserveEvidence {
        PreserveEvidence::new(
            Arc::new(HttpClient::new(Duration::from_secs(10)).unwrap()),
            Arc::new(FakeLauncher(Arc::clone(&self.browser))),
            Arc::new(YtDlpVideoDownloader::new(self.runner.clone(), "yt-dlp")),
            &self.config.data_path,
            &self.config.cookies_path,
            CaptureOptions {
                step_timeout: self.config.step_timeout,
            },
        )
    }

    pub fn tsa(&self) -> TsaService {
        TsaService::new(
            self.runner.clone(),
            Arc::new(HttpClient::new(Duration::from_secs(10)).unwrap()),
            "openssl",
            &self.config.tsa_url,
            &self.config.trusted_timestamps_path,
        )
    }

    pub fn process_job(&self) -> ProcessJob {
        ProcessJob::new(
            self.vault.clone(),
            Arc::new(self.capture()),
            Arc::new(self.tsa()),
            &self.config.data_path,
            &self.config.trusted_timestamps_path,
        )
    }

    pub fn artifact_path(&self, relative: &str) -> PathBuf {
        self.config.data_path.join(relative)
    }

    pub fn timestamp_path(&self, relative: &str) -> PathBuf {
        self.config.trusted_timestamps_path.join(relative)
    }

    pub async fn create(&self, url: &str) -> Evidence {
        self.vault
            .create(url, "user-1", Vec::new())
            .await
            .expect("Failed to create evidence")
    }

    pub async fn reload(&self, id: &str) -> Evidence {
        self.vault
            .get_one(id, "user-1")
            .await
            .expect("Failed to fetch evidence")
            .expect("Evidence not found")
    }

    /// Poll until `id` reaches a terminal state.
    pub async fn wait_terminal(&self, id: &str) -> Evidence {
        for _ in 0..500 {
            let evidence = self.reload(id).await;
            if evidence.status.is_terminal() {
                return evidence;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("evidence {id} never reached a terminal state");
    }

    pub async fn wait_status(&self, id: &str, status: EvidenceStatus) {
        for _ in 0..500 {
            if self.reload(id).await.status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("evidence {id} never reached {status:?}");
    }
}
