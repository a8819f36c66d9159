//! End-to-end job tests: claim, capture, checksum, timestamp and the final write.

mod common;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use common::{
    setup, setup_with, FakeBrowser, ScriptedRunner, VideoBehaviour, TSA_DATE, TSA_RESPONSE_BYTES,
};
use evidence_preserver::capture::{EvidenceJob, JobResults};
use evidence_preserver::checksum::checksum_file;
use evidence_preserver::db::{Artifact, ArtifactKind, Evidence, EvidenceStatus};
use evidence_preserver::pipeline::{JobOutcome, ProcessJob};
use evidence_preserver::tsa::TsaTrust;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, ResponseTemplate};

const PAGE: &[u8] = b"<title>T</title><h2>X</h2>";

#[tokio::test]
async fn test_html_evidence_is_processed() {
    let env = setup(VideoBehaviour::Unsupported).await;
    env.mount_tsa().await;
    env.mount_page("/page", "text/html", PAGE).await;

    let evidence = env.create(&env.url("/page")).await;
    let outcome = env.process_job().execute().await.unwrap();
    assert_eq!(outcome, Some(JobOutcome::Processed(evidence.id.clone())));

    let stored = env.reload(&evidence.id).await;
    assert_eq!(stored.status, EvidenceStatus::Processed);
    assert_eq!(stored.title.as_deref(), Some("T"));
    assert!(stored.error.is_none());
    assert_eq!(stored.downloads.len(), 4);
    assert_eq!(stored.date.unwrap().to_rfc3339(), "2024-03-01T10:20:30+00:00");
    assert_eq!(
        stored.date.unwrap(),
        chrono::DateTime::parse_from_rfc3339(TSA_DATE).unwrap()
    );

    for download in &stored.downloads {
        assert_eq!(download.sha512checksum.len(), 128);
        let recomputed = checksum_file(&env.artifact_path(&download.path))
            .await
            .unwrap();
        assert_eq!(recomputed, download.sha512checksum, "{}", download.path);
    }

    let text = std::fs::read_to_string(env.artifact_path(&stored.downloads[1].path)).unwrap();
    assert!(text.contains('X'));
    assert!(env.artifact_path(&stored.downloads[2].path).exists());
    assert!(env.artifact_path(&stored.downloads[3].path).exists());
}

#[tokio::test]
async fn test_timestamp_receipt_is_complete() {
    let env = setup(VideoBehaviour::Download).await;
    env.mount_tsa().await;
    env.mount_page("/watch", "text/html", PAGE).await;

    let evidence = env.create(&env.url("/watch")).await;
    env.process_job().execute().await.unwrap();

    let stored = env.reload(&evidence.id).await;
    assert_eq!(stored.downloads.len(), 5);
    assert_eq!(stored.downloads[4].kind, ArtifactKind::Video);

    let files = stored.tsa_files.expect("processed items carry receipts");
    assert_eq!(
        files.all_checksums_relative_path,
        format!("{}/aggregateChecksum.txt", evidence.id)
    );
    assert_eq!(
        files.ts_request_relative_path,
        format!("{}/tsaRequest.tsq", evidence.id)
    );
    assert_eq!(
        files.ts_response_relative_path,
        format!("{}/tsaResponse.tsr", evidence.id)
    );

    let aggregate =
        std::fs::read_to_string(env.timestamp_path(&files.all_checksums_relative_path)).unwrap();
    let lines: Vec<&str> = aggregate.lines().collect();
    let checksums: Vec<&str> = stored
        .downloads
        .iter()
        .map(|d| d.sha512checksum.as_str())
        .collect();
    assert_eq!(lines, checksums);

    let request = std::fs::read(env.timestamp_path(&files.ts_request_relative_path)).unwrap();
    assert!(request.starts_with(b"tsq:"));
    let response = std::fs::read(env.timestamp_path(&files.ts_response_relative_path)).unwrap();
    assert_eq!(response, TSA_RESPONSE_BYTES);

    let openssl = env.runner.calls_to("openssl");
    assert!(openssl[0].has_arg("-query"));
    assert!(openssl[0].has_arg("-sha512"));
    assert!(openssl[0].has_arg("-no_nonce"));
    assert!(openssl.last().unwrap().has_arg("-reply"));
    assert!(!openssl.iter().any(|c| c.has_arg("-verify")));
}

#[tokio::test]
async fn test_tsa_request_is_posted_as_timestamp_query() {
    let env = setup(VideoBehaviour::Unsupported).await;
    Mock::given(method("POST"))
        .and(path("/tsr"))
        .and(header("content-type", "application/timestamp-query"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(TSA_RESPONSE_BYTES))
        .expect(1)
        .mount(&env.server)
        .await;
    env.mount_page("/doc.pdf", "application/pdf", b"%PDF").await;

    let evidence = env.create(&env.url("/doc.pdf")).await;
    let outcome = env.process_job().execute().await.unwrap();
    assert_eq!(outcome, Some(JobOutcome::Processed(evidence.id.clone())));

    let stored = env.reload(&evidence.id).await;
    assert_eq!(stored.title.as_deref(), Some("doc.pdf"));
    assert_eq!(stored.downloads.len(), 1);
}

#[tokio::test]
async fn test_broken_video_extractor_marks_error() {
    let env = setup(VideoBehaviour::Broken).await;
    env.mount_tsa().await;
    env.mount_page("/page", "text/html", PAGE).await;

    let evidence = env.create(&env.url("/page")).await;
    let outcome = env.process_job().execute().await.unwrap();
    assert!(matches!(outcome, Some(JobOutcome::Failed { .. })));

    let stored = env.reload(&evidence.id).await;
    assert_eq!(stored.status, EvidenceStatus::Error);
    let error = stored.error.unwrap();
    assert!(error.contains("video downloader failed"), "{error}");
    assert!(error.contains("unable to extract player response"), "{error}");
    assert!(stored.downloads.is_empty());
    assert!(stored.tsa_files.is_none());
    assert!(stored.date.is_some());
}

#[tokio::test]
async fn test_tsa_http_failure_marks_error() {
    let env = setup(VideoBehaviour::Unsupported).await;
    Mock::given(method("POST"))
        .and(path("/tsr"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&env.server)
        .await;
    env.mount_page("/doc.pdf", "application/pdf", b"%PDF").await;

    let evidence = env.create(&env.url("/doc.pdf")).await;
    env.process_job().execute().await.unwrap();

    let stored = env.reload(&evidence.id).await;
    assert_eq!(stored.status, EvidenceStatus::Error);
    assert!(stored.error.unwrap().contains("HTTP 500"));
    assert!(stored.tsa_files.is_none());
}

#[tokio::test]
async fn test_openssl_failure_marks_error() {
    let mut runner = ScriptedRunner::new(VideoBehaviour::Unsupported);
    runner.openssl_fails = true;
    let env = setup_with(FakeBrowser::default(), runner).await;
    env.mount_tsa().await;
    env.mount_page("/doc.pdf", "application/pdf", b"%PDF").await;

    let evidence = env.create(&env.url("/doc.pdf")).await;
    env.process_job().execute().await.unwrap();

    let stored = env.reload(&evidence.id).await;
    assert_eq!(stored.status, EvidenceStatus::Error);
    assert!(stored.error.unwrap().contains("unable to load certificate"));
}

#[tokio::test]
async fn test_receipt_is_verified_when_trust_is_configured() {
    let env = setup(VideoBehaviour::Unsupported).await;
    env.mount_tsa().await;
    env.mount_page("/doc.pdf", "application/pdf", b"%PDF").await;

    let tsa = env.tsa().with_trust(TsaTrust {
        ca_file: env.dir.path().join("cacert.pem"),
        cert_file: env.dir.path().join("tsa.crt"),
    });
    let job = ProcessJob::new(
        env.vault.clone(),
        Arc::new(env.capture()),
        Arc::new(tsa),
        &env.config.data_path,
        &env.config.trusted_timestamps_path,
    );

    let evidence = env.create(&env.url("/doc.pdf")).await;
    job.execute().await.unwrap();
    assert_eq!(env.reload(&evidence.id).await.status, EvidenceStatus::Processed);

    let verify = env
        .runner
        .calls_to("openssl")
        .into_iter()
        .find(|c| c.has_arg("-verify"))
        .expect("receipt should be verified");
    assert!(verify
        .arg_after("-CAfile")
        .unwrap()
        .ends_with("cacert.pem"));
    assert!(verify.arg_after("-untrusted").unwrap().ends_with("tsa.crt"));
    assert!(verify.arg_after("-queryfile").unwrap().ends_with("tsaRequest.tsq"));
}

/// Capture that reports an artifact it never wrote.
struct PhantomArtifact;

#[async_trait]
impl EvidenceJob for PhantomArtifact {
    async fn run(&self, evidence: &Evidence) -> Result<JobResults> {
        Ok(JobResults {
            title: "phantom".to_string(),
            downloads: vec![Artifact::new(&evidence.id, "content.html", ArtifactKind::Content)],
        })
    }
}

#[tokio::test]
async fn test_missing_artifact_marks_error() {
    let env = setup(VideoBehaviour::Unsupported).await;
    env.mount_tsa().await;

    let job = ProcessJob::new(
        env.vault.clone(),
        Arc::new(PhantomArtifact),
        Arc::new(env.tsa()),
        &env.config.data_path,
        &env.config.trusted_timestamps_path,
    );

    let evidence = env.create("https://example.com/").await;
    job.execute().await.unwrap();

    let stored = env.reload(&evidence.id).await;
    assert_eq!(stored.status, EvidenceStatus::Error);
    assert!(stored.error.unwrap().contains("checksum"));
    assert!(env.runner.calls_to("openssl").is_empty());
}

#[tokio::test]
async fn test_nothing_scheduled_is_noop() {
    let env = setup(VideoBehaviour::Unsupported).await;
    assert_eq!(env.process_job().execute().await.unwrap(), None);
    assert_eq!(env.browser.opened(), 0);
}

#[tokio::test]
async fn test_one_item_per_execution() {
    let env = setup(VideoBehaviour::Unsupported).await;
    env.mount_tsa().await;
    env.mount_page("/a.pdf", "application/pdf", b"%PDF-a").await;
    env.mount_page("/b.pdf", "application/pdf", b"%PDF-b").await;

    let first = env.create(&env.url("/a.pdf")).await;
    let second = env.create(&env.url("/b.pdf")).await;
    let job = env.process_job();

    job.execute().await.unwrap();
    assert_eq!(env.reload(&first.id).await.status, EvidenceStatus::Processed);
    assert_eq!(env.reload(&second.id).await.status, EvidenceStatus::Scheduled);

    job.execute().await.unwrap();
    assert_eq!(env.reload(&second.id).await.status, EvidenceStatus::Processed);
}
