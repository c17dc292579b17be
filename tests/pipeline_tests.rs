//! End-to-end pipeline runs over a fake surface

mod common;

use common::{executed, fake_pipeline, fast_config, MapFetcher, FAIL_MARKER};
use slidecap::error::Error;
use slidecap::{progress_channel, CaptureConfig, FailurePolicy, OutputFormat, SanitizePolicy};
use std::io::Cursor;

const THREE_SLIDES: &str = r#"<!DOCTYPE html>
<html><head><title>Deck</title></head>
<body>
  <div class="slide"><h1>One</h1></div>
  <div class="slide"><h1>Two</h1></div>
  <div class="slide"><h1>Three</h1></div>
</body></html>"#;

fn zip_names(buffer: &[u8]) -> Vec<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(buffer)).expect("valid zip");
    (0..archive.len())
        .map(|i| archive.by_index(i).expect("entry").name().to_string())
        .collect()
}

fn count(log: &common::CallLog, call: &str) -> usize {
    log.lock().unwrap().iter().filter(|c| c.as_str() == call).count()
}

#[tokio::test]
async fn slides_are_archived_in_document_order() {
    let (pipeline, log) = fake_pipeline(fast_config(), MapFetcher::default()).await;
    let run = pipeline.run(THREE_SLIDES).await.unwrap();

    assert!(run.success());
    assert_eq!(run.format(), OutputFormat::Png);
    assert_eq!(zip_names(run.buffer()), vec!["001.png", "002.png", "003.png"]);
    assert_eq!(run.entries().iter().map(|e| e.slide).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(run.message(), "Captured 3 slide(s)");

    // every slide is mounted on a clean surface and torn down afterwards
    assert_eq!(count(&log, "mount"), 3);
    assert_eq!(count(&log, "reset"), 3);
    let calls = log.lock().unwrap().clone();
    let first_capture = calls.iter().position(|c| c == "capture").unwrap();
    let first_reset = calls.iter().position(|c| c == "reset").unwrap();
    assert!(first_capture < first_reset);
    pipeline.close().await.unwrap();
}

#[tokio::test]
async fn failed_slide_is_omitted_without_gaps() {
    let html = format!(
        r#"<body><div class="slide">A</div><div class="slide">{}</div><div class="slide">C</div></body>"#,
        FAIL_MARKER
    );
    let (pipeline, log) = fake_pipeline(fast_config(), MapFetcher::default()).await;
    let run = pipeline.run(&html).await.unwrap();

    assert!(run.success());
    assert_eq!(zip_names(run.buffer()), vec!["001.png", "002.png"]);
    assert_eq!(run.entries().iter().map(|e| e.slide).collect::<Vec<_>>(), vec![1, 3]);
    assert_eq!(run.failures().len(), 1);
    assert_eq!(run.failures()[0].slide, 2);
    assert!(run.message().contains("Captured 2 of 3"));
    assert!(run.message().contains("failed slide(s): 2"));

    // the failed slide still released the surface
    assert_eq!(count(&log, "reset"), 3);
}

#[tokio::test]
async fn strict_policy_stops_at_first_failure() {
    let html = format!(
        r#"<body><div class="slide">A</div><div class="slide">{}</div><div class="slide">C</div></body>"#,
        FAIL_MARKER
    );
    let config = CaptureConfig {
        failure_policy: FailurePolicy::Strict,
        ..fast_config()
    };
    let (pipeline, log) = fake_pipeline(config, MapFetcher::default()).await;
    let err = pipeline.run(&html).await.unwrap_err();

    assert!(matches!(err, Error::Capture { index: 2, .. }));
    assert_eq!(count(&log, "mount"), 2);
}

#[tokio::test]
async fn every_slide_failing_yields_no_artifact() {
    let html = format!(
        r#"<body><div class="slide">{0}</div><div class="slide">{0}</div></body>"#,
        FAIL_MARKER
    );
    let (pipeline, _log) = fake_pipeline(fast_config(), MapFetcher::default()).await;
    let err = pipeline.run(&html).await.unwrap_err();
    assert!(matches!(err, Error::NoArtifacts { failed: 2 }));
}

#[tokio::test]
async fn progress_is_reported_per_slide() {
    let (pipeline, _log) = fake_pipeline(fast_config(), MapFetcher::default()).await;
    let (observer, mut rx) = progress_channel();
    pipeline.run_with_progress(THREE_SLIDES, Some(observer)).await.unwrap();

    let mut events = Vec::new();
    while let Some(p) = rx.recv().await {
        events.push((p.current, p.total));
    }
    assert_eq!(events, vec![(1, 3), (2, 3), (3, 3)]);
}

#[tokio::test]
async fn malformed_markup_is_rejected_before_capture() {
    let html = "<div class=\"slide\">\n<p>Hello</p>\n<div class=\"x\"";
    let (pipeline, log) = fake_pipeline(fast_config(), MapFetcher::default()).await;
    let err = pipeline.run(html).await.unwrap_err();

    assert!(matches!(err, Error::Parse { .. }));
    let diagnostic = err.diagnostic().expect("structural errors carry a diagnostic");
    assert_eq!(diagnostic.input, html);
    assert!(diagnostic.correction_prompt().contains(html));
    assert_eq!(count(&log, "mount"), 0);
}

#[tokio::test]
async fn unmarked_body_is_one_slide() {
    let (pipeline, _log) = fake_pipeline(fast_config(), MapFetcher::default()).await;
    let run = pipeline
        .run("<html><body><h1>Title</h1><p>Some text</p></body></html>")
        .await
        .unwrap();
    assert_eq!(zip_names(run.buffer()), vec!["001.png"]);

    let err = pipeline.run("<html><body>  </body></html>").await.unwrap_err();
    assert!(matches!(err, Error::NoSlides { .. }));
}

#[tokio::test]
async fn allowlist_runs_only_safe_scripts() {
    let html = r#"<body><div class="slide">
        <canvas id="c"></canvas>
        <script src="https://evil.example/x.js"></script>
        <script src="https://cdn.jsdelivr.net/npm/chart.js"></script>
        <script>document.cookie = 'a=b'</script>
        <script>draw()</script>
    </div></body>"#;
    let fetcher = MapFetcher::default().with("https://cdn.jsdelivr.net/npm/chart.js", "CHART", 0);
    let (pipeline, log) = fake_pipeline(fast_config(), fetcher).await;
    pipeline.run(html).await.unwrap();
    assert_eq!(executed(&log), vec!["CHART", "draw()"]);

    let strict = CaptureConfig {
        sanitize: SanitizePolicy::Strict,
        ..fast_config()
    };
    let fetcher = MapFetcher::default().with("https://cdn.jsdelivr.net/npm/chart.js", "CHART", 0);
    let (pipeline, log) = fake_pipeline(strict, fetcher).await;
    pipeline.run(html).await.unwrap();
    assert!(executed(&log).is_empty());
}

#[tokio::test]
async fn scripts_run_in_order_regardless_of_fetch_timing() {
    let html = r#"<html><head>
        <script src="https://cdn.jsdelivr.net/npm/lib.js"></script>
    </head><body><div class="slide">
        <script>draw()</script>
        <script src="https://unpkg.com/plugin.js"></script>
        <script src="https://unpkg.com/missing.js"></script>
    </div></body></html>"#;
    let fetcher = MapFetcher::default()
        .with("https://cdn.jsdelivr.net/npm/lib.js", "LIB", 150)
        .with("https://unpkg.com/plugin.js", "PLUGIN", 0);
    let (pipeline, log) = fake_pipeline(fast_config(), fetcher).await;
    let run = pipeline.run(html).await.unwrap();

    // the missing script is a warning, the rest still runs
    assert!(run.success());
    assert!(run.warnings().iter().any(|w| w.contains("missing.js")));
    assert_eq!(executed(&log), vec!["LIB", "PLUGIN", "draw()"]);
}

#[tokio::test]
async fn throwing_script_is_a_warning() {
    let html = r#"<body><div class="slide"><script>throw new Error('boom')</script><p>still here</p></div></body>"#;
    let (pipeline, _log) = fake_pipeline(fast_config(), MapFetcher::default()).await;
    let run = pipeline.run(html).await.unwrap();

    assert_eq!(run.entries().len(), 1);
    assert!(run.failures().is_empty());
    assert!(run.warnings().iter().any(|w| w.contains("threw")));
}

#[tokio::test]
async fn cancelled_run_stops_before_the_next_slide() {
    let (pipeline, log) = fake_pipeline(fast_config(), MapFetcher::default()).await;
    pipeline.cancellation().cancel();
    let err = pipeline.run(THREE_SLIDES).await.unwrap_err();

    assert!(matches!(err, Error::Cancelled { completed: 0, total: 3 }));
    assert_eq!(count(&log, "mount"), 0);
}

#[tokio::test]
async fn cancel_applies_to_one_run_only() {
    let (pipeline, log) = fake_pipeline(fast_config(), MapFetcher::default()).await;
    pipeline.cancellation().cancel();
    let first = pipeline.run(THREE_SLIDES).await;
    assert!(matches!(first, Err(Error::Cancelled { .. })));

    let second = pipeline.run(THREE_SLIDES).await.unwrap();
    assert_eq!(second.entries().len(), 3);
    assert_eq!(count(&log, "mount"), 3);
}

#[tokio::test]
async fn pdf_has_one_page_per_captured_slide() {
    let html = format!(
        r#"<body><div class="slide">A</div><div class="slide">{}</div><div class="slide">C</div></body>"#,
        FAIL_MARKER
    );
    let config = CaptureConfig {
        format: OutputFormat::Pdf,
        ..fast_config()
    };
    let (pipeline, _log) = fake_pipeline(config, MapFetcher::default()).await;
    let run = pipeline.run(&html).await.unwrap();

    assert_eq!(run.format(), OutputFormat::Pdf);
    assert!(run.buffer().starts_with(b"%PDF-"));
    let doc = lopdf::Document::load_mem(run.buffer()).expect("valid pdf");
    assert_eq!(doc.get_pages().len(), 2);
}

#[tokio::test]
async fn identical_runs_produce_identical_bytes() {
    let (pipeline, _log) = fake_pipeline(fast_config(), MapFetcher::default()).await;
    let first = pipeline.run(THREE_SLIDES).await.unwrap();
    let second = pipeline.run(THREE_SLIDES).await.unwrap();
    assert_eq!(first.buffer(), second.buffer());
}
