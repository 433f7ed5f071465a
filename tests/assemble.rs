//! Assembly scenarios driven by an in-memory fetcher.
//!
//! `StubFetcher` serves canned bodies, counts calls per URL and records the
//! peak number of requests in flight, which is what the grouping and
//! deduplication guarantees are observed through.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use storybind::{
    assemble, content_hash, AssemblyConfig, AssemblyProgressCallback, DocumentSink, FetchError, FetchedBinary,
    Fetcher, HtmlSink, ImageError, PartDescriptor, Stage, StoryError,
};

// ── Test helpers ─────────────────────────────────────────────────────────────

#[derive(Clone)]
enum Canned {
    Text(String),
    Binary(Vec<u8>, &'static str),
    Fail(FetchError),
}

#[derive(Default)]
struct StubFetcher {
    responses: HashMap<String, Canned>,
    calls: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    delay_ms: u64,
}

impl StubFetcher {
    fn with_delay(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            ..Self::default()
        }
    }

    fn text(&mut self, url: &str, body: impl Into<String>) {
        self.responses.insert(url.to_string(), Canned::Text(body.into()));
    }

    fn binary(&mut self, url: &str, bytes: Vec<u8>, content_type: &'static str) {
        self.responses
            .insert(url.to_string(), Canned::Binary(bytes, content_type));
    }

    fn fail(&mut self, url: &str) {
        self.responses
            .insert(url.to_string(), Canned::Fail(FetchError::permanent(url, "HTTP 404 Not Found")));
    }

    fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn serve(&self, url: &str) -> Result<Canned, FetchError> {
        *self.calls.lock().unwrap().entry(url.to_string()).or_default() += 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        } else {
            tokio::task::yield_now().await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match self.responses.get(url) {
            Some(Canned::Fail(e)) => Err(e.clone()),
            Some(canned) => Ok(canned.clone()),
            None => Err(FetchError::permanent(url, "no canned response")),
        }
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        match self.serve(url).await? {
            Canned::Text(body) => Ok(body),
            _ => Err(FetchError::permanent(url, "not text")),
        }
    }

    async fn fetch_binary(&self, url: &str) -> Result<FetchedBinary, FetchError> {
        match self.serve(url).await? {
            Canned::Binary(bytes, ct) => Ok(FetchedBinary {
                bytes,
                content_type: Some(ct.to_string()),
            }),
            _ => Err(FetchError::permanent(url, "not binary")),
        }
    }
}

/// Records group sizes per stage.
#[derive(Default)]
struct GroupRecorder {
    groups: Mutex<Vec<(Stage, usize)>>,
}

impl AssemblyProgressCallback for GroupRecorder {
    fn on_group_start(&self, stage: Stage, _group_index: usize, _group_count: usize, item_count: usize) {
        self.groups.lock().unwrap().push((stage, item_count));
    }
}

const JPEG_STUB: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0xFF, 0xD9];

fn part_url(i: usize) -> String {
    format!("https://api.test/text/{i}")
}

fn image_url(name: &str) -> String {
    format!("https://img.test/{name}")
}

fn parts(n: usize) -> Vec<PartDescriptor> {
    (1..=n)
        .map(|i| PartDescriptor::new(i.to_string(), format!("Chapter {i}"), part_url(i)))
        .collect()
}

fn config(images_dir: &Path, localize: bool) -> AssemblyConfig {
    AssemblyConfig::builder()
        .localize_images(localize)
        .images_dir(images_dir)
        .build()
        .unwrap()
}

fn png_bytes() -> Vec<u8> {
    let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(5, 4, Rgba([10, 200, 30, 255])));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
    buf
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn twenty_three_parts_in_three_groups_keep_order() {
    let mut stub = StubFetcher::with_delay(2);
    for i in 1..=23 {
        stub.text(&part_url(i), format!("<p>body {i}</p>"));
    }
    let recorder = Arc::new(GroupRecorder::default());
    let dir = tempfile::tempdir().unwrap();
    let config = AssemblyConfig::builder()
        .images_dir(dir.path())
        .progress_callback(recorder.clone() as Arc<dyn AssemblyProgressCallback>)
        .build()
        .unwrap();

    let output = assemble(&stub, "Long", None, &parts(23), &config).await.unwrap();

    let groups = recorder.groups.lock().unwrap().clone();
    assert_eq!(groups, vec![(Stage::Parts, 10), (Stage::Parts, 10), (Stage::Parts, 3)]);
    assert_eq!(output.stats.part_groups, 3);

    let fragments = &output.document.fragments;
    assert_eq!(fragments.len(), 23);
    for (i, fragment) in fragments.iter().enumerate() {
        assert_eq!(fragment.title, format!("Chapter {}", i + 1));
        assert_eq!(
            fragment.markup,
            format!("<h2>Chapter {n}</h2>\n<p>body {n}</p>", n = i + 1)
        );
    }
    assert!(stub.peak() <= 10, "peak in flight {}", stub.peak());
}

#[tokio::test]
async fn in_flight_never_exceeds_group_size() {
    let mut stub = StubFetcher::with_delay(3);
    for i in 1..=17 {
        stub.text(&part_url(i), "<p>x</p>");
    }
    let dir = tempfile::tempdir().unwrap();
    let config = AssemblyConfig::builder()
        .group_size(4)
        .images_dir(dir.path())
        .build()
        .unwrap();

    assemble(&stub, "S", None, &parts(17), &config).await.unwrap();
    assert!(stub.peak() <= 4, "peak in flight {}", stub.peak());
    assert!(stub.peak() >= 2, "groups should run concurrently, peak {}", stub.peak());
    assert_eq!(stub.total_calls(), 17);
}

#[tokio::test]
async fn shared_image_is_stored_once() {
    let mut stub = StubFetcher::default();
    let img = image_url("shared.jpg");
    stub.text(&part_url(1), format!(r#"<p>a<img src="{img}"></p>"#));
    stub.text(&part_url(2), format!(r#"<p>b<img src="{img}" alt="again"></p>"#));
    stub.binary(&img, JPEG_STUB.to_vec(), "image/jpeg");

    let dir = tempfile::tempdir().unwrap();
    let images_dir = dir.path().join("images");
    let output = assemble(&stub, "S", None, &parts(2), &config(&images_dir, true))
        .await
        .unwrap();

    let expected = images_dir.join(format!("{}.jpg", content_hash(&img)));
    let expected_str = expected.to_string_lossy().into_owned();
    for fragment in &output.document.fragments {
        assert!(fragment.markup.contains(&expected_str), "{}", fragment.markup);
        assert!(!fragment.markup.contains("https://img.test"));
    }

    let files: Vec<_> = std::fs::read_dir(&images_dir).unwrap().collect();
    assert_eq!(files.len(), 1);
    assert_eq!(std::fs::read(&expected).unwrap(), JPEG_STUB);
    assert_eq!(stub.calls(&img), 1);
    assert_eq!(output.stats.distinct_images, 1);
    assert_eq!(output.document.images.len(), 1);
}

#[tokio::test]
async fn same_image_in_five_parts_is_fetched_once() {
    let mut stub = StubFetcher::with_delay(1);
    let img = image_url("banner.jpg");
    for i in 1..=5 {
        stub.text(&part_url(i), format!(r#"<img src="{img}"><p>{i}</p>"#));
    }
    stub.binary(&img, JPEG_STUB.to_vec(), "image/jpeg");

    let dir = tempfile::tempdir().unwrap();
    let output = assemble(&stub, "S", None, &parts(5), &config(dir.path(), true))
        .await
        .unwrap();

    assert_eq!(stub.calls(&img), 1);
    assert_eq!(output.stats.images_written, 1);
}

#[tokio::test]
async fn failed_part_aborts_before_images() {
    let mut stub = StubFetcher::default();
    for i in 1..=10 {
        stub.text(&part_url(i), format!(r#"<p>{i}<img src="{}"></p>"#, image_url(&format!("{i}.jpg"))));
    }
    stub.fail(&part_url(7));

    let dir = tempfile::tempdir().unwrap();
    let images_dir = dir.path().join("images");
    let err = assemble(&stub, "S", None, &parts(10), &config(&images_dir, true))
        .await
        .unwrap_err();

    match err {
        StoryError::PartFetchFailed {
            position,
            part_id,
            title,
            source,
        } => {
            assert_eq!(position, 7);
            assert_eq!(part_id, "7");
            assert_eq!(title, "Chapter 7");
            assert_eq!(source.url, part_url(7));
        }
        other => panic!("expected PartFetchFailed, got {other:?}"),
    }
    assert!(!images_dir.exists(), "no image work after a part failure");
    for i in 1..=10 {
        assert_eq!(stub.calls(&image_url(&format!("{i}.jpg"))), 0);
    }
}

#[tokio::test]
async fn failure_in_first_group_skips_later_groups() {
    let mut stub = StubFetcher::default();
    for i in 1..=12 {
        stub.text(&part_url(i), "<p>x</p>");
    }
    stub.fail(&part_url(2));
    let dir = tempfile::tempdir().unwrap();
    let config = AssemblyConfig::builder()
        .group_size(4)
        .images_dir(dir.path())
        .build()
        .unwrap();

    let err = assemble(&stub, "S", None, &parts(12), &config).await.unwrap_err();
    assert!(matches!(err, StoryError::PartFetchFailed { position: 2, .. }), "got {err:?}");
    // The failing group runs to completion; nothing after it starts.
    assert_eq!(stub.total_calls(), 4);
}

#[tokio::test]
async fn one_failed_image_does_not_abort() {
    let mut stub = StubFetcher::default();
    let names = ["a.jpg", "b.jpg", "c.jpg", "d.jpg", "e.jpg"];
    for i in 1..=10 {
        let name = names[(i - 1) % names.len()];
        stub.text(&part_url(i), format!(r#"<p>{i}<img src="{}"></p>"#, image_url(name)));
    }
    for name in names {
        stub.binary(&image_url(name), JPEG_STUB.to_vec(), "image/jpeg");
    }
    stub.fail(&image_url("c.jpg"));

    let dir = tempfile::tempdir().unwrap();
    let output = assemble(&stub, "S", None, &parts(10), &config(dir.path(), true))
        .await
        .unwrap();

    assert_eq!(output.document.fragments.len(), 10);
    assert_eq!(output.image_failures.len(), 1);
    let failure = &output.image_failures[0];
    assert_eq!(failure.content_hash, content_hash(&image_url("c.jpg")));
    assert!(matches!(failure.error, ImageError::Fetch(_)));
    assert_eq!(output.stats.images_written, 4);
    assert_eq!(output.stats.images_failed, 1);

    // The markup still points at the missing file.
    let missing = dir.path().join(format!("{}.jpg", failure.content_hash));
    assert!(!missing.exists());
    assert!(output.document.fragments[2]
        .markup
        .contains(&*missing.to_string_lossy()));
}

#[tokio::test]
async fn png_is_stored_as_jpeg() {
    let mut stub = StubFetcher::default();
    let img = image_url("pic.png");
    stub.text(&part_url(1), format!(r#"<p><img src="{img}"></p>"#));
    stub.binary(&img, png_bytes(), "image/png");

    let dir = tempfile::tempdir().unwrap();
    let output = assemble(&stub, "S", None, &parts(1), &config(dir.path(), true))
        .await
        .unwrap();

    let path = &output.document.images[0].local_path;
    assert_eq!(path.extension().and_then(|e| e.to_str()), Some("jpg"));
    let stored = std::fs::read(path).unwrap();
    assert_eq!(&stored[..2], &[0xFF, 0xD8]);
    let decoded = image::load_from_memory(&stored).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (5, 4));
}

#[tokio::test]
async fn existing_image_is_reused() {
    let mut stub = StubFetcher::default();
    let img = image_url("old.jpg");
    stub.text(&part_url(1), format!(r#"<img src="{img}">"#));
    stub.binary(&img, JPEG_STUB.to_vec(), "image/jpeg");

    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), true);
    let first = assemble(&stub, "S", None, &parts(1), &config).await.unwrap();
    let second = assemble(&stub, "S", None, &parts(1), &config).await.unwrap();

    assert_eq!(first.stats.images_written, 1);
    assert_eq!(second.stats.images_reused, 1);
    assert_eq!(stub.calls(&img), 1);
    assert_eq!(first.document, second.document);
}

#[tokio::test]
async fn without_localization_images_stay_remote() {
    let mut stub = StubFetcher::default();
    let img = image_url("remote.jpg");
    stub.text(&part_url(1), format!(r#"<p><img src="{img}"></p>"#));

    let dir = tempfile::tempdir().unwrap();
    let output = assemble(&stub, "S", None, &parts(1), &config(dir.path(), false))
        .await
        .unwrap();

    assert!(output.document.fragments[0].markup.contains(&img));
    assert!(output.document.images.is_empty());
    assert_eq!(stub.calls(&img), 0);
}

#[tokio::test]
async fn empty_story_yields_empty_document() {
    let stub = StubFetcher::default();
    let dir = tempfile::tempdir().unwrap();
    let output = assemble(&stub, "Nothing yet", None, &[], &config(dir.path(), true))
        .await
        .unwrap();
    assert!(output.document.fragments.is_empty());
    assert_eq!(output.stats.part_groups, 0);
    assert_eq!(stub.total_calls(), 0);
}

#[tokio::test]
async fn hostile_markup_is_sanitized() {
    let mut stub = StubFetcher::default();
    stub.text(
        &part_url(1),
        r#"<p onclick="evil()">Hi<script>alert(1)</script> <a href="javascript:x()">link</a></p>"#,
    );
    let dir = tempfile::tempdir().unwrap();
    let output = assemble(&stub, "S", None, &parts(1), &config(dir.path(), false))
        .await
        .unwrap();

    let markup = &output.document.fragments[0].markup;
    assert!(!markup.contains("script"));
    assert!(!markup.contains("onclick"));
    assert!(!markup.contains("javascript:"));
    assert!(markup.contains("Hi"));
    assert!(markup.contains("link"));
}

#[tokio::test]
async fn relative_images_dir_resolves_from_html_output() {
    let mut stub = StubFetcher::default();
    let img = image_url("pic.jpg");
    stub.text(&part_url(1), format!(r#"<p>look<img src="{img}"></p>"#));
    stub.binary(&img, JPEG_STUB.to_vec(), "image/jpeg");

    // Relative to the working directory, like the CLI default.
    let relative = Path::new("target")
        .join("storybind-tests")
        .join(format!("relative-images-{}", std::process::id()));
    let output = assemble(&stub, "S", None, &parts(1), &config(&relative, true))
        .await
        .unwrap();

    let out_dir = tempfile::tempdir().unwrap();
    let html_path = out_dir.path().join("output").join("output.html");
    HtmlSink::new(&html_path).write(&output.document).await.unwrap();
    let html = std::fs::read_to_string(&html_path).unwrap();

    let start = html.find("<img src=\"").expect("img in output") + "<img src=\"".len();
    let src = &html[start..start + html[start..].find('"').unwrap()];
    let resolved = html_path.parent().unwrap().join(src);
    assert!(Path::new(src).is_absolute(), "src {src}");
    assert_eq!(std::fs::read(&resolved).unwrap(), JPEG_STUB);

    std::fs::remove_dir_all(&relative).unwrap();
}
