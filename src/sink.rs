//! Output sinks: turn an [`AssembledDocument`] into a file on disk.
//!
//! | Sink | Artifact | External tool |
//! |------|----------|---------------|
//! | [`HtmlSink`] | single HTML page | none |
//! | [`PdfSink`] | A4 PDF | `wkhtmltopdf` |
//! | [`EbookSink`] + [`EbookProfile::Epub`] | EPUB 2 package | none |
//! | [`EbookSink`] + [`EbookProfile::Mobi`] | MOBI | `ebook-convert` (calibre) |
//!
//! HTML and PDF render the markup as-is, so remote images stay remote unless
//! the document was localized. The e-book sinks embed localized images into
//! the package and rewrite each chapter's `img` sources to package-relative
//! paths; an image whose file is missing is left out of the manifest and its
//! reference dangles, the same as in the other formats.

use crate::error::StoryError;
use crate::fetch::Fetcher;
use crate::output::AssembledDocument;
use crate::pipeline::hash::content_hash;
use crate::pipeline::markup::{self, Visit};
use crate::pipeline::materialize::{is_canonical, transcode_to_jpeg, write_atomic};
use async_trait::async_trait;
use std::borrow::Cow;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, warn};
use zip::write::FileOptions;
use zip::CompressionMethod;

/// Page template for [`HtmlSink`]. `{{title}}` and `{{content}}` are replaced.
pub const HTML_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8" />
<meta name="viewport" content="width=device-width, initial-scale=1" />
<title>{{title}}</title>
<style>
  body { max-width: 42em; margin: 2em auto; padding: 0 1em; font-family: Georgia, serif; line-height: 1.6; }
  h1 { text-align: center; }
  h2 { margin-top: 3em; }
  img { max-width: 100%; height: auto; }
</style>
</head>
<body>
<h1>{{title}}</h1>
{{content}}
</body>
</html>
"#;

/// Page template for [`PdfSink`]: every part starts on a new page.
pub const PDF_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8" />
<title>{{title}}</title>
<style>
  body { font-family: Georgia, serif; font-size: 12pt; line-height: 1.5; }
  h1 { text-align: center; margin-top: 40%; page-break-after: always; }
  h2 { page-break-before: always; }
  img { max-width: 100%; }
</style>
</head>
<body>
<h1>{{title}}</h1>
{{content}}
</body>
</html>
"#;

const PDF_CONVERTER: &str = "wkhtmltopdf";
const MOBI_CONVERTER: &str = "ebook-convert";

/// Writes an [`AssembledDocument`] somewhere and reports where.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    /// Short format name for logs (`"html"`, `"pdf"`, …).
    fn format_name(&self) -> &'static str;

    /// Write the artifact and return its path.
    async fn write(&self, doc: &AssembledDocument) -> Result<PathBuf, StoryError>;
}

/// Fill `template` with the escaped title and the joined fragment markup.
///
/// The template is split at `{{content}}` before the title is substituted,
/// so a title containing the placeholder text cannot pull content into it.
pub fn render_template(template: &str, doc: &AssembledDocument) -> String {
    let title = html_escape::encode_text(&doc.title);
    let content = doc.joined_markup();
    template
        .split("{{content}}")
        .map(|piece| piece.replace("{{title}}", &title))
        .collect::<Vec<_>>()
        .join(&content)
}

// ── HTML ─────────────────────────────────────────────────────────────────

/// Single-page HTML output.
#[derive(Debug, Clone)]
pub struct HtmlSink {
    output: PathBuf,
    template: String,
}

impl HtmlSink {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
            template: HTML_TEMPLATE.to_string(),
        }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }
}

#[async_trait]
impl DocumentSink for HtmlSink {
    fn format_name(&self) -> &'static str {
        "html"
    }

    async fn write(&self, doc: &AssembledDocument) -> Result<PathBuf, StoryError> {
        let html = render_template(&self.template, doc);
        ensure_parent(&self.output).await?;
        write_atomic(&self.output, html.as_bytes())
            .await
            .map_err(|e| StoryError::OutputWriteFailed {
                path: self.output.clone(),
                source: e,
            })?;
        info!("Wrote HTML: {} ({} bytes)", self.output.display(), html.len());
        Ok(self.output.clone())
    }
}

// ── PDF ──────────────────────────────────────────────────────────────────

/// PDF output through an HTML-to-PDF converter.
#[derive(Debug, Clone)]
pub struct PdfSink {
    output: PathBuf,
    converter: Option<PathBuf>,
    page_size: String,
}

impl PdfSink {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
            converter: None,
            page_size: "A4".to_string(),
        }
    }

    /// Use this converter binary instead of looking up `wkhtmltopdf` in `PATH`.
    pub fn with_converter(mut self, path: impl Into<PathBuf>) -> Self {
        self.converter = Some(path.into());
        self
    }

    pub fn with_page_size(mut self, size: impl Into<String>) -> Self {
        self.page_size = size.into();
        self
    }
}

#[async_trait]
impl DocumentSink for PdfSink {
    fn format_name(&self) -> &'static str {
        "pdf"
    }

    async fn write(&self, doc: &AssembledDocument) -> Result<PathBuf, StoryError> {
        let converter = resolve_converter(
            self.converter.as_deref(),
            PDF_CONVERTER,
            "Install wkhtmltopdf (https://wkhtmltopdf.org) or pass its path explicitly.",
        )?;

        let page = tempfile::Builder::new()
            .prefix("storybind-")
            .suffix(".html")
            .tempfile()
            .map_err(|e| StoryError::Internal(format!("Failed to create temp file: {e}")))?;
        tokio::fs::write(page.path(), render_template(PDF_TEMPLATE, doc))
            .await
            .map_err(|e| StoryError::OutputWriteFailed {
                path: page.path().to_path_buf(),
                source: e,
            })?;

        ensure_parent(&self.output).await?;
        let mut cmd = Command::new(&converter);
        cmd.arg("--quiet")
            .arg("--enable-local-file-access")
            .arg("--page-size")
            .arg(&self.page_size)
            .arg(page.path())
            .arg(&self.output);
        run_converter(&converter, cmd).await?;

        info!("Wrote PDF: {}", self.output.display());
        Ok(self.output.clone())
    }
}

// ── E-book ───────────────────────────────────────────────────────────────

/// Which e-book container [`EbookSink`] produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EbookProfile {
    Epub,
    Mobi,
}

/// EPUB 2 (and, through calibre, MOBI) output.
#[derive(Clone)]
pub struct EbookSink {
    output: PathBuf,
    profile: EbookProfile,
    author: Option<String>,
    cover_fetcher: Option<Arc<dyn Fetcher>>,
    converter: Option<PathBuf>,
}

impl std::fmt::Debug for EbookSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EbookSink")
            .field("output", &self.output)
            .field("profile", &self.profile)
            .field("author", &self.author)
            .field("cover_fetcher", &self.cover_fetcher.as_ref().map(|_| "<fetcher>"))
            .field("converter", &self.converter)
            .finish()
    }
}

impl EbookSink {
    pub fn new(output: impl Into<PathBuf>, profile: EbookProfile) -> Self {
        Self {
            output: output.into(),
            profile,
            author: None,
            cover_fetcher: None,
            converter: None,
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// Fetch `AssembledDocument::cover_url` through `fetcher` and embed it.
    ///
    /// Best-effort: a cover that cannot be fetched or decoded is skipped.
    pub fn with_cover_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.cover_fetcher = Some(fetcher);
        self
    }

    /// Converter used for [`EbookProfile::Mobi`] instead of `ebook-convert`
    /// from `PATH`.
    pub fn with_converter(mut self, path: impl Into<PathBuf>) -> Self {
        self.converter = Some(path.into());
        self
    }

    async fn fetch_cover(&self, doc: &AssembledDocument) -> Option<Vec<u8>> {
        let fetcher = self.cover_fetcher.as_ref()?;
        let url = doc.cover_url.as_deref()?;

        let binary = match fetcher.fetch_binary(url).await {
            Ok(b) => b,
            Err(e) => {
                warn!("Cover skipped: {}", e);
                return None;
            }
        };
        if is_canonical(binary.content_type.as_deref()) {
            return Some(binary.bytes);
        }
        match tokio::task::spawn_blocking(move || transcode_to_jpeg(&binary.bytes)).await {
            Ok(Ok(jpeg)) => Some(jpeg),
            Ok(Err(e)) => {
                warn!("Cover skipped: {}", e);
                None
            }
            Err(e) => {
                warn!("Cover skipped: transcode task panicked: {}", e);
                None
            }
        }
    }

    async fn write_epub(&self, doc: &AssembledDocument, path: &Path) -> Result<(), StoryError> {
        let cover = self.fetch_cover(doc).await;
        let doc = doc.clone();
        let author = self.author.clone();
        let path = path.to_path_buf();

        tokio::task::spawn_blocking(move || {
            let package = EpubPackage::prepare(&doc, author, cover);
            package.write(&path)
        })
        .await
        .map_err(|e| StoryError::Internal(format!("EPUB task panicked: {e}")))?
    }
}

#[async_trait]
impl DocumentSink for EbookSink {
    fn format_name(&self) -> &'static str {
        match self.profile {
            EbookProfile::Epub => "epub",
            EbookProfile::Mobi => "mobi",
        }
    }

    async fn write(&self, doc: &AssembledDocument) -> Result<PathBuf, StoryError> {
        ensure_parent(&self.output).await?;

        match self.profile {
            EbookProfile::Epub => {
                self.write_epub(doc, &self.output).await?;
                info!("Wrote EPUB: {}", self.output.display());
            }
            EbookProfile::Mobi => {
                let converter = resolve_converter(
                    self.converter.as_deref(),
                    MOBI_CONVERTER,
                    "Install calibre (https://calibre-ebook.com) to get ebook-convert.",
                )?;
                let work = tempfile::tempdir()
                    .map_err(|e| StoryError::Internal(format!("Failed to create temp dir: {e}")))?;
                let epub = work.path().join("story.epub");
                self.write_epub(doc, &epub).await?;

                let mut cmd = Command::new(&converter);
                cmd.arg(&epub).arg(&self.output);
                run_converter(&converter, cmd).await?;
                info!("Wrote MOBI: {}", self.output.display());
            }
        }
        Ok(self.output.clone())
    }
}

// ── EPUB packaging ───────────────────────────────────────────────────────

struct EpubChapter {
    file_name: String,
    title: String,
    body: String,
}

struct EpubImage {
    file_name: String,
    bytes: Vec<u8>,
}

/// Everything that goes into the zip, computed up front.
struct EpubPackage {
    identifier: String,
    title: String,
    author: String,
    cover: Option<Vec<u8>>,
    chapters: Vec<EpubChapter>,
    images: Vec<EpubImage>,
}

impl EpubPackage {
    fn prepare(doc: &AssembledDocument, author: Option<String>, cover: Option<Vec<u8>>) -> Self {
        let mut package_paths: HashMap<String, String> = HashMap::new();
        let mut images = Vec::new();

        for reference in &doc.images {
            let local = reference.local_path.to_string_lossy().into_owned();
            let file_name = reference.file_name();
            package_paths.insert(local, format!("images/{file_name}"));

            match std::fs::read(&reference.local_path) {
                Ok(bytes) => images.push(EpubImage { file_name, bytes }),
                Err(e) => debug!(
                    "Image {} not embedded: {}",
                    reference.local_path.display(),
                    e
                ),
            }
        }

        let chapters = doc
            .fragments
            .iter()
            .enumerate()
            .map(|(idx, fragment)| EpubChapter {
                file_name: format!("chapter_{:04}.xhtml", idx + 1),
                title: if fragment.title.trim().is_empty() {
                    format!("Part {}", idx + 1)
                } else {
                    fragment.title.clone()
                },
                body: rewrite_sources(&fragment.markup, &package_paths),
            })
            .collect();

        Self {
            identifier: format!("urn:storybind:{}", content_hash(&doc.title)),
            title: doc.title.clone(),
            author: author.unwrap_or_else(|| "Unknown".to_string()),
            cover,
            chapters,
            images,
        }
    }

    fn write(&self, path: &Path) -> Result<(), StoryError> {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".part");
        let tmp = PathBuf::from(tmp);

        let result = self
            .write_zip(&tmp)
            .map_err(|e| StoryError::EbookPackaging {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })
            .and_then(|()| {
                std::fs::rename(&tmp, path).map_err(|e| StoryError::OutputWriteFailed {
                    path: path.to_path_buf(),
                    source: e,
                })
            });
        if result.is_err() {
            let _ = std::fs::remove_file(&tmp);
        }
        result
    }

    fn write_zip(&self, path: &Path) -> zip::result::ZipResult<()> {
        let file = std::fs::File::create(path)?;
        let mut zip = zip::ZipWriter::new(file);
        let stored = FileOptions::default().compression_method(CompressionMethod::Stored);
        let deflated = FileOptions::default().compression_method(CompressionMethod::Deflated);

        // The mimetype entry must come first and be uncompressed.
        zip.start_file("mimetype", stored)?;
        zip.write_all(b"application/epub+zip")?;

        zip.start_file("META-INF/container.xml", deflated)?;
        zip.write_all(CONTAINER_XML.as_bytes())?;

        zip.start_file("OEBPS/content.opf", deflated)?;
        zip.write_all(self.opf().as_bytes())?;

        zip.start_file("OEBPS/toc.ncx", deflated)?;
        zip.write_all(self.ncx().as_bytes())?;

        if let Some(cover) = &self.cover {
            zip.start_file("OEBPS/images/cover.jpg", stored)?;
            zip.write_all(cover)?;
            zip.start_file("OEBPS/cover.xhtml", deflated)?;
            zip.write_all(
                xhtml_page(&self.title, r#"<div class="cover"><img src="images/cover.jpg" alt="cover" /></div>"#)
                    .as_bytes(),
            )?;
        }

        for chapter in &self.chapters {
            zip.start_file(format!("OEBPS/{}", chapter.file_name), deflated)?;
            let body = if opens_with_heading(&chapter.body) {
                chapter.body.clone()
            } else {
                format!(
                    "<h1>{}</h1>\n{}",
                    html_escape::encode_text(&chapter.title),
                    chapter.body
                )
            };
            zip.write_all(xhtml_page(&chapter.title, &body).as_bytes())?;
        }

        // JPEG is already compressed.
        for image in &self.images {
            zip.start_file(format!("OEBPS/images/{}", image.file_name), stored)?;
            zip.write_all(&image.bytes)?;
        }

        zip.finish()?;
        Ok(())
    }

    fn opf(&self) -> String {
        let mut manifest = String::from(
            r#"    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml" />
"#,
        );
        let mut spine = String::new();
        let mut cover_meta = "";

        if self.cover.is_some() {
            cover_meta = r#"    <meta name="cover" content="cover-image" />
"#;
            manifest.push_str(
                r#"    <item id="cover-image" href="images/cover.jpg" media-type="image/jpeg" />
    <item id="cover" href="cover.xhtml" media-type="application/xhtml+xml" />
"#,
            );
            spine.push_str("    <itemref idref=\"cover\" linear=\"no\" />\n");
        }
        for (idx, chapter) in self.chapters.iter().enumerate() {
            manifest.push_str(&format!(
                "    <item id=\"chapter{}\" href=\"{}\" media-type=\"application/xhtml+xml\" />\n",
                idx + 1,
                chapter.file_name
            ));
            spine.push_str(&format!("    <itemref idref=\"chapter{}\" />\n", idx + 1));
        }
        for (idx, image) in self.images.iter().enumerate() {
            manifest.push_str(&format!(
                "    <item id=\"img{}\" href=\"images/{}\" media-type=\"image/jpeg\" />\n",
                idx + 1,
                image.file_name
            ));
        }

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0" unique-identifier="BookId">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:opf="http://www.idpf.org/2007/opf">
    <dc:identifier id="BookId">{id}</dc:identifier>
    <dc:title>{title}</dc:title>
    <dc:creator opf:role="aut">{author}</dc:creator>
    <dc:language>en</dc:language>
{cover_meta}  </metadata>
  <manifest>
{manifest}  </manifest>
  <spine toc="ncx">
{spine}  </spine>
</package>
"#,
            id = self.identifier,
            title = html_escape::encode_text(&self.title),
            author = html_escape::encode_text(&self.author),
        )
    }

    fn ncx(&self) -> String {
        let points: String = self
            .chapters
            .iter()
            .enumerate()
            .map(|(idx, chapter)| {
                format!(
                    r#"    <navPoint id="nav{n}" playOrder="{n}">
      <navLabel><text>{title}</text></navLabel>
      <content src="{src}" />
    </navPoint>
"#,
                    n = idx + 1,
                    title = html_escape::encode_text(&chapter.title),
                    src = chapter.file_name,
                )
            })
            .collect();

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
    <meta name="dtb:uid" content="{id}" />
    <meta name="dtb:depth" content="1" />
    <meta name="dtb:totalPageCount" content="0" />
    <meta name="dtb:maxPageNumber" content="0" />
  </head>
  <docTitle><text>{title}</text></docTitle>
  <navMap>
{points}  </navMap>
</ncx>
"#,
            id = self.identifier,
            title = html_escape::encode_text(&self.title),
        )
    }
}

const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml" />
  </rootfiles>
</container>
"#;

fn xhtml_page(title: &str, body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.1//EN" "http://www.w3.org/TR/xhtml11/DTD/xhtml11.dtd">
<html xmlns="http://www.w3.org/1999/xhtml">
<head><title>{}</title></head>
<body>
{}
</body>
</html>
"#,
        html_escape::encode_text(title),
        body
    )
}

/// Point every `img` whose `src` is a known local path at its package path.
fn rewrite_sources(markup: &str, package_paths: &HashMap<String, String>) -> String {
    if package_paths.is_empty() {
        return markup.to_string();
    }
    let doc = markup::parse(markup);
    markup::render(&doc, |element| {
        let attrs = element
            .attrs()
            .map(|(name, value)| match (element.name(), name) {
                ("img", "src") => match package_paths.get(value) {
                    Some(package) => (name, Cow::Owned(package.clone())),
                    None => (name, Cow::Borrowed(value)),
                },
                _ => (name, Cow::Borrowed(value)),
            })
            .collect();
        Visit::Keep(attrs)
    })
}

// ── Helpers ──────────────────────────────────────────────────────────────

/// Whether `markup` already starts with an `h1`..`h6` element.
fn opens_with_heading(markup: &str) -> bool {
    let bytes = markup.trim_start().as_bytes();
    bytes.len() >= 3 && bytes[0] == b'<' && bytes[1] == b'h' && (b'1'..=b'6').contains(&bytes[2])
}

async fn ensure_parent(path: &Path) -> Result<(), StoryError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StoryError::OutputWriteFailed {
                path: parent.to_path_buf(),
                source: e,
            })?;
    }
    Ok(())
}

fn resolve_converter(explicit: Option<&Path>, program: &str, hint: &str) -> Result<PathBuf, StoryError> {
    let unavailable = || StoryError::ConverterUnavailable {
        program: program.to_string(),
        hint: hint.to_string(),
    };
    match explicit {
        Some(path) if path.is_file() => Ok(path.to_path_buf()),
        Some(_) => Err(unavailable()),
        None => which::which(program).map_err(|_| unavailable()),
    }
}

async fn run_converter(program: &Path, mut cmd: Command) -> Result<(), StoryError> {
    let name = program.display().to_string();
    debug!("Running {:?}", cmd);
    let output = cmd.output().await.map_err(|e| StoryError::ConverterFailed {
        program: name.clone(),
        status: "not started".to_string(),
        stderr: e.to_string(),
    })?;
    if !output.status.success() {
        return Err(StoryError::ConverterFailed {
            program: name,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}
