//! Text extractors: structured PDF text and image OCR plus caption.
//!
//! A PDF without extractable text (a scanned document) yields an empty string rather than an
//! error, so enrichment still runs and degrades on its own. Transport or parse failures are
//! fatal: they surface as [`ExtractionError`] and end the request.

use super::scratch::ScratchHandle;
use super::types::{ExtractionError, ExtractionResult, SourceKind};
use crate::inference::{ImageInput, InferenceError, VisionInference};
use async_trait::async_trait;
use lopdf::Document;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const PDF_MAGIC: &[u8] = b"%PDF";
/// Slack between the image sub-call deadline and the dispatcher deadline, so a stalled
/// sub-call resolves to an empty segment before the whole extraction is abandoned.
const DISPATCH_MARGIN: Duration = Duration::from_secs(2);

/// Converts a stored upload into plain text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Extract the text of the upload behind `handle`, declared by the caller as `media_type`.
    async fn extract(
        &self,
        handle: &ScratchHandle,
        media_type: &str,
    ) -> Result<String, ExtractionError>;
}

/// Reads embedded text from PDF pages.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfTextExtractor;

impl PdfTextExtractor {
    /// Parse `bytes` and join the text of every page.
    pub fn extract_bytes(bytes: &[u8]) -> Result<String, ExtractionError> {
        if !bytes.starts_with(PDF_MAGIC) {
            return Err(ExtractionError::NotAPdf(bytes.iter().take(4).copied().collect()));
        }

        let document =
            Document::load_mem(bytes).map_err(|error| ExtractionError::CorruptPdf(error.to_string()))?;

        let mut text = String::new();
        for (page_number, _) in document.get_pages() {
            match document.extract_text(&[page_number]) {
                Ok(page_text) => {
                    let page_text = page_text.trim();
                    if !page_text.is_empty() {
                        text.push_str(page_text);
                        text.push('\n');
                    }
                }
                // Pages drawn only from images or with undecodable fonts carry no usable text.
                Err(error) => {
                    tracing::debug!(page = page_number, error = %error, "No text on PDF page");
                }
            }
        }

        Ok(text.trim().to_string())
    }
}

#[async_trait]
impl TextExtractor for PdfTextExtractor {
    async fn extract(
        &self,
        handle: &ScratchHandle,
        _media_type: &str,
    ) -> Result<String, ExtractionError> {
        let bytes = tokio::fs::read(handle.path())
            .await
            .map_err(ExtractionError::Read)?;
        tokio::task::spawn_blocking(move || Self::extract_bytes(&bytes))
            .await
            .map_err(|error| ExtractionError::Task(error.to_string()))?
    }
}

/// Combines an OCR pass and a captioning pass over the same image.
pub struct ImageTextExtractor {
    vision: Arc<dyn VisionInference>,
    call_timeout: Duration,
}

impl ImageTextExtractor {
    /// Use `vision` for both sub-extractions, bounding each by `call_timeout`.
    pub fn new(vision: Arc<dyn VisionInference>, call_timeout: Duration) -> Self {
        Self {
            vision,
            call_timeout,
        }
    }

    async fn bounded<F>(&self, call: F) -> Result<String, InferenceError>
    where
        F: std::future::Future<Output = Result<String, InferenceError>>,
    {
        match timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(InferenceError::Timeout(self.call_timeout)),
        }
    }
}

#[async_trait]
impl TextExtractor for ImageTextExtractor {
    async fn extract(
        &self,
        handle: &ScratchHandle,
        media_type: &str,
    ) -> Result<String, ExtractionError> {
        let bytes = tokio::fs::read(handle.path())
            .await
            .map_err(ExtractionError::Read)?;
        let media_type = image_media_type(&bytes, media_type);
        let image = ImageInput { bytes, media_type };

        let (ocr, caption) = tokio::join!(
            self.bounded(self.vision.recognize_text(&image)),
            self.bounded(self.vision.caption(&image)),
        );

        match (ocr, caption) {
            (Err(ocr), Err(caption)) => Err(ExtractionError::ImageUnreadable {
                ocr: ocr.to_string(),
                caption: caption.to_string(),
            }),
            (ocr, caption) => {
                let ocr = segment("ocr", ocr);
                let caption = segment("caption", caption);
                Ok(combine_image_text(&ocr, &caption))
            }
        }
    }
}

fn segment(pass: &'static str, result: Result<String, InferenceError>) -> String {
    result.unwrap_or_else(|error| {
        tracing::warn!(pass, error = %error, "Image sub-extraction failed; using empty segment");
        String::new()
    })
}

/// Media type sent to the vision provider: sniffed from the bytes, else the declared type.
fn image_media_type(bytes: &[u8], declared: &str) -> String {
    match infer::get(bytes) {
        Some(kind) if kind.matcher_type() == infer::MatcherType::Image => {
            kind.mime_type().to_string()
        }
        _ => declared
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase(),
    }
}

/// Join OCR text and caption as `trim(ocr + "\n" + caption)`.
pub fn combine_image_text(ocr: &str, caption: &str) -> String {
    format!("{ocr}\n{caption}").trim().to_string()
}

/// Dispatches to the extractor matching a document's kind.
#[derive(Clone)]
pub struct Extractors {
    pdf: Arc<dyn TextExtractor>,
    image: Arc<dyn TextExtractor>,
    deadline: Duration,
}

impl Extractors {
    /// Pair the two extractor variants under one overall deadline.
    pub fn new(
        pdf: Arc<dyn TextExtractor>,
        image: Arc<dyn TextExtractor>,
        deadline: Duration,
    ) -> Self {
        Self {
            pdf,
            image,
            deadline,
        }
    }

    /// Standard extractors: lopdf for PDFs, `vision` for images.
    ///
    /// Each image sub-call gets `deadline`; the dispatcher allows a little more so that a
    /// stalled sub-call is absorbed by the image extractor instead of failing the request.
    pub fn standard(vision: Arc<dyn VisionInference>, deadline: Duration) -> Self {
        Self::new(
            Arc::new(PdfTextExtractor),
            Arc::new(ImageTextExtractor::new(vision, deadline)),
            deadline + DISPATCH_MARGIN,
        )
    }

    /// Extract text from `handle` using the strategy for `kind`.
    pub async fn extract(
        &self,
        handle: &ScratchHandle,
        kind: SourceKind,
        media_type: &str,
    ) -> Result<ExtractionResult, ExtractionError> {
        let extractor = match kind {
            SourceKind::Pdf => &self.pdf,
            SourceKind::Image => &self.image,
        };
        let text = timeout(self.deadline, extractor.extract(handle, media_type))
            .await
            .map_err(|_| ExtractionError::Timeout(self.deadline))??;
        Ok(ExtractionResult { text, source: kind })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{Object, Stream, dictionary};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn pdf_with_lines(lines: &[&str]) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        let mut operations = Vec::new();
        if !lines.is_empty() {
            operations.push(Operation::new("BT", vec![]));
            operations.push(Operation::new("Tf", vec!["F1".into(), 12.into()]));
            operations.push(Operation::new("Td", vec![72.into(), 720.into()]));
            for line in lines {
                operations.push(Operation::new("Tj", vec![Object::string_literal(*line)]));
                operations.push(Operation::new("Td", vec![0.into(), (-14).into()]));
            }
            operations.push(Operation::new("ET", vec![]));
        }
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("encode content"),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).expect("serialize pdf");
        bytes
    }

    #[test]
    fn pdf_text_is_extracted() {
        let bytes = pdf_with_lines(&["Photosynthesis converts light into energy"]);
        let text = PdfTextExtractor::extract_bytes(&bytes).expect("text");
        assert!(text.contains("Photosynthesis"), "got: {text:?}");
    }

    #[test]
    fn pdf_without_text_yields_empty_string() {
        let bytes = pdf_with_lines(&[]);
        let text = PdfTextExtractor::extract_bytes(&bytes).expect("scanned pdf is not an error");
        assert_eq!(text, "");
    }

    #[test]
    fn non_pdf_bytes_are_rejected() {
        let error = PdfTextExtractor::extract_bytes(b"hello world").expect_err("not a pdf");
        assert!(matches!(error, ExtractionError::NotAPdf(magic) if magic == b"hell"));
    }

    #[test]
    fn image_text_joins_ocr_then_caption() {
        assert_eq!(combine_image_text("STOP", "a red sign"), "STOP\na red sign");
        assert_eq!(combine_image_text("", "a red sign"), "a red sign");
        assert_eq!(combine_image_text("STOP ", ""), "STOP");
        assert_eq!(combine_image_text("", ""), "");
    }

    struct ScriptedVision {
        ocr: Result<&'static str, ()>,
        caption: Result<&'static str, ()>,
    }

    #[async_trait]
    impl VisionInference for ScriptedVision {
        async fn recognize_text(&self, _image: &ImageInput) -> Result<String, InferenceError> {
            self.ocr
                .map(str::to_string)
                .map_err(|()| InferenceError::ProviderUnavailable("ocr down".into()))
        }

        async fn caption(&self, _image: &ImageInput) -> Result<String, InferenceError> {
            self.caption
                .map(str::to_string)
                .map_err(|()| InferenceError::ProviderUnavailable("caption down".into()))
        }
    }

    async fn stored_image(dir: &TempDir) -> ScratchHandle {
        let path: PathBuf = dir.path().join("image.png");
        tokio::fs::write(&path, b"\x89PNG\r\n\x1a\nfake")
            .await
            .expect("write image");
        ScratchHandle::new(path)
    }

    async fn extract_image(vision: ScriptedVision) -> Result<String, ExtractionError> {
        let dir = TempDir::new().expect("temp dir");
        let handle = stored_image(&dir).await;
        ImageTextExtractor::new(Arc::new(vision), Duration::from_secs(5))
            .extract(&handle, "image/png")
            .await
    }

    #[tokio::test]
    async fn image_extractor_combines_both_passes() {
        let text = extract_image(ScriptedVision {
            ocr: Ok("Mitochondria"),
            caption: Ok("a diagram of a cell"),
        })
        .await
        .expect("text");
        assert_eq!(text, "Mitochondria\na diagram of a cell");
    }

    #[tokio::test]
    async fn one_failed_pass_contributes_empty_segment() {
        let text = extract_image(ScriptedVision {
            ocr: Err(()),
            caption: Ok("a diagram of a cell"),
        })
        .await
        .expect("caption alone is enough");
        assert_eq!(text, "a diagram of a cell");

        let text = extract_image(ScriptedVision {
            ocr: Ok("Mitochondria"),
            caption: Err(()),
        })
        .await
        .expect("ocr alone is enough");
        assert_eq!(text, "Mitochondria");
    }

    #[tokio::test]
    async fn both_passes_failing_is_fatal() {
        let error = extract_image(ScriptedVision {
            ocr: Err(()),
            caption: Err(()),
        })
        .await
        .expect_err("fatal");
        assert!(matches!(error, ExtractionError::ImageUnreadable { .. }));
    }

    struct StalledExtractor;

    #[async_trait]
    impl TextExtractor for StalledExtractor {
        async fn extract(
            &self,
            _handle: &ScratchHandle,
            _media_type: &str,
        ) -> Result<String, ExtractionError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn dispatcher_enforces_deadline() {
        let extractors = Extractors::new(
            Arc::new(StalledExtractor),
            Arc::new(StalledExtractor),
            Duration::from_millis(20),
        );
        let error = extractors
            .extract(
                &ScratchHandle::new(PathBuf::from("/nowhere")),
                SourceKind::Pdf,
                "application/pdf",
            )
            .await
            .expect_err("timeout");
        assert!(matches!(error, ExtractionError::Timeout(_)));
    }

    #[tokio::test]
    async fn dispatcher_reads_pdf_from_handle() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("doc.pdf");
        tokio::fs::write(&path, pdf_with_lines(&["Cellular respiration"]))
            .await
            .expect("write pdf");
        let extractors = Extractors::new(
            Arc::new(PdfTextExtractor),
            Arc::new(StalledExtractor),
            Duration::from_secs(5),
        );
        let result = extractors
            .extract(&ScratchHandle::new(path), SourceKind::Pdf, "application/pdf")
            .await
            .expect("extracted");
        assert_eq!(result.source, SourceKind::Pdf);
        assert!(result.text.contains("Cellular respiration"));
    }

    /// OCR pass that never answers, caption that answers immediately.
    struct StalledOcr;

    #[async_trait]
    impl VisionInference for StalledOcr {
        async fn recognize_text(&self, _image: &ImageInput) -> Result<String, InferenceError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("too late".into())
        }

        async fn caption(&self, _image: &ImageInput) -> Result<String, InferenceError> {
            Ok("a diagram of a cell".into())
        }
    }

    #[tokio::test]
    async fn stalled_ocr_keeps_caption_under_standard_deadline() {
        let dir = TempDir::new().expect("temp dir");
        let handle = stored_image(&dir).await;
        let extractors = Extractors::standard(Arc::new(StalledOcr), Duration::from_millis(50));

        for _ in 0..20 {
            let result = extractors
                .extract(&handle, SourceKind::Image, "image/png")
                .await
                .expect("caption survives a stalled OCR pass");
            assert_eq!(result.text, "a diagram of a cell");
        }
    }

    /// Records the media type each call receives.
    struct MediaTypeRecorder {
        seen: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl VisionInference for MediaTypeRecorder {
        async fn recognize_text(&self, image: &ImageInput) -> Result<String, InferenceError> {
            self.seen.lock().expect("lock").push(image.media_type.clone());
            Ok("text".into())
        }

        async fn caption(&self, image: &ImageInput) -> Result<String, InferenceError> {
            self.seen.lock().expect("lock").push(image.media_type.clone());
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn declared_type_is_used_when_bytes_are_unrecognized() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("photo");
        tokio::fs::write(&path, b"not a known signature")
            .await
            .expect("write image");
        let vision = Arc::new(MediaTypeRecorder {
            seen: std::sync::Mutex::new(Vec::new()),
        });

        ImageTextExtractor::new(vision.clone(), Duration::from_secs(5))
            .extract(&ScratchHandle::new(path), "Image/HEIC; q=1")
            .await
            .expect("text");

        assert_eq!(
            *vision.seen.lock().expect("lock"),
            vec!["image/heic".to_string(), "image/heic".to_string()]
        );
    }

    #[test]
    fn sniffed_image_type_wins_over_declared() {
        assert_eq!(
            image_media_type(b"\x89PNG\r\n\x1a\nrest", "image/jpeg"),
            "image/png"
        );
    }
}
