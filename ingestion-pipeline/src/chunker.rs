use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    path::Path,
    sync::Arc,
};

use common::{error::AppError, storage::types::chunk::Chunk};
use tracing::{debug, info, warn};

use crate::utils::{
    ocr::{OcrBlock, OcrEngine},
    pdf_layout::{extract_pages, PageText},
};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "tif", "tiff", "webp"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputKind {
    Pdf,
    Image,
    Text,
}

impl InputKind {
    fn detect(bytes: &[u8], filename: &str) -> Self {
        let extension = Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        if bytes.starts_with(b"%PDF") || extension == "pdf" {
            Self::Pdf
        } else if IMAGE_EXTENSIONS.contains(&extension.as_str()) {
            Self::Image
        } else {
            Self::Text
        }
    }
}

/// Result of extracting one upload.
#[derive(Debug, Clone, Default)]
pub struct ExtractedDocument {
    pub full_text: String,
    pub chunks: Vec<Chunk>,
    /// One entry per page, `false` where neither the text layer nor OCR
    /// produced anything.
    pub page_has_text: Vec<bool>,
    /// Set when extraction failed and the result is empty.
    pub diagnostic: Option<String>,
}

impl ExtractedDocument {
    pub fn page_count(&self) -> usize {
        self.page_has_text.len()
    }

    pub fn pages_without_text(&self) -> Vec<u32> {
        self.page_has_text
            .iter()
            .enumerate()
            .filter(|(_, has_text)| !**has_text)
            .filter_map(|(idx, _)| u32::try_from(idx + 1).ok())
            .collect()
    }

    fn failed(diagnostic: String) -> Self {
        Self {
            diagnostic: Some(diagnostic),
            ..Self::default()
        }
    }
}

/// Splits uploads into page-attributed chunks. Runs synchronously; callers
/// put it on the worker pool.
#[derive(Clone, Default)]
pub struct Chunker {
    ocr: Option<Arc<dyn OcrEngine>>,
}

impl Chunker {
    pub fn new(ocr: Option<Arc<dyn OcrEngine>>) -> Self {
        Self { ocr }
    }

    pub fn ocr_enabled(&self) -> bool {
        self.ocr.is_some()
    }

    /// `(full_text, chunks)`; both empty when extraction fails.
    pub fn chunk(&self, bytes: &[u8], filename: &str) -> (String, Vec<Chunk>) {
        let extracted = self.extract(bytes, filename);
        (extracted.full_text, extracted.chunks)
    }

    /// Extraction never fails outward: errors and panics in the PDF parser
    /// become an empty document carrying a diagnostic.
    pub fn extract(&self, bytes: &[u8], filename: &str) -> ExtractedDocument {
        let kind = InputKind::detect(bytes, filename);
        let outcome = catch_unwind(AssertUnwindSafe(|| match kind {
            InputKind::Pdf => self.extract_pdf(bytes),
            InputKind::Image => Ok(self.extract_image(bytes)),
            InputKind::Text => Ok(extract_text(bytes)),
        }));

        let document = match outcome {
            Ok(Ok(document)) => document,
            Ok(Err(err)) => ExtractedDocument::failed(format!("{filename}: {err}")),
            Err(_) => ExtractedDocument::failed(format!("{filename}: extractor panicked")),
        };

        if let Some(diagnostic) = &document.diagnostic {
            warn!(%filename, %diagnostic, "text extraction failed");
        } else {
            info!(
                %filename,
                pages = document.page_count(),
                chunks = document.chunks.len(),
                empty_pages = document.pages_without_text().len(),
                "text extraction finished"
            );
        }
        document
    }

    fn extract_pdf(&self, bytes: &[u8]) -> Result<ExtractedDocument, AppError> {
        let pages = extract_pages(bytes)?;
        let mut document = ExtractedDocument::default();
        let mut page_texts = Vec::with_capacity(pages.len());

        for page in pages {
            let mut chunks = page_chunks(&page);
            if chunks.is_empty() {
                chunks = self.ocr_pdf_page(bytes, page.number);
            }

            document.page_has_text.push(!chunks.is_empty());
            let text = chunks
                .iter()
                .map(|chunk| chunk.text.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");
            page_texts.push(format!("--- Page {} ---\n{}", page.number, text));
            document.chunks.extend(chunks);
        }

        document.full_text = page_texts.join("\n\n");
        Ok(document)
    }

    fn ocr_pdf_page(&self, bytes: &[u8], page: u32) -> Vec<Chunk> {
        let Some(ocr) = &self.ocr else {
            debug!(page, "page has no text layer and OCR is disabled");
            return Vec::new();
        };
        match ocr.recognize_pdf_page(bytes, page) {
            Ok(blocks) => ocr_chunks(blocks, page),
            Err(err) => {
                warn!(page, error = %err, "OCR failed for page");
                Vec::new()
            }
        }
    }

    fn extract_image(&self, bytes: &[u8]) -> ExtractedDocument {
        let chunks = match &self.ocr {
            Some(ocr) => match ocr.recognize_image(bytes) {
                Ok(blocks) => ocr_chunks(blocks, 1),
                Err(err) => {
                    warn!(error = %err, "OCR failed for image");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        let full_text = chunks
            .iter()
            .map(|chunk| chunk.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        ExtractedDocument {
            full_text,
            page_has_text: vec![!chunks.is_empty()],
            chunks,
            diagnostic: None,
        }
    }
}

fn page_chunks(page: &PageText) -> Vec<Chunk> {
    page.blocks
        .iter()
        .filter_map(|block| Chunk::new(block.text.clone(), page.number, block.bbox))
        .collect()
}

fn ocr_chunks(blocks: Vec<OcrBlock>, page: u32) -> Vec<Chunk> {
    blocks
        .into_iter()
        .filter_map(|block| Chunk::new(block.text, page, block.bbox))
        .collect()
}

fn extract_text(bytes: &[u8]) -> ExtractedDocument {
    let text = String::from_utf8_lossy(bytes).into_owned();
    let chunks: Vec<Chunk> = Chunk::new(text.clone(), 1, None).into_iter().collect();
    ExtractedDocument {
        full_text: text,
        page_has_text: vec![!chunks.is_empty()],
        chunks,
        diagnostic: None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use common::storage::types::chunk::BoundingBox;

    use super::*;
    use crate::utils::pdf_layout::test_pdf;

    struct RecordingOcr {
        pages: Mutex<Vec<u32>>,
    }

    impl OcrEngine for RecordingOcr {
        fn recognize_pdf_page(&self, _pdf: &[u8], page: u32) -> Result<Vec<OcrBlock>, AppError> {
            self.pages.lock().expect("lock").push(page);
            Ok(vec![
                OcrBlock {
                    text: "Scanned figure caption".into(),
                    bbox: Some(BoundingBox::new(10.0, 10.0, 200.0, 30.0)),
                },
                OcrBlock {
                    text: " ".into(),
                    bbox: None,
                },
            ])
        }

        fn recognize_image(&self, _image: &[u8]) -> Result<Vec<OcrBlock>, AppError> {
            Ok(vec![OcrBlock {
                text: "whiteboard notes".into(),
                bbox: None,
            }])
        }
    }

    #[test]
    fn test_two_page_pdf_without_ocr() {
        let pdf = test_pdf::build(&[
            vec![
                (72, 700, "Graph neural networks"),
                (72, 686, "propagate node features."),
            ],
            vec![],
        ]);

        let document = Chunker::default().extract(&pdf, "gnn.pdf");

        assert!(document.diagnostic.is_none());
        assert_eq!(document.page_has_text, vec![true, false]);
        assert_eq!(document.pages_without_text(), vec![2]);
        assert!(!document.chunks.is_empty());
        for chunk in &document.chunks {
            assert_eq!(chunk.page, 1);
            assert!(chunk.text.trim().chars().count() > 1);
            assert!(chunk.bbox.is_some());
        }
        assert!(document.full_text.starts_with("--- Page 1 ---\nGraph neural networks"));
        assert!(document.full_text.contains("--- Page 2 ---"));
    }

    #[test]
    fn test_empty_page_is_routed_to_ocr() {
        let pdf = test_pdf::build(&[vec![(72, 700, "Intro text")], vec![]]);
        let ocr = Arc::new(RecordingOcr {
            pages: Mutex::new(Vec::new()),
        });
        let chunker = Chunker::new(Some(Arc::clone(&ocr) as Arc<dyn OcrEngine>));

        let document = chunker.extract(&pdf, "scan.pdf");

        assert_eq!(*ocr.pages.lock().expect("lock"), vec![2]);
        assert_eq!(document.page_has_text, vec![true, true]);
        let ocr_chunk = document
            .chunks
            .iter()
            .find(|chunk| chunk.page == 2)
            .expect("ocr chunk");
        assert_eq!(ocr_chunk.text, "Scanned figure caption");
        assert_eq!(document.chunks.iter().filter(|c| c.page == 2).count(), 1);
    }

    #[test]
    fn test_plain_text_is_single_chunk() {
        let (full_text, chunks) = Chunker::default().chunk("  notes about RAG  ".as_bytes(), "notes.txt");
        assert_eq!(full_text, "  notes about RAG  ");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "notes about RAG");
        assert_eq!(chunks[0].page, 1);
        assert!(chunks[0].bbox.is_none());
    }

    #[test]
    fn test_broken_pdf_yields_empty_result() {
        let document = Chunker::default().extract(b"%PDF-1.5 truncated", "broken.pdf");
        assert!(document.full_text.is_empty());
        assert!(document.chunks.is_empty());
        assert!(document.diagnostic.is_some());
    }

    #[test]
    fn test_image_without_ocr_has_no_chunks() {
        let (text, chunks) = Chunker::default().chunk(&[0x89, b'P', b'N', b'G'], "board.png");
        assert!(text.is_empty());
        assert!(chunks.is_empty());

        let chunker = Chunker::new(Some(Arc::new(RecordingOcr {
            pages: Mutex::new(Vec::new()),
        })));
        let (text, chunks) = chunker.chunk(&[0x89, b'P', b'N', b'G'], "board.png");
        assert_eq!(text, "whiteboard notes");
        assert_eq!(chunks.len(), 1);
    }
}
