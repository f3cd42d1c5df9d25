use common::{error::AppError, storage::types::chunk::BoundingBox};

/// A recognised region of text.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrBlock {
    pub text: String,
    pub bbox: Option<BoundingBox>,
}

/// Optical character recognition for pages without a text layer. Calls run
/// on the blocking worker pool, so implementations may be synchronous and
/// slow.
pub trait OcrEngine: Send + Sync {
    /// Recognises page `page` (1-based) of the given PDF.
    fn recognize_pdf_page(&self, pdf: &[u8], page: u32) -> Result<Vec<OcrBlock>, AppError>;

    fn recognize_image(&self, image: &[u8]) -> Result<Vec<OcrBlock>, AppError>;
}
