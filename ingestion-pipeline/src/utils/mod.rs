pub mod ocr;
pub mod pdf_layout;
pub mod url_ingestion;
