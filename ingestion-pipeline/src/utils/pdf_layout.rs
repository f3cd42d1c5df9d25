use common::{error::AppError, storage::types::chunk::BoundingBox};
use lopdf::Document;
use pdf_extract::{MediaBox, OutputDev, OutputError, Transform};
use tracing::debug;
use unicode_normalization::UnicodeNormalization;

/// Vertical gap, in multiples of the font size, that starts a new block.
const BLOCK_GAP_RATIO: f32 = 1.6;
/// Horizontal gap, in multiples of the font size, read as a word space.
const WORD_GAP_RATIO: f32 = 0.15;

/// Text of one page, partitioned into layout blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    pub number: u32,
    pub blocks: Vec<TextBlock>,
}

impl PageText {
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextBlock {
    pub text: String,
    pub bbox: Option<BoundingBox>,
}

/// A run of glyphs on one baseline.
#[derive(Debug, Clone)]
struct Fragment {
    text: String,
    x0: f32,
    x1: f32,
    y: f32,
    size: f32,
}

impl Fragment {
    fn bbox(&self) -> BoundingBox {
        BoundingBox::new(
            self.x0,
            self.y - self.size * 0.2,
            self.x1.max(self.x0),
            self.y + self.size * 0.8,
        )
    }

    /// Whether a glyph at `(x, y)` continues this run, and if so whether a
    /// word space separates it from the previous glyph.
    fn continues_at(&self, x: f32, y: f32) -> Option<bool> {
        let same_baseline = (self.y - y).abs() < self.size * 0.5;
        let gap = x - self.x1;
        if !same_baseline || gap < -self.size || gap > self.size * 3.0 {
            return None;
        }
        Some(gap > self.size * WORD_GAP_RATIO)
    }
}

/// Collects decoded glyphs with their positions while pdf-extract walks the
/// content streams; fonts, encodings and ToUnicode maps are resolved there.
#[derive(Default)]
struct LayoutCollector {
    pages: Vec<PageText>,
    number: u32,
    fragments: Vec<Fragment>,
    run: Option<Fragment>,
}

impl LayoutCollector {
    fn flush_run(&mut self) {
        if let Some(run) = self.run.take() {
            self.fragments.push(run);
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn push_glyph(&mut self, trm: &Transform, width: f64, font_size: f64, glyph: &str) {
        if glyph.is_empty() {
            return;
        }
        let horizontal = trm.m11.hypot(trm.m12);
        let vertical = trm.m21.hypot(trm.m22);
        let scale = if vertical > 0.0 { vertical } else { 1.0 };
        let size = ((font_size * scale) as f32).max(1.0);
        let x = trm.m31 as f32;
        let y = trm.m32 as f32;
        let advance = (width * font_size * horizontal) as f32;

        if let Some(run) = self.run.as_mut() {
            if let Some(spaced) = run.continues_at(x, y) {
                let boundary = run.text.ends_with(char::is_whitespace)
                    || glyph.starts_with(char::is_whitespace);
                if spaced && !boundary {
                    run.text.push(' ');
                }
                run.text.push_str(glyph);
                run.x1 = x + advance;
                return;
            }
        }

        self.flush_run();
        self.run = Some(Fragment {
            text: glyph.to_string(),
            x0: x,
            x1: x + advance,
            y,
            size,
        });
    }
}

impl OutputDev for LayoutCollector {
    fn begin_page(
        &mut self,
        page_num: u32,
        _media_box: &MediaBox,
        _art_box: Option<(f64, f64, f64, f64)>,
    ) -> Result<(), OutputError> {
        self.number = page_num;
        self.fragments.clear();
        self.run = None;
        Ok(())
    }

    fn end_page(&mut self) -> Result<(), OutputError> {
        self.flush_run();
        let blocks = group_fragments(std::mem::take(&mut self.fragments));
        debug!(page = self.number, blocks = blocks.len(), "pdf page extracted");
        self.pages.push(PageText {
            number: self.number,
            blocks,
        });
        Ok(())
    }

    fn output_character(
        &mut self,
        trm: &Transform,
        width: f64,
        _spacing: f64,
        font_size: f64,
        glyph: &str,
    ) -> Result<(), OutputError> {
        self.push_glyph(trm, width, font_size, glyph);
        Ok(())
    }

    fn begin_word(&mut self) -> Result<(), OutputError> {
        Ok(())
    }

    fn end_word(&mut self) -> Result<(), OutputError> {
        Ok(())
    }

    fn end_line(&mut self) -> Result<(), OutputError> {
        Ok(())
    }
}

/// Walks every page of a PDF and returns its text blocks in content order.
pub fn extract_pages(bytes: &[u8]) -> Result<Vec<PageText>, AppError> {
    let document = Document::load_mem(bytes)
        .map_err(|err| AppError::Processing(format!("Failed to parse PDF: {err}")))?;

    let mut collector = LayoutCollector::default();
    pdf_extract::output_doc(&document, &mut collector)
        .map_err(|err| AppError::Processing(format!("Failed to extract text from PDF: {err:?}")))?;

    Ok(collector.pages)
}

/// Merges fragments into blocks: same baseline joins with a space, the next
/// line joins with a newline, and a large vertical jump starts a new block.
/// Ligatures and compatibility forms are folded with NFKC.
fn group_fragments(fragments: Vec<Fragment>) -> Vec<TextBlock> {
    let mut blocks: Vec<TextBlock> = Vec::new();
    let mut current: Option<(String, BoundingBox, Fragment)> = None;

    for fragment in fragments {
        if fragment.text.trim().is_empty() {
            continue;
        }
        let bbox = fragment.bbox();
        current = Some(match current.take() {
            None => (fragment.text.trim().to_string(), bbox, fragment),
            Some((mut text, block_box, last)) => {
                let dy = last.y - fragment.y;
                let same_line = dy.abs() < last.size * 0.5;
                let paragraph_break = dy > last.size * BLOCK_GAP_RATIO || dy < -last.size;
                if paragraph_break {
                    blocks.push(TextBlock {
                        text: text.nfkc().collect(),
                        bbox: Some(block_box),
                    });
                    (fragment.text.trim().to_string(), bbox, fragment)
                } else {
                    text.push(if same_line { ' ' } else { '\n' });
                    text.push_str(fragment.text.trim());
                    (text, block_box.union(&bbox), fragment)
                }
            }
        });
    }

    if let Some((text, bbox, _)) = current {
        blocks.push(TextBlock {
            text: text.nfkc().collect(),
            bbox: Some(bbox),
        });
    }

    blocks
}

#[cfg(test)]
pub(crate) mod test_pdf {
    //! Builds small PDFs for extraction tests.
    use lopdf::{
        content::{Content, Operation},
        dictionary, Dictionary, Document, Object, Stream, StringFormat,
    };

    /// One entry per page; each page holds `(x, y, text)` lines, an empty page
    /// draws only a filled rectangle.
    pub fn build(pages: &[Vec<(i64, i64, &str)>]) -> Vec<u8> {
        let font = dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        };
        let pages = pages
            .iter()
            .map(|lines| {
                if lines.is_empty() {
                    return vec![
                        Operation::new("re", vec![0.into(), 0.into(), 595.into(), 842.into()]),
                        Operation::new("f", vec![]),
                    ];
                }
                lines
                    .iter()
                    .flat_map(|(x, y, text)| {
                        show_line(*x, *y, Object::string_literal(*text))
                    })
                    .collect()
            })
            .collect();
        assemble(font, pages)
    }

    /// A single page showing `raw` in a Times font whose encoding remaps code
    /// 12 to the `fi` ligature on top of WinAnsi.
    pub fn build_with_encoding(raw: &[u8]) -> Vec<u8> {
        let font = dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Times-Roman",
            "Encoding" => dictionary! {
                "Type" => "Encoding",
                "BaseEncoding" => "WinAnsiEncoding",
                "Differences" => vec![12.into(), Object::Name(b"fi".to_vec())],
            },
        };
        let text = Object::String(raw.to_vec(), StringFormat::Literal);
        assemble(font, vec![show_line(72, 700, text)])
    }

    fn show_line(x: i64, y: i64, text: Object) -> Vec<Operation> {
        vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 12.into()]),
            Operation::new("Td", vec![x.into(), y.into()]),
            Operation::new("Tj", vec![text]),
            Operation::new("ET", vec![]),
        ]
    }

    fn assemble(font: Dictionary, pages: Vec<Vec<Operation>>) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(font);
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids: Vec<Object> = Vec::new();
        for operations in pages {
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
            kids.push(page_id.into());
        }

        let count = i64::try_from(kids.len()).expect("page count");
        let pages_dict = dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages_dict));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).expect("save pdf");
        bytes
    }
}
