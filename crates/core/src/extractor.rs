use crate::cleaner::TextCleaner;
use crate::error::IngestError;
use crate::stream::{PageStream, StreamOptions};
use lopdf::{Document, Object, ObjectId};
use std::collections::BTreeMap;
use std::path::Path;

/// US Letter, used when a page carries no readable MediaBox.
const DEFAULT_PAGE_SIZE: (f32, f32) = (612.0, 792.0);

#[derive(Debug, Clone, PartialEq)]
pub struct RawPage {
    pub number: u32,
    pub text: String,
    pub width: f32,
    pub height: f32,
}

pub trait PageSource {
    fn page_numbers(&self) -> Vec<u32>;

    fn read_page(&mut self, page_number: u32) -> Result<RawPage, IngestError>;
}

pub trait PdfExtractor {
    type Source: PageSource;

    fn open(&self, path: &Path) -> Result<Self::Source, IngestError>;

    fn pages(
        &self,
        path: &Path,
        options: StreamOptions,
    ) -> Result<PageStream<Self::Source>, IngestError> {
        let source = self.open(path)?;
        Ok(PageStream::new(source, TextCleaner::new()?, options))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    type Source = LopdfSource;

    fn open(&self, path: &Path) -> Result<Self::Source, IngestError> {
        let document = Document::load(path).map_err(|error| IngestError::PdfOpen {
            path: path.display().to_string(),
            details: error.to_string(),
        })?;

        Ok(LopdfSource {
            pages: document.get_pages(),
            document,
        })
    }
}

pub struct LopdfSource {
    document: Document,
    pages: BTreeMap<u32, ObjectId>,
}

impl PageSource for LopdfSource {
    fn page_numbers(&self) -> Vec<u32> {
        self.pages.keys().copied().collect()
    }

    fn read_page(&mut self, page_number: u32) -> Result<RawPage, IngestError> {
        let page_id = self
            .pages
            .get(&page_number)
            .copied()
            .ok_or_else(|| IngestError::Extraction {
                page: page_number,
                details: "page is not part of the document".to_string(),
            })?;

        let text = self
            .document
            .extract_text(&[page_number])
            .map_err(|error| IngestError::Extraction {
                page: page_number,
                details: error.to_string(),
            })?;

        let (width, height) = media_box(&self.document, page_id).unwrap_or(DEFAULT_PAGE_SIZE);

        Ok(RawPage {
            number: page_number,
            text,
            width,
            height,
        })
    }
}

// MediaBox is inheritable through the page tree.
fn media_box(document: &Document, page_id: ObjectId) -> Option<(f32, f32)> {
    let mut current = Some(page_id);
    while let Some(id) = current {
        let dictionary = document.get_dictionary(id).ok()?;
        if let Ok(object) = dictionary.get(b"MediaBox") {
            let values = resolve(document, object)?
                .as_array()
                .ok()?
                .iter()
                .map(|value| resolve(document, value).and_then(number))
                .collect::<Option<Vec<f32>>>()?;
            if let [x0, y0, x1, y1] = values[..] {
                return Some(((x1 - x0).abs(), (y1 - y0).abs()));
            }
            return None;
        }
        current = dictionary
            .get(b"Parent")
            .and_then(Object::as_reference)
            .ok();
    }
    None
}

fn resolve<'a>(document: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => document.get_object(*id).ok(),
        other => Some(other),
    }
}

fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(value) => Some(*value as f32),
        Object::Real(value) => Some(*value as f32),
        _ => None,
    }
}
