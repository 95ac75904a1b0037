use crate::config::{ChunkUnit, IngestConfig};
use crate::error::IngestError;
use crate::models::Chunk;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
    pub max_text_length: usize,
    pub unit: ChunkUnit,
    /// Break points for character mode, highest priority first.
    pub separators: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self::from(&IngestConfig::default())
    }
}

impl From<&IngestConfig> for ChunkingConfig {
    fn from(value: &IngestConfig) -> Self {
        Self {
            chunk_size: value.chunk_size,
            overlap: value.chunk_overlap,
            max_text_length: value.max_text_length,
            unit: value.chunk_unit,
            separators: value.chunk_separators.clone(),
        }
    }
}

impl ChunkingConfig {
    pub fn words(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size,
            overlap,
            unit: ChunkUnit::Words,
            ..Self::default()
        }
    }

    pub fn characters(chunk_size: usize, overlap: usize, separators: &[&str]) -> Self {
        Self {
            chunk_size,
            overlap,
            unit: ChunkUnit::Characters,
            separators: separators.iter().map(|sep| (*sep).to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::Configuration(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if self.overlap >= self.chunk_size {
            return Err(IngestError::Configuration(format!(
                "overlap {} must be smaller than chunk size {}",
                self.overlap, self.chunk_size
            )));
        }
        if self.max_text_length == 0 {
            return Err(IngestError::Configuration(
                "max text length must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    fn step(&self) -> usize {
        self.chunk_size - self.overlap
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextWindow {
    pub chunk_id: u64,
    pub text: String,
    // Window bounds in units (words or chars). Character-mode text is the
    // window with surrounding whitespace trimmed.
    pub start_offset: usize,
    pub end_offset: usize,
}

impl TextWindow {
    pub fn into_chunk(self, document_id: &str, page_number: u32) -> Chunk {
        Chunk {
            chunk_id: self.chunk_id,
            document_id: document_id.to_string(),
            page_number,
            text: self.text,
            start_offset: self.start_offset,
            end_offset: self.end_offset,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self, IngestError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    pub fn chunk<'a>(&'a self, text: &'a str, starting_chunk_id: u64) -> ChunkIter<'a> {
        let units = if text.trim().is_empty() {
            Units::Empty
        } else {
            match self.config.unit {
                ChunkUnit::Words => Units::Words(text.split_whitespace().collect()),
                ChunkUnit::Characters => Units::Characters(text.chars().collect()),
            }
        };

        ChunkIter {
            config: &self.config,
            units,
            next_start: Some(0),
            next_id: starting_chunk_id,
        }
    }
}

enum Units<'a> {
    Empty,
    Words(Vec<&'a str>),
    Characters(Vec<char>),
}

pub struct ChunkIter<'a> {
    config: &'a ChunkingConfig,
    units: Units<'a>,
    next_start: Option<usize>,
    next_id: u64,
}

impl Iterator for ChunkIter<'_> {
    type Item = TextWindow;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let start = self.next_start?;

            let (text, end, total) = match &self.units {
                Units::Empty => {
                    self.next_start = None;
                    return None;
                }
                Units::Words(words) => {
                    let end = (start + self.config.chunk_size).min(words.len());
                    (words[start..end].join(" "), end, words.len())
                }
                Units::Characters(chars) => {
                    let end = character_window_end(chars, start, self.config);
                    let text: String = chars[start..end].iter().collect();
                    (text.trim().to_string(), end, chars.len())
                }
            };

            self.next_start = if end >= total {
                None
            } else {
                match self.units {
                    Units::Words(_) => Some(start + self.config.step()),
                    _ => Some(end - self.config.overlap),
                }
            };

            // A character window can fall entirely on whitespace.
            if text.is_empty() {
                continue;
            }

            let chunk_id = self.next_id;
            self.next_id += 1;

            return Some(TextWindow {
                chunk_id,
                text: truncate_chars(text, self.config.max_text_length),
                start_offset: start,
                end_offset: end,
            });
        }
    }
}

/// Pulls the hard window end back to the last separator that still leaves
/// the window longer than the overlap, trying separators in priority order.
fn character_window_end(chars: &[char], start: usize, config: &ChunkingConfig) -> usize {
    let hard_end = (start + config.chunk_size).min(chars.len());
    if hard_end == chars.len() {
        return hard_end;
    }

    let window: String = chars[start..hard_end].iter().collect();
    for separator in &config.separators {
        if separator.is_empty() {
            continue;
        }
        if let Some(byte_index) = window.rfind(separator.as_str()) {
            let cut = start + window[..byte_index].chars().count() + separator.chars().count();
            if cut > start + config.overlap {
                return cut;
            }
        }
    }

    hard_end
}

fn truncate_chars(mut text: String, max_chars: usize) -> String {
    if let Some((byte_index, _)) = text.char_indices().nth(max_chars) {
        text.truncate(byte_index);
    }
    text
}
