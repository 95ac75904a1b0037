use crate::cleaner::TextCleaner;
use crate::config::IngestConfig;
use crate::extractor::PageSource;
use crate::memory::resident_memory_mb;
use crate::models::{Page, PageStats};
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOptions {
    /// Log throughput and resident memory every this many pages; 0 disables.
    pub memory_log_interval: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            memory_log_interval: 10,
        }
    }
}

impl From<&IngestConfig> for StreamOptions {
    fn from(value: &IngestConfig) -> Self {
        Self {
            memory_log_interval: value.memory_log_interval,
        }
    }
}

/// Only the page being yielded is held in memory. Failed pages are logged
/// and skipped; blank pages are skipped silently.
pub struct PageStream<S: PageSource> {
    source: S,
    cleaner: TextCleaner,
    options: StreamOptions,
    remaining: std::vec::IntoIter<u32>,
    stats: PageStats,
    visited: usize,
    started: Instant,
}

impl<S: PageSource> PageStream<S> {
    pub fn new(source: S, cleaner: TextCleaner, options: StreamOptions) -> Self {
        let numbers = source.page_numbers();
        let stats = PageStats {
            total: numbers.len(),
            ..PageStats::default()
        };

        Self {
            source,
            cleaner,
            options,
            remaining: numbers.into_iter(),
            stats,
            visited: 0,
            started: Instant::now(),
        }
    }

    pub fn stats(&self) -> PageStats {
        self.stats
    }

    fn log_progress(&self) {
        let interval = self.options.memory_log_interval;
        if interval == 0 || self.visited % interval != 0 {
            return;
        }

        let elapsed = self.started.elapsed().as_secs_f64();
        let pages_per_second = if elapsed > 0.0 {
            self.visited as f64 / elapsed
        } else {
            0.0
        };

        match resident_memory_mb() {
            Some(memory_mb) => info!(
                pages_visited = self.visited,
                pages_total = self.stats.total,
                pages_per_second,
                memory_mb,
                "page stream progress"
            ),
            None => info!(
                pages_visited = self.visited,
                pages_total = self.stats.total,
                pages_per_second,
                "page stream progress"
            ),
        }
    }
}

impl<S: PageSource> Iterator for PageStream<S> {
    type Item = Page;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(number) = self.remaining.next() {
            self.visited += 1;
            let extracted = self.source.read_page(number);
            self.log_progress();

            match extracted {
                Ok(raw) => {
                    let text = self.cleaner.clean(&raw.text);
                    if text.is_empty() {
                        self.stats.blank += 1;
                        debug!(page_number = number, "skipping page without text");
                        continue;
                    }

                    self.stats.yielded += 1;
                    return Some(Page {
                        page_number: raw.number,
                        text,
                        width: raw.width,
                        height: raw.height,
                    });
                }
                Err(error) => {
                    self.stats.failed += 1;
                    warn!(page_number = number, %error, "skipping page that failed to extract");
                }
            }
        }

        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining.len()))
    }
}
