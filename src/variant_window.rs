//! Variant window and stream synchronizer
//!
//! Reads and variants arrive in the same coordinate order. For every read the
//! synchronizer moves the variant stream forward so that the window holds the
//! variants that can still touch this read or a later one:
//!
//! 1. Skip-ahead: drop stream variants strictly before the read start
//! 2. Fetch-ahead: move stream variants strictly before the read end into the window
//! 3. Evict: pop window variants strictly before the read start
//!
//! Reads are processed with non-decreasing start, so an evicted variant is
//! never needed again.

use anyhow::Result;
use log::{debug, info};
use std::collections::vec_deque;
use std::collections::VecDeque;

use crate::variant::{GenomicPos, Variant};
use crate::vcf_source::VariantSource;

// ============================================================================
// Variant Window
// ============================================================================

/// Position-ordered buffer of variants, fetched at the back, evicted at the front
#[derive(Debug, Default)]
pub struct VariantWindow {
    variants: VecDeque<Variant>,
}

impl VariantWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    pub fn front(&self) -> Option<&Variant> {
        self.variants.front()
    }

    pub fn iter(&self) -> vec_deque::Iter<'_, Variant> {
        self.variants.iter()
    }

    /// Append a variant; positions must not decrease
    pub fn push_back(&mut self, variant: Variant) {
        debug_assert!(
            self.variants
                .back()
                .map_or(true, |last| last.pos <= variant.pos),
            "variant window must stay position-ordered"
        );
        self.variants.push_back(variant);
    }

    /// Drop every front variant strictly before `start`; returns how many went
    pub fn evict_before(&mut self, start: GenomicPos) -> usize {
        let mut evicted = 0;
        while let Some(front) = self.variants.front() {
            if front.pos >= start {
                break;
            }
            debug!("Evicting variant {}", front);
            self.variants.pop_front();
            evicted += 1;
        }
        evicted
    }

    /// Indices `[from, end)` of the run of variants anchored exactly at `pos`
    fn run_end(&self, from: usize, pos: GenomicPos) -> usize {
        let mut end = from;
        while end < self.variants.len() && self.variants[end].pos == pos {
            end += 1;
        }
        end
    }
}

// ============================================================================
// Window Cursor
// ============================================================================

/// Forward-only cursor used while walking one read
///
/// Reference positions visited during a CIGAR walk only increase, so the
/// cursor never moves back.
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowCursor {
    next: usize,
}

impl WindowCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip variants strictly before `pos` and return those anchored at `pos`,
    /// in window order.
    pub fn run_at<'w>(
        &mut self,
        window: &'w VariantWindow,
        pos: GenomicPos,
    ) -> vec_deque::Iter<'w, Variant> {
        while self.next < window.len() && window.variants[self.next].pos < pos {
            self.next += 1;
        }
        let end = window.run_end(self.next, pos);
        window.variants.range(self.next..end)
    }
}

// ============================================================================
// Stream Synchronizer
// ============================================================================

/// Counters for stream movement
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncStats {
    /// Variants dropped because they precede the read they were compared with
    pub skipped: usize,
    /// Variants moved into the window
    pub fetched: usize,
    /// Variants evicted from the window
    pub evicted: usize,
}

/// Keeps a [`VariantWindow`] in step with the read cursor
pub struct StreamSynchronizer<S: VariantSource> {
    source: S,
    /// Next unconsumed stream variant
    head: Option<Variant>,
    exhausted: bool,
    window: VariantWindow,
    stats: SyncStats,
}

impl<S: VariantSource> StreamSynchronizer<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            head: None,
            exhausted: false,
            window: VariantWindow::new(),
            stats: SyncStats::default(),
        }
    }

    pub fn window(&self) -> &VariantWindow {
        &self.window
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// True once the variant stream has no more records
    pub fn is_exhausted(&self) -> bool {
        self.exhausted && self.head.is_none()
    }

    /// Position of the stream head, pulling it from the source if needed
    fn peek_pos(&mut self) -> Result<Option<GenomicPos>> {
        if self.head.is_none() && !self.exhausted {
            self.head = self.source.next_variant()?;
            if self.head.is_none() {
                self.exhausted = true;
            }
        }
        Ok(self.head.as_ref().map(|v| v.pos))
    }

    /// Bring the window in line with a read spanning `[start, end)`
    ///
    /// # Returns
    /// The window, containing every stream variant in `[start, end)` plus any
    /// earlier-fetched variants not yet behind `start`.
    pub fn advance_to(&mut self, start: GenomicPos, end: GenomicPos) -> Result<&VariantWindow> {
        // Skip-ahead
        while let Some(pos) = self.peek_pos()? {
            if pos >= start {
                break;
            }
            if let Some(skipped) = self.head.take() {
                info!("Variant {} is before the read at {}, skipping", skipped, start);
                self.stats.skipped += 1;
            }
        }

        // Fetch-ahead
        while let Some(pos) = self.peek_pos()? {
            if pos >= end {
                break;
            }
            if let Some(fetched) = self.head.take() {
                debug!("Variant {} is before the read end {}, fetching", fetched, end);
                self.window.push_back(fetched);
                self.stats.fetched += 1;
            }
        }

        // Evict
        self.stats.evicted += self.window.evict_before(start);

        Ok(&self.window)
    }
}
