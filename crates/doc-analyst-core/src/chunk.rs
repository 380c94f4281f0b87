//! Overlapping message windows.
//!
//! A [`WindowPlan`] splits a file's message sequence into windows of at most
//! `window_size` messages whose starts are `stride` apart. The final window
//! is pulled back so it always ends at the last message, which means its
//! overlap with the penultimate window can exceed `window_size - stride`.
//!
//! # Example
//!
//! ```rust
//! use doc_analyst_core::chunk::WindowPlan;
//!
//! let plan = WindowPlan::new(6, 4).unwrap();
//! let spans: Vec<_> = plan.spans(8).collect();
//! assert_eq!(spans, vec![0..6, 2..8]);
//! ```

use std::ops::Range;

use crate::error::AnalysisError;
use crate::models::{Message, Window};

pub const DEFAULT_WINDOW_SIZE: usize = 6;
pub const DEFAULT_STRIDE: usize = 5;

/// Validated windowing parameters. `1 <= stride < window_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPlan {
    window_size: usize,
    stride: usize,
}

impl Default for WindowPlan {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            stride: DEFAULT_STRIDE,
        }
    }
}

impl WindowPlan {
    pub fn new(window_size: usize, stride: usize) -> Result<Self, AnalysisError> {
        if stride == 0 {
            return Err(AnalysisError::InvalidWindowPlan(
                "stride must be at least 1".to_string(),
            ));
        }
        if stride >= window_size {
            return Err(AnalysisError::InvalidWindowPlan(format!(
                "stride ({}) must be smaller than window_size ({})",
                stride, window_size
            )));
        }
        Ok(Self {
            window_size,
            stride,
        })
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Number of windows a sequence of `len` messages produces.
    pub fn count(&self, len: usize) -> usize {
        match len {
            0 => 0,
            n if n <= self.window_size => 1,
            n => 1 + (n - self.window_size).div_ceil(self.stride),
        }
    }

    /// Message index ranges for a sequence of `len` messages.
    pub fn spans(&self, len: usize) -> Spans {
        Spans {
            plan: *self,
            len,
            next: 0,
            total: self.count(len),
        }
    }

    /// Lazily build windows over one file's messages.
    ///
    /// `first_index` is the dispatch index given to the first window, so
    /// windows from several files can share one run-wide numbering.
    pub fn windows<'a>(
        &self,
        file_id: &'a str,
        messages: &'a [Message],
        first_index: usize,
    ) -> impl ExactSizeIterator<Item = Window> + 'a {
        self.spans(messages.len())
            .enumerate()
            .map(move |(i, span)| Window {
                index: first_index + i,
                file_id: file_id.to_string(),
                start: span.start,
                messages: messages[span].to_vec(),
            })
    }
}

/// Iterator over window spans. See [`WindowPlan::spans`].
#[derive(Debug, Clone)]
pub struct Spans {
    plan: WindowPlan,
    len: usize,
    next: usize,
    total: usize,
}

impl Iterator for Spans {
    type Item = Range<usize>;

    fn next(&mut self) -> Option<Range<usize>> {
        if self.next >= self.total {
            return None;
        }
        let i = self.next;
        self.next += 1;
        if i + 1 == self.total {
            let start = self.len.saturating_sub(self.plan.window_size);
            return Some(start..self.len);
        }
        let start = i * self.plan.stride;
        Some(start..start + self.plan.window_size)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.total - self.next;
        (left, Some(left))
    }
}

impl ExactSizeIterator for Spans {}

#[cfg(test)]
mod tests {
    use super::*;

    fn msgs(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| Message {
                index: i,
                file_id: "f".into(),
                sender: "s".into(),
                timestamp: None,
                text: format!("m{}", i),
                line: i + 1,
            })
            .collect()
    }

    #[test]
    fn rejects_invalid_plans() {
        assert!(WindowPlan::new(6, 0).is_err());
        assert!(WindowPlan::new(6, 6).is_err());
        assert!(WindowPlan::new(6, 7).is_err());
        assert!(WindowPlan::new(6, 5).is_ok());
    }

    #[test]
    fn empty_sequence_has_no_windows() {
        let plan = WindowPlan::default();
        assert_eq!(plan.windows("f", &[], 0).count(), 0);
    }

    #[test]
    fn short_sequence_is_one_window() {
        let m = msgs(3);
        let w: Vec<_> = WindowPlan::default().windows("f", &m, 0).collect();
        assert_eq!(w.len(), 1);
        assert_eq!(w[0].messages, m);
    }

    #[test]
    fn exact_fit_is_one_window() {
        assert_eq!(WindowPlan::default().count(6), 1);
    }

    #[test]
    fn final_window_ends_at_last_message() {
        let plan = WindowPlan::default();
        let spans: Vec<_> = plan.spans(13).collect();
        assert_eq!(spans, vec![0..6, 5..11, 7..13]);
    }

    #[test]
    fn windows_carry_dispatch_index_and_offset() {
        let m = msgs(8);
        let plan = WindowPlan::new(6, 4).unwrap();
        let w: Vec<_> = plan.windows("f", &m, 10).collect();
        assert_eq!(w.len(), 2);
        assert_eq!(w[0].index, 10);
        assert_eq!(w[1].index, 11);
        assert_eq!(w[1].start, 2);
        assert_eq!(w[1].messages.last().unwrap().text, "m7");
    }

    #[test]
    fn size_hint_is_exact() {
        let m = msgs(20);
        let it = WindowPlan::default().windows("f", &m, 0);
        assert_eq!(it.len(), WindowPlan::default().count(20));
    }
}
