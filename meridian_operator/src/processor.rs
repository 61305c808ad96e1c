//! The opaque "compiled row/page processor" ABI boundary (§9): the
//! execution core calls compiled expressions through these traits without
//! caring whether the implementation is a JIT, bytecode interpreter, or
//! (as here, for tests and the reference operator bodies) a plain closure.
//! Expression compilation itself is owned by the planner/expression
//! compiler (§1), out of this core's scope.

use meridian_error::ErrorCategory;
use meridian_page::page::Page;

/// A failure evaluating a compiled expression against a row or page —
/// division by zero, a cast that doesn't fit, an out-of-range function
/// argument. Always `User`-category per §7 (the query asked for an
/// operation that fails on this data, not an engine bug).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorError {
    /// The failure's category; `User` unless a processor implementation
    /// has reason to report otherwise.
    pub category: ErrorCategory,
    /// Human-readable detail.
    pub message: String,
}

impl ProcessorError {
    /// Construct a `User`-category processor error, the common case.
    pub fn user(message: impl Into<String>) -> Self {
        Self {
            category: ErrorCategory::User,
            message: message.into(),
        }
    }
}

/// A compiled, per-row boolean predicate — what a Filter operator applies
/// to decide which positions of an input [`Page`] survive (§4.4).
pub trait CompiledRowProcessor: std::fmt::Debug + Send {
    /// Evaluate the predicate for the row at `position` in `page`.
    fn evaluate(&self, page: &Page, position: usize) -> Result<bool, ProcessorError>;
}

/// A compiled page-to-page transform — what a Project operator applies to
/// produce its output channels from an input [`Page`] (§4.4).
pub trait CompiledPageProcessor: std::fmt::Debug + Send {
    /// Project `page` into a new page of (possibly differently-shaped)
    /// output channels.
    fn process(&self, page: &Page) -> Result<Page, ProcessorError>;
}

/// A [`CompiledRowProcessor`] built directly from a Rust closure — the
/// reference implementation used to drive the Driver and its tests
/// end-to-end (scenario D) without a real expression engine (§4.4
/// SUPPLEMENT note).
pub struct ClosureRowProcessor<F>(pub F)
where
    F: Fn(&Page, usize) -> bool + Send;

impl<F> std::fmt::Debug for ClosureRowProcessor<F>
where
    F: Fn(&Page, usize) -> bool + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClosureRowProcessor").finish_non_exhaustive()
    }
}

impl<F> CompiledRowProcessor for ClosureRowProcessor<F>
where
    F: Fn(&Page, usize) -> bool + Send,
{
    fn evaluate(&self, page: &Page, position: usize) -> Result<bool, ProcessorError> {
        Ok((self.0)(page, position))
    }
}

/// A [`CompiledPageProcessor`] built directly from a Rust closure.
pub struct ClosurePageProcessor<F>(pub F)
where
    F: Fn(&Page) -> Page + Send;

impl<F> std::fmt::Debug for ClosurePageProcessor<F>
where
    F: Fn(&Page) -> Page + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClosurePageProcessor").finish_non_exhaustive()
    }
}

impl<F> CompiledPageProcessor for ClosurePageProcessor<F>
where
    F: Fn(&Page) -> Page + Send,
{
    fn process(&self, page: &Page) -> Result<Page, ProcessorError> {
        Ok((self.0)(page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_page::block::{Block, FixedWidthBlock};

    fn int_page(values: &[i32]) -> Page {
        Page::new(vec![Block::IntArray(FixedWidthBlock::new(values.to_vec(), None).unwrap())])
    }

    #[test]
    fn closure_row_processor_evaluates_predicate() {
        let page = int_page(&[-1, 2, -3, 4]);
        let positive = ClosureRowProcessor(|p: &Page, i: usize| p.channel(0).get_long(i).unwrap() > 0);
        assert!(!positive.evaluate(&page, 0).unwrap());
        assert!(positive.evaluate(&page, 1).unwrap());
    }

    #[test]
    fn closure_page_processor_transforms_page() {
        let page = int_page(&[1, 2, 3]);
        let double = ClosurePageProcessor(|p: &Page| {
            let values: Vec<i32> = (0..p.position_count())
                .map(|i| (p.channel(0).get_long(i).unwrap() * 2) as i32)
                .collect();
            Page::new(vec![Block::IntArray(FixedWidthBlock::new(values, None).unwrap())])
        });
        let out = double.process(&page).unwrap();
        assert_eq!(out.channel(0).get_long(0).unwrap(), 2);
        assert_eq!(out.channel(0).get_long(2).unwrap(), 6);
    }
}
