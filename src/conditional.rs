//! The `#if`/`#ifdef`/`#ifndef`/`#elif`/`#else`/`#endif` state machine.
//!
//! Each nesting level is one [`ConditionalFrame`]; [`ConditionalStack`]
//! owns the stack and exposes the transitions the expander drives from
//! its main loop.

use log::trace;

use crate::error::ErrorKind;

/// One level of `#if ... #endif` nesting.
#[derive(Debug, Clone, Copy)]
pub struct ConditionalFrame {
    pub should_skip: bool,
    pub has_else: bool,
    pub any_branch_taken: bool,
    pub parent_active: bool,
}

impl ConditionalFrame {
    /// `skip || !parent_active` — the single predicate the expander
    /// consults to decide whether the current token is suppressed.
    pub fn is_output_suppressed(&self) -> bool {
        self.should_skip || !self.parent_active
    }
}

#[derive(Debug, Default)]
pub struct ConditionalStack {
    frames: Vec<ConditionalFrame>,
}

impl ConditionalStack {
    pub fn new() -> ConditionalStack {
        ConditionalStack { frames: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Whether a token at the current nesting level should be
    /// suppressed from the output.
    pub fn should_skip_output(&self) -> bool {
        self.frames
            .last()
            .map(ConditionalFrame::is_output_suppressed)
            .unwrap_or(false)
    }

    fn parent_active(&self) -> bool {
        self.frames
            .last()
            .map(|f| f.parent_active && !f.is_output_suppressed())
            .unwrap_or(true)
    }

    /// Pushes a new frame for `#if`/`#ifdef`/`#ifndef`, whose initial
    /// predicate the caller has already evaluated into `condition_true`.
    pub fn push(&mut self, condition_true: bool) {
        let parent_active = self.parent_active();
        let frame = ConditionalFrame {
            should_skip: !condition_true,
            has_else: false,
            any_branch_taken: condition_true,
            parent_active,
        };
        trace!(
            "conditional: push depth={} should_skip={} parent_active={}",
            self.frames.len() + 1,
            frame.should_skip,
            frame.parent_active
        );
        self.frames.push(frame);
    }

    /// `#elif condition_true`. Errors if this block already saw an
    /// `#else`.
    pub fn elif(&mut self, condition_true: bool) -> Result<(), ErrorKind> {
        let frame = self
            .frames
            .last_mut()
            .ok_or(ErrorKind::UnbalancedEndif)?;
        if frame.has_else {
            return Err(ErrorKind::ElifBlockAfterElseFound);
        }
        frame.should_skip = frame.any_branch_taken || !condition_true;
        if !frame.should_skip {
            frame.any_branch_taken = true;
        }
        trace!(
            "conditional: elif depth={} should_skip={}",
            self.frames.len(),
            frame.should_skip
        );
        Ok(())
    }

    /// `#else`. Errors if this block already saw an `#else`.
    pub fn else_branch(&mut self) -> Result<(), ErrorKind> {
        let frame = self
            .frames
            .last_mut()
            .ok_or(ErrorKind::UnbalancedEndif)?;
        if frame.has_else {
            return Err(ErrorKind::AnotherElseBlockFound);
        }
        frame.should_skip = frame.any_branch_taken || !frame.should_skip;
        frame.has_else = true;
        trace!(
            "conditional: else depth={} should_skip={}",
            self.frames.len(),
            frame.should_skip
        );
        Ok(())
    }

    /// `#endif`. Errors (`UnbalancedEndif`) on an empty stack.
    pub fn pop(&mut self) -> Result<(), ErrorKind> {
        if self.frames.pop().is_none() {
            return Err(ErrorKind::UnbalancedEndif);
        }
        trace!("conditional: pop depth={}", self.frames.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_if_else() {
        let mut stack = ConditionalStack::new();
        stack.push(false);
        assert!(stack.should_skip_output());
        stack.else_branch().unwrap();
        assert!(!stack.should_skip_output());
        stack.pop().unwrap();
        assert!(stack.is_empty());
    }

    #[test]
    fn at_most_one_branch_across_elif_chain() {
        let mut stack = ConditionalStack::new();
        stack.push(false); // #if 0
        stack.elif(true).unwrap(); // #elif 1 -> active
        assert!(!stack.should_skip_output());
        stack.elif(true).unwrap(); // second #elif 1 -> already taken, stays skipped
        assert!(stack.should_skip_output());
        stack.else_branch().unwrap(); // #else -> already taken, stays skipped
        assert!(stack.should_skip_output());
        stack.pop().unwrap();
    }

    #[test]
    fn nested_inactive_dominates() {
        let mut stack = ConditionalStack::new();
        stack.push(false); // outer #if 0: inactive
        stack.push(true); // inner #if 1, but parent inactive
        assert!(stack.should_skip_output());
        stack.pop().unwrap();
        stack.pop().unwrap();
    }

    #[test]
    fn repeated_else_is_an_error() {
        let mut stack = ConditionalStack::new();
        stack.push(true);
        stack.else_branch().unwrap();
        assert_eq!(
            stack.else_branch().unwrap_err(),
            ErrorKind::AnotherElseBlockFound
        );
    }

    #[test]
    fn elif_after_else_is_an_error() {
        let mut stack = ConditionalStack::new();
        stack.push(true);
        stack.else_branch().unwrap();
        assert_eq!(
            stack.elif(true).unwrap_err(),
            ErrorKind::ElifBlockAfterElseFound
        );
    }

    #[test]
    fn endif_without_if_is_an_error() {
        let mut stack = ConditionalStack::new();
        assert_eq!(stack.pop().unwrap_err(), ErrorKind::UnbalancedEndif);
    }
}
