//! Collector integration
//!
//! The execution core does not own a garbage collector. It exposes what a
//! collector needs: a safe point before each stack growth, and a view of the
//! live frames of a context so the live part of its stack can be traced.

use crate::call_frame::FrameRange;
use crate::context::ExecutionContext;
use crate::value::Value;

/// Hook for an external garbage collector
pub trait Collector {
    /// Called when the stack is about to grow for a call. The context is in
    /// a consistent state: every live value is below the stack top or inside
    /// a live frame's range.
    fn safe_point(&self, ctx: &ExecutionContext);
}

/// Collector that does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCollector;

impl Collector for NoCollector {
    fn safe_point(&self, _ctx: &ExecutionContext) {}
}

impl ExecutionContext {
    /// Live frames, innermost first
    pub fn live_frames(&self) -> impl Iterator<Item = FrameRange> + '_ {
        self.frames[..=self.ci].iter().rev().map(|frame| FrameRange {
            func: frame.func,
            top: frame.top,
            native: frame.is_native(),
        })
    }

    /// Values a collector must treat as roots: every slot below the top.
    pub fn live_values(&self) -> &[Value] {
        let end = self.top.min(self.stack.len());
        &self.stack[..end]
    }
}
