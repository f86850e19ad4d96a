//! Stack manager
//!
//! Growth, shrinking and space guarantees for a context's value stack.
//!
//! The stack is a `Vec<Value>` of `stack_last + extra_stack` slots. Frames,
//! the to-be-closed list and message handlers refer to slots by index, so a
//! reallocation never has to rewrite them; `relocating` is raised for the
//! duration of the move so a collector can assert it never observes one.

use core_types::Status;
use tracing::{debug, trace};

use crate::context::ExecutionContext;
use crate::error::CallResult;
use crate::value::Value;

impl ExecutionContext {
    /// Logical stack size (0 before first use)
    pub fn stack_size(&self) -> usize {
        self.stack_last
    }

    /// True only while the stack is being moved to a new allocation
    pub fn is_relocating(&self) -> bool {
        self.relocating
    }

    /// Slots between the top and the logical end; 0 while internal pushes
    /// use the extra margin
    pub(crate) fn free_slots(&self) -> usize {
        self.stack_last.saturating_sub(self.top)
    }

    /// Write a slot inside the allocation (the extra margin included).
    pub(crate) fn set_slot(&mut self, idx: usize, value: Value) {
        debug_assert!(
            idx < self.stack.len(),
            "slot {} past the end of a stack of {} slots",
            idx,
            self.stack.len()
        );
        self.stack[idx] = value;
    }

    /// Move the stack to an allocation of `new_size` logical slots.
    ///
    /// Fails with a memory error (or `Ok(false)` when `raise` is off) if the
    /// allocation is refused; the old stack is then left untouched.
    pub(crate) fn realloc_stack(&mut self, new_size: usize, raise: bool) -> CallResult<bool> {
        let new_len = new_size + self.global.config.extra_stack;
        let within_limit = self
            .global
            .config
            .allocation_limit
            .map_or(true, |limit| new_len <= limit);
        self.relocating = true;
        let allocated = within_limit
            && (new_len <= self.stack.len()
                || self.stack.try_reserve_exact(new_len - self.stack.len()).is_ok());
        if !allocated {
            self.relocating = false;
            debug!(
                old_size = self.stack_last,
                new_size, "stack allocation refused"
            );
            if raise {
                return Err(self.throw(Status::MemoryError));
            }
            return Ok(false);
        }
        let old_size = self.stack_last;
        let shrinking = new_len < self.stack.len();
        self.stack.resize(new_len, Value::Nil);
        if shrinking {
            self.stack.shrink_to_fit();
        }
        self.stack_last = new_size;
        self.relocating = false;
        trace!(old_size, new_size, "stack reallocated");
        Ok(true)
    }

    /// Grow the stack so that at least `n` slots are free above the top.
    ///
    /// Doubles the size (capped at `max_stack`, at least what is needed).
    /// A request beyond `max_stack` grants the error margin once and raises
    /// "stack overflow"; a request while the margin is already in use raises
    /// an error-in-error-handling. With `raise` off, failures return
    /// `Ok(false)` instead.
    pub fn grow_stack(&mut self, n: usize, raise: bool) -> CallResult<bool> {
        self.stack_ready();
        let size = self.stack_last;
        let max = self.global.config.max_stack;
        if size > max {
            // already using the error margin
            debug_assert_eq!(size, self.global.config.error_stack_size());
            if raise {
                return Err(self.throw(Status::ErrorInErrorHandling));
            }
            return Ok(false);
        }
        if n < max {
            let needed = self.top + n;
            let new_size = (2 * size).min(max).max(needed);
            if new_size <= max {
                return self.realloc_stack(new_size, raise);
            }
        }
        debug!(size, requested = n, "stack overflow");
        let error_size = self.global.config.error_stack_size();
        self.realloc_stack(error_size, raise)?;
        if raise {
            return Err(self.runtime_error("stack overflow"));
        }
        Ok(false)
    }

    /// Guarantee `n` free slots above the top, raising on failure.
    pub fn ensure_stack(&mut self, n: usize) -> CallResult<()> {
        self.stack_ready();
        if self.free_slots() <= n {
            self.grow_stack(n, true)?;
        }
        Ok(())
    }

    /// Like [`ensure_stack`](Self::ensure_stack), but a growth is a safe point
    /// for the collector.
    pub(crate) fn ensure_stack_gc(&mut self, n: usize) -> CallResult<()> {
        self.stack_ready();
        if self.free_slots() <= n {
            let collector = std::rc::Rc::clone(&self.global.collector);
            collector.safe_point(self);
            self.grow_stack(n, true)?;
        }
        Ok(())
    }

    /// Reserve `n` more slots for the current frame without raising.
    ///
    /// Returns false when the stack cannot grow that far.
    pub fn check_stack(&mut self, n: usize) -> bool {
        self.stack_ready();
        let ok = if self.free_slots() > n {
            true
        } else {
            matches!(self.grow_stack(n, false), Ok(true))
        };
        let ci = self.ci;
        if ok && self.frames[ci].top < self.top + n {
            self.frames[ci].top = self.top + n;
        }
        ok
    }

    /// Slots in use: the highest top among live frames and the stack top,
    /// plus one, but never less than `min_stack`.
    pub fn stack_in_use(&self) -> usize {
        let highest = self.frames[..=self.ci]
            .iter()
            .map(|frame| frame.top)
            .fold(self.top, usize::max);
        (highest + 1).max(self.global.config.min_stack)
    }

    /// Release stack space that is no longer needed.
    ///
    /// Shrinks to twice the slots in use when the stack is more than three
    /// times larger, leaving the error margin if it is no longer needed.
    /// Allocation failure here is ignored.
    pub fn shrink_stack(&mut self) {
        if self.stack.is_empty() {
            return;
        }
        let in_use = self.stack_in_use();
        let max = self.global.config.max_stack;
        let limit = if in_use > max / 3 { max } else { in_use * 3 };
        if in_use <= max && self.stack_last > limit {
            let new_size = if in_use > max / 2 { max } else { in_use * 2 };
            let _ = self.realloc_stack(new_size, false);
        }
        self.shrink_frames();
    }

    /// Drop half of the cached frame records above the current frame.
    pub(crate) fn shrink_frames(&mut self) {
        let unused = self.frames.len() - (self.ci + 1);
        let keep = self.frames.len() - unused / 2;
        self.frames.truncate(keep);
    }
}
