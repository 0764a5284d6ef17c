//! Stack-trace capture.
//!
//! Captures are truncated to a depth limit held in a thread-local slot.
//! The detector widens the limit for the duration of one capture with
//! [`widen_stack_trace_limit`] and the guard restores the prior value.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::cell::Cell;
use std::fmt;

/// Depth limit in effect when nothing has widened it.
pub const DEFAULT_STACK_TRACE_LIMIT: usize = 10;

thread_local! {
    static STACK_TRACE_LIMIT: Cell<usize> = const { Cell::new(DEFAULT_STACK_TRACE_LIMIT) };
}

/// The current depth limit for this thread.
#[must_use]
pub fn stack_trace_limit() -> usize {
    STACK_TRACE_LIMIT.with(Cell::get)
}

/// Sets the depth limit for this thread, returning the previous value.
pub fn set_stack_trace_limit(limit: usize) -> usize {
    STACK_TRACE_LIMIT.with(|cell| cell.replace(limit))
}

/// Restores the prior depth limit on drop.
#[derive(Debug)]
pub struct StackLimitGuard {
    prior: usize,
}

impl Drop for StackLimitGuard {
    fn drop(&mut self) {
        set_stack_trace_limit(self.prior);
    }
}

/// Raises the depth limit to at least `limit` until the guard is dropped.
#[must_use]
pub fn widen_stack_trace_limit(limit: usize) -> StackLimitGuard {
    let prior = stack_trace_limit();
    set_stack_trace_limit(prior.max(limit));
    StackLimitGuard { prior }
}

/// Source of diagnostic stack traces.
pub trait StackCapture: Send + Sync + fmt::Debug {
    /// Captures the caller's stack, or `None` if no trace is available.
    fn capture(&self) -> Option<String>;
}

/// Captures with `std::backtrace`, ignoring `RUST_BACKTRACE`.
#[derive(Debug, Default, Clone, Copy)]
pub struct BacktraceCapture;

impl StackCapture for BacktraceCapture {
    fn capture(&self) -> Option<String> {
        let bt = Backtrace::force_capture();
        if bt.status() != BacktraceStatus::Captured {
            return None;
        }
        truncate_frames(&skip_internal_frames(&bt.to_string()), stack_trace_limit())
    }
}

/// Never produces a trace.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCapture;

impl StackCapture for NoCapture {
    fn capture(&self) -> Option<String> {
        None
    }
}

fn is_frame_header(line: &str) -> bool {
    let trimmed = line.trim_start();
    let digits = trimmed.bytes().take_while(u8::is_ascii_digit).count();
    digits > 0 && trimmed[digits..].starts_with(':')
}

/// Symbol prefixes of frames on the capture path outside this crate.
const FOREIGN_INTERNAL_PREFIXES: &[&str] = &["std::backtrace", "core::ops::function::"];

/// Modules of this crate that sit between the caller and the capture.
const INTERNAL_MODULES: &[&str] = &[
    "subleak::capture::",
    "subleak::detector::",
    "subleak::stream::",
];

fn is_internal_frame(header: &str) -> bool {
    let symbol = header
        .split_once(':')
        .map_or(header, |(_, rest)| rest)
        .trim_start()
        .trim_start_matches('<');
    if symbol.contains("::tests::") {
        return false;
    }
    FOREIGN_INTERNAL_PREFIXES
        .iter()
        .any(|prefix| symbol.starts_with(prefix))
        || INTERNAL_MODULES.iter().any(|module| symbol.contains(module))
}

/// Drops the leading frames of the capture and dispatch path.
///
/// The rendered trace is returned whole if no caller frame follows them.
fn skip_internal_frames(rendered: &str) -> String {
    let lines: Vec<&str> = rendered.lines().collect();
    let first_caller = lines
        .iter()
        .position(|line| is_frame_header(line) && !is_internal_frame(line));
    match first_caller {
        Some(start) => lines[start..].join("\n"),
        None => rendered.to_string(),
    }
}

/// Keeps the first `limit` frames of a rendered backtrace.
///
/// Location lines stay attached to their frame. Returns `None` when nothing
/// survives the cut.
fn truncate_frames(rendered: &str, limit: usize) -> Option<String> {
    let mut frames = 0usize;
    let mut kept = Vec::new();
    for line in rendered.lines() {
        if is_frame_header(line) {
            frames += 1;
            if frames > limit {
                break;
            }
        }
        kept.push(line);
    }
    let out = kept.join("\n");
    if out.trim().is_empty() {
        None
    } else {
        Some(out)
    }
}
