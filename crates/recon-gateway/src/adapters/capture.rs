//! In-process output capture.
//!
//! Replies a dispatch addresses to its own sender go through
//! [`CaptureRegistry::emit_to`] and land in that dispatch's buffer only.
//! Ambient lines for an actor (broadcasts, host messages) go through
//! [`CaptureRegistry::emit`] and reach every capture open on that actor.
//! Console captures never take ambient lines, since concurrent console
//! requests share one context.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::domain::{CapturedOutput, ExecutionContext};
use crate::ports::{CaptureHandle, OutputCapture};

struct CaptureBuffer {
    context: ExecutionContext,
    lines: Vec<String>,
}

/// Registry of active captures keyed by handle.
#[derive(Default)]
pub struct CaptureRegistry {
    active: DashMap<u64, CaptureBuffer>,
    next_id: AtomicU64,
}

impl CaptureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `line` for one capture. Dropped if it already ended.
    pub fn emit_to(&self, handle: CaptureHandle, line: &str) {
        if let Some(mut buffer) = self.active.get_mut(&handle.0) {
            buffer.lines.push(line.to_string());
        }
    }

    /// Record an ambient `line` for every capture open on an actor context.
    pub fn emit(&self, context: &ExecutionContext, line: &str) {
        self.emit_except(context, line, None);
    }

    /// Like [`CaptureRegistry::emit`], skipping `skip`.
    pub fn emit_except(&self, context: &ExecutionContext, line: &str, skip: Option<CaptureHandle>) {
        if *context == ExecutionContext::Console {
            return;
        }
        for mut entry in self.active.iter_mut() {
            if Some(CaptureHandle(*entry.key())) == skip {
                continue;
            }
            if entry.context == *context {
                entry.lines.push(line.to_string());
            }
        }
    }

    /// Number of open captures
    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

impl OutputCapture for CaptureRegistry {
    fn begin_capture(&self, context: &ExecutionContext) -> CaptureHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.active.insert(
            id,
            CaptureBuffer {
                context: context.clone(),
                lines: Vec::new(),
            },
        );
        CaptureHandle(id)
    }

    fn end_capture(&self, handle: CaptureHandle) -> CapturedOutput {
        match self.active.remove(&handle.0) {
            Some((_, buffer)) => CapturedOutput::from_lines(buffer.lines),
            None => CapturedOutput::default(),
        }
    }
}
