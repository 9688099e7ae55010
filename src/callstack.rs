//! Lazily-symbolicated call stack capture.
//!
//! Grounded on `original_source/include/callstack.h`'s `lcs::callstack`: a
//! cheap-to-capture vector of raw return addresses, with symbol resolution
//! deferred until the stack is actually printed (§4.C11). Backed here by
//! [`backtrace::Backtrace`] rather than a hand-rolled unwinder, since lazy
//! symbolication via a maintained crate is exactly the kind of ambient
//! collaborator this project leans on an ecosystem crate for.

use std::fmt;

/// A captured call stack, symbolicated only when displayed.
#[derive(Clone)]
pub struct CallStack {
    trace: backtrace::Backtrace,
}

impl CallStack {
    /// Captures the stack of the current thread at the call site, keeping at
    /// most `depth_cap` frames (mirrors `LSAN_CALLSTACK_SIZE`, §6.2).
    pub fn capture(depth_cap: usize) -> Self {
        let mut frames = Vec::new();
        backtrace::trace(|frame| {
            frames.push(frame.clone());
            frames.len() < depth_cap.max(1)
        });
        Self {
            trace: backtrace::Backtrace::from(frames),
        }
    }

    /// The raw instruction pointers of this stack, unresolved.
    pub fn raw_addresses(&self) -> Vec<*mut std::ffi::c_void> {
        self.trace.frames().iter().map(|f| f.ip()).collect()
    }

    pub fn depth(&self) -> usize {
        self.trace.frames().len()
    }

    /// Renders the stack with each frame indented by `indent`, one frame per
    /// line, `function (file:line)` when resolvable else the bare address —
    /// the Rust analogue of `callstackHelper::format`.
    pub fn format(&self, indent: &str) -> String {
        let mut out = String::new();
        for (i, frame) in self.trace.frames().iter().enumerate() {
            let symbols = frame.symbols();
            if symbols.is_empty() {
                out.push_str(&format!("{indent}#{i:<3} {:?}\n", frame.ip()));
                continue;
            }
            for symbol in symbols {
                let name = symbol
                    .name()
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| format!("{:?}", frame.ip()));
                match (symbol.filename(), symbol.lineno()) {
                    (Some(file), Some(line)) => {
                        out.push_str(&format!("{indent}#{i:<3} {name} ({}:{line})\n", file.display()));
                    }
                    _ => out.push_str(&format!("{indent}#{i:<3} {name}\n")),
                }
            }
        }
        out
    }
}

impl fmt::Debug for CallStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CallStack({} frames)", self.depth())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_respects_depth_cap() {
        let stack = CallStack::capture(3);
        assert!(stack.depth() <= 3);
    }

    #[test]
    fn format_never_panics_on_empty_symbols() {
        let stack = CallStack::capture(1);
        let _ = stack.format("  ");
    }
}
