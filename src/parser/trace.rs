//! Decoder branch markers. Tests subscribe to the `parser.trace_point`
//! target to check that a hand-built fixture reaches the branch it targets.

/// Record that decoding took the branch named `$tag`, with optional extra
/// tracing fields. Expands to nothing in release builds.
#[cfg(any(debug_assertions, test))]
#[macro_export]
macro_rules! parser_trace {
    ($tag:expr $(, $field:expr)*) => {
        ::tracing::trace!(target: "parser.trace_point", path = $tag $(, $field)*);
    };
}

#[cfg(not(any(debug_assertions, test)))]
#[macro_export]
macro_rules! parser_trace {
    ($tag:expr $(, $field:expr)*) => {};
}
