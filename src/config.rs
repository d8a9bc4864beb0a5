// Copyright (c) 2026 The wasmvm Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Crate-wide configuration knobs, threaded through decoding and
//! instantiation rather than baked in as constants.

/// Configuration for decoding, validating, and running a module.
///
/// Plain data, constructed with struct-update syntax off [`Config::default`]
/// when only a couple of fields need to differ from the defaults:
///
/// ```
/// use wasmvm::Config;
///
/// let config = Config {
///     max_call_depth: 64,
///     ..Config::default()
/// };
/// ```
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Maximum number of nested function activations the interpreter will
    /// allow before trapping with [`crate::Trap::StackExhausted`].
    pub max_call_depth: u32,

    /// Maximum nesting depth the decoder will track for error-reporting
    /// context (see `decode::ContextStack`). Exceeding it is reported as
    /// [`crate::decode::Error::ExcessiveParsingDepth`], not a panic.
    pub max_decode_nesting: u32,

    /// Whether a `name` custom section is tolerated (skipped, contents
    /// discarded) rather than rejected. Either way, encountering one emits a
    /// `tracing::warn!` once per module.
    pub tolerate_name_section: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_call_depth: 1024,
            max_decode_nesting: 6,
            tolerate_name_section: true,
        }
    }
}
