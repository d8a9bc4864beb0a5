// Copyright (c) 2026 The wasmvm Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! A single umbrella error type spanning the whole
//! decode -> validate -> instantiate -> invoke pipeline.
//!
//! Every stage already reports its own precisely-typed error (see
//! [`crate::module_definition::DecodeError`], [`crate::UnlinkableError`],
//! [`crate::UninstantiableError`], [`crate::Trap`]); this type exists only so
//! a caller chaining several stages with `?` doesn't have to name each one.
//! Internal code never matches on this enum, only on the concrete error type
//! a given call can actually produce.

use crate::Trap;
use crate::decode::ErrorWithContext;
use crate::linker::UnlinkableError;
use crate::module_definition::DecodeError;
use crate::module_instance::{InstantiateError, UninstantiableError};
use crate::storage::Stream;
use crate::validate;

/// Any error producible by decoding, validating, instantiating, or invoking a
/// module, collapsed into one type for `?`-convenience.
#[derive(Debug, thiserror::Error)]
pub enum Error<Storage: Stream> {
    /// The byte stream is not a well-formed WASM binary.
    #[error(transparent)]
    Malformed(#[from] ErrorWithContext<Storage>),
    /// The binary decoded but failed validation.
    #[error(transparent)]
    Validation(#[from] validate::Error),
    /// An import couldn't be resolved, or was resolved with an incompatible type.
    #[error(transparent)]
    Unlinkable(#[from] UnlinkableError),
    /// Instantiation failed for a reason other than linking (e.g. an active
    /// segment falling outside its table or memory).
    #[error(transparent)]
    Uninstantiable(#[from] UninstantiableError),
    /// Execution trapped.
    #[error(transparent)]
    Trap(#[from] Trap),
}

impl<Storage: Stream> From<DecodeError<Storage>> for Error<Storage> {
    fn from(err: DecodeError<Storage>) -> Self {
        match err {
            DecodeError::Malformed(err) => Self::Malformed(err),
            DecodeError::Validation(err) => Self::Validation(err),
        }
    }
}

impl<Storage: Stream> From<InstantiateError> for Error<Storage> {
    fn from(err: InstantiateError) -> Self {
        match err {
            InstantiateError::Unlinkable(err) => Self::Unlinkable(err),
            InstantiateError::Uninstantiable(err) => Self::Uninstantiable(err),
            InstantiateError::Trap(err) => Self::Trap(err),
        }
    }
}
