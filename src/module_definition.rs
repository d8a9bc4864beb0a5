// Copyright (c) 2026 The wasmvm Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Decoding and validating a WASM binary into a [`ModuleDefinition`]: the
//! immutable, shareable artifact [`crate::ModuleInstance`] instantiates from.

use crate::Allocator;
use crate::config::Config;
use crate::decode::{self, ContextStack, CustomSectionVisitor, ErrorWithContext};
use crate::storage::Stream;
use crate::types::{CustomSection, Module};
use crate::validate;

/// Errors producible by [`ModuleDefinition::decode`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError<Storage: Stream> {
    /// The byte stream is not a well-formed WASM binary.
    #[error(transparent)]
    Malformed(#[from] ErrorWithContext<Storage>),
    /// The binary decoded but failed validation.
    #[error(transparent)]
    Validation(#[from] validate::Error),
    /// A `name` custom section was present while `Config::tolerate_name_section`
    /// was `false`.
    #[error("name custom section present under strict configuration")]
    NameSectionPresent,
}

// Custom sections are skippable by design (the binary format requires it).
// `Config::tolerate_name_section` controls whether a `name` section's mere
// presence is accepted at all: tolerated, it is silently skipped; not
// tolerated, decoding still completes (so `rejected` can be reported with
// full context) but `ModuleDefinition::decode_with_config` then fails the
// module outright.
struct NameSectionVisitor {
    tolerate: bool,
    rejected: bool,
}

impl<A: Allocator> CustomSectionVisitor<A> for NameSectionVisitor {
    fn should_visit(&self, name: &str) -> bool {
        name == "name"
    }

    fn visit(&mut self, _custom: CustomSection<A>) {
        if self.tolerate {
            tracing::debug!("ignoring name custom section");
        } else {
            tracing::warn!("rejecting module: name custom section present under strict configuration");
            self.rejected = true;
        }
    }
}

/// A decoded, validated WASM module.
///
/// Holds no live references into the byte stream it was decoded from; once
/// constructed, the source bytes (and any decode-time scratch buffers) can be
/// released. A single `ModuleDefinition` can back any number of
/// [`crate::ModuleInstance`]s, each instantiated against its own imports.
pub struct ModuleDefinition<A: Allocator> {
    module: Module<A>,
}

impl<A: Allocator> ModuleDefinition<A> {
    /// Decodes and validates a WASM binary under the default [`Config`].
    pub fn decode<Storage: Stream>(storage: Storage, alloc: A) -> Result<Self, DecodeError<Storage>> {
        Self::decode_with_config(storage, Config::default(), alloc)
    }

    /// Decodes and validates a WASM binary under an explicit [`Config`].
    #[tracing::instrument(skip_all)]
    pub fn decode_with_config<Storage: Stream>(
        storage: Storage,
        config: Config,
        alloc: A,
    ) -> Result<Self, DecodeError<Storage>> {
        let mut context = ContextStack::with_limit(config.max_decode_nesting);
        let mut visitor = NameSectionVisitor {
            tolerate: config.tolerate_name_section,
            rejected: false,
        };

        let mut module = decode::decode_module(storage, &mut context, &mut visitor, alloc)
            .map_err(|error| ErrorWithContext { error, context })?;

        if visitor.rejected {
            return Err(DecodeError::NameSectionPresent);
        }

        validate::prepare_module_for_validation(&mut module);
        validate::validate_module(&module)?;

        tracing::debug!("module decoded and validated");
        Ok(Self { module })
    }

    pub(crate) fn module(&self) -> &Module<A> {
        &self.module
    }
}
