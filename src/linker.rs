// Copyright (c) 2026 The wasmvm Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Resolves a module's imports against a registry of named import sets and
//! drives instantiation.

use alloc::boxed::Box;
use alloc::rc::Rc;
use core::cell::RefCell;

use crate::Allocator;
use crate::core_compat::vec::Vec;
use crate::exec::{Trap, Value};
use crate::instance::{GlobalInstance, HostFunction, MemoryInstance, TableInstance};
use crate::module_definition::ModuleDefinition;
use crate::module_instance::{InstantiateError, ModuleInstance};
use crate::types::FunctionType;

/// One resolvable import, in whatever representation it was provided or
/// exported as. Shared by `Rc` (and `RefCell` for the mutable kinds) so that
/// linking a table, memory, or global genuinely aliases the same storage
/// between the instance that exports it and the one that imports it.
pub(crate) enum Extern<A: Allocator> {
    Func(Rc<HostFunction<A>>),
    Table(Rc<RefCell<TableInstance<A>>>),
    Memory(Rc<RefCell<MemoryInstance<A>>>),
    Global(Rc<GlobalInstance<A>>),
}

impl<A: Allocator> Clone for Extern<A> {
    fn clone(&self) -> Self {
        match self {
            Extern::Func(f) => Extern::Func(f.clone()),
            Extern::Table(t) => Extern::Table(t.clone()),
            Extern::Memory(m) => Extern::Memory(m.clone()),
            Extern::Global(g) => Extern::Global(g.clone()),
        }
    }
}

/// A named collection of imports satisfying a single module namespace (the
/// `module` half of a WebAssembly import's `(module, field)` pair).
///
/// [`ModuleInstance::exports`] produces one of these wrapping a live
/// instance's exports, so that instance can in turn be used to satisfy
/// another module's imports.
pub struct ImportSet<A: Allocator> {
    module: Box<str>,
    entries: Vec<(Box<str>, Extern<A>), A>,
}

impl<A: Allocator> ImportSet<A> {
    pub fn new(module_name: &str, alloc: A) -> Self {
        Self {
            module: module_name.into(),
            entries: Vec::new_in(alloc),
        }
    }

    pub fn module_name(&self) -> &str {
        &self.module
    }

    pub fn add_host_function(
        &mut self,
        field: &str,
        ty: FunctionType<A>,
        callback: impl Fn(&[Value<A>], &mut [Value<A>]) -> Result<(), Trap> + 'static,
    ) {
        self.entries.push((
            field.into(),
            Extern::Func(Rc::new(HostFunction::new(ty, callback))),
        ));
    }

    pub fn add_table(&mut self, field: &str, table: TableInstance<A>) {
        self.entries
            .push((field.into(), Extern::Table(Rc::new(RefCell::new(table)))));
    }

    pub fn add_memory(&mut self, field: &str, memory: MemoryInstance<A>) {
        self.entries.push((
            field.into(),
            Extern::Memory(Rc::new(RefCell::new(memory))),
        ));
    }

    pub fn add_global(&mut self, field: &str, global: GlobalInstance<A>) {
        self.entries
            .push((field.into(), Extern::Global(Rc::new(global))));
    }

    pub(crate) fn add_extern(&mut self, field: &str, value: Extern<A>) {
        self.entries.push((field.into(), value));
    }

    /// The last-registered entry for `field` wins, mirroring a set
    /// re-registered under the same module name overriding itself.
    pub(crate) fn find(&self, field: &str) -> Option<&Extern<A>> {
        self.entries
            .iter()
            .rev()
            .find(|(name, _)| &**name == field)
            .map(|(_, e)| e)
    }
}

/// Registry of [`ImportSet`]s consulted, in order, to resolve a module's
/// imports during instantiation. Sets registered later override earlier ones
/// that satisfy the same `(module, field)` pair.
pub struct Linker<A: Allocator> {
    sets: Vec<ImportSet<A>, A>,
    alloc: A,
}

impl<A: Allocator> Linker<A> {
    pub fn new(alloc: A) -> Self {
        Self {
            sets: Vec::new_in(alloc.clone()),
            alloc,
        }
    }

    pub fn define(&mut self, imports: ImportSet<A>) {
        self.sets.push(imports);
    }

    pub(crate) fn resolve(&self, module: &str, field: &str) -> Option<Extern<A>> {
        self.sets
            .iter()
            .rev()
            .find_map(|set| (set.module_name() == module).then(|| set.find(field)).flatten())
            .cloned()
    }

    /// Instantiates `definition` against the imports registered so far.
    pub fn instantiate(
        &self,
        definition: Rc<ModuleDefinition<A>>,
    ) -> Result<Rc<ModuleInstance<A>>, InstantiateError> {
        ModuleInstance::instantiate(definition, self, self.alloc.clone())
    }
}

/// Thrown when a module's imports cannot be satisfied by the registered
/// [`ImportSet`]s, or a satisfying entry exists but has an incompatible type.
#[derive(Clone, Debug, thiserror::Error)]
pub enum UnlinkableError {
    #[error("unknown import")]
    UnknownImport { module: Box<str>, field: Box<str> },
    #[error("incompatible import type")]
    IncompatibleImportType { module: Box<str>, field: Box<str> },
}
