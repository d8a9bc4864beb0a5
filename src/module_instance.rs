// Copyright (c) 2026 The wasmvm Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! A linked, instantiated module: owns its tables, memories, globals, and
//! resolved functions, and is the entry point for invoking exported code.

use alloc::rc::Rc;
use core::cell::{Cell, RefCell};

use tracing::instrument;

use crate::Allocator;
use crate::config::Config;
use crate::core_compat::vec::Vec;
use crate::exec::{self, Trap, Value};
use crate::instance::{GlobalInstance, HostFunction, MemoryInstance, TableInstance};
use crate::linker::{Extern, ImportSet, Linker, UnlinkableError};
use crate::module_definition::ModuleDefinition;
use crate::types::{
    DataMode, ElementInit, ElementMode, ExportDescriptor, FunctionType, ImportDescriptor,
};

/// How a function in a [`ModuleInstance`]'s function index space is backed.
pub(crate) enum FuncInstance<A: Allocator> {
    /// One of the module's own functions, by index into its code section.
    Local(u32),
    /// An imported or host-provided function.
    Host(Rc<HostFunction<A>>),
}

/// Failure during instantiation's resource-allocation steps (active element
/// or data segments that fall outside their target's bounds).
#[derive(Clone, Debug, thiserror::Error)]
pub enum UninstantiableError {
    #[error("out of bounds table access")]
    OutOfBoundsTableAccess,
    #[error("out of bounds memory access")]
    OutOfBoundsMemoryAccess,
}

/// Failure to instantiate a module, covering every way the process in
/// [`ModuleInstance::instantiate`] can fail.
#[derive(Clone, Debug, thiserror::Error)]
pub enum InstantiateError {
    #[error(transparent)]
    Unlinkable(#[from] UnlinkableError),
    #[error(transparent)]
    Uninstantiable(#[from] UninstantiableError),
    #[error("start function trapped: {0}")]
    Trap(#[from] Trap),
}

/// Failure to invoke an exported function.
#[derive(Clone, Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("unknown export")]
    UnknownExport,
    #[error("type mismatch")]
    TypeMismatch,
    #[error(transparent)]
    Trap(#[from] Trap),
}

/// A module that has been linked against a set of imports and is ready to
/// run. Exported functions, tables, memories, and globals are reachable by
/// name via [`ModuleInstance::invoke`], [`ModuleInstance::get_global`], and
/// [`ModuleInstance::exports`].
pub struct ModuleInstance<A: Allocator> {
    definition: Rc<ModuleDefinition<A>>,
    funcs: Vec<FuncInstance<A>, A>,
    tables: Vec<Rc<RefCell<TableInstance<A>>>, A>,
    memories: Vec<Rc<RefCell<MemoryInstance<A>>>, A>,
    globals: Vec<Rc<GlobalInstance<A>>, A>,
    dropped_elem: Vec<Cell<bool>, A>,
    dropped_data: Vec<Cell<bool>, A>,
    config: Config,
    alloc: A,
}

impl<A: Allocator> ModuleInstance<A> {
    /// Links `definition` against the imports registered with `linker` and
    /// runs it through to a ready instance: resolves and type-checks every
    /// import, allocates the module's own tables/memories/globals, applies
    /// active element and data segments, and invokes the start function if
    /// one is declared. If any step after resource allocation fails, the
    /// partially-built instance is simply dropped.
    #[instrument(skip_all)]
    pub fn instantiate(
        definition: Rc<ModuleDefinition<A>>,
        linker: &Linker<A>,
        alloc: A,
    ) -> Result<Rc<Self>, InstantiateError> {
        Self::instantiate_with_config(definition, linker, Config::default(), alloc)
    }

    pub fn instantiate_with_config(
        definition: Rc<ModuleDefinition<A>>,
        linker: &Linker<A>,
        config: Config,
        alloc: A,
    ) -> Result<Rc<Self>, InstantiateError> {
        let module = definition.module();

        let mut funcs = Vec::new_in(alloc.clone());
        let mut tables = Vec::new_in(alloc.clone());
        let mut memories = Vec::new_in(alloc.clone());
        let mut globals = Vec::new_in(alloc.clone());

        for import in module.importsec.iter() {
            let module_name: &str = import.module.as_ref();
            let field: &str = import.field.as_ref();
            let resolved = linker
                .resolve(module_name, field)
                .ok_or_else(|| UnlinkableError::UnknownImport {
                    module: module_name.into(),
                    field: field.into(),
                })?;
            let incompatible = || UnlinkableError::IncompatibleImportType {
                module: module_name.into(),
                field: field.into(),
            };
            match (import.descriptor, &resolved) {
                (ImportDescriptor::Function(typeidx), Extern::Func(host)) => {
                    let expected = &module.typesec[*typeidx as usize];
                    if !signatures_match(expected, host.ty()) {
                        return Err(incompatible().into());
                    }
                    funcs.push(FuncInstance::Host(host.clone()));
                }
                (ImportDescriptor::Table(expected), Extern::Table(table)) => {
                    let actual = table.borrow().ty();
                    if actual.reftype != expected.reftype
                        || actual.limits.min < expected.limits.min
                        || !limits_max_compatible(actual.limits.max, expected.limits.max)
                    {
                        return Err(incompatible().into());
                    }
                    tables.push(table.clone());
                }
                (ImportDescriptor::Memory(expected), Extern::Memory(memory)) => {
                    let actual = memory.borrow().ty();
                    if actual.min < expected.min || !limits_max_compatible(actual.max, expected.max)
                    {
                        return Err(incompatible().into());
                    }
                    memories.push(memory.clone());
                }
                (ImportDescriptor::Global(expected), Extern::Global(global)) => {
                    let actual = global.ty();
                    if actual.value != expected.value || actual.mutability != expected.mutability {
                        return Err(incompatible().into());
                    }
                    globals.push(global.clone());
                }
                _ => return Err(incompatible().into()),
            }
        }

        for i in 0..module.funcsec.len() {
            funcs.push(FuncInstance::Local(i as u32));
        }

        for ty in module.tablesec.iter() {
            tables.push(Rc::new(RefCell::new(TableInstance::new(*ty, alloc.clone()))));
        }
        for ty in module.memsec.iter() {
            memories.push(Rc::new(RefCell::new(MemoryInstance::new(*ty, alloc.clone()))));
        }
        // A global's real initializer may contain `ref.func`, which needs an
        // owning instance to tag the funcref with; the instance doesn't exist
        // yet. Allocate each global with a placeholder value for now and fill
        // in the real one once `instance` itself exists below.
        for global in module.globalsec.iter() {
            globals.push(Rc::new(GlobalInstance::new(
                global.ty,
                Value::default_for(global.ty.value),
            )));
        }

        let mut dropped_elem = Vec::new_in(alloc.clone());
        dropped_elem.resize(module.elemsec.len(), Cell::new(false));
        let mut dropped_data = Vec::new_in(alloc.clone());
        dropped_data.resize(module.datasec.len(), Cell::new(false));

        let instance = Rc::new(Self {
            definition,
            funcs,
            tables,
            memories,
            globals,
            dropped_elem,
            dropped_data,
            config,
            alloc,
        });

        for (idx, global) in instance.module().globalsec.iter().enumerate() {
            let value = exec::eval_const_expr(&instance, &instance.globals, &global.init);
            instance.globals[idx].init(value);
        }

        for elem in instance.module().elemsec.iter() {
            let ElementMode::Active(active) = &elem.mode else {
                continue;
            };
            let offset = exec::eval_const_expr(&instance, &instance.globals, &active.offset);
            let Value::I32(offset) = offset else {
                unreachable!("validated element offset is i32");
            };
            let values = element_values(&instance, &elem.init, &instance.globals);
            let table = &instance.tables[*active.table as usize];
            let mut table = table.borrow_mut();
            let end = (offset as i64) + (values.len() as i64);
            if offset < 0 || end > i64::from(table.size()) {
                return Err(UninstantiableError::OutOfBoundsTableAccess.into());
            }
            for (i, value) in values.into_iter().enumerate() {
                table
                    .set(offset as u32 + i as u32, value)
                    .map_err(|_| UninstantiableError::OutOfBoundsTableAccess)?;
            }
        }

        for data in instance.definition.module().datasec.iter() {
            let DataMode::Active(active) = &data.mode else {
                continue;
            };
            let offset = exec::eval_const_expr(&instance, &instance.globals, &active.offset);
            let Value::I32(offset) = offset else {
                unreachable!("validated data offset is i32");
            };
            let memory = &instance.memories[*active.memory as usize];
            let mut memory = memory.borrow_mut();
            let bytes = memory.bytes_mut();
            let end = (offset as i64) + (data.init.len() as i64);
            if offset < 0 || end > bytes.len() as i64 {
                return Err(UninstantiableError::OutOfBoundsMemoryAccess.into());
            }
            bytes[offset as usize..offset as usize + data.init.len()].copy_from_slice(&data.init);
        }

        if let Some(start) = instance.definition.module().startsec {
            let mut results = [];
            exec::invoke(&instance, *start, &[], &mut results, 0)?;
        }

        Ok(instance)
    }

    /// Invokes the exported function named `name`.
    pub fn invoke(
        self: &Rc<Self>,
        name: &str,
        args: &[Value<A>],
        results: &mut [Value<A>],
    ) -> Result<(), InvokeError> {
        let idx = self.export_func_index(name).ok_or(InvokeError::UnknownExport)?;
        let ty = self.func_type(idx);
        if ty.parameters.len() != args.len()
            || !ty.parameters.iter().zip(args).all(|(t, v)| *t == v.ty())
            || ty.results.len() != results.len()
        {
            return Err(InvokeError::TypeMismatch);
        }
        exec::invoke(self, idx, args, results, 0)?;
        Ok(())
    }

    /// Reads the current value of the exported global named `name`.
    pub fn get_global(&self, name: &str) -> Option<Value<A>> {
        let export = self.find_export(name)?;
        let ExportDescriptor::Global(idx) = export.descriptor else {
            return None;
        };
        Some(self.globals[*idx as usize].get())
    }

    /// Wraps this instance's exports as an [`ImportSet`] usable to satisfy
    /// another module's imports under `as_module_name`, mirroring how one
    /// module registers itself for another to import from.
    pub fn exports(instance: &Rc<Self>, as_module_name: &str) -> ImportSet<A> {
        let mut set = ImportSet::new(as_module_name, instance.alloc.clone());
        for export in instance.definition.module().exportsec.iter() {
            let field: &str = export.field.as_ref();
            let value = match export.descriptor {
                ExportDescriptor::Function(idx) => {
                    Extern::Func(Rc::new(Self::function_as_host(instance, *idx as u32)))
                }
                ExportDescriptor::Table(idx) => {
                    Extern::Table(instance.tables[*idx as usize].clone())
                }
                ExportDescriptor::Memory(idx) => {
                    Extern::Memory(instance.memories[*idx as usize].clone())
                }
                ExportDescriptor::Global(idx) => {
                    Extern::Global(instance.globals[*idx as usize].clone())
                }
            };
            set.add_extern(field, value);
        }
        set
    }

    fn function_as_host(instance: &Rc<Self>, idx: u32) -> HostFunction<A> {
        let ty = instance.func_type(idx).clone();
        match &instance.funcs[idx as usize] {
            FuncInstance::Local(_) => {
                let owner = instance.clone();
                HostFunction::new(ty, move |params, results| {
                    exec::invoke(&owner, idx, params, results, 0)
                })
            }
            FuncInstance::Host(host) => {
                let host = host.clone();
                HostFunction::new(ty, move |params, results| host.call(params, results))
            }
        }
    }

    fn find_export(&self, name: &str) -> Option<&crate::types::Export<A>> {
        self.definition
            .module()
            .exportsec
            .binary_search_by(|export| export.field.as_ref().cmp(name))
            .ok()
            .map(|i| &self.definition.module().exportsec[i])
    }

    fn export_func_index(&self, name: &str) -> Option<u32> {
        match self.find_export(name)?.descriptor {
            ExportDescriptor::Function(idx) => Some(*idx),
            _ => None,
        }
    }

    pub(crate) fn func_type(&self, idx: u32) -> &FunctionType<A> {
        match &self.funcs[idx as usize] {
            FuncInstance::Local(local_idx) => {
                let module = self.definition.module();
                let typeidx = module.funcsec[*local_idx as usize];
                &module.typesec[*typeidx as usize]
            }
            FuncInstance::Host(host) => host.ty(),
        }
    }

    pub(crate) fn module(&self) -> &crate::types::Module<A> {
        self.definition.module()
    }

    pub(crate) fn funcs(&self) -> &[FuncInstance<A>] {
        &self.funcs
    }

    pub(crate) fn allocator(&self) -> &A {
        &self.alloc
    }

    pub(crate) fn max_call_depth(&self) -> u32 {
        self.config.max_call_depth
    }

    pub(crate) fn global_get(&self, idx: u32) -> Value<A> {
        self.globals[idx as usize].get()
    }

    pub(crate) fn global_set(&self, idx: u32, value: Value<A>) {
        self.globals[idx as usize]
            .set(value)
            .expect("validated code only writes mutable globals");
    }

    pub(crate) fn table_get(&self, idx: u32, elem: u32) -> Result<Value<A>, Trap> {
        self.tables[idx as usize]
            .borrow()
            .get(elem)
            .ok_or(Trap::OutOfBoundsTableAccess)
    }

    pub(crate) fn table_set(&self, idx: u32, elem: u32, value: Value<A>) -> Result<(), Trap> {
        self.tables[idx as usize].borrow_mut().set(elem, value)
    }

    pub(crate) fn table_size(&self, idx: u32) -> u32 {
        self.tables[idx as usize].borrow().size()
    }

    pub(crate) fn table_grow(&self, idx: u32, delta: u32, init: Value<A>) -> i32 {
        self.tables[idx as usize].borrow_mut().grow(delta, init)
    }

    pub(crate) fn table_fill(&self, idx: u32, start: u32, value: Value<A>, len: u32) -> Result<(), Trap> {
        self.tables[idx as usize].borrow_mut().fill(start, value, len)
    }

    pub(crate) fn table_copy(&self, dst_idx: u32, src_idx: u32, dst: u32, src: u32, len: u32) -> Result<(), Trap> {
        if dst_idx == src_idx {
            return self.tables[dst_idx as usize]
                .borrow_mut()
                .copy_within(dst, src, len);
        }
        let values: alloc::vec::Vec<Value<A>> = {
            let src_table = self.tables[src_idx as usize].borrow();
            let end = (src as u64).checked_add(u64::from(len)).ok_or(Trap::OutOfBoundsTableAccess)?;
            if end > u64::from(src_table.size()) {
                return Err(Trap::OutOfBoundsTableAccess);
            }
            (src..src + len).map(|i| src_table.get(i).unwrap()).collect()
        };
        let mut dst_table = self.tables[dst_idx as usize].borrow_mut();
        let end = (dst as u64).checked_add(u64::from(len)).ok_or(Trap::OutOfBoundsTableAccess)?;
        if end > u64::from(dst_table.size()) {
            return Err(Trap::OutOfBoundsTableAccess);
        }
        for (i, value) in values.into_iter().enumerate() {
            dst_table.set(dst + i as u32, value)?;
        }
        Ok(())
    }

    pub(crate) fn table_init(
        instance: &Rc<Self>,
        table_idx: u32,
        elem_idx: u32,
        dst: u32,
        src: u32,
        len: u32,
    ) -> Result<(), Trap> {
        if instance.dropped_elem[elem_idx as usize].get() {
            if len == 0 {
                return Ok(());
            }
            return Err(Trap::OutOfBoundsTableAccess);
        }
        let elem = &instance.definition.module().elemsec[elem_idx as usize];
        let values = element_values(instance, &elem.init, &instance.globals);
        let end = (src as u64).checked_add(u64::from(len)).ok_or(Trap::OutOfBoundsTableAccess)?;
        if end > values.len() as u64 {
            return Err(Trap::OutOfBoundsTableAccess);
        }
        let mut table = instance.tables[table_idx as usize].borrow_mut();
        let dst_end = (dst as u64).checked_add(u64::from(len)).ok_or(Trap::OutOfBoundsTableAccess)?;
        if dst_end > u64::from(table.size()) {
            return Err(Trap::OutOfBoundsTableAccess);
        }
        for i in 0..len {
            table.set(dst + i, values[(src + i) as usize].clone())?;
        }
        Ok(())
    }

    pub(crate) fn elem_drop(&self, idx: u32) {
        self.dropped_elem[idx as usize].set(true);
    }

    pub(crate) fn data_drop(&self, idx: u32) {
        self.dropped_data[idx as usize].set(true);
    }

    pub(crate) fn memory_size(&self, idx: u32) -> u32 {
        self.memories[idx as usize].borrow().size_pages()
    }

    pub(crate) fn memory_grow(&self, idx: u32, delta: u32) -> i32 {
        self.memories[idx as usize].borrow_mut().grow(delta)
    }

    pub(crate) fn memory_read(&self, idx: u32, addr: u32, offset: u32, out: &mut [u8]) -> Result<(), Trap> {
        let memory = self.memories[idx as usize].borrow();
        let bytes = memory.bytes();
        let start = u64::from(addr) + u64::from(offset);
        let end = start + out.len() as u64;
        if end > bytes.len() as u64 {
            return Err(Trap::OutOfBoundsMemoryAccess);
        }
        out.copy_from_slice(&bytes[start as usize..end as usize]);
        Ok(())
    }

    pub(crate) fn memory_write(&self, idx: u32, addr: u32, offset: u32, data: &[u8]) -> Result<(), Trap> {
        let mut memory = self.memories[idx as usize].borrow_mut();
        let bytes = memory.bytes_mut();
        let start = u64::from(addr) + u64::from(offset);
        let end = start + data.len() as u64;
        if end > bytes.len() as u64 {
            return Err(Trap::OutOfBoundsMemoryAccess);
        }
        bytes[start as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    pub(crate) fn memory_fill(&self, idx: u32, dst: u32, value: u8, len: u32) -> Result<(), Trap> {
        let mut memory = self.memories[idx as usize].borrow_mut();
        let bytes = memory.bytes_mut();
        let end = u64::from(dst) + u64::from(len);
        if end > bytes.len() as u64 {
            return Err(Trap::OutOfBoundsMemoryAccess);
        }
        bytes[dst as usize..end as usize].fill(value);
        Ok(())
    }

    pub(crate) fn memory_copy(&self, idx: u32, dst: u32, src: u32, len: u32) -> Result<(), Trap> {
        let mut memory = self.memories[idx as usize].borrow_mut();
        let bytes = memory.bytes_mut();
        let src_end = u64::from(src) + u64::from(len);
        let dst_end = u64::from(dst) + u64::from(len);
        if src_end > bytes.len() as u64 || dst_end > bytes.len() as u64 {
            return Err(Trap::OutOfBoundsMemoryAccess);
        }
        bytes.copy_within(src as usize..src_end as usize, dst as usize);
        Ok(())
    }

    pub(crate) fn memory_init(&self, idx: u32, dst: u32, src: u32, len: u32) -> Result<(), Trap> {
        if self.dropped_data[idx as usize].get() {
            if len == 0 {
                return Ok(());
            }
            return Err(Trap::OutOfBoundsMemoryAccess);
        }
        let data = &self.definition.module().datasec[idx as usize].init;
        let src_end = (src as u64) + (len as u64);
        if src_end > data.len() as u64 {
            return Err(Trap::OutOfBoundsMemoryAccess);
        }
        self.memory_write(0, dst, 0, &data[src as usize..src_end as usize])
    }
}

fn signatures_match<A: Allocator>(a: &FunctionType<A>, b: &FunctionType<A>) -> bool {
    a.parameters.iter().eq(b.parameters.iter()) && a.results.iter().eq(b.results.iter())
}

fn limits_max_compatible(actual: Option<u32>, expected: Option<u32>) -> bool {
    match expected {
        None => true,
        Some(expected_max) => actual.is_some_and(|actual_max| actual_max <= expected_max),
    }
}

fn element_values<A: Allocator>(
    instance: &Rc<ModuleInstance<A>>,
    init: &ElementInit<A>,
    globals: &[Rc<GlobalInstance<A>>],
) -> alloc::vec::Vec<Value<A>> {
    match init {
        ElementInit::FunctionIndices(indices) => indices
            .iter()
            .map(|idx| Value::FuncRef(Some((instance.clone(), *idx))))
            .collect(),
        ElementInit::Expressions(exprs) => exprs
            .iter()
            .map(|expr| exec::eval_const_expr(instance, globals, expr))
            .collect(),
    }
}
