// Copyright (c) 2026 The wasmvm Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Runtime instances backing a module's imports and exports: linear memory,
//! tables, globals, and host-provided functions.
//!
//! These are plain, allocator-parameterized structs. [`crate::linker`] and
//! [`crate::module_instance`] wrap them in `Rc`/`RefCell` where sharing or
//! interior mutability across imports and exports is required; nothing here
//! assumes how it will be shared.

use core::cell::RefCell;

use crate::Allocator;
use crate::core_compat::vec::Vec;
use crate::exec::{Trap, Value};
use crate::types::{FunctionType, GlobalType, GlobalTypeMutability, MemType, TableType};

/// A linear memory instance, backed by a growable byte buffer.
pub struct MemoryInstance<A: Allocator> {
    ty: MemType,
    bytes: Vec<u8, A>,
}

impl<A: Allocator> MemoryInstance<A> {
    /// The maximum number of pages permitted by the binary format, regardless
    /// of any lower limit a particular memory type declares.
    pub const MAX_PAGES: u32 = 0x1_0000;

    /// Allocates a new memory instance at its declared minimum size, zeroed.
    pub fn new(ty: MemType, alloc: A) -> Self {
        let mut bytes = Vec::new_in(alloc);
        bytes.resize(ty.min_size_bytes(), 0);
        Self { ty, bytes }
    }

    pub fn ty(&self) -> MemType {
        self.ty
    }

    pub fn size_pages(&self) -> u32 {
        (self.bytes.len() / MemType::PAGE_SIZE) as u32
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Grows the memory by `delta` pages, returning the previous size in
    /// pages, or `-1` if the grow would exceed the declared maximum or the
    /// format-wide 65536 page ceiling.
    pub fn grow(&mut self, delta: u32) -> i32 {
        let current = self.size_pages();
        let Some(new_size) = current.checked_add(delta) else {
            return -1;
        };
        if new_size > Self::MAX_PAGES {
            return -1;
        }
        if let Some(max) = self.ty.max {
            if new_size > max {
                return -1;
            }
        }
        self.bytes.resize((new_size as usize) * MemType::PAGE_SIZE, 0);
        current as i32
    }
}

/// A table instance, holding a growable vector of reference values.
pub struct TableInstance<A: Allocator> {
    ty: TableType,
    elems: Vec<Value<A>, A>,
}

impl<A: Allocator> TableInstance<A> {
    pub fn new(ty: TableType, alloc: A) -> Self {
        let mut elems = Vec::new_in(alloc);
        elems.resize(ty.min_elements() as usize, Value::null(ty.reftype));
        Self { ty, elems }
    }

    pub fn ty(&self) -> TableType {
        self.ty
    }

    pub fn size(&self) -> u32 {
        self.elems.len() as u32
    }

    pub fn get(&self, index: u32) -> Option<Value<A>> {
        self.elems.get(index as usize).cloned()
    }

    pub fn set(&mut self, index: u32, value: Value<A>) -> Result<(), Trap> {
        let slot = self
            .elems
            .get_mut(index as usize)
            .ok_or(Trap::OutOfBoundsTableAccess)?;
        *slot = value;
        Ok(())
    }

    pub fn grow(&mut self, delta: u32, init: Value<A>) -> i32 {
        let current = self.size();
        let Some(new_size) = current.checked_add(delta) else {
            return -1;
        };
        if let Some(max) = self.ty.max_elements() {
            if new_size > max {
                return -1;
            }
        }
        self.elems.resize(new_size as usize, init);
        current as i32
    }

    pub fn fill(&mut self, index: u32, value: Value<A>, count: u32) -> Result<(), Trap> {
        let end = index.checked_add(count).ok_or(Trap::OutOfBoundsTableAccess)?;
        if end as usize > self.elems.len() {
            return Err(Trap::OutOfBoundsTableAccess);
        }
        for slot in &mut self.elems[index as usize..end as usize] {
            *slot = value;
        }
        Ok(())
    }

    pub(crate) fn copy_within(&mut self, dst: u32, src: u32, count: u32) -> Result<(), Trap> {
        let src_end = src.checked_add(count).ok_or(Trap::OutOfBoundsTableAccess)?;
        let dst_end = dst.checked_add(count).ok_or(Trap::OutOfBoundsTableAccess)?;
        if src_end as usize > self.elems.len() || dst_end as usize > self.elems.len() {
            return Err(Trap::OutOfBoundsTableAccess);
        }
        self.elems
            .copy_within(src as usize..src_end as usize, dst as usize);
        Ok(())
    }
}

/// A global variable instance. Parameterized over the allocator only
/// because a funcref-valued global may carry an `Rc<ModuleInstance<A>>`.
pub struct GlobalInstance<A: Allocator> {
    ty: GlobalType,
    value: RefCell<Value<A>>,
}

impl<A: Allocator> GlobalInstance<A> {
    pub fn new(ty: GlobalType, value: Value<A>) -> Self {
        Self {
            ty,
            value: RefCell::new(value),
        }
    }

    pub fn ty(&self) -> GlobalType {
        self.ty
    }

    pub fn get(&self) -> Value<A> {
        self.value.borrow().clone()
    }

    /// Writes `value`, failing if this global was declared immutable.
    pub fn set(&self, value: Value<A>) -> Result<(), ()> {
        if self.ty.mutability != GlobalTypeMutability::Var {
            return Err(());
        }
        *self.value.borrow_mut() = value;
        Ok(())
    }

    /// Overwrites the value unconditionally, bypassing the mutability
    /// check. Used only while instantiating: a global's real initializer
    /// can only be evaluated once the owning instance exists (it may
    /// contain `ref.func`), so [`GlobalInstance::new`] is first given a
    /// placeholder that this then replaces.
    pub(crate) fn init(&self, value: Value<A>) {
        *self.value.borrow_mut() = value;
    }
}

/// A host-provided function: a signature plus a callback implemented in
/// Rust. The callback closes over whatever state it needs, which plays the
/// role a separate "user data" parameter would in a C-style host API.
pub struct HostFunction<A: Allocator> {
    ty: FunctionType<A>,
    callback: alloc::boxed::Box<dyn Fn(&[Value<A>], &mut [Value<A>]) -> Result<(), Trap>>,
}

impl<A: Allocator> HostFunction<A> {
    pub fn new(
        ty: FunctionType<A>,
        callback: impl Fn(&[Value<A>], &mut [Value<A>]) -> Result<(), Trap> + 'static,
    ) -> Self {
        Self {
            ty,
            callback: alloc::boxed::Box::new(callback),
        }
    }

    pub fn ty(&self) -> &FunctionType<A> {
        &self.ty
    }

    pub(crate) fn call(&self, params: &[Value<A>], results: &mut [Value<A>]) -> Result<(), Trap> {
        (self.callback)(params, results)
    }
}
