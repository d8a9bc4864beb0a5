// Copyright (c) 2026 The wasmvm Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Runtime values and execution of WebAssembly code.

mod cursor;
mod interpreter;
mod stack;
mod trap;

pub(crate) use cursor::Cursor;
pub(crate) use interpreter::{eval_const_expr, invoke};
pub use trap::Trap;

use alloc::rc::Rc;

use crate::Allocator;
use crate::module_instance::ModuleInstance;
use crate::types::{Local, RefType, ValType};

/// A runtime value.
///
/// `FuncRef` holds the module instance that owns the referenced function
/// together with its index into that instance's combined import-then-local
/// function list (or `None` for the null reference). Tables are shared by
/// `Rc` across module instances via imports and exports, so a funcref read
/// out of one must still dispatch against the instance that populated it,
/// not whichever instance happens to be reading it; `ExternRef` holds a
/// bare, instance-independent host-assigned token.
pub enum Value<A: Allocator> {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    FuncRef(Option<(Rc<ModuleInstance<A>>, u32)>),
    ExternRef(Option<u64>),
}

impl<A: Allocator> Clone for Value<A> {
    fn clone(&self) -> Self {
        match self {
            Value::I32(v) => Value::I32(*v),
            Value::I64(v) => Value::I64(*v),
            Value::F32(v) => Value::F32(*v),
            Value::F64(v) => Value::F64(*v),
            Value::FuncRef(v) => Value::FuncRef(v.clone()),
            Value::ExternRef(v) => Value::ExternRef(*v),
        }
    }
}

impl<A: Allocator> core::fmt::Debug for Value<A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Value::I32(v) => f.debug_tuple("I32").field(v).finish(),
            Value::I64(v) => f.debug_tuple("I64").field(v).finish(),
            Value::F32(v) => f.debug_tuple("F32").field(v).finish(),
            Value::F64(v) => f.debug_tuple("F64").field(v).finish(),
            Value::FuncRef(v) => f
                .debug_tuple("FuncRef")
                .field(&v.as_ref().map(|(instance, idx)| (Rc::as_ptr(instance), *idx)))
                .finish(),
            Value::ExternRef(v) => f.debug_tuple("ExternRef").field(v).finish(),
        }
    }
}

impl<A: Allocator> PartialEq for Value<A> {
    /// Two `FuncRef`s are equal when they name the same function in the
    /// same instance; instances are compared by identity, not by value,
    /// since module instances have no meaningful structural equality.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::I32(a), Value::I32(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::F32(a), Value::F32(b)) => a == b,
            (Value::F64(a), Value::F64(b)) => a == b,
            (Value::FuncRef(a), Value::FuncRef(b)) => match (a, b) {
                (None, None) => true,
                (Some((ai, aidx)), Some((bi, bidx))) => Rc::ptr_eq(ai, bi) && aidx == bidx,
                _ => false,
            },
            (Value::ExternRef(a), Value::ExternRef(b)) => a == b,
            _ => false,
        }
    }
}

impl<A: Allocator> Value<A> {
    pub fn ty(&self) -> ValType {
        match self {
            Value::I32(_) => ValType::I32,
            Value::I64(_) => ValType::I64,
            Value::F32(_) => ValType::F32,
            Value::F64(_) => ValType::F64,
            Value::FuncRef(_) => ValType::FuncRef,
            Value::ExternRef(_) => ValType::ExternRef,
        }
    }

    pub(crate) fn null(reftype: RefType) -> Self {
        match reftype {
            RefType::Func => Value::FuncRef(None),
            RefType::Extern => Value::ExternRef(None),
        }
    }

    pub(crate) fn default_for(ty: ValType) -> Self {
        match ty {
            ValType::I32 => Value::I32(0),
            ValType::I64 => Value::I64(0),
            ValType::F32 => Value::F32(0.0),
            ValType::F64 => Value::F64(0.0),
            ValType::Vec => unreachable!("vector types are unsupported"),
            ValType::FuncRef => Value::FuncRef(None),
            ValType::ExternRef => Value::ExternRef(None),
        }
    }

    fn unwrap_i32(self) -> i32 {
        match self {
            Value::I32(v) => v,
            _ => unreachable!("validated code guarantees operand types"),
        }
    }

    fn unwrap_i64(self) -> i64 {
        match self {
            Value::I64(v) => v,
            _ => unreachable!("validated code guarantees operand types"),
        }
    }

    fn unwrap_f32(self) -> f32 {
        match self {
            Value::F32(v) => v,
            _ => unreachable!("validated code guarantees operand types"),
        }
    }

    fn unwrap_f64(self) -> f64 {
        match self {
            Value::F64(v) => v,
            _ => unreachable!("validated code guarantees operand types"),
        }
    }

    fn unwrap_funcref(self) -> Option<(Rc<ModuleInstance<A>>, u32)> {
        match self {
            Value::FuncRef(v) => v,
            _ => unreachable!("validated code guarantees operand types"),
        }
    }

    fn unwrap_externref(self) -> Option<u64> {
        match self {
            Value::ExternRef(v) => v,
            _ => unreachable!("validated code guarantees operand types"),
        }
    }
}

impl<A: Allocator> From<Local> for Value<A> {
    fn from(local: Local) -> Self {
        match local {
            Local::I32(v) => Value::I32(v),
            Local::I64(v) => Value::I64(v),
            Local::F32(v) => Value::F32(v),
            Local::F64(v) => Value::F64(v),
            // A local of reference type is always declared null; it can
            // never start out bound to a function.
            Local::FuncRef(_) => Value::FuncRef(None),
            Local::ExternRef(v) => Value::ExternRef(v),
        }
    }
}
