// Copyright (c) 2026 The wasmvm Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! The bytecode interpreter: one Rust-level call per WASM activation, a
//! [`Stack`] per activation for its values and open labels, and a [`Cursor`]
//! walking the activation's transcoded [`Expression`] bytes.
//!
//! There is no explicit "frame" object threaded through this module; Rust's
//! own call stack plays that role (see `stack.rs`'s module doc), so a nested
//! `call` is simply a nested call to [`invoke`].
//!
//! Every opcode here is read off the `Cursor` in exactly the same sequence
//! `validate::expr` reads it in, since both walk the same transcoded buffer
//! and must stay byte-synchronized with the continuation offsets computed
//! during decoding.

use alloc::rc::Rc;

use crate::Allocator;
use crate::instance::GlobalInstance;
use crate::module_instance::{FuncInstance, ModuleInstance};
use crate::types::{BlockType, BulkOpcode, Continuations, Expression, FunctionType, Opcode};

use super::cursor::Cursor;
use super::stack::{BranchOutcome, Stack};
use super::{Trap, Value};

/// Evaluates a constant expression (global initializers, element/data segment
/// offsets, element-segment function references): a single const-producing
/// opcode followed by `end`. Never branches, never calls, so it needs
/// neither a label stack nor a value stack of its own.
///
/// `instance` is the instance being populated; it tags any `ref.func`
/// result so a funcref produced here still resolves against the function it
/// names even after it travels into another instance's table via an import
/// or export.
pub(crate) fn eval_const_expr<A: Allocator>(
    instance: &Rc<ModuleInstance<A>>,
    globals: &[Rc<GlobalInstance<A>>],
    expr: &Expression<A>,
) -> Value<A> {
    let mut cursor = Cursor::new(expr.bytes());
    let mut value = None;
    loop {
        match cursor.read_opcode() {
            Opcode::I32Const => value = Some(Value::I32(cursor.read_i32())),
            Opcode::I64Const => value = Some(Value::I64(cursor.read_i64())),
            Opcode::F32Const => value = Some(Value::F32(cursor.read_f32())),
            Opcode::F64Const => value = Some(Value::F64(cursor.read_f64())),
            Opcode::GlobalGet => {
                let idx = cursor.read_u32();
                value = Some(globals[idx as usize].get());
            }
            Opcode::RefNull => {
                let reftype = cursor.read_ref_type();
                value = Some(Value::null(reftype));
            }
            Opcode::RefFunc => {
                let idx = cursor.read_u32();
                value = Some(Value::FuncRef(Some((instance.clone(), idx))));
            }
            Opcode::End => break,
            op => unreachable!("validated constant expressions never contain {op:?}"),
        }
    }
    value.expect("validated constant expressions always produce exactly one value")
}

/// Invokes function `idx` in `instance`'s combined import-then-local function
/// index space, passing `args` and writing results into `results`.
///
/// `depth` is the number of activations currently on the Rust call stack
/// above this one; it is checked against the instance's configured call
/// depth limit before doing any work, so a pathologically recursive module
/// traps with [`Trap::StackExhausted`] instead of overflowing the host stack.
pub(crate) fn invoke<A: Allocator>(
    instance: &Rc<ModuleInstance<A>>,
    idx: u32,
    args: &[Value<A>],
    results: &mut [Value<A>],
    depth: u32,
) -> Result<(), Trap> {
    if depth >= instance.max_call_depth() {
        return Err(Trap::StackExhausted);
    }

    let local_idx = match &instance.funcs()[idx as usize] {
        FuncInstance::Host(host) => {
            let host = host.clone();
            return host.call(args, results);
        }
        FuncInstance::Local(local_idx) => *local_idx,
    };

    let module = instance.module();
    let typeidx = module.funcsec[local_idx as usize];
    let func_type = &module.typesec[*typeidx as usize];
    let function = &module.codesec[local_idx as usize];

    let mut locals: alloc::vec::Vec<Value<A>> =
        alloc::vec::Vec::with_capacity(func_type.parameters.len() + function.locals.len());
    locals.extend_from_slice(args);
    for local in function.locals.iter() {
        locals.push(Value::from(*local));
    }

    let result_arity = func_type.results.len() as u32;
    let mut stack = Stack::new(instance.allocator().clone());
    let function_end = lookup(&function.continuations.function_end, 0);
    stack.push_label(0, result_arity, false, 0, function_end + 1);

    let mut cursor = Cursor::new(function.code.bytes());
    run(
        instance,
        &mut cursor,
        &mut stack,
        &mut locals,
        &function.continuations,
        result_arity,
        depth,
    )?;

    stack.copy_top_into(results);
    Ok(())
}

/// Runs one activation's bytecode to completion: it either falls through (or
/// explicitly returns from) its own outermost label, or it traps.
fn run<A: Allocator>(
    instance: &Rc<ModuleInstance<A>>,
    cursor: &mut Cursor,
    stack: &mut Stack<A>,
    locals: &mut [Value<A>],
    continuations: &Continuations<A>,
    function_result_arity: u32,
    depth: u32,
) -> Result<(), Trap> {
    loop {
        if !stack.has_label() {
            return Ok(());
        }

        let op_offset = cursor.offset();
        match cursor.read_opcode() {
            Opcode::Unreachable => return Err(Trap::Unreachable),
            Opcode::Nop => {}

            Opcode::Block => {
                let block_type = cursor.read_block_type();
                let (params, results) = block_arity(instance, block_type);
                let end_offset = lookup(&continuations.label_end, op_offset);
                stack.push_label(params, results, false, 0, end_offset + 1);
            }
            Opcode::Loop => {
                let block_type = cursor.read_block_type();
                let (params, results) = block_arity(instance, block_type);
                let restart = cursor.offset();
                let end_offset = lookup(&continuations.label_end, op_offset);
                stack.push_label(params, results, true, restart, end_offset + 1);
            }
            Opcode::If => {
                let block_type = cursor.read_block_type();
                let (params, results) = block_arity(instance, block_type);
                let end_offset = lookup(&continuations.label_end, op_offset);
                let taken = stack.pop_value().unwrap_i32() != 0;
                if taken {
                    stack.push_label(params, results, false, 0, end_offset + 1);
                } else if let Some(else_offset) = lookup_opt(&continuations.if_else, op_offset) {
                    cursor.jump(else_offset + 1);
                    stack.push_label(params, results, false, 0, end_offset + 1);
                } else {
                    cursor.jump(end_offset);
                    stack.push_label(params, results, false, 0, end_offset + 1);
                }
            }
            Opcode::Else | Opcode::End => {
                let exit_offset = stack.exit_innermost_label();
                cursor.jump(exit_offset);
            }

            Opcode::Br => {
                let label_depth = cursor.read_u32();
                match stack.branch(label_depth, function_result_arity) {
                    BranchOutcome::Jump(offset) => cursor.jump(offset),
                    BranchOutcome::Return => return Ok(()),
                }
            }
            Opcode::BrIf => {
                let label_depth = cursor.read_u32();
                let taken = stack.pop_value().unwrap_i32() != 0;
                if taken {
                    match stack.branch(label_depth, function_result_arity) {
                        BranchOutcome::Jump(offset) => cursor.jump(offset),
                        BranchOutcome::Return => return Ok(()),
                    }
                }
            }
            Opcode::BrTable => {
                let index = stack.pop_value().unwrap_i32() as u32;
                let label_depth = *cursor.read_br_table_target(index);
                match stack.branch(label_depth, function_result_arity) {
                    BranchOutcome::Jump(offset) => cursor.jump(offset),
                    BranchOutcome::Return => return Ok(()),
                }
            }
            Opcode::Return => {
                stack.do_return(function_result_arity);
                return Ok(());
            }
            Opcode::Call => {
                let funcidx = cursor.read_u32();
                call(instance, stack, funcidx, depth)?;
            }
            Opcode::CallIndirect => {
                let operands = cursor.read_call_indirect_operands();
                let table = *operands.table;
                let index = stack.pop_value().unwrap_i32();
                if index < 0 || index as u32 >= instance.table_size(table) {
                    return Err(Trap::UndefinedElement);
                }
                let funcref = instance.table_get(table, index as u32)?;
                // The table slot may have been populated by whichever
                // instance owns the function it names, not necessarily
                // this one (tables are shared across instances via
                // imports/exports), so dispatch through that instance.
                let Some((target, funcidx)) = funcref.unwrap_funcref() else {
                    return Err(Trap::UninitializedElement);
                };
                let expected = &instance.module().typesec[*operands.ty as usize];
                let actual = target.func_type(funcidx);
                if !signatures_match(expected, actual) {
                    return Err(Trap::IndirectCallTypeMismatch);
                }
                call(&target, stack, funcidx, depth)?;
            }

            Opcode::RefNull => {
                let reftype = cursor.read_ref_type();
                stack.push_value(Value::null(reftype));
            }
            Opcode::RefIsNull => {
                let is_null = matches!(
                    stack.pop_value(),
                    Value::FuncRef(None) | Value::ExternRef(None)
                );
                stack.push_value(Value::I32(is_null as i32));
            }
            Opcode::RefFunc => {
                let funcidx = cursor.read_u32();
                stack.push_value(Value::FuncRef(Some((instance.clone(), funcidx))));
            }

            Opcode::Drop => {
                stack.pop_value();
            }
            Opcode::Select => {
                let cond = stack.pop_value().unwrap_i32();
                let b = stack.pop_value();
                let a = stack.pop_value();
                stack.push_value(if cond != 0 { a } else { b });
            }
            Opcode::SelectT => {
                cursor.skip_select_t();
                let cond = stack.pop_value().unwrap_i32();
                let b = stack.pop_value();
                let a = stack.pop_value();
                stack.push_value(if cond != 0 { a } else { b });
            }

            Opcode::LocalGet => {
                let idx = cursor.read_u32();
                stack.push_value(locals[idx as usize].clone());
            }
            Opcode::LocalSet => {
                let idx = cursor.read_u32();
                locals[idx as usize] = stack.pop_value();
            }
            Opcode::LocalTee => {
                let idx = cursor.read_u32();
                locals[idx as usize] = stack.peek_value(0);
            }
            Opcode::GlobalGet => {
                let idx = cursor.read_u32();
                stack.push_value(instance.global_get(idx));
            }
            Opcode::GlobalSet => {
                let idx = cursor.read_u32();
                let value = stack.pop_value();
                instance.global_set(idx, value);
            }

            Opcode::TableGet => {
                let idx = cursor.read_u32();
                let elem = stack.pop_value().unwrap_i32() as u32;
                stack.push_value(instance.table_get(idx, elem)?);
            }
            Opcode::TableSet => {
                let idx = cursor.read_u32();
                let value = stack.pop_value();
                let elem = stack.pop_value().unwrap_i32() as u32;
                instance.table_set(idx, elem, value)?;
            }

            Opcode::MemorySize => {
                stack.push_value(Value::I32(instance.memory_size(0) as i32));
            }
            Opcode::MemoryGrow => {
                let delta = stack.pop_value().unwrap_i32() as u32;
                stack.push_value(Value::I32(instance.memory_grow(0, delta)));
            }

            Opcode::I32Load => {
                let mem_arg = cursor.read_mem_arg();
                let addr = stack.pop_value().unwrap_i32() as u32;
                let mut buf = [0u8; 4];
                instance.memory_read(0, addr, mem_arg.offset, &mut buf)?;
                stack.push_value(Value::I32(i32::from_le_bytes(buf)));
            }
            Opcode::I64Load => {
                let mem_arg = cursor.read_mem_arg();
                let addr = stack.pop_value().unwrap_i32() as u32;
                let mut buf = [0u8; 8];
                instance.memory_read(0, addr, mem_arg.offset, &mut buf)?;
                stack.push_value(Value::I64(i64::from_le_bytes(buf)));
            }
            Opcode::F32Load => {
                let mem_arg = cursor.read_mem_arg();
                let addr = stack.pop_value().unwrap_i32() as u32;
                let mut buf = [0u8; 4];
                instance.memory_read(0, addr, mem_arg.offset, &mut buf)?;
                stack.push_value(Value::F32(f32::from_le_bytes(buf)));
            }
            Opcode::F64Load => {
                let mem_arg = cursor.read_mem_arg();
                let addr = stack.pop_value().unwrap_i32() as u32;
                let mut buf = [0u8; 8];
                instance.memory_read(0, addr, mem_arg.offset, &mut buf)?;
                stack.push_value(Value::F64(f64::from_le_bytes(buf)));
            }
            Opcode::I32Load8S => {
                let mem_arg = cursor.read_mem_arg();
                let addr = stack.pop_value().unwrap_i32() as u32;
                let mut buf = [0u8; 1];
                instance.memory_read(0, addr, mem_arg.offset, &mut buf)?;
                stack.push_value(Value::I32(buf[0] as i8 as i32));
            }
            Opcode::I32Load8U => {
                let mem_arg = cursor.read_mem_arg();
                let addr = stack.pop_value().unwrap_i32() as u32;
                let mut buf = [0u8; 1];
                instance.memory_read(0, addr, mem_arg.offset, &mut buf)?;
                stack.push_value(Value::I32(buf[0] as i32));
            }
            Opcode::I32Load16S => {
                let mem_arg = cursor.read_mem_arg();
                let addr = stack.pop_value().unwrap_i32() as u32;
                let mut buf = [0u8; 2];
                instance.memory_read(0, addr, mem_arg.offset, &mut buf)?;
                stack.push_value(Value::I32(i16::from_le_bytes(buf) as i32));
            }
            Opcode::I32Load16U => {
                let mem_arg = cursor.read_mem_arg();
                let addr = stack.pop_value().unwrap_i32() as u32;
                let mut buf = [0u8; 2];
                instance.memory_read(0, addr, mem_arg.offset, &mut buf)?;
                stack.push_value(Value::I32(u16::from_le_bytes(buf) as i32));
            }
            Opcode::I64Load8S => {
                let mem_arg = cursor.read_mem_arg();
                let addr = stack.pop_value().unwrap_i32() as u32;
                let mut buf = [0u8; 1];
                instance.memory_read(0, addr, mem_arg.offset, &mut buf)?;
                stack.push_value(Value::I64(buf[0] as i8 as i64));
            }
            Opcode::I64Load8U => {
                let mem_arg = cursor.read_mem_arg();
                let addr = stack.pop_value().unwrap_i32() as u32;
                let mut buf = [0u8; 1];
                instance.memory_read(0, addr, mem_arg.offset, &mut buf)?;
                stack.push_value(Value::I64(buf[0] as i64));
            }
            Opcode::I64Load16S => {
                let mem_arg = cursor.read_mem_arg();
                let addr = stack.pop_value().unwrap_i32() as u32;
                let mut buf = [0u8; 2];
                instance.memory_read(0, addr, mem_arg.offset, &mut buf)?;
                stack.push_value(Value::I64(i16::from_le_bytes(buf) as i64));
            }
            Opcode::I64Load16U => {
                let mem_arg = cursor.read_mem_arg();
                let addr = stack.pop_value().unwrap_i32() as u32;
                let mut buf = [0u8; 2];
                instance.memory_read(0, addr, mem_arg.offset, &mut buf)?;
                stack.push_value(Value::I64(u16::from_le_bytes(buf) as i64));
            }
            Opcode::I64Load32S => {
                let mem_arg = cursor.read_mem_arg();
                let addr = stack.pop_value().unwrap_i32() as u32;
                let mut buf = [0u8; 4];
                instance.memory_read(0, addr, mem_arg.offset, &mut buf)?;
                stack.push_value(Value::I64(i32::from_le_bytes(buf) as i64));
            }
            Opcode::I64Load32U => {
                let mem_arg = cursor.read_mem_arg();
                let addr = stack.pop_value().unwrap_i32() as u32;
                let mut buf = [0u8; 4];
                instance.memory_read(0, addr, mem_arg.offset, &mut buf)?;
                stack.push_value(Value::I64(u32::from_le_bytes(buf) as i64));
            }

            Opcode::I32Store => {
                let mem_arg = cursor.read_mem_arg();
                let value = stack.pop_value().unwrap_i32();
                let addr = stack.pop_value().unwrap_i32() as u32;
                instance.memory_write(0, addr, mem_arg.offset, &value.to_le_bytes())?;
            }
            Opcode::I64Store => {
                let mem_arg = cursor.read_mem_arg();
                let value = stack.pop_value().unwrap_i64();
                let addr = stack.pop_value().unwrap_i32() as u32;
                instance.memory_write(0, addr, mem_arg.offset, &value.to_le_bytes())?;
            }
            Opcode::F32Store => {
                let mem_arg = cursor.read_mem_arg();
                let value = stack.pop_value().unwrap_f32();
                let addr = stack.pop_value().unwrap_i32() as u32;
                instance.memory_write(0, addr, mem_arg.offset, &value.to_le_bytes())?;
            }
            Opcode::F64Store => {
                let mem_arg = cursor.read_mem_arg();
                let value = stack.pop_value().unwrap_f64();
                let addr = stack.pop_value().unwrap_i32() as u32;
                instance.memory_write(0, addr, mem_arg.offset, &value.to_le_bytes())?;
            }
            Opcode::I32Store8 => {
                let mem_arg = cursor.read_mem_arg();
                let value = stack.pop_value().unwrap_i32() as u8;
                let addr = stack.pop_value().unwrap_i32() as u32;
                instance.memory_write(0, addr, mem_arg.offset, &[value])?;
            }
            Opcode::I32Store16 => {
                let mem_arg = cursor.read_mem_arg();
                let value = stack.pop_value().unwrap_i32() as u16;
                let addr = stack.pop_value().unwrap_i32() as u32;
                instance.memory_write(0, addr, mem_arg.offset, &value.to_le_bytes())?;
            }
            Opcode::I64Store8 => {
                let mem_arg = cursor.read_mem_arg();
                let value = stack.pop_value().unwrap_i64() as u8;
                let addr = stack.pop_value().unwrap_i32() as u32;
                instance.memory_write(0, addr, mem_arg.offset, &[value])?;
            }
            Opcode::I64Store16 => {
                let mem_arg = cursor.read_mem_arg();
                let value = stack.pop_value().unwrap_i64() as u16;
                let addr = stack.pop_value().unwrap_i32() as u32;
                instance.memory_write(0, addr, mem_arg.offset, &value.to_le_bytes())?;
            }
            Opcode::I64Store32 => {
                let mem_arg = cursor.read_mem_arg();
                let value = stack.pop_value().unwrap_i64() as u32;
                let addr = stack.pop_value().unwrap_i32() as u32;
                instance.memory_write(0, addr, mem_arg.offset, &value.to_le_bytes())?;
            }

            Opcode::I32Const => stack.push_value(Value::I32(cursor.read_i32())),
            Opcode::I64Const => stack.push_value(Value::I64(cursor.read_i64())),
            Opcode::F32Const => stack.push_value(Value::F32(cursor.read_f32())),
            Opcode::F64Const => stack.push_value(Value::F64(cursor.read_f64())),

            Opcode::I32Eqz => unop_i32(stack, |a| (a == 0) as i32),
            Opcode::I32Eq => cmp_i32(stack, |a, b| a == b),
            Opcode::I32Ne => cmp_i32(stack, |a, b| a != b),
            Opcode::I32LtS => cmp_i32(stack, |a, b| a < b),
            Opcode::I32LtU => cmp_i32(stack, |a, b| (a as u32) < (b as u32)),
            Opcode::I32GtS => cmp_i32(stack, |a, b| a > b),
            Opcode::I32GtU => cmp_i32(stack, |a, b| (a as u32) > (b as u32)),
            Opcode::I32LeS => cmp_i32(stack, |a, b| a <= b),
            Opcode::I32LeU => cmp_i32(stack, |a, b| (a as u32) <= (b as u32)),
            Opcode::I32GeS => cmp_i32(stack, |a, b| a >= b),
            Opcode::I32GeU => cmp_i32(stack, |a, b| (a as u32) >= (b as u32)),

            Opcode::I64Eqz => {
                let a = stack.pop_value().unwrap_i64();
                stack.push_value(Value::I32((a == 0) as i32));
            }
            Opcode::I64Eq => cmp_i64(stack, |a, b| a == b),
            Opcode::I64Ne => cmp_i64(stack, |a, b| a != b),
            Opcode::I64LtS => cmp_i64(stack, |a, b| a < b),
            Opcode::I64LtU => cmp_i64(stack, |a, b| (a as u64) < (b as u64)),
            Opcode::I64GtS => cmp_i64(stack, |a, b| a > b),
            Opcode::I64GtU => cmp_i64(stack, |a, b| (a as u64) > (b as u64)),
            Opcode::I64LeS => cmp_i64(stack, |a, b| a <= b),
            Opcode::I64LeU => cmp_i64(stack, |a, b| (a as u64) <= (b as u64)),
            Opcode::I64GeS => cmp_i64(stack, |a, b| a >= b),
            Opcode::I64GeU => cmp_i64(stack, |a, b| (a as u64) >= (b as u64)),

            Opcode::F32Eq => cmp_f32(stack, |a, b| a == b),
            Opcode::F32Ne => cmp_f32(stack, |a, b| a != b),
            Opcode::F32Lt => cmp_f32(stack, |a, b| a < b),
            Opcode::F32Gt => cmp_f32(stack, |a, b| a > b),
            Opcode::F32Le => cmp_f32(stack, |a, b| a <= b),
            Opcode::F32Ge => cmp_f32(stack, |a, b| a >= b),
            Opcode::F64Eq => cmp_f64(stack, |a, b| a == b),
            Opcode::F64Ne => cmp_f64(stack, |a, b| a != b),
            Opcode::F64Lt => cmp_f64(stack, |a, b| a < b),
            Opcode::F64Gt => cmp_f64(stack, |a, b| a > b),
            Opcode::F64Le => cmp_f64(stack, |a, b| a <= b),
            Opcode::F64Ge => cmp_f64(stack, |a, b| a >= b),

            Opcode::I32Clz => unop_i32(stack, |a| (a as u32).leading_zeros() as i32),
            Opcode::I32Ctz => unop_i32(stack, |a| (a as u32).trailing_zeros() as i32),
            Opcode::I32Popcnt => unop_i32(stack, |a| (a as u32).count_ones() as i32),
            Opcode::I32Add => binop_i32(stack, i32::wrapping_add),
            Opcode::I32Sub => binop_i32(stack, i32::wrapping_sub),
            Opcode::I32Mul => binop_i32(stack, i32::wrapping_mul),
            Opcode::I32DivS => {
                let b = stack.pop_value().unwrap_i32();
                let a = stack.pop_value().unwrap_i32();
                if b == 0 {
                    return Err(Trap::IntegerDivisionByZero);
                }
                if a == i32::MIN && b == -1 {
                    return Err(Trap::IntegerOverflow);
                }
                stack.push_value(Value::I32(a.wrapping_div(b)));
            }
            Opcode::I32DivU => {
                let b = stack.pop_value().unwrap_i32() as u32;
                let a = stack.pop_value().unwrap_i32() as u32;
                if b == 0 {
                    return Err(Trap::IntegerDivisionByZero);
                }
                stack.push_value(Value::I32((a / b) as i32));
            }
            Opcode::I32RemS => {
                let b = stack.pop_value().unwrap_i32();
                let a = stack.pop_value().unwrap_i32();
                if b == 0 {
                    return Err(Trap::IntegerDivisionByZero);
                }
                stack.push_value(Value::I32(a.wrapping_rem(b)));
            }
            Opcode::I32RemU => {
                let b = stack.pop_value().unwrap_i32() as u32;
                let a = stack.pop_value().unwrap_i32() as u32;
                if b == 0 {
                    return Err(Trap::IntegerDivisionByZero);
                }
                stack.push_value(Value::I32((a % b) as i32));
            }
            Opcode::I32And => binop_i32(stack, |a, b| a & b),
            Opcode::I32Or => binop_i32(stack, |a, b| a | b),
            Opcode::I32Xor => binop_i32(stack, |a, b| a ^ b),
            Opcode::I32Shl => binop_i32(stack, |a, b| a.wrapping_shl(b as u32)),
            Opcode::I32ShrS => binop_i32(stack, |a, b| a.wrapping_shr(b as u32)),
            Opcode::I32ShrU => binop_i32(stack, |a, b| (a as u32).wrapping_shr(b as u32) as i32),
            Opcode::I32Rotl => binop_i32(stack, |a, b| (a as u32).rotate_left(b as u32) as i32),
            Opcode::I32Rotr => binop_i32(stack, |a, b| (a as u32).rotate_right(b as u32) as i32),

            Opcode::I64Clz => unop_i64(stack, |a| (a as u64).leading_zeros() as i64),
            Opcode::I64Ctz => unop_i64(stack, |a| (a as u64).trailing_zeros() as i64),
            Opcode::I64Popcnt => unop_i64(stack, |a| (a as u64).count_ones() as i64),
            Opcode::I64Add => binop_i64(stack, i64::wrapping_add),
            Opcode::I64Sub => binop_i64(stack, i64::wrapping_sub),
            Opcode::I64Mul => binop_i64(stack, i64::wrapping_mul),
            Opcode::I64DivS => {
                let b = stack.pop_value().unwrap_i64();
                let a = stack.pop_value().unwrap_i64();
                if b == 0 {
                    return Err(Trap::IntegerDivisionByZero);
                }
                if a == i64::MIN && b == -1 {
                    return Err(Trap::IntegerOverflow);
                }
                stack.push_value(Value::I64(a.wrapping_div(b)));
            }
            Opcode::I64DivU => {
                let b = stack.pop_value().unwrap_i64() as u64;
                let a = stack.pop_value().unwrap_i64() as u64;
                if b == 0 {
                    return Err(Trap::IntegerDivisionByZero);
                }
                stack.push_value(Value::I64((a / b) as i64));
            }
            Opcode::I64RemS => {
                let b = stack.pop_value().unwrap_i64();
                let a = stack.pop_value().unwrap_i64();
                if b == 0 {
                    return Err(Trap::IntegerDivisionByZero);
                }
                stack.push_value(Value::I64(a.wrapping_rem(b)));
            }
            Opcode::I64RemU => {
                let b = stack.pop_value().unwrap_i64() as u64;
                let a = stack.pop_value().unwrap_i64() as u64;
                if b == 0 {
                    return Err(Trap::IntegerDivisionByZero);
                }
                stack.push_value(Value::I64((a % b) as i64));
            }
            Opcode::I64And => binop_i64(stack, |a, b| a & b),
            Opcode::I64Or => binop_i64(stack, |a, b| a | b),
            Opcode::I64Xor => binop_i64(stack, |a, b| a ^ b),
            Opcode::I64Shl => binop_i64(stack, |a, b| a.wrapping_shl(b as u32)),
            Opcode::I64ShrS => binop_i64(stack, |a, b| a.wrapping_shr(b as u32)),
            Opcode::I64ShrU => binop_i64(stack, |a, b| (a as u64).wrapping_shr(b as u32) as i64),
            Opcode::I64Rotl => binop_i64(stack, |a, b| (a as u64).rotate_left(b as u32) as i64),
            Opcode::I64Rotr => binop_i64(stack, |a, b| (a as u64).rotate_right(b as u32) as i64),

            Opcode::F32Abs => unop_f32(stack, f32::abs),
            Opcode::F32Neg => unop_f32(stack, |a| -a),
            Opcode::F32Ceil => unop_f32(stack, f32::ceil),
            Opcode::F32Floor => unop_f32(stack, f32::floor),
            Opcode::F32Trunc => unop_f32(stack, f32::trunc),
            Opcode::F32Nearest => unop_f32(stack, f32::round_ties_even),
            Opcode::F32Sqrt => unop_f32(stack, f32::sqrt),
            Opcode::F32Add => binop_f32(stack, |a, b| a + b),
            Opcode::F32Sub => binop_f32(stack, |a, b| a - b),
            Opcode::F32Mul => binop_f32(stack, |a, b| a * b),
            Opcode::F32Div => binop_f32(stack, |a, b| a / b),
            Opcode::F32Min => binop_f32(stack, wasm_min_f32),
            Opcode::F32Max => binop_f32(stack, wasm_max_f32),
            Opcode::F32Copysign => binop_f32(stack, f32::copysign),

            Opcode::F64Abs => unop_f64(stack, f64::abs),
            Opcode::F64Neg => unop_f64(stack, |a| -a),
            Opcode::F64Ceil => unop_f64(stack, f64::ceil),
            Opcode::F64Floor => unop_f64(stack, f64::floor),
            Opcode::F64Trunc => unop_f64(stack, f64::trunc),
            Opcode::F64Nearest => unop_f64(stack, f64::round_ties_even),
            Opcode::F64Sqrt => unop_f64(stack, f64::sqrt),
            Opcode::F64Add => binop_f64(stack, |a, b| a + b),
            Opcode::F64Sub => binop_f64(stack, |a, b| a - b),
            Opcode::F64Mul => binop_f64(stack, |a, b| a * b),
            Opcode::F64Div => binop_f64(stack, |a, b| a / b),
            Opcode::F64Min => binop_f64(stack, wasm_min_f64),
            Opcode::F64Max => binop_f64(stack, wasm_max_f64),
            Opcode::F64Copysign => binop_f64(stack, f64::copysign),

            Opcode::I32WrapI64 => {
                let a = stack.pop_value().unwrap_i64();
                stack.push_value(Value::I32(a as i32));
            }
            Opcode::I32TruncF32S => {
                let a = stack.pop_value().unwrap_f32();
                stack.push_value(Value::I32(trunc_to_i32(a as f64, false)?));
            }
            Opcode::I32TruncF32U => {
                let a = stack.pop_value().unwrap_f32();
                stack.push_value(Value::I32(trunc_to_i32(a as f64, true)?));
            }
            Opcode::I32TruncF64S => {
                let a = stack.pop_value().unwrap_f64();
                stack.push_value(Value::I32(trunc_to_i32(a, false)?));
            }
            Opcode::I32TruncF64U => {
                let a = stack.pop_value().unwrap_f64();
                stack.push_value(Value::I32(trunc_to_i32(a, true)?));
            }
            Opcode::I64ExtendI32S => {
                let a = stack.pop_value().unwrap_i32();
                stack.push_value(Value::I64(a as i64));
            }
            Opcode::I64ExtendI32U => {
                let a = stack.pop_value().unwrap_i32();
                stack.push_value(Value::I64((a as u32) as i64));
            }
            Opcode::I64TruncF32S => {
                let a = stack.pop_value().unwrap_f32();
                stack.push_value(Value::I64(trunc_to_i64(a as f64, false)?));
            }
            Opcode::I64TruncF32U => {
                let a = stack.pop_value().unwrap_f32();
                stack.push_value(Value::I64(trunc_to_i64(a as f64, true)?));
            }
            Opcode::I64TruncF64S => {
                let a = stack.pop_value().unwrap_f64();
                stack.push_value(Value::I64(trunc_to_i64(a, false)?));
            }
            Opcode::I64TruncF64U => {
                let a = stack.pop_value().unwrap_f64();
                stack.push_value(Value::I64(trunc_to_i64(a, true)?));
            }
            Opcode::F32ConvertI32S => {
                let a = stack.pop_value().unwrap_i32();
                stack.push_value(Value::F32(a as f32));
            }
            Opcode::F32ConvertI32U => {
                let a = stack.pop_value().unwrap_i32();
                stack.push_value(Value::F32((a as u32) as f32));
            }
            Opcode::F32ConvertI64S => {
                let a = stack.pop_value().unwrap_i64();
                stack.push_value(Value::F32(a as f32));
            }
            Opcode::F32ConvertI64U => {
                let a = stack.pop_value().unwrap_i64();
                stack.push_value(Value::F32((a as u64) as f32));
            }
            Opcode::F32DemoteF64 => {
                let a = stack.pop_value().unwrap_f64();
                stack.push_value(Value::F32(a as f32));
            }
            Opcode::F64ConvertI32S => {
                let a = stack.pop_value().unwrap_i32();
                stack.push_value(Value::F64(a as f64));
            }
            Opcode::F64ConvertI32U => {
                let a = stack.pop_value().unwrap_i32();
                stack.push_value(Value::F64((a as u32) as f64));
            }
            Opcode::F64ConvertI64S => {
                let a = stack.pop_value().unwrap_i64();
                stack.push_value(Value::F64(a as f64));
            }
            Opcode::F64ConvertI64U => {
                let a = stack.pop_value().unwrap_i64();
                stack.push_value(Value::F64((a as u64) as f64));
            }
            Opcode::F64PromoteF32 => {
                let a = stack.pop_value().unwrap_f32();
                stack.push_value(Value::F64(a as f64));
            }
            Opcode::I32ReinterpretF32 => {
                let a = stack.pop_value().unwrap_f32();
                stack.push_value(Value::I32(a.to_bits() as i32));
            }
            Opcode::I64ReinterpretF64 => {
                let a = stack.pop_value().unwrap_f64();
                stack.push_value(Value::I64(a.to_bits() as i64));
            }
            Opcode::F32ReinterpretI32 => {
                let a = stack.pop_value().unwrap_i32();
                stack.push_value(Value::F32(f32::from_bits(a as u32)));
            }
            Opcode::F64ReinterpretI64 => {
                let a = stack.pop_value().unwrap_i64();
                stack.push_value(Value::F64(f64::from_bits(a as u64)));
            }
            Opcode::I32Extend8S => unop_i32(stack, |a| (a as i8) as i32),
            Opcode::I32Extend16S => unop_i32(stack, |a| (a as i16) as i32),
            Opcode::I64Extend8S => unop_i64(stack, |a| (a as i8) as i64),
            Opcode::I64Extend16S => unop_i64(stack, |a| (a as i16) as i64),
            Opcode::I64Extend32S => unop_i64(stack, |a| (a as i32) as i64),

            Opcode::BulkPrefix => run_bulk(instance, cursor, stack)?,

            Opcode::VectorPrefix => unreachable!("vector instructions are unsupported"),
        }
    }
}

fn run_bulk<A: Allocator>(
    instance: &Rc<ModuleInstance<A>>,
    cursor: &mut Cursor,
    stack: &mut Stack<A>,
) -> Result<(), Trap> {
    match cursor.read_bulk_opcode() {
        BulkOpcode::TableInit => {
            let operands = cursor.read_table_init_operands();
            let len = stack.pop_value().unwrap_i32() as u32;
            let src = stack.pop_value().unwrap_i32() as u32;
            let dst = stack.pop_value().unwrap_i32() as u32;
            ModuleInstance::table_init(instance, *operands.table, *operands.elem, dst, src, len)?;
        }
        BulkOpcode::ElemDrop => {
            let idx = cursor.read_u32();
            instance.elem_drop(idx);
        }
        BulkOpcode::TableCopy => {
            let operands = cursor.read_table_copy_operands();
            let len = stack.pop_value().unwrap_i32() as u32;
            let src = stack.pop_value().unwrap_i32() as u32;
            let dst = stack.pop_value().unwrap_i32() as u32;
            instance.table_copy(*operands.dst, *operands.src, dst, src, len)?;
        }
        BulkOpcode::TableGrow => {
            let idx = cursor.read_u32();
            let delta = stack.pop_value().unwrap_i32() as u32;
            let init = stack.pop_value();
            stack.push_value(Value::I32(instance.table_grow(idx, delta, init)));
        }
        BulkOpcode::TableSize => {
            let idx = cursor.read_u32();
            stack.push_value(Value::I32(instance.table_size(idx) as i32));
        }
        BulkOpcode::TableFill => {
            let idx = cursor.read_u32();
            let len = stack.pop_value().unwrap_i32() as u32;
            let value = stack.pop_value();
            let start = stack.pop_value().unwrap_i32() as u32;
            instance.table_fill(idx, start, value, len)?;
        }
        BulkOpcode::MemoryInit => {
            let idx = cursor.read_u32();
            let len = stack.pop_value().unwrap_i32() as u32;
            let src = stack.pop_value().unwrap_i32() as u32;
            let dst = stack.pop_value().unwrap_i32() as u32;
            instance.memory_init(idx, dst, src, len)?;
        }
        BulkOpcode::DataDrop => {
            let idx = cursor.read_u32();
            instance.data_drop(idx);
        }
        BulkOpcode::MemoryCopy => {
            let len = stack.pop_value().unwrap_i32() as u32;
            let src = stack.pop_value().unwrap_i32() as u32;
            let dst = stack.pop_value().unwrap_i32() as u32;
            instance.memory_copy(0, dst, src, len)?;
        }
        BulkOpcode::MemoryFill => {
            let len = stack.pop_value().unwrap_i32() as u32;
            let value = stack.pop_value().unwrap_i32() as u8;
            let dst = stack.pop_value().unwrap_i32() as u32;
            instance.memory_fill(0, dst, value, len)?;
        }
        BulkOpcode::I32TruncSatF32S => {
            let a = stack.pop_value().unwrap_f32();
            stack.push_value(Value::I32(trunc_sat_to_i32(a as f64, false)));
        }
        BulkOpcode::I32TruncSatF32U => {
            let a = stack.pop_value().unwrap_f32();
            stack.push_value(Value::I32(trunc_sat_to_i32(a as f64, true)));
        }
        BulkOpcode::I32TruncSatF64S => {
            let a = stack.pop_value().unwrap_f64();
            stack.push_value(Value::I32(trunc_sat_to_i32(a, false)));
        }
        BulkOpcode::I32TruncSatF64U => {
            let a = stack.pop_value().unwrap_f64();
            stack.push_value(Value::I32(trunc_sat_to_i32(a, true)));
        }
        BulkOpcode::I64TruncSatF32S => {
            let a = stack.pop_value().unwrap_f32();
            stack.push_value(Value::I64(trunc_sat_to_i64(a as f64, false)));
        }
        BulkOpcode::I64TruncSatF32U => {
            let a = stack.pop_value().unwrap_f32();
            stack.push_value(Value::I64(trunc_sat_to_i64(a as f64, true)));
        }
        BulkOpcode::I64TruncSatF64S => {
            let a = stack.pop_value().unwrap_f64();
            stack.push_value(Value::I64(trunc_sat_to_i64(a, false)));
        }
        BulkOpcode::I64TruncSatF64U => {
            let a = stack.pop_value().unwrap_f64();
            stack.push_value(Value::I64(trunc_sat_to_i64(a, true)));
        }
    }
    Ok(())
}

/// Pops `funcidx`'s arguments off `stack`, invokes it, and pushes its
/// results. Used by both `call` and `call_indirect`, which differ only in
/// how they arrive at `funcidx`.
fn call<A: Allocator>(
    instance: &Rc<ModuleInstance<A>>,
    stack: &mut Stack<A>,
    funcidx: u32,
    depth: u32,
) -> Result<(), Trap> {
    let ty = instance.func_type(funcidx);
    let param_count = ty.parameters.len();
    let result_count = ty.results.len();

    let mut args: alloc::vec::Vec<Value<A>> = alloc::vec::Vec::with_capacity(param_count);
    for _ in 0..param_count {
        args.push(stack.pop_value());
    }
    args.reverse();

    let mut results: alloc::vec::Vec<Value<A>> = alloc::vec::Vec::new();
    results.resize(result_count, Value::I32(0));

    invoke(instance, funcidx, &args, &mut results, depth + 1)?;

    for value in results {
        stack.push_value(value);
    }
    Ok(())
}

fn signatures_match<A: Allocator>(a: &FunctionType<A>, b: &FunctionType<A>) -> bool {
    a.parameters.iter().eq(b.parameters.iter()) && a.results.iter().eq(b.results.iter())
}

fn block_arity<A: Allocator>(instance: &ModuleInstance<A>, block_type: BlockType) -> (u32, u32) {
    match block_type {
        BlockType::Empty => (0, 0),
        BlockType::Result(_) => (0, 1),
        BlockType::TypeIndex(typeidx) => {
            let ty = &instance.module().typesec[*typeidx as usize];
            (ty.parameters.len() as u32, ty.results.len() as u32)
        }
    }
}

fn lookup(map: &[(u32, u32)], key: u32) -> u32 {
    map.iter()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| *v)
        .expect("continuations cover every structured opcode")
}

fn lookup_opt(map: &[(u32, u32)], key: u32) -> Option<u32> {
    map.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

fn unop_i32<A: Allocator>(stack: &mut Stack<A>, f: impl FnOnce(i32) -> i32) {
    let a = stack.pop_value().unwrap_i32();
    stack.push_value(Value::I32(f(a)));
}

fn binop_i32<A: Allocator>(stack: &mut Stack<A>, f: impl FnOnce(i32, i32) -> i32) {
    let b = stack.pop_value().unwrap_i32();
    let a = stack.pop_value().unwrap_i32();
    stack.push_value(Value::I32(f(a, b)));
}

fn cmp_i32<A: Allocator>(stack: &mut Stack<A>, f: impl FnOnce(i32, i32) -> bool) {
    let b = stack.pop_value().unwrap_i32();
    let a = stack.pop_value().unwrap_i32();
    stack.push_value(Value::I32(f(a, b) as i32));
}

fn unop_i64<A: Allocator>(stack: &mut Stack<A>, f: impl FnOnce(i64) -> i64) {
    let a = stack.pop_value().unwrap_i64();
    stack.push_value(Value::I64(f(a)));
}

fn binop_i64<A: Allocator>(stack: &mut Stack<A>, f: impl FnOnce(i64, i64) -> i64) {
    let b = stack.pop_value().unwrap_i64();
    let a = stack.pop_value().unwrap_i64();
    stack.push_value(Value::I64(f(a, b)));
}

fn cmp_i64<A: Allocator>(stack: &mut Stack<A>, f: impl FnOnce(i64, i64) -> bool) {
    let b = stack.pop_value().unwrap_i64();
    let a = stack.pop_value().unwrap_i64();
    stack.push_value(Value::I32(f(a, b) as i32));
}

fn unop_f32<A: Allocator>(stack: &mut Stack<A>, f: impl FnOnce(f32) -> f32) {
    let a = stack.pop_value().unwrap_f32();
    stack.push_value(Value::F32(f(a)));
}

fn binop_f32<A: Allocator>(stack: &mut Stack<A>, f: impl FnOnce(f32, f32) -> f32) {
    let b = stack.pop_value().unwrap_f32();
    let a = stack.pop_value().unwrap_f32();
    stack.push_value(Value::F32(f(a, b)));
}

fn cmp_f32<A: Allocator>(stack: &mut Stack<A>, f: impl FnOnce(f32, f32) -> bool) {
    let b = stack.pop_value().unwrap_f32();
    let a = stack.pop_value().unwrap_f32();
    stack.push_value(Value::I32(f(a, b) as i32));
}

fn unop_f64<A: Allocator>(stack: &mut Stack<A>, f: impl FnOnce(f64) -> f64) {
    let a = stack.pop_value().unwrap_f64();
    stack.push_value(Value::F64(f(a)));
}

fn binop_f64<A: Allocator>(stack: &mut Stack<A>, f: impl FnOnce(f64, f64) -> f64) {
    let b = stack.pop_value().unwrap_f64();
    let a = stack.pop_value().unwrap_f64();
    stack.push_value(Value::F64(f(a, b)));
}

fn cmp_f64<A: Allocator>(stack: &mut Stack<A>, f: impl FnOnce(f64, f64) -> bool) {
    let b = stack.pop_value().unwrap_f64();
    let a = stack.pop_value().unwrap_f64();
    stack.push_value(Value::I32(f(a, b) as i32));
}

fn wasm_min_f32(a: f32, b: f32) -> f32 {
    if a.is_nan() || b.is_nan() { f32::NAN } else { a.min(b) }
}

fn wasm_max_f32(a: f32, b: f32) -> f32 {
    if a.is_nan() || b.is_nan() { f32::NAN } else { a.max(b) }
}

fn wasm_min_f64(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() { f64::NAN } else { a.min(b) }
}

fn wasm_max_f64(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() { f64::NAN } else { a.max(b) }
}

/// Trapping float-to-int conversion, matching the testsuite's "invalid
/// conversion to integer" (NaN) and "integer overflow" (out of range,
/// including +/-infinity) messages.
fn trunc_to_i32(v: f64, unsigned: bool) -> Result<i32, Trap> {
    if v.is_nan() {
        return Err(Trap::InvalidIntegerConversion);
    }
    let t = v.trunc();
    if unsigned {
        if t < 0.0 || t >= 4294967296.0 {
            return Err(Trap::IntegerOverflow);
        }
        Ok((t as u32) as i32)
    } else {
        if t < -2147483648.0 || t >= 2147483648.0 {
            return Err(Trap::IntegerOverflow);
        }
        Ok(t as i32)
    }
}

fn trunc_to_i64(v: f64, unsigned: bool) -> Result<i64, Trap> {
    if v.is_nan() {
        return Err(Trap::InvalidIntegerConversion);
    }
    let t = v.trunc();
    if unsigned {
        if t < 0.0 || t >= 18446744073709551616.0 {
            return Err(Trap::IntegerOverflow);
        }
        Ok((t as u64) as i64)
    } else {
        if t < -9223372036854775808.0 || t >= 9223372036854775808.0 {
            return Err(Trap::IntegerOverflow);
        }
        Ok(t as i64)
    }
}

/// Non-trapping float-to-int conversion (the "non-trapping float-to-int
/// conversions" proposal): NaN saturates to zero, out-of-range values
/// saturate to the nearest representable bound.
fn trunc_sat_to_i32(v: f64, unsigned: bool) -> i32 {
    if v.is_nan() {
        return 0;
    }
    let t = v.trunc();
    if unsigned {
        if t < 0.0 {
            0
        } else if t >= 4294967296.0 {
            u32::MAX as i32
        } else {
            (t as u32) as i32
        }
    } else if t < -2147483648.0 {
        i32::MIN
    } else if t >= 2147483648.0 {
        i32::MAX
    } else {
        t as i32
    }
}

fn trunc_sat_to_i64(v: f64, unsigned: bool) -> i64 {
    if v.is_nan() {
        return 0;
    }
    let t = v.trunc();
    if unsigned {
        if t < 0.0 {
            0
        } else if t >= 18446744073709551616.0 {
            u64::MAX as i64
        } else {
            (t as u64) as i64
        }
    } else if t < -9223372036854775808.0 {
        i64::MIN
    } else if t >= 9223372036854775808.0 {
        i64::MAX
    } else {
        t as i64
    }
}
