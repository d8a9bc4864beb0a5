// Copyright (c) 2026 The wasmvm Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Abstract type-checking of transcoded expressions, following the
//! stack-based validation algorithm from the WebAssembly specification's
//! appendix: an operand stack of (possibly unknown) value types alongside a
//! stack of control frames, walked directly over the same
//! [`crate::exec::Cursor`] encoding the interpreter executes.

use alloc::vec::Vec as AVec;

use crate::Allocator;
use crate::exec::Cursor;
use crate::types::{
    BlockType, BulkOpcode, CallIndirectOperands, Expression, FuncIdx, FunctionType,
    GlobalTypeMutability, LabelIdx, Locals, Opcode, RefType, TableIdx, ValType,
};

use super::{Error, Validator};

#[derive(Copy, Clone, Debug)]
pub(crate) enum ExpressionValidationContext<'module, A: Allocator> {
    /// A function body, whose locals span its parameters followed by its
    /// declared locals.
    Function(&'module FunctionType<A>, &'module Locals<A>),
    /// A constant expression (global initializer, element/data offset, or
    /// element initializer) producing a single value of the given type.
    Constant(ValType),
}

enum FrameKind {
    Block,
    Loop,
    If,
}

struct CtrlFrame {
    kind: FrameKind,
    start_types: AVec<ValType>,
    end_types: AVec<ValType>,
    height: usize,
    unreachable: bool,
}

// The operand and control-frame stacks used while walking a single
// expression. Transient validator scratch, not part of any persisted module
// data, so it lives in the global allocator rather than `A`.
struct State {
    opds: AVec<Option<ValType>>,
    ctrls: AVec<CtrlFrame>,
}

impl State {
    fn new() -> Self {
        Self {
            opds: AVec::new(),
            ctrls: AVec::new(),
        }
    }

    fn push_val(&mut self, ty: ValType) {
        self.opds.push(Some(ty));
    }

    fn push_val_opt(&mut self, ty: Option<ValType>) {
        self.opds.push(ty);
    }

    fn push_vals(&mut self, types: &[ValType]) {
        for &ty in types {
            self.push_val(ty);
        }
    }

    fn pop_val(&mut self) -> Result<Option<ValType>, Error> {
        let frame = self.ctrls.last().expect("at least the outer frame");
        if self.opds.len() == frame.height {
            if frame.unreachable {
                return Ok(None);
            }
            return Err(Error::TypeMismatch);
        }
        Ok(self.opds.pop().expect("checked non-empty above"))
    }

    fn pop_val_expect(&mut self, expected: ValType) -> Result<Option<ValType>, Error> {
        let actual = self.pop_val()?;
        match actual {
            Some(ty) if ty != expected => Err(Error::TypeMismatch),
            _ => Ok(actual),
        }
    }

    fn pop_val_any_of(&mut self, candidates: &[ValType]) -> Result<Option<ValType>, Error> {
        let actual = self.pop_val()?;
        if let Some(ty) = actual
            && !candidates.contains(&ty)
        {
            return Err(Error::TypeMismatch);
        }
        Ok(actual)
    }

    fn pop_vals(&mut self, types: &[ValType]) -> Result<(), Error> {
        for &ty in types.iter().rev() {
            self.pop_val_expect(ty)?;
        }
        Ok(())
    }

    fn push_ctrl(&mut self, kind: FrameKind, start_types: AVec<ValType>, end_types: AVec<ValType>) {
        let height = self.opds.len();
        self.push_vals(&start_types);
        self.ctrls.push(CtrlFrame {
            kind,
            start_types,
            end_types,
            height,
            unreachable: false,
        });
    }

    fn pop_ctrl(&mut self) -> Result<CtrlFrame, Error> {
        let end_types = self
            .ctrls
            .last()
            .expect("at least the outer frame")
            .end_types
            .clone();
        self.pop_vals(&end_types)?;
        let frame = self.ctrls.last().expect("at least the outer frame");
        if self.opds.len() != frame.height {
            return Err(Error::TypeMismatch);
        }
        Ok(self.ctrls.pop().expect("checked above"))
    }

    fn set_unreachable(&mut self) {
        let height = self.ctrls.last().expect("at least the outer frame").height;
        self.opds.truncate(height);
        self.ctrls.last_mut().expect("at least the outer frame").unreachable = true;
    }

    fn frame_at(&self, depth: u32) -> Result<&CtrlFrame, Error> {
        let len = self.ctrls.len();
        let idx = len
            .checked_sub(1 + depth as usize)
            .ok_or(Error::UnknownLabel { depth })?;
        Ok(&self.ctrls[idx])
    }

    fn label_types(frame: &CtrlFrame) -> &[ValType] {
        if matches!(frame.kind, FrameKind::Loop) {
            &frame.start_types
        } else {
            &frame.end_types
        }
    }
}

fn block_types<A: Allocator>(
    validator: &Validator<A>,
    block_type: BlockType,
) -> (AVec<ValType>, AVec<ValType>) {
    match block_type {
        BlockType::Empty => (AVec::new(), AVec::new()),
        BlockType::Result(ty) => (AVec::new(), alloc::vec![ty]),
        BlockType::TypeIndex(typeidx) => {
            let func_type = validator.function_type(typeidx);
            (
                func_type.parameters.iter().copied().collect(),
                func_type.results.iter().copied().collect(),
            )
        }
    }
}

fn natural_align_log2(op: Opcode) -> u32 {
    use Opcode::*;
    match op {
        I32Load8S | I32Load8U | I32Store8 | I64Load8S | I64Load8U | I64Store8 => 0,
        I32Load16S | I32Load16U | I32Store16 | I64Load16S | I64Load16U | I64Store16 => 1,
        I32Load | I32Store | F32Load | F32Store | I64Load32S | I64Load32U | I64Store32 => 2,
        I64Load | I64Store | F64Load | F64Store => 3,
        _ => unreachable!("not a memory instruction"),
    }
}

fn mem_value_type(op: Opcode) -> ValType {
    use Opcode::*;
    match op {
        I32Load | I32Load8S | I32Load8U | I32Load16S | I32Load16U | I32Store | I32Store8
        | I32Store16 => ValType::I32,
        I64Load | I64Load8S | I64Load8U | I64Load16S | I64Load16U | I64Load32S | I64Load32U
        | I64Store | I64Store8 | I64Store16 | I64Store32 => ValType::I64,
        F32Load | F32Store => ValType::F32,
        F64Load | F64Store => ValType::F64,
        _ => unreachable!("not a memory instruction"),
    }
}

fn is_mem_store(op: Opcode) -> bool {
    use Opcode::*;
    matches!(
        op,
        I32Store
            | I32Store8
            | I32Store16
            | I64Store
            | I64Store8
            | I64Store16
            | I64Store32
            | F32Store
            | F64Store
    )
}

/// Whether `op` is one of the opcodes a constant expression (global
/// initializer, element/data segment offset, or element initializer) may
/// contain, per the WebAssembly spec's restriction on constant expressions.
fn is_const_opcode(op: Opcode) -> bool {
    matches!(
        op,
        Opcode::End
            | Opcode::I32Const
            | Opcode::I64Const
            | Opcode::F32Const
            | Opcode::F64Const
            | Opcode::RefNull
            | Opcode::RefFunc
            | Opcode::GlobalGet
    )
}

fn local_type(locals: &[ValType], idx: u32) -> Result<ValType, Error> {
    locals.get(idx as usize).copied().ok_or(Error::UnknownLocal {
        index: idx,
        capacity: locals.len() as u32,
    })
}

pub(crate) fn validate_expression<A: Allocator>(
    validator: &mut Validator<A>,
    expr: &Expression<A>,
    context: ExpressionValidationContext<A>,
) -> Result<(), Error> {
    let locals: AVec<ValType> = match context {
        ExpressionValidationContext::Function(func_type, fn_locals) => func_type
            .parameters
            .iter()
            .copied()
            .chain(fn_locals.iter().map(|local| local.ty()))
            .collect(),
        ExpressionValidationContext::Constant(_) => AVec::new(),
    };
    let result_types: AVec<ValType> = match context {
        ExpressionValidationContext::Function(func_type, _) => {
            func_type.results.iter().copied().collect()
        }
        ExpressionValidationContext::Constant(ty) => alloc::vec![ty],
    };

    let mut state = State::new();
    state.push_ctrl(FrameKind::Block, AVec::new(), result_types);

    let mut cursor = Cursor::new(expr.bytes());
    loop {
        let op = cursor.read_opcode();
        if matches!(context, ExpressionValidationContext::Constant(_)) && !is_const_opcode(op) {
            return Err(Error::ConstantExpressionRequired);
        }
        match op {
            Opcode::Unreachable => state.set_unreachable(),
            Opcode::Nop => {}

            Opcode::Block | Opcode::Loop => {
                let block_type = cursor.read_block_type();
                let (in_types, out_types) = block_types(validator, block_type);
                state.pop_vals(&in_types)?;
                state.push_vals(&in_types);
                let kind = if op == Opcode::Loop {
                    FrameKind::Loop
                } else {
                    FrameKind::Block
                };
                state.push_ctrl(kind, in_types, out_types);
            }
            Opcode::If => {
                let block_type = cursor.read_block_type();
                let (in_types, out_types) = block_types(validator, block_type);
                state.pop_val_expect(ValType::I32)?;
                state.pop_vals(&in_types)?;
                state.push_vals(&in_types);
                state.push_ctrl(FrameKind::If, in_types, out_types);
            }
            Opcode::Else => {
                let frame = state.pop_ctrl()?;
                if !matches!(frame.kind, FrameKind::If) {
                    return Err(Error::ElseWithoutIf);
                }
                state.push_ctrl(FrameKind::Block, frame.start_types, frame.end_types);
            }
            Opcode::End => {
                let is_unmatched_if = {
                    let frame = state.ctrls.last().expect("at least the outer frame");
                    matches!(frame.kind, FrameKind::If) && frame.start_types != frame.end_types
                };
                if is_unmatched_if {
                    return Err(Error::TypeMismatch);
                }
                let frame = state.pop_ctrl()?;
                state.push_vals(&frame.end_types);
                if state.ctrls.is_empty() {
                    break;
                }
            }
            Opcode::Br => {
                let depth = cursor.read_u32();
                let types = State::label_types(state.frame_at(depth)?).to_vec();
                state.pop_vals(&types)?;
                state.set_unreachable();
            }
            Opcode::BrIf => {
                let depth = cursor.read_u32();
                state.pop_val_expect(ValType::I32)?;
                let types = State::label_types(state.frame_at(depth)?).to_vec();
                state.pop_vals(&types)?;
                state.push_vals(&types);
            }
            Opcode::BrTable => {
                state.pop_val_expect(ValType::I32)?;
                let mut labels: AVec<LabelIdx> = AVec::new();
                let default = cursor.read_br_table_labels(|label| labels.push(label));
                let default_types = State::label_types(state.frame_at(*default)?).to_vec();
                for label in labels {
                    let types = State::label_types(state.frame_at(*label)?).to_vec();
                    if types.len() != default_types.len() {
                        return Err(Error::TypeMismatch);
                    }
                    state.pop_vals(&types)?;
                    state.push_vals(&types);
                }
                state.pop_vals(&default_types)?;
                state.set_unreachable();
            }
            Opcode::Return => {
                let outer_types = state.ctrls[0].end_types.clone();
                state.pop_vals(&outer_types)?;
                state.set_unreachable();
            }
            Opcode::Call => {
                let idx = cursor.read_u32();
                if idx as usize >= validator.function_count() {
                    return Err(Error::IndexOutOfBounds {
                        id: crate::types::SectionId::Function,
                        index: idx,
                        capacity: validator.function_count() as u32,
                    });
                }
                let func_type = validator.function_signature(FuncIdx::new(idx));
                let params: AVec<ValType> = func_type.parameters.iter().copied().collect();
                let results: AVec<ValType> = func_type.results.iter().copied().collect();
                state.pop_vals(&params)?;
                state.push_vals(&results);
            }
            Opcode::CallIndirect => {
                let CallIndirectOperands { table, ty } = cursor.read_call_indirect_operands();
                if *table as usize >= validator.table_count() {
                    return Err(Error::IndexOutOfBounds {
                        id: crate::types::SectionId::Table,
                        index: *table,
                        capacity: validator.table_count() as u32,
                    });
                }
                let table_type = validator.table_type(table);
                if table_type.reftype != RefType::Func {
                    return Err(Error::TypeMismatch);
                }
                if *ty as usize >= validator.type_count() {
                    return Err(Error::IndexOutOfBounds {
                        id: crate::types::SectionId::Type,
                        index: *ty,
                        capacity: validator.type_count() as u32,
                    });
                }
                let func_type = validator.function_type(ty);
                let params: AVec<ValType> = func_type.parameters.iter().copied().collect();
                let results: AVec<ValType> = func_type.results.iter().copied().collect();
                state.pop_val_expect(ValType::I32)?;
                state.pop_vals(&params)?;
                state.push_vals(&results);
            }

            // Reference instructions.
            Opcode::RefNull => {
                let reftype = cursor.read_ref_type();
                state.push_val(reftype.into());
            }
            Opcode::RefIsNull => {
                state.pop_val_any_of(&[ValType::FuncRef, ValType::ExternRef])?;
                state.push_val(ValType::I32);
            }
            Opcode::RefFunc => {
                let idx = cursor.read_u32();
                let funcidx = FuncIdx::new(idx);
                if idx as usize >= validator.function_count() {
                    return Err(Error::IndexOutOfBounds {
                        id: crate::types::SectionId::Function,
                        index: idx,
                        capacity: validator.function_count() as u32,
                    });
                }
                if !validator.is_func_declared(funcidx) {
                    return Err(Error::FuncRefUndeclared(funcidx));
                }
                state.push_val(ValType::FuncRef);
            }

            // Parametric instructions.
            Opcode::Drop => {
                state.pop_val()?;
            }
            Opcode::Select => {
                state.pop_val_expect(ValType::I32)?;
                let t1 = state.pop_val_any_of(&[
                    ValType::I32,
                    ValType::I64,
                    ValType::F32,
                    ValType::F64,
                ])?;
                let t2 = match t1 {
                    Some(ty) => state.pop_val_expect(ty)?,
                    None => state.pop_val_any_of(&[
                        ValType::I32,
                        ValType::I64,
                        ValType::F32,
                        ValType::F64,
                    ])?,
                };
                state.push_val_opt(t2.or(t1));
            }
            Opcode::SelectT => {
                let mut types: AVec<ValType> = AVec::new();
                cursor.read_select_t_types(|ty| types.push(ty));
                if types.len() != 1 {
                    return Err(Error::SelectTypeMismatch);
                }
                let ty = types[0];
                state.pop_val_expect(ValType::I32)?;
                state.pop_val_expect(ty)?;
                state.pop_val_expect(ty)?;
                state.push_val(ty);
            }

            // Variable instructions.
            Opcode::LocalGet => {
                let idx = cursor.read_u32();
                let ty = local_type(&locals, idx)?;
                state.push_val(ty);
            }
            Opcode::LocalSet => {
                let idx = cursor.read_u32();
                let ty = local_type(&locals, idx)?;
                state.pop_val_expect(ty)?;
            }
            Opcode::LocalTee => {
                let idx = cursor.read_u32();
                let ty = local_type(&locals, idx)?;
                state.pop_val_expect(ty)?;
                state.push_val(ty);
            }
            Opcode::GlobalGet => {
                let idx = cursor.read_u32();
                if idx as usize >= validator.global_count() {
                    return Err(Error::IndexOutOfBounds {
                        id: crate::types::SectionId::Global,
                        index: idx,
                        capacity: validator.global_count() as u32,
                    });
                }
                let globalidx = crate::types::GlobalIdx::new(idx);
                let global_type = validator.global_type(globalidx);
                if let ExpressionValidationContext::Constant(_) = context {
                    if global_type.mutability != GlobalTypeMutability::Const
                        || !validator.is_global_imported(globalidx)
                    {
                        return Err(Error::ConstantExpressionRequired);
                    }
                }
                state.push_val(global_type.value);
            }
            Opcode::GlobalSet => {
                let idx = cursor.read_u32();
                if idx as usize >= validator.global_count() {
                    return Err(Error::IndexOutOfBounds {
                        id: crate::types::SectionId::Global,
                        index: idx,
                        capacity: validator.global_count() as u32,
                    });
                }
                let global_type = validator.global_type(crate::types::GlobalIdx::new(idx));
                if global_type.mutability != GlobalTypeMutability::Var {
                    return Err(Error::ImmutableGlobal);
                }
                state.pop_val_expect(global_type.value)?;
            }

            // Table instructions.
            Opcode::TableGet => {
                let idx = cursor.read_u32();
                if idx as usize >= validator.table_count() {
                    return Err(Error::IndexOutOfBounds {
                        id: crate::types::SectionId::Table,
                        index: idx,
                        capacity: validator.table_count() as u32,
                    });
                }
                let table_type = validator.table_type(TableIdx::new(idx));
                state.pop_val_expect(ValType::I32)?;
                state.push_val(table_type.reftype.into());
            }
            Opcode::TableSet => {
                let idx = cursor.read_u32();
                if idx as usize >= validator.table_count() {
                    return Err(Error::IndexOutOfBounds {
                        id: crate::types::SectionId::Table,
                        index: idx,
                        capacity: validator.table_count() as u32,
                    });
                }
                let table_type = validator.table_type(TableIdx::new(idx));
                state.pop_val_expect(table_type.reftype.into())?;
                state.pop_val_expect(ValType::I32)?;
            }

            // Memory instructions.
            Opcode::MemorySize => {
                if validator.memory_count() == 0 {
                    return Err(Error::IndexOutOfBounds {
                        id: crate::types::SectionId::Memory,
                        index: 0,
                        capacity: 0,
                    });
                }
                state.push_val(ValType::I32);
            }
            Opcode::MemoryGrow => {
                if validator.memory_count() == 0 {
                    return Err(Error::IndexOutOfBounds {
                        id: crate::types::SectionId::Memory,
                        index: 0,
                        capacity: 0,
                    });
                }
                state.pop_val_expect(ValType::I32)?;
                state.push_val(ValType::I32);
            }
            op @ (Opcode::I32Load
            | Opcode::I64Load
            | Opcode::F32Load
            | Opcode::F64Load
            | Opcode::I32Load8S
            | Opcode::I32Load8U
            | Opcode::I32Load16S
            | Opcode::I32Load16U
            | Opcode::I64Load8S
            | Opcode::I64Load8U
            | Opcode::I64Load16S
            | Opcode::I64Load16U
            | Opcode::I64Load32S
            | Opcode::I64Load32U
            | Opcode::I32Store
            | Opcode::I64Store
            | Opcode::F32Store
            | Opcode::F64Store
            | Opcode::I32Store8
            | Opcode::I32Store16
            | Opcode::I64Store8
            | Opcode::I64Store16
            | Opcode::I64Store32) => {
                let mem_arg = cursor.read_mem_arg();
                if validator.memory_count() == 0 {
                    return Err(Error::IndexOutOfBounds {
                        id: crate::types::SectionId::Memory,
                        index: 0,
                        capacity: 0,
                    });
                }
                if mem_arg.align > natural_align_log2(op) {
                    return Err(Error::BadAlignment);
                }
                let ty = mem_value_type(op);
                if is_mem_store(op) {
                    state.pop_val_expect(ty)?;
                    state.pop_val_expect(ValType::I32)?;
                } else {
                    state.pop_val_expect(ValType::I32)?;
                    state.push_val(ty);
                }
            }

            // Numeric instructions.
            Opcode::I32Const => {
                cursor.read_i32();
                state.push_val(ValType::I32);
            }
            Opcode::I64Const => {
                cursor.read_i64();
                state.push_val(ValType::I64);
            }
            Opcode::F32Const => {
                cursor.read_f32();
                state.push_val(ValType::F32);
            }
            Opcode::F64Const => {
                cursor.read_f64();
                state.push_val(ValType::F64);
            }

            Opcode::I32Eqz => testop(&mut state, ValType::I32)?,
            Opcode::I64Eqz => testop(&mut state, ValType::I64)?,

            Opcode::I32Eq
            | Opcode::I32Ne
            | Opcode::I32LtS
            | Opcode::I32LtU
            | Opcode::I32GtS
            | Opcode::I32GtU
            | Opcode::I32LeS
            | Opcode::I32LeU
            | Opcode::I32GeS
            | Opcode::I32GeU => relop(&mut state, ValType::I32)?,
            Opcode::I64Eq
            | Opcode::I64Ne
            | Opcode::I64LtS
            | Opcode::I64LtU
            | Opcode::I64GtS
            | Opcode::I64GtU
            | Opcode::I64LeS
            | Opcode::I64LeU
            | Opcode::I64GeS
            | Opcode::I64GeU => relop(&mut state, ValType::I64)?,
            Opcode::F32Eq | Opcode::F32Ne | Opcode::F32Lt | Opcode::F32Gt | Opcode::F32Le
            | Opcode::F32Ge => relop(&mut state, ValType::F32)?,
            Opcode::F64Eq | Opcode::F64Ne | Opcode::F64Lt | Opcode::F64Gt | Opcode::F64Le
            | Opcode::F64Ge => relop(&mut state, ValType::F64)?,

            Opcode::I32Clz | Opcode::I32Ctz | Opcode::I32Popcnt => {
                unop(&mut state, ValType::I32)?
            }
            Opcode::I64Clz | Opcode::I64Ctz | Opcode::I64Popcnt => {
                unop(&mut state, ValType::I64)?
            }
            Opcode::F32Abs
            | Opcode::F32Neg
            | Opcode::F32Ceil
            | Opcode::F32Floor
            | Opcode::F32Trunc
            | Opcode::F32Nearest
            | Opcode::F32Sqrt => unop(&mut state, ValType::F32)?,
            Opcode::F64Abs
            | Opcode::F64Neg
            | Opcode::F64Ceil
            | Opcode::F64Floor
            | Opcode::F64Trunc
            | Opcode::F64Nearest
            | Opcode::F64Sqrt => unop(&mut state, ValType::F64)?,

            Opcode::I32Add
            | Opcode::I32Sub
            | Opcode::I32Mul
            | Opcode::I32DivS
            | Opcode::I32DivU
            | Opcode::I32RemS
            | Opcode::I32RemU
            | Opcode::I32And
            | Opcode::I32Or
            | Opcode::I32Xor
            | Opcode::I32Shl
            | Opcode::I32ShrS
            | Opcode::I32ShrU
            | Opcode::I32Rotl
            | Opcode::I32Rotr => binop(&mut state, ValType::I32)?,
            Opcode::I64Add
            | Opcode::I64Sub
            | Opcode::I64Mul
            | Opcode::I64DivS
            | Opcode::I64DivU
            | Opcode::I64RemS
            | Opcode::I64RemU
            | Opcode::I64And
            | Opcode::I64Or
            | Opcode::I64Xor
            | Opcode::I64Shl
            | Opcode::I64ShrS
            | Opcode::I64ShrU
            | Opcode::I64Rotl
            | Opcode::I64Rotr => binop(&mut state, ValType::I64)?,
            Opcode::F32Add
            | Opcode::F32Sub
            | Opcode::F32Mul
            | Opcode::F32Div
            | Opcode::F32Min
            | Opcode::F32Max
            | Opcode::F32Copysign => binop(&mut state, ValType::F32)?,
            Opcode::F64Add
            | Opcode::F64Sub
            | Opcode::F64Mul
            | Opcode::F64Div
            | Opcode::F64Min
            | Opcode::F64Max
            | Opcode::F64Copysign => binop(&mut state, ValType::F64)?,

            Opcode::I32WrapI64 => cvtop(&mut state, ValType::I64, ValType::I32)?,
            Opcode::I32TruncF32S | Opcode::I32TruncF32U => {
                cvtop(&mut state, ValType::F32, ValType::I32)?
            }
            Opcode::I32TruncF64S | Opcode::I32TruncF64U => {
                cvtop(&mut state, ValType::F64, ValType::I32)?
            }
            Opcode::I64ExtendI32S | Opcode::I64ExtendI32U => {
                cvtop(&mut state, ValType::I32, ValType::I64)?
            }
            Opcode::I64TruncF32S | Opcode::I64TruncF32U => {
                cvtop(&mut state, ValType::F32, ValType::I64)?
            }
            Opcode::I64TruncF64S | Opcode::I64TruncF64U => {
                cvtop(&mut state, ValType::F64, ValType::I64)?
            }
            Opcode::F32ConvertI32S | Opcode::F32ConvertI32U => {
                cvtop(&mut state, ValType::I32, ValType::F32)?
            }
            Opcode::F32ConvertI64S | Opcode::F32ConvertI64U => {
                cvtop(&mut state, ValType::I64, ValType::F32)?
            }
            Opcode::F32DemoteF64 => cvtop(&mut state, ValType::F64, ValType::F32)?,
            Opcode::F64ConvertI32S | Opcode::F64ConvertI32U => {
                cvtop(&mut state, ValType::I32, ValType::F64)?
            }
            Opcode::F64ConvertI64S | Opcode::F64ConvertI64U => {
                cvtop(&mut state, ValType::I64, ValType::F64)?
            }
            Opcode::F64PromoteF32 => cvtop(&mut state, ValType::F32, ValType::F64)?,
            Opcode::I32ReinterpretF32 => cvtop(&mut state, ValType::F32, ValType::I32)?,
            Opcode::I64ReinterpretF64 => cvtop(&mut state, ValType::F64, ValType::I64)?,
            Opcode::F32ReinterpretI32 => cvtop(&mut state, ValType::I32, ValType::F32)?,
            Opcode::F64ReinterpretI64 => cvtop(&mut state, ValType::I64, ValType::F64)?,
            Opcode::I32Extend8S | Opcode::I32Extend16S => unop(&mut state, ValType::I32)?,
            Opcode::I64Extend8S | Opcode::I64Extend16S | Opcode::I64Extend32S => {
                unop(&mut state, ValType::I64)?
            }

            Opcode::BulkPrefix => validate_bulk_op(validator, &mut cursor, &mut state)?,
            Opcode::VectorPrefix => todo!("vector instructions"),
        }
    }

    Ok(())
}

fn unop(state: &mut State, ty: ValType) -> Result<(), Error> {
    state.pop_val_expect(ty)?;
    state.push_val(ty);
    Ok(())
}

fn binop(state: &mut State, ty: ValType) -> Result<(), Error> {
    state.pop_val_expect(ty)?;
    state.pop_val_expect(ty)?;
    state.push_val(ty);
    Ok(())
}

fn testop(state: &mut State, ty: ValType) -> Result<(), Error> {
    state.pop_val_expect(ty)?;
    state.push_val(ValType::I32);
    Ok(())
}

fn relop(state: &mut State, ty: ValType) -> Result<(), Error> {
    state.pop_val_expect(ty)?;
    state.pop_val_expect(ty)?;
    state.push_val(ValType::I32);
    Ok(())
}

fn cvtop(state: &mut State, from: ValType, to: ValType) -> Result<(), Error> {
    state.pop_val_expect(from)?;
    state.push_val(to);
    Ok(())
}

fn validate_bulk_op<A: Allocator>(
    validator: &mut Validator<A>,
    cursor: &mut Cursor,
    state: &mut State,
) -> Result<(), Error> {
    let bulk_op = cursor.read_bulk_opcode();
    match bulk_op {
        BulkOpcode::TableInit => {
            let operands = cursor.read_table_init_operands();
            if *operands.table as usize >= validator.table_count() {
                return Err(Error::IndexOutOfBounds {
                    id: crate::types::SectionId::Table,
                    index: *operands.table,
                    capacity: validator.table_count() as u32,
                });
            }
            if *operands.elem as usize >= validator.element_count() {
                return Err(Error::IndexOutOfBounds {
                    id: crate::types::SectionId::Element,
                    index: *operands.elem,
                    capacity: validator.element_count() as u32,
                });
            }
            state.pop_vals(&[ValType::I32, ValType::I32, ValType::I32])?;
        }
        BulkOpcode::ElemDrop => {
            let idx = cursor.read_u32();
            if idx as usize >= validator.element_count() {
                return Err(Error::IndexOutOfBounds {
                    id: crate::types::SectionId::Element,
                    index: idx,
                    capacity: validator.element_count() as u32,
                });
            }
        }
        BulkOpcode::TableCopy => {
            let operands = cursor.read_table_copy_operands();
            if *operands.src as usize >= validator.table_count() {
                return Err(Error::IndexOutOfBounds {
                    id: crate::types::SectionId::Table,
                    index: *operands.src,
                    capacity: validator.table_count() as u32,
                });
            }
            if *operands.dst as usize >= validator.table_count() {
                return Err(Error::IndexOutOfBounds {
                    id: crate::types::SectionId::Table,
                    index: *operands.dst,
                    capacity: validator.table_count() as u32,
                });
            }
            let src_type = validator.table_type(operands.src);
            let dst_type = validator.table_type(operands.dst);
            if src_type.reftype != dst_type.reftype {
                return Err(Error::TypeMismatch);
            }
            state.pop_vals(&[ValType::I32, ValType::I32, ValType::I32])?;
        }
        BulkOpcode::TableGrow => {
            let idx = cursor.read_u32();
            if idx as usize >= validator.table_count() {
                return Err(Error::IndexOutOfBounds {
                    id: crate::types::SectionId::Table,
                    index: idx,
                    capacity: validator.table_count() as u32,
                });
            }
            let table_type = validator.table_type(TableIdx::new(idx));
            state.pop_val_expect(ValType::I32)?;
            state.pop_val_expect(table_type.reftype.into())?;
            state.push_val(ValType::I32);
        }
        BulkOpcode::TableSize => {
            let idx = cursor.read_u32();
            if idx as usize >= validator.table_count() {
                return Err(Error::IndexOutOfBounds {
                    id: crate::types::SectionId::Table,
                    index: idx,
                    capacity: validator.table_count() as u32,
                });
            }
            state.push_val(ValType::I32);
        }
        BulkOpcode::TableFill => {
            let idx = cursor.read_u32();
            if idx as usize >= validator.table_count() {
                return Err(Error::IndexOutOfBounds {
                    id: crate::types::SectionId::Table,
                    index: idx,
                    capacity: validator.table_count() as u32,
                });
            }
            let table_type = validator.table_type(TableIdx::new(idx));
            state.pop_val_expect(ValType::I32)?;
            state.pop_val_expect(table_type.reftype.into())?;
            state.pop_val_expect(ValType::I32)?;
        }
        BulkOpcode::MemoryInit => {
            let idx = cursor.read_u32();
            if validator.memory_count() == 0 {
                return Err(Error::IndexOutOfBounds {
                    id: crate::types::SectionId::Memory,
                    index: 0,
                    capacity: 0,
                });
            }
            if idx as usize >= validator.data_count() {
                return Err(Error::IndexOutOfBounds {
                    id: crate::types::SectionId::Data,
                    index: idx,
                    capacity: validator.data_count() as u32,
                });
            }
            state.pop_vals(&[ValType::I32, ValType::I32, ValType::I32])?;
        }
        BulkOpcode::DataDrop => {
            let idx = cursor.read_u32();
            if idx as usize >= validator.data_count() {
                return Err(Error::IndexOutOfBounds {
                    id: crate::types::SectionId::Data,
                    index: idx,
                    capacity: validator.data_count() as u32,
                });
            }
        }
        BulkOpcode::MemoryCopy | BulkOpcode::MemoryFill => {
            if validator.memory_count() == 0 {
                return Err(Error::IndexOutOfBounds {
                    id: crate::types::SectionId::Memory,
                    index: 0,
                    capacity: 0,
                });
            }
            state.pop_vals(&[ValType::I32, ValType::I32, ValType::I32])?;
        }
        BulkOpcode::I32TruncSatF32S | BulkOpcode::I32TruncSatF32U => {
            cvtop(state, ValType::F32, ValType::I32)?
        }
        BulkOpcode::I32TruncSatF64S | BulkOpcode::I32TruncSatF64U => {
            cvtop(state, ValType::F64, ValType::I32)?
        }
        BulkOpcode::I64TruncSatF32S | BulkOpcode::I64TruncSatF32U => {
            cvtop(state, ValType::F32, ValType::I64)?
        }
        BulkOpcode::I64TruncSatF64S | BulkOpcode::I64TruncSatF64U => {
            cvtop(state, ValType::F64, ValType::I64)?
        }
    }
    Ok(())
}
