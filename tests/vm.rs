// Copyright (c) 2026 The wasmvm Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! End-to-end decode -> validate -> instantiate -> invoke tests against
//! hand-assembled WASM binaries, standing in for the upstream `wast2json`
//! suite the teacher's `spec-tests` member would otherwise have replayed.

use std::rc::Rc;

use anyhow::Result;

use wasmvm::core_compat::alloc::Global;
use wasmvm::core_compat::vec::Vec as AVec;
use wasmvm::storage::Buffer;
use wasmvm::types::{FunctionType, ResultType, ValType};
use wasmvm::{InstantiateError, Linker, ModuleDefinition, ModuleInstance, Trap, UnlinkableError, Value};

mod common;
use common::{BlockType, Builder, Func, GlobalDef, GlobalInit, Instr, WireType};

fn instantiate(bytes: Vec<u8>, linker: &Linker<Global>) -> Result<Rc<ModuleInstance<Global>>> {
    let definition = ModuleDefinition::decode(Buffer::new(bytes), Global)
        .map_err(|e| anyhow::anyhow!("decode failed: {e}"))?;
    Ok(linker.instantiate(Rc::new(definition))?)
}

fn functype(params: &[ValType], results: &[ValType]) -> FunctionType<Global> {
    let mut p = AVec::new_in(Global);
    p.extend_from_slice(params);
    let mut r = AVec::new_in(Global);
    r.extend_from_slice(results);
    FunctionType {
        parameters: p,
        results: ResultType::new(r),
    }
}

#[test]
fn add_one() -> Result<()> {
    let mut module = Builder::new();
    let f = module.add_func(Func {
        params: vec![WireType::I32],
        results: vec![WireType::I32],
        locals: vec![],
        body: vec![
            Instr::LocalGet(0),
            Instr::I32Const(1),
            Instr::I32Add,
            Instr::End,
        ],
    });
    module.export_func("add_one", f);

    let linker = Linker::new(Global);
    let instance = instantiate(module.encode(), &linker)?;

    let mut results = [Value::I32(0)];
    instance.invoke("add_one", &[Value::I32(5)], &mut results)?;
    assert_eq!(results[0], Value::I32(6));
    Ok(())
}

#[test]
fn recursive_factorial() -> Result<()> {
    let mut module = Builder::new();
    let f = module.add_func(Func {
        params: vec![WireType::I32],
        results: vec![WireType::I32],
        locals: vec![],
        body: vec![
            Instr::LocalGet(0),
            Instr::I32Eqz,
            Instr::If(BlockType::Value(WireType::I32)),
            Instr::I32Const(1),
            Instr::Else,
            Instr::LocalGet(0),
            Instr::LocalGet(0),
            Instr::I32Const(1),
            Instr::I32Sub,
            Instr::Call(0),
            Instr::I32Mul,
            Instr::End,
            Instr::End,
        ],
    });
    module.export_func("fac", f);

    let linker = Linker::new(Global);
    let instance = instantiate(module.encode(), &linker)?;

    let mut results = [Value::I32(0)];
    instance.invoke("fac", &[Value::I32(5)], &mut results)?;
    assert_eq!(results[0], Value::I32(120));
    Ok(())
}

#[test]
fn br_table_fallback() -> Result<()> {
    let mut module = Builder::new();
    let f = module.add_func(Func {
        params: vec![WireType::I32],
        results: vec![WireType::I32],
        locals: vec![WireType::I32],
        body: vec![
            Instr::I32Const(0xbeef),
            Instr::LocalSet(1),
            Instr::Block(BlockType::Empty),
            Instr::Block(BlockType::Empty),
            Instr::LocalGet(0),
            Instr::BrTable(vec![0, 1], 0),
            Instr::End,
            Instr::I32Const(0x1337),
            Instr::LocalSet(1),
            Instr::End,
            Instr::LocalGet(1),
            Instr::Return,
            Instr::End,
        ],
    });
    module.export_func("pick", f);

    let linker = Linker::new(Global);
    let instance = instantiate(module.encode(), &linker)?;

    let mut results = [Value::I32(0)];

    instance.invoke("pick", &[Value::I32(0)], &mut results)?;
    assert_eq!(results[0], Value::I32(0x1337));

    instance.invoke("pick", &[Value::I32(1)], &mut results)?;
    assert_eq!(results[0], Value::I32(0xbeef));

    // Past the end of the table, the default label (0) applies.
    instance.invoke("pick", &[Value::I32(7)], &mut results)?;
    assert_eq!(results[0], Value::I32(0x1337));

    Ok(())
}

#[test]
fn if_else_arms() -> Result<()> {
    let mut module = Builder::new();
    let f = module.add_func(Func {
        params: vec![WireType::I32, WireType::I32],
        results: vec![WireType::I32],
        locals: vec![],
        body: vec![
            Instr::LocalGet(0),
            Instr::If(BlockType::Value(WireType::I32)),
            Instr::LocalGet(1),
            Instr::I32Const(2),
            Instr::I32Mul,
            Instr::Else,
            Instr::LocalGet(1),
            Instr::I32Const(2),
            Instr::I32Add,
            Instr::End,
            Instr::End,
        ],
    });
    module.export_func("branch", f);

    let linker = Linker::new(Global);
    let instance = instantiate(module.encode(), &linker)?;

    let mut results = [Value::I32(0)];

    instance.invoke("branch", &[Value::I32(1), Value::I32(0x1337)], &mut results)?;
    assert_eq!(results[0], Value::I32(0x266e));

    instance.invoke("branch", &[Value::I32(0), Value::I32(0x1337)], &mut results)?;
    assert_eq!(results[0], Value::I32(0x1339));

    Ok(())
}

#[test]
fn trap_on_divide() -> Result<()> {
    let mut module = Builder::new();
    let f = module.add_func(Func {
        params: vec![WireType::I32, WireType::I32],
        results: vec![WireType::I32],
        locals: vec![],
        body: vec![
            Instr::LocalGet(0),
            Instr::LocalGet(1),
            Instr::I32DivS,
            Instr::End,
        ],
    });
    module.export_func("div", f);

    let linker = Linker::new(Global);
    let instance = instantiate(module.encode(), &linker)?;

    let mut results = [Value::I32(0)];
    let err = instance
        .invoke("div", &[Value::I32(1), Value::I32(0)], &mut results)
        .expect_err("division by zero must trap");
    let trap = match err {
        wasmvm::InvokeError::Trap(trap) => trap,
        other => panic!("expected a trap, got {other:?}"),
    };
    assert_eq!(trap.to_string(), "integer divide by zero");
    assert!(matches!(trap, Trap::IntegerDivisionByZero));

    Ok(())
}

#[test]
fn unlinkable_unknown_import() {
    let mut module = Builder::new();
    module.import_func("env", "f", vec![], vec![]);

    let linker: Linker<Global> = Linker::new(Global);
    let err = instantiate(module.encode(), &linker).expect_err("unresolved import must fail");
    let instantiate_err = err
        .downcast::<InstantiateError>()
        .expect("instantiate error");
    assert!(matches!(
        instantiate_err,
        InstantiateError::Unlinkable(UnlinkableError::UnknownImport { .. })
    ));
}

#[test]
fn unlinkable_incompatible_import_type() {
    let mut module = Builder::new();
    module.import_func("env", "f", vec![], vec![]);

    let mut imports = wasmvm::ImportSet::new("env", Global);
    imports.add_host_function("f", functype(&[ValType::I32], &[]), |_, _| Ok(()));

    let mut linker: Linker<Global> = Linker::new(Global);
    linker.define(imports);

    let err = instantiate(module.encode(), &linker).expect_err("mismatched signature must fail");
    let instantiate_err = err
        .downcast::<InstantiateError>()
        .expect("instantiate error");
    assert!(matches!(
        instantiate_err,
        InstantiateError::Unlinkable(UnlinkableError::IncompatibleImportType { .. })
    ));
}

#[test]
fn constant_expr_rejects_mutable_global() {
    let mut module = Builder::new();
    let mutable = module.add_global(GlobalDef {
        ty: WireType::I32,
        mutable: true,
        init: GlobalInit::I32Const(0),
    });
    // This initializer reads `mutable`, a global both mutable and declared
    // by this same module; a constant expression may only read an imported
    // immutable global.
    module.add_global(GlobalDef {
        ty: WireType::I32,
        mutable: false,
        init: GlobalInit::GlobalGet(mutable),
    });

    let err = ModuleDefinition::decode(Buffer::new(module.encode()), Global)
        .expect_err("a constant expression referencing a mutable global must fail validation");
    match err {
        wasmvm::DecodeError::Validation(validate_err) => {
            assert!(matches!(
                validate_err,
                wasmvm::validate::Error::ConstantExpressionRequired
            ));
        }
        other => panic!("expected a validation error, got {other}"),
    }
}

#[test]
fn call_indirect_dispatches_through_exporting_instance() -> Result<()> {
    // `exporter` declares a table, populates it with its own `answer`
    // function via an active element segment, and exports the table.
    let mut exporter = Builder::new();
    let answer = exporter.add_func(Func {
        params: vec![],
        results: vec![WireType::I32],
        locals: vec![],
        body: vec![Instr::I32Const(42), Instr::End],
    });
    let table = exporter.add_table(1, Some(1));
    exporter.add_elem(table, 0, vec![answer]);
    exporter.export_table("table", table);

    let linker: Linker<Global> = Linker::new(Global);
    let exporter_instance = instantiate(exporter.encode(), &linker)?;

    // `importer` imports that same table and calls through it via
    // `call_indirect`, without itself declaring any function with a
    // matching body: the only way this can produce 42 is by dispatching
    // against the instance that actually owns and populated the table.
    let mut importer = Builder::new();
    let imported_table = importer.import_table("exporter", "table", 1, Some(1));
    // `caller` is the only function this module declares, so its own index
    // (and the index of its own `() -> i32` type, which happens to match
    // `answer`'s) is known ahead of time to be 0.
    let caller = importer.add_func(Func {
        params: vec![],
        results: vec![WireType::I32],
        locals: vec![],
        body: vec![
            Instr::I32Const(0),
            Instr::CallIndirect(0, imported_table),
            Instr::End,
        ],
    });
    importer.export_func("run", caller);

    let mut linker: Linker<Global> = Linker::new(Global);
    linker.define(ModuleInstance::exports(&exporter_instance, "exporter"));
    let importer_instance = instantiate(importer.encode(), &linker)?;

    let mut results = [Value::I32(0)];
    importer_instance.invoke("run", &[], &mut results)?;
    assert_eq!(results[0], Value::I32(42));

    Ok(())
}
