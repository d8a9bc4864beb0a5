// Copyright (c) 2026 The wasmvm Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! A minimal WASM binary assembler for the integration tests.
//!
//! Stands in for `wast2json`: builds the handful of modules the concrete
//! scenarios need directly as wire-format byte vectors, rather than parsing
//! a `.wat` text form we'd then have to bring in a crate to handle.

#![allow(dead_code)]

pub fn uleb32(mut v: u32) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v != 0 {
            out.push(byte | 0x80);
        } else {
            out.push(byte);
            break;
        }
    }
    out
}

pub fn sleb32(mut v: i32) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        let sign_bit_set = (byte & 0x40) != 0;
        if (v == 0 && !sign_bit_set) || (v == -1 && sign_bit_set) {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
    out
}

fn name(s: &str) -> Vec<u8> {
    let mut out = uleb32(s.len() as u32);
    out.extend_from_slice(s.as_bytes());
    out
}

fn section(id: u8, content: Vec<u8>) -> Vec<u8> {
    let mut out = vec![id];
    out.extend(uleb32(content.len() as u32));
    out.extend(content);
    out
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    I32,
}

impl WireType {
    fn byte(self) -> u8 {
        match self {
            WireType::I32 => 0x7f,
        }
    }
}

#[derive(Clone, Copy)]
pub enum BlockType {
    Empty,
    Value(WireType),
}

impl BlockType {
    fn byte(self) -> u8 {
        match self {
            BlockType::Empty => 0x40,
            BlockType::Value(v) => v.byte(),
        }
    }
}

pub enum Instr {
    Unreachable,
    Block(BlockType),
    If(BlockType),
    Else,
    End,
    Return,
    Call(u32),
    CallIndirect(u32, u32),
    BrTable(Vec<u32>, u32),
    LocalGet(u32),
    LocalSet(u32),
    GlobalGet(u32),
    GlobalSet(u32),
    I32Const(i32),
    I32Eqz,
    I32Add,
    I32Sub,
    I32Mul,
    I32DivS,
}

impl Instr {
    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Instr::Unreachable => out.push(0x00),
            Instr::Block(bt) => {
                out.push(0x02);
                out.push(bt.byte());
            }
            Instr::If(bt) => {
                out.push(0x04);
                out.push(bt.byte());
            }
            Instr::Else => out.push(0x05),
            Instr::End => out.push(0x0b),
            Instr::Return => out.push(0x0f),
            Instr::Call(idx) => {
                out.push(0x10);
                out.extend(uleb32(*idx));
            }
            Instr::CallIndirect(typeidx, tableidx) => {
                out.push(0x11);
                out.extend(uleb32(*tableidx));
                out.extend(uleb32(*typeidx));
            }
            Instr::BrTable(targets, default) => {
                out.push(0x0e);
                out.extend(uleb32(targets.len() as u32));
                for t in targets {
                    out.extend(uleb32(*t));
                }
                out.extend(uleb32(*default));
            }
            Instr::LocalGet(idx) => {
                out.push(0x20);
                out.extend(uleb32(*idx));
            }
            Instr::LocalSet(idx) => {
                out.push(0x21);
                out.extend(uleb32(*idx));
            }
            Instr::GlobalGet(idx) => {
                out.push(0x23);
                out.extend(uleb32(*idx));
            }
            Instr::GlobalSet(idx) => {
                out.push(0x24);
                out.extend(uleb32(*idx));
            }
            Instr::I32Const(v) => {
                out.push(0x41);
                out.extend(sleb32(*v));
            }
            Instr::I32Eqz => out.push(0x45),
            Instr::I32Add => out.push(0x6a),
            Instr::I32Sub => out.push(0x6b),
            Instr::I32Mul => out.push(0x6c),
            Instr::I32DivS => out.push(0x6d),
        }
    }
}

pub struct Func {
    pub params: Vec<WireType>,
    pub results: Vec<WireType>,
    pub locals: Vec<WireType>,
    pub body: Vec<Instr>,
}

/// Initializer for a declared (non-imported) global.
pub enum GlobalInit {
    I32Const(i32),
    GlobalGet(u32),
}

pub struct GlobalDef {
    pub ty: WireType,
    pub mutable: bool,
    pub init: GlobalInit,
}

/// An active element segment populating a table with a list of function
/// references at instantiation time.
pub struct ElemSegment {
    pub table_idx: u32,
    pub offset: i32,
    pub funcidx: Vec<u32>,
}

enum ImportKind {
    Func { params: Vec<WireType>, results: Vec<WireType> },
    Table { min: u32, max: Option<u32> },
    Global { ty: WireType, mutable: bool },
}

struct Import {
    module: String,
    field: String,
    kind: ImportKind,
}

#[derive(Default)]
pub struct Builder {
    imports: Vec<Import>,
    funcs: Vec<Func>,
    tables: Vec<(u32, Option<u32>)>,
    globals: Vec<GlobalDef>,
    elems: Vec<ElemSegment>,
    // (name, export kind tag, index)
    exports: Vec<(String, u8, u32)>,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    fn count_imports(&self, is_kind: impl Fn(&ImportKind) -> bool) -> u32 {
        self.imports.iter().filter(|i| is_kind(&i.kind)).count() as u32
    }

    pub fn import_func(&mut self, module: &str, field: &str, params: Vec<WireType>, results: Vec<WireType>) -> u32 {
        let idx = self.count_imports(|k| matches!(k, ImportKind::Func { .. }));
        self.imports.push(Import {
            module: module.into(),
            field: field.into(),
            kind: ImportKind::Func { params, results },
        });
        idx
    }

    pub fn import_table(&mut self, module: &str, field: &str, min: u32, max: Option<u32>) -> u32 {
        let idx = self.count_imports(|k| matches!(k, ImportKind::Table { .. }));
        self.imports.push(Import {
            module: module.into(),
            field: field.into(),
            kind: ImportKind::Table { min, max },
        });
        idx
    }

    pub fn import_global(&mut self, module: &str, field: &str, ty: WireType, mutable: bool) -> u32 {
        let idx = self.count_imports(|k| matches!(k, ImportKind::Global { .. }));
        self.imports.push(Import {
            module: module.into(),
            field: field.into(),
            kind: ImportKind::Global { ty, mutable },
        });
        idx
    }

    /// Adds a function, returning its index in the (imports-then-locals)
    /// function index space.
    pub fn add_func(&mut self, func: Func) -> u32 {
        let func_imports = self.count_imports(|k| matches!(k, ImportKind::Func { .. }));
        self.funcs.push(func);
        func_imports + (self.funcs.len() - 1) as u32
    }

    /// Adds a table, returning its index in the (imports-then-locals) table
    /// index space.
    pub fn add_table(&mut self, min: u32, max: Option<u32>) -> u32 {
        let table_imports = self.count_imports(|k| matches!(k, ImportKind::Table { .. }));
        self.tables.push((min, max));
        table_imports + (self.tables.len() - 1) as u32
    }

    /// Adds a declared global, returning its index in the (imports-then-locals)
    /// global index space.
    pub fn add_global(&mut self, global: GlobalDef) -> u32 {
        let global_imports = self.count_imports(|k| matches!(k, ImportKind::Global { .. }));
        self.globals.push(global);
        global_imports + (self.globals.len() - 1) as u32
    }

    pub fn add_elem(&mut self, table_idx: u32, offset: i32, funcidx: Vec<u32>) {
        self.elems.push(ElemSegment {
            table_idx,
            offset,
            funcidx,
        });
    }

    pub fn export_func(&mut self, name: &str, funcidx: u32) {
        self.exports.push((name.into(), 0x00, funcidx));
    }

    pub fn export_table(&mut self, name: &str, tableidx: u32) {
        self.exports.push((name.into(), 0x01, tableidx));
    }

    pub fn export_global(&mut self, name: &str, globalidx: u32) {
        self.exports.push((name.into(), 0x03, globalidx));
    }

    fn functype(params: &[WireType], results: &[WireType]) -> Vec<u8> {
        let mut out = vec![0x60];
        out.extend(uleb32(params.len() as u32));
        out.extend(params.iter().map(|v| v.byte()));
        out.extend(uleb32(results.len() as u32));
        out.extend(results.iter().map(|v| v.byte()));
        out
    }

    fn tabletype(min: u32, max: Option<u32>) -> Vec<u8> {
        let mut out = vec![0x70]; // funcref
        match max {
            Some(max) => {
                out.push(0x01);
                out.extend(uleb32(min));
                out.extend(uleb32(max));
            }
            None => {
                out.push(0x00);
                out.extend(uleb32(min));
            }
        }
        out
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00];

        let func_imports: Vec<&Import> = self
            .imports
            .iter()
            .filter(|i| matches!(i.kind, ImportKind::Func { .. }))
            .collect();

        let type_count = func_imports.len() + self.funcs.len();
        let mut typesec = uleb32(type_count as u32);
        for import in &func_imports {
            let ImportKind::Func { params, results } = &import.kind else {
                unreachable!()
            };
            typesec.extend(Self::functype(params, results));
        }
        for func in &self.funcs {
            typesec.extend(Self::functype(&func.params, &func.results));
        }
        out.extend(section(1, typesec));

        if !self.imports.is_empty() {
            let mut importsec = uleb32(self.imports.len() as u32);
            let mut func_typeidx = 0u32;
            for import in &self.imports {
                importsec.extend(name(&import.module));
                importsec.extend(name(&import.field));
                match &import.kind {
                    ImportKind::Func { .. } => {
                        importsec.push(0x00);
                        importsec.extend(uleb32(func_typeidx));
                        func_typeidx += 1;
                    }
                    ImportKind::Table { min, max } => {
                        importsec.push(0x01);
                        importsec.extend(Self::tabletype(*min, *max));
                    }
                    ImportKind::Global { ty, mutable } => {
                        importsec.push(0x03);
                        importsec.push(ty.byte());
                        importsec.push(if *mutable { 0x01 } else { 0x00 });
                    }
                }
            }
            out.extend(section(2, importsec));
        }

        if !self.funcs.is_empty() {
            let mut funcsec = uleb32(self.funcs.len() as u32);
            for (i, _) in self.funcs.iter().enumerate() {
                funcsec.extend(uleb32((func_imports.len() + i) as u32));
            }
            out.extend(section(3, funcsec));
        }

        if !self.tables.is_empty() {
            let mut tablesec = uleb32(self.tables.len() as u32);
            for (min, max) in &self.tables {
                tablesec.extend(Self::tabletype(*min, *max));
            }
            out.extend(section(4, tablesec));
        }

        if !self.globals.is_empty() {
            let mut globalsec = uleb32(self.globals.len() as u32);
            for global in &self.globals {
                globalsec.push(global.ty.byte());
                globalsec.push(if global.mutable { 0x01 } else { 0x00 });
                match &global.init {
                    GlobalInit::I32Const(v) => {
                        globalsec.push(0x41);
                        globalsec.extend(sleb32(*v));
                    }
                    GlobalInit::GlobalGet(idx) => {
                        globalsec.push(0x23);
                        globalsec.extend(uleb32(*idx));
                    }
                }
                globalsec.push(0x0b);
            }
            out.extend(section(6, globalsec));
        }

        if !self.exports.is_empty() {
            let mut exportsec = uleb32(self.exports.len() as u32);
            for (name_str, kind, idx) in &self.exports {
                exportsec.extend(name(name_str));
                exportsec.push(*kind);
                exportsec.extend(uleb32(*idx));
            }
            out.extend(section(7, exportsec));
        }

        if !self.elems.is_empty() {
            let mut elemsec = uleb32(self.elems.len() as u32);
            for elem in &self.elems {
                if elem.table_idx == 0 {
                    elemsec.push(0x00);
                    elemsec.push(0x41);
                    elemsec.extend(sleb32(elem.offset));
                    elemsec.push(0x0b);
                    elemsec.extend(uleb32(elem.funcidx.len() as u32));
                    for idx in &elem.funcidx {
                        elemsec.extend(uleb32(*idx));
                    }
                } else {
                    elemsec.push(0x02);
                    elemsec.extend(uleb32(elem.table_idx));
                    elemsec.push(0x41);
                    elemsec.extend(sleb32(elem.offset));
                    elemsec.push(0x0b);
                    elemsec.push(0x00); // elemkind: funcref
                    elemsec.extend(uleb32(elem.funcidx.len() as u32));
                    for idx in &elem.funcidx {
                        elemsec.extend(uleb32(*idx));
                    }
                }
            }
            out.extend(section(9, elemsec));
        }

        if !self.funcs.is_empty() {
            let mut codesec = uleb32(self.funcs.len() as u32);
            for func in &self.funcs {
                let mut body = uleb32(func.locals.len() as u32);
                for local in &func.locals {
                    body.extend(uleb32(1));
                    body.push(local.byte());
                }
                for instr in &func.body {
                    instr.encode(&mut body);
                }
                codesec.extend(uleb32(body.len() as u32));
                codesec.extend(body);
            }
            out.extend(section(10, codesec));
        }

        out
    }
}
