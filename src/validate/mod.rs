// Copyright (c) 2026 The wasmvm Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

mod expr;
mod validate_impls;

use crate::types::{
    ElementInit, ExportDescriptor, FuncIdx, FunctionType, GlobalIdx, GlobalType, ImportDescriptor,
    Limits, SectionId, TableIdx, TableType, TypeIdx,
};
use crate::{Allocator, Module};

pub(crate) use expr::{ExpressionValidationContext, validate_expression};

fn section_noun(id: SectionId) -> &'static str {
    match id {
        SectionId::Custom => "custom section",
        SectionId::Type => "type",
        SectionId::Import => "import",
        SectionId::Function => "function",
        SectionId::Table => "table",
        SectionId::Memory => "memory",
        SectionId::Global => "global",
        SectionId::Export => "export",
        SectionId::Start => "start function",
        SectionId::Element => "elem segment",
        SectionId::Code => "function body",
        SectionId::Data => "data segment",
        SectionId::DataCount => "data count",
    }
}

/// Represents errors that can arise during module validation. Variant text
/// matches the upstream test suite's expected validation message, as closely
/// as a single discriminant can when several distinct checks share one
/// message in the wild (e.g. most type-mismatch failures render as plain
/// "type mismatch").
#[derive(Clone, Copy, Debug, thiserror::Error)]
pub enum Error {
    #[error("duplicate export name")]
    DuplicateExportName { exportsec_idx: u32 },
    #[error("unknown {} {index}", section_noun(*id))]
    IndexOutOfBounds {
        id: SectionId,
        index: u32,
        capacity: u32,
    },
    #[error("unknown local {index}")]
    UnknownLocal { index: u32, capacity: u32 },
    #[error("memory size must be at most 65536 pages (4GiB)")]
    InvalidMemType(Limits),
    #[error("size minimum must not be greater than maximum")]
    InvalidTableLimits(Limits),
    #[error("multiple memories")]
    MultipleMemories,
    #[error("start function must have type [] -> []")]
    InvalidStartFunction(FuncIdx),
    #[error("type mismatch")]
    TypeMismatch,
    #[error("type mismatch: instruction requires this type to be numeric")]
    TypeMustBeNumeric,
    #[error("unknown label")]
    UnknownLabel { depth: u32 },
    #[error("else doesn't match if")]
    ElseWithoutIf,
    #[error("alignment must not be larger than natural")]
    BadAlignment,
    #[error("constant expression required")]
    ConstantExpressionRequired,
    #[error("global is immutable")]
    ImmutableGlobal,
    #[error("unknown function {0:?}: undeclared function reference")]
    FuncRefUndeclared(FuncIdx),
    #[error("type mismatch: select types must match")]
    SelectTypeMismatch,
    #[error("invalid result arity")]
    InvalidResultArity,
}

// Called at the end of Module::decode() to reorder the import and export
// sections in a way convenient for validation:
// * imports are *stably* reordered by type, since logical grouping makes for
//   O(1) access by funcidx/tableidx/memidx/globalidx, easier determination of
//   the number of imports by type, and easier separaton later on.
// * exports are reordered by field name, making it easier to determine whether
//   they are all unique.
pub(crate) fn prepare_module_for_validation<A: Allocator>(module: &mut Module<A>) {
    module
        .importsec
        .0
        .sort_by_key(|import| import.descriptor.discriminant());
    module
        .exportsec
        .0
        .sort_by(|a, b| a.field.as_ref().cmp(b.field.as_ref()));
}

pub(crate) struct Validator<'module, A: Allocator> {
    module: &'module Module<A>,

    // The exclusive ending index within the import section of the functions, or
    // `import_tableidx_end` if there are none.
    import_funcidx_end: usize,

    // The exclusive ending index within the import section of the tables, or
    // `import_memidx_end` if there are none.
    import_tableidx_end: usize,

    // The exclusive ending index within the import section of the memories, or
    // the end index of the whole section if there are none.
    import_memidx_end: usize,

    // funcidx -> whether a `ref.func` of it is allowed. Imports and exports
    // are always declared; locally-defined functions are declared only if
    // referenced by some element segment's function-index list.
    declared_funcs: alloc::vec::Vec<bool>,
}

impl<'module, A: Allocator> Validator<'module, A> {
    fn new(module: &'module Module<A>) -> Self {
        // Recall that the import section was stably sorted by type in
        // prepare_module_for_validation().
        let mut import_tableidx_start = None;
        let mut import_memidx_start = None;
        let mut import_globalidx_start = None;
        for (idx, import) in module.importsec.iter().enumerate() {
            match import.descriptor {
                ImportDescriptor::Function(_) => {}
                ImportDescriptor::Table(_) => {
                    if import_tableidx_start.is_none() {
                        import_tableidx_start = Some(idx);
                    }
                }
                ImportDescriptor::Memory(_) => {
                    if import_memidx_start.is_none() {
                        import_memidx_start = Some(idx);
                    }
                }
                ImportDescriptor::Global(_) => {
                    import_globalidx_start = Some(idx);
                    break;
                }
            }
        }

        let import_memidx_end = import_globalidx_start.unwrap_or(module.importsec.len());
        let import_tableidx_end = import_memidx_start.unwrap_or(import_memidx_end);
        let import_funcidx_end = import_tableidx_start.unwrap_or(import_tableidx_end);

        let function_count = module.funcsec.len() + import_funcidx_end;
        let mut declared_funcs = alloc::vec![false; function_count];
        for idx in 0..import_funcidx_end {
            declared_funcs[idx] = true;
        }
        for export in module.exportsec.iter() {
            if let ExportDescriptor::Function(funcidx) = export.descriptor {
                declared_funcs[*funcidx as usize] = true;
            }
        }
        for elem in module.elemsec.iter() {
            if let ElementInit::FunctionIndices(indices) = &elem.init {
                for funcidx in indices.iter() {
                    declared_funcs[**funcidx as usize] = true;
                }
            }
        }

        Self {
            module,
            import_funcidx_end,
            import_tableidx_end,
            import_memidx_end,
            declared_funcs,
        }
    }

    fn data_count(&self) -> usize {
        self.module.datasec.len()
    }

    fn element_count(&self) -> usize {
        self.module.elemsec.len()
    }

    fn function_count(&self) -> usize {
        self.module.funcsec.len() + self.import_funcidx_end
    }

    fn global_count(&self) -> usize {
        self.module.globalsec.len() + (self.module.importsec.len() - self.import_memidx_end)
    }

    fn memory_count(&self) -> usize {
        self.module.memsec.len() + (self.import_memidx_end - self.import_tableidx_end)
    }

    fn table_count(&self) -> usize {
        self.module.tablesec.len() + (self.import_tableidx_end - self.import_funcidx_end)
    }

    fn type_count(&self) -> usize {
        self.module.typesec.len()
    }

    fn function_type(&self, typeidx: TypeIdx) -> &'module FunctionType<A> {
        &self.module.typesec[*typeidx as usize]
    }

    fn function_signature(&self, funcidx: FuncIdx) -> &'module FunctionType<A> {
        let idx = *funcidx as usize;
        let typeidx = if idx < self.import_funcidx_end {
            let import = &self.module.importsec[idx];
            let ImportDescriptor::Function(typeidx) = &import.descriptor else {
                unreachable!();
            };
            *typeidx
        } else {
            let idx = idx - self.import_funcidx_end;
            debug_assert!(idx < self.module.funcsec.len());
            self.module.funcsec[idx]
        };
        self.function_type(typeidx)
    }

    fn is_func_declared(&self, funcidx: FuncIdx) -> bool {
        self.declared_funcs
            .get(*funcidx as usize)
            .copied()
            .unwrap_or(false)
    }

    fn global_type(&self, globalidx: GlobalIdx) -> GlobalType {
        let idx = *globalidx as usize;
        let num_imported = self.module.importsec.len() - self.import_memidx_end;
        if idx < num_imported {
            let import = &self.module.importsec[self.import_memidx_end + idx];
            let ImportDescriptor::Global(ty) = import.descriptor else {
                unreachable!();
            };
            ty
        } else {
            self.module.globalsec[idx - num_imported].ty
        }
    }

    /// Whether `globalidx` names an imported global, as opposed to one
    /// declared by this module's own global section. A constant expression's
    /// `global.get` may only name an imported global, since a locally
    /// declared one isn't initialized yet at the point any constant
    /// expression referencing it would run.
    fn is_global_imported(&self, globalidx: GlobalIdx) -> bool {
        let idx = *globalidx as usize;
        let num_imported = self.module.importsec.len() - self.import_memidx_end;
        idx < num_imported
    }

    fn table_type(&self, tableidx: TableIdx) -> TableType {
        let idx = *tableidx as usize;
        if idx < self.import_tableidx_end - self.import_funcidx_end {
            let import = &self.module.importsec[self.import_funcidx_end + idx];
            let ImportDescriptor::Table(ty) = import.descriptor else {
                unreachable!();
            };
            ty
        } else {
            self.module.tablesec[idx - (self.import_tableidx_end - self.import_funcidx_end)]
        }
    }

    fn validate<T: Validate<A>>(&mut self, value: &T) -> Result<(), Error> {
        value.validate(self)
    }
}

trait Validate<A: Allocator> {
    fn validate(&self, validator: &mut Validator<A>) -> Result<(), Error>;
}

pub(crate) fn validate_module<A: Allocator>(module: &Module<A>) -> Result<(), Error> {
    let mut validator = Validator::new(module);

    // The type section is always valid.
    validator.validate(&module.importsec)?;
    validator.validate(&module.funcsec)?;
    validator.validate(&module.tablesec)?;
    validator.validate(&module.memsec)?;
    if validator.memory_count() > 1 {
        return Err(Error::MultipleMemories);
    }
    validator.validate(&module.globalsec)?;
    validator.validate(&module.exportsec)?;
    if let Some(startsec) = &module.startsec {
        validator.validate(startsec)?;
    }
    validator.validate(&module.elemsec)?;
    validator.validate(&module.codesec)?;
    validator.validate(&module.datasec)?;

    // Decoding already rejects a data-count/data section length mismatch.
    debug_assert!(
        module
            .datacountsec
            .is_none_or(|count| *count as usize == module.datasec.len())
    );

    Ok(())
}
