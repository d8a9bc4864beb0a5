// Copyright (c) 2026 The wasmvm Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! WebAssembly binary format parsing.

mod decodable_impls;
mod expr;
mod leb128;

use expr::{transcode_expression, transcode_function_body};

use core::fmt;

use num_enum::TryFromPrimitive;

use leb128::Leb128;

use crate::core_compat::alloc::collections::TryReserveError;
use crate::core_compat::boxed::Box;
use crate::core_compat::vec::Vec;
use crate::storage::Stream;
use crate::types::{
    CodeSection, CustomSection, DataCountSection, DataSection, ElementSection, ExportSection,
    FunctionSection, GlobalSection, ImportSection, MemorySection, Name, SectionId, TableSection,
    TypeSection, Version,
};
use crate::{Allocator, Module};

// The maximum parsing depth of this implementation (which is also pretty much
// the lower bound implicitly suggested by the spec).
const MAX_DEPTH: usize = 6;

// We represent this as an enum with one value to leverage existing "decode this
// u32 enum" machinery to check for a valid magic value.
#[derive(Clone, Copy, Debug, TryFromPrimitive)]
#[repr(u32)]
enum Magic {
    Value = 0x6d_73_61_00, // '\0asm'
}

// Represents parsing context.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[repr(u8)]
enum ContextId {
    #[default]
    Invalid,
    BlockType,
    BrTableOperands,
    BulkOpcode,
    Byte,
    CodeSec,
    CustomSec,
    Data,
    DataCount,
    DataIdx,
    DataSec,
    DataToken,
    Elem,
    ElemIdx,
    ElemKind,
    ElemSec,
    ElemToken,
    Export,
    ExportDesc,
    ExportDescToken,
    ExportSec,
    Expr,
    F32,
    F64,
    Func,
    FuncIdx,
    FuncType,
    FuncTypeToken,
    FuncSec,
    Global,
    GlobalIdx,
    GlobalSec,
    GlobalType,
    I32,
    I64,
    Import,
    ImportDesc,
    ImportDescToken,
    ImportSec,
    LabelIdx,
    Limits,
    LimitsMaxToken,
    LocalIdx,
    Locals,
    Magic,
    MemArg,
    MemIdx,
    MemType,
    MemorySec,
    Mut,
    Name,
    Opcode,
    ReadingBytes,
    RefType,
    ResultType,
    SectionId,
    SelectTOperands,
    SkippingBytes,
    StartSec,
    TableIdx,
    TableSec,
    TableType,
    TypeIdx,
    TypeSec,
    U32,
    ValType,
    VecByte,
    VecCode,
    VecExpr,
    VecFuncIdx,
    VecLabelIdx,
    VecValType,
    Version,
}

impl From<ContextId> for &'static str {
    fn from(id: ContextId) -> Self {
        match id {
            ContextId::Invalid => unreachable!("invalid context somehow reached!?"),
            ContextId::BrTableOperands => "br_table operands",
            ContextId::BulkOpcode => "bulk opcode",
            ContextId::Byte => "byte",
            ContextId::CodeSec => "codesec",
            ContextId::CustomSec => "customsec",
            ContextId::Data => "data",
            ContextId::DataCount => "datacountsec",
            ContextId::DataIdx => "dataidx",
            ContextId::DataSec => "datasec",
            ContextId::DataToken => "data token",
            ContextId::Elem => "elem",
            ContextId::ElemIdx => "elemidx",
            ContextId::ElemKind => "elemkind",
            ContextId::ElemSec => "elemsec",
            ContextId::ElemToken => "elem token",
            ContextId::Func => "func",
            ContextId::Export => "export",
            ContextId::ExportDesc => "exportdesc",
            ContextId::ExportDescToken => "exportdesc token",
            ContextId::ExportSec => "exportsec",
            ContextId::Expr => "expr",
            ContextId::F32 => "f32",
            ContextId::F64 => "f64",
            ContextId::FuncIdx => "funcidx",
            ContextId::FuncType => "functype",
            ContextId::FuncTypeToken => "functype token",
            ContextId::FuncSec => "funcsec",
            ContextId::Global => "global",
            ContextId::GlobalIdx => "globalidx",
            ContextId::GlobalSec => "globalsec",
            ContextId::GlobalType => "globaltype",
            ContextId::I32 => "i32",
            ContextId::I64 => "i64",
            ContextId::Import => "import",
            ContextId::ImportDesc => "importdesc",
            ContextId::ImportDescToken => "importdesc token",
            ContextId::ImportSec => "importsec",
            ContextId::LabelIdx => "labelidx",
            ContextId::Limits => "limits",
            ContextId::LimitsMaxToken => "limits max token",
            ContextId::LocalIdx => "localidx",
            ContextId::Locals => "locals",
            ContextId::Magic => "magic",
            ContextId::MemArg => "memarg",
            ContextId::MemIdx => "memidx",
            ContextId::MemType => "memtype",
            ContextId::MemorySec => "memsec",
            ContextId::Mut => "mut",
            ContextId::Name => "name",
            ContextId::Opcode => "opcode",
            ContextId::ReadingBytes => "reading bytes",
            ContextId::RefType => "reftype",
            ContextId::ResultType => "resulttype",
            ContextId::SectionId => "section ID",
            ContextId::SelectTOperands => "select_t operands",
            ContextId::SkippingBytes => "skipping bytes",
            ContextId::StartSec => "startsec",
            ContextId::TableIdx => "tableidx",
            ContextId::TableSec => "tablesec",
            ContextId::TableType => "tabletype",
            ContextId::TypeIdx => "typeidx",
            ContextId::TypeSec => "typesec",
            ContextId::U32 => "u32",
            ContextId::ValType => "valtype",
            ContextId::VecByte => "vec(byte)",
            ContextId::BlockType => "blocktype",
            ContextId::VecCode => "vec(code)",
            ContextId::VecExpr => "vec(expr)",
            ContextId::VecFuncIdx => "vec(funcidx)",
            ContextId::VecLabelIdx => "vec(labelidx)",
            ContextId::VecValType => "vec(valtype)",
            ContextId::Version => "version",
        }
    }
}

trait Contextual {
    const ID: ContextId;
}

// A frame of parsing context.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct ContextFrame {
    // A description of what is being parsed.
    context: &'static str,

    // Byte offset in the stream where this context was entered.
    offset: usize,
}

/// Stack for tracking parsing context during error reporting.
#[derive(Clone, Debug)]
pub(crate) struct ContextStack {
    offsets: [usize; MAX_DEPTH],
    ids: [ContextId; MAX_DEPTH],
    depth: u8,
    // Runtime-configured nesting limit (from `Config::max_decode_nesting`),
    // always <= MAX_DEPTH, the fixed capacity of the backing arrays above.
    limit: u8,
}

impl Default for ContextStack {
    fn default() -> Self {
        Self::with_limit(MAX_DEPTH as u32)
    }
}

impl ContextStack {
    /// Creates a context stack honoring the given nesting limit, clamped to
    /// this implementation's fixed backing capacity.
    pub(crate) fn with_limit(limit: u32) -> Self {
        Self {
            offsets: [0; MAX_DEPTH],
            ids: [ContextId::default(); MAX_DEPTH],
            depth: 0,
            limit: (limit as usize).min(MAX_DEPTH) as u8,
        }
    }

    // Pushes a new context frame, returning true if successful.
    fn push(&mut self, id: ContextId, offset: usize) -> bool {
        let depth = self.depth as usize;
        if depth >= self.limit as usize {
            return false;
        }
        self.offsets[depth] = offset;
        self.ids[depth] = id;
        self.depth += 1;
        true
    }

    // Pop the top context frame.
    fn pop(&mut self) {
        debug_assert!(self.depth > 0, "{self:#?}");
        self.depth -= 1;
    }

    // Returns an iterator over frames in "pushed" order (outermost to
    // innermost).
    fn iter(&self) -> impl Iterator<Item = ContextFrame> + '_ {
        self.offsets
            .iter()
            .zip(&self.ids)
            .take(self.depth as usize)
            .map(|(&offset, &id)| ContextFrame {
                context: id.into(),
                offset,
            })
    }
}

/// A parsing error with additional context around what hierarchy of things were
/// being decoded at the time.
pub struct ErrorWithContext<Storage: Stream> {
    /// The underlying parsing error.
    pub error: Error<Storage>,
    pub(crate) context: ContextStack,
}

impl<Storage: Stream> fmt::Debug for ErrorWithContext<Storage> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.error)?;
        for (i, frame) in self.context.iter().enumerate() {
            write!(f, "\n{:#x}: ", frame.offset)?;
            for _ in 0..i {
                write!(f, "  ")?;
            }
            write!(f, "{}", frame.context)?;
        }
        Ok(())
    }
}

// The hierarchical rendering above isn't something thiserror's format-string
// attributes can express, so Display is written by hand rather than derived;
// it just delegates to the same rendering Debug uses.
impl<Storage: Stream> fmt::Display for ErrorWithContext<Storage> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl<Storage: Stream> core::error::Error for ErrorWithContext<Storage> {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Represents the "malformed" class of decode-time error: the byte stream
/// does not conform to the binary format. Every variant name and rendering
/// below is chosen to match the upstream test suite's expected error text for
/// that condition.
#[derive(Clone, Copy, Eq, PartialEq, thiserror::Error)]
pub enum Error<Storage: Stream> {
    /// Failed memory allocation.
    #[error("allocation failure")]
    AllocError,
    /// A given section appears more than once in the module.
    #[error("duplicate of section ({0:?})")]
    DuplicateSection(SectionId),
    /// Decoder context stack exceeded maximum depth to prevent stack overflow.
    #[error("unexpected frame at {offset:#x}: {context}")]
    ExcessiveParsingDepth {
        context: &'static str,
        offset: usize,
    },
    /// A data-count section is present but its count disagrees with the
    /// data section's actual element count.
    #[error(
        "data count and data section have inconsistent lengths: expected {expected}; got {actual}"
    )]
    MalformedDataCountMismatch { expected: u32, actual: u32 },
    /// Invalid data segment flag encoding encountered.
    #[error("malformed data kind ({0:#x})")]
    MalformedDataType(u32),
    /// Invalid element segment flag encoding encountered.
    #[error("malformed element kind ({0:#x})")]
    MalformedElementType(u32),
    /// Invalid opcode, opcode prefix, or reserved-byte encoding encountered.
    #[error("illegal opcode ({0:#x})")]
    MalformedIllegalOpcode(u32),
    /// Unknown import-descriptor kind byte.
    #[error("malformed import kind ({0:#x})")]
    MalformedInvalidImport(u8),
    /// Invalid LEB128 encoding encountered.
    #[error("integer representation too long")]
    MalformedLEB128,
    /// Encoded limits flag byte was neither 0x00 nor 0x01.
    #[error("integer too large (limits flag {0:#x})")]
    MalformedLimits(u8),
    /// Invalid WebAssembly magic number.
    #[error("magic header not detected ({0:#x})")]
    MalformedMagicSignature(u32),
    /// A `memory.init`/`data.drop` instruction appears without a preceding
    /// data-count section.
    #[error("data count section required")]
    MalformedMissingDataCountSection,
    /// More than one start section in the module.
    #[error("multiple start sections")]
    MalformedMultipleStartSections,
    /// Global mutability byte was neither 0x00 nor 0x01.
    #[error("malformed mutability ({0:#x})")]
    MalformedMutability(u8),
    /// Function-count and code-count sections disagree.
    #[error(
        "function and code section have inconsistent lengths: {funcsec_size} vs {codesec_size}"
    )]
    MalformedFunctionCodeSectionMismatch { funcsec_size: u32, codesec_size: u32 },
    /// Function body's declared size didn't match the bytes actually
    /// consumed decoding it.
    #[error("section size mismatch: expected {expected:#x}; got {actual:#x}")]
    MalformedSectionSizeMismatch { expected: u32, actual: u32 },
    /// Unrecognized top-level section ID byte.
    #[error("malformed section id ({0:#x})")]
    MalformedSectionId(u8),
    /// Function-type sentinel byte (`0x60`) missing or wrong.
    #[error("integer representation too long (type sentinel {0:#x})")]
    MalformedTypeSentinel(u8),
    /// Value-type byte outside the recognized set.
    #[error("malformed valtype ({0:#x})")]
    MalformedType(u8),
    /// Reference-type byte outside `{funcref, externref}`.
    #[error("malformed reftype ({0:#x})")]
    MalformedReferenceType(u8),
    /// Function declares too many local variables (exceeding an
    /// implementation-defined limit).
    #[error("too many locals: at least {0} were specified")]
    MalformedTooManyLocals(usize),
    /// Invalid UTF-8 encoding in a name field.
    #[error("malformed UTF-8 encoding")]
    MalformedUTF8Encoding,
    /// Unsupported WebAssembly version number.
    #[error("unknown binary version ({0:#x})")]
    MalformedUnsupportedWasmVersion(u32),
    /// (Non-custom) sections appear in the wrong order.
    #[error("out-of-order sections: {before:?} before {after:?}")]
    OutOfOrderSection { before: SectionId, after: SectionId },
    /// Error from the underlying storage.
    #[error("{0:?}")]
    Storage(Storage::Error),
}

impl<Storage: Stream> fmt::Debug for Error<Storage> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::AllocError => write!(f, "allocation failure"),
            Error::DuplicateSection(id) => write!(f, "duplicate of section ({id:?})"),
            Error::ExcessiveParsingDepth { context, offset } => {
                write!(f, "unexpected frame at {offset:#x}: {context}")
            }
            Error::MalformedDataCountMismatch { expected, actual } => {
                write!(f, "data count and data section have inconsistent lengths: expected {expected}; got {actual}")
            }
            Error::MalformedDataType(token) => write!(f, "malformed data kind ({token:#x})"),
            Error::MalformedElementType(token) => write!(f, "malformed element kind ({token:#x})"),
            Error::MalformedIllegalOpcode(op) => write!(f, "illegal opcode ({op:#x})"),
            Error::MalformedInvalidImport(kind) => {
                write!(f, "malformed import kind ({kind:#x})")
            }
            Error::MalformedLEB128 => write!(f, "integer representation too long"),
            Error::MalformedLimits(token) => write!(f, "integer too large (limits flag {token:#x})"),
            Error::MalformedMagicSignature(magic) => {
                write!(f, "magic header not detected ({magic:#x})")
            }
            Error::MalformedMissingDataCountSection => {
                write!(f, "data count section required")
            }
            Error::MalformedMultipleStartSections => write!(f, "multiple start sections"),
            Error::MalformedMutability(byte) => write!(f, "malformed mutability ({byte:#x})"),
            Error::MalformedFunctionCodeSectionMismatch {
                funcsec_size,
                codesec_size,
            } => write!(
                f,
                "function and code section have inconsistent lengths: {funcsec_size} vs {codesec_size}"
            ),
            Error::MalformedSectionSizeMismatch { expected, actual } => write!(
                f,
                "section size mismatch: expected {expected:#x}; got {actual:#x}"
            ),
            Error::MalformedSectionId(id) => write!(f, "malformed section id ({id:#x})"),
            Error::MalformedTypeSentinel(byte) => {
                write!(f, "integer representation too long (type sentinel {byte:#x})")
            }
            Error::MalformedType(byte) => write!(f, "malformed valtype ({byte:#x})"),
            Error::MalformedReferenceType(byte) => write!(f, "malformed reftype ({byte:#x})"),
            Error::MalformedTooManyLocals(count) => {
                write!(f, "too many locals: at least {count} were specified")
            }
            Error::MalformedUTF8Encoding => write!(f, "malformed UTF-8 encoding"),
            Error::MalformedUnsupportedWasmVersion(version) => {
                write!(f, "unknown binary version ({version:#x})")
            }
            Error::OutOfOrderSection { before, after } => {
                write!(f, "out-of-order sections: {before:?} before {after:?}")
            }
            Error::Storage(err) => write!(f, "{err:?}"),
        }
    }
}

impl<Storage: Stream> leb128::Error for Error<Storage> {
    fn invalid_leb128() -> Self {
        Error::MalformedLEB128
    }
}

impl<Storage: Stream> From<TryReserveError> for Error<Storage> {
    fn from(_: TryReserveError) -> Self {
        Error::AllocError
    }
}

pub(crate) struct Decoder<Storage: Stream> {
    stream: Storage,
    // Whether a data-count section has been seen so far. `SectionId`'s
    // ordering guarantees the data-count section, if any, precedes the code
    // section, so this is already settled by the time bulk-memory operands
    // that depend on it are transcoded.
    has_data_count: bool,
}

impl<Storage: Stream> Decoder<Storage> {
    fn new(stream: Storage) -> Self {
        Self {
            stream,
            has_data_count: false,
        }
    }

    // Pushes a context frame before a call, popping it if successful.
    fn with_context<F, R>(
        &mut self,
        context: &mut ContextStack,
        id: ContextId,
        f: F,
    ) -> Result<R, Error<Storage>>
    where
        F: FnOnce(&mut Self, &mut ContextStack) -> Result<R, Error<Storage>>,
    {
        let offset = self.stream.offset();
        if !context.push(id, offset) {
            return Err(Error::ExcessiveParsingDepth {
                context: id.into(),
                offset,
            });
        }
        let val = f(self, context)?;
        context.pop();
        Ok(val)
    }

    fn offset(&mut self) -> usize {
        self.stream.offset()
    }

    fn read_byte_raw(&mut self) -> Result<u8, Error<Storage>> {
        self.stream.read_byte().map_err(Error::Storage)
    }

    fn read_leb128_raw<T: Leb128>(&mut self) -> Result<T, Error<Storage>> {
        leb128::read(|| self.read_byte_raw())
    }

    fn read_zero_byte(&mut self, context: &mut ContextStack) -> Result<(), Error<Storage>> {
        self.with_context(context, ContextId::Byte, |decoder, _| {
            let byte = decoder.read_byte_raw()?;
            if byte == 0 {
                Ok(())
            } else {
                Err(Error::MalformedIllegalOpcode(byte.into()))
            }
        })
    }

    fn read_exact_raw(&mut self, buf: &mut [u8]) -> Result<(), Error<Storage>> {
        self.stream.read_exact(buf).map_err(Error::Storage)
    }

    fn read_exact(
        &mut self,
        context: &mut ContextStack,
        buf: &mut [u8],
    ) -> Result<(), Error<Storage>> {
        self.with_context(context, ContextId::ReadingBytes, |decoder, _| {
            decoder.read_exact_raw(buf)
        })
    }

    fn skip_bytes(
        &mut self,
        context: &mut ContextStack,
        count: usize,
    ) -> Result<(), Error<Storage>> {
        self.with_context(context, ContextId::SkippingBytes, |decoder, _| {
            decoder.stream.skip_bytes(count).map_err(Error::Storage)
        })
    }

    fn read_bytes<A: Allocator>(
        &mut self,
        context: &mut ContextStack,
        count: usize,
        alloc: &A,
    ) -> Result<Box<[u8], A>, Error<Storage>> {
        let mut buf = Vec::new_in(alloc.clone());
        buf.try_reserve_exact(count)?;

        // Safety: With the previous call to try_reserve_exact(), there is
        // sufficient capacity and any uninitialized bytes will be overwritten
        // in the call to read_exact() below.
        unsafe { buf.set_len(count) };
        self.read_exact(context, &mut buf)?;
        Ok(buf.into_boxed_slice())
    }

    fn read<A: Allocator, T: Decodable<A> + Contextual>(
        &mut self,
        context: &mut ContextStack,
        alloc: &A,
    ) -> Result<T, Error<Storage>> {
        self.with_context(context, T::ID, |decoder, context| {
            T::decode(decoder, context, alloc)
        })
    }

    fn read_bounded<T: BoundedDecodable + Contextual>(
        &mut self,
        context: &mut ContextStack,
    ) -> Result<T, Error<Storage>> {
        self.with_context(context, T::ID, |decoder, context| {
            T::decode(decoder, context)
        })
    }
}

// Types that can be decoded from a storage stream, possibly with allocation.
trait Decodable<A>: Sized
where
    A: Allocator,
{
    /// Parse this type from the binary stream.
    fn decode<Storage: Stream>(
        decoder: &mut Decoder<Storage>,
        context: &mut ContextStack,
        alloc: &A,
    ) -> Result<Self, Error<Storage>>;
}

// Types that can be decoded from a storage stream without allocation.
trait BoundedDecodable: Sized + Copy {
    fn decode<Storage: Stream>(
        decoder: &mut Decoder<Storage>,
        context: &mut ContextStack,
    ) -> Result<Self, Error<Storage>>;
}

impl<Bounded: BoundedDecodable, A: Allocator> Decodable<A> for Bounded {
    fn decode<Storage: Stream>(
        decoder: &mut Decoder<Storage>,
        context: &mut ContextStack,
        _: &A,
    ) -> Result<Self, Error<Storage>> {
        <Self as BoundedDecodable>::decode(decoder, context)
    }
}

/// Visitor pattern for processing custom sections during module parsing.
pub trait CustomSectionVisitor<A: Allocator> {
    /// Returns whether this visitor wants to process the custom section with the given name.
    fn should_visit(&self, name: &str) -> bool;
    /// Process a custom section. Only called if `should_visit` returned true.
    fn visit(&mut self, custom: CustomSection<A>);
}

/// No-op implementation of `CustomSectionVisitor` that skips all custom sections.
pub struct NoCustomSectionVisitor {}

impl<A: Allocator> CustomSectionVisitor<A> for NoCustomSectionVisitor {
    fn should_visit(&self, _: &str) -> bool {
        false
    }
    fn visit(&mut self, _: CustomSection<A>) {
        unreachable!()
    }
}

// Parse a WebAssembly module from a storage stream.
//
// # Arguments
// * `context` - Context stack for error reporting
// * `storage` - Data stream containing WASM binary
// * `customsec_visitor` - Handler for custom sections
// * `alloc` - Allocator for decoded data
pub(crate) fn decode_module<Storage, CustomSecVisitor, A>(
    storage: Storage,
    context: &mut ContextStack,
    customsec_visitor: &mut CustomSecVisitor,
    alloc: A,
) -> Result<Module<A>, Error<Storage>>
where
    Storage: Stream,
    CustomSecVisitor: CustomSectionVisitor<A>,
    A: Allocator,
{
    let mut decoder = Decoder::new(storage);
    decoder.read_bounded::<Magic>(context)?;
    let version: Version = decoder.read_bounded(context)?;

    let mut typesec = TypeSection::new(Vec::new_in(alloc.clone()));
    let mut importsec = ImportSection::new(Vec::new_in(alloc.clone()));
    let mut funcsec = FunctionSection::new(Vec::new_in(alloc.clone()));
    let mut tablesec = TableSection::new(Vec::new_in(alloc.clone()));
    let mut memsec = MemorySection::new(Vec::new_in(alloc.clone()));
    let mut globalsec = GlobalSection::new(Vec::new_in(alloc.clone()));
    let mut exportsec = ExportSection::new(Vec::new_in(alloc.clone()));
    let mut startsec = None;
    let mut elemsec = ElementSection::new(Vec::new_in(alloc.clone()));
    let mut datacountsec = None;
    let mut codesec = CodeSection::new(Vec::new_in(alloc.clone()));
    let mut datasec = DataSection::new(Vec::new_in(alloc.clone()));

    // The last section ID seen.
    let mut last_id = None;
    loop {
        // There is no in-band signal in the WASM format for the end of a
        // module. The best we can generically do is expect an EOF at a section
        // boundary.
        let id = decoder.read_bounded(context);
        if let Err(Error::Storage(ref err)) = id
            && Storage::is_eof(err)
        {
            break;
        }
        let id = id?;

        // Apart from custom sections, which can appear anywhere in the format,
        // sections must appear at most once and in order.
        if id != SectionId::Custom {
            if let Some(last_id) = last_id {
                if id <= last_id {
                    return Err(Error::OutOfOrderSection {
                        before: last_id,
                        after: id,
                    });
                }
                if id == last_id {
                    return Err(Error::DuplicateSection(id));
                }
            }
            last_id = Some(id);
        }

        let len: u32 = decoder.read_bounded(context)?;
        tracing::debug!(section = ?id, len, "decoding section");
        let offset_start = decoder.offset();
        match id {
            SectionId::Custom => {
                let (name, len) = {
                    let name_start = decoder.offset();
                    let name: Name<A> = decoder.read(context, &alloc)?;
                    let name_end = decoder.offset();

                    // If the name already exceeds the purported section length,
                    // we can break now and have the invalid length error
                    // reported below.
                    let len = len as usize;
                    if name_end - name_start > len {
                        break;
                    }
                    (name, len - (name_end - name_start))
                };
                if customsec_visitor.should_visit(name.as_ref()) {
                    let bytes = decoder.read_bytes(context, len, &alloc)?;
                    customsec_visitor.visit(CustomSection { name, bytes });
                } else {
                    decoder.skip_bytes(context, len)?;
                }
            }
            SectionId::Type => typesec = decoder.read(context, &alloc)?,
            SectionId::Import => importsec = decoder.read(context, &alloc)?,
            SectionId::Function => funcsec = decoder.read(context, &alloc)?,
            SectionId::Table => tablesec = decoder.read(context, &alloc)?,
            SectionId::Memory => memsec = decoder.read(context, &alloc)?,
            SectionId::Global => globalsec = decoder.read(context, &alloc)?,
            SectionId::Export => exportsec = decoder.read(context, &alloc)?,
            SectionId::Start => startsec = Some(decoder.read(context, &alloc)?),
            SectionId::Element => elemsec = decoder.read(context, &alloc)?,
            SectionId::Code => codesec = decoder.read(context, &alloc)?,
            SectionId::Data => datasec = decoder.read(context, &alloc)?,
            SectionId::DataCount => {
                datacountsec = Some(decoder.read(context, &alloc)?);
                decoder.has_data_count = true;
            }
        }
        let actual_section_len = decoder.offset() - offset_start;
        if actual_section_len != (len as usize) {
            return Err(Error::MalformedSectionSizeMismatch {
                expected: len,
                actual: actual_section_len as u32,
            });
        }
    }

    if funcsec.len() != codesec.len() {
        return Err(Error::MalformedFunctionCodeSectionMismatch {
            funcsec_size: funcsec.len() as u32,
            codesec_size: codesec.len() as u32,
        });
    }
    if let Some(count) = datacountsec
        && (*count as usize) != datasec.len()
    {
        return Err(Error::MalformedDataCountMismatch {
            expected: *count,
            actual: datasec.len() as u32,
        });
    }

    Ok(Module {
        version,
        typesec,
        importsec,
        funcsec,
        tablesec,
        memsec,
        globalsec,
        exportsec,
        startsec,
        elemsec,
        datacountsec,
        codesec,
        datasec,
    })
}
