//! SPIR-V binary-format tables shared by the analyzer and the optimizer.
//!
//! This module fixes the *supported closed set* of opcodes and, for each of
//! them, the properties both passes need: whether the instruction carries a
//! result id and a result type, where its id operands and label operands
//! live (including literal and string skips), and which opcodes the
//! constant folder and the debug stripper care about.
//!
//! The layout encoding follows the SPIR-V specification's physical layout:
//! a module starts with five header words, and each instruction packs its
//! total word count into the high half of its leading word and its opcode
//! into the low half.

use smallvec::SmallVec;

/// The SPIR-V magic number, first word of every module.
pub const MAGIC: u32 = 0x0723_0203;

/// Highest SPIR-V version word this library accepts (1.6).
pub const MAX_VERSION: u32 = 0x0001_0600;

/// Number of words in the module header.
pub const HEADER_WORDS: usize = 5;

/// Word index of the id bound within the header.
pub const ID_BOUND_WORD: usize = 3;

/// The `SpecId` decoration number.
pub const DECORATION_SPEC_ID: u32 = 1;

/// Operand buffer sized for the common case; spills for wide instructions
/// such as `OpEntryPoint` interfaces or long access chains.
pub type OperandBuf = SmallVec<[u32; 8]>;

/// Splits a leading instruction word into `(opcode, word count)`.
#[inline]
#[must_use]
pub fn unpack(word: u32) -> (u16, u32) {
    ((word & 0xFFFF) as u16, word >> 16)
}

/// Packs an opcode and a word count into a leading instruction word.
#[inline]
#[must_use]
pub fn pack(op: Opcode, word_count: u32) -> u32 {
    (word_count << 16) | op as u32
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ResultKind {
    /// No result id.
    None,
    /// Result id in word 1, no result type.
    Untyped,
    /// Result type in word 1, result id in word 2.
    Typed,
}

macro_rules! opcodes {
    ($($name:ident = $code:literal => $kind:ident),* $(,)?) => {
        /// The supported closed set of opcodes.
        ///
        /// Any opcode outside this enum fails parsing with
        /// [`Error::UnsupportedOpcode`](crate::Error::UnsupportedOpcode).
        /// The set covers the shader profile the optimizer understands:
        /// types, constants, memory access, arithmetic and logic, image
        /// sampling, structured control flow, and debug/annotation
        /// instructions.
        #[allow(missing_docs)]
        #[repr(u16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Opcode {
            $($name = $code,)*
        }

        impl Opcode {
            /// Maps a raw opcode number to the enum, or `None` when the
            /// opcode is outside the supported set.
            #[must_use]
            pub fn from_u16(raw: u16) -> Option<Self> {
                match raw {
                    $($code => Some(Self::$name),)*
                    _ => None,
                }
            }

            fn result_kind(self) -> ResultKind {
                match self {
                    $(Self::$name => ResultKind::$kind,)*
                }
            }
        }
    };
}

opcodes! {
    Nop = 0 => None,
    Undef = 1 => Typed,
    SourceContinued = 2 => None,
    Source = 3 => None,
    SourceExtension = 4 => None,
    Name = 5 => None,
    MemberName = 6 => None,
    String = 7 => Untyped,
    Line = 8 => None,
    Extension = 10 => None,
    ExtInstImport = 11 => Untyped,
    ExtInst = 12 => Typed,
    MemoryModel = 14 => None,
    EntryPoint = 15 => None,
    ExecutionMode = 16 => None,
    Capability = 17 => None,
    TypeVoid = 19 => Untyped,
    TypeBool = 20 => Untyped,
    TypeInt = 21 => Untyped,
    TypeFloat = 22 => Untyped,
    TypeVector = 23 => Untyped,
    TypeMatrix = 24 => Untyped,
    TypeImage = 25 => Untyped,
    TypeSampler = 26 => Untyped,
    TypeSampledImage = 27 => Untyped,
    TypeArray = 28 => Untyped,
    TypeRuntimeArray = 29 => Untyped,
    TypeStruct = 30 => Untyped,
    TypePointer = 32 => Untyped,
    TypeFunction = 33 => Untyped,
    ConstantTrue = 41 => Typed,
    ConstantFalse = 42 => Typed,
    Constant = 43 => Typed,
    ConstantComposite = 44 => Typed,
    ConstantNull = 46 => Typed,
    SpecConstantTrue = 48 => Typed,
    SpecConstantFalse = 49 => Typed,
    SpecConstant = 50 => Typed,
    Function = 54 => Typed,
    FunctionParameter = 55 => Typed,
    FunctionEnd = 56 => None,
    FunctionCall = 57 => Typed,
    Variable = 59 => Typed,
    Load = 61 => Typed,
    Store = 62 => None,
    AccessChain = 65 => Typed,
    InBoundsAccessChain = 66 => Typed,
    Decorate = 71 => None,
    MemberDecorate = 72 => None,
    VectorShuffle = 79 => Typed,
    CompositeConstruct = 80 => Typed,
    CompositeExtract = 81 => Typed,
    CompositeInsert = 82 => Typed,
    SampledImage = 86 => Typed,
    ImageSampleImplicitLod = 87 => Typed,
    ImageSampleExplicitLod = 88 => Typed,
    ImageSampleDrefImplicitLod = 89 => Typed,
    ImageSampleDrefExplicitLod = 90 => Typed,
    ImageFetch = 95 => Typed,
    ImageGather = 96 => Typed,
    ImageDrefGather = 97 => Typed,
    ImageRead = 98 => Typed,
    ImageWrite = 99 => None,
    Image = 100 => Typed,
    ConvertFToU = 109 => Typed,
    ConvertFToS = 110 => Typed,
    ConvertSToF = 111 => Typed,
    ConvertUToF = 112 => Typed,
    UConvert = 113 => Typed,
    SConvert = 114 => Typed,
    FConvert = 115 => Typed,
    Bitcast = 124 => Typed,
    SNegate = 126 => Typed,
    FNegate = 127 => Typed,
    IAdd = 128 => Typed,
    FAdd = 129 => Typed,
    ISub = 130 => Typed,
    FSub = 131 => Typed,
    IMul = 132 => Typed,
    FMul = 133 => Typed,
    UDiv = 134 => Typed,
    SDiv = 135 => Typed,
    FDiv = 136 => Typed,
    UMod = 137 => Typed,
    SRem = 138 => Typed,
    SMod = 139 => Typed,
    FRem = 140 => Typed,
    FMod = 141 => Typed,
    VectorTimesScalar = 142 => Typed,
    Dot = 148 => Typed,
    LogicalEqual = 164 => Typed,
    LogicalNotEqual = 165 => Typed,
    LogicalOr = 166 => Typed,
    LogicalAnd = 167 => Typed,
    LogicalNot = 168 => Typed,
    Select = 169 => Typed,
    IEqual = 170 => Typed,
    INotEqual = 171 => Typed,
    UGreaterThan = 172 => Typed,
    SGreaterThan = 173 => Typed,
    UGreaterThanEqual = 174 => Typed,
    SGreaterThanEqual = 175 => Typed,
    ULessThan = 176 => Typed,
    SLessThan = 177 => Typed,
    ULessThanEqual = 178 => Typed,
    SLessThanEqual = 179 => Typed,
    FOrdEqual = 180 => Typed,
    FUnordEqual = 181 => Typed,
    FOrdNotEqual = 182 => Typed,
    FUnordNotEqual = 183 => Typed,
    FOrdLessThan = 184 => Typed,
    FUnordLessThan = 185 => Typed,
    FOrdGreaterThan = 186 => Typed,
    FUnordGreaterThan = 187 => Typed,
    FOrdLessThanEqual = 188 => Typed,
    FUnordLessThanEqual = 189 => Typed,
    FOrdGreaterThanEqual = 190 => Typed,
    FUnordGreaterThanEqual = 191 => Typed,
    ShiftRightLogical = 194 => Typed,
    ShiftRightArithmetic = 195 => Typed,
    ShiftLeftLogical = 196 => Typed,
    BitwiseOr = 197 => Typed,
    BitwiseXor = 198 => Typed,
    BitwiseAnd = 199 => Typed,
    Not = 200 => Typed,
    DPdx = 207 => Typed,
    DPdy = 208 => Typed,
    Fwidth = 209 => Typed,
    Phi = 245 => Typed,
    LoopMerge = 246 => None,
    SelectionMerge = 247 => None,
    Label = 248 => Untyped,
    Branch = 249 => None,
    BranchConditional = 250 => None,
    Switch = 251 => None,
    Kill = 252 => None,
    Return = 253 => None,
    ReturnValue = 254 => None,
    Unreachable = 255 => None,
    NoLine = 317 => None,
}

impl Opcode {
    /// Whether the instruction writes a result id.
    #[must_use]
    pub fn has_result(self) -> bool {
        self.result_kind() != ResultKind::None
    }

    /// Whether the instruction carries a result type in word 1.
    #[must_use]
    pub fn has_result_type(self) -> bool {
        self.result_kind() == ResultKind::Typed
    }

    /// Word index of the result id within the instruction, if any.
    #[must_use]
    pub fn result_word(self) -> Option<usize> {
        match self.result_kind() {
            ResultKind::None => None,
            ResultKind::Untyped => Some(1),
            ResultKind::Typed => Some(2),
        }
    }

    /// Whether the instruction ends a basic block.
    #[must_use]
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Self::Branch
                | Self::BranchConditional
                | Self::Switch
                | Self::Kill
                | Self::Return
                | Self::ReturnValue
                | Self::Unreachable
        )
    }

    /// Whether the instruction is removed by debug stripping.
    #[must_use]
    pub fn is_debug_strip(self) -> bool {
        matches!(self, Self::Source | Self::Name | Self::MemberName)
    }

    /// Metadata instructions reference ids without consuming their values:
    /// names, source info, and decorations. They contribute no graph edges,
    /// so a value is never kept alive merely because it is decorated or
    /// named, and decoration cleanup can fire once the target dies.
    #[must_use]
    pub fn is_metadata(self) -> bool {
        matches!(
            self,
            Self::Nop
                | Self::SourceContinued
                | Self::Source
                | Self::SourceExtension
                | Self::Name
                | Self::MemberName
                | Self::Line
                | Self::NoLine
                | Self::Extension
                | Self::Capability
                | Self::MemoryModel
                | Self::Decorate
                | Self::MemberDecorate
        )
    }

    /// Whether the constant folder knows how to evaluate this opcode
    /// (32-bit integer and boolean lanes only; `Phi` and `Select` receive
    /// special treatment before the all-constant check).
    #[must_use]
    pub fn is_foldable(self) -> bool {
        matches!(
            self,
            Self::Constant
                | Self::ConstantTrue
                | Self::ConstantFalse
                | Self::Bitcast
                | Self::IAdd
                | Self::ISub
                | Self::IMul
                | Self::UDiv
                | Self::SDiv
                | Self::IEqual
                | Self::INotEqual
                | Self::UGreaterThan
                | Self::SGreaterThan
                | Self::UGreaterThanEqual
                | Self::SGreaterThanEqual
                | Self::ULessThan
                | Self::SLessThan
                | Self::ULessThanEqual
                | Self::SLessThanEqual
                | Self::LogicalEqual
                | Self::LogicalNotEqual
                | Self::LogicalOr
                | Self::LogicalAnd
                | Self::LogicalNot
                | Self::Select
                | Self::ShiftRightLogical
                | Self::ShiftRightArithmetic
                | Self::ShiftLeftLogical
                | Self::BitwiseOr
                | Self::BitwiseXor
                | Self::BitwiseAnd
                | Self::Not
                | Self::Phi
        )
    }
}

/// Advances past a null-terminated string operand starting at `pos` and
/// returns the word index just after it. A string missing its terminator
/// consumes the rest of the instruction.
#[must_use]
pub fn skip_string(inst: &[u32], pos: usize) -> usize {
    let mut pos = pos;
    while pos < inst.len() {
        pos += 1;
        if inst[pos - 1].to_le_bytes().contains(&0) {
            break;
        }
    }
    pos
}

/// Collects the id operands of an instruction into `out`, excluding the
/// result type (word 1 of typed instructions), the result id, and every
/// label operand. Literal operands (numbers, strings, image-operand masks)
/// are skipped according to the per-opcode layout.
///
/// For `Phi` this yields only the value half of each `(value, label)` pair;
/// parent labels are control operands and are walked separately.
///
/// Metadata instructions yield nothing: their id references are
/// non-consuming (see [`Opcode::is_metadata`]).
pub fn collect_id_operands(op: Opcode, inst: &[u32], out: &mut OperandBuf) {
    use Opcode as Op;
    let n = inst.len();
    let mut ids = |range: core::ops::Range<usize>| {
        for i in range {
            if i < n {
                out.push(inst[i]);
            }
        }
    };
    match op {
        Op::ExtInst => {
            ids(3..4);
            ids(5..n);
        }
        Op::EntryPoint => {
            ids(2..3);
            let after_name = skip_string(inst, 3);
            ids(after_name..n);
        }
        Op::ExecutionMode | Op::ReturnValue => ids(1..2),
        Op::TypeVector
        | Op::TypeMatrix
        | Op::TypeImage
        | Op::TypeSampledImage
        | Op::TypeRuntimeArray => ids(2..3),
        Op::TypeArray => ids(2..4),
        Op::TypePointer => ids(3..4),
        Op::TypeFunction | Op::TypeStruct => ids(2..n),
        Op::ConstantComposite
        | Op::CompositeConstruct
        | Op::AccessChain
        | Op::InBoundsAccessChain
        | Op::FunctionCall => ids(3..n),
        Op::Variable => ids(4..n),
        Op::Function => ids(4..5),
        Op::Load | Op::CompositeExtract | Op::Image => ids(3..4),
        Op::Store => ids(1..3),
        Op::VectorShuffle
        | Op::CompositeInsert
        | Op::SampledImage => ids(3..5),
        // Image access: sampled image and coordinate, an optional extra id
        // (Dref or gather component), then an image-operands mask whose
        // trailing operands are all ids.
        Op::ImageSampleImplicitLod
        | Op::ImageSampleExplicitLod
        | Op::ImageFetch
        | Op::ImageRead => {
            ids(3..5);
            ids(6..n);
        }
        Op::ImageSampleDrefImplicitLod
        | Op::ImageSampleDrefExplicitLod
        | Op::ImageGather
        | Op::ImageDrefGather => {
            ids(3..6);
            ids(7..n);
        }
        Op::ImageWrite => {
            ids(1..4);
            ids(5..n);
        }
        Op::ConvertFToU
        | Op::ConvertFToS
        | Op::ConvertSToF
        | Op::ConvertUToF
        | Op::UConvert
        | Op::SConvert
        | Op::FConvert
        | Op::Bitcast
        | Op::SNegate
        | Op::FNegate
        | Op::LogicalNot
        | Op::Not
        | Op::DPdx
        | Op::DPdy
        | Op::Fwidth => ids(3..4),
        Op::IAdd
        | Op::FAdd
        | Op::ISub
        | Op::FSub
        | Op::IMul
        | Op::FMul
        | Op::UDiv
        | Op::SDiv
        | Op::FDiv
        | Op::UMod
        | Op::SRem
        | Op::SMod
        | Op::FRem
        | Op::FMod
        | Op::VectorTimesScalar
        | Op::Dot
        | Op::LogicalEqual
        | Op::LogicalNotEqual
        | Op::LogicalOr
        | Op::LogicalAnd
        | Op::IEqual
        | Op::INotEqual
        | Op::UGreaterThan
        | Op::SGreaterThan
        | Op::UGreaterThanEqual
        | Op::SGreaterThanEqual
        | Op::ULessThan
        | Op::SLessThan
        | Op::ULessThanEqual
        | Op::SLessThanEqual
        | Op::FOrdEqual
        | Op::FUnordEqual
        | Op::FOrdNotEqual
        | Op::FUnordNotEqual
        | Op::FOrdLessThan
        | Op::FUnordLessThan
        | Op::FOrdGreaterThan
        | Op::FUnordGreaterThan
        | Op::FOrdLessThanEqual
        | Op::FUnordLessThanEqual
        | Op::FOrdGreaterThanEqual
        | Op::FUnordGreaterThanEqual
        | Op::ShiftRightLogical
        | Op::ShiftRightArithmetic
        | Op::ShiftLeftLogical
        | Op::BitwiseOr
        | Op::BitwiseXor
        | Op::BitwiseAnd => ids(3..5),
        Op::Select => ids(3..6),
        Op::Phi => {
            let mut i = 3;
            while i < n {
                out.push(inst[i]);
                i += 2;
            }
        }
        Op::BranchConditional | Op::Switch => ids(1..2),
        _ => {}
    }
}

/// Collects the label operands of branch, switch, and merge instructions
/// into `out`. `Phi` parent labels are not included here; they flow in the
/// opposite direction and are handled by the graph builder directly.
pub fn collect_label_operands(op: Opcode, inst: &[u32], out: &mut OperandBuf) {
    let n = inst.len();
    match op {
        Opcode::Branch | Opcode::SelectionMerge => {
            if n > 1 {
                out.push(inst[1]);
            }
        }
        Opcode::LoopMerge => {
            for i in 1..3.min(n) {
                out.push(inst[i]);
            }
        }
        Opcode::BranchConditional => {
            for i in 2..4.min(n) {
                out.push(inst[i]);
            }
        }
        Opcode::Switch => {
            let mut i = 2;
            while i < n {
                out.push(inst[i]);
                i += 2;
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unpack_splits_opcode_and_count() {
        let word = pack(Opcode::IAdd, 5);
        assert_eq!(unpack(word), (Opcode::IAdd as u16, 5));
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        // OpSpecConstantOp and OpSpecConstantComposite are deliberately
        // outside the set.
        assert_eq!(Opcode::from_u16(51), None);
        assert_eq!(Opcode::from_u16(52), None);
        assert_eq!(Opcode::from_u16(0xFFFF), None);
    }

    #[test]
    fn result_words_follow_the_encoding() {
        assert_eq!(Opcode::Label.result_word(), Some(1));
        assert_eq!(Opcode::IAdd.result_word(), Some(2));
        assert_eq!(Opcode::Store.result_word(), None);
        assert!(Opcode::IAdd.has_result_type());
        assert!(!Opcode::Label.has_result_type());
    }

    #[test]
    fn skip_string_stops_after_terminator() {
        // "main" packs as one word with no zero byte... followed by a
        // zero-terminated word.
        let inst = [0, 0, 0, u32::from_le_bytes(*b"main"), 0, 7, 8];
        assert_eq!(skip_string(&inst, 3), 5);
        // Unterminated string consumes the rest.
        let inst = [0, u32::from_le_bytes(*b"abcd")];
        assert_eq!(skip_string(&inst, 1), 2);
    }

    #[test]
    fn phi_operands_are_the_value_half() {
        // OpPhi %ty %r  v1 l1  v2 l2
        let inst = [pack(Opcode::Phi, 7), 1, 2, 10, 11, 20, 21];
        let mut out = OperandBuf::new();
        collect_id_operands(Opcode::Phi, &inst, &mut out);
        assert_eq!(out.as_slice(), &[10, 20]);
    }

    #[test]
    fn switch_labels_are_default_then_cases() {
        // OpSwitch %sel %default  5 %a  9 %b
        let inst = [pack(Opcode::Switch, 7), 1, 2, 5, 3, 9, 4];
        let mut labels = OperandBuf::new();
        collect_label_operands(Opcode::Switch, &inst, &mut labels);
        assert_eq!(labels.as_slice(), &[2, 3, 4]);
        let mut ids = OperandBuf::new();
        collect_id_operands(Opcode::Switch, &inst, &mut ids);
        assert_eq!(ids.as_slice(), &[1]);
    }

    #[test]
    fn entry_point_skips_the_name_string() {
        // OpEntryPoint Fragment %4 "main" %in %out
        let name = u32::from_le_bytes(*b"main");
        let inst = [pack(Opcode::EntryPoint, 7), 4, 9, name, 0, 30, 31];
        let mut out = OperandBuf::new();
        collect_id_operands(Opcode::EntryPoint, &inst, &mut out);
        assert_eq!(out.as_slice(), &[9, 30, 31]);
    }
}
