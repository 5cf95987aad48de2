use thiserror::Error;

/// The generic error type covering every failure this library can report.
///
/// The first group of variants describes an invalid or unsupported input
/// module and is produced while parsing. The second group is produced while
/// specializing and describes either bad caller input
/// ([`Error::SpecValueArity`]) or a module the optimizer cannot legally
/// rewrite ([`Error::SwitchRewriteImpossible`]).
///
/// Passing a specialization-constant id that does not exist in the module is
/// deliberately *not* an error: callers typically hold one table of values
/// for a whole pipeline and apply it to every shader stage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The input is too short to contain a SPIR-V header.
    #[error("input is too small to be a SPIR-V module")]
    TooSmall,

    /// The first word of the module is not the SPIR-V magic number.
    #[error("invalid SPIR-V magic number {0:#010x}")]
    BadMagic(u32),

    /// The module was produced for a SPIR-V version newer than this library
    /// supports. The payload is the version word from the header.
    #[error("unsupported SPIR-V version {0:#010x}")]
    UnsupportedVersion(u32),

    /// Instruction framing is broken: a zero word count, an instruction
    /// running past the end of the module, or a header id bound that is
    /// implausibly large for the module size.
    ///
    /// The payload is the word index at which the problem was detected.
    #[error("malformed instruction word count at word {0}")]
    MalformedWordCount(u32),

    /// An opcode outside the supported closed set was encountered.
    ///
    /// The optimizer only accepts modules made entirely of opcodes it knows
    /// how to walk; anything else is rejected up front rather than risking a
    /// miscompile. This includes `OpSpecConstantComposite` and
    /// `OpSpecConstantOp`.
    #[error("unsupported opcode {0}")]
    UnsupportedOpcode(u16),

    /// Two instructions write the same result id.
    #[error("result id %{0} is written by more than one instruction")]
    DuplicateResultId(u32),

    /// An operand references an id that is never produced, or an id at or
    /// above the header's id bound.
    #[error("operand references undefined id %{0}")]
    UndefinedId(u32),

    /// Block structure is invalid: a terminator or phi outside a labeled
    /// block, a label opened while a block is in progress, a branch to a
    /// result that is not a label. The payload is the offending opcode.
    #[error("malformed block structure at opcode {0}")]
    MalformedBlock(u16),

    /// A `SpecId` decoration targets an instruction that is not a scalar
    /// specialization constant.
    #[error("SpecId {spec_id} targets opcode {opcode}, which is not a specializable constant")]
    InvalidSpecTarget {
        /// The specialization-constant id carried by the decoration.
        spec_id: u32,
        /// The opcode of the instruction the decoration targets.
        opcode: u16,
    },

    /// The number of words provided for a specialization constant does not
    /// match the constant's width in the module.
    #[error("SpecId {spec_id} expects {expected} value words but {got} were provided")]
    SpecValueArity {
        /// The specialization-constant id the values were provided for.
        spec_id: u32,
        /// The number of payload words the target constant holds.
        expected: usize,
        /// The number of words the caller provided.
        got: usize,
    },

    /// A switch with a constant selector must be rewritten, but the module
    /// contains no 32-bit integer `OpConstant` to reuse as the dummy
    /// selector of the rewritten form.
    #[error("cannot rewrite switch: module has no 32-bit integer constant to reuse")]
    SwitchRewriteImpossible,

    /// Internal consistency failure: a non-phi operand was still unresolved
    /// when its consumer was evaluated. This indicates a bug in the
    /// topological ordering, not a problem with the input.
    #[error("operand %{0} was not resolved before its consumer")]
    ResolutionOrder(u32),
}
