//! Opcode tables of the CIL instruction set (ECMA-335 III).
//!
//! [`INSTRUCTIONS`] is indexed by the opcode byte, [`INSTRUCTIONS_FE`] by the byte following
//! the `0xFE` prefix. Reserved slots carry an empty mnemonic.

/// The encoding of an instruction's inline operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    /// No operand
    None,
    /// Signed 8-bit immediate or short branch offset
    Int8,
    /// Unsigned 8-bit immediate, e.g. a short argument index
    UInt8,
    /// Unsigned 16-bit immediate, e.g. a long argument index
    UInt16,
    /// Signed 32-bit immediate or long branch offset
    Int32,
    /// Signed 64-bit immediate
    Int64,
    /// 32-bit floating point immediate
    Float32,
    /// 64-bit floating point immediate
    Float64,
    /// A 4 byte metadata token
    Token,
    /// A jump table, a `u32` count followed by that many 4 byte offsets
    Switch,
}

impl OperandType {
    /// Size of an operand of this type, `None` for the variable-length switch table.
    #[must_use]
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            OperandType::None => Some(0),
            OperandType::Int8 | OperandType::UInt8 => Some(1),
            OperandType::UInt16 => Some(2),
            OperandType::Int32 | OperandType::Float32 | OperandType::Token => Some(4),
            OperandType::Int64 | OperandType::Float64 => Some(8),
            OperandType::Switch => None,
        }
    }
}

/// One entry of the opcode tables.
#[derive(Debug, Clone, Copy)]
pub struct CilInstruction {
    /// The mnemonic, empty for reserved opcodes
    pub instr: &'static str,
    /// The inline operand
    pub op_type: OperandType,
}

impl CilInstruction {
    const RESERVED: CilInstruction = CilInstruction::new("", OperandType::None);

    const fn new(instr: &'static str, op_type: OperandType) -> Self {
        CilInstruction { instr, op_type }
    }
}

/// Single-byte opcodes, indexed by opcode
pub const INSTRUCTIONS: [CilInstruction; 225] = [
    CilInstruction::new("nop", OperandType::None),
    CilInstruction::new("break", OperandType::None),
    CilInstruction::new("ldarg.0", OperandType::None),
    CilInstruction::new("ldarg.1", OperandType::None),
    CilInstruction::new("ldarg.2", OperandType::None),
    CilInstruction::new("ldarg.3", OperandType::None),
    CilInstruction::new("ldloc.0", OperandType::None),
    CilInstruction::new("ldloc.1", OperandType::None),
    CilInstruction::new("ldloc.2", OperandType::None),
    CilInstruction::new("ldloc.3", OperandType::None),
    CilInstruction::new("stloc.0", OperandType::None),
    CilInstruction::new("stloc.1", OperandType::None),
    CilInstruction::new("stloc.2", OperandType::None),
    CilInstruction::new("stloc.3", OperandType::None),
    CilInstruction::new("ldarg.s", OperandType::UInt8),
    CilInstruction::new("ldarga.s", OperandType::UInt8),
    CilInstruction::new("starg.s", OperandType::UInt8),
    CilInstruction::new("ldloc.s", OperandType::UInt8),
    CilInstruction::new("ldloca.s", OperandType::UInt8),
    CilInstruction::new("stloc.s", OperandType::UInt8),
    CilInstruction::new("ldnull", OperandType::None),
    CilInstruction::new("ldc.i4.m1", OperandType::None),
    CilInstruction::new("ldc.i4.0", OperandType::None),
    CilInstruction::new("ldc.i4.1", OperandType::None),
    CilInstruction::new("ldc.i4.2", OperandType::None),
    CilInstruction::new("ldc.i4.3", OperandType::None),
    CilInstruction::new("ldc.i4.4", OperandType::None),
    CilInstruction::new("ldc.i4.5", OperandType::None),
    CilInstruction::new("ldc.i4.6", OperandType::None),
    CilInstruction::new("ldc.i4.7", OperandType::None),
    CilInstruction::new("ldc.i4.8", OperandType::None),
    CilInstruction::new("ldc.i4.s", OperandType::Int8),
    CilInstruction::new("ldc.i4", OperandType::Int32),
    CilInstruction::new("ldc.i8", OperandType::Int64),
    CilInstruction::new("ldc.r4", OperandType::Float32),
    CilInstruction::new("ldc.r8", OperandType::Float64),
    CilInstruction::RESERVED,
    CilInstruction::new("dup", OperandType::None),
    CilInstruction::new("pop", OperandType::None),
    CilInstruction::new("jmp", OperandType::Token),
    CilInstruction::new("call", OperandType::Token),
    CilInstruction::new("calli", OperandType::Token),
    CilInstruction::new("ret", OperandType::None),
    CilInstruction::new("br.s", OperandType::Int8),
    CilInstruction::new("brfalse.s", OperandType::Int8),
    CilInstruction::new("brtrue.s", OperandType::Int8),
    CilInstruction::new("beq.s", OperandType::Int8),
    CilInstruction::new("bge.s", OperandType::Int8),
    CilInstruction::new("bgt.s", OperandType::Int8),
    CilInstruction::new("ble.s", OperandType::Int8),
    CilInstruction::new("blt.s", OperandType::Int8),
    CilInstruction::new("bne.un.s", OperandType::Int8),
    CilInstruction::new("bge.un.s", OperandType::Int8),
    CilInstruction::new("bgt.un.s", OperandType::Int8),
    CilInstruction::new("ble.un.s", OperandType::Int8),
    CilInstruction::new("blt.un.s", OperandType::Int8),
    CilInstruction::new("br", OperandType::Int32),
    CilInstruction::new("brfalse", OperandType::Int32),
    CilInstruction::new("brtrue", OperandType::Int32),
    CilInstruction::new("beq", OperandType::Int32),
    CilInstruction::new("bge", OperandType::Int32),
    CilInstruction::new("bgt", OperandType::Int32),
    CilInstruction::new("ble", OperandType::Int32),
    CilInstruction::new("blt", OperandType::Int32),
    CilInstruction::new("bne.un", OperandType::Int32),
    CilInstruction::new("bge.un", OperandType::Int32),
    CilInstruction::new("bgt.un", OperandType::Int32),
    CilInstruction::new("ble.un", OperandType::Int32),
    CilInstruction::new("blt.un", OperandType::Int32),
    CilInstruction::new("switch", OperandType::Switch),
    CilInstruction::new("ldind.i1", OperandType::None),
    CilInstruction::new("ldind.u1", OperandType::None),
    CilInstruction::new("ldind.i2", OperandType::None),
    CilInstruction::new("ldind.u2", OperandType::None),
    CilInstruction::new("ldind.i4", OperandType::None),
    CilInstruction::new("ldind.u4", OperandType::None),
    CilInstruction::new("ldind.i8", OperandType::None),
    CilInstruction::new("ldind.i", OperandType::None),
    CilInstruction::new("ldind.r4", OperandType::None),
    CilInstruction::new("ldind.r8", OperandType::None),
    CilInstruction::new("ldind.ref", OperandType::None),
    CilInstruction::new("stind.ref", OperandType::None),
    CilInstruction::new("stind.i1", OperandType::None),
    CilInstruction::new("stind.i2", OperandType::None),
    CilInstruction::new("stind.i4", OperandType::None),
    CilInstruction::new("stind.i8", OperandType::None),
    CilInstruction::new("stind.r4", OperandType::None),
    CilInstruction::new("stind.r8", OperandType::None),
    CilInstruction::new("add", OperandType::None),
    CilInstruction::new("sub", OperandType::None),
    CilInstruction::new("mul", OperandType::None),
    CilInstruction::new("div", OperandType::None),
    CilInstruction::new("div.un", OperandType::None),
    CilInstruction::new("rem", OperandType::None),
    CilInstruction::new("rem.un", OperandType::None),
    CilInstruction::new("and", OperandType::None),
    CilInstruction::new("or", OperandType::None),
    CilInstruction::new("xor", OperandType::None),
    CilInstruction::new("shl", OperandType::None),
    CilInstruction::new("shr", OperandType::None),
    CilInstruction::new("shr.un", OperandType::None),
    CilInstruction::new("neg", OperandType::None),
    CilInstruction::new("not", OperandType::None),
    CilInstruction::new("conv.i1", OperandType::None),
    CilInstruction::new("conv.i2", OperandType::None),
    CilInstruction::new("conv.i4", OperandType::None),
    CilInstruction::new("conv.i8", OperandType::None),
    CilInstruction::new("conv.r4", OperandType::None),
    CilInstruction::new("conv.r8", OperandType::None),
    CilInstruction::new("conv.u4", OperandType::None),
    CilInstruction::new("conv.u8", OperandType::None),
    CilInstruction::new("callvirt", OperandType::Token),
    CilInstruction::new("cpobj", OperandType::Token),
    CilInstruction::new("ldobj", OperandType::Token),
    CilInstruction::new("ldstr", OperandType::Token),
    CilInstruction::new("newobj", OperandType::Token),
    CilInstruction::new("castclass", OperandType::Token),
    CilInstruction::new("isinst", OperandType::Token),
    CilInstruction::new("conv.r.un", OperandType::None),
    CilInstruction::RESERVED,
    CilInstruction::RESERVED,
    CilInstruction::new("unbox", OperandType::Token),
    CilInstruction::new("throw", OperandType::None),
    CilInstruction::new("ldfld", OperandType::Token),
    CilInstruction::new("ldflda", OperandType::Token),
    CilInstruction::new("stfld", OperandType::Token),
    CilInstruction::new("ldsfld", OperandType::Token),
    CilInstruction::new("ldsflda", OperandType::Token),
    CilInstruction::new("stsfld", OperandType::Token),
    CilInstruction::new("stobj", OperandType::Token),
    CilInstruction::new("conv.ovf.i1.un", OperandType::None),
    CilInstruction::new("conv.ovf.i2.un", OperandType::None),
    CilInstruction::new("conv.ovf.i4.un", OperandType::None),
    CilInstruction::new("conv.ovf.i8.un", OperandType::None),
    CilInstruction::new("conv.ovf.u1.un", OperandType::None),
    CilInstruction::new("conv.ovf.u2.un", OperandType::None),
    CilInstruction::new("conv.ovf.u4.un", OperandType::None),
    CilInstruction::new("conv.ovf.u8.un", OperandType::None),
    CilInstruction::new("conv.ovf.i.un", OperandType::None),
    CilInstruction::new("conv.ovf.u.un", OperandType::None),
    CilInstruction::new("box", OperandType::Token),
    CilInstruction::new("newarr", OperandType::Token),
    CilInstruction::new("ldlen", OperandType::None),
    CilInstruction::new("ldelema", OperandType::Token),
    CilInstruction::new("ldelem.i1", OperandType::None),
    CilInstruction::new("ldelem.u1", OperandType::None),
    CilInstruction::new("ldelem.i2", OperandType::None),
    CilInstruction::new("ldelem.u2", OperandType::None),
    CilInstruction::new("ldelem.i4", OperandType::None),
    CilInstruction::new("ldelem.u4", OperandType::None),
    CilInstruction::new("ldelem.i8", OperandType::None),
    CilInstruction::new("ldelem.i", OperandType::None),
    CilInstruction::new("ldelem.r4", OperandType::None),
    CilInstruction::new("ldelem.r8", OperandType::None),
    CilInstruction::new("ldelem.ref", OperandType::None),
    CilInstruction::new("stelem.i", OperandType::None),
    CilInstruction::new("stelem.i1", OperandType::None),
    CilInstruction::new("stelem.i2", OperandType::None),
    CilInstruction::new("stelem.i4", OperandType::None),
    CilInstruction::new("stelem.i8", OperandType::None),
    CilInstruction::new("stelem.r4", OperandType::None),
    CilInstruction::new("stelem.r8", OperandType::None),
    CilInstruction::new("stelem.ref", OperandType::None),
    CilInstruction::new("ldelem", OperandType::Token),
    CilInstruction::new("stelem", OperandType::Token),
    CilInstruction::new("unbox.any", OperandType::Token),
    CilInstruction::RESERVED,
    CilInstruction::RESERVED,
    CilInstruction::RESERVED,
    CilInstruction::RESERVED,
    CilInstruction::RESERVED,
    CilInstruction::RESERVED,
    CilInstruction::RESERVED,
    CilInstruction::RESERVED,
    CilInstruction::RESERVED,
    CilInstruction::RESERVED,
    CilInstruction::RESERVED,
    CilInstruction::RESERVED,
    CilInstruction::RESERVED,
    CilInstruction::new("conv.ovf.i1", OperandType::None),
    CilInstruction::new("conv.ovf.u1", OperandType::None),
    CilInstruction::new("conv.ovf.i2", OperandType::None),
    CilInstruction::new("conv.ovf.u2", OperandType::None),
    CilInstruction::new("conv.ovf.i4", OperandType::None),
    CilInstruction::new("conv.ovf.u4", OperandType::None),
    CilInstruction::new("conv.ovf.i8", OperandType::None),
    CilInstruction::new("conv.ovf.u8", OperandType::None),
    CilInstruction::RESERVED,
    CilInstruction::RESERVED,
    CilInstruction::RESERVED,
    CilInstruction::RESERVED,
    CilInstruction::RESERVED,
    CilInstruction::RESERVED,
    CilInstruction::RESERVED,
    CilInstruction::new("refanyval", OperandType::Token),
    CilInstruction::new("ckfinite", OperandType::None),
    CilInstruction::RESERVED,
    CilInstruction::RESERVED,
    CilInstruction::new("mkrefany", OperandType::Token),
    CilInstruction::RESERVED,
    CilInstruction::RESERVED,
    CilInstruction::RESERVED,
    CilInstruction::RESERVED,
    CilInstruction::RESERVED,
    CilInstruction::RESERVED,
    CilInstruction::RESERVED,
    CilInstruction::RESERVED,
    CilInstruction::RESERVED,
    CilInstruction::new("ldtoken", OperandType::Token),
    CilInstruction::new("conv.u2", OperandType::None),
    CilInstruction::new("conv.u1", OperandType::None),
    CilInstruction::new("conv.i", OperandType::None),
    CilInstruction::new("conv.ovf.i", OperandType::None),
    CilInstruction::new("conv.ovf.u", OperandType::None),
    CilInstruction::new("add.ovf", OperandType::None),
    CilInstruction::new("add.ovf.un", OperandType::None),
    CilInstruction::new("mul.ovf", OperandType::None),
    CilInstruction::new("mul.ovf.un", OperandType::None),
    CilInstruction::new("sub.ovf", OperandType::None),
    CilInstruction::new("sub.ovf.un", OperandType::None),
    CilInstruction::new("endfinally", OperandType::None),
    CilInstruction::new("leave", OperandType::Int32),
    CilInstruction::new("leave.s", OperandType::Int8),
    CilInstruction::new("stind.i", OperandType::None),
    CilInstruction::new("conv.u", OperandType::None),
];

/// Two-byte opcodes behind the `0xFE` prefix, indexed by the second byte
pub const INSTRUCTIONS_FE: [CilInstruction; 31] = [
    CilInstruction::new("arglist", OperandType::None),
    CilInstruction::new("ceq", OperandType::None),
    CilInstruction::new("cgt", OperandType::None),
    CilInstruction::new("cgt.un", OperandType::None),
    CilInstruction::new("clt", OperandType::None),
    CilInstruction::new("clt.un", OperandType::None),
    CilInstruction::new("ldftn", OperandType::Token),
    CilInstruction::new("ldvirtftn", OperandType::Token),
    CilInstruction::RESERVED,
    CilInstruction::new("ldarg", OperandType::UInt16),
    CilInstruction::new("ldarga", OperandType::UInt16),
    CilInstruction::new("starg", OperandType::UInt16),
    CilInstruction::new("ldloc", OperandType::UInt16),
    CilInstruction::new("ldloca", OperandType::UInt16),
    CilInstruction::new("stloc", OperandType::UInt16),
    CilInstruction::new("localloc", OperandType::None),
    CilInstruction::RESERVED,
    CilInstruction::new("endfilter", OperandType::None),
    CilInstruction::new("unaligned.", OperandType::UInt8),
    CilInstruction::new("volatile.", OperandType::None),
    CilInstruction::new("tail.", OperandType::None),
    CilInstruction::new("initobj", OperandType::Token),
    CilInstruction::new("constrained.", OperandType::Token),
    CilInstruction::new("cpblk", OperandType::None),
    CilInstruction::new("initblk", OperandType::None),
    CilInstruction::new("no.", OperandType::UInt8),
    CilInstruction::new("rethrow", OperandType::None),
    CilInstruction::RESERVED,
    CilInstruction::new("sizeof", OperandType::Token),
    CilInstruction::new("refanytype", OperandType::None),
    CilInstruction::new("readonly.", OperandType::None),
];
