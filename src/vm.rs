//! Virtual machine: program compilation and the per-hash execution loop.
//!
//! Each program is lowered once into a 256-slot table of precompiled
//! operations (resolved register indices, sign-extended immediates, address
//! masks, reciprocals, branch targets) and then driven for 2 048 iterations
//! of the register initialization / instruction / finalization cycle. Eight
//! programs chain per hash through Blake2b reseeding; the AES fingerprint of
//! the scratchpad lands in the a-registers before the final Blake2b.

use tracing::trace;

use crate::aes;
use crate::blake2b;
use crate::dataset::DatasetItem;
use crate::error::Result;
use crate::fenv::{self, F128, FloatEnv, E_MANTISSA_MASK, FSCAL_MASK};
use crate::params::{
    DATASET_ALIGN_MASK, DATASET_EXTRA_ITEMS, DATASET_ITEM_SIZE, JUMP_BITS, JUMP_OFFSET,
    PROGRAM_BYTES, PROGRAM_COUNT, PROGRAM_ITERATIONS, PROGRAM_SIZE, SCRATCHPAD_L1_MASK,
    SCRATCHPAD_L2_MASK, SCRATCHPAD_L3_MASK, SCRATCHPAD_L3_MASK64,
};
use crate::program::{float_register_mask, small_positive_float, Bytecode, RxProgram, LUT_OPCODE};
use crate::reciprocal::reciprocal;
use crate::scratchpad::Scratchpad;

const INT_REGISTERS: usize = 8;
const FLOAT_REGISTERS: usize = 8 / 2;

/// ISTORE uses the full scratchpad when the condition nibble reaches this.
const L3_STORE_CONDITION: u32 = 14;

/// The VM register file. Hashed as 256 little-endian bytes in field order.
pub(crate) struct RegisterFile {
    pub r: [u64; INT_REGISTERS],
    pub f: [F128; FLOAT_REGISTERS],
    pub e: [F128; FLOAT_REGISTERS],
    pub a: [F128; FLOAT_REGISTERS],
}

impl RegisterFile {
    fn new() -> Self {
        Self {
            r: [0; INT_REGISTERS],
            f: [F128::zero(); FLOAT_REGISTERS],
            e: [F128::zero(); FLOAT_REGISTERS],
            a: [F128::zero(); FLOAT_REGISTERS],
        }
    }

    fn to_bytes(&self) -> [u8; 256] {
        let mut out = [0u8; 256];

        for (i, r) in self.r.iter().enumerate() {
            out[8 * i..8 * i + 8].copy_from_slice(&r.to_le_bytes());
        }

        for (group_offset, group) in [(64, &self.f), (128, &self.e), (192, &self.a)] {
            for (i, reg) in group.iter().enumerate() {
                let bits = reg.to_bits();
                let base = group_offset + 16 * i;
                out[base..base + 8].copy_from_slice(&bits[0].to_le_bytes());
                out[base + 8..base + 16].copy_from_slice(&bits[1].to_le_bytes());
            }
        }

        out
    }
}

/// Precompiled scratchpad operand.
#[derive(Clone, Copy)]
enum MemOperand {
    /// Immediate-only address, already masked (integer loads with
    /// `src == dst`).
    Imm(u32),
    /// `(r[src] + imm) & mask`.
    Reg { src: u8, imm: i32, mask: u32 },
}

impl MemOperand {
    #[inline(always)]
    fn address(&self, r: &[u64; INT_REGISTERS]) -> u32 {
        match *self {
            MemOperand::Imm(addr) => addr,
            MemOperand::Reg { src, imm, mask } => {
                (r[src as usize].wrapping_add(imm as i64 as u64) & u64::from(mask)) as u32
            }
        }
    }
}

/// One compiled instruction slot.
#[derive(Clone, Copy)]
enum Op {
    Nop,
    IaddRs { dst: u8, src: u8, shift: u32, imm: u64 },
    IaddM { dst: u8, mem: MemOperand },
    IsubR { dst: u8, src: u8 },
    IsubRImm { dst: u8, imm: u64 },
    IsubM { dst: u8, mem: MemOperand },
    ImulR { dst: u8, src: u8 },
    ImulRImm { dst: u8, imm: u64 },
    ImulM { dst: u8, mem: MemOperand },
    ImulhR { dst: u8, src: u8 },
    ImulhM { dst: u8, mem: MemOperand },
    IsmulhR { dst: u8, src: u8 },
    IsmulhM { dst: u8, mem: MemOperand },
    ImulRcp { dst: u8, multiplier: u64 },
    InegR { dst: u8 },
    IxorR { dst: u8, src: u8 },
    IxorRImm { dst: u8, imm: u64 },
    IxorM { dst: u8, mem: MemOperand },
    IrorR { dst: u8, src: u8 },
    IrorRImm { dst: u8, imm: u32 },
    IrolR { dst: u8, src: u8 },
    IrolRImm { dst: u8, imm: u32 },
    IswapR { dst: u8, src: u8 },
    Cbranch { dst: u8, imm: u64, mask: u32, target: i32 },
    FswapF { reg: u8 },
    FswapE { reg: u8 },
    FaddR { dst: u8, src: u8 },
    FaddM { dst: u8, mem: MemOperand },
    FsubR { dst: u8, src: u8 },
    FsubM { dst: u8, mem: MemOperand },
    FscalR { dst: u8 },
    FmulR { dst: u8, src: u8 },
    FdivM { dst: u8, mem: MemOperand },
    FsqrtR { dst: u8 },
    Cfround { src: u8, imm: u32 },
    Istore { dst: u8, src: u8, imm: i32, mask: u32 },
}

/// A compiled program plus its execution state.
struct ProgramContext {
    ops: [Op; PROGRAM_SIZE],
    rf: RegisterFile,
    mem_ma: u32,
    mem_mx: u32,
    sp_ma: u32,
    sp_mx: u32,
    read_reg: [usize; 4],
    dataset_offset: u64,
    e_mask: [u64; 2],
}

fn int_mem_operand(dst: u8, src: u8, imm32: u32, mod_mask: u8) -> MemOperand {
    if src == dst {
        MemOperand::Imm(((imm32 as i32 as i64 as u64) & u64::from(SCRATCHPAD_L3_MASK)) as u32)
    } else {
        MemOperand::Reg {
            src,
            imm: imm32 as i32,
            mask: if mod_mask != 0 {
                SCRATCHPAD_L1_MASK
            } else {
                SCRATCHPAD_L2_MASK
            },
        }
    }
}

/// Float loads never take the immediate-only form.
fn float_mem_operand(src: u8, imm32: u32, mod_mask: u8) -> MemOperand {
    MemOperand::Reg {
        src,
        imm: imm32 as i32,
        mask: if mod_mask != 0 {
            SCRATCHPAD_L1_MASK
        } else {
            SCRATCHPAD_L2_MASK
        },
    }
}

impl ProgramContext {
    /// Compiles a program and derives its configuration from the entropy
    /// header.
    fn new(program: &RxProgram) -> Self {
        let entropy = &program.entropy;

        let mut rf = RegisterFile::new();
        for i in 0..FLOAT_REGISTERS {
            rf.a[i] = F128::from_bits(
                small_positive_float(entropy[2 * i]),
                small_positive_float(entropy[2 * i + 1]),
            );
        }

        let mem_ma = (entropy[8] & u64::from(DATASET_ALIGN_MASK)) as u32;
        let mem_mx = entropy[10] as u32;

        let mut read_reg = [0usize; 4];
        for (i, reg) in read_reg.iter_mut().enumerate() {
            *reg = i * 2 + ((entropy[12] >> i) & 1) as usize;
        }

        let dataset_offset =
            (entropy[13] % (DATASET_EXTRA_ITEMS + 1)) * DATASET_ITEM_SIZE as u64;

        let e_mask = [
            float_register_mask(entropy[14]),
            float_register_mask(entropy[15]),
        ];

        let mut reg_usage = [-1i32; INT_REGISTERS];
        let mut ops = [Op::Nop; PROGRAM_SIZE];

        for (i, raw) in program.instructions.iter().enumerate() {
            // Register fields are reduced once, at compile time.
            let dst = raw.dst % INT_REGISTERS as u8;
            let src = raw.src % INT_REGISTERS as u8;
            let fdst = dst % FLOAT_REGISTERS as u8;
            let fsrc = src % FLOAT_REGISTERS as u8;
            let imm_sext = raw.imm32 as i32 as i64 as u64;

            ops[i] = match LUT_OPCODE[raw.opcode as usize] {
                Bytecode::IaddRs => {
                    reg_usage[dst as usize] = i as i32;
                    // Only the displacement register takes the immediate.
                    let imm = if dst == 5 { imm_sext } else { 0 };
                    Op::IaddRs {
                        dst,
                        src,
                        shift: raw.mod_shift(),
                        imm,
                    }
                }
                Bytecode::IaddM => {
                    reg_usage[dst as usize] = i as i32;
                    Op::IaddM {
                        dst,
                        mem: int_mem_operand(dst, src, raw.imm32, raw.mod_mask()),
                    }
                }
                Bytecode::IsubR => {
                    reg_usage[dst as usize] = i as i32;
                    if dst == src {
                        Op::IsubRImm { dst, imm: imm_sext }
                    } else {
                        Op::IsubR { dst, src }
                    }
                }
                Bytecode::IsubM => {
                    reg_usage[dst as usize] = i as i32;
                    Op::IsubM {
                        dst,
                        mem: int_mem_operand(dst, src, raw.imm32, raw.mod_mask()),
                    }
                }
                Bytecode::ImulR => {
                    reg_usage[dst as usize] = i as i32;
                    if dst == src {
                        Op::ImulRImm { dst, imm: imm_sext }
                    } else {
                        Op::ImulR { dst, src }
                    }
                }
                Bytecode::ImulM => {
                    reg_usage[dst as usize] = i as i32;
                    Op::ImulM {
                        dst,
                        mem: int_mem_operand(dst, src, raw.imm32, raw.mod_mask()),
                    }
                }
                Bytecode::ImulhR => {
                    reg_usage[dst as usize] = i as i32;
                    Op::ImulhR { dst, src }
                }
                Bytecode::ImulhM => {
                    reg_usage[dst as usize] = i as i32;
                    Op::ImulhM {
                        dst,
                        mem: int_mem_operand(dst, src, raw.imm32, raw.mod_mask()),
                    }
                }
                Bytecode::IsmulhR => {
                    reg_usage[dst as usize] = i as i32;
                    Op::IsmulhR { dst, src }
                }
                Bytecode::IsmulhM => {
                    reg_usage[dst as usize] = i as i32;
                    Op::IsmulhM {
                        dst,
                        mem: int_mem_operand(dst, src, raw.imm32, raw.mod_mask()),
                    }
                }
                Bytecode::ImulRcp => {
                    // Zero and power-of-two immediates compile to a nop.
                    if raw.imm32 != 0 && !raw.imm32.is_power_of_two() {
                        reg_usage[dst as usize] = i as i32;
                        Op::ImulRcp {
                            dst,
                            multiplier: reciprocal(raw.imm32),
                        }
                    } else {
                        Op::Nop
                    }
                }
                Bytecode::InegR => {
                    reg_usage[dst as usize] = i as i32;
                    Op::InegR { dst }
                }
                Bytecode::IxorR => {
                    reg_usage[dst as usize] = i as i32;
                    if dst == src {
                        Op::IxorRImm { dst, imm: imm_sext }
                    } else {
                        Op::IxorR { dst, src }
                    }
                }
                Bytecode::IxorM => {
                    reg_usage[dst as usize] = i as i32;
                    Op::IxorM {
                        dst,
                        mem: int_mem_operand(dst, src, raw.imm32, raw.mod_mask()),
                    }
                }
                Bytecode::IrorR => {
                    reg_usage[dst as usize] = i as i32;
                    if dst == src {
                        Op::IrorRImm {
                            dst,
                            imm: raw.imm32 % 64,
                        }
                    } else {
                        Op::IrorR { dst, src }
                    }
                }
                Bytecode::IrolR => {
                    reg_usage[dst as usize] = i as i32;
                    if dst == src {
                        Op::IrolRImm {
                            dst,
                            imm: raw.imm32 % 64,
                        }
                    } else {
                        Op::IrolR { dst, src }
                    }
                }
                Bytecode::IswapR => {
                    if src != dst {
                        reg_usage[dst as usize] = i as i32;
                        reg_usage[src as usize] = i as i32;
                        Op::IswapR { dst, src }
                    } else {
                        Op::Nop
                    }
                }
                Bytecode::Cbranch => {
                    let shift = raw.mod_cond() + JUMP_OFFSET;
                    let mask = ((1u32 << JUMP_BITS) - 1) << shift;

                    let mut imm = imm_sext | (1u64 << shift);
                    // Clearing the bit below the condition mask caps
                    // consecutive taken branches at two.
                    imm &= !(1u64 << (shift - 1));

                    let op = Op::Cbranch {
                        dst,
                        imm,
                        mask,
                        target: reg_usage[dst as usize],
                    };
                    reg_usage = [i as i32; INT_REGISTERS];
                    op
                }
                Bytecode::FswapR => {
                    if dst < FLOAT_REGISTERS as u8 {
                        Op::FswapF { reg: fdst }
                    } else {
                        Op::FswapE { reg: fdst }
                    }
                }
                Bytecode::FaddR => Op::FaddR { dst: fdst, src: fsrc },
                Bytecode::FaddM => Op::FaddM {
                    dst: fdst,
                    mem: float_mem_operand(src, raw.imm32, raw.mod_mask()),
                },
                Bytecode::FsubR => Op::FsubR { dst: fdst, src: fsrc },
                Bytecode::FsubM => Op::FsubM {
                    dst: fdst,
                    mem: float_mem_operand(src, raw.imm32, raw.mod_mask()),
                },
                Bytecode::FscalR => Op::FscalR { dst: fdst },
                Bytecode::FmulR => Op::FmulR { dst: fdst, src: fsrc },
                Bytecode::FdivM => Op::FdivM {
                    dst: fdst,
                    mem: float_mem_operand(src, raw.imm32, raw.mod_mask()),
                },
                Bytecode::FsqrtR => Op::FsqrtR { dst: fdst },
                Bytecode::Cfround => Op::Cfround {
                    src,
                    imm: raw.imm32 % 64,
                },
                Bytecode::Istore => {
                    let mask = if raw.mod_cond() >= L3_STORE_CONDITION {
                        SCRATCHPAD_L3_MASK
                    } else if raw.mod_mask() != 0 {
                        SCRATCHPAD_L1_MASK
                    } else {
                        SCRATCHPAD_L2_MASK
                    };
                    Op::Istore {
                        dst,
                        src,
                        imm: raw.imm32 as i32,
                        mask,
                    }
                }
            };
        }

        Self {
            ops,
            rf,
            mem_ma,
            mem_mx,
            sp_ma: mem_ma,
            sp_mx: mem_mx,
            read_reg,
            dataset_offset,
            e_mask,
        }
    }
}

#[inline(always)]
fn convert_e(x: F128, e_mask: &[u64; 2]) -> F128 {
    x.and(F128::broadcast_bits(E_MANTISSA_MASK))
        .or(F128::from_bits(e_mask[0], e_mask[1]))
}

#[inline(always)]
fn mulh(a: u64, b: u64) -> u64 {
    (((a as u128) * (b as u128)) >> 64) as u64
}

#[inline(always)]
fn smulh(a: u64, b: u64) -> u64 {
    (((a as i64 as i128) * (b as i64 as i128)) >> 64) as u64
}

/// A single-hash virtual machine over a borrowed dataset.
pub(crate) struct Vm<'a> {
    seed: [u8; 64],
    scratchpad: Scratchpad,
    dataset: &'a [DatasetItem],
}

impl<'a> Vm<'a> {
    /// Seeds the VM from `input`: `seed = Blake2b-512(input)`, scratchpad
    /// filled from the seed.
    pub fn new(input: &[u8], dataset: &'a [DatasetItem]) -> Result<Self> {
        let mut seed = [0u8; 64];
        blake2b::hash(&mut seed, input)?;
        let scratchpad = Scratchpad::new(&mut seed)?;

        Ok(Self {
            seed,
            scratchpad,
            dataset,
        })
    }

    /// Runs the 8-program chain and finalizes to the 32-byte hash. The
    /// float environment is restored on every exit path, panics included.
    pub fn execute(&mut self) -> Result<[u8; 32]> {
        let _fenv = FloatEnv::new();

        for _ in 0..PROGRAM_COUNT - 1 {
            let mut ctx = self.next_program()?;
            self.run_program(&mut ctx);
            self.seed = blake2b::hash64(&ctx.rf.to_bytes());
        }

        let mut ctx = self.next_program()?;
        self.run_program(&mut ctx);

        let mut fingerprint = [0u8; 64];
        aes::hash_1r(&mut fingerprint, self.scratchpad.as_bytes())?;
        for (i, chunk) in fingerprint.chunks_exact(16).enumerate() {
            ctx.rf.a[i] = F128::from_bits(
                u64::from_le_bytes(chunk[..8].try_into().expect("8-byte chunk")),
                u64::from_le_bytes(chunk[8..].try_into().expect("8-byte chunk")),
            );
        }

        let mut output = [0u8; 32];
        blake2b::hash(&mut output, &ctx.rf.to_bytes())?;
        Ok(output)
    }

    /// Materializes and compiles the next program; the last 64 bytes of the
    /// generated buffer become the next seed.
    fn next_program(&mut self) -> Result<ProgramContext> {
        let mut buffer = [0u8; PROGRAM_BYTES];
        aes::fill_4r(&mut buffer, &mut self.seed)?;

        let program = RxProgram::from_bytes(&buffer);
        trace!(entropy0 = program.entropy[0], "program compiled");
        Ok(ProgramContext::new(&program))
    }

    fn run_program(&mut self, ctx: &mut ProgramContext) {
        for _ in 0..PROGRAM_ITERATIONS {
            self.init_iteration(ctx);
            self.run_instructions(ctx);
            self.finalize_iteration(ctx);
        }
    }

    /// Loop steps 1-3: mix the spMix registers into the scratchpad
    /// addresses, XOR-load the integer file, convert-load the float files.
    fn init_iteration(&mut self, ctx: &mut ProgramContext) {
        let sp_mix = ctx.rf.r[ctx.read_reg[0]] ^ ctx.rf.r[ctx.read_reg[1]];

        ctx.sp_mx ^= sp_mix as u32;
        ctx.sp_mx &= SCRATCHPAD_L3_MASK64;
        ctx.sp_ma ^= (sp_mix >> 32) as u32;
        ctx.sp_ma &= SCRATCHPAD_L3_MASK64;

        for i in 0..INT_REGISTERS {
            ctx.rf.r[i] ^= self.scratchpad.read_u64(ctx.sp_mx + 8 * i as u32);
        }

        for i in 0..FLOAT_REGISTERS {
            let bits = self.scratchpad.read_u64(ctx.sp_ma + 8 * i as u32);
            ctx.rf.f[i] = F128::from_packed_i32(bits);
        }

        for i in 0..FLOAT_REGISTERS {
            let bits = self
                .scratchpad
                .read_u64(ctx.sp_ma + 8 * (FLOAT_REGISTERS + i) as u32);
            ctx.rf.e[i] = convert_e(F128::from_packed_i32(bits), &ctx.e_mask);
        }
    }

    fn run_instructions(&mut self, ctx: &mut ProgramContext) {
        let mut pc: i32 = 0;

        while (pc as usize) < PROGRAM_SIZE {
            let op = ctx.ops[pc as usize];
            let r = &mut ctx.rf.r;

            match op {
                Op::Nop => {}
                Op::IaddRs { dst, src, shift, imm } => {
                    let (dst, src) = (dst as usize, src as usize);
                    r[dst] = r[dst].wrapping_add((r[src] << shift).wrapping_add(imm));
                }
                Op::IaddM { dst, mem } => {
                    let value = self.scratchpad.read_u64(mem.address(r));
                    r[dst as usize] = r[dst as usize].wrapping_add(value);
                }
                Op::IsubR { dst, src } => {
                    let value = r[src as usize];
                    r[dst as usize] = r[dst as usize].wrapping_sub(value);
                }
                Op::IsubRImm { dst, imm } => {
                    r[dst as usize] = r[dst as usize].wrapping_sub(imm);
                }
                Op::IsubM { dst, mem } => {
                    let value = self.scratchpad.read_u64(mem.address(r));
                    r[dst as usize] = r[dst as usize].wrapping_sub(value);
                }
                Op::ImulR { dst, src } => {
                    let value = r[src as usize];
                    r[dst as usize] = r[dst as usize].wrapping_mul(value);
                }
                Op::ImulRImm { dst, imm } => {
                    r[dst as usize] = r[dst as usize].wrapping_mul(imm);
                }
                Op::ImulM { dst, mem } => {
                    let value = self.scratchpad.read_u64(mem.address(r));
                    r[dst as usize] = r[dst as usize].wrapping_mul(value);
                }
                Op::ImulhR { dst, src } => {
                    r[dst as usize] = mulh(r[dst as usize], r[src as usize]);
                }
                Op::ImulhM { dst, mem } => {
                    let value = self.scratchpad.read_u64(mem.address(r));
                    r[dst as usize] = mulh(r[dst as usize], value);
                }
                Op::IsmulhR { dst, src } => {
                    r[dst as usize] = smulh(r[dst as usize], r[src as usize]);
                }
                Op::IsmulhM { dst, mem } => {
                    let value = self.scratchpad.read_u64(mem.address(r));
                    r[dst as usize] = smulh(r[dst as usize], value);
                }
                Op::ImulRcp { dst, multiplier } => {
                    r[dst as usize] = r[dst as usize].wrapping_mul(multiplier);
                }
                Op::InegR { dst } => {
                    r[dst as usize] = r[dst as usize].wrapping_neg();
                }
                Op::IxorR { dst, src } => {
                    let value = r[src as usize];
                    r[dst as usize] ^= value;
                }
                Op::IxorRImm { dst, imm } => {
                    r[dst as usize] ^= imm;
                }
                Op::IxorM { dst, mem } => {
                    let value = self.scratchpad.read_u64(mem.address(r));
                    r[dst as usize] ^= value;
                }
                Op::IrorR { dst, src } => {
                    let count = (r[src as usize] % 64) as u32;
                    r[dst as usize] = r[dst as usize].rotate_right(count);
                }
                Op::IrorRImm { dst, imm } => {
                    r[dst as usize] = r[dst as usize].rotate_right(imm);
                }
                Op::IrolR { dst, src } => {
                    let count = (r[src as usize] % 64) as u32;
                    r[dst as usize] = r[dst as usize].rotate_left(count);
                }
                Op::IrolRImm { dst, imm } => {
                    r[dst as usize] = r[dst as usize].rotate_left(imm);
                }
                Op::IswapR { dst, src } => {
                    r.swap(dst as usize, src as usize);
                }
                Op::Cbranch { dst, imm, mask, target } => {
                    let dst = dst as usize;
                    r[dst] = r[dst].wrapping_add(imm);
                    if r[dst] & u64::from(mask) == 0 {
                        // Jump lands just after the last write to dst; -1
                        // restarts the program.
                        pc = target;
                    }
                }
                Op::FswapF { reg } => {
                    ctx.rf.f[reg as usize] = ctx.rf.f[reg as usize].swap_lanes();
                }
                Op::FswapE { reg } => {
                    ctx.rf.e[reg as usize] = ctx.rf.e[reg as usize].swap_lanes();
                }
                Op::FaddR { dst, src } => {
                    ctx.rf.f[dst as usize] = ctx.rf.f[dst as usize].add(ctx.rf.a[src as usize]);
                }
                Op::FaddM { dst, mem } => {
                    let value = F128::from_packed_i32(self.scratchpad.read_u64(mem.address(r)));
                    ctx.rf.f[dst as usize] = ctx.rf.f[dst as usize].add(value);
                }
                Op::FsubR { dst, src } => {
                    ctx.rf.f[dst as usize] = ctx.rf.f[dst as usize].sub(ctx.rf.a[src as usize]);
                }
                Op::FsubM { dst, mem } => {
                    let value = F128::from_packed_i32(self.scratchpad.read_u64(mem.address(r)));
                    ctx.rf.f[dst as usize] = ctx.rf.f[dst as usize].sub(value);
                }
                Op::FscalR { dst } => {
                    ctx.rf.f[dst as usize] =
                        ctx.rf.f[dst as usize].xor(F128::broadcast_bits(FSCAL_MASK));
                }
                Op::FmulR { dst, src } => {
                    ctx.rf.e[dst as usize] = ctx.rf.e[dst as usize].mul(ctx.rf.a[src as usize]);
                }
                Op::FdivM { dst, mem } => {
                    let value = convert_e(
                        F128::from_packed_i32(self.scratchpad.read_u64(mem.address(r))),
                        &ctx.e_mask,
                    );
                    ctx.rf.e[dst as usize] = ctx.rf.e[dst as usize].div(value);
                }
                Op::FsqrtR { dst } => {
                    ctx.rf.e[dst as usize] = ctx.rf.e[dst as usize].sqrt();
                }
                Op::Cfround { src, imm } => {
                    let mode = (r[src as usize].rotate_right(imm) % 4) as u32;
                    fenv::set_rounding_mode(mode);
                }
                Op::Istore { dst, src, imm, mask } => {
                    let addr =
                        (r[dst as usize].wrapping_add(imm as i64 as u64) & u64::from(mask)) as u32;
                    self.scratchpad.write_u64(addr, r[src as usize]);
                }
            }

            pc += 1;
        }
    }

    /// Loop steps 5-12: dataset mixing, register write-back, address reset.
    fn finalize_iteration(&mut self, ctx: &mut ProgramContext) {
        ctx.mem_mx ^= (ctx.rf.r[ctx.read_reg[2]] ^ ctx.rf.r[ctx.read_reg[3]]) as u32;
        ctx.mem_mx &= DATASET_ALIGN_MASK;

        let index = (ctx.dataset_offset + u64::from(ctx.mem_ma)) / DATASET_ITEM_SIZE as u64;
        let item = self.dataset[index as usize];

        std::mem::swap(&mut ctx.mem_mx, &mut ctx.mem_ma);

        for i in 0..INT_REGISTERS {
            ctx.rf.r[i] ^= item[i];
        }

        for i in 0..INT_REGISTERS {
            self.scratchpad
                .write_u64(ctx.sp_ma + 8 * i as u32, ctx.rf.r[i]);
        }

        for i in 0..FLOAT_REGISTERS {
            ctx.rf.f[i] = ctx.rf.f[i].xor(ctx.rf.e[i]);
        }

        for i in 0..FLOAT_REGISTERS {
            let bits = ctx.rf.f[i].to_bits();
            self.scratchpad
                .write_u64(ctx.sp_mx + 16 * i as u32, bits[0]);
            self.scratchpad
                .write_u64(ctx.sp_mx + 16 * i as u32 + 8, bits[1]);
        }

        ctx.sp_ma = 0;
        ctx.sp_mx = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::RxInstruction;

    fn program_with(instructions: &[(usize, RxInstruction)]) -> RxProgram {
        let mut program = RxProgram {
            entropy: [0; 16],
            instructions: [RxInstruction::default(); PROGRAM_SIZE],
        };
        for (i, instr) in instructions {
            program.instructions[*i] = *instr;
        }
        program
    }

    // Opcode values picked through the frequency table: the IMUL_RCP range
    // is 76..=83, ISWAP_R is 116..=119, CBRANCH is 214..=238.
    const OP_IMUL_RCP: u8 = 76;
    const OP_ISWAP_R: u8 = 116;
    const OP_CBRANCH: u8 = 217;

    #[test]
    fn lut_sanity_for_test_opcodes() {
        assert_eq!(LUT_OPCODE[OP_IMUL_RCP as usize], Bytecode::ImulRcp);
        assert_eq!(LUT_OPCODE[OP_ISWAP_R as usize], Bytecode::IswapR);
        assert_eq!(LUT_OPCODE[OP_CBRANCH as usize], Bytecode::Cbranch);
    }

    #[test]
    fn imul_rcp_power_of_two_compiles_to_nop() {
        let program = program_with(&[
            (
                0,
                RxInstruction {
                    opcode: OP_IMUL_RCP,
                    dst: 1,
                    src: 2,
                    mod_byte: 0,
                    imm32: 64, // power of two
                },
            ),
            (
                1,
                RxInstruction {
                    opcode: OP_IMUL_RCP,
                    dst: 1,
                    src: 2,
                    mod_byte: 0,
                    imm32: 3,
                },
            ),
        ]);

        let ctx = ProgramContext::new(&program);
        assert!(matches!(ctx.ops[0], Op::Nop));
        assert!(matches!(
            ctx.ops[1],
            Op::ImulRcp {
                dst: 1,
                multiplier: 12297829382473034410,
            }
        ));
    }

    #[test]
    fn iswap_same_register_compiles_to_nop() {
        let program = program_with(&[(
            0,
            RxInstruction {
                opcode: OP_ISWAP_R,
                dst: 3,
                src: 11, // 11 % 8 == 3
                mod_byte: 0,
                imm32: 0,
            },
        )]);

        let ctx = ProgramContext::new(&program);
        assert!(matches!(ctx.ops[0], Op::Nop));
    }

    #[test]
    fn cbranch_transformed_immediate() {
        let mod_byte = 0x50; // condition nibble 5 -> shift 13
        let program = program_with(&[(
            0,
            RxInstruction {
                opcode: OP_CBRANCH,
                dst: 0,
                src: 0,
                mod_byte,
                imm32: 0xFFFF_FFFF,
            },
        )]);

        let ctx = ProgramContext::new(&program);
        let Op::Cbranch { imm, mask, target, .. } = ctx.ops[0] else {
            panic!("expected CBRANCH");
        };

        let shift = 5 + JUMP_OFFSET;
        assert_eq!(mask, 0xFFu32 << shift);
        assert_ne!(imm & (1u64 << shift), 0, "condition bit must be set");
        assert_eq!(imm & (1u64 << (shift - 1)), 0, "bit below must be clear");
        assert_eq!(target, -1, "no prior write to dst restarts the program");
    }

    #[test]
    fn register_file_serialization_layout() {
        let mut rf = RegisterFile::new();
        rf.r[0] = 0x0102030405060708;
        rf.a[3] = F128::from_bits(0x1111111111111111, 0x2222222222222222);

        let bytes = rf.to_bytes();
        assert_eq!(&bytes[..8], &0x0102030405060708u64.to_le_bytes());
        assert_eq!(&bytes[240..248], &0x1111111111111111u64.to_le_bytes());
        assert_eq!(&bytes[248..256], &0x2222222222222222u64.to_le_bytes());
    }
}
