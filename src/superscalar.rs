//! Superscalar program generator.
//!
//! Simulates a 3-wide decoder and a 3-port execution engine (P0, P1, P5) of
//! the reference microarchitecture and emits programs whose critical path
//! matches the 170-cycle target latency. Dataset expansion runs eight of
//! these programs per item.
//!
//! Generation is a deterministic state machine driven by the Blake2b random
//! stream; the order of draws is part of the algorithm, so every selection
//! below consumes randomness exactly where the reference does.

use tracing::debug;

use crate::blake2b;
use crate::params::{SUPERSCALAR_LATENCY, SUPERSCALAR_MAX_PROGRAM_SIZE};
use crate::reciprocal::reciprocal;

/// Number of simulated registers.
pub const REGISTER_COUNT: usize = 8;

/// This register cannot be the destination of IADD_RS.
const NEEDS_DISPLACEMENT: u8 = 5;

/// Maximum macro-op latency in the instruction set (reference CPU).
const MAX_OP_LATENCY: u32 = 4;

/// Upper bound on schedule cycles.
const MAX_SCHEDULE_CYCLE: usize = (SUPERSCALAR_LATENCY + MAX_OP_LATENCY) as usize;

/// Gives up on a decode buffer slot after this many discarded candidates.
const MAX_THROWAWAY_COUNT: u32 = 256;

// Execution port bitmasks.
const P_NONE: u8 = 0;
const P5: u8 = 1;
const P0: u8 = 2;
const P1: u8 = 4;
const P01: u8 = P0 | P1;
const P05: u8 = P0 | P5;
const P015: u8 = P0 | P1 | P5;

/// Superscalar opcodes. The discriminants index [`ISA`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Opcode {
    IsubR = 0,
    IxorR = 1,
    IaddRs = 2,
    ImulR = 3,
    IrorC = 4,
    IaddC7 = 5,
    IxorC7 = 6,
    IaddC8 = 7,
    IxorC8 = 8,
    IaddC9 = 9,
    IxorC9 = 10,
    ImulhR = 11,
    IsmulhR = 12,
    ImulRcp = 13,
    Invalid = 14,
}

impl Opcode {
    fn is_multiplication(self) -> bool {
        matches!(
            self,
            Opcode::ImulR | Opcode::ImulhR | Opcode::IsmulhR | Opcode::ImulRcp
        )
    }
}

/// One x86 macro-op of an instruction template.
#[derive(Clone, Copy)]
struct MacroOp {
    /// Eligible ports; a second non-NONE entry marks a fused 2-uop op.
    ports: [u8; 2],
    /// Encoded size in bytes.
    size: u8,
    /// Latency in cycles.
    latency: u8,
    /// Must wait for the previous macro-op's result (IMUL_RCP chain).
    dependent: bool,
}

impl MacroOp {
    const NONE: MacroOp = MacroOp::new(P_NONE, 0, 0);

    const fn new(port: u8, size: u8, latency: u8) -> Self {
        Self {
            ports: [port, P_NONE],
            size,
            latency,
            dependent: false,
        }
    }

    const fn fused_pair(port_a: u8, port_b: u8, size: u8, latency: u8) -> Self {
        Self {
            ports: [port_a, port_b],
            size,
            latency,
            dependent: false,
        }
    }

    const fn dependent(mut self) -> Self {
        self.dependent = true;
        self
    }

    fn requires_port(&self) -> bool {
        self.ports[0] != P_NONE
    }

    fn fused(&self) -> bool {
        self.ports[1] != P_NONE
    }
}

/// Instruction template: macro-op composition plus operand-assignment rules.
struct Template {
    ops: [MacroOp; 4],
    opcode: Opcode,
    group: Opcode,
    /// Macro-op that consumes the source register, if any.
    src_op: Option<u8>,
    /// Macro-op that consumes the destination register.
    dst_op: u8,
    /// Macro-op whose retirement writes the destination.
    result_op: u8,
    /// Whether the selected source register becomes the source value.
    src_register_as_src_value: bool,
    /// Whether dst may equal src.
    dst_register_as_src_register: bool,
}

macro_rules! template {
    ($opcode:expr, $group:expr, $ops:expr, $src_op:expr, $dst_op:expr, $result_op:expr,
     src_as_value: $sav:expr, dst_as_src: $das:expr) => {
        Template {
            ops: $ops,
            opcode: $opcode,
            group: $group,
            src_op: $src_op,
            dst_op: $dst_op,
            result_op: $result_op,
            src_register_as_src_value: $sav,
            dst_register_as_src_register: $das,
        }
    };
}

/// The instruction set, indexed by opcode discriminant.
static ISA: [Template; 15] = [
    // ISUB_R: sub (p015, 3 bytes)
    template!(Opcode::IsubR, Opcode::IaddRs,
        [MacroOp::new(P015, 3, 1), MacroOp::NONE, MacroOp::NONE, MacroOp::NONE],
        Some(0), 0, 0, src_as_value: true, dst_as_src: false),
    // IXOR_R: xor (p015, 3 bytes)
    template!(Opcode::IxorR, Opcode::IxorR,
        [MacroOp::new(P015, 3, 1), MacroOp::NONE, MacroOp::NONE, MacroOp::NONE],
        Some(0), 0, 0, src_as_value: true, dst_as_src: false),
    // IADD_RS: lea (p01, 4 bytes). The published instruction table allows
    // dst == src; the reference generator never selects it.
    template!(Opcode::IaddRs, Opcode::IaddRs,
        [MacroOp::new(P01, 4, 1), MacroOp::NONE, MacroOp::NONE, MacroOp::NONE],
        Some(0), 0, 0, src_as_value: true, dst_as_src: false),
    // IMUL_R: imul (p1, 4 bytes, 3 cycles)
    template!(Opcode::ImulR, Opcode::ImulR,
        [MacroOp::new(P1, 4, 3), MacroOp::NONE, MacroOp::NONE, MacroOp::NONE],
        Some(0), 0, 0, src_as_value: true, dst_as_src: false),
    // IROR_C: ror (p05, 4 bytes)
    template!(Opcode::IrorC, Opcode::IrorC,
        [MacroOp::new(P05, 4, 1), MacroOp::NONE, MacroOp::NONE, MacroOp::NONE],
        None, 0, 0, src_as_value: false, dst_as_src: false),
    // IADD_C7/IXOR_C7: 7-byte immediate forms
    template!(Opcode::IaddC7, Opcode::IaddC7,
        [MacroOp::new(P015, 7, 1), MacroOp::NONE, MacroOp::NONE, MacroOp::NONE],
        None, 0, 0, src_as_value: false, dst_as_src: false),
    template!(Opcode::IxorC7, Opcode::IxorC7,
        [MacroOp::new(P015, 7, 1), MacroOp::NONE, MacroOp::NONE, MacroOp::NONE],
        None, 0, 0, src_as_value: false, dst_as_src: false),
    // IADD_C8/IXOR_C8: 7-byte immediate + 1-byte nop
    template!(Opcode::IaddC8, Opcode::IaddC7,
        [MacroOp::new(P015, 8, 1), MacroOp::NONE, MacroOp::NONE, MacroOp::NONE],
        None, 0, 0, src_as_value: false, dst_as_src: false),
    template!(Opcode::IxorC8, Opcode::IxorC7,
        [MacroOp::new(P015, 8, 1), MacroOp::NONE, MacroOp::NONE, MacroOp::NONE],
        None, 0, 0, src_as_value: false, dst_as_src: false),
    // IADD_C9/IXOR_C9: 7-byte immediate + 2-byte nop
    template!(Opcode::IaddC9, Opcode::IaddC7,
        [MacroOp::new(P015, 9, 1), MacroOp::NONE, MacroOp::NONE, MacroOp::NONE],
        None, 0, 0, src_as_value: false, dst_as_src: false),
    template!(Opcode::IxorC9, Opcode::IxorC7,
        [MacroOp::new(P015, 9, 1), MacroOp::NONE, MacroOp::NONE, MacroOp::NONE],
        None, 0, 0, src_as_value: false, dst_as_src: false),
    // IMULH_R: mov + mul (fused p1/p5) + mov
    template!(Opcode::ImulhR, Opcode::IsmulhR,
        [MacroOp::new(P_NONE, 3, 0), MacroOp::fused_pair(P1, P5, 3, 4), MacroOp::new(P_NONE, 3, 0), MacroOp::NONE],
        Some(1), 0, 1, src_as_value: true, dst_as_src: true),
    // ISMULH_R: mov + imul (fused p1/p5) + mov
    template!(Opcode::IsmulhR, Opcode::IsmulhR,
        [MacroOp::new(P_NONE, 3, 0), MacroOp::fused_pair(P1, P5, 3, 4), MacroOp::new(P_NONE, 3, 0), MacroOp::NONE],
        Some(1), 0, 1, src_as_value: true, dst_as_src: true),
    // IMUL_RCP: 10-byte mov + dependent imul
    template!(Opcode::ImulRcp, Opcode::ImulRcp,
        [MacroOp::new(P015, 10, 1), MacroOp::new(P1, 4, 3).dependent(), MacroOp::NONE, MacroOp::NONE],
        None, 1, 1, src_as_value: false, dst_as_src: false),
    // INVALID
    template!(Opcode::Invalid, Opcode::Invalid,
        [MacroOp::NONE, MacroOp::NONE, MacroOp::NONE, MacroOp::NONE],
        Some(0), 0, 0, src_as_value: false, dst_as_src: false),
];

/// Decode buffer configurations: 3- or 4-slot patterns of macro-op byte
/// sizes summing to 16 (table 6.3.1 of the RandomX specification).
const DECODE_BUFFERS: [[u32; 4]; 6] = [
    [4, 8, 4, 0],
    [7, 3, 3, 3],
    [3, 7, 3, 3],
    [4, 9, 3, 0],
    [4, 4, 4, 4],
    [3, 3, 10, 0],
];

const SLOT_3: [Opcode; 4] = [Opcode::IsubR, Opcode::IxorR, Opcode::ImulhR, Opcode::IsmulhR];
const SLOT_4: [Opcode; 2] = [Opcode::IrorC, Opcode::IaddRs];
const SLOT_7: [Opcode; 2] = [Opcode::IxorC7, Opcode::IaddC7];
const SLOT_8: [Opcode; 2] = [Opcode::IxorC8, Opcode::IaddC8];
const SLOT_9: [Opcode; 2] = [Opcode::IxorC9, Opcode::IaddC9];

/// A generated superscalar instruction.
#[derive(Clone, Copy)]
pub struct Instruction {
    pub opcode: Opcode,
    pub dst: u8,
    pub src: Option<u8>,
    pub imm32: u32,
    pub mod_byte: u8,
    /// Precomputed `reciprocal(imm32)` for IMUL_RCP.
    pub reciprocal: u64,
}

impl Instruction {
    pub const INVALID: Instruction = Instruction {
        opcode: Opcode::Invalid,
        dst: 0,
        src: None,
        imm32: 0,
        mod_byte: 0,
        reciprocal: 0,
    };

    /// Shift count for IADD_RS.
    #[inline]
    pub fn mod_shift(&self) -> u32 {
        (u32::from(self.mod_byte) >> 2) % 4
    }
}

/// A generated program: at most [`SUPERSCALAR_MAX_PROGRAM_SIZE`] instructions
/// plus the register with the highest simulated ASIC latency.
pub struct Program {
    pub instructions: Box<[Instruction; SUPERSCALAR_MAX_PROGRAM_SIZE]>,
    pub size: usize,
    pub address_register: u8,
}

impl Default for Program {
    fn default() -> Self {
        Self {
            instructions: Box::new([Instruction::INVALID; SUPERSCALAR_MAX_PROGRAM_SIZE]),
            size: 0,
            address_register: 0,
        }
    }
}

/// Per-register scheduling state.
#[derive(Clone, Copy)]
struct RegisterInfo {
    /// Cycle at which the register's value is ready.
    availability_cycle: u32,
    /// Source value of the last operation (None = constant).
    last_src_value: Option<u32>,
    /// Group of the last operation applied to the register.
    last_group: Opcode,
}

impl Default for RegisterInfo {
    fn default() -> Self {
        Self {
            availability_cycle: 0,
            last_src_value: None,
            last_group: Opcode::Invalid,
        }
    }
}

/// Simulated ASIC latency per register; the maximum picks the program's
/// address register.
#[derive(Default)]
struct AsicContext {
    latencies: [u32; REGISTER_COUNT],
    max_latency: u32,
    max_latency_register: u8,
}

impl AsicContext {
    fn update(&mut self, instr: &Candidate) {
        let dst = instr.dst as usize;
        let src = instr.src.unwrap_or(instr.dst) as usize;

        let dst_latency = self.latencies[dst] + 1;
        let src_latency = if dst != src { self.latencies[src] + 1 } else { 0 };
        self.latencies[dst] = dst_latency.max(src_latency);

        let greater = self.latencies[dst] > self.max_latency;
        let equal_lower_idx =
            self.latencies[dst] == self.max_latency && (dst as u8) < self.max_latency_register;
        if greater || equal_lower_idx {
            self.max_latency_register = dst as u8;
            self.max_latency = self.latencies[dst];
        }
    }
}

/// Generation state of the candidate instruction currently being issued.
struct Candidate {
    template: &'static Template,
    op_index: usize,
    src: Option<u8>,
    src_value: Option<u32>,
    dst: u8,
    imm32: u32,
    mod_byte: u8,
    reciprocal: u64,
}

impl Candidate {
    fn invalid() -> Self {
        Self {
            template: &ISA[Opcode::Invalid as usize],
            op_index: 0,
            src: None,
            src_value: None,
            dst: 0,
            imm32: 0,
            mod_byte: 0,
            reciprocal: 0,
        }
    }

    fn opcode(&self) -> Opcode {
        self.template.opcode
    }

    fn group(&self) -> Opcode {
        self.template.group
    }

    /// True once every macro-op has been issued (or the candidate was
    /// discarded).
    fn issued(&self) -> bool {
        self.template.ops[self.op_index].size == 0
    }

    fn invalidate(&mut self) {
        self.template = &ISA[Opcode::Invalid as usize];
        self.op_index = 0;
    }

    /// Returns the next macro-op to issue and its index.
    fn next_op(&mut self) -> (MacroOp, u8) {
        let index = self.op_index;
        self.op_index += 1;
        (self.template.ops[index], index as u8)
    }

    fn emit(&self) -> Instruction {
        Instruction {
            opcode: self.template.opcode,
            dst: self.dst,
            src: self.src,
            imm32: self.imm32,
            mod_byte: self.mod_byte,
            reciprocal: self.reciprocal,
        }
    }
}

#[derive(Default)]
struct GenContext {
    throwaway_count: u32,
    mul_count: u32,
    cycle: u32,
    dependency_cycle: u32,
    decode_cycle: u32,
    program_size: usize,
    ports_saturated: bool,
}

impl GenContext {
    fn done(&self) -> bool {
        self.ports_saturated
            || self.decode_cycle >= SUPERSCALAR_LATENCY
            || self.program_size >= SUPERSCALAR_MAX_PROGRAM_SIZE
    }

    fn advance(&mut self) {
        self.decode_cycle += 1;
        self.cycle += 1;
    }
}

type PortSchedule = [[bool; MAX_SCHEDULE_CYCLE]; 8];

/// Superscalar program generator over a Blake2b random stream.
pub struct Generator {
    rng: blake2b::Rng,
}

impl Generator {
    pub fn new(rng: blake2b::Rng) -> Self {
        Self { rng }
    }

    /// Generates the next program. Consecutive calls yield the program
    /// sequence used for the eight dataset cache accesses.
    pub fn generate(&mut self) -> Program {
        let mut prog = Program::default();
        let mut ports: Box<PortSchedule> = Box::new([[false; MAX_SCHEDULE_CYCLE]; 8]);
        let mut registers = [RegisterInfo::default(); REGISTER_COUNT];
        let mut asic = AsicContext::default();
        let mut instruction = Candidate::invalid();
        let mut ctx = GenContext::default();

        while !ctx.done() {
            // Each decode cycle decodes 16 bytes of simulated machine code.
            let buffer_idx =
                self.select_decode_buffer(instruction.opcode(), ctx.decode_cycle, ctx.mul_count);
            let buffer = &DECODE_BUFFERS[buffer_idx];

            let mut slot = 0;
            while slot < buffer.len() && buffer[slot] > 0 {
                let top_cycle = ctx.cycle;

                // Pick a fresh instruction once the previous one has issued
                // all of its macro-ops.
                if instruction.issued() {
                    if ctx.done() {
                        self.finish(&prog);
                        return prog;
                    }

                    let opcode = self.select_instruction_type(buffer_idx, slot);
                    instruction = self.instantiate(opcode);
                }

                let (op, op_index) = instruction.next_op();

                // Earliest cycle at which all uops of this macro-op can
                // execute.
                let (_, min_cycle) = schedule_op(&ports, &op, ctx.cycle, ctx.dependency_cycle);
                let Some(mut schedule_cycle) = min_cycle else {
                    self.finish(&prog);
                    return prog;
                };

                // If no register can become available within the look-ahead
                // window, the candidate is thrown away and the slot retried.
                if Some(op_index) == instruction.template.src_op
                    || op_index == instruction.template.dst_op
                {
                    let future_cycle = (schedule_cycle + MAX_OP_LATENCY - 1)
                        .min(MAX_SCHEDULE_CYCLE as u32 - 1);
                    let any_available = registers
                        .iter()
                        .any(|r| r.availability_cycle <= future_cycle);

                    if !any_available {
                        ctx.cycle += 4;
                        instruction.invalidate();

                        if ctx.throwaway_count < MAX_THROWAWAY_COUNT {
                            ctx.throwaway_count += 1;
                            // Retry the same buffer slot with a new draw.
                            continue;
                        }

                        // Give up on this decode buffer entirely.
                        break;
                    }
                }

                if Some(op_index) == instruction.template.src_op {
                    self.select_source(
                        &mut instruction,
                        &registers,
                        &mut ctx.cycle,
                        &mut schedule_cycle,
                    );
                }

                if op_index == instruction.template.dst_op {
                    self.select_destination(
                        &mut instruction,
                        &registers,
                        ctx.throwaway_count,
                        &mut ctx.cycle,
                        &mut schedule_cycle,
                    );
                }

                ctx.throwaway_count = 0;

                // Re-schedule with operand availability settled.
                let (schedule_ports, recalculated) =
                    schedule_op(&ports, &op, schedule_cycle, ctx.dependency_cycle);
                let Some(schedule_cycle) = recalculated else {
                    self.finish(&prog);
                    return prog;
                };

                ports[schedule_ports[0] as usize][schedule_cycle as usize] = true;
                ports[schedule_ports[1] as usize][schedule_cycle as usize] = true;

                ctx.dependency_cycle = schedule_cycle + u32::from(op.latency);

                if op_index == instruction.template.result_op {
                    let reg = &mut registers[instruction.dst as usize];
                    reg.availability_cycle = ctx.dependency_cycle;
                    reg.last_group = instruction.group();
                    reg.last_src_value = instruction.src_value;
                }

                ctx.cycle = top_cycle;
                ctx.ports_saturated |= schedule_cycle >= SUPERSCALAR_LATENCY;

                if instruction.issued() {
                    prog.instructions[ctx.program_size] = instruction.emit();
                    ctx.program_size += 1;
                    prog.size = ctx.program_size;

                    asic.update(&instruction);
                    prog.address_register = asic.max_latency_register;

                    ctx.mul_count += u32::from(instruction.opcode().is_multiplication());
                }

                slot += 1;
            }

            ctx.advance();
        }

        self.finish(&prog);
        prog
    }

    fn finish(&self, prog: &Program) {
        debug!(
            size = prog.size,
            address_register = prog.address_register,
            "superscalar program generated"
        );
    }

    /// Decode buffer selection (RandomX specification 6.3.1).
    fn select_decode_buffer(&mut self, last: Opcode, decode_cycle: u32, mul_count: u32) -> usize {
        // A 128-bit multiplication decodes to 2 uops; the fetch after it must
        // be the 3-3-10 configuration.
        if last == Opcode::ImulhR || last == Opcode::IsmulhR {
            return 5;
        }

        // Keep the multiplication port saturated: fall back to 4-4-4-4 while
        // multiplications lag behind decode cycles.
        if mul_count < decode_cycle + 1 {
            return 4;
        }

        // After IMUL_RCP the next buffer must begin with a 4-byte slot.
        if last == Opcode::ImulRcp {
            return if self.rng.u8() % 2 == 1 { 0 } else { 3 };
        }

        (self.rng.u8() % 4) as usize
    }

    /// Instruction selection for a decode buffer slot (RandomX 6.3.2).
    fn select_instruction_type(&mut self, buffer_idx: usize, slot: usize) -> Opcode {
        let buffer = &DECODE_BUFFERS[buffer_idx];
        let is_last = slot + 1 == buffer.len() || buffer[slot + 1] == 0;

        match buffer[slot] {
            // The multiplication variants only fit the final slot.
            3 if is_last => SLOT_3[(self.rng.u8() % 4) as usize],
            3 => SLOT_3[(self.rng.u8() % 2) as usize],
            4 => {
                // The 4-4-4-4 buffer issues multiplications in its first
                // three slots.
                if buffer_idx == 4 && !is_last {
                    Opcode::ImulR
                } else {
                    SLOT_4[(self.rng.u8() % 2) as usize]
                }
            }
            7 => SLOT_7[(self.rng.u8() % 2) as usize],
            8 => SLOT_8[(self.rng.u8() % 2) as usize],
            9 => SLOT_9[(self.rng.u8() % 2) as usize],
            10 => Opcode::ImulRcp,
            _ => unreachable!("decode buffers only contain slot sizes 3-10"),
        }
    }

    /// Operand initialization (RandomX table 6.1.1), with rejection sampling
    /// where certain draws are forbidden.
    fn instantiate(&mut self, opcode: Opcode) -> Candidate {
        let mut instruction = Candidate {
            template: &ISA[opcode as usize],
            op_index: 0,
            src: None,
            src_value: None,
            dst: 0,
            imm32: 0,
            mod_byte: 0,
            reciprocal: 0,
        };

        match opcode {
            Opcode::IsubR | Opcode::IxorR | Opcode::ImulR | Opcode::Invalid => {}
            Opcode::IaddRs => {
                instruction.mod_byte = self.rng.u8();
            }
            Opcode::IrorC => {
                instruction.imm32 = loop {
                    let imm = u32::from(self.rng.u8() % 64);
                    if imm != 0 {
                        break imm;
                    }
                };
            }
            Opcode::IaddC7
            | Opcode::IaddC8
            | Opcode::IaddC9
            | Opcode::IxorC7
            | Opcode::IxorC8
            | Opcode::IxorC9 => {
                instruction.imm32 = self.rng.u32();
            }
            Opcode::ImulhR | Opcode::IsmulhR => {
                // The reference draws a full 32-bit value here although a
                // register index would do; the raw value participates in
                // destination filtering whenever no source is found, so the
                // draw and its width are kept.
                instruction.src_value = Some(self.rng.u32());
            }
            Opcode::ImulRcp => {
                instruction.imm32 = loop {
                    let imm = self.rng.u32();
                    if imm != 0 && !imm.is_power_of_two() {
                        break imm;
                    }
                };
                instruction.reciprocal = reciprocal(instruction.imm32);
            }
        }

        instruction
    }

    /// Source register assignment (RandomX 6.3.4).
    fn select_source(
        &mut self,
        instruction: &mut Candidate,
        registers: &[RegisterInfo; REGISTER_COUNT],
        cycle: &mut u32,
        schedule_cycle: &mut u32,
    ) {
        let mut available = Vec::with_capacity(REGISTER_COUNT);

        let mut forward = 0;
        while instruction.src.is_none() && forward < MAX_OP_LATENCY {
            available.clear();
            for (i, reg) in registers.iter().enumerate() {
                if reg.availability_cycle <= *schedule_cycle + forward {
                    available.push(i as u8);
                }
            }

            if available.is_empty() {
                *cycle += 1;
                *schedule_cycle += 1;
                forward += 1;
                continue;
            }

            // If exactly two registers are open for IADD_RS and one is r5,
            // pick r5 as the source: it can never be the destination.
            if instruction.opcode() == Opcode::IaddRs
                && available.len() == 2
                && available.contains(&NEEDS_DISPLACEMENT)
            {
                instruction.src = Some(NEEDS_DISPLACEMENT);
                instruction.src_value = Some(u32::from(NEEDS_DISPLACEMENT));
                return;
            }

            let selected = self.select_register(&available);
            instruction.src = Some(selected);
            instruction.src_value = if instruction.template.src_register_as_src_value {
                Some(u32::from(selected))
            } else {
                None
            };
            forward += 1;
        }
    }

    /// Destination register assignment (RandomX 6.3.4).
    fn select_destination(
        &mut self,
        instruction: &mut Candidate,
        registers: &[RegisterInfo; REGISTER_COUNT],
        throwaway_count: u32,
        cycle: &mut u32,
        schedule_cycle: &mut u32,
    ) {
        let mut available = Vec::with_capacity(REGISTER_COUNT);

        for _forward in 0..MAX_OP_LATENCY {
            available.clear();

            for (i, reg) in registers.iter().enumerate() {
                let i = i as u8;

                if reg.availability_cycle > *schedule_cycle {
                    continue;
                }

                if instruction.opcode() == Opcode::IaddRs && i == NEEDS_DISPLACEMENT {
                    continue;
                }

                if Some(i) == instruction.src && !instruction.template.dst_register_as_src_register
                {
                    continue;
                }

                // The same (group, source value) pair must not repeat on a
                // register.
                if reg.last_group == instruction.group()
                    && reg.last_src_value == instruction.src_value
                {
                    continue;
                }

                // Back-to-back multiplications on one register need a
                // preceding throwaway.
                if throwaway_count == 0
                    && instruction.group() == Opcode::ImulR
                    && reg.last_group == Opcode::ImulR
                {
                    continue;
                }

                available.push(i);
            }

            if available.is_empty() {
                *cycle += 1;
                *schedule_cycle += 1;
                continue;
            }

            instruction.dst = self.select_register(&available);
            break;
        }
    }

    fn select_register(&mut self, available: &[u8]) -> u8 {
        if available.len() == 1 {
            available[0]
        } else {
            available[(self.rng.u32() as usize) % available.len()]
        }
    }
}

/// Finds up to two ports and the cycle a macro-op can be scheduled at
/// (RandomX 6.3.3). Fused 2-uop macro-ops require both uops to issue in the
/// same cycle on distinct compatible ports.
fn schedule_op(
    ports: &PortSchedule,
    op: &MacroOp,
    cycle: u32,
    dependency_cycle: u32,
) -> ([u8; 2], Option<u32>) {
    // Eliminated ops (register-renamed movs) occupy no port.
    if !op.requires_port() {
        return ([P_NONE, P_NONE], Some(cycle));
    }

    let mut schedule_cycle = if op.dependent {
        cycle.max(dependency_cycle)
    } else {
        cycle
    };

    if !op.fused() {
        let (port, found) = schedule_uop(ports, op.ports[0], schedule_cycle);
        return ([port, P_NONE], found);
    }

    while (schedule_cycle as usize) < MAX_SCHEDULE_CYCLE {
        let (port_a, cycle_a) = schedule_uop(ports, op.ports[0], schedule_cycle);
        let (port_b, cycle_b) = schedule_uop(ports, op.ports[1], schedule_cycle);

        if cycle_a != cycle_b || cycle_a.is_none() {
            schedule_cycle += 1;
            continue;
        }

        return ([port_a, port_b], cycle_a);
    }

    ([P_NONE, P_NONE], None)
}

/// Schedules a single uop, preferring P5 over P0 over P1 to keep the
/// multiplication port free.
fn schedule_uop(ports: &PortSchedule, uop_port: u8, cycle: u32) -> (u8, Option<u32>) {
    let mut schedule_cycle = cycle;

    while (schedule_cycle as usize) < MAX_SCHEDULE_CYCLE {
        for port in [P5, P0, P1] {
            if (port & uop_port) != 0 && !ports[port as usize][schedule_cycle as usize] {
                return (port, Some(schedule_cycle));
            }
        }
        schedule_cycle += 1;
    }

    (P_NONE, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator() -> Generator {
        Generator::new(blake2b::Rng::new(b"test key 000", 0))
    }

    #[test]
    fn first_program_shape() {
        let mut gen = generator();
        let prog = gen.generate();

        assert_eq!(prog.instructions[0].opcode, Opcode::ImulR);
        assert_eq!(prog.instructions[215].opcode, Opcode::IaddC7);
        assert_eq!(prog.instructions[446].opcode, Opcode::IsmulhR);
        assert_eq!(prog.instructions[447].opcode, Opcode::Invalid);
        assert_eq!(prog.size, 447);
        assert_eq!(prog.address_register, 4);
    }

    #[test]
    fn eighth_program_shape() {
        let mut gen = generator();
        let mut prog = gen.generate();
        for _ in 1..crate::params::CACHE_ACCESSES {
            prog = gen.generate();
        }

        assert_eq!(prog.instructions[0].opcode, Opcode::ImulR);
        assert_eq!(prog.instructions[177].opcode, Opcode::IsmulhR);
        assert_eq!(prog.instructions[436].opcode, Opcode::ImulRcp);
        assert_eq!(prog.instructions[437].opcode, Opcode::Invalid);
        assert_eq!(prog.address_register, 0);
    }

    #[test]
    fn trailing_slots_are_invalid() {
        let mut gen = generator();
        let prog = gen.generate();

        assert!(prog.size <= SUPERSCALAR_MAX_PROGRAM_SIZE);
        let invalid = prog
            .instructions
            .iter()
            .filter(|i| i.opcode == Opcode::Invalid)
            .count();
        assert_eq!(invalid, SUPERSCALAR_MAX_PROGRAM_SIZE - prog.size);
    }

    #[test]
    fn imul_rcp_immediates_are_valid() {
        let mut gen = generator();
        for _ in 0..crate::params::CACHE_ACCESSES {
            let prog = gen.generate();
            for instr in prog.instructions.iter().take(prog.size) {
                if instr.opcode == Opcode::ImulRcp {
                    assert_ne!(instr.imm32, 0);
                    assert!(!instr.imm32.is_power_of_two());
                    assert_ne!(instr.reciprocal, 0);
                }
            }
        }
    }
}
