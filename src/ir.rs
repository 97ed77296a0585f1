//! Circuit intermediate representation.
//!
//! The parser produces a `Netlist` of elements with string node ids and a
//! `.TRAN` command. The compiler resolves names to matrix indices and
//! allocates the extra branch-current variables.

/// Node identifier as written in the netlist (e.g., "0", "3", "gnd", "out").
/// Ground is "0" or "gnd" (any case) — the compiler maps these to index 0.
pub type NodeId = String;

/// Integration method for the reactive companion models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Backward Euler.
    Be,
    /// Forward Euler (inductors only; capacitors fall back to BE).
    Fe,
    /// Trapezoidal rule.
    Tr,
}

/// Kind of a controlled (dependent) source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlledKind {
    /// VCCS `G`: transconductance.
    Vccs,
    /// VCVS `E`: voltage gain, one branch current.
    Vcvs,
    /// CCCS `F`: current gain, one branch current (the control branch).
    Cccs,
    /// CCVS `H`: transresistance, two branch currents.
    Ccvs,
}

/// Which rail an independent source drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Current,
    Voltage,
}

/// BJT polarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BjtPolarity {
    Npn,
    Pnp,
}

/// MOSFET channel type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MosPolarity {
    Nmos,
    Pmos,
}

/// Logic gate family. The netlist spells these as single characters:
/// `>` NOT, `)` AND, `(` NAND, `}` OR, `{` NOR, `]` XOR, `[` XNOR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateKind {
    Not,
    And,
    Nand,
    Or,
    Nor,
    Xor,
    Xnor,
}

/// Time-dependent value of an independent source.
#[derive(Debug, Clone, PartialEq)]
pub enum Waveform {
    Dc(f64),
    /// `SIN (dc amp freq [delay atten phase ncycles])`, phase in degrees.
    Sin {
        dc: f64,
        amp: f64,
        freq: f64,
        delay: f64,
        atten: f64,
        phase: f64,
        cycles: f64,
    },
    /// `PULSE (a1 a2 delay tr tf ton period ncycles)`.
    Pulse {
        a1: f64,
        a2: f64,
        delay: f64,
        tr: f64,
        tf: f64,
        ton: f64,
        period: f64,
        cycles: f64,
    },
}

/// A circuit element parsed from the netlist.
#[derive(Debug, Clone)]
pub enum Element {
    Resistor {
        name: String,
        nodes: (NodeId, NodeId),
        value: f64,
    },
    Capacitor {
        name: String,
        nodes: (NodeId, NodeId),
        value: f64,
        /// Initial voltage across the element.
        ic: f64,
    },
    /// Inductor in branch-current form (`L`): owns one extra variable.
    Inductor {
        name: String,
        nodes: (NodeId, NodeId),
        value: f64,
        /// Initial branch current.
        ic: f64,
    },
    /// Inductor in nodal-companion form (`X`): no extra variable, keeps a
    /// history current instead.
    NodalInductor {
        name: String,
        nodes: (NodeId, NodeId),
        value: f64,
        ic: f64,
    },
    /// Mutual coupling between two already-declared `L` inductors.
    Coupling {
        name: String,
        l1: String,
        l2: String,
        k: f64,
    },
    Controlled {
        name: String,
        kind: ControlledKind,
        out: (NodeId, NodeId),
        ctrl: (NodeId, NodeId),
        gain: f64,
    },
    Source {
        name: String,
        kind: SourceKind,
        nodes: (NodeId, NodeId),
        wave: Waveform,
    },
    /// Ideal opamp: output pair and input pair, one branch current.
    OpAmp {
        name: String,
        out: (NodeId, NodeId),
        inp: (NodeId, NodeId),
    },
    Diode {
        name: String,
        nodes: (NodeId, NodeId),
    },
    /// BJT: [collector, base, emitter].
    Bjt {
        name: String,
        nodes: [NodeId; 3],
        polarity: BjtPolarity,
    },
    /// MOSFET: [drain, gate, source, bulk].
    Mosfet {
        name: String,
        nodes: [NodeId; 4],
        polarity: MosPolarity,
        l: f64,
        w: f64,
    },
    /// Piecewise-linear resistor: four (V, I) breakpoints, three segments.
    PwlResistor {
        name: String,
        nodes: (NodeId, NodeId),
        points: [(f64, f64); 4],
    },
    Gate {
        name: String,
        kind: GateKind,
        input_a: NodeId,
        /// Absent for NOT.
        input_b: Option<NodeId>,
        output: NodeId,
        /// Maximum output voltage.
        v: f64,
        /// Output resistance.
        r: f64,
        /// Input capacitance per input.
        c: f64,
        /// Open-circuit transfer slope magnitude.
        a: f64,
    },
}

impl Element {
    pub fn name(&self) -> &str {
        match self {
            Element::Resistor { name, .. }
            | Element::Capacitor { name, .. }
            | Element::Inductor { name, .. }
            | Element::NodalInductor { name, .. }
            | Element::Coupling { name, .. }
            | Element::Controlled { name, .. }
            | Element::Source { name, .. }
            | Element::OpAmp { name, .. }
            | Element::Diode { name, .. }
            | Element::Bjt { name, .. }
            | Element::Mosfet { name, .. }
            | Element::PwlResistor { name, .. }
            | Element::Gate { name, .. } => name,
        }
    }
}

/// The `.TRAN` command.
#[derive(Debug, Clone, Copy)]
pub struct Tran {
    /// Total simulated time.
    pub t_total: f64,
    /// Output intervals in the trace.
    pub n_points: f64,
    /// Integration steps per output interval.
    pub n_substeps: u64,
    pub method: Method,
    pub uic: bool,
}

/// A parsed netlist: declared node bound, elements, analysis command.
#[derive(Debug, Clone)]
pub struct Netlist {
    /// Node count upper bound from the first line.
    pub node_bound: usize,
    pub elements: Vec<Element>,
    pub tran: Option<Tran>,
}
