//! Netlist-to-circuit compiler.
//!
//! Resolves node names to matrix indices, allocates the extra
//! branch-current variables demanded by voltage-defined devices, assigns
//! history slots to devices with per-step memory, and resolves mutual
//! couplings to the branch variables of the inductors they reference.
//!
//! # Variable layout
//!
//! Index 0 is ground. Indices 1..=n_nodes are node voltages in
//! first-reference order; indices n_nodes+1..=n_vars are branch currents
//! in declaration order (one for each `V`/`L`/`E`/`F`/`O`, two for `H`).
//! Mutual couplings borrow the branch indices of the inductors they name.

use std::collections::HashMap;

use crate::error::{Result, SimError};
use crate::ir::{
    BjtPolarity, ControlledKind, Element, GateKind, Method, MosPolarity, Netlist, SourceKind,
    Tran, Waveform,
};

/// Hard cap on total variables (node voltages + branch currents).
pub const MAX_VARIABLES: usize = 50;

/// MOSFET transconductance scale: Km = K0 * W / L.
const MOS_K0: f64 = 1e-4;

/// A compiled device with resolved indices.
#[derive(Debug, Clone)]
pub enum Device {
    Resistor {
        name: String,
        a: usize,
        b: usize,
        res: f64,
    },
    Capacitor {
        name: String,
        a: usize,
        b: usize,
        cap: f64,
        ic: f64,
        /// History slot: the trapezoidal companion voltage V*.
        state: usize,
    },
    Inductor {
        name: String,
        a: usize,
        b: usize,
        ind: f64,
        ic: f64,
        branch: usize,
    },
    NodalInductor {
        name: String,
        a: usize,
        b: usize,
        ind: f64,
        ic: f64,
        /// History slot: the companion current.
        state: usize,
    },
    Coupling {
        name: String,
        /// Mutual inductance k * sqrt(L1 * L2).
        m: f64,
        /// Borrowed branch variables of the coupled inductors.
        jx: usize,
        jy: usize,
        ic1: f64,
        ic2: f64,
    },
    Vccs {
        name: String,
        a: usize,
        b: usize,
        c: usize,
        d: usize,
        gm: f64,
    },
    Vcvs {
        name: String,
        a: usize,
        b: usize,
        c: usize,
        d: usize,
        gain: f64,
        branch: usize,
    },
    Cccs {
        name: String,
        a: usize,
        b: usize,
        c: usize,
        d: usize,
        gain: f64,
        /// The control branch current.
        branch: usize,
    },
    Ccvs {
        name: String,
        a: usize,
        b: usize,
        c: usize,
        d: usize,
        rm: f64,
        jx: usize,
        jy: usize,
    },
    CurrentSource {
        name: String,
        a: usize,
        b: usize,
        wave: Waveform,
    },
    VoltageSource {
        name: String,
        a: usize,
        b: usize,
        wave: Waveform,
        branch: usize,
    },
    OpAmp {
        name: String,
        a: usize,
        b: usize,
        c: usize,
        d: usize,
        branch: usize,
    },
    Diode {
        name: String,
        a: usize,
        b: usize,
    },
    Bjt {
        name: String,
        collector: usize,
        base: usize,
        emitter: usize,
        polarity: BjtPolarity,
    },
    Mosfet {
        name: String,
        drain: usize,
        gate: usize,
        source: usize,
        bulk: usize,
        polarity: MosPolarity,
        /// K0 * W / L.
        km: f64,
    },
    PwlResistor {
        name: String,
        a: usize,
        b: usize,
        points: [(f64, f64); 4],
    },
    Gate {
        name: String,
        kind: GateKind,
        a: usize,
        b: Option<usize>,
        out: usize,
        v: f64,
        r: f64,
        c: f64,
        gain: f64,
        /// First of one (NOT) or two input-capacitor history slots.
        state: usize,
    },
}

/// A compiled circuit, ready for simulation.
#[derive(Debug, Clone)]
pub struct Circuit {
    pub devices: Vec<Device>,
    /// Variable names; index 0 is ground, then nodes, then branch currents.
    pub names: Vec<String>,
    pub n_nodes: usize,
    pub n_vars: usize,
    /// True if any device requires Newton iteration.
    pub nonlinear: bool,
    /// Length of the history state vector.
    pub state_len: usize,
    pub tran: Tran,
}

fn is_ground(node: &str) -> bool {
    node == "0" || node.eq_ignore_ascii_case("gnd")
}

/// Node-name table, first-reference order. Index 0 is ground.
struct NodeTable {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl NodeTable {
    fn new() -> Self {
        NodeTable {
            names: vec!["0".to_string()],
            index: HashMap::new(),
        }
    }

    fn resolve(&mut self, node: &str) -> usize {
        if is_ground(node) {
            return 0;
        }
        if let Some(&idx) = self.index.get(node) {
            return idx;
        }
        let idx = self.names.len();
        self.names.push(node.to_string());
        self.index.insert(node.to_string(), idx);
        idx
    }
}

/// Compile a parsed netlist into a simulation-ready circuit.
pub fn compile(netlist: &Netlist) -> Result<Circuit> {
    let tran = netlist
        .tran
        .ok_or_else(|| SimError::Parse("netlist has no .TRAN command".into()))?;

    if netlist.node_bound > MAX_VARIABLES {
        return Err(SimError::TooManyVariables {
            limit: MAX_VARIABLES,
        });
    }

    // Pass 1: resolve every node reference so node variables come first.
    let mut nodes = NodeTable::new();
    for element in &netlist.elements {
        match element {
            Element::Resistor { nodes: (a, b), .. }
            | Element::Capacitor { nodes: (a, b), .. }
            | Element::Inductor { nodes: (a, b), .. }
            | Element::NodalInductor { nodes: (a, b), .. }
            | Element::Diode { nodes: (a, b), .. }
            | Element::PwlResistor { nodes: (a, b), .. }
            | Element::Source { nodes: (a, b), .. } => {
                nodes.resolve(a);
                nodes.resolve(b);
            }
            Element::Controlled { out, ctrl, .. } => {
                nodes.resolve(&out.0);
                nodes.resolve(&out.1);
                nodes.resolve(&ctrl.0);
                nodes.resolve(&ctrl.1);
            }
            Element::OpAmp { out, inp, .. } => {
                nodes.resolve(&out.0);
                nodes.resolve(&out.1);
                nodes.resolve(&inp.0);
                nodes.resolve(&inp.1);
            }
            Element::Bjt { nodes: n, .. } => {
                for node in n {
                    nodes.resolve(node);
                }
            }
            Element::Mosfet { nodes: n, .. } => {
                for node in n {
                    nodes.resolve(node);
                }
            }
            Element::Gate {
                input_a,
                input_b,
                output,
                ..
            } => {
                nodes.resolve(input_a);
                if let Some(b) = input_b {
                    nodes.resolve(b);
                }
                nodes.resolve(output);
            }
            Element::Coupling { .. } => {}
        }
    }

    let n_nodes = nodes.names.len() - 1;
    if n_nodes > netlist.node_bound {
        return Err(SimError::Parse(format!(
            "netlist declares {} nodes but uses {}",
            netlist.node_bound, n_nodes
        )));
    }

    // Pass 2: build devices, allocating branch currents and history slots.
    let mut names = nodes.names.clone();
    let mut n_vars = n_nodes;
    let mut state_len = 0usize;
    let mut nonlinear = false;
    let mut devices = Vec::with_capacity(netlist.elements.len());
    // Branch index, inductance and IC of each declared `L`, for couplings.
    let mut inductors: HashMap<String, (usize, f64, f64)> = HashMap::new();

    let allocate = |names: &mut Vec<String>, n_vars: &mut usize, label: String| -> Result<usize> {
        *n_vars += 1;
        if *n_vars > MAX_VARIABLES {
            return Err(SimError::TooManyVariables {
                limit: MAX_VARIABLES,
            });
        }
        names.push(label);
        Ok(*n_vars)
    };

    for element in &netlist.elements {
        let device = match element {
            Element::Resistor { name, nodes: n, value } => Device::Resistor {
                name: name.clone(),
                a: nodes.resolve(&n.0),
                b: nodes.resolve(&n.1),
                res: *value,
            },
            Element::Capacitor {
                name,
                nodes: n,
                value,
                ic,
            } => {
                let state = state_len;
                state_len += 1;
                Device::Capacitor {
                    name: name.clone(),
                    a: nodes.resolve(&n.0),
                    b: nodes.resolve(&n.1),
                    cap: *value,
                    ic: *ic,
                    state,
                }
            }
            Element::Inductor {
                name,
                nodes: n,
                value,
                ic,
            } => {
                let branch = allocate(&mut names, &mut n_vars, format!("j{}", name))?;
                inductors.insert(name.clone(), (branch, *value, *ic));
                Device::Inductor {
                    name: name.clone(),
                    a: nodes.resolve(&n.0),
                    b: nodes.resolve(&n.1),
                    ind: *value,
                    ic: *ic,
                    branch,
                }
            }
            Element::NodalInductor {
                name,
                nodes: n,
                value,
                ic,
            } => {
                let state = state_len;
                state_len += 1;
                Device::NodalInductor {
                    name: name.clone(),
                    a: nodes.resolve(&n.0),
                    b: nodes.resolve(&n.1),
                    ind: *value,
                    ic: *ic,
                    state,
                }
            }
            Element::Coupling { name, l1, l2, k } => {
                if tran.method == Method::Fe {
                    return Err(SimError::Unsupported(
                        "mutual coupling is not available with the FE method".into(),
                    ));
                }
                let &(jx, ind1, ic1) = inductors.get(l1).ok_or_else(|| {
                    SimError::CouplingReferencesUnknownInductor { name: name.clone() }
                })?;
                let &(jy, ind2, ic2) = inductors.get(l2).ok_or_else(|| {
                    SimError::CouplingReferencesUnknownInductor { name: name.clone() }
                })?;
                Device::Coupling {
                    name: name.clone(),
                    m: k * (ind1 * ind2).sqrt(),
                    jx,
                    jy,
                    ic1,
                    ic2,
                }
            }
            Element::Controlled {
                name,
                kind,
                out,
                ctrl,
                gain,
            } => {
                let (a, b) = (nodes.resolve(&out.0), nodes.resolve(&out.1));
                let (c, d) = (nodes.resolve(&ctrl.0), nodes.resolve(&ctrl.1));
                match kind {
                    ControlledKind::Vccs => Device::Vccs {
                        name: name.clone(),
                        a,
                        b,
                        c,
                        d,
                        gm: *gain,
                    },
                    ControlledKind::Vcvs => Device::Vcvs {
                        name: name.clone(),
                        a,
                        b,
                        c,
                        d,
                        gain: *gain,
                        branch: allocate(&mut names, &mut n_vars, format!("j{}", name))?,
                    },
                    ControlledKind::Cccs => Device::Cccs {
                        name: name.clone(),
                        a,
                        b,
                        c,
                        d,
                        gain: *gain,
                        branch: allocate(&mut names, &mut n_vars, format!("j{}", name))?,
                    },
                    ControlledKind::Ccvs => {
                        let jx = allocate(&mut names, &mut n_vars, format!("jx{}", name))?;
                        let jy = allocate(&mut names, &mut n_vars, format!("jy{}", name))?;
                        Device::Ccvs {
                            name: name.clone(),
                            a,
                            b,
                            c,
                            d,
                            rm: *gain,
                            jx,
                            jy,
                        }
                    }
                }
            }
            Element::Source {
                name,
                kind,
                nodes: n,
                wave,
            } => {
                let a = nodes.resolve(&n.0);
                let b = nodes.resolve(&n.1);
                match kind {
                    SourceKind::Current => Device::CurrentSource {
                        name: name.clone(),
                        a,
                        b,
                        wave: wave.clone(),
                    },
                    SourceKind::Voltage => Device::VoltageSource {
                        name: name.clone(),
                        a,
                        b,
                        wave: wave.clone(),
                        branch: allocate(&mut names, &mut n_vars, format!("j{}", name))?,
                    },
                }
            }
            Element::OpAmp { name, out, inp } => Device::OpAmp {
                name: name.clone(),
                a: nodes.resolve(&out.0),
                b: nodes.resolve(&out.1),
                c: nodes.resolve(&inp.0),
                d: nodes.resolve(&inp.1),
                branch: allocate(&mut names, &mut n_vars, format!("j{}", name))?,
            },
            Element::Diode { name, nodes: n } => {
                nonlinear = true;
                Device::Diode {
                    name: name.clone(),
                    a: nodes.resolve(&n.0),
                    b: nodes.resolve(&n.1),
                }
            }
            Element::Bjt {
                name,
                nodes: n,
                polarity,
            } => {
                nonlinear = true;
                Device::Bjt {
                    name: name.clone(),
                    collector: nodes.resolve(&n[0]),
                    base: nodes.resolve(&n[1]),
                    emitter: nodes.resolve(&n[2]),
                    polarity: *polarity,
                }
            }
            Element::Mosfet {
                name,
                nodes: n,
                polarity,
                l,
                w,
            } => {
                nonlinear = true;
                Device::Mosfet {
                    name: name.clone(),
                    drain: nodes.resolve(&n[0]),
                    gate: nodes.resolve(&n[1]),
                    source: nodes.resolve(&n[2]),
                    bulk: nodes.resolve(&n[3]),
                    polarity: *polarity,
                    km: MOS_K0 * w / l,
                }
            }
            Element::PwlResistor {
                name,
                nodes: n,
                points,
            } => {
                nonlinear = true;
                Device::PwlResistor {
                    name: name.clone(),
                    a: nodes.resolve(&n.0),
                    b: nodes.resolve(&n.1),
                    points: *points,
                }
            }
            Element::Gate {
                name,
                kind,
                input_a,
                input_b,
                output,
                v,
                r,
                c,
                a,
            } => {
                nonlinear = true;
                let state = state_len;
                state_len += if input_b.is_some() { 2 } else { 1 };
                Device::Gate {
                    name: name.clone(),
                    kind: *kind,
                    a: nodes.resolve(input_a),
                    b: input_b.as_ref().map(|n| nodes.resolve(n)),
                    out: nodes.resolve(output),
                    v: *v,
                    r: *r,
                    c: *c,
                    gain: *a,
                    state,
                }
            }
        };
        devices.push(device);
    }

    Ok(Circuit {
        devices,
        names,
        n_nodes,
        n_vars,
        nonlinear,
        state_len,
        tran,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;

    fn compiled(netlist: &str) -> Circuit {
        compile(&parser::parse(netlist).unwrap()).unwrap()
    }

    const TRAN: &str = ".TRAN 1e-3 10 BE 1\n";

    #[test]
    fn test_node_indices_first_reference_order() {
        let circuit = compiled(&format!("3\nR1 in out 1k\nR2 out 0 1k\nR3 x in 1k\n{}", TRAN));
        assert_eq!(circuit.names, vec!["0", "in", "out", "x"]);
        assert_eq!(circuit.n_nodes, 3);
        assert_eq!(circuit.n_vars, 3);
    }

    #[test]
    fn test_ground_aliases() {
        let circuit = compiled(&format!("2\nR1 1 gnd 1k\nR2 1 GND 1k\nR3 1 0 1k\n{}", TRAN));
        assert_eq!(circuit.n_nodes, 1);
        match &circuit.devices[0] {
            Device::Resistor { b, .. } => assert_eq!(*b, 0),
            other => panic!("expected Resistor, got {:?}", other),
        }
    }

    #[test]
    fn test_branch_allocation_order() {
        let circuit = compiled(&format!(
            "3\nV1 1 0 DC 5\nR1 1 2 1k\nL1 2 3 1m\nE1 3 0 1 2 2\n{}",
            TRAN
        ));
        // Nodes 1..=3, then jV1=4, jL1=5, jE1=6.
        assert_eq!(circuit.n_nodes, 3);
        assert_eq!(circuit.n_vars, 6);
        assert_eq!(
            circuit.names,
            vec!["0", "1", "2", "3", "jV1", "jL1", "jE1"]
        );
        match &circuit.devices[0] {
            Device::VoltageSource { branch, .. } => assert_eq!(*branch, 4),
            other => panic!("expected VoltageSource, got {:?}", other),
        }
        match &circuit.devices[2] {
            Device::Inductor { branch, .. } => assert_eq!(*branch, 5),
            other => panic!("expected Inductor, got {:?}", other),
        }
    }

    #[test]
    fn test_ccvs_two_branches() {
        let circuit = compiled(&format!("2\nH1 1 0 2 0 50\n{}", TRAN));
        assert_eq!(circuit.names[3], "jxH1");
        assert_eq!(circuit.names[4], "jyH1");
        match &circuit.devices[0] {
            Device::Ccvs { jx, jy, rm, .. } => {
                assert_eq!(*jx, 3);
                assert_eq!(*jy, 4);
                assert_eq!(*rm, 50.0);
            }
            other => panic!("expected Ccvs, got {:?}", other),
        }
    }

    #[test]
    fn test_coupling_borrows_branches() {
        let circuit = compiled(&format!(
            "2\nL1 1 0 1m IC=0.5\nL2 2 0 4m\nK1 L1 L2 0.5\n{}",
            TRAN
        ));
        match &circuit.devices[2] {
            Device::Coupling { m, jx, jy, ic1, ic2, .. } => {
                // M = 0.5 * sqrt(1m * 4m) = 1m
                assert!((m - 1e-3).abs() < 1e-12);
                assert_eq!(*jx, 3);
                assert_eq!(*jy, 4);
                assert_eq!(*ic1, 0.5);
                assert_eq!(*ic2, 0.0);
            }
            other => panic!("expected Coupling, got {:?}", other),
        }
    }

    #[test]
    fn test_coupling_unknown_inductor() {
        let netlist = parser::parse(&format!("2\nL1 1 0 1m\nK1 L1 L9 0.5\n{}", TRAN)).unwrap();
        match compile(&netlist) {
            Err(SimError::CouplingReferencesUnknownInductor { name }) => assert_eq!(name, "K1"),
            other => panic!("expected coupling error, got {:?}", other),
        }
    }

    #[test]
    fn test_coupling_rejected_under_fe() {
        let netlist =
            parser::parse("2\nL1 1 0 1m\nL2 2 0 1m\nK1 L1 L2 0.5\n.TRAN 1e-3 10 FE 1").unwrap();
        assert!(matches!(compile(&netlist), Err(SimError::Unsupported(_))));
    }

    #[test]
    fn test_state_slot_allocation() {
        let circuit = compiled(&format!(
            "3\nC1 1 0 1u\nX1 1 2 1m\nC2 2 0 1u\n>g1 2 3 5 100 1p 10\n{}",
            TRAN
        ));
        let mut slots = Vec::new();
        for device in &circuit.devices {
            match device {
                Device::Capacitor { state, .. }
                | Device::NodalInductor { state, .. }
                | Device::Gate { state, .. } => slots.push(*state),
                _ => {}
            }
        }
        assert_eq!(slots, vec![0, 1, 2, 3]);
        assert_eq!(circuit.state_len, 4);
    }

    #[test]
    fn test_two_input_gate_takes_two_slots() {
        let circuit = compiled(&format!("3\n)g1 1 2 3 5 100 1p 10\n{}", TRAN));
        assert_eq!(circuit.state_len, 2);
    }

    #[test]
    fn test_nonlinear_detection() {
        assert!(!compiled(&format!("2\nR1 1 0 1k\nC1 1 0 1u\n{}", TRAN)).nonlinear);
        assert!(compiled(&format!("2\nD1 1 0\n{}", TRAN)).nonlinear);
        assert!(compiled(&format!("2\nN1 1 0 -2 1 -1 0.5 1 -0.5 2 -1\n{}", TRAN)).nonlinear);
    }

    #[test]
    fn test_mosfet_km() {
        let circuit = compiled(&format!("4\nM1 1 2 3 0 NMOS L=2u W=20u\n{}", TRAN));
        match &circuit.devices[0] {
            Device::Mosfet { km, .. } => assert!((km - 1e-3).abs() < 1e-12),
            other => panic!("expected Mosfet, got {:?}", other),
        }
    }

    #[test]
    fn test_too_many_variables() {
        let mut netlist = String::from("60\n");
        for i in 1..=60 {
            netlist.push_str(&format!("R{} {} 0 1k\n", i, i));
        }
        netlist.push_str(TRAN);
        let parsed = parser::parse(&netlist).unwrap();
        assert!(matches!(
            compile(&parsed),
            Err(SimError::TooManyVariables { .. })
        ));
    }

    #[test]
    fn test_node_count_over_declared() {
        let parsed = parser::parse(&format!("1\nR1 1 2 1k\n{}", TRAN)).unwrap();
        assert!(compile(&parsed).is_err());
    }

    #[test]
    fn test_missing_tran() {
        let parsed = parser::parse("2\nR1 1 0 1k").unwrap();
        assert!(compile(&parsed).is_err());
    }
}
