//! Netlist parser.
//!
//! Parses the free-form, whitespace-separated netlist format into the
//! circuit IR.
//!
//! # Supported syntax
//!
//! ```text
//! <count>                               (first line: node count upper bound)
//! Rname n1 n2 value
//! Cname n1 n2 value [IC=v0]
//! Lname n1 n2 value [IC=i0]             (branch-current inductor)
//! Xname n1 n2 value [IC=i0]             (nodal-companion inductor)
//! Kname Lname1 Lname2 k
//! E|F|G|Hname n1 n2 nc1 nc2 gain
//! I|Vname n1 n2 DC value
//! I|Vname n1 n2 SIN (dc amp freq [delay atten phase ncycles])
//! I|Vname n1 n2 PULSE (a1 a2 delay [tr tf ton period ncycles])
//! Oname nout+ nout- nin+ nin-
//! Dname n1 n2
//! Mname nd ng ns nb NMOS|PMOS L=x W=x
//! Qname nc nb ne NPN|PNP
//! Nname n1 n2 V1 I1 V2 I2 V3 I3 V4 I4
//! >name nA nout V R C A                 (NOT; ) ( } { ] [ are the two-input gates)
//! .TRAN t_total n_points BE|FE|TR n_substeps [UIC]
//! * comment
//! ```
//!
//! Values support engineering suffixes: T, G, MEG, K, M, U, N, P, F
//! (case-insensitive). Dot lines other than `.TRAN` are ignored.

use nom::branch::alt;
use nom::bytes::complete::tag_no_case;
use nom::combinator::{map, opt};
use nom::number::complete::double;
use nom::IResult;
use nom::Parser;

use crate::error::{Result, SimError};
use crate::ir::{
    BjtPolarity, ControlledKind, Element, GateKind, Method, MosPolarity, Netlist, SourceKind,
    Tran, Waveform,
};

/// Parse a netlist string into the circuit IR.
pub fn parse(input: &str) -> Result<Netlist> {
    let mut lines = input.lines().enumerate();

    // First significant line: declared node count upper bound.
    let node_bound = loop {
        let (line_num, raw_line) = lines
            .next()
            .ok_or_else(|| SimError::Parse("empty netlist".into()))?;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('*') {
            continue;
        }
        let token = line.split_whitespace().next().unwrap_or_default();
        break token
            .parse::<usize>()
            .map_err(|_| parse_err(line_num, raw_line, "expected node count on the first line"))?;
    };

    let mut elements = Vec::new();
    let mut tran = None;

    for (line_num, raw_line) in lines {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('*') {
            continue;
        }

        let first = line.chars().next().unwrap();
        let parsed = match first.to_ascii_uppercase() {
            'R' => parse_resistor(line),
            'C' | 'L' | 'X' => parse_reactive(line, first.to_ascii_uppercase()),
            'K' => parse_coupling(line),
            'E' | 'F' | 'G' | 'H' => parse_controlled(line, first.to_ascii_uppercase()),
            'I' | 'V' => parse_source(line, first.to_ascii_uppercase()),
            'O' => parse_opamp(line),
            'D' => parse_diode(line),
            'M' => parse_mosfet(line),
            'Q' => parse_bjt(line),
            'N' => parse_pwl(line),
            '>' | ')' | '(' | '}' | '{' | ']' | '[' => parse_gate(line, first),
            '.' => {
                let keyword = line.split_whitespace().next().unwrap_or_default();
                if keyword.eq_ignore_ascii_case(".TRAN") {
                    tran = Some(
                        parse_tran(line).map_err(|e| parse_err(line_num, raw_line, &e))?,
                    );
                }
                continue;
            }
            _ => {
                let token = line.split_whitespace().next().unwrap_or_default();
                return Err(SimError::UnknownDevice {
                    token: token.to_string(),
                });
            }
        };
        elements.push(parsed.map_err(|e| parse_err(line_num, raw_line, &e))?);
    }

    Ok(Netlist {
        node_bound,
        elements,
        tran,
    })
}

fn parse_err(line_num: usize, raw_line: &str, detail: &str) -> SimError {
    SimError::Parse(format!("line {}: {} in: {}", line_num + 1, detail, raw_line))
}

// ---------------------------------------------------------------------------
// Engineering suffix value parser
// ---------------------------------------------------------------------------

/// Parse a numeric value with optional engineering suffix.
/// Handles: 10k, 100n, 4.7u, 1MEG, 1e3, -3.3, etc.
fn eng_value(input: &str) -> IResult<&str, f64> {
    let (rest, num) = double(input)?;
    let (rest, suffix) = opt(eng_suffix).parse(rest)?;
    Ok((rest, num * suffix.unwrap_or(1.0)))
}

/// Match an engineering suffix and return its multiplier.
fn eng_suffix(input: &str) -> IResult<&str, f64> {
    // Order matters: MEG must come before M
    alt((
        map(tag_no_case("MEG"), |_: &str| 1e6),
        map(tag_no_case("T"), |_: &str| 1e12),
        map(tag_no_case("G"), |_: &str| 1e9),
        map(tag_no_case("K"), |_: &str| 1e3),
        map(tag_no_case("M"), |_: &str| 1e-3),
        map(tag_no_case("U"), |_: &str| 1e-6),
        map(tag_no_case("N"), |_: &str| 1e-9),
        map(tag_no_case("P"), |_: &str| 1e-12),
        map(tag_no_case("F"), |_: &str| 1e-15),
    ))
    .parse(input)
}

// ---------------------------------------------------------------------------
// Token stream over one line
// ---------------------------------------------------------------------------

/// Whitespace token cursor over a single netlist line.
struct Tokens<'a> {
    iter: std::str::SplitWhitespace<'a>,
}

impl<'a> Tokens<'a> {
    /// Split off the element name (the first token) and return the cursor
    /// over the remaining tokens.
    fn new(line: &'a str) -> (String, Self) {
        let mut iter = line.split_whitespace();
        let name = iter.next().unwrap_or_default().to_string();
        (name, Tokens { iter })
    }

    /// Next token, skipping free-standing source-list parentheses.
    fn next(&mut self) -> Option<&'a str> {
        for token in self.iter.by_ref() {
            if !token.chars().all(|c| c == '(' || c == ')') {
                return Some(token);
            }
        }
        None
    }

    fn node(&mut self, what: &str) -> std::result::Result<String, String> {
        self.next()
            .map(str::to_string)
            .ok_or_else(|| format!("missing {} node", what))
    }

    fn word(&mut self, what: &str) -> std::result::Result<&'a str, String> {
        self.next().ok_or_else(|| format!("missing {}", what))
    }

    fn value(&mut self, what: &str) -> std::result::Result<f64, String> {
        let token = self.next().ok_or_else(|| format!("missing {}", what))?;
        num(token).ok_or_else(|| format!("bad {} value: {}", what, token))
    }

    /// Next token as a number if present, else the default.
    fn value_or(&mut self, default: f64) -> std::result::Result<f64, String> {
        match self.next() {
            Some(token) => num(token).ok_or_else(|| format!("bad value: {}", token)),
            None => Ok(default),
        }
    }
}

/// Numeric token, tolerating surrounding source-list parentheses.
fn num(token: &str) -> Option<f64> {
    let trimmed = token.trim_matches(|c| c == '(' || c == ')');
    if trimmed.is_empty() {
        return None;
    }
    eng_value(trimmed).ok().map(|(_, v)| v)
}

/// Optional trailing `IC=<value>` token.
fn initial_condition(tokens: &mut Tokens) -> std::result::Result<f64, String> {
    match tokens.next() {
        None => Ok(0.0),
        Some(token) => {
            let upper = token.get(..3).unwrap_or_default().to_ascii_uppercase();
            if upper != "IC=" {
                return Err(format!("expected IC=<value>, got {}", token));
            }
            num(&token[3..]).ok_or_else(|| format!("bad IC value: {}", token))
        }
    }
}

// ---------------------------------------------------------------------------
// Element line parsers
// ---------------------------------------------------------------------------

fn parse_resistor(line: &str) -> std::result::Result<Element, String> {
    let (name, mut t) = Tokens::new(line);
    Ok(Element::Resistor {
        name,
        nodes: (t.node("first")?, t.node("second")?),
        value: t.value("resistance")?,
    })
}

fn parse_reactive(line: &str, kind: char) -> std::result::Result<Element, String> {
    let (name, mut t) = Tokens::new(line);
    let nodes = (t.node("first")?, t.node("second")?);
    let value = t.value("element")?;
    let ic = initial_condition(&mut t)?;
    Ok(match kind {
        'C' => Element::Capacitor {
            name,
            nodes,
            value,
            ic,
        },
        'L' => Element::Inductor {
            name,
            nodes,
            value,
            ic,
        },
        _ => Element::NodalInductor {
            name,
            nodes,
            value,
            ic,
        },
    })
}

fn parse_coupling(line: &str) -> std::result::Result<Element, String> {
    let (name, mut t) = Tokens::new(line);
    Ok(Element::Coupling {
        name,
        l1: t.word("first inductor name")?.to_string(),
        l2: t.word("second inductor name")?.to_string(),
        k: t.value("coupling coefficient")?,
    })
}

fn parse_controlled(line: &str, kind: char) -> std::result::Result<Element, String> {
    let (name, mut t) = Tokens::new(line);
    let kind = match kind {
        'G' => ControlledKind::Vccs,
        'E' => ControlledKind::Vcvs,
        'F' => ControlledKind::Cccs,
        _ => ControlledKind::Ccvs,
    };
    Ok(Element::Controlled {
        name,
        kind,
        out: (t.node("output+")?, t.node("output-")?),
        ctrl: (t.node("control+")?, t.node("control-")?),
        gain: t.value("gain")?,
    })
}

fn parse_source(line: &str, kind: char) -> std::result::Result<Element, String> {
    let (name, mut t) = Tokens::new(line);
    let kind = if kind == 'V' {
        SourceKind::Voltage
    } else {
        SourceKind::Current
    };
    let nodes = (t.node("first")?, t.node("second")?);
    let shape = t.word("source type")?;

    let wave = if shape.eq_ignore_ascii_case("DC") {
        Waveform::Dc(t.value("DC")?)
    } else if shape.eq_ignore_ascii_case("SIN") {
        Waveform::Sin {
            dc: t.value("SIN dc level")?,
            amp: t.value("SIN amplitude")?,
            freq: t.value("SIN frequency")?,
            delay: t.value_or(0.0)?,
            atten: t.value_or(0.0)?,
            phase: t.value_or(0.0)?,
            cycles: t.value_or(f64::INFINITY)?,
        }
    } else if shape.eq_ignore_ascii_case("PULSE") {
        Waveform::Pulse {
            a1: t.value("PULSE first amplitude")?,
            a2: t.value("PULSE second amplitude")?,
            delay: t.value("PULSE delay")?,
            tr: t.value_or(0.0)?,
            tf: t.value_or(0.0)?,
            ton: t.value_or(f64::INFINITY)?,
            period: t.value_or(f64::INFINITY)?,
            cycles: t.value_or(f64::INFINITY)?,
        }
    } else {
        return Err(format!("unknown source type: {}", shape));
    };

    Ok(Element::Source {
        name,
        kind,
        nodes,
        wave,
    })
}

fn parse_opamp(line: &str) -> std::result::Result<Element, String> {
    let (name, mut t) = Tokens::new(line);
    Ok(Element::OpAmp {
        name,
        out: (t.node("output+")?, t.node("output-")?),
        inp: (t.node("input+")?, t.node("input-")?),
    })
}

fn parse_diode(line: &str) -> std::result::Result<Element, String> {
    let (name, mut t) = Tokens::new(line);
    Ok(Element::Diode {
        name,
        nodes: (t.node("anode")?, t.node("cathode")?),
    })
}

fn parse_mosfet(line: &str) -> std::result::Result<Element, String> {
    let (name, mut t) = Tokens::new(line);
    let nodes = [
        t.node("drain")?,
        t.node("gate")?,
        t.node("source")?,
        t.node("bulk")?,
    ];
    let kind = t.word("channel type")?;
    let polarity = if kind.eq_ignore_ascii_case("NMOS") {
        MosPolarity::Nmos
    } else if kind.eq_ignore_ascii_case("PMOS") {
        MosPolarity::Pmos
    } else {
        return Err(format!("bad channel type: {}", kind));
    };
    let l = keyed_value(&mut t, "L")?;
    let w = keyed_value(&mut t, "W")?;
    Ok(Element::Mosfet {
        name,
        nodes,
        polarity,
        l,
        w,
    })
}

/// `KEY=<value>` token.
fn keyed_value(tokens: &mut Tokens, key: &str) -> std::result::Result<f64, String> {
    let token = tokens.word(key)?;
    let prefix = format!("{}=", key);
    if token.len() <= prefix.len() || !token[..prefix.len()].eq_ignore_ascii_case(&prefix) {
        return Err(format!("expected {}=<value>, got {}", key, token));
    }
    num(&token[prefix.len()..]).ok_or_else(|| format!("bad {} value: {}", key, token))
}

fn parse_bjt(line: &str) -> std::result::Result<Element, String> {
    let (name, mut t) = Tokens::new(line);
    let nodes = [t.node("collector")?, t.node("base")?, t.node("emitter")?];
    let kind = t.word("polarity")?;
    let polarity = if kind.eq_ignore_ascii_case("NPN") {
        BjtPolarity::Npn
    } else if kind.eq_ignore_ascii_case("PNP") {
        BjtPolarity::Pnp
    } else {
        return Err(format!("bad polarity: {}", kind));
    };
    Ok(Element::Bjt {
        name,
        nodes,
        polarity,
    })
}

fn parse_pwl(line: &str) -> std::result::Result<Element, String> {
    let (name, mut t) = Tokens::new(line);
    let nodes = (t.node("first")?, t.node("second")?);
    let mut points = [(0.0, 0.0); 4];
    for (i, point) in points.iter_mut().enumerate() {
        point.0 = t.value(&format!("V{}", i + 1))?;
        point.1 = t.value(&format!("I{}", i + 1))?;
    }
    Ok(Element::PwlResistor { name, nodes, points })
}

fn parse_gate(line: &str, symbol: char) -> std::result::Result<Element, String> {
    let (name, mut t) = Tokens::new(line);
    let kind = match symbol {
        '>' => GateKind::Not,
        ')' => GateKind::And,
        '(' => GateKind::Nand,
        '}' => GateKind::Or,
        '{' => GateKind::Nor,
        ']' => GateKind::Xor,
        _ => GateKind::Xnor,
    };
    let input_a = t.node("input")?;
    let input_b = if kind == GateKind::Not {
        None
    } else {
        Some(t.node("second input")?)
    };
    Ok(Element::Gate {
        name,
        kind,
        input_a,
        input_b,
        output: t.node("output")?,
        v: t.value("V")?,
        r: t.value("R")?,
        c: t.value("C")?,
        a: t.value("A")?,
    })
}

fn parse_tran(line: &str) -> std::result::Result<Tran, String> {
    let (_, mut t) = Tokens::new(line);
    let t_total = t.value("total time")?;
    let n_points = t.value("point count")?;
    let method_token = t.word("method")?;
    let method = if method_token.eq_ignore_ascii_case("BE") {
        Method::Be
    } else if method_token.eq_ignore_ascii_case("FE") {
        Method::Fe
    } else if method_token.eq_ignore_ascii_case("TR") {
        Method::Tr
    } else {
        return Err(format!("bad integration method: {}", method_token));
    };
    let n_substeps = t
        .word("substep count")?
        .parse::<u64>()
        .map_err(|_| "bad substep count".to_string())?;
    let uic = match t.next() {
        None => false,
        Some(token) if token.eq_ignore_ascii_case("UIC") => true,
        Some(token) => return Err(format!("unexpected token: {}", token)),
    };
    if t_total <= 0.0 || n_points <= 0.0 || n_substeps == 0 {
        return Err("analysis parameters must be positive".to_string());
    }
    Ok(Tran {
        t_total,
        n_points,
        n_substeps,
        method,
        uic,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
