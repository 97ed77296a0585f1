//! Trace output.
//!
//! The integrator pushes rows through the `Trace` seam; the binary plugs
//! in a `TabWriter` over the output file, tests use `RecordedTrace`.

use std::io::Write;

use crate::error::Result;

/// Row sink for the simulation trace.
pub trait Trace {
    fn header(&mut self, names: &[String]) -> Result<()>;
    fn row(&mut self, t: f64, values: &[f64]) -> Result<()>;
}

/// Whitespace-separated table: a name row, then one row per emitted step.
/// Values use shortest round-trip formatting and each row is flushed, so
/// an abandoned run keeps everything already written.
pub struct TabWriter<W: Write> {
    writer: W,
}

impl<W: Write> TabWriter<W> {
    pub fn new(writer: W) -> Self {
        TabWriter { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Trace for TabWriter<W> {
    fn header(&mut self, names: &[String]) -> Result<()> {
        write!(self.writer, "t")?;
        for name in names {
            write!(self.writer, " {}", name)?;
        }
        writeln!(self.writer)?;
        self.writer.flush()?;
        Ok(())
    }

    fn row(&mut self, t: f64, values: &[f64]) -> Result<()> {
        write!(self.writer, "{}", t)?;
        for value in values {
            write!(self.writer, " {}", value)?;
        }
        writeln!(self.writer)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// In-memory trace for tests and programmatic use.
#[derive(Debug, Default, Clone)]
pub struct RecordedTrace {
    pub names: Vec<String>,
    pub times: Vec<f64>,
    pub rows: Vec<Vec<f64>>,
}

impl RecordedTrace {
    /// Column for a variable name, e.g. a node label or `jL1`.
    pub fn column(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// The waveform of one variable across all emitted rows.
    pub fn waveform(&self, name: &str) -> Vec<f64> {
        let col = self
            .column(name)
            .unwrap_or_else(|| panic!("no variable named {}", name));
        self.rows.iter().map(|row| row[col]).collect()
    }
}

impl Trace for RecordedTrace {
    fn header(&mut self, names: &[String]) -> Result<()> {
        self.names = names.to_vec();
        Ok(())
    }

    fn row(&mut self, t: f64, values: &[f64]) -> Result<()> {
        self.times.push(t);
        self.rows.push(values.to_vec());
        Ok(())
    }
}
