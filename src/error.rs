use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("singular system at t={t:.6e}: pivot={pivot:.3e}")]
    SingularSystem { t: f64, pivot: f64 },

    #[error("no convergence at t={t:.6e} after {restarts} restarts")]
    NoConvergence { t: f64, restarts: u32 },

    #[error("coupling {name} references an undeclared inductor")]
    CouplingReferencesUnknownInductor { name: String },

    #[error("circuit exceeds the {limit}-variable limit")]
    TooManyVariables { limit: usize },

    #[error("unknown element '{token}'")]
    UnknownDevice { token: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SimError>;
