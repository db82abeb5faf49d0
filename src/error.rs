//! Crate error type.
//!
//! Every fallible operation returns [`ListaError`].  Variants fall into three
//! families, exposed through [`ListaError::kind`]:
//!
//! - **Configuration**: bad construction inputs (context, layer count,
//!   dictionary, regularisation strength).
//! - **Shape**: dimension mismatches between inputs, parameters and the
//!   network's fixed shapes.
//! - **NumericDomain**: NaN or ±∞ entering or leaving a computation.

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, ListaError>;

/// Coarse error family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Shape,
    NumericDomain,
}

/// Errors raised while building or running a LISTA network.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ListaError {
    /// The requested execution context is not available on this machine.
    #[error("context {requested} is not available on this computer (available: {available:?})")]
    UnavailableContext {
        requested: String,
        available: Vec<String>,
    },

    /// A context token string did not name any known context.
    #[error("unknown execution context '{0}'")]
    UnknownContext(String),

    /// The network needs at least one layer.
    #[error("n_layers must be a positive integer, got {0}")]
    InvalidLayerCount(usize),

    /// The dictionary has a zero dimension.
    #[error("dictionary must be non-empty, got shape ({n_atoms}, {n_features})")]
    EmptyDictionary { n_atoms: usize, n_features: usize },

    /// `L = 0`: the Gram matrix has no energy and `1/L` is undefined.
    #[error("degenerate dictionary: Lipschitz constant is {lipschitz}")]
    DegenerateDictionary { lipschitz: f64 },

    /// `lmbd` must be finite and non-negative.
    #[error("regularisation strength must be finite and >= 0, got {0}")]
    InvalidRegularization(f64),

    /// Two operands disagree on their dimensions.
    #[error("shape mismatch for {what}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        what: String,
        expected: (usize, usize),
        got: (usize, usize),
    },

    /// A non-finite value was found where only finite values are allowed.
    #[error("non-finite value in {what}")]
    NonFinite { what: String },
}

impl ListaError {
    /// Family this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ListaError::UnavailableContext { .. }
            | ListaError::UnknownContext(_)
            | ListaError::InvalidLayerCount(_)
            | ListaError::EmptyDictionary { .. }
            | ListaError::DegenerateDictionary { .. }
            | ListaError::InvalidRegularization(_) => ErrorKind::Configuration,
            ListaError::ShapeMismatch { .. } => ErrorKind::Shape,
            ListaError::NonFinite { .. } => ErrorKind::NumericDomain,
        }
    }

    pub(crate) fn shape(
        what: impl Into<String>,
        expected: (usize, usize),
        got: (usize, usize),
    ) -> Self {
        ListaError::ShapeMismatch {
            what: what.into(),
            expected,
            got,
        }
    }

    pub(crate) fn non_finite(what: impl Into<String>) -> Self {
        ListaError::NonFinite { what: what.into() }
    }
}
