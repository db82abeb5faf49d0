//! Kernel dispatch: routes matrix products to the selected execution context.
//!
//! The set of contexts is fixed at compile time; which of them are usable is
//! probed at runtime.  `available_contexts()` lists them in preference order
//! and its first element is the default.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{ListaError, Result};
use crate::kernels::gemm_cpu;

/// Execution context (capability token).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Context {
    /// Single-threaded CPU kernels.
    Cpu,
    /// Rayon row-parallel CPU kernels.
    Parallel,
}

impl Context {
    /// Every context this build knows about, available or not.
    pub const ALL: [Context; 2] = [Context::Cpu, Context::Parallel];

    pub fn as_str(&self) -> &'static str {
        match self {
            Context::Cpu => "cpu",
            Context::Parallel => "parallel",
        }
    }

    /// Whether this context can run on the current machine.
    pub fn is_available(&self) -> bool {
        match self {
            Context::Cpu => true,
            Context::Parallel => rayon::current_num_threads() > 1,
        }
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Context {
    type Err = ListaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Context::Cpu),
            "parallel" => Ok(Context::Parallel),
            _ => Err(ListaError::UnknownContext(s.to_string())),
        }
    }
}

/// Contexts usable on this machine, in preference order.  Never empty:
/// `Cpu` is always first.
pub fn available_contexts() -> Vec<Context> {
    Context::ALL
        .iter()
        .copied()
        .filter(Context::is_available)
        .collect()
}

/// Resolve an optional requested context against availability.
///
/// `None` selects the first available context.
pub fn select_context(requested: Option<Context>) -> Result<Context> {
    let available = available_contexts();
    match requested {
        None => Ok(available.first().copied().unwrap_or(Context::Cpu)),
        Some(ctx) if available.contains(&ctx) => Ok(ctx),
        Some(ctx) => Err(ListaError::UnavailableContext {
            requested: ctx.to_string(),
            available: available.iter().map(|c| c.to_string()).collect(),
        }),
    }
}

/// Dispatch `a · b` to the kernels of `ctx`.
pub fn dispatch_matmul(a: ArrayView2<'_, f64>, b: ArrayView2<'_, f64>, ctx: Context) -> Array2<f64> {
    match ctx {
        Context::Cpu => gemm_cpu::matmul(a, b),
        Context::Parallel => gemm_cpu::matmul_parallel(a, b),
    }
}
