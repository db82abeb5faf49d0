//! Execution contexts and matrix kernels.
//!
//! This module abstracts over two CPU backends:
//! - **Cpu**: single-threaded ndarray GEMM (always available)
//! - **Parallel**: rayon row-parallel GEMM (available with more than one worker)

pub mod gemm_cpu;
pub mod kernel_dispatch;
