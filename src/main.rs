//! LISTA demo binary.
//!
//! Draws a random unit-norm dictionary and a batch of sparse signals, runs a
//! default-initialised LISTA network over them and logs the LASSO cost after
//! every layer next to classical ISTA.

use anyhow::Context as _;
use clap::Parser;
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use lista::config::{DEFAULT_LMBD, DEFAULT_NAME, DEFAULT_N_LAYERS, DEFAULT_SPARSITY};
use lista::core::lasso::{ista, lasso_cost};
use lista::{available_contexts, Context, Lista, ListaConfig};

/// LISTA sparse-coding demo.
#[derive(Parser, Debug)]
#[command(
    name = "lista",
    about = "Learned ISTA: unrolled sparse coding for the LASSO",
    version
)]
struct Cli {
    /// Number of dictionary atoms.
    #[arg(long, default_value_t = 16)]
    n_atoms: usize,

    /// Signal dimension.
    #[arg(long, default_value_t = 32)]
    n_features: usize,

    /// Number of unrolled layers.
    #[arg(short = 'l', long, default_value_t = DEFAULT_N_LAYERS)]
    n_layers: usize,

    /// Number of signals in the batch.
    #[arg(short, long, default_value_t = 64)]
    batch: usize,

    /// LASSO regularisation strength.
    #[arg(long, default_value_t = DEFAULT_LMBD)]
    lmbd: f64,

    /// Probability that a code entry is non-zero.
    #[arg(long, default_value_t = DEFAULT_SPARSITY)]
    sparsity: f64,

    /// Execution context (cpu, parallel).  Defaults to the first available.
    #[arg(long)]
    ctx: Option<String>,

    /// RNG seed.
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn main() -> anyhow::Result<()> {
    // Initialise tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    tracing::info!("LISTA v{}", env!("CARGO_PKG_VERSION"));
    let available: Vec<String> = available_contexts().iter().map(Context::to_string).collect();
    tracing::info!("Available contexts: {}", available.join(", "));

    let ctx = cli
        .ctx
        .as_deref()
        .map(str::parse::<Context>)
        .transpose()
        .context("invalid --ctx")?;

    let mut rng = StdRng::seed_from_u64(cli.seed);
    let d = random_dictionary(cli.n_atoms, cli.n_features, &mut rng)?;
    let (z_true, x) = sparse_batch(&d, cli.batch, cli.sparsity, &mut rng)?;

    let config = ListaConfig {
        n_layers: cli.n_layers,
        name: DEFAULT_NAME.to_string(),
        ctx,
    };
    let net = Lista::from_config(d.view(), &config).context("failed to build network")?;

    tracing::info!(
        "Network: {} layers, {} atoms, {} features, L={:.4}, ctx={}, {} params",
        net.n_layers(),
        net.n_atoms(),
        net.n_features(),
        net.lipschitz(),
        net.context(),
        net.param_count(),
    );

    let trace = net.forward_traced(&x, cli.lmbd, None)?;
    for (i, z) in trace.codes().iter().enumerate() {
        let cost = lasso_cost(x.view(), z.view(), d.view(), cli.lmbd)?;
        let nnz = z.iter().filter(|v| **v != 0.0).count() as f64 / z.len() as f64;
        tracing::info!("  layer {:>3}: cost={:.6} nnz={:.1}%", i + 1, cost, nnz * 100.0);
    }

    let z_ista = ista(x.view(), d.view(), cli.lmbd, cli.n_layers, None)?;
    let ista_cost = lasso_cost(x.view(), z_ista.view(), d.view(), cli.lmbd)?;
    let true_cost = lasso_cost(x.view(), z_true.view(), d.view(), cli.lmbd)?;
    tracing::info!("ISTA ({} iterations) cost: {:.6}", cli.n_layers, ista_cost);
    tracing::info!("Ground-truth code cost:    {:.6}", true_cost);

    tracing::info!("Done.");
    Ok(())
}

/// Gaussian dictionary with unit-norm rows.
fn random_dictionary(
    n_atoms: usize,
    n_features: usize,
    rng: &mut StdRng,
) -> anyhow::Result<Array2<f64>> {
    let normal = Normal::<f64>::new(0.0, 1.0)?;
    let mut d = Array2::from_shape_fn((n_atoms, n_features), |_| normal.sample(rng));
    let norms: Array1<f64> = d.map_axis(Axis(1), |row| row.dot(&row).sqrt().max(f64::EPSILON));
    for (mut row, norm) in d.rows_mut().into_iter().zip(norms.iter()) {
        row /= *norm;
    }
    Ok(d)
}

/// Bernoulli-Gaussian codes and their signals `x = z·D`.
fn sparse_batch(
    d: &Array2<f64>,
    batch: usize,
    sparsity: f64,
    rng: &mut StdRng,
) -> anyhow::Result<(Array2<f64>, Array2<f64>)> {
    anyhow::ensure!(
        (0.0..=1.0).contains(&sparsity),
        "sparsity must be in [0, 1], got {}",
        sparsity
    );
    let normal = Normal::new(0.0, 1.0)?;
    let z = Array2::from_shape_fn((batch, d.nrows()), |_| {
        if rng.gen_bool(sparsity) {
            normal.sample(rng)
        } else {
            0.0
        }
    });
    let x = z.dot(d);
    Ok((z, x))
}
