use clap::Parser;
use log::{error, info};
use nalgebra::DVector;
use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use rust_sr::{read_config, BatchGradCapability, ConfigurationBatch, Machine, Result, RunConfig};

#[derive(Parser, Debug)]
#[command(version, about = "Jacobian backends and SR solver diagnostics", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config.yml")]
    config: String,

    /// Use the built-in default configuration instead of reading a file
    #[arg(long)]
    defaults: bool,
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    if let Err(e) = run(&args) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let config = if args.defaults {
        RunConfig::default()
    } else {
        read_config(&args.config)?
    };
    info!("loaded configuration with {} layers", config.network.len());

    let mut machine = config.build_machine()?;
    let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(1));
    let batch = ConfigurationBatch::random_spins(config.n_samples, config.n_sites, &mut rng)?;

    println!("SR diagnostics");
    println!("----------------------------------------");
    println!("Sites: {}, samples: {}", config.n_sites, config.n_samples);
    let names: Vec<&str> = machine.network().layers().iter().map(|l| l.name()).collect();
    println!("Layers: {}", names.join(" -> "));
    println!("Parameters: {}", machine.n_par());
    println!("Jacobian backend: {}", machine.backend_name());

    let jac = machine.der_log(&batch)?;
    let mut reference = Machine::new(config.build_network()?, BatchGradCapability::Unavailable);
    reference.set_parameters(&machine.flat_parameters())?;
    let jac_ref = reference.der_log(&batch)?;
    println!("Max |J - J_per_sample|: {:.3e}", (&jac - &jac_ref).camax());

    let w = random_complex(config.n_samples, &mut rng);
    let vjp = machine.vector_jacobian_prod(&batch, &w)?;
    println!("Max |vjp - Jᴴw|: {:.3e}", (&vjp - jac.adjoint() * &w).camax());

    let grad = random_complex(machine.n_par(), &mut rng);
    let (x, cold) = config.sr.solve(&mut machine, &batch, &grad, None, 0)?;
    println!(
        "Cold solve: {} iterations, residual {:.3e}, converged: {}",
        cold.iterations, cold.residual_norm, cold.converged
    );

    let next = ConfigurationBatch::random_spins(config.n_samples, config.n_sites, &mut rng)?;
    let x0 = config.sr.reuse_previous_solution.then_some(&x);
    let (_, warm) = config.sr.solve(&mut machine, &next, &grad, x0, 1)?;
    println!(
        "Next batch ({}): {} iterations, residual {:.3e}, converged: {}",
        if x0.is_some() { "warm" } else { "cold" },
        warm.iterations,
        warm.residual_norm,
        warm.converged
    );
    Ok(())
}

fn random_complex<R: Rng>(n: usize, rng: &mut R) -> DVector<Complex64> {
    DVector::from_fn(n, |_, _| Complex64::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)))
}
