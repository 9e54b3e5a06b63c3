//! Terrasample CLI - plan or run a sampling job described in TOML.

use anyhow::{bail, Context, Result};
use env_logger::Env;
use log::info;
use terrasample::prelude::*;

fn main() -> Result<()> {
    let mut args: Vec<String> = std::env::args().collect();
    let program = args.first().cloned().unwrap_or_else(|| "terrasample".to_string());

    let verbose = args.iter().any(|a| a == "-v" || a == "--verbose");
    args.retain(|a| a != "-v" && a != "--verbose");
    let log_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    if args.len() < 2 {
        print_usage(&program);
        return Ok(());
    }

    match args[1].as_str() {
        "plan" => {
            let path = job_path(&args, &program)?;
            plan(path)
        }
        "run" => {
            let path = job_path(&args, &program)?;
            run(path)
        }
        "help" | "--help" | "-h" => {
            print_usage(&program);
            Ok(())
        }
        other => {
            print_usage(&program);
            bail!("unknown command: {}", other)
        }
    }
}

fn job_path<'a>(args: &'a [String], program: &str) -> Result<&'a str> {
    match args.get(2) {
        Some(path) => Ok(path.as_str()),
        None => bail!("missing job file\nUsage: {} {} <job.toml>", program, args[1]),
    }
}

fn print_usage(program: &str) {
    println!("Terrasample v{}", terrasample::VERSION);
    println!();
    println!("Usage: {} <command> [options]", program);
    println!();
    println!("Commands:");
    println!("  plan <job.toml>   Print the expression graph of each time-series entry");
    println!("  run <job.toml>    Submit every export listed in the job");
    println!("  help              Show this help message");
    println!();
    println!("Options:");
    println!("  -v, --verbose     Log requests and local evaluation");
}

fn plan(path: &str) -> Result<()> {
    let job = JobConfig::from_file(path)?;
    let plans = plan_job(&job)?;
    for (i, plan) in plans.iter().enumerate() {
        println!("# entry {} of {}", i, plans.len());
        println!("{}", plan.to_json().context("serializing plan")?);
    }
    Ok(())
}

fn run(path: &str) -> Result<()> {
    let job = JobConfig::from_file(path)?;
    info!(
        "Running job over {} image(s) in project {}",
        job.images.len(),
        job.service.project
    );
    let service = HttpService::new(&job.service);
    let tasks = run_job(&service, &job)?;
    for task in &tasks {
        println!(
            "{}\t{}\t{}\t{}",
            task.task_id, task.description, task.destination, task.correlation_id
        );
    }
    Ok(())
}
