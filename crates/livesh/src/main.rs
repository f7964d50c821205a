mod cli;
mod paths;
mod run;

use anyhow::Result;
use cli::Command;
use paths::AppPaths;

fn main() -> Result<()> {
    let cli = cli::parse();
    run::initialise_tracing();

    match cli.command {
        Some(Command::Compile(args)) => run::compile_only(&args),
        Some(Command::Reflect(args)) => run::reflect_only(&args),
        Some(Command::Where) => run_where(),
        None => run::run(cli.run),
    }
}

fn run_where() -> Result<()> {
    let paths = AppPaths::discover()?;
    let config_file = paths.config_file();
    println!("Configuration directory:");
    println!("  config:   {}", paths.config_dir().display());
    println!(
        "  session:  {} ({})",
        config_file.display(),
        if config_file.is_file() {
            "present"
        } else {
            "missing"
        }
    );
    Ok(())
}
