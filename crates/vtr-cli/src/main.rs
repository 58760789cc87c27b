//! Entry point: parse argv, fold in the environment overlay, install the
//! signal plane, run the supervisor, and translate the result to an exit
//! code. Grounded on the teacher's `cli-sub-agent::main` tracing-init
//! idiom (stderr-only subscriber, `try_init` so a double-init never panics)
//! and its top-level `anyhow::Result` / `?`-propagation style.

mod cli;
mod options;

use clap::Parser;

use cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    let parsed = options::from_cli_and_env(cli);
    let options = match parsed {
        Ok(options) => options,
        Err(err) => {
            eprintln!("vtr: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = vtr_signals::install() {
        eprintln!("vtr: failed to install signal handlers: {err}");
        std::process::exit(1);
    }

    let mut supervisor = match vtr_supervisor::Supervisor::setup(options) {
        Ok(supervisor) => supervisor,
        Err(err) => {
            eprintln!("vtr: {err}");
            std::process::exit(1);
        }
    };

    let code = supervisor.run().await;
    std::process::exit(code);
}
