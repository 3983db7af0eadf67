use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use substrate_exec_core::{
    logging, supervisor, ErrorResponse, ExecConfig, ExecError, ExecutionRequest, Executor,
};

#[derive(Parser, Debug)]
#[command(name = "substrate-exec")]
#[command(version, about = "Run a shell command under a timeout tier", long_about = None)]
struct Cli {
    /// Use the slow timeout tier (15 minutes by default)
    #[arg(long = "slow-ok")]
    slow_ok: bool,

    /// Launch detached and print the process handle as JSON
    #[arg(long = "background")]
    background: bool,

    /// Run the command attached to a pseudo-terminal (Unix only)
    #[arg(long = "pty")]
    pty: bool,

    /// Shell used as `<shell> -c <command>` (overrides config)
    #[arg(long = "shell", value_name = "PATH")]
    shell: Option<PathBuf>,

    /// Full request as JSON, e.g. '{"command":"ls","pty":true}'
    #[arg(
        long = "json",
        value_name = "REQUEST",
        conflicts_with_all = ["slow_ok", "background", "pty", "command"]
    )]
    json: Option<String>,

    /// Command text; multiple words are joined with spaces
    #[arg(last = true, value_name = "COMMAND")]
    command: Vec<String>,
}

impl Cli {
    fn request(&self) -> Result<ExecutionRequest> {
        match &self.json {
            Some(raw) => Ok(ExecutionRequest::from_json(raw)?),
            None => Ok(ExecutionRequest::new(self.command.join(" "))
                .slow_ok(self.slow_ok)
                .background(self.background)
                .pty(self.pty)),
        }
    }
}

fn main() -> Result<()> {
    // Background launches re-run this binary as their supervisor.
    if supervisor::is_requested() {
        return supervisor::run();
    }

    let cli = Cli::parse();
    logging::init()?;

    let mut config = ExecConfig::load().context("failed to load executor configuration")?;
    if let Some(shell) = &cli.shell {
        config = config.with_shell(shell.clone());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    let executor = Executor::new(config);
    let result = runtime.block_on(async {
        let request = cli.request()?;
        executor.execute(&request).await.map_err(anyhow::Error::from)
    });

    match result {
        Ok(outcome) => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(outcome.into_text().as_bytes())?;
            stdout.flush()?;
            Ok(())
        }
        Err(err) => {
            let rendered = match err.downcast_ref::<ExecError>() {
                Some(exec_err) => serde_json::to_string(&ErrorResponse::from(exec_err))?,
                None => format!("{err:#}"),
            };
            eprintln!("{rendered}");
            std::process::exit(1);
        }
    }
}
