use anyhow::{bail, Result};
use substrate_exec_core::supervisor::{self, SUPERVISE_ARG};

fn main() -> Result<()> {
    if !supervisor::is_requested() {
        bail!("usage: substrate-exec-supervisor {SUPERVISE_ARG} [OPTIONS] -- <COMMAND>");
    }
    supervisor::run()
}
