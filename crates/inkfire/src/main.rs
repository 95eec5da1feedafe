mod cli;
mod gpu_scene;
mod run;
mod scene;
mod shading;
mod window;

use anyhow::Result;

fn main() -> Result<()> {
    let cli = cli::parse();
    run::initialise_tracing();
    run::run(cli)
}
