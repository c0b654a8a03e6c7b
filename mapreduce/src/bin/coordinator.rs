use std::path::PathBuf;
use std::time::Duration;

use log::{info, warn};
use structopt::StructOpt;

use mapreduce::{Coordinator, CoordinatorConfig, Endpoint};

#[derive(StructOpt, Debug)]
#[structopt(name = "coordinator", version = env!("CARGO_PKG_VERSION"), about = env!("CARGO_PKG_DESCRIPTION"), author = env!("CARGO_PKG_AUTHORS"))]
struct Opt {
    /// Address to serve on: `unix:<path>` or `[tcp:]<ip>:<port>`.
    /// Defaults to a per-user socket in /var/tmp.
    #[structopt(short, long)]
    endpoint: Option<Endpoint>,

    /// Combined output file
    #[structopt(short, long, default_value = "mr-out", parse(from_os_str))]
    output: PathBuf,

    /// Input files, as glob patterns
    #[structopt(name = "FILE")]
    files: Vec<String>,

    #[structopt(long, default_value = "10")]
    nreduce: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();

    let opt = Opt::from_args();
    let config = CoordinatorConfig {
        inputs: opt.files,
        nreduce: opt.nreduce,
        output: opt.output,
        endpoint: opt.endpoint.unwrap_or_default(),
    };
    let c = Coordinator::new(&config)?;
    let server = c.launch(&config.endpoint).await?;

    while !c.done() {
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    c.wait_output().await;
    server.abort();
    if let Err(e) = config.endpoint.unlink() {
        warn!("cannot remove {}: {}", config.endpoint, e);
    }
    info!("job done, output in {}", config.output.display());
    Ok(())
}
