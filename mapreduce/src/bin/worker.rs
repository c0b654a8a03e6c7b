use std::path::PathBuf;
use std::time::Duration;

use structopt::StructOpt;

use mapreduce::app::wc;
use mapreduce::{Endpoint, Worker, WorkerConfig};

#[derive(StructOpt, Debug)]
#[structopt(name = "worker", version = env!("CARGO_PKG_VERSION"), about = env!("CARGO_PKG_DESCRIPTION"), author = env!("CARGO_PKG_AUTHORS"))]
struct Opt {
    /// Coordinator address, as given to the coordinator
    #[structopt(short, long)]
    endpoint: Option<Endpoint>,

    /// Directory for intermediate files
    #[structopt(short, long, default_value = ".", parse(from_os_str))]
    dir: PathBuf,

    /// Deadline in seconds for each call to the coordinator
    #[structopt(short, long, default_value = "60")]
    timeout: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();

    let opt = Opt::from_args();
    let config = WorkerConfig {
        endpoint: opt.endpoint.unwrap_or_default(),
        dir: opt.dir,
        timeout: Duration::from_secs(opt.timeout),
    };
    Worker::new(config, wc::map, wc::reduce).launch().await?;
    Ok(())
}
