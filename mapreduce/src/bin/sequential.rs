use atomicwrites::{AllowOverwrite, AtomicFile};
use log::trace;
use std::io::Write;
use std::path::PathBuf;

use mapreduce::app::wc::{map, reduce};
use mapreduce::sequential;

use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(name = "sequential", version = env!("CARGO_PKG_VERSION"), about = env!("CARGO_PKG_DESCRIPTION"), author = env!("CARGO_PKG_AUTHORS"))]
struct Opt {
    /// Files to process
    #[structopt(name = "FILE", parse(from_os_str))]
    files: Vec<PathBuf>,

    #[structopt(short, long, default_value = "mr-out-sequential", parse(from_os_str))]
    output: PathBuf,
}

fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();

    let opt = Opt::from_args();
    let s = sequential::run(&opt.files, map, reduce)?;
    let af = AtomicFile::new(&opt.output, AllowOverwrite);
    af.write(|f| f.write_all(s.as_bytes()))?;
    trace!("output {:?}", opt.output);
    Ok(())
}
