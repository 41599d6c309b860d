use clap::Parser;

#[derive(Parser, Debug)]
#[clap(about = "Background sync service for the client support portal")]
pub struct Cli {
    #[clap(long)]
    /// Skip the periodic technician table refresh
    pub no_technician_refresh: bool,

    #[clap(long)]
    /// Override the configured number of job workers
    pub workers: Option<usize>,
}

pub fn parse_args() -> Cli {
    Cli::parse()
}
