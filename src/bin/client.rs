use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use reqchannel::{ClientConfig, Endpoint, Error, TransportProvider};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Hello world request/reply client", long_about = None)]
struct Args {
    /// YAML file with client settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Peer to connect to, e.g. tcp://localhost:5556
    #[arg(short, long, env = "REQCHANNEL_ENDPOINT")]
    endpoint: Option<Endpoint>,

    /// Number of requests to send
    #[arg(short = 'n', long)]
    requests: Option<usize>,

    #[arg(long)]
    receive_timeout_ms: Option<u64>,

    #[arg(long)]
    connect_timeout_ms: Option<u64>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

impl Args {
    fn into_config(self) -> Result<ClientConfig, Error> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::load(path)?,
            None => ClientConfig::default(),
        };
        if let Some(endpoint) = self.endpoint {
            config.endpoint = endpoint;
        }
        if let Some(requests) = self.requests {
            config.requests = requests;
        }
        if self.receive_timeout_ms.is_some() {
            config.receive_timeout_ms = self.receive_timeout_ms;
        }
        if self.connect_timeout_ms.is_some() {
            config.connect_timeout_ms = self.connect_timeout_ms;
        }
        config.validate()?;
        Ok(config)
    }
}

fn run(config: &ClientConfig) -> Result<(), Error> {
    let provider = TransportProvider::new();

    info!("Connecting to hello world server at {}", config.endpoint);
    let mut channel = provider.open(config.open_options())?;

    for i in 0..config.requests {
        let request = config.payload_for(i);
        info!("Sending request {} ...", i);
        channel.send(request)?;
        let reply = channel.receive()?;
        println!("Received reply {} [ {} ]", i, reply);
    }

    channel.close();
    provider.terminate()
}

fn main() -> ExitCode {
    let args = Args::parse();

    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(log_level).init();

    let result = args.into_config().and_then(|config| run(&config));
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
