use clap::Parser;
use hawkdog::error::Error;
use hawkdog::settings::Settings;
use hawkdog::{logger, monitor};
use std::path::PathBuf;
use std::process;
use tracing::error;

/// Watch a decoy credentials file and alert when it is touched.
#[derive(Parser, Debug)]
#[command(name = "hawkdog", version, about)]
struct Cli {
    /// Configuration file (default: ~/.config/hawkdog/config.json)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Send a test alert on both channels and exit
    #[arg(long)]
    test: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            let e = Error::from(e);
            eprintln!("{}", e);
            process::exit(e.exit_code());
        }
    };
    logger::init(settings.log_file.as_deref());

    let result = if cli.test {
        monitor::self_test(&settings).await.map(|()| println!("ok"))
    } else {
        let shutdown = async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        };
        monitor::run(&settings, shutdown).await
    };

    if let Err(e) = result {
        error!("{}", e);
        if settings.log_file.is_some() {
            eprintln!("{}", e);
        }
        process::exit(e.exit_code());
    }
}
