use std::path::PathBuf;
use std::process::ExitCode;

use clap::{CommandFactory, Parser};
use log::error;

use fwdeploy::targets::TargetMap;
use fwdeploy::DEFAULT_PORT;

/// Connects to a running firmware update server to update a target with a
/// given firmware. Either specify --config or <FIRMWARE> <FIRMWARE2>.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// A config file specifying one target per line. The first field is the
    /// firmware filename, the fourth the target name
    #[arg(long)]
    config: Option<PathBuf>,

    /// The firmware file to send to the device
    firmware: Option<PathBuf>,

    /// The secondary firmware file to send to the device
    firmware2: Option<PathBuf>,

    /// The update server ip address to connect to
    #[arg(short, long, default_value = "localhost")]
    ip: String,

    /// The update server port to connect to
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
}

impl Args {
    fn targets(&self) -> Result<TargetMap, String> {
        if let Some(config) = &self.config {
            return TargetMap::load(config).map_err(|e| e.to_string());
        }

        match (&self.firmware, &self.firmware2) {
            (Some(primary), Some(secondary)) => Ok(TargetMap::from_firmware(primary, secondary)),
            _ => Err("specify at least --config or firmware, firmware2".to_owned()),
        }
    }
}

fn usage_error(message: impl std::fmt::Display) -> ExitCode {
    eprintln!("ERROR: {}", message);
    eprintln!("{}", Args::command().render_usage());
    ExitCode::FAILURE
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let targets = match args.targets() {
        Ok(targets) => targets,
        Err(message) => return usage_error(message),
    };

    let firmware = match targets.firmware_set() {
        Ok(firmware) => firmware,
        Err(err) => return usage_error(err),
    };

    let outcome = fwdeploy::run_upload(firmware, &args.ip, args.port).await;
    println!("{}", outcome);

    if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        error!("Update did not complete for all devices");
        ExitCode::FAILURE
    }
}
