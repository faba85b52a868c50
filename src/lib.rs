//! Firmware Deployment Client
//!
//! Client side of a text based firmware update protocol. The client connects
//! to a running update server over TCP, learns which devices the server can
//! flash, asks for all of them to be updated with a pair of firmware files
//! and reports which devices the server confirmed.
//!
//! # Protocol
//! - Server sends `devices=<id>,<id>,...` after the connection is accepted
//! - Client answers with `update_devices=...`, optionally `fw_m0=<path>`,
//!   and `fw_m4=<path>`, joined by newlines
//! - Server answers with `updated=<id>,...`
//!
//! Only file paths are sent; the server reads the firmware itself.
//!
//! # Example
//! ```no_run
//! use fwdeploy::FirmwareSet;
//!
//! #[tokio::main]
//! async fn main() {
//!     let firmware = FirmwareSet::new("build/fw_m4.bin").with_m0("build/fw_m0.bin");
//!     let outcome = fwdeploy::run_upload(firmware, "localhost", 3853).await;
//!     println!("{}", outcome);
//! }
//! ```
//!
//! ## Custom timeouts over an existing stream
//! ```no_run
//! use std::time::Duration;
//! use fwdeploy::{FirmwareSet, SessionConfig, UpdateSession};
//!
//! #[tokio::main]
//! async fn main() -> fwdeploy::Result<()> {
//!     let config = SessionConfig::new()
//!         .with_device_list_timeout(Duration::from_secs(5));
//!
//!     let stream = fwdeploy::connect("192.168.1.100", 3853).await?;
//!     let session = UpdateSession::new(stream, FirmwareSet::new("fw_m4.bin"), config)?;
//!     let outcome = session.run().await;
//!     println!("{}", outcome);
//!     Ok(())
//! }
//! ```

mod error;
mod protocols;
mod session;
pub mod targets;

pub use error::{Error, Result};
pub use protocols::kv::{
    decode_frame, encode_frame, Command, DeviceId, FirmwareSet, InboundFrame, KvCodec,
    UpdateRequest,
};
pub use session::{
    Outcome, Phase, Report, SelectAll, SessionConfig, SessionState, TargetSelector,
    UpdateSession, Waiting,
};

use log::{error, info};
use tokio::net::TcpStream;

pub const DEFAULT_PORT: u16 = 3853;

/// Opens the TCP connection to the update server.
pub async fn connect(host: &str, port: u16) -> Result<TcpStream> {
    info!("Connecting to update server at {}:{}", host, port);
    let stream = TcpStream::connect((host, port)).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Runs one complete update with default timeouts.
pub async fn run_upload(firmware: FirmwareSet, host: &str, port: u16) -> Outcome {
    run_upload_with(firmware, host, port, SessionConfig::default()).await
}

/// Runs one complete update. The connection is closed on return.
pub async fn run_upload_with(
    firmware: FirmwareSet,
    host: &str,
    port: u16,
    config: SessionConfig,
) -> Outcome {
    let stream = match connect(host, port).await {
        Ok(stream) => stream,
        Err(err) => {
            error!("Failed to connect to {}:{}: {}", host, port, err);
            return Outcome::from_connect_error(err);
        }
    };

    match UpdateSession::new(stream, firmware, config) {
        Ok(session) => session.run().await,
        Err(err) => {
            error!("{}", err);
            Outcome::from_error(err, None)
        }
    }
}
