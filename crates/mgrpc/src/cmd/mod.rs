use clap::{Args, Subcommand};
use mgrpc_client::{ClientError, TransportKind};
use std::path::PathBuf;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod call;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect, perform one call and print the response.
    Call(CallArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Call(args) => call::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Peer address: ws[s]://, tcp://host:port, http[s]://, serial:// or a device path.
    pub address: String,
    /// Method name, e.g. Sys.GetInfo.
    pub method: String,
    /// Call arguments as a JSON value.
    #[arg(long)]
    pub args: Option<String>,
    /// Destination identity placed in the frame.
    #[arg(long, default_value = "")]
    pub dst: String,
    /// Source identity placed in the frame.
    #[arg(long, env = "MGRPC_LOCAL_ID", default_value = "")]
    pub local_id: String,
    /// Maximum time to wait for the response (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    /// Force a transport instead of inferring it from the address.
    #[arg(long, value_name = "KIND", value_parser = parse_transport)]
    pub transport: Option<TransportKind>,
    /// Extra trusted root certificate (PEM).
    #[arg(long, value_name = "PEM")]
    pub ca_file: Option<PathBuf>,
    /// Verify the server certificate against this name.
    #[arg(long, value_name = "NAME")]
    pub server_name: Option<String>,
    /// Client certificate (PEM).
    #[arg(long, value_name = "PEM", requires = "key_file")]
    pub cert_file: Option<PathBuf>,
    /// Client private key (PKCS#8 PEM).
    #[arg(long, value_name = "PEM", requires = "cert_file")]
    pub key_file: Option<PathBuf>,
    /// Rebuild a serial connection when it drops.
    #[arg(long)]
    pub reconnect: bool,
    /// Advertise UBJSON in the WebSocket encoding negotiation.
    #[arg(long)]
    pub ubjson: bool,
    /// Fail immediately if the request cannot be sent.
    #[arg(long)]
    pub fail_fast_send: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

fn parse_transport(input: &str) -> Result<TransportKind, String> {
    input.parse().map_err(|err: ClientError| err.to_string())
}
