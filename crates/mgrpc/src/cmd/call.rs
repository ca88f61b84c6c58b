use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

use mgrpc_client::{Client, ClientError, ConnectOptions};
use mgrpc_frame::{next_command_id, Command};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cmd::CallArgs;
use crate::exit::{
    client_error, io_error, CliError, CliResult, INTERNAL, INTERRUPTED, STATUS_ERROR, SUCCESS,
    USAGE,
};
use crate::output::{print_response, OutputFormat};

pub fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let call_args = parse_call_args(args.args.as_deref())?;
    let options = build_options(&args)?;

    let interrupt = CancellationToken::new();
    install_ctrlc_handler(interrupt.clone())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("failed to start runtime", err))?;
    runtime.block_on(execute(&args, options, call_args, timeout, &interrupt, format))
}

async fn execute(
    args: &CallArgs,
    options: ConnectOptions,
    call_args: Option<serde_json::Value>,
    timeout: Duration,
    interrupt: &CancellationToken,
    format: OutputFormat,
) -> CliResult<i32> {
    let client = tokio::select! {
        connected = Client::connect(&args.address, options) => {
            connected.map_err(|err| client_error("connect failed", err))?
        }
        _ = interrupt.cancelled() => {
            return Err(CliError::new(INTERRUPTED, "interrupted while connecting"));
        }
    };

    let id = next_command_id();
    let mut command = Command::new(args.method.as_str()).with_id(id);
    if let Some(value) = call_args {
        command = command.with_args(value);
    }

    let started = Instant::now();
    let call = client.call_cancellable(&args.dst, command, interrupt);
    let result = match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(ClientError::Timeout { id, timeout }),
    };
    let elapsed = started.elapsed();

    if let Err(err) = client.disconnect().await {
        debug!(error = %err, "disconnect failed");
    }

    let response = result.map_err(|err| client_error("call failed", err))?;
    print_response(&response, &args.method, elapsed, format);
    if response.is_ok() {
        Ok(SUCCESS)
    } else {
        Ok(STATUS_ERROR)
    }
}

fn build_options(args: &CallArgs) -> CliResult<ConnectOptions> {
    let mut options = ConnectOptions::default()
        .with_local_id(args.local_id.as_str())
        .with_reconnect(args.reconnect)
        .with_ubjson(args.ubjson)
        .with_fail_fast_send(args.fail_fast_send)
        .with_junk_handler(echo_junk);
    if let Some(kind) = args.transport {
        options = options.with_transport(kind);
    }
    if let Some(path) = &args.ca_file {
        options = options.with_root_cert_pem(read_pem(path)?);
    }
    if let Some(name) = &args.server_name {
        options = options.with_server_name(name.as_str());
    }
    if let (Some(cert), Some(key)) = (&args.cert_file, &args.key_file) {
        options = options.with_client_identity(read_pem(cert)?, read_pem(key)?);
    }
    Ok(options)
}

fn read_pem(path: &Path) -> CliResult<Vec<u8>> {
    std::fs::read(path)
        .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))
}

/// Serial devices interleave boot logs with frames; pass them through.
fn echo_junk(bytes: &[u8]) {
    let mut stderr = std::io::stderr().lock();
    let _ = stderr.write_all(bytes);
    let _ = stderr.flush();
}

fn install_ctrlc_handler(interrupt: CancellationToken) -> CliResult<()> {
    ctrlc::set_handler(move || {
        interrupt.cancel();
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

fn parse_call_args(input: Option<&str>) -> CliResult<Option<serde_json::Value>> {
    let Some(input) = input else {
        return Ok(None);
    };
    serde_json::from_str(input)
        .map(Some)
        .map_err(|err| CliError::new(USAGE, format!("--args is not valid JSON: {err}")))
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else if let Some(num) = input.strip_suffix('m') {
        (num, "m")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value.saturating_mul(60))),
        _ => Err(CliError::new(
            USAGE,
            format!("unsupported duration unit: {unit}"),
        )),
    }
}
