use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("mgrpc {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: mgrpc");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("MGRPC_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "rustc: {}",
        option_env!("RUSTC_VERSION").unwrap_or("unknown")
    );
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!(
        "features: ws={}, http={}, cli=true",
        cfg!(feature = "ws"),
        cfg!(feature = "http")
    );
    println!(
        "tcp_keepalive: {}s",
        mgrpc_transport::TCP_KEEPALIVE_INTERVAL.as_secs()
    );
    #[cfg(feature = "ws")]
    println!("websocket_protocol: {}", mgrpc_transport::WS_PROTOCOL);

    Ok(SUCCESS)
}
