use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("canpipe {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: canpipe");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("CANPIPE_BUILD_TARGET").unwrap_or("unknown")
    );
    println!(
        "profile: {}",
        option_env!("CANPIPE_BUILD_PROFILE").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!(
        "defaults: pool_capacity={}, max_pool_capacity={}, device={}",
        canpipe_driver::DEFAULT_POOL_CAPACITY,
        canpipe_driver::MAX_POOL_CAPACITY,
        canpipe_driver::DEFAULT_DEVICE_NAME
    );
    println!(
        "controller: message_buffers={}, rx_slots={}",
        canpipe_hw::NUM_MESSAGE_BUFFERS,
        canpipe_hw::RX_SLOT_COUNT
    );

    Ok(SUCCESS)
}
