use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("chanmux {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: chanmux");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("protocol: socket.io 0.9 packets over length-prefixed frames");
    println!(
        "features: client={}, rtc={}, cli=true",
        cfg!(feature = "client"),
        cfg!(feature = "rtc")
    );

    Ok(SUCCESS)
}
