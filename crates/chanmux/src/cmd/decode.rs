use std::io::{self, BufRead};

use chanmux_frame::{decode_str, encode_to_string};

use crate::cmd::DecodeArgs;
use crate::exit::{frame_error, io_error, CliResult, SUCCESS};
use crate::output::{print_packet, OutputFormat};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    for input in &args.packets {
        if input == "-" {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let line = line.map_err(|err| io_error("failed reading stdin", err))?;
                let line = line.trim_end_matches('\r');
                if !line.is_empty() {
                    decode_one(line, format)?;
                }
            }
        } else {
            decode_one(input, format)?;
        }
    }
    Ok(SUCCESS)
}

fn decode_one(wire: &str, format: OutputFormat) -> CliResult<()> {
    let packet = decode_str(wire).map_err(|err| frame_error("decode failed", err))?;
    let canonical = encode_to_string(&packet).map_err(|err| frame_error("encode failed", err))?;
    print_packet(&packet, &canonical, format);
    Ok(())
}
