use std::process::ExitCode;

use graphgate_config::GatewayConfig;

fn main() -> ExitCode {
    let config = GatewayConfig::from_args();
    match graphgated::run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("graphgated: {error}");
            ExitCode::FAILURE
        }
    }
}
