use std::process::ExitCode;

fn main() -> ExitCode {
    chartgrab_lib::run()
}
