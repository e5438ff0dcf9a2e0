use std::process::ExitCode;

fn main() -> ExitCode {
    live_scope_lib::run()
}
