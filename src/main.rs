use std::process::ExitCode;

fn main() -> ExitCode {
    browser_chooser_lib::run()
}
