use std::process::ExitCode;

fn main() -> ExitCode {
    kira_readstats::cli::run::entry()
}
