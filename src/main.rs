mod cli;
mod eventlog;
mod killer;
mod proctable;
mod registry;
mod sampler;
mod supervisor;
mod tree;
mod types;

use clap::Parser;
use cli::Cli;
use eventlog::EventLog;
use supervisor::Supervisor;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    if cli.version {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return;
    }

    if cli.program.is_empty() {
        EventLog::stderr().error("no program specified (try '-h')");
        std::process::exit(1);
    }

    if cli.time_limit == Some(0) {
        EventLog::stderr().warning("time limit of zero, any CPU usage will be out of time");
    }

    let supervisor =
        match Supervisor::startup(cli.time_limit, cli.real_time_limit, cli.space_limit, cli.kill) {
            Ok(supervisor) => supervisor,
            Err(err) => {
                EventLog::stderr().error(err.to_string());
                std::process::exit(1);
            }
        };

    let (program, args) = cli.program_and_args();
    match supervisor.run(program, args).await {
        Ok(status) => std::process::exit(status.exit_code()),
        Err(err) => {
            EventLog::stderr().error(err.to_string());
            std::process::exit(1);
        }
    }
}
