use anyhow::Result;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "runlim",
    about = "Run a program with limited time and space resources",
    author,
    disable_version_flag = true,
    trailing_var_arg = true
)]
pub struct Cli {
    #[arg(
        short = 't',
        long = "time-limit",
        value_name = "N",
        help = "Limit CPU time summed over the whole process tree to N seconds",
        value_parser = parse_positive_u64
    )]
    pub time_limit: Option<u64>,

    #[arg(
        short = 'r',
        long = "real-time-limit",
        value_name = "N",
        help = "Limit wall-clock time to N seconds",
        value_parser = parse_positive_u64
    )]
    pub real_time_limit: Option<u64>,

    #[arg(
        short = 's',
        long = "space-limit",
        value_name = "N",
        help = "Limit peak resident memory summed over the whole process tree to N megabytes",
        value_parser = parse_positive_u64
    )]
    pub space_limit: Option<u64>,

    #[arg(
        short = 'k',
        long = "kill",
        help = "Re-raise the signal that killed the program after cleanup"
    )]
    pub kill: bool,

    #[arg(short = 'v', long = "version", help = "Print version and exit")]
    pub version: bool,

    #[arg(value_name = "PROGRAM", help = "Program to run, and its arguments")]
    pub program: Vec<String>,
}

/// Accepts both `-t 5` and `--time-limit=5`; clap handles the two forms
/// identically once the value reaches this parser. Rejects non-numeric and
/// negative input with a message naming the offending flag's value.
fn parse_positive_u64(s: &str) -> Result<u64> {
    s.parse::<u64>()
        .map_err(|_| anyhow::anyhow!("invalid non-negative integer '{s}'"))
}

impl Cli {
    pub fn program_and_args(&self) -> (&str, &[String]) {
        (&self.program[0], &self.program[1..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_debug_assert() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_long_flag_forms() {
        let cli = Cli::parse_from(["runlim", "--time-limit=5", "--space-limit=64", "true"]);
        assert_eq!(cli.time_limit, Some(5));
        assert_eq!(cli.space_limit, Some(64));
        assert_eq!(cli.program, vec!["true".to_string()]);
    }

    #[test]
    fn parses_short_flag_forms() {
        let cli = Cli::parse_from(["runlim", "-t", "5", "-r", "10", "-k", "sleep", "1"]);
        assert_eq!(cli.time_limit, Some(5));
        assert_eq!(cli.real_time_limit, Some(10));
        assert!(cli.kill);
        assert_eq!(cli.program, vec!["sleep".to_string(), "1".to_string()]);
    }

    #[test]
    fn version_alone_does_not_require_a_program() {
        let cli = Cli::parse_from(["runlim", "--version"]);
        assert!(cli.version);
        assert!(cli.program.is_empty());
    }
}
