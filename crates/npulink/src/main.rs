mod cmd;
mod exit;
mod logging;
mod output;
mod sim;

use clap::Parser;

use crate::cmd::{Command, LinkArgs};
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(
    name = "npulink",
    version,
    about = "Drive an NPU core subsystem (simulated in-process)"
)]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(
        long,
        value_name = "LEVEL",
        default_value = "warn",
        env = "NPULINK_LOG_LEVEL",
        global = true
    )]
    log_level: LogLevel,

    #[command(flatten)]
    link: LinkArgs,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, &cli.link, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_infer_subcommand() {
        let cli = Cli::try_parse_from([
            "npulink",
            "infer",
            "--index",
            "0",
            "--ifm-size",
            "16,32",
            "--pmu-event",
            "1,2",
            "--cancel-after",
            "5ms",
        ])
        .expect("infer args should parse");

        let Command::Infer(args) = cli.command else {
            panic!("expected infer");
        };
        assert_eq!(args.ifm_size, vec![16, 32]);
        assert_eq!(args.pmu_event, vec![1, 2]);
        assert_eq!(args.cancel_after.as_deref(), Some("5ms"));
    }

    #[test]
    fn rejects_conflicting_network_args() {
        let err = Cli::try_parse_from([
            "npulink",
            "net-info",
            "--index",
            "1",
            "--model",
            "/tmp/model.bin",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn network_is_required() {
        let err = Cli::try_parse_from(["npulink", "net-info"])
            .expect_err("missing network should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn link_flags_are_global() {
        let cli = Cli::try_parse_from([
            "npulink",
            "probe",
            "--sim-product-major",
            "2",
            "--timeout",
            "500ms",
        ])
        .expect("probe args should parse");
        assert_eq!(cli.link.sim_product_major, 2);
        assert_eq!(cli.link.timeout, "500ms");
        assert!(matches!(cli.command, Command::Probe(_)));
    }
}
