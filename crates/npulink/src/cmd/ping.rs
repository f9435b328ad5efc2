use std::time::Instant;

use serde::Serialize;

use crate::cmd::{LinkArgs, PingArgs, Session};
use crate::exit::{engine_error, CliResult, SUCCESS};
use crate::output::{print, OutputFormat, Render};

#[derive(Serialize)]
struct PingOutput {
    sent: u32,
    elapsed_ms: f64,
}

impl Render for PingOutput {
    fn rows(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Sent", self.sent.to_string()),
            ("Elapsed", format!("{:.2}ms", self.elapsed_ms)),
        ]
    }

    fn raw(&self) -> String {
        self.sent.to_string()
    }
}

pub fn run(args: PingArgs, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    let session = Session::open(link)?;
    let start = Instant::now();
    for _ in 0..args.count {
        session
            .device
            .ping()
            .map_err(|e| engine_error("ping failed", e))?;
    }

    let out = PingOutput {
        sent: args.count,
        elapsed_ms: (start.elapsed().as_secs_f64() * 1000.0 * 100.0).round() / 100.0,
    };
    print(&out, format);
    Ok(SUCCESS)
}
