use serde::Serialize;

use crate::cmd::{LinkArgs, NetInfoArgs, Session};
use crate::exit::{engine_error, CliResult, SUCCESS};
use crate::output::{join_list, print, OutputFormat, Render};

#[derive(Serialize)]
struct NetInfoOutput {
    description: String,
    ifm_sizes: Vec<u32>,
    ofm_sizes: Vec<u32>,
}

impl Render for NetInfoOutput {
    fn rows(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Description", self.description.clone()),
            ("Inputs", join_list(&self.ifm_sizes)),
            ("Outputs", join_list(&self.ofm_sizes)),
        ]
    }

    fn raw(&self) -> String {
        self.description.clone()
    }
}

pub fn run(args: NetInfoArgs, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    let session = Session::open(link)?;
    let network = session.network(&args.network)?;
    let info = session
        .device
        .network_info(&network)
        .map_err(|e| engine_error("network info failed", e))?;

    let out = NetInfoOutput {
        description: info.description,
        ifm_sizes: info.ifm_sizes,
        ofm_sizes: info.ofm_sizes,
    };
    print(&out, format);
    Ok(SUCCESS)
}
