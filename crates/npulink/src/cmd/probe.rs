use npulink_engine::{Capabilities, PROTOCOL_VERSION};
use serde::Serialize;

use crate::cmd::{LinkArgs, ProbeArgs, Session};
use crate::exit::{CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print, OutputFormat, Render};

#[derive(Serialize)]
struct ProbeOutput {
    protocol_version: String,
    capabilities: Capabilities,
}

impl Render for ProbeOutput {
    fn rows(&self) -> Vec<(&'static str, String)> {
        let hw = &self.capabilities.hw_id;
        let cfg = &self.capabilities.hw_cfg;
        let driver = &self.capabilities.driver;
        vec![
            ("Protocol", self.protocol_version.clone()),
            ("Product", format!("r{}", hw.product_major)),
            (
                "Architecture",
                format!(
                    "{}.{}.{}",
                    hw.arch_major_rev, hw.arch_minor_rev, hw.arch_patch_rev
                ),
            ),
            (
                "HW version",
                format!(
                    "{}.{} (status {})",
                    hw.version_major, hw.version_minor, hw.version_status
                ),
            ),
            ("MACs per cycle", cfg.macs_per_cc.to_string()),
            ("Command stream", cfg.cmd_stream_version.to_string()),
            ("Custom DMA", cfg.custom_dma.to_string()),
            (
                "Driver",
                format!("{}.{}.{}", driver.major, driver.minor, driver.patch),
            ),
        ]
    }

    fn raw(&self) -> String {
        self.capabilities.hw_id.product_major.to_string()
    }
}

pub fn run(_args: ProbeArgs, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    let session = Session::open(link)?;
    let capabilities = session
        .device
        .capabilities()
        .ok_or_else(|| CliError::new(INTERNAL, "capabilities missing after probe"))?;

    let out = ProbeOutput {
        protocol_version: PROTOCOL_VERSION.to_string(),
        capabilities,
    };
    print(&out, format);
    Ok(SUCCESS)
}
