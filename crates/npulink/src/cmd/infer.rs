use std::time::{Duration, Instant};

use npulink_engine::{
    Buffer, CancelStatus, EngineError, Inference, InferenceResult, InferenceStatus, PmuConfig,
};
use npulink_wire::PMU_MAX;
use serde::Serialize;
use tracing::{debug, info};

use crate::cmd::{interrupted, parse_duration, InferArgs, LinkArgs, Session};
use crate::exit::{engine_error, CliError, CliResult, FAILURE, SUCCESS, TIMEOUT, USAGE};
use crate::output::{join_list, print, OutputFormat, Render};

const WAIT_SLICE: Duration = Duration::from_millis(50);

#[derive(Serialize)]
struct InferOutput {
    id: u64,
    #[serde(flatten)]
    result: InferenceResult,
    cancel: Option<CancelStatus>,
    ofm_sizes: Vec<usize>,
}

impl Render for InferOutput {
    fn rows(&self) -> Vec<(&'static str, String)> {
        let counted: Vec<String> = self
            .result
            .pmu_event_config
            .iter()
            .zip(&self.result.pmu_event_count)
            .filter(|(event, _)| **event != 0)
            .map(|(event, count)| format!("{event}={count}"))
            .collect();
        let mut rows = vec![
            ("Inference", format!("{:#x}", self.id)),
            ("Status", self.result.status.to_string()),
            ("Outputs", join_list(&self.ofm_sizes)),
            ("PMU events", join_list(&counted)),
        ];
        if self.result.pmu_cycle_counter_enable {
            rows.push(("Cycles", self.result.pmu_cycle_counter_count.to_string()));
        }
        if let Some(cancel) = self.cancel {
            rows.push(("Cancel", cancel.to_string()));
        }
        rows
    }

    fn raw(&self) -> String {
        self.result.status.to_string()
    }
}

pub fn run(args: InferArgs, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    if args.pmu_event.len() > PMU_MAX {
        return Err(CliError::new(
            USAGE,
            format!("at most {PMU_MAX} PMU events can be counted"),
        ));
    }
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let cancel_after = args
        .cancel_after
        .as_deref()
        .map(parse_duration)
        .transpose()?;

    let session = Session::open(link)?;
    let device = &session.device;
    let network = session.network(&args.network)?;
    let ifm = create_buffers(&session, &args.ifm_size)?;
    let ofm = create_buffers(&session, &args.ofm_size)?;
    if let Some(path) = &args.input {
        let data = std::fs::read(path)
            .map_err(|e| CliError::new(USAGE, format!("cannot read {}: {e}", path.display())))?;
        let first = ifm
            .first()
            .ok_or_else(|| CliError::new(USAGE, "--input needs at least one input buffer"))?;
        let len = data.len().min(first.size());
        first
            .write(0, &data[..len])
            .map_err(|e| engine_error("write input", e))?;
        debug!(bytes = len, "input loaded");
    }

    let mut pmu = PmuConfig {
        cycle_counter: args.cycles,
        ..PmuConfig::default()
    };
    pmu.events[..args.pmu_event.len()].copy_from_slice(&args.pmu_event);

    let inference = device
        .create_inference(&network, &ifm, &ofm, pmu)
        .map_err(|e| engine_error("create inference", e))?;
    info!(id = inference.id(), "inference submitted");

    let mut cancel = match cancel_after {
        Some(delay) => {
            std::thread::sleep(delay);
            Some(cancel_inference(&inference)?)
        }
        None => None,
    };

    let result = match wait(&inference, wait_timeout) {
        Ok(result) => result,
        Err(Waited::Interrupted) => {
            cancel = Some(cancel_inference(&inference)?);
            inference
                .wait(wait_timeout)
                .map_err(|e| engine_error("wait after cancel", e))?
        }
        Err(Waited::TimedOut) => {
            return Err(CliError::new(
                TIMEOUT,
                format!("inference not finished after {wait_timeout:?}"),
            ));
        }
    };

    let code = match result.status {
        InferenceStatus::Ok => SUCCESS,
        InferenceStatus::Aborted if cancel == Some(CancelStatus::Ok) => SUCCESS,
        _ => FAILURE,
    };
    let out = InferOutput {
        id: inference.id(),
        result,
        cancel,
        ofm_sizes: ofm.iter().map(Buffer::size).collect(),
    };
    print(&out, format);
    Ok(code)
}

fn create_buffers(session: &Session, sizes: &[usize]) -> CliResult<Vec<Buffer>> {
    sizes
        .iter()
        .map(|&size| session.device.create_buffer(size))
        .collect::<Result<_, EngineError>>()
        .map_err(|e| engine_error("create buffer", e))
}

fn cancel_inference(inference: &Inference) -> CliResult<CancelStatus> {
    let status = inference
        .cancel()
        .map_err(|e| engine_error("cancel failed", e))?;
    info!(id = inference.id(), %status, "cancel answered");
    Ok(status)
}

enum Waited {
    TimedOut,
    Interrupted,
}

/// Wait in short slices so Ctrl-C can turn into a cancel.
fn wait(inference: &Inference, timeout: Duration) -> Result<InferenceResult, Waited> {
    let deadline = Instant::now().checked_add(timeout);
    loop {
        let slice = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(Waited::TimedOut);
                }
                remaining.min(WAIT_SLICE)
            }
            None => WAIT_SLICE,
        };
        match inference.wait(slice) {
            Ok(result) => return Ok(result),
            Err(_) if interrupted() => return Err(Waited::Interrupted),
            Err(_) => {}
        }
    }
}
