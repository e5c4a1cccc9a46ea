use std::io::{self, Write};

use serde::Serialize;

use crate::pipeline::{ProgressEvent, ProgressSink, RunReport};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_run(report: &RunReport) -> io::Result<()> {
        Self::print_json(report)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => tracing::info!(
                elapsed_ms = elapsed.as_millis() as u64,
                "{}",
                event.message
            ),
            None => tracing::info!("{}", event.message),
        }
    }
}

pub fn print_summary(report: &RunReport) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";

    println!("{cyan}{} summary{reset}", report.transform.name);
    println!("{cyan}  transform: {}{reset}", report.transform.id);
    for file in &report.files {
        println!("{green}  file {} ({} bytes){reset}", file.key, file.size);
    }
    let matrix = &report.matrix;
    println!(
        "{green}  matrix \"{}\": {} barcodes x {} genes, {} stored values{reset}",
        matrix.description, matrix.n_obs, matrix.n_vars, matrix.nnz
    );
    if matrix.unresolved_vars > 0 {
        println!(
            "{yellow}  {} of {} genes did not resolve on {}{reset}",
            matrix.unresolved_vars, matrix.n_vars, matrix.field
        );
    }
    println!("Done!");
}
