// Command handler for: Analyze

use miette::IntoDiagnostic;

use sleuth_engine::detect::DetectorSet;
use sleuth_engine::pipeline::{analyze_events, AnalysisOptions};
use sleuth_engine::result::AnalysisReport;

use super::helpers::{load_metadata, open_trace};
use crate::cli::{OutputFormat, TraceArgs};

pub(crate) fn detectors(race: bool, deadlock: bool, atomicity: bool) -> miette::Result<DetectorSet> {
    let detectors = DetectorSet {
        race,
        deadlock,
        atomicity,
    };
    if detectors == DetectorSet::none() {
        miette::bail!("--no-race leaves nothing to detect; add --deadlock or --atomicity");
    }
    Ok(detectors)
}

pub(crate) fn run_analyze_command(args: &TraceArgs, options: &AnalysisOptions) -> miette::Result<()> {
    let metadata = load_metadata(args.metadata.as_deref())?;
    let events = open_trace(&args.trace)?;
    let report = analyze_events(events, metadata, options).into_diagnostic()?;
    print!("{}", render_report(&report, args.format)?);
    Ok(())
}

pub(crate) fn render_report(report: &AnalysisReport, format: OutputFormat) -> miette::Result<String> {
    match format {
        OutputFormat::Text => Ok(format!("{report}\n")),
        OutputFormat::Json => {
            let mut json = report.to_json().into_diagnostic()?;
            json.push('\n');
            Ok(json)
        }
    }
}
