//! Display utilities for the console

use colored::Colorize;
use fob_provision::{Direction, Fob, Notice, VerifyReport, Workflow};

/// Format a success message
pub(crate) fn success(message: &str) -> String {
    format!("✅ {}", message.green().bold())
}

/// Format a warning message
pub(crate) fn warning(message: &str) -> String {
    format!("⚠️  {}", message.yellow().bold())
}

/// Format an error message
pub(crate) fn failure(message: &str) -> String {
    format!("❌ {}", message.red().bold())
}

/// Format an info message
pub(crate) fn info(message: &str) -> String {
    format!("ℹ️  {}", message.blue())
}

/// Format a question the operator answers with y/n
pub(crate) fn question(message: &str) -> String {
    format!("❓ {} {}", message.bold(), "[y/n]".dimmed())
}

/// One line per record, for the `list` command
pub(crate) fn fob_row(fob: &Fob) -> String {
    let state = if fob.uploaded {
        "uploaded".green()
    } else if fob.initialized {
        "initialized".yellow()
    } else {
        "new".normal()
    };
    format!(
        "{:>4}  {}  {:<12} {}",
        fob.id,
        fob.display_number().bold(),
        state,
        fob.last_operation.dimmed()
    )
}

fn verify_line(report: &VerifyReport) -> String {
    let position = format!(
        "{} ({} of {})",
        report.fob.display_number(),
        report.ordinal + 1,
        report.total
    );
    if report.status.is_success() {
        let upload = if report.fob.uploaded {
            "uploaded"
        } else {
            "not uploaded"
        };
        success(&format!("Verified {position}, {upload}"))
    } else {
        failure(&format!(
            "Verify failed for {position}: res = {}",
            report.status.to_hex()
        ))
    }
}

/// Render a notice, or `None` for notices that only matter in verbose mode
pub(crate) fn notice(notice: &Notice, verbose: bool) -> Option<String> {
    match notice {
        Notice::ReaderAttached(reader) => Some(info(&format!("Reader attached: {reader}"))),
        Notice::ReaderDetached(reader) => Some(warning(&format!("Reader detached: {reader}"))),
        Notice::Card(Some(serial)) => Some(info(&format!(
            "Fob {} on the reader",
            fob_provision::fob::display_number(serial)
        ))),
        Notice::Card(None) => verbose.then(|| info("Fob removed")),
        Notice::Workflow { workflow, busy } => match (workflow, busy) {
            (Workflow::Idle, false) => Some(info("Idle")),
            (workflow, false) => Some(info(&format!("{workflow}: tap a fob"))),
            (_, true) => verbose.then(|| info("Working...")),
        },
        Notice::Trace {
            label,
            direction,
            hex,
            ..
        } => verbose.then(|| {
            let arrow = match direction {
                Direction::Request => ">>",
                Direction::Response => "<<",
            };
            format!("   {arrow} {:<32} {}", label, hex.dimmed())
        }),
        Notice::Fob(fob)
            if fob.initialized && !fob.uploaded && fob.last_operation.starts_with("Add secret") =>
        {
            Some(success(&format!("Initialized {}", fob.display_number())))
        }
        Notice::Fob(_) => None,
        Notice::Failure(message) => Some(failure(message)),
        Notice::UploadInProgress(true) => Some(info("Uploading...")),
        Notice::UploadInProgress(false) => None,
        Notice::Uploaded { fob, ordinal } => Some(success(&format!(
            "Uploaded {} (#{})",
            fob.display_number(),
            ordinal + 1
        ))),
        Notice::VerifyResult(report) => Some(verify_line(report)),
        Notice::SelectionCleared => verbose.then(|| info("Selection cleared")),
        Notice::Interrupted(workflow) => Some(warning(&format!(
            "{workflow} stopped: the reader was removed"
        ))),
    }
}
