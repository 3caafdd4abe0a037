//! Check command - one enforcement pass with a summary table.

use std::path::PathBuf;

use comfy_table::{Cell, Table, presets::UTF8_FULL_CONDENSED};
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::watcher::{PathMatcher, ReconciliationResult, Reconciler, WatchSpec};

/// Outcome of the pass over one folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderReport {
    pub path: PathBuf,
    pub owner: (u32, u32),
    pub file_mode: u32,
    pub dir_mode: u32,
    pub result: ReconciliationResult,
}

/// Reconcile every spec once, in order.
pub fn check_all(
    specs: &[WatchSpec],
    reconciler: &Reconciler,
    cancel: &CancellationToken,
) -> Vec<FolderReport> {
    specs
        .iter()
        .map(|spec| {
            let matcher = PathMatcher::from_spec(spec);
            let result = reconciler.enforce_tree(spec, &matcher, cancel);
            result.log(&spec.path, if reconciler.is_dry_run() { "dry-run" } else { "check" });
            FolderReport {
                path: spec.path.clone(),
                owner: (spec.uid, spec.gid),
                file_mode: spec.file_mode,
                dir_mode: spec.dir_mode,
                result,
            }
        })
        .collect()
}

pub fn render(reports: &[FolderReport], dry_run: bool) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec![
        "Folder",
        "Owner",
        "File",
        "Dir",
        if dry_run { "Would fix" } else { "Fixed" },
        "OK",
        "Failed",
    ]);

    for report in reports {
        table.add_row(vec![
            Cell::new(report.path.display()),
            Cell::new(format!("{}:{}", report.owner.0, report.owner.1)),
            Cell::new(format!("{:04o}", report.file_mode)),
            Cell::new(format!("{:04o}", report.dir_mode)),
            Cell::new(report.result.fixed),
            Cell::new(report.result.skipped),
            Cell::new(report.result.failed),
        ]);
    }
    table
}

/// Run the check. Returns `true` when no entry failed.
///
/// A dry run changes nothing on disk, layout directories included.
pub async fn run(settings: &Settings, dry_run: bool) -> anyhow::Result<bool> {
    if !dry_run {
        settings.create_layout()?;
    }
    let specs = settings.watch_specs();
    let reconciler = Reconciler::default().with_dry_run(dry_run);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let walk_cancel = cancel.clone();
    let reports =
        tokio::task::spawn_blocking(move || check_all(&specs, &reconciler, &walk_cancel)).await?;

    println!("{}", render(&reports, dry_run));

    let mut total = ReconciliationResult::default();
    for report in &reports {
        total.merge(report.result);
    }
    let verb = if dry_run { "would fix" } else { "fixed" };
    println!(
        "{} folders: {} {verb}, {} ok, {} failed",
        reports.len(),
        total.fixed,
        total.skipped,
        total.failed
    );
    if cancel.is_cancelled() {
        println!("Interrupted, results are partial");
    }

    Ok(total.failed == 0)
}
