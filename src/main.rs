//
// main.rs
// Dicom-Trolley-Tool-rs
//
// Entry point that hands off execution to the CLI layer.
//
// Thales Matheus Mendonça Santos - October 2026

use dicom_trolley_tool::cli;

fn main() -> anyhow::Result<()> {
    cli::run()
}
