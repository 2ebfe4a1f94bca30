//! Show bundle information.

use std::path::PathBuf;

use trackmux_container::BundleManifest;
use trackmux_pipeline::FormatHint;

pub fn run(path: PathBuf) -> anyhow::Result<()> {
    let manifest =
        BundleManifest::load(&path).map_err(|e| anyhow::anyhow!("Failed to load bundle: {e}"))?;

    println!("Bundle: {}", path.display());
    println!("  Version: {}", manifest.version);
    println!("  Container: {}", manifest.container);
    println!("  Created: {}", manifest.created_at);
    println!("  Session start: {}", manifest.session_start);
    println!("  Duration: {:.3}s", manifest.duration_secs);
    println!();

    println!("Tracks:");
    for track in &manifest.tracks {
        let format = match &track.format {
            FormatHint::Passthrough {
                source_track: Some(id),
            } => format!("passthrough from track {id}"),
            FormatHint::Passthrough { source_track: None } => "passthrough".to_string(),
            FormatHint::Metadata { format } => {
                let identifiers: Vec<&str> = format
                    .specs
                    .iter()
                    .map(|spec| spec.identifier.as_str())
                    .collect();
                format!("metadata [{}]", identifiers.join(", "))
            }
            FormatHint::PixelBuffer { attributes } => format!(
                "pixel buffer {}x{} {:?}",
                attributes.width, attributes.height, attributes.format
            ),
        };
        println!(
            "  #{} {} ({}): {} samples, {:.3}s, {}",
            track.id, track.label, track.kind, track.sample_count, track.duration_secs, format
        );
    }

    Ok(())
}
