//! Synthesize a source bundle.

use std::path::PathBuf;

use trackmux_container::{synthesize_bundle, SyntheticSource};

pub fn run(dir: PathBuf, duration: f64, audio: bool, video: bool) -> anyhow::Result<()> {
    if !duration.is_finite() || duration <= 0.0 {
        anyhow::bail!("Duration must be positive, got {duration}");
    }

    // Neither flag means both.
    let (audio, video) = if audio || video {
        (audio, video)
    } else {
        (true, true)
    };

    println!("Creating source bundle at {}", dir.display());
    let manifest = synthesize_bundle(
        &dir,
        &SyntheticSource {
            duration_secs: duration,
            audio,
            video,
        },
    )
    .map_err(|e| anyhow::anyhow!("Failed to create bundle: {e}"))?;

    println!("Bundle created successfully:");
    for track in &manifest.tracks {
        println!(
            "  {} ({}): {} samples, {:.2}s",
            track.label, track.file, track.sample_count, track.duration_secs
        );
    }

    Ok(())
}
