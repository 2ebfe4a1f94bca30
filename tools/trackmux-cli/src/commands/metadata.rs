//! Print the timed metadata tracks of a bundle.

use std::path::PathBuf;

use trackmux_container::{read_timed_metadata, BundleReader};
use trackmux_media_model::MetadataValue;

pub fn run(path: PathBuf) -> anyhow::Result<()> {
    let mut reader =
        BundleReader::open(&path).map_err(|e| anyhow::anyhow!("Failed to open bundle: {e}"))?;
    let tracks = read_timed_metadata(&mut reader)
        .map_err(|e| anyhow::anyhow!("Failed to read metadata: {e}"))?;

    if tracks.is_empty() {
        println!("No metadata tracks in {}", path.display());
        return Ok(());
    }

    for (index, groups) in tracks.iter().enumerate() {
        println!("Metadata track {index} ({} groups):", groups.len());
        for group in groups {
            println!(
                "  [{} +{}]",
                group.time_range.start, group.time_range.duration
            );
            for item in &group.items {
                let identifier = item.identifier.as_deref().unwrap_or("<none>");
                let data_type = item.data_type.as_deref().unwrap_or("?");
                match &item.value {
                    MetadataValue::Utf8(text) => {
                        println!("    {identifier} ({data_type}): {text}")
                    }
                    MetadataValue::Data(bytes) => {
                        println!("    {identifier} ({data_type}): {} bytes", bytes.len())
                    }
                }
            }
        }
    }

    Ok(())
}
