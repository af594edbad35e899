// ============================================================================
// IO COLLABORATORS — file input, download hand-off, persisted scene history
// ============================================================================
//
// The editor core only hands finished pixel buffers to these; nothing here
// reaches back into the scene graph.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64_STANDARD};
use image::RgbaImage;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::{log_err, log_info};

// ---------------------------------------------------------------------------
//  Data URIs
// ---------------------------------------------------------------------------

/// Encode PNG bytes as a `data:image/png;base64,...` URI.
pub fn png_data_uri(png: &[u8]) -> String {
    format!("data:image/png;base64,{}", BASE64_STANDARD.encode(png))
}

/// Decode a base64 data URI (any media type) back into raw bytes.
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>, String> {
    let payload = uri
        .split_once(";base64,")
        .map(|(_, rest)| rest)
        .ok_or_else(|| "not a base64 data URI".to_string())?;
    BASE64_STANDARD
        .decode(payload)
        .map_err(|e| format!("bad base64 payload: {}", e))
}

// ---------------------------------------------------------------------------
//  File input collaborator
// ---------------------------------------------------------------------------

/// Native open dialog for an image upload.  Returns `None` when cancelled.
pub fn pick_image_file() -> Option<PathBuf> {
    rfd::FileDialog::new()
        .add_filter(
            "Images",
            &["png", "jpg", "jpeg", "webp", "bmp", "gif"],
        )
        .pick_file()
}

/// Read and decode an image file into RGBA.
pub fn read_image_file(path: &PathBuf) -> Result<RgbaImage, String> {
    let bytes = std::fs::read(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    image::load_from_memory(&bytes)
        .map(|img| img.into_rgba8())
        .map_err(|e| format!("{}: {}", path.display(), e))
}

// ---------------------------------------------------------------------------
//  Download collaborator
// ---------------------------------------------------------------------------

/// Suggested filename for an exported scene.
pub fn suggested_scene_filename() -> String {
    format!("gacha-scene-{}.png", unix_now())
}

/// Native save dialog + write.  Returns the chosen path, or `None` when
/// the user cancelled.
pub fn save_png_dialog(suggested_name: &str, png: &[u8]) -> Result<Option<PathBuf>, String> {
    let Some(path) = rfd::FileDialog::new()
        .set_file_name(suggested_name)
        .add_filter("PNG image", &["png"])
        .save_file()
    else {
        return Ok(None);
    };
    std::fs::write(&path, png).map_err(|e| format!("{}: {}", path.display(), e))?;
    log_info!("saved scene to {}", path.display());
    Ok(Some(path))
}

// ---------------------------------------------------------------------------
//  Persisted scene history collaborator (one-way)
// ---------------------------------------------------------------------------

/// Record written after each successful capture.  The editor never reads
/// these back into the live scene.
#[derive(Clone, Debug, Serialize)]
pub struct StoredScene {
    pub id: Uuid,
    /// Thumbnail as a PNG data URI.
    pub thumbnail: String,
    pub timestamp: u64,
}

#[derive(Default)]
pub struct SceneHistory {
    records: Vec<StoredScene>,
    /// `None` disables on-disk persistence (tests).
    path: Option<PathBuf>,
}

impl SceneHistory {
    /// History persisted as JSON lines next to the session log.
    pub fn with_default_path() -> Self {
        let path = crate::logger::log_path()
            .and_then(|p| p.parent().map(|d| d.join("scene-history.jsonl")));
        Self {
            records: Vec::new(),
            path,
        }
    }

    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[StoredScene] {
        &self.records
    }

    /// Append a record for a finished capture.
    pub fn push(&mut self, thumbnail_png: &[u8]) -> &StoredScene {
        let record = StoredScene {
            id: Uuid::new_v4(),
            thumbnail: png_data_uri(thumbnail_png),
            timestamp: unix_now(),
        };
        self.append_to_disk(&record);
        self.records.push(record);
        self.records.last().expect("just pushed")
    }

    fn append_to_disk(&self, record: &StoredScene) {
        let Some(path) = &self.path else { return };
        let line = match serde_json::to_string(record) {
            Ok(l) => l,
            Err(e) => {
                log_err!("scene history: serialize failed: {}", e);
                return;
            }
        };
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| writeln!(f, "{}", line));
        if let Err(e) = result {
            log_err!("scene history: write to {} failed: {}", path.display(), e);
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_uri_round_trip() {
        let bytes = vec![1u8, 2, 3, 250, 0, 77];
        let uri = png_data_uri(&bytes);
        assert!(uri.starts_with("data:image/png;base64,"));
        assert_eq!(decode_data_uri(&uri).unwrap(), bytes);
    }

    #[test]
    fn decode_rejects_non_data_uris() {
        assert!(decode_data_uri("https://example.com/x.png").is_err());
        assert!(decode_data_uri("data:image/png;base64,@@@").is_err());
    }

    #[test]
    fn suggested_filename_shape() {
        let name = suggested_scene_filename();
        assert!(name.starts_with("gacha-scene-"));
        assert!(name.ends_with(".png"));
    }

    #[test]
    fn scene_history_appends_records_one_way() {
        let mut history = SceneHistory::in_memory();
        assert!(history.is_empty());
        let thumb = vec![9u8; 16];
        let id_first = history.push(&thumb).id;
        let id_second = history.push(&thumb).id;
        assert_eq!(history.len(), 2);
        assert_ne!(id_first, id_second);
        assert!(history.records()[0].thumbnail.starts_with("data:image/png;base64,"));
        assert!(history.records()[0].timestamp > 0);
    }
}
