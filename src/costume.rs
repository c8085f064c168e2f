//! Costume assets and their decoding.
//!
//! A costume keeps its encoded bytes (SVG or PNG) plus the metadata the
//! renderer needs. Decoding only extracts the bitmap geometry: SVG bounds
//! from the root element, PNG dimensions from the IHDR chunk.

use crate::error::LoadError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use xmltree::Element;

pub const DEFAULT_COSTUME_SVG: &str =
    r##"<svg xmlns="http://www.w3.org/2000/svg" width="1" height="1" viewBox="0 0 1 1"></svg>"##;
const DEFAULT_SVG_SIZE: f64 = 64.0;
const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    Svg,
    Png,
}

impl DataFormat {
    pub fn extension(self) -> &'static str {
        match self {
            DataFormat::Svg => "svg",
            DataFormat::Png => "png",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "svg" => Some(DataFormat::Svg),
            "png" => Some(DataFormat::Png),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Costume {
    pub name: String,
    /// md5 of `data`, hex encoded.
    pub asset_id: String,
    pub data_format: DataFormat,
    pub data: Arc<Vec<u8>>,
    pub rotation_center_x: f64,
    pub rotation_center_y: f64,
    pub bitmap_resolution: u32,
}

/// Geometry of a decoded costume, in stage units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bitmap {
    pub width: f64,
    pub height: f64,
}

impl Costume {
    /// Builds a costume from encoded bytes, centring the rotation point on
    /// the decoded bounds. Fails when the bytes do not decode.
    pub fn from_bytes(name: &str, format: DataFormat, data: Vec<u8>) -> Result<Self, LoadError> {
        let mut costume = Self::raw(name, format, data, 0.0, 0.0);
        let bitmap = costume.decode()?;
        costume.rotation_center_x = bitmap.width * costume.bitmap_resolution as f64 / 2.0;
        costume.rotation_center_y = bitmap.height * costume.bitmap_resolution as f64 / 2.0;
        Ok(costume)
    }

    /// Builds a costume without decoding it.
    pub fn raw(name: &str, format: DataFormat, data: Vec<u8>, center_x: f64, center_y: f64) -> Self {
        Self {
            name: name.to_string(),
            asset_id: format!("{:x}", md5::compute(&data)),
            data_format: format,
            data: Arc::new(data),
            rotation_center_x: center_x,
            rotation_center_y: center_y,
            bitmap_resolution: 1,
        }
    }

    pub fn default_svg(name: &str) -> Self {
        Self::raw(name, DataFormat::Svg, DEFAULT_COSTUME_SVG.as_bytes().to_vec(), 0.5, 0.5)
    }

    /// Loads a costume file. Relative paths are tried against `source_dir`,
    /// its parent and the working directory, in that order.
    pub fn from_file(path: &str, source_dir: &Path) -> Result<Self, LoadError> {
        let file_path = resolve_asset_path(path, source_dir);
        if !file_path.is_file() {
            return Err(LoadError::Costume(format!(
                "costume file '{}' resolved to '{}', which does not exist",
                path,
                file_path.display()
            )));
        }
        let ext = file_path
            .extension()
            .and_then(|x| x.to_str())
            .unwrap_or("")
            .to_lowercase();
        let format = DataFormat::from_extension(&ext).ok_or_else(|| {
            LoadError::Costume(format!(
                "unsupported costume format '.{}' for '{}'; only .svg and .png are supported",
                ext,
                file_path.display()
            ))
        })?;
        let name = file_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("costume")
            .to_string();
        let data = fs::read(&file_path)?;
        Self::from_bytes(&name, format, data)
    }

    /// Asset file name inside a bundle: `<md5>.<ext>`.
    pub fn md5ext(&self) -> String {
        format!("{}.{}", self.asset_id, self.data_format.extension())
    }

    pub fn decode(&self) -> Result<Bitmap, LoadError> {
        let (width, height) = match self.data_format {
            DataFormat::Svg => {
                let (_, _, w, h) = read_svg_bounds(&self.data, &self.name)?;
                (w, h)
            }
            DataFormat::Png => read_png_size(&self.data, &self.name)?,
        };
        let resolution = self.bitmap_resolution.max(1) as f64;
        Ok(Bitmap {
            width: width / resolution,
            height: height / resolution,
        })
    }
}

fn resolve_asset_path(path: &str, source_dir: &Path) -> PathBuf {
    let file_path = Path::new(path).to_path_buf();
    if file_path.is_absolute() {
        return file_path;
    }
    let mut candidates = vec![source_dir.join(&file_path)];
    if let Some(parent) = source_dir.parent() {
        candidates.push(parent.join(&file_path));
    }
    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd.join(&file_path));
    }
    match candidates.iter().find(|p| p.exists()) {
        Some(found) => found.clone(),
        None => candidates.swap_remove(0),
    }
}

/// Returns `(min_x, min_y, width, height)`, preferring the viewBox over the
/// width/height attributes.
fn read_svg_bounds(data: &[u8], source_name: &str) -> Result<(f64, f64, f64, f64), LoadError> {
    let root = Element::parse(Cursor::new(data))
        .map_err(|e| LoadError::Costume(format!("invalid SVG '{}': {}", source_name, e)))?;
    if root.name != "svg" {
        return Err(LoadError::Costume(format!(
            "'{}' has root element <{}>, expected <svg>",
            source_name, root.name
        )));
    }
    if let Some(view_box) = root.attributes.get("viewBox") {
        if let Some(parsed) = parse_view_box(view_box, source_name)? {
            return Ok(parsed);
        }
    }
    let width = parse_svg_length(root.attributes.get("width").map(|s| s.as_str()));
    let height = parse_svg_length(root.attributes.get("height").map(|s| s.as_str()));
    if let (Some(w), Some(h)) = (width, height) {
        return Ok((0.0, 0.0, w, h));
    }
    Ok((0.0, 0.0, DEFAULT_SVG_SIZE, DEFAULT_SVG_SIZE))
}

fn parse_view_box(
    view_box: &str,
    source_name: &str,
) -> Result<Option<(f64, f64, f64, f64)>, LoadError> {
    let parts = view_box
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| {
            LoadError::Costume(format!("invalid SVG viewBox in '{}': '{}'", source_name, view_box))
        })?;
    let &[min_x, min_y, width, height] = parts.as_slice() else {
        return Ok(None);
    };
    if width <= 0.0 || height <= 0.0 {
        return Err(LoadError::Costume(format!(
            "SVG viewBox must have positive width/height in '{}'",
            source_name
        )));
    }
    Ok(Some((min_x, min_y, width, height)))
}

/// Leading numeric part of an SVG length (`"120px"` -> 120). Only positive
/// lengths count.
fn parse_svg_length(value: Option<&str>) -> Option<f64> {
    let s = value?.trim_start();
    let end = s
        .char_indices()
        .find(|(i, c)| !(c.is_ascii_digit() || *c == '.' || (*i == 0 && matches!(c, '+' | '-'))))
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    let n = s[..end].parse::<f64>().ok()?;
    if n > 0.0 {
        Some(n)
    } else {
        None
    }
}

fn read_png_size(data: &[u8], source_name: &str) -> Result<(f64, f64), LoadError> {
    if data.len() < 24 || !data.starts_with(PNG_SIGNATURE) || &data[12..16] != b"IHDR" {
        return Err(LoadError::Costume(format!(
            "'{}' is not a PNG image",
            source_name
        )));
    }
    let width = u32::from_be_bytes([data[16], data[17], data[18], data[19]]);
    let height = u32::from_be_bytes([data[20], data[21], data[22], data[23]]);
    if width == 0 || height == 0 {
        return Err(LoadError::Costume(format!(
            "PNG '{}' has zero dimensions",
            source_name
        )));
    }
    Ok((width as f64, height as f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_header(width: u32, height: u32) -> Vec<u8> {
        let mut data = PNG_SIGNATURE.to_vec();
        data.extend_from_slice(&13u32.to_be_bytes());
        data.extend_from_slice(b"IHDR");
        data.extend_from_slice(&width.to_be_bytes());
        data.extend_from_slice(&height.to_be_bytes());
        data.extend_from_slice(&[8, 6, 0, 0, 0]);
        data
    }

    #[test]
    fn svg_view_box_sets_rotation_center() {
        let svg = br#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 40 20"></svg>"#;
        let costume = Costume::from_bytes("box", DataFormat::Svg, svg.to_vec()).unwrap();
        assert_eq!(costume.rotation_center_x, 20.0);
        assert_eq!(costume.rotation_center_y, 10.0);
        assert_eq!(costume.md5ext(), format!("{:x}.svg", md5::compute(svg)));
    }

    #[test]
    fn svg_width_height_used_without_view_box() {
        let svg = br#"<svg xmlns="http://www.w3.org/2000/svg" width="30px" height="12"></svg>"#;
        let bitmap = Costume::raw("c", DataFormat::Svg, svg.to_vec(), 0.0, 0.0)
            .decode()
            .unwrap();
        assert_eq!(bitmap, Bitmap { width: 30.0, height: 12.0 });
    }

    #[test]
    fn png_dimensions_come_from_ihdr() {
        let costume = Costume::from_bytes("p", DataFormat::Png, png_header(64, 32)).unwrap();
        assert_eq!(costume.decode().unwrap(), Bitmap { width: 64.0, height: 32.0 });
        assert_eq!(costume.rotation_center_x, 32.0);
    }

    #[test]
    fn garbage_does_not_decode() {
        let costume = Costume::raw("bad", DataFormat::Png, b"not an image".to_vec(), 0.0, 0.0);
        assert!(costume.decode().is_err());
        assert!(Costume::from_bytes("bad", DataFormat::Svg, b"<svg".to_vec()).is_err());
    }
}
