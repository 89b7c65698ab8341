//! Scan token rendering. Deterministic: the same token always yields the
//! same image.

use anyhow::Result;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{ImageFormat, Luma};
use qrcode::QrCode;

const DATA_URL_PREFIX: &str = "data:image/png;base64,";

pub fn render_png(token: &str) -> Result<Vec<u8>> {
    let code = QrCode::new(token.as_bytes())?;
    let img = code.render::<Luma<u8>>().min_dimensions(200, 200).build();

    let mut png = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(png)
}

pub fn render_data_url(token: &str) -> Result<String> {
    Ok(format!("{}{}", DATA_URL_PREFIX, STANDARD.encode(render_png(token)?)))
}

/// Recover PNG bytes from a stored data URL. `None` if it is not one.
pub fn decode_data_url(data_url: &str) -> Option<Vec<u8>> {
    let encoded = data_url.strip_prefix(DATA_URL_PREFIX)?;
    STANDARD.decode(encoded).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendering_is_deterministic() {
        let token = "TKT-abc-def-1700000000000-00ff";
        assert_eq!(render_data_url(token).unwrap(), render_data_url(token).unwrap());
    }

    #[test]
    fn data_url_wraps_png() {
        let url = render_data_url("hello").unwrap();
        let png = decode_data_url(&url).unwrap();
        assert_eq!(&png[..4], b"\x89PNG");
        assert!(decode_data_url("not a data url").is_none());
    }
}
