//! Render `otpauth://` URLs as inline SVG QR codes.

use qrcode::{render::svg, EcLevel, QrCode};
use thiserror::Error;

const MODULE_SIZE: u32 = 10;
const DARK: &str = "#000000";
const LIGHT: &str = "#FFFFFF";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QrError {
    #[error("nothing to encode")]
    Empty,
    #[error("failed to encode QR code: {0}")]
    Encode(String),
}

/// Encode a TOTP URL as an `<svg>` element ready to be embedded in HTML.
///
/// Low error correction, 10px modules and a 4-module quiet zone.
///
/// # Errors
/// Returns an error if the URL is empty or too long for a QR code.
pub fn totp_svg(url: &str) -> Result<String, QrError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(QrError::Empty);
    }

    let code = QrCode::with_error_correction_level(url.as_bytes(), EcLevel::L)
        .map_err(|e| QrError::Encode(e.to_string()))?;

    let image = code
        .render::<svg::Color<'_>>()
        .module_dimensions(MODULE_SIZE, MODULE_SIZE)
        .quiet_zone(true)
        .dark_color(svg::Color(DARK))
        .light_color(svg::Color(LIGHT))
        .build();

    // drop the XML declaration, it is not valid inside an HTML document
    let svg = image
        .find("<svg")
        .map_or(image.as_str(), |start| &image[start..]);

    Ok(svg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_inline_svg() {
        let svg = totp_svg(
            "otpauth://totp/multiOTP:John%20Doe?secret=JBSWY3DPEHPK3PXP&digits=6&period=30",
        )
        .expect("svg");

        assert!(svg.starts_with("<svg"));
        assert!(svg.trim_end().ends_with("</svg>"));
        assert!(!svg.contains("<?xml"));
        assert!(svg.contains(DARK));
        assert!(svg.contains(LIGHT));
    }

    #[test]
    fn trims_cli_newline() {
        let with_newline = totp_svg("otpauth://totp/x?secret=AAAA\n").expect("svg");
        let without = totp_svg("otpauth://totp/x?secret=AAAA").expect("svg");
        assert_eq!(with_newline, without);
    }

    #[test]
    fn empty_input_is_rejected() {
        assert_eq!(totp_svg("  \n"), Err(QrError::Empty));
    }

    #[test]
    fn oversized_input_is_rejected() {
        let url = "a".repeat(8000);
        assert!(matches!(totp_svg(&url), Err(QrError::Encode(_))));
    }
}
