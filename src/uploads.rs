use std::path::Path;

use actix_multipart::Multipart;
use actix_web::{web, FromRequest, HttpMessage, HttpRequest};
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use rand_core::{OsRng, RngCore};

use crate::{
    error::{AppError, AppResult},
    forms::AppointmentInput,
};

const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;
const MAX_TEXT_BYTES: usize = 64 * 1024;
const IMAGE_FIELD: &str = "image";
const CLEAR_IMAGE_FIELD: &str = "image_clear";

#[derive(Debug)]
pub struct ImageUpload {
    pub bytes: Vec<u8>,
    /// Taken from the file signature, `None` when it is not a supported image.
    pub extension: Option<&'static str>,
}

/// An appointment form as posted by the browser.
#[derive(Debug, Default)]
pub struct AppointmentSubmission {
    pub input: AppointmentInput,
    pub image: Option<ImageUpload>,
    pub clear_image: bool,
}

/// Reads either a `multipart/form-data` or an urlencoded appointment form.
pub async fn read_submission(
    req: &HttpRequest,
    payload: web::Payload,
) -> AppResult<AppointmentSubmission> {
    if !req.content_type().eq_ignore_ascii_case("multipart/form-data") {
        let mut payload = payload.into_inner();
        let form = web::Form::<AppointmentInput>::from_request(req, &mut payload)
            .await
            .map_err(|err| AppError::BadRequest(err.to_string()))?;
        return Ok(AppointmentSubmission {
            input: form.into_inner(),
            ..AppointmentSubmission::default()
        });
    }

    let mut multipart = Multipart::new(req.headers(), payload);
    let mut submission = AppointmentSubmission::default();

    while let Some(mut field) = multipart
        .try_next()
        .await
        .map_err(|err| AppError::BadRequest(err.to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        let has_file_name = field
            .content_disposition()
            .and_then(|disposition| disposition.get_filename())
            .is_some_and(|file_name| !file_name.is_empty());
        let limit = if name == IMAGE_FIELD {
            MAX_IMAGE_BYTES
        } else {
            MAX_TEXT_BYTES
        };

        let mut bytes = Vec::new();
        while let Some(chunk) = field
            .try_next()
            .await
            .map_err(|err| AppError::BadRequest(err.to_string()))?
        {
            if bytes.len() + chunk.len() > limit {
                return Err(AppError::BadRequest(format!(
                    "field {name} is larger than {limit} bytes"
                )));
            }
            bytes.extend_from_slice(&chunk);
        }

        match name.as_str() {
            IMAGE_FIELD => {
                // Browsers send an empty file part when nothing was chosen.
                if has_file_name && !bytes.is_empty() {
                    submission.image = Some(ImageUpload {
                        extension: sniff_image(&bytes),
                        bytes,
                    });
                }
            }
            CLEAR_IMAGE_FIELD => submission.clear_image = true,
            _ => {
                let value = String::from_utf8(bytes)
                    .map_err(|_| AppError::BadRequest(format!("field {name} is not UTF-8")))?;
                submission.input.set_field(&name, value);
            }
        }
    }

    Ok(submission)
}

fn sniff_image(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("jpg")
    } else if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("png")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("gif")
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("webp")
    } else {
        None
    }
}

/// Writes the image to `media_root/imagens/<yy>/<mm>/` under a generated name
/// and returns its path relative to `media_root`.
pub async fn save_image(
    media_root: &Path,
    bytes: Vec<u8>,
    extension: &str,
    now: DateTime<Utc>,
) -> AppResult<String> {
    let relative = format!(
        "imagens/{}/{:016x}.{extension}",
        now.format("%y/%m"),
        OsRng.next_u64()
    );
    let target = media_root.join(&relative);

    web::block(move || {
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&target, bytes)
    })
    .await
    .map_err(|err| AppError::Media(std::io::Error::other(err.to_string())))??;

    Ok(relative)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{temp_media_root, PNG_BYTES};
    use chrono::TimeZone;

    #[test]
    fn recognises_supported_image_signatures() {
        assert_eq!(sniff_image(PNG_BYTES), Some("png"));
        assert_eq!(sniff_image(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00]), Some("jpg"));
        assert_eq!(sniff_image(b"GIF89a\x01\x00"), Some("gif"));
        assert_eq!(sniff_image(b"RIFF\x00\x00\x00\x00WEBPVP8 "), Some("webp"));
        assert_eq!(sniff_image(b"<svg></svg>"), None);
        assert_eq!(sniff_image(b""), None);
    }

    #[actix_web::test]
    async fn saves_under_year_and_month() {
        let media_root = temp_media_root();
        let now = Utc.with_ymd_and_hms(2025, 4, 6, 20, 0, 0).unwrap();
        let relative = save_image(&media_root, PNG_BYTES.to_vec(), "png", now)
            .await
            .unwrap();
        assert!(relative.starts_with("imagens/25/04/"), "{relative}");
        assert!(relative.ends_with(".png"));
        assert_eq!(std::fs::read(media_root.join(&relative)).unwrap(), PNG_BYTES);

        let other = save_image(&media_root, PNG_BYTES.to_vec(), "png", now)
            .await
            .unwrap();
        assert_ne!(relative, other);
    }
}
