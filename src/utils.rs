use chrono::NaiveDateTime;
use file_format::FileFormat;
use rand::distributions::Alphanumeric;
use rand::Rng;
use rocket::fs::TempFile;
use rocket::http::uri::Origin;
use rocket::http::RawStr;
use rocket::tokio::fs;
use rocket::tokio::io::AsyncReadExt;
use rocket::tokio::pin;
use serde::Serializer;
use std::io;
use std::path::Path;

pub const LOGIN_PATH: &str = "/auth/login/";

pub fn serialize_date<S>(date: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let s = date.format("%d.%m.%Y %H:%M").to_string();
    serializer.serialize_str(&s)
}

pub fn login_url(next: &str) -> String {
    format!("{}?next={}", LOGIN_PATH, RawStr::new(next).percent_encode().as_str())
}

/// Only well-formed paths on this site are followed after login.
pub fn is_local_path(next: &str) -> bool {
    next.starts_with('/')
        && !next.starts_with("//")
        && !next.contains('\\')
        && Origin::parse(next).is_ok()
}

/// An uploaded image, `None` when the file field was left empty.
pub fn submitted_image<'a, 'r>(file: &'a mut Option<TempFile<'r>>) -> Option<&'a mut TempFile<'r>> {
    file.as_mut().filter(|f| f.len() > 0)
}

pub const INVALID_IMAGE: &str =
    "Upload a valid image. The file you uploaded was either not an image or a corrupted image.";

/// Identifies an upload by its leading bytes; the content type declared by
/// the client is ignored. `None` when the file is not a raster image.
pub async fn image_format(file: &TempFile<'_>) -> io::Result<Option<FileFormat>> {
    let reader = file.open().await?;
    pin!(reader);
    let mut bytes = Vec::with_capacity(file.len() as usize);
    reader.read_to_end(&mut bytes).await?;

    let format = FileFormat::from_bytes(&bytes);
    let media_type = format.media_type();
    if media_type.starts_with("image/") && media_type != "image/svg+xml" {
        Ok(Some(format))
    } else {
        Ok(None)
    }
}

/// Copies an upload into `<media_dir>/posts/` under a fresh random name and
/// returns the path relative to the media root.
pub async fn store_image(file: &mut TempFile<'_>, format: FileFormat, media_dir: &Path) -> io::Result<String> {
    let stem: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();
    let relative = format!("posts/{}.{}", stem, format.extension());

    fs::create_dir_all(media_dir.join("posts")).await?;
    file.copy_to(media_dir.join(&relative)).await?;
    Ok(relative)
}

/// Deletes a stored image. Failures are logged and otherwise ignored: the
/// row that pointed at the file is already gone or updated.
pub async fn remove_image(media_dir: &Path, relative: &str) {
    match fs::remove_file(media_dir.join(relative)).await {
        Ok(()) => tracing::debug!("removed {}", relative),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("failed to remove {}: {}", relative, e),
    }
}
