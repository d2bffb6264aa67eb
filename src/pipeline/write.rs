//! Result writing: encode transformed buffers and place them on disk.
//!
//! Output files are named `page_<n>.<ext>` with the 1-indexed page number,
//! so interleaved completion across workers still yields a deterministic
//! directory listing. Writes are atomic (temp sibling then rename) so a
//! crash mid-run never leaves a truncated image behind.

use crate::config::OutputFormat;
use crate::error::PageError;
use image::RgbImage;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::debug;

/// The canonical output path for a page.
pub fn output_path(output_dir: &Path, page_num: usize, format: OutputFormat) -> PathBuf {
    output_dir.join(format!("page_{page_num}.{}", format.extension()))
}

/// Encode a transformed buffer into the requested container format.
pub fn encode(
    image: &RgbImage,
    page_num: usize,
    path: &Path,
    format: OutputFormat,
) -> Result<Vec<u8>, PageError> {
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), format.image_format())
        .map_err(|e| PageError::WriteFailed {
            page: page_num,
            path: path.to_path_buf(),
            detail: format!("encode failed: {e}"),
        })?;
    Ok(buf)
}

/// Encode and write one page synchronously. Returns the final path.
pub fn write_page_blocking(
    image: &RgbImage,
    page_num: usize,
    output_dir: &Path,
    format: OutputFormat,
) -> Result<PathBuf, PageError> {
    let path = output_path(output_dir, page_num, format);
    let bytes = encode(image, page_num, &path, format)?;

    let tmp = tmp_sibling(&path);
    let write_err = |detail: String| PageError::WriteFailed {
        page: page_num,
        path: path.clone(),
        detail,
    };

    std::fs::create_dir_all(output_dir).map_err(|e| write_err(e.to_string()))?;
    std::fs::write(&tmp, &bytes).map_err(|e| write_err(e.to_string()))?;
    std::fs::rename(&tmp, &path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        write_err(e.to_string())
    })?;

    debug!("Wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(path)
}

/// Async variant used by the cooperative dispatcher, where page writes are
/// the only I/O allowed to overlap. Encoding stays synchronous; it is pure
/// CPU work on an already-materialised buffer.
pub async fn write_page(
    image: &RgbImage,
    page_num: usize,
    output_dir: &Path,
    format: OutputFormat,
) -> Result<PathBuf, PageError> {
    let path = output_path(output_dir, page_num, format);
    let bytes = encode(image, page_num, &path, format)?;

    let tmp = tmp_sibling(&path);
    let write_err = |detail: String| PageError::WriteFailed {
        page: page_num,
        path: path.clone(),
        detail,
    };

    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(|e| write_err(e.to_string()))?;
    tokio::fs::write(&tmp, &bytes)
        .await
        .map_err(|e| write_err(e.to_string()))?;
    if let Err(e) = tokio::fs::rename(&tmp, &path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(write_err(e.to_string()));
    }

    debug!("Wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(path)
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn sample_image() -> RgbImage {
        RgbImage::from_pixel(12, 8, Rgb([40, 120, 200]))
    }

    #[test]
    fn output_path_follows_naming_scheme() {
        let dir = Path::new("/out");
        assert_eq!(
            output_path(dir, 7, OutputFormat::Png),
            PathBuf::from("/out/page_7.png")
        );
        assert_eq!(
            output_path(dir, 12, OutputFormat::Jpeg),
            PathBuf::from("/out/page_12.jpg")
        );
    }

    #[test]
    fn blocking_write_produces_decodable_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_page_blocking(&sample_image(), 3, dir.path(), OutputFormat::Png)
            .expect("write should succeed");

        assert_eq!(path, dir.path().join("page_3.png"));
        let decoded = image::open(&path).unwrap().to_rgb8();
        assert_eq!((decoded.width(), decoded.height()), (12, 8));
        assert_eq!(decoded.get_pixel(0, 0), &Rgb([40, 120, 200]));
    }

    #[test]
    fn no_tmp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        write_page_blocking(&sample_image(), 1, dir.path(), OutputFormat::Jpeg).unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["page_1.jpg"]);
    }

    #[test]
    fn missing_parent_directories_are_created() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        let path =
            write_page_blocking(&sample_image(), 4, &nested, OutputFormat::Png).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn unwritable_directory_is_nonfatal_write_error() {
        // A regular file in the path makes directory creation impossible.
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let err = write_page_blocking(
            &sample_image(),
            2,
            &blocker.join("sub"),
            OutputFormat::Png,
        )
        .unwrap_err();

        match err {
            PageError::WriteFailed { page, .. } => assert_eq!(page, 2),
            other => panic!("expected WriteFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn async_write_matches_blocking_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_page(&sample_image(), 5, dir.path(), OutputFormat::Png)
            .await
            .unwrap();
        assert!(path.exists());
        assert_eq!(path.file_name().unwrap(), "page_5.png");
    }
}
