//! Derivative generation and the lifecycle of stored originals.
//!
//! [`ImageManager`] ties the pieces together: it resolves preset names through
//! the [`PresetRegistry`], maps records to files with the [`PathResolver`],
//! plans crops with [`plan_derivative`], and hands the pixel work to an
//! [`ImageBackend`]. Records are read from and written to an
//! [`ImageRepository`].
//!
//! ## Generation
//!
//! ```text
//! generate(record, size, aspect)
//!   validate aspect, then size ─────────────── InvalidArgument
//!   original on disk? ── no ── mock_image? ─── no: ImageNotFound
//!        │                        │
//!        │                       yes: blank placeholder, ephemeral
//!        ▼                        ▼
//!   identify → plan → render (still or per frame)
//!   ephemeral? ── yes: DerivativeResult::Encoded (nothing written)
//!              ── no:  atomic write → DerivativeResult::File
//! ```
//!
//! ## Lifecycle
//!
//! | Operation | Effect on disk | Effect on record |
//! |---|---|---|
//! | [`ingest`](ImageManager::ingest) | moves the source to the `or_or` path, re-saves if EXIF-rotated | new hash, dimensions, animation flag |
//! | [`clone_image`](ImageManager::clone_image) | copies the original only | new hash |
//! | [`crop`](ImageManager::crop) / [`rotate`](ImageManager::rotate) | sweeps derivatives, replaces the original atomically | dimensions, `last_modified_at` |
//! | [`delete`](ImageManager::delete) | sweeps every size × aspect file | removed when purged |

use crate::config::{ConfigError, ManagerConfig};
use crate::imaging::placeholder;
use crate::imaging::{
    BackendError, CropRect, Encoded, FrameMode, ImageBackend, Operation, PlanError, Quality,
    RenderParams, Rotation, SourceImage, plan_derivative,
};
use crate::model::{ImageRecord, ImageType};
use crate::paths::{PathResolver, write_atomic};
use crate::presets::{AspectRatio, MaxSize, NameList, ORIGINAL, PresetRegistry};
use crate::repository::{ImageRepository, RepositoryError};
use crate::response::Response;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("{0}")]
    InvalidArgument(String),
    #[error("Image not found: {0}")]
    ImageNotFound(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl ManagerError {
    /// Whether a transport layer should answer "not found".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ImageNotFound(_))
    }
}

/// Output of [`ImageManager::generate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DerivativeResult {
    /// Rendered in memory only; nothing was written.
    Encoded(Encoded),
    /// Written to (or already present at) `path`.
    File { path: PathBuf, mime: &'static str },
}

/// Whether `generate` may return a derivative file that already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CachePolicy {
    /// Always render and overwrite.
    #[default]
    Recompute,
    /// Return the existing file untouched when present.
    ReuseExisting,
}

/// Where a new original comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// A file received from a client, with the name the client gave it.
    Upload { path: PathBuf, original_name: String },
    /// A file already on disk; its own name is recorded.
    File(PathBuf),
}

impl Incoming {
    pub fn path(&self) -> &Path {
        match self {
            Self::Upload { path, .. } | Self::File(path) => path,
        }
    }

    pub fn original_name(&self) -> String {
        match self {
            Self::Upload { original_name, .. } => original_name.clone(),
            Self::File(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }
}

pub struct ImageManager<B: ImageBackend, R: ImageRepository> {
    backend: B,
    repository: R,
    resolver: PathResolver,
    presets: PresetRegistry,
    image_dir: PathBuf,
    mock_image: bool,
    quality: Quality,
}

impl<B: ImageBackend, R: ImageRepository> ImageManager<B, R> {
    pub fn new(config: &ManagerConfig, backend: B, repository: R) -> Result<Self, ManagerError> {
        config.validate()?;
        Ok(Self {
            backend,
            repository,
            resolver: config.resolver()?,
            presets: PresetRegistry::new(),
            image_dir: config.image_dir(),
            mock_image: config.mock_image,
            quality: Quality::new(config.quality),
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn preset_aspects(&self) -> Result<&BTreeMap<String, AspectRatio>, ManagerError> {
        Ok(self.presets.aspects(&self.repository)?)
    }

    pub fn preset_sizes(&self) -> Result<&BTreeMap<String, MaxSize>, ManagerError> {
        Ok(self.presets.sizes(&self.repository)?)
    }

    /// File on disk for one derivative of `record`.
    pub fn file_path(&self, record: &ImageRecord, size: &str, aspect: &str) -> PathBuf {
        self.resolver
            .resolve(record, size, aspect)
            .file_path(&self.image_dir)
    }

    pub fn original_path(&self, record: &ImageRecord) -> PathBuf {
        self.file_path(record, ORIGINAL, ORIGINAL)
    }

    pub fn url_for(
        &self,
        record: &ImageRecord,
        size: &str,
        aspect: &str,
        cache_buster: bool,
    ) -> String {
        self.resolver.url_for(record, size, aspect, cache_buster)
    }

    pub fn image_by_hash(&self, hash: &str) -> Result<ImageRecord, ManagerError> {
        self.repository
            .find_image_by_hash(hash)?
            .ok_or_else(|| ManagerError::ImageNotFound(format!("no image with hash \"{hash}\"")))
    }

    /// Build the `size` × `aspect` derivative of `record`.
    ///
    /// Never mutates the record. Writes exactly one file unless the original
    /// is missing and a placeholder was rendered instead.
    pub fn generate(
        &self,
        record: &ImageRecord,
        size: &str,
        aspect: &str,
        policy: CachePolicy,
    ) -> Result<DerivativeResult, ManagerError> {
        let aspects = self.preset_aspects()?;
        let target_aspect = *aspects.get(aspect).ok_or_else(|| {
            ManagerError::InvalidArgument(format!(
                "Invalid aspect. \"{aspect}\" given. Valid values: {}.",
                NameList(aspects)
            ))
        })?;
        let sizes = self.preset_sizes()?;
        let target_size = *sizes.get(size).ok_or_else(|| {
            ManagerError::InvalidArgument(format!(
                "Invalid size. \"{size}\" given. Valid values: {}.",
                NameList(sizes)
            ))
        })?;

        let original = self.original_path(record);
        let target = self.file_path(record, size, aspect);
        let mime = output_mime(record);

        if policy == CachePolicy::ReuseExisting && target.exists() {
            tracing::debug!(path = %target.display(), "derivative already exists");
            return Ok(DerivativeResult::File { path: target, mime });
        }

        let ephemeral = !original.exists();
        let source = if ephemeral {
            if !self.mock_image {
                return Err(ManagerError::ImageNotFound(format!(
                    "Image \"{}\" doesn't exist",
                    original.display()
                )));
            }
            tracing::warn!(
                hash = %record.hash,
                path = %original.display(),
                "original missing, rendering placeholder"
            );
            SourceImage::Bytes(placeholder::blank(record.image_type, record.animated)?)
        } else {
            SourceImage::Path(original)
        };

        let mode = FrameMode::for_animated(record.animated);
        let dims = self.backend.identify(&source, mode)?;
        let plan = plan_derivative(dims.width, dims.height, target_aspect, target_size)?;
        if plan.is_degenerate() {
            return Err(ManagerError::InvalidArgument(format!(
                "size \"{size}\" and aspect \"{aspect}\" give an empty image for {}x{}",
                dims.width, dims.height
            )));
        }

        let encoded = self.backend.render(&RenderParams {
            source,
            mode,
            operations: plan.operations(),
            format: record.image_type,
            quality: self.quality,
        })?;

        if ephemeral {
            return Ok(DerivativeResult::Encoded(encoded));
        }
        write_atomic(&target, &encoded.bytes)?;
        tracing::debug!(
            path = %target.display(),
            width = encoded.width,
            height = encoded.height,
            "derivative written"
        );
        Ok(DerivativeResult::File { path: target, mime })
    }

    /// Answer a request for a derivative URL path.
    ///
    /// Paths that do not follow the layout, unknown hashes, and type
    /// mismatches are all "not found". Existing derivative files are reused.
    pub fn serve(&self, request_path: &str) -> Result<Response, ManagerError> {
        let not_found = || ManagerError::ImageNotFound(format!("no derivative at \"{request_path}\""));
        let request = self
            .resolver
            .parse_request_path(request_path)
            .ok_or_else(not_found)?;
        let record = self.image_by_hash(&request.hash)?;
        if record.image_type != request.image_type {
            return Err(not_found());
        }
        let result = self.generate(
            &record,
            &request.size,
            &request.aspect,
            CachePolicy::ReuseExisting,
        )?;
        Ok(result.into())
    }

    /// Store a new original and describe it in a fresh record.
    ///
    /// The source file is moved, not copied. If the stored file cannot be
    /// described it is moved back, so a failed ingest leaves the source
    /// where it was. When `flush` is set the record is persisted and the
    /// repository flushed.
    pub fn ingest(&self, incoming: Incoming, flush: bool) -> Result<ImageRecord, ManagerError> {
        let original_name = incoming.original_name();
        let extension = Path::new(&original_name)
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        let image_type = ImageType::from_extension(&extension).ok_or_else(|| {
            ManagerError::InvalidArgument(format!(
                "unsupported image type \"{extension}\" for \"{original_name}\""
            ))
        })?;

        let mut record = ImageRecord::new(image_type, original_name);
        let stored = self.original_path(&record);
        move_file(incoming.path(), &stored)?;

        if let Err(e) = self.describe_stored(&mut record, &stored) {
            if let Err(restore) = move_file(&stored, incoming.path()) {
                tracing::warn!(
                    path = %stored.display(),
                    error = %restore,
                    "could not restore ingested file"
                );
            }
            return Err(e);
        }

        tracing::info!(
            hash = %record.hash,
            name = %record.original_name,
            width = record.width,
            height = record.height,
            animated = record.animated,
            "image ingested"
        );
        if flush {
            self.save(&mut record)?;
        }
        Ok(record)
    }

    /// Detect animation, bake EXIF orientation and record the dimensions of
    /// a freshly stored original.
    fn describe_stored(&self, record: &mut ImageRecord, stored: &Path) -> Result<(), ManagerError> {
        if record.image_type == ImageType::Gif {
            record.animated = match self.backend.is_animated(stored) {
                Ok(animated) => animated,
                Err(e) => {
                    tracing::debug!(hash = %record.hash, error = %e, "not a readable GIF, treated as still");
                    false
                }
            };
        }

        let mode = FrameMode::for_animated(record.animated);
        if mode == FrameMode::Still {
            let orientation = self.backend.exif_orientation(stored)?;
            if matches!(orientation, Some(o) if o != 1) {
                tracing::debug!(hash = %record.hash, ?orientation, "baking EXIF orientation");
                let encoded = self.backend.render(&RenderParams {
                    source: SourceImage::Path(stored.to_path_buf()),
                    mode,
                    operations: Vec::new(),
                    format: record.image_type,
                    quality: self.quality,
                })?;
                write_atomic(stored, &encoded.bytes)?;
            }
        }

        let dims = self
            .backend
            .identify(&SourceImage::Path(stored.to_path_buf()), mode)?;
        record.width = dims.width;
        record.height = dims.height;
        Ok(())
    }

    /// Copy `source` under a new hash. Only the original file is copied;
    /// derivatives are rebuilt on demand.
    pub fn clone_image(
        &self,
        source: &ImageRecord,
        flush: bool,
    ) -> Result<ImageRecord, ManagerError> {
        let mut record = source.clone();
        record.id = None;
        record.hash = crate::model::generate_hash();

        let from = self.original_path(source);
        let to = self.original_path(&record);
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&from, &to)?;

        tracing::info!(from = %source.hash, to = %record.hash, "image cloned");
        if flush {
            self.save(&mut record)?;
        }
        Ok(record)
    }

    /// Crop the original in place, optionally to greyscale.
    ///
    /// `rect` must be non-empty and inside the record's current dimensions.
    /// Every derivative except the original is swept first.
    pub fn crop(
        &self,
        record: &mut ImageRecord,
        rect: CropRect,
        greyscale: bool,
        flush: bool,
    ) -> Result<PathBuf, ManagerError> {
        if rect.is_empty() || !rect.fits_within(record.width, record.height) {
            return Err(ManagerError::InvalidArgument(format!(
                "crop {}x{}+{}+{} does not fit a {}x{} image",
                rect.width, rect.height, rect.x, rect.y, record.width, record.height
            )));
        }
        let mut operations = vec![Operation::Crop(rect)];
        if greyscale {
            operations.push(Operation::Greyscale);
        }

        let path = self.replace_original(record, operations)?;
        record.width = rect.width;
        record.height = rect.height;
        record.touch();

        tracing::info!(hash = %record.hash, ?rect, greyscale, "original cropped");
        if flush {
            self.save(record)?;
        }
        Ok(path)
    }

    /// Rotate the original a quarter turn in place and swap the recorded
    /// dimensions. Every derivative except the original is swept first.
    pub fn rotate(
        &self,
        record: &mut ImageRecord,
        rotation: Rotation,
        flush: bool,
    ) -> Result<PathBuf, ManagerError> {
        let path = self.replace_original(record, vec![Operation::Rotate(rotation)])?;
        std::mem::swap(&mut record.width, &mut record.height);
        record.touch();

        tracing::info!(hash = %record.hash, %rotation, degrees = rotation.degrees(), "original rotated");
        if flush {
            self.save(record)?;
        }
        Ok(path)
    }

    /// [`rotate`](Self::rotate) with the direction given by name, exactly
    /// `"left"` or `"right"`.
    pub fn rotate_named(
        &self,
        record: &mut ImageRecord,
        direction: &str,
        flush: bool,
    ) -> Result<PathBuf, ManagerError> {
        let rotation = direction.parse::<Rotation>().map_err(ManagerError::InvalidArgument)?;
        self.rotate(record, rotation, flush)
    }

    /// Remove every derivative file of `record` across all size × aspect
    /// presets, `or`/`or` included.
    ///
    /// With `keep_original` the stored original survives. Files that were
    /// never generated are skipped silently and other removal failures are
    /// logged, so the sweep always runs to the end. With `purge` (and not
    /// `keep_original`) the record itself is removed and the repository
    /// flushed.
    pub fn delete(
        &self,
        record: &ImageRecord,
        keep_original: bool,
        purge: bool,
    ) -> Result<(), ManagerError> {
        let mut sizes: BTreeSet<&str> = self.preset_sizes()?.keys().map(String::as_str).collect();
        let mut aspects: BTreeSet<&str> =
            self.preset_aspects()?.keys().map(String::as_str).collect();
        sizes.insert(ORIGINAL);
        aspects.insert(ORIGINAL);

        let mut removed = 0usize;
        for size in &sizes {
            for aspect in &aspects {
                if keep_original && *size == ORIGINAL && *aspect == ORIGINAL {
                    continue;
                }
                let path = self.file_path(record, size, aspect);
                match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "could not remove derivative");
                    }
                }
            }
        }

        tracing::info!(hash = %record.hash, removed, keep_original, purge, "derivatives swept");
        if !keep_original && purge {
            self.repository.remove(record)?;
            self.repository.flush()?;
        }
        Ok(())
    }

    /// Sweep derivatives, render `operations` over the original, and swap the
    /// result into place.
    fn replace_original(
        &self,
        record: &ImageRecord,
        operations: Vec<Operation>,
    ) -> Result<PathBuf, ManagerError> {
        let original = self.original_path(record);
        if !original.exists() {
            return Err(ManagerError::ImageNotFound(format!(
                "Image \"{}\" doesn't exist",
                original.display()
            )));
        }
        let encoded = self.backend.render(&RenderParams {
            source: SourceImage::Path(original.clone()),
            mode: FrameMode::for_animated(record.animated),
            operations,
            format: record.image_type,
            quality: self.quality,
        })?;
        self.delete(record, true, false)?;
        write_atomic(&original, &encoded.bytes)?;
        Ok(original)
    }

    fn save(&self, record: &mut ImageRecord) -> Result<(), ManagerError> {
        self.repository.persist(record)?;
        self.repository.flush()?;
        Ok(())
    }
}

fn output_mime(record: &ImageRecord) -> &'static str {
    if record.animated {
        ImageType::Gif.mime()
    } else {
        record.image_type.mime()
    }
}

/// Rename `from` to `to`, falling back to copy + remove across filesystems.
fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to)?;
    fs::remove_file(from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::Dimensions;
    use crate::imaging::backend::tests::{MockBackend, RecordedOp};
    use crate::imaging::placeholder::{PLACEHOLDER_HEIGHT, PLACEHOLDER_WIDTH};
    use crate::imaging::rust_backend::tests::{
        test_animated_gif, test_jpeg, test_jpeg_with_orientation,
    };
    use crate::imaging::RustBackend;
    use crate::model::{AspectPreset, SizePreset};
    use crate::repository::MemoryRepository;
    use tempfile::TempDir;

    fn presets() -> MemoryRepository {
        let aspect = |name: &str, width, height| AspectPreset {
            short_name: name.into(),
            width,
            height,
        };
        let size = |name: &str, max_size| SizePreset {
            short_name: name.into(),
            max_size,
        };
        MemoryRepository::with_presets(
            vec![aspect("or", 0, None), aspect("1x1", 1, Some(1)), aspect("16x9", 16, Some(9))],
            vec![size("or", None), size("sm", Some(100)), size("md", Some(400))],
        )
    }

    fn config(tmp: &TempDir, mock_image: bool) -> ManagerConfig {
        ManagerConfig {
            image_dir: tmp.path().to_string_lossy().into_owned(),
            mock_image,
            ..ManagerConfig::default()
        }
    }

    fn manager<B: ImageBackend>(
        tmp: &TempDir,
        backend: B,
        mock_image: bool,
    ) -> ImageManager<B, MemoryRepository> {
        ImageManager::new(&config(tmp, mock_image), backend, presets()).unwrap()
    }

    /// Record whose original is already in place.
    fn stored<B: ImageBackend>(
        m: &ImageManager<B, MemoryRepository>,
        image_type: ImageType,
        bytes: &[u8],
        width: u32,
        height: u32,
    ) -> ImageRecord {
        let mut record = ImageRecord::new(image_type, format!("in.{image_type}"));
        record.width = width;
        record.height = height;
        write_atomic(&m.original_path(&record), bytes).unwrap();
        record
    }

    fn files_under(dir: &Path) -> usize {
        fs::read_dir(dir)
            .map(|entries| {
                entries
                    .flatten()
                    .map(|e| {
                        let path = e.path();
                        if path.is_dir() { files_under(&path) } else { 1 }
                    })
                    .sum()
            })
            .unwrap_or(0)
    }

    // =========================================================================
    // generate
    // =========================================================================

    #[test]
    fn generate_plans_crop_then_resize() {
        let tmp = TempDir::new().unwrap();
        let backend = MockBackend::with_dimensions(vec![Dimensions {
            width: 1920,
            height: 1200,
        }]);
        let m = manager(&tmp, backend, false);
        let record = stored(&m, ImageType::Jpg, b"original", 1920, 1200);

        let result = m.generate(&record, "sm", "1x1", CachePolicy::Recompute).unwrap();

        let expected = m.file_path(&record, "sm", "1x1");
        assert_eq!(
            result,
            DerivativeResult::File {
                path: expected.clone(),
                mime: "image/jpeg"
            }
        );
        assert_eq!(fs::read(&expected).unwrap(), b"mock");

        let renders = m.backend().renders();
        assert_eq!(renders.len(), 1);
        let RecordedOp::Render { operations, mode, .. } = &renders[0] else {
            panic!("expected a render");
        };
        assert_eq!(*mode, FrameMode::Still);
        assert_eq!(
            operations,
            &vec![
                Operation::Crop(CropRect {
                    x: 360,
                    y: 0,
                    width: 1200,
                    height: 1200
                }),
                Operation::Resize {
                    width: 100,
                    height: 100
                },
            ]
        );
    }

    #[test]
    fn generate_unknown_aspect_lists_valid_names() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp, MockBackend::new(), false);
        let record = stored(&m, ImageType::Jpg, b"original", 10, 10);

        let err = m
            .generate(&record, "sm", "3x2", CachePolicy::Recompute)
            .unwrap_err();
        assert!(matches!(err, ManagerError::InvalidArgument(_)));
        assert_eq!(
            err.to_string(),
            "Invalid aspect. \"3x2\" given. Valid values: 16x9, 1x1, or."
        );
        assert!(m.backend().get_operations().is_empty());
    }

    #[test]
    fn generate_unknown_size_lists_valid_names() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp, MockBackend::new(), false);
        let record = stored(&m, ImageType::Jpg, b"original", 10, 10);

        let err = m
            .generate(&record, "xl", "or", CachePolicy::Recompute)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid size. \"xl\" given. Valid values: md, or, sm."
        );
    }

    #[test]
    fn generate_missing_original_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp, MockBackend::new(), false);
        let record = ImageRecord::new(ImageType::Jpg, "gone.jpg");

        let err = m
            .generate(&record, "sm", "or", CachePolicy::Recompute)
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn generate_placeholder_in_mock_mode_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp, RustBackend::new(), true);
        let record = ImageRecord::new(ImageType::Png, "gone.png");

        let result = m.generate(&record, "or", "or", CachePolicy::Recompute).unwrap();

        let DerivativeResult::Encoded(encoded) = result else {
            panic!("expected an in-memory result");
        };
        assert_eq!(encoded.mime, "image/png");
        assert_eq!(
            (encoded.width, encoded.height),
            (PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT)
        );
        assert_eq!(files_under(tmp.path()), 0);
    }

    #[test]
    fn generate_animated_placeholder_is_gif() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp, RustBackend::new(), true);
        let mut record = ImageRecord::new(ImageType::Gif, "gone.gif");
        record.animated = true;

        let result = m.generate(&record, "sm", "1x1", CachePolicy::Recompute).unwrap();
        let DerivativeResult::Encoded(encoded) = result else {
            panic!("expected an in-memory result");
        };
        assert_eq!(encoded.mime, "image/gif");
        assert_eq!((encoded.width, encoded.height), (100, 100));
        assert_eq!(files_under(tmp.path()), 0);
    }

    #[test]
    fn generate_real_jpeg_has_planned_dimensions() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp, RustBackend::new(), false);
        let record = stored(&m, ImageType::Jpg, &test_jpeg(192, 120), 192, 120);

        let DerivativeResult::File { path, .. } =
            m.generate(&record, "md", "16x9", CachePolicy::Recompute).unwrap()
        else {
            panic!("expected a file");
        };
        let img = image::open(&path).unwrap();
        assert_eq!((img.width(), img.height()), (192, 108));
    }

    #[test]
    fn generate_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp, RustBackend::new(), false);
        let record = stored(&m, ImageType::Jpg, &test_jpeg(64, 48), 64, 48);

        let first = m.generate(&record, "sm", "1x1", CachePolicy::Recompute).unwrap();
        let DerivativeResult::File { path, .. } = &first else {
            panic!("expected a file");
        };
        let first_bytes = fs::read(path).unwrap();
        m.generate(&record, "sm", "1x1", CachePolicy::Recompute).unwrap();
        assert_eq!(fs::read(path).unwrap(), first_bytes);
    }

    #[test]
    fn generate_animated_keeps_every_frame() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp, RustBackend::new(), false);
        let mut record = stored(&m, ImageType::Gif, &test_animated_gif(40, 20, 3), 40, 20);
        record.animated = true;

        let DerivativeResult::File { path, mime } =
            m.generate(&record, "or", "1x1", CachePolicy::Recompute).unwrap()
        else {
            panic!("expected a file");
        };
        assert_eq!(mime, "image/gif");

        use image::AnimationDecoder;
        let file = std::io::BufReader::new(fs::File::open(path).unwrap());
        let frames = image::codecs::gif::GifDecoder::new(file)
            .unwrap()
            .into_frames()
            .collect_frames()
            .unwrap();
        assert_eq!(frames.len(), 3);
        for frame in &frames {
            assert_eq!(frame.buffer().dimensions(), (20, 20));
        }
    }

    #[test]
    fn generate_reuse_existing_skips_render() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp, MockBackend::new(), false);
        let record = stored(&m, ImageType::Jpg, b"original", 10, 10);
        let target = m.file_path(&record, "sm", "or");
        write_atomic(&target, b"cached").unwrap();

        let result = m.generate(&record, "sm", "or", CachePolicy::ReuseExisting).unwrap();
        assert_eq!(
            result,
            DerivativeResult::File {
                path: target.clone(),
                mime: "image/jpeg"
            }
        );
        assert!(m.backend().get_operations().is_empty());
        assert_eq!(fs::read(target).unwrap(), b"cached");
    }

    #[test]
    fn generate_rejects_degenerate_plan() {
        let tmp = TempDir::new().unwrap();
        let repo = presets();
        repo.set_aspect_presets(vec![AspectPreset {
            short_name: "wide".into(),
            width: 1000,
            height: Some(1),
        }]);
        let backend = MockBackend::with_dimensions(vec![Dimensions {
            width: 100,
            height: 100,
        }]);
        let m = ImageManager::new(&config(&tmp, false), backend, repo).unwrap();
        let record = stored(&m, ImageType::Jpg, b"original", 100, 100);

        let err = m
            .generate(&record, "sm", "wide", CachePolicy::Recompute)
            .unwrap_err();
        assert!(matches!(err, ManagerError::InvalidArgument(_)));
        assert!(m.backend().renders().is_empty());
    }

    // =========================================================================
    // serve
    // =========================================================================

    #[test]
    fn serve_generates_from_request_path() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp, RustBackend::new(), false);
        let mut record = stored(&m, ImageType::Jpg, &test_jpeg(50, 50), 50, 50);
        m.repository().persist(&mut record).unwrap();

        let url = m.url_for(&record, "sm", "1x1", true);
        let response = m.serve(&url).unwrap();
        assert_eq!(response.content_type(), "image/jpeg");
        assert!(matches!(response, Response::File { .. }));
        assert!(m.file_path(&record, "sm", "1x1").exists());
    }

    #[test]
    fn serve_unknown_hash_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp, MockBackend::new(), false);
        let record = ImageRecord::new(ImageType::Jpg, "a.jpg");
        let err = m.serve(&m.url_for(&record, "sm", "or", false)).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn serve_malformed_path_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp, MockBackend::new(), false);
        assert!(m.serve("/assets/images/nope.jpg").unwrap_err().is_not_found());
    }

    // =========================================================================
    // ingest / clone
    // =========================================================================

    #[test]
    fn ingest_moves_file_and_records_dimensions() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp, RustBackend::new(), false);
        let incoming = tmp.path().join("upload.tmp");
        fs::write(&incoming, test_jpeg(30, 20)).unwrap();

        let record = m
            .ingest(
                Incoming::Upload {
                    path: incoming.clone(),
                    original_name: "Holiday.JPEG".into(),
                },
                true,
            )
            .unwrap();

        assert!(!incoming.exists());
        assert!(m.original_path(&record).exists());
        assert_eq!(record.image_type, ImageType::Jpg);
        assert_eq!((record.width, record.height), (30, 20));
        assert_eq!(record.original_name, "Holiday.JPEG");
        assert!(!record.animated);
        assert_eq!(record.id, Some(1));
        assert_eq!(
            m.repository().find_image_by_hash(&record.hash).unwrap(),
            Some(record)
        );
    }

    #[test]
    fn ingest_without_flush_does_not_persist() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp, RustBackend::new(), false);
        let incoming = tmp.path().join("photo.jpg");
        fs::write(&incoming, test_jpeg(8, 8)).unwrap();

        let record = m.ingest(Incoming::File(incoming), false).unwrap();
        assert_eq!(record.original_name, "photo.jpg");
        assert!(m.repository().is_empty());
    }

    #[test]
    fn ingest_bakes_exif_orientation() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp, RustBackend::new(), false);
        let incoming = tmp.path().join("rotated.jpg");
        fs::write(&incoming, test_jpeg_with_orientation(40, 20, 6)).unwrap();

        let record = m.ingest(Incoming::File(incoming), false).unwrap();
        assert_eq!((record.width, record.height), (20, 40));

        let stored = fs::read(m.original_path(&record)).unwrap();
        assert_eq!(crate::imaging::rust_backend::detect_exif_orientation(&stored), None);
        let img = image::load_from_memory(&stored).unwrap();
        assert_eq!((img.width(), img.height()), (20, 40));
    }

    #[test]
    fn ingest_detects_animated_gif() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp, RustBackend::new(), false);
        let incoming = tmp.path().join("loop.gif");
        fs::write(&incoming, test_animated_gif(12, 10, 2)).unwrap();

        let record = m.ingest(Incoming::File(incoming), false).unwrap();
        assert!(record.animated);
        assert_eq!((record.width, record.height), (12, 10));
    }

    #[test]
    fn ingest_rejects_unsupported_type() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp, MockBackend::new(), false);
        let incoming = tmp.path().join("notes.txt");
        fs::write(&incoming, "text").unwrap();

        let err = m.ingest(Incoming::File(incoming.clone()), false).unwrap_err();
        assert!(matches!(err, ManagerError::InvalidArgument(_)));
        assert!(incoming.exists());
    }

    #[test]
    fn ingest_failure_moves_source_back() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp, RustBackend::new(), false);
        let incoming = tmp.path().join("broken.jpg");
        fs::write(&incoming, b"not an image").unwrap();

        assert!(m.ingest(Incoming::File(incoming.clone()), true).is_err());
        assert_eq!(fs::read(&incoming).unwrap(), b"not an image");
        assert_eq!(files_under(tmp.path()), 1);
        assert!(m.repository().is_empty());
    }

    #[test]
    fn ingest_gif_name_with_other_content_is_still() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp, RustBackend::new(), false);
        let incoming = tmp.path().join("pic.gif");
        fs::write(&incoming, test_png(6, 4)).unwrap();

        let record = m.ingest(Incoming::File(incoming.clone()), false).unwrap();
        assert!(!record.animated);
        assert_eq!((record.width, record.height), (6, 4));
        assert!(!incoming.exists());
    }

    #[test]
    fn ingest_gif_asks_backend_for_animation() {
        let tmp = TempDir::new().unwrap();
        let backend = MockBackend {
            animated: true,
            ..MockBackend::with_dimensions(vec![Dimensions {
                width: 12,
                height: 10,
            }])
        };
        let m = manager(&tmp, backend, false);
        let incoming = tmp.path().join("loop.gif");
        fs::write(&incoming, b"gif").unwrap();

        let record = m.ingest(Incoming::File(incoming), false).unwrap();
        assert!(record.animated);
        let stored = m.original_path(&record).display().to_string();
        assert_eq!(
            m.backend().get_operations(),
            vec![
                RecordedOp::IsAnimated(stored.clone()),
                RecordedOp::Identify(stored),
            ]
        );
    }

    #[test]
    fn in_place_edits_use_configured_quality() {
        let tmp = TempDir::new().unwrap();
        let config = ManagerConfig {
            quality: 55,
            ..config(&tmp, false)
        };
        let m = ImageManager::new(&config, MockBackend::new(), presets()).unwrap();
        let mut record = stored(&m, ImageType::Jpg, b"original", 4, 2);

        m.rotate(&mut record, Rotation::Right, false).unwrap();
        let rect = CropRect {
            x: 0,
            y: 0,
            width: 1,
            height: 1,
        };
        m.crop(&mut record, rect, false, false).unwrap();
        assert_eq!(
            *m.backend().qualities.lock().unwrap(),
            vec![Quality::new(55), Quality::new(55)]
        );
    }

    #[test]
    fn clone_copies_only_the_original() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp, MockBackend::new(), false);
        let mut source = stored(&m, ImageType::Png, b"pixels", 5, 5);
        source.id = Some(7);
        write_atomic(&m.file_path(&source, "sm", "or"), b"derivative").unwrap();

        let copy = m.clone_image(&source, false).unwrap();
        assert_ne!(copy.hash, source.hash);
        assert_eq!(copy.id, None);
        assert_eq!((copy.width, copy.height), (5, 5));
        assert_eq!(fs::read(m.original_path(&copy)).unwrap(), b"pixels");
        assert!(!m.file_path(&copy, "sm", "or").exists());
        assert!(m.original_path(&source).exists());
    }

    // =========================================================================
    // crop / rotate
    // =========================================================================

    #[test]
    fn crop_replaces_original_and_sweeps_derivatives() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp, RustBackend::new(), false);
        let mut record = stored(&m, ImageType::Jpg, &test_jpeg(60, 40), 60, 40);
        let derivative = m.file_path(&record, "sm", "1x1");
        write_atomic(&derivative, b"stale").unwrap();
        let before = record.last_modified_at;

        let rect = CropRect {
            x: 10,
            y: 5,
            width: 30,
            height: 20,
        };
        let path = m.crop(&mut record, rect, true, true).unwrap();

        assert_eq!(path, m.original_path(&record));
        assert!(!derivative.exists());
        let img = image::open(&path).unwrap();
        assert_eq!((img.width(), img.height()), (30, 20));
        assert_eq!((record.width, record.height), (30, 20));
        assert!(record.last_modified_at >= before);
        assert!(m.repository().find_image_by_hash(&record.hash).unwrap().is_some());
    }

    #[test]
    fn crop_outside_image_rejected() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp, MockBackend::new(), false);
        let mut record = stored(&m, ImageType::Jpg, b"original", 60, 40);

        for rect in [
            CropRect { x: 0, y: 0, width: 0, height: 10 },
            CropRect { x: 50, y: 0, width: 20, height: 10 },
        ] {
            let err = m.crop(&mut record, rect, false, false).unwrap_err();
            assert!(matches!(err, ManagerError::InvalidArgument(_)));
        }
        assert!(m.backend().renders().is_empty());
        assert_eq!((record.width, record.height), (60, 40));
    }

    #[test]
    fn crop_animated_uses_frame_mode() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp, MockBackend::new(), false);
        let mut record = stored(&m, ImageType::Gif, b"gif", 40, 20);
        record.animated = true;

        let rect = CropRect { x: 0, y: 0, width: 20, height: 20 };
        m.crop(&mut record, rect, false, false).unwrap();
        assert!(matches!(
            &m.backend().renders()[0],
            RecordedOp::Render { mode: FrameMode::Animated, format: ImageType::Gif, .. }
        ));
    }

    #[test]
    fn rotate_swaps_dimensions_and_back() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp, RustBackend::new(), false);
        let mut record = stored(&m, ImageType::Png, &test_png(40, 20), 40, 20);

        m.rotate(&mut record, Rotation::Left, false).unwrap();
        assert_eq!((record.width, record.height), (20, 40));
        let img = image::open(m.original_path(&record)).unwrap();
        assert_eq!((img.width(), img.height()), (20, 40));

        m.rotate(&mut record, Rotation::Right, false).unwrap();
        assert_eq!((record.width, record.height), (40, 20));
        let img = image::open(m.original_path(&record)).unwrap();
        assert_eq!((img.width(), img.height()), (40, 20));
    }

    #[test]
    fn rotate_named_rejects_unknown_direction() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp, MockBackend::new(), false);
        let mut record = stored(&m, ImageType::Jpg, b"original", 4, 2);

        for direction in ["up", "Left", ""] {
            let err = m.rotate_named(&mut record, direction, false).unwrap_err();
            assert!(matches!(err, ManagerError::InvalidArgument(_)));
        }
        assert_eq!((record.width, record.height), (4, 2));
    }

    #[test]
    fn rotate_missing_original_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp, MockBackend::new(), false);
        let mut record = ImageRecord::new(ImageType::Jpg, "gone.jpg");
        assert!(
            m.rotate(&mut record, Rotation::Right, false)
                .unwrap_err()
                .is_not_found()
        );
    }

    // =========================================================================
    // delete
    // =========================================================================

    #[test]
    fn delete_keep_original_sweeps_everything_else() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp, MockBackend::new(), false);
        let record = stored(&m, ImageType::Jpg, b"original", 10, 10);
        for (size, aspect) in [("sm", "1x1"), ("md", "16x9"), ("or", "1x1")] {
            write_atomic(&m.file_path(&record, size, aspect), b"d").unwrap();
        }

        m.delete(&record, true, false).unwrap();
        assert!(m.original_path(&record).exists());
        assert_eq!(files_under(tmp.path()), 1);
    }

    #[test]
    fn delete_with_purge_removes_record() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp, MockBackend::new(), false);
        let mut record = stored(&m, ImageType::Jpg, b"original", 10, 10);
        m.repository().persist(&mut record).unwrap();

        m.delete(&record, false, true).unwrap();
        assert!(!m.original_path(&record).exists());
        assert!(m.repository().is_empty());
    }

    #[test]
    fn delete_keep_original_never_purges() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp, MockBackend::new(), false);
        let mut record = stored(&m, ImageType::Jpg, b"original", 10, 10);
        m.repository().persist(&mut record).unwrap();

        m.delete(&record, true, true).unwrap();
        assert_eq!(m.repository().len(), 1);
    }

    #[test]
    fn delete_sweeps_original_even_without_or_presets() {
        let tmp = TempDir::new().unwrap();
        let repo = MemoryRepository::default();
        let m = ImageManager::new(&config(&tmp, false), MockBackend::new(), repo).unwrap();
        let record = stored(&m, ImageType::Jpg, b"original", 10, 10);

        m.delete(&record, false, false).unwrap();
        assert!(!m.original_path(&record).exists());
    }

    fn test_png(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbaImage::from_fn(width, height, |x, y| {
            image::Rgba([(x * 5) as u8, (y * 5) as u8, 0, 255])
        });
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_with_encoder(image::codecs::png::PngEncoder::new(&mut bytes))
            .unwrap();
        bytes
    }
}
