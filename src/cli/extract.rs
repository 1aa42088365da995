// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

use std::sync::Arc;
use std::time::Instant;

use image::ImageFormat;

use crate::cli::args::ExtractArgs;
use crate::codec::{self, FormatPolicy};
use crate::download::ensure_model;
use crate::error::{Result, ServeError};
use crate::model::{ModelLoader, OnnxSegmenter, Segmenter};
use crate::pipeline::{PipelineSettings, RequestPipeline};
use crate::registry::{ModelRegistry, resolve_class_names};
use crate::{VERSION, section, success, verbose, warning};

/// Loader for one-shot runs, which keep the model they started with.
struct FixedModel;

impl ModelLoader for FixedModel {
    fn load(&self, name: &str, _source: &str) -> Result<Arc<dyn Segmenter>> {
        Err(ServeError::ModelLoad(format!(
            "Cannot switch to '{name}': one-shot extraction keeps its startup model"
        )))
    }
}

/// Extract every instance of one image into `{out}/{image stem}/`.
///
/// # Errors
///
/// Returns an error if the model or image can't be loaded or a crop can't be written.
pub fn run_extract(args: &ExtractArgs) -> Result<()> {
    section!("Segment Serve v{VERSION}");

    let model_path = ensure_model(&args.model)?;
    let model = OnnxSegmenter::load_with_config(&model_path, args.thresholds.inference_config())?;
    let class_names = resolve_class_names(args.class_names.as_deref(), &model)?;
    let name = model_path
        .file_stem()
        .map_or_else(|| "model".to_string(), |s| s.to_string_lossy().into_owned());
    let registry = ModelRegistry::new(&name, Arc::new(model), class_names)?;

    let settings = PipelineSettings {
        apply_mask: !args.no_mask,
        persist_format: args.format,
        transport_format: FormatPolicy::Original,
        output_dir: args.out.clone(),
    };
    let pipeline = RequestPipeline::new(Arc::new(registry), Arc::new(FixedModel), settings);

    let bytes = std::fs::read(&args.source).map_err(|e| {
        ServeError::Decode(format!("Failed to read {}: {e}", args.source.display()))
    })?;
    let image = codec::decode(&bytes, ImageFormat::from_path(&args.source).ok())?;

    let start = Instant::now();
    let (snapshot, result, extraction) = pipeline.extract(&image)?;
    verbose!(
        "{}: {}x{} {} instance(s), {:.1}ms",
        args.source.display(),
        image.width(),
        image.height(),
        result.len(),
        start.elapsed().as_secs_f64() * 1000.0
    );

    for (index, roi) in result.rois().iter().enumerate() {
        verbose!(
            "  {index}: {} {:.2} [{}, {}, {}, {}]",
            snapshot.class_names().label(result.class_ids()[index]),
            result.scores()[index],
            roi.x1,
            roi.y1,
            roi.x2,
            roi.y2
        );
    }
    for (index, e) in extraction.failures() {
        warning!("Skipped instance {index}: {e}");
    }

    let stem = args
        .source
        .file_stem()
        .map_or_else(|| "image".to_string(), |s| s.to_string_lossy().into_owned());
    let batch = codec::save_batch(extraction.crops(), &args.out, &stem, args.format)?;
    success!("Saved {} crop(s) to {}", batch.len(), batch.dir.display());
    Ok(())
}
