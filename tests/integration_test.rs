// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! End-to-end pipeline tests against a deterministic fake model.

mod common;

use std::sync::Arc;
use std::thread;

use common::{FakeSegmenter, fake_rois, pipeline, pipeline_with, settings, test_image};
use image::ImageFormat;
use segment_serve::pipeline::OVERLAY_FORMAT;
use segment_serve::{FormatPolicy, ServeError, codec};

const H: usize = 64;
const W: usize = 48;

#[test]
fn test_extract_crops_to_boxes_and_masks_background() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(dir.path());
    let image = test_image(H, W, ImageFormat::Png);

    let (snapshot, result, extraction) = pipeline.extract(&image).unwrap();
    assert_eq!(snapshot.name(), "fake");
    assert_eq!(result.len(), 2);
    assert!(!extraction.has_failures());

    let crops: Vec<_> = extraction.crops().collect();
    for ((index, crop), roi) in crops.iter().zip(fake_rois(H, W)) {
        assert_eq!(crop.dims(), (roi.height(), roi.width()), "instance {index}");
        assert_eq!(crop.format(), ImageFormat::Png);
        for row in 0..roi.height() {
            for c in 0..3 {
                // First column lies outside the mask.
                assert_eq!(crop.pixels()[[row, 0, c]], 255);
                assert_eq!(
                    crop.pixels()[[row, 1, c]],
                    image.pixels()[[roi.y1 + row, roi.x1 + 1, c]]
                );
            }
        }
    }
}

#[test]
fn test_extract_without_mask_keeps_background() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings(dir.path());
    settings.apply_mask = false;
    let pipeline = pipeline_with(FakeSegmenter::new(2), settings);
    let image = test_image(H, W, ImageFormat::Png);

    let (_, _, extraction) = pipeline.extract(&image).unwrap();
    let (_, crop) = extraction.crops().next().unwrap();
    let roi = fake_rois(H, W)[0];
    assert_eq!(crop.pixels()[[0, 0, 0]], image.pixels()[[roi.y1, roi.x1, 0]]);
}

#[test]
fn test_extract_and_save_writes_request_directory() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(dir.path());
    let image = test_image(H, W, ImageFormat::Png);

    let saved = pipeline.extract_and_save(&image).unwrap();
    assert!(saved.failed.is_empty());
    assert_eq!(saved.batch.len(), 2);
    assert_eq!(saved.batch.dir, dir.path().join(&saved.batch.request_id));

    let names: Vec<_> = saved
        .batch
        .paths()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, ["result_0.png", "result_1.png"]);

    let (_, _, extraction) = pipeline.extract(&image).unwrap();
    let (_, expected) = extraction.crops().next().unwrap();
    let first = codec::decode(&std::fs::read(saved.batch.first().unwrap()).unwrap(), None).unwrap();
    assert_eq!(first.pixels(), expected.pixels());
}

#[test]
fn test_concurrent_requests_use_distinct_directories() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Arc::new(pipeline(dir.path()));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let pipeline = Arc::clone(&pipeline);
            thread::spawn(move || {
                pipeline
                    .extract_and_save(&test_image(H, W, ImageFormat::Png))
                    .unwrap()
            })
        })
        .collect();
    let mut dirs: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().unwrap().batch.dir)
        .collect();
    dirs.sort();
    dirs.dedup();
    assert_eq!(dirs.len(), 4);
}

#[test]
fn test_first_crop_leaves_output_root_empty() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(dir.path());
    let image = test_image(H, W, ImageFormat::Png);
    let (_, _, extraction) = pipeline.extract(&image).unwrap();
    let (_, expected) = extraction.crops().next().unwrap();

    for _ in 0..5 {
        let bytes = pipeline.first_crop(&image).unwrap().unwrap();
        assert_eq!(codec::decode(&bytes, None).unwrap().pixels(), expected.pixels());
    }
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

    let empty = pipeline_with(FakeSegmenter::empty(2), settings(dir.path()));
    assert!(empty.first_crop(&image).unwrap().is_none());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_crops_base64_in_emission_order() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(dir.path());
    let image = test_image(H, W, ImageFormat::Png);

    let encoded = pipeline.crops_base64(&image).unwrap();
    assert!(encoded.failed.is_empty());
    let labels: Vec<_> = encoded.crops.iter().map(|c| c.class_name.as_str()).collect();
    assert_eq!(labels, ["circle", "square"]);
    assert_eq!(encoded.crops[0].index, 0);
    assert!((encoded.crops[1].score - 0.8).abs() < f32::EPSILON);

    for (crop, roi) in encoded.crops.iter().zip(fake_rois(H, W)) {
        let decoded = codec::from_base64(&crop.data, None).unwrap();
        assert_eq!(decoded.format(), ImageFormat::Png);
        assert_eq!(decoded.dims(), (roi.height(), roi.width()));
    }
}

#[test]
fn test_crops_base64_fixed_transport_format() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings(dir.path());
    settings.transport_format = FormatPolicy::Fixed(ImageFormat::Jpeg);
    let pipeline = pipeline_with(FakeSegmenter::new(2), settings);

    let encoded = pipeline
        .crops_base64(&test_image(H, W, ImageFormat::Png))
        .unwrap();
    let decoded = codec::from_base64(&encoded.crops[0].data, None).unwrap();
    assert_eq!(decoded.format(), ImageFormat::Jpeg);
}

#[test]
fn test_bad_instance_is_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline_with(FakeSegmenter::new(2).with_bad_instance(), settings(dir.path()));
    let image = test_image(H, W, ImageFormat::Png);

    let encoded = pipeline.crops_base64(&image).unwrap();
    assert_eq!(encoded.crops.len(), 2);
    assert_eq!(encoded.failed.len(), 1);
    assert_eq!(encoded.failed[0].index, 2);

    let saved = pipeline.extract_and_save(&image).unwrap();
    assert_eq!(saved.batch.len(), 2);
    assert_eq!(saved.failed[0].index, 2);
}

#[test]
fn test_no_detections() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline_with(FakeSegmenter::empty(2), settings(dir.path()));
    let image = test_image(H, W, ImageFormat::Png);

    let saved = pipeline.extract_and_save(&image).unwrap();
    assert!(saved.batch.is_empty());
    assert!(saved.batch.first().is_none());
    assert!(pipeline.crops_base64(&image).unwrap().crops.is_empty());
}

#[test]
fn test_visualize_returns_overlay_of_same_size() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(dir.path());

    let bytes = pipeline
        .visualize(&test_image(H, W, ImageFormat::Png))
        .unwrap();
    let overlay = codec::decode(&bytes, None).unwrap();
    assert_eq!(overlay.format(), OVERLAY_FORMAT);
    assert_eq!(overlay.dims(), (H, W));
}

#[test]
fn test_change_model_swaps_pair() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(dir.path());

    let names = vec!["BG".to_string(), "balloon".to_string()];
    let snapshot = pipeline.change_model("balloon", "fake:1", names).unwrap();
    assert_eq!(snapshot.name(), "balloon");
    assert_eq!(snapshot.generation(), 1);

    let encoded = pipeline
        .crops_base64(&test_image(H, W, ImageFormat::Png))
        .unwrap();
    // Class 2 has no name in the new table.
    assert_eq!(encoded.crops[0].class_name, "balloon");
    assert_eq!(encoded.crops[1].class_name, "2");
}

#[test]
fn test_failed_change_model_keeps_current() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(dir.path());
    let before = pipeline.registry().current();

    let err = pipeline
        .change_model("broken", "/nowhere/model.onnx", vec!["BG".into(), "x".into()])
        .unwrap_err();
    assert!(matches!(err, ServeError::ModelLoad(_)));

    let err = pipeline
        .change_model("short", "fake:3", vec!["BG".into(), "x".into()])
        .unwrap_err();
    assert!(matches!(err, ServeError::ClassNames(_)));

    let err = pipeline.change_model("empty", "fake:1", Vec::new()).unwrap_err();
    assert!(matches!(err, ServeError::ClassNames(_)));

    assert!(Arc::ptr_eq(&before, &pipeline.registry().current()));
}

#[test]
fn test_requests_never_see_mixed_models() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Arc::new(pipeline(dir.path()));

    let swapper = {
        let pipeline = Arc::clone(&pipeline);
        thread::spawn(move || {
            for i in 0..50 {
                let (source, names) = if i % 2 == 0 {
                    ("fake:1", vec!["BG".to_string(), "one".to_string()])
                } else {
                    ("fake:2", common::NAMES.iter().map(ToString::to_string).collect())
                };
                pipeline.change_model(&format!("m{i}"), source, names).unwrap();
            }
        })
    };

    let image = test_image(H, W, ImageFormat::Png);
    for _ in 0..50 {
        let (snapshot, result, _) = pipeline.extract(&image).unwrap();
        let expected = snapshot.model().num_classes().unwrap() + 1;
        assert_eq!(snapshot.class_names().len(), expected);
        assert_eq!(result.len(), 2);
    }
    swapper.join().unwrap();
    assert_eq!(pipeline.registry().current().generation(), 50);
}

#[test]
#[ignore = "requires yolo11n-seg.onnx and network access"]
fn test_real_model_extracts_instances() {
    use segment_serve::{OnnxSegmenter, Segmenter, download};

    let path = download::ensure_model(download::DEFAULT_SEGMENT_MODEL).unwrap();
    let model = OnnxSegmenter::load(path).unwrap();
    assert!(model.num_classes().unwrap() > 0);

    let image = test_image(320, 320, ImageFormat::Png);
    let results = model.detect(std::slice::from_ref(&image)).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].mask_shape(), image.dims());
}
