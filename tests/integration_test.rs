// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Integration tests for the post-processing library

use ndarray::{Array2, array};
use pose6d_postprocess::codec::{decode, encode};
use pose6d_postprocess::nms::suppress_per_class;
use pose6d_postprocess::selection::{MATCH_TOLERANCE, map_selected};
use pose6d_postprocess::{
    CameraIntrinsics, Detections, ObjectExtents, PipelineState, PostprocessConfig,
    PostprocessError, PostprocessPipeline, PostprocessWarning, PriorBoxes,
};

const LINEMOD_CAMERA: [[f32; 3]; 3] = [
    [572.4114, 0.0, 325.2611],
    [0.0, 573.570_43, 242.049_04],
    [0.0, 0.0, 1.0],
];

fn driller_config() -> PostprocessConfig {
    PostprocessConfig::new()
        .with_class_names(["background", "driller", "glue"])
        .with_class_arg(Some(0))
        .with_score_threshold(0.5)
        .with_nms_threshold(0.45)
}

fn priors() -> PriorBoxes {
    PriorBoxes::from_rows(&[
        [0.2, 0.2, 0.2, 0.2],
        [0.21, 0.2, 0.2, 0.2],
        [0.7, 0.6, 0.3, 0.3],
        [0.5, 0.5, 0.1, 0.1],
    ])
    .unwrap()
}

#[test]
fn test_config_defaults() {
    let config = PostprocessConfig::default();
    assert!((config.score_threshold - 0.5).abs() < f32::EPSILON);
    assert!((config.nms_threshold - 0.45).abs() < f32::EPSILON);
    assert_eq!(config.max_detections, 300);
    assert_eq!(config.top_k, 200);
}

#[test]
fn test_end_to_end_two_classes() {
    let pipeline = PostprocessPipeline::new(driller_config(), priors()).unwrap();
    let detections = array![
        // driller, strong
        [0.0f32, 0.0, 0.0, 0.0, 0.05, 0.9, 0.05],
        // driller, nearly the same box as anchor 0
        [0.0, 0.0, 0.0, 0.0, 0.1, 0.8, 0.1],
        // glue
        [0.0, 0.0, 0.0, 0.0, 0.2, 0.1, 0.7],
        // background
        [0.0, 0.0, 0.0, 0.0, 0.9, 0.05, 0.05]
    ];
    let poses = array![
        [0.1f32, 0.0, 0.0, 0.0, 0.0, 1.0],
        [0.2, 0.0, 0.0, 0.0, 0.0, 2.0],
        [0.3, 0.0, 0.0, 0.0, 0.0, 3.0],
        [0.4, 0.0, 0.0, 0.0, 0.0, 4.0]
    ];

    let output = pipeline
        .run(detections.view(), Some(poses.view()), (480, 640), 1.0)
        .unwrap();

    assert_eq!(output.len(), 2);
    assert_eq!(output.selection.as_slice(), &[0, 2]);
    assert_eq!(output.boxes2d[0].class_name, "driller");
    assert_eq!(output.boxes2d[1].class_name, "glue");
    assert_eq!(output.poses6d.len(), output.boxes2d.len());
    assert!((output.poses6d[0].translation[2] - 1.0).abs() < 1e-6);
    assert!((output.poses6d[1].translation[2] - 3.0).abs() < 1e-6);
    assert!((output.poses6d[1].rotation_vector[0] - 0.3 * std::f32::consts::PI).abs() < 1e-5);
    assert!(output.visited(PipelineState::Posed));
    assert_eq!(output.verbose(), "1 driller, 1 glue, ");
}

#[test]
fn test_end_to_end_empty() {
    let pipeline = PostprocessPipeline::new(driller_config(), priors()).unwrap();
    let mut detections = Array2::<f32>::zeros((4, 7));
    detections.column_mut(4).fill(1.0);
    let poses = Array2::<f32>::zeros((4, 6));

    let output = pipeline
        .run(detections.view(), Some(poses.view()), (480, 640), 1.0)
        .unwrap();

    assert!(output.is_empty());
    assert!(output.poses6d.is_empty());
    assert!(output.selection.is_empty());
    assert_eq!(output.warnings, vec![PostprocessWarning::EmptyDetections]);
    assert_eq!(
        output.states.last().copied(),
        Some(PipelineState::Final)
    );
    assert!(!output.visited(PipelineState::Posed));
}

#[test]
fn test_carried_indices_match_value_mapping() {
    let p = priors();
    let deltas = array![
        [0.5f32, -0.3, 0.2, 0.1],
        [-0.4, 0.6, -0.1, 0.3],
        [0.0, 0.0, 0.0, 0.0],
        [1.0, 1.0, -0.5, -0.5]
    ];
    let boxes = decode(deltas.view(), &p, [0.1, 0.1, 0.2, 0.2]).unwrap();
    let scores = array![[0.9f32, 0.1], [0.7, 0.2], [0.3, 0.6], [0.2, 0.8]];
    let box_data = ndarray::concatenate(ndarray::Axis(1), &[boxes.view(), scores.view()]).unwrap();

    let candidates =
        pose6d_postprocess::filter::filter_by_score(boxes.view(), scores.view(), 0.5).unwrap();
    let survivors = suppress_per_class(&candidates, 0.45, 200);

    let mapped = map_selected(box_data.view(), &survivors, MATCH_TOLERANCE).unwrap();
    assert_eq!(mapped.as_slice(), survivors.anchor_indices.as_slice());

    let back = encode(boxes.view(), &p, [0.1, 0.1, 0.2, 0.2]).unwrap();
    for (a, b) in deltas.iter().zip(back.iter()) {
        assert!((a - b).abs() < 1e-4);
    }
}

#[test]
fn test_nms_is_idempotent() {
    let detections = Detections::from_candidates(&[
        ([0.1, 0.1, 0.4, 0.4], 0.9, 0, 0),
        ([0.12, 0.1, 0.42, 0.4], 0.8, 0, 1),
        ([0.6, 0.6, 0.9, 0.9], 0.7, 0, 2),
        ([0.1, 0.1, 0.4, 0.4], 0.6, 1, 3),
    ]);
    let once = suppress_per_class(&detections, 0.45, 200);
    let twice = suppress_per_class(&once, 0.45, 200);
    assert_eq!(once, twice);
    assert_eq!(once.anchor_indices, vec![0, 2, 3]);
}

#[test]
fn test_project_detected_pose() {
    let pipeline = PostprocessPipeline::new(driller_config(), priors()).unwrap();
    let detections = array![
        [0.0f32, 0.0, 0.0, 0.0, 0.05, 0.9, 0.05],
        [0.0, 0.0, 0.0, 0.0, 0.9, 0.05, 0.05],
        [0.0, 0.0, 0.0, 0.0, 0.9, 0.05, 0.05],
        [0.0, 0.0, 0.0, 0.0, 0.9, 0.05, 0.05]
    ];
    let poses = array![
        [0.0f32, 0.0, 0.0, 0.0, 0.0, 1.0],
        [0.0, 0.0, 0.0, 0.0, 0.0, 1.0],
        [0.0, 0.0, 0.0, 0.0, 0.0, 1.0],
        [0.0, 0.0, 0.0, 0.0, 0.0, 1.0]
    ];
    let output = pipeline
        .run(detections.view(), Some(poses.view()), (480, 640), 1.0)
        .unwrap();

    let camera = CameraIntrinsics::from_matrix(LINEMOD_CAMERA).unwrap();
    let extents = ObjectExtents::new()
        .with("driller", [0.26, 0.26, 0.23])
        .unwrap()
        .with("glue", [0.09, 0.05, 0.18])
        .unwrap();

    let cuboid = extents.project(&output.poses6d[0], &camera).unwrap().unwrap();
    let (u, v) = cuboid.iter().fold((0.0, 0.0), |(u, v), p| (u + p[0], v + p[1]));
    // symmetric cuboid on the optical axis projects around the principal point
    assert!((u / 8.0 - 325.2611).abs() < 1e-2);
    assert!((v / 8.0 - 242.049_04).abs() < 1e-2);
}

#[test]
fn test_run_raw_rejects_batches() {
    let pipeline = PostprocessPipeline::new(driller_config(), priors()).unwrap();
    let data = vec![0.0f32; 2 * 4 * 7];
    let err = pipeline
        .run_raw((&data[..], &[2, 4, 7][..]), None, (480, 640), 1.0)
        .unwrap_err();
    assert!(matches!(err, PostprocessError::ShapeMismatch(_)));
}

#[cfg(feature = "serde")]
#[test]
fn test_serde_round_trip() {
    let config = driller_config().with_renormalize(true);
    let json = serde_json::to_string(&config).unwrap();
    let back: PostprocessConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(config, back);

    let pipeline = PostprocessPipeline::new(driller_config(), priors()).unwrap();
    let detections = array![
        [0.0f32, 0.0, 0.0, 0.0, 0.05, 0.9, 0.05],
        [0.0, 0.0, 0.0, 0.0, 0.9, 0.05, 0.05],
        [0.0, 0.0, 0.0, 0.0, 0.9, 0.05, 0.05],
        [0.0, 0.0, 0.0, 0.0, 0.9, 0.05, 0.05]
    ];
    let output = pipeline.run(detections.view(), None, (480, 640), 1.0).unwrap();
    let json = serde_json::to_value(&output).unwrap();
    assert_eq!(json["boxes2d"][0]["class_name"], "driller");
    assert_eq!(json["states"][0], "RawOutput");
}
