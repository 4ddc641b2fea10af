use briny_layers::layers::{Activation, Dense, Flatten, Layer, MaxPool1D, Weights};
use briny_layers::modelio::{load_weights, save_weights, MAX_RANK};
use briny_layers::shape::{Padding, Shape};
use briny_layers::tensors::Tensor;
use briny_layers::{LayerError, Sequential};

fn stack() -> Vec<Box<dyn Layer>> {
    vec![
        Box::new(MaxPool1D::new("pool", &[1, 2, 1], &[1, 2, 1], Padding::Valid).unwrap())
            as Box<dyn Layer>,
        Box::new(Flatten::new("flatten")),
        Box::new(Dense::new("dense", 2, Activation::Relu).unwrap()),
    ]
}

fn built_model() -> Sequential {
    let mut model = Sequential::new(Shape::unknown_batch(&[10, 3]), stack()).unwrap();
    model.build().unwrap();
    model
}

/// kernel column 0 sums everything, column 1 negates the sum.
fn summing_weights() -> Weights {
    let mut kernel = Vec::with_capacity(30);
    for _ in 0..15 {
        kernel.push(1.0);
        kernel.push(-1.0);
    }
    let mut w = Weights::new();
    w.insert("dense/kernel".to_owned(), Tensor::new(vec![15, 2], kernel));
    w.insert("dense/bias".to_owned(), Tensor::new(vec![2], vec![0.0, 0.0]));
    w
}

fn ramp_input() -> Tensor<f32> {
    Tensor::new(vec![1, 10, 3], (0..30).map(|v| v as f32).collect())
}

fn temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("briny_layers_{}_{name}", std::process::id()))
}

#[test]
fn test_shape_chain() {
    let model = Sequential::new(Shape::unknown_batch(&[10, 3]), stack()).unwrap();
    assert_eq!(model.output_shape().unwrap(), Shape::unknown_batch(&[2]));
    assert_eq!(model.layers().len(), 3);
    assert!(model.layer("flatten").is_some());
    assert!(!model.is_built());
}

#[test]
fn test_incompatible_stack_is_rejected() {
    let layers: Vec<Box<dyn Layer>> =
        vec![Box::new(Dense::new("dense", 4, Activation::Linear).unwrap())];
    let err = Sequential::new(Shape::unknown_batch(&[10, 3]), layers).err().unwrap();
    assert!(matches!(err, LayerError::Shape(_)));
}

#[test]
fn test_duplicate_names_are_rejected() {
    let layers: Vec<Box<dyn Layer>> =
        vec![Box::new(Flatten::default()), Box::new(Flatten::default())];
    let err = Sequential::new(Shape::unknown_batch(&[4, 2]), layers).err().unwrap();
    assert!(matches!(err, LayerError::InvalidConfiguration(_)));
}

#[test]
fn test_layer_names_cannot_contain_key_separator() {
    let layers: Vec<Box<dyn Layer>> =
        vec![Box::new(Dense::new("block/dense", 2, Activation::Linear).unwrap())];
    let err = Sequential::new(Shape::unknown_batch(&[4]), layers).err().unwrap();
    assert!(matches!(err, LayerError::InvalidConfiguration(_)));
}

#[test]
fn test_model_accepts_its_own_weights() {
    let mut model = built_model();
    model.set_weights(summing_weights()).unwrap();
    let snapshot = model.weights();
    model.set_weights(snapshot.clone()).unwrap();
    assert_eq!(model.weights(), snapshot);
}

#[test]
fn test_build_declares_dense_variables() {
    let model = built_model();
    let graph = model.graph().unwrap();
    let names: Vec<&str> = graph.variable_names().collect();
    assert_eq!(names, vec!["dense/kernel", "dense/bias"]);

    let dense = model.layer("dense").unwrap();
    assert_eq!(dense.param_count(), 32);
    assert_eq!(dense.weights()["kernel"].shape, vec![15, 2]);
}

#[test]
fn test_build_twice_fails() {
    let mut model = built_model();
    assert!(matches!(model.build(), Err(LayerError::InvalidConfiguration(_))));
}

#[test]
fn test_predict_requires_build() {
    let model = Sequential::new(Shape::unknown_batch(&[10, 3]), stack()).unwrap();
    assert!(model.predict(&ramp_input()).is_err());
}

#[test]
fn test_predict_end_to_end() {
    let mut model = built_model();
    model.set_weights(summing_weights()).unwrap();

    // pooled steps keep the odd rows: sum = 9 * (1 + 3 + 5 + 7 + 9) + 5 * 3
    let out = model.predict(&ramp_input()).unwrap();
    assert_eq!(out.shape, vec![1, 2]);
    assert_eq!(out.data, vec![240.0, 0.0]);

    let training = model.forward_training(&ramp_input()).unwrap();
    assert_eq!(training, out);
}

#[test]
fn test_zero_initialised_dense_outputs_zero() {
    let model = built_model();
    let out = model.predict(&ramp_input()).unwrap();
    assert_eq!(out.data, vec![0.0, 0.0]);
}

#[test]
fn test_dense_rejects_bad_weights() {
    let mut model = built_model();
    let mut w = summing_weights();
    w.insert("dense/kernel".to_owned(), Tensor::new(vec![2, 15], vec![0.0; 30]));
    assert!(matches!(model.set_weights(w), Err(LayerError::MismatchedWeights { .. })));

    let mut extra = Weights::new();
    extra.insert("pool/kernel".to_owned(), Tensor::new(vec![1], vec![1.0]));
    assert!(matches!(model.set_weights(extra), Err(LayerError::MismatchedWeights { .. })));

    let mut unknown = Weights::new();
    unknown.insert("conv/kernel".to_owned(), Tensor::new(vec![1], vec![1.0]));
    assert!(matches!(model.set_weights(unknown), Err(LayerError::MismatchedWeights { .. })));
}

#[test]
fn test_failed_set_weights_leaves_model_unchanged() {
    let layers: Vec<Box<dyn Layer>> = vec![
        Box::new(Dense::new("a", 2, Activation::Linear).unwrap()),
        Box::new(Dense::new("b", 2, Activation::Linear).unwrap()),
    ];
    let mut model = Sequential::new(Shape::unknown_batch(&[2]), layers).unwrap();
    model.build().unwrap();
    let before = model.weights();

    let mut w = Weights::new();
    w.insert("a/kernel".to_owned(), Tensor::new(vec![2, 2], vec![9.0; 4]));
    w.insert("a/bias".to_owned(), Tensor::new(vec![2], vec![9.0; 2]));
    w.insert("b/kernel".to_owned(), Tensor::new(vec![3, 2], vec![1.0; 6]));
    w.insert("b/bias".to_owned(), Tensor::new(vec![2], vec![1.0; 2]));
    assert!(matches!(model.set_weights(w), Err(LayerError::MismatchedWeights { .. })));
    assert_eq!(model.weights(), before);

    // a file holding the same bad share is rejected the same way
    let path = temp_path("partial.bplw");
    let mut bad = before.clone();
    bad.insert("a/bias".to_owned(), Tensor::new(vec![2], vec![5.0; 2]));
    bad.insert("b/bias".to_owned(), Tensor::new(vec![3], vec![5.0; 3]));
    save_weights(&path, &bad).unwrap();
    assert!(model.load_weights(&path).is_err());
    assert_eq!(model.weights(), before);
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn test_unbuilt_dense_rejects_weights() {
    let mut dense = Dense::new("dense", 2, Activation::Linear).unwrap();
    assert!(dense.weights().is_empty());
    assert!(dense.set_weights(Weights::new()).is_ok());

    let mut w = Weights::new();
    w.insert("kernel".to_owned(), Tensor::new(vec![15, 2], vec![0.0; 30]));
    assert!(matches!(dense.set_weights(w), Err(LayerError::MismatchedWeights { .. })));
}

#[test]
fn test_invalid_dense_config() {
    assert!(matches!(
        Dense::new("dense", 0, Activation::Linear),
        Err(LayerError::InvalidConfiguration(_))
    ));
}

#[test]
fn test_weights_round_trip_through_file() {
    let path = temp_path("model.bplw");
    let mut model = built_model();
    model.set_weights(summing_weights()).unwrap();
    model.save_weights(&path).unwrap();

    let mut restored = built_model();
    restored.load_weights(&path).unwrap();
    assert_eq!(restored.weights(), model.weights());
    assert_eq!(
        restored.predict(&ramp_input()).unwrap(),
        model.predict(&ramp_input()).unwrap()
    );

    std::fs::remove_file(&path).unwrap();
}

#[test]
fn test_load_rejects_bad_magic() {
    let path = temp_path("bad_magic.bplw");
    std::fs::write(&path, b"nope\0\0\0\0").unwrap();
    assert!(matches!(load_weights(&path), Err(LayerError::CorruptWeights(_))));
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn test_load_reports_truncation_as_io() {
    let path = temp_path("truncated.bplw");
    save_weights(&path, &summing_weights()).unwrap();
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();
    assert!(matches!(load_weights(&path), Err(LayerError::Io(_))));
    std::fs::remove_file(&path).unwrap();
}

/// A file with one entry named `w` and the given raw shape header.
fn write_header_only(path: &std::path::Path, dims: &[u64]) {
    let mut bytes = b"bplw".to_vec();
    bytes.extend_from_slice(&1u32.to_le_bytes());
    bytes.extend_from_slice(&1u32.to_le_bytes());
    bytes.push(b'w');
    bytes.extend_from_slice(&(dims.len() as u64).to_le_bytes());
    for d in dims {
        bytes.extend_from_slice(&d.to_le_bytes());
    }
    std::fs::write(path, bytes).unwrap();
}

#[test]
fn test_load_rejects_bad_shape_headers() {
    let path = temp_path("bad_shape.bplw");

    write_header_only(&path, &vec![1; MAX_RANK + 1]);
    assert!(matches!(load_weights(&path), Err(LayerError::CorruptWeights(_))));

    write_header_only(&path, &[u64::MAX, 2]);
    assert!(matches!(load_weights(&path), Err(LayerError::CorruptWeights(_))));

    // a plausible header whose data is missing is a truncated file
    write_header_only(&path, &[2, 2]);
    assert!(matches!(load_weights(&path), Err(LayerError::Io(_))));

    std::fs::remove_file(&path).unwrap();
}

#[test]
fn test_summary_lists_layers() {
    let model = built_model();
    let summary = model.summary().unwrap();
    assert!(summary.contains("pool"));
    assert!(summary.contains("[-1, 5, 3]"));
    assert!(summary.contains("[-1, 15]"));
    assert!(summary.ends_with("Total params: 32"));
}

#[test]
fn test_flatten_needs_known_dims() {
    let flatten = Flatten::default();
    assert!(matches!(
        flatten.compute_output_shape(&Shape::from_dims(vec![4, -1, 2])),
        Err(LayerError::Shape(_))
    ));
    assert!(matches!(
        flatten.compute_output_shape(&Shape::unknown_batch(&[])),
        Err(LayerError::Shape(_))
    ));
    assert_eq!(
        flatten.compute_output_shape(&Shape::unknown_batch(&[4, 3, 2])).unwrap(),
        Shape::unknown_batch(&[24])
    );
}
