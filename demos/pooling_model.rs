use briny_layers::layers::{Activation, Dense, Flatten, Layer, MaxPool1D, Weights};
use briny_layers::shape::{Padding, Shape};
use briny_layers::tensors::Tensor;
use briny_layers::Sequential;

const PATH_TO_WEIGHTS: &str = "checkpoints/pooling/model.bplw";

fn layers() -> Vec<Box<dyn Layer>> {
    vec![
        Box::new(MaxPool1D::new("pool", &[1, 2, 1], &[1, 2, 1], Padding::Same).unwrap())
            as Box<dyn Layer>,
        Box::new(Flatten::new("flatten")),
        Box::new(Dense::new("classifier", 3, Activation::Relu).unwrap()),
    ]
}

fn main() {
    // 9 steps of a 2-channel signal
    let input_shape = Shape::unknown_batch(&[9, 2]);

    let mut model = Sequential::new(input_shape.clone(), layers()).unwrap();
    model.build().unwrap();
    println!("{}", model.summary().unwrap());

    // stand-in for a trainer: deterministic weights
    let kernel: Vec<f32> = (0..30).map(|i| ((i % 7) as f32 - 3.0) * 0.1).collect();
    let mut weights = Weights::new();
    weights.insert("classifier/kernel".to_owned(), Tensor::new(vec![10, 3], kernel));
    weights.insert("classifier/bias".to_owned(), Tensor::new(vec![3], vec![0.1, 0.0, -0.1]));
    model.set_weights(weights).unwrap();

    std::fs::create_dir_all("checkpoints/pooling").unwrap();
    model.save_weights(PATH_TO_WEIGHTS).unwrap();
    println!("Saved weights to {PATH_TO_WEIGHTS}");

    let signal = Tensor::new(
        vec![1, 9, 2],
        (0..18).map(|i| ((i as f32) * 0.7).sin()).collect(),
    );

    let mut restored = Sequential::new(input_shape, layers()).unwrap();
    restored.build().unwrap();
    restored.load_weights(PATH_TO_WEIGHTS).unwrap();

    let before = model.predict(&signal).unwrap();
    let after = restored.predict(&signal).unwrap();
    println!("original: {:?}", before.data);
    println!("restored: {:?}", after.data);
    assert_eq!(before, after);
}
