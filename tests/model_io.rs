//! Model persistence round-trips through the text format.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};

use facto_rs::{load_model, save_model, Problem, Rating, TrainParams, Trainer};

fn train_10x10() -> facto_rs::Model {
    let mut triples = Vec::new();
    for u in 0..10u32 {
        for v in 0..10u32 {
            if (u * 7 + v * 3) % 4 == 0 {
                triples.push(Rating {
                    u,
                    v,
                    r: 1.0 + ((u + 2 * v) % 5) as f32,
                });
            }
        }
    }
    let mut prob = Problem::new(10, 10, triples).unwrap();
    let params = TrainParams {
        k: 4,
        nr_iters: 10,
        quiet: true,
        seed: 42,
        ..Default::default()
    };
    Trainer::new(params).train(&mut prob, None).unwrap()
}

#[test]
fn test_save_load_predictions_match() {
    let model = train_10x10();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.txt");
    {
        let mut w = BufWriter::new(File::create(&path).unwrap());
        save_model(&model, &mut w).unwrap();
        w.flush().unwrap();
    }
    let loaded = load_model(BufReader::new(File::open(&path).unwrap())).unwrap();

    assert_eq!(loaded.m(), model.m());
    assert_eq!(loaded.n(), model.n());
    assert_eq!(loaded.k(), model.k());
    for u in 0..10 {
        for v in 0..10 {
            let diff = (loaded.predict(u, v) - model.predict(u, v)).abs();
            assert!(diff < 1e-5, "round-trip drift {diff} at ({u}, {v})");
        }
    }
}

#[test]
fn test_truncated_file_is_corrupt() {
    let model = train_10x10();
    let mut bytes = Vec::new();
    save_model(&model, &mut bytes).unwrap();
    bytes.truncate(bytes.len() / 2);

    let result = load_model(std::io::Cursor::new(bytes));
    assert!(matches!(result, Err(facto_rs::Error::CorruptModel(_))));
}
