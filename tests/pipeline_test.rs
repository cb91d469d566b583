mod helpers;

use std::sync::Arc;

use caption_embed::dataset::{CaptionsDataset, DatasetOptions};
use caption_embed::embedding::EmbeddingArtifact;
use caption_embed::pipeline::{compute_captions_embeddings, PipelineOptions};
use helpers::{write_all_formats, write_file, FailingEncoder, RecordingEncoder, ShortEncoder, HIDDEN, SEQ_LEN};
use tempfile::TempDir;

fn options(batch_size: usize, num_workers: usize) -> PipelineOptions {
    PipelineOptions {
        batch_size,
        num_workers,
        show_progress: false,
    }
}

fn numbered_dataset(tmp: &TempDir, n: usize) -> Arc<CaptionsDataset> {
    let lines: String = (0..n)
        .map(|i| format!("{{\"caption\": \"caption {i}\", \"media_path\": \"set{}/clip{i}.mp4\"}}\n", i % 3))
        .collect();
    let path = write_file(tmp.path(), "meta.jsonl", &lines);
    Arc::new(CaptionsDataset::from_file(&path, &DatasetOptions::default()).unwrap())
}

#[test]
fn end_to_end_jsonl() {
    let tmp = TempDir::new().unwrap();
    let path = write_file(
        tmp.path(),
        "meta.jsonl",
        "{\"caption\":\"The video depicts a sunset.\",\"media_path\":\"a/b.mp4\"}\n\
         {\"caption\":\"A dog runs.\",\"media_path\":\"c/d.mp4\"}\n",
    );
    let dataset_options = DatasetOptions {
        remove_llm_prefixes: true,
        id_token: None,
        ..DatasetOptions::default()
    };
    let dataset = Arc::new(CaptionsDataset::from_file(&path, &dataset_options).unwrap());
    let out = tmp.path().join("out");
    let encoder = RecordingEncoder::default();

    let summary = compute_captions_embeddings(dataset, &out, &encoder, &options(2, 2)).unwrap();
    assert_eq!(summary.captions, 2);
    assert_eq!(summary.batches, 1);

    assert_eq!(
        encoder.batches(),
        vec![vec!["a sunset.".to_string(), "A dog runs.".to_string()]]
    );

    let first = EmbeddingArtifact::load(&out.join("a/b.safetensors")).unwrap();
    let second = EmbeddingArtifact::load(&out.join("c/d.safetensors")).unwrap();
    assert_eq!(first.prompt.as_deref(), Some("a sunset."));
    assert_eq!(second.prompt.as_deref(), Some("A dog runs."));
    assert_eq!(first.prompt_embeds.dim(), (SEQ_LEN, HIDDEN));
    assert_eq!(first.prompt_attention_mask.len(), SEQ_LEN);

    // Positional alignment: the fake encoder keys values off the prompt length.
    assert_eq!(first.prompt_embeds[[0, 0]], "a sunset.".len() as f32);
    assert_eq!(second.prompt_embeds[[0, 0]], "A dog runs.".len() as f32);
    assert_eq!(first.token_count(), 2);
    assert_eq!(second.token_count(), 3);
}

#[test]
fn batches_follow_dataset_order() {
    let tmp = TempDir::new().unwrap();
    let dataset = numbered_dataset(&tmp, 5);
    let encoder = RecordingEncoder::default();

    let summary =
        compute_captions_embeddings(dataset, &tmp.path().join("out"), &encoder, &options(2, 2)).unwrap();
    assert_eq!(summary.batches, 3);

    let batches = encoder.batches();
    let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![2, 2, 1]);
    let flat: Vec<String> = batches.into_iter().flatten().collect();
    let expected: Vec<String> = (0..5).map(|i| format!("caption {i}")).collect();
    assert_eq!(flat, expected);
}

#[test]
fn worker_count_does_not_change_output() {
    let tmp = TempDir::new().unwrap();
    let dataset = numbered_dataset(&tmp, 11);

    let mut runs = Vec::new();
    for workers in [0, 1, 2, 4] {
        let encoder = RecordingEncoder::default();
        let out = tmp.path().join(format!("out-{workers}"));
        compute_captions_embeddings(Arc::clone(&dataset), &out, &encoder, &options(3, workers))
            .unwrap();
        runs.push(encoder.batches());

        for i in 0..11 {
            let artifact =
                EmbeddingArtifact::load(&out.join(format!("set{}/clip{i}.safetensors", i % 3)))
                    .unwrap();
            assert_eq!(artifact.prompt.as_deref(), Some(format!("caption {i}").as_str()));
        }
    }
    assert!(runs.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn existing_artifacts_are_overwritten() {
    let tmp = TempDir::new().unwrap();
    let dataset = numbered_dataset(&tmp, 1);
    let out = tmp.path().join("out");
    std::fs::create_dir_all(out.join("set0")).unwrap();
    std::fs::write(out.join("set0/clip0.safetensors"), b"stale").unwrap();

    compute_captions_embeddings(dataset, &out, &RecordingEncoder::default(), &options(4, 0)).unwrap();

    let artifact = EmbeddingArtifact::load(&out.join("set0/clip0.safetensors")).unwrap();
    assert_eq!(artifact.prompt.as_deref(), Some("caption 0"));
}

#[test]
fn encoder_failure_aborts_and_keeps_earlier_batches() {
    let tmp = TempDir::new().unwrap();
    let dataset = numbered_dataset(&tmp, 6);
    let out = tmp.path().join("out");
    let encoder = FailingEncoder::new(1);

    let err = compute_captions_embeddings(dataset, &out, &encoder, &options(2, 2)).unwrap_err();
    assert!(format!("{err:#}").contains("encoder out of memory"), "got: {err:#}");

    assert!(out.join("set0/clip0.safetensors").exists());
    assert!(out.join("set1/clip1.safetensors").exists());
    assert!(!out.join("set2/clip2.safetensors").exists());
    assert_eq!(*encoder.calls.lock().unwrap(), 2);
}

#[test]
fn misaligned_encoder_output_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let dataset = numbered_dataset(&tmp, 3);
    let out = tmp.path().join("out");

    let err = compute_captions_embeddings(dataset, &out, &ShortEncoder, &options(3, 0)).unwrap_err();
    assert!(err.to_string().contains("returned 2 embeddings"), "got: {err}");
    assert!(!out.join("set0/clip0.safetensors").exists());
}

#[test]
fn zero_batch_size_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let dataset = numbered_dataset(&tmp, 2);
    let encoder = RecordingEncoder::default();
    assert!(compute_captions_embeddings(dataset, &tmp.path().join("out"), &encoder, &options(0, 2)).is_err());
    assert!(encoder.batches().is_empty());
}

#[test]
fn empty_dataset_creates_output_dir_only() {
    let tmp = TempDir::new().unwrap();
    let path = write_file(tmp.path(), "meta.json", "[]");
    let dataset = Arc::new(CaptionsDataset::from_file(&path, &DatasetOptions::default()).unwrap());
    let out = tmp.path().join("out");

    let summary =
        compute_captions_embeddings(dataset, &out, &RecordingEncoder::default(), &options(8, 2)).unwrap();
    assert_eq!(summary.captions, 0);
    assert_eq!(summary.batches, 0);
    assert!(out.is_dir());
}

#[test]
fn every_format_produces_the_same_tree() {
    let tmp = TempDir::new().unwrap();
    let mut trees = Vec::new();
    for (i, path) in write_all_formats(tmp.path()).iter().enumerate() {
        let dataset = Arc::new(CaptionsDataset::from_file(path, &DatasetOptions::default()).unwrap());
        let out = tmp.path().join(format!("out{i}"));
        compute_captions_embeddings(dataset, &out, &RecordingEncoder::default(), &options(2, 1)).unwrap();

        let mut files: Vec<String> = ["videos/cat", "videos/dog", "clips/sea"]
            .iter()
            .map(|stem| format!("{stem}.safetensors"))
            .filter(|rel| out.join(rel).is_file())
            .collect();
        files.sort();
        trees.push(files);
    }
    assert_eq!(trees[0].len(), 3);
    assert_eq!(trees[0], trees[1]);
    assert_eq!(trees[1], trees[2]);
}
